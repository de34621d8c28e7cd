// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Typed accessors over the process config. Each falls back to the built-in
//! default when no config file is installed.

use std::collections::BTreeMap;

use crate::common::app_config::config as routine_load_app_config;

pub(crate) fn be_host() -> String {
    routine_load_app_config()
        .ok()
        .map(|c| c.server.host.clone())
        .unwrap_or_else(|| "0.0.0.0".to_string())
}

pub(crate) fn be_port() -> u16 {
    routine_load_app_config()
        .ok()
        .map(|c| c.server.be_port)
        .unwrap_or(9060)
}

pub(crate) fn frontend_host() -> String {
    routine_load_app_config()
        .ok()
        .map(|c| c.frontend.host.clone())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

pub(crate) fn frontend_port() -> u16 {
    routine_load_app_config()
        .ok()
        .map(|c| c.frontend.port)
        .unwrap_or(9020)
}

pub(crate) fn frontend_rpc_timeout_ms() -> u64 {
    routine_load_app_config()
        .ok()
        .map(|c| c.frontend.rpc_timeout_ms)
        .unwrap_or(5_000)
}

pub(crate) fn routine_load_thread_pool_size() -> usize {
    routine_load_app_config()
        .ok()
        .map(|c| c.routine_load.thread_pool_size)
        .unwrap_or(10)
}

pub(crate) fn routine_load_queue_size() -> usize {
    routine_load_app_config()
        .ok()
        .map(|c| c.routine_load.queue_size)
        .unwrap_or(1024)
}

pub(crate) fn routine_load_fragment_thread_num() -> usize {
    routine_load_app_config()
        .ok()
        .map(|c| c.routine_load.fragment_thread_num)
        .filter(|n| *n > 0)
        .unwrap_or(10)
}

pub(crate) fn routine_load_pipe_max_buffered_bytes() -> usize {
    routine_load_app_config()
        .ok()
        .map(|c| c.routine_load.pipe_max_buffered_bytes)
        .filter(|n| *n > 0)
        .unwrap_or(1024 * 1024)
}

pub(crate) fn kafka_poll_timeout_ms() -> u64 {
    routine_load_app_config()
        .ok()
        .map(|c| c.routine_load.kafka_poll_timeout_ms)
        .unwrap_or(1_000)
}

pub(crate) fn routine_load_default_max_interval_s() -> i64 {
    routine_load_app_config()
        .ok()
        .map(|c| c.routine_load.default_max_interval_s)
        .unwrap_or(5)
}

pub(crate) fn routine_load_default_max_batch_rows() -> i64 {
    routine_load_app_config()
        .ok()
        .map(|c| c.routine_load.default_max_batch_rows)
        .unwrap_or(1024)
}

pub(crate) fn routine_load_default_max_batch_size() -> i64 {
    routine_load_app_config()
        .ok()
        .map(|c| c.routine_load.default_max_batch_size)
        .unwrap_or(100 * 1024 * 1024)
}

pub(crate) fn kafka_default_properties() -> BTreeMap<String, String> {
    routine_load_app_config()
        .ok()
        .map(|c| c.routine_load.kafka_properties.clone())
        .unwrap_or_default()
}

/// EnvFilter expression for logging: `log_filter` wins over `log_level`.
pub fn log_filter_expr() -> String {
    routine_load_app_config()
        .ok()
        .map(|c| c.log_filter.clone().unwrap_or_else(|| c.log_level.clone()))
        .unwrap_or_else(|| "info".to_string())
}
