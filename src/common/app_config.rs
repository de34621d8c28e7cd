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
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<RoutineLoadConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

fn installed() -> Result<&'static RoutineLoadConfig> {
    CONFIG
        .get()
        .ok_or_else(|| anyhow!("routine load config is not initialized"))
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static RoutineLoadConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = RoutineLoadConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    installed()
}

pub fn init_from_env_or_default() -> Result<&'static RoutineLoadConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = RoutineLoadConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    installed()
}

pub fn config() -> Result<&'static RoutineLoadConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("NOVAROCKS_ROUTINE_LOAD_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidate = PathBuf::from("routine_load.toml");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow!(
        "missing config file: set $NOVAROCKS_ROUTINE_LOAD_CONFIG or create ./routine_load.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct RoutineLoadConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "novarocks_routine_load=debug,rdkafka=warn"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub frontend: FrontendConfig,

    #[serde(default)]
    pub routine_load: RoutineLoadSection,
}

impl RoutineLoadConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: RoutineLoadConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }
}

impl Default for RoutineLoadConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            server: ServerConfig::default(),
            frontend: FrontendConfig::default(),
            routine_load: RoutineLoadSection::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_be_port")]
    pub be_port: u16,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}
fn default_be_port() -> u16 {
    9060
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            be_port: default_be_port(),
        }
    }
}

/// Where transaction commit/rollback RPCs are sent.
#[derive(Clone, Debug, Deserialize)]
pub struct FrontendConfig {
    #[serde(default = "default_frontend_host")]
    pub host: String,
    #[serde(default = "default_frontend_port")]
    pub port: u16,
    #[serde(default = "default_frontend_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

fn default_frontend_host() -> String {
    "127.0.0.1".to_string()
}
fn default_frontend_port() -> u16 {
    9020
}
fn default_frontend_rpc_timeout_ms() -> u64 {
    5_000
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            host: default_frontend_host(),
            port: default_frontend_port(),
            rpc_timeout_ms: default_frontend_rpc_timeout_ms(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RoutineLoadSection {
    #[serde(default = "default_thread_pool_size")]
    pub thread_pool_size: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_fragment_thread_num")]
    pub fragment_thread_num: usize,
    #[serde(default = "default_pipe_max_buffered_bytes")]
    pub pipe_max_buffered_bytes: usize,
    #[serde(default = "default_kafka_poll_timeout_ms")]
    pub kafka_poll_timeout_ms: u64,
    #[serde(default = "default_max_interval_s")]
    pub default_max_interval_s: i64,
    #[serde(default = "default_max_batch_rows")]
    pub default_max_batch_rows: i64,
    #[serde(default = "default_max_batch_size")]
    pub default_max_batch_size: i64,
    /// librdkafka properties applied to every consumer before task properties.
    #[serde(default)]
    pub kafka_properties: BTreeMap<String, String>,
}

fn default_thread_pool_size() -> usize {
    10
}
fn default_queue_size() -> usize {
    1024
}
fn default_fragment_thread_num() -> usize {
    10
}
fn default_pipe_max_buffered_bytes() -> usize {
    1024 * 1024
}
fn default_kafka_poll_timeout_ms() -> u64 {
    1_000
}
fn default_max_interval_s() -> i64 {
    5
}
fn default_max_batch_rows() -> i64 {
    1024
}
fn default_max_batch_size() -> i64 {
    100 * 1024 * 1024
}

impl Default for RoutineLoadSection {
    fn default() -> Self {
        Self {
            thread_pool_size: default_thread_pool_size(),
            queue_size: default_queue_size(),
            fragment_thread_num: default_fragment_thread_num(),
            pipe_max_buffered_bytes: default_pipe_max_buffered_bytes(),
            kafka_poll_timeout_ms: default_kafka_poll_timeout_ms(),
            default_max_interval_s: default_max_interval_s(),
            default_max_batch_rows: default_max_batch_rows(),
            default_max_batch_size: default_max_batch_size(),
            kafka_properties: BTreeMap::new(),
        }
    }
}
