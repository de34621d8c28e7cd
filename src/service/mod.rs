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
pub mod backend_service;
pub mod frontend_client;

use std::sync::Arc;

use crate::common::status::Status;
use crate::runtime::load_stream_mgr::LoadStreamMgr;
use crate::runtime::routine_load::kafka_consumer::RdKafkaSourceFactory;
use crate::runtime::routine_load::task_executor::{RoutineLoadOptions, RoutineLoadTaskExecutor};
use crate::runtime::stream_load_executor::{FragmentExecutor, FragmentStreamLoadExecutor};

/// Wires the executor to librdkafka and to the configured FE.
pub fn new_routine_load_executor(
    fragment_executor: Arc<dyn FragmentExecutor>,
) -> Result<RoutineLoadTaskExecutor, Status> {
    let options = RoutineLoadOptions::from_config();
    let load_stream_mgr = Arc::new(LoadStreamMgr::new());
    let stream_load_executor = Arc::new(FragmentStreamLoadExecutor::new(
        Arc::clone(&load_stream_mgr),
        fragment_executor,
        Arc::new(frontend_client::ThriftFrontendClient::from_config()),
        options.fragment_thread_num,
    ));
    RoutineLoadTaskExecutor::new(
        options,
        load_stream_mgr,
        stream_load_executor,
        Arc::new(RdKafkaSourceFactory),
    )
}
