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
pub mod common;
pub mod runtime;
pub mod service;
pub mod wire;

// StarRocks-BE-like folder layout, with `novarocks_*` convenience aliases.
pub use common::app_config as novarocks_config;
pub use common::logging as novarocks_logging;

pub use common::status::{Status, StatusCode};
pub use common::types::UniqueId;
pub use runtime::load_stream_mgr::LoadStreamMgr;
pub use runtime::routine_load::task_executor::{RoutineLoadOptions, RoutineLoadTaskExecutor};
pub use runtime::stream_load_pipe::StreamLoadPipe;
pub use service::backend_service::{BackendServiceConfig, start_backend_service};
pub use service::new_routine_load_executor;
