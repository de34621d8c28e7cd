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
/// Pulls one batch from an external source into the task's pipe.
///
/// `init` and `start` run on the task's worker thread, in that order.
/// `cancel` may be called from any thread at any time and is idempotent;
/// a running `start` returns with a cancelled status soon after. Cancelling
/// the task's pipe has the same effect on `start`.
pub trait DataConsumer: Send + Sync {
    /// Connects to the source and positions it at the task's offsets.
    fn init(&self) -> Result<(), crate::common::status::Status>;

    /// Pulls until a batch limit is reached, then finishes the pipe. On any
    /// failure the pipe is cancelled and the failure returned.
    fn start(&self) -> Result<(), crate::common::status::Status>;

    fn cancel(&self);
}
