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
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::common::status::Status;
use crate::common::types::UniqueId;
use crate::runtime::stream_load_pipe::StreamLoadPipe;

/// Load id -> pipe, so a fragment can find the reader side of the pipe the
/// routine load consumer is writing into.
#[derive(Default)]
pub struct LoadStreamMgr {
    streams: Mutex<HashMap<UniqueId, Arc<StreamLoadPipe>>>,
}

impl LoadStreamMgr {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UniqueId, Arc<StreamLoadPipe>>> {
        self.streams.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn put(&self, id: UniqueId, pipe: Arc<StreamLoadPipe>) -> Result<(), Status> {
        let mut guard = self.lock();
        if guard.contains_key(&id) {
            return Err(Status::already_exists(format!(
                "id already exist in load stream manager, id={id}"
            )));
        }
        guard.insert(id, pipe);
        tracing::debug!(load_id = %id, "put stream load pipe");
        Ok(())
    }

    pub fn get(&self, id: UniqueId) -> Result<Arc<StreamLoadPipe>, Status> {
        self.lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| Status::not_found(format!("stream load pipe not found, id={id}")))
    }

    pub fn remove(&self, id: UniqueId) -> Option<Arc<StreamLoadPipe>> {
        let removed = self.lock().remove(&id);
        if removed.is_some() {
            tracing::debug!(load_id = %id, "remove stream load pipe");
        }
        removed
    }

    /// Removes the entry only if it still holds `pipe`; a newer pipe
    /// registered under the same id is left alone.
    pub fn remove_if_same(&self, id: UniqueId, pipe: &Arc<StreamLoadPipe>) -> bool {
        let mut guard = self.lock();
        match guard.get(&id) {
            Some(current) if Arc::ptr_eq(current, pipe) => {
                guard.remove(&id);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
