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
//! Per-task state shared by the executor worker, the consumer and the fragment.
//!
//! A context is always handled as `Arc<StreamLoadContext>`: every party that
//! needs it past a call holds its own clone, and the context is dropped when
//! the last one lets go. Identity and source parameters are immutable; the
//! parts that change while the task runs live behind one mutex.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::common::status::Status;
use crate::common::types::UniqueId;
use crate::runtime::stream_load_pipe::StreamLoadPipe;
use crate::wire::backend_service::{TKafkaLoadInfo, TRoutineLoadTask};
use crate::wire::types::TLoadSourceType;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KafkaLoadInfo {
    pub brokers: String,
    pub topic: String,
    /// partition -> first offset to consume
    pub begin_offset: BTreeMap<i32, i64>,
    pub properties: BTreeMap<String, String>,
}

impl KafkaLoadInfo {
    pub fn from_thrift(info: &TKafkaLoadInfo) -> Result<Self, Status> {
        if info.brokers.trim().is_empty() {
            return Err(Status::invalid_argument("kafka brokers is empty"));
        }
        if info.topic.trim().is_empty() {
            return Err(Status::invalid_argument("kafka topic is empty"));
        }
        if info.partition_begin_offset.is_empty() {
            return Err(Status::invalid_argument("kafka partition offsets are empty"));
        }
        Ok(Self {
            brokers: info.brokers.clone(),
            topic: info.topic.clone(),
            begin_offset: info.partition_begin_offset.clone(),
            properties: info.properties.clone().unwrap_or_default(),
        })
    }

    /// Committed offsets before anything is consumed: one before each begin offset.
    pub fn initial_cmt_offset(&self) -> BTreeMap<i32, i64> {
        self.begin_offset
            .iter()
            .map(|(partition, offset)| (*partition, offset - 1))
            .collect()
    }
}

/// Source parameters, one variant per supported load source.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LoadSourceInfo {
    Kafka(KafkaLoadInfo),
}

impl LoadSourceInfo {
    /// Picks the source variant named by the task descriptor.
    pub fn from_task(task: &TRoutineLoadTask) -> Result<Self, Status> {
        match task.type_ {
            TLoadSourceType::KAFKA => {
                let info = task.kafka_load_info.as_ref().ok_or_else(|| {
                    Status::invalid_argument("kafka routine load task without kafka load info")
                })?;
                Ok(LoadSourceInfo::Kafka(KafkaLoadInfo::from_thrift(info)?))
            }
            _ => Err(Status::invalid_argument("unknown load source type")),
        }
    }

    pub fn source_type(&self) -> TLoadSourceType {
        match self {
            LoadSourceInfo::Kafka(_) => TLoadSourceType::KAFKA,
        }
    }
}

/// When a consumer stops pulling and finishes the batch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BatchLimits {
    pub max_interval: Duration,
    pub max_batch_rows: i64,
    pub max_batch_size: i64,
}

impl BatchLimits {
    /// Task values win when set and positive.
    pub fn resolve(task: &TRoutineLoadTask, defaults: &BatchLimits) -> Self {
        let positive = |v: Option<i64>| v.filter(|v| *v > 0);
        Self {
            max_interval: positive(task.max_interval_s)
                .map(|s| Duration::from_secs(s as u64))
                .unwrap_or(defaults.max_interval),
            max_batch_rows: positive(task.max_batch_rows).unwrap_or(defaults.max_batch_rows),
            max_batch_size: positive(task.max_batch_size).unwrap_or(defaults.max_batch_size),
        }
    }
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_interval: Duration::from_secs(5),
            max_batch_rows: 1024,
            max_batch_size: 100 * 1024 * 1024,
        }
    }
}

/// What the fragment reports back once it has loaded the batch.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LoadCounters {
    pub loaded_rows: i64,
    pub filtered_rows: i64,
    pub unselected_rows: i64,
    pub loaded_bytes: i64,
}

/// Write-once completion signal carrying the fragment status.
#[derive(Default)]
pub struct LoadFuture {
    result: Mutex<Option<Result<(), Status>>>,
    cv: Condvar,
}

impl LoadFuture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completes the future. Returns false if it was already completed.
    pub fn set(&self, result: Result<(), Status>) -> bool {
        let mut guard = self.result.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return false;
        }
        *guard = Some(result);
        self.cv.notify_all();
        true
    }

    pub fn is_ready(&self) -> bool {
        self.result
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn wait(&self) -> Result<(), Status> {
        let guard = self.result.lock().unwrap_or_else(|e| e.into_inner());
        let guard = self
            .cv
            .wait_while(guard, |r| r.is_none())
            .unwrap_or_else(|e| e.into_inner());
        (*guard)
            .clone()
            .unwrap_or_else(|| Err(Status::internal_error("load future woke without result")))
    }

    /// `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), Status>> {
        let guard = self.result.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |r| r.is_none())
            .unwrap_or_else(|e| e.into_inner());
        (*guard).clone()
    }
}

#[derive(Default)]
struct ContextState {
    status: Option<Status>,
    need_rollback: bool,
    body_sink: Option<Arc<StreamLoadPipe>>,
    load_cost_nanos: i64,
    counters: LoadCounters,
    received_rows: i64,
    received_bytes: i64,
    cmt_offset: BTreeMap<i32, i64>,
}

pub struct StreamLoadContext {
    pub id: UniqueId,
    pub job_id: i64,
    pub txn_id: i64,
    pub auth_code: i64,
    pub db: String,
    pub table: String,
    pub label: String,
    pub source: LoadSourceInfo,
    pub limits: BatchLimits,
    pub future: LoadFuture,
    start: Instant,
    state: Mutex<ContextState>,
}

impl StreamLoadContext {
    /// Builds the context for an admitted task. The txn was opened by FE, so
    /// `need_rollback` starts out true.
    pub fn new(task: &TRoutineLoadTask, source: LoadSourceInfo, limits: BatchLimits) -> Self {
        let cmt_offset = match &source {
            LoadSourceInfo::Kafka(info) => info.initial_cmt_offset(),
        };
        Self {
            id: UniqueId::from(&task.id),
            job_id: task.job_id,
            txn_id: task.txn_id,
            auth_code: task.auth_code,
            db: task.db.clone().unwrap_or_default(),
            table: task.tbl.clone().unwrap_or_default(),
            label: task.label.clone().unwrap_or_default(),
            source,
            limits,
            future: LoadFuture::new(),
            start: Instant::now(),
            state: Mutex::new(ContextState {
                need_rollback: true,
                cmt_offset,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn load_src_type(&self) -> TLoadSourceType {
        self.source.source_type()
    }

    pub fn kafka_info(&self) -> Option<&KafkaLoadInfo> {
        match &self.source {
            LoadSourceInfo::Kafka(info) => Some(info),
        }
    }

    /// `None` while the task has not failed.
    pub fn status(&self) -> Option<Status> {
        self.lock().status.clone()
    }

    pub fn set_status(&self, status: Status) {
        self.lock().status = Some(status);
    }

    pub fn need_rollback(&self) -> bool {
        self.lock().need_rollback
    }

    pub fn set_need_rollback(&self, need_rollback: bool) {
        self.lock().need_rollback = need_rollback;
    }

    /// Clears `need_rollback` and returns its previous value, so exactly one
    /// caller ever sees `true`.
    pub fn take_need_rollback(&self) -> bool {
        std::mem::replace(&mut self.lock().need_rollback, false)
    }

    pub fn set_body_sink(&self, pipe: Arc<StreamLoadPipe>) {
        self.lock().body_sink = Some(pipe);
    }

    pub fn body_sink(&self) -> Option<Arc<StreamLoadPipe>> {
        self.lock().body_sink.clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stamps the load cost as the time since the task was admitted.
    pub fn record_load_cost(&self) -> i64 {
        let nanos = i64::try_from(self.start.elapsed().as_nanos()).unwrap_or(i64::MAX);
        self.lock().load_cost_nanos = nanos;
        nanos
    }

    pub fn load_cost_nanos(&self) -> i64 {
        self.lock().load_cost_nanos
    }

    pub fn set_counters(&self, counters: LoadCounters) {
        self.lock().counters = counters;
    }

    pub fn counters(&self) -> LoadCounters {
        self.lock().counters
    }

    /// Records one consumed record at `partition`/`offset`. `bytes` is what
    /// reached the pipe; tombstones pass `None` and only move the offset.
    pub fn record_consumed(&self, partition: i32, offset: i64, bytes: Option<usize>) {
        let mut state = self.lock();
        if let Some(bytes) = bytes {
            state.received_rows += 1;
            state.received_bytes += bytes as i64;
        }
        state.cmt_offset.insert(partition, offset);
    }

    pub fn received_rows(&self) -> i64 {
        self.lock().received_rows
    }

    pub fn received_bytes(&self) -> i64 {
        self.lock().received_bytes
    }

    pub fn cmt_offset(&self) -> BTreeMap<i32, i64> {
        self.lock().cmt_offset.clone()
    }

    pub fn brief(&self) -> String {
        format!(
            "id={}, job_id={}, txn_id={}, label={}",
            self.id, self.job_id, self.txn_id, self.label
        )
    }
}

impl fmt::Debug for StreamLoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamLoadContext")
            .field("id", &self.id)
            .field("job_id", &self.job_id)
            .field("txn_id", &self.txn_id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
