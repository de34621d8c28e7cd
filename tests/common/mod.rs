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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::collections::{BTreeMap, VecDeque};
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tempfile::TempDir;

use novarocks_routine_load::common::status::Status;
use novarocks_routine_load::novarocks_config;
use novarocks_routine_load::novarocks_logging;
use novarocks_routine_load::runtime::load_stream_mgr::LoadStreamMgr;
use novarocks_routine_load::runtime::routine_load::kafka_consumer::{
    KafkaMessageSource, KafkaPollEvent, KafkaRecord, KafkaSourceFactory,
};
use novarocks_routine_load::runtime::routine_load::task_executor::{
    RoutineLoadOptions, RoutineLoadTaskExecutor,
};
use novarocks_routine_load::runtime::stream_load_context::{
    KafkaLoadInfo, LoadCounters, StreamLoadContext,
};
use novarocks_routine_load::runtime::stream_load_executor::{
    FragmentExecutor, FragmentStreamLoadExecutor, FrontendTxnClient,
};
use novarocks_routine_load::runtime::stream_load_pipe::StreamLoadPipe;
use novarocks_routine_load::wire::backend_service::{TKafkaLoadInfo, TRoutineLoadTask};
use novarocks_routine_load::wire::frontend_service::{
    TLoadTxnCommitRequest, TLoadTxnResult, TLoadTxnRollbackRequest,
};
use novarocks_routine_load::wire::types::{TLoadSourceType, TStatus, TStatusCode, TUniqueId};

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_routine_load.toml");

        let config_content = r#"
log_level = "debug"

[server]
host = "127.0.0.1"
be_port = 0

[frontend]
host = "127.0.0.1"
port = 9020
rpc_timeout_ms = 1000

[routine_load]
thread_pool_size = 2
queue_size = 4
fragment_thread_num = 2
pipe_max_buffered_bytes = 4096
kafka_poll_timeout_ms = 20
default_max_interval_s = 2

[routine_load.kafka_properties]
"session.timeout.ms" = "6000"
"#;

        std::fs::write(&config_path, config_content)?;

        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    pub fn init_logging(&self) {
        novarocks_logging::init_with_level("debug");
    }

    pub fn load_config(
        &self,
    ) -> anyhow::Result<&'static novarocks_config::RoutineLoadConfig> {
        novarocks_config::init_from_path(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

/// A Kafka task reading `partitions` from offset 0.
pub fn kafka_task(hi: i64, partitions: &[i32]) -> TRoutineLoadTask {
    TRoutineLoadTask {
        type_: TLoadSourceType::KAFKA,
        job_id: 7,
        id: TUniqueId::new(hi, 1),
        txn_id: 1_000 + hi,
        auth_code: 99,
        db: Some("db1".to_string()),
        tbl: Some("tbl1".to_string()),
        label: Some(format!("label_{hi}")),
        max_interval_s: Some(5),
        max_batch_rows: None,
        max_batch_size: None,
        kafka_load_info: Some(TKafkaLoadInfo {
            brokers: "broker1:9092".to_string(),
            topic: "events".to_string(),
            partition_begin_offset: partitions.iter().map(|p| (*p, 0)).collect(),
            properties: None,
        }),
    }
}

pub fn message(partition: i32, offset: i64, payload: &str) -> KafkaPollEvent {
    KafkaPollEvent::Message(KafkaRecord {
        partition,
        offset,
        payload: Some(payload.as_bytes().to_vec()),
    })
}

/// Replays the same event script for every opened reader, then idles.
pub struct ScriptedKafka {
    events: Vec<KafkaPollEvent>,
    open_error: Mutex<Option<Status>>,
    poll_error_after: Option<usize>,
    pub opened: AtomicUsize,
    pub last_properties: Mutex<BTreeMap<String, String>>,
}

impl ScriptedKafka {
    pub fn new(events: Vec<KafkaPollEvent>) -> Self {
        Self {
            events,
            open_error: Mutex::new(None),
            poll_error_after: None,
            opened: AtomicUsize::new(0),
            last_properties: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn failing_open(status: Status) -> Self {
        let kafka = Self::new(Vec::new());
        *kafka.open_error.lock().unwrap() = Some(status);
        kafka
    }

    /// Fails the poll that follows the first `n` scripted events.
    pub fn failing_poll_after(events: Vec<KafkaPollEvent>, n: usize) -> Self {
        let mut kafka = Self::new(events);
        kafka.poll_error_after = Some(n);
        kafka
    }
}

struct ScriptedSource {
    events: VecDeque<KafkaPollEvent>,
    polled: usize,
    poll_error_after: Option<usize>,
}

impl KafkaMessageSource for ScriptedSource {
    fn poll(&mut self, timeout: Duration) -> Result<KafkaPollEvent, Status> {
        if self.poll_error_after == Some(self.polled) {
            return Err(Status::internal_error("broker connection lost"));
        }
        self.polled += 1;
        match self.events.pop_front() {
            Some(event) => Ok(event),
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(10)));
                Ok(KafkaPollEvent::Timeout)
            }
        }
    }
}

impl KafkaSourceFactory for ScriptedKafka {
    fn open(
        &self,
        _info: &KafkaLoadInfo,
        properties: &BTreeMap<String, String>,
    ) -> Result<Box<dyn KafkaMessageSource>, Status> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.last_properties.lock().unwrap() = properties.clone();
        if let Some(st) = self.open_error.lock().unwrap().clone() {
            return Err(st);
        }
        Ok(Box::new(ScriptedSource {
            events: self.events.iter().cloned().collect(),
            polled: 0,
            poll_error_after: self.poll_error_after,
        }))
    }
}

/// Records every txn call; commit answers with `commit_status`.
pub struct RecordingFrontend {
    pub commits: Mutex<Vec<TLoadTxnCommitRequest>>,
    pub rollbacks: Mutex<Vec<TLoadTxnRollbackRequest>>,
    pub commit_status: Mutex<TStatus>,
}

impl RecordingFrontend {
    pub fn new() -> Self {
        Self {
            commits: Mutex::new(Vec::new()),
            rollbacks: Mutex::new(Vec::new()),
            commit_status: Mutex::new(TStatus::new(TStatusCode::OK, None)),
        }
    }

    pub fn commit_count(&self) -> usize {
        self.commits.lock().unwrap().len()
    }

    pub fn rollback_count(&self) -> usize {
        self.rollbacks.lock().unwrap().len()
    }
}

impl FrontendTxnClient for RecordingFrontend {
    fn load_txn_commit(&self, request: TLoadTxnCommitRequest) -> Result<TLoadTxnResult, Status> {
        self.commits.lock().unwrap().push(request);
        Ok(TLoadTxnResult {
            status: self.commit_status.lock().unwrap().clone(),
        })
    }

    fn load_txn_rollback(
        &self,
        request: TLoadTxnRollbackRequest,
    ) -> Result<TLoadTxnResult, Status> {
        self.rollbacks.lock().unwrap().push(request);
        Ok(TLoadTxnResult {
            status: TStatus::new(TStatusCode::OK, None),
        })
    }
}

/// Reads the pipe to EOF and counts one row per line.
pub struct DrainingFragment {
    pub received: Mutex<Vec<u8>>,
    pub runs: AtomicUsize,
    last_run: Mutex<Option<(Arc<StreamLoadContext>, Arc<StreamLoadPipe>)>>,
    fail_with: Option<Status>,
}

impl DrainingFragment {
    pub fn new() -> Self {
        Self {
            received: Mutex::new(Vec::new()),
            runs: AtomicUsize::new(0),
            last_run: Mutex::new(None),
            fail_with: None,
        }
    }

    /// Drains the pipe, then reports `status`.
    pub fn failing(status: Status) -> Self {
        Self {
            fail_with: Some(status),
            ..Self::new()
        }
    }

    /// Context and pipe of the latest run. Taking them releases the only
    /// handle the fragment keeps.
    pub fn take_last_run(&self) -> Option<(Arc<StreamLoadContext>, Arc<StreamLoadPipe>)> {
        self.last_run.lock().unwrap().take()
    }

    pub fn received_lines(&self) -> Vec<String> {
        String::from_utf8(self.received.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl FragmentExecutor for DrainingFragment {
    fn execute(
        &self,
        ctx: &Arc<StreamLoadContext>,
        pipe: Arc<StreamLoadPipe>,
    ) -> Result<LoadCounters, Status> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        *self.last_run.lock().unwrap() = Some((Arc::clone(ctx), Arc::clone(&pipe)));
        let mut buf = Vec::new();
        pipe.reader()
            .read_to_end(&mut buf)
            .map_err(|e| Status::cancelled(e.to_string()))?;
        let rows = buf.iter().filter(|b| **b == b'\n').count() as i64;
        let bytes = buf.len() as i64;
        self.received.lock().unwrap().extend_from_slice(&buf);
        if let Some(st) = &self.fail_with {
            return Err(st.clone());
        }
        Ok(LoadCounters {
            loaded_rows: rows,
            filtered_rows: 0,
            unselected_rows: 0,
            loaded_bytes: bytes,
        })
    }
}

/// Executor wired to scripted Kafka, a draining fragment and a recording FE.
pub struct Harness {
    pub executor: RoutineLoadTaskExecutor,
    pub load_stream_mgr: Arc<LoadStreamMgr>,
    pub kafka: Arc<ScriptedKafka>,
    pub fragment: Arc<DrainingFragment>,
    pub frontend: Arc<RecordingFrontend>,
}

impl Harness {
    pub fn new(kafka: ScriptedKafka, fragment: DrainingFragment) -> Self {
        Self::with_options(test_options(), kafka, fragment)
    }

    pub fn with_options(
        options: RoutineLoadOptions,
        kafka: ScriptedKafka,
        fragment: DrainingFragment,
    ) -> Self {
        let load_stream_mgr = Arc::new(LoadStreamMgr::new());
        let kafka = Arc::new(kafka);
        let fragment = Arc::new(fragment);
        let frontend = Arc::new(RecordingFrontend::new());
        let stream_load_executor = Arc::new(FragmentStreamLoadExecutor::new(
            Arc::clone(&load_stream_mgr),
            Arc::clone(&fragment) as Arc<dyn FragmentExecutor>,
            Arc::clone(&frontend) as Arc<dyn FrontendTxnClient>,
            2,
        ));
        let executor = RoutineLoadTaskExecutor::new(
            options,
            Arc::clone(&load_stream_mgr),
            stream_load_executor,
            Arc::clone(&kafka) as Arc<dyn KafkaSourceFactory>,
        )
        .unwrap();
        Self {
            executor,
            load_stream_mgr,
            kafka,
            fragment,
            frontend,
        }
    }

    /// Waits until no task is active.
    pub fn wait_idle(&self) -> bool {
        wait_for(
            || self.executor.active_task_count() == 0,
            Duration::from_secs(10),
        )
    }
}

/// Drops `ctx` and waits until no other holder keeps it alive.
pub fn assert_context_released(ctx: Arc<StreamLoadContext>) {
    let weak: Weak<StreamLoadContext> = Arc::downgrade(&ctx);
    drop(ctx);
    assert!(
        wait_for(|| weak.upgrade().is_none(), Duration::from_secs(5)),
        "task context still referenced after the task finished"
    );
}

pub fn test_options() -> RoutineLoadOptions {
    RoutineLoadOptions {
        thread_pool_size: 2,
        queue_size: 8,
        fragment_thread_num: 2,
        pipe_max_buffered_bytes: 1024,
        kafka_poll_timeout: Duration::from_millis(20),
        ..RoutineLoadOptions::default()
    }
}

/// Wait for a condition to become true, with timeout.
pub fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Run `f` and fail the test if it does not finish within `timeout`.
pub fn run_with_timeout<F, T>(timeout: Duration, f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    use std::sync::mpsc;

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });

    match rx.recv_timeout(timeout) {
        Ok(v) => v,
        Err(_) => panic!("test timed out after {:?}", timeout),
    }
}

/// Assert that a result is Ok and return the value.
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a result is Err.
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => e,
        }
    };
}
