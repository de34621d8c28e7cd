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
//! Admission and execution of routine load tasks.
//!
//! FE hands a task over once per batch. The executor keeps every admitted
//! task in `task_map` until its finish callback runs, so a resubmitted id is
//! acknowledged without running twice. Each task runs on one worker thread
//! from start to end: consume into the pipe, wait for the fragment, commit.

use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::common::config::{
    kafka_default_properties, kafka_poll_timeout_ms, routine_load_default_max_batch_rows,
    routine_load_default_max_batch_size, routine_load_default_max_interval_s,
    routine_load_fragment_thread_num, routine_load_pipe_max_buffered_bytes,
    routine_load_queue_size, routine_load_thread_pool_size,
};
use crate::common::status::{Status, panic_message};
use crate::common::types::UniqueId;
use crate::runtime::load_stream_mgr::LoadStreamMgr;
use crate::runtime::metrics::{
    RESULT_DUPLICATED, RESULT_FAILED, RESULT_REJECTED, RESULT_SUBMITTED, RESULT_SUCCEEDED,
    RoutineLoadMetrics,
};
use crate::runtime::routine_load::data_consumer::DataConsumer;
use crate::runtime::routine_load::kafka_consumer::{KafkaDataConsumer, KafkaSourceFactory};
use crate::runtime::stream_load_context::{BatchLimits, LoadSourceInfo, StreamLoadContext};
use crate::runtime::stream_load_executor::StreamLoadExecutor;
use crate::runtime::stream_load_pipe::StreamLoadPipe;
use crate::runtime::worker_pool::WorkerPool;
use crate::wire::backend_service::TRoutineLoadTask;

#[derive(Clone, Debug)]
pub struct RoutineLoadOptions {
    pub thread_pool_size: usize,
    /// Tasks allowed to wait for a free worker; 0 rejects every submit.
    pub queue_size: usize,
    pub fragment_thread_num: usize,
    pub pipe_max_buffered_bytes: usize,
    pub kafka_poll_timeout: Duration,
    pub default_limits: BatchLimits,
    pub kafka_default_properties: BTreeMap<String, String>,
}

impl RoutineLoadOptions {
    pub fn from_config() -> Self {
        Self {
            thread_pool_size: routine_load_thread_pool_size(),
            queue_size: routine_load_queue_size(),
            fragment_thread_num: routine_load_fragment_thread_num(),
            pipe_max_buffered_bytes: routine_load_pipe_max_buffered_bytes(),
            kafka_poll_timeout: Duration::from_millis(kafka_poll_timeout_ms().max(1)),
            default_limits: BatchLimits {
                max_interval: Duration::from_secs(
                    routine_load_default_max_interval_s().max(1) as u64
                ),
                max_batch_rows: routine_load_default_max_batch_rows(),
                max_batch_size: routine_load_default_max_batch_size(),
            },
            kafka_default_properties: kafka_default_properties(),
        }
    }
}

impl Default for RoutineLoadOptions {
    fn default() -> Self {
        Self {
            thread_pool_size: 10,
            queue_size: 1024,
            fragment_thread_num: 10,
            pipe_max_buffered_bytes: 1024 * 1024,
            kafka_poll_timeout: Duration::from_millis(1_000),
            default_limits: BatchLimits::default(),
            kafka_default_properties: BTreeMap::new(),
        }
    }
}

type TaskMap = HashMap<UniqueId, Arc<StreamLoadContext>>;

#[derive(Clone)]
pub struct RoutineLoadTaskExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    task_map: Mutex<TaskMap>,
    thread_pool: WorkerPool,
    load_stream_mgr: Arc<LoadStreamMgr>,
    stream_load_executor: Arc<dyn StreamLoadExecutor>,
    kafka_factory: Arc<dyn KafkaSourceFactory>,
    options: RoutineLoadOptions,
    metrics: RoutineLoadMetrics,
}

impl RoutineLoadTaskExecutor {
    pub fn new(
        options: RoutineLoadOptions,
        load_stream_mgr: Arc<LoadStreamMgr>,
        stream_load_executor: Arc<dyn StreamLoadExecutor>,
        kafka_factory: Arc<dyn KafkaSourceFactory>,
    ) -> Result<Self, Status> {
        let metrics = RoutineLoadMetrics::new()?;
        let thread_pool = WorkerPool::new(
            "routine_load_task",
            options.thread_pool_size,
            options.queue_size,
        );
        Ok(Self {
            inner: Arc::new(ExecutorInner {
                task_map: Mutex::new(HashMap::new()),
                thread_pool,
                load_stream_mgr,
                stream_load_executor,
                kafka_factory,
                options,
                metrics,
            }),
        })
    }

    /// Admits a task. A task id that is still active is acknowledged with
    /// `Ok` and not run again.
    pub fn submit_task(&self, task: &TRoutineLoadTask) -> Result<(), Status> {
        let inner = &self.inner;
        let id = UniqueId::from(&task.id);
        let mut task_map = inner.lock_task_map();
        if task_map.contains_key(&id) {
            tracing::info!(
                task_id = %id,
                job_id = task.job_id,
                txn_id = task.txn_id,
                "routine load task has already been submitted"
            );
            inner.metrics.inc_task(RESULT_DUPLICATED);
            return Ok(());
        }

        let source = match LoadSourceInfo::from_task(task) {
            Ok(source) => source,
            Err(st) => {
                tracing::warn!(
                    task_id = %id,
                    job_id = task.job_id,
                    txn_id = task.txn_id,
                    error = %st,
                    "reject routine load task"
                );
                inner.metrics.inc_task(RESULT_REJECTED);
                return Err(st);
            }
        };
        let limits = BatchLimits::resolve(task, &inner.options.default_limits);
        let ctx = Arc::new(StreamLoadContext::new(task, source, limits));
        task_map.insert(id, Arc::clone(&ctx));

        let exec_inner = Arc::clone(inner);
        let exec_ctx = Arc::clone(&ctx);
        let accepted = inner.thread_pool.offer(move || {
            let finish_inner = Arc::clone(&exec_inner);
            exec_inner.exec_task(&exec_ctx, move |ctx| finish_inner.finish_task(ctx));
        });
        if !accepted {
            task_map.remove(&id);
            inner.metrics.set_task_count(task_map.len());
            drop(task_map);
            inner.metrics.inc_task(RESULT_REJECTED);
            tracing::warn!(
                task_id = %id,
                job_id = ctx.job_id,
                txn_id = ctx.txn_id,
                "failed to submit routine load task: thread pool is full or shut down"
            );
            return Err(Status::service_unavailable(
                "failed to submit routine load task",
            ));
        }

        inner.metrics.set_task_count(task_map.len());
        inner.metrics.inc_task(RESULT_SUBMITTED);
        tracing::info!(
            task_id = %id,
            job_id = ctx.job_id,
            txn_id = ctx.txn_id,
            label = %ctx.label,
            current_tasks = task_map.len(),
            "submit a new routine load task"
        );
        Ok(())
    }

    pub fn active_task_count(&self) -> usize {
        self.inner.lock_task_map().len()
    }

    pub fn contains_task(&self, id: UniqueId) -> bool {
        self.inner.lock_task_map().contains_key(&id)
    }

    pub fn metrics(&self) -> &RoutineLoadMetrics {
        &self.inner.metrics
    }

    pub fn load_stream_mgr(&self) -> &Arc<LoadStreamMgr> {
        &self.inner.load_stream_mgr
    }

    /// Stops admitting tasks and waits for queued and running ones to end.
    pub fn shutdown(&self) {
        tracing::info!(
            active_tasks = self.active_task_count(),
            "shutting down routine load task executor"
        );
        self.inner.thread_pool.shutdown();
    }
}

impl ExecutorInner {
    fn lock_task_map(&self) -> MutexGuard<'_, TaskMap> {
        self.task_map.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn create_consumer(
        &self,
        ctx: &Arc<StreamLoadContext>,
    ) -> (Arc<StreamLoadPipe>, Box<dyn DataConsumer>) {
        match &ctx.source {
            LoadSourceInfo::Kafka(_) => {
                let pipe = Arc::new(StreamLoadPipe::new(self.options.pipe_max_buffered_bytes));
                let consumer = KafkaDataConsumer::new(
                    Arc::clone(ctx),
                    Arc::clone(&pipe),
                    Arc::clone(&self.kafka_factory),
                    self.options.kafka_default_properties.clone(),
                    self.options.kafka_poll_timeout,
                    self.metrics.clone(),
                );
                (pipe, Box::new(consumer))
            }
        }
    }

    fn exec_task<F>(&self, ctx: &Arc<StreamLoadContext>, finish_cb: F)
    where
        F: FnOnce(&Arc<StreamLoadContext>),
    {
        tracing::info!(task_id = %ctx.id, "begin to execute routine load task");
        let (pipe, consumer) = self.create_consumer(ctx);
        ctx.set_body_sink(Arc::clone(&pipe));

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.run_task(ctx, &pipe, consumer.as_ref())
        }))
        .unwrap_or_else(|payload| {
            Err((
                Status::internal_error(format!(
                    "routine load task panicked: {}",
                    panic_message(payload.as_ref())
                )),
                "routine load task panicked",
            ))
        });
        if let Err((st, err_msg)) = outcome {
            let handled = catch_unwind(AssertUnwindSafe(|| {
                self.err_handler(ctx, consumer.as_ref(), st, err_msg)
            }));
            if let Err(payload) = handled {
                tracing::error!(
                    task_id = %ctx.id,
                    txn_id = ctx.txn_id,
                    "routine load error handler panicked: {}",
                    panic_message(payload.as_ref())
                );
                pipe.cancel("routine load error handler panicked");
            }
        }
        // The fragment deregisters the pipe itself; this covers the steps
        // that fail before it was armed.
        self.load_stream_mgr.remove_if_same(ctx.id, &pipe);
        finish_cb(ctx);
    }

    fn run_task(
        &self,
        ctx: &Arc<StreamLoadContext>,
        pipe: &Arc<StreamLoadPipe>,
        consumer: &dyn DataConsumer,
    ) -> Result<(), (Status, &'static str)> {
        consumer
            .init()
            .map_err(|st| (st, "failed to init consumer"))?;
        self.load_stream_mgr
            .put(ctx.id, Arc::clone(pipe))
            .map_err(|st| (st, "failed to add pipe"))?;
        self.stream_load_executor
            .execute_plan_fragment(ctx)
            .map_err(|st| (st, "failed to execute plan fragment"))?;
        consumer.start().map_err(|st| (st, "consuming failed"))?;
        ctx.future.wait().map_err(|st| (st, "consume failed"))?;
        ctx.record_load_cost();
        self.stream_load_executor
            .commit_txn(ctx)
            .map_err(|st| (st, "commit failed"))?;
        ctx.set_need_rollback(false);
        Ok(())
    }

    fn err_handler(
        &self,
        ctx: &StreamLoadContext,
        consumer: &dyn DataConsumer,
        st: Status,
        err_msg: &str,
    ) {
        tracing::warn!(
            task_id = %ctx.id,
            job_id = ctx.job_id,
            txn_id = ctx.txn_id,
            error = %st,
            "{err_msg}"
        );
        let reason = st.message.clone();
        ctx.set_status(st);
        if ctx.take_need_rollback() {
            self.stream_load_executor.rollback_txn(ctx);
        }
        if let Some(body_sink) = ctx.body_sink() {
            body_sink.cancel(&reason);
        }
        consumer.cancel();
    }

    fn finish_task(&self, ctx: &Arc<StreamLoadContext>) {
        let remaining = {
            let mut task_map = self.lock_task_map();
            task_map.remove(&ctx.id);
            task_map.len()
        };
        self.metrics.set_task_count(remaining);
        let cost_ms = ctx.elapsed().as_millis() as u64;
        match ctx.status() {
            None => {
                self.metrics.inc_task(RESULT_SUCCEEDED);
                tracing::info!(
                    task_id = %ctx.id,
                    job_id = ctx.job_id,
                    txn_id = ctx.txn_id,
                    label = %ctx.label,
                    cost_ms,
                    current_tasks = remaining,
                    "finish routine load task"
                );
            }
            Some(st) => {
                self.metrics.inc_task(RESULT_FAILED);
                tracing::info!(
                    task_id = %ctx.id,
                    job_id = ctx.job_id,
                    txn_id = ctx.txn_id,
                    label = %ctx.label,
                    cost_ms,
                    current_tasks = remaining,
                    status = %st,
                    "finish routine load task with error"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::routine_load::kafka_consumer::{KafkaMessageSource, KafkaPollEvent};
    use crate::runtime::stream_load_context::KafkaLoadInfo;
    use crate::wire::backend_service::TKafkaLoadInfo;
    use crate::wire::types::{TLoadSourceType, TUniqueId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NeverOpens;

    impl KafkaSourceFactory for NeverOpens {
        fn open(
            &self,
            _info: &KafkaLoadInfo,
            _properties: &BTreeMap<String, String>,
        ) -> Result<Box<dyn KafkaMessageSource>, Status> {
            Err(Status::initialization_failed("no broker"))
        }
    }

    #[derive(Default)]
    struct CountingTxn {
        fragments: AtomicUsize,
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
    }

    impl StreamLoadExecutor for CountingTxn {
        fn execute_plan_fragment(&self, _ctx: &Arc<StreamLoadContext>) -> Result<(), Status> {
            self.fragments.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn commit_txn(&self, _ctx: &StreamLoadContext) -> Result<(), Status> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn rollback_txn(&self, _ctx: &StreamLoadContext) {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanicsOnOpen {
        opened: AtomicUsize,
    }

    impl KafkaSourceFactory for PanicsOnOpen {
        fn open(
            &self,
            _info: &KafkaLoadInfo,
            _properties: &BTreeMap<String, String>,
        ) -> Result<Box<dyn KafkaMessageSource>, Status> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            panic!("librdkafka handle creation blew up");
        }
    }

    struct IdleSource;

    impl KafkaMessageSource for IdleSource {
        fn poll(&mut self, timeout: Duration) -> Result<KafkaPollEvent, Status> {
            std::thread::sleep(timeout);
            Ok(KafkaPollEvent::Timeout)
        }
    }

    struct OpensIdle;

    impl KafkaSourceFactory for OpensIdle {
        fn open(
            &self,
            _info: &KafkaLoadInfo,
            _properties: &BTreeMap<String, String>,
        ) -> Result<Box<dyn KafkaMessageSource>, Status> {
            Ok(Box::new(IdleSource))
        }
    }

    fn task(hi: i64) -> TRoutineLoadTask {
        TRoutineLoadTask {
            type_: TLoadSourceType::KAFKA,
            job_id: 1,
            id: TUniqueId::new(hi, 0),
            txn_id: 100 + hi,
            auth_code: 0,
            db: None,
            tbl: None,
            label: None,
            max_interval_s: None,
            max_batch_rows: None,
            max_batch_size: None,
            kafka_load_info: Some(TKafkaLoadInfo {
                brokers: "b:9092".into(),
                topic: "t".into(),
                partition_begin_offset: BTreeMap::from([(0, 0)]),
                properties: None,
            }),
        }
    }

    fn wait_idle(executor: &RoutineLoadTaskExecutor) {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while executor.active_task_count() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn init_failure_rolls_back_once_and_finishes() {
        let txn = Arc::new(CountingTxn::default());
        let mgr = Arc::new(LoadStreamMgr::new());
        let executor = RoutineLoadTaskExecutor::new(
            RoutineLoadOptions::default(),
            Arc::clone(&mgr),
            Arc::clone(&txn) as Arc<dyn StreamLoadExecutor>,
            Arc::new(NeverOpens),
        ).unwrap();
        executor.submit_task(&task(1)).unwrap();
        wait_idle(&executor);

        assert_eq!(executor.active_task_count(), 0);
        assert_eq!(txn.fragments.load(Ordering::SeqCst), 0);
        assert_eq!(txn.commits.load(Ordering::SeqCst), 0);
        assert_eq!(txn.rollbacks.load(Ordering::SeqCst), 1);
        assert!(mgr.is_empty());
        assert_eq!(executor.metrics().task_total(RESULT_FAILED), 1);
        executor.shutdown();
    }

    #[test]
    fn panicking_collaborator_still_rolls_back_and_finishes() {
        let txn = Arc::new(CountingTxn::default());
        let factory = Arc::new(PanicsOnOpen {
            opened: AtomicUsize::new(0),
        });
        let options = RoutineLoadOptions {
            thread_pool_size: 1,
            ..RoutineLoadOptions::default()
        };
        let executor = RoutineLoadTaskExecutor::new(
            options,
            Arc::new(LoadStreamMgr::new()),
            Arc::clone(&txn) as Arc<dyn StreamLoadExecutor>,
            Arc::clone(&factory) as Arc<dyn KafkaSourceFactory>,
        ).unwrap();

        executor.submit_task(&task(3)).unwrap();
        wait_idle(&executor);
        assert!(!executor.contains_task(UniqueId::new(3, 0)));
        assert_eq!(txn.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(txn.commits.load(Ordering::SeqCst), 0);

        // The id is free again and the single worker is still alive.
        executor.submit_task(&task(3)).unwrap();
        wait_idle(&executor);
        assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
        assert_eq!(txn.rollbacks.load(Ordering::SeqCst), 2);
        assert_eq!(executor.metrics().task_total(RESULT_FAILED), 2);
        assert_eq!(executor.metrics().task_total(RESULT_DUPLICATED), 0);
        executor.shutdown();
    }

    #[test]
    fn err_handler_cancels_the_consumer() {
        let txn = Arc::new(CountingTxn::default());
        let executor = RoutineLoadTaskExecutor::new(
            RoutineLoadOptions::default(),
            Arc::new(LoadStreamMgr::new()),
            Arc::clone(&txn) as Arc<dyn StreamLoadExecutor>,
            Arc::new(OpensIdle),
        )
        .unwrap();
        let mut t = task(5);
        t.max_interval_s = Some(30);
        let source = LoadSourceInfo::from_task(&t).unwrap();
        let limits = BatchLimits::resolve(&t, &BatchLimits::default());
        let ctx = Arc::new(StreamLoadContext::new(&t, source, limits));
        let (_pipe, consumer) = executor.inner.create_consumer(&ctx);
        consumer.init().unwrap();

        executor.inner.err_handler(
            &ctx,
            consumer.as_ref(),
            Status::internal_error("fragment exploded"),
            "consume failed",
        );
        assert_eq!(txn.rollbacks.load(Ordering::SeqCst), 1);
        assert!(!ctx.need_rollback());

        // No body sink was armed, so only the consumer's own flag stops it.
        let started = std::time::Instant::now();
        let err = consumer.start().unwrap_err();
        assert_eq!(err.message, "kafka consumer is cancelled");
        assert!(started.elapsed() < Duration::from_secs(5));
        executor.shutdown();
    }

    #[test]
    fn unknown_source_is_rejected_before_admission() {
        let txn = Arc::new(CountingTxn::default());
        let executor = RoutineLoadTaskExecutor::new(
            RoutineLoadOptions::default(),
            Arc::new(LoadStreamMgr::new()),
            Arc::clone(&txn) as Arc<dyn StreamLoadExecutor>,
            Arc::new(NeverOpens),
        ).unwrap();
        let mut bad = task(2);
        bad.type_ = TLoadSourceType(999);
        let err = executor.submit_task(&bad).unwrap_err();
        assert_eq!(err.message, "unknown load source type");
        assert!(!executor.contains_task(UniqueId::new(2, 0)));
        assert_eq!(txn.rollbacks.load(Ordering::SeqCst), 0);
        executor.shutdown();
    }

    #[test]
    fn options_from_config_fall_back_to_defaults() {
        let opts = RoutineLoadOptions::from_config();
        assert!(opts.thread_pool_size > 0);
        assert!(opts.pipe_max_buffered_bytes > 0);
        assert!(opts.default_limits.max_interval >= Duration::from_secs(1));
    }
}
