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
//! Transaction driver seen by the routine load executor: start the load
//! fragment against the task's pipe, then commit or roll back the txn FE
//! opened for the task.

use std::sync::Arc;

use threadpool::ThreadPool;

use crate::common::status::{Status, check_thrift_status, panic_message};
use crate::runtime::load_stream_mgr::LoadStreamMgr;
use crate::runtime::stream_load_context::{LoadCounters, StreamLoadContext};
use crate::runtime::stream_load_pipe::StreamLoadPipe;
use crate::wire::frontend_service::{
    TKafkaRLTaskProgress, TLoadTxnCommitRequest, TLoadTxnResult, TLoadTxnRollbackRequest,
    TRLTaskTxnCommitAttachment, TTxnCommitAttachment,
};
use crate::wire::types::{TLoadType, TStatusCode};

/// `loadTxnCommit` / `loadTxnRollback` on the frontend.
pub trait FrontendTxnClient: Send + Sync {
    fn load_txn_commit(&self, request: TLoadTxnCommitRequest) -> Result<TLoadTxnResult, Status>;
    fn load_txn_rollback(&self, request: TLoadTxnRollbackRequest)
    -> Result<TLoadTxnResult, Status>;
}

/// Runs the sink-only plan of a load. Reads the pipe until EOF and reports
/// what it loaded.
pub trait FragmentExecutor: Send + Sync {
    fn execute(
        &self,
        ctx: &Arc<StreamLoadContext>,
        pipe: Arc<StreamLoadPipe>,
    ) -> Result<LoadCounters, Status>;
}

pub trait StreamLoadExecutor: Send + Sync {
    /// Arms `ctx.future` and returns; the fragment runs elsewhere.
    fn execute_plan_fragment(&self, ctx: &Arc<StreamLoadContext>) -> Result<(), Status>;

    fn commit_txn(&self, ctx: &StreamLoadContext) -> Result<(), Status>;

    /// Best effort. Failures are logged, never retried.
    fn rollback_txn(&self, ctx: &StreamLoadContext);
}

pub struct FragmentStreamLoadExecutor {
    load_stream_mgr: Arc<LoadStreamMgr>,
    fragment_executor: Arc<dyn FragmentExecutor>,
    frontend: Arc<dyn FrontendTxnClient>,
    pool: ThreadPool,
}

impl FragmentStreamLoadExecutor {
    pub fn new(
        load_stream_mgr: Arc<LoadStreamMgr>,
        fragment_executor: Arc<dyn FragmentExecutor>,
        frontend: Arc<dyn FrontendTxnClient>,
        fragment_thread_num: usize,
    ) -> Self {
        let pool = ThreadPool::with_name(
            "routine_load_fragment".to_string(),
            fragment_thread_num.max(1),
        );
        Self {
            load_stream_mgr,
            fragment_executor,
            frontend,
            pool,
        }
    }
}

fn run_fragment(
    fragment_executor: &dyn FragmentExecutor,
    ctx: &Arc<StreamLoadContext>,
    pipe: &Arc<StreamLoadPipe>,
) -> Result<LoadCounters, Status> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        fragment_executor.execute(ctx, Arc::clone(pipe))
    }))
    .unwrap_or_else(|payload| {
        Err(Status::execution_failed(format!(
            "panic in fragment execution: {}",
            panic_message(payload.as_ref())
        )))
    })
}

impl StreamLoadExecutor for FragmentStreamLoadExecutor {
    fn execute_plan_fragment(&self, ctx: &Arc<StreamLoadContext>) -> Result<(), Status> {
        let pipe = self.load_stream_mgr.get(ctx.id)?;
        let ctx = Arc::clone(ctx);
        let mgr = Arc::clone(&self.load_stream_mgr);
        let fragment_executor = Arc::clone(&self.fragment_executor);
        self.pool.execute(move || {
            let result = match run_fragment(fragment_executor.as_ref(), &ctx, &pipe) {
                Ok(counters) => {
                    ctx.set_counters(counters);
                    if !pipe.is_finished() {
                        // The producer may still be blocked on a full pipe.
                        pipe.cancel("fragment finished before end of stream");
                    }
                    Ok(())
                }
                Err(st) => {
                    tracing::warn!(
                        task_id = %ctx.id,
                        txn_id = ctx.txn_id,
                        error = %st,
                        "routine load fragment failed"
                    );
                    pipe.cancel(&st.message);
                    Err(st)
                }
            };
            mgr.remove_if_same(ctx.id, &pipe);
            ctx.future.set(result);
        });
        Ok(())
    }

    fn commit_txn(&self, ctx: &StreamLoadContext) -> Result<(), Status> {
        let request = TLoadTxnCommitRequest {
            db: ctx.db.clone(),
            tbl: ctx.table.clone(),
            txn_id: ctx.txn_id,
            sync: true,
            auth_code: Some(ctx.auth_code),
            txn_commit_attachment: Some(txn_commit_attachment(ctx)),
            ..Default::default()
        };
        let result = self
            .frontend
            .load_txn_commit(request)
            .map_err(|st| st.with_context("commit txn rpc failed"))?;
        if result.status.status_code == TStatusCode::PUBLISH_TIMEOUT {
            // Committed on FE; only visibility is late.
            tracing::warn!(
                task_id = %ctx.id,
                txn_id = ctx.txn_id,
                "routine load txn committed but publish timed out"
            );
            return Ok(());
        }
        check_thrift_status(&result.status, Status::commit_failed)?;
        tracing::info!(
            task_id = %ctx.id,
            job_id = ctx.job_id,
            txn_id = ctx.txn_id,
            label = %ctx.label,
            "routine load txn committed"
        );
        Ok(())
    }

    fn rollback_txn(&self, ctx: &StreamLoadContext) {
        let reason = ctx
            .status()
            .map(|st| st.message)
            .unwrap_or_else(|| "routine load task failed".to_string());
        let request = TLoadTxnRollbackRequest {
            db: ctx.db.clone(),
            tbl: ctx.table.clone(),
            txn_id: ctx.txn_id,
            reason: Some(reason),
            auth_code: Some(ctx.auth_code),
            txn_commit_attachment: Some(txn_commit_attachment(ctx)),
            ..Default::default()
        };
        let outcome = self
            .frontend
            .load_txn_rollback(request)
            .and_then(|result| check_thrift_status(&result.status, Status::internal_error));
        match outcome {
            Ok(()) => tracing::info!(
                task_id = %ctx.id,
                txn_id = ctx.txn_id,
                "routine load txn rolled back"
            ),
            Err(st) => tracing::warn!(
                task_id = %ctx.id,
                txn_id = ctx.txn_id,
                error = %st,
                "rollback routine load txn failed"
            ),
        }
    }
}

/// Load statistics and consumed offsets FE applies together with the txn.
pub fn txn_commit_attachment(ctx: &StreamLoadContext) -> TTxnCommitAttachment {
    let counters = ctx.counters();
    let load_cost_ms = ctx.load_cost_nanos() / 1_000_000;
    let kafka_rl_task_progress = ctx.kafka_info().map(|_| TKafkaRLTaskProgress {
        partition_cmt_offset: ctx.cmt_offset(),
    });
    TTxnCommitAttachment {
        load_type: TLoadType::ROUTINE_LOAD,
        rl_task_txn_commit_attachment: Some(TRLTaskTxnCommitAttachment {
            load_source_type: ctx.load_src_type(),
            id: ctx.id.to_thrift(),
            job_id: ctx.job_id,
            loaded_rows: Some(counters.loaded_rows),
            filtered_rows: Some(counters.filtered_rows),
            unselected_rows: Some(counters.unselected_rows),
            received_bytes: Some(ctx.received_bytes()),
            loaded_bytes: Some(counters.loaded_bytes),
            load_cost_ms: Some(load_cost_ms),
            kafka_rl_task_progress,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::status::StatusCode;
    use crate::runtime::stream_load_context::{BatchLimits, LoadSourceInfo};
    use crate::wire::backend_service::{TKafkaLoadInfo, TRoutineLoadTask};
    use crate::wire::types::{TLoadSourceType, TStatus, TUniqueId};
    use std::collections::BTreeMap;
    use std::io::Read;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingFrontend {
        commit_status: Mutex<Option<TStatus>>,
        commits: Mutex<Vec<TLoadTxnCommitRequest>>,
        rollbacks: Mutex<Vec<TLoadTxnRollbackRequest>>,
    }

    impl FrontendTxnClient for RecordingFrontend {
        fn load_txn_commit(
            &self,
            request: TLoadTxnCommitRequest,
        ) -> Result<TLoadTxnResult, Status> {
            self.commits.lock().unwrap().push(request);
            let status = self
                .commit_status
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| TStatus::new(TStatusCode::OK, None));
            Ok(TLoadTxnResult { status })
        }

        fn load_txn_rollback(
            &self,
            request: TLoadTxnRollbackRequest,
        ) -> Result<TLoadTxnResult, Status> {
            self.rollbacks.lock().unwrap().push(request);
            Err(Status::thrift_rpc_error("connection refused"))
        }
    }

    struct CountingFragment;

    impl FragmentExecutor for CountingFragment {
        fn execute(
            &self,
            _ctx: &Arc<StreamLoadContext>,
            pipe: Arc<StreamLoadPipe>,
        ) -> Result<LoadCounters, Status> {
            let mut body = String::new();
            pipe.reader()
                .read_to_string(&mut body)
                .map_err(|e| Status::execution_failed(e.to_string()))?;
            if body.contains("bad") {
                return Err(Status::execution_failed("bad row"));
            }
            Ok(LoadCounters {
                loaded_rows: body.lines().count() as i64,
                loaded_bytes: body.len() as i64,
                ..Default::default()
            })
        }
    }

    fn context() -> Arc<StreamLoadContext> {
        let task = TRoutineLoadTask {
            type_: TLoadSourceType::KAFKA,
            job_id: 5,
            id: TUniqueId::new(8, 9),
            txn_id: 77,
            auth_code: 123,
            db: Some("db".into()),
            tbl: Some("tbl".into()),
            label: Some("label".into()),
            max_interval_s: None,
            max_batch_rows: None,
            max_batch_size: None,
            kafka_load_info: Some(TKafkaLoadInfo {
                brokers: "b:9092".into(),
                topic: "t".into(),
                partition_begin_offset: BTreeMap::from([(0, 10)]),
                properties: None,
            }),
        };
        let source = LoadSourceInfo::from_task(&task).unwrap();
        Arc::new(StreamLoadContext::new(&task, source, BatchLimits::default()))
    }

    fn executor(frontend: Arc<RecordingFrontend>) -> (FragmentStreamLoadExecutor, Arc<LoadStreamMgr>) {
        let mgr = Arc::new(LoadStreamMgr::new());
        let exec =
            FragmentStreamLoadExecutor::new(Arc::clone(&mgr), Arc::new(CountingFragment), frontend, 2);
        (exec, mgr)
    }

    #[test]
    fn fragment_without_registered_pipe_fails_synchronously() {
        let (exec, _) = executor(Arc::new(RecordingFrontend::default()));
        let err = exec.execute_plan_fragment(&context()).unwrap_err();
        assert_eq!(err.code, StatusCode::NotFound);
    }

    #[test]
    fn fragment_success_records_counters_and_deregisters_pipe() {
        let (exec, mgr) = executor(Arc::new(RecordingFrontend::default()));
        let ctx = context();
        let pipe = Arc::new(StreamLoadPipe::new(64));
        mgr.put(ctx.id, Arc::clone(&pipe)).unwrap();
        exec.execute_plan_fragment(&ctx).unwrap();

        pipe.append_with_line_delimiter(b"a").unwrap();
        pipe.append_with_line_delimiter(b"b").unwrap();
        pipe.finish();

        let res = ctx.future.wait_timeout(Duration::from_secs(5)).expect("future");
        assert!(res.is_ok());
        assert_eq!(ctx.counters().loaded_rows, 2);
        assert!(mgr.is_empty());
    }

    #[test]
    fn fragment_failure_cancels_pipe() {
        let (exec, mgr) = executor(Arc::new(RecordingFrontend::default()));
        let ctx = context();
        let pipe = Arc::new(StreamLoadPipe::new(64));
        mgr.put(ctx.id, Arc::clone(&pipe)).unwrap();
        exec.execute_plan_fragment(&ctx).unwrap();
        pipe.append_with_line_delimiter(b"bad").unwrap();
        pipe.finish();

        let res = ctx.future.wait_timeout(Duration::from_secs(5)).expect("future");
        assert_eq!(res.unwrap_err().code, StatusCode::ExecutionFailed);
        assert!(pipe.is_cancelled() || pipe.is_finished());
        assert!(mgr.is_empty());
    }

    #[test]
    fn commit_sends_progress_and_maps_rejection() {
        let frontend = Arc::new(RecordingFrontend::default());
        let (exec, _) = executor(Arc::clone(&frontend));
        let ctx = context();
        ctx.record_consumed(0, 10, Some(4));
        exec.commit_txn(&ctx).unwrap();

        {
            let commits = frontend.commits.lock().unwrap();
            let req = &commits[0];
            assert_eq!(req.txn_id, 77);
            assert_eq!(req.auth_code, Some(123));
            assert!(req.user.is_empty());
            let rl = req
                .txn_commit_attachment
                .as_ref()
                .and_then(|a| a.rl_task_txn_commit_attachment.as_ref())
                .unwrap();
            assert_eq!(rl.received_bytes, Some(4));
            assert_eq!(
                rl.kafka_rl_task_progress.as_ref().unwrap().partition_cmt_offset,
                BTreeMap::from([(0, 10)])
            );
        }

        *frontend.commit_status.lock().unwrap() = Some(TStatus::new(
            TStatusCode::LABEL_ALREADY_EXISTS,
            Some(vec!["label already used".into()]),
        ));
        let err = exec.commit_txn(&ctx).unwrap_err();
        assert_eq!(err.code, StatusCode::CommitFailed);
        assert_eq!(err.message, "label already used");

        *frontend.commit_status.lock().unwrap() =
            Some(TStatus::new(TStatusCode::PUBLISH_TIMEOUT, None));
        assert!(exec.commit_txn(&ctx).is_ok());
    }

    #[test]
    fn rollback_swallows_rpc_failure_and_passes_reason() {
        let frontend = Arc::new(RecordingFrontend::default());
        let (exec, _) = executor(Arc::clone(&frontend));
        let ctx = context();
        ctx.set_status(Status::execution_failed("too many filtered rows"));
        exec.rollback_txn(&ctx);
        let rollbacks = frontend.rollbacks.lock().unwrap();
        assert_eq!(rollbacks.len(), 1);
        assert_eq!(rollbacks[0].reason.as_deref(), Some("too many filtered rows"));
    }
}
