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
//! `BackendService` endpoint for FE's routine load submissions.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::Duration;

use threadpool::ThreadPool;
use thrift::protocol::{
    TBinaryInputProtocolFactory, TBinaryOutputProtocolFactory, TInputProtocol,
    TInputProtocolFactory, TMessageIdentifier, TMessageType, TOutputProtocol,
    TOutputProtocolFactory, TSerializable, TType,
};
use thrift::transport::{
    TBufferedReadTransportFactory, TBufferedWriteTransportFactory, TIoChannel,
    TReadTransportFactory, TTcpChannel, TWriteTransportFactory,
};
use thrift::{ApplicationError, ApplicationErrorKind};

use crate::common::config::{be_host, be_port};
use crate::common::status::ok_thrift_status;
use crate::runtime::routine_load::task_executor::RoutineLoadTaskExecutor;
use crate::wire::backend_service::{
    SUBMIT_ROUTINE_LOAD_TASK, SubmitRoutineLoadTaskArgs, SubmitRoutineLoadTaskResult,
    TRoutineLoadTask,
};
use crate::wire::types::TStatus;

const PROCESSOR_THREADS: usize = 4;

#[derive(Debug, Clone)]
pub struct BackendServiceConfig {
    pub host: String,
    pub be_port: u16,
}

impl BackendServiceConfig {
    pub fn from_config() -> Self {
        Self {
            host: be_host(),
            be_port: be_port(),
        }
    }

    fn bind_addr(&self) -> String {
        let host = if self.host.is_empty() {
            "0.0.0.0"
        } else {
            self.host.as_str()
        };
        format!("{}:{}", host, self.be_port)
    }
}

/// Submits every task in order and stops at the first one refused.
pub fn submit_routine_load_tasks(
    executor: &RoutineLoadTaskExecutor,
    tasks: &[TRoutineLoadTask],
) -> TStatus {
    for task in tasks {
        if let Err(st) = executor.submit_task(task) {
            tracing::warn!(
                job_id = task.job_id,
                txn_id = task.txn_id,
                error = %st,
                "submit_routine_load_task refused"
            );
            return st.to_thrift();
        }
    }
    ok_thrift_status()
}

/// Binds the listener and serves it on a background thread. Returns the bound
/// address so callers can use port 0.
pub fn start_backend_service(
    config: &BackendServiceConfig,
    executor: RoutineLoadTaskExecutor,
) -> io::Result<SocketAddr> {
    let listener = TcpListener::bind(config.bind_addr())?;
    let local_addr = listener.local_addr()?;
    tracing::info!("BackendService listening on {}", local_addr);

    thread::Builder::new()
        .name("backend-service".to_string())
        .spawn(move || {
            let worker_pool =
                ThreadPool::with_name("BackendService processor".to_owned(), PROCESSOR_THREADS);
            for stream in listener.incoming() {
                match stream {
                    Ok(s) => {
                        let executor = executor.clone();
                        worker_pool.execute(move || serve_connection(s, &executor));
                    }
                    Err(e) => {
                        tracing::warn!("failed to accept remote connection: {}", e);
                    }
                }
            }
        })?;
    Ok(local_addr)
}

fn serve_connection(stream: std::net::TcpStream, executor: &RoutineLoadTaskExecutor) {
    let peer = stream.peer_addr().ok();
    let _ = stream.set_nodelay(true);
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));

    let channel = TTcpChannel::with_stream(stream);
    let (r_chan, w_chan) = match channel.split() {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(peer = ?peer, "split thrift channel failed: {}", e);
            return;
        }
    };
    let r_tran = TBufferedReadTransportFactory::new().create(Box::new(r_chan));
    let mut i_prot = TBinaryInputProtocolFactory::new().create(r_tran);
    let w_tran = TBufferedWriteTransportFactory::new().create(Box::new(w_chan));
    let mut o_prot = TBinaryOutputProtocolFactory::new().create(w_tran);

    loop {
        match process(executor, &mut *i_prot, &mut *o_prot) {
            Ok(()) => {}
            Err(thrift::Error::Transport(ref te))
                if te.kind == thrift::TransportErrorKind::EndOfFile =>
            {
                break;
            }
            Err(other) => {
                tracing::warn!(peer = ?peer, "processor error: {:?}", other);
                break;
            }
        }
    }
}

fn process(
    executor: &RoutineLoadTaskExecutor,
    i_prot: &mut dyn TInputProtocol,
    o_prot: &mut dyn TOutputProtocol,
) -> thrift::Result<()> {
    let ident = i_prot.read_message_begin()?;
    match ident.name.as_str() {
        SUBMIT_ROUTINE_LOAD_TASK => {
            let args = SubmitRoutineLoadTaskArgs::read_from_in_protocol(i_prot)?;
            i_prot.read_message_end()?;
            tracing::debug!(
                tasks_len = args.tasks.len(),
                "Received BackendService.submit_routine_load_task"
            );
            let status = submit_routine_load_tasks(executor, &args.tasks);
            o_prot.write_message_begin(&TMessageIdentifier::new(
                SUBMIT_ROUTINE_LOAD_TASK,
                TMessageType::Reply,
                ident.sequence_number,
            ))?;
            SubmitRoutineLoadTaskResult {
                success: Some(status),
            }
            .write_to_out_protocol(o_prot)?;
            o_prot.write_message_end()?;
            o_prot.flush()
        }
        other => {
            i_prot.skip(TType::Struct)?;
            i_prot.read_message_end()?;
            tracing::warn!(method = other, "unsupported BackendService method");
            let err = ApplicationError::new(
                ApplicationErrorKind::UnknownMethod,
                format!("unknown method {other}"),
            );
            o_prot.write_message_begin(&TMessageIdentifier::new(
                other,
                TMessageType::Exception,
                ident.sequence_number,
            ))?;
            thrift::Error::write_application_error_to_out_protocol(&err, o_prot)?;
            o_prot.write_message_end()?;
            o_prot.flush()
        }
    }
}
