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
//! Blocking thrift client for the frontend's load transaction calls.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use thrift::protocol::{
    TBinaryInputProtocol, TBinaryOutputProtocol, TInputProtocol, TMessageIdentifier,
    TMessageType, TOutputProtocol, TSerializable,
};
use thrift::transport::{TBufferedReadTransport, TBufferedWriteTransport, TIoChannel, TTcpChannel};

use crate::common::config::{frontend_host, frontend_port, frontend_rpc_timeout_ms};
use crate::common::status::Status;
use crate::runtime::stream_load_executor::FrontendTxnClient;
use crate::wire::frontend_service::{
    LOAD_TXN_COMMIT, LOAD_TXN_ROLLBACK, RequestArgs, ResponseResult, TLoadTxnCommitRequest,
    TLoadTxnResult, TLoadTxnRollbackRequest,
};

/// Opens one connection per call.
pub struct ThriftFrontendClient {
    host: String,
    port: u16,
    timeout: Duration,
    seq_id: AtomicI32,
}

impl ThriftFrontendClient {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            seq_id: AtomicI32::new(0),
        }
    }

    pub fn from_config() -> Self {
        Self::new(
            frontend_host(),
            frontend_port(),
            Duration::from_millis(frontend_rpc_timeout_ms().max(1)),
        )
    }

    fn resolve(&self) -> Result<SocketAddr, Status> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| {
                Status::thrift_rpc_error(format!(
                    "invalid FE address {}:{}: {e}",
                    self.host, self.port
                ))
            })?
            .next()
            .ok_or_else(|| {
                Status::thrift_rpc_error(format!(
                    "FE address {}:{} resolved to nothing",
                    self.host, self.port
                ))
            })
    }

    fn call<Req, Resp>(&self, method: &str, request: Req) -> Result<Resp, Status>
    where
        Req: TSerializable,
        Resp: TSerializable,
    {
        let addr = self.resolve()?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| Status::thrift_rpc_error(format!("connect FE {addr} failed: {e}")))?;
        let _ = stream.set_read_timeout(Some(self.timeout));
        let _ = stream.set_write_timeout(Some(self.timeout));
        let _ = stream.set_nodelay(true);

        let channel = TTcpChannel::with_stream(stream);
        let (i_chan, o_chan) = channel.split().map_err(|e| {
            Status::thrift_rpc_error(format!("split FE thrift channel failed: {e}"))
        })?;
        let mut i_prot = TBinaryInputProtocol::new(TBufferedReadTransport::new(i_chan), true);
        let mut o_prot = TBinaryOutputProtocol::new(TBufferedWriteTransport::new(o_chan), true);

        let seq_id = self.seq_id.fetch_add(1, Ordering::Relaxed);
        send_call(&mut o_prot, method, seq_id, request)
            .and_then(|()| recv_reply::<Resp>(&mut i_prot, method, seq_id))
            .map_err(|e| Status::thrift_rpc_error(format!("FE {method} rpc failed: {e}")))
    }
}

fn send_call<Req: TSerializable>(
    o_prot: &mut dyn TOutputProtocol,
    method: &str,
    seq_id: i32,
    request: Req,
) -> thrift::Result<()> {
    o_prot.write_message_begin(&TMessageIdentifier::new(method, TMessageType::Call, seq_id))?;
    RequestArgs { request }.write_to_out_protocol(o_prot)?;
    o_prot.write_message_end()?;
    o_prot.flush()
}

fn recv_reply<Resp: TSerializable>(
    i_prot: &mut dyn TInputProtocol,
    method: &str,
    seq_id: i32,
) -> thrift::Result<Resp> {
    let ident = i_prot.read_message_begin()?;
    thrift::protocol::verify_expected_sequence_number(seq_id, ident.sequence_number)?;
    thrift::protocol::verify_expected_service_call(method, &ident.name)?;
    if ident.message_type == TMessageType::Exception {
        let remote_error = thrift::Error::read_application_error_from_in_protocol(i_prot)?;
        i_prot.read_message_end()?;
        return Err(thrift::Error::Application(remote_error));
    }
    thrift::protocol::verify_expected_message_type(TMessageType::Reply, ident.message_type)?;
    let result = ResponseResult::<Resp>::read_from_in_protocol(i_prot)?;
    i_prot.read_message_end()?;
    result.success.ok_or_else(|| {
        thrift::Error::Application(thrift::ApplicationError::new(
            thrift::ApplicationErrorKind::MissingResult,
            format!("no result received for {method}"),
        ))
    })
}

impl FrontendTxnClient for ThriftFrontendClient {
    fn load_txn_commit(&self, request: TLoadTxnCommitRequest) -> Result<TLoadTxnResult, Status> {
        self.call(LOAD_TXN_COMMIT, request)
    }

    fn load_txn_rollback(
        &self,
        request: TLoadTxnRollbackRequest,
    ) -> Result<TLoadTxnResult, Status> {
        self.call(LOAD_TXN_ROLLBACK, request)
    }
}
