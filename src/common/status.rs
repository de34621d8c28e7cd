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
use std::fmt;

use crate::wire::types::{TStatus, TStatusCode};

/// Failure kinds surfaced by the routine load path.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StatusCode {
    Cancelled,
    InvalidArgument,
    ServiceUnavailable,
    InitializationFailed,
    /// A pipe is already registered under the same load id.
    AlreadyExists,
    NotFound,
    ExecutionFailed,
    CommitFailed,
    /// The producer already signalled EOF on the pipe.
    Closed,
    ThriftRpcError,
    InternalError,
}

impl StatusCode {
    pub fn name(self) -> &'static str {
        match self {
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            StatusCode::InitializationFailed => "INITIALIZATION_FAILED",
            StatusCode::AlreadyExists => "ALREADY_EXISTS",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::ExecutionFailed => "EXECUTION_FAILED",
            StatusCode::CommitFailed => "COMMIT_FAILED",
            StatusCode::Closed => "CLOSED",
            StatusCode::ThriftRpcError => "THRIFT_RPC_ERROR",
            StatusCode::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn to_thrift(self) -> TStatusCode {
        match self {
            StatusCode::Cancelled => TStatusCode::CANCELLED,
            StatusCode::InvalidArgument => TStatusCode::INVALID_ARGUMENT,
            StatusCode::ServiceUnavailable => TStatusCode::SERVICE_UNAVAILABLE,
            StatusCode::InitializationFailed => TStatusCode::UNINITIALIZED,
            StatusCode::AlreadyExists => TStatusCode::ALREADY_EXIST,
            StatusCode::NotFound => TStatusCode::NOT_FOUND,
            StatusCode::ExecutionFailed => TStatusCode::RUNTIME_ERROR,
            StatusCode::CommitFailed => TStatusCode::INTERNAL_ERROR,
            StatusCode::Closed => TStatusCode::END_OF_FILE,
            StatusCode::ThriftRpcError => TStatusCode::THRIFT_RPC_ERROR,
            StatusCode::InternalError => TStatusCode::INTERNAL_ERROR,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::ServiceUnavailable, message)
    }

    pub fn initialization_failed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InitializationFailed, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(StatusCode::AlreadyExists, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::ExecutionFailed, message)
    }

    pub fn commit_failed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CommitFailed, message)
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Closed, message)
    }

    pub fn thrift_rpc_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::ThriftRpcError, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InternalError, message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == StatusCode::Cancelled
    }

    /// Prefixes the message, keeping the code. Used when a collaborator error is
    /// re-raised with the step that observed it.
    pub fn with_context(mut self, context: &str) -> Self {
        self.message = format!("{context}: {}", self.message);
        self
    }

    pub fn to_thrift(&self) -> TStatus {
        TStatus::new(self.code.to_thrift(), Some(vec![self.message.clone()]))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for Status {}

/// Wire status for a successful call.
pub fn ok_thrift_status() -> TStatus {
    TStatus::new(TStatusCode::OK, None)
}

/// Converts a status returned by the frontend into a local result.
///
/// A non-OK frontend status keeps its first error message; the code is mapped
/// through `on_error` since the caller knows what the remote call meant.
pub fn check_thrift_status(
    status: &TStatus,
    on_error: impl FnOnce(String) -> Status,
) -> Result<(), Status> {
    if status.status_code == TStatusCode::OK {
        return Ok(());
    }
    let message = status
        .error_msgs
        .as_ref()
        .and_then(|msgs| msgs.first())
        .cloned()
        .unwrap_or_else(|| format!("status code {}", status.status_code.0));
    Err(on_error(message))
}

/// Message carried by a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
