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
//! `FrontendService.loadTxnCommit` / `loadTxnRollback` payloads.

use std::collections::BTreeMap;

use thrift::protocol::{TInputProtocol, TOutputProtocol, TSerializable, TType};

use super::types::{TLoadSourceType, TLoadType, TStatus, TUniqueId};
use crate::common::thrift::{
    invalid_data, read_i32_i64_map, read_struct, write_bool_field, write_i32_field,
    write_i32_i64_map_field, write_i64_field, write_opt_i64_field, write_opt_string_field,
    write_string_field, write_struct_begin, write_struct_end, write_struct_field,
};

pub const LOAD_TXN_COMMIT: &str = "loadTxnCommit";
pub const LOAD_TXN_ROLLBACK: &str = "loadTxnRollback";

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TKafkaRLTaskProgress {
    pub partition_cmt_offset: BTreeMap<i32, i64>,
}

impl TSerializable for TKafkaRLTaskProgress {
    fn read_from_in_protocol(
        i_prot: &mut dyn TInputProtocol,
    ) -> thrift::Result<TKafkaRLTaskProgress> {
        let mut partition_cmt_offset = None;
        read_struct(i_prot, |i_prot, id, ty| {
            match (id, ty) {
                (1, TType::Map) => partition_cmt_offset = Some(read_i32_i64_map(i_prot)?),
                _ => i_prot.skip(ty)?,
            }
            Ok(())
        })?;
        Ok(TKafkaRLTaskProgress {
            partition_cmt_offset: partition_cmt_offset.ok_or_else(|| {
                invalid_data("TKafkaRLTaskProgress.partitionCmtOffset is required")
            })?,
        })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        write_struct_begin(o_prot, "TKafkaRLTaskProgress")?;
        write_i32_i64_map_field(o_prot, "partitionCmtOffset", 1, &self.partition_cmt_offset)?;
        write_struct_end(o_prot)
    }
}

/// Progress FE applies to the routine load job atomically with the txn.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TRLTaskTxnCommitAttachment {
    pub load_source_type: TLoadSourceType,
    pub id: TUniqueId,
    pub job_id: i64,
    pub loaded_rows: Option<i64>,
    pub filtered_rows: Option<i64>,
    pub unselected_rows: Option<i64>,
    pub received_bytes: Option<i64>,
    pub loaded_bytes: Option<i64>,
    pub load_cost_ms: Option<i64>,
    pub kafka_rl_task_progress: Option<TKafkaRLTaskProgress>,
}

impl TSerializable for TRLTaskTxnCommitAttachment {
    fn read_from_in_protocol(
        i_prot: &mut dyn TInputProtocol,
    ) -> thrift::Result<TRLTaskTxnCommitAttachment> {
        let mut load_source_type = None;
        let mut task_id = None;
        let mut job_id = None;
        let mut loaded_rows = None;
        let mut filtered_rows = None;
        let mut unselected_rows = None;
        let mut received_bytes = None;
        let mut loaded_bytes = None;
        let mut load_cost_ms = None;
        let mut kafka_rl_task_progress = None;
        read_struct(i_prot, |i_prot, id, ty| {
            match (id, ty) {
                (1, TType::I32) => load_source_type = Some(TLoadSourceType(i_prot.read_i32()?)),
                (2, TType::Struct) => task_id = Some(TUniqueId::read_from_in_protocol(i_prot)?),
                (3, TType::I64) => job_id = Some(i_prot.read_i64()?),
                (4, TType::I64) => loaded_rows = Some(i_prot.read_i64()?),
                (5, TType::I64) => filtered_rows = Some(i_prot.read_i64()?),
                (6, TType::I64) => unselected_rows = Some(i_prot.read_i64()?),
                (7, TType::I64) => received_bytes = Some(i_prot.read_i64()?),
                (8, TType::I64) => loaded_bytes = Some(i_prot.read_i64()?),
                (9, TType::I64) => load_cost_ms = Some(i_prot.read_i64()?),
                (10, TType::Struct) => {
                    kafka_rl_task_progress =
                        Some(TKafkaRLTaskProgress::read_from_in_protocol(i_prot)?)
                }
                _ => i_prot.skip(ty)?,
            }
            Ok(())
        })?;
        Ok(TRLTaskTxnCommitAttachment {
            load_source_type: load_source_type.ok_or_else(|| {
                invalid_data("TRLTaskTxnCommitAttachment.loadSourceType is required")
            })?,
            id: task_id.ok_or_else(|| invalid_data("TRLTaskTxnCommitAttachment.id is required"))?,
            job_id: job_id
                .ok_or_else(|| invalid_data("TRLTaskTxnCommitAttachment.jobId is required"))?,
            loaded_rows,
            filtered_rows,
            unselected_rows,
            received_bytes,
            loaded_bytes,
            load_cost_ms,
            kafka_rl_task_progress,
        })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        write_struct_begin(o_prot, "TRLTaskTxnCommitAttachment")?;
        write_i32_field(o_prot, "loadSourceType", 1, self.load_source_type.0)?;
        write_struct_field(o_prot, "id", 2, &self.id)?;
        write_i64_field(o_prot, "jobId", 3, self.job_id)?;
        write_opt_i64_field(o_prot, "loadedRows", 4, self.loaded_rows)?;
        write_opt_i64_field(o_prot, "filteredRows", 5, self.filtered_rows)?;
        write_opt_i64_field(o_prot, "unselectedRows", 6, self.unselected_rows)?;
        write_opt_i64_field(o_prot, "receivedBytes", 7, self.received_bytes)?;
        write_opt_i64_field(o_prot, "loadedBytes", 8, self.loaded_bytes)?;
        write_opt_i64_field(o_prot, "loadCostMs", 9, self.load_cost_ms)?;
        if let Some(progress) = &self.kafka_rl_task_progress {
            write_struct_field(o_prot, "kafkaRLTaskProgress", 10, progress)?;
        }
        write_struct_end(o_prot)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TTxnCommitAttachment {
    pub load_type: TLoadType,
    pub rl_task_txn_commit_attachment: Option<TRLTaskTxnCommitAttachment>,
}

impl TSerializable for TTxnCommitAttachment {
    fn read_from_in_protocol(
        i_prot: &mut dyn TInputProtocol,
    ) -> thrift::Result<TTxnCommitAttachment> {
        let mut load_type = None;
        let mut rl_task_txn_commit_attachment = None;
        read_struct(i_prot, |i_prot, id, ty| {
            match (id, ty) {
                (1, TType::I32) => load_type = Some(TLoadType(i_prot.read_i32()?)),
                (2, TType::Struct) => {
                    rl_task_txn_commit_attachment =
                        Some(TRLTaskTxnCommitAttachment::read_from_in_protocol(i_prot)?)
                }
                _ => i_prot.skip(ty)?,
            }
            Ok(())
        })?;
        Ok(TTxnCommitAttachment {
            load_type: load_type
                .ok_or_else(|| invalid_data("TTxnCommitAttachment.loadType is required"))?,
            rl_task_txn_commit_attachment,
        })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        write_struct_begin(o_prot, "TTxnCommitAttachment")?;
        write_i32_field(o_prot, "loadType", 1, self.load_type.0)?;
        if let Some(rl) = &self.rl_task_txn_commit_attachment {
            write_struct_field(o_prot, "rlTaskTxnCommitAttachment", 2, rl)?;
        }
        write_struct_end(o_prot)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TLoadTxnCommitRequest {
    pub cluster: Option<String>,
    pub user: String,
    pub passwd: String,
    pub db: String,
    pub tbl: String,
    pub user_ip: Option<String>,
    pub txn_id: i64,
    pub sync: bool,
    pub auth_code: Option<i64>,
    pub txn_commit_attachment: Option<TTxnCommitAttachment>,
}

impl TSerializable for TLoadTxnCommitRequest {
    fn read_from_in_protocol(
        i_prot: &mut dyn TInputProtocol,
    ) -> thrift::Result<TLoadTxnCommitRequest> {
        let mut req = TLoadTxnCommitRequest::default();
        let mut txn_id = None;
        read_struct(i_prot, |i_prot, id, ty| {
            match (id, ty) {
                (1, TType::String) => req.cluster = Some(i_prot.read_string()?),
                (2, TType::String) => req.user = i_prot.read_string()?,
                (3, TType::String) => req.passwd = i_prot.read_string()?,
                (4, TType::String) => req.db = i_prot.read_string()?,
                (5, TType::String) => req.tbl = i_prot.read_string()?,
                (6, TType::String) => req.user_ip = Some(i_prot.read_string()?),
                (7, TType::I64) => txn_id = Some(i_prot.read_i64()?),
                (8, TType::Bool) => req.sync = i_prot.read_bool()?,
                (10, TType::I64) => req.auth_code = Some(i_prot.read_i64()?),
                (11, TType::Struct) => {
                    req.txn_commit_attachment =
                        Some(TTxnCommitAttachment::read_from_in_protocol(i_prot)?)
                }
                _ => i_prot.skip(ty)?,
            }
            Ok(())
        })?;
        req.txn_id = txn_id.ok_or_else(|| invalid_data("TLoadTxnCommitRequest.txnId is required"))?;
        Ok(req)
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        write_struct_begin(o_prot, "TLoadTxnCommitRequest")?;
        write_opt_string_field(o_prot, "cluster", 1, self.cluster.as_deref())?;
        write_string_field(o_prot, "user", 2, &self.user)?;
        write_string_field(o_prot, "passwd", 3, &self.passwd)?;
        write_string_field(o_prot, "db", 4, &self.db)?;
        write_string_field(o_prot, "tbl", 5, &self.tbl)?;
        write_opt_string_field(o_prot, "user_ip", 6, self.user_ip.as_deref())?;
        write_i64_field(o_prot, "txnId", 7, self.txn_id)?;
        write_bool_field(o_prot, "sync", 8, self.sync)?;
        write_opt_i64_field(o_prot, "auth_code", 10, self.auth_code)?;
        if let Some(attachment) = &self.txn_commit_attachment {
            write_struct_field(o_prot, "txnCommitAttachment", 11, attachment)?;
        }
        write_struct_end(o_prot)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TLoadTxnRollbackRequest {
    pub cluster: Option<String>,
    pub user: String,
    pub passwd: String,
    pub db: String,
    pub tbl: String,
    pub user_ip: Option<String>,
    pub txn_id: i64,
    pub reason: Option<String>,
    pub auth_code: Option<i64>,
    pub txn_commit_attachment: Option<TTxnCommitAttachment>,
}

impl TSerializable for TLoadTxnRollbackRequest {
    fn read_from_in_protocol(
        i_prot: &mut dyn TInputProtocol,
    ) -> thrift::Result<TLoadTxnRollbackRequest> {
        let mut req = TLoadTxnRollbackRequest::default();
        let mut txn_id = None;
        read_struct(i_prot, |i_prot, id, ty| {
            match (id, ty) {
                (1, TType::String) => req.cluster = Some(i_prot.read_string()?),
                (2, TType::String) => req.user = i_prot.read_string()?,
                (3, TType::String) => req.passwd = i_prot.read_string()?,
                (4, TType::String) => req.db = i_prot.read_string()?,
                (5, TType::String) => req.tbl = i_prot.read_string()?,
                (6, TType::String) => req.user_ip = Some(i_prot.read_string()?),
                (7, TType::I64) => txn_id = Some(i_prot.read_i64()?),
                (8, TType::String) => req.reason = Some(i_prot.read_string()?),
                (9, TType::I64) => req.auth_code = Some(i_prot.read_i64()?),
                (10, TType::Struct) => {
                    req.txn_commit_attachment =
                        Some(TTxnCommitAttachment::read_from_in_protocol(i_prot)?)
                }
                _ => i_prot.skip(ty)?,
            }
            Ok(())
        })?;
        req.txn_id =
            txn_id.ok_or_else(|| invalid_data("TLoadTxnRollbackRequest.txnId is required"))?;
        Ok(req)
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        write_struct_begin(o_prot, "TLoadTxnRollbackRequest")?;
        write_opt_string_field(o_prot, "cluster", 1, self.cluster.as_deref())?;
        write_string_field(o_prot, "user", 2, &self.user)?;
        write_string_field(o_prot, "passwd", 3, &self.passwd)?;
        write_string_field(o_prot, "db", 4, &self.db)?;
        write_string_field(o_prot, "tbl", 5, &self.tbl)?;
        write_opt_string_field(o_prot, "user_ip", 6, self.user_ip.as_deref())?;
        write_i64_field(o_prot, "txnId", 7, self.txn_id)?;
        write_opt_string_field(o_prot, "reason", 8, self.reason.as_deref())?;
        write_opt_i64_field(o_prot, "auth_code", 9, self.auth_code)?;
        if let Some(attachment) = &self.txn_commit_attachment {
            write_struct_field(o_prot, "txnCommitAttachment", 10, attachment)?;
        }
        write_struct_end(o_prot)
    }
}

/// Result payload shared by `loadTxnCommit` and `loadTxnRollback`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TLoadTxnResult {
    pub status: TStatus,
}

impl TSerializable for TLoadTxnResult {
    fn read_from_in_protocol(i_prot: &mut dyn TInputProtocol) -> thrift::Result<TLoadTxnResult> {
        let mut status = None;
        read_struct(i_prot, |i_prot, id, ty| {
            match (id, ty) {
                (1, TType::Struct) => status = Some(TStatus::read_from_in_protocol(i_prot)?),
                _ => i_prot.skip(ty)?,
            }
            Ok(())
        })?;
        Ok(TLoadTxnResult {
            status: status.ok_or_else(|| invalid_data("TLoadTxnResult.status is required"))?,
        })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        write_struct_begin(o_prot, "TLoadTxnResult")?;
        write_struct_field(o_prot, "status", 1, &self.status)?;
        write_struct_end(o_prot)
    }
}

/// `FrontendService.<method>_args { 1: request }`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequestArgs<T> {
    pub request: T,
}

impl<T: TSerializable> TSerializable for RequestArgs<T> {
    fn read_from_in_protocol(i_prot: &mut dyn TInputProtocol) -> thrift::Result<RequestArgs<T>> {
        let mut request = None;
        read_struct(i_prot, |i_prot, id, ty| {
            match (id, ty) {
                (1, TType::Struct) => request = Some(T::read_from_in_protocol(i_prot)?),
                _ => i_prot.skip(ty)?,
            }
            Ok(())
        })?;
        Ok(RequestArgs {
            request: request.ok_or_else(|| invalid_data("request is required"))?,
        })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        write_struct_begin(o_prot, "request_args")?;
        write_struct_field(o_prot, "request", 1, &self.request)?;
        write_struct_end(o_prot)
    }
}

/// `FrontendService.<method>_result { 0: success }`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResponseResult<T> {
    pub success: Option<T>,
}

impl<T: TSerializable> TSerializable for ResponseResult<T> {
    fn read_from_in_protocol(
        i_prot: &mut dyn TInputProtocol,
    ) -> thrift::Result<ResponseResult<T>> {
        let mut success = None;
        read_struct(i_prot, |i_prot, id, ty| {
            match (id, ty) {
                (0, TType::Struct) => success = Some(T::read_from_in_protocol(i_prot)?),
                _ => i_prot.skip(ty)?,
            }
            Ok(())
        })?;
        Ok(ResponseResult { success })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        write_struct_begin(o_prot, "response_result")?;
        if let Some(success) = &self.success {
            write_struct_field(o_prot, "success", 0, success)?;
        }
        write_struct_end(o_prot)
    }
}
