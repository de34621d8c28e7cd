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
//! `BackendService.submit_routine_load_task` payloads.

use std::collections::BTreeMap;

use thrift::protocol::{TInputProtocol, TOutputProtocol, TSerializable, TType};

use super::types::{TLoadSourceType, TStatus, TUniqueId};
use crate::common::thrift::{
    invalid_data, read_i32_i64_map, read_string_map, read_struct, read_struct_list,
    write_i32_field, write_i32_i64_map_field, write_i64_field, write_opt_i64_field,
    write_opt_string_field, write_string_field, write_string_map_field, write_struct_begin,
    write_struct_end, write_struct_field, write_struct_list_field,
};

pub const SUBMIT_ROUTINE_LOAD_TASK: &str = "submit_routine_load_task";

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TKafkaLoadInfo {
    pub brokers: String,
    pub topic: String,
    pub partition_begin_offset: BTreeMap<i32, i64>,
    pub properties: Option<BTreeMap<String, String>>,
}

impl TSerializable for TKafkaLoadInfo {
    fn read_from_in_protocol(i_prot: &mut dyn TInputProtocol) -> thrift::Result<TKafkaLoadInfo> {
        let mut brokers = None;
        let mut topic = None;
        let mut partition_begin_offset = None;
        let mut properties = None;
        read_struct(i_prot, |i_prot, id, ty| {
            match (id, ty) {
                (1, TType::String) => brokers = Some(i_prot.read_string()?),
                (2, TType::String) => topic = Some(i_prot.read_string()?),
                (3, TType::Map) => partition_begin_offset = Some(read_i32_i64_map(i_prot)?),
                (4, TType::Map) => properties = Some(read_string_map(i_prot)?),
                _ => i_prot.skip(ty)?,
            }
            Ok(())
        })?;
        Ok(TKafkaLoadInfo {
            brokers: brokers.ok_or_else(|| invalid_data("TKafkaLoadInfo.brokers is required"))?,
            topic: topic.ok_or_else(|| invalid_data("TKafkaLoadInfo.topic is required"))?,
            partition_begin_offset: partition_begin_offset.ok_or_else(|| {
                invalid_data("TKafkaLoadInfo.partition_begin_offset is required")
            })?,
            properties,
        })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        write_struct_begin(o_prot, "TKafkaLoadInfo")?;
        write_string_field(o_prot, "brokers", 1, &self.brokers)?;
        write_string_field(o_prot, "topic", 2, &self.topic)?;
        write_i32_i64_map_field(
            o_prot,
            "partition_begin_offset",
            3,
            &self.partition_begin_offset,
        )?;
        if let Some(props) = &self.properties {
            write_string_map_field(o_prot, "properties", 4, props)?;
        }
        write_struct_end(o_prot)
    }
}

/// One routine load task as sent by FE. The embedded plan params are not
/// modelled; they are skipped on read.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TRoutineLoadTask {
    pub type_: TLoadSourceType,
    pub job_id: i64,
    pub id: TUniqueId,
    pub txn_id: i64,
    pub auth_code: i64,
    pub db: Option<String>,
    pub tbl: Option<String>,
    pub label: Option<String>,
    pub max_interval_s: Option<i64>,
    pub max_batch_rows: Option<i64>,
    pub max_batch_size: Option<i64>,
    pub kafka_load_info: Option<TKafkaLoadInfo>,
}

impl TSerializable for TRoutineLoadTask {
    fn read_from_in_protocol(i_prot: &mut dyn TInputProtocol) -> thrift::Result<TRoutineLoadTask> {
        let mut type_ = None;
        let mut job_id = None;
        let mut task_id = None;
        let mut txn_id = None;
        let mut auth_code = None;
        let mut db = None;
        let mut tbl = None;
        let mut label = None;
        let mut max_interval_s = None;
        let mut max_batch_rows = None;
        let mut max_batch_size = None;
        let mut kafka_load_info = None;
        read_struct(i_prot, |i_prot, id, ty| {
            match (id, ty) {
                (1, TType::I32) => type_ = Some(TLoadSourceType(i_prot.read_i32()?)),
                (2, TType::I64) => job_id = Some(i_prot.read_i64()?),
                (3, TType::Struct) => task_id = Some(TUniqueId::read_from_in_protocol(i_prot)?),
                (4, TType::I64) => txn_id = Some(i_prot.read_i64()?),
                (5, TType::I64) => auth_code = Some(i_prot.read_i64()?),
                (6, TType::String) => db = Some(i_prot.read_string()?),
                (7, TType::String) => tbl = Some(i_prot.read_string()?),
                (8, TType::String) => label = Some(i_prot.read_string()?),
                (9, TType::I64) => max_interval_s = Some(i_prot.read_i64()?),
                (10, TType::I64) => max_batch_rows = Some(i_prot.read_i64()?),
                (11, TType::I64) => max_batch_size = Some(i_prot.read_i64()?),
                (12, TType::Struct) => {
                    kafka_load_info = Some(TKafkaLoadInfo::read_from_in_protocol(i_prot)?)
                }
                _ => i_prot.skip(ty)?,
            }
            Ok(())
        })?;
        Ok(TRoutineLoadTask {
            type_: type_.ok_or_else(|| invalid_data("TRoutineLoadTask.type is required"))?,
            job_id: job_id.ok_or_else(|| invalid_data("TRoutineLoadTask.job_id is required"))?,
            id: task_id.ok_or_else(|| invalid_data("TRoutineLoadTask.id is required"))?,
            txn_id: txn_id.ok_or_else(|| invalid_data("TRoutineLoadTask.txn_id is required"))?,
            auth_code: auth_code
                .ok_or_else(|| invalid_data("TRoutineLoadTask.auth_code is required"))?,
            db,
            tbl,
            label,
            max_interval_s,
            max_batch_rows,
            max_batch_size,
            kafka_load_info,
        })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        write_struct_begin(o_prot, "TRoutineLoadTask")?;
        write_i32_field(o_prot, "type", 1, self.type_.0)?;
        write_i64_field(o_prot, "job_id", 2, self.job_id)?;
        write_struct_field(o_prot, "id", 3, &self.id)?;
        write_i64_field(o_prot, "txn_id", 4, self.txn_id)?;
        write_i64_field(o_prot, "auth_code", 5, self.auth_code)?;
        write_opt_string_field(o_prot, "db", 6, self.db.as_deref())?;
        write_opt_string_field(o_prot, "tbl", 7, self.tbl.as_deref())?;
        write_opt_string_field(o_prot, "label", 8, self.label.as_deref())?;
        write_opt_i64_field(o_prot, "max_interval_s", 9, self.max_interval_s)?;
        write_opt_i64_field(o_prot, "max_batch_rows", 10, self.max_batch_rows)?;
        write_opt_i64_field(o_prot, "max_batch_size", 11, self.max_batch_size)?;
        if let Some(info) = &self.kafka_load_info {
            write_struct_field(o_prot, "kafka_load_info", 12, info)?;
        }
        write_struct_end(o_prot)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SubmitRoutineLoadTaskArgs {
    pub tasks: Vec<TRoutineLoadTask>,
}

impl TSerializable for SubmitRoutineLoadTaskArgs {
    fn read_from_in_protocol(
        i_prot: &mut dyn TInputProtocol,
    ) -> thrift::Result<SubmitRoutineLoadTaskArgs> {
        let mut tasks = None;
        read_struct(i_prot, |i_prot, id, ty| {
            match (id, ty) {
                (1, TType::List) => tasks = Some(read_struct_list::<TRoutineLoadTask>(i_prot)?),
                _ => i_prot.skip(ty)?,
            }
            Ok(())
        })?;
        Ok(SubmitRoutineLoadTaskArgs {
            tasks: tasks.ok_or_else(|| invalid_data("submit_routine_load_task.tasks is required"))?,
        })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        write_struct_begin(o_prot, "submit_routine_load_task_args")?;
        write_struct_list_field(o_prot, "tasks", 1, &self.tasks)?;
        write_struct_end(o_prot)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubmitRoutineLoadTaskResult {
    pub success: Option<TStatus>,
}

impl TSerializable for SubmitRoutineLoadTaskResult {
    fn read_from_in_protocol(
        i_prot: &mut dyn TInputProtocol,
    ) -> thrift::Result<SubmitRoutineLoadTaskResult> {
        let mut success = None;
        read_struct(i_prot, |i_prot, id, ty| {
            match (id, ty) {
                (0, TType::Struct) => success = Some(TStatus::read_from_in_protocol(i_prot)?),
                _ => i_prot.skip(ty)?,
            }
            Ok(())
        })?;
        Ok(SubmitRoutineLoadTaskResult { success })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        write_struct_begin(o_prot, "submit_routine_load_task_result")?;
        if let Some(status) = &self.success {
            write_struct_field(o_prot, "success", 0, status)?;
        }
        write_struct_end(o_prot)
    }
}
