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
//! Shared Thrift types (`Types.thrift`, `Status.thrift`).

use thrift::protocol::{TInputProtocol, TOutputProtocol, TSerializable, TType};

use crate::common::thrift::{
    invalid_data, read_string_list, read_struct, write_i32_field, write_i64_field,
    write_string_list_field, write_struct_begin, write_struct_end,
};

#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TStatusCode(pub i32);

impl TStatusCode {
    pub const OK: TStatusCode = TStatusCode(0);
    pub const CANCELLED: TStatusCode = TStatusCode(1);
    pub const ANALYSIS_ERROR: TStatusCode = TStatusCode(2);
    pub const NOT_IMPLEMENTED_ERROR: TStatusCode = TStatusCode(3);
    pub const RUNTIME_ERROR: TStatusCode = TStatusCode(4);
    pub const MEM_LIMIT_EXCEEDED: TStatusCode = TStatusCode(5);
    pub const INTERNAL_ERROR: TStatusCode = TStatusCode(6);
    pub const THRIFT_RPC_ERROR: TStatusCode = TStatusCode(7);
    pub const TIMEOUT: TStatusCode = TStatusCode(8);
    pub const PUBLISH_TIMEOUT: TStatusCode = TStatusCode(14);
    pub const LABEL_ALREADY_EXISTS: TStatusCode = TStatusCode(15);
    pub const END_OF_FILE: TStatusCode = TStatusCode(30);
    pub const NOT_FOUND: TStatusCode = TStatusCode(31);
    pub const INVALID_ARGUMENT: TStatusCode = TStatusCode(33);
    pub const ALREADY_EXIST: TStatusCode = TStatusCode(35);
    pub const SERVICE_UNAVAILABLE: TStatusCode = TStatusCode(40);
    pub const UNINITIALIZED: TStatusCode = TStatusCode(41);
}

#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TLoadSourceType(pub i32);

impl TLoadSourceType {
    pub const RAW: TLoadSourceType = TLoadSourceType(0);
    pub const KAFKA: TLoadSourceType = TLoadSourceType(1);
}

#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TLoadType(pub i32);

impl TLoadType {
    pub const MANUAL_LOAD: TLoadType = TLoadType(0);
    pub const ROUTINE_LOAD: TLoadType = TLoadType(1);
    pub const MINI_LOAD: TLoadType = TLoadType(2);
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TUniqueId {
    pub hi: i64,
    pub lo: i64,
}

impl TUniqueId {
    pub fn new(hi: i64, lo: i64) -> Self {
        Self { hi, lo }
    }
}

impl TSerializable for TUniqueId {
    fn read_from_in_protocol(i_prot: &mut dyn TInputProtocol) -> thrift::Result<TUniqueId> {
        let mut hi = None;
        let mut lo = None;
        read_struct(i_prot, |i_prot, id, ty| {
            match (id, ty) {
                (1, TType::I64) => hi = Some(i_prot.read_i64()?),
                (2, TType::I64) => lo = Some(i_prot.read_i64()?),
                _ => i_prot.skip(ty)?,
            }
            Ok(())
        })?;
        Ok(TUniqueId {
            hi: hi.ok_or_else(|| invalid_data("TUniqueId.hi is required"))?,
            lo: lo.ok_or_else(|| invalid_data("TUniqueId.lo is required"))?,
        })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        write_struct_begin(o_prot, "TUniqueId")?;
        write_i64_field(o_prot, "hi", 1, self.hi)?;
        write_i64_field(o_prot, "lo", 2, self.lo)?;
        write_struct_end(o_prot)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TStatus {
    pub status_code: TStatusCode,
    pub error_msgs: Option<Vec<String>>,
}

impl TStatus {
    pub fn new(status_code: TStatusCode, error_msgs: Option<Vec<String>>) -> Self {
        Self {
            status_code,
            error_msgs,
        }
    }
}

impl TSerializable for TStatus {
    fn read_from_in_protocol(i_prot: &mut dyn TInputProtocol) -> thrift::Result<TStatus> {
        let mut status_code = None;
        let mut error_msgs = None;
        read_struct(i_prot, |i_prot, id, ty| {
            match (id, ty) {
                (1, TType::I32) => status_code = Some(TStatusCode(i_prot.read_i32()?)),
                (2, TType::List) => error_msgs = Some(read_string_list(i_prot)?),
                _ => i_prot.skip(ty)?,
            }
            Ok(())
        })?;
        Ok(TStatus {
            status_code: status_code
                .ok_or_else(|| invalid_data("TStatus.status_code is required"))?,
            error_msgs,
        })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        write_struct_begin(o_prot, "TStatus")?;
        write_i32_field(o_prot, "status_code", 1, self.status_code.0)?;
        if let Some(msgs) = &self.error_msgs {
            write_string_list_field(o_prot, "error_msgs", 2, msgs)?;
        }
        write_struct_end(o_prot)
    }
}
