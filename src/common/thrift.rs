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
//! Thrift binary helpers shared by the hand-maintained wire structs.

use std::collections::BTreeMap;

use thrift::protocol::{
    TBinaryInputProtocol, TBinaryOutputProtocol, TFieldIdentifier, TInputProtocol,
    TListIdentifier, TMapIdentifier, TOutputProtocol, TSerializable, TStructIdentifier, TType,
    field_id,
};
use thrift::transport::TBufferChannel;
use thrift::{ProtocolError, ProtocolErrorKind};

pub fn thrift_binary_deserialize<T: TSerializable>(bytes: &[u8]) -> Result<T, String> {
    let mut channel = TBufferChannel::with_capacity(bytes.len(), 0);
    channel.set_readable_bytes(bytes);
    let mut prot = TBinaryInputProtocol::new(&mut channel, true);
    T::read_from_in_protocol(&mut prot).map_err(|e| e.to_string())
}

pub fn thrift_binary_serialize<T: TSerializable>(value: &T) -> Result<Vec<u8>, String> {
    // TBufferChannel has a fixed write capacity; grow and retry on overflow.
    const INITIAL_CAPACITY: usize = 1024;
    const MAX_CAPACITY: usize = 64 * 1024 * 1024;

    let mut capacity = INITIAL_CAPACITY;
    loop {
        let mut channel = TBufferChannel::with_capacity(0, capacity);
        let write_result = {
            let mut protocol = TBinaryOutputProtocol::new(&mut channel, true);
            value
                .write_to_out_protocol(&mut protocol)
                .and_then(|_| protocol.flush())
        };
        match write_result {
            Ok(()) => return Ok(channel.write_bytes()),
            Err(e) => {
                if capacity >= MAX_CAPACITY {
                    return Err(e.to_string());
                }
                capacity = capacity.saturating_mul(2).min(MAX_CAPACITY);
            }
        }
    }
}

pub(crate) fn invalid_data(message: impl Into<String>) -> thrift::Error {
    thrift::Error::Protocol(ProtocolError::new(
        ProtocolErrorKind::InvalidData,
        message.into(),
    ))
}

/// Reads one struct, handing every non-stop field to `on_field`.
///
/// `on_field` must consume the field value, either by reading it or by calling
/// `skip` with the given type.
pub(crate) fn read_struct<F>(i_prot: &mut dyn TInputProtocol, mut on_field: F) -> thrift::Result<()>
where
    F: FnMut(&mut dyn TInputProtocol, i16, TType) -> thrift::Result<()>,
{
    i_prot.read_struct_begin()?;
    loop {
        let field = i_prot.read_field_begin()?;
        if field.field_type == TType::Stop {
            break;
        }
        let id = field_id(&field)?;
        on_field(&mut *i_prot, id, field.field_type)?;
        i_prot.read_field_end()?;
    }
    i_prot.read_struct_end()
}

pub(crate) fn read_i32_i64_map(i_prot: &mut dyn TInputProtocol) -> thrift::Result<BTreeMap<i32, i64>> {
    let ident = i_prot.read_map_begin()?;
    let mut out = BTreeMap::new();
    for _ in 0..ident.size {
        let key = i_prot.read_i32()?;
        let value = i_prot.read_i64()?;
        out.insert(key, value);
    }
    i_prot.read_map_end()?;
    Ok(out)
}

pub(crate) fn read_string_map(
    i_prot: &mut dyn TInputProtocol,
) -> thrift::Result<BTreeMap<String, String>> {
    let ident = i_prot.read_map_begin()?;
    let mut out = BTreeMap::new();
    for _ in 0..ident.size {
        let key = i_prot.read_string()?;
        let value = i_prot.read_string()?;
        out.insert(key, value);
    }
    i_prot.read_map_end()?;
    Ok(out)
}

pub(crate) fn read_string_list(i_prot: &mut dyn TInputProtocol) -> thrift::Result<Vec<String>> {
    let ident = i_prot.read_list_begin()?;
    let mut out = Vec::with_capacity(ident.size.max(0) as usize);
    for _ in 0..ident.size {
        out.push(i_prot.read_string()?);
    }
    i_prot.read_list_end()?;
    Ok(out)
}

pub(crate) fn read_struct_list<T: TSerializable>(
    i_prot: &mut dyn TInputProtocol,
) -> thrift::Result<Vec<T>> {
    let ident = i_prot.read_list_begin()?;
    let mut out = Vec::with_capacity(ident.size.max(0) as usize);
    for _ in 0..ident.size {
        out.push(T::read_from_in_protocol(i_prot)?);
    }
    i_prot.read_list_end()?;
    Ok(out)
}

pub(crate) fn write_struct_begin(o_prot: &mut dyn TOutputProtocol, name: &str) -> thrift::Result<()> {
    o_prot.write_struct_begin(&TStructIdentifier::new(name))
}

pub(crate) fn write_struct_end(o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
    o_prot.write_field_stop()?;
    o_prot.write_struct_end()
}

pub(crate) fn write_bool_field(
    o_prot: &mut dyn TOutputProtocol,
    name: &str,
    id: i16,
    value: bool,
) -> thrift::Result<()> {
    o_prot.write_field_begin(&TFieldIdentifier::new(name, TType::Bool, id))?;
    o_prot.write_bool(value)?;
    o_prot.write_field_end()
}

pub(crate) fn write_i32_field(
    o_prot: &mut dyn TOutputProtocol,
    name: &str,
    id: i16,
    value: i32,
) -> thrift::Result<()> {
    o_prot.write_field_begin(&TFieldIdentifier::new(name, TType::I32, id))?;
    o_prot.write_i32(value)?;
    o_prot.write_field_end()
}

pub(crate) fn write_i64_field(
    o_prot: &mut dyn TOutputProtocol,
    name: &str,
    id: i16,
    value: i64,
) -> thrift::Result<()> {
    o_prot.write_field_begin(&TFieldIdentifier::new(name, TType::I64, id))?;
    o_prot.write_i64(value)?;
    o_prot.write_field_end()
}

pub(crate) fn write_opt_i64_field(
    o_prot: &mut dyn TOutputProtocol,
    name: &str,
    id: i16,
    value: Option<i64>,
) -> thrift::Result<()> {
    match value {
        Some(v) => write_i64_field(o_prot, name, id, v),
        None => Ok(()),
    }
}

pub(crate) fn write_string_field(
    o_prot: &mut dyn TOutputProtocol,
    name: &str,
    id: i16,
    value: &str,
) -> thrift::Result<()> {
    o_prot.write_field_begin(&TFieldIdentifier::new(name, TType::String, id))?;
    o_prot.write_string(value)?;
    o_prot.write_field_end()
}

pub(crate) fn write_opt_string_field(
    o_prot: &mut dyn TOutputProtocol,
    name: &str,
    id: i16,
    value: Option<&str>,
) -> thrift::Result<()> {
    match value {
        Some(v) => write_string_field(o_prot, name, id, v),
        None => Ok(()),
    }
}

pub(crate) fn write_struct_field<T: TSerializable>(
    o_prot: &mut dyn TOutputProtocol,
    name: &str,
    id: i16,
    value: &T,
) -> thrift::Result<()> {
    o_prot.write_field_begin(&TFieldIdentifier::new(name, TType::Struct, id))?;
    value.write_to_out_protocol(o_prot)?;
    o_prot.write_field_end()
}

pub(crate) fn write_i32_i64_map_field(
    o_prot: &mut dyn TOutputProtocol,
    name: &str,
    id: i16,
    value: &BTreeMap<i32, i64>,
) -> thrift::Result<()> {
    o_prot.write_field_begin(&TFieldIdentifier::new(name, TType::Map, id))?;
    o_prot.write_map_begin(&TMapIdentifier::new(TType::I32, TType::I64, value.len() as i32))?;
    for (k, v) in value {
        o_prot.write_i32(*k)?;
        o_prot.write_i64(*v)?;
    }
    o_prot.write_map_end()?;
    o_prot.write_field_end()
}

pub(crate) fn write_string_map_field(
    o_prot: &mut dyn TOutputProtocol,
    name: &str,
    id: i16,
    value: &BTreeMap<String, String>,
) -> thrift::Result<()> {
    o_prot.write_field_begin(&TFieldIdentifier::new(name, TType::Map, id))?;
    o_prot.write_map_begin(&TMapIdentifier::new(
        TType::String,
        TType::String,
        value.len() as i32,
    ))?;
    for (k, v) in value {
        o_prot.write_string(k)?;
        o_prot.write_string(v)?;
    }
    o_prot.write_map_end()?;
    o_prot.write_field_end()
}

pub(crate) fn write_string_list_field(
    o_prot: &mut dyn TOutputProtocol,
    name: &str,
    id: i16,
    value: &[String],
) -> thrift::Result<()> {
    o_prot.write_field_begin(&TFieldIdentifier::new(name, TType::List, id))?;
    o_prot.write_list_begin(&TListIdentifier::new(TType::String, value.len() as i32))?;
    for item in value {
        o_prot.write_string(item)?;
    }
    o_prot.write_list_end()?;
    o_prot.write_field_end()
}

pub(crate) fn write_struct_list_field<T: TSerializable>(
    o_prot: &mut dyn TOutputProtocol,
    name: &str,
    id: i16,
    value: &[T],
) -> thrift::Result<()> {
    o_prot.write_field_begin(&TFieldIdentifier::new(name, TType::List, id))?;
    o_prot.write_list_begin(&TListIdentifier::new(TType::Struct, value.len() as i32))?;
    for item in value {
        item.write_to_out_protocol(o_prot)?;
    }
    o_prot.write_list_end()?;
    o_prot.write_field_end()
}
