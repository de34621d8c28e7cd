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
//! In-memory byte pipe between a routine load consumer and the fragment that
//! loads what it produces.
//!
//! One producer appends chunks, one reader drains them in order. The pipe
//! ends either with `finish` (reader sees EOF after the remaining bytes) or
//! with `cancel` (both sides fail fast). Whichever comes first wins; the
//! other is a no-op.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use bytes::{Buf, Bytes, BytesMut};

use crate::common::status::Status;

pub const LINE_DELIMITER: u8 = b'\n';

#[derive(Debug, Default)]
struct PipeState {
    chunks: VecDeque<Bytes>,
    buffered_bytes: usize,
    appended_bytes: u64,
    finished: bool,
    cancel_reason: Option<String>,
}

impl PipeState {
    fn check_writable(&self) -> Result<(), Status> {
        if let Some(reason) = &self.cancel_reason {
            return Err(Status::cancelled(reason.clone()));
        }
        if self.finished {
            return Err(Status::closed("stream load pipe is already finished"));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct StreamLoadPipe {
    state: Mutex<PipeState>,
    not_empty: Condvar,
    not_full: Condvar,
    max_buffered_bytes: usize,
}

impl StreamLoadPipe {
    pub fn new(max_buffered_bytes: usize) -> Self {
        Self {
            state: Mutex::new(PipeState::default()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            max_buffered_bytes: max_buffered_bytes.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends `data` as one chunk, blocking while the buffer is full.
    ///
    /// A chunk larger than the whole buffer is admitted once the buffer is
    /// empty, so oversized records never deadlock the producer.
    pub fn append(&self, data: &[u8]) -> Result<(), Status> {
        self.append_chunk(Bytes::copy_from_slice(data))
    }

    /// Appends `data` followed by a line delimiter, atomically.
    pub fn append_with_line_delimiter(&self, data: &[u8]) -> Result<(), Status> {
        let mut chunk = BytesMut::with_capacity(data.len() + 1);
        chunk.extend_from_slice(data);
        chunk.extend_from_slice(&[LINE_DELIMITER]);
        self.append_chunk(chunk.freeze())
    }

    fn append_chunk(&self, chunk: Bytes) -> Result<(), Status> {
        let len = chunk.len();
        let mut state = self.lock();
        loop {
            state.check_writable()?;
            let fits = state.buffered_bytes + len <= self.max_buffered_bytes;
            if state.chunks.is_empty() || fits {
                break;
            }
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        if len == 0 {
            return Ok(());
        }
        state.buffered_bytes += len;
        state.appended_bytes += len as u64;
        state.chunks.push_back(chunk);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Producer-side EOF. No-op once finished or cancelled.
    pub fn finish(&self) {
        let mut state = self.lock();
        if state.finished || state.cancel_reason.is_some() {
            return;
        }
        state.finished = true;
        self.not_empty.notify_all();
    }

    /// Aborts the pipe from either side. The first reason is kept.
    pub fn cancel(&self, reason: &str) {
        let mut state = self.lock();
        if state.cancel_reason.is_some() {
            return;
        }
        state.cancel_reason = Some(reason.to_string());
        state.chunks.clear();
        state.buffered_bytes = 0;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Reads up to `buf.len()` bytes, blocking until data, EOF or cancel.
    /// Returns `Ok(0)` at EOF.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, Status> {
        let mut state = self.lock();
        loop {
            if let Some(reason) = &state.cancel_reason {
                return Err(Status::cancelled(reason.clone()));
            }
            if !state.chunks.is_empty() || state.finished {
                break;
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let mut copied = 0;
        while copied < buf.len() {
            let Some(front) = state.chunks.front_mut() else {
                break;
            };
            let n = front.len().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&front[..n]);
            front.advance(n);
            copied += n;
            if front.is_empty() {
                state.chunks.pop_front();
            }
        }
        state.buffered_bytes -= copied;
        if copied > 0 {
            self.not_full.notify_one();
        }
        Ok(copied)
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancel_reason.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    pub fn cancel_reason(&self) -> Option<String> {
        self.lock().cancel_reason.clone()
    }

    /// Bytes accepted by `append` so far, delimiters included.
    pub fn appended_bytes(&self) -> u64 {
        self.lock().appended_bytes
    }

    pub fn buffered_bytes(&self) -> usize {
        self.lock().buffered_bytes
    }

    /// Reader side as `std::io::Read`.
    pub fn reader(self: &Arc<Self>) -> StreamLoadPipeReader {
        StreamLoadPipeReader {
            pipe: Arc::clone(self),
        }
    }
}

pub struct StreamLoadPipeReader {
    pipe: Arc<StreamLoadPipe>,
}

impl io::Read for StreamLoadPipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.pipe
            .read(buf)
            .map_err(|st| io::Error::other(st.to_string()))
    }
}
