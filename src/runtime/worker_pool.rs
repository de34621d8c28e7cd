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
//! Fixed-size worker pool with a bounded admission queue.
//!
//! `offer` never blocks: a full queue or a pool that is shutting down rejects
//! the task and the caller decides what to do with it. Tasks already queued
//! when `shutdown` is called still run.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::common::status::panic_message;

type PoolTask = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    name: String,
    inner: Arc<WorkerPoolInner>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    /// `queue_capacity` bounds tasks waiting for a worker; 0 rejects every offer.
    pub fn new(name: &str, num_threads: usize, queue_capacity: usize) -> Self {
        let inner = Arc::new(WorkerPoolInner::new(queue_capacity));
        let threads = num_threads.max(1);
        let mut workers = Vec::with_capacity(threads);
        for idx in 0..threads {
            let inner_clone = Arc::clone(&inner);
            let pool_name = name.to_string();
            let spawned = thread::Builder::new()
                .name(format!("{name}-{idx}"))
                .spawn(move || worker_loop(inner_clone, &pool_name));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => tracing::error!(pool = name, error = %e, "failed to spawn worker thread"),
            }
        }
        Self {
            name: name.to_string(),
            inner,
            workers: Mutex::new(workers),
        }
    }

    pub fn offer<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.offer(Box::new(task))
    }

    pub fn queued_tasks(&self) -> usize {
        self.inner.lock_queue().len()
    }

    pub fn running_tasks(&self) -> usize {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Stops admission, lets workers drain the queue, then joins them.
    pub fn shutdown(&self) {
        self.inner.begin_shutdown();
        let handles = {
            let mut guard = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        let current = thread::current().id();
        for handle in handles {
            // A task that shuts the pool down cannot join its own thread.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!(pool = %self.name, "worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.inner.begin_shutdown();
    }
}

struct WorkerPoolInner {
    queue: Mutex<VecDeque<PoolTask>>,
    cv: Condvar,
    capacity: usize,
    running: AtomicUsize,
    shutdown: AtomicBool,
}

impl WorkerPoolInner {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            capacity,
            running: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<PoolTask>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn offer(&self, task: PoolTask) -> bool {
        let mut queue = self.lock_queue();
        if self.shutdown.load(Ordering::Acquire) || queue.len() >= self.capacity {
            return false;
        }
        queue.push_back(task);
        self.cv.notify_one();
        true
    }

    fn begin_shutdown(&self) {
        let _queue = self.lock_queue();
        self.shutdown.store(true, Ordering::Release);
        self.cv.notify_all();
    }

    fn take(&self) -> Option<PoolTask> {
        let mut queue = self.lock_queue();
        loop {
            if let Some(task) = queue.pop_front() {
                self.running.fetch_add(1, Ordering::AcqRel);
                return Some(task);
            }
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            queue = self.cv.wait(queue).unwrap_or_else(|e| e.into_inner());
        }
    }
}

fn worker_loop(inner: Arc<WorkerPoolInner>, pool_name: &str) {
    while let Some(task) = inner.take() {
        // A panicking task must not take the worker down with it.
        if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            tracing::error!(
                pool = pool_name,
                "worker pool task panicked: {}",
                panic_message(payload.as_ref())
            );
        }
        inner.running.fetch_sub(1, Ordering::AcqRel);
    }
}
