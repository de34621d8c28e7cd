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
use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::common::status::Status;

/// Outcome label values of `routine_load_task_total`.
pub const RESULT_SUBMITTED: &str = "submitted";
pub const RESULT_DUPLICATED: &str = "duplicated";
pub const RESULT_REJECTED: &str = "rejected";
pub const RESULT_SUCCEEDED: &str = "succeeded";
pub const RESULT_FAILED: &str = "failed";

#[derive(Clone, Debug)]
pub struct RoutineLoadMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    task_count: IntGauge,
    task_total: IntCounterVec,
    consumed_rows: IntCounter,
    consumed_bytes: IntCounter,
}

impl RoutineLoadMetrics {
    pub fn new() -> Result<Self, Status> {
        let inner = MetricsInner::new().map_err(|e| {
            Status::internal_error(format!("failed to register routine load metrics: {e}"))
        })?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn set_task_count(&self, count: usize) {
        self.inner.task_count.set(count as i64);
    }

    pub fn task_count(&self) -> i64 {
        self.inner.task_count.get()
    }

    pub fn inc_task(&self, result: &str) {
        self.inner.task_total.with_label_values(&[result]).inc();
    }

    pub fn task_total(&self, result: &str) -> u64 {
        self.inner.task_total.with_label_values(&[result]).get()
    }

    pub fn record_consumed(&self, rows: u64, bytes: u64) {
        self.inner.consumed_rows.inc_by(rows);
        self.inner.consumed_bytes.inc_by(bytes);
    }

    pub fn consumed_rows(&self) -> u64 {
        self.inner.consumed_rows.get()
    }

    pub fn consumed_bytes(&self) -> u64 {
        self.inner.consumed_bytes.get()
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl MetricsInner {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let task_count = int_gauge(
            &registry,
            "routine_load_task_count",
            "Routine load tasks currently admitted",
        )?;
        let task_total = int_counter_vec(
            &registry,
            "routine_load_task_total",
            "Routine load tasks by outcome",
            &["result"],
        )?;
        let consumed_rows = int_counter(
            &registry,
            "routine_load_consumed_rows_total",
            "Records appended to routine load pipes",
        )?;
        let consumed_bytes = int_counter(
            &registry,
            "routine_load_consumed_bytes_total",
            "Bytes appended to routine load pipes",
        )?;
        Ok(Self {
            registry,
            task_count,
            task_total,
            consumed_rows,
            consumed_bytes,
        })
    }
}

fn int_gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGauge> {
    let g = IntGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn int_counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let c = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn int_counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> prometheus::Result<IntCounterVec> {
    let c = IntCounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}
