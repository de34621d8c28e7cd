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
//! Kafka variant of the routine load consumer.
//!
//! Partitions are assigned explicitly at the offsets FE sent; no consumer
//! group coordination and no offset commits happen on the broker. Progress
//! goes back to FE inside the txn commit attachment instead.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rdkafka::ClientConfig;
use rdkafka::Offset;
use rdkafka::TopicPartitionList;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;

use crate::common::status::Status;
use crate::runtime::metrics::RoutineLoadMetrics;
use crate::runtime::routine_load::data_consumer::DataConsumer;
use crate::runtime::stream_load_context::{KafkaLoadInfo, StreamLoadContext};
use crate::runtime::stream_load_pipe::StreamLoadPipe;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KafkaRecord {
    pub partition: i32,
    pub offset: i64,
    /// `None` for tombstones.
    pub payload: Option<Vec<u8>>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KafkaPollEvent {
    Message(KafkaRecord),
    /// No more data in this partition for now.
    PartitionEof(i32),
    Timeout,
}

/// A positioned Kafka reader.
pub trait KafkaMessageSource: Send {
    fn poll(&mut self, timeout: Duration) -> Result<KafkaPollEvent, Status>;
}

pub trait KafkaSourceFactory: Send + Sync {
    /// Opens a reader over `info.topic` with every partition of
    /// `info.begin_offset` assigned at its begin offset.
    fn open(
        &self,
        info: &KafkaLoadInfo,
        properties: &BTreeMap<String, String>,
    ) -> Result<Box<dyn KafkaMessageSource>, Status>;
}

/// Consumer properties: configured defaults, then the task's own bag, then the
/// settings routine load depends on.
pub fn consumer_properties(
    defaults: &BTreeMap<String, String>,
    info: &KafkaLoadInfo,
    job_id: i64,
) -> BTreeMap<String, String> {
    let mut props = defaults.clone();
    props.extend(info.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
    props
        .entry("group.id".to_string())
        .or_insert_with(|| format!("routine_load_{job_id}"));
    props.insert("bootstrap.servers".to_string(), info.brokers.clone());
    props.insert("enable.auto.commit".to_string(), "false".to_string());
    props.insert("enable.partition.eof".to_string(), "true".to_string());
    props
}

pub struct RdKafkaSourceFactory;

struct RdKafkaMessageSource {
    consumer: BaseConsumer,
}

impl KafkaSourceFactory for RdKafkaSourceFactory {
    fn open(
        &self,
        info: &KafkaLoadInfo,
        properties: &BTreeMap<String, String>,
    ) -> Result<Box<dyn KafkaMessageSource>, Status> {
        let mut config = ClientConfig::new();
        for (key, value) in properties {
            config.set(key, value);
        }
        let consumer: BaseConsumer = config.create().map_err(|e| {
            Status::initialization_failed(format!("failed to create kafka consumer: {e}"))
        })?;

        let mut tpl = TopicPartitionList::new();
        for (partition, offset) in &info.begin_offset {
            tpl.add_partition_offset(&info.topic, *partition, Offset::Offset(*offset))
                .map_err(|e| {
                    Status::initialization_failed(format!(
                        "invalid kafka offset {offset} for partition {partition}: {e}"
                    ))
                })?;
        }
        consumer.assign(&tpl).map_err(|e| {
            Status::initialization_failed(format!(
                "failed to assign kafka partitions of topic {}: {e}",
                info.topic
            ))
        })?;
        Ok(Box::new(RdKafkaMessageSource { consumer }))
    }
}

impl KafkaMessageSource for RdKafkaMessageSource {
    fn poll(&mut self, timeout: Duration) -> Result<KafkaPollEvent, Status> {
        match self.consumer.poll(timeout) {
            None => Ok(KafkaPollEvent::Timeout),
            Some(Ok(msg)) => Ok(KafkaPollEvent::Message(KafkaRecord {
                partition: msg.partition(),
                offset: msg.offset(),
                payload: msg.payload().map(<[u8]>::to_vec),
            })),
            Some(Err(KafkaError::PartitionEOF(partition))) => {
                Ok(KafkaPollEvent::PartitionEof(partition))
            }
            Some(Err(e)) => Err(Status::internal_error(format!(
                "failed to consume kafka message: {e}"
            ))),
        }
    }
}

pub struct KafkaDataConsumer {
    ctx: Arc<StreamLoadContext>,
    pipe: Arc<StreamLoadPipe>,
    factory: Arc<dyn KafkaSourceFactory>,
    default_properties: BTreeMap<String, String>,
    poll_timeout: Duration,
    metrics: RoutineLoadMetrics,
    source: Mutex<Option<Box<dyn KafkaMessageSource>>>,
    cancelled: AtomicBool,
}

impl KafkaDataConsumer {
    pub fn new(
        ctx: Arc<StreamLoadContext>,
        pipe: Arc<StreamLoadPipe>,
        factory: Arc<dyn KafkaSourceFactory>,
        default_properties: BTreeMap<String, String>,
        poll_timeout: Duration,
        metrics: RoutineLoadMetrics,
    ) -> Self {
        Self {
            ctx,
            pipe,
            factory,
            default_properties,
            poll_timeout,
            metrics,
            source: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        }
    }

    fn info(&self) -> Result<&KafkaLoadInfo, Status> {
        self.ctx
            .kafka_info()
            .ok_or_else(|| Status::invalid_argument("routine load task is not a kafka task"))
    }

    fn fail(&self, st: Status) -> Result<(), Status> {
        self.pipe.cancel(&st.message);
        Err(st)
    }
}

impl DataConsumer for KafkaDataConsumer {
    fn init(&self) -> Result<(), Status> {
        let info = self.info()?;
        let props = consumer_properties(&self.default_properties, info, self.ctx.job_id);
        let source = self.factory.open(info, &props)?;
        *self.source.lock().unwrap_or_else(|e| e.into_inner()) = Some(source);
        tracing::info!(
            task_id = %self.ctx.id,
            topic = %info.topic,
            partitions = ?info.begin_offset,
            "kafka consumer initialized"
        );
        Ok(())
    }

    fn start(&self) -> Result<(), Status> {
        let info = self.info()?;
        let Some(mut source) = self.source.lock().unwrap_or_else(|e| e.into_inner()).take()
        else {
            return self.fail(Status::internal_error("kafka consumer is not initialized"));
        };

        let limits = self.ctx.limits;
        let start = Instant::now();
        let mut rows: i64 = 0;
        let mut bytes: i64 = 0;
        let mut eof_partitions = BTreeSet::new();

        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return self.fail(Status::cancelled("kafka consumer is cancelled"));
            }
            if let Some(reason) = self.pipe.cancel_reason() {
                return Err(Status::cancelled(reason));
            }
            let elapsed = start.elapsed();
            if elapsed >= limits.max_interval
                || rows >= limits.max_batch_rows
                || bytes >= limits.max_batch_size
                || eof_partitions.len() == info.begin_offset.len()
            {
                break;
            }

            let timeout = self.poll_timeout.min(limits.max_interval - elapsed);
            match source.poll(timeout) {
                Ok(KafkaPollEvent::Message(record)) => {
                    eof_partitions.remove(&record.partition);
                    let Some(payload) = record.payload else {
                        self.ctx.record_consumed(record.partition, record.offset, None);
                        continue;
                    };
                    if let Err(st) = self.pipe.append_with_line_delimiter(&payload) {
                        return self.fail(st);
                    }
                    rows += 1;
                    bytes += payload.len() as i64;
                    self.ctx
                        .record_consumed(record.partition, record.offset, Some(payload.len()));
                    self.metrics.record_consumed(1, payload.len() as u64);
                }
                Ok(KafkaPollEvent::PartitionEof(partition)) => {
                    if info.begin_offset.contains_key(&partition) {
                        eof_partitions.insert(partition);
                    }
                }
                Ok(KafkaPollEvent::Timeout) => {}
                Err(st) => return self.fail(st),
            }
        }

        if let Some(reason) = self.pipe.cancel_reason() {
            return Err(Status::cancelled(reason));
        }
        self.pipe.finish();
        tracing::info!(
            task_id = %self.ctx.id,
            rows,
            bytes,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "kafka consumer finished batch"
        );
        Ok(())
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.pipe.cancel("kafka consumer is cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::status::StatusCode;
    use crate::runtime::stream_load_context::{BatchLimits, LoadSourceInfo};
    use crate::wire::backend_service::{TKafkaLoadInfo, TRoutineLoadTask};
    use crate::wire::types::{TLoadSourceType, TUniqueId};
    use std::collections::VecDeque;
    use std::io::Read;

    struct ScriptedSource {
        events: VecDeque<Result<KafkaPollEvent, Status>>,
    }

    impl KafkaMessageSource for ScriptedSource {
        fn poll(&mut self, timeout: Duration) -> Result<KafkaPollEvent, Status> {
            match self.events.pop_front() {
                Some(event) => event,
                None => {
                    std::thread::sleep(timeout.min(Duration::from_millis(5)));
                    Ok(KafkaPollEvent::Timeout)
                }
            }
        }
    }

    struct ScriptedFactory {
        events: Mutex<Option<Vec<Result<KafkaPollEvent, Status>>>>,
        seen_properties: Mutex<BTreeMap<String, String>>,
    }

    impl ScriptedFactory {
        fn new(events: Vec<Result<KafkaPollEvent, Status>>) -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Some(events)),
                seen_properties: Mutex::new(BTreeMap::new()),
            })
        }
    }

    impl KafkaSourceFactory for ScriptedFactory {
        fn open(
            &self,
            _info: &KafkaLoadInfo,
            properties: &BTreeMap<String, String>,
        ) -> Result<Box<dyn KafkaMessageSource>, Status> {
            *self.seen_properties.lock().unwrap() = properties.clone();
            let events = self
                .events
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| Status::initialization_failed("broker unreachable"))?;
            Ok(Box::new(ScriptedSource {
                events: events.into(),
            }))
        }
    }

    fn msg(partition: i32, offset: i64, payload: &str) -> Result<KafkaPollEvent, Status> {
        Ok(KafkaPollEvent::Message(KafkaRecord {
            partition,
            offset,
            payload: Some(payload.as_bytes().to_vec()),
        }))
    }

    fn context(partitions: &[(i32, i64)], max_rows: i64, max_interval_s: i64) -> Arc<StreamLoadContext> {
        let task = TRoutineLoadTask {
            type_: TLoadSourceType::KAFKA,
            job_id: 42,
            id: TUniqueId::new(1, 1),
            txn_id: 2,
            auth_code: 3,
            db: None,
            tbl: None,
            label: None,
            max_interval_s: Some(max_interval_s),
            max_batch_rows: Some(max_rows),
            max_batch_size: None,
            kafka_load_info: Some(TKafkaLoadInfo {
                brokers: "k1:9092,k2:9092".into(),
                topic: "events".into(),
                partition_begin_offset: partitions.iter().copied().collect(),
                properties: Some(BTreeMap::from([
                    ("client.id".into(), "task".into()),
                    ("enable.auto.commit".into(), "true".into()),
                ])),
            }),
        };
        let source = LoadSourceInfo::from_task(&task).unwrap();
        let limits = BatchLimits::resolve(&task, &BatchLimits::default());
        Arc::new(StreamLoadContext::new(&task, source, limits))
    }

    fn consumer(
        ctx: &Arc<StreamLoadContext>,
        pipe: &Arc<StreamLoadPipe>,
        factory: Arc<ScriptedFactory>,
    ) -> KafkaDataConsumer {
        KafkaDataConsumer::new(
            Arc::clone(ctx),
            Arc::clone(pipe),
            factory,
            BTreeMap::from([("client.id".into(), "be".into()), ("fetch.max.bytes".into(), "1024".into())]),
            Duration::from_millis(20),
            RoutineLoadMetrics::new().unwrap(),
        )
    }

    fn drain(pipe: &Arc<StreamLoadPipe>) -> String {
        let mut out = String::new();
        pipe.reader().read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn properties_layer_defaults_task_and_mandatory_settings() {
        let ctx = context(&[(0, 0)], 10, 5);
        let props = consumer_properties(
            &BTreeMap::from([("client.id".into(), "be".into())]),
            ctx.kafka_info().unwrap(),
            42,
        );
        assert_eq!(props["client.id"], "task");
        assert_eq!(props["group.id"], "routine_load_42");
        assert_eq!(props["bootstrap.servers"], "k1:9092,k2:9092");
        assert_eq!(props["enable.auto.commit"], "false");
        assert_eq!(props["enable.partition.eof"], "true");
    }

    #[test]
    fn stops_at_row_limit_and_tracks_offsets() {
        let ctx = context(&[(0, 100)], 3, 30);
        let pipe = Arc::new(StreamLoadPipe::new(1024));
        let factory = ScriptedFactory::new(vec![
            msg(0, 100, "a"),
            msg(0, 101, "b"),
            msg(0, 102, "c"),
            msg(0, 103, "never read"),
        ]);
        let consumer = consumer(&ctx, &pipe, Arc::clone(&factory));
        consumer.init().unwrap();
        consumer.start().unwrap();

        assert!(pipe.is_finished());
        assert_eq!(drain(&pipe), "a\nb\nc\n");
        assert_eq!(ctx.cmt_offset(), BTreeMap::from([(0, 102)]));
        assert_eq!(ctx.received_rows(), 3);
        assert_eq!(factory.seen_properties.lock().unwrap()["fetch.max.bytes"], "1024");
    }

    #[test]
    fn stops_when_every_partition_hits_eof() {
        let ctx = context(&[(0, 5), (1, 9)], 100, 30);
        let pipe = Arc::new(StreamLoadPipe::new(1024));
        let factory = ScriptedFactory::new(vec![
            msg(1, 9, "x"),
            Ok(KafkaPollEvent::PartitionEof(1)),
            Ok(KafkaPollEvent::Message(KafkaRecord {
                partition: 0,
                offset: 5,
                payload: None,
            })),
            Ok(KafkaPollEvent::PartitionEof(7)),
            Ok(KafkaPollEvent::PartitionEof(0)),
            msg(0, 6, "never read"),
        ]);
        let consumer = consumer(&ctx, &pipe, factory);
        consumer.init().unwrap();
        consumer.start().unwrap();

        assert_eq!(drain(&pipe), "x\n");
        // the tombstone moved partition 0 without producing a row
        assert_eq!(ctx.cmt_offset(), BTreeMap::from([(0, 5), (1, 9)]));
        assert_eq!(ctx.received_rows(), 1);
    }

    #[test]
    fn stops_at_interval_with_empty_batch() {
        let ctx = context(&[(0, 0)], 100, 1);
        let pipe = Arc::new(StreamLoadPipe::new(1024));
        let consumer = consumer(&ctx, &pipe, ScriptedFactory::new(vec![]));
        consumer.init().unwrap();
        let begin = Instant::now();
        consumer.start().unwrap();
        assert!(begin.elapsed() >= Duration::from_secs(1));
        assert_eq!(drain(&pipe), "");
        assert_eq!(ctx.cmt_offset(), BTreeMap::from([(0, -1)]));
    }

    #[test]
    fn broker_error_cancels_pipe() {
        let ctx = context(&[(0, 0)], 100, 30);
        let pipe = Arc::new(StreamLoadPipe::new(1024));
        let factory = ScriptedFactory::new(vec![
            msg(0, 0, "a"),
            Err(Status::internal_error("broker transport failure")),
        ]);
        let consumer = consumer(&ctx, &pipe, factory);
        consumer.init().unwrap();
        let err = consumer.start().unwrap_err();
        assert_eq!(err.code, StatusCode::InternalError);
        assert!(pipe.is_cancelled());
    }

    #[test]
    fn init_failure_surfaces_initialization_failed() {
        let ctx = context(&[(0, 0)], 100, 30);
        let pipe = Arc::new(StreamLoadPipe::new(1024));
        let factory = ScriptedFactory::new(vec![]);
        factory.events.lock().unwrap().take();
        let err = consumer(&ctx, &pipe, factory).init().unwrap_err();
        assert_eq!(err.code, StatusCode::InitializationFailed);
    }

    #[test]
    fn pipe_cancelled_by_reader_stops_idle_start() {
        let ctx = context(&[(0, 0)], 100, 30);
        let pipe = Arc::new(StreamLoadPipe::new(1024));
        let consumer = Arc::new(consumer(&ctx, &pipe, ScriptedFactory::new(vec![])));
        consumer.init().unwrap();
        let begin = Instant::now();
        let runner = {
            let consumer = Arc::clone(&consumer);
            std::thread::spawn(move || consumer.start())
        };
        std::thread::sleep(Duration::from_millis(50));
        pipe.cancel("fragment failed: bad row");
        let err = runner.join().unwrap().unwrap_err();
        assert_eq!(err.code, StatusCode::Cancelled);
        assert_eq!(err.message, "fragment failed: bad row");
        assert!(begin.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn cancel_stops_running_start() {
        let ctx = context(&[(0, 0)], 100, 30);
        let pipe = Arc::new(StreamLoadPipe::new(1024));
        let consumer = Arc::new(consumer(&ctx, &pipe, ScriptedFactory::new(vec![])));
        consumer.init().unwrap();
        let runner = {
            let consumer = Arc::clone(&consumer);
            std::thread::spawn(move || consumer.start())
        };
        std::thread::sleep(Duration::from_millis(50));
        consumer.cancel();
        consumer.cancel();
        let err = runner.join().unwrap().unwrap_err();
        assert_eq!(err.code, StatusCode::Cancelled);
        assert!(pipe.is_cancelled());
    }
}
