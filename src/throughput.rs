//! Subscriber-side loss and throughput tracking
//!
//! [`ThroughputListener`] classifies every incoming message, echoes pings,
//! counts samples and detects forward sequence gaps per publisher. The
//! counters it updates are atomics so the subscriber's reporting loop can
//! sample them through [`ThroughputIntervalMeter`] without taking the
//! listener lock.

use crate::classifier::{MessageClass, MessageClassifier};
use crate::clock;
use crate::coordinator::FinishedSet;
use crate::cpu::{CpuSampler, SharedCpuSampler};
use crate::logging::Logger;
use crate::models::message::{NOT_A_PING, OVERHEAD_BYTES};
use crate::models::metrics::lost_ratio;
use crate::models::{ListenerSettings, TestMessage, ThroughputInterval, ThroughputSummary};
use crate::output::SharedRenderer;
use crate::transport::{MessageListener, MessageWriter};
use crate::types::DatasetKind;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Diagnostic rendered when publishers finish before any sample arrived
pub const NO_SAMPLES_DIAGNOSTIC: &str = "\nNo samples have been received by the Subscriber side,\n\
however 1 or more Publishers sent the finalization message.\n\n\
There are several reasons why this could happen:\n\
- If you are using large data, make sure the transport can carry samples\n  \
of that size and that its queues are deep enough.\n\
- Make sure --num-iter in the Publisher side is big enough.\n\
- Make sure publishers and subscribers agree on --num-publishers.\n\n";

/// Per-origin forward-gap detector
#[derive(Debug, Clone)]
pub struct LossTracker {
    last_seq: Vec<Option<u32>>,
}

impl LossTracker {
    pub fn new(publishers: usize) -> Self {
        Self {
            last_seq: vec![None; publishers],
        }
    }

    /// Record `seq` from `origin`; returns the packets newly presumed lost.
    ///
    /// The first sample from an origin sets its baseline. Only forward gaps
    /// count, so reordering or a restarted publisher never adds loss.
    pub fn observe(&mut self, origin: usize, seq: u32) -> u64 {
        let Some(slot) = self.last_seq.get_mut(origin) else {
            return 0;
        };

        let missing = match *slot {
            Some(last) => {
                let expected = last.wrapping_add(1);
                if seq > expected {
                    (seq - expected) as u64
                } else {
                    0
                }
            }
            None => 0,
        };
        *slot = Some(seq);
        missing
    }

    /// Loss between the last sample seen from `origin` and `last_sent`,
    /// the sequence number a control message reports as last sent
    pub fn settle_trailing(&mut self, origin: usize, last_sent: u32) -> u64 {
        match self.last_seq.get_mut(origin) {
            Some(Some(last)) if last_sent > *last => {
                let missing = (last_sent - *last) as u64;
                *last = last_sent;
                missing
            }
            _ => 0,
        }
    }

    pub fn last_seen(&self, origin: usize) -> Option<u32> {
        self.last_seq.get(origin).copied().flatten()
    }

    pub fn reset(&mut self) {
        self.last_seq.iter_mut().for_each(|slot| *slot = None);
    }
}

/// Point-in-time copy of [`ThroughputCounters`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub packets: u64,
    pub bytes: u64,
    pub missing: u64,
    /// Wire length of the current dataset, 0 before the first sample
    pub data_length: u64,
}

/// Counters of the current dataset, shared with the reporting loop
#[derive(Debug, Default)]
pub struct ThroughputCounters {
    packets: AtomicU64,
    bytes: AtomicU64,
    missing: AtomicU64,
    data_length: AtomicU64,
    /// Bumped whenever a dataset starts, including one repeating the previous length
    dataset: AtomicU64,
    end_test: AtomicBool,
    change_size: AtomicBool,
}

impl ThroughputCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Acquire)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    pub fn missing(&self) -> u64 {
        self.missing.load(Ordering::Acquire)
    }

    /// Wire length of the current dataset, `None` before the first sample
    pub fn data_length(&self) -> Option<u64> {
        match self.data_length.load(Ordering::Acquire) {
            0 => None,
            length => Some(length),
        }
    }

    /// Number of datasets started so far
    pub fn dataset(&self) -> u64 {
        self.dataset.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            packets: self.packets(),
            bytes: self.bytes(),
            missing: self.missing(),
            data_length: self.data_length.load(Ordering::Acquire),
        }
    }

    /// Every expected publisher has finished
    pub fn is_end_test(&self) -> bool {
        self.end_test.load(Ordering::Acquire)
    }

    pub fn set_end_test(&self) {
        self.end_test.store(true, Ordering::Release);
    }

    /// A resize was observed and not yet acknowledged
    pub fn change_size_pending(&self) -> bool {
        self.change_size.load(Ordering::Acquire)
    }

    /// Clear the resize flag; returns whether it was set
    pub fn take_change_size(&self) -> bool {
        self.change_size.swap(false, Ordering::AcqRel)
    }

    fn raise_change_size(&self) {
        self.change_size.store(true, Ordering::Release);
    }

    fn record(&self, wire_bytes: u64) {
        self.packets.fetch_add(1, Ordering::AcqRel);
        self.bytes.fetch_add(wire_bytes, Ordering::AcqRel);
    }

    fn add_missing(&self, missing: u64) {
        if missing > 0 {
            self.missing.fetch_add(missing, Ordering::AcqRel);
        }
    }

    fn reset_counts(&self) {
        self.packets.store(0, Ordering::Release);
        self.bytes.store(0, Ordering::Release);
        self.missing.store(0, Ordering::Release);
    }

    fn start_dataset(&self, wire_length: u64) {
        self.reset_counts();
        self.data_length.store(wire_length, Ordering::Release);
        self.dataset.fetch_add(1, Ordering::AcqRel);
    }
}

/// Subscriber listener on the throughput topic
pub struct ThroughputListener {
    classifier: MessageClassifier,
    settings: ListenerSettings,
    echo: Box<dyn MessageWriter>,
    renderer: SharedRenderer,
    cpu: Option<SharedCpuSampler>,
    logger: Logger,
    counters: Arc<ThroughputCounters>,
    loss: LossTracker,
    finished: FinishedSet,
    /// Payload size of the dataset being received
    current_size: Option<usize>,
    /// Samples arrived since the last summary; cleared once it is rendered
    dataset_open: bool,
    dataset_start_usec: u64,
    /// Origin and sequence number of the last resize handled
    last_resize: Option<(i32, u32)>,
    anomalies: u64,
    echo_failures: u64,
}

impl ThroughputListener {
    /// `cpu` is only consulted when `settings.show_cpu` is set
    pub fn new(
        settings: ListenerSettings,
        echo: Box<dyn MessageWriter>,
        renderer: SharedRenderer,
        cpu: Option<SharedCpuSampler>,
        logger: Logger,
    ) -> Self {
        let classifier = MessageClassifier::for_subscriber(
            settings.num_publishers,
            settings.subscriber_id,
            settings.content_filter,
        );
        let cpu = if settings.show_cpu {
            Some(cpu.unwrap_or_else(|| Arc::new(Mutex::new(CpuSampler::new()))))
        } else {
            None
        };

        Self {
            classifier,
            loss: LossTracker::new(settings.num_publishers),
            finished: FinishedSet::with_expected(settings.num_publishers),
            settings,
            echo,
            renderer,
            cpu,
            logger,
            counters: Arc::new(ThroughputCounters::new()),
            current_size: None,
            dataset_open: false,
            dataset_start_usec: clock::now_usec(),
            last_resize: None,
            anomalies: 0,
            echo_failures: 0,
        }
    }

    pub fn counters(&self) -> Arc<ThroughputCounters> {
        self.counters.clone()
    }

    pub fn cpu(&self) -> Option<SharedCpuSampler> {
        self.cpu.clone()
    }

    /// Messages dropped as unrecognized
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    pub fn echo_failures(&self) -> u64 {
        self.echo_failures
    }

    /// Distinct publishers that announced completion
    pub fn finished_count(&self) -> usize {
        self.finished.len()
    }

    pub fn on_message_at(&mut self, message: &TestMessage, now_usec: u64) {
        match self.classifier.classify_message(message) {
            MessageClass::Unrecognized(anomaly) => {
                self.anomalies += 1;
                self.logger
                    .warn("Dropping unrecognized message")
                    .field("anomaly", anomaly.to_string())
                    .field("origin", message.entity_id)
                    .log();
            }
            MessageClass::Init => self.echo(message),
            MessageClass::Finished => self.on_finished(message, now_usec),
            MessageClass::Resize => {
                self.print_summary_at(message, false, now_usec);
                // Control messages are re-sent until acknowledged; react to each resize once
                let resize = (message.entity_id, message.seq_num);
                if self.last_resize != Some(resize) {
                    self.last_resize = Some(resize);
                    if self.is_addressed(message) {
                        self.echo(message);
                    }
                    self.counters.raise_change_size();
                }
            }
            MessageClass::PingRequest => {
                self.echo(message);
                self.count_sample(message, now_usec);
            }
            MessageClass::DataSample => self.count_sample(message, now_usec),
        }
    }

    /// Render the summary of the current dataset.
    ///
    /// `message` is the control message that triggered it; its sequence
    /// number settles trailing loss for its origin.
    pub fn print_summary(&mut self, message: &TestMessage, end_test: bool) {
        self.print_summary_at(message, end_test, clock::now_usec());
    }

    pub fn print_summary_at(&mut self, message: &TestMessage, end_test: bool, now_usec: u64) {
        let pending = self.current_size.filter(|_| self.dataset_open);

        if let Some(size) = pending {
            if !self.settings.content_filter {
                if let Ok(origin) = usize::try_from(message.entity_id) {
                    let trailing = self.loss.settle_trailing(origin, message.seq_num);
                    self.counters.add_missing(trailing);
                }
            }

            let snapshot = self.counters.snapshot();
            let interval_usec = clock::elapsed_usec(self.dataset_start_usec, now_usec);
            let cpu = self.cpu.as_ref().map(|cpu| cpu.lock().average());

            match ThroughputSummary::from_counters(
                snapshot.packets,
                snapshot.bytes,
                snapshot.missing,
                interval_usec,
                cpu,
            ) {
                Some(summary) => {
                    if let Err(e) = self.renderer.lock().throughput_summary(&summary) {
                        self.logger.error("Failed to write throughput summary").error_info(&e).log();
                    }
                }
                None if end_test => self.no_samples(),
                None => {
                    self.logger
                        .debug("Skipping empty throughput summary")
                        .field("data_length", size + OVERHEAD_BYTES)
                        .log();
                }
            }
            self.dataset_open = false;
        } else if end_test && self.current_size.is_none() {
            self.no_samples();
        }

        self.counters.reset_counts();
        self.loss.reset();
        self.dataset_start_usec = now_usec;
    }

    fn on_finished(&mut self, message: &TestMessage, now_usec: u64) {
        if self.counters.is_end_test() {
            return;
        }
        let Ok(origin) = usize::try_from(message.entity_id) else {
            return;
        };
        if !self.finished.insert(origin) {
            return;
        }

        self.logger
            .debug("Publisher finished")
            .field("publisher", message.entity_id)
            .field("finished", self.finished.len())
            .log();

        if self.finished.len() >= self.settings.num_publishers {
            self.print_summary_at(message, true, now_usec);
            self.counters.set_end_test();
        }
    }

    fn count_sample(&mut self, message: &TestMessage, now_usec: u64) {
        let size = message.size();
        let wire_length = (size + OVERHEAD_BYTES) as u64;

        // A resize to the length already running still starts a new dataset
        if self.current_size != Some(size) || !self.dataset_open {
            self.current_size = Some(size);
            self.dataset_open = true;
            self.counters.start_dataset(wire_length);
            self.loss.reset();
            self.dataset_start_usec = now_usec;

            if let Err(e) = self
                .renderer
                .lock()
                .begin_dataset(DatasetKind::Throughput, size + OVERHEAD_BYTES)
            {
                self.logger.error("Failed to write dataset header").error_info(&e).log();
            }
        }

        self.counters.record(wire_length);

        if !self.settings.content_filter {
            if let Ok(origin) = usize::try_from(message.entity_id) {
                let missing = self.loss.observe(origin, message.seq_num);
                self.counters.add_missing(missing);
            }
        }
    }

    /// The publisher asked this subscriber to echo the message back
    fn is_addressed(&self, message: &TestMessage) -> bool {
        message.latency_ping == self.settings.subscriber_id
            || (self.settings.content_filter && message.latency_ping != NOT_A_PING)
    }

    fn echo(&mut self, message: &TestMessage) {
        let result = self.echo.send(message, false).and_then(|_| self.echo.flush());
        if let Err(e) = result {
            self.echo_failures += 1;
            self.logger.warn("Failed to echo message").error_info(&e).log();
        }
    }

    fn no_samples(&mut self) {
        if let Err(e) = self.renderer.lock().diagnostic(NO_SAMPLES_DIAGNOSTIC) {
            self.logger.error("Failed to write diagnostic").error_info(&e).log();
        }
    }
}

impl MessageListener for ThroughputListener {
    fn on_message(&mut self, message: &TestMessage) {
        self.on_message_at(message, clock::now_usec());
    }

    fn is_finished(&self) -> bool {
        self.counters.is_end_test()
    }
}

/// Per-tick throughput rates for the subscriber's reporting loop
#[derive(Debug, Clone)]
pub struct ThroughputIntervalMeter {
    data_length: Option<u64>,
    dataset: u64,
    prev_packets: u64,
    prev_bytes: u64,
    prev_usec: u64,
    ticks: u64,
    packets_per_sec_avg: f64,
    bytes_per_sec_avg: f64,
}

impl ThroughputIntervalMeter {
    pub fn new(now_usec: u64) -> Self {
        Self {
            data_length: None,
            dataset: 0,
            prev_packets: 0,
            prev_bytes: 0,
            prev_usec: now_usec,
            ticks: 0,
            packets_per_sec_avg: 0.0,
            bytes_per_sec_avg: 0.0,
        }
    }

    /// Rates since the previous tick.
    ///
    /// A tick that sees a new dataset only rebases the meter. `None`
    /// is returned for those ticks and while the dataset has no packets.
    /// CPU is left unset for the caller.
    pub fn sample(&mut self, counters: &ThroughputCounters, now_usec: u64) -> Option<ThroughputInterval> {
        let snapshot = counters.snapshot();
        let elapsed = clock::elapsed_usec(self.prev_usec, now_usec);
        self.prev_usec = now_usec;

        let length = counters.data_length();
        let dataset = counters.dataset();
        if length != self.data_length || dataset != self.dataset {
            self.data_length = length;
            self.dataset = dataset;
            self.prev_packets = snapshot.packets;
            self.prev_bytes = snapshot.bytes;
            self.ticks = 0;
            self.packets_per_sec_avg = 0.0;
            self.bytes_per_sec_avg = 0.0;
            return None;
        }

        let packets = snapshot.packets.saturating_sub(self.prev_packets);
        let bytes = snapshot.bytes.saturating_sub(self.prev_bytes);
        self.prev_packets = snapshot.packets;
        self.prev_bytes = snapshot.bytes;

        if elapsed == 0 {
            return None;
        }
        let seconds = elapsed as f64 / 1e6;
        let packets_per_sec = packets as f64 / seconds;
        let bytes_per_sec = bytes as f64 / seconds;

        self.ticks += 1;
        let n = self.ticks as f64;
        self.packets_per_sec_avg += (packets_per_sec - self.packets_per_sec_avg) / n;
        self.bytes_per_sec_avg += (bytes_per_sec - self.bytes_per_sec_avg) / n;

        if snapshot.packets == 0 {
            return None;
        }

        Some(ThroughputInterval {
            total_packets: snapshot.packets,
            packets_per_sec,
            packets_per_sec_avg: self.packets_per_sec_avg,
            mbps: bytes_per_sec * 8.0 / 1e6,
            mbps_avg: self.bytes_per_sec_avg * 8.0 / 1e6,
            lost_packets: snapshot.missing,
            lost_ratio: lost_ratio(snapshot.packets, snapshot.missing),
            cpu: None,
        })
    }
}
