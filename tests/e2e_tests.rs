//! Protocol scenarios driven through the public listener API
//!
//! Listeners run against in-memory report sinks and, where a transport is
//! needed, the in-process loopback bus.

use proptest::prelude::*;
use pubsub_perftest::{
    cpu::{CpuSampler, ProcessClock},
    logging::Logger,
    models::{
        message::{FINISHED_SIZE, LENGTH_CHANGED_SIZE, NOT_A_PING},
        ListenerSettings, TestMessage, ThroughputInterval, ThroughputSummary,
    },
    output::{MemorySink, ReportOptions, ReportRenderer, SharedRenderer},
    stats::LatencyStatistics,
    transport::{LoopbackBus, MessageListener, MessageReader, MessageWriter, Topic},
    types::{DatasetKind, OutputFormat},
    LatencyListener, LossTracker, ThroughputListener,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn renderer(format: OutputFormat) -> (SharedRenderer, MemorySink, MemorySink) {
    let out = MemorySink::new();
    let diag = MemorySink::new();
    let renderer = ReportRenderer::with_sinks(
        format,
        ReportOptions::default(),
        100,
        Box::new(out.clone()),
        Box::new(diag.clone()),
    )
    .into_shared();
    (renderer, out, diag)
}

fn subscriber(bus: &LoopbackBus, publishers: usize, renderer: SharedRenderer) -> ThroughputListener {
    let settings = ListenerSettings {
        num_publishers: publishers,
        ..ListenerSettings::default()
    };
    ThroughputListener::new(
        settings,
        Box::new(bus.writer(Topic::Latency)),
        renderer,
        None,
        Logger::disabled("subscriber"),
    )
}

fn sample(origin: i32, seq: u32, size: usize) -> TestMessage {
    let mut message = TestMessage::new(origin, size);
    message.seq_num = seq;
    message
}

proptest! {
    #[test]
    fn in_order_sequences_lose_nothing(start in 0u32..1_000_000, len in 1u32..500) {
        let mut loss = LossTracker::new(1);
        let missing: u64 = (start..start + len).map(|seq| loss.observe(0, seq)).sum();
        prop_assert_eq!(missing, 0);
    }

    #[test]
    fn single_gap_counts_skipped_numbers(start in 0u32..1_000_000, gap in 1u32..10_000) {
        let mut loss = LossTracker::new(1);
        loss.observe(0, start);
        prop_assert_eq!(loss.observe(0, start + gap), (gap - 1) as u64);
    }
}

#[test]
fn gap_in_sequence_is_reported_as_missing() {
    let bus = LoopbackBus::new();
    let (renderer, _, _) = renderer(OutputFormat::Csv);
    let mut listener = subscriber(&bus, 1, renderer);

    for seq in [1, 2, 3, 6] {
        listener.on_message(&sample(0, seq, 72));
    }
    assert_eq!(listener.counters().missing(), 2);
    assert_eq!(listener.counters().packets(), 4);
}

#[test]
fn median_of_hundred_values_is_index_fifty() {
    let mut stats = LatencyStatistics::with_capacity(100);
    for value in (1..=100).rev() {
        assert!(stats.record(value * 10));
    }

    let first = stats.summarize().unwrap();
    let second = stats.summarize().unwrap();
    assert_eq!(first.percentiles.p50, 510);
    assert_eq!(first, second);
}

#[test]
fn clock_skew_leaves_statistics_untouched() {
    let (renderer, _, diag) = renderer(OutputFormat::Csv);
    let settings = ListenerSettings {
        history_capacity: 100,
        ..ListenerSettings::default()
    };
    let mut listener = LatencyListener::new(settings, renderer, None, None, Logger::disabled("publisher"));

    let pong = |sent: u64| {
        let mut message = TestMessage::new(0, 72);
        message.latency_ping = 0;
        message.stamp(sent);
        message
    };

    for i in 0..10u64 {
        listener.on_message_at(&pong(1_000_000 + i), 1_000_000 + i + 100);
        if i == 4 {
            listener.on_message_at(&pong(5_000_000), 1_000_000);
        }
    }

    assert_eq!(listener.sample_count(), 10);
    assert_eq!(listener.clock_skew_count(), 1);

    listener.print_summary(true);
    assert!(diag.contents().contains("clock skew happens 1 times"));
}

/// Clock whose process never consumes CPU
struct IdleClock {
    now: Instant,
}

impl ProcessClock for IdleClock {
    fn now(&mut self) -> Instant {
        self.now
    }

    fn cpu_time(&mut self) -> Duration {
        Duration::ZERO
    }

    fn logical_cores(&self) -> usize {
        4
    }

    fn sleep(&mut self, duration: Duration) {
        self.now += duration;
    }
}

#[test]
fn cpu_average_before_any_reading_is_finite() {
    let mut sampler = CpuSampler::with_clock(Box::new(IdleClock { now: Instant::now() }));
    let average = sampler.average();
    assert!(average.is_finite());
    assert!(average >= 0.0);
}

#[test]
fn document_commas_between_datasets_and_intervals() {
    let (renderer, out, _) = renderer(OutputFormat::Json);
    let interval = ThroughputInterval {
        total_packets: 10,
        packets_per_sec: 10.0,
        packets_per_sec_avg: 10.0,
        mbps: 0.1,
        mbps_avg: 0.1,
        lost_packets: 0,
        lost_ratio: 0.0,
        cpu: None,
    };
    let summary = ThroughputSummary {
        total_packets: 20,
        packets_per_sec: 10,
        mbps: 0.1,
        lost_packets: 0,
        lost_ratio: 0.0,
        cpu: None,
    };

    {
        let mut renderer = renderer.lock();
        renderer.begin_stream().unwrap();
        for length in [100, 200] {
            renderer.begin_dataset(DatasetKind::Throughput, length).unwrap();
            renderer.throughput_interval(&interval).unwrap();
            renderer.throughput_interval(&interval).unwrap();
            renderer.throughput_summary(&summary).unwrap();
        }
        renderer.end_stream().unwrap();
    }

    let text = out.contents();
    let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
    let datasets = doc["perftest"].as_array().unwrap();
    assert_eq!(datasets.len(), 2);
    for dataset in datasets {
        assert_eq!(dataset["intervals"].as_array().unwrap().len(), 2);
    }

    // One comma between the two dataset objects
    assert_eq!(text.matches("},\n\t\t{").count(), 1);
    // One comma between the two entries of each interval array
    assert_eq!(text.matches("},\n\t\t\t\t{").count(), 2);
}

#[test]
fn finished_from_three_publishers_ends_once() {
    for order in [[0, 1, 2], [2, 0, 1], [1, 2, 0]] {
        let bus = LoopbackBus::new();
        let (renderer, out, _) = renderer(OutputFormat::Csv);
        let mut listener = subscriber(&bus, 3, renderer);
        for origin in 0..3 {
            listener.on_message_at(&sample(origin, 0, 72), 1);
        }

        listener.on_message_at(&sample(order[0], 0, FINISHED_SIZE), 10);
        listener.on_message_at(&sample(order[0], 0, FINISHED_SIZE), 11);
        listener.on_message_at(&sample(order[1], 0, FINISHED_SIZE), 12);
        assert!(!listener.is_finished());
        assert_eq!(listener.finished_count(), 2);

        listener.on_message_at(&sample(order[2], 0, FINISHED_SIZE), 1_000_001);
        assert!(listener.is_finished());
        assert_eq!(out.contents().matches("Throughput Summary:").count(), 1);
    }
}

#[test]
fn thousand_samples_then_size_change() {
    let bus = LoopbackBus::new();
    let (renderer, out, _) = renderer(OutputFormat::Csv);
    let mut listener = subscriber(&bus, 1, renderer);
    let counters = listener.counters();

    for seq in 0..1000u32 {
        listener.on_message_at(&sample(0, seq, 72), 1 + seq as u64);
    }
    assert_eq!(counters.packets(), 1000);
    assert_eq!(counters.missing(), 0);
    assert_eq!(counters.bytes(), 100_000);

    listener.on_message_at(&sample(0, 1000, 172), 2_000);
    assert_eq!(counters.packets(), 1);
    assert_eq!(counters.data_length(), Some(200));

    for seq in 1001..1100u32 {
        listener.on_message_at(&sample(0, seq, 172), 2_000 + seq as u64);
    }
    assert_eq!(counters.packets(), 100);
    assert_eq!(counters.missing(), 0);
    assert!(out.contents().contains("Intervals Throughput for 200 Bytes"));
}

#[test]
fn ping_round_trip_over_loopback() {
    let bus = LoopbackBus::new();
    let (sub_renderer, _, _) = renderer(OutputFormat::Csv);
    let (pub_renderer, pub_out, _) = renderer(OutputFormat::Legacy);

    let mut publisher = bus.writer(Topic::Throughput);
    let subscriber_reader = bus.reader(Topic::Throughput);
    let mut pong_reader = bus.reader(Topic::Latency);

    let settings = ListenerSettings {
        history_capacity: 10,
        ..ListenerSettings::default()
    };
    let mut latency = LatencyListener::new(
        settings,
        pub_renderer,
        None,
        Some(publisher.ping_signal()),
        Logger::disabled("publisher"),
    );
    let handle = subscriber_reader.dispatch(subscriber(&bus, 1, sub_renderer));

    for (seq, marker) in [(0, 0), (1, NOT_A_PING), (2, 0)] {
        let mut message = sample(0, seq, 72);
        message.latency_ping = marker;
        message.stamp(pubsub_perftest::clock::now_usec());
        publisher.send(&message, false).unwrap();
    }
    publisher.flush().unwrap();

    for _ in 0..2 {
        let pong = pong_reader.receive(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(pong.latency_ping, 0);
        latency.on_message(&pong);
    }
    assert!(publisher.wait_for_ping_response(Some(Duration::from_secs(1))));
    assert_eq!(latency.sample_count(), 2);

    let mut resize = sample(0, 2, LENGTH_CHANGED_SIZE);
    resize.latency_ping = 0;
    publisher.send(&resize, true).unwrap();
    let echoed = pong_reader.receive(Duration::from_secs(5)).unwrap().unwrap();
    latency.on_message(&echoed);
    assert_eq!(latency.sample_count(), 0);
    assert!(pub_out.contents().contains("99.9999%"));

    assert_eq!(handle.stop(), 4);
}

#[test]
fn shared_renderer_keeps_rows_whole() {
    let (renderer, out, _) = renderer(OutputFormat::Csv);
    let threads: Vec<_> = (0..4)
        .map(|_| {
            let renderer = Arc::clone(&renderer);
            std::thread::spawn(move || {
                renderer
                    .lock()
                    .throughput_summary(&ThroughputSummary {
                        total_packets: 1,
                        packets_per_sec: 1,
                        mbps: 0.0,
                        lost_packets: 0,
                        lost_ratio: 0.0,
                        cpu: None,
                    })
                    .unwrap();
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
    // Rows never interleave
    let rows = out.contents().lines().filter(|l| l.trim_start().starts_with("100,")).count();
    assert_eq!(rows, 4);
}
