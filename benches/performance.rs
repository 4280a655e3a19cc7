//! Performance benchmarks for the perftest measurement core
//!
//! The hot paths run once per received sample: classification, loss
//! accounting and latency recording. Summaries and report rendering run once
//! per data length or interval.

use clap::Parser;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pubsub_perftest::{
    cli::Cli,
    config::parser::ConfigParser,
    logging::Logger,
    models::{ListenerSettings, TestMessage, ThroughputInterval},
    output::{ReportOptions, ReportRenderer},
    stats::LatencyStatistics,
    transport::{LoopbackBus, MessageListener, Topic},
    types::{DatasetKind, OutputFormat},
    LossTracker, MessageClassifier, ThroughputListener,
};
use std::hint::black_box;

/// Pseudo-random latencies in a realistic microsecond range
fn sample_latencies(count: usize) -> Vec<u32> {
    let mut state = 0x2545_f491_u32;
    (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            20 + state % 400
        })
        .collect()
}

fn benchmark_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("classification");
    let classifier = MessageClassifier::for_subscriber(4, 1, false);

    group.bench_function("data_sample", |b| {
        b.iter(|| black_box(classifier.classify(black_box(72), black_box(-1), black_box(2))));
    });

    group.bench_function("ping_for_other_subscriber", |b| {
        b.iter(|| black_box(classifier.classify(black_box(72), black_box(3), black_box(0))));
    });

    group.bench_function("control_message", |b| {
        b.iter(|| black_box(classifier.classify(black_box(2), black_box(-1), black_box(1))));
    });

    group.finish();
}

fn benchmark_loss_tracking(c: &mut Criterion) {
    let mut group = c.benchmark_group("loss_tracking");

    for publishers in [1usize, 8, 64] {
        group.bench_with_input(BenchmarkId::new("observe_10k", publishers), &publishers, |b, &n| {
            b.iter(|| {
                let mut loss = LossTracker::new(n);
                let mut missing = 0;
                for seq in 0..10_000u32 {
                    // Every 97th sample goes missing
                    if seq % 97 != 0 {
                        missing += loss.observe(seq as usize % n, seq);
                    }
                }
                black_box(missing)
            });
        });
    }

    group.finish();
}

fn benchmark_latency_statistics(c: &mut Criterion) {
    let mut group = c.benchmark_group("latency_statistics");

    for size in [100usize, 10_000, 100_000] {
        let latencies = sample_latencies(size);

        group.bench_with_input(BenchmarkId::new("record", size), &latencies, |b, values| {
            b.iter(|| {
                let mut stats = LatencyStatistics::with_capacity(values.len());
                for &value in values {
                    stats.record(value);
                }
                black_box(stats.count())
            });
        });

        group.bench_with_input(BenchmarkId::new("summarize", size), &latencies, |b, values| {
            let mut stats = LatencyStatistics::with_capacity(values.len());
            for &value in values {
                stats.record(value);
            }
            b.iter(|| black_box(stats.summarize()));
        });
    }

    group.finish();
}

fn benchmark_subscriber_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("subscriber_path");

    group.bench_function("throughput_listener_1k_samples", |b| {
        let bus = LoopbackBus::new();
        let renderer = ReportRenderer::discarding(OutputFormat::Csv, ReportOptions::default(), 100).into_shared();
        let mut listener = ThroughputListener::new(
            ListenerSettings::default(),
            Box::new(bus.writer(Topic::Latency)),
            renderer,
            None,
            Logger::disabled("bench"),
        );
        let mut seq = 0u32;
        let mut message = TestMessage::new(0, 72);

        b.iter(|| {
            for _ in 0..1_000 {
                message.seq_num = seq;
                seq = seq.wrapping_add(1);
                listener.on_message(black_box(&message));
            }
        });
    });

    group.finish();
}

fn benchmark_rendering(c: &mut Criterion) {
    let mut group = c.benchmark_group("rendering");
    let interval = ThroughputInterval {
        total_packets: 123_456,
        packets_per_sec: 98_765.0,
        packets_per_sec_avg: 97_000.0,
        mbps: 79.0,
        mbps_avg: 77.6,
        lost_packets: 12,
        lost_ratio: 0.0001,
        cpu: Some(12.5),
    };

    for format in [OutputFormat::Csv, OutputFormat::Json, OutputFormat::Legacy] {
        group.bench_with_input(
            BenchmarkId::new("throughput_interval", format),
            &format,
            |b, &format| {
                let mut renderer = ReportRenderer::discarding(format, ReportOptions::default(), 100);
                renderer.begin_stream().unwrap();
                renderer.begin_dataset(DatasetKind::Throughput, 100).unwrap();
                b.iter(|| renderer.throughput_interval(black_box(&interval)).unwrap());
            },
        );
    }

    group.finish();
}

fn benchmark_config_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_parsing");
    let args = [
        "perftest",
        "--num-subscribers", "4",
        "--scan", "32,64,128,256,512,1024",
        "--latency-count", "1000",
        "--output-format", "json",
    ];

    group.bench_function("parse_cli_args", |b| {
        b.iter(|| black_box(Cli::try_parse_from(black_box(args)).unwrap()));
    });

    group.bench_function("parse_from_cli", |b| {
        let cli = Cli::try_parse_from(args).unwrap();
        b.iter(|| {
            let parser = ConfigParser::with_env_file(black_box(cli.clone()), "bench-missing.env".into());
            black_box(parser.parse().unwrap())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_classification,
    benchmark_loss_tracking,
    benchmark_latency_statistics,
    benchmark_subscriber_path,
    benchmark_rendering,
    benchmark_config_parsing
);

criterion_main!(benches);
