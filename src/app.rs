//! Loopback harness: publishers and subscribers of one run in one process
//!
//! Every entity gets its own endpoints on a shared [`LoopbackBus`]:
//!
//! - publishers write samples on the throughput topic and listen for
//!   subscriber acknowledgments on the announcement topic
//! - publisher 0 additionally receives pongs on the latency topic
//! - subscribers echo pings back on the latency topic and acknowledge
//!   discovery, resizes and the end of the test on the announcement topic
//!
//! Blocking publisher loops run on tokio's blocking pool; each subscriber's
//! reporting tick is an async task.

use crate::{
    clock,
    coordinator::{AnnouncementCounter, AnnouncementListener},
    cpu::SharedCpuSampler,
    defaults,
    error::{AppError, Result},
    latency::LatencyListener,
    logging::{Logger, LoggerFactory},
    models::{
        message::{ANNOUNCEMENT_SIZE, FINISHED_SIZE, INITIALIZE_SIZE, LENGTH_CHANGED_SIZE, NOT_A_PING, OVERHEAD_BYTES},
        Config, TestMessage,
    },
    output::{ReportOptions, ReportRenderer, SharedRenderer},
    throughput::{ThroughputCounters, ThroughputIntervalMeter, ThroughputListener},
    transport::{run_read_loop, DispatchHandle, DrainHandle, LoopbackBus, LoopbackReader, LoopbackWriter, MessageListener, MessageWriter, Topic},
    types::ReportSide,
};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// What a finished run did, beyond the report stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Data samples written by all publishers
    pub samples_sent: u64,
    pub pings_sent: u64,
    /// Pings whose pong did not arrive within the ping timeout
    pub pongs_missed: u64,
    /// Resize or finish messages that ran out of retries
    pub unacknowledged_controls: u64,
    /// Unrecognized messages dropped by subscribers and by the pong listener
    pub anomalies: u64,
    pub echo_failures: u64,
    pub elapsed: Duration,
}

/// Main application struct that runs one test
pub struct App {
    config: Config,
    loggers: LoggerFactory,
    report_sinks: Option<(Box<dyn Write + Send>, Box<dyn Write + Send>)>,
}

impl App {
    /// Harness streaming its report to stdout and diagnostics to stderr
    pub fn new(config: Config) -> Self {
        Self {
            loggers: LoggerFactory::new(config.clone()),
            config,
            report_sinks: None,
        }
    }

    /// Send the report stream and its diagnostics somewhere else
    pub fn with_report_sinks(mut self, out: Box<dyn Write + Send>, diagnostics: Box<dyn Write + Send>) -> Self {
        self.report_sinks = Some((out, diagnostics));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the test to completion or until the test timeout
    pub async fn run(mut self) -> Result<RunSummary> {
        let started = Instant::now();
        let config = self.config.clone();
        let logger = self.loggers.create_logger("app");
        let options = ReportOptions::from_config(&config);
        let lengths = config.data_lengths();
        let first_length = lengths.first().copied().unwrap_or(config.data_len);

        let report = match self.report_sinks.take() {
            Some((out, diag)) => ReportRenderer::with_sinks(config.output_format, options, first_length, out, diag),
            None => ReportRenderer::new(config.output_format, options, first_length),
        }
        .into_shared();
        let side = config.resolved_report_side();
        let renderer_for = |reported: bool| {
            if reported {
                report.clone()
            } else {
                ReportRenderer::discarding(config.output_format, options, first_length).into_shared()
            }
        };

        logger
            .info("Starting loopback run")
            .field("publishers", config.num_publishers)
            .field("subscribers", config.num_subscribers)
            .field("data_lengths", &lengths)
            .field("report_side", side.to_string())
            .log();

        report.lock().begin_stream()?;

        let bus = LoopbackBus::new();
        let cancel = Arc::new(AtomicBool::new(false));
        let plan = PublishPlan::from_config(&config);

        // Every reader exists before anything is sent
        let publishers: Vec<PublisherEndpoints> = (0..config.num_publishers as i32)
            .map(|id| {
                let reported = side == ReportSide::Publisher && id == 0;
                PublisherEndpoints::attach(&bus, &config, id, renderer_for(reported), &self.loggers)
            })
            .collect();
        let subscribers: Vec<SubscriberEndpoints> = (0..config.num_subscribers as i32)
            .map(|id| {
                let reported = side == ReportSide::Subscriber && id == 0;
                SubscriberEndpoints::attach(&bus, &config, id, renderer_for(reported), &self.loggers)
            })
            .collect();

        let mut subscriber_tasks = Vec::with_capacity(subscribers.len());
        for endpoints in subscribers {
            let cancel = cancel.clone();
            let interval = config.interval();
            let print_intervals = !config.no_print_intervals;
            subscriber_tasks.push(tokio::spawn(async move {
                endpoints.run(interval, print_intervals, cancel).await
            }));
        }

        let mut publisher_tasks = Vec::with_capacity(publishers.len());
        for endpoints in publishers {
            let cancel = cancel.clone();
            let plan = plan.clone();
            publisher_tasks.push(tokio::task::spawn_blocking(move || endpoints.run(&plan, &cancel)));
        }

        let run = async {
            let mut summary = RunSummary::default();
            for task in publisher_tasks {
                let outcome = task.await??;
                summary.samples_sent += outcome.samples_sent;
                summary.pings_sent += outcome.pings_sent;
                summary.pongs_missed += outcome.pongs_missed;
                summary.unacknowledged_controls += outcome.unacknowledged_controls;
                summary.anomalies += outcome.anomalies;
            }
            for task in subscriber_tasks {
                let outcome = task.await??;
                summary.anomalies += outcome.anomalies;
                summary.echo_failures += outcome.echo_failures;
            }
            Ok::<_, AppError>(summary)
        };

        let result = match tokio::time::timeout(config.test_timeout(), run).await {
            Ok(result) => result,
            Err(_) => Err(AppError::timeout(format!(
                "Test did not complete within {}s",
                config.test_timeout_secs
            ))),
        };

        if result.is_err() {
            cancel.store(true, Ordering::Release);
        }
        report.lock().end_stream()?;

        let mut summary = result?;
        summary.elapsed = started.elapsed();
        logger
            .info("Run complete")
            .field("samples_sent", summary.samples_sent)
            .field("pings_sent", summary.pings_sent)
            .field("pongs_missed", summary.pongs_missed)
            .field("elapsed_ms", summary.elapsed.as_millis() as u64)
            .log();
        Ok(summary)
    }
}

/// How a listener is driven: a dispatch thread or a polling read loop
enum Delivery {
    Callback(DispatchHandle),
    Polling {
        cancel: Arc<AtomicBool>,
        thread: JoinHandle<u64>,
    },
}

impl Delivery {
    fn attach<L>(reader: LoopbackReader, listener: L, polling: bool) -> Self
    where
        L: MessageListener + 'static,
    {
        if !polling {
            return Delivery::Callback(reader.dispatch(listener));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let stop = cancel.clone();
        let thread = thread::spawn(move || {
            let mut reader = reader;
            let mut listener = listener;
            run_read_loop(&mut reader, &mut listener, defaults::READ_POLL, &stop)
        });
        Delivery::Polling { cancel, thread }
    }

    /// Stop delivering; returns the number of messages delivered
    fn stop(self) -> u64 {
        match self {
            Delivery::Callback(handle) => handle.stop(),
            Delivery::Polling { cancel, thread } => {
                cancel.store(true, Ordering::Release);
                thread.join().unwrap_or(0)
            }
        }
    }
}

/// Publisher parameters shared by every publisher of a run
#[derive(Debug, Clone)]
struct PublishPlan {
    num_subscribers: usize,
    data_lengths: Vec<usize>,
    num_iter: u64,
    latency_count: u64,
    latency_test: bool,
    ping_timeout: Duration,
    test_timeout: Duration,
}

impl PublishPlan {
    fn from_config(config: &Config) -> Self {
        Self {
            num_subscribers: config.num_subscribers as usize,
            data_lengths: config.data_lengths(),
            num_iter: config.num_iter,
            latency_count: config.latency_count.max(1),
            latency_test: config.latency_test,
            ping_timeout: config.ping_timeout(),
            test_timeout: config.test_timeout(),
        }
    }
}

#[derive(Debug, Default)]
struct PublisherOutcome {
    samples_sent: u64,
    pings_sent: u64,
    pongs_missed: u64,
    unacknowledged_controls: u64,
    /// Echoes the latency listener could not classify
    anomalies: u64,
}

/// Pong side of publisher 0
struct LatencyEndpoint {
    listener: Arc<Mutex<LatencyListener>>,
    delivery: Delivery,
}

struct PublisherEndpoints {
    id: i32,
    writer: LoopbackWriter,
    announcements: AnnouncementCounter,
    announcement_delivery: Delivery,
    latency: Option<LatencyEndpoint>,
    logger: Logger,
}

impl PublisherEndpoints {
    fn attach(bus: &LoopbackBus, config: &Config, id: i32, renderer: SharedRenderer, loggers: &LoggerFactory) -> Self {
        let logger = loggers.create_logger(&format!("publisher-{}", id));
        let writer = bus.writer(Topic::Throughput);

        let announcements = AnnouncementCounter::new();
        let announcement_listener = Arc::new(Mutex::new(AnnouncementListener::new(
            announcements.clone(),
            logger.named(&format!("publisher-{}-announcements", id)),
        )));
        let announcement_delivery = Delivery::attach(
            bus.reader(Topic::Announcement),
            announcement_listener,
            config.use_read_thread,
        );

        // Only publisher 0 sends pings
        let latency = (id == 0).then(|| {
            let listener = Arc::new(Mutex::new(LatencyListener::new(
                config.listener_settings(id),
                renderer,
                None,
                Some(writer.ping_signal()),
                logger.named("latency"),
            )));
            let delivery = Delivery::attach(bus.reader(Topic::Latency), listener.clone(), config.use_read_thread);
            LatencyEndpoint { listener, delivery }
        });

        Self {
            id,
            writer,
            announcements,
            announcement_delivery,
            latency,
            logger,
        }
    }

    fn run(mut self, plan: &PublishPlan, cancel: &AtomicBool) -> Result<PublisherOutcome> {
        let mut result = self.publish(plan, cancel);

        if let Some(latency) = self.latency.take() {
            if let Ok(outcome) = &mut result {
                let mut listener = latency.listener.lock();
                listener.print_summary(true);
                outcome.anomalies = listener.anomalies();
            }
            latency.listener.lock().set_end_test();
            latency.delivery.stop();
        }
        self.announcement_delivery.stop();
        result
    }

    fn publish(&mut self, plan: &PublishPlan, cancel: &AtomicBool) -> Result<PublisherOutcome> {
        let mut outcome = PublisherOutcome::default();
        let subscribers = plan.num_subscribers as i64;

        self.writer.wait_for_readers(plan.num_subscribers, plan.test_timeout)?;
        self.logger.debug("Waiting for subscribers announcement").log();
        self.wait_for_counter(plan.test_timeout, cancel, |announced| announced >= subscribers)?;

        let init = TestMessage::new(self.id, INITIALIZE_SIZE);
        for _ in 0..defaults::INITIALIZE_SAMPLE_COUNT {
            self.writer.send(&init, false)?;
        }
        self.writer.flush()?;

        let ping_signal = self.writer.ping_signal();
        let sends_pings = self.latency.is_some();
        let mut loop_count: u64 = 0;
        let mut last_seq: u32 = 0;

        for (phase, length) in plan.data_lengths.iter().enumerate() {
            self.logger.scope("data_len", *length);
            if phase > 0 {
                let mut resize = TestMessage::new(self.id, LENGTH_CHANGED_SIZE);
                resize.seq_num = last_seq;
                // The addressed subscriber echoes it so publisher 0 summarizes in order
                if sends_pings {
                    resize.latency_ping = (outcome.pings_sent % plan.num_subscribers as u64) as i32;
                }
                if !self.send_control(&resize, plan, cancel)? {
                    outcome.unacknowledged_controls += 1;
                }
            }

            let mut message = TestMessage::new(self.id, length.saturating_sub(OVERHEAD_BYTES));
            for _ in 0..plan.num_iter {
                if cancel.load(Ordering::Acquire) {
                    return Err(AppError::timeout(format!("Publisher {} cancelled", self.id)));
                }

                last_seq = loop_count as u32;
                message.seq_num = last_seq;
                message.latency_ping = NOT_A_PING;

                let ping = sends_pings && loop_count % plan.latency_count == 0;
                if ping {
                    message.latency_ping = (outcome.pings_sent % plan.num_subscribers as u64) as i32;
                    message.stamp(clock::now_usec());
                    outcome.pings_sent += 1;
                    if plan.latency_test {
                        ping_signal.reset();
                    }
                }

                self.writer.send(&message, false)?;
                outcome.samples_sent += 1;
                loop_count += 1;

                if ping && plan.latency_test && !self.writer.wait_for_ping_response(Some(plan.ping_timeout)) {
                    outcome.pongs_missed += 1;
                }
            }
            self.writer.flush()?;
        }

        let mut finished = TestMessage::new(self.id, FINISHED_SIZE);
        finished.seq_num = last_seq;
        if !self.send_control(&finished, plan, cancel)? {
            outcome.unacknowledged_controls += 1;
        }

        self.logger
            .info("Publisher finished")
            .field("samples_sent", outcome.samples_sent)
            .field("pings_sent", outcome.pings_sent)
            .log();
        Ok(outcome)
    }

    /// Send `message` until every subscriber acknowledged it.
    ///
    /// Returns `false` when the retries ran out first.
    fn send_control(&mut self, message: &TestMessage, plan: &PublishPlan, cancel: &AtomicBool) -> Result<bool> {
        // Let subscribers catch up so the acknowledgment is not stuck behind data
        if let Err(e) = self.writer.wait_for_acknowledgments(plan.test_timeout) {
            self.logger.warn("Subscribers did not drain before a control message").error_info(&e).log();
        }

        self.announcements.set(plan.num_subscribers as i64);
        for attempt in 1..=defaults::MAX_CONTROL_RETRIES {
            if cancel.load(Ordering::Acquire) {
                return Err(AppError::timeout(format!("Publisher {} cancelled", self.id)));
            }

            self.writer.send(message, true)?;
            self.writer.flush()?;

            if self.announcements.wait_until(defaults::CONTROL_ACK_WAIT, |pending| pending <= 0) {
                self.logger
                    .debug("Control message acknowledged")
                    .field("size", message.size())
                    .field("attempts", attempt)
                    .log();
                return Ok(true);
            }
        }

        self.logger
            .warn("Control message not acknowledged by every subscriber")
            .field("size", message.size())
            .field("pending", self.announcements.value())
            .log();
        Ok(false)
    }

    fn wait_for_counter(&self, timeout: Duration, cancel: &AtomicBool, done: impl Fn(i64) -> bool) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while !self.announcements.wait_until(defaults::CONTROL_POLL, &done) {
            if cancel.load(Ordering::Acquire) || Instant::now() >= deadline {
                return Err(AppError::timeout(format!(
                    "Publisher {} saw {} of the expected subscriber announcements",
                    self.id,
                    self.announcements.value()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SubscriberOutcome {
    anomalies: u64,
    echo_failures: u64,
}

struct SubscriberEndpoints {
    listener: Arc<Mutex<ThroughputListener>>,
    counters: Arc<ThroughputCounters>,
    cpu: Option<SharedCpuSampler>,
    renderer: SharedRenderer,
    acknowledger: Arc<Mutex<Acknowledger>>,
    delivery: Delivery,
    logger: Logger,
}

impl SubscriberEndpoints {
    fn attach(bus: &LoopbackBus, config: &Config, id: i32, renderer: SharedRenderer, loggers: &LoggerFactory) -> Self {
        let logger = loggers.create_logger(&format!("subscriber-{}", id));
        let echo = bus.writer(Topic::Latency);
        let acknowledger = Acknowledger {
            id,
            echoes: echo.drain_handle(),
            announcer: bus.writer(Topic::Announcement),
            logger: logger.clone(),
        };
        let listener = ThroughputListener::new(
            config.listener_settings(id),
            Box::new(echo),
            renderer.clone(),
            None,
            logger.named(&format!("subscriber-{}-throughput", id)),
        );
        let counters = listener.counters();
        let cpu = listener.cpu();
        let listener = Arc::new(Mutex::new(listener));
        let delivery = Delivery::attach(bus.reader(Topic::Throughput), listener.clone(), config.use_read_thread);

        Self {
            listener,
            counters,
            cpu,
            renderer,
            acknowledger: Arc::new(Mutex::new(acknowledger)),
            delivery,
            logger,
        }
    }

    /// Reporting loop: acknowledges control events and prints intervals
    async fn run(self, interval: Duration, print_intervals: bool, cancel: Arc<AtomicBool>) -> Result<SubscriberOutcome> {
        self.acknowledge().await?;

        let mut ticker = tokio::time::interval(defaults::CONTROL_POLL);
        let mut meter = ThroughputIntervalMeter::new(clock::now_usec());
        let mut next_report = Instant::now() + interval;

        while !cancel.load(Ordering::Acquire) {
            ticker.tick().await;

            if self.counters.take_change_size() {
                self.acknowledge().await?;
            }
            if self.counters.is_end_test() {
                self.acknowledge().await?;
                break;
            }

            if Instant::now() < next_report {
                continue;
            }
            next_report += interval;

            if let Some(mut tick) = meter.sample(&self.counters, clock::now_usec()) {
                if print_intervals {
                    if let Some(cpu) = self.cpu.clone() {
                        tick.cpu = Some(tokio::task::spawn_blocking(move || cpu.lock().instantaneous()).await?);
                    }
                    if let Err(e) = self.renderer.lock().throughput_interval(&tick) {
                        self.logger.error("Failed to write throughput interval").error_info(&e).log();
                    }
                }
            }
        }

        let delivery = self.delivery;
        let delivered = tokio::task::spawn_blocking(move || delivery.stop()).await?;
        let listener = self.listener.lock();
        self.logger
            .debug("Subscriber finished")
            .field("delivered", delivered)
            .field("anomalies", listener.anomalies())
            .log();

        Ok(SubscriberOutcome {
            anomalies: listener.anomalies(),
            echo_failures: listener.echo_failures(),
        })
    }

    /// Waits for echoes to drain on the blocking pool, away from the
    /// listener lock the delivery side needs
    async fn acknowledge(&self) -> Result<()> {
        let acknowledger = self.acknowledger.clone();
        tokio::task::spawn_blocking(move || acknowledger.lock().acknowledge()).await?
    }
}

/// Subscriber side of the announcement handshake
struct Acknowledger {
    id: i32,
    echoes: DrainHandle,
    announcer: LoopbackWriter,
    logger: Logger,
}

impl Acknowledger {
    /// Announce on the announcement channel once every echo has been taken
    fn acknowledge(&mut self) -> Result<()> {
        if let Err(e) = self.echoes.wait(defaults::CONTROL_DRAIN_WAIT) {
            self.logger.warn("Echoes still in flight").error_info(&e).log();
        }
        let announcement = TestMessage::new(self.id, ANNOUNCEMENT_SIZE);
        self.announcer.send(&announcement, false)?;
        self.announcer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MemorySink;
    use crate::transport::MessageReader;
    use crate::types::OutputFormat;

    fn small_config() -> Config {
        Config {
            num_iter: 2_000,
            latency_count: 100,
            interval_secs: 1,
            test_timeout_secs: 30,
            ..Config::default()
        }
    }

    async fn run(config: Config) -> (Result<RunSummary>, MemorySink, MemorySink) {
        let out = MemorySink::new();
        let diag = MemorySink::new();
        let result = App::new(config)
            .with_report_sinks(Box::new(out.clone()), Box::new(diag.clone()))
            .run()
            .await;
        (result, out, diag)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_throughput_run_reports_summary() {
        let (result, out, _) = run(small_config()).await;
        let summary = result.unwrap();
        assert_eq!(summary.samples_sent, 2_000);
        assert_eq!(summary.pings_sent, 20);
        assert_eq!(summary.unacknowledged_controls, 0);
        assert_eq!(summary.anomalies, 0);

        let out = out.contents();
        assert!(out.contains("Throughput Summary:"));
        let row = out.lines().last().unwrap();
        let cells: Vec<&str> = row.split(',').map(str::trim).collect();
        assert_eq!(cells[..2], ["100", "2000"]);
        assert_eq!(cells[4], "0");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_latency_run_in_json() {
        let config = Config {
            latency_test: true,
            num_subscribers: 2,
            output_format: OutputFormat::Json,
            no_print_intervals: true,
            ..small_config()
        };
        let (result, out, _) = run(config).await;
        let summary = result.unwrap();
        assert_eq!(summary.pongs_missed, 0);

        let doc: serde_json::Value = serde_json::from_str(&out.contents()).unwrap();
        let datasets = doc["perftest"].as_array().unwrap();
        assert_eq!(datasets.len(), 1);
        assert_eq!(datasets[0]["length"], 100);
        assert!(datasets[0]["summary"]["latency_50"].is_u64());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scan_run_with_read_thread() {
        let config = Config {
            scan: vec![64, 128],
            use_read_thread: true,
            output_format: OutputFormat::Json,
            ..small_config()
        };
        let (result, out, _) = run(config).await;
        let summary = result.unwrap();
        assert_eq!(summary.samples_sent, 4_000);
        assert_eq!(summary.unacknowledged_controls, 0);

        let doc: serde_json::Value = serde_json::from_str(&out.contents()).unwrap();
        let datasets = doc["perftest"].as_array().unwrap();
        let lengths: Vec<u64> = datasets.iter().map(|d| d["length"].as_u64().unwrap()).collect();
        assert_eq!(lengths, [64, 128]);
        assert_eq!(datasets[1]["summary"]["packets"], 2_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_acknowledge_while_listener_is_busy() {
        let config = small_config();
        let bus = LoopbackBus::new();
        let mut announcements = bus.reader(Topic::Announcement);
        let renderer =
            ReportRenderer::discarding(config.output_format, ReportOptions::from_config(&config), config.data_len)
                .into_shared();
        let endpoints = SubscriberEndpoints::attach(&bus, &config, 4, renderer, &LoggerFactory::new(config.clone()));

        // Delivery holds the listener for as long as a message takes
        let busy = endpoints.listener.lock();
        tokio::time::timeout(Duration::from_secs(5), endpoints.acknowledge())
            .await
            .expect("acknowledgment waited on the listener")
            .unwrap();
        drop(busy);

        let ack = announcements.receive(Duration::from_millis(100)).unwrap().unwrap();
        assert_eq!(ack.entity_id, 4);
        assert_eq!(ack.size(), ANNOUNCEMENT_SIZE);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_multiple_publishers_finish_once() {
        let config = Config {
            num_publishers: 3,
            num_subscribers: 2,
            ..small_config()
        };
        let (result, out, diag) = run(config).await;
        let summary = result.unwrap();
        assert_eq!(summary.samples_sent, 6_000);
        assert_eq!(out.contents().matches("Throughput Summary:").count(), 1);
        assert!(!diag.contents().contains("No samples"));
    }
}
