//! Publisher-side latency engine
//!
//! Pongs echoed by subscribers come back here. The listener turns each into
//! a one-way latency sample, streams interval rows and renders a percentile
//! summary per data length.

use crate::classifier::{MessageClass, MessageClassifier};
use crate::clock;
use crate::cpu::{CpuSampler, SharedCpuSampler};
use crate::logging::Logger;
use crate::models::message::OVERHEAD_BYTES;
use crate::models::{LatencyInterval, ListenerSettings, TestMessage};
use crate::output::SharedRenderer;
use crate::stats::LatencyStatistics;
use crate::transport::{MessageListener, PingSignal};
use crate::types::DatasetKind;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Diagnostic rendered when a run ends without a single pong
pub const NO_PONG_DIAGNOSTIC: &str = "\nNo Pong samples have been received in the Publisher side.\n\
If you are interested in latency results, you might need to\n\
increase the Pong frequency (using the --latency-count option).\n\
Alternatively you can increase the number of samples sent\n\
(--num-iter). If you are sending large data, make sure you set\n\
the data size (--data-len) in the Subscriber side.\n\n";

pub struct LatencyListener {
    classifier: MessageClassifier,
    settings: ListenerSettings,
    renderer: SharedRenderer,
    cpu: Option<SharedCpuSampler>,
    ping: Option<PingSignal>,
    logger: Logger,
    stats: LatencyStatistics,
    clock_skew_count: u64,
    /// Payload size of the open dataset, `None` after a summary
    last_size: Option<usize>,
    anomalies: u64,
    end_test: AtomicBool,
}

impl LatencyListener {
    pub fn new(
        settings: ListenerSettings,
        renderer: SharedRenderer,
        cpu: Option<SharedCpuSampler>,
        ping: Option<PingSignal>,
        logger: Logger,
    ) -> Self {
        let cpu = if settings.show_cpu {
            Some(cpu.unwrap_or_else(|| Arc::new(Mutex::new(CpuSampler::new()))))
        } else {
            None
        };

        Self {
            classifier: MessageClassifier::for_publisher(),
            stats: LatencyStatistics::with_capacity(settings.history_capacity),
            settings,
            renderer,
            cpu,
            ping,
            logger,
            clock_skew_count: 0,
            last_size: None,
            anomalies: 0,
            end_test: AtomicBool::new(false),
        }
    }

    /// Pongs discarded as clock skew since the last summary
    pub fn clock_skew_count(&self) -> u64 {
        self.clock_skew_count
    }

    /// Samples recorded since the last summary
    pub fn sample_count(&self) -> u64 {
        self.stats.count()
    }

    /// Echoes dropped as unrecognized
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    /// Stop a polling loop driving this listener
    pub fn set_end_test(&self) {
        self.end_test.store(true, Ordering::Release);
    }

    pub fn on_message_at(&mut self, message: &TestMessage, now_usec: u64) {
        match self.classifier.classify_message(message) {
            MessageClass::Init | MessageClass::Finished => {}
            MessageClass::Resize => self.print_summary(false),
            MessageClass::Unrecognized(anomaly) => {
                self.anomalies += 1;
                self.logger
                    .warn("Dropping unrecognized echo")
                    .field("anomaly", anomaly.to_string())
                    .field("origin", message.entity_id)
                    .log();
            }
            MessageClass::DataSample | MessageClass::PingRequest => {
                self.measure(message, now_usec);
                self.notify_sender();
            }
        }
    }

    /// Render the summary of the current data length and reset the engine.
    ///
    /// With no samples only the end-of-test call says so, as a diagnostic.
    pub fn print_summary(&mut self, end_test: bool) {
        let Some(mut summary) = self.stats.summarize() else {
            if end_test {
                self.diagnostic(NO_PONG_DIAGNOSTIC);
            }
            return;
        };

        if self.clock_skew_count > 0 {
            let caveat = format!(
                "The following latency result may not be accurate because clock skew happens {} times\n",
                self.clock_skew_count
            );
            self.diagnostic(&caveat);
        }

        summary.cpu = self.cpu.as_ref().map(|cpu| cpu.lock().average());
        if let Err(e) = self.renderer.lock().latency_summary(&summary) {
            self.logger.error("Failed to write latency summary").error_info(&e).log();
        }

        self.reset();
    }

    fn reset(&mut self) {
        self.stats.reset();
        self.clock_skew_count = 0;
        self.last_size = None;
    }

    fn measure(&mut self, message: &TestMessage, now_usec: u64) {
        // A new size means a new dataset even if its Resize echo never came back
        let size = message.size();
        let first_of_dataset = self.last_size != Some(size);
        if first_of_dataset {
            self.reset();
            self.last_size = Some(size);
            if let Err(e) = self
                .renderer
                .lock()
                .begin_dataset(DatasetKind::Latency, size + OVERHEAD_BYTES)
            {
                self.logger.error("Failed to write dataset header").error_info(&e).log();
            }
        }

        let sent = message.sent_time_usec();
        if now_usec < sent {
            self.clock_skew_count += 1;
            self.logger
                .warn("Clock skew suspected")
                .field("received_usec", now_usec)
                .field("sent_usec", sent)
                .log();
            return;
        }

        let latency = u32::try_from((now_usec - sent) / 2).unwrap_or(u32::MAX);
        // The first pong of a dataset prints the header only
        if !self.stats.record(latency) || first_of_dataset {
            return;
        }

        let cpu = self.cpu.as_ref().map(|cpu| cpu.lock().instantaneous());
        if !self.settings.print_intervals {
            return;
        }

        let running = self.stats.running();
        let interval = LatencyInterval {
            latency,
            average: running.average(),
            std_dev: running.std_dev(),
            min: running.min(),
            max: running.max(),
            cpu,
        };
        if let Err(e) = self.renderer.lock().latency_interval(&interval) {
            self.logger.error("Failed to write latency interval").error_info(&e).log();
        }
    }

    fn notify_sender(&self) {
        if let Some(ping) = &self.ping {
            ping.notify();
        }
    }

    fn diagnostic(&self, text: &str) {
        if let Err(e) = self.renderer.lock().diagnostic(text) {
            self.logger.error("Failed to write diagnostic").error_info(&e).log();
        }
    }
}

impl MessageListener for LatencyListener {
    fn on_message(&mut self, message: &TestMessage) {
        self.on_message_at(message, clock::now_usec());
    }

    fn is_finished(&self) -> bool {
        self.end_test.load(Ordering::Acquire)
    }
}
