//! Process CPU usage sampling
//!
//! CPU usage is reported as a share of all logical cores: a process that keeps
//! one core busy on a four-core machine reads 25%.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Shortest interval that produces a new reading
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Warm-up before an average is computed with no readings yet
pub const AVERAGE_WARMUP: Duration = Duration::from_secs(1);

/// Sampler shared between a listener and the loop that reports intervals
pub type SharedCpuSampler = Arc<Mutex<CpuSampler>>;

/// Source of wall-clock time and process CPU time
pub trait ProcessClock: Send {
    fn now(&mut self) -> Instant;

    /// CPU time consumed by this process since it started
    fn cpu_time(&mut self) -> Duration;

    fn logical_cores(&self) -> usize;

    fn sleep(&mut self, duration: Duration);
}

/// Reads CPU time of the current process through `sysinfo`
pub struct SystemProcessClock {
    system: System,
    pid: Pid,
    cores: usize,
}

impl SystemProcessClock {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
            cores: num_cpus::get().max(1),
        }
    }
}

impl Default for SystemProcessClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessClock for SystemProcessClock {
    fn now(&mut self) -> Instant {
        Instant::now()
    }

    fn cpu_time(&mut self) -> Duration {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu(),
        );
        self.system
            .process(self.pid)
            .map(|process| Duration::from_millis(process.accumulated_cpu_time()))
            .unwrap_or_default()
    }

    fn logical_cores(&self) -> usize {
        self.cores
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Interval CPU sampler with a running average
pub struct CpuSampler {
    clock: Box<dyn ProcessClock>,
    interval_start: Instant,
    cpu_at_start: Duration,
    last_percent: f64,
    total_percent: f64,
    samples: u64,
}

impl CpuSampler {
    /// Sampler backed by the current process; the first interval starts now
    pub fn new() -> Self {
        Self::with_clock(Box::new(SystemProcessClock::new()))
    }

    pub fn with_clock(mut clock: Box<dyn ProcessClock>) -> Self {
        let interval_start = clock.now();
        let cpu_at_start = clock.cpu_time();
        Self {
            clock,
            interval_start,
            cpu_at_start,
            last_percent: 0.0,
            total_percent: 0.0,
            samples: 0,
        }
    }

    /// CPU usage since the previous reading.
    ///
    /// Intervals of 250 ms or less return the previous reading unchanged.
    pub fn instantaneous(&mut self) -> f64 {
        let now = self.clock.now();
        let wall = now.saturating_duration_since(self.interval_start);
        if wall <= MIN_SAMPLE_INTERVAL {
            return self.last_percent;
        }

        let cpu = self.clock.cpu_time();
        let used = cpu.saturating_sub(self.cpu_at_start);
        let cores = self.clock.logical_cores().max(1) as f64;

        let percent = used.as_secs_f64() * 1000.0 / (cores * wall.as_secs_f64() * 1000.0) * 100.0;

        self.interval_start = now;
        self.cpu_at_start = cpu;
        self.last_percent = percent;
        self.total_percent += percent;
        self.samples += 1;

        percent
    }

    /// Mean of all readings so far, warming up for one second if there are none
    pub fn average(&mut self) -> f64 {
        if self.samples == 0 {
            self.interval_start = self.clock.now();
            self.cpu_at_start = self.clock.cpu_time();
            self.clock.sleep(AVERAGE_WARMUP);
            self.instantaneous();
        }

        if self.samples == 0 {
            return 0.0;
        }
        self.total_percent / self.samples as f64
    }

    pub fn sample_count(&self) -> u64 {
        self.samples
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new()
    }
}
