//! In-process pub/sub bus over `crossbeam` channels
//!
//! Every topic fans a written message out to all of its attached readers.
//! Matching is immediate: a reader exists as soon as it is created and a
//! writer counts until it is dropped. The instance key is not modelled, so
//! the wildcard flag on `send` has no effect here.

use super::{MessageListener, MessageReader, MessageWriter, PingSignal};
use crate::error::{AppError, Result};
use crate::models::TestMessage;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Topics of a perftest run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Publisher to subscribers: samples, pings and control sentinels
    Throughput,
    /// Subscribers back to publisher 0: echoed pings
    Latency,
    /// Subscribers to publishers: discovery and acknowledgments
    Announcement,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Throughput, Topic::Latency, Topic::Announcement];

    fn index(self) -> usize {
        match self {
            Topic::Throughput => 0,
            Topic::Latency => 1,
            Topic::Announcement => 2,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topic::Throughput => "throughput",
            Topic::Latency => "latency",
            Topic::Announcement => "announcement",
        };
        f.write_str(name)
    }
}

#[derive(Default)]
struct TopicState {
    readers: Vec<(u64, Sender<TestMessage>)>,
    next_reader: u64,
    writers: usize,
}

struct BusInner {
    topics: [Mutex<TopicState>; 3],
    queue_depth: usize,
}

/// Cloneable handle to the bus
#[derive(Clone)]
pub struct LoopbackBus {
    inner: Arc<BusInner>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::with_queue_depth(crate::defaults::LOOPBACK_QUEUE_DEPTH)
    }

    /// Bus whose per-reader queues hold at most `queue_depth` messages;
    /// a full queue blocks the writer
    pub fn with_queue_depth(queue_depth: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: Default::default(),
                queue_depth: queue_depth.max(1),
            }),
        }
    }

    pub fn writer(&self, topic: Topic) -> LoopbackWriter {
        self.topic(topic).lock().writers += 1;
        LoopbackWriter {
            bus: self.clone(),
            topic,
            ping: PingSignal::new(),
        }
    }

    pub fn reader(&self, topic: Topic) -> LoopbackReader {
        let (tx, rx) = channel::bounded(self.inner.queue_depth);
        let mut state = self.topic(topic).lock();
        let id = state.next_reader;
        state.next_reader += 1;
        state.readers.push((id, tx));
        drop(state);

        LoopbackReader {
            bus: self.clone(),
            topic,
            id,
            rx,
        }
    }

    /// Readers currently attached to `topic`
    pub fn reader_count(&self, topic: Topic) -> usize {
        self.topic(topic).lock().readers.len()
    }

    pub fn writer_count(&self, topic: Topic) -> usize {
        self.topic(topic).lock().writers
    }

    fn senders(&self, topic: Topic) -> Vec<Sender<TestMessage>> {
        self.topic(topic)
            .lock()
            .readers
            .iter()
            .map(|(_, tx)| tx.clone())
            .collect()
    }

    fn topic(&self, topic: Topic) -> &Mutex<TopicState> {
        &self.inner.topics[topic.index()]
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

fn wait_for_count(
    timeout: Duration,
    expected: usize,
    what: &str,
    topic: Topic,
    count: impl Fn() -> usize,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let current = count();
        if current >= expected {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(AppError::timeout(format!(
                "Discovered {} of {} {} on the {} topic",
                current, expected, what, topic
            )));
        }
        thread::sleep(crate::defaults::COUNTER_POLL);
    }
}

/// Writer attached to one topic of a [`LoopbackBus`]
pub struct LoopbackWriter {
    bus: LoopbackBus,
    topic: Topic,
    ping: PingSignal,
}

impl LoopbackWriter {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Handshake a latency listener uses to release this writer
    pub fn ping_signal(&self) -> PingSignal {
        self.ping.clone()
    }

    /// Detached view of this writer's topic queues, usable after the writer
    /// has been handed to a listener
    pub fn drain_handle(&self) -> DrainHandle {
        DrainHandle {
            bus: self.bus.clone(),
            topic: self.topic,
        }
    }

    fn targets(&self) -> Vec<Sender<TestMessage>> {
        self.bus.senders(self.topic)
    }
}

/// Waits for the readers of one topic to take everything queued for them
#[derive(Clone)]
pub struct DrainHandle {
    bus: LoopbackBus,
    topic: Topic,
}

impl DrainHandle {
    /// Messages queued on the topic and not yet received
    pub fn queued(&self) -> usize {
        self.bus.senders(self.topic).iter().map(|tx| tx.len()).sum()
    }

    pub fn wait(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while self.queued() > 0 {
            if Instant::now() >= deadline {
                return Err(AppError::timeout(format!(
                    "Readers on the {} topic did not drain in time",
                    self.topic
                )));
            }
            thread::sleep(crate::defaults::COUNTER_POLL);
        }
        Ok(())
    }
}

impl MessageWriter for LoopbackWriter {
    fn send(&mut self, message: &TestMessage, _wildcard_key: bool) -> Result<()> {
        // Sent outside the topic lock so a full queue cannot stall readers
        // attaching or detaching. A reader dropped mid-send just misses it.
        for tx in self.targets() {
            let _ = tx.send(message.clone());
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn wait_for_readers(&self, expected: usize, timeout: Duration) -> Result<()> {
        wait_for_count(timeout, expected, "readers", self.topic, || {
            self.bus.reader_count(self.topic)
        })
    }

    fn notify_ping_response(&self) -> Result<()> {
        self.ping.notify();
        Ok(())
    }

    fn wait_for_ping_response(&self, timeout: Option<Duration>) -> bool {
        self.ping.wait(timeout)
    }

    fn wait_for_acknowledgments(&self, timeout: Duration) -> Result<()> {
        self.drain_handle().wait(timeout)
    }
}

impl Drop for LoopbackWriter {
    fn drop(&mut self) {
        let mut state = self.bus.topic(self.topic).lock();
        state.writers = state.writers.saturating_sub(1);
    }
}

/// Reader attached to one topic of a [`LoopbackBus`]
pub struct LoopbackReader {
    bus: LoopbackBus,
    topic: Topic,
    id: u64,
    rx: Receiver<TestMessage>,
}

impl LoopbackReader {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Callback delivery: a dedicated thread hands every message to
    /// `listener` until the handle is stopped
    pub fn dispatch<L>(self, mut listener: L) -> DispatchHandle
    where
        L: MessageListener + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let stop = cancel.clone();
        let poll = crate::defaults::READ_POLL;

        let thread = thread::spawn(move || {
            let mut delivered = 0u64;
            while !stop.load(Ordering::Acquire) {
                match self.rx.recv_timeout(poll) {
                    Ok(message) => {
                        listener.on_message(&message);
                        delivered += 1;
                    }
                    Err(_) => continue,
                }
            }
            delivered
        });

        DispatchHandle {
            cancel,
            thread: Some(thread),
        }
    }
}

impl MessageReader for LoopbackReader {
    fn receive(&mut self, timeout: Duration) -> Result<Option<TestMessage>> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            // The bus owns this reader's sender until the reader drops, so
            // the queue never disconnects underneath it
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn wait_for_writers(&self, expected: usize, timeout: Duration) -> Result<()> {
        wait_for_count(timeout, expected, "writers", self.topic, || {
            self.bus.writer_count(self.topic)
        })
    }
}

impl Drop for LoopbackReader {
    fn drop(&mut self) {
        let id = self.id;
        self.bus
            .topic(self.topic)
            .lock()
            .readers
            .retain(|(reader, _)| *reader != id);
    }
}

/// Owner of a callback dispatch thread; stops and joins it on drop
pub struct DispatchHandle {
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<u64>>,
}

impl DispatchHandle {
    /// Stop dispatching and return the number of messages delivered
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        self.cancel.store(true, Ordering::Release);
        self.thread
            .take()
            .and_then(|thread| thread.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for DispatchHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
