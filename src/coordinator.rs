//! End-of-test coordination across publishers and subscribers
//!
//! [`FinishedSet`] records which publishers have announced completion.
//! [`AnnouncementListener`] runs on the publisher side and pairs subscriber
//! announcements: the first message from a subscriber counts it in, every
//! later one counts an acknowledgment out.

use crate::logging::Logger;
use crate::models::TestMessage;
use crate::transport::MessageListener;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Set of origin ids with O(1) idempotent insertion
#[derive(Debug, Clone, Default)]
pub struct FinishedSet {
    words: Vec<u64>,
    len: usize,
}

impl FinishedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set pre-sized for origins `0..expected`
    pub fn with_expected(expected: usize) -> Self {
        Self {
            words: vec![0; expected.div_ceil(64)],
            len: 0,
        }
    }

    /// Insert `origin`; returns `true` only the first time it is seen
    pub fn insert(&mut self, origin: usize) -> bool {
        let (word, bit) = (origin / 64, origin % 64);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }

        let mask = 1u64 << bit;
        if self.words[word] & mask != 0 {
            return false;
        }
        self.words[word] |= mask;
        self.len += 1;
        true
    }

    pub fn contains(&self, origin: usize) -> bool {
        self.words
            .get(origin / 64)
            .is_some_and(|word| word & (1u64 << (origin % 64)) != 0)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|word| *word = 0);
        self.len = 0;
    }
}

/// Shared counter of announced subscribers awaiting acknowledgment
///
/// The listener mutates it from the transport's receive thread and the
/// publisher loop polls it.
#[derive(Debug, Clone, Default)]
pub struct AnnouncementCounter(Arc<AtomicI64>);

impl AnnouncementCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    /// Arm the counter before a control message is broadcast
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Release);
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    fn decrement(&self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }

    /// Poll until `done` holds for the counter value or `timeout` elapses
    pub fn wait_until(&self, timeout: Duration, done: impl Fn(i64) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(self.value()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(crate::defaults::COUNTER_POLL);
        }
    }
}

/// Publisher-side listener on the announcement channel
pub struct AnnouncementListener {
    seen: FinishedSet,
    counter: AnnouncementCounter,
    logger: Logger,
}

impl AnnouncementListener {
    pub fn new(counter: AnnouncementCounter, logger: Logger) -> Self {
        Self {
            seen: FinishedSet::new(),
            counter,
            logger,
        }
    }

    pub fn counter(&self) -> &AnnouncementCounter {
        &self.counter
    }

    /// Subscribers that have announced themselves at least once
    pub fn announced(&self) -> usize {
        self.seen.len()
    }

    pub fn on_announcement(&mut self, origin: i32) {
        let Ok(index) = usize::try_from(origin) else {
            self.logger
                .warn("Ignoring announcement with a negative origin")
                .field("origin", origin)
                .log();
            return;
        };

        if self.seen.insert(index) {
            self.counter.increment();
            self.logger
                .debug("Subscriber announced")
                .field("subscriber", origin)
                .log();
        } else {
            self.counter.decrement();
        }
    }
}

impl MessageListener for AnnouncementListener {
    fn on_message(&mut self, message: &TestMessage) {
        self.on_announcement(message.entity_id);
    }
}
