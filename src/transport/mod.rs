//! Transport seam consumed by the measurement core
//!
//! The core never talks to a concrete pub/sub binding. Publishers and
//! subscribers hold [`MessageWriter`]s and [`MessageReader`]s, and listeners
//! implement [`MessageListener`] so that callback delivery and a polling
//! thread ([`run_read_loop`]) drive exactly the same state machine.

pub mod loopback;

pub use loopback::{DispatchHandle, DrainHandle, LoopbackBus, LoopbackReader, LoopbackWriter, Topic};

use crate::error::Result;
use crate::models::TestMessage;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sending half of a topic
pub trait MessageWriter: Send {
    /// Publish `message`; `wildcard_key` sends to every instance of a keyed topic
    fn send(&mut self, message: &TestMessage, wildcard_key: bool) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Block until `expected` readers are matched
    fn wait_for_readers(&self, expected: usize, timeout: Duration) -> Result<()>;

    /// Wake a sender blocked in [`wait_for_ping_response`](Self::wait_for_ping_response)
    fn notify_ping_response(&self) -> Result<()>;

    /// Wait for one pong; `false` means none arrived in time
    fn wait_for_ping_response(&self, timeout: Option<Duration>) -> bool;

    /// Wait until readers have taken everything sent so far
    fn wait_for_acknowledgments(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

/// Receiving half of a topic
pub trait MessageReader: Send {
    /// Next message, `Ok(None)` if none arrived within `timeout`.
    ///
    /// An error means the topic is gone and no more messages will come.
    fn receive(&mut self, timeout: Duration) -> Result<Option<TestMessage>>;

    /// Block until `expected` writers are matched
    fn wait_for_writers(&self, expected: usize, timeout: Duration) -> Result<()>;
}

/// Entry point shared by callback and polling delivery
pub trait MessageListener: Send {
    fn on_message(&mut self, message: &TestMessage);

    /// The listener's end-of-test flag; polling stops once it is set
    fn is_finished(&self) -> bool {
        false
    }
}

impl<L: MessageListener> MessageListener for Arc<Mutex<L>> {
    fn on_message(&mut self, message: &TestMessage) {
        self.lock().on_message(message);
    }

    fn is_finished(&self) -> bool {
        self.lock().is_finished()
    }
}

/// Drive `listener` from `reader` until the listener finishes, `cancel` is
/// raised or the topic goes away.
///
/// Each receive waits at most `poll`, so the end flag is re-checked even
/// when no traffic arrives. Returns the number of messages delivered.
pub fn run_read_loop<R, L>(reader: &mut R, listener: &mut L, poll: Duration, cancel: &AtomicBool) -> u64
where
    R: MessageReader + ?Sized,
    L: MessageListener + ?Sized,
{
    let mut delivered = 0;
    while !listener.is_finished() && !cancel.load(Ordering::Acquire) {
        match reader.receive(poll) {
            Ok(Some(message)) => {
                listener.on_message(&message);
                delivered += 1;
            }
            Ok(None) => continue,
            Err(_) => break,
        }
    }
    delivered
}

/// Counting handshake between a listener that sees pongs and a sender
/// waiting for them
#[derive(Debug, Clone, Default)]
pub struct PingSignal {
    inner: Arc<(Mutex<u64>, Condvar)>,
}

impl PingSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let (count, ready) = &*self.inner;
        *count.lock() += 1;
        ready.notify_one();
    }

    /// Consume one notification, waiting up to `timeout` (forever if `None`)
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let (count, ready) = &*self.inner;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut pending = count.lock();

        while *pending == 0 {
            match deadline {
                Some(deadline) => {
                    if ready.wait_until(&mut pending, deadline).timed_out() && *pending == 0 {
                        return false;
                    }
                }
                None => ready.wait(&mut pending),
            }
        }

        *pending -= 1;
        true
    }

    /// Notifications not yet consumed
    pub fn pending(&self) -> u64 {
        *self.inner.0.lock()
    }

    /// Drop pongs that arrived after their sender gave up waiting
    pub fn reset(&self) {
        *self.inner.0.lock() = 0;
    }
}
