//! Message classification for the in-band test-control protocol
//!
//! Test phases are signalled through reserved payload sizes and the latency
//! marker, never through a separate header. Every listener funnels incoming
//! messages through a [`MessageClassifier`] before touching its statistics.

use crate::models::message::{
    TestMessage, FINISHED_SIZE, INITIALIZE_SIZE, LENGTH_CHANGED_SIZE, MIN_PAYLOAD_SIZE, NOT_A_PING,
};
use std::fmt;

/// Control signal carried by a payload size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Init,
    Finished,
    Resize,
    Data,
}

impl ControlSignal {
    /// Map a payload size to its signal; sizes below the minimum payload
    /// that are not sentinels map to `None`
    pub fn from_size(size: usize) -> Option<Self> {
        match size {
            INITIALIZE_SIZE => Some(Self::Init),
            FINISHED_SIZE => Some(Self::Finished),
            LENGTH_CHANGED_SIZE => Some(Self::Resize),
            s if s >= MIN_PAYLOAD_SIZE => Some(Self::Data),
            _ => None,
        }
    }

    /// Payload size that encodes this signal; `Data` has no fixed size
    pub fn size(&self) -> Option<usize> {
        match self {
            Self::Init => Some(INITIALIZE_SIZE),
            Self::Finished => Some(FINISHED_SIZE),
            Self::Resize => Some(LENGTH_CHANGED_SIZE),
            Self::Data => None,
        }
    }
}

/// Why a message was not understood
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    /// Origin id outside `0..publishers`
    OriginOutOfRange { origin: i32, publishers: usize },
    /// A size below the minimum payload that is not a sentinel
    ReservedSize(usize),
    /// A latency marker below `NOT_A_PING`
    InvalidMarker(i32),
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::OriginOutOfRange { origin, publishers } => write!(
                f,
                "origin id {} outside the {} known publishers",
                origin, publishers
            ),
            Anomaly::ReservedSize(size) => write!(f, "reserved payload size {}", size),
            Anomaly::InvalidMarker(marker) => write!(f, "invalid latency marker {}", marker),
        }
    }
}

/// Full classification of one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Init,
    Finished,
    Resize,
    DataSample,
    PingRequest,
    Unrecognized(Anomaly),
}

/// Classifies messages for one listener role
#[derive(Debug, Clone)]
pub struct MessageClassifier {
    /// Exclusive upper bound of accepted origin ids, `None` on the publisher side
    publishers: Option<usize>,
    /// Marker this listener answers pings for, `None` on the publisher side
    subscriber_id: Option<i32>,
    content_filter: bool,
}

impl MessageClassifier {
    /// Classifier for a subscriber receiving from `publishers` publishers
    pub fn for_subscriber(publishers: usize, subscriber_id: i32, content_filter: bool) -> Self {
        Self {
            publishers: Some(publishers),
            subscriber_id: Some(subscriber_id),
            content_filter,
        }
    }

    /// Classifier for a publisher receiving echoed pongs
    pub fn for_publisher() -> Self {
        Self {
            publishers: None,
            subscriber_id: None,
            content_filter: false,
        }
    }

    pub fn classify(&self, size: usize, marker: i32, origin: i32) -> MessageClass {
        if let Some(publishers) = self.publishers {
            let in_range = usize::try_from(origin).map_or(false, |o| o < publishers);
            if !in_range {
                return MessageClass::Unrecognized(Anomaly::OriginOutOfRange { origin, publishers });
            }
        }

        match ControlSignal::from_size(size) {
            Some(ControlSignal::Init) => return MessageClass::Init,
            Some(ControlSignal::Finished) => return MessageClass::Finished,
            Some(ControlSignal::Resize) => return MessageClass::Resize,
            Some(ControlSignal::Data) => {}
            None => return MessageClass::Unrecognized(Anomaly::ReservedSize(size)),
        }

        if marker < NOT_A_PING {
            return MessageClass::Unrecognized(Anomaly::InvalidMarker(marker));
        }

        if let Some(own_id) = self.subscriber_id {
            let addressed = marker == own_id || (self.content_filter && marker != NOT_A_PING);
            if addressed {
                return MessageClass::PingRequest;
            }
        }

        MessageClass::DataSample
    }

    pub fn classify_message(&self, msg: &TestMessage) -> MessageClass {
        self.classify(msg.size(), msg.latency_ping, msg.entity_id)
    }
}
