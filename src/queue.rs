//! The two bounded frame containers shared between callers and the IO thread.
//!
//! Neither is thread safe by itself.
//! Both live behind the connection's lock.

use std::{collections::VecDeque, fmt::Display};

use serde::{Deserialize, Serialize};

use crate::serial::SerialMessageBytes;

/// A wall clock reading, in seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Timestamp(f64);

impl Timestamp {
    /// The current time.
    pub fn now() -> Self {
        let now = chrono::Utc::now();

        Self(now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) / 1e9)
    }

    /// A timestamp from seconds since the Unix epoch.
    pub fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    /// Seconds since the Unix epoch.
    pub fn as_secs(&self) -> f64 {
        self.0
    }

    /// The timestamp at a precision of 4 decimal digits,
    /// which is the precision timestamps are compared at when searching.
    pub fn rounded(&self) -> i64 {
        (self.0 * 10_000.0).round() as i64
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

/// Bytes read from the port, and when they were read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedFrame {
    /// When the IO thread observed the bytes.
    pub timestamp: Timestamp,

    /// The bytes.
    pub bytes: SerialMessageBytes,
}

/// Frames waiting to be written to the port, oldest first.
#[derive(Debug, Clone)]
pub struct SendQueue {
    frames: VecDeque<SerialMessageBytes>,
    capacity: usize,
}

impl SendQueue {
    /// An empty queue which accepts at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            capacity,
        }
    }

    /// Append a frame.
    /// Returns false, leaving the queue untouched, if the queue is full.
    pub fn push(&mut self, frame: SerialMessageBytes) -> bool {
        if self.frames.len() >= self.capacity {
            return false;
        }

        self.frames.push_back(frame);
        true
    }

    /// Remove and return the oldest frame, or `None` if the queue is empty.
    pub fn pop_front(&mut self) -> Option<SerialMessageBytes> {
        self.frames.pop_front()
    }

    /// Borrow the oldest frame.
    pub fn front(&self) -> Option<&SerialMessageBytes> {
        self.frames.front()
    }

    /// Remove the `count` oldest frames (or all of them, if there are fewer).
    pub fn drop_front(&mut self, count: usize) {
        let count = count.min(self.frames.len());
        self.frames.drain(..count);
    }

    /// The number of pending frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frames are pending.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The most frames this queue accepts.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// The most recently received frames, oldest first.
///
/// Timestamps never decrease from one frame to the next,
/// which is what allows searching by timestamp.
#[derive(Debug, Clone)]
pub struct ReceiveHistory {
    frames: VecDeque<ReceivedFrame>,
    capacity: usize,
}

impl ReceiveHistory {
    /// An empty history keeping at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest one if over capacity.
    ///
    /// A timestamp older than the newest stored one (the wall clock stepped back)
    /// is raised to that one's, keeping the history ordered.
    pub fn push(&mut self, timestamp: Timestamp, bytes: SerialMessageBytes) {
        let timestamp = match self.frames.back() {
            Some(newest) if newest.timestamp > timestamp => newest.timestamp,
            _ => timestamp,
        };

        self.frames.push_back(ReceivedFrame { timestamp, bytes });

        while self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
    }

    /// The frame `offset` positions before the most recent one.
    /// Offset 0 is the most recent frame.
    pub fn at(&self, offset: usize) -> Option<&ReceivedFrame> {
        let index = self.frames.len().checked_sub(offset)?.checked_sub(1)?;

        self.frames.get(index)
    }

    /// Binary search for the frame with the given timestamp,
    /// comparing at 4 decimal digits.
    /// Returns its index (0 is the oldest frame).
    pub fn find_index_of(&self, timestamp: Timestamp) -> Option<usize> {
        self.frames
            .binary_search_by_key(&timestamp.rounded(), |frame| frame.timestamp.rounded())
            .ok()
    }

    /// The oldest frame received strictly after `timestamp`.
    pub fn first_after(&self, timestamp: Timestamp) -> Option<&ReceivedFrame> {
        self.after(timestamp).next()
    }

    /// All frames received strictly after `timestamp`, oldest first.
    pub fn after(&self, timestamp: Timestamp) -> impl Iterator<Item = &ReceivedFrame> {
        let index = self.frames.partition_point(|frame| frame.timestamp <= timestamp);

        self.frames.range(index..)
    }

    /// All frames received at or after `timestamp`, oldest first.
    pub fn since(&self, timestamp: Timestamp) -> impl Iterator<Item = &ReceivedFrame> {
        let index = self.frames.partition_point(|frame| frame.timestamp < timestamp);

        self.frames.range(index..)
    }

    /// Iterate over all frames, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ReceivedFrame> {
        self.frames.iter()
    }

    /// The number of stored frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The most frames kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
