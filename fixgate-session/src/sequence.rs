/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Sequence number checks and out-of-order buffering.
//!
//! The counters themselves live in the message store; this module classifies
//! inbound sequence numbers and holds messages that arrived ahead of a gap.

use crate::config::ResendOverflow;
use fixgate_core::message::Message;
use std::collections::BTreeMap;

/// Classifies an inbound sequence number against the expected one.
///
/// # Returns
/// - `SequenceResult::Ok` if the sequence number matches expected
/// - `SequenceResult::TooLow` if it is a possible duplicate
/// - `SequenceResult::Gap` if messages are missing
#[inline]
#[must_use]
pub const fn validate(expected: u64, received: u64) -> SequenceResult {
    if received == expected {
        SequenceResult::Ok
    } else if received < expected {
        SequenceResult::TooLow { expected, received }
    } else {
        SequenceResult::Gap { expected, received }
    }
}

/// Result of sequence number validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceResult {
    /// Sequence number is as expected.
    Ok,
    /// Sequence number is lower than expected (possible duplicate).
    TooLow {
        /// Expected sequence number.
        expected: u64,
        /// Received sequence number.
        received: u64,
    },
    /// Sequence number is higher than expected (gap detected).
    Gap {
        /// Expected sequence number.
        expected: u64,
        /// Received sequence number.
        received: u64,
    },
}

impl SequenceResult {
    /// Returns true if the sequence is valid.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Returns true if there's a gap.
    #[must_use]
    pub const fn is_gap(&self) -> bool {
        matches!(self, Self::Gap { .. })
    }

    /// Returns true if the sequence is too low.
    #[must_use]
    pub const fn is_too_low(&self) -> bool {
        matches!(self, Self::TooLow { .. })
    }
}

/// Outcome of [`ResendQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    /// The message was buffered (or replaced an earlier copy).
    Queued,
    /// The queue was full and the message was discarded.
    Dropped,
    /// The queue was full and the policy asks for a disconnect.
    Overflow,
}

/// Bounded buffer of messages received ahead of a sequence gap.
#[derive(Debug)]
pub struct ResendQueue {
    messages: BTreeMap<u64, Message>,
    capacity: usize,
    overflow: ResendOverflow,
}

impl ResendQueue {
    /// Creates an empty queue.
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of buffered messages
    /// * `overflow` - Policy when a message arrives at a full queue
    #[must_use]
    pub fn new(capacity: usize, overflow: ResendOverflow) -> Self {
        Self {
            messages: BTreeMap::new(),
            capacity,
            overflow,
        }
    }

    /// Buffers a message under its sequence number.
    ///
    /// A message for an already buffered seqnum replaces it without counting
    /// against the capacity.
    pub fn push(&mut self, seq_num: u64, message: Message) -> QueueOutcome {
        if !self.messages.contains_key(&seq_num) && self.messages.len() >= self.capacity {
            return match self.overflow {
                ResendOverflow::Drop => QueueOutcome::Dropped,
                ResendOverflow::Disconnect => QueueOutcome::Overflow,
            };
        }
        self.messages.insert(seq_num, message);
        QueueOutcome::Queued
    }

    /// Removes and returns the message with exactly this seqnum.
    pub fn take(&mut self, seq_num: u64) -> Option<Message> {
        self.messages.remove(&seq_num)
    }

    /// Discards buffered messages below `seq_num`.
    ///
    /// Used after a SequenceReset moved the expected seqnum forward.
    pub fn discard_below(&mut self, seq_num: u64) {
        self.messages = self.messages.split_off(&seq_num);
    }

    /// Returns the lowest buffered seqnum.
    #[must_use]
    pub fn first_seq_num(&self) -> Option<u64> {
        self.messages.keys().next().copied()
    }

    /// Returns the number of buffered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drops every buffered message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixgate_core::message::MsgType;

    fn msg(seq: u64) -> Message {
        let mut message = Message::with_msg_type(&MsgType::NewOrderSingle);
        message.header_mut().set_uint(34, seq);
        message
    }

    #[test]
    fn test_validate() {
        assert!(validate(1, 1).is_ok());
        assert!(validate(5, 4).is_too_low());
        assert!(validate(5, 5).is_ok());
        assert!(validate(5, 10).is_gap());
        assert_eq!(
            validate(5, 10),
            SequenceResult::Gap {
                expected: 5,
                received: 10
            }
        );
    }

    #[test]
    fn test_queue_orders_and_takes() {
        let mut queue = ResendQueue::new(10, ResendOverflow::Drop);
        assert_eq!(queue.push(7, msg(7)), QueueOutcome::Queued);
        assert_eq!(queue.push(5, msg(5)), QueueOutcome::Queued);
        assert_eq!(queue.first_seq_num(), Some(5));

        assert!(queue.take(6).is_none());
        assert_eq!(queue.take(5).unwrap().seq_num(), Some(5));
        assert_eq!(queue.first_seq_num(), Some(7));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_queue_overflow_policies() {
        let mut dropping = ResendQueue::new(2, ResendOverflow::Drop);
        dropping.push(3, msg(3));
        dropping.push(4, msg(4));
        assert_eq!(dropping.push(5, msg(5)), QueueOutcome::Dropped);
        assert_eq!(dropping.push(4, msg(4)), QueueOutcome::Queued);
        assert_eq!(dropping.len(), 2);

        let mut strict = ResendQueue::new(1, ResendOverflow::Disconnect);
        strict.push(3, msg(3));
        assert_eq!(strict.push(9, msg(9)), QueueOutcome::Overflow);
    }

    #[test]
    fn test_discard_below() {
        let mut queue = ResendQueue::new(10, ResendOverflow::Drop);
        for seq in [3, 4, 8] {
            queue.push(seq, msg(seq));
        }
        queue.discard_below(5);
        assert_eq!(queue.first_seq_num(), Some(8));

        queue.clear();
        assert!(queue.is_empty());
    }
}
