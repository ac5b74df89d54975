/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! In-memory message store implementation.
//!
//! Suitable for tests and for sessions that may lose their state on
//! restart. [`NullStore`] keeps only the counters.

use crate::traits::{MessageStore, MessageStoreFactory};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use fixgate_core::error::StoreError;
use fixgate_core::session_id::SessionId;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sequence counters and creation time shared by the volatile stores.
#[derive(Debug)]
struct Counters {
    next_sender: AtomicU64,
    next_target: AtomicU64,
    creation_time: RwLock<DateTime<Utc>>,
}

impl Counters {
    fn new(sender: u64, target: u64) -> Self {
        Self {
            next_sender: AtomicU64::new(sender),
            next_target: AtomicU64::new(target),
            creation_time: RwLock::new(Utc::now()),
        }
    }

    fn incr_sender(&self) {
        self.next_sender.fetch_add(1, Ordering::SeqCst);
    }

    fn incr_target(&self) {
        self.next_target.fetch_add(1, Ordering::SeqCst);
    }

    fn reset(&self, now: DateTime<Utc>) {
        self.next_sender.store(1, Ordering::SeqCst);
        self.next_target.store(1, Ordering::SeqCst);
        *self.creation_time.write() = now;
    }
}

/// In-memory message store.
///
/// Stores messages in a `BTreeMap` for efficient range queries.
/// Not persistent - all data is lost when the process exits.
#[derive(Debug)]
pub struct MemoryStore {
    /// Stored messages indexed by sequence number.
    messages: RwLock<BTreeMap<u64, Bytes>>,
    counters: Counters,
}

impl MemoryStore {
    /// Creates a new empty memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_initial_seqs(1, 1)
    }

    /// Creates a new memory store with initial sequence numbers.
    ///
    /// # Arguments
    /// * `sender_seq` - Initial sender sequence number
    /// * `target_seq` - Initial target sequence number
    #[must_use]
    pub fn with_initial_seqs(sender_seq: u64, target_seq: u64) -> Self {
        Self {
            messages: RwLock::new(BTreeMap::new()),
            counters: Counters::new(sender_seq, target_seq),
        }
    }

    /// Returns the number of stored messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.read().len()
    }

    /// Checks if a message with the given sequence number exists.
    #[must_use]
    pub fn contains(&self, seq_num: u64) -> bool {
        self.messages.read().contains_key(&seq_num)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn set(&self, seq_num: u64, message: &[u8]) -> Result<(), StoreError> {
        self.messages
            .write()
            .insert(seq_num, Bytes::copy_from_slice(message));
        Ok(())
    }

    async fn get(&self, begin: u64, end: u64) -> Result<Vec<Bytes>, StoreError> {
        let end = if end == 0 { u64::MAX } else { end };
        if begin > end {
            return Ok(Vec::new());
        }
        Ok(self
            .messages
            .read()
            .range(begin..=end)
            .map(|(_, bytes)| bytes.clone())
            .collect())
    }

    fn next_sender_seq_num(&self) -> u64 {
        self.counters.next_sender.load(Ordering::SeqCst)
    }

    fn next_target_seq_num(&self) -> u64 {
        self.counters.next_target.load(Ordering::SeqCst)
    }

    async fn set_next_sender_seq_num(&self, seq: u64) -> Result<(), StoreError> {
        self.counters.next_sender.store(seq, Ordering::SeqCst);
        Ok(())
    }

    async fn set_next_target_seq_num(&self, seq: u64) -> Result<(), StoreError> {
        self.counters.next_target.store(seq, Ordering::SeqCst);
        Ok(())
    }

    async fn incr_next_sender_seq_num(&self) -> Result<(), StoreError> {
        self.counters.incr_sender();
        Ok(())
    }

    async fn incr_next_target_seq_num(&self) -> Result<(), StoreError> {
        self.counters.incr_target();
        Ok(())
    }

    async fn reset(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.messages.write().clear();
        self.counters.reset(now);
        Ok(())
    }

    fn creation_time(&self) -> DateTime<Utc> {
        *self.counters.creation_time.read()
    }
}

/// Store that keeps sequence numbers but discards messages.
///
/// Resend requests against it are always answered with gap fills.
#[derive(Debug)]
pub struct NullStore {
    counters: Counters,
}

impl NullStore {
    /// Creates a null store with both counters at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: Counters::new(1, 1),
        }
    }
}

impl Default for NullStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for NullStore {
    async fn set(&self, _seq_num: u64, _message: &[u8]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, _begin: u64, _end: u64) -> Result<Vec<Bytes>, StoreError> {
        Ok(Vec::new())
    }

    fn next_sender_seq_num(&self) -> u64 {
        self.counters.next_sender.load(Ordering::SeqCst)
    }

    fn next_target_seq_num(&self) -> u64 {
        self.counters.next_target.load(Ordering::SeqCst)
    }

    async fn set_next_sender_seq_num(&self, seq: u64) -> Result<(), StoreError> {
        self.counters.next_sender.store(seq, Ordering::SeqCst);
        Ok(())
    }

    async fn set_next_target_seq_num(&self, seq: u64) -> Result<(), StoreError> {
        self.counters.next_target.store(seq, Ordering::SeqCst);
        Ok(())
    }

    async fn incr_next_sender_seq_num(&self) -> Result<(), StoreError> {
        self.counters.incr_sender();
        Ok(())
    }

    async fn incr_next_target_seq_num(&self) -> Result<(), StoreError> {
        self.counters.incr_target();
        Ok(())
    }

    async fn reset(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.counters.reset(now);
        Ok(())
    }

    fn creation_time(&self) -> DateTime<Utc> {
        *self.counters.creation_time.read()
    }
}

/// Factory producing a fresh [`MemoryStore`] per session.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStoreFactory;

impl MemoryStoreFactory {
    /// Creates the factory.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageStoreFactory for MemoryStoreFactory {
    async fn create(&self, _session_id: &SessionId) -> Result<Arc<dyn MessageStore>, StoreError> {
        Ok(Arc::new(MemoryStore::new()))
    }
}

/// Factory producing a [`NullStore`] per session.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStoreFactory;

impl NullStoreFactory {
    /// Creates the factory.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageStoreFactory for NullStoreFactory {
    async fn create(&self, _session_id: &SessionId) -> Result<Arc<dyn MessageStore>, StoreError> {
        Ok(Arc::new(NullStore::new()))
    }
}
