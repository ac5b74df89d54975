/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Message store trait definitions.
//!
//! A store keeps the two sequence counters of a session, its creation time
//! and the raw bytes of every message sent, so a counterparty's
//! ResendRequest can be served after a restart.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use fixgate_core::error::StoreError;
use fixgate_core::session_id::SessionId;
use std::sync::Arc;

/// Abstract interface for FIX message storage.
///
/// Sequence numbers are read synchronously from cached values; every
/// mutation is durable once its future resolves successfully.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Stores an outgoing message for potential resend.
    ///
    /// # Arguments
    /// * `seq_num` - The message sequence number
    /// * `message` - The raw message bytes
    ///
    /// # Errors
    /// Returns `StoreError` if the message cannot be stored.
    async fn set(&self, seq_num: u64, message: &[u8]) -> Result<(), StoreError>;

    /// Retrieves stored messages for a resend request.
    ///
    /// # Arguments
    /// * `begin` - Begin sequence number (inclusive)
    /// * `end` - End sequence number (inclusive), 0 for the last stored
    ///
    /// # Returns
    /// The messages found in the range, in sequence order. Sequence numbers
    /// that were never stored are skipped.
    ///
    /// # Errors
    /// Returns `StoreError` if messages cannot be retrieved.
    async fn get(&self, begin: u64, end: u64) -> Result<Vec<Bytes>, StoreError>;

    /// Returns the next sender sequence number.
    fn next_sender_seq_num(&self) -> u64;

    /// Returns the next expected target sequence number.
    fn next_target_seq_num(&self) -> u64;

    /// Sets the next sender sequence number.
    ///
    /// # Errors
    /// Returns `StoreError` if the counter cannot be persisted.
    async fn set_next_sender_seq_num(&self, seq: u64) -> Result<(), StoreError>;

    /// Sets the next expected target sequence number.
    ///
    /// # Errors
    /// Returns `StoreError` if the counter cannot be persisted.
    async fn set_next_target_seq_num(&self, seq: u64) -> Result<(), StoreError>;

    /// Atomically advances the next sender sequence number by one.
    ///
    /// Concurrent increments are never lost.
    ///
    /// # Errors
    /// Returns `StoreError` if the counter cannot be persisted.
    async fn incr_next_sender_seq_num(&self) -> Result<(), StoreError>;

    /// Atomically advances the next expected target sequence number by one.
    ///
    /// # Errors
    /// Returns `StoreError` if the counter cannot be persisted.
    async fn incr_next_target_seq_num(&self) -> Result<(), StoreError>;

    /// Clears all messages, sets both counters to 1 and restarts the
    /// creation time at `now`.
    ///
    /// # Errors
    /// Returns `StoreError` if the reset fails.
    async fn reset(&self, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Returns the creation time of the store.
    fn creation_time(&self) -> DateTime<Utc>;

    /// Reloads the store from persistent storage.
    ///
    /// # Errors
    /// Returns `StoreError` if the refresh fails.
    async fn refresh(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Creates one store per session.
#[async_trait]
pub trait MessageStoreFactory: Send + Sync {
    /// Opens (or creates) the store of a session.
    ///
    /// # Errors
    /// Returns `StoreError` if the underlying storage cannot be opened.
    async fn create(&self, session_id: &SessionId) -> Result<Arc<dyn MessageStore>, StoreError>;
}
