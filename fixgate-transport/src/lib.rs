/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # fixgate Transport
//!
//! Network transport layer for the fixgate FIX session engine.
//!
//! This crate provides:
//! - **Codec**: Tokio codec for FIX message framing with resynchronization
//! - **Connections**: reader/writer tasks over TCP or any async byte stream
//! - **Responder**: [`ConnectionHandle`] hands session output to the writer

pub mod codec;
pub mod connection;

pub use codec::{CodecError, FixCodec, Frame};
pub use connection::{Connection, ConnectionEvent, ConnectionHandle, ConnectionId};
