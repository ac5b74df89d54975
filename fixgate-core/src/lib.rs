/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # fixgate Core
//!
//! Core types and error definitions for the fixgate FIX session engine.
//!
//! This crate provides the building blocks shared by every fixgate crate:
//! - **Error types**: Typed error hierarchy built with `thiserror`
//! - **Field types**: `FieldTag`, zero-copy `FieldRef`, owned `Field`, tag constants
//! - **Message model**: `Message` with header/body/trailer `FieldMap`s and nested `Group`s
//! - **Identity**: `SessionId`, `CompId`
//! - **Time**: `Timestamp` in FIX UTCTimestamp format

pub mod error;
pub mod field;
pub mod message;
pub mod session_id;
pub mod types;

pub use error::{
    ConfigError, DecodeError, EncodeError, FixError, Result, SessionError, StoreError,
};
pub use field::{Field, FieldRef, FieldTag, tags};
pub use message::{FieldMap, Group, Message, MsgType};
pub use session_id::{ParseSessionIdError, SessionId};
pub use types::{CompId, Timestamp};
