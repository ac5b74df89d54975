/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # fixgate Store
//!
//! Message persistence for the fixgate session engine.
//!
//! This crate provides:
//! - **MessageStore trait**: Sequence counters, creation time and sent messages
//! - **MessageStoreFactory trait**: One store per session
//! - **MemoryStore / NullStore**: Volatile stores
//! - **FileStore**: File-based persistent store surviving restarts

pub mod file;
pub mod memory;
pub mod traits;

pub use file::{FileStore, FileStoreFactory, session_file_prefix};
pub use memory::{MemoryStore, MemoryStoreFactory, NullStore, NullStoreFactory};
pub use traits::{MessageStore, MessageStoreFactory};
