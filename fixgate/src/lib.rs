/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # fixgate
//!
//! A FIX protocol session engine for Rust.
//!
//! fixgate runs the session layer a FIX counterparty pair needs to stay in
//! sync over TCP: logon and logout, sequence number tracking, persistence
//! of sent messages, heartbeats and test requests, gap detection and
//! resend recovery. Application messages are opaque field sets that the
//! engine sequences and persists but does not interpret.
//!
//! ## Features
//!
//! - **Versions**: FIX.4.0 through FIX.4.4 and FIXT.1.1
//! - **Stores**: Memory, file and null message stores
//! - **Logs**: `tracing`, stdout, file and null session logs
//! - **Connectors**: Socket acceptor and initiator on Tokio
//! - **Settings**: QuickFIX-style `[DEFAULT]` / `[SESSION]` files
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fixgate::prelude::*;
//!
//! let settings = SessionSettings::load("executor.cfg")?;
//! let acceptor = ConnectorBuilder::new(settings)
//!     .with_application(MyApplication)
//!     .build_acceptor()?;
//! acceptor.start()?;
//! acceptor.block()?;
//! ```
//!
//! ## Crate Organization
//!
//! - [`core`]: Messages, session identity and error definitions
//! - [`dictionary`]: Data dictionaries for validation
//! - [`tagvalue`]: tag=value encoding and decoding
//! - [`session`]: Session state machine, settings, callbacks and logs
//! - [`store`]: Message persistence
//! - [`transport`]: Framing codec and TCP connections
//! - [`engine`]: Acceptor and initiator connectors

pub mod core {
    //! Messages, session identity and error definitions.
    pub use fixgate_core::*;
}

pub mod dictionary {
    //! Data dictionaries for validation.
    pub use fixgate_dictionary::*;
}

pub mod tagvalue {
    //! tag=value encoding and decoding.
    pub use fixgate_tagvalue::*;
}

pub mod session {
    //! Session state machine, settings, callbacks and logs.
    pub use fixgate_session::*;
}

pub mod store {
    //! Message persistence.
    pub use fixgate_store::*;
}

pub mod transport {
    //! Framing codec and TCP connections.
    pub use fixgate_transport::*;
}

pub mod engine {
    //! Acceptor and initiator connectors.
    pub use fixgate_engine::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    // Core types
    pub use fixgate_core::{
        CompId, ConfigError, DecodeError, EncodeError, FieldMap, FixError, Message, MsgType,
        Result, SessionError, SessionId, StoreError, Timestamp, tags,
    };

    // Dictionary
    pub use fixgate_dictionary::{Dictionary, Version};

    // Tag-value encoding
    pub use fixgate_tagvalue::{decode, encode};

    // Session
    pub use fixgate_session::{
        Application, DoNotSend, FileLogFactory, LogFactory, NoOpApplication, RejectReason,
        SessionConfig, SessionSettings, SessionState, StdLogFactory, TracingLogFactory,
    };

    // Store
    pub use fixgate_store::{
        FileStoreFactory, MemoryStoreFactory, MessageStore, MessageStoreFactory, NullStoreFactory,
    };

    // Engine
    pub use fixgate_engine::{
        ConnectionHandler, ConnectorBuilder, ConnectorMode, SessionSender, SocketAcceptor,
        SocketInitiator,
    };
}
