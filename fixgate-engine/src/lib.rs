/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # fixgate Engine
//!
//! Acceptor and initiator connectors driving fixgate sessions over TCP.
//!
//! This crate provides:
//! - **SocketAcceptor**: Listens and routes connections by their first message
//! - **SocketInitiator**: Connects out and reconnects while in session time
//! - **ConnectionHandler**: `start` / `block` / `poll` / `stop` lifecycle
//! - **SessionSender**: Thread-safe `send_to_target` for any configured session
//! - **Builder API**: Fluent configuration from [`fixgate_session::SessionSettings`]

mod actor;
pub mod builder;
pub mod connector;
pub mod registry;

pub use builder::ConnectorBuilder;
pub use connector::{ConnectionHandler, ConnectorMode, SocketAcceptor, SocketInitiator};
pub use registry::{SessionRegistry, SessionSender, SessionStatus};
