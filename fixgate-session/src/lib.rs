/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # fixgate Session
//!
//! FIX session layer protocol implementation for the fixgate engine.
//!
//! This crate provides:
//! - **State machine**: [`Session`] drives logon, logout, sequencing and recovery
//! - **Sequence management**: gap detection and a bounded resend queue
//! - **Heartbeat handling**: Heartbeat/TestRequest liveness with injected time
//! - **Recovery**: ResendRequest servicing with SequenceReset-GapFill
//! - **Configuration**: QuickFIX style settings, typed session config and schedule
//! - **Callbacks**: [`Application`] hooks and per-session [`Log`]s

pub mod application;
pub mod config;
pub mod heartbeat;
pub mod log;
pub mod messages;
pub mod reject;
pub mod responder;
pub mod schedule;
pub mod sequence;
pub mod session;
pub mod settings;
pub mod state;

pub use application::{Application, DoNotSend, NoOpApplication, RejectReason};
pub use config::{ConnectionType, ResendOverflow, SessionConfig};
pub use heartbeat::{HeartbeatAction, HeartbeatManager};
pub use log::{
    FileLog, FileLogFactory, Log, LogFactory, NullLog, NullLogFactory, StdLog, StdLogFactory,
    TracingLog, TracingLogFactory,
};
pub use reject::{BusinessRejectReason, SessionRejectReason};
pub use responder::Responder;
pub use schedule::SessionSchedule;
pub use sequence::{QueueOutcome, ResendQueue, SequenceResult};
pub use session::Session;
pub use settings::{SessionSettings, SettingsSection};
pub use state::SessionState;
