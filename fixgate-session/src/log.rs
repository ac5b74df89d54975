/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Per-session message and event logs.
//!
//! A [`LogFactory`] creates one [`Log`] per session. Logs are observational:
//! failures to write are reported through `tracing` and never affect the
//! session.

use fixgate_core::session_id::SessionId;
use fixgate_core::types::Timestamp;
use fixgate_store::session_file_prefix;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Receives the raw traffic and events of one session.
pub trait Log: Send + Sync {
    /// A complete inbound message.
    fn on_incoming(&self, message: &[u8]);

    /// A complete outbound message.
    fn on_outgoing(&self, message: &[u8]);

    /// A session event (logon, gap detected, disconnect, ...).
    fn on_event(&self, text: &str);
}

/// Creates the log of a session.
pub trait LogFactory: Send + Sync {
    /// Creates a log for the session.
    ///
    /// # Errors
    /// Returns an I/O error when the log destination cannot be opened.
    fn create(&self, session_id: &SessionId) -> io::Result<Arc<dyn Log>>;
}

/// Renders SOH as `|` for human readable output.
fn printable(message: &[u8]) -> String {
    String::from_utf8_lossy(message).replace('\x01', "|")
}

/// Emits `tracing` events with the session id as a field.
#[derive(Debug, Clone)]
pub struct TracingLog {
    session: String,
}

impl TracingLog {
    /// Creates a log for the session.
    #[must_use]
    pub fn new(session_id: &SessionId) -> Self {
        Self {
            session: session_id.to_string(),
        }
    }
}

impl Log for TracingLog {
    fn on_incoming(&self, message: &[u8]) {
        debug!(session = %self.session, "<- {}", printable(message));
    }

    fn on_outgoing(&self, message: &[u8]) {
        debug!(session = %self.session, "-> {}", printable(message));
    }

    fn on_event(&self, text: &str) {
        info!(session = %self.session, "{}", text);
    }
}

/// Factory of [`TracingLog`]s; the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogFactory;

impl LogFactory for TracingLogFactory {
    fn create(&self, session_id: &SessionId) -> io::Result<Arc<dyn Log>> {
        Ok(Arc::new(TracingLog::new(session_id)))
    }
}

/// Prints messages to stdout and events to stderr.
#[derive(Debug, Clone)]
pub struct StdLog {
    session: String,
}

impl Log for StdLog {
    fn on_incoming(&self, message: &[u8]) {
        println!("{} {} <- {}", Timestamp::now().format_millis(), self.session, printable(message));
    }

    fn on_outgoing(&self, message: &[u8]) {
        println!("{} {} -> {}", Timestamp::now().format_millis(), self.session, printable(message));
    }

    fn on_event(&self, text: &str) {
        eprintln!("{} {} {}", Timestamp::now().format_millis(), self.session, text);
    }
}

/// Factory of [`StdLog`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdLogFactory;

impl LogFactory for StdLogFactory {
    fn create(&self, session_id: &SessionId) -> io::Result<Arc<dyn Log>> {
        Ok(Arc::new(StdLog {
            session: session_id.to_string(),
        }))
    }
}

/// Appends to `<prefix>.messages.log` and `<prefix>.event.log`.
///
/// Each line is `<UTC timestamp> : <entry>`; messages keep their SOH bytes.
#[derive(Debug)]
pub struct FileLog {
    messages: Mutex<BufWriter<File>>,
    events: Mutex<BufWriter<File>>,
    messages_path: PathBuf,
    events_path: PathBuf,
}

impl FileLog {
    /// Opens (creating if needed) the log files of a session in `dir`.
    ///
    /// # Errors
    /// Returns an I/O error when the directory or files cannot be created.
    pub fn open(dir: impl AsRef<Path>, session_id: &SessionId) -> io::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let prefix = session_file_prefix(session_id);
        let messages_path = dir.join(format!("{prefix}.messages.log"));
        let events_path = dir.join(format!("{prefix}.event.log"));
        let open = |path: &Path| -> io::Result<Mutex<BufWriter<File>>> {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Ok(Mutex::new(BufWriter::new(file)))
        };
        Ok(Self {
            messages: open(&messages_path)?,
            events: open(&events_path)?,
            messages_path,
            events_path,
        })
    }

    /// Path of the message log.
    #[must_use]
    pub fn messages_path(&self) -> &Path {
        &self.messages_path
    }

    /// Path of the event log.
    #[must_use]
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    fn append(target: &Mutex<BufWriter<File>>, entry: &[u8]) {
        let mut writer = target.lock();
        if let Err(err) = write_line(&mut *writer, entry) {
            warn!(error = %err, "file log write failed");
        }
    }
}

fn write_line(writer: &mut impl Write, entry: &[u8]) -> io::Result<()> {
    writer.write_all(Timestamp::now().format_millis().as_bytes())?;
    writer.write_all(b" : ")?;
    writer.write_all(entry)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

impl Log for FileLog {
    fn on_incoming(&self, message: &[u8]) {
        Self::append(&self.messages, message);
    }

    fn on_outgoing(&self, message: &[u8]) {
        Self::append(&self.messages, message);
    }

    fn on_event(&self, text: &str) {
        Self::append(&self.events, text.as_bytes());
    }
}

/// Factory of [`FileLog`]s rooted at `FileLogPath`.
#[derive(Debug, Clone)]
pub struct FileLogFactory {
    path: PathBuf,
}

impl FileLogFactory {
    /// Creates a factory writing below `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the log directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogFactory for FileLogFactory {
    fn create(&self, session_id: &SessionId) -> io::Result<Arc<dyn Log>> {
        Ok(Arc::new(FileLog::open(&self.path, session_id)?))
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLog;

impl Log for NullLog {
    fn on_incoming(&self, _message: &[u8]) {}

    fn on_outgoing(&self, _message: &[u8]) {}

    fn on_event(&self, _text: &str) {}
}

/// Factory of [`NullLog`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogFactory;

impl LogFactory for NullLogFactory {
    fn create(&self, _session_id: &SessionId) -> io::Result<Arc<dyn Log>> {
        Ok(Arc::new(NullLog))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("fixgate-log-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_printable() {
        assert_eq!(printable(b"8=FIX.4.4\x0135=0\x01"), "8=FIX.4.4|35=0|");
    }

    #[test]
    fn test_file_log_writes_both_files() {
        let dir = temp_dir("files");
        let id = SessionId::new("FIX.4.4", "CLIENT", "EXEC");
        let log = FileLogFactory::new(&dir).create(&id).unwrap();

        log.on_outgoing(b"8=FIX.4.4\x0135=A\x01");
        log.on_incoming(b"8=FIX.4.4\x0135=A\x01");
        log.on_event("Logon completed");

        let messages =
            std::fs::read_to_string(dir.join("FIX.4.4-CLIENT-EXEC.messages.log")).unwrap();
        assert_eq!(messages.lines().count(), 2);
        assert!(messages.contains(" : 8=FIX.4.4\x0135=A\x01"));

        let events = std::fs::read_to_string(dir.join("FIX.4.4-CLIENT-EXEC.event.log")).unwrap();
        assert!(events.trim_end().ends_with(" : Logon completed"));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_other_factories() {
        let id = SessionId::new("FIX.4.2", "A", "B");
        for factory in [
            &TracingLogFactory as &dyn LogFactory,
            &StdLogFactory,
            &NullLogFactory,
        ] {
            let log = factory.create(&id).unwrap();
            log.on_event("created");
            log.on_outgoing(b"35=0\x01");
        }
    }
}
