/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! File-based persistent message store.
//!
//! Each session owns four files in the store directory, all named after
//! [`session_file_prefix`]:
//! - `.body`: raw messages appended back to back
//! - `.header`: one `seq,offset,size` line per message in `.body`
//! - `.seqnums`: `SSSSSSSSSS : TTTTTTTTTT`, next sender and target
//! - `.session`: creation time as a UTCTimestamp

use crate::traits::{MessageStore, MessageStoreFactory};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use fixgate_core::error::StoreError;
use fixgate_core::session_id::SessionId;
use fixgate_core::types::Timestamp;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

/// Returns the file name prefix used for a session's files.
///
/// Characters outside `[A-Za-z0-9._]` in each part are replaced by `_`.
#[must_use]
pub fn session_file_prefix(session_id: &SessionId) -> String {
    let mut parts = vec![
        session_id.begin_string.as_str(),
        session_id.sender_comp_id.as_str(),
        session_id.target_comp_id.as_str(),
    ];
    if let Some(qualifier) = &session_id.session_qualifier {
        parts.push(qualifier);
    }
    parts
        .iter()
        .map(|part| {
            part.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Clone)]
struct StorePaths {
    body: PathBuf,
    header: PathBuf,
    seqnums: PathBuf,
    session: PathBuf,
}

impl StorePaths {
    fn new(dir: &Path, session_id: &SessionId) -> Self {
        let prefix = session_file_prefix(session_id);
        let file = |ext: &str| dir.join(format!("{prefix}.{ext}"));
        Self {
            body: file("body"),
            header: file("header"),
            seqnums: file("seqnums"),
            session: file("session"),
        }
    }
}

/// Index of the body file, guarded by the async lock that also serializes
/// every write.
#[derive(Debug, Default)]
struct FileState {
    index: BTreeMap<u64, (u64, u64)>,
}

/// Message store persisted to plain files.
#[derive(Debug)]
pub struct FileStore {
    paths: StorePaths,
    state: Mutex<FileState>,
    next_sender: AtomicU64,
    next_target: AtomicU64,
    creation_time: RwLock<DateTime<Utc>>,
}

impl FileStore {
    /// Opens the store of a session, creating its files when absent.
    ///
    /// # Arguments
    /// * `dir` - Directory holding the store files (created if missing)
    /// * `session_id` - Session whose files to open
    ///
    /// # Errors
    /// Returns `StoreError::Io` on file system failures and
    /// `StoreError::Corrupted` if existing files cannot be parsed.
    pub async fn open(dir: impl AsRef<Path>, session_id: &SessionId) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        let store = Self {
            paths: StorePaths::new(dir, session_id),
            state: Mutex::new(FileState::default()),
            next_sender: AtomicU64::new(1),
            next_target: AtomicU64::new(1),
            creation_time: RwLock::new(Utc::now()),
        };
        store.load().await?;
        debug!(
            session = %session_id,
            sender = store.next_sender_seq_num(),
            target = store.next_target_seq_num(),
            "file store opened"
        );
        Ok(store)
    }

    async fn load(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        match read_optional(&self.paths.seqnums).await? {
            Some(text) => {
                let (sender, target) = parse_seqnums(&text)?;
                self.next_sender.store(sender, Ordering::SeqCst);
                self.next_target.store(target, Ordering::SeqCst);
            }
            None => {
                self.next_sender.store(1, Ordering::SeqCst);
                self.next_target.store(1, Ordering::SeqCst);
                self.write_seqnums().await?;
            }
        }

        let creation_time = match read_optional(&self.paths.session).await? {
            Some(text) => Timestamp::parse(text.trim())
                .map(Timestamp::to_datetime)
                .ok_or_else(|| StoreError::Corrupted {
                    reason: format!("bad creation time '{}'", text.trim()),
                })?,
            None => {
                let now = Utc::now();
                write_synced(&self.paths.session, format_time(now).as_bytes()).await?;
                now
            }
        };
        *self.creation_time.write() = creation_time;

        state.index = match read_optional(&self.paths.header).await? {
            Some(text) => parse_index(&text)?,
            None => BTreeMap::new(),
        };
        Ok(())
    }

    async fn write_seqnums(&self) -> Result<(), StoreError> {
        let text = format!(
            "{:010} : {:010}",
            self.next_sender.load(Ordering::SeqCst),
            self.next_target.load(Ordering::SeqCst)
        );
        write_synced(&self.paths.seqnums, text.as_bytes()).await
    }

    async fn set_counter(&self, counter: &AtomicU64, seq: u64) -> Result<(), StoreError> {
        let _guard = self.state.lock().await;
        counter.store(seq, Ordering::SeqCst);
        self.write_seqnums().await
    }

    /// Advances a counter and persists both counters under the write lock.
    async fn incr_counter(&self, counter: &AtomicU64) -> Result<(), StoreError> {
        let _guard = self.state.lock().await;
        counter.fetch_add(1, Ordering::SeqCst);
        self.write_seqnums().await
    }
}

#[async_trait]
impl MessageStore for FileStore {
    async fn set(&self, seq_num: u64, message: &[u8]) -> Result<(), StoreError> {
        let failed = move |err: std::io::Error| StoreError::StoreFailed {
            seq_num,
            reason: err.to_string(),
        };
        let mut state = self.state.lock().await;
        let size = message.len() as u64;

        // A failed header write leaves the body longer than the index knows,
        // so the offset always comes from the file itself.
        let mut body = append(&self.paths.body).await.map_err(failed)?;
        let offset = body.metadata().await.map_err(failed)?.len();
        body.write_all(message).await.map_err(failed)?;
        body.flush().await.map_err(failed)?;
        body.sync_data().await.map_err(failed)?;

        let mut header = append(&self.paths.header).await.map_err(failed)?;
        header
            .write_all(format!("{seq_num},{offset},{size}\n").as_bytes())
            .await
            .map_err(failed)?;
        header.flush().await.map_err(failed)?;
        header.sync_data().await.map_err(failed)?;

        state.index.insert(seq_num, (offset, size));
        Ok(())
    }

    async fn get(&self, begin: u64, end: u64) -> Result<Vec<Bytes>, StoreError> {
        let end = if end == 0 { u64::MAX } else { end };
        if begin > end {
            return Ok(Vec::new());
        }
        let state = self.state.lock().await;
        let entries: Vec<(u64, u64, u64)> = state
            .index
            .range(begin..=end)
            .map(|(seq, (offset, size))| (*seq, *offset, *size))
            .collect();
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut body = File::open(&self.paths.body)
            .await
            .map_err(|err| StoreError::RetrieveFailed {
                seq_num: begin,
                reason: err.to_string(),
            })?;
        let mut messages = Vec::with_capacity(entries.len());
        for (seq_num, offset, size) in entries {
            let failed = move |err: std::io::Error| StoreError::RetrieveFailed {
                seq_num,
                reason: err.to_string(),
            };
            let len = usize::try_from(size).map_err(|_| StoreError::Corrupted {
                reason: format!("message {seq_num} too large"),
            })?;
            let mut buf = vec![0u8; len];
            body.seek(SeekFrom::Start(offset)).await.map_err(failed)?;
            body.read_exact(&mut buf).await.map_err(failed)?;
            messages.push(Bytes::from(buf));
        }
        Ok(messages)
    }

    fn next_sender_seq_num(&self) -> u64 {
        self.next_sender.load(Ordering::SeqCst)
    }

    fn next_target_seq_num(&self) -> u64 {
        self.next_target.load(Ordering::SeqCst)
    }

    async fn set_next_sender_seq_num(&self, seq: u64) -> Result<(), StoreError> {
        self.set_counter(&self.next_sender, seq).await
    }

    async fn set_next_target_seq_num(&self, seq: u64) -> Result<(), StoreError> {
        self.set_counter(&self.next_target, seq).await
    }

    async fn incr_next_sender_seq_num(&self) -> Result<(), StoreError> {
        self.incr_counter(&self.next_sender).await
    }

    async fn incr_next_target_seq_num(&self) -> Result<(), StoreError> {
        self.incr_counter(&self.next_target).await
    }

    async fn reset(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        write_synced(&self.paths.body, b"").await?;
        write_synced(&self.paths.header, b"").await?;
        state.index.clear();

        self.next_sender.store(1, Ordering::SeqCst);
        self.next_target.store(1, Ordering::SeqCst);
        self.write_seqnums().await?;

        write_synced(&self.paths.session, format_time(now).as_bytes()).await?;
        *self.creation_time.write() = now;
        debug!(path = %self.paths.body.display(), "file store reset");
        Ok(())
    }

    fn creation_time(&self) -> DateTime<Utc> {
        *self.creation_time.read()
    }

    async fn refresh(&self) -> Result<(), StoreError> {
        self.load().await
    }
}

/// Factory opening a [`FileStore`] per session under one directory.
#[derive(Debug, Clone)]
pub struct FileStoreFactory {
    path: PathBuf,
}

impl FileStoreFactory {
    /// Creates a factory storing files under `path` (FileStorePath).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MessageStoreFactory for FileStoreFactory {
    async fn create(&self, session_id: &SessionId) -> Result<Arc<dyn MessageStore>, StoreError> {
        Ok(Arc::new(FileStore::open(&self.path, session_id).await?))
    }
}

async fn append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}

async fn write_synced(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let mut file = File::create(path).await?;
    file.write_all(contents).await?;
    file.flush().await?;
    file.sync_data().await?;
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    Timestamp::from(time).format_millis().to_string()
}

fn parse_seqnums(text: &str) -> Result<(u64, u64), StoreError> {
    let corrupted = || StoreError::Corrupted {
        reason: format!("bad seqnums '{}'", text.trim()),
    };
    let (sender, target) = text.split_once(':').ok_or_else(corrupted)?;
    let sender = sender.trim().parse().map_err(|_| corrupted())?;
    let target = target.trim().parse().map_err(|_| corrupted())?;
    Ok((sender, target))
}

fn parse_index(text: &str) -> Result<BTreeMap<u64, (u64, u64)>, StoreError> {
    let mut index = BTreeMap::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let mut parts = line.split(',').map(|p| p.trim().parse::<u64>());
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Ok(seq)), Some(Ok(offset)), Some(Ok(size)), None) => {
                index.insert(seq, (offset, size));
            }
            _ => {
                return Err(StoreError::Corrupted {
                    reason: format!("bad header line '{line}'"),
                });
            }
        }
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("fixgate-store-{}-{}", std::process::id(), name))
    }

    fn session() -> SessionId {
        SessionId::new("FIX.4.4", "SENDER", "TARGET")
    }

    #[test]
    fn test_session_file_prefix() {
        assert_eq!(session_file_prefix(&session()), "FIX.4.4-SENDER-TARGET");
        let id = SessionId::new("FIXT.1.1", "A/B", "C D").with_qualifier("q1");
        assert_eq!(session_file_prefix(&id), "FIXT.1.1-A_B-C_D-q1");
    }

    #[test]
    fn test_parse_seqnums_and_index() {
        assert_eq!(parse_seqnums("0000000012 : 0000000034").unwrap(), (12, 34));
        assert!(parse_seqnums("garbage").is_err());

        let index = parse_index("1,0,10\n2,10,7\n").unwrap();
        assert_eq!(index.get(&2), Some(&(10, 7)));
        assert!(parse_index("1,0\n").is_err());
    }

    #[tokio::test]
    async fn test_file_store_set_get() {
        let dir = temp_dir("set-get");
        let store = FileStore::open(&dir, &session()).await.unwrap();
        store.reset(Utc::now()).await.unwrap();

        store.set(5, b"raw\x01five").await.unwrap();
        store.set(6, b"six").await.unwrap();
        store.set(8, b"eight").await.unwrap();

        assert_eq!(store.get(5, 5).await.unwrap(), vec![Bytes::from_static(b"raw\x01five")]);
        let all = store.get(1, 0).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2], Bytes::from_static(b"eight"));
        assert!(store.get(9, 20).await.unwrap().is_empty());

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = temp_dir("reopen");
        let created = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        {
            let store = FileStore::open(&dir, &session()).await.unwrap();
            store.reset(created).await.unwrap();
            store.set(1, b"first").await.unwrap();
            store.incr_next_sender_seq_num().await.unwrap();
            store.set_next_target_seq_num(17).await.unwrap();
        }

        let store = FileStore::open(&dir, &session()).await.unwrap();
        assert_eq!(store.next_sender_seq_num(), 2);
        assert_eq!(store.next_target_seq_num(), 17);
        assert_eq!(store.creation_time(), created);
        assert_eq!(store.get(1, 1).await.unwrap(), vec![Bytes::from_static(b"first")]);

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_file_store_reset() {
        let dir = temp_dir("reset");
        let store = FileStore::open(&dir, &session()).await.unwrap();
        store.set(1, b"one").await.unwrap();
        store.set_next_sender_seq_num(2).await.unwrap();

        store.reset(Utc::now()).await.unwrap();
        assert_eq!(store.next_sender_seq_num(), 1);
        assert_eq!(store.next_target_seq_num(), 1);
        assert!(store.get(1, 100).await.unwrap().is_empty());

        store.set(1, b"again").await.unwrap();
        assert_eq!(store.get(1, 1).await.unwrap(), vec![Bytes::from_static(b"again")]);

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_file_store_offsets_after_failed_header_write() {
        let dir = temp_dir("header-failure");
        let store = FileStore::open(&dir, &session()).await.unwrap();
        store.reset(Utc::now()).await.unwrap();
        store.set(1, b"AAA").await.unwrap();

        // A directory in place of the index file makes the header append fail
        // after the body append succeeded.
        let header = store.paths.header.clone();
        fs::remove_file(&header).await.unwrap();
        fs::create_dir(&header).await.unwrap();
        assert!(matches!(
            store.set(2, b"BBBB").await,
            Err(StoreError::StoreFailed { seq_num: 2, .. })
        ));
        fs::remove_dir(&header).await.unwrap();

        store.set(3, b"CC").await.unwrap();
        assert_eq!(store.get(3, 3).await.unwrap(), vec![Bytes::from_static(b"CC")]);
        assert_eq!(store.get(1, 1).await.unwrap(), vec![Bytes::from_static(b"AAA")]);

        store.refresh().await.unwrap();
        assert_eq!(store.get(3, 3).await.unwrap(), vec![Bytes::from_static(b"CC")]);

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_store_concurrent_increments() {
        let dir = temp_dir("concurrent-incr");
        let store = Arc::new(FileStore::open(&dir, &session()).await.unwrap());
        store.reset(Utc::now()).await.unwrap();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    for _ in 0..25 {
                        store.incr_next_target_seq_num().await.unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(store.next_target_seq_num(), 101);

        let reopened = FileStore::open(&dir, &session()).await.unwrap();
        assert_eq!(reopened.next_target_seq_num(), 101);

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_file_store_refresh_reads_other_writer() {
        let dir = temp_dir("refresh");
        let reader = FileStore::open(&dir, &session()).await.unwrap();
        reader.reset(Utc::now()).await.unwrap();

        let writer = FileStoreFactory::new(&dir).create(&session()).await.unwrap();
        writer.set(1, b"shared").await.unwrap();
        writer.set_next_sender_seq_num(2).await.unwrap();

        assert_eq!(reader.next_sender_seq_num(), 1);
        reader.refresh().await.unwrap();
        assert_eq!(reader.next_sender_seq_num(), 2);
        assert_eq!(reader.get(1, 1).await.unwrap().len(), 1);

        let _ = fs::remove_dir_all(&dir).await;
    }
}
