//! Append-only commit log.
//!
//! One frame per committed write transaction:
//!
//! ```text
//! len:      u32 LE   payload length
//! checksum: u64 LE   xxh3_64(payload)
//! payload:
//!   version: u64 LE
//!   kind:    u8       0 = commit, 1 = checkpoint
//!   n_ops:   u32 LE
//!   ops:     n_ops x op
//!
//! op:
//!   tag:  u8          1 = put, 2 = delete, 3 = create store, 4 = drop store
//!   name: u16 LE len + bytes
//!   put:    key (u32 LE len + bytes), value (u32 LE len + bytes)
//!   delete: key (u32 LE len + bytes)
//!   create: comparator name (u16 LE len + bytes)
//! ```
//!
//! Replay stops at the first short or mismatching frame; the file is then
//! truncated back to the last good frame so later appends stay readable.
//!
//! A checkpoint frame carries the complete state of one version. It is only
//! ever the first frame: [`CommitLog::rewrite`] replaces the whole file with
//! it, so the log stays proportional to the live data rather than to the
//! number of commits.
//!
//! A failed append is cut back off the file. If even that fails the log is
//! poisoned and refuses further appends.

use crate::error::{KvError, KvResult};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use xxhash_rust::xxh3::xxh3_64;

const FRAME_HEADER_LEN: usize = 12;

const TAG_PUT: u8 = 1;
const TAG_DELETE: u8 = 2;
const TAG_CREATE: u8 = 3;
const TAG_DROP: u8 = 4;

const KIND_COMMIT: u8 = 0;
const KIND_CHECKPOINT: u8 = 1;

/// One mutation inside a committed transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogOp {
    Put {
        store: String,
        key: Box<[u8]>,
        value: Box<[u8]>,
    },
    Delete {
        store: String,
        key: Box<[u8]>,
    },
    CreateStore {
        store: String,
        comparator: String,
    },
    DropStore {
        store: String,
    },
}

/// All mutations of one commit, or the full state of a checkpointed version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub version: u64,
    /// Replay starts from empty state at this record instead of applying it
    /// on top of the previous version.
    pub checkpoint: bool,
    pub ops: Vec<LogOp>,
}

impl LogRecord {
    pub fn commit(version: u64, ops: Vec<LogOp>) -> Self {
        Self {
            version,
            checkpoint: false,
            ops,
        }
    }

    pub fn checkpoint(version: u64, ops: Vec<LogOp>) -> Self {
        Self {
            version,
            checkpoint: true,
            ops,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(17 + self.ops.len() * 48);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.push(if self.checkpoint {
            KIND_CHECKPOINT
        } else {
            KIND_COMMIT
        });
        buf.extend_from_slice(&(self.ops.len() as u32).to_le_bytes());
        for op in &self.ops {
            match op {
                LogOp::Put { store, key, value } => {
                    buf.push(TAG_PUT);
                    put_short(&mut buf, store.as_bytes());
                    put_long(&mut buf, key);
                    put_long(&mut buf, value);
                }
                LogOp::Delete { store, key } => {
                    buf.push(TAG_DELETE);
                    put_short(&mut buf, store.as_bytes());
                    put_long(&mut buf, key);
                }
                LogOp::CreateStore { store, comparator } => {
                    buf.push(TAG_CREATE);
                    put_short(&mut buf, store.as_bytes());
                    put_short(&mut buf, comparator.as_bytes());
                }
                LogOp::DropStore { store } => {
                    buf.push(TAG_DROP);
                    put_short(&mut buf, store.as_bytes());
                }
            }
        }
        buf
    }

    pub fn decode(payload: &[u8]) -> KvResult<Self> {
        let mut r = Reader::new(payload);
        let version = r.u64()?;
        let checkpoint = match r.u8()? {
            KIND_COMMIT => false,
            KIND_CHECKPOINT => true,
            other => {
                return Err(KvError::Corrupt(format!("unknown log record kind {}", other)));
            }
        };
        let n_ops = r.u32()? as usize;
        let mut ops = Vec::with_capacity(n_ops.min(1 << 16));
        for _ in 0..n_ops {
            let tag = r.u8()?;
            let store = r.short_str()?;
            let op = match tag {
                TAG_PUT => LogOp::Put {
                    store,
                    key: r.long_bytes()?.into(),
                    value: r.long_bytes()?.into(),
                },
                TAG_DELETE => LogOp::Delete {
                    store,
                    key: r.long_bytes()?.into(),
                },
                TAG_CREATE => LogOp::CreateStore {
                    store,
                    comparator: r.short_str()?,
                },
                TAG_DROP => LogOp::DropStore { store },
                other => {
                    return Err(KvError::Corrupt(format!("unknown log op tag {}", other)));
                }
            };
            ops.push(op);
        }
        if !r.is_empty() {
            return Err(KvError::Corrupt(format!(
                "{} trailing bytes in log record for version {}",
                r.remaining(),
                version
            )));
        }
        Ok(Self {
            version,
            checkpoint,
            ops,
        })
    }

    pub(crate) fn frame(&self) -> Vec<u8> {
        let payload = self.encode();
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&xxh3_64(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame
    }
}

fn put_short(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn put_long(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> KvResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(KvError::Corrupt(format!(
                "log record truncated: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> KvResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> KvResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> KvResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> KvResult<u64> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(arr))
    }

    fn short_str(&mut self) -> KvResult<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| KvError::Corrupt(format!("invalid UTF-8 name in log: {}", e)))
    }

    fn long_bytes(&mut self) -> KvResult<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

// ============================================================================
// CommitLog
// ============================================================================

/// The on-disk commit log of one engine.
pub struct CommitLog {
    path: PathBuf,
    file: File,
    sync: bool,
    frames: u64,
    /// Byte length of the intact frames.
    len: u64,
    poisoned: Option<String>,
    #[cfg(test)]
    faults: Faults,
}

/// Injected I/O failures for exercising the rollback paths.
#[cfg(test)]
#[derive(Default)]
struct Faults {
    fail_sync: bool,
    fail_truncate: bool,
}

#[cfg(test)]
impl Faults {
    fn trip(armed: bool, what: &str) -> io::Result<()> {
        if armed {
            return Err(io::Error::other(format!("injected {} failure", what)));
        }
        Ok(())
    }
}

impl CommitLog {
    /// Open (or create) the log at `path` and return it together with every
    /// intact record, in commit order.
    pub fn open(path: impl AsRef<Path>, sync: bool) -> KvResult<(Self, Vec<LogRecord>)> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut records = Vec::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            match read_frame(&bytes[pos..]) {
                Some((payload, frame_len)) => {
                    records.push(LogRecord::decode(payload)?);
                    pos += frame_len;
                }
                None => break,
            }
        }

        if pos < bytes.len() {
            tracing::warn!(
                path = %path.display(),
                good_bytes = pos,
                dropped_bytes = bytes.len() - pos,
                "commit log has a torn or corrupt tail; truncating"
            );
            file.set_len(pos as u64)?;
            file.seek(SeekFrom::End(0))?;
        }

        tracing::debug!(
            path = %path.display(),
            records = records.len(),
            bytes = pos,
            "commit log opened"
        );

        let frames = records.len() as u64;
        Ok((
            Self {
                path,
                file,
                sync,
                frames,
                len: pos as u64,
                poisoned: None,
                #[cfg(test)]
                faults: Faults::default(),
            },
            records,
        ))
    }

    /// Append one committed transaction. On failure the partial frame is
    /// removed again, so the file still ends on a frame boundary.
    pub fn append(&mut self, record: &LogRecord) -> KvResult<()> {
        if let Some(reason) = &self.poisoned {
            return Err(KvError::Poisoned(reason.clone()));
        }
        let frame = record.frame();
        if let Err(err) = self.write_frame(&frame) {
            self.roll_back();
            return Err(err.into());
        }
        self.len += frame.len() as u64;
        self.frames += 1;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.file.write_all(frame)?;
        #[cfg(test)]
        Faults::trip(self.faults.fail_sync, "sync")?;
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        #[cfg(test)]
        Faults::trip(self.faults.fail_truncate, "truncate")?;
        self.file.set_len(len)?;
        self.file.seek(SeekFrom::End(0))?;
        Ok(())
    }

    fn roll_back(&mut self) {
        if let Err(err) = self.truncate_to(self.len) {
            let reason = format!(
                "could not cut a failed append off {}: {}",
                self.path.display(),
                err
            );
            tracing::error!(path = %self.path.display(), error = %err, "commit log poisoned");
            self.poisoned = Some(reason);
        }
    }

    /// Replace the whole log with a single checkpoint frame.
    ///
    /// The frame is written to a sibling file, synced and renamed over the
    /// log. A failure before the rename leaves the current log in use; a
    /// failure after it poisons the log.
    pub fn rewrite(&mut self, record: &LogRecord) -> KvResult<()> {
        if let Some(reason) = &self.poisoned {
            return Err(KvError::Poisoned(reason.clone()));
        }
        let frame = record.frame();
        let tmp = self.path.with_extension("log.tmp");
        let staged = (|| {
            let mut f = File::create(&tmp)?;
            f.write_all(&frame)?;
            f.sync_all()
        })();
        if let Err(err) = staged {
            let _ = std::fs::remove_file(&tmp);
            return Err(err.into());
        }
        std::fs::rename(&tmp, &self.path)?;

        let reopened = OpenOptions::new().read(true).append(true).open(&self.path);
        match reopened {
            Ok(file) => {
                if let Some(dir) = self.path.parent() {
                    if let Err(err) = File::open(dir).and_then(|d| d.sync_all()) {
                        tracing::warn!(dir = %dir.display(), error = %err, "directory sync failed");
                    }
                }
                self.file = file;
                self.len = frame.len() as u64;
                self.frames = 1;
                tracing::debug!(
                    path = %self.path.display(),
                    version = record.version,
                    bytes = self.len,
                    "commit log checkpointed"
                );
                Ok(())
            }
            Err(err) => {
                self.poisoned = Some(format!(
                    "log {} replaced but not reopened: {}",
                    self.path.display(),
                    err
                ));
                Err(err.into())
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of frames in the file (replayed + appended).
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Byte length of the intact frames.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }
}

/// Returns the payload and total frame length, or `None` for a short or
/// checksum-mismatching frame.
fn read_frame(buf: &[u8]) -> Option<(&[u8], usize)> {
    if buf.len() < FRAME_HEADER_LEN {
        return None;
    }
    let len = u32::from_le_bytes(buf[0..4].try_into().ok()?) as usize;
    let checksum = u64::from_le_bytes(buf[4..12].try_into().ok()?);
    let end = FRAME_HEADER_LEN.checked_add(len)?;
    if buf.len() < end {
        return None;
    }
    let payload = &buf[FRAME_HEADER_LEN..end];
    if xxh3_64(payload) != checksum {
        return None;
    }
    Some((payload, end))
}
