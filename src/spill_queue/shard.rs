use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::error::Result;
use crate::model::UrlRecord;
use crate::utils::constants::{SPILL_COMPACT_BYTES, SPILL_COMPACT_FRACTION};

use super::codec::{encode_batch, read_batch, BatchRead};

/// One append-only shard file plus its independent read cursor. A single
/// writer (under `inner`'s mutex) owns both the write and read file handles,
/// matching the teacher's one-writer-per-resource discipline used for the
/// atomic-rename file writes elsewhere in the tree.
///
/// The read cursor is persisted to a small `.cursor` sidecar (tmp-write +
/// rename, same discipline `StorageSink` uses for its batch files) so a
/// restart doesn't re-deliver batches already popped in a prior run.
pub struct SpillShard {
    path: PathBuf,
    cursor_path: PathBuf,
    inner: Mutex<ShardInner>,
}

struct ShardInner {
    write_file: File,
    read_file: File,
    read_pos: u64,
    consumed_bytes: u64,
}

impl SpillShard {
    pub fn open(path: PathBuf) -> Result<Self> {
        let write_file = OpenOptions::new().create(true).append(true).open(&path)?;
        let read_file = OpenOptions::new().read(true).open(&path)?;
        let cursor_path = path.with_extension("cursor");
        let file_len = read_file.metadata()?.len();
        let read_pos = load_cursor(&cursor_path).filter(|&pos| pos <= file_len).unwrap_or(0);
        Ok(Self {
            path,
            cursor_path,
            inner: Mutex::new(ShardInner {
                write_file,
                read_file,
                read_pos,
                consumed_bytes: 0,
            }),
        })
    }

    /// Counts records from the persisted read cursor to EOF without
    /// consuming them — used once at `SpillQueue::open` to seed an accurate
    /// `size()` across a restart (spec.md §4.1 `size()`).
    pub fn count_unconsumed(&self) -> Result<u64> {
        let guard = self.inner.lock();
        let file_len = guard.read_file.metadata()?.len();
        if guard.read_pos >= file_len {
            return Ok(0);
        }
        let mut buf = vec![0u8; (file_len - guard.read_pos) as usize];
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(guard.read_pos))?;
        file.read_exact(&mut buf)?;

        let mut count = 0u64;
        let mut pos = 0usize;
        loop {
            match read_batch(&buf[pos..]) {
                BatchRead::Ok(records, consumed) => {
                    count += records.len() as u64;
                    pos += consumed as usize;
                }
                BatchRead::Corrupt(consumed) => {
                    pos += consumed as usize;
                }
                BatchRead::Incomplete => break,
            }
            if pos >= buf.len() {
                break;
            }
        }
        Ok(count)
    }

    /// Appends one framed batch. A single `write_all` keeps the batch atomic
    /// with respect to concurrent readers on the same file (POSIX append
    /// semantics guarantee the bytes land contiguously).
    pub fn push(&self, records: &[UrlRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let framed = encode_batch(records);
        let mut guard = self.inner.lock();
        guard.write_file.write_all(&framed)?;
        guard.write_file.flush()?;
        Ok(())
    }

    /// Reads and decodes the next batch past the shard's read cursor, if
    /// any. Corrupt batches are skipped (logged) rather than aborting the
    /// shard, per spec.md §4.1.
    pub fn pop_next_batch(&self) -> Result<Option<Vec<UrlRecord>>> {
        let mut guard = self.inner.lock();
        loop {
            let file_len = guard.read_file.metadata()?.len();
            if guard.read_pos >= file_len {
                return Ok(None);
            }

            let remaining = (file_len - guard.read_pos).min(64 * 1024 * 1024) as usize;
            let mut buf = vec![0u8; remaining];
            guard.read_file.seek(SeekFrom::Start(guard.read_pos))?;
            guard.read_file.read_exact(&mut buf)?;

            match read_batch(&buf) {
                BatchRead::Ok(records, consumed) => {
                    guard.read_pos += consumed;
                    guard.consumed_bytes += consumed;
                    self.maybe_compact(&mut guard)?;
                    store_cursor(&self.cursor_path, guard.read_pos);
                    return Ok(Some(records));
                }
                BatchRead::Corrupt(consumed) => {
                    log::warn!("{}: skipping corrupt batch ({consumed} bytes)", self.path.display());
                    guard.read_pos += consumed;
                    guard.consumed_bytes += consumed;
                    store_cursor(&self.cursor_path, guard.read_pos);
                    continue;
                }
                BatchRead::Incomplete => return Ok(None),
            }
        }
    }

    fn maybe_compact(&self, guard: &mut ShardInner) -> Result<()> {
        let file_len = guard.read_file.metadata()?.len();
        if file_len == 0 {
            return Ok(());
        }
        let fraction = guard.consumed_bytes as f64 / file_len as f64;
        if guard.consumed_bytes < SPILL_COMPACT_BYTES && fraction < SPILL_COMPACT_FRACTION {
            return Ok(());
        }

        let mut tail = Vec::new();
        guard.read_file.seek(SeekFrom::Start(guard.read_pos))?;
        guard.read_file.read_to_end(&mut tail)?;

        let tmp_path = self.path.with_extension("compact.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&tail)?;
            tmp.flush()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        guard.write_file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        guard.read_file = OpenOptions::new().read(true).open(&self.path)?;
        guard.read_pos = 0;
        guard.consumed_bytes = 0;
        store_cursor(&self.cursor_path, 0);
        log::debug!("{}: compacted, {} bytes retained", self.path.display(), tail.len());
        Ok(())
    }

    /// Best-effort unconsumed byte count (spec.md §4.1 `size()` is approximate).
    pub fn approx_unconsumed_bytes(&self) -> u64 {
        let guard = self.inner.lock();
        guard
            .read_file
            .metadata()
            .map(|m| m.len().saturating_sub(guard.read_pos))
            .unwrap_or(0)
    }
}

/// Reads a persisted read cursor (8-byte LE `u64`); absent or malformed
/// sidecars are treated as "start from zero" rather than an error.
fn load_cursor(cursor_path: &std::path::Path) -> Option<u64> {
    let bytes = std::fs::read(cursor_path).ok()?;
    let arr: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
    Some(u64::from_le_bytes(arr))
}

/// Persists the read cursor via tmp-write + rename so a crash mid-write
/// never leaves a torn cursor file behind. Best-effort: a failure here only
/// risks re-delivering already-popped batches on the next restart, not data
/// loss, so it's logged rather than propagated.
fn store_cursor(cursor_path: &std::path::Path, pos: u64) {
    let tmp_path = cursor_path.with_extension("cursor.tmp");
    let result = (|| -> std::io::Result<()> {
        std::fs::write(&tmp_path, pos.to_le_bytes())?;
        std::fs::rename(&tmp_path, cursor_path)?;
        Ok(())
    })();
    if let Err(e) = result {
        log::warn!("{}: failed to persist spill read cursor: {e}", cursor_path.display());
    }
}
