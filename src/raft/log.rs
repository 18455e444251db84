//! Persistent Raft log: append-only binary entries plus `currentTerm` /
//! `votedFor`, written before any RPC depending on them is replied to or
//! sent (`spec.md` §4.I "Persistence").
//!
//! No module in the teacher corpus implements Raft (`examples/yijun-tang-
//! rudis` is a single-node server); this is grounded on `spec.md` §4.I's
//! own wire format directly: `<index:4><term:4><cmdLen:4><cmdBytes>` per
//! entry, big-endian, append-only, with conflict truncation overwriting the
//! suffix.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::RaftError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub command: Vec<u8>,
}

fn encode_entry(entry: &LogEntry) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12 + entry.command.len());
    buf.extend_from_slice(&(entry.index as u32).to_be_bytes());
    buf.extend_from_slice(&(entry.term as u32).to_be_bytes());
    buf.extend_from_slice(&(entry.command.len() as u32).to_be_bytes());
    buf.extend_from_slice(&entry.command);
    buf
}

/// An in-memory log backed by an append-only file. `entries[0]` is index 1
/// (index 0 is reserved as the "no previous entry" sentinel, matching the
/// Raft paper's 1-based indexing).
pub struct RaftLog {
    path: PathBuf,
    file: File,
    entries: Vec<LogEntry>,
}

impl RaftLog {
    pub fn open(path: &Path) -> Result<Self, RaftError> {
        let mut file = OpenOptions::new().create(true).read(true).append(true).open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let mut entries = Vec::new();
        let mut cursor = 0usize;
        while cursor + 12 <= bytes.len() {
            let index = u32::from_be_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as u64;
            let term = u32::from_be_bytes(bytes[cursor + 4..cursor + 8].try_into().unwrap()) as u64;
            let cmd_len = u32::from_be_bytes(bytes[cursor + 8..cursor + 12].try_into().unwrap()) as usize;
            let start = cursor + 12;
            if start + cmd_len > bytes.len() {
                return Err(RaftError::MalformedEntry("truncated command payload".into()));
            }
            let command = bytes[start..start + cmd_len].to_vec();
            entries.push(LogEntry { index, term, command });
            cursor = start + cmd_len;
        }
        Ok(Self { path: path.to_path_buf(), file, entries })
    }

    pub fn last_index(&self) -> u64 {
        self.entries.last().map(|e| e.index).unwrap_or(0)
    }

    pub fn last_term(&self) -> u64 {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    /// 1-based lookup; returns `None` for index 0 or out of range.
    pub fn get(&self, index: u64) -> Option<&LogEntry> {
        if index == 0 {
            return None;
        }
        self.entries.get((index - 1) as usize)
    }

    pub fn term_at(&self, index: u64) -> u64 {
        if index == 0 {
            0
        } else {
            self.get(index).map(|e| e.term).unwrap_or(0)
        }
    }

    /// Appends one entry, persisting it before returning
    /// (`spec.md` §4.I: "durably written before any RPC ... is replied to
    /// or sent").
    pub fn append(&mut self, term: u64, command: Vec<u8>) -> Result<u64, RaftError> {
        let index = self.last_index() + 1;
        let entry = LogEntry { index, term, command };
        self.file.write_all(&encode_entry(&entry))?;
        self.file.sync_all()?;
        self.entries.push(entry);
        Ok(index)
    }

    /// Truncates the suffix starting at `from_index` (inclusive), then
    /// rewrites the file from scratch — simplest way to guarantee the file
    /// matches `entries` exactly after a conflict resolution
    /// (`spec.md` §4.I: "truncation on conflict overwrites the suffix").
    pub fn truncate_from(&mut self, from_index: u64) -> Result<(), RaftError> {
        if from_index == 0 || from_index > self.last_index() {
            return Ok(());
        }
        self.entries.truncate((from_index - 1) as usize);
        self.rewrite_file()
    }

    fn rewrite_file(&mut self) -> Result<(), RaftError> {
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            for e in &self.entries {
                tmp.write_all(&encode_entry(e))?;
            }
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }

    /// Appends `entries`, replacing any conflicting suffix first (used by
    /// `AppendEntries` handling, `spec.md` §4.I step 3).
    pub fn append_entries_replacing_conflicts(&mut self, entries: &[LogEntry]) -> Result<(), RaftError> {
        for e in entries {
            if let Some(existing) = self.get(e.index) {
                if existing.term == e.term {
                    continue;
                }
                self.truncate_from(e.index)?;
            }
            if e.index != self.last_index() + 1 {
                // A gap would indicate a leader sending entries out of
                // order; reject rather than silently reindexing.
                return Err(RaftError::MalformedEntry(format!(
                    "entry index {} is not contiguous with log tail {}",
                    e.index,
                    self.last_index()
                )));
            }
            self.file.write_all(&encode_entry(e))?;
            self.file.sync_all()?;
            self.entries.push(e.clone());
        }
        Ok(())
    }
}

/// `currentTerm` / `votedFor`, rewritten as a whole on every change
/// (`spec.md` §4.I "Persistence"). Tiny and infrequent enough that a
/// full-file rewrite per change is simpler than incremental append.
pub struct TermState {
    path: PathBuf,
    pub current_term: u64,
    pub voted_for: Option<u64>,
}

impl TermState {
    pub fn open(path: &Path) -> Result<Self, RaftError> {
        if !path.exists() {
            let state = Self { path: path.to_path_buf(), current_term: 0, voted_for: None };
            state.persist()?;
            return Ok(state);
        }
        let mut file = File::open(path)?;
        let mut buf = [0u8; 16];
        file.read_exact(&mut buf)?;
        let current_term = u64::from_be_bytes(buf[0..8].try_into().unwrap());
        let voted_for_raw = i64::from_be_bytes(buf[8..16].try_into().unwrap());
        let voted_for = if voted_for_raw < 0 { None } else { Some(voted_for_raw as u64) };
        Ok(Self { path: path.to_path_buf(), current_term, voted_for })
    }

    pub fn persist(&self) -> Result<(), RaftError> {
        let mut file = File::create(&self.path)?;
        file.write_all(&self.current_term.to_be_bytes())?;
        let voted_raw: i64 = self.voted_for.map(|v| v as i64).unwrap_or(-1);
        file.write_all(&voted_raw.to_be_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

/// Seeks and truncates an already-open file to its logical length; used
/// only in tests that want to simulate a torn write.
#[cfg(test)]
fn truncate_to(file: &mut File, len: u64) -> std::io::Result<()> {
    file.set_len(len)?;
    file.seek(SeekFrom::Start(len))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_reopen_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raft.log");
        {
            let mut log = RaftLog::open(&path).unwrap();
            log.append(1, b"SET a 1".to_vec()).unwrap();
            log.append(1, b"SET b 2".to_vec()).unwrap();
        }
        let reopened = RaftLog::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.last_term(), 1);
        assert_eq!(reopened.get(1).unwrap().command, b"SET a 1");
    }

    #[test]
    fn truncate_from_drops_suffix_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raft.log");
        let mut log = RaftLog::open(&path).unwrap();
        log.append(1, b"a".to_vec()).unwrap();
        log.append(1, b"b".to_vec()).unwrap();
        log.append(2, b"c".to_vec()).unwrap();
        log.truncate_from(2).unwrap();
        assert_eq!(log.len(), 1);

        let reopened = RaftLog::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn term_state_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("term");
        {
            let mut t = TermState::open(&path).unwrap();
            t.current_term = 7;
            t.voted_for = Some(3);
            t.persist().unwrap();
        }
        let reopened = TermState::open(&path).unwrap();
        assert_eq!(reopened.current_term, 7);
        assert_eq!(reopened.voted_for, Some(3));
    }

    #[test]
    fn truncate_to_helper_is_exercised() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"0123456789").unwrap();
        truncate_to(&mut f, 4).unwrap();
        drop(f);
        assert_eq!(std::fs::read(&path).unwrap().len(), 4);
    }
}
