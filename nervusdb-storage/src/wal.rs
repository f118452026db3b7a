//! Write-ahead log: append-only, CRC-framed, source of truth between flushes.
//!
//! Layout: a 12-byte header (magic + version) followed by records of
//! `[len: u32][crc32: u32][body]` where the body is a tag byte plus payload.
//! A record whose length or checksum cannot be read is a torn tail: replay
//! stops there and keeps everything before it.
//!
//! Replay resolves batch outcomes. Records inside an aborted or uncommitted
//! batch are dropped; committed batches are kept, nested commits merge into
//! their parent frame. A bounded LRU of applied transaction ids rejects a
//! commit that was already applied on a prior run.

use crate::property::{decode_bag, encode_bag};
use crate::{Error, Result, WAL_MAGIC};
use crc32fast::Hasher;
use nervusdb_api::{Id, PropertyBag, TripleKey};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const WAL_HEADER_LEN: u64 = 12;
pub const WAL_VERSION: u32 = 1;

const MAX_WAL_RECORD_LEN: u32 = 16 * 1024 * 1024;

const TAG_ADD_FACT: u8 = 1;
const TAG_DELETE_FACT: u8 = 2;
const TAG_SET_NODE_PROPS: u8 = 3;
const TAG_SET_EDGE_PROPS: u8 = 4;
const TAG_BATCH_BEGIN: u8 = 5;
const TAG_BATCH_COMMIT: u8 = 6;
const TAG_BATCH_ABORT: u8 = 7;

#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    AddFact {
        subject: String,
        predicate: String,
        object: String,
    },
    DeleteFact {
        subject: String,
        predicate: String,
        object: String,
    },
    SetNodeProps {
        node: Id,
        bag: PropertyBag,
    },
    SetEdgeProps {
        edge: TripleKey,
        bag: PropertyBag,
    },
    BatchBegin {
        tx_id: Option<String>,
        session_id: Option<String>,
    },
    BatchCommit {
        tx_id: Option<String>,
    },
    BatchAbort {
        tx_id: Option<String>,
    },
}

impl WalRecord {
    fn tag(&self) -> u8 {
        match self {
            WalRecord::AddFact { .. } => TAG_ADD_FACT,
            WalRecord::DeleteFact { .. } => TAG_DELETE_FACT,
            WalRecord::SetNodeProps { .. } => TAG_SET_NODE_PROPS,
            WalRecord::SetEdgeProps { .. } => TAG_SET_EDGE_PROPS,
            WalRecord::BatchBegin { .. } => TAG_BATCH_BEGIN,
            WalRecord::BatchCommit { .. } => TAG_BATCH_COMMIT,
            WalRecord::BatchAbort { .. } => TAG_BATCH_ABORT,
        }
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.push(self.tag());
        match self {
            WalRecord::AddFact {
                subject,
                predicate,
                object,
            }
            | WalRecord::DeleteFact {
                subject,
                predicate,
                object,
            } => {
                write_str(&mut out, subject);
                write_str(&mut out, predicate);
                write_str(&mut out, object);
            }
            WalRecord::SetNodeProps { node, bag } => {
                out.extend_from_slice(&node.to_le_bytes());
                encode_bag(bag, &mut out);
            }
            WalRecord::SetEdgeProps { edge, bag } => {
                out.extend_from_slice(&edge.s.to_le_bytes());
                out.extend_from_slice(&edge.p.to_le_bytes());
                out.extend_from_slice(&edge.o.to_le_bytes());
                encode_bag(bag, &mut out);
            }
            WalRecord::BatchBegin { tx_id, session_id } => {
                write_opt_str(&mut out, tx_id.as_deref());
                write_opt_str(&mut out, session_id.as_deref());
            }
            WalRecord::BatchCommit { tx_id } | WalRecord::BatchAbort { tx_id } => {
                write_opt_str(&mut out, tx_id.as_deref());
            }
        }
        out
    }

    fn decode_body(body: &[u8]) -> Result<Self> {
        let tag = *body.first().ok_or(Error::WalProtocol("empty record body"))?;
        let mut pos = 1usize;
        let record = match tag {
            TAG_ADD_FACT | TAG_DELETE_FACT => {
                let subject = read_str(body, &mut pos)?;
                let predicate = read_str(body, &mut pos)?;
                let object = read_str(body, &mut pos)?;
                if tag == TAG_ADD_FACT {
                    WalRecord::AddFact {
                        subject,
                        predicate,
                        object,
                    }
                } else {
                    WalRecord::DeleteFact {
                        subject,
                        predicate,
                        object,
                    }
                }
            }
            TAG_SET_NODE_PROPS => {
                let raw = read_exact(body, &mut pos, 4)?;
                let node = Id::from_le_bytes(raw.try_into().unwrap());
                let bag = decode_bag(body, &mut pos)?;
                WalRecord::SetNodeProps { node, bag }
            }
            TAG_SET_EDGE_PROPS => {
                let raw = read_exact(body, &mut pos, 12)?;
                let edge = TripleKey::new(
                    u32::from_le_bytes(raw[0..4].try_into().unwrap()),
                    u32::from_le_bytes(raw[4..8].try_into().unwrap()),
                    u32::from_le_bytes(raw[8..12].try_into().unwrap()),
                );
                let bag = decode_bag(body, &mut pos)?;
                WalRecord::SetEdgeProps { edge, bag }
            }
            TAG_BATCH_BEGIN => {
                let tx_id = read_opt_str(body, &mut pos)?;
                let session_id = read_opt_str(body, &mut pos)?;
                WalRecord::BatchBegin { tx_id, session_id }
            }
            TAG_BATCH_COMMIT => WalRecord::BatchCommit {
                tx_id: read_opt_str(body, &mut pos)?,
            },
            TAG_BATCH_ABORT => WalRecord::BatchAbort {
                tx_id: read_opt_str(body, &mut pos)?,
            },
            _ => return Err(Error::WalProtocol("unknown record type")),
        };
        if pos != body.len() {
            return Err(Error::WalProtocol("trailing bytes in record body"));
        }
        Ok(record)
    }
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn write_opt_str(out: &mut Vec<u8>, s: Option<&str>) {
    match s {
        Some(s) => {
            out.push(1);
            write_str(out, s);
        }
        None => out.push(0),
    }
}

fn read_exact<'a>(body: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= body.len())
        .ok_or(Error::WalProtocol("truncated record payload"))?;
    let raw = &body[*pos..end];
    *pos = end;
    Ok(raw)
}

fn read_str(body: &[u8], pos: &mut usize) -> Result<String> {
    let raw = read_exact(body, pos, 4)?;
    let len = u32::from_le_bytes(raw.try_into().unwrap()) as usize;
    let raw = read_exact(body, pos, len)?;
    String::from_utf8(raw.to_vec()).map_err(|_| Error::WalProtocol("invalid utf-8 in record"))
}

fn read_opt_str(body: &[u8], pos: &mut usize) -> Result<Option<String>> {
    let flag = read_exact(body, pos, 1)?[0];
    match flag {
        0 => Ok(None),
        1 => Ok(Some(read_str(body, pos)?)),
        _ => Err(Error::WalProtocol("invalid option flag")),
    }
}

/// One logical mutation that survived batch-outcome resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayOp {
    Add(String, String, String),
    Delete(String, String, String),
    NodeProps(Id, PropertyBag),
    EdgeProps(TripleKey, PropertyBag),
}

/// Mutations to re-apply after a restart, in record order, plus the
/// transaction ids whose commits were encountered for the first time.
#[derive(Debug, Default)]
pub struct ReplayState {
    pub ops: Vec<ReplayOp>,
    pub committed_tx_ids: Vec<String>,
    pub records: u64,
}

impl ReplayState {
    pub fn adds(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.ops.iter().filter_map(|op| match op {
            ReplayOp::Add(s, p, o) => Some((s.as_str(), p.as_str(), o.as_str())),
            _ => None,
        })
    }

    pub fn deletes(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.ops.iter().filter_map(|op| match op {
            ReplayOp::Delete(s, p, o) => Some((s.as_str(), p.as_str(), o.as_str())),
            _ => None,
        })
    }

    pub fn node_props(&self) -> impl Iterator<Item = (Id, &PropertyBag)> {
        self.ops.iter().filter_map(|op| match op {
            ReplayOp::NodeProps(node, bag) => Some((*node, bag)),
            _ => None,
        })
    }

    pub fn edge_props(&self) -> impl Iterator<Item = (TripleKey, &PropertyBag)> {
        self.ops.iter().filter_map(|op| match op {
            ReplayOp::EdgeProps(edge, bag) => Some((*edge, bag)),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Bounded LRU of applied transaction ids, persisted across runs so replay
/// can reject a commit it already applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxIdLru {
    capacity: usize,
    order: VecDeque<String>,
    #[serde(skip)]
    seen: HashSet<String>,
}

impl Default for TxIdLru {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl TxIdLru {
    pub const DEFAULT_CAPACITY: usize = 1_000;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.seen.contains(tx_id)
    }

    pub fn insert(&mut self, tx_id: String) {
        if self.seen.contains(&tx_id) {
            return;
        }
        if self.order.len() == self.capacity
            && let Some(evicted) = self.order.pop_front()
        {
            self.seen.remove(&evicted);
        }
        self.seen.insert(tx_id.clone());
        self.order.push_back(tx_id);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Restores the lookup set after deserialization.
    pub fn rebuild_index(&mut self) {
        self.seen = self.order.iter().cloned().collect();
    }
}

#[derive(Debug)]
pub struct Wal {
    path: PathBuf,
    file: File,
}

impl Wal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            let mut header = [0u8; WAL_HEADER_LEN as usize];
            header[0..8].copy_from_slice(&WAL_MAGIC);
            header[8..12].copy_from_slice(&WAL_VERSION.to_le_bytes());
            file.write_all(&header)?;
            file.sync_data()?;
        } else {
            if len < WAL_HEADER_LEN {
                return Err(Error::Corrupted("wal shorter than header"));
            }
            let mut header = [0u8; WAL_HEADER_LEN as usize];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut header)?;
            if header[0..8] != WAL_MAGIC {
                return Err(Error::InvalidMagic);
            }
            let version = u32::from_le_bytes(header[8..12].try_into().unwrap());
            if version != WAL_VERSION {
                return Err(Error::Corrupted("unsupported wal version"));
            }
        }
        Ok(Self { path, file })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when no record follows the header. Consulted by the
    /// lockless-read refusal at open.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.file.metadata()?.len() <= WAL_HEADER_LEN)
    }

    /// Appends one record and flushes it to the OS. Durability policy (fsync
    /// per record or per commit) is the caller's.
    pub fn append(&mut self, record: &WalRecord) -> Result<u64> {
        let body = record.encode_body();
        let len = u32::try_from(body.len()).map_err(|_| Error::WalRecordTooLarge(u32::MAX))?;
        if len > MAX_WAL_RECORD_LEN {
            return Err(Error::WalRecordTooLarge(len));
        }
        let crc = crc32(&body);

        let offset = self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(&crc.to_le_bytes())?;
        self.file.write_all(&body)?;
        self.file.flush()?;
        Ok(offset)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Truncates back to the header after a successful flush.
    pub fn reset(&mut self) -> Result<()> {
        self.file.set_len(WAL_HEADER_LEN)?;
        self.file.seek(SeekFrom::End(0))?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Replays the log, resolving batch outcomes. `applied` filters out
    /// commits whose transaction id was already applied on a prior run.
    pub fn replay(&self, applied: &TxIdLru) -> Result<ReplayState> {
        let mut reader = WalReader::open(&self.path)?;
        let mut state = ReplayState::default();

        // Stack of open batch frames; the bottom sink is the committed output.
        let mut frames: Vec<(Option<String>, Vec<ReplayOp>)> = Vec::new();

        while let Some((offset, record)) = reader.next_record()? {
            state.records += 1;
            match record {
                WalRecord::BatchBegin { tx_id, .. } => {
                    frames.push((tx_id, Vec::new()));
                }
                WalRecord::BatchCommit { tx_id } => {
                    let Some((begin_tx, ops)) = frames.pop() else {
                        warn!(offset, "commit without matching begin; ignoring");
                        continue;
                    };
                    let tx_id = tx_id.or(begin_tx);
                    if let Some(id) = &tx_id
                        && applied.contains(id)
                    {
                        warn!(tx_id = %id, "skipping already-applied transaction during replay");
                        continue;
                    }
                    if let Some(id) = tx_id {
                        state.committed_tx_ids.push(id);
                    }
                    match frames.last_mut() {
                        Some((_, parent)) => parent.extend(ops),
                        None => state.ops.extend(ops),
                    }
                }
                WalRecord::BatchAbort { .. } => {
                    if frames.pop().is_none() {
                        warn!(offset, "abort without matching begin; ignoring");
                    }
                }
                other => {
                    let op = match other {
                        WalRecord::AddFact {
                            subject,
                            predicate,
                            object,
                        } => ReplayOp::Add(subject, predicate, object),
                        WalRecord::DeleteFact {
                            subject,
                            predicate,
                            object,
                        } => ReplayOp::Delete(subject, predicate, object),
                        WalRecord::SetNodeProps { node, bag } => ReplayOp::NodeProps(node, bag),
                        WalRecord::SetEdgeProps { edge, bag } => ReplayOp::EdgeProps(edge, bag),
                        WalRecord::BatchBegin { .. }
                        | WalRecord::BatchCommit { .. }
                        | WalRecord::BatchAbort { .. } => unreachable!(),
                    };
                    match frames.last_mut() {
                        Some((_, frame)) => frame.push(op),
                        None => state.ops.push(op),
                    }
                }
            }
        }

        if !frames.is_empty() {
            warn!(
                open_batches = frames.len(),
                "dropping records of unfinished batches found in wal"
            );
        }
        Ok(state)
    }
}

struct WalReader {
    file: File,
    offset: u64,
}

impl WalReader {
    fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).open(path)?;
        file.seek(SeekFrom::Start(WAL_HEADER_LEN))?;
        Ok(Self {
            file,
            offset: WAL_HEADER_LEN,
        })
    }

    fn next_record(&mut self) -> Result<Option<(u64, WalRecord)>> {
        let record_offset = self.offset;

        let Some(len) = self.try_read_u32()? else {
            return Ok(None);
        };
        if len > MAX_WAL_RECORD_LEN {
            warn!(
                offset = record_offset,
                len, "implausible record length; treating as torn tail"
            );
            return Ok(None);
        }
        let Some(crc) = self.try_read_u32()? else {
            return Ok(None);
        };

        let mut body = vec![0u8; len as usize];
        if let Err(e) = self.file.read_exact(&mut body) {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(None);
            }
            return Err(Error::Io(e));
        }

        if crc32(&body) != crc {
            // A torn final record is expected after a crash; stop here and
            // keep everything already replayed.
            warn!(
                offset = record_offset,
                "wal checksum mismatch; truncating replay at torn tail"
            );
            return Ok(None);
        }

        self.offset += 4 + 4 + u64::from(len);
        match WalRecord::decode_body(&body) {
            Ok(record) => Ok(Some((record_offset, record))),
            Err(e) => {
                // Checksum passed but the body is not a record we know:
                // written by a newer build or damaged in place. Keep what
                // replayed so far.
                warn!(offset = record_offset, error = %e, "undecodable wal record; stopping replay");
                Ok(None)
            }
        }
    }

    fn try_read_u32(&mut self) -> Result<Option<u32>> {
        let mut buf = [0u8; 4];
        match self.file.read_exact(&mut buf) {
            Ok(()) => Ok(Some(u32::from_le_bytes(buf))),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nervusdb_api::PropertyValue;
    use tempfile::tempdir;

    fn add(s: &str, p: &str, o: &str) -> WalRecord {
        WalRecord::AddFact {
            subject: s.into(),
            predicate: p.into(),
            object: o.into(),
        }
    }

    #[test]
    fn record_bodies_roundtrip() {
        let mut bag = PropertyBag::new();
        bag.insert("k".into(), PropertyValue::Int(1));
        let records = [
            add("a", "b", "c"),
            WalRecord::DeleteFact {
                subject: "a".into(),
                predicate: "b".into(),
                object: "c".into(),
            },
            WalRecord::SetNodeProps { node: 7, bag: bag.clone() },
            WalRecord::SetEdgeProps {
                edge: TripleKey::new(1, 2, 3),
                bag,
            },
            WalRecord::BatchBegin {
                tx_id: Some("tx-1".into()),
                session_id: None,
            },
            WalRecord::BatchCommit { tx_id: Some("tx-1".into()) },
            WalRecord::BatchAbort { tx_id: None },
        ];
        for record in records {
            let body = record.encode_body();
            assert_eq!(WalRecord::decode_body(&body).unwrap(), record);
        }
    }

    #[test]
    fn replay_keeps_toplevel_records() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("x.wal")).unwrap();
        wal.append(&add("a", "knows", "b")).unwrap();
        wal.append(&WalRecord::DeleteFact {
            subject: "a".into(),
            predicate: "knows".into(),
            object: "b".into(),
        })
        .unwrap();
        wal.sync().unwrap();

        let state = wal.replay(&TxIdLru::default()).unwrap();
        assert_eq!(state.ops.len(), 2);
        assert_eq!(state.adds().count(), 1);
        assert_eq!(state.deletes().count(), 1);
    }

    #[test]
    fn replay_drops_aborted_and_unfinished_batches() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("x.wal")).unwrap();

        wal.append(&WalRecord::BatchBegin { tx_id: None, session_id: None })
            .unwrap();
        wal.append(&add("a", "r", "b")).unwrap();
        wal.append(&WalRecord::BatchAbort { tx_id: None }).unwrap();

        wal.append(&WalRecord::BatchBegin { tx_id: None, session_id: None })
            .unwrap();
        wal.append(&add("c", "r", "d")).unwrap();
        // No commit: the process died here.
        wal.sync().unwrap();

        let state = wal.replay(&TxIdLru::default()).unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn replay_merges_nested_commit_into_parent() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("x.wal")).unwrap();

        wal.append(&WalRecord::BatchBegin { tx_id: None, session_id: None })
            .unwrap();
        wal.append(&WalRecord::BatchBegin { tx_id: None, session_id: None })
            .unwrap();
        wal.append(&add("inner", "r", "x")).unwrap();
        wal.append(&WalRecord::BatchCommit { tx_id: None }).unwrap();
        wal.append(&add("outer", "r", "y")).unwrap();
        wal.append(&WalRecord::BatchCommit { tx_id: None }).unwrap();
        wal.sync().unwrap();

        let state = wal.replay(&TxIdLru::default()).unwrap();
        assert_eq!(state.adds().count(), 2);

        // Inner committed but outer aborted: everything is discarded.
        let mut wal2 = Wal::open(dir.path().join("y.wal")).unwrap();
        wal2.append(&WalRecord::BatchBegin { tx_id: None, session_id: None })
            .unwrap();
        wal2.append(&WalRecord::BatchBegin { tx_id: None, session_id: None })
            .unwrap();
        wal2.append(&add("inner", "r", "x")).unwrap();
        wal2.append(&WalRecord::BatchCommit { tx_id: None }).unwrap();
        wal2.append(&WalRecord::BatchAbort { tx_id: None }).unwrap();
        let state = wal2.replay(&TxIdLru::default()).unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn replay_stops_at_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.wal");
        let offset;
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&add("a", "r", "b")).unwrap();
            offset = wal.append(&add("c", "r", "d")).unwrap();
            wal.sync().unwrap();
        }
        // Corrupt the second record's checksum.
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(offset + 4)).unwrap();
            file.write_all(&0u32.to_le_bytes()).unwrap();
        }
        let wal = Wal::open(&path).unwrap();
        let state = wal.replay(&TxIdLru::default()).unwrap();
        assert_eq!(state.adds().count(), 1);
    }

    #[test]
    fn replay_skips_already_applied_tx_id() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("x.wal")).unwrap();
        wal.append(&WalRecord::BatchBegin {
            tx_id: Some("tx-9".into()),
            session_id: None,
        })
        .unwrap();
        wal.append(&add("a", "r", "b")).unwrap();
        wal.append(&WalRecord::BatchCommit { tx_id: Some("tx-9".into()) })
            .unwrap();
        wal.sync().unwrap();

        let mut applied = TxIdLru::default();
        applied.insert("tx-9".into());
        let state = wal.replay(&applied).unwrap();
        assert!(state.is_empty());

        let state = wal.replay(&TxIdLru::default()).unwrap();
        assert_eq!(state.adds().count(), 1);
        assert_eq!(state.committed_tx_ids, vec!["tx-9".to_string()]);
    }

    #[test]
    fn reset_truncates_to_header() {
        let dir = tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("x.wal")).unwrap();
        wal.append(&add("a", "r", "b")).unwrap();
        assert!(!wal.is_empty().unwrap());
        wal.reset().unwrap();
        assert!(wal.is_empty().unwrap());
        assert!(wal.replay(&TxIdLru::default()).unwrap().is_empty());

        // Still usable after a reset.
        wal.append(&add("c", "r", "d")).unwrap();
        assert_eq!(wal.replay(&TxIdLru::default()).unwrap().adds().count(), 1);
    }

    #[test]
    fn lru_evicts_oldest() {
        let mut lru = TxIdLru::new(2);
        lru.insert("a".into());
        lru.insert("b".into());
        lru.insert("c".into());
        assert!(!lru.contains("a"));
        assert!(lru.contains("b"));
        assert!(lru.contains("c"));
        assert_eq!(lru.len(), 2);
    }
}
