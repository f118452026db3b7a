//! Flush coordinator: in-memory delta → durable artifacts, in a fixed order.
//!
//! 1. rewrite the main file when dictionary/triples/properties changed
//! 2. append staged triples to the page files
//! 3. publish the new manifest (the atomic commit of the whole flush)
//! 4. throttled hotness and secondary-index snapshots
//! 5. reset the WAL
//!
//! Every step is bracketed by a named crash hook. A failure at any point
//! leaves the WAL intact, so the next open replays every record the manifest
//! publication did not cover; re-appended pages that never made a manifest
//! are dead bytes that compaction rewrites away.

use crate::crashpoint;
use crate::dictionary::Dictionary;
use crate::hexastore::Hexastore;
use crate::hotness::HotnessMap;
use crate::mainfile::{self, MainFileSections};
use crate::manifest::{Manifest, atomic_replace};
use crate::memtable::TripleMemtable;
use crate::propindex::{LabelIndex, PropertyValueIndex};
use crate::property::PropertyStore;
use crate::wal::{TxIdLru, Wal};
use crate::{Result, TripleKey};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const APPLIED_TX_FILE: &str = "applied-tx.json";

pub const DEFAULT_HOTNESS_SAVE_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_INDEX_SAVE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Component versions at the time of the last main-file write; lets step 1
/// skip the rewrite when nothing it covers has changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PersistedVersions {
    pub dictionary: u64,
    pub triples: u64,
    pub properties: u64,
}

#[derive(Debug)]
pub struct FlushThrottle {
    pub hotness_interval: Duration,
    pub index_interval: Duration,
    last_hotness_save: Option<Instant>,
    last_index_save: Option<Instant>,
}

impl FlushThrottle {
    pub fn new(hotness_interval: Duration, index_interval: Duration) -> Self {
        Self {
            hotness_interval,
            index_interval,
            last_hotness_save: None,
            last_index_save: None,
        }
    }

    fn hotness_due(&self) -> bool {
        self.last_hotness_save
            .is_none_or(|last| last.elapsed() >= self.hotness_interval)
    }

    fn index_due(&self) -> bool {
        self.last_index_save
            .is_none_or(|last| last.elapsed() >= self.index_interval)
    }
}

pub(crate) struct FlushCtx<'a> {
    pub dictionary: &'a Dictionary,
    pub memtable: &'a mut TripleMemtable,
    pub properties: &'a mut PropertyStore,
    pub prop_index: &'a mut PropertyValueIndex,
    pub label_index: &'a mut LabelIndex,
    pub hotness: &'a mut HotnessMap,
    pub wal: &'a mut Wal,
    pub manifest: &'a mut Manifest,
    pub applied_tx: &'a TxIdLru,
    pub hexastore: &'a Hexastore,
    pub main_path: &'a Path,
    pub pages_dir: &'a Path,
    pub versions: &'a mut PersistedVersions,
    pub throttle: &'a mut FlushThrottle,
    /// An open batch still has uncommitted records in the WAL; the reset
    /// step must leave them in place.
    pub batch_active: bool,
}

/// Runs one flush. Returns `true` when a new manifest epoch was published.
pub(crate) fn run(ctx: FlushCtx<'_>) -> Result<bool> {
    let current = PersistedVersions {
        dictionary: ctx.dictionary.version(),
        triples: ctx.memtable.version(),
        properties: ctx.properties.version(),
    };

    let staged: Vec<TripleKey> = ctx.memtable.iter().collect();
    let tombstones = ctx.memtable.tombstones();
    let tombstones_changed = ctx.manifest.tombstone_set() != tombstones;

    if staged.is_empty()
        && !tombstones_changed
        && current == *ctx.versions
        && ctx.wal.is_empty()?
    {
        debug!("flush is a no-op: nothing changed since last flush");
        return Ok(false);
    }

    // Step 1: main file (dictionary + empty triples section + properties).
    crashpoint::hit(crashpoint::BEFORE_INCREMENTAL_WRITE)?;
    if current != *ctx.versions {
        let mut sections = MainFileSections::default();
        ctx.dictionary.serialize(&mut sections.dictionary);
        // The triples section stays empty: staged triples live in the paged
        // indexes after this flush, and the WAL covers them until then.
        TripleMemtable::new().serialize(&mut sections.triples);
        ctx.properties.serialize(&mut sections.properties);
        mainfile::write(ctx.main_path, &sections)?;
        *ctx.versions = current;
    }

    // Step 2: append staged triples to the per-ordering page files.
    crashpoint::hit(crashpoint::BEFORE_PAGE_APPEND)?;
    let mut draft = ctx.manifest.clone();
    let appended = ctx.hexastore.append_from_staging(&mut draft, &staged)?;

    // Step 3: publish. An empty staging still bumps the epoch iff the
    // tombstone set (or orphan list) changed.
    let publish = appended || tombstones_changed;
    if publish {
        crashpoint::hit(crashpoint::BEFORE_MANIFEST_WRITE)?;
        draft.set_tombstones(tombstones.iter().copied());
        draft.epoch = ctx.manifest.epoch + 1;
        draft.store(ctx.pages_dir)?;
        info!(
            epoch = draft.epoch,
            staged = staged.len(),
            "published manifest"
        );
        *ctx.manifest = draft;
    }

    // Step 4: throttled snapshots.
    if ctx.throttle.hotness_due() {
        ctx.hotness.save(ctx.pages_dir)?;
        ctx.throttle.last_hotness_save = Some(Instant::now());
    }
    if ctx.throttle.index_due() && (ctx.prop_index.is_dirty() || ctx.label_index.is_dirty()) {
        ctx.prop_index.save(ctx.pages_dir, ctx.manifest.epoch)?;
        ctx.label_index.save(ctx.pages_dir, ctx.manifest.epoch)?;
        ctx.throttle.last_index_save = Some(Instant::now());
    }

    // Step 5: the WAL's applied records are all covered by persistent state
    // now. With a batch open the reset is skipped: its uncommitted records
    // must survive, and replay tolerates re-seeing the applied prefix.
    ctx.properties.merge_delta();
    if !ctx.batch_active {
        crashpoint::hit(crashpoint::BEFORE_WAL_RESET)?;
        ctx.wal.reset()?;

        let lru_bytes = serde_json::to_vec(ctx.applied_tx)?;
        atomic_replace(&ctx.pages_dir.join(APPLIED_TX_FILE), &lru_bytes)?;
    }
    ctx.memtable.clear_delta();

    Ok(publish)
}

/// Loads the persisted applied-transaction LRU, or a fresh one.
pub fn load_applied_tx(pages_dir: &Path) -> TxIdLru {
    match std::fs::read(pages_dir.join(APPLIED_TX_FILE)) {
        Ok(bytes) => match serde_json::from_slice::<TxIdLru>(&bytes) {
            Ok(mut lru) => {
                lru.rebuild_index();
                lru
            }
            Err(_) => TxIdLru::default(),
        },
        Err(_) => TxIdLru::default(),
    }
}
