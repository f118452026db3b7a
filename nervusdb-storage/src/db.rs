//! The `Db` handle: open, mutate, query, flush, close.
//!
//! One writer per database (in-process mutex plus the optional on-disk lock),
//! any number of snapshot readers. Every mutation goes WAL-first; the shared
//! in-memory state is republished as an immutable snapshot after each write,
//! and a flush turns the accumulated delta into pages behind a new manifest
//! epoch. Reader handles notice a foreign writer's publications by the
//! manifest file's timestamp and reload, unless an epoch pin holds them back.

use crate::dictionary::Dictionary;
use crate::flush::{
    self, DEFAULT_HOTNESS_SAVE_INTERVAL, DEFAULT_INDEX_SAVE_INTERVAL, FlushCtx, FlushThrottle,
    PersistedVersions,
};
use crate::hexastore::Hexastore;
use crate::hotness::HotnessMap;
use crate::lock::WriterLock;
use crate::mainfile;
use crate::manifest::Manifest;
use crate::memtable::TripleMemtable;
use crate::order::{ALL_ORDERS, TripleOrder};
use crate::page::Compression;
use crate::propindex::{LabelIndex, PropertyValueIndex};
use crate::property::PropertyStore;
use crate::query::{self, TripleStream};
use crate::readers::{DEFAULT_STALE_AFTER, ReaderRegistry};
use crate::snapshot::Snapshot;
use crate::txn::{BatchOptions, BatchStack};
use crate::vacuum::{self, CompactionOptions, CompactionReport, GcReport};
use crate::wal::{Wal, WalRecord};
use crate::{DEFAULT_PAGE_SIZE, Error, Result};
use arc_swap::ArcSwap;
use nervusdb_api::{Id, PropertyBag, TripleKey, TriplePattern};
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// Open-time configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Triples per index page; recorded in the manifest. A mismatch against
    /// an existing manifest triggers a full index rebuild.
    pub page_size: u32,
    pub compression: Compression,
    /// Take the exclusive writer lock. Disable for read-only handles.
    pub enable_lock: bool,
    /// Register this handle in the reader registry.
    pub register_reader: bool,
    pub reader_stale_after: Duration,
    /// Fsync the WAL on every unbatched write and on durable commits.
    pub durable_writes: bool,
    pub hotness_save_interval: Duration,
    pub index_save_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            compression: Compression::default(),
            enable_lock: true,
            register_reader: true,
            reader_stale_after: DEFAULT_STALE_AFTER,
            durable_writes: true,
            hotness_save_interval: DEFAULT_HOTNESS_SAVE_INTERVAL,
            index_save_interval: DEFAULT_INDEX_SAVE_INTERVAL,
        }
    }
}

impl Options {
    /// Read-only profile: no writer lock, still registered as a reader.
    pub fn read_only() -> Self {
        Self {
            enable_lock: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
struct DbPaths {
    main: PathBuf,
    wal: PathBuf,
    lock: PathBuf,
    pages: PathBuf,
}

impl DbPaths {
    fn for_base(base: &Path) -> Self {
        Self {
            main: base.to_path_buf(),
            wal: with_suffix(base, ".wal"),
            lock: with_suffix(base, ".lock"),
            pages: with_suffix(base, ".pages"),
        }
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut os: OsString = base.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

#[derive(Debug)]
struct WriterState {
    dictionary: Dictionary,
    memtable: TripleMemtable,
    properties: PropertyStore,
    prop_index: PropertyValueIndex,
    label_index: LabelIndex,
    hotness: HotnessMap,
    wal: Wal,
    manifest: Manifest,
    batches: BatchStack,
    applied_tx: crate::wal::TxIdLru,
    versions: PersistedVersions,
    throttle: FlushThrottle,
}

/// Aggregate counters for consumers and tests.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub epoch: u64,
    pub dictionary_len: usize,
    pub delta_triples: usize,
    pub tombstones: usize,
    pub pages_per_order: BTreeMap<&'static str, usize>,
    pub orphan_pages: usize,
}

/// Result of a full page verification pass.
#[derive(Debug, Default, Clone)]
pub struct VerifyReport {
    pub pages_checked: usize,
    /// `(order, primary)` of every page run that failed to fully decode.
    pub failed_pages: Vec<(&'static str, Id)>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.failed_pages.is_empty()
    }
}

#[derive(Debug)]
pub struct Db {
    paths: DbPaths,
    opts: Options,
    hexastore: Hexastore,
    state: Mutex<WriterState>,
    published: ArcSwap<Snapshot>,
    pins: Mutex<Vec<Arc<Snapshot>>>,
    registry: Option<Mutex<ReaderRegistry>>,
    _lock: Option<WriterLock>,
    /// Set for `:memory:` databases; the whole tree is removed at close.
    temp_root: Option<PathBuf>,
}

impl Db {
    /// Opens (creating if necessary) the database at `path`. The special path
    /// `:memory:` opens a transient database under a unique temp directory
    /// that `close` deletes. Open cost is O(1) in the number of persisted
    /// triples: pages are not touched here.
    pub fn open(path: impl AsRef<Path>, opts: Options) -> Result<Self> {
        let (base, temp_root) = if path.as_ref().as_os_str() == ":memory:" {
            let root = std::env::temp_dir().join(format!("nervusdb-{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&root)?;
            (root.join("mem.ndb"), Some(root))
        } else {
            (path.as_ref().to_path_buf(), None)
        };
        let paths = DbPaths::for_base(&base);

        let lock = if opts.enable_lock {
            Some(WriterLock::acquire(&paths.lock)?)
        } else {
            // A lockless handle must not race a writer's uncommitted durable
            // work: refuse while the WAL holds records.
            if wal_has_records(&paths.wal)? {
                return Err(Error::WalNotEmpty);
            }
            None
        };

        let hexastore = Hexastore::new(&paths.pages)?;

        // Main file: dictionary, legacy triples section, properties.
        let sections = mainfile::read(&paths.main)?;
        let (mut dictionary, mut memtable, mut properties) = match &sections {
            Some(sections) => (
                if sections.dictionary.is_empty() {
                    Dictionary::new()
                } else {
                    Dictionary::deserialize(&sections.dictionary)?
                },
                if sections.triples.is_empty() {
                    TripleMemtable::new()
                } else {
                    TripleMemtable::deserialize(&sections.triples)?
                },
                if sections.properties.is_empty() {
                    PropertyStore::new()
                } else {
                    PropertyStore::deserialize(&sections.properties)?
                },
            ),
            None => (Dictionary::new(), TripleMemtable::new(), PropertyStore::new()),
        };

        // Manifest: load, or rebuild from what survives. A lockless handle
        // never rewrites files; it degrades to whatever it can read.
        let can_rebuild = lock.is_some();
        let manifest = match Manifest::load(&paths.pages)? {
            Some(manifest) if manifest.page_size == opts.page_size => manifest,
            Some(manifest) if can_rebuild => {
                info!(
                    manifest_page_size = manifest.page_size,
                    configured = opts.page_size,
                    "page size changed; rebuilding paged indexes"
                );
                rebuild_manifest(&hexastore, &memtable, &opts, manifest.epoch + 1, &paths)?
            }
            Some(manifest) => manifest,
            None => {
                let has_pages = ALL_ORDERS
                    .iter()
                    .any(|order| hexastore.file_path(*order).exists());
                if can_rebuild && (has_pages || !memtable.is_empty()) {
                    warn!("manifest missing; rebuilding paged indexes from storage");
                    rebuild_manifest(&hexastore, &memtable, &opts, 1, &paths)?
                } else {
                    Manifest::new(opts.page_size, opts.compression)
                }
            }
        };

        memtable.set_tombstones(manifest.tombstone_set());

        // What the on-disk main file currently reflects; WAL replay below
        // moves the live counters past these, which makes the first flush
        // rewrite the main file and persist the replayed state.
        let persisted_versions = PersistedVersions {
            dictionary: dictionary.version(),
            triples: memtable.version(),
            properties: properties.version(),
        };

        // Secondary indexes, then WAL replay layered on top of them.
        let mut prop_index =
            PropertyValueIndex::load_or_rebuild(&paths.pages, &properties, manifest.epoch);
        let mut label_index =
            LabelIndex::load_or_rebuild(&paths.pages, &properties, manifest.epoch);

        let mut applied_tx = flush::load_applied_tx(&paths.pages);
        let wal = Wal::open(&paths.wal)?;
        let replay = wal.replay(&applied_tx)?;
        if !replay.is_empty() {
            info!(records = replay.records, ops = replay.ops.len(), "replaying wal");
        }
        for op in &replay.ops {
            match op {
                crate::wal::ReplayOp::Add(s, p, o) => {
                    let key = TripleKey::new(
                        dictionary.get_or_create_id(s),
                        dictionary.get_or_create_id(p),
                        dictionary.get_or_create_id(o),
                    );
                    memtable.add(key);
                }
                crate::wal::ReplayOp::Delete(s, p, o) => {
                    let key = TripleKey::new(
                        dictionary.get_or_create_id(s),
                        dictionary.get_or_create_id(p),
                        dictionary.get_or_create_id(o),
                    );
                    memtable.delete(key);
                }
                crate::wal::ReplayOp::NodeProps(node, bag) => {
                    let old = properties.set_node(*node, bag.clone());
                    prop_index.apply_node_diff(*node, old.as_ref(), bag);
                    label_index.apply_diff(*node, old.as_ref(), bag);
                }
                crate::wal::ReplayOp::EdgeProps(edge, bag) => {
                    let old = properties.set_edge(*edge, bag.clone());
                    prop_index.apply_edge_diff(*edge, old.as_ref(), bag);
                }
            }
        }
        for tx_id in replay.committed_tx_ids {
            applied_tx.insert(tx_id);
        }

        let hotness = HotnessMap::load(&paths.pages);

        let state = WriterState {
            versions: persisted_versions,
            dictionary,
            memtable,
            properties,
            prop_index,
            label_index,
            hotness,
            wal,
            manifest,
            batches: BatchStack::new(),
            applied_tx,
            throttle: FlushThrottle::new(opts.hotness_save_interval, opts.index_save_interval),
        };

        let registry = if opts.register_reader {
            Some(Mutex::new(ReaderRegistry::open(
                &paths.pages,
                opts.reader_stale_after,
            )?))
        } else {
            None
        };

        let snapshot = build_snapshot(&state, &paths);
        let db = Self {
            paths,
            opts,
            hexastore,
            state: Mutex::new(state),
            published: ArcSwap::from(snapshot),
            pins: Mutex::new(Vec::new()),
            registry,
            _lock: lock,
            temp_root,
        };
        db.sync_registry();
        Ok(db)
    }

    /// Interns the three strings and stages the triple. Returns the ids.
    pub fn add_fact(&self, subject: &str, predicate: &str, object: &str) -> Result<TripleKey> {
        let mut state = self.state.lock().unwrap();
        let key = TripleKey::new(
            state.dictionary.get_or_create_id(subject),
            state.dictionary.get_or_create_id(predicate),
            state.dictionary.get_or_create_id(object),
        );
        state.wal.append(&WalRecord::AddFact {
            subject: subject.to_owned(),
            predicate: predicate.to_owned(),
            object: object.to_owned(),
        })?;
        if state.batches.is_active() {
            state.batches.stage_add(key);
        } else {
            if self.opts.durable_writes {
                state.wal.sync()?;
            }
            state.memtable.add(key);
            self.publish(&state);
        }
        Ok(key)
    }

    /// Tombstones the triple. Unknown strings mean the triple never existed;
    /// the call is a no-op then.
    pub fn delete_fact(&self, subject: &str, predicate: &str, object: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let (Some(s), Some(p), Some(o)) = (
            state.dictionary.get_id(subject),
            state.dictionary.get_id(predicate),
            state.dictionary.get_id(object),
        ) else {
            return Ok(());
        };
        let key = TripleKey::new(s, p, o);
        state.wal.append(&WalRecord::DeleteFact {
            subject: subject.to_owned(),
            predicate: predicate.to_owned(),
            object: object.to_owned(),
        })?;
        if state.batches.is_active() {
            state.batches.stage_delete(key);
        } else {
            if self.opts.durable_writes {
                state.wal.sync()?;
            }
            state.memtable.delete(key);
            self.publish(&state);
        }
        Ok(())
    }

    /// Replaces the node's whole property bag.
    pub fn set_node_properties(&self, node: Id, bag: PropertyBag) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.wal.append(&WalRecord::SetNodeProps {
            node,
            bag: bag.clone(),
        })?;
        if state.batches.is_active() {
            state.batches.stage_node_props(node, bag);
        } else {
            if self.opts.durable_writes {
                state.wal.sync()?;
            }
            apply_node_props(&mut state, node, bag);
        }
        Ok(())
    }

    /// Replaces the edge's whole property bag.
    pub fn set_edge_properties(&self, edge: TripleKey, bag: PropertyBag) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.wal.append(&WalRecord::SetEdgeProps {
            edge,
            bag: bag.clone(),
        })?;
        if state.batches.is_active() {
            state.batches.stage_edge_props(edge, bag);
        } else {
            if self.opts.durable_writes {
                state.wal.sync()?;
            }
            apply_edge_props(&mut state, edge, bag);
        }
        Ok(())
    }

    /// Reads a node's bag: batch overlay first, then delta over disk.
    pub fn get_node_properties(&self, node: Id) -> Option<PropertyBag> {
        let state = self.state.lock().unwrap();
        state
            .batches
            .node_props(node)
            .or_else(|| state.properties.get_node(node))
            .cloned()
    }

    pub fn get_edge_properties(&self, edge: TripleKey) -> Option<PropertyBag> {
        let state = self.state.lock().unwrap();
        state
            .batches
            .edge_props(edge)
            .or_else(|| state.properties.get_edge(edge))
            .cloned()
    }

    /// Nodes whose bag holds `property == value`, via the value index.
    pub fn nodes_with_property(&self, property: &str, value: &nervusdb_api::PropertyValue) -> Vec<Id> {
        self.state.lock().unwrap().prop_index.lookup_nodes(property, value)
    }

    /// Nodes carrying `label` in their reserved `labels` property.
    pub fn nodes_with_label(&self, label: &str) -> Vec<Id> {
        self.state.lock().unwrap().label_index.nodes_with_label(label)
    }

    /// All matches for the pattern, respecting tombstones and batch overlays.
    pub fn query(&self, pattern: TriplePattern) -> Result<Vec<TripleKey>> {
        Ok(self
            .stream_query(pattern, query::DEFAULT_BATCH_SIZE)?
            .into_vec())
    }

    /// Lazy batched variant of [`query`](Self::query).
    pub fn stream_query(
        &self,
        pattern: TriplePattern,
        batch_size: usize,
    ) -> Result<TripleStream> {
        let snapshot = self.current_snapshot();
        let overlay = self.state.lock().unwrap().batches.overlay();
        let (stream, order) =
            query::dispatch(snapshot, &self.hexastore, overlay, pattern, batch_size);
        if let Some(primary) = order.primary_of_pattern(&pattern) {
            self.state.lock().unwrap().hotness.touch(order, primary);
        }
        Ok(stream)
    }

    /// String-level convenience over [`query`](Self::query); a bound string
    /// the dictionary has never seen matches nothing.
    pub fn find(
        &self,
        subject: Option<&str>,
        predicate: Option<&str>,
        object: Option<&str>,
    ) -> Result<Vec<TripleKey>> {
        let pattern = {
            let state = self.state.lock().unwrap();
            let mut resolve = |value: Option<&str>| -> Option<Option<Id>> {
                match value {
                    None => Some(None),
                    Some(s) => state.dictionary.get_id(s).map(Some),
                }
            };
            let (Some(s), Some(p), Some(o)) =
                (resolve(subject), resolve(predicate), resolve(object))
            else {
                return Ok(Vec::new());
            };
            TriplePattern { s, p, o }
        };
        self.query(pattern)
    }

    /// Resolves a dictionary id back to its string.
    pub fn resolve(&self, id: Id) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .dictionary
            .get_value(id)
            .map(str::to_owned)
    }

    /// Dictionary id of a string, if it was ever interned.
    pub fn lookup(&self, value: &str) -> Option<Id> {
        self.state.lock().unwrap().dictionary.get_id(value)
    }

    pub fn begin_batch(&self, opts: BatchOptions) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.wal.append(&WalRecord::BatchBegin {
            tx_id: opts.tx_id.clone(),
            session_id: opts.session_id,
        })?;
        state.batches.begin(opts.tx_id);
        Ok(())
    }

    /// Commits the innermost batch. A durable commit returns only after the
    /// commit record is fsynced.
    pub fn commit_batch(&self, durable: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.batches.is_active() {
            return Err(Error::NoActiveBatch);
        }
        let tx_id = state.batches.current_tx_id();
        state.wal.append(&WalRecord::BatchCommit {
            tx_id: tx_id.clone(),
        })?;
        if durable && self.opts.durable_writes {
            state.wal.sync()?;
        }
        if let Some(frame) = state.batches.commit() {
            for key in &frame.deletes {
                state.memtable.delete(*key);
            }
            for key in &frame.adds {
                state.memtable.add(*key);
            }
            for (node, bag) in frame.node_props {
                apply_node_props(&mut state, node, bag);
            }
            for (edge, bag) in frame.edge_props {
                apply_edge_props(&mut state, edge, bag);
            }
            if let Some(id) = frame.tx_id {
                state.applied_tx.insert(id);
            }
            self.publish(&state);
        }
        Ok(())
    }

    /// Discards the innermost batch. Its WAL records die at the next replay
    /// because no commit record follows them.
    pub fn abort_batch(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.batches.is_active() {
            return Err(Error::NoActiveBatch);
        }
        let tx_id = state.batches.current_tx_id();
        state.wal.append(&WalRecord::BatchAbort { tx_id })?;
        state.batches.abort();
        Ok(())
    }

    pub fn batch_depth(&self) -> usize {
        self.state.lock().unwrap().batches.depth()
    }

    /// Persists the delta: main file, page append, manifest publish, snapshot
    /// upkeep, WAL reset. See the flush module for the crash contract.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        let published = flush::run(FlushCtx {
            dictionary: &state.dictionary,
            memtable: &mut state.memtable,
            properties: &mut state.properties,
            prop_index: &mut state.prop_index,
            label_index: &mut state.label_index,
            hotness: &mut state.hotness,
            wal: &mut state.wal,
            manifest: &mut state.manifest,
            applied_tx: &state.applied_tx,
            hexastore: &self.hexastore,
            main_path: &self.paths.main,
            pages_dir: &self.paths.pages,
            versions: &mut state.versions,
            throttle: &mut state.throttle,
            batch_active: state.batches.is_active(),
        })?;
        if published {
            self.publish(state);
        }
        Ok(())
    }

    /// Pins the current snapshot so queries on this handle stop following
    /// newer manifests until the matching pop. Pins nest.
    pub fn push_pinned_epoch(&self, epoch: u64) {
        let snapshot = self.current_snapshot();
        if snapshot.epoch() != epoch {
            warn!(
                requested = epoch,
                current = snapshot.epoch(),
                "pinning the currently published epoch"
            );
        }
        self.pins.lock().unwrap().push(snapshot);
        self.sync_registry();
    }

    /// Pops the innermost pin; returns its epoch.
    pub fn pop_pinned_epoch(&self) -> Option<u64> {
        let popped = self.pins.lock().unwrap().pop().map(|s| s.epoch());
        self.sync_registry();
        popped
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_snapshot().epoch()
    }

    pub fn compact(&self, opts: CompactionOptions) -> Result<CompactionReport> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        let tombstones = state.memtable.tombstones();
        let report = vacuum::compact(
            &self.hexastore,
            &mut state.manifest,
            &tombstones,
            &state.hotness,
            opts,
            &self.paths.pages,
        )?;
        if report.epoch.is_some() {
            if report.expunged_tombstones > 0 {
                state.memtable.set_tombstones(im::OrdSet::new());
            }
            self.publish(state);
        }
        Ok(report)
    }

    /// Reclaims orphan pages no registered reader can still observe.
    pub fn collect_garbage(&self) -> Result<GcReport> {
        let active = self.active_epochs();
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        let report = vacuum::collect_garbage(
            &self.hexastore,
            &mut state.manifest,
            &active,
            &self.paths.pages,
        )?;
        if report.epoch.is_some() {
            self.publish(state);
        }
        Ok(report)
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.state.lock().unwrap();
        let mut pages_per_order = BTreeMap::new();
        for order in ALL_ORDERS {
            pages_per_order.insert(order.name(), state.manifest.entries(order).len());
        }
        StoreStats {
            epoch: state.manifest.epoch,
            dictionary_len: state.dictionary.len(),
            delta_triples: state.memtable.len(),
            tombstones: state.memtable.tombstone_count(),
            pages_per_order,
            orphan_pages: state.manifest.orphans.len(),
        }
    }

    /// Walks every live page of every ordering and checksums it. The strict
    /// counterpart to the skip-and-continue read path.
    pub fn verify(&self) -> Result<VerifyReport> {
        let snapshot = self.current_snapshot();
        let mut report = VerifyReport::default();
        for order in ALL_ORDERS {
            let mut primaries: Vec<Id> = snapshot
                .manifest()
                .entries(order)
                .iter()
                .map(|entry| entry.primary)
                .collect();
            primaries.sort_unstable();
            primaries.dedup();
            for primary in primaries {
                let entries: Vec<_> = snapshot
                    .manifest()
                    .entries_for_primary(order, primary)
                    .copied()
                    .collect();
                report.pages_checked += entries.len();
                // Force every page read; a CRC failure surfaces as a skipped
                // page and shows up as a count shortfall.
                let decoded = self
                    .hexastore
                    .read_primary(snapshot.manifest(), order, primary)
                    .count();
                let expected: usize = entries
                    .iter()
                    .map(|e| (e.raw_len as usize).saturating_sub(4) / 12)
                    .sum();
                if decoded != expected {
                    report.failed_pages.push((order.name(), primary));
                }
            }
        }
        Ok(report)
    }

    /// Flushes outstanding work and tears the handle down. Open batches are
    /// aborted. A `:memory:` database removes its files here.
    pub fn close(self) -> Result<()> {
        let depth = self.state.lock().unwrap().batches.depth();
        for _ in 0..depth {
            warn!("aborting batch left open at close");
            self.abort_batch()?;
        }
        if self._lock.is_some() {
            self.flush()?;
        }
        if let Some(registry) = &self.registry {
            registry.lock().unwrap().deregister_all();
        }
        let temp_root = self.temp_root.clone();
        // Releases the lock file and the reader registration.
        drop(self);
        if let Some(root) = temp_root {
            std::fs::remove_dir_all(&root)?;
        }
        Ok(())
    }

    /// Snapshot used by queries: the innermost pin, or the published state
    /// refreshed against the on-disk manifest.
    fn current_snapshot(&self) -> Arc<Snapshot> {
        if let Some(pinned) = self.pins.lock().unwrap().last() {
            return pinned.clone();
        }
        let current = self.published.load_full();
        let stamp = manifest_stamp(&self.paths);
        if stamp == current.manifest_stamp() {
            return current;
        }

        // A foreign writer published a newer manifest; reload it.
        let mut state = self.state.lock().unwrap();
        match Manifest::load(&self.paths.pages) {
            Ok(Some(manifest)) if manifest.epoch != current.epoch() => {
                info!(from = current.epoch(), to = manifest.epoch, "following newer manifest");
                state.memtable.set_tombstones(manifest.tombstone_set());
                state.manifest = manifest;
                self.publish(&state);
                self.published.load_full()
            }
            _ => current,
        }
    }

    fn publish(&self, state: &WriterState) {
        self.published.store(build_snapshot(state, &self.paths));
        self.sync_registry();
    }

    fn sync_registry(&self) {
        let Some(registry) = &self.registry else {
            return;
        };
        let mut epochs: BTreeSet<u64> = BTreeSet::new();
        epochs.insert(self.published.load().epoch());
        for pinned in self.pins.lock().unwrap().iter() {
            epochs.insert(pinned.epoch());
        }
        if let Err(e) = registry.lock().unwrap().sync(&epochs) {
            warn!(error = %e, "failed to update reader registry");
        }
    }

    fn active_epochs(&self) -> BTreeSet<u64> {
        match &self.registry {
            Some(registry) => registry.lock().unwrap().active_epochs(),
            None => BTreeSet::new(),
        }
    }
}

fn build_snapshot(state: &WriterState, paths: &DbPaths) -> Arc<Snapshot> {
    Arc::new(Snapshot::new(
        Arc::new(state.manifest.clone()),
        state.memtable.delta(),
        state.memtable.delta_set(),
        state.memtable.tombstones(),
        manifest_stamp(paths),
    ))
}

fn manifest_stamp(paths: &DbPaths) -> Option<SystemTime> {
    std::fs::metadata(paths.pages.join(crate::manifest::MANIFEST_FILE))
        .and_then(|meta| meta.modified())
        .ok()
}

fn wal_has_records(path: &Path) -> Result<bool> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len() > crate::wal::WAL_HEADER_LEN),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Io(e)),
    }
}

fn rebuild_manifest(
    hexastore: &Hexastore,
    memtable: &TripleMemtable,
    opts: &Options,
    epoch: u64,
    paths: &DbPaths,
) -> Result<Manifest> {
    let mut triples: Vec<TripleKey> = hexastore.scan_file(TripleOrder::Spo)?;
    triples.extend(memtable.iter());
    triples.sort_unstable();
    triples.dedup();
    let mut manifest = hexastore.rebuild(&triples, opts.page_size, opts.compression, epoch)?;
    manifest.store(&paths.pages)?;
    Ok(manifest)
}

fn apply_node_props(state: &mut WriterState, node: Id, bag: PropertyBag) {
    let old = state.properties.set_node(node, bag.clone());
    state.prop_index.apply_node_diff(node, old.as_ref(), &bag);
    state.label_index.apply_diff(node, old.as_ref(), &bag);
}

fn apply_edge_props(state: &mut WriterState, edge: TripleKey, bag: PropertyBag) {
    let old = state.properties.set_edge(edge, bag.clone());
    state.prop_index.apply_edge_diff(edge, old.as_ref(), &bag);
}
