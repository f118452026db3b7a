//! Maintenance: page compaction and orphan garbage collection.
//!
//! Compaction rewrites fragmented pages. Because page files are append-only,
//! a rewrite appends the merged pages and moves the superseded entries to the
//! manifest's orphan list, stamped with the epoch that replaced them; pinned
//! readers on older epochs keep resolving their offsets untouched. GC later
//! reclaims orphans once no registered reader could still observe them.
//!
//! A failure anywhere in here leaves the previous manifest in place; at worst
//! the page files carry dead bytes the next pass rewrites away.

use crate::hexastore::Hexastore;
use crate::hotness::HotnessMap;
use crate::manifest::{Manifest, OrphanPage, PageEntry};
use crate::order::{ALL_ORDERS, TripleOrder};
use crate::page::{self, PAGE_RECORD_HEADER_LEN};
use crate::{Result, TripleKey};
use nervusdb_api::Id;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompactionMode {
    /// Rewrite every ordering in full; expunges tombstoned triples.
    Rewrite,
    /// Merge only primaries that are fragmented or hot.
    Incremental {
        min_merge_pages: usize,
        hotness_threshold: f64,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct CompactionOptions {
    pub mode: CompactionMode,
    pub dry_run: bool,
}

impl Default for CompactionOptions {
    fn default() -> Self {
        Self {
            mode: CompactionMode::Incremental {
                min_merge_pages: 4,
                hotness_threshold: 32.0,
            },
            dry_run: false,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CompactionReport {
    pub dry_run: bool,
    pub pages_before: usize,
    pub pages_after: usize,
    pub merged_primaries: usize,
    pub expunged_tombstones: usize,
    /// New manifest epoch; `None` for a dry run or when nothing needed work.
    pub epoch: Option<u64>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GcReport {
    pub reclaimed_orphans: usize,
    pub retained_orphans: usize,
    pub reclaimed_bytes: u64,
    pub epoch: Option<u64>,
}

/// Runs one compaction pass over the published pages. The caller holds the
/// writer lock and republishes its snapshot from the updated manifest.
pub(crate) fn compact(
    hexastore: &Hexastore,
    manifest: &mut Manifest,
    tombstones: &im::OrdSet<TripleKey>,
    hotness: &HotnessMap,
    opts: CompactionOptions,
    pages_dir: &Path,
) -> Result<CompactionReport> {
    let mut report = CompactionReport {
        dry_run: opts.dry_run,
        pages_before: manifest.page_count(),
        ..Default::default()
    };

    match opts.mode {
        CompactionMode::Rewrite => {
            // The live view: everything the pages hold, minus tombstones.
            let mut live: Vec<TripleKey> = hexastore
                .stream_all(manifest, TripleOrder::Spo)
                .filter(|key| !tombstones.contains(key))
                .collect();
            live.sort_unstable();
            live.dedup();

            report.merged_primaries = count_primaries(manifest);
            report.expunged_tombstones = tombstones.len();
            report.pages_after = estimate_pages(&live, manifest.page_size);

            if opts.dry_run {
                return Ok(report);
            }

            let mut draft = manifest.clone();
            let superseded: Vec<(TripleOrder, Vec<PageEntry>)> = draft
                .pages
                .iter()
                .map(|(order, entries)| (*order, entries.clone()))
                .collect();
            draft.pages.clear();
            hexastore.append_from_staging(&mut draft, &live)?;

            draft.epoch = manifest.epoch + 1;
            for (order, entries) in superseded {
                for entry in entries {
                    draft.orphans.push(OrphanPage {
                        order,
                        primary: entry.primary,
                        offset: entry.offset,
                        compressed_len: entry.compressed_len,
                        // Last epoch at which the page was live: a reader
                        // pinned there may still resolve it.
                        epoch: manifest.epoch,
                    });
                }
            }
            // A full rewrite covered every ordering, so the tombstoned
            // triples are physically gone.
            draft.set_tombstones(std::iter::empty());
            draft.store(pages_dir)?;

            report.pages_after = draft.page_count();
            report.epoch = Some(draft.epoch);
            *manifest = draft;
        }
        CompactionMode::Incremental {
            min_merge_pages,
            hotness_threshold,
        } => {
            let mut draft = manifest.clone();
            let mut new_orphans: Vec<OrphanPage> = Vec::new();
            let mut merged_any = false;

            for order in ALL_ORDERS {
                let mut per_primary: BTreeMap<Id, usize> = BTreeMap::new();
                for entry in manifest.entries(order) {
                    *per_primary.entry(entry.primary).or_default() += 1;
                }
                let chosen: Vec<Id> = per_primary
                    .iter()
                    .filter(|(primary, count)| {
                        **count >= min_merge_pages
                            || hotness.get(order, **primary) >= hotness_threshold
                    })
                    .map(|(primary, _)| *primary)
                    .collect();

                if chosen.is_empty() {
                    continue;
                }
                report.merged_primaries += chosen.len();

                if opts.dry_run {
                    continue;
                }

                for primary in chosen {
                    let triples: Vec<TripleKey> = hexastore
                        .read_primary(manifest, order, primary)
                        .filter(|key| !tombstones.contains(key))
                        .collect();

                    let superseded: Vec<PageEntry> = draft
                        .entries_for_primary(order, primary)
                        .copied()
                        .collect();
                    draft
                        .pages
                        .get_mut(&order)
                        .expect("chosen primary implies entries")
                        .retain(|entry| entry.primary != primary);

                    let mut permuted: Vec<(Id, Id, Id)> =
                        triples.iter().map(|&key| order.permute(key)).collect();
                    permuted.sort_unstable();
                    permuted.dedup();

                    let path = hexastore.file_path(order);
                    let mut file =
                        OpenOptions::new().create(true).append(true).open(&path)?;
                    let mut offset = file.metadata()?.len();
                    let entries = draft.pages.entry(order).or_default();
                    for chunk in permuted.chunks(draft.page_size as usize) {
                        let (record, header) =
                            page::encode_page(primary, chunk, draft.compression)?;
                        file.write_all(&record)?;
                        entries.push(PageEntry {
                            primary,
                            offset,
                            compressed_len: header.stored_len,
                            raw_len: header.raw_len,
                            crc32: header.crc32,
                        });
                        offset += record.len() as u64;
                    }
                    file.sync_data()?;

                    for entry in superseded {
                        new_orphans.push(OrphanPage {
                            order,
                            primary: entry.primary,
                            offset: entry.offset,
                            compressed_len: entry.compressed_len,
                            epoch: manifest.epoch,
                        });
                    }
                    merged_any = true;
                }
            }

            report.pages_after = if opts.dry_run {
                report.pages_before
            } else {
                draft.page_count()
            };

            if opts.dry_run || !merged_any {
                return Ok(report);
            }

            draft.epoch = manifest.epoch + 1;
            draft.orphans.extend(new_orphans);
            draft.store(pages_dir)?;
            report.epoch = Some(draft.epoch);
            *manifest = draft;
        }
    }

    if let Some(epoch) = report.epoch {
        info!(
            epoch,
            pages_before = report.pages_before,
            pages_after = report.pages_after,
            "compaction published"
        );
    }
    Ok(report)
}

/// Reclaims orphan pages no registered reader can still observe, then
/// publishes the shrunken manifest. When no foreign reader is active the
/// page files themselves are rewritten to contain only live records;
/// otherwise only orphan extents past the last referenced byte are truncated.
pub(crate) fn collect_garbage(
    hexastore: &Hexastore,
    manifest: &mut Manifest,
    active_epochs: &BTreeSet<u64>,
    pages_dir: &Path,
) -> Result<GcReport> {
    let mut report = GcReport::default();
    if manifest.orphans.is_empty() {
        return Ok(report);
    }

    let min_active = active_epochs.iter().copied().min();
    let eligible = |orphan: &OrphanPage| match min_active {
        None => true,
        Some(min) => orphan.epoch < min,
    };

    let mut draft = manifest.clone();
    let before = draft.orphans.len();
    let mut reclaimed_bytes = 0u64;
    draft.orphans.retain(|orphan| {
        if eligible(orphan) {
            reclaimed_bytes += u64::from(orphan.compressed_len) + PAGE_RECORD_HEADER_LEN as u64;
            false
        } else {
            true
        }
    });
    report.reclaimed_orphans = before - draft.orphans.len();
    report.retained_orphans = draft.orphans.len();
    report.reclaimed_bytes = reclaimed_bytes;

    if report.reclaimed_orphans == 0 {
        return Ok(report);
    }

    draft.epoch = manifest.epoch + 1;

    // No reader pins anything older than the epoch we are about to publish:
    // the files can be rewritten down to their live records.
    let only_current = min_active.is_none_or(|min| min >= manifest.epoch);
    if only_current && draft.orphans.is_empty() {
        for order in ALL_ORDERS {
            rewrite_file_live_only(hexastore, &mut draft, order)?;
        }
    } else {
        for order in ALL_ORDERS {
            truncate_file_tail(hexastore, &draft, order)?;
        }
    }

    draft.store(pages_dir)?;
    report.epoch = Some(draft.epoch);
    info!(
        epoch = draft.epoch,
        reclaimed = report.reclaimed_orphans,
        bytes = report.reclaimed_bytes,
        "orphan pages reclaimed"
    );
    *manifest = draft;
    Ok(report)
}

fn count_primaries(manifest: &Manifest) -> usize {
    manifest
        .entries(TripleOrder::Spo)
        .iter()
        .map(|entry| entry.primary)
        .collect::<BTreeSet<_>>()
        .len()
}

fn estimate_pages(live: &[TripleKey], page_size: u32) -> usize {
    let mut per_primary: BTreeMap<Id, usize> = BTreeMap::new();
    for key in live {
        *per_primary.entry(key.s).or_default() += 1;
    }
    let spo: usize = per_primary
        .values()
        .map(|count| count.div_ceil(page_size as usize))
        .sum();
    spo * ALL_ORDERS.len()
}

/// Copies every live record into a fresh file, updating the manifest draft's
/// offsets, then renames it over the old one.
fn rewrite_file_live_only(
    hexastore: &Hexastore,
    draft: &mut Manifest,
    order: TripleOrder,
) -> Result<()> {
    let path = hexastore.file_path(order);
    if !path.exists() {
        return Ok(());
    }
    let mut source = File::open(&path)?;
    let tmp = path.with_extension("idxpage.gc");
    let mut dest = File::create(&tmp)?;
    let mut new_offset = 0u64;

    if let Some(entries) = draft.pages.get_mut(&order) {
        for entry in entries.iter_mut() {
            let len = PAGE_RECORD_HEADER_LEN as u64 + u64::from(entry.compressed_len);
            let mut record = vec![0u8; len as usize];
            source.seek(SeekFrom::Start(entry.offset))?;
            source.read_exact(&mut record)?;
            dest.write_all(&record)?;
            entry.offset = new_offset;
            new_offset += len;
        }
    }
    dest.sync_all()?;
    drop(dest);
    drop(source);
    std::fs::rename(&tmp, &path)?;
    crate::manifest::sync_dir(path.parent().expect("page file has a parent"))?;
    debug!(order = order.name(), bytes = new_offset, "page file rewritten");
    Ok(())
}

/// Truncates bytes past the last extent any live entry or surviving orphan
/// still references.
fn truncate_file_tail(
    hexastore: &Hexastore,
    draft: &Manifest,
    order: TripleOrder,
) -> Result<()> {
    let path = hexastore.file_path(order);
    let Ok(meta) = std::fs::metadata(&path) else {
        return Ok(());
    };
    let mut max_end = 0u64;
    for entry in draft.entries(order) {
        max_end = max_end
            .max(entry.offset + PAGE_RECORD_HEADER_LEN as u64 + u64::from(entry.compressed_len));
    }
    for orphan in draft.orphans.iter().filter(|o| o.order == order) {
        max_end = max_end
            .max(orphan.offset + PAGE_RECORD_HEADER_LEN as u64 + u64::from(orphan.compressed_len));
    }
    if max_end < meta.len() {
        let file = OpenOptions::new().write(true).open(&path)?;
        file.set_len(max_end)?;
        file.sync_all()?;
    }
    Ok(())
}
