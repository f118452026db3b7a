//! NervusDB storage core.
//!
//! An embedded property-graph store: labeled nodes, typed directed edges and
//! their property bags in a local file set, with snapshot-consistent reads
//! while a single writer mutates state. Durability is WAL-first; persistence
//! is incremental through per-ordering page files published by an atomically
//! swapped manifest.
//!
//! The entry point is [`Db`]:
//!
//! ```rust,no_run
//! use nervusdb_storage::{Db, Options};
//!
//! fn main() -> nervusdb_storage::Result<()> {
//!     let db = Db::open("graph.ndb", Options::default())?;
//!     db.add_fact("Alice", "knows", "Bob")?;
//!     let knows = db.find(None, Some("knows"), None)?;
//!     assert_eq!(knows.len(), 1);
//!     db.close()?;
//!     Ok(())
//! }
//! ```

pub mod crashpoint;
pub mod db;
pub mod dictionary;
mod error;
pub mod flush;
pub mod hexastore;
pub mod hotness;
pub mod lock;
pub mod mainfile;
pub mod manifest;
pub mod memtable;
pub mod order;
pub mod page;
pub mod propindex;
pub mod property;
pub mod query;
pub mod readers;
pub mod snapshot;
pub mod txn;
pub mod vacuum;
pub mod wal;

pub use crate::db::{Db, Options, StoreStats, VerifyReport};
pub use crate::error::{Error, Result};
pub use crate::page::Compression;
pub use crate::query::TripleStream;
pub use crate::vacuum::{CompactionMode, CompactionOptions, CompactionReport, GcReport};
pub use nervusdb_api::{Id, LABELS_KEY, PropertyBag, PropertyValue, TripleKey, TriplePattern};

/// Magic bytes at the head of the main file.
pub const FILE_MAGIC: [u8; 16] = *b"NERVUSDB\x00\x00\x00\x00\x00\x00\x00\x00";
/// Magic bytes at the head of the WAL.
pub const WAL_MAGIC: [u8; 8] = *b"NDBWAL\x00\x00";

/// On-disk format epoch. A mismatch at open is fatal; there is no upgrade path.
pub const STORAGE_FORMAT_EPOCH: u32 = 1;

/// Default number of triples per index page.
pub const DEFAULT_PAGE_SIZE: u32 = 1024;
