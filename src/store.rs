//! Persistent stem -> destination mapping on top of RocksDB
//!
//! All mappings live in one column family (the "bucket"). RocksDB serializes
//! writers internally and gives every read a consistent view, so the store
//! is shared between listeners behind a plain `Arc` with no extra locking.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, DBIteratorWithThreadMode, DBWithThreadMode, DEFAULT_COLUMN_FAMILY_NAME,
    IteratorMode, MultiThreaded, Options, WriteOptions,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

type Db = DBWithThreadMode<MultiThreaded>;

/// Name of the bucket holding the stem mappings
pub const DEFAULT_BUCKET: &str = "stems";

/// A single stem and the destination it redirects to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StemMapping {
    pub stem: String,
    pub destination: String,
}

/// Stem store backed by a single RocksDB database
pub struct StemStore {
    path: PathBuf,
    bucket: String,
    db: Db,
}

impl StemStore {
    /// Open (creating if absent) the database at `path`.
    ///
    /// RocksDB holds an exclusive lock on the database directory for as long
    /// as the store is open, so a second open of the same path fails.
    pub fn open(path: impl AsRef<Path>, bucket: impl Into<String>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let bucket = bucket.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);

        // Every existing column family has to be named when reopening
        let families = Db::list_cf(&opts, &path)
            .unwrap_or_else(|_| vec![DEFAULT_COLUMN_FAMILY_NAME.to_string()]);
        let db = Db::open_cf(&opts, &path, &families)?;
        info!(path = %path.display(), families = ?families, "stem store opened");

        Ok(Self { path, bucket, db })
    }

    /// Make sure the bucket exists. Safe to call on every startup.
    pub fn initialize(&self) -> StoreResult<()> {
        if self.db.cf_handle(&self.bucket).is_some() {
            debug!(bucket = %self.bucket, "bucket already exists");
            return Ok(());
        }

        match self.db.create_cf(&self.bucket, &Options::default()) {
            Ok(()) => {
                info!(bucket = %self.bucket, "bucket created");
                Ok(())
            }
            // Lost a race with a concurrent initialize
            Err(_) if self.db.cf_handle(&self.bucket).is_some() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn bucket(&self) -> StoreResult<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(&self.bucket)
            .ok_or_else(|| StoreError::MissingBucket(self.bucket.clone()))
    }

    /// Point lookup that reports storage failures to the caller
    pub fn lookup(&self, stem: &str) -> StoreResult<Option<String>> {
        let bucket = self.bucket()?;
        let value = self.db.get_cf(&bucket, stem.as_bytes())?;
        Ok(value.map(|bytes| decode(&bytes)))
    }

    /// Look up the destination for `stem`.
    ///
    /// Storage failures are logged and reported as a miss, so callers cannot
    /// tell an unmapped stem from a broken read.
    pub fn get_destination(&self, stem: &str) -> Option<String> {
        match self.lookup(stem) {
            Ok(destination) => destination,
            Err(e) => {
                warn!(stem, error = %e, "lookup failed, treating stem as unmapped");
                None
            }
        }
    }

    /// Create or overwrite the mapping for `stem`. The write is synced to
    /// disk before this returns.
    pub fn set_destination(&self, stem: &str, destination: &str) -> StoreResult<()> {
        if stem.is_empty() {
            return Err(StoreError::EmptyStem);
        }

        let bucket = self.bucket()?;
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.db
            .put_cf_opt(&bucket, stem.as_bytes(), destination.as_bytes(), &write_opts)?;

        debug!(stem, destination, "destination stored");
        Ok(())
    }

    /// Lazily iterate over every mapping in ascending byte order of the stem.
    ///
    /// The iterator reads from the point-in-time view taken when it was
    /// created and keeps that view pinned until it is dropped.
    pub fn stems(&self) -> StoreResult<Stems<'_>> {
        let bucket = self.bucket()?;
        Ok(Stems {
            inner: self.db.iterator_cf(&bucket, IteratorMode::Start),
        })
    }

    /// Stream every mapping into `sink`, then close it.
    ///
    /// Blocks until the whole scan has been handed off, so it must run on a
    /// blocking thread and the receiving side has to drain promptly. A
    /// dropped receiver ends the scan early.
    pub fn get_stems(&self, sink: mpsc::Sender<StemMapping>) -> StoreResult<()> {
        let mut sent = 0usize;
        for mapping in self.stems()? {
            if sink.blocking_send(mapping?).is_err() {
                debug!(sent, "stem consumer went away, stopping scan");
                return Ok(());
            }
            sent += 1;
        }

        debug!(sent, "stem scan complete");
        Ok(())
    }

    /// Flush and release the database. The store cannot be used afterwards.
    pub fn close(self) -> StoreResult<()> {
        if let Some(bucket) = self.db.cf_handle(&self.bucket) {
            self.db.flush_cf(&bucket)?;
        }
        info!(path = %self.path.display(), "stem store closed");
        Ok(())
    }
}

/// Iterator returned by [`StemStore::stems`]
pub struct Stems<'a> {
    inner: DBIteratorWithThreadMode<'a, Db>,
}

impl Iterator for Stems<'_> {
    type Item = StoreResult<StemMapping>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|entry| -> StoreResult<StemMapping> {
            let (key, value) = entry?;
            Ok(StemMapping {
                stem: decode(&key),
                destination: decode(&value),
            })
        })
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
