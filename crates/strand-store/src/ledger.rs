//! Append/rewind ledger over a RocksDB key/value namespace.
//!
//! A [`RewindLedger`] owns one database with three column families:
//! the `meta` singleton records (tip and sequence counters), the primary
//! `data` map, and the `rewind` log of undo records keyed by a big-endian
//! sequence number. Every commit and rewind is a single atomic
//! [`WriteBatch`], so a reader never observes a data mutation without the
//! matching tip move and undo record.

use std::path::Path;

use parking_lot::{Mutex, RwLock};
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use tracing::{debug, info};

use strand_core::error::StoreError;
use strand_core::types::{Hash256, TipPointer};

use crate::config::StoreConfig;

// --- Column family names ---

const CF_META: &str = "meta";
const CF_DATA: &str = "data";
const CF_REWIND: &str = "rewind";

const ALL_CFS: &[&str] = &[CF_META, CF_DATA, CF_REWIND];

// --- Metadata keys ---

const META_TIP: &[u8] = b"tip";
/// Sequence number of the most recent undo record (0 = none ever retained).
const META_REWIND_LATEST: &[u8] = b"rewind_latest";
/// Highest sequence number dropped by retention.
const META_REWIND_PRUNED: &[u8] = b"rewind_pruned";

/// A raw key/value pair.
pub type Entry = (Vec<u8>, Vec<u8>);

/// What a caller wants undone when its commit is rewound.
#[derive(Clone, Debug, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct UndoRecord {
    /// Keys that did not exist before the commit.
    pub remove: Vec<Vec<u8>>,
    /// Prior values of keys the commit overwrote or deleted.
    pub restore: Vec<Entry>,
}

/// A persisted undo record: the caller's [`UndoRecord`] stamped with the tip
/// it undoes back to.
#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct RewindDelta {
    pub previous_tip: TipPointer,
    pub remove: Vec<Vec<u8>>,
    pub restore: Vec<Entry>,
}

/// Tip-addressed key/value store with a stack of reversible commits.
pub struct RewindLedger {
    db: DB,
    namespace: &'static str,
    max_depth: u64,
    sync_writes: bool,
    /// Serializes tip-check-then-write across writers of this ledger.
    writer: Mutex<()>,
    /// Cached copy of the persisted tip, updated after each successful write.
    tip: RwLock<TipPointer>,
}

impl RewindLedger {
    /// Open or create a ledger at `path`.
    ///
    /// A fresh ledger starts at `genesis` with no undo records. An existing
    /// ledger keeps its persisted tip; `genesis` is ignored.
    pub fn open(
        path: impl AsRef<Path>,
        namespace: &'static str,
        genesis: TipPointer,
        config: &StoreConfig,
    ) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(backend)?;

        let mut ledger = Self {
            db,
            namespace,
            max_depth: config.max_reorg_depth,
            sync_writes: config.sync_writes,
            writer: Mutex::new(()),
            tip: RwLock::new(genesis),
        };

        match ledger.read_tip()? {
            Some(tip) => {
                debug!(namespace, height = tip.height, hash = %tip.hash, "opened ledger");
                ledger.tip = RwLock::new(tip);
            }
            None => {
                let cf_meta = ledger.cf_handle(CF_META)?;
                let mut batch = WriteBatch::default();
                batch.put_cf(cf_meta, META_TIP, ledger.encode(&genesis)?);
                batch.put_cf(cf_meta, META_REWIND_LATEST, 0u64.to_le_bytes());
                batch.put_cf(cf_meta, META_REWIND_PRUNED, 0u64.to_le_bytes());
                ledger.write(batch)?;
                info!(namespace, hash = %genesis.hash, "initialized ledger at genesis");
            }
        }

        Ok(ledger)
    }

    /// Namespace label used in logs and corruption reports.
    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    /// Current tip.
    pub fn tip(&self) -> TipPointer {
        *self.tip.read()
    }

    /// Look up one key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf_handle(CF_DATA)?;
        self.db.get_cf(cf, key).map_err(backend)
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Look up several keys and the tip from one consistent snapshot.
    pub fn get_many<K: AsRef<[u8]>>(
        &self,
        keys: &[K],
    ) -> Result<(TipPointer, Vec<Option<Vec<u8>>>), StoreError> {
        let cf_meta = self.cf_handle(CF_META)?;
        let cf_data = self.cf_handle(CF_DATA)?;
        let snapshot = self.db.snapshot();

        let tip_bytes = snapshot
            .get_cf(cf_meta, META_TIP)
            .map_err(backend)?
            .ok_or_else(|| self.corruption("tip record missing"))?;
        let tip: TipPointer = self.decode(&tip_bytes)?;

        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(snapshot.get_cf(cf_data, key.as_ref()).map_err(backend)?);
        }
        Ok((tip, values))
    }

    /// Atomically apply a state transition.
    ///
    /// Fails with [`StoreError::TipMismatch`] without touching the store if
    /// the current tip is not `old_tip`. On success the data mutation, the
    /// tip move and the undo record land in one write batch. Returns the
    /// sequence number of the new undo record.
    pub fn commit(
        &self,
        old_tip: &Hash256,
        new_tip: TipPointer,
        upserts: Vec<Entry>,
        deletions: Vec<Vec<u8>>,
        undo: UndoRecord,
    ) -> Result<u64, StoreError> {
        let _guard = self.writer.lock();

        let current = self.tip();
        if current.hash != *old_tip {
            return Err(StoreError::TipMismatch {
                expected: *old_tip,
                actual: current.hash,
            });
        }

        let latest = self.get_meta_u64(META_REWIND_LATEST)?;
        let mut pruned = self.get_meta_u64(META_REWIND_PRUNED)?;
        let seq = latest + 1;

        let cf_meta = self.cf_handle(CF_META)?;
        let cf_data = self.cf_handle(CF_DATA)?;
        let cf_rewind = self.cf_handle(CF_REWIND)?;
        let mut batch = WriteBatch::default();

        let (upsert_count, deletion_count) = (upserts.len(), deletions.len());
        for key in &deletions {
            batch.delete_cf(cf_data, key);
        }
        for (key, value) in &upserts {
            batch.put_cf(cf_data, key, value);
        }

        let delta = RewindDelta {
            previous_tip: current,
            remove: undo.remove,
            restore: undo.restore,
        };
        batch.put_cf(cf_rewind, seq_key(seq), self.encode(&delta)?);

        // Retention: drop the oldest records beyond the reorg horizon.
        if self.max_depth > 0 && seq - pruned > self.max_depth {
            let horizon = seq - self.max_depth;
            for old in (pruned + 1)..=horizon {
                batch.delete_cf(cf_rewind, seq_key(old));
            }
            pruned = horizon;
            batch.put_cf(cf_meta, META_REWIND_PRUNED, pruned.to_le_bytes());
        }

        batch.put_cf(cf_meta, META_REWIND_LATEST, seq.to_le_bytes());
        batch.put_cf(cf_meta, META_TIP, self.encode(&new_tip)?);

        self.write(batch)?;
        *self.tip.write() = new_tip;

        debug!(
            namespace = self.namespace,
            seq,
            height = new_tip.height,
            hash = %new_tip.hash,
            upserts = upsert_count,
            deletions = deletion_count,
            "committed"
        );
        Ok(seq)
    }

    /// Undo the most recent commit and return the restored tip.
    ///
    /// # Errors
    ///
    /// - [`StoreError::EmptyLedger`] if nothing was ever committed past genesis
    /// - [`StoreError::RewindHorizonExceeded`] if the next record was dropped by retention
    /// - [`StoreError::Corruption`] if the undo record is missing or undecodable
    pub fn rewind(&self) -> Result<TipPointer, StoreError> {
        let _guard = self.writer.lock();

        let latest = self.get_meta_u64(META_REWIND_LATEST)?;
        let pruned = self.get_meta_u64(META_REWIND_PRUNED)?;
        if latest <= pruned {
            return Err(if pruned == 0 {
                StoreError::EmptyLedger
            } else {
                StoreError::RewindHorizonExceeded {
                    max_depth: self.max_depth,
                }
            });
        }

        let cf_meta = self.cf_handle(CF_META)?;
        let cf_data = self.cf_handle(CF_DATA)?;
        let cf_rewind = self.cf_handle(CF_REWIND)?;

        let delta_bytes = self
            .db
            .get_cf(cf_rewind, seq_key(latest))
            .map_err(backend)?
            .ok_or_else(|| self.corruption(&format!("undo record {latest} missing")))?;
        let delta: RewindDelta = self.decode(&delta_bytes)?;

        let mut batch = WriteBatch::default();
        for key in &delta.remove {
            batch.delete_cf(cf_data, key);
        }
        for (key, value) in &delta.restore {
            batch.put_cf(cf_data, key, value);
        }
        batch.delete_cf(cf_rewind, seq_key(latest));
        batch.put_cf(cf_meta, META_REWIND_LATEST, (latest - 1).to_le_bytes());
        batch.put_cf(cf_meta, META_TIP, self.encode(&delta.previous_tip)?);

        self.write(batch)?;
        *self.tip.write() = delta.previous_tip;

        info!(
            namespace = self.namespace,
            seq = latest,
            height = delta.previous_tip.height,
            hash = %delta.previous_tip.hash,
            removed = delta.remove.len(),
            restored = delta.restore.len(),
            "rewound"
        );
        Ok(delta.previous_tip)
    }

    /// Number of commits that can currently be rewound.
    pub fn rewind_depth(&self) -> Result<u64, StoreError> {
        let latest = self.get_meta_u64(META_REWIND_LATEST)?;
        let pruned = self.get_meta_u64(META_REWIND_PRUNED)?;
        Ok(latest.saturating_sub(pruned))
    }

    /// Every key/value pair in the primary map, in key order.
    pub fn entries(&self) -> Result<Vec<Entry>, StoreError> {
        let cf = self.cf_handle(CF_DATA)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(backend)?;
            entries.push((key.into_vec(), value.into_vec()));
        }
        Ok(entries)
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(backend)
    }

    // --- Internal helpers ---

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        self.db.write_opt(batch, &opts).map_err(backend)
    }

    fn read_tip(&self) -> Result<Option<TipPointer>, StoreError> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(cf, META_TIP).map_err(backend)? {
            Some(bytes) => Ok(Some(self.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_meta_u64(&self, key: &[u8]) -> Result<u64, StoreError> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(cf, key).map_err(backend)? {
            Some(bytes) => {
                let array: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| self.corruption("invalid counter length"))?;
                Ok(u64::from_le_bytes(array))
            }
            None => Ok(0),
        }
    }

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family: {name}")))
    }

    fn encode<T: bincode::Encode>(&self, value: &T) -> Result<Vec<u8>, StoreError> {
        bincode::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| StoreError::Codec(e.to_string()))
    }

    /// Decode a persisted record. Failure is always corruption.
    pub(crate) fn decode<T: bincode::Decode<()>>(&self, bytes: &[u8]) -> Result<T, StoreError> {
        let (value, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| self.corruption(&e.to_string()))?;
        Ok(value)
    }

    pub(crate) fn corruption(&self, reason: &str) -> StoreError {
        StoreError::Corruption {
            namespace: self.namespace.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Encode a sequence number as big-endian bytes for ordered iteration.
fn seq_key(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

fn backend(e: rocksdb::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}
