use crate::domain::ports::{StateStore, Visitor, pattern_prefix};
use crate::error::{GuardError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options};
use std::path::Path;
use std::sync::Arc;

/// Column Family holding every JSON-serialized record.
pub const CF_RECORDS: &str = "records";

/// A persistent state store implementation using RocksDB.
///
/// Records live in a single column family keyed by their id, so an index
/// pattern such as `jar:*` becomes a forward scan from the `jar:` prefix.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the "records" column family exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_records = ColumnFamilyDescriptor::new(CF_RECORDS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf_records])?;

        Ok(Self { db: Arc::new(db) })
    }

    fn records(&self) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(CF_RECORDS)
            .ok_or_else(|| GuardError::Storage("Records column family not found".to_string()))
    }
}

#[async_trait]
impl StateStore for RocksDBStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let cf = self.records()?;
        self.db
            .get_cf(cf, key.as_bytes())?
            .ok_or_else(|| GuardError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let cf = self.records()?;
        self.db.put_cf(cf, key.as_bytes(), value)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let cf = self.records()?;
        self.db.delete_cf(cf, key.as_bytes())?;
        Ok(())
    }

    async fn iterate(&self, pattern: &str, visit: Visitor<'_>) -> Result<()> {
        let (prefix, is_scan) = pattern_prefix(pattern);
        if !is_scan {
            return match self.get(prefix).await {
                Ok(value) => {
                    visit(prefix, value.as_slice());
                    Ok(())
                }
                Err(GuardError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            };
        }

        let cf = self.records()?;
        let iter = self.db.iterator_cf(
            cf,
            IteratorMode::From(prefix.as_bytes(), Direction::Forward),
        );

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let key = std::str::from_utf8(&key)
                .map_err(|e| GuardError::Storage(format!("Non UTF-8 key in store: {e}")))?;
            if !visit(key, &value[..]) {
                break;
            }
        }

        Ok(())
    }
}
