use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};

use crate::ids::DatabaseId;

/// Where the stores live and how their connections are tuned.
///
/// Layout under the root:
///
/// - `schema/database.sqlite`: the schema store.
/// - `databases/<database id>/database.sqlite`: one data store per database.  The directory is deleted with the
///   database, which takes the WAL files with it.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    root: Utf8PathBuf,
    busy_timeout: Duration,
    cache_size_kib: u32,
}

impl StoreConfig {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            busy_timeout: Duration::from_millis(1000),
            cache_size_kib: 100000,
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_cache_size_kib(mut self, kib: u32) -> Self {
        self.cache_size_kib = kib;
        self
    }

    pub fn get_root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn get_busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    pub fn get_cache_size_kib(&self) -> u32 {
        self.cache_size_kib
    }

    pub(crate) fn schema_dir(&self) -> Utf8PathBuf {
        self.root.join("schema")
    }

    pub(crate) fn data_store_dir(&self, database: DatabaseId) -> Utf8PathBuf {
        self.root.join("databases").join(database.to_string())
    }
}
