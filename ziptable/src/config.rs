//! Table options and the reader-side environment.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Build- and open-time knobs for the table format.
#[derive(Debug, Clone)]
pub struct TableOptions {
    /// Per-value probability of feeding the dictionary trainer.
    pub sample_ratio: f64,
    /// Directory for the builder's staging files.
    pub local_temp_dir: PathBuf,
    /// Nesting hint for the trie builder. Validated; format v1 always emits
    /// a single nest level.
    pub index_nest_level: u32,
    /// Store-access policy: negative never uses pread, zero always does,
    /// positive switches to pread when the mean record is smaller than this
    /// many bytes.
    pub min_pread_len: i32,
    /// Prefault and advise the index pages on open.
    pub warm_up_index_on_open: bool,
    /// Prefault and advise the value pages on open (mmap access only).
    pub warm_up_value_on_open: bool,
    /// Advise random access on the value region when it is not warmed.
    pub advise_random_read: bool,
    /// Size ratio of the trie lookup accelerator; zero disables it.
    pub index_cache_ratio: f64,
    /// Record a build timestamp and report compression statistics to the
    /// environment's probe on open.
    pub enable_compression_probe: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        TableOptions {
            sample_ratio: 0.03,
            local_temp_dir: std::env::temp_dir(),
            index_nest_level: 3,
            min_pread_len: -1,
            warm_up_index_on_open: true,
            warm_up_value_on_open: false,
            advise_random_read: true,
            index_cache_ratio: 0.0,
            enable_compression_probe: true,
        }
    }
}

impl TableOptions {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.sample_ratio) {
            return Err(Error::invalid(format!(
                "sample_ratio must be within [0, 1], got {}",
                self.sample_ratio
            )));
        }
        if self.index_nest_level == 0 {
            return Err(Error::invalid("index_nest_level must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.index_cache_ratio) {
            return Err(Error::invalid(format!(
                "index_cache_ratio must be within [0, 1], got {}",
                self.index_cache_ratio
            )));
        }
        Ok(())
    }
}

/// Reader-side environment supplied by the enclosing engine.
#[derive(Default, Clone)]
pub struct ReadEnv {
    /// The format serves lookups straight out of mapped pages; opening with
    /// this unset is refused.
    pub use_mmap_reads: bool,
    /// Engine-wide random-access hint, OR-ed with
    /// [`TableOptions::advise_random_read`].
    pub advise_random_on_open: bool,
    /// Shared descriptor cache for pread-mode readers.
    pub file_cache: Option<Arc<OsFileCache>>,
    /// Sink for compression statistics.
    pub compression_probe: Option<Arc<CompressionProbe>>,
}

impl ReadEnv {
    pub fn mmap() -> Self {
        ReadEnv {
            use_mmap_reads: true,
            ..Default::default()
        }
    }
}

/// Shared cache of open file descriptors. pread-mode readers register on
/// open and unregister on drop; the ids let the enclosing engine observe
/// and bound descriptor usage.
#[derive(Default)]
#[derive(Debug)]
pub struct OsFileCache {
    files: Mutex<HashMap<u64, Arc<File>>>,
    next_id: AtomicU64,
}

impl OsFileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, file: Arc<File>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.files.lock().insert(id, file);
        id
    }

    pub fn get(&self, id: u64) -> Option<Arc<File>> {
        self.files.lock().get(&id).cloned()
    }

    pub fn unregister(&self, id: u64) {
        self.files.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }
}

/// Aggregated compression statistics, fed by readers on open so an outer
/// advisor can steer future builds.
#[derive(Default)]
pub struct CompressionProbe {
    inner: Mutex<CompressionStats>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CompressionStats {
    pub tables: u64,
    pub raw_value_bytes: u64,
    pub zip_value_bytes: u64,
    pub raw_total_bytes: u64,
    pub file_bytes: u64,
    pub last_build_timestamp_ms: u64,
}

impl CompressionProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(
        &self,
        build_timestamp_ms: u64,
        raw_value: u64,
        zip_value: u64,
        raw_total: u64,
        file_size: u64,
    ) {
        let mut stats = self.inner.lock();
        stats.tables += 1;
        stats.raw_value_bytes += raw_value;
        stats.zip_value_bytes += zip_value;
        stats.raw_total_bytes += raw_total;
        stats.file_bytes += file_size;
        stats.last_build_timestamp_ms = stats.last_build_timestamp_ms.max(build_timestamp_ms);
    }

    pub fn snapshot(&self) -> CompressionStats {
        *self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        TableOptions::default().validate().unwrap();
    }

    #[test]
    fn test_bad_sample_ratio_rejected() {
        let opts = TableOptions {
            sample_ratio: 1.5,
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_file_cache_register_unregister() {
        let cache = OsFileCache::new();
        let file = Arc::new(tempfile::tempfile().unwrap());
        let id = cache.register(Arc::clone(&file));
        assert!(cache.get(id).is_some());
        cache.unregister(id);
        assert!(cache.get(id).is_none());
        assert!(cache.is_empty());
    }
}
