//! RocksDB-backed mirror.
//!
//! One default column family, string keys, values stored LZ4 compressed
//! with their uncompressed size prepended. The chat log is the only value of
//! any size; the rest are a few bytes.

use rocksdb::{BlockBasedOptions, Cache, DBCompressionType, Options, WriteOptions, DB};
use std::path::{Path, PathBuf};

use super::{DurableMirror, MirrorError};

/// Mirror configuration.
#[derive(Debug, Clone)]
pub struct RocksMirrorConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 8MB)
    pub block_cache_size: usize,
    /// fsync every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 64)
    pub max_open_files: i32,
}

impl Default for RocksMirrorConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tabsync_data"),
            block_cache_size: 8 * 1024 * 1024,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

impl RocksMirrorConfig {
    /// Config for tests: tiny cache, caller-provided directory.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 1024 * 1024,
            sync_writes: false,
            max_open_files: 16,
        }
    }
}

pub struct RocksMirror {
    db: DB,
    config: RocksMirrorConfig,
}

impl RocksMirror {
    /// Open (or create) the mirror at the configured path.
    pub fn open(config: RocksMirrorConfig) -> Result<Self, MirrorError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(config.max_open_files);
        opts.set_keep_log_file_num(2);

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        // Values are already LZ4 framed.
        opts.set_compression_type(DBCompressionType::None);

        let db = DB::open(&opts, &config.path)?;
        log::info!("Opened durable mirror at {}", config.path.display());
        Ok(Self { db, config })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn write_options(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        write_opts
    }
}

impl DurableMirror for RocksMirror {
    fn get(&self, key: &str) -> Result<Option<String>, MirrorError> {
        let Some(compressed) = self.db.get(key.as_bytes())? else {
            return Ok(None);
        };
        let bytes = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| MirrorError::Compression(e.to_string()))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| MirrorError::InvalidUtf8(key.to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), MirrorError> {
        let compressed = lz4_flex::compress_prepend_size(value.as_bytes());
        self.db
            .put_opt(key.as_bytes(), compressed, &self.write_options())?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), MirrorError> {
        self.db.delete_opt(key.as_bytes(), &self.write_options())?;
        Ok(())
    }
}
