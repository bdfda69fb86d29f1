//! On-disk stores kept in the scanner user home.
//!
//! `WsCache` keeps the last successful web-service responses per server so an
//! analysis can run while the server is unreachable. `LibraryCache` keeps
//! downloaded libraries addressed by their SHA-256 digest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const WS_CACHE_DIR: &str = "ws_cache";
pub const LIBRARY_CACHE_DIR: &str = "cache";

const META_SUFFIX: &str = ".meta.json";
const TMP_SUFFIX: &str = ".tmp";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Hash mismatch for {name}: expected {expected}, got {actual}")]
    HashMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid library name: {name}")]
    InvalidName { name: String },
}

pub type CacheResult<T> = Result<T, CacheError>;

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Writes through a temporary sibling so readers never observe partial files.
fn write_atomic(path: &Path, data: &[u8]) -> CacheResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data).map_err(io_error(&tmp))?;
    fs::rename(&tmp, path).map_err(io_error(path))
}

/// Metadata stored next to every cached response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntryInfo {
    pub key: String,
    pub stored_at: DateTime<Utc>,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct WsCache {
    root: PathBuf,
}

impl WsCache {
    /// Opens the cache of `server_url` inside `user_home`, creating it if needed.
    pub fn open(user_home: &Path, server_url: &str) -> CacheResult<Self> {
        let root = Self::server_dir(user_home, server_url);
        fs::create_dir_all(&root).map_err(io_error(&root))?;
        debug!("Web service cache: {}", root.display());
        Ok(Self { root })
    }

    /// Directory holding the entries of one server. Only a digest of the URL
    /// is used so the layout is independent of URL characters.
    pub fn server_dir(user_home: &Path, server_url: &str) -> PathBuf {
        let digest = sha256_hex(server_url.trim_end_matches('/').as_bytes());
        user_home.join(WS_CACHE_DIR).join(&digest[..16])
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn body_path(&self, key: &str) -> PathBuf {
        self.root.join(sha256_hex(key.as_bytes()))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        let mut name = sha256_hex(key.as_bytes());
        name.push_str(META_SUFFIX);
        self.root.join(name)
    }

    /// Returns the cached body for `key`. Unreadable entries count as misses.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.body_path(key);
        match fs::read(&path) {
            Ok(data) => {
                debug!(key, "ws cache hit");
                Some(data)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(key, "ws cache miss");
                None
            }
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "unreadable ws cache entry; ignoring");
                None
            }
        }
    }

    pub fn put(&self, key: &str, data: &[u8]) -> CacheResult<()> {
        write_atomic(&self.body_path(key), data)?;

        let info = CacheEntryInfo {
            key: key.to_string(),
            stored_at: Utc::now(),
            size: data.len() as u64,
        };
        let meta = serde_json::to_vec_pretty(&info).map_err(|e| CacheError::Io {
            path: self.meta_path(key),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;
        write_atomic(&self.meta_path(key), &meta)?;
        debug!(key, size = data.len(), "ws cache store");
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.body_path(key).is_file()
    }

    /// Lists entries that have readable metadata, oldest first.
    pub fn entries(&self) -> CacheResult<Vec<CacheEntryInfo>> {
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.root).map_err(io_error(&self.root))? {
            let path = dir_entry.map_err(io_error(&self.root))?.path();
            let is_meta = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(META_SUFFIX));
            if !is_meta {
                continue;
            }
            match fs::read(&path)
                .ok()
                .and_then(|bytes| serde_json::from_slice::<CacheEntryInfo>(&bytes).ok())
            {
                Some(info) => entries.push(info),
                None => warn!(path = %path.display(), "skipping unreadable ws cache metadata"),
            }
        }
        entries.sort_by(|a, b| a.stored_at.cmp(&b.stored_at).then_with(|| a.key.cmp(&b.key)));
        Ok(entries)
    }

    pub fn clear(&self) -> CacheResult<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root).map_err(io_error(&self.root))?;
        }
        fs::create_dir_all(&self.root).map_err(io_error(&self.root))
    }
}

/// Content-addressed store: `<user home>/cache/<sha256>/<name>`.
#[derive(Debug, Clone)]
pub struct LibraryCache {
    root: PathBuf,
}

impl LibraryCache {
    pub fn open(user_home: &Path) -> CacheResult<Self> {
        let root = user_home.join(LIBRARY_CACHE_DIR);
        fs::create_dir_all(&root).map_err(io_error(&root))?;
        Ok(Self { root })
    }

    fn validate_name(name: &str) -> CacheResult<()> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(CacheError::InvalidName {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn path_for(&self, name: &str, sha256: &str) -> PathBuf {
        self.root.join(sha256).join(name)
    }

    /// Returns the cached file if present and its content matches `sha256`.
    pub fn get(&self, name: &str, sha256: &str) -> CacheResult<Option<PathBuf>> {
        Self::validate_name(name)?;
        let path = self.path_for(name, sha256);
        match fs::read(&path) {
            Ok(data) if sha256_hex(&data) == sha256 => Ok(Some(path)),
            Ok(_) => {
                warn!(name, "cached library is corrupt; discarding");
                let _ = fs::remove_file(&path);
                Ok(None)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Io { path, source: e }),
        }
    }

    /// Verifies `data` against `sha256` and stores it.
    pub fn put(&self, name: &str, sha256: &str, data: &[u8]) -> CacheResult<PathBuf> {
        Self::validate_name(name)?;
        let actual = sha256_hex(data);
        if actual != sha256 {
            return Err(CacheError::HashMismatch {
                name: name.to_string(),
                expected: sha256.to_string(),
                actual,
            });
        }
        let dir = self.root.join(sha256);
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        let path = dir.join(name);
        write_atomic(&path, data)?;
        Ok(path)
    }
}
