use crate::cache::{CacheError, LibraryCache};
use crate::connector::{request_path, ConnectorError};
use crate::loader::{LoadError, WsLoader};
use crate::types::LibraryIndex;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

pub const INDEX_PATH: &str = "/batch/index";
pub const FILE_PATH: &str = "/batch/file";

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Invalid library index: {message}")]
    InvalidIndex { message: String },

    #[error("Fail to download {name}: {source}")]
    Download {
        name: String,
        #[source]
        source: ConnectorError,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Fetches the library index and makes every listed library available
/// locally. Libraries already present in the content-addressed cache are not
/// downloaded again.
pub async fn download_libraries(
    loader: &WsLoader<'_>,
    libraries: &LibraryCache,
) -> Result<Vec<PathBuf>, LibraryError> {
    let index: LibraryIndex = loader
        .load_text(INDEX_PATH)
        .await?
        .parse()
        .map_err(|message| LibraryError::InvalidIndex { message })?;

    let mut paths = Vec::with_capacity(index.entries.len());
    let mut downloaded = 0usize;

    for entry in &index.entries {
        if let Some(path) = libraries.get(&entry.name, &entry.sha256)? {
            debug!("Library {} found in cache", entry.name);
            paths.push(path);
            continue;
        }

        debug!("Download {}", entry.name);
        let data = loader
            .connector()
            .get(&request_path(FILE_PATH, &[("name", entry.name.as_str())]))
            .await
            .map_err(|source| LibraryError::Download {
                name: entry.name.clone(),
                source,
            })?;
        paths.push(libraries.put(&entry.name, &entry.sha256, &data)?);
        downloaded += 1;
    }

    info!(
        "Libraries ready: {} ({} downloaded)",
        index.entries.len(),
        downloaded
    );
    Ok(paths)
}
