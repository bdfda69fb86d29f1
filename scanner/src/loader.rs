use crate::cache::WsCache;
use crate::connector::{ConnectorError, ServerConnector};
use serde::de::DeserializeOwned;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Server {url} can not be reached")]
    Unreachable {
        url: String,
        #[source]
        source: ConnectorError,
    },

    #[error("Server {url} can not be reached and data is not cached")]
    NotCached { url: String },

    #[error(transparent)]
    Connector(ConnectorError),

    #[error("Invalid response for {path}: {message}")]
    InvalidResponse { path: String, message: String },
}

pub type LoadResult<T> = Result<T, LoadError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStrategy {
    /// Only the server is consulted.
    ServerOnly,
    /// The server is consulted; the cache is used only when it is unreachable.
    ServerFirst,
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStrategy::ServerOnly => write!(f, "server_only"),
            LoadStrategy::ServerFirst => write!(f, "server_first"),
        }
    }
}

/// Where a loaded payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Server,
    Cache,
}

/// Web-service loader applying a [`LoadStrategy`] on top of a connector and
/// an optional [`WsCache`]. Successful server responses are written through
/// to the cache whenever one is attached.
pub struct WsLoader<'a> {
    connector: &'a dyn ServerConnector,
    cache: Option<WsCache>,
    strategy: LoadStrategy,
}

impl<'a> WsLoader<'a> {
    pub fn new(connector: &'a dyn ServerConnector, cache: Option<WsCache>, strategy: LoadStrategy) -> Self {
        Self {
            connector,
            cache,
            strategy,
        }
    }

    pub fn connector(&self) -> &'a dyn ServerConnector {
        self.connector
    }

    pub async fn load(&self, path: &str) -> LoadResult<(Vec<u8>, Origin)> {
        match self.connector.get(path).await {
            Ok(data) => {
                self.store(path, &data);
                Ok((data, Origin::Server))
            }
            Err(e) if e.is_unreachable() => self.on_unreachable(path, e),
            Err(e) => Err(LoadError::Connector(e)),
        }
    }

    fn on_unreachable(&self, path: &str, err: ConnectorError) -> LoadResult<(Vec<u8>, Origin)> {
        let url = self.connector.base_url().to_string();
        match (self.strategy, &self.cache) {
            (LoadStrategy::ServerFirst, Some(cache)) => {
                warn!("Server {} can not be reached, trying cache", url);
                debug!("Cause: {}", err);
                match cache.get(path) {
                    Some(data) => {
                        info!("Using cached data for {}", path);
                        Ok((data, Origin::Cache))
                    }
                    None => Err(LoadError::NotCached { url }),
                }
            }
            (LoadStrategy::ServerFirst, None) => {
                warn!("Server {} can not be reached, trying cache", url);
                Err(LoadError::NotCached { url })
            }
            (LoadStrategy::ServerOnly, _) => Err(LoadError::Unreachable { url, source: err }),
        }
    }

    fn store(&self, path: &str, data: &[u8]) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(path, data) {
                warn!("Failed to cache response of {}: {}", path, e);
            }
        }
    }

    pub async fn load_text(&self, path: &str) -> LoadResult<String> {
        let (data, _) = self.load(path).await?;
        String::from_utf8(data).map_err(|e| LoadError::InvalidResponse {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    pub async fn load_json<T: DeserializeOwned>(&self, path: &str) -> LoadResult<T> {
        let (data, _) = self.load(path).await?;
        serde_json::from_slice(&data).map_err(|e| LoadError::InvalidResponse {
            path: path.to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::tests::MockConnector;
    use tempfile::TempDir;

    fn cache_in(home: &TempDir, connector: &MockConnector) -> WsCache {
        WsCache::open(home.path(), connector.base_url()).unwrap()
    }

    #[tokio::test]
    async fn test_server_only_writes_through_and_fails_offline() {
        let home = TempDir::new().unwrap();
        let connector = MockConnector::new().with_response("/api/server/version", "5.6");
        let loader = WsLoader::new(&connector, Some(cache_in(&home, &connector)), LoadStrategy::ServerOnly);

        let (data, origin) = loader.load("/api/server/version").await.unwrap();
        assert_eq!(data, b"5.6");
        assert_eq!(origin, Origin::Server);
        assert!(cache_in(&home, &connector).contains("/api/server/version"));

        connector.set_online(false);
        let err = loader.load("/api/server/version").await.unwrap_err();
        assert!(matches!(err, LoadError::Unreachable { .. }));
        assert!(err.to_string().contains("can not be reached"));
    }

    #[tokio::test]
    async fn test_server_first_falls_back_to_cache() {
        let home = TempDir::new().unwrap();
        let connector = MockConnector::new().with_response("/api/server/version", "5.6");
        let loader = WsLoader::new(&connector, Some(cache_in(&home, &connector)), LoadStrategy::ServerFirst);

        loader.load("/api/server/version").await.unwrap();
        connector.set_online(false);

        let (data, origin) = loader.load("/api/server/version").await.unwrap();
        assert_eq!(data, b"5.6");
        assert_eq!(origin, Origin::Cache);
    }

    #[tokio::test]
    async fn test_server_first_with_empty_cache_reports_not_cached() {
        let home = TempDir::new().unwrap();
        let connector = MockConnector::new();
        connector.set_online(false);
        let loader = WsLoader::new(&connector, Some(cache_in(&home, &connector)), LoadStrategy::ServerFirst);

        let err = loader.load("/batch/index").await.unwrap_err();
        assert!(matches!(err, LoadError::NotCached { .. }));
        assert_eq!(
            err.to_string(),
            "Server http://mock:9000 can not be reached and data is not cached"
        );
    }

    #[tokio::test]
    async fn test_http_errors_never_fall_back() {
        let home = TempDir::new().unwrap();
        let connector = MockConnector::new();
        let cache = cache_in(&home, &connector);
        cache.put("/missing", b"stale").unwrap();
        let loader = WsLoader::new(&connector, Some(cache), LoadStrategy::ServerFirst);

        let err = loader.load("/missing").await.unwrap_err();
        assert!(matches!(
            err,
            LoadError::Connector(ConnectorError::Status { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_load_json_reports_invalid_payload() {
        let connector = MockConnector::new().with_response("/api/qualityprofiles/search", "not json");
        let loader = WsLoader::new(&connector, None, LoadStrategy::ServerOnly);

        let err = loader
            .load_json::<crate::types::QualityProfiles>("/api/qualityprofiles/search")
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidResponse { .. }));
    }
}
