//! Analysis server used by the scanner: library distribution, quality
//! profiles, active rules and report submission.
//!
//! [`AnalysisServer`] can be stopped and started again on the same address,
//! keeping its data, so a client configured with [`AnalysisServer::base_url`]
//! sees the server go offline and come back.

pub mod error;
pub mod routes;
pub mod state;
pub mod version;

pub use error::{ServerError, ServerResult};
pub use state::{Project, ServerData, StoredAnalysis, BUILT_IN_PROFILE};
pub use version::Version;

use routes::{router, AppState};
use scanner::types::{ProfileBackup, QualityProfile};
use serde::{Deserialize, Serialize};
use std::future::IntoFuture;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::{mpsc, Arc, PoisonError, RwLock};
use std::thread;
use tokio::runtime::Builder;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,
    /// Port to bind on first start, 0 picks a free port
    pub port: u16,
    /// Version reported to clients
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            version: "5.6".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn validate(&self) -> ServerResult<()> {
        self.version
            .parse::<Version>()
            .map_err(|message| ServerError::InvalidConfig { message })?;
        self.bind_addr().map(|_| ())
    }

    fn bind_addr(&self) -> ServerResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ServerError::InvalidConfig {
                message: format!("Invalid bind address {}:{}: {}", self.host, self.port, e),
            })
    }
}

/// Handle of the serving thread
struct Running {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<thread::JoinHandle<()>>,
}

pub struct AnalysisServer {
    config: ServerConfig,
    version: Version,
    data: Arc<RwLock<ServerData>>,
    addr: Option<SocketAddr>,
    running: Option<Running>,
}

impl AnalysisServer {
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        let version = config
            .version
            .parse::<Version>()
            .map_err(|message| ServerError::InvalidConfig { message })?;
        let data = ServerData::new(&config.version);
        Ok(Self {
            config,
            version,
            data: Arc::new(RwLock::new(data)),
            addr: None,
            running: None,
        })
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address of the server; stable once it has been started.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn base_url(&self) -> Option<String> {
        self.addr.map(|addr| format!("http://{}", addr))
    }

    /// Starts serving. The first start binds the configured address and
    /// records it; later starts rebind that same address. No-op when running.
    pub fn start(&mut self) -> ServerResult<()> {
        if self.running.is_some() {
            debug!("Server already running");
            return Ok(());
        }

        let bind_addr = match self.addr {
            Some(addr) => addr,
            None => self.config.bind_addr()?,
        };
        let listener = StdTcpListener::bind(bind_addr).map_err(|source| ServerError::Bind {
            addr: bind_addr.to_string(),
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::Bind {
                addr: bind_addr.to_string(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: bind_addr.to_string(),
            source,
        })?;

        let app = router(AppState {
            data: Arc::clone(&self.data),
            version: self.config.version.clone(),
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), String>>(1);

        let join = thread::Builder::new()
            .name("analysis-server".to_string())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("Failed to build server runtime: {}", e)));
                        return;
                    }
                };
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            let _ = ready_tx.send(Err(format!("Failed to register listener: {}", e)));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    tokio::select! {
                        result = axum::serve(listener, app).into_future() => {
                            if let Err(e) = result {
                                error!("Server terminated: {}", e);
                            }
                        }
                        _ = shutdown_rx => {}
                    }
                });
                // Closes the listener and all open connections.
                drop(runtime);
            })
            .map_err(|e| ServerError::Runtime {
                message: format!("Failed to spawn server thread: {}", e),
            })?;
        let join = wait_until_ready(&ready_rx, join)?;

        self.addr = Some(addr);
        self.running = Some(Running {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        });
        info!("Server {} started on http://{}", self.version, addr);
        Ok(())
    }

    /// Stops serving and waits for the serving thread. No-op when stopped.
    pub fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            debug!("Server already stopped");
            return;
        };
        if let Some(shutdown) = running.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(join) = running.join.take() {
            if join.join().is_err() {
                error!("Server thread panicked");
            }
        }
        info!("Server stopped");
    }

    fn with_data<T>(&self, f: impl FnOnce(&mut ServerData) -> T) -> T {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut data)
    }

    pub fn reset_data(&self) {
        let version = self.config.version.clone();
        self.with_data(|data| data.reset(&version));
    }

    pub fn restore_profile(&self, backup: ProfileBackup) -> ServerResult<QualityProfile> {
        self.with_data(|data| data.restore_profile(backup))
    }

    pub fn provision_project(&self, key: &str, name: &str) -> ServerResult<Project> {
        self.with_data(|data| data.provision_project(key, name))
    }

    pub fn associate_project_to_profile(
        &self,
        project_key: &str,
        language: &str,
        profile_name: &str,
    ) -> ServerResult<()> {
        self.with_data(|data| data.associate_project_to_profile(project_key, language, profile_name))
    }

    pub fn analyses(&self, project_key: &str) -> Vec<StoredAnalysis> {
        self.with_data(|data| data.analyses(project_key))
    }

    pub fn add_library(&self, name: &str, data: Vec<u8>) -> ServerResult<()> {
        self.with_data(|state| state.add_library(name, data))
    }
}

/// Blocks until the serving thread reports whether it accepts connections.
/// A thread that failed to come up is joined before its error is returned.
fn wait_until_ready(
    ready: &mpsc::Receiver<Result<(), String>>,
    join: thread::JoinHandle<()>,
) -> ServerResult<thread::JoinHandle<()>> {
    let message = match ready.recv() {
        Ok(Ok(())) => return Ok(join),
        Ok(Err(message)) => message,
        Err(_) => "Server thread exited before accepting connections".to_string(),
    };
    if join.join().is_err() {
        error!("Server thread panicked");
    }
    error!("{}", message);
    Err(ServerError::Runtime { message })
}

impl Drop for AnalysisServer {
    fn drop(&mut self) {
        self.stop();
    }
}
