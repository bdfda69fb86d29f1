pub mod analysis;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod connector;
pub mod loader;
pub mod properties;
pub mod repository;
pub mod rules;
pub mod types;

pub use analysis::{log_failure, AnalysisSummary, Scanner, ScannerError, ScannerResult};
pub use cache::{CacheEntryInfo, CacheError, LibraryCache, WsCache};
pub use config::{AnalysisMode, ScannerSettings, SettingsError};
pub use connector::{request_path, ConnectorError, ConnectorResult, HttpConnector, ServerConnector};
pub use loader::{LoadError, LoadStrategy, Origin, WsLoader};
pub use properties::Properties;
pub use types::{
    ActiveRule, ActiveRules, AnalysisReport, Issue, LibraryEntry, LibraryIndex, ProfileBackup,
    QualityProfile, QualityProfiles, Severity, SubmitResponse,
};

pub mod prelude {
    pub use crate::analysis::*;
    pub use crate::config::*;
    pub use crate::loader::*;
    pub use crate::types::*;
}
