use crate::connector::request_path;
use crate::loader::{LoadResult, WsLoader};
use crate::rules::RuleSet;
use crate::types::{ActiveRule, ActiveRules, QualityProfile, QualityProfiles};
use tracing::info;

pub const VERSION_PATH: &str = "/api/server/version";
pub const PROFILES_PATH: &str = "/api/qualityprofiles/search";
pub const RULES_PATH: &str = "/api/rules/search";

/// Server-side configuration an analysis depends on.
#[derive(Debug, Clone)]
pub struct ProjectRepositories {
    pub server_version: String,
    pub profiles: Vec<(QualityProfile, Vec<ActiveRule>)>,
}

impl ProjectRepositories {
    pub async fn load(loader: &WsLoader<'_>, project_key: &str) -> LoadResult<Self> {
        let server_version = loader.load_text(VERSION_PATH).await?.trim().to_string();
        info!("Server version {}", server_version);

        info!("Load quality profiles");
        let search: QualityProfiles = loader
            .load_json(&request_path(PROFILES_PATH, &[("projectKey", project_key)]))
            .await?;

        let mut profiles = Vec::with_capacity(search.profiles.len());
        for profile in search.profiles {
            info!("Quality profile for {}: {}", profile.language, profile.name);
            let active: ActiveRules = loader
                .load_json(&request_path(
                    RULES_PATH,
                    &[("activation", "true"), ("qprofile", profile.key.as_str())],
                ))
                .await?;
            profiles.push((profile, active.rules));
        }

        let rule_count: usize = profiles.iter().map(|(_, rules)| rules.len()).sum();
        info!("Load active rules: {} rules", rule_count);

        Ok(Self {
            server_version,
            profiles,
        })
    }

    pub fn rule_set(&self) -> RuleSet {
        let mut rules = RuleSet::new();
        for (profile, active) in &self.profiles {
            for rule in active {
                rules.activate(&profile.language, rule);
            }
        }
        rules
    }
}
