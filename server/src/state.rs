use crate::error::{ServerError, ServerResult};
use chrono::{DateTime, Utc};
use scanner::cache::sha256_hex;
use scanner::rules::{LINE_TOO_LONG, MISSING_NEWLINE, TAB_CHARACTER, TRACK_TODO};
use scanner::types::{
    ActiveRule, AnalysisReport, LibraryEntry, LibraryIndex, ProfileBackup, QualityProfile,
    Severity,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const BUILT_IN_PROFILE: &str = "Sonar way";
pub const LANGUAGES: [&str; 3] = ["java", "js", "py"];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Project {
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone)]
struct StoredProfile {
    profile: QualityProfile,
    rules: Vec<ActiveRule>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAnalysis {
    pub task_id: String,
    pub submitted_at: DateTime<Utc>,
    pub files: usize,
    pub issues: usize,
}

/// Everything the server knows. Survives stop/start; cleared by [`reset`].
///
/// [`reset`]: ServerData::reset
#[derive(Debug, Default)]
pub struct ServerData {
    projects: BTreeMap<String, Project>,
    profiles: Vec<StoredProfile>,
    /// (project key, language) -> profile key
    associations: BTreeMap<(String, String), String>,
    libraries: BTreeMap<String, Vec<u8>>,
    analyses: BTreeMap<String, Vec<StoredAnalysis>>,
}

pub fn profile_key(language: &str, name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    format!("{}-{}", language, slug.trim_matches('-'))
}

fn built_in_rules(language: &str) -> Vec<ActiveRule> {
    match language {
        "java" => vec![
            ActiveRule::new(LINE_TOO_LONG, Severity::Minor).with_param("maximumLineLength", "120"),
            ActiveRule::new(TRACK_TODO, Severity::Info),
            ActiveRule::new(TAB_CHARACTER, Severity::Minor),
            ActiveRule::new(MISSING_NEWLINE, Severity::Minor),
        ],
        _ => vec![
            ActiveRule::new(TRACK_TODO, Severity::Info),
            ActiveRule::new(MISSING_NEWLINE, Severity::Minor),
        ],
    }
}

impl ServerData {
    pub fn new(version: &str) -> Self {
        let mut data = Self::default();
        data.reset(version);
        data
    }

    /// Drops projects, custom profiles and analyses, then seeds the built-in
    /// profiles and the library set.
    pub fn reset(&mut self, version: &str) {
        *self = Self::default();

        for language in LANGUAGES {
            let profile = QualityProfile {
                key: profile_key(language, BUILT_IN_PROFILE),
                name: BUILT_IN_PROFILE.to_string(),
                language: language.to_string(),
                is_default: true,
            };
            self.profiles.push(StoredProfile {
                profile,
                rules: built_in_rules(language),
            });
        }

        self.libraries.insert(
            "scanner-engine.jar".to_string(),
            format!("scanner-engine {}", version).into_bytes(),
        );
        self.libraries.insert(
            "java-plugin.jar".to_string(),
            format!("java-plugin {}", version).into_bytes(),
        );
        info!("Server data reset");
    }

    pub fn library_index(&self) -> LibraryIndex {
        LibraryIndex {
            entries: self
                .libraries
                .iter()
                .map(|(name, data)| LibraryEntry {
                    name: name.clone(),
                    sha256: sha256_hex(data),
                })
                .collect(),
        }
    }

    /// Adds a library to the index, replacing one with the same name.
    pub fn add_library(&mut self, name: &str, data: Vec<u8>) -> ServerResult<()> {
        if name.is_empty() || name.contains(['|', '\n']) {
            return Err(ServerError::BadRequest {
                message: format!("Invalid library name '{}'", name),
            });
        }
        self.libraries.insert(name.to_string(), data);
        Ok(())
    }

    pub fn library(&self, name: &str) -> ServerResult<Vec<u8>> {
        self.libraries
            .get(name)
            .cloned()
            .ok_or_else(|| ServerError::NotFound {
                message: format!("Library {} not found", name),
            })
    }

    /// Creates or replaces the profile identified by (name, language).
    pub fn restore_profile(&mut self, backup: ProfileBackup) -> ServerResult<QualityProfile> {
        if backup.name.trim().is_empty() || backup.language.trim().is_empty() {
            return Err(ServerError::BadRequest {
                message: "Profile name and language are mandatory".to_string(),
            });
        }

        if backup.is_default {
            for stored in &mut self.profiles {
                if stored.profile.language == backup.language {
                    stored.profile.is_default = false;
                }
            }
        }

        let existing = self
            .profiles
            .iter_mut()
            .find(|p| p.profile.name == backup.name && p.profile.language == backup.language);

        let profile = match existing {
            Some(stored) => {
                stored.rules = backup.rules;
                stored.profile.is_default |= backup.is_default;
                stored.profile.clone()
            }
            None => {
                let profile = QualityProfile {
                    key: self.unique_profile_key(&backup.language, &backup.name),
                    name: backup.name,
                    language: backup.language,
                    is_default: backup.is_default,
                };
                self.profiles.push(StoredProfile {
                    profile: profile.clone(),
                    rules: backup.rules,
                });
                profile
            }
        };

        info!("Restored profile {} ({})", profile.name, profile.language);
        Ok(profile)
    }

    fn unique_profile_key(&self, language: &str, name: &str) -> String {
        let base = profile_key(language, name);
        let taken = |key: &str| self.profiles.iter().any(|p| p.profile.key == key);
        if !taken(base.as_str()) {
            return base;
        }
        (2..)
            .map(|n| format!("{}-{}", base, n))
            .find(|key| !taken(key.as_str()))
            .unwrap_or(base)
    }

    pub fn provision_project(&mut self, key: &str, name: &str) -> ServerResult<Project> {
        if key.trim().is_empty() {
            return Err(ServerError::BadRequest {
                message: "Project key is mandatory".to_string(),
            });
        }
        if self.projects.contains_key(key) {
            return Err(ServerError::AlreadyExists {
                message: format!("Project {} already exists", key),
            });
        }
        let project = Project {
            key: key.to_string(),
            name: name.to_string(),
        };
        self.projects.insert(key.to_string(), project.clone());
        info!("Provisioned project {}", key);
        Ok(project)
    }

    pub fn project(&self, key: &str) -> Option<&Project> {
        self.projects.get(key)
    }

    pub fn associate_project_to_profile(
        &mut self,
        project_key: &str,
        language: &str,
        profile_name: &str,
    ) -> ServerResult<()> {
        if !self.projects.contains_key(project_key) {
            return Err(ServerError::NotFound {
                message: format!("Project {} not found", project_key),
            });
        }
        let profile_key = self
            .profiles
            .iter()
            .find(|p| p.profile.name == profile_name && p.profile.language == language)
            .map(|p| p.profile.key.clone())
            .ok_or_else(|| ServerError::NotFound {
                message: format!("Quality profile {} for {} not found", profile_name, language),
            })?;

        self.associations
            .insert((project_key.to_string(), language.to_string()), profile_key);
        info!(
            "Project {} associated to profile {} ({})",
            project_key, profile_name, language
        );
        Ok(())
    }

    /// One profile per language: the associated one, else the default one.
    pub fn profiles_for(&self, project_key: Option<&str>) -> Vec<QualityProfile> {
        let mut result = Vec::new();
        for language in self.languages() {
            let associated = project_key
                .and_then(|key| self.associations.get(&(key.to_string(), language.clone())))
                .and_then(|profile_key| self.profiles.iter().find(|p| &p.profile.key == profile_key));
            let chosen = associated.or_else(|| {
                self.profiles
                    .iter()
                    .find(|p| p.profile.language == language && p.profile.is_default)
            });
            if let Some(stored) = chosen {
                result.push(stored.profile.clone());
            }
        }
        debug!("Profiles for {:?}: {}", project_key, result.len());
        result
    }

    fn languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self.profiles.iter().map(|p| p.profile.language.clone()).collect();
        languages.sort();
        languages.dedup();
        languages
    }

    pub fn active_rules(&self, profile_key: &str) -> ServerResult<Vec<ActiveRule>> {
        self.profiles
            .iter()
            .find(|p| p.profile.key == profile_key)
            .map(|p| p.rules.clone())
            .ok_or_else(|| ServerError::NotFound {
                message: format!("Quality profile {} not found", profile_key),
            })
    }

    /// Records a submitted report. Unknown projects are provisioned on first
    /// analysis.
    pub fn submit(&mut self, project_key: &str, report: &AnalysisReport) -> ServerResult<String> {
        if report.project_key != project_key {
            return Err(ServerError::BadRequest {
                message: format!(
                    "Report is for {} but was submitted for {}",
                    report.project_key, project_key
                ),
            });
        }
        if !self.projects.contains_key(project_key) {
            self.provision_project(project_key, &report.project_name)?;
        }

        let task_id = uuid::Uuid::new_v4().to_string();
        self.analyses
            .entry(project_key.to_string())
            .or_default()
            .push(StoredAnalysis {
                task_id: task_id.clone(),
                submitted_at: Utc::now(),
                files: report.files.len(),
                issues: report.issues.len(),
            });
        info!("Analysis of {} accepted as task {}", project_key, task_id);
        Ok(task_id)
    }

    pub fn analyses(&self, project_key: &str) -> Vec<StoredAnalysis> {
        self.analyses.get(project_key).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sonar_way_backup() -> ProfileBackup {
        ProfileBackup {
            name: "sonar-way".to_string(),
            language: "java".to_string(),
            is_default: false,
            rules: vec![ActiveRule::new(TRACK_TODO, Severity::Major)],
        }
    }

    #[test]
    fn test_profile_key() {
        assert_eq!(profile_key("java", "Sonar way"), "java-sonar-way");
        assert_eq!(profile_key("java", "sonar-way"), "java-sonar-way");
        assert_eq!(profile_key("py", "  My  Profile! "), "py-my-profile");
    }

    #[test]
    fn test_reset_seeds_defaults() {
        let data = ServerData::new("5.6");
        let profiles = data.profiles_for(None);
        assert_eq!(profiles.len(), LANGUAGES.len());
        assert!(profiles.iter().all(|p| p.is_default && p.name == BUILT_IN_PROFILE));
        assert_eq!(data.library_index().entries.len(), 2);
        assert_eq!(data.library("java-plugin.jar").unwrap(), b"java-plugin 5.6");
    }

    #[test]
    fn test_add_library() {
        let mut data = ServerData::new("5.6");
        data.add_library("lib+extra.jar", b"extra".to_vec()).unwrap();
        assert_eq!(data.library_index().entries.len(), 3);
        assert_eq!(data.library("lib+extra.jar").unwrap(), b"extra");
        assert!(data.add_library("bad|name.jar", Vec::new()).is_err());
        assert!(data.add_library("", Vec::new()).is_err());
    }

    #[test]
    fn test_associated_project_gets_its_profile() {
        let mut data = ServerData::new("5.6");
        let restored = data.restore_profile(sonar_way_backup()).unwrap();
        data.provision_project("java:sample", "Java Sample, with comma").unwrap();
        data.associate_project_to_profile("java:sample", "java", "sonar-way")
            .unwrap();

        let java = data
            .profiles_for(Some("java:sample"))
            .into_iter()
            .find(|p| p.language == "java")
            .unwrap();
        assert_eq!(java.key, restored.key);
        assert_eq!(restored.key, "java-sonar-way-2");
        assert_eq!(data.active_rules(&java.key).unwrap().len(), 1);

        let other = data
            .profiles_for(Some("java:sample-non-associated"))
            .into_iter()
            .find(|p| p.language == "java")
            .unwrap();
        assert_eq!(other.name, BUILT_IN_PROFILE);
    }

    #[test]
    fn test_restore_replaces_existing_profile() {
        let mut data = ServerData::new("5.6");
        data.restore_profile(sonar_way_backup()).unwrap();
        let mut backup = sonar_way_backup();
        backup.rules.clear();
        backup.is_default = true;
        let profile = data.restore_profile(backup).unwrap();

        assert!(data.active_rules(&profile.key).unwrap().is_empty());
        let java_defaults: Vec<_> = data
            .profiles_for(None)
            .into_iter()
            .filter(|p| p.language == "java")
            .collect();
        assert_eq!(java_defaults.len(), 1);
        assert_eq!(java_defaults[0].name, "sonar-way");
    }

    #[test]
    fn test_provision_and_associate_errors() {
        let mut data = ServerData::new("5.6");
        data.provision_project("a", "A").unwrap();
        assert!(matches!(
            data.provision_project("a", "A"),
            Err(ServerError::AlreadyExists { .. })
        ));
        assert!(matches!(
            data.associate_project_to_profile("missing", "java", BUILT_IN_PROFILE),
            Err(ServerError::NotFound { .. })
        ));
        assert!(matches!(
            data.associate_project_to_profile("a", "java", "nope"),
            Err(ServerError::NotFound { .. })
        ));
    }

    #[test]
    fn test_submit_provisions_unknown_project() {
        let mut data = ServerData::new("5.6");
        let report = AnalysisReport {
            project_key: "new:project".to_string(),
            project_name: "New".to_string(),
            analysis_date: Utc::now(),
            files: vec!["src/A.java".to_string()],
            issues: Vec::new(),
        };
        let task = data.submit("new:project", &report).unwrap();
        assert_eq!(data.project("new:project").unwrap().name, "New");
        let analyses = data.analyses("new:project");
        assert_eq!(analyses.len(), 1);
        assert_eq!(analyses[0].task_id, task);
        assert_eq!(analyses[0].files, 1);

        assert!(matches!(
            data.submit("other", &report),
            Err(ServerError::BadRequest { .. })
        ));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut data = ServerData::new("5.6");
        data.provision_project("a", "A").unwrap();
        data.restore_profile(sonar_way_backup()).unwrap();
        data.reset("5.6");
        assert!(data.project("a").is_none());
        assert_eq!(data.profiles_for(None).len(), LANGUAGES.len());
        assert!(data.active_rules("java-sonar-way").is_ok());
    }
}
