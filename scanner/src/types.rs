use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Minor,
    Major,
    Critical,
    Blocker,
}

impl Default for Severity {
    fn default() -> Self {
        Self::Major
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Info => "INFO",
            Severity::Minor => "MINOR",
            Severity::Major => "MAJOR",
            Severity::Critical => "CRITICAL",
            Severity::Blocker => "BLOCKER",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QualityProfile {
    pub key: String,
    pub name: String,
    pub language: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualityProfiles {
    pub profiles: Vec<QualityProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRule {
    pub rule_key: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ActiveRule {
    pub fn new(rule_key: impl Into<String>, severity: Severity) -> Self {
        Self {
            rule_key: rule_key.into(),
            severity,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveRules {
    pub rules: Vec<ActiveRule>,
}

/// Portable quality profile definition, as restored on the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileBackup {
    pub name: String,
    pub language: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub rules: Vec<ActiveRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    pub name: String,
    pub sha256: String,
}

/// Library index served by the server, one `name|sha256` entry per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryIndex {
    pub entries: Vec<LibraryEntry>,
}

impl FromStr for LibraryIndex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut entries = Vec::new();
        for (number, line) in s.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (name, sha256) = line
                .split_once('|')
                .ok_or_else(|| format!("line {}: expected 'name|sha256', got '{}'", number + 1, line))?;
            if name.is_empty() || sha256.is_empty() {
                return Err(format!("line {}: empty name or hash", number + 1));
            }
            entries.push(LibraryEntry {
                name: name.to_string(),
                sha256: sha256.to_lowercase(),
            });
        }
        Ok(Self { entries })
    }
}

impl fmt::Display for LibraryIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}|{}", entry.name, entry.sha256)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub rule_key: String,
    pub severity: Severity,
    pub component: String,
    pub line: Option<usize>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub project_key: String,
    pub project_name: String,
    pub analysis_date: DateTime<Utc>,
    pub files: Vec<String>,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub task_id: String,
}

/// Error payload returned by the server on 4xx responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorMessages {
    pub errors: Vec<ErrorMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorMessage {
    pub msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_index_parse() {
        let index: LibraryIndex = "scanner-engine.jar|ABC123\n\njava-plugin.jar|def456\n"
            .parse()
            .unwrap();
        assert_eq!(index.entries.len(), 2);
        assert_eq!(index.entries[0].name, "scanner-engine.jar");
        assert_eq!(index.entries[0].sha256, "abc123");
        assert_eq!(index.to_string(), "scanner-engine.jar|abc123\njava-plugin.jar|def456\n");
    }

    #[test]
    fn test_library_index_rejects_malformed_lines() {
        assert!("no-separator".parse::<LibraryIndex>().is_err());
        assert!("|hash".parse::<LibraryIndex>().is_err());
        assert!("".parse::<LibraryIndex>().unwrap().entries.is_empty());
    }

    #[test]
    fn test_active_rule_wire_format() {
        let rule = ActiveRule::new("squid:S00103", Severity::Minor).with_param("maximumLineLength", "80");
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["ruleKey"], "squid:S00103");
        assert_eq!(json["severity"], "MINOR");
        assert_eq!(json["params"]["maximumLineLength"], "80");

        let parsed: ActiveRule = serde_json::from_str(r#"{"ruleKey":"squid:S1135"}"#).unwrap();
        assert_eq!(parsed.severity, Severity::Major);
        assert!(parsed.params.is_empty());
    }

    #[test]
    fn test_profile_backup_defaults() {
        let backup: ProfileBackup =
            serde_json::from_str(r#"{"name":"sonar-way","language":"java"}"#).unwrap();
        assert!(!backup.is_default);
        assert!(backup.rules.is_empty());
    }
}
