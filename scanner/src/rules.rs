//! Line-based checks run against indexed source files.

use crate::types::{ActiveRule, Issue, Severity};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

pub const LINE_TOO_LONG: &str = "squid:S00103";
pub const TRACK_TODO: &str = "squid:S1135";
pub const TAB_CHARACTER: &str = "squid:S00105";
pub const MISSING_NEWLINE: &str = "squid:S00113";

const DEFAULT_MAX_LINE_LENGTH: usize = 120;

/// Languages recognised by file extension.
pub fn language_of(path: &str) -> Option<&'static str> {
    let extension = path.rsplit_once('.')?.1.to_ascii_lowercase();
    match extension.as_str() {
        "java" => Some("java"),
        "js" | "jsx" => Some("js"),
        "py" => Some("py"),
        _ => None,
    }
}

pub trait Check: Send + Sync {
    fn rule_key(&self) -> &'static str;

    /// Reports issues without severity applied; the caller sets the
    /// severity of the active rule.
    fn scan(&self, component: &str, content: &str) -> Vec<Issue>;
}

struct LineTooLong {
    max: usize,
}

impl Check for LineTooLong {
    fn rule_key(&self) -> &'static str {
        LINE_TOO_LONG
    }

    fn scan(&self, component: &str, content: &str) -> Vec<Issue> {
        content
            .lines()
            .enumerate()
            .filter_map(|(idx, line)| {
                let length = line.chars().count();
                (length > self.max).then(|| {
                    issue(
                        self.rule_key(),
                        component,
                        Some(idx + 1),
                        format!(
                            "Split this {} characters long line (which is greater than {} authorized).",
                            length, self.max
                        ),
                    )
                })
            })
            .collect()
    }
}

struct TrackTodo;

fn todo_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(//|/\*|\*|#).*\bTODO\b").expect("valid TODO pattern"))
}

impl Check for TrackTodo {
    fn rule_key(&self) -> &'static str {
        TRACK_TODO
    }

    fn scan(&self, component: &str, content: &str) -> Vec<Issue> {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| todo_pattern().is_match(line))
            .map(|(idx, _)| {
                issue(
                    self.rule_key(),
                    component,
                    Some(idx + 1),
                    "Complete the task associated to this TODO comment.".to_string(),
                )
            })
            .collect()
    }
}

struct TabCharacter;

impl Check for TabCharacter {
    fn rule_key(&self) -> &'static str {
        TAB_CHARACTER
    }

    fn scan(&self, component: &str, content: &str) -> Vec<Issue> {
        // One issue per file, on the first offending line.
        content
            .lines()
            .position(|line| line.contains('\t'))
            .map(|idx| {
                vec![issue(
                    self.rule_key(),
                    component,
                    Some(idx + 1),
                    "Replace all tab characters in this file by sequences of white-spaces.".to_string(),
                )]
            })
            .unwrap_or_default()
    }
}

struct MissingNewline;

impl Check for MissingNewline {
    fn rule_key(&self) -> &'static str {
        MISSING_NEWLINE
    }

    fn scan(&self, component: &str, content: &str) -> Vec<Issue> {
        if content.is_empty() || content.ends_with('\n') {
            return Vec::new();
        }
        vec![issue(
            self.rule_key(),
            component,
            None,
            "Add a new line at the end of this file.".to_string(),
        )]
    }
}

fn issue(rule_key: &str, component: &str, line: Option<usize>, message: String) -> Issue {
    Issue {
        rule_key: rule_key.to_string(),
        severity: Severity::default(),
        component: component.to_string(),
        line,
        message,
    }
}

/// Instantiates the check for an active rule, or `None` if the rule key is
/// not implemented by this scanner.
pub fn check_for(rule: &ActiveRule) -> Option<Box<dyn Check>> {
    match rule.rule_key.as_str() {
        LINE_TOO_LONG => {
            let max = rule
                .param("maximumLineLength")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_MAX_LINE_LENGTH);
            Some(Box::new(LineTooLong { max }))
        }
        TRACK_TODO => Some(Box::new(TrackTodo)),
        TAB_CHARACTER => Some(Box::new(TabCharacter)),
        MISSING_NEWLINE => Some(Box::new(MissingNewline)),
        _ => None,
    }
}

/// Active checks grouped by language.
#[derive(Default)]
pub struct RuleSet {
    checks: HashMap<String, Vec<(Box<dyn Check>, Severity)>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&mut self, language: &str, rule: &ActiveRule) {
        match check_for(rule) {
            Some(check) => self
                .checks
                .entry(language.to_string())
                .or_default()
                .push((check, rule.severity)),
            None => debug!("Rule {} is not implemented, skipping", rule.rule_key),
        }
    }

    pub fn len(&self) -> usize {
        self.checks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scan(&self, language: &str, component: &str, content: &str) -> Vec<Issue> {
        let Some(checks) = self.checks.get(language) else {
            return Vec::new();
        };
        checks
            .iter()
            .flat_map(|(check, severity)| {
                check.scan(component, content).into_iter().map(move |mut issue| {
                    issue.severity = *severity;
                    issue
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_detection() {
        assert_eq!(language_of("src/Foo.java"), Some("java"));
        assert_eq!(language_of("app.JS"), Some("js"));
        assert_eq!(language_of("tool.py"), Some("py"));
        assert_eq!(language_of("README"), None);
        assert_eq!(language_of("notes.txt"), None);
    }

    #[test]
    fn test_line_too_long_uses_param() {
        let rule = ActiveRule::new(LINE_TOO_LONG, Severity::Minor).with_param("maximumLineLength", "10");
        let check = check_for(&rule).unwrap();
        let issues = check.scan("A.java", "short\nthis line is too long\n");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].line, Some(2));
        assert!(issues[0].message.contains("greater than 10"));
    }

    #[test]
    fn test_todo_and_tabs() {
        let content = "class A {\n\tint x; // TODO remove\n  // todo lowercase is ignored\n}\n";
        let todo = check_for(&ActiveRule::new(TRACK_TODO, Severity::Info)).unwrap();
        let issues = todo.scan("A.java", content);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].line, Some(2));

        let tabs = check_for(&ActiveRule::new(TAB_CHARACTER, Severity::Minor)).unwrap();
        assert_eq!(tabs.scan("A.java", content).len(), 1);
    }

    #[test]
    fn test_missing_newline() {
        let check = check_for(&ActiveRule::new(MISSING_NEWLINE, Severity::Minor)).unwrap();
        assert_eq!(check.scan("A.java", "class A {}").len(), 1);
        assert!(check.scan("A.java", "class A {}\n").is_empty());
        assert!(check.scan("A.java", "").is_empty());
    }

    #[test]
    fn test_rule_set_applies_severity_per_language() {
        let mut rules = RuleSet::new();
        rules.activate("java", &ActiveRule::new(MISSING_NEWLINE, Severity::Critical));
        rules.activate("java", &ActiveRule::new("squid:Unknown", Severity::Major));
        assert_eq!(rules.len(), 1);

        let issues = rules.scan("java", "A.java", "class A {}");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Critical);
        assert!(rules.scan("py", "a.py", "x = 1").is_empty());
    }
}
