//! `sonar-project.properties` style key/value configuration.

use std::collections::BTreeMap;
use std::path::Path;

pub const HOST_URL: &str = "sonar.host.url";
pub const PROJECT_KEY: &str = "sonar.projectKey";
pub const PROJECT_NAME: &str = "sonar.projectName";
pub const PROJECT_BASE_DIR: &str = "sonar.projectBaseDir";
pub const SOURCES: &str = "sonar.sources";
pub const ANALYSIS_MODE: &str = "sonar.analysis.mode";
pub const USER_HOME: &str = "sonar.userHome";
pub const USE_WS_CACHE: &str = "sonar.useWsCache";
pub const WORKING_DIRECTORY: &str = "sonar.working.directory";
pub const WS_TIMEOUT: &str = "sonar.ws.timeout";

/// File read from the project base directory when present.
pub const PROJECT_PROPERTIES_FILE: &str = "sonar-project.properties";

/// Whitespace as the properties format defines it.
const BLANKS: [char; 3] = [' ', '\t', '\x0c'];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the properties text format.
    ///
    /// Lines starting with `#` or `!` are comments. A line ending with an odd
    /// number of backslashes continues on the next one, whose leading
    /// whitespace is dropped. The key ends at the first unescaped `=`, `:` or
    /// whitespace. Keys and values understand `\t`, `\n`, `\r`, `\f`,
    /// `\uXXXX` and `\` before any other character, which stands for itself.
    pub fn parse(text: &str) -> Self {
        let mut properties = Self::new();
        let mut pending = String::new();
        let mut continued = false;

        for raw in text.lines() {
            let line = raw.trim_start_matches(BLANKS);
            if !continued && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
                continue;
            }

            let backslashes = line.chars().rev().take_while(|c| *c == '\\').count();
            if backslashes % 2 == 1 {
                pending.push_str(&line[..line.len() - 1]);
                continued = true;
                continue;
            }
            pending.push_str(line);
            continued = false;

            let logical = std::mem::take(&mut pending);
            properties.insert_line(&logical);
        }

        if continued {
            properties.insert_line(&pending);
        }

        properties
    }

    fn insert_line(&mut self, line: &str) {
        let mut escaped = false;
        let mut key_end = line.len();
        for (idx, c) in line.char_indices() {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '=' || c == ':' || BLANKS.contains(&c) {
                key_end = idx;
                break;
            }
        }

        let (key, rest) = line.split_at(key_end);
        let rest = rest.trim_start_matches(BLANKS);
        let value = rest
            .strip_prefix(['=', ':'])
            .unwrap_or(rest)
            .trim_start_matches(BLANKS);

        let key = unescape(key);
        if !key.is_empty() {
            self.entries.insert(key, unescape(value));
        }
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// Parses a `key=value` command line definition.
    pub fn parse_definition(definition: &str) -> Result<(String, String), String> {
        let (key, value) = definition
            .split_once('=')
            .ok_or_else(|| format!("Invalid property definition '{}', expected key=value", definition))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Invalid property definition '{}', empty key", definition));
        }
        Ok((key.to_string(), value.trim().to_string()))
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Overlays `other` on top of `self`; keys in `other` win.
    pub fn merge(&mut self, other: &Properties) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some('u') => match read_unicode(&mut chars) {
                Some(decoded) => out.push(decoded),
                // Malformed escape, kept as written.
                None => out.push_str("\\u"),
            },
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Reads the four hex digits after `\u`, combining a surrogate pair written
/// as two escapes. Leaves `chars` untouched when the digits are malformed.
fn read_unicode(chars: &mut std::str::Chars<'_>) -> Option<char> {
    let high = hex4(chars)?;
    if let Some(decoded) = char::from_u32(high) {
        return Some(decoded);
    }
    if (0xD800..0xDC00).contains(&high) {
        let mut lookahead = chars.clone();
        if lookahead.next() == Some('\\') && lookahead.next() == Some('u') {
            if let Some(low) = hex4(&mut lookahead).filter(|low| (0xDC00..0xE000).contains(low)) {
                *chars = lookahead;
                return char::from_u32(0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00));
            }
        }
    }
    Some(char::REPLACEMENT_CHARACTER)
}

fn hex4(chars: &mut std::str::Chars<'_>) -> Option<u32> {
    let digits: String = chars.clone().take(4).collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    chars.nth(3);
    u32::from_str_radix(&digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_properties_file() {
        let text = "\
# project definition
sonar.projectKey=java:sample
sonar.projectName = Java Sample, with comma
! legacy comment
sonar.sources: src
sonar.exclusions=a,\\
    b,\\
    c
empty.value=
";
        let properties = Properties::parse(text);
        assert_eq!(properties.get(PROJECT_KEY), Some("java:sample"));
        assert_eq!(properties.get(PROJECT_NAME), Some("Java Sample, with comma"));
        assert_eq!(properties.get(SOURCES), Some("src"));
        assert_eq!(properties.get("sonar.exclusions"), Some("a,b,c"));
        assert_eq!(properties.get("empty.value"), Some(""));
        assert_eq!(properties.len(), 5);
    }

    #[test]
    fn test_key_value_split_uses_first_separator() {
        let properties = Properties::parse("sonar.host.url=http://localhost:9000\n");
        assert_eq!(properties.get(HOST_URL), Some("http://localhost:9000"));
    }

    #[test]
    fn test_escaped_separators_belong_to_the_key() {
        let properties = Properties::parse("a\\:b\\=c\\ d = x\n");
        assert_eq!(properties.get("a:b=c d"), Some("x"));
    }

    #[test]
    fn test_whitespace_separates_key_and_value() {
        let properties = Properties::parse("sonar.sources src\nsonar.projectName   Java Sample\nflag\n");
        assert_eq!(properties.get(SOURCES), Some("src"));
        assert_eq!(properties.get(PROJECT_NAME), Some("Java Sample"));
        assert_eq!(properties.get("flag"), Some(""));
    }

    #[test]
    fn test_unicode_and_control_escapes() {
        let properties = Properties::parse(
            "name=Caf\\u00e9\nsmile=\\uD83D\\uDE00\ntabbed=a\\tb\\nc\nbroken=\\u12G4\n",
        );
        assert_eq!(properties.get("name"), Some("Café"));
        assert_eq!(properties.get("smile"), Some("\u{1F600}"));
        assert_eq!(properties.get("tabbed"), Some("a\tb\nc"));
        assert_eq!(properties.get("broken"), Some("\\u12G4"));
    }

    #[test]
    fn test_escaped_backslash_does_not_continue_the_line() {
        let text = "dir=C:\\\\temp\\\\\nnext=1\nlong=one \\\n  two\n";
        let properties = Properties::parse(text);
        assert_eq!(properties.get("dir"), Some("C:\\temp\\"));
        assert_eq!(properties.get("next"), Some("1"));
        assert_eq!(properties.get("long"), Some("one two"));
    }

    #[test]
    fn test_merge_overrides() {
        let mut base = Properties::parse("sonar.analysis.mode=publish\nsonar.sources=.\n");
        let overlay = Properties::new().with(ANALYSIS_MODE, "issues");
        base.merge(&overlay);
        assert_eq!(base.get(ANALYSIS_MODE), Some("issues"));
        assert_eq!(base.get(SOURCES), Some("."));
    }

    #[test]
    fn test_parse_definition() {
        assert_eq!(
            Properties::parse_definition("sonar.useWsCache=true").unwrap(),
            ("sonar.useWsCache".to_string(), "true".to_string())
        );
        assert!(Properties::parse_definition("novalue").is_err());
        assert!(Properties::parse_definition("=x").is_err());
    }
}
