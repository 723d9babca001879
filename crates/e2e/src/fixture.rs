//! Declarative YAML fixture suites

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{E2eError, E2eResult};

/// A suite of input/expected pairs parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureSuite {
    /// Unique name for this suite
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags applied to every case in the suite
    #[serde(default)]
    pub tags: Vec<String>,

    /// Cases in execution order
    pub cases: Vec<FixtureCase>,
}

/// A single input/expected pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureCase {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub input: String,

    pub expected: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub grammar: Option<String>,

    /// Input length class (S, M, L)
    #[serde(default)]
    pub length: Option<String>,

    #[serde(default)]
    pub mode: InputMode,
}

/// How the input reaches the page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputMode {
    /// Replace the input in one step
    #[default]
    Fill,

    /// Type character by character
    Type {
        #[serde(default)]
        delay_ms: Option<u64>,

        /// Prefix typed first; its output must become non-empty before
        /// the rest of the input is typed
        #[serde(default)]
        partial_input: Option<String>,
    },
}

impl FixtureCase {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Split the input around the partial prefix, if the case has one
    /// that actually prefixes the input
    pub fn partial_split(&self) -> Option<(&str, &str)> {
        match &self.mode {
            InputMode::Type {
                partial_input: Some(prefix),
                ..
            } if !prefix.is_empty() => self
                .input
                .strip_prefix(prefix.as_str())
                .map(|rest| (prefix.as_str(), rest)),
            _ => None,
        }
    }
}

impl FixtureSuite {
    /// Parse a suite from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let mut suite: Self = serde_yaml::from_str(yaml)?;
        suite.validate()?;
        for case in &mut suite.cases {
            for tag in &suite.tags {
                if !case.has_tag(tag) {
                    case.tags.push(tag.clone());
                }
            }
        }
        Ok(suite)
    }

    /// Parse a suite from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::FixtureParse(format!("{}: {}", path.display(), e)))
    }

    fn validate(&self) -> E2eResult<()> {
        let mut seen = HashSet::new();
        for case in &self.cases {
            if case.id.trim().is_empty() {
                return Err(E2eError::FixtureParse(format!(
                    "suite '{}' has a case without an id",
                    self.name
                )));
            }
            if !seen.insert(case.id.as_str()) {
                return Err(E2eError::FixtureParse(format!(
                    "duplicate case id '{}' in suite '{}'",
                    case.id, self.name
                )));
            }
            if let InputMode::Type {
                partial_input: Some(prefix),
                ..
            } = &case.mode
            {
                if !case.input.starts_with(prefix.as_str()) {
                    return Err(E2eError::FixtureParse(format!(
                        "case '{}': partial_input is not a prefix of input",
                        case.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Load all suites from a directory, sorted by path
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut suites = Vec::new();
        let mut ids: HashSet<String> = HashSet::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            let suite = Self::from_file(entry.path())?;
            for case in &suite.cases {
                if !ids.insert(case.id.clone()) {
                    return Err(E2eError::FixtureParse(format!(
                        "case id '{}' appears in more than one suite",
                        case.id
                    )));
                }
            }
            suites.push(suite);
        }

        Ok(suites)
    }

    /// Keep only cases carrying `tag`
    pub fn filter_by_tag(&self, tag: &str) -> Self {
        Self {
            cases: self.cases.iter().filter(|c| c.has_tag(tag)).cloned().collect(),
            ..self.clone()
        }
    }

    /// Keep only the case with `id`
    pub fn filter_by_id(&self, id: &str) -> Self {
        Self {
            cases: self.cases.iter().filter(|c| c.id == id).cloned().collect(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUITE: &str = r#"
name: singlish-daily
description: Everyday sentences
tags: [positive]
cases:
  - id: Pos_Fun_0001
    name: Simple present tense
    input: mama kadee yanavaa.
    expected: මම කඩේ යනවා.
    category: Daily language usage
    length: S
  - id: Pos_UI_0001
    name: Real-time update while typing
    input: mama gedhara yanavaa.
    expected: මම ගෙදර යනවා.
    tags: [ui]
    mode:
      kind: type
      delay_ms: 150
      partial_input: mama gedhara
"#;

    #[test]
    fn test_parse_suite() {
        let suite = FixtureSuite::from_yaml(SUITE).unwrap();
        assert_eq!(suite.name, "singlish-daily");
        assert_eq!(suite.cases.len(), 2);
        assert_eq!(suite.cases[0].mode, InputMode::Fill);
        assert!(suite.cases[0].has_tag("positive"));
        assert!(suite.cases[1].has_tag("ui"));
        assert!(suite.cases[1].has_tag("positive"));
        assert_eq!(
            suite.cases[1].partial_split(),
            Some(("mama gedhara", " yanavaa."))
        );
        assert_eq!(suite.cases[0].partial_split(), None);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let yaml = r#"
name: dup
cases:
  - { id: A, input: a, expected: x }
  - { id: A, input: b, expected: y }
"#;
        assert!(matches!(FixtureSuite::from_yaml(yaml), Err(E2eError::FixtureParse(_))));
    }

    #[test]
    fn test_partial_must_prefix_input() {
        let yaml = r#"
name: bad-partial
cases:
  - id: A
    input: mama gedhara
    expected: x
    mode: { kind: type, partial_input: oyaa }
"#;
        assert!(matches!(FixtureSuite::from_yaml(yaml), Err(E2eError::FixtureParse(_))));
    }

    #[test]
    fn test_filters() {
        let suite = FixtureSuite::from_yaml(SUITE).unwrap();
        assert_eq!(suite.filter_by_tag("ui").cases.len(), 1);
        assert_eq!(suite.filter_by_id("Pos_Fun_0001").cases.len(), 1);
        assert!(suite.filter_by_id("missing").cases.is_empty());
    }

    #[test]
    fn test_load_all_rejects_ids_shared_across_suites() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), SUITE).unwrap();
        std::fs::write(dir.path().join("b.yml"), SUITE.replace("singlish-daily", "copy")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert!(matches!(
            FixtureSuite::load_all(dir.path()),
            Err(E2eError::FixtureParse(_))
        ));

        std::fs::remove_file(dir.path().join("b.yml")).unwrap();
        let suites = FixtureSuite::load_all(dir.path()).unwrap();
        assert_eq!(suites.len(), 1);
    }

    #[test]
    fn test_shipped_fixtures_load() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures");
        let suites = FixtureSuite::load_all(&dir).unwrap();
        let cases: Vec<&FixtureCase> = suites.iter().flat_map(|s| &s.cases).collect();

        assert_eq!(cases.len(), 35);
        assert_eq!(cases.iter().filter(|c| c.has_tag("positive")).count(), 24);
        assert_eq!(cases.iter().filter(|c| c.has_tag("negative")).count(), 10);

        let typed = cases.iter().find(|c| c.id == "Pos_UI_0001").unwrap();
        assert!(typed.partial_split().is_some());
        assert!(cases.iter().any(|c| c.input.contains('\n')));
    }
}
