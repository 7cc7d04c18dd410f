//! Source path mapping between original and build-time instrumented files.
//! - MappingArtifact: JSON document written by the build step
//! - PathTranslationTable: both lookup directions + substitute-path view

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult};

/// One original → instrumented pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    pub original: PathBuf,
    pub instrumented: PathBuf,
}

/// On-disk artifact: `{workDir, mappings: [{original, instrumented, ...}]}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingArtifact {
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub mappings: Vec<PathMapping>,
}

impl MappingArtifact {
    pub fn parse(text: &str) -> BridgeResult<Self> {
        serde_json::from_str(text)
            .map_err(|err| BridgeError::protocol(format!("mapping artifact: {err}")))
    }
}

/// Directory-level substitution handed to the debugger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SubstituteRule {
    pub from: String,
    pub to: String,
}

/// Bidirectional lookup built from a mapping list.
///
/// Originals are unique keys; when the artifact repeats an original the first
/// entry wins. Instrumented paths may repeat, the reverse direction keeps the
/// first original seen for each.
#[derive(Debug, Clone, Default)]
pub struct PathTranslationTable {
    work_dir: Option<PathBuf>,
    mappings: Vec<PathMapping>,
    to_instrumented: HashMap<String, String>,
    to_original: HashMap<String, String>,
}

impl PathTranslationTable {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_artifact(artifact: MappingArtifact) -> Self {
        let mut table = Self {
            work_dir: artifact.work_dir,
            ..Self::default()
        };
        for mapping in artifact.mappings {
            let original = path_key(&mapping.original);
            if table.to_instrumented.contains_key(&original) {
                debug!(original = %original, "duplicate original in mapping artifact");
                continue;
            }
            let instrumented = path_key(&mapping.instrumented);
            table
                .to_instrumented
                .insert(original.clone(), instrumented.clone());
            table.to_original.entry(instrumented).or_insert(original);
            table.mappings.push(mapping);
        }
        table
    }

    /// Reads and parses the artifact at `path`.
    pub fn load(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::from_artifact(MappingArtifact::parse(&text)?))
    }

    /// Like [`Self::load`], but a missing or broken artifact yields an empty
    /// table so debugging unmapped sources still works.
    #[must_use]
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(table) => {
                debug!(path = %path.display(), entries = table.len(), "loaded path mappings");
                table
            }
            Err(err) => {
                warn!(path = %path.display(), "path mappings unavailable: {err}");
                Self::empty()
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    #[must_use]
    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    #[must_use]
    pub fn mappings(&self) -> &[PathMapping] {
        &self.mappings
    }

    /// Original → instrumented (browser requests heading to the debugger).
    #[must_use]
    pub fn to_instrumented(&self) -> &HashMap<String, String> {
        &self.to_instrumented
    }

    /// Instrumented → original (debugger replies heading to the browser).
    #[must_use]
    pub fn to_original(&self) -> &HashMap<String, String> {
        &self.to_original
    }

    /// Directory pairs for the debugger's path substitution, first-seen order.
    #[must_use]
    pub fn substitute_rules(&self) -> Vec<SubstituteRule> {
        let mut rules = IndexSet::new();
        for mapping in &self.mappings {
            let (Some(from), Some(to)) = (mapping.original.parent(), mapping.instrumented.parent())
            else {
                continue;
            };
            rules.insert(SubstituteRule {
                from: path_key(from),
                to: path_key(to),
            });
        }
        rules.into_iter().collect()
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(pairs: &[(&str, &str)]) -> MappingArtifact {
        MappingArtifact {
            work_dir: Some(PathBuf::from("/tmp/work")),
            mappings: pairs
                .iter()
                .map(|(original, instrumented)| PathMapping {
                    original: PathBuf::from(original),
                    instrumented: PathBuf::from(instrumented),
                })
                .collect(),
        }
    }

    #[test]
    fn parses_artifact_with_extra_fields() {
        let text = r#"{
            "workDir": "/tmp/work",
            "mappings": [
                {"original": "/src/a.go", "instrumented": "/tmp/work/a.go", "hash": "abc"}
            ],
            "generator": "compile"
        }"#;
        let table = PathTranslationTable::from_artifact(MappingArtifact::parse(text).unwrap());
        assert_eq!(table.work_dir(), Some(Path::new("/tmp/work")));
        assert_eq!(
            table.to_instrumented().get("/src/a.go").map(String::as_str),
            Some("/tmp/work/a.go")
        );
        assert_eq!(
            table.to_original().get("/tmp/work/a.go").map(String::as_str),
            Some("/src/a.go")
        );
    }

    #[test]
    fn first_duplicate_original_wins() {
        let table = PathTranslationTable::from_artifact(artifact(&[
            ("/src/a.go", "/tmp/one/a.go"),
            ("/src/a.go", "/tmp/two/a.go"),
        ]));
        assert_eq!(table.len(), 1);
        assert_eq!(table.to_instrumented()["/src/a.go"], "/tmp/one/a.go");
        assert!(!table.to_original().contains_key("/tmp/two/a.go"));
    }

    #[test]
    fn substitute_rules_group_by_directory_in_first_seen_order() {
        let table = PathTranslationTable::from_artifact(artifact(&[
            ("/src/pkg/a.go", "/tmp/work/pkg/a.go"),
            ("/src/main.go", "/tmp/work/main.go"),
            ("/src/pkg/b.go", "/tmp/work/pkg/b.go"),
        ]));
        let rules = table.substitute_rules();
        assert_eq!(
            rules,
            vec![
                SubstituteRule {
                    from: "/src/pkg".into(),
                    to: "/tmp/work/pkg".into(),
                },
                SubstituteRule {
                    from: "/src".into(),
                    to: "/tmp/work".into(),
                },
            ]
        );
    }

    #[test]
    fn missing_artifact_yields_empty_table() {
        let path = std::env::temp_dir().join("devbridge-mapping-does-not-exist.json");
        assert!(PathTranslationTable::load(&path).is_err());
        let table = PathTranslationTable::load_or_empty(&path);
        assert!(table.is_empty());
        assert!(table.substitute_rules().is_empty());
    }

    #[test]
    fn unparsable_artifact_yields_empty_table() {
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = std::env::temp_dir().join(format!("devbridge-mapping-broken-{stamp}.json"));
        std::fs::write(&path, "{ not json").unwrap();
        assert!(PathTranslationTable::load_or_empty(&path).is_empty());
        let _ = std::fs::remove_file(&path);
    }
}
