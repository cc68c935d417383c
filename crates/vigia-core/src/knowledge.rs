//! Knowledge base of known issues.
//!
//! Loaded once at startup from `base_de_conhecimentos.json` and read-only
//! afterwards. The file groups entries by system under a top-level
//! `sistemas` map; file order is preserved because the match scorer
//! breaks ranking ties by catalog order.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Errors loading the knowledge base. Both are startup-fatal: the
/// watcher cannot run without its catalog.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("cannot read knowledge base {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("knowledge base {path} is malformed: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// One catalog record describing a known issue.
#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeEntry {
    #[serde(rename = "titulo")]
    pub title: String,

    #[serde(rename = "categoria")]
    pub category: String,

    /// Trigger keywords; may be multi-word phrases.
    #[serde(rename = "palavras_chave")]
    pub keywords: Vec<String>,
}

/// A named group of entries (one key under `sistemas`).
#[derive(Debug, Clone)]
pub struct KnowledgeSystem {
    pub name: String,
    pub entries: Vec<KnowledgeEntry>,
}

/// The full catalog, systems in file order.
#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeBase {
    #[serde(rename = "sistemas", deserialize_with = "systems_in_file_order")]
    pub systems: Vec<KnowledgeSystem>,
}

impl KnowledgeBase {
    /// Load and parse the catalog file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KnowledgeError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| KnowledgeError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| KnowledgeError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// All entries across systems, in file order, tagged with the system name.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &KnowledgeEntry)> {
        self.systems
            .iter()
            .flat_map(|sys| sys.entries.iter().map(move |e| (sys.name.as_str(), e)))
    }

    /// Total entry count across all systems.
    pub fn len(&self) -> usize {
        self.systems.iter().map(|sys| sys.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// JSON objects deserialize through MapAccess in document order, which is
// exactly the order the catalog author wrote. A plain HashMap would lose
// it and a BTreeMap would re-sort it.
fn systems_in_file_order<'de, D>(deserializer: D) -> Result<Vec<KnowledgeSystem>, D::Error>
where
    D: Deserializer<'de>,
{
    struct SystemsVisitor;

    impl<'de> Visitor<'de> for SystemsVisitor {
        type Value = Vec<KnowledgeSystem>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of system name to knowledge entries")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut systems = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, entries)) = map.next_entry::<String, Vec<KnowledgeEntry>>()? {
                systems.push(KnowledgeSystem { name, entries });
            }
            Ok(systems)
        }
    }

    deserializer.deserialize_map(SystemsVisitor)
}
