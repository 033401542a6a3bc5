//! Location of version histories inside version storage.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use arbor_core::lexicon::{JCR_SYSTEM, JCR_VERSION_STORAGE};
use arbor_core::{Name, NodeKey, Path, Segment};
use arbor_storage::identifier_digest;

/// Width of each intermediate segment of the hierarchical layout.
const SEGMENT_WIDTH: usize = 2;
/// Number of intermediate segments of the hierarchical layout.
const SEGMENT_COUNT: usize = 4;

/// How a versionable node's identifier maps to its history path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryLayout {
    /// `<versionStorage>/<identifier>`
    Flat,
    /// `<versionStorage>/ab/cd/ef/01/<rest>` over the identifier digest,
    /// bounding the fan-out of every folder.
    #[default]
    Hierarchical,
}

impl HistoryLayout {
    /// Segments below version storage leading to the history node of `key`.
    pub fn segments(self, key: &NodeKey) -> Vec<Name> {
        match self {
            HistoryLayout::Flat => vec![Name::from(key.to_string().as_str())],
            HistoryLayout::Hierarchical => {
                let digest = identifier_digest(key);
                let split = SEGMENT_WIDTH * SEGMENT_COUNT;
                let mut out: Vec<Name> = (0..SEGMENT_COUNT)
                    .map(|i| Name::from(&digest[i * SEGMENT_WIDTH..(i + 1) * SEGMENT_WIDTH]))
                    .collect();
                out.push(Name::from(&digest[split..]));
                out
            }
        }
    }

    /// Absolute path (in the system workspace) of the history node of `key`.
    pub fn history_path(self, key: &NodeKey) -> Path {
        self.segments(key)
            .into_iter()
            .fold(version_storage_path(), |path, name| path.child_named(name))
    }
}

impl fmt::Display for HistoryLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryLayout::Flat => write!(f, "flat"),
            HistoryLayout::Hierarchical => write!(f, "hierarchical"),
        }
    }
}

impl FromStr for HistoryLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(HistoryLayout::Flat),
            "hierarchical" => Ok(HistoryLayout::Hierarchical),
            other => Err(format!("unknown history layout '{}'", other)),
        }
    }
}

/// `/jcr:system/jcr:versionStorage`
pub fn version_storage_path() -> Path {
    Path::root()
        .child(Segment::named(Name::from(JCR_SYSTEM)))
        .child(Segment::named(Name::from(JCR_VERSION_STORAGE)))
}
