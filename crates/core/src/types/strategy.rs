//! Conflict resolution strategies

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a disagreement between local and remote values is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Always keep the local value
    Local,
    /// Always take the remote value
    Remote,
    /// Take whichever side is newer; ties keep local
    #[default]
    Newer,
    /// Queue the conflict for review and behave as `Newer` meanwhile
    Manual,
}

impl ConflictStrategy {
    /// All strategies, for validation messages
    pub const ALL: [ConflictStrategy; 4] = [Self::Local, Self::Remote, Self::Newer, Self::Manual];

    /// Returns the lowercase name used in configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Newer => "newer",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            "newer" => Ok(Self::Newer),
            // older configs called the manual strategy "ask"
            "manual" | "ask" => Ok(Self::Manual),
            other => Err(format!("unknown conflict strategy '{}'", other)),
        }
    }
}
