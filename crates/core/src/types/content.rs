//! Content identity shared by every device

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kind of media a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Episode,
}

impl MediaKind {
    /// Returns the lowercase name used in storage and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Episode => "episode",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "movie" => Ok(Self::Movie),
            "episode" => Ok(Self::Episode),
            other => Err(format!("unknown media kind '{}'", other)),
        }
    }
}

/// Stable cross-device identity of a piece of media
///
/// Rendered as `scheme:value`, e.g. `imdb:tt0113277` or
/// `tvdb:81189/s01e02`. The scheme names the catalogue the value came from;
/// `title` marks the title+year fallback for items without any catalogue id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

/// Catalogue schemes tried, in order, before falling back to any other id
const MOVIE_SCHEMES: [&str; 2] = ["imdb", "tmdb"];
const SHOW_SCHEMES: [&str; 3] = ["tvdb", "tmdb", "imdb"];

impl ContentId {
    /// Creates an identity from a scheme and a catalogue value
    pub fn new(scheme: &str, value: &str) -> Self {
        Self(format!(
            "{}:{}",
            scheme.trim().to_ascii_lowercase(),
            value.trim()
        ))
    }

    /// Parses a rendered `scheme:value` identity
    pub fn parse(s: &str) -> Option<Self> {
        let (scheme, value) = s.split_once(':')?;
        if scheme.trim().is_empty() || value.trim().is_empty() {
            return None;
        }
        Some(Self::new(scheme, value))
    }

    /// Derives a movie identity
    ///
    /// Priority: the host's `imdbnumber` field, then `imdb`/`tmdb` unique ids,
    /// then any other unique id, then a `title_year` composite.
    pub fn for_movie(
        imdb_number: Option<&str>,
        unique_ids: &BTreeMap<String, String>,
        title: &str,
        year: Option<u32>,
    ) -> Option<Self> {
        if let Some(imdb) = imdb_number.map(str::trim).filter(|s| !s.is_empty()) {
            return Some(Self::new("imdb", imdb));
        }
        Self::from_unique_ids(unique_ids, &MOVIE_SCHEMES).or_else(|| Self::from_title(title, year))
    }

    /// Derives a TV show identity, used as the prefix for its episodes
    pub fn for_show(unique_ids: &BTreeMap<String, String>, title: &str) -> Option<Self> {
        Self::from_unique_ids(unique_ids, &SHOW_SCHEMES).or_else(|| Self::from_title(title, None))
    }

    /// Derives an episode identity from its show, season and episode number
    pub fn for_episode(show: &ContentId, season: u32, episode: u32) -> Self {
        Self(format!("{}/s{:02}e{:02}", show.0, season, episode))
    }

    fn from_unique_ids(unique_ids: &BTreeMap<String, String>, preferred: &[&str]) -> Option<Self> {
        for scheme in preferred {
            if let Some(value) = unique_ids.get(*scheme).filter(|v| !v.trim().is_empty()) {
                return Some(Self::new(scheme, value));
            }
        }
        unique_ids
            .iter()
            .find(|(k, v)| !k.trim().is_empty() && !v.trim().is_empty())
            .map(|(k, v)| Self::new(k, v))
    }

    fn from_title(title: &str, year: Option<u32>) -> Option<Self> {
        let normalized: String = title
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_");
        if normalized.is_empty() {
            return None;
        }
        Some(match year {
            Some(year) if year > 0 => Self::new("title", &format!("{}_{}", normalized, year)),
            _ => Self::new("title", &normalized),
        })
    }

    /// Returns the catalogue scheme (`imdb`, `tvdb`, `title`, ...)
    pub fn scheme(&self) -> &str {
        self.0.split_once(':').map(|(s, _)| s).unwrap_or("")
    }

    /// Returns the catalogue value without the scheme
    pub fn value(&self) -> &str {
        self.0.split_once(':').map(|(_, v)| v).unwrap_or(&self.0)
    }

    /// Returns the rendered identity
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the identity as a single topic level
    ///
    /// Every character outside `[A-Za-z0-9._-]` becomes `_`, so the result never
    /// contains a level separator or a wildcard.
    pub fn topic_id(&self) -> String {
        sanitize_topic_level(&self.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Replaces characters that are not safe inside one topic level
pub fn sanitize_topic_level(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
