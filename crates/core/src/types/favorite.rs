//! Favorites entries and their activation actions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Path protocols a received media favorite may use
pub const KNOWN_PROTOCOLS: [&str; 16] = [
    "plugin://",
    "upnp://",
    "nfs://",
    "smb://",
    "ftp://",
    "http://",
    "https://",
    "addons://",
    "videodb://",
    "musicdb://",
    "special://",
    "sources://",
    "library://",
    "file://",
    "zip://",
    "rar://",
];

/// What the host does when a favorite is activated
///
/// Decided once when a descriptor is read from the favorites file or a
/// payload; downstream code matches on the variant and never re-parses the
/// command string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionDescriptor {
    /// `PlayMedia("path")`
    Media { path: String },
    /// `ActivateWindow(window)` or `ActivateWindow(window,"parameter",return)`
    WindowActivation {
        window: String,
        parameter: Option<String>,
    },
    /// Any other builtin, kept verbatim
    Other { command: String },
}

impl ActionDescriptor {
    /// Parses a host builtin command
    pub fn parse(command: &str) -> Self {
        let trimmed = command.trim();
        if let Some(args) = call_args(trimmed, "PlayMedia") {
            if let [path] = args.as_slice() {
                if !path.is_empty() {
                    return Self::Media { path: path.clone() };
                }
            }
        } else if let Some(args) = call_args(trimmed, "ActivateWindow") {
            match args.as_slice() {
                [window] if !window.is_empty() => {
                    return Self::WindowActivation {
                        window: window.clone(),
                        parameter: None,
                    };
                }
                [window, parameter, flag]
                    if !window.is_empty() && flag.eq_ignore_ascii_case("return") =>
                {
                    return Self::WindowActivation {
                        window: window.clone(),
                        parameter: Some(parameter.clone()),
                    };
                }
                _ => {}
            }
        }
        Self::Other {
            command: trimmed.to_string(),
        }
    }

    /// Renders the host builtin command
    pub fn to_command(&self) -> String {
        match self {
            Self::Media { path } => format!("PlayMedia(\"{}\")", path),
            Self::WindowActivation {
                window,
                parameter: None,
            } => format!("ActivateWindow({})", window),
            Self::WindowActivation {
                window,
                parameter: Some(parameter),
            } => format!("ActivateWindow({},\"{}\",return)", window, parameter),
            Self::Other { command } => command.clone(),
        }
    }

    /// The media path or window parameter this action points at, if any
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Media { path } => Some(path),
            Self::WindowActivation { parameter, .. } => parameter.as_deref(),
            Self::Other { .. } => None,
        }
    }

    /// True when the action may be applied on another device
    ///
    /// Targets must use a known protocol or be an absolute path.
    pub fn is_portable(&self) -> bool {
        match self.target() {
            Some(target) => {
                let lower = target.to_ascii_lowercase();
                KNOWN_PROTOCOLS.iter().any(|p| lower.starts_with(p))
                    || target.starts_with('/')
                    || looks_like_windows_path(target)
            }
            None => matches!(self, Self::WindowActivation { .. }),
        }
    }
}

impl fmt::Display for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_command())
    }
}

fn looks_like_windows_path(target: &str) -> bool {
    let bytes = target.as_bytes();
    bytes.len() > 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'\\'
}

/// Splits `Name(a,"b,c",d)` into its arguments, honoring quotes
fn call_args(command: &str, name: &str) -> Option<Vec<String>> {
    let head = command.get(..name.len())?;
    if !head.eq_ignore_ascii_case(name) {
        return None;
    }
    let inner = command[name.len()..]
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')?;

    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in inner.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if in_quotes {
        return None;
    }
    args.push(current.trim().to_string());
    Some(args)
}

/// One favorites-list entry; `title` is its identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteEntry {
    pub title: String,
    pub action: ActionDescriptor,
    pub thumbnail: Option<String>,
}

impl FavoriteEntry {
    /// Creates an entry without a thumbnail
    pub fn new(title: impl Into<String>, action: ActionDescriptor) -> Self {
        Self {
            title: title.into(),
            action,
            thumbnail: None,
        }
    }

    /// Sets the thumbnail reference
    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        let thumb = thumbnail.into();
        self.thumbnail = if thumb.is_empty() { None } else { Some(thumb) };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_play_media() {
        let action = ActionDescriptor::parse(r#"PlayMedia("smb://nas/movies/heat.mkv")"#);
        assert_eq!(
            action,
            ActionDescriptor::Media {
                path: "smb://nas/movies/heat.mkv".to_string()
            }
        );
        assert_eq!(action.to_command(), r#"PlayMedia("smb://nas/movies/heat.mkv")"#);
    }

    #[test]
    fn test_parse_window_activation_with_parameter() {
        let raw = r#"ActivateWindow(10025,"plugin://plugin.video.youtube/?a=1,b",return)"#;
        let action = ActionDescriptor::parse(raw);
        assert_eq!(
            action,
            ActionDescriptor::WindowActivation {
                window: "10025".to_string(),
                parameter: Some("plugin://plugin.video.youtube/?a=1,b".to_string()),
            }
        );
        assert_eq!(action.to_command(), raw);
    }

    #[test]
    fn test_parse_bare_window() {
        let action = ActionDescriptor::parse("ActivateWindow(Weather)");
        assert_eq!(action.to_command(), "ActivateWindow(Weather)");
        assert!(action.is_portable());
    }

    #[test]
    fn test_unrecognized_kept_verbatim() {
        for raw in [
            "RunScript(script.foo,1)",
            r#"PlayMedia("a","b")"#,
            r#"ActivateWindow(videos,"x")"#,
            r#"PlayMedia("unterminated)"#,
        ] {
            let action = ActionDescriptor::parse(raw);
            assert!(matches!(action, ActionDescriptor::Other { .. }), "{}", raw);
            assert_eq!(action.to_command(), raw);
        }
    }

    #[test]
    fn test_portability() {
        assert!(ActionDescriptor::Media { path: "nfs://host/a.mkv".into() }.is_portable());
        assert!(ActionDescriptor::Media { path: "/srv/a.mkv".into() }.is_portable());
        assert!(ActionDescriptor::Media { path: r"D:\films\a.mkv".into() }.is_portable());
        assert!(!ActionDescriptor::Media { path: "relative/a.mkv".into() }.is_portable());
        assert!(!ActionDescriptor::Other { command: "Reboot".into() }.is_portable());
    }

    #[test]
    fn test_serde_tagging() {
        let action = ActionDescriptor::Media { path: "/a.mkv".into() };
        let json = serde_json::to_value(&action).expect("serialize");
        assert_eq!(json["type"], "media");
        assert_eq!(json["path"], "/a.mkv");
    }
}
