//! Reading and writing the host's `favourites.xml`
//!
//! ```xml
//! <favourites>
//!     <favourite name="Heat" thumb="special://thumb.jpg">PlayMedia(&quot;smb://nas/heat.mkv&quot;)</favourite>
//! </favourites>
//! ```

use crate::error::{AppError, Result};
use crate::types::{ActionDescriptor, FavoriteEntry};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// File name of the favorites list inside the host's userdata directory
pub const FAVOURITES_FILE: &str = "favourites.xml";

/// Parses a favorites document
///
/// Entries without a name or without an action are skipped.
pub fn parse_favourites(xml: &str) -> Result<Vec<FavoriteEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<(String, Option<String>)> = None;
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"favourite" => {
                current = Some(read_attributes(&e)?);
                text.clear();
            }
            Ok(Event::Text(e)) if current.is_some() => {
                let unescaped = e.unescape().map_err(|err| AppError::FavoritesParseError {
                    reason: err.to_string(),
                })?;
                text.push_str(&unescaped);
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"favourite" => {
                if let Some((name, thumb)) = current.take() {
                    let command = text.trim();
                    if !name.is_empty() && !command.is_empty() {
                        let mut entry = FavoriteEntry::new(name, ActionDescriptor::parse(command));
                        if let Some(thumb) = thumb {
                            entry = entry.with_thumbnail(thumb);
                        }
                        entries.push(entry);
                    }
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AppError::FavoritesParseError {
                    reason: format!("at byte {}: {}", reader.buffer_position(), e),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

fn read_attributes(element: &BytesStart<'_>) -> Result<(String, Option<String>)> {
    let mut name = String::new();
    let mut thumb = None;
    for attr in element.attributes() {
        let attr = attr.map_err(|e| AppError::FavoritesParseError {
            reason: e.to_string(),
        })?;
        let value = attr
            .unescape_value()
            .map_err(|e| AppError::FavoritesParseError {
                reason: e.to_string(),
            })?
            .to_string();
        match attr.key.as_ref() {
            b"name" => name = value,
            b"thumb" if !value.is_empty() => thumb = Some(value),
            _ => {}
        }
    }
    Ok((name, thumb))
}

/// Renders a favorites document in the host's layout
pub fn render_favourites(entries: &[FavoriteEntry]) -> String {
    let mut out = String::from("<favourites>\n");
    for entry in entries {
        out.push_str("    <favourite name=\"");
        out.push_str(&escape(entry.title.as_str()));
        out.push('"');
        if let Some(thumb) = &entry.thumbnail {
            out.push_str(" thumb=\"");
            out.push_str(&escape(thumb.as_str()));
            out.push('"');
        }
        out.push('>');
        out.push_str(&escape(entry.action.to_command().as_str()));
        out.push_str("</favourite>\n");
    }
    out.push_str("</favourites>\n");
    out
}

/// Adds entries whose title is not present yet; returns how many were added
pub fn add_missing(entries: &mut Vec<FavoriteEntry>, incoming: &[FavoriteEntry]) -> usize {
    let mut added = 0;
    for entry in incoming {
        if !entries.iter().any(|e| e.title == entry.title) {
            entries.push(entry.clone());
            added += 1;
        }
    }
    added
}

/// Removes every entry with the given title; returns true if one was removed
pub fn remove_by_title(entries: &mut Vec<FavoriteEntry>, title: &str) -> bool {
    let before = entries.len();
    entries.retain(|e| e.title != title);
    entries.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<favourites>
    <favourite name="Heat" thumb="special://profile/thumbs/heat.jpg">PlayMedia(&quot;smb://nas/movies/heat.mkv&quot;)</favourite>
    <favourite name="YouTube">ActivateWindow(10025,&quot;plugin://plugin.video.youtube/&quot;,return)</favourite>
    <favourite name="Broken"></favourite>
    <favourite name="Tom &amp; Jerry">RunScript(script.cartoons)</favourite>
</favourites>"#;

    #[test]
    fn test_parse_sample() {
        let entries = parse_favourites(SAMPLE).expect("parse");
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].title, "Heat");
        assert_eq!(
            entries[0].action,
            ActionDescriptor::Media {
                path: "smb://nas/movies/heat.mkv".to_string()
            }
        );
        assert_eq!(
            entries[0].thumbnail.as_deref(),
            Some("special://profile/thumbs/heat.jpg")
        );

        assert!(matches!(
            entries[1].action,
            ActionDescriptor::WindowActivation { .. }
        ));
        assert_eq!(entries[2].title, "Tom & Jerry");
    }

    #[test]
    fn test_render_then_parse_preserves_entries() {
        let entries = parse_favourites(SAMPLE).expect("parse");
        let xml = render_favourites(&entries);
        assert!(xml.contains("Tom &amp; Jerry"));
        assert_eq!(parse_favourites(&xml).expect("reparse"), entries);
    }

    #[test]
    fn test_empty_document() {
        assert!(parse_favourites("<favourites/>").expect("parse").is_empty());
        assert!(parse_favourites("").expect("parse").is_empty());
    }

    #[test]
    fn test_malformed_document() {
        let result = parse_favourites("<favourites><favourite name=\"x\">a</favourites>");
        assert!(matches!(result, Err(AppError::FavoritesParseError { .. })));
    }

    #[test]
    fn test_add_missing_is_keyed_by_title() {
        let mut entries = parse_favourites(SAMPLE).expect("parse");
        let incoming = vec![
            FavoriteEntry::new("Heat", ActionDescriptor::Media { path: "/other.mkv".into() }),
            FavoriteEntry::new("Ronin", ActionDescriptor::Media { path: "/ronin.mkv".into() }),
        ];
        assert_eq!(add_missing(&mut entries, &incoming), 1);
        assert_eq!(entries.len(), 4);
        assert_eq!(add_missing(&mut entries, &incoming), 0);
    }

    #[test]
    fn test_remove_by_title() {
        let mut entries = parse_favourites(SAMPLE).expect("parse");
        assert!(remove_by_title(&mut entries, "Heat"));
        assert!(!remove_by_title(&mut entries, "Heat"));
        assert_eq!(entries.len(), 2);
    }
}
