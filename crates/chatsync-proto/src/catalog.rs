//! Catalog and event-stream file formats.
//!
//! Candidates arrive as a JSON array, either bare or wrapped in `{"data": [...]}`
//! (the shape video APIs page results in).  Durations are unit tokens such as
//! `"5h23m10s"`, `"59m"` or `"45s"`; a malformed token is logged and treated
//! as an unknown duration.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::protocol::{CandidateMetadata, TimestampedEvent};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationParseError {
    #[error("empty duration")]
    Empty,
    #[error("unexpected character {0:?}")]
    UnexpectedChar(char),
    #[error("unit '{0}' repeated or out of order")]
    UnitOrder(char),
    #[error("number without unit")]
    MissingUnit,
    #[error("value too large")]
    Overflow,
}

// ── Duration tokens ───────────────────────────────────────────────────────────

/// Parse `[<n>h][<n>m][<n>s]` into seconds.  Every unit is optional but at
/// least one must be present, units appear at most once and in h, m, s order.
/// A bare integer is read as seconds.
pub fn parse_duration_token(token: &str) -> Result<u64, DurationParseError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(DurationParseError::Empty);
    }
    if token.chars().all(|c| c.is_ascii_digit()) {
        return token.parse().map_err(|_| DurationParseError::Overflow);
    }

    let mut total: u64 = 0;
    let mut number: Option<u64> = None;
    // index into "hms" of the last unit seen
    let mut last_unit: Option<usize> = None;

    for c in token.chars() {
        if let Some(d) = c.to_digit(10) {
            let n = number.unwrap_or(0);
            number = Some(
                n.checked_mul(10)
                    .and_then(|n| n.checked_add(u64::from(d)))
                    .ok_or(DurationParseError::Overflow)?,
            );
            continue;
        }

        let lower = c.to_ascii_lowercase();
        let (unit_idx, scale) = match lower {
            'h' => (0, 3600),
            'm' => (1, 60),
            's' => (2, 1),
            _ => return Err(DurationParseError::UnexpectedChar(c)),
        };
        if last_unit.is_some_and(|prev| prev >= unit_idx) {
            return Err(DurationParseError::UnitOrder(lower));
        }
        let n = number.take().ok_or(DurationParseError::UnexpectedChar(c))?;
        total = n
            .checked_mul(scale)
            .and_then(|v| total.checked_add(v))
            .ok_or(DurationParseError::Overflow)?;
        last_unit = Some(unit_idx);
    }

    if number.is_some() {
        return Err(DurationParseError::MissingUnit);
    }
    Ok(total)
}

/// Seconds for `token`, or 0.0 (unknown) with a warning when malformed.
pub fn duration_or_unknown(token: &str, candidate_id: &str) -> f64 {
    match parse_duration_token(token) {
        Ok(secs) => secs as f64,
        Err(e) => {
            warn!(
                "[catalog] candidate {}: malformed duration {:?} ({}), treating as unknown",
                candidate_id, token, e
            );
            0.0
        }
    }
}

// ── Catalog ───────────────────────────────────────────────────────────────────

/// On-disk / on-wire candidate.  Kept apart from `CandidateMetadata` so the
/// catalog schema can drift without touching the protocol struct.
#[derive(Debug, Deserialize)]
struct RawCandidate {
    id: String,
    title: String,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCatalog {
    List(Vec<RawCandidate>),
    Wrapped { data: Vec<RawCandidate> },
}

pub fn parse_catalog_from_str(content: &str) -> Result<Vec<CandidateMetadata>, CatalogError> {
    let raw: RawCatalog = serde_json::from_str(content)?;
    let entries = match raw {
        RawCatalog::List(v) => v,
        RawCatalog::Wrapped { data } => data,
    };

    Ok(entries
        .into_iter()
        .map(|r| {
            let duration_secs = r
                .duration
                .as_deref()
                .map(|d| duration_or_unknown(d, &r.id))
                .unwrap_or(0.0);
            let created_at = r.created_at.as_deref().and_then(|s| {
                match DateTime::parse_from_rfc3339(s) {
                    Ok(dt) => Some(dt.with_timezone(&Utc)),
                    Err(e) => {
                        warn!("[catalog] candidate {}: bad created_at {:?}: {}", r.id, s, e);
                        None
                    }
                }
            });
            CandidateMetadata {
                id: r.id,
                title: r.title,
                duration_secs,
                created_at,
            }
        })
        .collect())
}

pub fn load_catalog_from_path(path: &Path) -> Result<Vec<CandidateMetadata>, CatalogError> {
    let content = read(path)?;
    parse_catalog_from_str(&content)
}

// ── Event streams ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawStream {
    List(Vec<TimestampedEvent>),
    Wrapped { events: Vec<TimestampedEvent> },
}

/// Events in file order.  Ordering and id uniqueness are enforced by the
/// engine when the stream is installed.
pub fn parse_stream_from_str(content: &str) -> Result<Vec<TimestampedEvent>, CatalogError> {
    let raw: RawStream = serde_json::from_str(content)?;
    Ok(match raw {
        RawStream::List(v) => v,
        RawStream::Wrapped { events } => events,
    })
}

pub fn load_stream_from_path(path: &Path) -> Result<Vec<TimestampedEvent>, CatalogError> {
    let content = read(path)?;
    parse_stream_from_str(&content)
}

fn read(path: &Path) -> Result<String, CatalogError> {
    std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_tokens() {
        assert_eq!(parse_duration_token("5h23m10s"), Ok(5 * 3600 + 23 * 60 + 10));
        assert_eq!(parse_duration_token("1h7m"), Ok(4020));
        assert_eq!(parse_duration_token("59m"), Ok(3540));
        assert_eq!(parse_duration_token("45s"), Ok(45));
        assert_eq!(parse_duration_token("2h10s"), Ok(7210));
        assert_eq!(parse_duration_token("3600"), Ok(3600));
        assert_eq!(parse_duration_token(" 1H2M3S "), Ok(3723));
    }

    #[test]
    fn test_malformed_duration_tokens() {
        assert_eq!(parse_duration_token(""), Err(DurationParseError::Empty));
        assert_eq!(parse_duration_token("12m5"), Err(DurationParseError::MissingUnit));
        assert_eq!(parse_duration_token("5m1h"), Err(DurationParseError::UnitOrder('h')));
        assert_eq!(parse_duration_token("5m5m"), Err(DurationParseError::UnitOrder('m')));
        assert_eq!(parse_duration_token("h"), Err(DurationParseError::UnexpectedChar('h')));
        assert_eq!(parse_duration_token("1d"), Err(DurationParseError::UnexpectedChar('d')));
        assert_eq!(duration_or_unknown("soon", "x"), 0.0);
    }

    #[test]
    fn test_parse_wrapped_catalog() {
        let json = r#"{"data": [
            {"id": "1", "title": "Cuphead Part 1", "duration": "3h2m", "created_at": "2024-03-01T18:00:00Z"},
            {"id": "2", "title": "Just Chatting", "duration": "??"},
            {"id": "3", "title": "No duration", "created_at": "yesterday"}
        ]}"#;
        let catalog = parse_catalog_from_str(json).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog[0].duration_secs, 10920.0);
        assert!(catalog[0].created_at.is_some());
        assert_eq!(catalog[1].duration_secs, 0.0);
        assert!(!catalog[1].has_duration());
        assert_eq!(catalog[2].duration_secs, 0.0);
        assert!(catalog[2].created_at.is_none());
    }

    #[test]
    fn test_parse_bare_stream() {
        let json = r#"[
            {"id": "a", "offset_secs": 1.5, "payload": {"author": "x", "text": "hi"}},
            {"id": "b", "offset_secs": 2.0}
        ]"#;
        let events = parse_stream_from_str(json).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload_str("text"), Some("hi"));
        assert!(events[1].payload.is_null());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_catalog_from_path(Path::new("/nonexistent/catalog.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/catalog.json"));
    }
}
