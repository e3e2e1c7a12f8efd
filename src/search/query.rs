//! Search query parsing
//!
//! Before any retrieval runs, the query string is inspected for the
//! metadata-field grammar: `field:value` or `metadata.path:value`. Anything
//! else is free text.

use once_cell::sync::Lazy;
use regex::Regex;

/// A parsed search query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedQuery {
    /// Blank input: return the most recent memories without any embedding call
    Empty,
    /// `field:value` dispatch to the metadata search path
    Metadata { field: String, value: String },
    /// Free-text hybrid retrieval
    Text(String),
}

static METADATA_QUERY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(metadata\.)?([A-Za-z_][A-Za-z0-9_.-]*):(\S+)$").expect("valid regex")
});

/// Inspect a query string and decide the retrieval path
pub fn parse_query(query: &str) -> ParsedQuery {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return ParsedQuery::Empty;
    }

    if let Some(caps) = METADATA_QUERY.captures(trimmed) {
        let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        return ParsedQuery::Metadata {
            field: format!("{}{}", prefix, &caps[2]),
            value: caps[3].to_string(),
        };
    }

    ParsedQuery::Text(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(parse_query(""), ParsedQuery::Empty);
        assert_eq!(parse_query("   "), ParsedQuery::Empty);
    }

    #[test]
    fn test_metadata_field() {
        assert_eq!(
            parse_query("projectId:alpha-001"),
            ParsedQuery::Metadata {
                field: "projectId".to_string(),
                value: "alpha-001".to_string(),
            }
        );
    }

    #[test]
    fn test_metadata_dotted_path() {
        assert_eq!(
            parse_query("metadata.version:2.1.0"),
            ParsedQuery::Metadata {
                field: "metadata.version".to_string(),
                value: "2.1.0".to_string(),
            }
        );
    }

    #[test]
    fn test_free_text() {
        assert_eq!(
            parse_query("artificial intelligence"),
            ParsedQuery::Text("artificial intelligence".to_string())
        );
        // a colon inside a sentence is not the grammar
        assert_eq!(
            parse_query("note: buy milk"),
            ParsedQuery::Text("note: buy milk".to_string())
        );
    }

    #[test]
    fn test_url_is_free_text() {
        // scheme://... has a non-\S+ tail after the colon
        assert_eq!(
            parse_query("https://example.com is down"),
            ParsedQuery::Text("https://example.com is down".to_string())
        );
    }

}
