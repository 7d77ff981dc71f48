//! Small text and time helpers shared by config, the REST client and the store.

const SNIPPET_CHARS: usize = 180;

/// Trimmed copy of `value`, or `None` when it is missing or blank
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Normalise a service base URL: trimmed, `http`/`https` only, no trailing slash.
///
/// Returns `None` for blank input or any other scheme.
pub fn base_url(raw: &str) -> Option<String> {
    let url = raw.trim();
    let has_scheme = ["http://", "https://"]
        .iter()
        .any(|scheme| url.len() > scheme.len() && url.starts_with(scheme));
    has_scheme.then(|| url.trim_end_matches('/').to_string())
}

/// Single-line excerpt of a response body or payload for logs and error text
pub fn log_snippet(value: &str) -> String {
    let mut snippet = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Some((cut, _)) = snippet.char_indices().nth(SNIPPET_CHARS) {
        snippet.truncate(cut);
        snippet.push_str("...");
    }
    snippet
}

/// Milliseconds since the Unix epoch, used for queue timestamps and pull markers
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_blank_trims_and_drops_empty() {
        assert_eq!(non_blank(None), None);
        assert_eq!(non_blank(Some(" \t ")), None);
        assert_eq!(non_blank(Some("  anon-key ")), Some("anon-key".to_string()));
    }

    #[test]
    fn base_url_requires_http_scheme() {
        assert_eq!(
            base_url(" https://rent.example.co// "),
            Some("https://rent.example.co".to_string())
        );
        assert_eq!(
            base_url("http://localhost:54321"),
            Some("http://localhost:54321".to_string())
        );
        assert_eq!(base_url("ftp://rent.example.co"), None);
        assert_eq!(base_url("rent.example.co"), None);
        assert_eq!(base_url("https://"), None);
    }

    #[test]
    fn log_snippet_flattens_and_shortens() {
        assert_eq!(log_snippet("  duplicate key\n  value  "), "duplicate key value");

        let snippet = log_snippet(&"é".repeat(500));
        assert_eq!(snippet.chars().count(), 183);
        assert!(snippet.ends_with("..."));
    }
}
