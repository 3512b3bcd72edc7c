//! Pure helpers: error body parsing and rejection classification (no HTTP).

/// Extract a readable message from a backend error body.
///
/// The backend answers `{"errors": ["..."]}`; plain-text bodies are used as
/// they are.
pub(crate) fn parse_error_body(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(errors) = json.get("errors").and_then(|v| v.as_array()) {
            let messages: Vec<&str> = errors.iter().filter_map(|e| e.as_str()).collect();
            if !messages.is_empty() {
                return messages.join("; ");
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no error message".to_string()
    } else {
        trimmed.chars().take(500).collect()
    }
}

/// Whether a 400 from the login endpoint means the role is unknown.
pub(crate) fn is_unknown_role(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("entry for role") || (lower.contains("role") && lower.contains("not found"))
}

/// Join the backend address and an API path below `/v1`.
pub(crate) fn api_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/v1/{}",
        base_url.trim_end_matches('/'),
        path.trim_matches('/')
    )
}
