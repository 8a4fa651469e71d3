//! Remove secret values from provider response bodies before they reach logs or errors.

use std::sync::OnceLock;

use regex::Regex;

const MAX_BODY_CHARS: usize = 200;

fn secret_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?i)("?\b(?:access_token|refresh_token|id_token|token|client_secret|code|code_verifier)"?\s*[:=]\s*"?)([^"&,\s}]+)"#,
        )
        .expect("secret scrub pattern is valid")
    })
}

/// Replace secret-bearing values with `[redacted]` and cap the length.
pub fn scrub_secrets(body: &str) -> String {
    let scrubbed = secret_pattern().replace_all(body, "${1}[redacted]");
    let mut out: String = scrubbed.chars().take(MAX_BODY_CHARS).collect();
    if scrubbed.chars().count() > MAX_BODY_CHARS {
        out.push('…');
    }
    out
}
