//! Log sanitization for OAuth secrets
//!
//! Authorization codes, access tokens, client secrets and demo passwords all
//! travel through the servers as plain strings. Nothing that grants access
//! may be logged whole: identifiers are shortened with [`redact_token`] and
//! free-form text (upstream response bodies, error messages) goes through
//! [`LogSanitizer::sanitize`].

use regex::Regex;
use std::sync::OnceLock;

/// Number of leading characters kept by [`redact_token`]
pub const REDACTED_PREFIX_LEN: usize = 20;

static PASSWORD_REGEX: OnceLock<Regex> = OnceLock::new();
static TOKEN_REGEX: OnceLock<Regex> = OnceLock::new();
static SECRET_REGEX: OnceLock<Regex> = OnceLock::new();

fn init_sanitization_patterns() {
    PASSWORD_REGEX.get_or_init(|| {
        Regex::new(
            r#"(?i)(["']?)(password|passwd|pwd)(["']?)[\s]*[=:][\s]*["'`]?([^'"`\s,&}]+)"#,
        )
        .expect("Invalid password regex")
    });

    TOKEN_REGEX.get_or_init(|| {
        Regex::new(r#"(?i)(?:(["']?)(access_token|token|code)(["']?)[\s]*[=:][\s]*['"]?([a-zA-Z0-9._~-]+)|(bearer)[\s]+([a-zA-Z0-9._~-]+))"#)
            .expect("Invalid token regex")
    });

    SECRET_REGEX.get_or_init(|| {
        Regex::new(r#"(?i)(["']?)(client_secret|code_verifier|secret)(["']?)[\s]*[=:][\s]*['"]?([^'"\s,&}]+)"#)
            .expect("Invalid secret regex")
    });
}

/// Shorten a secret identifier for logging.
///
/// Keeps the first [`REDACTED_PREFIX_LEN`] characters so log lines can still
/// be correlated (the `mcp_` prefix plus part of the random body), and never
/// the full value.
pub fn redact_token(token: &str) -> String {
    match token.char_indices().nth(REDACTED_PREFIX_LEN) {
        Some((idx, _)) => format!("{}...", &token[..idx]),
        None if token.chars().count() > 4 => {
            let half = token.chars().count() / 2;
            format!("{}...", token.chars().take(half).collect::<String>())
        }
        None => "...".to_string(),
    }
}

/// Sanitization configuration
#[derive(Debug, Clone)]
pub struct SanitizationConfig {
    /// Enable sanitization
    pub enabled: bool,

    /// Replacement string for sensitive data
    pub replacement: String,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            replacement: "[REDACTED]".to_string(),
        }
    }
}

/// Log sanitizer for removing credentials from free-form text
#[derive(Debug, Clone)]
pub struct LogSanitizer {
    config: SanitizationConfig,
}

impl Default for LogSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSanitizer {
    pub fn new() -> Self {
        Self::with_config(SanitizationConfig::default())
    }

    pub fn with_config(config: SanitizationConfig) -> Self {
        init_sanitization_patterns();
        Self { config }
    }

    /// Replace every credential value found in `message`
    pub fn sanitize(&self, message: &str) -> String {
        if !self.config.enabled {
            return message.to_string();
        }

        let mut sanitized = message.to_string();

        for regex in [&PASSWORD_REGEX, &SECRET_REGEX].into_iter().filter_map(|r| r.get()) {
            sanitized = regex
                .replace_all(&sanitized, |caps: &regex::Captures| {
                    caps[0].replace(&caps[4], &self.config.replacement)
                })
                .to_string();
        }

        if let Some(regex) = TOKEN_REGEX.get() {
            sanitized = regex
                .replace_all(&sanitized, |caps: &regex::Captures| {
                    let full_match = &caps[0];
                    // key=value form or "Bearer value" form
                    let value = caps.get(4).or_else(|| caps.get(6)).map(|m| m.as_str());
                    match value {
                        Some(value) => full_match.replace(value, &self.config.replacement),
                        None => full_match.to_string(),
                    }
                })
                .to_string();
        }

        sanitized
    }
}
