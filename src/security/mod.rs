//! Input validation helpers for the OAuth surface.

/// Substrings that disqualify a redirect URI outright.
const DANGEROUS_PATTERNS: &[&str] = &[
    "javascript:",
    "data:",
    "vbscript:",
    "<script",
    "onclick",
    "onerror",
];

/// Safety filter applied before any redirect-URI allow-list check.
///
/// Accepts http(s) URIs and custom schemes (mobile app callbacks), rejects
/// anything scheme-less or carrying a script-injection pattern.
pub fn validate_redirect_uri(uri: &str) -> bool {
    if uri.is_empty() {
        return false;
    }

    if !uri.starts_with("http://") && !uri.starts_with("https://") && !uri.contains("://") {
        return false;
    }

    let lower = uri.to_lowercase();
    !DANGEROUS_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Scopes are space-separated tokens of `[A-Za-z0-9_]`.
pub fn validate_scope_charset(scope: &str) -> bool {
    !scope.is_empty()
        && scope
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ')
}

/// Trims, length-limits and strips markup-significant characters from a
/// chat-provided username.
pub fn sanitize_username(username: &str, max_length: usize) -> String {
    username
        .trim()
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\'' | '\\' | '/' | ';'))
        .take(max_length)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_redirect_uri_accepts_http_https() {
        assert!(validate_redirect_uri("https://rp.example.com/cb"));
        assert!(validate_redirect_uri("http://localhost:3000/callback"));
        // Custom schemes for mobile apps pass the filter.
        assert!(validate_redirect_uri("myapp://oauth/callback"));
    }

    #[test]
    fn test_validate_redirect_uri_rejects_unsafe() {
        assert!(!validate_redirect_uri(""));
        assert!(!validate_redirect_uri("no-scheme-here"));
        assert!(!validate_redirect_uri("javascript:alert(1)//x://"));
        assert!(!validate_redirect_uri("https://x/cb?d=JAVASCRIPT:alert(1)"));
        assert!(!validate_redirect_uri("https://x/cb#<script>"));
        assert!(!validate_redirect_uri("https://x/cb?onerror=steal"));
    }

    #[test]
    fn test_validate_scope_charset() {
        assert!(validate_scope_charset("openid email profile"));
        assert!(validate_scope_charset("uin preferred_username"));
        assert!(!validate_scope_charset(""));
        assert!(!validate_scope_charset("openid;drop"));
        assert!(!validate_scope_charset("open<id>"));
    }

    #[test]
    fn test_sanitize_username() {
        assert_eq!(sanitize_username("  alice  ", 64), "alice");
        assert_eq!(sanitize_username("a<b>'c\"", 64), "abc");
        assert_eq!(sanitize_username("abcdef", 3), "abc");
    }
}
