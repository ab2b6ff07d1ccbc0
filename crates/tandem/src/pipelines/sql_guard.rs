//! Read-only statement check.
//!
//! Applied to every generated statement before it may become a pending
//! proposal, and again right before execution. Only a single SELECT, WITH or
//! EXPLAIN statement passes.

use regex::Regex;
use std::sync::OnceLock;

/// SQL commands that are allowed (read-only)
const ALLOWED_PREFIXES: &[&str] = &["SELECT", "WITH", "EXPLAIN"];

/// SQL commands that are forbidden (write operations)
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "UPSERT", "DROP", "CREATE", "ALTER",
    "TRUNCATE", "RENAME", "GRANT", "REVOKE", "COPY", "VACUUM", "REINDEX", "ATTACH", "DETACH",
    "INSTALL", "LOAD", "CALL", "EXECUTE", "LOCK", "INTO",
];

fn forbidden_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(r"\b({})\b", FORBIDDEN_KEYWORDS.join("|"));
        Regex::new(&pattern).expect("forbidden keyword pattern is valid")
    })
}

fn noise_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // string literals, quoted identifiers, line and block comments
    RE.get_or_init(|| {
        Regex::new(r#"(?s)'(?:[^']|'')*'|"(?:[^"]|"")*"|--[^\n]*|/\*.*?\*/"#)
            .expect("literal/comment pattern is valid")
    })
}

fn dollar_quote_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$[A-Za-z_]*\$").expect("dollar quote pattern is valid"))
}

/// Ok when `sql` is a single read-only statement; otherwise the reason it is
/// not.
///
/// Quoting the scanner cannot follow is refused outright: a backslash inside
/// a string literal (`E'...'` escapes) or a dollar-quoted body could hide a
/// second statement from it.
pub fn ensure_read_only(sql: &str) -> Result<(), String> {
    if dollar_quote_re().is_match(sql) {
        return Err("dollar-quoted strings are not allowed".to_string());
    }
    let escaped_literal = noise_re()
        .find_iter(sql)
        .any(|m| m.as_str().starts_with('\'') && m.as_str().contains('\\'));
    if escaped_literal {
        return Err("backslash escapes in string literals are not allowed".to_string());
    }

    let stripped = noise_re().replace_all(sql, " ");
    let normalized = stripped.trim().trim_end_matches(';').trim().to_uppercase();

    if normalized.is_empty() {
        return Err("statement is empty".to_string());
    }

    if normalized.contains(';') {
        return Err("multiple statements are not allowed".to_string());
    }

    let starts_allowed = ALLOWED_PREFIXES
        .iter()
        .any(|prefix| normalized.starts_with(prefix));
    if !starts_allowed {
        return Err("statement must start with SELECT, WITH, or EXPLAIN".to_string());
    }

    // Checked even inside subqueries and CTEs
    if let Some(m) = forbidden_re().find(&normalized) {
        return Err(format!("statement contains forbidden keyword: {}", m.as_str()));
    }

    Ok(())
}
