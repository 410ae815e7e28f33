//! Read-only SQL safety gate.
//!
//! Every statement arriving from outside the agent passes through here
//! before it touches a client database. The gate is deliberately blunt: it
//! vetoes anything that is not a single plain `SELECT`/`WITH` statement,
//! and it does so on the raw text, with no engine round trip.

use crate::error::AgentError;
use crate::Result;
use regex::Regex;
use std::sync::OnceLock;

/// Keywords that are never allowed, matched as whole words on an
/// uppercased copy so column names like `updated_at` pass untouched.
const FORBIDDEN_KEYWORDS: &str =
    "DROP|DELETE|UPDATE|INSERT|TRUNCATE|ALTER|GRANT|REVOKE|CREATE|EXEC|SHUTDOWN|MERGE|CALL";

struct GatePatterns {
    allowed_prefix: Regex,
    forbidden: Regex,
}

impl GatePatterns {
    fn instance() -> &'static Self {
        static PATTERNS: OnceLock<GatePatterns> = OnceLock::new();
        PATTERNS.get_or_init(|| Self {
            allowed_prefix: Regex::new(r"^(SELECT|WITH)\b").expect("Invalid prefix pattern"),
            forbidden: Regex::new(&format!(r"\b({FORBIDDEN_KEYWORDS})\b"))
                .expect("Invalid keyword pattern"),
        })
    }
}

/// Checks that a statement is a single read-only query.
///
/// Fails fast with the first specific reason: empty input, a non-SELECT
/// prefix, a forbidden keyword, a semicolon, or a comment token.
///
/// # Errors
///
/// Returns [`AgentError::SqlRejected`] naming the offending construct.
pub fn ensure_read_only(sql: &str) -> Result<()> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(AgentError::sql_rejected("empty statement"));
    }

    let upper = trimmed.to_uppercase();
    let patterns = GatePatterns::instance();

    if !patterns.allowed_prefix.is_match(&upper) {
        return Err(AgentError::sql_rejected(
            "statement must start with SELECT or WITH",
        ));
    }

    if let Some(found) = patterns.forbidden.find(&upper) {
        return Err(AgentError::sql_rejected(format!(
            "forbidden keyword: {}",
            found.as_str()
        )));
    }

    if upper.contains(';') {
        return Err(AgentError::sql_rejected(
            "semicolons are not allowed (single statement only)",
        ));
    }

    if upper.contains("--") {
        return Err(AgentError::sql_rejected("comment token '--' is not allowed"));
    }

    if upper.contains("/*") {
        return Err(AgentError::sql_rejected("comment token '/*' is not allowed"));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn reason(sql: &str) -> String {
        ensure_read_only(sql).unwrap_err().to_string()
    }

    #[test]
    fn test_plain_select_passes() {
        assert!(ensure_read_only("SELECT * FROM clients").is_ok());
        assert!(ensure_read_only("  select id, name from clients  ").is_ok());
    }

    #[test]
    fn test_cte_passes() {
        assert!(ensure_read_only("WITH x AS (SELECT 1) SELECT * FROM x").is_ok());
    }

    #[test]
    fn test_column_names_with_keyword_substrings_pass() {
        assert!(ensure_read_only("SELECT updated_at, created_at FROM audit_log").is_ok());
        assert!(ensure_read_only("SELECT grant_total FROM ledger").is_ok());
    }

    #[test]
    fn test_empty_statement_is_rejected() {
        assert!(reason("   ").contains("empty"));
    }

    #[test]
    fn test_non_select_prefix_is_rejected() {
        assert!(reason("DROP TABLE clients").contains("SELECT or WITH"));
        assert!(reason("EXPLAIN SELECT 1").contains("SELECT or WITH"));
    }

    #[test]
    fn test_forbidden_keywords_are_named() {
        assert!(reason("SELECT 1; DROP TABLE x").contains("DROP"));
        assert!(reason("SELECT * FROM t WHERE EXISTS (DELETE FROM u)").contains("DELETE"));
        assert!(reason("WITH x AS (SELECT 1) INSERT INTO t SELECT * FROM x").contains("INSERT"));
    }

    #[test]
    fn test_semicolon_is_rejected() {
        assert!(reason("SELECT 1;").contains("semicolon"));
    }

    #[test]
    fn test_comment_tokens_are_rejected() {
        assert!(reason("SELECT * FROM t -- hmm").contains("--"));
        assert!(reason("SELECT /* c */ 1").contains("/*"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Any statement containing a semicolon must be vetoed, no
            // matter what surrounds it.
            #[test]
            fn semicolons_never_pass(prefix in "[a-zA-Z0-9_, ]{0,40}", suffix in "[a-zA-Z0-9_, ]{0,40}") {
                let sql = format!("SELECT {prefix};{suffix}");
                prop_assert!(ensure_read_only(&sql).is_err());
            }

            // Identifier-only SELECT statements always pass the gate.
            #[test]
            fn identifier_selects_pass(column in "[a-z_][a-z0-9_]{0,20}", table in "[a-z_][a-z0-9_]{0,20}") {
                let sql = format!("SELECT {column} FROM {table}");
                // Identifiers can still collide with a forbidden keyword
                // (e.g. `drop`); those must be vetoed, everything else passes.
                let upper_is_clean = !GatePatterns::instance()
                    .forbidden
                    .is_match(&sql.to_uppercase());
                prop_assert_eq!(ensure_read_only(&sql).is_ok(), upper_is_clean);
            }
        }
    }
}
