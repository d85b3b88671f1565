//! Admission: accept only single-statement, read-only queries.

use snafu::Snafu;

const STATEMENT_TERMINATOR: char = ';';

/// Substrings whose presence anywhere in the lowercased query causes rejection.
///
/// Intentionally a blunt substring filter, not a parse-based check: it is safe-by-default at
/// the cost of also rejecting queries that merely mention these words inside string literals
/// or identifiers. Callers that need those substrings in literals are out of scope.
const FORBIDDEN_TOKENS: &[&str] = &[
    "insert", "update", "delete", "alter", "drop", "truncate", "merge",
];

/// Reason a query was rejected by [`admit`].
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// More than one statement-terminator was found after stripping a single trailing one.
    #[snafu(display("stacked statements are not allowed"))]
    StackedStatements,

    /// The first keyword was not `SELECT`.
    #[snafu(display("only SELECT statements are accepted"))]
    NotASelect,

    /// The query contains a forbidden, potentially mutating keyword.
    #[snafu(display("query contains forbidden keyword: {keyword}"))]
    ForbiddenKeyword {
        /// The matched forbidden token.
        keyword: String,
    },
}

/// Admit or reject a raw query per the three admission rules.
///
/// All three rules must pass. Rejection is final: callers must not retry or fall back, they
/// must surface a client error.
pub fn admit(query: &str) -> Result<(), AdmissionError> {
    let trimmed = query.trim();

    // Rule 1: strip exactly one trailing terminator, then there must be none left.
    let body = trimmed.strip_suffix(STATEMENT_TERMINATOR).unwrap_or(trimmed);
    if body.contains(STATEMENT_TERMINATOR) {
        return Err(AdmissionError::StackedStatements);
    }

    // Rule 2: first keyword, case-insensitive, must be SELECT.
    let first_word = body
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .find(|s| !s.is_empty())
        .unwrap_or("");
    if !first_word.eq_ignore_ascii_case("select") {
        return Err(AdmissionError::NotASelect);
    }

    // Rule 3: substring filter over the lowercased query.
    let lowered = body.to_ascii_lowercase();
    for token in FORBIDDEN_TOKENS {
        if lowered.contains(token) {
            return Err(AdmissionError::ForbiddenKeyword {
                keyword: token.to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_select() {
        assert_eq!(admit("SELECT 1"), Ok(()));
        assert_eq!(admit("  select p1, p2 from t group by p1, p2;  "), Ok(()));
    }

    #[test]
    fn rejects_stacked_statements() {
        assert_eq!(
            admit("SELECT 1; SELECT 2"),
            Err(AdmissionError::StackedStatements)
        );
        assert_eq!(
            admit("SELECT 1;;"),
            Err(AdmissionError::StackedStatements)
        );
    }

    #[test]
    fn rejects_non_select() {
        assert_eq!(admit("WITH x AS (SELECT 1) SELECT * FROM x"), Err(AdmissionError::NotASelect));
        assert_eq!(admit(""), Err(AdmissionError::NotASelect));
    }

    #[test]
    fn rejects_forbidden_keywords_case_insensitively() {
        assert_eq!(
            admit("DELETE FROM public.facts_agg"),
            Err(AdmissionError::NotASelect)
        );
        assert!(matches!(
            admit("SELECT * FROM t WHERE x = 1 AND UPDATE_FLAG = 1"),
            Err(AdmissionError::ForbiddenKeyword { .. })
        ));
        assert!(matches!(
            admit("select * from t /* DROP everything */"),
            Err(AdmissionError::ForbiddenKeyword { .. })
        ));
    }

    #[test]
    fn admission_soundness_for_all_forbidden_tokens() {
        for token in FORBIDDEN_TOKENS {
            let q = format!("SELECT * FROM t WHERE a = '{token}'");
            assert!(admit(&q).is_err(), "expected rejection for token {token}");
        }
    }
}
