//! Retrieval-quality scoring for ranked result lists.
//!
//! Judges a result list against an expected target path and optional
//! avoid paths: an avoided path ranking above the target counts as a
//! miss.

/// Outcome of judging one query.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutcome {
    pub found: bool,
    pub reciprocal_rank: f64,
    pub recall: f64,
}

impl EvalOutcome {
    fn miss() -> Self {
        Self {
            found: false,
            reciprocal_rank: 0.0,
            recall: 0.0,
        }
    }
}

/// Judge ranked result paths against the expected target.
pub fn judge(result_paths: &[String], expected: &str, avoid: &[String]) -> EvalOutcome {
    for (idx, path) in result_paths.iter().enumerate() {
        if avoid.iter().any(|a| path_matches(path, a)) {
            return EvalOutcome::miss();
        }
        if path_matches(path, expected) {
            return EvalOutcome {
                found: true,
                reciprocal_rank: 1.0 / (idx as f64 + 1.0),
                recall: 1.0,
            };
        }
    }
    EvalOutcome::miss()
}

/// Exact or suffix match, so repo-relative expectations match absolute
/// result paths.
fn path_matches(path: &str, needle: &str) -> bool {
    if path == needle {
        return true;
    }
    path.strip_suffix(needle)
        .is_some_and(|rest| rest.ends_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn target_at_rank_two_scores_half() {
        let outcome = judge(&paths(&["a.ts", "match/me.ts", "c.ts"]), "match/me.ts", &[]);
        assert_eq!(
            outcome,
            EvalOutcome {
                found: true,
                reciprocal_rank: 0.5,
                recall: 1.0,
            }
        );
    }

    #[test]
    fn avoided_path_above_target_is_a_miss() {
        let outcome = judge(
            &paths(&["avoid/me.ts", "expected.ts"]),
            "expected.ts",
            &paths(&["avoid/me.ts"]),
        );
        assert_eq!(outcome, EvalOutcome::miss());
    }

    #[test]
    fn missing_target_scores_zero() {
        let outcome = judge(&paths(&["other.ts"]), "expected.ts", &[]);
        assert!(!outcome.found);
        assert_eq!(outcome.reciprocal_rank, 0.0);
        assert_eq!(outcome.recall, 0.0);
    }

    #[test]
    fn suffix_matches_respect_path_boundaries() {
        let outcome = judge(&paths(&["repo/src/match/me.ts"]), "match/me.ts", &[]);
        assert!(outcome.found);

        // "rematch/me.ts" must not match "match/me.ts".
        let outcome = judge(&paths(&["repo/rematch/me.ts"]), "match/me.ts", &[]);
        assert!(!outcome.found);
    }
}
