//! Keyword evidence matching.
//!
//! A verification step supplies labels recognized in the user's evidence
//! (for example from an image recognizer). The step passes when enough of
//! the task's required keywords match some label. Matching is lenient:
//! containment either way, token containment, and for CJK text a shared
//! two-character window.

use serde::{Deserialize, Serialize};

/// Outcome of matching evidence labels against required keywords.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchReport {
    pub passed: bool,
    pub matched: Vec<String>,
    pub unmatched: Vec<String>,
}

/// Match recognized labels against required keywords.
///
/// - No required keywords: passes, nothing to check.
/// - No recognized labels: fails.
/// - Otherwise passes when at least `min_matches` keywords matched
///   (capped at the number of keywords, and at least one).
pub fn match_keywords<I, S, L>(required: I, recognized: &[L], min_matches: usize) -> MatchReport
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
    L: AsRef<str>,
{
    let required: Vec<String> = required
        .into_iter()
        .map(|k| k.as_ref().trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();

    if required.is_empty() {
        return MatchReport {
            passed: true,
            matched: Vec::new(),
            unmatched: Vec::new(),
        };
    }

    let (matched, unmatched): (Vec<String>, Vec<String>) = required
        .into_iter()
        .partition(|keyword| recognized.iter().any(|label| is_match(keyword, label.as_ref())));

    let needed = min_matches.clamp(1, matched.len() + unmatched.len());
    MatchReport {
        passed: !recognized.is_empty() && matched.len() >= needed,
        matched,
        unmatched,
    }
}

/// Whether one required keyword matches one recognized label.
pub fn is_match(required: &str, recognized: &str) -> bool {
    let required = required.trim().to_lowercase();
    let recognized = recognized.trim().to_lowercase();
    if required.is_empty() || recognized.is_empty() {
        return false;
    }
    if recognized.contains(&required) || required.contains(&recognized) {
        return true;
    }

    let required_tokens = tokens(&required);
    let recognized_tokens = tokens(&recognized);
    required_tokens.iter().any(|r| {
        recognized_tokens.iter().any(|c| {
            contains_token(r, c) || contains_token(c, r) || (!r.is_ascii() && !c.is_ascii() && shares_pair(r, c))
        })
    })
}

fn tokens(text: &str) -> Vec<&str> {
    text.split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '/' | '|' | '、' | '，' | '；'))
        .filter(|t| !t.is_empty())
        .collect()
}

/// `outer` contains `inner`, ignoring single-character tokens.
fn contains_token(outer: &str, inner: &str) -> bool {
    inner.chars().count() >= 2 && outer.contains(inner)
}

/// Any two consecutive characters of `a` appear in `b`.
fn shares_pair(a: &str, b: &str) -> bool {
    let chars: Vec<char> = a.chars().collect();
    chars.windows(2).any(|pair| {
        let window: String = pair.iter().collect();
        b.contains(&window)
    })
}
