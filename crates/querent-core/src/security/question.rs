//! Question screen, applied before any model sees the question.

use super::{RejectionRule, ValidationVerdict};
use once_cell::sync::Lazy;
use regex::RegexSet;

static SUSPICIOUS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)<script.*?>",
        r"(?i)javascript:",
        r"(?i)\bon\w+\s*=",
        r"(?i)\beval\s*\(",
        r"(?i)\bexec\s*\(",
    ])
    .expect("question patterns are valid")
});

/// Screens a natural-language question.
///
/// Returns `None` when the question may be sent to the agent, or a rejecting
/// verdict otherwise.
pub fn screen_question(question: &str, max_len: usize) -> Option<ValidationVerdict> {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        return Some(ValidationVerdict::reject(RejectionRule::Empty, "empty question"));
    }
    let length = trimmed.chars().count();
    if length > max_len {
        return Some(ValidationVerdict::reject(
            RejectionRule::QuestionTooLong,
            format!("question has {length} characters, limit is {max_len}"),
        ));
    }
    let matched: Vec<usize> = SUSPICIOUS.matches(trimmed).into_iter().collect();
    if !matched.is_empty() {
        return Some(ValidationVerdict::reject(
            RejectionRule::SuspiciousQuestion,
            format!("matched question patterns {matched:?}"),
        ));
    }
    None
}
