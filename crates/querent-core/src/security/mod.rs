//! Security Validator.
//!
//! Static allow-list analysis of generated fragments before anything executes
//! them. Validation is deterministic and side-effect free; the planner runs it
//! on every query, repeated questions included.
//!
//! # Module Structure
//!
//! - `sql`: single read-only `SELECT` policy over the sqlparser AST
//! - `tabular`: frame expression policy (lexical screen, grammar, type pass)
//! - `question`: screen applied to the question before any model is called

mod question;
mod sql;
mod tabular;

pub use question::screen_question;

use crate::config::LimitsConfig;
use crate::schema::SourceSchema;
use crate::session::FragmentKind;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Category of a rejection.
///
/// Each rule maps to a fixed caller-visible reason that never contains any
/// part of the rejected fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RejectionRule {
    Empty,
    TooLong,
    WriteOperation,
    MultipleStatements,
    NotSingleSelect,
    Unparseable,
    NestingTooDeep,
    SchemaQualified,
    InvalidIdentifier,
    ForbiddenFunction,
    UnknownTable,
    UnknownColumn,
    HostileConstruct,
    OutsideGrammar,
    KindMismatch,
    QuestionTooLong,
    SuspiciousQuestion,
}

impl RejectionRule {
    /// Sanitised text shown to the person who asked the question.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Empty => "the generated query was empty",
            Self::TooLong => "the generated query exceeds the maximum allowed length",
            Self::WriteOperation => "only read-only queries are allowed",
            Self::MultipleStatements => "multiple statements are not allowed",
            Self::NotSingleSelect => "only a single SELECT statement is allowed",
            Self::Unparseable => "the generated query could not be parsed",
            Self::NestingTooDeep => "the query is nested too deeply",
            Self::SchemaQualified => "schema-qualified names are not allowed",
            Self::InvalidIdentifier => "the query contains an identifier that is not allowed",
            Self::ForbiddenFunction => "the query calls a function that is not allowed",
            Self::UnknownTable => "the query references a table that does not exist in the bound data",
            Self::UnknownColumn => "the query references a column that does not exist in the bound data",
            Self::HostileConstruct => "the expression uses a construct that is not allowed",
            Self::OutsideGrammar => "the expression is outside the supported query language",
            Self::KindMismatch => "the generated query does not match the bound data source",
            Self::QuestionTooLong => "the question is too long",
            Self::SuspiciousQuestion => "the question contains content that is not allowed",
        }
    }

    /// Rejections that point at the bound schema rather than the query shape.
    pub fn is_schema_related(&self) -> bool {
        matches!(self, Self::UnknownTable | Self::UnknownColumn)
    }
}

/// Outcome of validating one fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub allowed: bool,
    /// Caller-visible reason, present when rejected.
    pub reason: Option<String>,
    /// Canonical form of an accepted fragment; this is what executes.
    pub rewritten_fragment: Option<String>,
    pub rule: Option<RejectionRule>,
    /// Internal detail for logs and regeneration feedback only.
    #[serde(skip)]
    pub detail: Option<String>,
}

impl ValidationVerdict {
    pub fn accept(rewritten: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: None,
            rewritten_fragment: Some(rewritten.into()),
            rule: None,
            detail: None,
        }
    }

    pub fn reject(rule: RejectionRule, detail: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(rule.reason().to_string()),
            rewritten_fragment: None,
            rule: Some(rule),
            detail: Some(detail.into()),
        }
    }

    /// Text to execute: the rewrite when present, else the original.
    pub fn executable<'a>(&'a self, original: &'a str) -> &'a str {
        self.rewritten_fragment.as_deref().unwrap_or(original)
    }
}

/// Limits the validator enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationPolicy {
    pub max_fragment_len: usize,
    pub max_nesting_depth: usize,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

impl From<&LimitsConfig> for ValidationPolicy {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            max_fragment_len: limits.max_fragment_len,
            max_nesting_depth: limits.max_nesting_depth,
        }
    }
}

/// Validates fragments against the bound schema.
#[derive(Debug, Clone, Default)]
pub struct SecurityValidator {
    policy: ValidationPolicy,
}

impl SecurityValidator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    /// Validates `fragment` as `kind` against `schema`.
    ///
    /// # Examples
    ///
    /// ```
    /// use querent_core::schema::{ColumnSchema, ColumnType, SourceSchema, TableSchema};
    /// use querent_core::security::{RejectionRule, SecurityValidator};
    /// use querent_core::session::FragmentKind;
    ///
    /// let schema = SourceSchema::new(vec![TableSchema::new(
    ///     "users",
    ///     vec![ColumnSchema::new("id", ColumnType::Integer)],
    /// )]);
    /// let validator = SecurityValidator::default();
    ///
    /// let verdict = validator.validate("select count(*) from users", FragmentKind::Sql, &schema);
    /// assert!(verdict.allowed);
    ///
    /// let verdict = validator.validate("DELETE FROM users", FragmentKind::Sql, &schema);
    /// assert_eq!(verdict.rule, Some(RejectionRule::WriteOperation));
    /// ```
    pub fn validate(
        &self,
        fragment: &str,
        kind: FragmentKind,
        schema: &SourceSchema,
    ) -> ValidationVerdict {
        let trimmed = fragment.trim();
        if trimmed.is_empty() {
            return ValidationVerdict::reject(RejectionRule::Empty, "empty fragment");
        }
        if trimmed.chars().count() > self.policy.max_fragment_len {
            return ValidationVerdict::reject(
                RejectionRule::TooLong,
                format!(
                    "fragment has {} characters, limit is {}",
                    trimmed.chars().count(),
                    self.policy.max_fragment_len
                ),
            );
        }

        match kind {
            FragmentKind::Sql => sql::validate_sql(trimmed, schema, &self.policy),
            FragmentKind::Code => tabular::validate_frame(trimmed, schema),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons_never_mention_payload() {
        let verdict = ValidationVerdict::reject(RejectionRule::UnknownColumn, "column 'secret_pw'");
        assert!(!verdict.allowed);
        assert!(!verdict.reason.as_deref().unwrap().contains("secret_pw"));
        let json = serde_json::to_string(&verdict).unwrap();
        assert!(!json.contains("secret_pw"));
    }

    #[test]
    fn test_length_limit_applies_to_both_kinds() {
        let validator = SecurityValidator::new(ValidationPolicy {
            max_fragment_len: 10,
            max_nesting_depth: 3,
        });
        let schema = SourceSchema::default();
        for kind in [FragmentKind::Sql, FragmentKind::Code] {
            let verdict = validator.validate("SELECT 1 + 1 + 1 + 1", kind, &schema);
            assert_eq!(verdict.rule, Some(RejectionRule::TooLong));
        }
        assert_eq!(
            validator.validate("   ", FragmentKind::Sql, &schema).rule,
            Some(RejectionRule::Empty)
        );
    }
}
