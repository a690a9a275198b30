//! Frame expression policy.

use super::{RejectionRule, ValidationVerdict};
use crate::frame::{CheckError, FrameSyntaxError, check_program, parse_program};
use crate::schema::SourceSchema;
use once_cell::sync::Lazy;
use regex::Regex;

/// Constructs that never belong in a frame expression.
static HOSTILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        \bimport\b | __\w*__ | \beval\b | \bexec\b | \bcompile\b | \bopen\s*\(
        | \bos\s*\. | \bsys\s*\. | \bsubprocess\b | \blambda\b | \bgetattr\b
        | \bsetattr\b | \bglobals\b | \blocals\b | \bquery\s*\( | \bpipe\s*\(
        | \bapply\s*\( | \bto_\w+\s*\( | \bread_\w+\s*\(",
    )
    .expect("hostile construct pattern is valid")
});

/// Blanks the contents of quoted strings so column names and values are not
/// screened as code. An unterminated string is blanked to the end; the parser
/// rejects it anyway.
fn mask_strings(code: &str) -> String {
    let mut masked = String::with_capacity(code.len());
    let mut quote = None;
    let mut escaped = false;
    for c in code.chars() {
        match quote {
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                }
                masked.push(c);
            }
            Some(open) => {
                if escaped {
                    escaped = false;
                    masked.push(' ');
                } else if c == '\\' {
                    escaped = true;
                    masked.push(' ');
                } else if c == open {
                    quote = None;
                    masked.push(c);
                } else {
                    masked.push(' ');
                }
            }
        }
    }
    masked
}

pub(super) fn validate_frame(code: &str, schema: &SourceSchema) -> ValidationVerdict {
    if let Some(found) = HOSTILE.find(&mask_strings(code)) {
        return ValidationVerdict::reject(
            RejectionRule::HostileConstruct,
            format!("matched {:?}", found.as_str()),
        );
    }

    let program = match parse_program(code) {
        Ok(program) => program,
        Err(err @ FrameSyntaxError::TooDeep { .. }) => {
            return ValidationVerdict::reject(RejectionRule::NestingTooDeep, err.to_string());
        }
        Err(err) => {
            return ValidationVerdict::reject(RejectionRule::OutsideGrammar, err.to_string());
        }
    };

    // A tabular binding has exactly one table.
    let Some(table) = schema.tables.first() else {
        return ValidationVerdict::reject(RejectionRule::UnknownTable, "no table is bound");
    };

    match check_program(&program, table) {
        Ok(_) => ValidationVerdict::accept(program.to_string()),
        Err(err @ CheckError::UnknownColumn(_)) => {
            ValidationVerdict::reject(RejectionRule::UnknownColumn, err.to_string())
        }
        Err(err) => ValidationVerdict::reject(RejectionRule::OutsideGrammar, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSchema, ColumnType, TableSchema};

    fn schema() -> SourceSchema {
        SourceSchema::new(vec![TableSchema::new(
            "sales",
            vec![
                ColumnSchema::new("region", ColumnType::Text),
                ColumnSchema::new("amount", ColumnType::Real),
            ],
        )])
    }

    #[test]
    fn test_accepts_and_canonicalises() {
        let verdict = validate_frame("df.groupby(\"region\")[\"amount\"].sum( )", &schema());
        assert!(verdict.allowed, "{verdict:?}");
        assert_eq!(
            verdict.rewritten_fragment.as_deref(),
            Some("df.groupby('region')['amount'].sum()")
        );
    }

    #[test]
    fn test_hostile_constructs_rejected() {
        for code in [
            "__import__('os').system('rm -rf /')",
            "df.apply(lambda r: r)",
            "eval('1+1')",
            "df.to_csv('/tmp/x')",
            "df.query('amount > 1')",
            "open('/etc/passwd').read()",
            "df.__class__",
        ] {
            let verdict = validate_frame(code, &schema());
            assert_eq!(verdict.rule, Some(RejectionRule::HostileConstruct), "{code}");
        }
    }

    #[test]
    fn test_keywords_inside_strings_are_data() {
        let trade = SourceSchema::new(vec![TableSchema::new(
            "trade",
            vec![
                ColumnSchema::new("flow", ColumnType::Text),
                ColumnSchema::new("import", ColumnType::Real),
            ],
        )]);
        for code in [
            "df['import'].sum()",
            "len(df[df['flow'] == 'locals'])",
            r#"df[df['flow'].str.contains("exec(\"x\")")]"#,
        ] {
            let verdict = validate_frame(code, &trade);
            assert!(verdict.allowed, "{code}: {verdict:?}");
        }

        // The same words outside quotes are still screened.
        let verdict = validate_frame("df['flow'].apply(eval)", &trade);
        assert_eq!(verdict.rule, Some(RejectionRule::HostileConstruct));
    }

    #[test]
    fn test_deep_negation_is_rejected_as_nesting() {
        let code = format!("df[{}df['amount'].isna()]", "~".repeat(1900));
        let verdict = validate_frame(&code, &schema());
        assert_eq!(verdict.rule, Some(RejectionRule::NestingTooDeep));
    }

    #[test]
    fn test_unknown_column_rejected() {
        let verdict = validate_frame("df['profit'].sum()", &schema());
        assert_eq!(verdict.rule, Some(RejectionRule::UnknownColumn));
    }

    #[test]
    fn test_outside_grammar_rejected() {
        for code in ["df.iloc[0]", "df['region'] + 1", "print(df)", "df.sum()"] {
            let verdict = validate_frame(code, &schema());
            assert_eq!(verdict.rule, Some(RejectionRule::OutsideGrammar), "{code}");
        }
    }
}
