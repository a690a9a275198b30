use querent_core::schema::{ColumnSchema, ColumnType, SourceSchema, TableSchema};
use querent_core::security::{RejectionRule, SecurityValidator};
use querent_core::session::FragmentKind;

fn schema() -> SourceSchema {
    SourceSchema::new(vec![TableSchema::new(
        "users",
        vec![
            ColumnSchema::new("id", ColumnType::Integer),
            ColumnSchema::new("name", ColumnType::Text),
        ],
    )])
}

/// Case and whitespace variants of a verb.
fn obfuscations(verb: &str) -> Vec<String> {
    let lower = verb.to_lowercase();
    let mixed: String = verb
        .chars()
        .enumerate()
        .map(|(i, c)| {
            if i % 2 == 0 {
                c.to_ascii_lowercase()
            } else {
                c.to_ascii_uppercase()
            }
        })
        .collect();
    vec![verb.to_string(), lower, mixed]
}

#[test]
fn write_verbs_are_rejected_regardless_of_case_or_spacing() {
    let validator = SecurityValidator::default();
    let schema = schema();
    let verbs = ["INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "ATTACH", "PRAGMA", "CREATE"];
    let separators = [" ", "\t", "\n  ", " /* note */ "];

    for verb in verbs {
        for spelled in obfuscations(verb) {
            for sep in separators {
                let fragment = format!("{sep}{spelled}{sep}users{sep}");
                let verdict = validator.validate(&fragment, FragmentKind::Sql, &schema);
                assert!(!verdict.allowed, "accepted {fragment:?}");
                assert_eq!(verdict.rule, Some(RejectionRule::WriteOperation), "{fragment:?}");

                let batch = format!("SELECT id FROM users;{sep}{spelled} users");
                assert!(!validator.validate(&batch, FragmentKind::Sql, &schema).allowed);
            }
        }
    }
}

#[test]
fn unknown_identifiers_are_never_accepted() {
    let validator = SecurityValidator::default();
    let schema = schema();
    let fragments = [
        (FragmentKind::Sql, "SELECT email FROM users"),
        (FragmentKind::Sql, "SELECT id FROM accounts"),
        (FragmentKind::Sql, "SELECT u.email FROM users u"),
        (FragmentKind::Sql, "SELECT id FROM users WHERE lower(email) = 'x'"),
    ];
    for (kind, fragment) in fragments {
        let verdict = validator.validate(fragment, kind, &schema);
        assert!(!verdict.allowed, "{fragment}");
        assert!(verdict.rule.unwrap().is_schema_related(), "{fragment}: {verdict:?}");
        assert!(!verdict.reason.unwrap().contains("email"));
    }
}

#[test]
fn canonical_rewrites_validate_to_themselves() {
    let validator = SecurityValidator::default();
    let schema = schema();
    let fragments = [
        (FragmentKind::Sql, "select count(*)   from users"),
        (FragmentKind::Sql, "SELECT name FROM users WHERE id > 2 ORDER BY name LIMIT 3"),
        (FragmentKind::Code, "df[df['id'] > 0.0000001]"),
        (FragmentKind::Code, "len(df[~(df['name'] == 'x') & (df['id'] < 100000000000000000.0)])"),
        (FragmentKind::Code, "df.sort_values(by='id', ascending=False).head(3)"),
        (FragmentKind::Code, "df.groupby('name')['id'].max()"),
    ];
    for (kind, fragment) in fragments {
        let first = validator.validate(fragment, kind, &schema);
        let rewritten = first
            .rewritten_fragment
            .clone()
            .unwrap_or_else(|| panic!("{fragment} rejected: {first:?}"));
        let second = validator.validate(&rewritten, kind, &schema);
        assert!(second.allowed, "{rewritten} rejected: {second:?}");
        assert_eq!(second.rewritten_fragment.as_deref(), Some(rewritten.as_str()));
    }
}

#[test]
fn deeply_nested_fragments_are_rejected_not_fatal() {
    let validator = SecurityValidator::default();
    let schema = schema();
    let fragments = [
        format!("df[{}df['id'].isna()]", "~".repeat(1900)),
        format!("df[{}df['id'] > 1{}]", "(".repeat(990), ")".repeat(990)),
        format!("df[{}df['id'] > 1{}]", "(~".repeat(600), ")".repeat(600)),
    ];
    for fragment in fragments {
        let verdict = validator.validate(&fragment, FragmentKind::Code, &schema);
        assert!(!verdict.allowed);
        assert_eq!(verdict.rule, Some(RejectionRule::NestingTooDeep));
    }
}

#[test]
fn fragment_kind_selects_the_policy() {
    let validator = SecurityValidator::default();
    let schema = schema();
    assert!(validator.validate("len(df)", FragmentKind::Code, &schema).allowed);
    assert!(!validator.validate("len(df)", FragmentKind::Sql, &schema).allowed);
    assert!(!validator.validate("SELECT id FROM users", FragmentKind::Code, &schema).allowed);
}
