//! SQL policy: exactly one read-only `SELECT` over known tables and columns.

use super::{RejectionRule, ValidationPolicy, ValidationVerdict};
use crate::schema::{SourceSchema, TableSchema};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast::{
    Expr, ObjectName, Query, SelectItem, SetExpr, Statement, TableAlias, TableFactor, Visit,
    Visitor,
};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// Write, DDL and engine-control verbs. `REPLACE` is absent so the
/// `replace()` string function stays usable; `INSERT OR REPLACE` still trips
/// on `INSERT`.
const DENIED_WORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "ATTACH", "DETACH", "PRAGMA", "EXEC",
    "EXECUTE", "CREATE", "TRUNCATE", "GRANT", "REVOKE", "VACUUM", "REINDEX", "MERGE", "UPSERT",
];

const ALLOWED_FUNCTIONS: &[&str] = &[
    // aggregates
    "count", "sum", "avg", "min", "max", "total", "group_concat",
    // window
    "row_number", "rank", "dense_rank", "ntile", "lag", "lead", "first_value", "last_value",
    // scalar
    "abs", "round", "sign", "upper", "lower", "length", "substr", "substring", "trim", "ltrim",
    "rtrim", "replace", "instr", "coalesce", "ifnull", "nullif", "iif", "typeof", "printf",
    "format",
    // date and time
    "date", "time", "datetime", "julianday", "strftime", "current_date", "current_time",
    "current_timestamp",
];

type Rejection = (RejectionRule, String);

pub(super) fn validate_sql(
    sql: &str,
    schema: &SourceSchema,
    policy: &ValidationPolicy,
) -> ValidationVerdict {
    match check(sql, schema, policy) {
        Ok(rendered) => ValidationVerdict::accept(rendered),
        Err((rule, detail)) => ValidationVerdict::reject(rule, detail),
    }
}

fn check(sql: &str, schema: &SourceSchema, policy: &ValidationPolicy) -> Result<String, Rejection> {
    let dialect = SQLiteDialect {};

    scan_tokens(&dialect, sql)?;

    let mut statements = Parser::parse_sql(&dialect, sql)
        .map_err(|err| (RejectionRule::Unparseable, err.to_string()))?;
    if statements.len() != 1 {
        return Err((
            RejectionRule::MultipleStatements,
            format!("{} statements", statements.len()),
        ));
    }
    let statement = statements.remove(0);
    if !matches!(statement, Statement::Query(_)) {
        return Err((
            RejectionRule::NotSingleSelect,
            "statement is not a query".to_string(),
        ));
    }

    let mut names = QueryNames::default();
    let _ = statement.visit(&mut names);

    let mut checker = PolicyChecker {
        schema,
        names: &names,
        max_depth: policy.max_nesting_depth,
        depth: 0,
    };
    if let ControlFlow::Break(rejection) = statement.visit(&mut checker) {
        return Err(rejection);
    }

    Ok(statement.to_string())
}

/// Token-level screen, independent of the parser.
fn scan_tokens(dialect: &SQLiteDialect, sql: &str) -> Result<(), Rejection> {
    let tokens = Tokenizer::new(dialect, sql)
        .tokenize()
        .map_err(|err| (RejectionRule::Unparseable, err.to_string()))?;

    let mut seen_separator = false;
    for token in &tokens {
        if let Token::Word(word) = token {
            let upper = word.value.to_ascii_uppercase();
            if DENIED_WORDS.contains(&upper.as_str()) {
                return Err((RejectionRule::WriteOperation, format!("denied word {upper}")));
            }
            if !IDENTIFIER.is_match(&word.value) {
                return Err((
                    RejectionRule::InvalidIdentifier,
                    format!("identifier {:?}", word.value),
                ));
            }
        }

        match token {
            Token::Whitespace(_) => {}
            Token::SemiColon => seen_separator = true,
            _ if seen_separator => {
                return Err((
                    RejectionRule::MultipleStatements,
                    "tokens after statement separator".to_string(),
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

fn lower(value: &str) -> String {
    value.to_ascii_lowercase()
}

/// Names a query introduces itself: CTEs, aliases and referenced tables.
#[derive(Debug, Default)]
struct QueryNames {
    ctes: HashSet<String>,
    aliases: HashSet<String>,
    /// Table alias to the relation it stands for.
    table_aliases: HashMap<String, String>,
    relations: HashSet<String>,
}

impl QueryNames {
    fn add_alias(&mut self, alias: &TableAlias, relation: Option<&str>) {
        let name = lower(&alias.name.value);
        self.aliases.insert(name.clone());
        if let Some(relation) = relation {
            self.table_aliases.insert(name, lower(relation));
        }
        for column in &alias.columns {
            self.aliases.insert(lower(&column.value));
        }
    }

    fn collect_projection(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => {
                for item in &select.projection {
                    if let SelectItem::ExprWithAlias { alias, .. } = item {
                        self.aliases.insert(lower(&alias.value));
                    }
                }
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_projection(left);
                self.collect_projection(right);
            }
            _ => {}
        }
    }
}

impl Visitor for QueryNames {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(lower(&cte.alias.name.value));
                for column in &cte.alias.columns {
                    self.aliases.insert(lower(&column.value));
                }
            }
        }
        self.collect_projection(&query.body);
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let relation = name.0.last().map(|ident| ident.value.clone());
                if let Some(relation) = &relation {
                    self.relations.insert(lower(relation));
                }
                if let Some(alias) = alias {
                    self.add_alias(alias, relation.as_deref());
                }
            }
            TableFactor::Derived {
                alias: Some(alias), ..
            } => self.add_alias(alias, None),
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

struct PolicyChecker<'a> {
    schema: &'a SourceSchema,
    names: &'a QueryNames,
    max_depth: usize,
    depth: usize,
}

impl PolicyChecker<'_> {
    fn check_identifier(&self, value: &str) -> ControlFlow<Rejection> {
        if IDENTIFIER.is_match(value) {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break((
                RejectionRule::InvalidIdentifier,
                format!("identifier {value:?}"),
            ))
        }
    }

    /// Schema tables the query actually reads.
    fn referenced_tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.names
            .relations
            .iter()
            .filter_map(|relation| self.schema.table(relation))
    }

    fn is_known_column(&self, column: &str) -> bool {
        let column = lower(column);
        self.names.aliases.contains(&column)
            || self
                .referenced_tables()
                .any(|table| table.has_column(&column))
    }

    fn is_known_qualifier(&self, qualifier: &str) -> bool {
        let qualifier = lower(qualifier);
        self.names.relations.contains(&qualifier)
            || self.names.ctes.contains(&qualifier)
            || self.names.aliases.contains(&qualifier)
    }

    fn check_qualified_column(&self, qualifier: &str, column: &str) -> ControlFlow<Rejection> {
        if !self.is_known_qualifier(qualifier) {
            return ControlFlow::Break((
                RejectionRule::UnknownTable,
                format!("qualifier {qualifier:?}"),
            ));
        }

        let qualifier = lower(qualifier);
        let relation = self
            .names
            .table_aliases
            .get(&qualifier)
            .cloned()
            .unwrap_or(qualifier);

        let known = match self.schema.table(&relation) {
            Some(table) if !self.names.ctes.contains(&relation) => table.has_column(column),
            _ => self.is_known_column(column),
        };

        if known {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break((
                RejectionRule::UnknownColumn,
                format!("column {relation}.{column}"),
            ))
        }
    }
}

impl Visitor for PolicyChecker<'_> {
    type Break = Rejection;

    fn pre_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return ControlFlow::Break((
                RejectionRule::NestingTooDeep,
                format!("depth {} exceeds {}", self.depth, self.max_depth),
            ));
        }
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.depth = self.depth.saturating_sub(1);
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        match factor {
            TableFactor::Table { args: Some(_), .. } => ControlFlow::Break((
                RejectionRule::ForbiddenFunction,
                "table-valued function".to_string(),
            )),
            TableFactor::Table { .. }
            | TableFactor::Derived { .. }
            | TableFactor::NestedJoin { .. } => ControlFlow::Continue(()),
            _ => ControlFlow::Break((
                RejectionRule::NotSingleSelect,
                "unsupported table factor".to_string(),
            )),
        }
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        if relation.0.len() > 1 {
            return ControlFlow::Break((
                RejectionRule::SchemaQualified,
                format!("relation {relation}"),
            ));
        }
        let Some(ident) = relation.0.first() else {
            return ControlFlow::Continue(());
        };
        self.check_identifier(&ident.value)?;

        let name = lower(&ident.value);
        if self.names.ctes.contains(&name) || self.schema.has_table(&name) {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break((RejectionRule::UnknownTable, format!("table {name:?}")))
        }
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Identifier(ident) => {
                self.check_identifier(&ident.value)?;
                if self.is_known_column(&ident.value) {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break((
                        RejectionRule::UnknownColumn,
                        format!("column {:?}", ident.value),
                    ))
                }
            }
            Expr::CompoundIdentifier(parts) => {
                for part in parts {
                    self.check_identifier(&part.value)?;
                }
                match parts.as_slice() {
                    [qualifier, column] => {
                        self.check_qualified_column(&qualifier.value, &column.value)
                    }
                    _ => ControlFlow::Break((
                        RejectionRule::SchemaQualified,
                        format!("{} part identifier", parts.len()),
                    )),
                }
            }
            Expr::Function(function) => {
                if function.name.0.len() != 1 {
                    return ControlFlow::Break((
                        RejectionRule::SchemaQualified,
                        format!("function {}", function.name),
                    ));
                }
                let name = lower(&function.name.0[0].value);
                if ALLOWED_FUNCTIONS.contains(&name.as_str()) {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break((
                        RejectionRule::ForbiddenFunction,
                        format!("function {name}"),
                    ))
                }
            }
            _ => ControlFlow::Continue(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSchema, ColumnType, TableSchema};

    fn schema() -> SourceSchema {
        SourceSchema::new(vec![
            TableSchema::new(
                "users",
                vec![
                    ColumnSchema::new("id", ColumnType::Integer),
                    ColumnSchema::new("name", ColumnType::Text),
                    ColumnSchema::new("age", ColumnType::Integer),
                ],
            ),
            TableSchema::new(
                "orders",
                vec![
                    ColumnSchema::new("id", ColumnType::Integer),
                    ColumnSchema::new("user_id", ColumnType::Integer),
                    ColumnSchema::new("total", ColumnType::Real),
                ],
            ),
        ])
    }

    fn verdict(sql: &str) -> ValidationVerdict {
        validate_sql(sql, &schema(), &ValidationPolicy::default())
    }

    fn rule(sql: &str) -> Option<RejectionRule> {
        verdict(sql).rule
    }

    #[test]
    fn test_simple_select_is_rewritten_canonically() {
        let verdict = verdict("select   name from users -- trailing comment\n where age > 30;");
        assert!(verdict.allowed, "{verdict:?}");
        assert_eq!(
            verdict.rewritten_fragment.as_deref(),
            Some("SELECT name FROM users WHERE age > 30")
        );
    }

    #[test]
    fn test_write_verbs_rejected_in_any_case() {
        for sql in [
            "DELETE FROM users",
            "delete from users",
            "DeLeTe\tFROM users",
            "insert into users values (1, 'a', 2)",
            "  UPDATE users SET age = 1",
            "drop table users",
            "ATTACH DATABASE 'x.db' AS x",
            "pragma table_info(users)",
            "SELECT * FROM users WHERE id IN (SELECT id FROM users) UNION SELECT 1 FROM \"DROP\"",
        ] {
            assert_eq!(rule(sql), Some(RejectionRule::WriteOperation), "{sql}");
        }
    }

    #[test]
    fn test_batch_is_rejected() {
        assert!(!verdict("SELECT * FROM users; SELECT 1").allowed);
        assert_eq!(
            rule("SELECT * FROM users; DROP TABLE users;"),
            Some(RejectionRule::WriteOperation)
        );
        assert_eq!(
            rule("SELECT * FROM users; SELECT * FROM orders"),
            Some(RejectionRule::MultipleStatements)
        );
    }

    #[test]
    fn test_string_literals_may_contain_denied_words() {
        assert!(verdict("SELECT id FROM users WHERE name = 'drop table'").allowed);
    }

    #[test]
    fn test_unknown_identifiers_rejected() {
        assert_eq!(rule("SELECT password FROM users"), Some(RejectionRule::UnknownColumn));
        assert_eq!(rule("SELECT * FROM sqlite_master"), Some(RejectionRule::UnknownTable));
        assert_eq!(
            rule("SELECT u.secret FROM users u"),
            Some(RejectionRule::UnknownColumn)
        );
        assert_eq!(rule("SELECT x.id FROM users u"), Some(RejectionRule::UnknownTable));
    }

    #[test]
    fn test_aliases_and_ctes_are_known() {
        for sql in [
            "SELECT u.name, o.total FROM users AS u JOIN orders o ON o.user_id = u.id",
            "SELECT name, count(*) AS n FROM users GROUP BY name ORDER BY n DESC",
            "WITH adults AS (SELECT name FROM users WHERE age >= 18) SELECT name FROM adults",
            "SELECT avg(total) FROM orders WHERE user_id IN (SELECT id FROM users)",
        ] {
            let verdict = verdict(sql);
            assert!(verdict.allowed, "{sql}: {verdict:?}");
        }
    }

    #[test]
    fn test_schema_qualified_names_rejected() {
        assert_eq!(rule("SELECT * FROM main.users"), Some(RejectionRule::SchemaQualified));
    }

    #[test]
    fn test_forbidden_functions_rejected() {
        assert_eq!(
            rule("SELECT load_extension('evil') FROM users"),
            Some(RejectionRule::ForbiddenFunction)
        );
        assert_eq!(
            rule("SELECT randomblob(1000000000) FROM users"),
            Some(RejectionRule::ForbiddenFunction)
        );
        assert!(verdict("SELECT replace(name, 'a', 'b') FROM users").allowed);
    }

    #[test]
    fn test_nesting_depth_limit() {
        let policy = ValidationPolicy {
            max_fragment_len: 2000,
            max_nesting_depth: 2,
        };
        let ok = "SELECT name FROM users WHERE id IN (SELECT user_id FROM orders)";
        let deep = "SELECT name FROM users WHERE id IN \
                    (SELECT user_id FROM orders WHERE id IN (SELECT id FROM orders))";
        assert!(validate_sql(ok, &schema(), &policy).allowed);
        assert_eq!(
            validate_sql(deep, &schema(), &policy).rule,
            Some(RejectionRule::NestingTooDeep)
        );
    }

    #[test]
    fn test_non_ascii_identifiers_rejected() {
        assert_eq!(
            rule("SELECT \"na me\" FROM users"),
            Some(RejectionRule::InvalidIdentifier)
        );
    }
}
