//! LocalRuleAgent - deterministic fragment proposals without a model.
//!
//! Questions are matched against keyword intents (counting, averages, sums,
//! extremes, distinct values, top-N, listing) and against the names of the
//! bound tables and columns. The result is a frame expression for tabular
//! sessions and a SQLite `SELECT` for relational ones. Keywords cover English
//! and Portuguese phrasing.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use querent_core::agent::{AgentError, Fragment, FragmentAgent, ProposalRequest};
use querent_core::frame::{AggFunc, Program, Step};
use querent_core::schema::{ColumnSchema, SourceSchema, TableSchema};
use querent_core::session::DataMode;
use regex::Regex;

const DEFAULT_LIST_ROWS: usize = 5;
const MAX_LIST_ROWS: usize = 1000;

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{1,4})\b").expect("number pattern is valid"));

const COUNT_WORDS: &[&str] = &["how many", "count", "number of", "quantos", "quantas", "quantidade"];
const DISTINCT_WORDS: &[&str] = &["distinct", "unique", "different", "distintos", "únicos"];
const MEAN_WORDS: &[&str] = &["average", "mean", "média", "media"];
const MEDIAN_WORDS: &[&str] = &["median", "mediana"];
const SUM_WORDS: &[&str] = &["total", "sum", "soma"];
const MAX_WORDS: &[&str] = &["maximum", "max", "highest", "largest", "biggest", "máximo", "maior"];
const MIN_WORDS: &[&str] = &["minimum", "min", "lowest", "smallest", "mínimo", "menor"];
const TOP_WORDS: &[&str] = &["top", "largest", "highest", "biggest"];
const BOTTOM_WORDS: &[&str] = &["bottom", "lowest", "smallest"];
const GROUP_WORDS: &[&str] = &["by", "per", "for each", "por", "each"];

/// What the question asks for.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Intent {
    Count,
    CountDistinct,
    Distinct,
    Aggregate(AggFunc),
    Largest(usize),
    Smallest(usize),
    List(usize),
}

/// An intent resolved against one table.
#[derive(Debug)]
struct Plan<'a> {
    intent: Intent,
    table: &'a TableSchema,
    target: Option<&'a ColumnSchema>,
    group_by: Option<&'a ColumnSchema>,
}

/// Rule-based local agent.
#[derive(Debug, Clone, Default)]
pub struct LocalRuleAgent;

impl LocalRuleAgent {
    pub fn new() -> Self {
        Self
    }

    fn plan<'a>(&self, question: &str, schema: &'a SourceSchema) -> Result<Plan<'a>, AgentError> {
        let question = question.to_lowercase();
        let table = pick_table(&question, schema)
            .ok_or_else(|| AgentError::ExecutionFailed("no table is bound".into()))?;

        let intent = detect_intent(&question);

        // Only counts and aggregates can be grouped.
        let group_by = match intent {
            Intent::Count | Intent::Aggregate(_) => table.columns.iter().find(|column| {
                let variants = phrase_variants(&column.name);
                GROUP_WORDS.iter().any(|word| {
                    variants
                        .iter()
                        .any(|variant| mentions(&question, &format!("{word} {variant}")))
                })
            }),
            _ => None,
        };

        let mentioned = mentioned_columns(&question, table, group_by);

        let target = match intent {
            Intent::Count | Intent::List(_) => None,
            Intent::Distinct | Intent::CountDistinct => mentioned.first().copied().or(group_by),
            Intent::Aggregate(AggFunc::Max | AggFunc::Min) => mentioned
                .iter()
                .find(|column| column.column_type.is_numeric())
                .or(mentioned.first())
                .copied()
                .or_else(|| first_numeric(table, group_by)),
            Intent::Aggregate(_) | Intent::Largest(_) | Intent::Smallest(_) => mentioned
                .iter()
                .find(|column| column.column_type.is_numeric())
                .copied()
                .or_else(|| first_numeric(table, group_by)),
        };

        let needs_target = !matches!(intent, Intent::Count | Intent::List(_));
        if needs_target && target.is_none() {
            return Err(AgentError::ExecutionFailed(format!(
                "could not find a suitable column in '{}' for this question",
                table.name
            )));
        }

        Ok(Plan {
            intent,
            table,
            target,
            group_by,
        })
    }
}

#[async_trait]
impl FragmentAgent for LocalRuleAgent {
    fn name(&self) -> &str {
        "local"
    }

    async fn propose(&self, request: &ProposalRequest) -> Result<Fragment, AgentError> {
        let mut plan = self.plan(&request.question, &request.schema)?;

        // Same input, same output: after a rejection only a plain listing is left.
        if request.feedback.is_some() {
            plan.intent = Intent::List(DEFAULT_LIST_ROWS);
            plan.group_by = None;
        }

        tracing::debug!(
            "[LocalRuleAgent] intent={:?} table={} target={:?} group_by={:?}",
            plan.intent,
            plan.table.name,
            plan.target.map(|c| c.name.as_str()),
            plan.group_by.map(|c| c.name.as_str())
        );

        match request.mode {
            DataMode::Tabular => Ok(Fragment::code(frame_fragment(&plan).to_string())),
            DataMode::Relational => sql_fragment(&plan).map(Fragment::sql),
        }
    }
}

// ============================================================================
// Question analysis
// ============================================================================

fn detect_intent(question: &str) -> Intent {
    let has = |words: &[&str]| words.iter().any(|word| mentions(question, word));
    let number = NUMBER
        .captures(question)
        .and_then(|caps| caps[1].parse::<usize>().ok())
        .map(|n| n.clamp(1, MAX_LIST_ROWS));

    if has(COUNT_WORDS) && has(DISTINCT_WORDS) {
        Intent::CountDistinct
    } else if has(DISTINCT_WORDS) {
        Intent::Distinct
    } else if has(COUNT_WORDS) {
        Intent::Count
    } else if let (Some(n), true) = (number, has(TOP_WORDS)) {
        Intent::Largest(n)
    } else if let (Some(n), true) = (number, has(BOTTOM_WORDS)) {
        Intent::Smallest(n)
    } else if has(MEAN_WORDS) {
        Intent::Aggregate(AggFunc::Mean)
    } else if has(MEDIAN_WORDS) {
        Intent::Aggregate(AggFunc::Median)
    } else if has(SUM_WORDS) {
        Intent::Aggregate(AggFunc::Sum)
    } else if has(MAX_WORDS) {
        Intent::Aggregate(AggFunc::Max)
    } else if has(MIN_WORDS) {
        Intent::Aggregate(AggFunc::Min)
    } else {
        Intent::List(number.unwrap_or(DEFAULT_LIST_ROWS))
    }
}

/// The table named in the question, else the one whose columns are mentioned
/// most, else the first.
fn pick_table<'a>(question: &str, schema: &'a SourceSchema) -> Option<&'a TableSchema> {
    let named = schema
        .tables
        .iter()
        .filter_map(|table| {
            phrase_variants(&table.name)
                .iter()
                .filter_map(|variant| position_of(question, variant))
                .min()
                .map(|pos| (pos, table))
        })
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, table)| table);

    named
        .or_else(|| {
            schema
                .tables
                .iter()
                .map(|table| (mentioned_columns(question, table, None).len(), table))
                .filter(|(hits, _)| *hits > 0)
                .max_by_key(|(hits, _)| *hits)
                .map(|(_, table)| table)
        })
        .or_else(|| schema.tables.first())
}

/// Columns mentioned in the question, in order of first mention.
fn mentioned_columns<'a>(
    question: &str,
    table: &'a TableSchema,
    exclude: Option<&ColumnSchema>,
) -> Vec<&'a ColumnSchema> {
    let mut hits: Vec<(usize, &ColumnSchema)> = table
        .columns
        .iter()
        .filter(|column| exclude.is_none_or(|excluded| excluded.name != column.name))
        .filter_map(|column| {
            phrase_variants(&column.name)
                .iter()
                .filter_map(|variant| position_of(question, variant))
                .min()
                .map(|pos| (pos, column))
        })
        .collect();
    hits.sort_by_key(|(pos, _)| *pos);
    hits.into_iter().map(|(_, column)| column).collect()
}

fn first_numeric<'a>(table: &'a TableSchema, exclude: Option<&ColumnSchema>) -> Option<&'a ColumnSchema> {
    table.columns.iter().find(|column| {
        column.column_type.is_numeric() && exclude.is_none_or(|excluded| excluded.name != column.name)
    })
}

/// Ways a schema name may appear in prose: as-is, with spaces for
/// underscores, and singular/plural forms.
fn phrase_variants(name: &str) -> Vec<String> {
    let lower = name.to_lowercase();
    let spaced = lower.replace('_', " ");
    let mut variants = vec![lower.clone()];
    if spaced != lower {
        variants.push(spaced.clone());
    }
    for base in [&lower, &spaced] {
        match base.strip_suffix('s') {
            Some(singular) if singular.len() > 2 => variants.push(singular.to_string()),
            _ => variants.push(format!("{base}s")),
        }
    }
    variants.dedup();
    variants
}

/// Byte offset of `phrase` as a whole word in `text`.
fn position_of(text: &str, phrase: &str) -> Option<usize> {
    if phrase.is_empty() {
        return None;
    }
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    text.match_indices(phrase).map(|(start, _)| start).find(|&start| {
        let before = text[..start].chars().next_back();
        let after = text[start + phrase.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

fn mentions(text: &str, phrase: &str) -> bool {
    position_of(text, phrase).is_some()
}

// ============================================================================
// Rendering
// ============================================================================

fn frame_fragment(plan: &Plan<'_>) -> Program {
    let target = plan.target.map(|column| column.name.clone());
    let group = plan.group_by.map(|column| column.name.clone());

    let (len_of, steps) = match (plan.intent, group, target) {
        (Intent::Count, None, _) => (true, vec![]),
        (Intent::Count, Some(group), _) => (false, vec![Step::GroupBy(group), Step::Size]),
        (Intent::CountDistinct, _, Some(target)) => {
            (false, vec![Step::Column(target), Step::Aggregate(AggFunc::NUnique)])
        }
        (Intent::Distinct, _, Some(target)) => (false, vec![Step::Column(target), Step::Unique]),
        (Intent::Aggregate(func), Some(group), Some(target)) => (
            false,
            vec![Step::GroupBy(group), Step::Column(target), Step::Aggregate(func)],
        ),
        (Intent::Aggregate(func), None, Some(target)) => {
            (false, vec![Step::Column(target), Step::Aggregate(func)])
        }
        (Intent::Largest(n), _, Some(target)) => (
            false,
            vec![Step::NLargest {
                n,
                column: Some(target),
            }],
        ),
        (Intent::Smallest(n), _, Some(target)) => (
            false,
            vec![Step::NSmallest {
                n,
                column: Some(target),
            }],
        ),
        (Intent::List(n), _, _) => (false, vec![Step::Head(n)]),
        // Targets are resolved in plan(); this only covers the listing fallback.
        (_, _, None) => (false, vec![Step::Head(DEFAULT_LIST_ROWS)]),
    };
    Program { len_of, steps }
}

fn sql_fragment(plan: &Plan<'_>) -> Result<String, AgentError> {
    let table = &plan.table.name;
    let target = plan.target.map(|column| column.name.as_str());
    let group = plan.group_by.map(|column| column.name.as_str());

    let sql = match (plan.intent, group, target) {
        (Intent::Count, None, _) => format!("SELECT COUNT(*) AS row_count FROM {table}"),
        (Intent::Count, Some(group), _) => format!(
            "SELECT {group}, COUNT(*) AS row_count FROM {table} GROUP BY {group} ORDER BY {group}"
        ),
        (Intent::CountDistinct, _, Some(target)) => {
            format!("SELECT COUNT(DISTINCT {target}) AS distinct_{target} FROM {table}")
        }
        (Intent::Distinct, _, Some(target)) => {
            format!("SELECT DISTINCT {target} FROM {table} ORDER BY {target}")
        }
        (Intent::Aggregate(AggFunc::Median), _, _) => {
            return Err(AgentError::ExecutionFailed(
                "the local agent cannot express a median in SQLite".into(),
            ));
        }
        (Intent::Aggregate(func), group, Some(target)) => {
            let sql_func = match func {
                AggFunc::Mean => "AVG",
                AggFunc::Sum => "SUM",
                AggFunc::Min => "MIN",
                AggFunc::Max => "MAX",
                AggFunc::Count => "COUNT",
                AggFunc::NUnique | AggFunc::Median => "COUNT",
            };
            let alias = format!("{}_{target}", func.name());
            match group {
                Some(group) => format!(
                    "SELECT {group}, {sql_func}({target}) AS {alias} FROM {table} GROUP BY {group} ORDER BY {group}"
                ),
                None => format!("SELECT {sql_func}({target}) AS {alias} FROM {table}"),
            }
        }
        (Intent::Largest(n), _, Some(target)) => {
            format!("SELECT * FROM {table} ORDER BY {target} DESC LIMIT {n}")
        }
        (Intent::Smallest(n), _, Some(target)) => {
            format!("SELECT * FROM {table} ORDER BY {target} ASC LIMIT {n}")
        }
        (Intent::List(n), _, _) => format!("SELECT * FROM {table} LIMIT {n}"),
        (_, _, None) => format!("SELECT * FROM {table} LIMIT {DEFAULT_LIST_ROWS}"),
    };
    Ok(sql)
}
