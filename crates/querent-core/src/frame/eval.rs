//! Frame expression evaluator.
//!
//! Runs a checked [`Program`] over an in-memory [`Table`]. The evaluator polls
//! its [`Budget`] while it walks rows and stops as soon as the deadline passes
//! or the cancellation token fires.

use super::ast::{AggFunc, CmpOp, Literal, Predicate, Program, Step};
use crate::table::{ResultSet, Table, Value};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// How many rows are processed between budget checks.
const POLL_INTERVAL: usize = 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("evaluation exceeded its {}s budget", .0.as_secs())]
    Timeout(Duration),

    #[error("evaluation was cancelled")]
    Cancelled,

    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("{0}")]
    Type(String),
}

/// Wall-clock and cancellation limits for one evaluation.
#[derive(Debug, Clone)]
pub struct Budget {
    started: Instant,
    limit: Duration,
    cancel: CancellationToken,
    ticks: usize,
}

impl Budget {
    pub fn new(limit: Duration, cancel: CancellationToken) -> Self {
        Self {
            started: Instant::now(),
            limit,
            cancel,
            ticks: 0,
        }
    }

    /// Accounts for one unit of work, checking limits every `POLL_INTERVAL` units.
    pub fn tick(&mut self) -> Result<(), EvalError> {
        self.ticks += 1;
        if self.ticks % POLL_INTERVAL == 0 {
            self.check()?;
        }
        Ok(())
    }

    pub fn check(&self) -> Result<(), EvalError> {
        if self.cancel.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        if self.started.elapsed() > self.limit {
            return Err(EvalError::Timeout(self.limit));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Frame {
    fn index(&self, name: &str) -> Result<usize, EvalError> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
            .ok_or_else(|| EvalError::UnknownColumn(name.to_string()))
    }
}

#[derive(Debug, Clone)]
struct Series {
    name: String,
    values: Vec<Value>,
}

#[derive(Debug, Clone)]
struct Grouped {
    key: String,
    /// Groups sorted by key; null keys are dropped.
    groups: Vec<(Value, Vec<Vec<Value>>)>,
    source_columns: Vec<String>,
    column: Option<usize>,
}

#[derive(Debug, Clone)]
enum Data {
    Frame(Frame),
    Series(Series),
    Grouped(Grouped),
    Scalar(String, Value),
}

/// Evaluates `program` against `table`.
///
/// # Errors
///
/// - `Timeout` / `Cancelled` when the budget runs out
/// - `UnknownColumn` / `Type` for programs that skipped the static pass
pub fn evaluate(program: &Program, table: &Table, budget: &mut Budget) -> Result<ResultSet, EvalError> {
    budget.check()?;

    let mut data = Data::Frame(Frame {
        columns: table.columns().iter().map(|c| c.name.clone()).collect(),
        rows: table.rows().to_vec(),
    });

    for step in &program.steps {
        data = apply(step, data, budget)?;
    }

    if program.len_of {
        let count = match &data {
            Data::Frame(frame) => frame.rows.len(),
            Data::Series(series) => series.values.len(),
            _ => return Err(EvalError::Type("len() needs a frame or column".into())),
        };
        data = Data::Scalar("len".to_string(), Value::Int(count as i64));
    }

    match data {
        Data::Frame(frame) => Ok(ResultSet::new(frame.columns, frame.rows)),
        Data::Series(series) => Ok(ResultSet::new(
            vec![series.name],
            series.values.into_iter().map(|value| vec![value]).collect(),
        )),
        Data::Scalar(name, value) => Ok(ResultSet::scalar(name, value)),
        Data::Grouped(_) => Err(EvalError::Type("a grouping needs an aggregate".into())),
    }
}

fn apply(step: &Step, data: Data, budget: &mut Budget) -> Result<Data, EvalError> {
    match (step, data) {
        (Step::Column(name), Data::Frame(frame)) => {
            let index = frame.index(name)?;
            Ok(Data::Series(Series {
                name: frame.columns[index].clone(),
                values: frame.rows.into_iter().map(|mut row| row.swap_remove(index)).collect(),
            }))
        }
        (Step::Project(names), Data::Frame(frame)) => {
            let indices = names
                .iter()
                .map(|name| frame.index(name))
                .collect::<Result<Vec<_>, _>>()?;
            let mut rows = Vec::with_capacity(frame.rows.len());
            for row in &frame.rows {
                budget.tick()?;
                rows.push(indices.iter().map(|&i| row[i].clone()).collect());
            }
            Ok(Data::Frame(Frame {
                columns: indices.iter().map(|&i| frame.columns[i].clone()).collect(),
                rows,
            }))
        }
        (Step::Filter(predicate), Data::Frame(frame)) => {
            let mut rows = Vec::new();
            for row in frame.rows.iter() {
                budget.tick()?;
                if matches_row(predicate, &frame, row)? {
                    rows.push(row.clone());
                }
            }
            Ok(Data::Frame(Frame {
                columns: frame.columns,
                rows,
            }))
        }
        (Step::Head(n), Data::Frame(mut frame)) => {
            frame.rows.truncate(*n);
            Ok(Data::Frame(frame))
        }
        (Step::Head(n), Data::Series(mut series)) => {
            series.values.truncate(*n);
            Ok(Data::Series(series))
        }
        (Step::Tail(n), Data::Frame(mut frame)) => {
            let skip = frame.rows.len().saturating_sub(*n);
            frame.rows.drain(..skip);
            Ok(Data::Frame(frame))
        }
        (Step::Tail(n), Data::Series(mut series)) => {
            let skip = series.values.len().saturating_sub(*n);
            series.values.drain(..skip);
            Ok(Data::Series(series))
        }
        (Step::SortValues { by: Some(by), ascending }, Data::Frame(mut frame)) => {
            let index = frame.index(by)?;
            budget.check()?;
            frame
                .rows
                .sort_by(|a, b| directed(a[index].total_cmp(&b[index]), *ascending));
            budget.check()?;
            Ok(Data::Frame(frame))
        }
        (Step::SortValues { by: None, ascending }, Data::Series(mut series)) => {
            budget.check()?;
            series
                .values
                .sort_by(|a, b| directed(a.total_cmp(b), *ascending));
            Ok(Data::Series(series))
        }
        (Step::NLargest { n, column: Some(by) }, Data::Frame(frame)) => {
            top_rows(frame, by, *n, false, budget)
        }
        (Step::NSmallest { n, column: Some(by) }, Data::Frame(frame)) => {
            top_rows(frame, by, *n, true, budget)
        }
        (Step::NLargest { n, column: None }, Data::Series(series)) => {
            Ok(Data::Series(top_values(series, *n, false)))
        }
        (Step::NSmallest { n, column: None }, Data::Series(series)) => {
            Ok(Data::Series(top_values(series, *n, true)))
        }
        (Step::DropDuplicates, Data::Frame(frame)) => {
            let mut seen = HashSet::new();
            let mut rows = Vec::new();
            for row in frame.rows {
                budget.tick()?;
                if seen.insert(format!("{row:?}")) {
                    rows.push(row);
                }
            }
            Ok(Data::Frame(Frame {
                columns: frame.columns,
                rows,
            }))
        }
        (Step::DropDuplicates | Step::Unique, Data::Series(series)) => {
            let mut seen = HashSet::new();
            let mut values = Vec::new();
            for value in series.values {
                budget.tick()?;
                if seen.insert(format!("{value:?}")) {
                    values.push(value);
                }
            }
            Ok(Data::Series(Series {
                name: series.name,
                values,
            }))
        }
        (Step::GroupBy(key), Data::Frame(frame)) => {
            let index = frame.index(key)?;
            let mut rows: Vec<Vec<Value>> = frame
                .rows
                .into_iter()
                .filter(|row| !row[index].is_null())
                .collect();
            budget.check()?;
            rows.sort_by(|a, b| a[index].total_cmp(&b[index]));

            let mut groups: Vec<(Value, Vec<Vec<Value>>)> = Vec::new();
            for row in rows {
                budget.tick()?;
                match groups.last_mut() {
                    Some((value, members)) if value.loosely_equals(&row[index]) => members.push(row),
                    _ => groups.push((row[index].clone(), vec![row])),
                }
            }

            Ok(Data::Grouped(Grouped {
                key: frame.columns[index].clone(),
                groups,
                source_columns: frame.columns,
                column: None,
            }))
        }
        (Step::Column(name), Data::Grouped(mut grouped)) if grouped.column.is_none() => {
            let index = grouped
                .source_columns
                .iter()
                .position(|column| column.eq_ignore_ascii_case(name))
                .ok_or_else(|| EvalError::UnknownColumn(name.clone()))?;
            grouped.column = Some(index);
            Ok(Data::Grouped(grouped))
        }
        (Step::Aggregate(func), Data::Series(series)) => {
            let value = aggregate(*func, series.values.iter(), budget)?;
            Ok(Data::Scalar(func.name().to_string(), value))
        }
        (Step::Aggregate(func), Data::Grouped(grouped)) => {
            let index = grouped
                .column
                .ok_or_else(|| EvalError::Type("select a column before aggregating".into()))?;
            let mut rows = Vec::with_capacity(grouped.groups.len());
            for (key, members) in &grouped.groups {
                let value = aggregate(*func, members.iter().map(|row| &row[index]), budget)?;
                rows.push(vec![key.clone(), value]);
            }
            Ok(Data::Frame(Frame {
                columns: vec![grouped.key, grouped.source_columns[index].clone()],
                rows,
            }))
        }
        (Step::Size, Data::Grouped(grouped)) => Ok(Data::Frame(Frame {
            columns: vec![grouped.key, "size".to_string()],
            rows: grouped
                .groups
                .into_iter()
                .map(|(key, members)| vec![key, Value::Int(members.len() as i64)])
                .collect(),
        })),
        (Step::ValueCounts, Data::Series(series)) => {
            let mut counts: Vec<(Value, i64)> = Vec::new();
            let mut values: Vec<Value> = series.values.into_iter().filter(|v| !v.is_null()).collect();
            budget.check()?;
            values.sort_by(|a, b| a.total_cmp(b));
            for value in values {
                budget.tick()?;
                match counts.last_mut() {
                    Some((last, count)) if last.loosely_equals(&value) => *count += 1,
                    _ => counts.push((value, 1)),
                }
            }
            // Stable: ties keep ascending value order.
            counts.sort_by(|a, b| b.1.cmp(&a.1));
            Ok(Data::Frame(Frame {
                columns: vec![series.name, "count".to_string()],
                rows: counts
                    .into_iter()
                    .map(|(value, count)| vec![value, Value::Int(count)])
                    .collect(),
            }))
        }
        (Step::ShapeRows, Data::Frame(frame)) => {
            Ok(Data::Scalar("rows".to_string(), Value::Int(frame.rows.len() as i64)))
        }
        (Step::ShapeRows, Data::Series(series)) => {
            Ok(Data::Scalar("rows".to_string(), Value::Int(series.values.len() as i64)))
        }
        (step, _) => Err(EvalError::Type(format!("{step} is not applicable here"))),
    }
}

fn directed(ordering: Ordering, ascending: bool) -> Ordering {
    if ascending { ordering } else { ordering.reverse() }
}

fn top_rows(
    mut frame: Frame,
    by: &str,
    n: usize,
    smallest: bool,
    budget: &mut Budget,
) -> Result<Data, EvalError> {
    let index = frame.index(by)?;
    frame.rows.retain(|row| !row[index].is_null());
    budget.check()?;
    frame
        .rows
        .sort_by(|a, b| directed(a[index].total_cmp(&b[index]), smallest));
    frame.rows.truncate(n);
    Ok(Data::Frame(frame))
}

fn top_values(mut series: Series, n: usize, smallest: bool) -> Series {
    series.values.retain(|value| !value.is_null());
    series
        .values
        .sort_by(|a, b| directed(a.total_cmp(b), smallest));
    series.values.truncate(n);
    series
}

fn aggregate<'a>(
    func: AggFunc,
    values: impl Iterator<Item = &'a Value>,
    budget: &mut Budget,
) -> Result<Value, EvalError> {
    let mut present = Vec::new();
    for value in values {
        budget.tick()?;
        if !value.is_null() {
            present.push(value);
        }
    }

    let numbers = || -> Result<Vec<f64>, EvalError> {
        present
            .iter()
            .map(|value| {
                value
                    .as_f64()
                    .ok_or_else(|| EvalError::Type(format!("{} needs numeric values", func.name())))
            })
            .collect()
    };

    let result = match func {
        AggFunc::Count => Value::Int(present.len() as i64),
        AggFunc::NUnique => {
            let distinct: HashSet<String> = present.iter().map(|v| format!("{v:?}")).collect();
            Value::Int(distinct.len() as i64)
        }
        AggFunc::Sum => {
            if present.iter().all(|v| matches!(v, Value::Int(_) | Value::Bool(_))) {
                let mut total: i64 = 0;
                for value in &present {
                    let n = match value {
                        Value::Int(n) => *n,
                        Value::Bool(b) => i64::from(*b),
                        _ => 0,
                    };
                    total = total
                        .checked_add(n)
                        .ok_or_else(|| EvalError::Type("integer overflow in sum".into()))?;
                }
                Value::Int(total)
            } else {
                Value::Float(numbers()?.iter().sum())
            }
        }
        AggFunc::Mean => {
            let numbers = numbers()?;
            if numbers.is_empty() {
                Value::Null
            } else {
                Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        AggFunc::Median => {
            let mut numbers = numbers()?;
            if numbers.is_empty() {
                Value::Null
            } else {
                numbers.sort_by(f64::total_cmp);
                let mid = numbers.len() / 2;
                if numbers.len() % 2 == 0 {
                    Value::Float((numbers[mid - 1] + numbers[mid]) / 2.0)
                } else {
                    Value::Float(numbers[mid])
                }
            }
        }
        AggFunc::Min => present
            .iter()
            .min_by(|a, b| a.total_cmp(b))
            .map(|v| (*v).clone())
            .unwrap_or(Value::Null),
        AggFunc::Max => present
            .iter()
            .max_by(|a, b| a.total_cmp(b))
            .map(|v| (*v).clone())
            .unwrap_or(Value::Null),
    };
    Ok(result)
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Int(n) => Value::Int(*n),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::Text(s.clone()),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::None => Value::Null,
    }
}

fn comparable(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_))
            | (Value::Text(_), Value::Text(_))
            | (Value::Bool(_), Value::Bool(_))
    )
}

fn matches_row(predicate: &Predicate, frame: &Frame, row: &[Value]) -> Result<bool, EvalError> {
    Ok(match predicate {
        Predicate::Compare { column, op, value } => {
            let cell = &row[frame.index(column)?];
            let literal = literal_value(value);
            if cell.is_null() || literal.is_null() {
                // Null never compares equal, mirroring NaN semantics.
                matches!(op, CmpOp::Ne)
            } else if !comparable(cell, &literal) {
                matches!(op, CmpOp::Ne)
            } else {
                let ordering = cell.total_cmp(&literal);
                match op {
                    CmpOp::Eq => ordering == Ordering::Equal,
                    CmpOp::Ne => ordering != Ordering::Equal,
                    CmpOp::Lt => ordering == Ordering::Less,
                    CmpOp::Le => ordering != Ordering::Greater,
                    CmpOp::Gt => ordering == Ordering::Greater,
                    CmpOp::Ge => ordering != Ordering::Less,
                }
            }
        }
        Predicate::IsIn { column, values } => {
            let cell = &row[frame.index(column)?];
            values
                .iter()
                .map(literal_value)
                .any(|literal| !cell.is_null() && comparable(cell, &literal) && cell.loosely_equals(&literal))
        }
        Predicate::Contains { column, needle } => row[frame.index(column)?]
            .as_str()
            .is_some_and(|text| text.contains(needle.as_str())),
        Predicate::IsNa(column) => row[frame.index(column)?].is_null(),
        Predicate::NotNa(column) => !row[frame.index(column)?].is_null(),
        Predicate::Not(inner) => !matches_row(inner, frame, row)?,
        Predicate::And(left, right) => {
            matches_row(left, frame, row)? && matches_row(right, frame, row)?
        }
        Predicate::Or(left, right) => {
            matches_row(left, frame, row)? || matches_row(right, frame, row)?
        }
    })
}
