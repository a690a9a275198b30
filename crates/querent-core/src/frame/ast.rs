//! Frame expression syntax tree.
//!
//! `Display` renders the canonical form that is recorded in history.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: String,
        op: CmpOp,
        value: Literal,
    },
    IsIn {
        column: String,
        values: Vec<Literal>,
    },
    Contains {
        column: String,
        needle: String,
    },
    IsNa(String),
    NotNa(String),
    Not(Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    /// Every column the predicate reads, in order of appearance.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Compare { column, .. }
            | Self::IsIn { column, .. }
            | Self::Contains { column, .. }
            | Self::IsNa(column)
            | Self::NotNa(column) => out.push(column),
            Self::Not(inner) => inner.collect_columns(out),
            Self::And(left, right) | Self::Or(left, right) => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Mean,
    Median,
    Min,
    Max,
    NUnique,
}

impl AggFunc {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Min => "min",
            Self::Max => "max",
            Self::NUnique => "nunique",
        }
    }

    /// Aggregates that only make sense over numbers.
    pub fn requires_numeric(&self) -> bool {
        matches!(self, Self::Sum | Self::Mean | Self::Median)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// `["col"]`
    Column(String),
    /// `[["a", "b"]]`
    Project(Vec<String>),
    /// `[predicate]`
    Filter(Predicate),
    Head(usize),
    Tail(usize),
    SortValues {
        by: Option<String>,
        ascending: bool,
    },
    GroupBy(String),
    Aggregate(AggFunc),
    Size,
    ValueCounts,
    Unique,
    NLargest {
        n: usize,
        column: Option<String>,
    },
    NSmallest {
        n: usize,
        column: Option<String>,
    },
    DropDuplicates,
    /// `.shape[0]`
    ShapeRows,
}

/// A parsed expression: `df` followed by steps, optionally wrapped in `len()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub len_of: bool,
    pub steps: Vec<Step>,
}

// ============================================================================
// Canonical rendering
// ============================================================================

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            // `Display` never uses exponents; keep a `.` so it re-parses as a float.
            Self::Float(value) if value.fract() == 0.0 => write!(f, "{value:.1}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "{}", quote(value)),
            Self::Bool(true) => write!(f, "True"),
            Self::Bool(false) => write!(f, "False"),
            Self::None => write!(f, "None"),
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare { column, op, value } => {
                write!(f, "(df[{}] {op} {value})", quote(column))
            }
            Self::IsIn { column, values } => {
                let values = values
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "df[{}].isin([{values}])", quote(column))
            }
            Self::Contains { column, needle } => {
                write!(f, "df[{}].str.contains({})", quote(column), quote(needle))
            }
            Self::IsNa(column) => write!(f, "df[{}].isna()", quote(column)),
            Self::NotNa(column) => write!(f, "df[{}].notna()", quote(column)),
            Self::Not(inner) => write!(f, "~{inner}"),
            Self::And(left, right) => write!(f, "({left} & {right})"),
            Self::Or(left, right) => write!(f, "({left} | {right})"),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(column) => write!(f, "[{}]", quote(column)),
            Self::Project(columns) => {
                let columns = columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
                write!(f, "[[{columns}]]")
            }
            Self::Filter(predicate) => write!(f, "[{predicate}]"),
            Self::Head(n) => write!(f, ".head({n})"),
            Self::Tail(n) => write!(f, ".tail({n})"),
            Self::SortValues { by, ascending } => {
                let ascending = if *ascending { "True" } else { "False" };
                match by {
                    Some(column) => {
                        write!(f, ".sort_values(by={}, ascending={ascending})", quote(column))
                    }
                    None => write!(f, ".sort_values(ascending={ascending})"),
                }
            }
            Self::GroupBy(column) => write!(f, ".groupby({})", quote(column)),
            Self::Aggregate(func) => write!(f, ".{}()", func.name()),
            Self::Size => write!(f, ".size()"),
            Self::ValueCounts => write!(f, ".value_counts()"),
            Self::Unique => write!(f, ".unique()"),
            Self::NLargest { n, column } => match column {
                Some(column) => write!(f, ".nlargest({n}, {})", quote(column)),
                None => write!(f, ".nlargest({n})"),
            },
            Self::NSmallest { n, column } => match column {
                Some(column) => write!(f, ".nsmallest({n}, {})", quote(column)),
                None => write!(f, ".nsmallest({n})"),
            },
            Self::DropDuplicates => write!(f, ".drop_duplicates()"),
            Self::ShapeRows => write!(f, ".shape[0]"),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len_of {
            write!(f, "len(")?;
        }
        write!(f, "df")?;
        for step in &self.steps {
            write!(f, "{step}")?;
        }
        if self.len_of {
            write!(f, ")")?;
        }
        Ok(())
    }
}
