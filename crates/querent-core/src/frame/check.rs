//! Static pass over a parsed frame expression.
//!
//! Resolves every column against the bound table and walks the step sequence
//! with an abstract shape, so ill-typed pipelines are refused before they run.

use super::ast::{AggFunc, Literal, Predicate, Program, Step};
use crate::schema::{ColumnType, TableSchema};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("{step} cannot be applied to {shape}")]
    InvalidStep { step: String, shape: &'static str },

    #[error("column '{column}' is not numeric")]
    NotNumeric { column: String },

    #[error("cannot compare column '{column}' with {literal}")]
    IncompatibleLiteral { column: String, literal: String },
}

/// Abstract result shape after each step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Frame(Vec<(String, ColumnType)>),
    Series(String, ColumnType),
    Grouped {
        key: (String, ColumnType),
        /// Columns available for selection after grouping.
        source: Vec<(String, ColumnType)>,
        column: Option<(String, ColumnType)>,
    },
    Scalar,
}

impl Shape {
    fn label(&self) -> &'static str {
        match self {
            Self::Frame(_) => "a frame",
            Self::Series(..) => "a column",
            Self::Grouped { .. } => "a grouping",
            Self::Scalar => "a single value",
        }
    }
}

fn lookup(columns: &[(String, ColumnType)], name: &str) -> Result<(String, ColumnType), CheckError> {
    columns
        .iter()
        .find(|(column, _)| column.eq_ignore_ascii_case(name))
        .cloned()
        .ok_or_else(|| CheckError::UnknownColumn(name.to_string()))
}

fn numeric_or_unknown(column_type: ColumnType) -> bool {
    column_type.is_numeric() || matches!(column_type, ColumnType::Boolean | ColumnType::Unknown)
}

fn check_literal(column: &str, column_type: ColumnType, literal: &Literal) -> Result<(), CheckError> {
    let compatible = match literal {
        Literal::None => true,
        Literal::Int(_) | Literal::Float(_) => numeric_or_unknown(column_type),
        Literal::Str(_) => matches!(column_type, ColumnType::Text | ColumnType::Unknown),
        Literal::Bool(_) => matches!(column_type, ColumnType::Boolean | ColumnType::Unknown),
    };
    if compatible {
        Ok(())
    } else {
        Err(CheckError::IncompatibleLiteral {
            column: column.to_string(),
            literal: literal.to_string(),
        })
    }
}

fn check_predicate(predicate: &Predicate, columns: &[(String, ColumnType)]) -> Result<(), CheckError> {
    match predicate {
        Predicate::Compare { column, value, .. } => {
            let (name, column_type) = lookup(columns, column)?;
            check_literal(&name, column_type, value)
        }
        Predicate::IsIn { column, values } => {
            let (name, column_type) = lookup(columns, column)?;
            values
                .iter()
                .try_for_each(|value| check_literal(&name, column_type, value))
        }
        Predicate::Contains { column, needle } => {
            let (name, column_type) = lookup(columns, column)?;
            check_literal(&name, column_type, &Literal::Str(needle.clone()))
        }
        Predicate::IsNa(column) | Predicate::NotNa(column) => lookup(columns, column).map(|_| ()),
        Predicate::Not(inner) => check_predicate(inner, columns),
        Predicate::And(left, right) | Predicate::Or(left, right) => {
            check_predicate(left, columns)?;
            check_predicate(right, columns)
        }
    }
}

fn aggregate_type(func: AggFunc, column_type: ColumnType) -> ColumnType {
    match func {
        AggFunc::Count | AggFunc::NUnique => ColumnType::Integer,
        AggFunc::Mean | AggFunc::Median => ColumnType::Real,
        AggFunc::Sum | AggFunc::Min | AggFunc::Max => column_type,
    }
}

/// Checks `program` against the bound table and returns its final shape.
///
/// # Errors
///
/// Returns the first unknown column or ill-typed step.
pub fn check_program(program: &Program, table: &TableSchema) -> Result<Shape, CheckError> {
    let mut shape = Shape::Frame(
        table
            .columns
            .iter()
            .map(|column| (column.name.clone(), column.column_type))
            .collect(),
    );

    for step in &program.steps {
        shape = apply(step, shape)?;
    }

    if program.len_of {
        if matches!(shape, Shape::Scalar | Shape::Grouped { .. }) {
            return Err(CheckError::InvalidStep {
                step: "len()".to_string(),
                shape: shape.label(),
            });
        }
        shape = Shape::Scalar;
    }

    if let Shape::Grouped { .. } = shape {
        return Err(CheckError::InvalidStep {
            step: "a grouping without an aggregate".to_string(),
            shape: shape.label(),
        });
    }

    Ok(shape)
}

fn apply(step: &Step, shape: Shape) -> Result<Shape, CheckError> {
    let invalid = |shape: &Shape| CheckError::InvalidStep {
        step: step.to_string(),
        shape: shape.label(),
    };

    match (step, shape) {
        (Step::Column(name), Shape::Frame(columns)) => {
            let (name, column_type) = lookup(&columns, name)?;
            Ok(Shape::Series(name, column_type))
        }
        (Step::Project(names), Shape::Frame(columns)) => names
            .iter()
            .map(|name| lookup(&columns, name))
            .collect::<Result<Vec<_>, _>>()
            .map(Shape::Frame),
        (Step::Filter(predicate), Shape::Frame(columns)) => {
            check_predicate(predicate, &columns)?;
            Ok(Shape::Frame(columns))
        }
        (Step::Head(_) | Step::Tail(_) | Step::DropDuplicates, shape @ (Shape::Frame(_) | Shape::Series(..))) => {
            Ok(shape)
        }
        (Step::SortValues { by: Some(by), .. }, Shape::Frame(columns)) => {
            lookup(&columns, by)?;
            Ok(Shape::Frame(columns))
        }
        (Step::SortValues { by: None, .. }, shape @ Shape::Series(..)) => Ok(shape),
        (Step::NLargest { column: Some(by), .. } | Step::NSmallest { column: Some(by), .. }, Shape::Frame(columns)) => {
            lookup(&columns, by)?;
            Ok(Shape::Frame(columns))
        }
        (Step::NLargest { column: None, .. } | Step::NSmallest { column: None, .. }, shape @ Shape::Series(..)) => {
            Ok(shape)
        }
        (Step::GroupBy(key), Shape::Frame(columns)) => Ok(Shape::Grouped {
            key: lookup(&columns, key)?,
            source: columns,
            column: None,
        }),
        (Step::Column(name), Shape::Grouped { key, source, column: None }) => {
            let column = lookup(&source, name)?;
            Ok(Shape::Grouped {
                key,
                source,
                column: Some(column),
            })
        }
        (Step::Aggregate(func), Shape::Series(name, column_type)) => {
            if func.requires_numeric() && !numeric_or_unknown(column_type) {
                return Err(CheckError::NotNumeric { column: name });
            }
            Ok(Shape::Scalar)
        }
        (Step::Aggregate(func), Shape::Grouped { key, column: Some((name, column_type)), .. }) => {
            if func.requires_numeric() && !numeric_or_unknown(column_type) {
                return Err(CheckError::NotNumeric { column: name });
            }
            Ok(Shape::Frame(vec![key, (name, aggregate_type(*func, column_type))]))
        }
        (Step::Size, Shape::Grouped { key, .. }) => {
            Ok(Shape::Frame(vec![key, ("size".to_string(), ColumnType::Integer)]))
        }
        (Step::ValueCounts, Shape::Series(name, column_type)) => Ok(Shape::Frame(vec![
            (name, column_type),
            ("count".to_string(), ColumnType::Integer),
        ])),
        (Step::Unique, shape @ Shape::Series(..)) => Ok(shape),
        (Step::ShapeRows, Shape::Frame(_) | Shape::Series(..)) => Ok(Shape::Scalar),
        (_, shape) => Err(invalid(&shape)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::parse_program;
    use crate::schema::ColumnSchema;

    fn people() -> TableSchema {
        TableSchema::new(
            "people",
            vec![
                ColumnSchema::new("name", ColumnType::Text),
                ColumnSchema::new("age", ColumnType::Integer),
                ColumnSchema::new("city", ColumnType::Text),
            ],
        )
    }

    fn check(source: &str) -> Result<Shape, CheckError> {
        check_program(&parse_program(source).unwrap(), &people())
    }

    #[test]
    fn test_len_is_scalar() {
        assert_eq!(check("len(df[df['age'] > 30])").unwrap(), Shape::Scalar);
    }

    #[test]
    fn test_unknown_column_is_reported() {
        assert_eq!(
            check("df['salary'].sum()").unwrap_err(),
            CheckError::UnknownColumn("salary".into())
        );
        assert!(matches!(
            check("df[df['password'] == 'x']").unwrap_err(),
            CheckError::UnknownColumn(_)
        ));
    }

    #[test]
    fn test_groupby_requires_aggregate() {
        let shape = check("df.groupby('city')['age'].mean()").unwrap();
        assert_eq!(
            shape,
            Shape::Frame(vec![
                ("city".into(), ColumnType::Text),
                ("age".into(), ColumnType::Real),
            ])
        );
        assert!(check("df.groupby('city')").is_err());
        assert!(check("df.groupby('city').mean()").is_err());
    }

    #[test]
    fn test_numeric_aggregates_reject_text() {
        assert_eq!(
            check("df['name'].mean()").unwrap_err(),
            CheckError::NotNumeric {
                column: "name".into()
            }
        );
        assert!(check("df['name'].max()").is_ok());
    }

    #[test]
    fn test_scalar_accepts_no_further_steps() {
        assert!(matches!(
            check("df['age'].sum().head()").unwrap_err(),
            CheckError::InvalidStep { .. }
        ));
    }

    #[test]
    fn test_literal_types_must_match_column() {
        assert!(matches!(
            check("df[df['age'] == 'old']").unwrap_err(),
            CheckError::IncompatibleLiteral { .. }
        ));
    }
}
