//! The frame expression language.
//!
//! Fragments for tabular sessions are small pandas-style expressions over the
//! bound table, named `df`:
//!
//! ```text
//! len(df[df['age'] > 30])
//! df.groupby('city')['salary'].mean()
//! df.sort_values(by='age', ascending=False).head(3)[['name', 'age']]
//! ```
//!
//! - `parser`: nom grammar producing a [`Program`]
//! - `check`: static pass resolving columns and step types
//! - `eval`: budgeted evaluator producing a [`ResultSet`](crate::table::ResultSet)

mod ast;
mod check;
mod eval;
mod parser;

pub use ast::{AggFunc, CmpOp, Literal, Predicate, Program, Step};
pub use check::{CheckError, Shape, check_program};
pub use eval::{Budget, EvalError, evaluate};
pub use parser::{FrameSyntaxError, MAX_PREDICATE_DEPTH, parse_program};
