pub mod types;
pub mod filter;
pub mod filter_where;
pub mod filter_order;
pub mod error;
pub mod eval;
pub mod sql;

pub use error::FilterError;
pub use eval::{compare_rows, Cell, Row};
pub use filter::QueryCompiler;
pub use sql::{PlanSql, SqlParam, SqlResult};
pub use types::*;
