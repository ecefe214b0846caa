use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Field not filterable: {0}")]
    InvalidField(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Invalid operator data: {0}")]
    InvalidOperatorData(String),

    #[error("Invalid WHERE clause: {0}")]
    InvalidWhereClause(String),

    #[error("WHERE nesting depth exceeds maximum of {0}")]
    NestingTooDeep(u32),
}
