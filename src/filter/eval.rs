use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::types::{CompareOp, Field, OrderBy, Predicate, SortDirection};

/// Value of one field on a stored row, as seen by a predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Cell<'a> {
    Uuid(Uuid),
    Time(DateTime<Utc>),
    Json(&'a Value),
    Missing,
}

/// Anything a [`Predicate`] can be evaluated against
pub trait Row {
    fn cell(&self, field: &Field) -> Cell<'_>;
}

impl Predicate {
    /// In-memory evaluation with SQL semantics: a missing payload key or a
    /// NULL column makes a comparison unknown, and unknown never matches.
    pub fn matches<R: Row + ?Sized>(&self, row: &R) -> bool {
        self.eval(row) == Some(true)
    }

    fn eval<R: Row + ?Sized>(&self, row: &R) -> Option<bool> {
        match self {
            Predicate::Compare { field, op, value } => {
                let cell = row.cell(field);
                match op {
                    CompareOp::Like | CompareOp::ILike => {
                        let text = cell_text(&cell)?;
                        let pattern = value.as_str()?;
                        Some(if *op == CompareOp::ILike {
                            like(&text.to_lowercase(), &pattern.to_lowercase())
                        } else {
                            like(&text, pattern)
                        })
                    }
                    _ => {
                        let ord = compare_operand(&cell, value)?;
                        Some(match op {
                            CompareOp::Eq => ord == Ordering::Equal,
                            CompareOp::Ne => ord != Ordering::Equal,
                            CompareOp::Gt => ord == Ordering::Greater,
                            CompareOp::Gte => ord != Ordering::Less,
                            CompareOp::Lt => ord == Ordering::Less,
                            CompareOp::Lte => ord != Ordering::Greater,
                            CompareOp::Like | CompareOp::ILike => false,
                        })
                    }
                }
            }
            Predicate::In { field, values, negated } => {
                if values.is_empty() {
                    return Some(*negated);
                }
                let cell = row.cell(field);
                let mut unknown = false;
                for v in values {
                    match compare_operand(&cell, v) {
                        Some(Ordering::Equal) => return Some(!negated),
                        Some(_) => {}
                        None => unknown = true,
                    }
                }
                if unknown { None } else { Some(*negated) }
            }
            Predicate::IsNull { field, negated } => {
                let is_null = matches!(row.cell(field), Cell::Missing | Cell::Json(Value::Null));
                Some(is_null != *negated)
            }
            Predicate::And(parts) => {
                let mut result = Some(true);
                for part in parts {
                    match part.eval(row) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Predicate::Or(parts) => {
                let mut result = Some(false);
                for part in parts {
                    match part.eval(row) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
            Predicate::Not(inner) => inner.eval(row).map(|b| !b),
        }
    }
}

/// Row ordering for an `ORDER BY` list; missing values sort last in both directions
pub fn compare_rows<R: Row + ?Sized>(a: &R, b: &R, order_by: &[OrderBy]) -> Ordering {
    for order in order_by {
        let ord = match (a.cell(&order.field), b.cell(&order.field)) {
            (Cell::Missing, Cell::Missing) => Ordering::Equal,
            (Cell::Missing, _) => Ordering::Greater,
            (_, Cell::Missing) => Ordering::Less,
            (left, right) => {
                let ord = compare_cells(&left, &right);
                match order.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_cells(left: &Cell, right: &Cell) -> Ordering {
    match (left, right) {
        (Cell::Uuid(a), Cell::Uuid(b)) => a.cmp(b),
        (Cell::Time(a), Cell::Time(b)) => a.cmp(b),
        (Cell::Json(a), Cell::Json(b)) => compare_json(a, b).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

fn compare_operand(cell: &Cell, operand: &Value) -> Option<Ordering> {
    match cell {
        Cell::Missing => None,
        Cell::Uuid(id) => Uuid::parse_str(operand.as_str()?).ok().map(|other| id.cmp(&other)),
        Cell::Time(ts) => DateTime::parse_from_rfc3339(operand.as_str()?)
            .ok()
            .map(|other| ts.cmp(&other.with_timezone(&Utc))),
        Cell::Json(value) => compare_json(value, operand),
    }
}

/// jsonb ordering: Object > Array > Boolean > Number > String > Null
fn json_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_json(left: &Value, right: &Value) -> Option<Ordering> {
    let rank = json_rank(left).cmp(&json_rank(right));
    if rank != Ordering::Equal {
        return Some(rank);
    }
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

/// Text form used by LIKE, matching `->>` for payload keys and `::text` for columns
fn cell_text(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Missing | Cell::Json(Value::Null) => None,
        Cell::Uuid(id) => Some(id.to_string()),
        Cell::Time(_) => None,
        Cell::Json(Value::String(s)) => Some(s.clone()),
        Cell::Json(other) => Some(other.to_string()),
    }
}

/// SQL LIKE: `%` any run, `_` any single char, `\` escapes
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_at(&text, &pattern)
}

fn like_at(text: &[char], pattern: &[char]) -> bool {
    match pattern.first().copied() {
        None => text.is_empty(),
        Some('%') => {
            let rest = &pattern[1..];
            (0..=text.len()).any(|skip| like_at(&text[skip..], rest))
        }
        Some('_') => !text.is_empty() && like_at(&text[1..], &pattern[1..]),
        Some('\\') if pattern.len() > 1 => {
            text.first() == Some(&pattern[1]) && like_at(&text[1..], &pattern[2..])
        }
        Some(c) => text.first() == Some(&c) && like_at(&text[1..], &pattern[1..]),
    }
}
