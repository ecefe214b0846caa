use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::error::FilterError;
use super::types::{CompareOp, Field, FilterCondition, FilterOp, Predicate, SystemField};

/// Turns caller conditions (flat triples or a `$`-operator JSON document)
/// into a validated [`Predicate`] tree, checking every field against the
/// declared allow-list.
pub struct FilterWhere<'a> {
    allowed_fields: &'a [String],
    max_depth: u32,
}

impl<'a> FilterWhere<'a> {
    pub fn new(allowed_fields: &'a [String], max_depth: u32) -> Self {
        Self { allowed_fields, max_depth }
    }

    /// Flat condition list. `from`/`to` bounds on the same field are folded
    /// into a single AND-ed range node.
    pub fn from_conditions(&self, conditions: &[FilterCondition]) -> Result<Vec<Predicate>, FilterError> {
        let mut out = Vec::new();
        let mut ranges: Vec<(Field, Option<Value>, Option<Value>)> = Vec::new();

        for condition in conditions {
            let field = self.check_field(&condition.field)?;
            let op = FilterOp::parse(&condition.op)
                .ok_or_else(|| FilterError::UnsupportedOperator(condition.op.clone()))?;

            match op {
                FilterOp::From | FilterOp::To => {
                    let value = Self::bound(&field, &condition.value)?;
                    let idx = match ranges.iter().position(|(f, _, _)| *f == field) {
                        Some(idx) => idx,
                        None => {
                            ranges.push((field.clone(), None, None));
                            ranges.len() - 1
                        }
                    };
                    if op == FilterOp::From { ranges[idx].1 = Some(value) } else { ranges[idx].2 = Some(value) }
                }
                _ => out.push(self.condition(&field, op, &condition.value)?),
            }
        }

        for (field, lower, upper) in ranges {
            out.push(Self::range(field, lower, upper));
        }
        Ok(out)
    }

    /// `$`-operator document: `{ "status": "open", "due": { "$from": .., "$to": .. }, "$or": [..] }`
    pub fn from_json(&self, where_data: &Value) -> Result<Vec<Predicate>, FilterError> {
        match where_data {
            Value::Null => Ok(vec![]),
            Value::Object(obj) => self.parse_object(obj, 0),
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    fn parse_object(&self, obj: &Map<String, Value>, depth: u32) -> Result<Vec<Predicate>, FilterError> {
        if depth > self.max_depth {
            return Err(FilterError::NestingTooDeep(self.max_depth));
        }
        let mut out = Vec::new();
        for (key, value) in obj {
            if key.starts_with('$') {
                out.push(self.parse_logical_operator(key, value, depth)?);
            } else {
                out.extend(self.parse_field_condition(key, value)?);
            }
        }
        Ok(out)
    }

    fn parse_logical_operator(&self, op: &str, value: &Value, depth: u32) -> Result<Predicate, FilterError> {
        match op {
            "$and" | "$or" => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op)))?;
                let mut parts = Vec::with_capacity(arr.len());
                for v in arr {
                    let obj = v
                        .as_object()
                        .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} members must be objects", op)))?;
                    if let Some(p) = Predicate::all(self.parse_object(obj, depth + 1)?) {
                        parts.push(p);
                    }
                }
                if parts.is_empty() {
                    return Err(FilterError::InvalidOperatorData(format!("{} requires at least one condition", op)));
                }
                Ok(if op == "$and" { Predicate::And(parts) } else { Predicate::Or(parts) })
            }
            "$not" => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| FilterError::InvalidOperatorData("$not requires object".to_string()))?;
                let inner = Predicate::all(self.parse_object(obj, depth + 1)?)
                    .ok_or_else(|| FilterError::InvalidOperatorData("$not requires a condition".to_string()))?;
                Ok(Predicate::Not(Box::new(inner)))
            }
            _ => Err(FilterError::UnsupportedOperator(op.to_string())),
        }
    }

    fn parse_field_condition(&self, name: &str, value: &Value) -> Result<Vec<Predicate>, FilterError> {
        let field = self.check_field(name)?;

        let ops = match value {
            Value::Object(obj) if obj.keys().all(|k| k.starts_with('$')) && !obj.is_empty() => obj,
            // Implicit equality: { field: value }
            _ => return Ok(vec![self.condition(&field, FilterOp::Eq, value)?]),
        };

        let mut out = Vec::new();
        let (mut lower, mut upper) = (None, None);
        for (op_key, op_val) in ops {
            let op = FilterOp::parse(op_key).ok_or_else(|| FilterError::UnsupportedOperator(op_key.clone()))?;
            match op {
                FilterOp::From => lower = Some(Self::bound(&field, op_val)?),
                FilterOp::To => upper = Some(Self::bound(&field, op_val)?),
                _ => out.push(self.condition(&field, op, op_val)?),
            }
        }
        if lower.is_some() || upper.is_some() {
            out.push(Self::range(field, lower, upper));
        }
        Ok(out)
    }

    fn condition(&self, field: &Field, op: FilterOp, data: &Value) -> Result<Predicate, FilterError> {
        let compare = |op: CompareOp| -> Result<Predicate, FilterError> {
            if data.is_null() {
                return Err(FilterError::InvalidOperatorData(format!(
                    "{} requires a non-null value for '{}'",
                    op.to_sql(),
                    field.name()
                )));
            }
            Ok(Predicate::Compare { field: field.clone(), op, value: Self::check_operand(field, data)? })
        };

        match op {
            FilterOp::Eq if data.is_null() => Ok(Predicate::IsNull { field: field.clone(), negated: false }),
            FilterOp::Ne if data.is_null() => Ok(Predicate::IsNull { field: field.clone(), negated: true }),
            FilterOp::Eq => compare(CompareOp::Eq),
            FilterOp::Ne => compare(CompareOp::Ne),
            FilterOp::Gt => compare(CompareOp::Gt),
            FilterOp::Gte | FilterOp::From => compare(CompareOp::Gte),
            FilterOp::Lt => compare(CompareOp::Lt),
            FilterOp::Lte | FilterOp::To => compare(CompareOp::Lte),
            FilterOp::Like | FilterOp::ILike => {
                if !data.is_string() {
                    return Err(FilterError::InvalidOperatorData("LIKE pattern must be a string".to_string()));
                }
                if matches!(field, Field::System(s) if s.is_timestamp()) {
                    return Err(FilterError::InvalidOperatorData(format!(
                        "LIKE is not supported on timestamp field '{}'",
                        field.name()
                    )));
                }
                let op = if op == FilterOp::Like { CompareOp::Like } else { CompareOp::ILike };
                Ok(Predicate::Compare { field: field.clone(), op, value: data.clone() })
            }
            FilterOp::In | FilterOp::NIn => {
                let values = match data {
                    Value::Array(values) => values
                        .iter()
                        .map(|v| Self::check_operand(field, v))
                        .collect::<Result<Vec<_>, _>>()?,
                    other => vec![Self::check_operand(field, other)?],
                };
                Ok(Predicate::In { field: field.clone(), values, negated: op == FilterOp::NIn })
            }
            FilterOp::Between => match data {
                Value::Array(values) if values.len() == 2 => Ok(Self::range(
                    field.clone(),
                    Some(Self::bound(field, &values[0])?),
                    Some(Self::bound(field, &values[1])?),
                )),
                _ => Err(FilterError::InvalidOperatorData("between requires array with 2 values".to_string())),
            },
            FilterOp::Null => {
                let is_null = data
                    .as_bool()
                    .ok_or_else(|| FilterError::InvalidOperatorData("null requires true or false".to_string()))?;
                Ok(Predicate::IsNull { field: field.clone(), negated: !is_null })
            }
        }
    }

    fn range(field: Field, lower: Option<Value>, upper: Option<Value>) -> Predicate {
        let mut terms = Vec::with_capacity(2);
        if let Some(v) = lower {
            terms.push(Predicate::Compare { field: field.clone(), op: CompareOp::Gte, value: v });
        }
        if let Some(v) = upper {
            terms.push(Predicate::Compare { field, op: CompareOp::Lte, value: v });
        }
        match terms.len() {
            1 => terms.remove(0),
            _ => Predicate::And(terms),
        }
    }

    fn bound(field: &Field, value: &Value) -> Result<Value, FilterError> {
        if value.is_null() {
            return Err(FilterError::InvalidOperatorData(format!("range bound for '{}' must not be null", field.name())));
        }
        Self::check_operand(field, value)
    }

    fn check_field(&self, name: &str) -> Result<Field, FilterError> {
        if !self.allowed_fields.iter().any(|f| f == name) {
            return Err(FilterError::InvalidField(name.to_string()));
        }
        Ok(Field::resolve(name))
    }

    /// Operand must be a scalar; system columns additionally must parse as
    /// their column type. Returns the normalized value.
    fn check_operand(field: &Field, value: &Value) -> Result<Value, FilterError> {
        if value.is_array() || value.is_object() {
            return Err(FilterError::InvalidOperatorData(format!(
                "value for '{}' must be a scalar",
                field.name()
            )));
        }
        let system = match field {
            Field::Payload(_) => return Ok(value.clone()),
            Field::System(system) => *system,
        };
        let text = value.as_str().ok_or_else(|| {
            FilterError::InvalidOperatorData(format!("value for '{}' must be a string", system.column()))
        })?;
        match system {
            SystemField::Id | SystemField::OwnerId => Uuid::parse_str(text)
                .map(|id| Value::String(id.to_string()))
                .map_err(|_| FilterError::InvalidOperatorData(format!("invalid uuid for '{}': {}", system.column(), text))),
            _ => DateTime::parse_from_rfc3339(text)
                .map(|ts| Value::String(ts.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Micros, true)))
                .map_err(|_| {
                    FilterError::InvalidOperatorData(format!("invalid timestamp for '{}': {}", system.column(), text))
                }),
        }
    }
}
