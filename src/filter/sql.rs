use serde_json::Value;

use super::types::{CompareOp, Field, Predicate, QueryPlan, SystemField};

/// Bind value for a rendered statement. System columns are bound as text
/// and cast in SQL; payload operands are bound as JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Json(Value),
}

impl SqlParam {
    pub fn to_json(&self) -> Value {
        match self {
            SqlParam::Text(s) => Value::String(s.clone()),
            SqlParam::Json(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<SqlParam>,
}

/// Renders a [`QueryPlan`] against the `resources` table for one resource kind
pub struct PlanSql<'a> {
    kind: &'a str,
    plan: &'a QueryPlan,
    params: Vec<SqlParam>,
}

impl<'a> PlanSql<'a> {
    pub fn new(kind: &'a str, plan: &'a QueryPlan) -> Self {
        Self { kind, plan, params: Vec::new() }
    }

    pub fn select(mut self) -> SqlResult {
        let where_clause = self.where_clause();
        let order_clause = self.order_clause();
        let query = format!(
            "SELECT * FROM \"resources\" WHERE {} ORDER BY {} LIMIT {} OFFSET {}",
            where_clause, order_clause, self.plan.limit, self.plan.offset
        );
        SqlResult { query, params: self.params }
    }

    pub fn count(mut self) -> SqlResult {
        let where_clause = self.where_clause();
        let query = format!("SELECT COUNT(*) as count FROM \"resources\" WHERE {}", where_clause);
        SqlResult { query, params: self.params }
    }

    fn push(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    fn where_clause(&mut self) -> String {
        let plan = self.plan;
        let kind = self.kind.to_string();
        let kind = self.push(SqlParam::Text(kind));
        let mut clauses = vec![format!("\"kind\" = {}", kind)];

        if let Some(scope) = plan.scope {
            let tenant = self.push(SqlParam::Text(scope.tenant_id.to_string()));
            clauses.push(format!("\"tenant_id\" = {}::uuid", tenant));
            if let Some(owner_id) = scope.owner_id {
                let owner = self.push(SqlParam::Text(owner_id.to_string()));
                clauses.push(format!("\"owner_id\" = {}::uuid", owner));
            }
        }
        if !plan.include_deleted {
            clauses.push("\"deleted_at\" IS NULL".to_string());
        }
        if let Some(predicate) = &plan.predicate {
            let rendered = self.predicate(predicate);
            clauses.push(rendered);
        }
        clauses.join(" AND ")
    }

    fn order_clause(&mut self) -> String {
        let plan = self.plan;
        plan.order_by
            .iter()
            .map(|o| format!("{} {} NULLS LAST", self.field_expr(&o.field), o.direction.to_sql()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn predicate(&mut self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::Compare { field, op, value } => self.compare(field, *op, value),
            Predicate::In { field, values, negated } => {
                if values.is_empty() {
                    return if *negated { "1=1".to_string() } else { "1=0".to_string() };
                }
                let lhs = self.field_expr(field);
                let placeholders: Vec<String> = values.iter().map(|v| self.operand(field, v)).collect();
                let keyword = if *negated { "NOT IN" } else { "IN" };
                format!("{} {} ({})", lhs, keyword, placeholders.join(", "))
            }
            Predicate::IsNull { field, negated } => match field {
                Field::System(system) => {
                    let keyword = if *negated { "IS NOT NULL" } else { "IS NULL" };
                    format!("\"{}\" {}", system.column(), keyword)
                }
                Field::Payload(_) => {
                    let lhs = self.field_expr(field);
                    let op = if *negated { "<>" } else { "=" };
                    format!("COALESCE({}, 'null'::jsonb) {} 'null'::jsonb", lhs, op)
                }
            },
            Predicate::And(parts) => self.group(parts, " AND "),
            Predicate::Or(parts) => self.group(parts, " OR "),
            Predicate::Not(inner) => format!("NOT ({})", self.predicate(inner)),
        }
    }

    fn group(&mut self, parts: &[Predicate], joiner: &str) -> String {
        let rendered: Vec<String> = parts.iter().map(|p| self.predicate(p)).collect();
        format!("({})", rendered.join(joiner))
    }

    fn compare(&mut self, field: &Field, op: CompareOp, value: &Value) -> String {
        if matches!(op, CompareOp::Like | CompareOp::ILike) {
            let lhs = match field {
                Field::System(system) => format!("\"{}\"::text", system.column()),
                Field::Payload(name) => {
                    let key = self.push(SqlParam::Text(name.clone()));
                    format!("(\"payload\" ->> {})", key)
                }
            };
            let pattern = self.push(SqlParam::Text(value.as_str().unwrap_or_default().to_string()));
            return format!("{} {} {}", lhs, op.to_sql(), pattern);
        }
        let lhs = self.field_expr(field);
        let rhs = self.operand(field, value);
        format!("{} {} {}", lhs, op.to_sql(), rhs)
    }

    fn field_expr(&mut self, field: &Field) -> String {
        match field {
            Field::System(system) => format!("\"{}\"", system.column()),
            Field::Payload(name) => {
                let key = self.push(SqlParam::Text(name.clone()));
                format!("(\"payload\" -> {})", key)
            }
        }
    }

    fn operand(&mut self, field: &Field, value: &Value) -> String {
        match field {
            Field::System(system) => {
                let text = value.as_str().unwrap_or_default().to_string();
                let placeholder = self.push(SqlParam::Text(text));
                match system {
                    SystemField::Id | SystemField::OwnerId => format!("{}::uuid", placeholder),
                    _ => format!("{}::timestamptz", placeholder),
                }
            }
            Field::Payload(_) => {
                let placeholder = self.push(SqlParam::Json(value.clone()));
                format!("{}::jsonb", placeholder)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::filter::QueryCompiler;
    use crate::filter::types::QuerySpec;
    use serde_json::json;
    use uuid::Uuid;

    fn fields() -> Vec<String> {
        ["code", "status", "priority", "created_at", "id"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn renders_scope_and_soft_delete_filter() {
        let tenant = Uuid::new_v4();
        let plan = QueryCompiler::default()
            .compile(&QuerySpec::default(), &fields(), &fields())
            .unwrap()
            .restrict(tenant, None, false);
        let sql = PlanSql::new("ticket", &plan).select();
        assert_eq!(
            sql.query,
            "SELECT * FROM \"resources\" WHERE \"kind\" = $1 AND \"tenant_id\" = $2::uuid AND \"deleted_at\" IS NULL \
             ORDER BY \"created_at\" DESC NULLS LAST, \"id\" ASC NULLS LAST LIMIT 20 OFFSET 0"
        );
        assert_eq!(sql.params, vec![SqlParam::Text("ticket".into()), SqlParam::Text(tenant.to_string())]);
    }

    #[test]
    fn renders_payload_comparisons_as_jsonb() {
        let spec = QuerySpec::default()
            .filter("status", "in", json!(["open", "held"]))
            .filter("priority", "between", json!([1, 3]))
            .filter("code", "like", "AB%");
        let plan = QueryCompiler::default().compile(&spec, &fields(), &fields()).unwrap();
        let sql = PlanSql::new("ticket", &plan).count();
        assert_eq!(
            sql.query,
            "SELECT COUNT(*) as count FROM \"resources\" WHERE \"kind\" = $1 AND \"deleted_at\" IS NULL AND \
             ((\"payload\" -> $2) IN ($3::jsonb, $4::jsonb) AND (\"payload\" -> $5) >= $6::jsonb AND \
             (\"payload\" -> $7) <= $8::jsonb AND (\"payload\" ->> $9) LIKE $10)"
        );
        assert_eq!(sql.params.len(), 10);
        assert_eq!(sql.params[2], SqlParam::Json(json!("open")));
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let spec = QuerySpec::default().filter("status", "in", json!([])).filter("code", "nin", json!([]));
        let plan = QueryCompiler::default().compile(&spec, &fields(), &fields()).unwrap();
        let sql = PlanSql::new("ticket", &plan).count();
        assert!(sql.query.ends_with("(1=0 AND 1=1)"));
    }

    #[test]
    fn system_fields_cast_their_operands() {
        let id = Uuid::new_v4();
        let spec = QuerySpec::default().filter("id", "eq", id.to_string()).filter("created_at", "null", false);
        let plan = QueryCompiler::default().compile(&spec, &fields(), &fields()).unwrap();
        let sql = PlanSql::new("ticket", &plan).count();
        assert!(sql.query.contains("\"id\" = $2::uuid"));
        assert!(sql.query.contains("\"created_at\" IS NOT NULL"));
    }
}
