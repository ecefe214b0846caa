use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Caller-facing filter operators. Unknown names are rejected at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    #[serde(rename = "ilike")]
    ILike,
    In,
    #[serde(rename = "nin")]
    NIn,
    Between,
    From,
    To,
    Null,
}

impl FilterOp {
    /// Accepts both the bare (`gte`) and the `$`-prefixed (`$gte`) spelling
    pub fn parse(op: &str) -> Option<Self> {
        let op = op.strip_prefix('$').unwrap_or(op);
        Some(match op {
            "eq" => FilterOp::Eq,
            "ne" | "neq" => FilterOp::Ne,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "like" => FilterOp::Like,
            "ilike" => FilterOp::ILike,
            "in" => FilterOp::In,
            "nin" => FilterOp::NIn,
            "between" => FilterOp::Between,
            "from" => FilterOp::From,
            "to" => FilterOp::To,
            "null" => FilterOp::Null,
            _ => return None,
        })
    }
}

/// One `(field, operator, value)` triple as supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub field: String,
    #[serde(alias = "operator")]
    pub op: String,
    #[serde(default)]
    pub value: Value,
}

impl FilterCondition {
    pub fn new(field: impl Into<String>, op: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { field: field.into(), op: op.into(), value: value.into() }
    }
}

/// Sort request: either `"created_at desc"` or `{ "field": "created_at", "direction": "desc" }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortSpec {
    Text(String),
    Field {
        field: String,
        #[serde(default)]
        direction: Option<String>,
    },
}

/// Unvalidated list request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySpec {
    pub filters: Vec<FilterCondition>,
    #[serde(rename = "where")]
    pub where_clause: Option<Value>,
    pub sort: Option<SortSpec>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub include_deleted: bool,
}

impl QuerySpec {
    pub fn filter(mut self, field: impl Into<String>, op: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FilterCondition::new(field, op, value));
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some(SortSpec::Field {
            field: field.into(),
            direction: Some(direction.to_sql().to_ascii_lowercase()),
        });
        self
    }

    pub fn page(mut self, page: i64, page_size: i64) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }

    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }
}

/// Columns every resource row carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemField {
    Id,
    OwnerId,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

impl SystemField {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "id" => SystemField::Id,
            "owner_id" => SystemField::OwnerId,
            "created_at" => SystemField::CreatedAt,
            "updated_at" => SystemField::UpdatedAt,
            "deleted_at" => SystemField::DeletedAt,
            _ => return None,
        })
    }

    pub fn column(&self) -> &'static str {
        match self {
            SystemField::Id => "id",
            SystemField::OwnerId => "owner_id",
            SystemField::CreatedAt => "created_at",
            SystemField::UpdatedAt => "updated_at",
            SystemField::DeletedAt => "deleted_at",
        }
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(self, SystemField::CreatedAt | SystemField::UpdatedAt | SystemField::DeletedAt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    System(SystemField),
    Payload(String),
}

impl Field {
    pub fn resolve(name: &str) -> Self {
        match SystemField::parse(name) {
            Some(system) => Field::System(system),
            None => Field::Payload(name.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Field::System(s) => s.column(),
            Field::Payload(p) => p,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
}

impl CompareOp {
    pub fn to_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Like => "LIKE",
            CompareOp::ILike => "ILIKE",
        }
    }
}

/// Validated predicate tree. Operand values for system fields are already
/// checked to parse as their column type.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare { field: Field, op: CompareOp, value: Value },
    In { field: Field, values: Vec<Value>, negated: bool },
    IsNull { field: Field, negated: bool },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// AND-combine, flattening nested ANDs and skipping the wrapper for a single term
    pub fn all(mut terms: Vec<Predicate>) -> Option<Predicate> {
        match terms.len() {
            0 => None,
            1 => terms.pop(),
            _ => {
                let mut flat = Vec::with_capacity(terms.len());
                for term in terms {
                    match term {
                        Predicate::And(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                Some(Predicate::And(flat))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("asc") {
            Some(SortDirection::Asc)
        } else if s.eq_ignore_ascii_case("desc") {
            Some(SortDirection::Desc)
        } else {
            None
        }
    }

    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: Field,
    pub direction: SortDirection,
}

/// Tenant/owner restriction applied to a plan after compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanScope {
    pub tenant_id: Uuid,
    pub owner_id: Option<Uuid>,
}

/// Storage-ready form of a [`QuerySpec`]
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub predicate: Option<Predicate>,
    pub order_by: Vec<OrderBy>,
    pub page: u32,
    pub offset: u64,
    pub limit: u32,
    pub include_deleted: bool,
    pub scope: Option<PlanScope>,
}

impl QueryPlan {
    /// Pin the plan to a tenant (and owner, for owner-scoped kinds). The
    /// deleted view survives only for elevated callers.
    pub fn restrict(mut self, tenant_id: Uuid, owner_id: Option<Uuid>, elevated: bool) -> Self {
        self.scope = Some(PlanScope { tenant_id, owner_id });
        if !elevated {
            self.include_deleted = false;
        }
        self
    }

    pub fn pagination(&self, records: u64) -> Pagination {
        Pagination::new(self.page, self.limit, records)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub records: u64,
    pub pages: u64,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, records: u64) -> Self {
        let limit = limit.max(1);
        Self {
            page,
            limit,
            records,
            pages: records.div_ceil(limit as u64),
        }
    }
}
