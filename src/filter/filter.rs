use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::FilterWhere;
use super::types::{Predicate, QueryPlan, QuerySpec};
use crate::config::QueryConfig;

/// Compiles caller [`QuerySpec`]s into bounded [`QueryPlan`]s
#[derive(Debug, Clone)]
pub struct QueryCompiler {
    default_page_size: u32,
    max_page_size: u32,
    max_nested_depth: u32,
    debug_logging: bool,
}

impl Default for QueryCompiler {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
            max_nested_depth: 5,
            debug_logging: false,
        }
    }
}

impl QueryCompiler {
    pub fn new(config: &QueryConfig) -> Self {
        let max_page_size = config.max_page_size.max(1);
        Self {
            default_page_size: config.default_page_size.clamp(1, max_page_size),
            max_page_size,
            max_nested_depth: config.max_nested_depth,
            debug_logging: config.debug_logging,
        }
    }

    pub fn compile(
        &self,
        spec: &QuerySpec,
        allowed_fields: &[String],
        allowed_sort_fields: &[String],
    ) -> Result<QueryPlan, FilterError> {
        let filter_where = FilterWhere::new(allowed_fields, self.max_nested_depth);

        let mut terms = filter_where.from_conditions(&spec.filters)?;
        if let Some(where_data) = &spec.where_clause {
            terms.extend(filter_where.from_json(where_data)?);
        }

        let order_by = FilterOrder::resolve(spec.sort.as_ref(), allowed_sort_fields);
        let (page, limit) = self.paging(spec.page, spec.page_size);

        let plan = QueryPlan {
            predicate: Predicate::all(terms),
            order_by,
            page,
            offset: (page as u64 - 1) * limit as u64,
            limit,
            include_deleted: spec.include_deleted,
            scope: None,
        };

        if self.debug_logging {
            tracing::debug!(
                "Compiled query plan: page={} limit={} offset={} order={:?} predicate={:?}",
                plan.page,
                plan.limit,
                plan.offset,
                plan.order_by,
                plan.predicate
            );
        }
        Ok(plan)
    }

    fn paging(&self, page: Option<i64>, page_size: Option<i64>) -> (u32, u32) {
        let page = page.unwrap_or(1).clamp(1, u32::MAX as i64) as u32;
        let limit = match page_size {
            Some(size) => {
                let clamped = size.clamp(1, self.max_page_size as i64) as u32;
                if clamped as i64 != size {
                    tracing::warn!("Page size {} outside [1, {}], clamped to {}", size, self.max_page_size, clamped);
                }
                clamped
            }
            None => self.default_page_size,
        };
        (page, limit)
    }
}
