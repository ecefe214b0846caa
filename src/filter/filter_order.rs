use super::types::{Field, OrderBy, SortDirection, SortSpec, SystemField};

pub struct FilterOrder;

impl FilterOrder {
    /// Resolve the caller's sort against the allow-list. Anything unusable
    /// (unknown field, bad direction, empty text) falls back to
    /// `created_at DESC`. `id ASC` always closes the list so paging is stable.
    pub fn resolve(sort: Option<&SortSpec>, allowed_sort_fields: &[String]) -> Vec<OrderBy> {
        let requested = sort.and_then(Self::parse).filter(|(field, _)| allowed_sort_fields.iter().any(|f| f == field));

        let primary = match requested {
            Some((field, direction)) => OrderBy { field: Field::resolve(&field), direction },
            None => Self::default_order(),
        };

        let mut out = vec![primary];
        if out[0].field != Field::System(SystemField::Id) {
            out.push(OrderBy { field: Field::System(SystemField::Id), direction: SortDirection::Asc });
        }
        out
    }

    pub fn default_order() -> OrderBy {
        OrderBy { field: Field::System(SystemField::CreatedAt), direction: SortDirection::Desc }
    }

    fn parse(sort: &SortSpec) -> Option<(String, SortDirection)> {
        match sort {
            SortSpec::Text(s) => {
                let mut it = s.split_whitespace();
                let field = it.next()?;
                let direction = match it.next() {
                    Some(d) => SortDirection::parse(d)?,
                    None => SortDirection::Asc,
                };
                if it.next().is_some() {
                    return None;
                }
                Some((field.to_string(), direction))
            }
            SortSpec::Field { field, direction } => {
                let direction = match direction.as_deref() {
                    Some(d) => SortDirection::parse(d)?,
                    None => SortDirection::Asc,
                };
                Some((field.clone(), direction))
            }
        }
    }
}
