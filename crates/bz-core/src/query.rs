//! Structured list queries built from URL parameters.
//!
//! A [`ListSpec`] describes, per resource, which query parameters filter which
//! document columns and which columns may be ordered by. [`ListQuery`] is the
//! validated result; storage backends compile it into parameterized SQL, and
//! [`Condition::matches`] evaluates the same conditions in memory for live
//! subscriptions.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{BzError, BzResult};
use crate::record::{RecordId, Table};
use crate::Document;

pub const DEFAULT_LIST_LIMIT: usize = 10;
pub const MAX_LIST_LIMIT: usize = 100;
pub const DEFAULT_ORDER_FIELD: &str = "created_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Case-insensitive substring match on a text column.
    Contains,
    /// Exact match on a text column. The parameter is compared as a string
    /// even when it looks like a number.
    Equals,
    /// Numeric equality. The parameter must parse as a number.
    Number,
    /// Equality against a reference column of the given table.
    Reference(Table),
    /// Membership in an array of references to the given table.
    ReferenceIn(Table),
}

#[derive(Debug, Clone, Copy)]
pub struct FilterSpec {
    pub param: &'static str,
    pub column: &'static str,
    pub kind: FilterKind,
}

impl FilterSpec {
    pub const fn new(param: &'static str, column: &'static str, kind: FilterKind) -> Self {
        Self { param, column, kind }
    }

    pub fn condition(&self, raw: &str) -> BzResult<Condition> {
        let column = self.column.to_string();
        Ok(match self.kind {
            FilterKind::Contains => Condition::Contains {
                column,
                needle: raw.to_string(),
            },
            FilterKind::Equals => Condition::Equals {
                column,
                value: Value::String(raw.to_string()),
            },
            FilterKind::Number => Condition::Equals {
                column,
                value: number_from_param(raw).ok_or_else(|| {
                    BzError::InvalidInput(format!("invalid {}: expected a number", self.param))
                })?,
            },
            FilterKind::Reference(table) => Condition::Equals {
                column,
                value: RecordId::parse_key(table, raw)?.into(),
            },
            FilterKind::ReferenceIn(table) => Condition::Includes {
                column,
                value: RecordId::parse_key(table, raw)?.into(),
            },
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListSpec {
    pub table: Table,
    pub order_fields: &'static [&'static str],
    pub filters: &'static [FilterSpec],
}

impl ListSpec {
    pub fn filter_for(&self, param: &str) -> Option<&FilterSpec> {
        self.filters.iter().find(|filter| filter.param == param)
    }

    /// Conditions for every filter parameter that is present and non-blank.
    pub fn conditions(&self, params: &HashMap<String, String>) -> BzResult<Vec<Condition>> {
        let mut conditions = Vec::new();
        for filter in self.filters {
            let Some(raw) = params.get(filter.param) else {
                continue;
            };
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            conditions.push(filter.condition(raw)?);
        }
        Ok(conditions)
    }
}

fn number_from_param(raw: &str) -> Option<Value> {
    if let Ok(number) = raw.parse::<i64>() {
        return Some(Value::from(number));
    }
    raw.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

/// Interpret a free-form query-string value as the JSON scalar it most likely
/// denotes. Only used where no `FilterSpec` types the column.
pub fn scalar_from_param(raw: &str) -> Value {
    if let Some(number) = number_from_param(raw) {
        return number;
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Contains { column: String, needle: String },
    Equals { column: String, value: Value },
    Includes { column: String, value: Value },
}

impl Condition {
    pub fn equals(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Self::Contains { column, .. }
            | Self::Equals { column, .. }
            | Self::Includes { column, .. } => column,
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        let Some(field) = doc.get(self.column()) else {
            return false;
        };
        match self {
            Self::Contains { needle, .. } => {
                let haystack = match field {
                    Value::String(s) => s.to_lowercase(),
                    Value::Number(n) => n.to_string(),
                    _ => return false,
                };
                haystack.contains(&needle.to_lowercase())
            }
            Self::Equals { value, .. } => json_eq(field, value),
            Self::Includes { value, .. } => field
                .as_array()
                .is_some_and(|items| items.iter().any(|item| json_eq(item, value))),
        }
    }
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

// ---------------------------------------------------------------------------
// List query
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub table: Table,
    pub conditions: Vec<Condition>,
    pub order_by: String,
    pub direction: SortDirection,
    /// `None` returns every match; URL-derived queries always set a limit.
    pub limit: Option<usize>,
    pub start: usize,
}

impl ListQuery {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            conditions: Vec::new(),
            order_by: DEFAULT_ORDER_FIELD.to_string(),
            direction: SortDirection::Desc,
            limit: None,
            start: 0,
        }
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = field.into();
        self.direction = direction;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Build a query from URL parameters.
    ///
    /// Unknown `orderBy` values fall back to `created_at`; anything but `asc`
    /// sorts descending; `limit` defaults to 10 and is capped at 100; a
    /// negative or malformed `start` becomes 0.
    pub fn from_params(spec: &ListSpec, params: &HashMap<String, String>) -> BzResult<Self> {
        let conditions = spec.conditions(params)?;

        let order_by = params
            .get("orderBy")
            .map(|field| field.trim())
            .filter(|field| spec.order_fields.contains(field))
            .unwrap_or(DEFAULT_ORDER_FIELD)
            .to_string();

        let direction = match params.get("orderDirection") {
            Some(dir) if dir.trim().eq_ignore_ascii_case("asc") => SortDirection::Asc,
            _ => SortDirection::Desc,
        };

        let limit = params
            .get("limit")
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|limit| *limit > 0)
            .map_or(DEFAULT_LIST_LIMIT, |limit| {
                usize::try_from(limit).map_or(MAX_LIST_LIMIT, |l| l.min(MAX_LIST_LIMIT))
            });

        let start = params
            .get("start")
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .and_then(|start| usize::try_from(start).ok())
            .unwrap_or(0);

        Ok(Self {
            table: spec.table,
            conditions,
            order_by,
            direction,
            limit: Some(limit),
            start,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PRODUCTS: ListSpec = ListSpec {
        table: Table::ShopProduct,
        order_fields: &["created_at", "price"],
        filters: &[
            FilterSpec::new("query", "name", FilterKind::Contains),
            FilterSpec::new("category", "category_id", FilterKind::ReferenceIn(Table::ShopCategory)),
            FilterSpec::new("price", "price", FilterKind::Number),
            FilterSpec::new("owner", "user_id", FilterKind::Reference(Table::User)),
            FilterSpec::new("slug", "slug", FilterKind::Equals),
        ],
    };

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_when_no_params() {
        let q = ListQuery::from_params(&PRODUCTS, &HashMap::new()).unwrap();
        assert!(q.conditions.is_empty());
        assert_eq!(q.order_by, "created_at");
        assert_eq!(q.direction, SortDirection::Desc);
        assert_eq!(q.limit, Some(10));
        assert_eq!(q.start, 0);
    }

    #[test]
    fn unknown_order_field_falls_back_to_created_at() {
        let q = ListQuery::from_params(
            &PRODUCTS,
            &params(&[("orderBy", "name; DROP TABLE records"), ("orderDirection", "asc")]),
        )
        .unwrap();
        assert_eq!(q.order_by, "created_at");
        assert_eq!(q.direction, SortDirection::Asc);

        let q = ListQuery::from_params(&PRODUCTS, &params(&[("orderBy", "price")])).unwrap();
        assert_eq!(q.order_by, "price");
    }

    #[test]
    fn limit_and_start_are_clamped() {
        let q = ListQuery::from_params(&PRODUCTS, &params(&[("limit", "500"), ("start", "-3")]))
            .unwrap();
        assert_eq!(q.limit, Some(100));
        assert_eq!(q.start, 0);

        let q = ListQuery::from_params(&PRODUCTS, &params(&[("limit", "0"), ("start", "20")]))
            .unwrap();
        assert_eq!(q.limit, Some(10));
        assert_eq!(q.start, 20);

        let q = ListQuery::from_params(&PRODUCTS, &params(&[("limit", "abc")])).unwrap();
        assert_eq!(q.limit, Some(10));
    }

    #[test]
    fn filters_map_to_typed_conditions() {
        let q = ListQuery::from_params(
            &PRODUCTS,
            &params(&[("query", " Lamp "), ("category", "c1"), ("price", "12.5"), ("owner", "")]),
        )
        .unwrap();
        assert_eq!(
            q.conditions,
            vec![
                Condition::Contains {
                    column: "name".into(),
                    needle: "Lamp".into()
                },
                Condition::Includes {
                    column: "category_id".into(),
                    value: json!("ShopCategory:c1")
                },
                Condition::Equals {
                    column: "price".into(),
                    value: json!(12.5)
                },
            ]
        );
    }

    #[test]
    fn text_filters_keep_numeric_looking_values_as_strings() {
        let q = ListQuery::from_params(&PRODUCTS, &params(&[("slug", "2024")])).unwrap();
        assert_eq!(q.conditions, vec![Condition::equals("slug", "2024")]);

        let q = ListQuery::from_params(&PRODUCTS, &params(&[("price", "30")])).unwrap();
        assert_eq!(q.conditions, vec![Condition::equals("price", 30)]);

        let err = ListQuery::from_params(&PRODUCTS, &params(&[("price", "cheap")])).unwrap_err();
        assert!(err.to_string().contains("invalid price"));
    }

    #[test]
    fn invalid_reference_filter_is_rejected() {
        let err =
            ListQuery::from_params(&PRODUCTS, &params(&[("category", "x' OR '1'='1")])).unwrap_err();
        assert!(err.to_string().contains("invalid category id"));
    }

    #[test]
    fn conditions_match_documents_in_memory() {
        let doc = json!({
            "name": "Desk Lamp",
            "price": 12,
            "category_id": ["ShopCategory:c1", "ShopCategory:c2"],
        })
        .as_object()
        .cloned()
        .unwrap();

        assert!(Condition::Contains {
            column: "name".into(),
            needle: "lamp".into()
        }
        .matches(&doc));
        assert!(Condition::equals("price", json!(12.0)).matches(&doc));
        assert!(Condition::Includes {
            column: "category_id".into(),
            value: json!("ShopCategory:c2")
        }
        .matches(&doc));
        assert!(!Condition::equals("missing", "x").matches(&doc));
    }
}
