//! Query evaluation for the SQLite client.
//!
//! Rows, tables, columns and indexes are all filtered as JSON objects, so the
//! same plan serves every list endpoint.

use crate::error::{Result, TablesError};
use crate::query::{Method, Query};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Default)]
pub(crate) struct Plan {
    pub selectors: Vec<String>,
    filters: Vec<Query>,
    orders: Vec<Query>,
    limit: Option<usize>,
    offset: usize,
}

impl Plan {
    pub fn from_queries(queries: &[Query]) -> Result<Self> {
        let mut plan = Self::default();
        for query in queries {
            match query.method {
                Method::Select => plan
                    .selectors
                    .extend(query.selectors().into_iter().map(str::to_string)),
                Method::Limit => plan.limit = Some(query.count()?),
                Method::Offset => plan.offset = query.count()?,
                Method::OrderAsc | Method::OrderDesc => {
                    query.require_attribute()?;
                    plan.orders.push(query.clone());
                }
                _ => {
                    query.require_attribute()?;
                    plan.filters.push(query.clone());
                }
            }
        }
        Ok(plan)
    }

    pub fn has_selection(&self) -> bool {
        !self.selectors.is_empty()
    }

    /// Only select clauses are allowed (get endpoints).
    pub fn select_only(&self) -> Result<()> {
        let paged = self.limit.is_some() || self.offset > 0;
        if self.filters.is_empty() && self.orders.is_empty() && !paged {
            Ok(())
        } else {
            Err(TablesError::InvalidQuery(
                "only select queries are accepted here".to_string(),
            ))
        }
    }

    /// Ids named by an `equal("$id", ..)` filter. Rows outside them can be
    /// skipped before the plan runs.
    pub fn id_filter(&self) -> Option<Vec<String>> {
        self.filters
            .iter()
            .filter(|filter| filter.method == Method::Equal)
            .filter(|filter| filter.attribute.as_deref() == Some("$id"))
            .find_map(|filter| {
                filter
                    .values
                    .iter()
                    .map(|value| value.as_str().map(str::to_string))
                    .collect()
            })
    }

    pub fn matches(&self, item: &Value) -> Result<bool> {
        for filter in &self.filters {
            if !matches_filter(filter, item)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Filter, order and paginate `items`; returns the total before pagination.
    pub fn apply<T, F>(&self, items: Vec<T>, default_limit: usize, view: F) -> Result<(u64, Vec<T>)>
    where
        F: Fn(&T) -> &Value,
    {
        let mut kept = Vec::with_capacity(items.len());
        for item in items {
            if self.matches(view(&item))? {
                kept.push(item);
            }
        }
        let total = kept.len() as u64;

        for order in self.orders.iter().rev() {
            let attribute = order.attribute.as_deref().unwrap_or_default();
            kept.sort_by(|left, right| {
                let ordering = compare(
                    attribute_of(view(left), attribute),
                    attribute_of(view(right), attribute),
                );
                match order.method {
                    Method::OrderDesc => ordering.reverse(),
                    _ => ordering,
                }
            });
        }

        let limit = self.limit.unwrap_or(default_limit);
        let page = kept.into_iter().skip(self.offset).take(limit).collect();
        Ok((total, page))
    }
}

fn attribute_of<'a>(item: &'a Value, attribute: &str) -> &'a Value {
    item.get(attribute).unwrap_or(&Value::Null)
}

fn matches_filter(filter: &Query, item: &Value) -> Result<bool> {
    let actual = attribute_of(item, filter.require_attribute()?);
    let candidates: Vec<&Value> = match actual {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let any = |predicate: &(dyn Fn(&Value) -> bool)| candidates.iter().copied().any(predicate);
    let bound = || {
        filter.values.first().ok_or_else(|| {
            TablesError::InvalidQuery(format!("{filter} expects a value"))
        })
    };

    let listed = |value: &Value| {
        filter
            .values
            .iter()
            .any(|wanted| loosely_equal(value, wanted))
    };

    Ok(match filter.method {
        Method::Equal => any(&listed),
        Method::NotEqual => !any(&listed),
        Method::LessThan => {
            let bound = bound()?;
            any(&|value: &Value| comparable(value, bound) == Some(Ordering::Less))
        }
        Method::LessThanEqual => {
            let bound = bound()?;
            any(&|value: &Value| {
                matches!(comparable(value, bound), Some(Ordering::Less | Ordering::Equal))
            })
        }
        Method::GreaterThan => {
            let bound = bound()?;
            any(&|value: &Value| comparable(value, bound) == Some(Ordering::Greater))
        }
        Method::GreaterThanEqual => {
            let bound = bound()?;
            any(&|value: &Value| {
                matches!(comparable(value, bound), Some(Ordering::Greater | Ordering::Equal))
            })
        }
        Method::IsNull => actual.is_null(),
        Method::IsNotNull => !actual.is_null(),
        _ => true,
    })
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    comparable(left, right) == Some(Ordering::Equal)
}

/// Ordering between two values of the same JSON kind.
fn comparable(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => left.as_f64()?.partial_cmp(&right.as_f64()?),
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        (Value::Bool(left), Value::Bool(right)) => Some(left.cmp(right)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Total order for sorting; nulls first, mismatched kinds keep their order.
fn compare(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => comparable(left, right).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn people() -> Vec<Value> {
        vec![
            json!({"$id": "a", "name": "Ann", "age": 40, "labels": ["admin"]}),
            json!({"$id": "b", "name": "Bob", "age": 25, "labels": []}),
            json!({"$id": "c", "name": "Cid", "age": null, "labels": ["user", "admin"]}),
        ]
    }

    fn ids(items: &[Value]) -> Vec<&str> {
        items.iter().map(|item| item["$id"].as_str().unwrap()).collect()
    }

    #[test]
    fn filters_and_counts_before_paging() {
        let plan = Plan::from_queries(&[
            Query::equal("labels", ["admin"]),
            Query::order_desc("name"),
            Query::limit(1),
        ])
        .unwrap();
        let (total, page) = plan.apply(people(), 25, |item| item).unwrap();
        assert_eq!(total, 2);
        assert_eq!(ids(&page), vec!["c"]);
    }

    #[test]
    fn comparisons_skip_nulls() {
        let plan = Plan::from_queries(&[Query::greater_than_equal("age", 25)]).unwrap();
        let (total, page) = plan.apply(people(), 25, |item| item).unwrap();
        assert_eq!(total, 2);
        assert_eq!(ids(&page), vec!["a", "b"]);

        let plan = Plan::from_queries(&[Query::is_null("age"), Query::offset(0)]).unwrap();
        let (_, page) = plan.apply(people(), 25, |item| item).unwrap();
        assert_eq!(ids(&page), vec!["c"]);
    }

    #[test]
    fn default_limit_applies() {
        let plan = Plan::from_queries(&[Query::order_asc("age")]).unwrap();
        let (total, page) = plan.apply(people(), 2, |item| item).unwrap();
        assert_eq!(total, 3);
        assert_eq!(ids(&page), vec!["c", "b"]);
    }

    #[test]
    fn id_filter_reads_equal_on_id() {
        let plan = Plan::from_queries(&[
            Query::equal("name", ["Ann"]),
            Query::equal("$id", ["b", "a"]),
        ])
        .unwrap();
        assert_eq!(plan.id_filter(), Some(vec!["b".to_string(), "a".to_string()]));

        let plan = Plan::from_queries(&[Query::not_equal("$id", ["a"])]).unwrap();
        assert_eq!(plan.id_filter(), None);
        let plan = Plan::from_queries(&[Query::equal("$id", [1])]).unwrap();
        assert_eq!(plan.id_filter(), None);
    }

    #[test]
    fn select_only_rejects_filters() {
        let plan = Plan::from_queries(&[Query::select(["name"])]).unwrap();
        assert!(plan.has_selection());
        plan.select_only().unwrap();
        let plan = Plan::from_queries(&[Query::equal("name", ["Ann"])]).unwrap();
        assert!(plan.select_only().is_err());
    }
}
