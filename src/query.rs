//! Query primitives understood by the wrapped client.
//!
//! Each [`Query`] renders to the JSON query string the TablesDB API accepts,
//! e.g. `{"method":"equal","attribute":"$id","values":["a","b"]}`.

use crate::error::{Result, TablesError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Query operators for building list/get requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    Select,
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    IsNull,
    IsNotNull,
    OrderAsc,
    OrderDesc,
    Limit,
    Offset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Value>,
}

impl Query {
    fn new(method: Method, attribute: Option<&str>, values: Vec<Value>) -> Self {
        Self {
            method,
            attribute: attribute.map(str::to_string),
            values,
        }
    }

    /// Select-list clause; dotted selectors pass through untouched.
    pub fn select<I, S>(selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = selectors
            .into_iter()
            .map(|selector| Value::String(selector.into()))
            .collect();
        Self::new(Method::Select, None, values)
    }

    /// Attribute equals any of `values`.
    pub fn equal<I, V>(attribute: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::new(
            Method::Equal,
            Some(attribute),
            values.into_iter().map(Into::into).collect(),
        )
    }

    pub fn not_equal<I, V>(attribute: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::new(
            Method::NotEqual,
            Some(attribute),
            values.into_iter().map(Into::into).collect(),
        )
    }

    pub fn less_than(attribute: &str, value: impl Into<Value>) -> Self {
        Self::new(Method::LessThan, Some(attribute), vec![value.into()])
    }

    pub fn less_than_equal(attribute: &str, value: impl Into<Value>) -> Self {
        Self::new(Method::LessThanEqual, Some(attribute), vec![value.into()])
    }

    pub fn greater_than(attribute: &str, value: impl Into<Value>) -> Self {
        Self::new(Method::GreaterThan, Some(attribute), vec![value.into()])
    }

    pub fn greater_than_equal(attribute: &str, value: impl Into<Value>) -> Self {
        Self::new(Method::GreaterThanEqual, Some(attribute), vec![value.into()])
    }

    pub fn is_null(attribute: &str) -> Self {
        Self::new(Method::IsNull, Some(attribute), Vec::new())
    }

    pub fn is_not_null(attribute: &str) -> Self {
        Self::new(Method::IsNotNull, Some(attribute), Vec::new())
    }

    pub fn order_asc(attribute: &str) -> Self {
        Self::new(Method::OrderAsc, Some(attribute), Vec::new())
    }

    pub fn order_desc(attribute: &str) -> Self {
        Self::new(Method::OrderDesc, Some(attribute), Vec::new())
    }

    pub fn limit(limit: usize) -> Self {
        Self::new(Method::Limit, None, vec![Value::from(limit)])
    }

    pub fn offset(offset: usize) -> Self {
        Self::new(Method::Offset, None, vec![Value::from(offset)])
    }

    /// Selector strings carried by a select clause.
    pub fn selectors(&self) -> Vec<&str> {
        self.values.iter().filter_map(Value::as_str).collect()
    }

    /// Numeric argument of a limit/offset clause.
    pub fn count(&self) -> Result<usize> {
        self.values
            .first()
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| TablesError::InvalidQuery(format!("{self} expects one integer value")))
    }

    /// Attribute of a filter/order clause.
    pub fn require_attribute(&self) -> Result<&str> {
        self.attribute
            .as_deref()
            .ok_or_else(|| TablesError::InvalidQuery(format!("{self} is missing an attribute")))
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&encoded)
    }
}

impl FromStr for Query {
    type Err = TablesError;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|err| TablesError::InvalidQuery(format!("{s}: {err}")))
    }
}
