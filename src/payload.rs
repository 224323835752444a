//! Creation and update payload rules.
//!
//! A creation payload for a table holds every column, except that columns
//! whose type includes null (or that carry a default) may be omitted,
//! relationship columns accept an id or a nested creation payload, and the
//! two timestamps may be overridden. Update payloads are partial creation
//! payloads. The payload itself is never rewritten here.

use crate::error::{Result, TablesError};
use crate::row::Document;
use crate::schema::{is_meta_key, ColumnDefinition, DataType, Schema, TIMESTAMP_OVERRIDES};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Create,
    Update,
    /// Nested or bulk creation: `$id` and `$permissions` are also accepted.
    CreateWithId,
}

pub fn check_create(schema: &Schema, table_id: &str, data: &Document) -> Result<()> {
    check(schema, table_id, data, Mode::Create)
}

pub fn check_update(schema: &Schema, table_id: &str, data: &Document) -> Result<()> {
    check(schema, table_id, data, Mode::Update)
}

/// Bulk rows; with `require_id` every row must carry its own `$id`.
pub fn check_bulk(
    schema: &Schema,
    table_id: &str,
    rows: &[Document],
    require_id: bool,
) -> Result<()> {
    for row in rows {
        if require_id && !row.get("$id").is_some_and(Value::is_string) {
            return Err(invalid(table_id, "every row needs a string `$id`"));
        }
        check(schema, table_id, row, Mode::CreateWithId)?;
    }
    Ok(())
}

fn check(schema: &Schema, table_id: &str, data: &Document, mode: Mode) -> Result<()> {
    let table = schema.require_table(table_id)?;

    for (key, value) in data {
        if is_meta_key(key) {
            let allowed = TIMESTAMP_OVERRIDES.contains(&key.as_str())
                || (mode == Mode::CreateWithId && matches!(key.as_str(), "$id" | "$permissions"));
            if !allowed {
                return Err(invalid(table_id, format!("`{key}` cannot be written")));
            }
            continue;
        }
        let column = table
            .column(key)
            .ok_or_else(|| invalid(table_id, format!("unknown column `{key}`")))?;
        check_value(schema, table_id, column, value)?;
    }

    if mode != Mode::Update {
        if let Some(missing) = table
            .columns
            .iter()
            .find(|column| !column.is_optional() && !data.contains_key(&column.key))
        {
            return Err(invalid(
                table_id,
                format!("missing required column `{}`", missing.key),
            ));
        }
    }
    Ok(())
}

fn check_value(
    schema: &Schema,
    table_id: &str,
    column: &ColumnDefinition,
    value: &Value,
) -> Result<()> {
    if value.is_null() {
        return if column.nullable || column.relationship().is_some() {
            Ok(())
        } else {
            Err(invalid(table_id, format!("`{}` is not nullable", column.key)))
        };
    }

    if let Some(relationship) = column.relationship() {
        let check_one = |item: &Value| match item {
            Value::String(_) => Ok(()),
            Value::Object(nested) => {
                check(schema, &relationship.related_table, nested, Mode::CreateWithId)
            }
            _ => Err(invalid(
                table_id,
                format!("`{}` expects a row id or a nested row", column.key),
            )),
        };
        return match (relationship.is_many(), value) {
            (true, Value::Array(items)) => items.iter().try_for_each(check_one),
            (true, _) => Err(invalid(table_id, format!("`{}` expects a list", column.key))),
            (false, item) => check_one(item),
        };
    }

    if column.array {
        let items = value
            .as_array()
            .ok_or_else(|| invalid(table_id, format!("`{}` expects a list", column.key)))?;
        return items.iter().try_for_each(|item| {
            if item.is_null() && column.nullable {
                Ok(())
            } else {
                check_scalar(table_id, column, item)
            }
        });
    }

    check_scalar(table_id, column, value)
}

fn check_scalar(table_id: &str, column: &ColumnDefinition, value: &Value) -> Result<()> {
    let matches = match &column.data_type {
        DataType::String | DataType::Datetime | DataType::Email | DataType::Ip | DataType::Url => {
            match (value.as_str(), column.size) {
                (Some(text), Some(size)) => text.chars().count() <= size as usize,
                (Some(_), None) => true,
                (None, _) => false,
            }
        }
        DataType::Enum { elements } => value
            .as_str()
            .is_some_and(|text| elements.iter().any(|element| element == text)),
        DataType::Integer => value.is_i64() || value.is_u64(),
        DataType::Float => value.is_number(),
        DataType::Boolean => value.is_boolean(),
        DataType::Point => is_point(value),
        DataType::Line => list_of(value, is_point),
        DataType::Polygon => list_of(value, |ring| list_of(ring, is_point)),
        DataType::Relationship(_) => false,
    };
    if matches {
        Ok(())
    } else {
        Err(invalid(
            table_id,
            format!(
                "`{}` expects a {} value, got {value}",
                column.key,
                column.data_type.name()
            ),
        ))
    }
}

fn is_point(value: &Value) -> bool {
    matches!(value.as_array(), Some(pair) if pair.len() == 2 && pair.iter().all(Value::is_number))
}

fn list_of(value: &Value, item: impl Fn(&Value) -> bool) -> bool {
    value.as_array().is_some_and(|items| items.iter().all(item))
}

fn invalid(table_id: &str, reason: impl Into<String>) -> TablesError {
    TablesError::InvalidPayload {
        table: table_id.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RelationKind, TableDefinition};
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new()
            .add_table(
                TableDefinition::new("users")
                    .with_column(ColumnDefinition::string("name").with_size(32))
                    .with_column(ColumnDefinition::string("description").nullable())
                    .with_column(ColumnDefinition::integer("age"))
                    .with_column(ColumnDefinition::string("labels").array().nullable())
                    .with_column(ColumnDefinition::enumeration(
                        "status",
                        ["active", "restricted", "deleted"],
                    ))
                    .with_column(
                        ColumnDefinition::related("posts", "posts", RelationKind::OneToMany)
                            .nullable(),
                    ),
            )
            .add_table(
                TableDefinition::new("posts")
                    .with_column(ColumnDefinition::string("title"))
                    .with_column(ColumnDefinition::float("score").with_default(0.0)),
            )
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn nullable_columns_are_optional() {
        let data = doc(json!({"name": "John Doe", "age": 30, "status": "active"}));
        check_create(&schema(), "users", &data).unwrap();
    }

    #[test]
    fn required_columns_must_be_present_on_create_only() {
        let data = doc(json!({"name": "John Doe", "status": "active"}));
        let err = check_create(&schema(), "users", &data).unwrap_err();
        assert!(err.to_string().contains("missing required column `age`"));
        check_update(&schema(), "users", &data).unwrap();
    }

    #[test]
    fn relationships_accept_ids_and_nested_rows() {
        let data = doc(json!({
            "name": "John Doe",
            "age": 30,
            "status": "active",
            "posts": ["p1", {"$id": "p2", "title": "Nested"}],
            "$createdAt": "2020-01-01T00:00:00.000+00:00"
        }));
        check_create(&schema(), "users", &data).unwrap();

        let nested_missing = doc(json!({"posts": [{"score": 1.5}]}));
        assert!(check_update(&schema(), "users", &nested_missing).is_err());
    }

    #[test]
    fn rejects_wrong_types() {
        for data in [
            json!({"age": "thirty"}),
            json!({"age": 1.5}),
            json!({"status": "gone"}),
            json!({"name": null}),
            json!({"name": "x".repeat(33)}),
            json!({"labels": "admin"}),
            json!({"posts": "p1"}),
            json!({"nickname": "JD"}),
            json!({"$id": "u1"}),
        ] {
            assert!(
                check_update(&schema(), "users", &doc(data.clone())).is_err(),
                "{data}"
            );
        }
    }

    #[test]
    fn geometry_columns_check_their_shape() {
        let schema = Schema::new().add_table(
            TableDefinition::new("places")
                .with_column(ColumnDefinition::point("center"))
                .with_column(ColumnDefinition::line("route").nullable())
                .with_column(ColumnDefinition::polygon("area").nullable()),
        );
        let data = doc(json!({
            "center": [1.5, 2],
            "route": [[0, 0], [1, 1]],
            "area": [[[0, 0], [0, 1], [1, 1], [0, 0]]]
        }));
        check_create(&schema, "places", &data).unwrap();

        for data in [
            json!({"center": [1.5]}),
            json!({"center": ["1", "2"]}),
            json!({"route": [1, 1]}),
            json!({"area": [[0, 0], [1, 1]]}),
        ] {
            assert!(check_update(&schema, "places", &doc(data.clone())).is_err(), "{data}");
        }
    }

    #[test]
    fn bulk_rows_need_ids_when_asked() {
        let rows = vec![doc(json!({"title": "a"}))];
        check_bulk(&schema(), "posts", &rows, false).unwrap();
        assert!(check_bulk(&schema(), "posts", &rows, true).is_err());
        let rows = vec![doc(json!({"$id": "p1", "title": "a"}))];
        check_bulk(&schema(), "posts", &rows, true).unwrap();
    }
}
