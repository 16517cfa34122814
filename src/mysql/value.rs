// ABOUTME: Conversion between mysql_async values and the typed row model
// ABOUTME: JSON and temporal values are bound in canonical text form

use mysql_async::consts::ColumnType;
use mysql_async::{Column, Value};
use std::sync::Arc;

use crate::row::{Interval, Row, RowValue, Temporal};

/// MySQL's collation id for the `binary` character set.
const BINARY_CHARSET: u16 = 63;

/// Convert a value read with the binary protocol into a `RowValue`.
pub fn from_mysql(value: Value, column: &Column) -> RowValue {
    match value {
        Value::NULL => RowValue::Null,
        Value::Int(i) => RowValue::Int(i),
        Value::UInt(u) => RowValue::UInt(u),
        Value::Float(f) => RowValue::Float(f),
        Value::Double(d) => RowValue::Double(d),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            RowValue::DateTime(Temporal {
                year,
                month,
                day,
                hour,
                minute,
                second,
                micros,
            })
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => RowValue::Time(Interval {
            negative,
            days,
            hours,
            minutes,
            seconds,
            micros,
        }),
        Value::Bytes(bytes) => match column.column_type() {
            ColumnType::MYSQL_TYPE_JSON => RowValue::from_json_bytes(bytes),
            ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                RowValue::from_column_bytes(bytes, true)
            }
            _ => RowValue::from_column_bytes(bytes, column.character_set() != BINARY_CHARSET),
        },
    }
}

/// Convert a `RowValue` into a bind parameter.
pub fn to_mysql(value: &RowValue) -> Value {
    match value {
        RowValue::Null => Value::NULL,
        RowValue::Int(i) => Value::Int(*i),
        RowValue::UInt(u) => Value::UInt(*u),
        RowValue::Float(f) => Value::Float(*f),
        RowValue::Double(d) => Value::Double(*d),
        RowValue::Text(s) => Value::Bytes(s.as_bytes().to_vec()),
        RowValue::Bytes(b) => Value::Bytes(b.clone()),
        RowValue::Json(_) | RowValue::DateTime(_) | RowValue::Time(_) => value
            .canonical_text()
            .map(|text| Value::Bytes(text.into_bytes()))
            .unwrap_or(Value::NULL),
    }
}

/// Convert a full result row into the typed model, sharing `columns`.
pub fn row_from_mysql(mut row: mysql_async::Row, columns: Arc<Vec<String>>) -> Row {
    let meta = row.columns();
    let values = meta
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = row.take::<Value, _>(idx).unwrap_or(Value::NULL);
            from_mysql(value, column)
        })
        .collect();
    Row::new(columns, values)
}

/// Column names of a result row, in order.
pub fn column_names(row: &mysql_async::Row) -> Vec<String> {
    row.columns_ref()
        .iter()
        .map(|c| c.name_str().into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_mysql_scalar_values() {
        assert_eq!(to_mysql(&RowValue::Null), Value::NULL);
        assert_eq!(to_mysql(&RowValue::Int(-4)), Value::Int(-4));
        assert_eq!(to_mysql(&RowValue::UInt(4)), Value::UInt(4));
        assert_eq!(
            to_mysql(&RowValue::Text("abc".into())),
            Value::Bytes(b"abc".to_vec())
        );
    }

    #[test]
    fn test_to_mysql_serializes_json_and_temporal() {
        let json = RowValue::Json(serde_json::json!({"k": [1, 2]}));
        assert_eq!(to_mysql(&json), Value::Bytes(br#"{"k":[1,2]}"#.to_vec()));

        let zero_date = RowValue::DateTime(Temporal {
            year: 0,
            month: 0,
            day: 0,
            hour: 0,
            minute: 0,
            second: 0,
            micros: 0,
        });
        assert_eq!(
            to_mysql(&zero_date),
            Value::Bytes(b"0000-00-00 00:00:00".to_vec())
        );
    }
}
