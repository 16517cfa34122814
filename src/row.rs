// ABOUTME: Typed row model used as the interchange value between source and target
// ABOUTME: Rows are ordered column-name to tagged-value mappings sharing one column list

use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

/// Calendar value as MySQL sends it. Zero dates (`0000-00-00`) are legal,
/// so this is kept field-wise instead of going through chrono.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Temporal {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub micros: u32,
}

impl fmt::Display for Temporal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )?;
        if self.micros > 0 {
            write!(f, ".{:06}", self.micros)?;
        }
        Ok(())
    }
}

/// MySQL TIME value, which is a signed duration rather than a time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Interval {
    pub negative: bool,
    pub days: u32,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub micros: u32,
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hours = u64::from(self.days) * 24 + u64::from(self.hours);
        let sign = if self.negative { "-" } else { "" };
        write!(
            f,
            "{}{:02}:{:02}:{:02}",
            sign, hours, self.minutes, self.seconds
        )?;
        if self.micros > 0 {
            write!(f, ".{:06}", self.micros)?;
        }
        Ok(())
    }
}

/// A single column value, explicitly tagged so insert and serialization
/// logic never needs runtime introspection.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(JsonValue),
    DateTime(Temporal),
    Time(Interval),
}

impl RowValue {
    /// Build a value from raw bytes read for a column.
    ///
    /// Bytes destined for a text-typed column are turned into text when they
    /// are valid UTF-8; everything else stays binary.
    pub fn from_column_bytes(bytes: Vec<u8>, text_typed: bool) -> Self {
        if !text_typed {
            return RowValue::Bytes(bytes);
        }
        match String::from_utf8(bytes) {
            Ok(text) => RowValue::Text(text),
            Err(err) => RowValue::Bytes(err.into_bytes()),
        }
    }

    /// Build a value for a JSON-typed column, falling back to text when the
    /// payload does not parse.
    pub fn from_json_bytes(bytes: Vec<u8>) -> Self {
        match serde_json::from_slice::<JsonValue>(&bytes) {
            Ok(json) => RowValue::Json(json),
            Err(_) => RowValue::from_column_bytes(bytes, true),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RowValue::Null)
    }

    /// Canonical textual form used when a value has to be bound as a string.
    /// Returns `None` for NULL and for values that are bound natively.
    pub fn canonical_text(&self) -> Option<String> {
        match self {
            RowValue::Json(json) => Some(json.to_string()),
            RowValue::DateTime(t) => Some(t.to_string()),
            RowValue::Time(t) => Some(t.to_string()),
            _ => None,
        }
    }

    /// Approximate length used by size-constrained targets (characters for
    /// text, bytes for binary).
    pub fn display_len(&self) -> usize {
        match self {
            RowValue::Null => 0,
            RowValue::Text(s) => s.chars().count(),
            RowValue::Bytes(b) => b.len(),
            RowValue::Json(j) => j.to_string().chars().count(),
            RowValue::Int(i) => i.to_string().len(),
            RowValue::UInt(u) => u.to_string().len(),
            RowValue::Float(f) => f.to_string().len(),
            RowValue::Double(d) => d.to_string().len(),
            RowValue::DateTime(t) => t.to_string().len(),
            RowValue::Time(t) => t.to_string().len(),
        }
    }
}

impl From<&str> for RowValue {
    fn from(value: &str) -> Self {
        RowValue::Text(value.to_string())
    }
}

impl From<String> for RowValue {
    fn from(value: String) -> Self {
        RowValue::Text(value)
    }
}

impl From<i64> for RowValue {
    fn from(value: i64) -> Self {
        RowValue::Int(value)
    }
}

impl From<f64> for RowValue {
    fn from(value: f64) -> Self {
        RowValue::Double(value)
    }
}

impl<T: Into<RowValue>> From<Option<T>> for RowValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(RowValue::Null)
    }
}

/// One table row: an ordered mapping of column name to value.
///
/// Rows read in the same batch share a single column list.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<Vec<String>>,
    values: Vec<RowValue>,
}

impl Row {
    /// Create a row. Panics in debug builds if the value count does not
    /// match the column count.
    pub fn new(columns: Arc<Vec<String>>, values: Vec<RowValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn shared_columns(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.columns)
    }

    pub fn values(&self) -> &[RowValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up a value by column name.
    pub fn get(&self, column: &str) -> Option<&RowValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// Iterate `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RowValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}
