//! Row model shared by connections and the execution core
//!
//! - [`Row`]: one result row, columns in select order (duplicates allowed)
//! - [`ResultSet`]: rows of one statement
//! - [`Params`]: ordered named parameters
//! - [`ColumnMap`]: column-to-field renames applied before deserializing
//!
//! Values are `serde_json::Value`, so any `DeserializeOwned` type can be
//! materialized from a row without provider-specific decoding.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Map;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// A single column value
pub type Value = serde_json::Value;

/// Column-to-field renames for one entity type
pub type ColumnMap = HashMap<String, String>;

/// A single result row.
///
/// Columns keep select order and may repeat (`a.Id`, `b.Id` both arrive as
/// `Id`), which is what multi-mapping splits on.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row; `values` must align with `columns`
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Column names in select order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in select order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// First value for a column name (case-insensitive)
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .map(|i| &self.values[i])
    }

    /// Split the row into contiguous segments.
    ///
    /// Each name in `split_on` starts a new segment at its next occurrence
    /// after the previous boundary (the first column never counts as a
    /// boundary). Names are matched case-insensitively.
    pub fn split(&self, split_on: &[&str]) -> Result<Vec<Segment<'_>>> {
        let mut bounds = Vec::with_capacity(split_on.len() + 2);
        bounds.push(0);
        let mut cursor = 1;
        for name in split_on {
            let found = self.columns[cursor.min(self.columns.len())..]
                .iter()
                .position(|c| c.eq_ignore_ascii_case(name))
                .map(|p| p + cursor);
            match found {
                Some(index) => {
                    bounds.push(index);
                    cursor = index + 1;
                }
                None => {
                    return Err(Error::configuration(format!(
                        "split column '{}' not found after column {} in [{}]",
                        name,
                        cursor,
                        self.columns.join(", ")
                    )))
                }
            }
        }
        bounds.push(self.columns.len());

        Ok(bounds
            .windows(2)
            .map(|w| Segment {
                columns: &self.columns[w[0]..w[1]],
                values: &self.values[w[0]..w[1]],
            })
            .collect())
    }

    /// Whole row as one segment
    pub fn as_segment(&self) -> Segment<'_> {
        Segment {
            columns: &self.columns,
            values: &self.values,
        }
    }

    /// Deserialize the whole row
    pub fn to_entity<T: DeserializeOwned>(&self, mapping: Option<&ColumnMap>) -> Result<T> {
        self.as_segment().to_entity(mapping)
    }
}

/// A contiguous slice of a row's columns
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> Segment<'a> {
    /// Whether every value in the segment is SQL NULL (outer-join miss)
    pub fn is_null(&self) -> bool {
        self.values.iter().all(Value::is_null)
    }

    /// Deserialize the segment, renaming columns through `mapping`
    pub fn to_entity<T: DeserializeOwned>(&self, mapping: Option<&ColumnMap>) -> Result<T> {
        let mut object = Map::with_capacity(self.columns.len());
        for (column, value) in self.columns.iter().zip(self.values) {
            let field = mapping
                .and_then(|m| m.get(column))
                .cloned()
                .unwrap_or_else(|| column.clone());
            object.entry(field).or_insert_with(|| value.clone());
        }
        let error = match serde_json::from_value(Value::Object(object)) {
            Ok(entity) => return Ok(entity),
            Err(e) => e,
        };
        // Single-column rows may map to a scalar
        if let [value] = self.values {
            if let Ok(scalar) = serde_json::from_value(value.clone()) {
                return Ok(scalar);
            }
        }
        Err(Error::internal(format!(
            "cannot map columns [{}] to {}: {}",
            self.columns.join(", "),
            std::any::type_name::<T>(),
            error
        )))
    }
}

/// Rows returned by one statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Rows in provider order
    pub rows: Vec<Row>,
}

impl ResultSet {
    /// Create a result set
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// Build a result set from column names and value tuples
    pub fn from_values(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let columns: Arc<[String]> = columns.iter().map(|c| c.to_string()).collect();
        Self {
            rows: rows
                .into_iter()
                .map(|values| Row::new(Arc::clone(&columns), values))
                .collect(),
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows were returned
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Map every row to `T`
    pub fn to_entities<T: DeserializeOwned>(&self, mapping: Option<&ColumnMap>) -> Result<Vec<T>> {
        self.rows.iter().map(|r| r.to_entity(mapping)).collect()
    }
}

/// Ordered named statement parameters.
///
/// Names are stored without a sigil; adapters add whatever prefix their
/// provider expects.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Params {
    entries: Vec<(String, Value)>,
}

impl Params {
    /// Empty parameter list
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a parameter
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Add or replace a parameter in place
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = normalize_name(name.into());
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Build parameters from the fields of a serializable struct
    pub fn from_serialize<S: Serialize>(source: &S) -> Result<Self> {
        match serde_json::to_value(source) {
            Ok(Value::Object(map)) => Ok(Self {
                entries: map.into_iter().collect(),
            }),
            Ok(Value::Null) => Ok(Self::new()),
            Ok(other) => Err(Error::configuration(format!(
                "parameters must serialize to an object, got {}",
                other
            ))),
            Err(e) => Err(Error::internal(format!("cannot serialize parameters: {}", e))),
        }
    }

    /// Merge another parameter list, replacing duplicates
    pub fn extend(&mut self, other: Params) {
        for (name, value) in other.entries {
            self.insert(name, value);
        }
    }

    /// Look up a parameter by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        let name = name.trim_start_matches(['@', ':', '$']);
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no parameters
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as a JSON object, used in diagnostics
    pub fn to_json(&self) -> String {
        let map: Map<String, Value> = self.entries.iter().cloned().collect();
        Value::Object(map).to_string()
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

fn normalize_name(name: String) -> String {
    match name.strip_prefix(['@', ':', '$']) {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}
