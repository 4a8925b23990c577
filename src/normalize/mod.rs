//! Cleans loosely typed API payloads into a canonical, byte-stable record.

mod population;
mod schema;

pub use population::{population_schema, PopulationClient, POPULATION_KEY, POPULATION_URL};
pub use schema::{CanonicalSchema, FieldKind, FieldSpec};

use crate::listing::{Fingerprint, Item, Listing, ListingError, Origin};
use crate::transfer::{SourceFetcher, TransferError};
use crate::utils::compute_hash;
use async_trait::async_trait;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Raised when a payload does not fit the canonical schema. Fatal for the
/// record only.
#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Malformed payload: missing required field '{field}'{}", row_suffix(.row))]
    MissingField { field: String, row: Option<usize> },

    #[error("Malformed payload: field '{field}'{}: {reason}", row_suffix(.row))]
    InvalidValue {
        field: String,
        row: Option<usize>,
        reason: String,
    },

    #[error("Malformed payload: several keys map to field '{0}'")]
    AmbiguousField(String),

    #[error("Malformed payload: {0}")]
    UnexpectedShape(String),

    #[error("Malformed payload: invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

fn row_suffix(row: &Option<usize>) -> String {
    row.map(|r| format!(" in row {r}")).unwrap_or_default()
}

/// A canonical row; BTreeMap keeps serialization key order stable
pub type CanonicalRow = BTreeMap<String, Value>;

/// Output of normalization, ready to upload under a fixed identity
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub identity: String,
    pub rows: Vec<CanonicalRow>,
    pub bytes: Vec<u8>,
    pub fingerprint: Fingerprint,
}

impl NormalizedRecord {
    pub fn item(&self) -> Item {
        Item::new(self.identity.clone(), self.fingerprint.clone(), Origin::Source)
    }

    /// One-item source listing holding this record
    pub fn as_listing(&self) -> Result<Listing, ListingError> {
        Listing::new(Origin::Source, vec![self.item()])
    }
}

#[async_trait]
impl SourceFetcher for NormalizedRecord {
    async fn fetch(&self, identity: &str) -> Result<Vec<u8>, TransferError> {
        if identity == self.identity {
            Ok(self.bytes.clone())
        } else {
            Err(TransferError::NotFound(identity.to_string()))
        }
    }
}

/// Applies a [`CanonicalSchema`] to raw payloads
#[derive(Debug, Clone)]
pub struct Normalizer {
    schema: CanonicalSchema,
    identity: String,
    records_field: Option<String>,
}

impl Normalizer {
    pub fn new(schema: CanonicalSchema, identity: &str) -> Self {
        Self {
            schema,
            identity: identity.to_string(),
            records_field: None,
        }
    }

    /// Treat an object carrying this field as an envelope of rows
    pub fn with_records_field(mut self, field: &str) -> Self {
        self.records_field = Some(field.to_string());
        self
    }

    pub fn schema(&self) -> &CanonicalSchema {
        &self.schema
    }

    /// Parse raw bytes as JSON, then normalize
    pub fn normalize_bytes(&self, raw: &[u8]) -> Result<NormalizedRecord, NormalizeError> {
        let value: Value = serde_json::from_slice(raw)?;
        self.normalize(&value)
    }

    /// Normalize a payload.
    ///
    /// A lone object yields one canonical object; an array, or an object
    /// wrapping rows in the records field, yields an array of canonical
    /// objects in upstream order.
    pub fn normalize(&self, raw: &Value) -> Result<NormalizedRecord, NormalizeError> {
        if self.schema.is_empty() {
            return Err(NormalizeError::UnexpectedShape(
                "canonical schema has no fields".to_string(),
            ));
        }

        let (rows, single) = match raw {
            Value::Array(rows) => (self.normalize_rows(rows)?, false),
            Value::Object(map) => match self.envelope_rows(map)? {
                Some(rows) => (self.normalize_rows(rows)?, false),
                None => (vec![self.normalize_row(map, None)?], true),
            },
            other => {
                return Err(NormalizeError::UnexpectedShape(format!(
                    "expected an object or array, got {}",
                    json_type(other)
                )))
            }
        };

        let bytes = if single {
            serde_json::to_vec(&rows[0])?
        } else {
            serde_json::to_vec(&rows)?
        };
        let fingerprint = Fingerprint::from_hash(compute_hash(&bytes), bytes.len() as u64);

        Ok(NormalizedRecord {
            identity: self.identity.clone(),
            rows,
            bytes,
            fingerprint,
        })
    }

    fn envelope_rows<'a>(
        &self,
        map: &'a Map<String, Value>,
    ) -> Result<Option<&'a Vec<Value>>, NormalizeError> {
        let Some(field) = &self.records_field else {
            return Ok(None);
        };

        let found = map
            .iter()
            .find(|(key, _)| key.trim().eq_ignore_ascii_case(field));

        match found {
            None => Ok(None),
            Some((_, Value::Array(rows))) => Ok(Some(rows)),
            Some((_, other)) => Err(NormalizeError::UnexpectedShape(format!(
                "'{}' must be an array, got {}",
                field,
                json_type(other)
            ))),
        }
    }

    fn normalize_rows(&self, rows: &[Value]) -> Result<Vec<CanonicalRow>, NormalizeError> {
        rows.iter()
            .enumerate()
            .map(|(index, row)| match row {
                Value::Object(map) => self.normalize_row(map, Some(index)),
                other => Err(NormalizeError::UnexpectedShape(format!(
                    "row {} is {}, expected an object",
                    index,
                    json_type(other)
                ))),
            })
            .collect()
    }

    fn normalize_row(
        &self,
        map: &Map<String, Value>,
        row: Option<usize>,
    ) -> Result<CanonicalRow, NormalizeError> {
        let mut out = CanonicalRow::new();

        for spec in &self.schema.fields {
            match lookup(map, spec)? {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(NormalizeError::MissingField {
                            field: spec.name.clone(),
                            row,
                        });
                    }
                }
                Some(value) => {
                    let coerced = coerce(value, spec.kind).map_err(|reason| {
                        NormalizeError::InvalidValue {
                            field: spec.name.clone(),
                            row,
                            reason,
                        }
                    })?;
                    out.insert(spec.name.clone(), coerced);
                }
            }
        }

        Ok(out)
    }
}

/// Value of the highest-priority name present in the row. Two keys that
/// differ only by case or padding are ambiguous.
fn lookup<'a>(
    map: &'a Map<String, Value>,
    spec: &FieldSpec,
) -> Result<Option<&'a Value>, NormalizeError> {
    for name in spec.names() {
        let mut hits = map
            .iter()
            .filter(|(key, _)| key.trim().eq_ignore_ascii_case(name));
        if let Some((_, value)) = hits.next() {
            if hits.next().is_some() {
                return Err(NormalizeError::AmbiguousField(spec.name.clone()));
            }
            return Ok(Some(value));
        }
    }
    Ok(None)
}

/// Convert a raw JSON value to the field's kind
fn coerce(value: &Value, kind: FieldKind) -> Result<Value, String> {
    match kind {
        FieldKind::Text => match value {
            Value::String(s) => Ok(Value::String(s.trim().to_string())),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(format!("expected text, got {}", json_type(other))),
        },
        FieldKind::Integer => {
            let parsed = match value {
                Value::Number(n) => integer_from_number(n),
                Value::String(s) => integer_from_str(s.trim()),
                _ => None,
            };
            parsed.ok_or_else(|| format!("expected an integer, got {value}"))
        }
        FieldKind::Number => {
            let parsed = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            parsed
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("expected a number, got {value}"))
        }
    }
}

fn integer_from_number(n: &Number) -> Option<Value> {
    if n.is_i64() || n.is_u64() {
        return Some(Value::Number(n.clone()));
    }
    integer_from_f64(n.as_f64()?)
}

fn integer_from_str(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    integer_from_f64(s.parse::<f64>().ok()?)
}

fn integer_from_f64(f: f64) -> Option<Value> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        Some(Value::from(f as i64))
    } else {
        None
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn name_value() -> Normalizer {
        Normalizer::new(
            CanonicalSchema::new()
                .field(FieldSpec::text("name").required())
                .field(FieldSpec::integer("value").required()),
            "record.json",
        )
    }

    #[test]
    fn test_normalize_example() {
        let record = name_value()
            .normalize(&json!({" Name ": "X", "Value": "42"}))
            .unwrap();
        assert_eq!(record.bytes, br#"{"name":"X","value":42}"#.to_vec());
        assert_eq!(record.identity, "record.json");
    }

    #[test]
    fn test_normalize_is_byte_stable() {
        let normalizer = name_value();
        let a = normalizer
            .normalize(&json!({"Value": 42, "Name": "  X  ", "extra": true}))
            .unwrap();
        let b = normalizer
            .normalize(&json!({"Name": "X", "Value": "42"}))
            .unwrap();
        assert_eq!(a.bytes, b.bytes);
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_missing_required_field() {
        let err = name_value().normalize(&json!({"Name": "X"})).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingField { ref field, row: None } if field == "value"));
        assert!(err.to_string().starts_with("Malformed payload"));
    }

    #[test]
    fn test_null_counts_as_missing() {
        let err = name_value()
            .normalize(&json!({"Name": "X", "Value": null}))
            .unwrap_err();
        assert!(matches!(err, NormalizeError::MissingField { .. }));
    }

    #[test]
    fn test_optional_field_is_omitted() {
        let normalizer = Normalizer::new(
            CanonicalSchema::new()
                .field(FieldSpec::text("name").required())
                .field(FieldSpec::number("score")),
            "r.json",
        );
        let record = normalizer.normalize(&json!({"name": "a"})).unwrap();
        assert_eq!(record.bytes, br#"{"name":"a"}"#.to_vec());
    }

    #[test]
    fn test_bad_integer_is_rejected() {
        let err = name_value()
            .normalize(&json!({"Name": "X", "Value": "forty-two"}))
            .unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidValue { ref field, .. } if field == "value"));

        let err = name_value()
            .normalize(&json!({"Name": "X", "Value": 4.5}))
            .unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidValue { .. }));
    }

    #[test]
    fn test_ambiguous_keys_are_rejected() {
        let err = name_value()
            .normalize(&json!({"Name": "X", " name": "Y", "Value": 1}))
            .unwrap_err();
        assert!(matches!(err, NormalizeError::AmbiguousField(ref f) if f == "name"));
    }

    #[test]
    fn test_earlier_alias_wins_over_later() {
        let normalizer = Normalizer::new(
            CanonicalSchema::new().field(FieldSpec::integer("year").alias("Year").alias("ID Year")),
            "r.json",
        );
        let record = normalizer
            .normalize(&json!({"ID Year": 1999, "Year": "2013"}))
            .unwrap();
        assert_eq!(record.bytes, br#"{"year":2013}"#.to_vec());

        let record = normalizer.normalize(&json!({"ID Year": 1999})).unwrap();
        assert_eq!(record.bytes, br#"{"year":1999}"#.to_vec());
    }

    #[test]
    fn test_envelope_rows_keep_order() {
        let record = name_value()
            .with_records_field("data")
            .normalize(&json!({
                "data": [
                    {"Name": "b", "Value": "2"},
                    {"Name": "a", "Value": 1.0}
                ],
                "source": [{"ignored": true}]
            }))
            .unwrap();
        assert_eq!(
            record.bytes,
            br#"[{"name":"b","value":2},{"name":"a","value":1}]"#.to_vec()
        );
        assert_eq!(record.rows.len(), 2);
    }

    #[test]
    fn test_row_index_in_error() {
        let err = name_value()
            .normalize(&json!([{"Name": "a", "Value": 1}, {"Name": "b"}]))
            .unwrap_err();
        assert!(matches!(err, NormalizeError::MissingField { row: Some(1), .. }));
    }

    #[test]
    fn test_scalar_payload_is_rejected() {
        assert!(matches!(
            name_value().normalize(&json!("nope")),
            Err(NormalizeError::UnexpectedShape(_))
        ));
        assert!(matches!(
            name_value().normalize_bytes(b"{not json"),
            Err(NormalizeError::InvalidJson(_))
        ));
    }

    #[tokio::test]
    async fn test_record_listing_and_fetch() {
        let record = name_value()
            .normalize(&json!({"Name": "X", "Value": 1}))
            .unwrap();
        let listing = record.as_listing().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(
            listing.get("record.json").unwrap().fingerprint,
            record.fingerprint
        );

        assert_eq!(record.fetch("record.json").await.unwrap(), record.bytes);
        assert!(record.fetch("other").await.is_err());
    }
}
