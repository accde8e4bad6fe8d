//! Schema interface service: type-aware operations on field values.
//!
//! Emptiness, display text, ordering, lengths, validation messages,
//! date parsing and equality, all driven by the field's declared type.
//! Pluggable so hosts can override formatting; the default covers the
//! built-in types.

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use formwork_model::schema::{FieldType, SchemaField};
use formwork_model::Value;
use ordered_float::OrderedFloat;
use std::cmp::Ordering;

/// Which bound a validation message cites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Required,
    LengthBelow,
    LengthAbove,
    NotBeforeDate,
    NotAfterDate,
}

/// Type-aware operations on raw field values.
pub trait SchemaInterface {
    /// Schema-aware emptiness. Null and undefined are empty for every
    /// type; strings when "", collections when length zero. Numeric
    /// zero is never empty.
    fn is_empty(&self, field: &SchemaField, value: &Value) -> bool;

    /// Human-readable text, resolving option values to option names.
    fn text_value(&self, field: &SchemaField, value: &Value) -> String;

    /// Case-normalized text for searching.
    fn search_text(&self, field: &SchemaField, value: &Value) -> String;

    /// Typed comparison; unset values sort last.
    fn compare(&self, field: &SchemaField, a: &Value, b: &Value) -> Ordering;

    /// Length of a collection or string value; scalars count 0.
    fn value_length(&self, field: &SchemaField, value: &Value) -> usize;

    /// Failure text for a validation check.
    fn validation_message(&self, kind: MessageKind, actual: &str, bound: &str) -> String;

    /// Parse a date/time value to a millisecond timestamp.
    fn parse_date(&self, field: &SchemaField, value: &Value) -> Option<i64>;

    /// Type-appropriate equality; arrays element-wise and
    /// length-checked.
    fn value_eq(&self, field: &SchemaField, a: &Value, b: &Value) -> bool;

    /// Equality-or-membership: for multi-valued fields, is `one`
    /// contained in `many`; otherwise plain equality.
    fn value_selected(&self, field: &SchemaField, current: &Value, candidate: &Value) -> bool {
        if field.collection {
            match current.as_array() {
                Some(items) => items.iter().any(|v| self.scalar_eq(field, v, candidate)),
                None => false,
            }
        } else {
            self.scalar_eq(field, current, candidate)
        }
    }

    /// Equality ignoring collection shape (single element against
    /// single element).
    fn scalar_eq(&self, field: &SchemaField, a: &Value, b: &Value) -> bool;
}

/// The built-in implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSchemaInterface;

impl DefaultSchemaInterface {
    fn numeric_eq(a: &Value, b: &Value) -> Option<bool> {
        match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => Some(x == y),
            _ => None,
        }
    }
}

impl SchemaInterface for DefaultSchemaInterface {
    fn is_empty(&self, _field: &SchemaField, value: &Value) -> bool {
        match value {
            Value::Undefined | Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(items) => items.is_empty(),
            _ => false,
        }
    }

    fn text_value(&self, field: &SchemaField, value: &Value) -> String {
        if value.is_unset() {
            return String::new();
        }
        for option in &field.options {
            if self.scalar_eq(field, &option.value, value) {
                return option.name.clone();
            }
        }
        value.to_string()
    }

    fn search_text(&self, field: &SchemaField, value: &Value) -> String {
        self.text_value(field, value).to_lowercase()
    }

    fn compare(&self, field: &SchemaField, a: &Value, b: &Value) -> Ordering {
        match (a.is_unset(), b.is_unset()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {}
        }
        if field.field_type.is_temporal() {
            if let (Some(x), Some(y)) = (self.parse_date(field, a), self.parse_date(field, b)) {
                return x.cmp(&y);
            }
        }
        match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Array(x), Value::Array(y)) => {
                for (ax, bx) in x.iter().zip(y.iter()) {
                    let ord = self.compare(field, ax, bx);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                x.len().cmp(&y.len())
            }
            _ => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => OrderedFloat(x).cmp(&OrderedFloat(y)),
                _ => self
                    .text_value(field, a)
                    .cmp(&self.text_value(field, b)),
            },
        }
    }

    fn value_length(&self, _field: &SchemaField, value: &Value) -> usize {
        match value {
            Value::Array(items) => items.len(),
            Value::String(s) => s.chars().count(),
            _ => 0,
        }
    }

    fn validation_message(&self, kind: MessageKind, _actual: &str, bound: &str) -> String {
        match kind {
            MessageKind::Required => "Please enter a value".to_string(),
            MessageKind::LengthBelow => format!("Length must be at least {bound}"),
            MessageKind::LengthAbove => format!("Length must be at most {bound}"),
            MessageKind::NotBeforeDate => format!("Date must not be before {bound}"),
            MessageKind::NotAfterDate => format!("Date must not be after {bound}"),
        }
    }

    fn parse_date(&self, field: &SchemaField, value: &Value) -> Option<i64> {
        if let Some(millis) = value.as_int() {
            return Some(millis);
        }
        let text = value.as_str()?;
        match field.field_type {
            FieldType::Time => NaiveTime::parse_from_str(text, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
                .ok()
                .map(|t| {
                    use chrono::Timelike;
                    i64::from(t.num_seconds_from_midnight()) * 1000
                }),
            FieldType::DateTime => chrono::DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.timestamp_millis()),
            _ => NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| Utc.from_utc_datetime(&dt).timestamp_millis()),
        }
    }

    fn value_eq(&self, field: &SchemaField, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Array(x), Value::Array(y)) => {
                x.len() == y.len()
                    && x.iter()
                        .zip(y.iter())
                        .all(|(ax, bx)| self.scalar_eq(field, ax, bx))
            }
            _ => self.scalar_eq(field, a, b),
        }
    }

    fn scalar_eq(&self, field: &SchemaField, a: &Value, b: &Value) -> bool {
        if a.is_unset() && b.is_unset() {
            return true;
        }
        if field.field_type.is_numeric() {
            if let Some(eq) = Self::numeric_eq(a, b) {
                return eq;
            }
        }
        a == b
    }
}
