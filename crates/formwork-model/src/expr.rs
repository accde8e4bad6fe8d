//! Expression descriptors for dynamic properties and validators.
//!
//! Descriptors only; evaluation happens in the engine crate through a
//! kind-keyed dispatch table, with the query language consumed as an
//! opaque string by a pluggable evaluator.

use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A typed, serializable expression bound to a dynamic property or an
/// expression validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EntityExpression {
    /// Read another field's current value.
    Data { field: String },
    /// Compare another field's value against a constant. For
    /// multi-valued fields this is an array-membership test.
    DataMatch { field: String, value: Value },
    /// Test schema-aware emptiness of another field. `empty` selects
    /// whether the expression is true when the field IS empty.
    NotEmpty { field: String, empty: bool },
    /// Evaluate a query-language expression against the data root,
    /// scoped to the current path, with additional named variables.
    /// Asynchronous; results are last-write-wins.
    Jsonata {
        expression: String,
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        variables: IndexMap<String, Value>,
    },
    /// Generate a fresh unique identifier.
    Uuid,
    /// Logical negation of an inner expression.
    Not { expr: Box<EntityExpression> },
}

impl EntityExpression {
    /// The dispatch key for the evaluator table.
    pub fn kind(&self) -> &'static str {
        match self {
            EntityExpression::Data { .. } => "data",
            EntityExpression::DataMatch { .. } => "dataMatch",
            EntityExpression::NotEmpty { .. } => "notEmpty",
            EntityExpression::Jsonata { .. } => "jsonata",
            EntityExpression::Uuid => "uuid",
            EntityExpression::Not { .. } => "notExpr",
        }
    }

    pub fn data(field: impl Into<String>) -> Self {
        EntityExpression::Data { field: field.into() }
    }

    pub fn data_match(field: impl Into<String>, value: impl Into<Value>) -> Self {
        EntityExpression::DataMatch {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn not_empty(field: impl Into<String>) -> Self {
        EntityExpression::NotEmpty {
            field: field.into(),
            empty: false,
        }
    }

    pub fn jsonata(expression: impl Into<String>) -> Self {
        EntityExpression::Jsonata {
            expression: expression.into(),
            variables: IndexMap::new(),
        }
    }

    pub fn not(inner: EntityExpression) -> Self {
        EntityExpression::Not { expr: Box::new(inner) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(EntityExpression::data("f").kind(), "data");
        assert_eq!(EntityExpression::jsonata("a & b").kind(), "jsonata");
        assert_eq!(
            EntityExpression::not(EntityExpression::data("f")).kind(),
            "notExpr"
        );
    }

    #[test]
    fn serde_tagging() {
        let expr = EntityExpression::data_match("type", "Not");
        let json = serde_json::to_value(&expr).unwrap();
        assert_eq!(json["type"], "dataMatch");
        let back: EntityExpression = serde_json::from_value(json).unwrap();
        assert_eq!(back, expr);
    }
}
