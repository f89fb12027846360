use std::collections::BTreeMap;

use hc_types::{AttrType, AttrValue, Attributes};
use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};
use crate::predicate::Predicate;

/// Field name to attribute type.
///
/// An empty schema checks nothing. Once any field is declared, every
/// attribute and every predicate field must be declared too.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    fields: BTreeMap<String, AttrType>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: BTreeMap<String, AttrType>) -> Self {
        Self { fields }
    }

    pub fn with_field(mut self, name: impl Into<String>, ty: AttrType) -> Self {
        self.fields.insert(name.into(), ty);
        self
    }

    pub fn field_type(&self, name: &str) -> Option<AttrType> {
        self.fields.get(name).copied()
    }

    pub fn fields(&self) -> &BTreeMap<String, AttrType> {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check one value against its field.
    pub fn check_value(&self, field: &str, value: &AttrValue) -> QueryResult<()> {
        if self.is_empty() {
            return Ok(());
        }
        let expected = self
            .field_type(field)
            .ok_or_else(|| QueryError::UnknownField(field.to_string()))?;
        let found = value.attr_type();
        if !expected.accepts(found) {
            return Err(QueryError::TypeMismatch {
                field: field.to_string(),
                expected,
                found,
            });
        }
        Ok(())
    }

    /// Check attributes supplied to `store` or `add_metadata`.
    pub fn check_attributes(&self, attributes: &Attributes) -> QueryResult<()> {
        attributes
            .iter()
            .try_for_each(|(field, value)| self.check_value(field, value))
    }

    /// Check every comparison literal in a predicate.
    pub fn check_predicate(&self, predicate: &Predicate) -> QueryResult<()> {
        predicate
            .comparisons()
            .into_iter()
            .try_for_each(|(field, value)| self.check_value(field, value))
    }
}
