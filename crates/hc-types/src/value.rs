use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Metadata attributes of one metadata object. Keys are unique.
pub type Attributes = BTreeMap<String, AttrValue>;

/// Schema type of a metadata attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrType {
    Long,
    Double,
    String,
    Binary,
    Timestamp,
}

impl AttrType {
    /// Whether a value of type `value` may be stored in (or compared with) a
    /// field of this type. `Long` widens to `Double`; nothing else converts.
    pub fn accepts(&self, value: AttrType) -> bool {
        *self == value || (*self == AttrType::Double && value == AttrType::Long)
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Long => "long",
            Self::Double => "double",
            Self::String => "string",
            Self::Binary => "binary",
            Self::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

impl FromStr for AttrType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" => Ok(Self::Long),
            "double" => Ok(Self::Double),
            "string" => Ok(Self::String),
            "binary" => Ok(Self::Binary),
            "timestamp" => Ok(Self::Timestamp),
            other => Err(TypeError::UnknownAttrType(other.to_string())),
        }
    }
}

/// A typed metadata attribute value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AttrValue {
    Long(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    /// Milliseconds since the UNIX epoch.
    Timestamp(u64),
}

impl AttrValue {
    pub fn attr_type(&self) -> AttrType {
        match self {
            Self::Long(_) => AttrType::Long,
            Self::Double(_) => AttrType::Double,
            Self::String(_) => AttrType::String,
            Self::Binary(_) => AttrType::Binary,
            Self::Timestamp(_) => AttrType::Timestamp,
        }
    }

    /// Order two values. Returns `None` when the types are not comparable
    /// (or a double is NaN).
    pub fn compare(&self, other: &AttrValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Long(a), Self::Long(b)) => Some(a.cmp(b)),
            (Self::Double(a), Self::Double(b)) => a.partial_cmp(b),
            (Self::Long(a), Self::Double(b)) => (*a as f64).partial_cmp(b),
            (Self::Double(a), Self::Long(b)) => a.partial_cmp(&(*b as f64)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Binary(a), Self::Binary(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v:?}"),
            Self::String(v) => write!(f, "'{}'", v.replace('\'', "''")),
            Self::Binary(v) => write!(f, "x'{}'", hex::encode(v)),
            Self::Timestamp(v) => write!(f, "{{ts {v}}}"),
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for AttrValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(v)
    }
}
