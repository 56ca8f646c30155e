use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ids::FieldId;

/// Similarity metric a collection's vectors were indexed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricType {
    /// Euclidean distance (lower is closer).
    L2,
    /// Inner product (higher is closer).
    IP,
    /// Cosine similarity (higher is closer).
    Cosine,
}

impl MetricType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::L2 => "L2",
            Self::IP => "IP",
            Self::Cosine => "COSINE",
        }
    }
}

impl Default for MetricType {
    fn default() -> Self {
        Self::L2
    }
}

impl FromStr for MetricType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "L2" => Ok(Self::L2),
            "IP" => Ok(Self::IP),
            "COSINE" => Ok(Self::Cosine),
            _ => Err(()),
        }
    }
}

/// Scalar or vector type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int64,
    Float,
    Double,
    VarChar,
    FloatVector { dim: u32 },
}

/// One field of a collection schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub field_id: FieldId,
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub is_primary_key: bool,
}

/// Schema of a loaded collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    /// Returns the primary key field, if the schema declares one.
    #[must_use]
    pub fn primary_key(&self) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.is_primary_key)
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }
}
