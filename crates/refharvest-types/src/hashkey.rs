use serde::{Deserialize, Serialize};

/// A named field of a raw external payload that participates in a harvester's
/// content hash. `ordered` controls whether list-valued fields are sorted
/// before concatenation (`false`, the common case) or kept in the order the
/// adapter produced them (`true`, for fields whose order is itself
/// semantically meaningful).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashKey {
    /// The field name to extract from the raw payload.
    pub name: String,
    /// Whether list-valued fields preserve their original order.
    pub ordered: bool,
}

impl HashKey {
    /// A hash key whose list values are sorted before hashing.
    pub fn unordered(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ordered: false,
        }
    }

    /// A hash key whose list values keep their original order.
    pub fn ordered(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ordered: true,
        }
    }
}
