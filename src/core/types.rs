// This module defines the fixed scalar type set of the ku language. ScalarType covers the
// integer (`num`), single-precision decimal (`dec`), boolean (`bol`), character (`chr`) and
// string (`str`) types. Each type knows its storage size in bytes, whether values of that
// type are heap-backed and need explicit reclamation, and which operator families accept
// it. Strings are 4-byte pointers to null-terminated buffers that may be static (data
// section) or heap allocated; they are currently the only heap-backed type. Decimals are
// carried through integer registers as IEEE-754 bit patterns and only touch the x87 stack
// while an operation is being computed.

//! Scalar types and their static properties.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A scalar type of the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    #[serde(rename = "num")]
    Integer,
    #[serde(rename = "dec")]
    Decimal,
    #[serde(rename = "bol")]
    Boolean,
    #[serde(rename = "chr")]
    Character,
    #[serde(rename = "str")]
    String,
}

impl ScalarType {
    /// Storage size in bytes.
    pub const fn size(self) -> u32 {
        match self {
            ScalarType::Integer | ScalarType::Decimal | ScalarType::String => 4,
            ScalarType::Boolean | ScalarType::Character => 1,
        }
    }

    /// Whether values of this type point at memory that must be reclaimed.
    pub const fn is_heap(self) -> bool {
        matches!(self, ScalarType::String)
    }

    /// Accepted by `+ - * / %` and by signed prefixes.
    pub const fn is_arithmetic(self) -> bool {
        matches!(self, ScalarType::Integer | ScalarType::Decimal)
    }

    /// Accepted by `< > <= >=`.
    pub const fn is_ordered(self) -> bool {
        matches!(
            self,
            ScalarType::Integer | ScalarType::Decimal | ScalarType::Character
        )
    }

    /// Accepted by `== !=`.
    pub const fn is_equatable(self) -> bool {
        self.is_ordered() || matches!(self, ScalarType::Boolean)
    }

    /// Source-level spelling of the type.
    pub const fn name(self) -> &'static str {
        match self {
            ScalarType::Integer => "num",
            ScalarType::Decimal => "dec",
            ScalarType::Boolean => "bol",
            ScalarType::Character => "chr",
            ScalarType::String => "str",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(ScalarType::Integer.size(), 4);
        assert_eq!(ScalarType::Decimal.size(), 4);
        assert_eq!(ScalarType::String.size(), 4);
        assert_eq!(ScalarType::Boolean.size(), 1);
        assert_eq!(ScalarType::Character.size(), 1);
    }

    #[test]
    fn test_operator_families() {
        assert!(ScalarType::Decimal.is_arithmetic());
        assert!(!ScalarType::Character.is_arithmetic());
        assert!(ScalarType::Character.is_ordered());
        assert!(!ScalarType::Boolean.is_ordered());
        assert!(ScalarType::Boolean.is_equatable());
        assert!(!ScalarType::String.is_equatable());
        assert!(ScalarType::String.is_heap());
        assert!(!ScalarType::Integer.is_heap());
    }

    #[test]
    fn test_serde_spelling() {
        let ty: ScalarType = serde_json::from_str("\"bol\"").unwrap();
        assert_eq!(ty, ScalarType::Boolean);
        assert_eq!(serde_json::to_string(&ScalarType::String).unwrap(), "\"str\"");
    }
}
