//! Purpose: Declared variable types used to steer dzn/JSON decoding.
//! Exports: `VarType`, `VarTypes`.
//! Role: Optional decoding hints; without them value kinds are inferred from literals.
//! Invariants: Array types carry 1..=6 dimensions and a non-array element type.
//! Invariants: Enum types are referenced by name and resolved against the session `EnumTable`.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::core::error::{Error, ErrorKind};
use crate::core::value::is_identifier;

pub const MAX_ARRAY_DIMS: usize = 6;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VarType {
    Bool,
    Int,
    Float,
    Str,
    /// Scalar of the named enum.
    Enum(String),
    /// The statement itself declares an enum (`Color = {red, green};`).
    EnumDecl,
    Set(Box<VarType>),
    Array { dims: usize, elem: Box<VarType> },
}

impl VarType {
    pub fn set_of(elem: VarType) -> Self {
        VarType::Set(Box::new(elem))
    }

    pub fn array_of(dims: usize, elem: VarType) -> Self {
        VarType::Array {
            dims,
            elem: Box::new(elem),
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarType::Bool => f.write_str("bool"),
            VarType::Int => f.write_str("int"),
            VarType::Float => f.write_str("float"),
            VarType::Str => f.write_str("string"),
            VarType::Enum(name) => f.write_str(name),
            VarType::EnumDecl => f.write_str("enum"),
            VarType::Set(elem) => write!(f, "set of {elem}"),
            VarType::Array { dims, elem } => {
                let index = vec!["int"; *dims].join(", ");
                write!(f, "array[{index}] of {elem}")
            }
        }
    }
}

impl FromStr for VarType {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        parse_type(text.trim())
    }
}

fn type_error(text: &str) -> Error {
    Error::new(ErrorKind::Usage)
        .with_message("unrecognized variable type")
        .with_fragment(text)
        .with_hint("Use bool, int, float, string, enum, set of <type>, array[<index>, ...] of <type>, or an enum name.")
}

fn strip_word<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(word)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim_start())
    } else {
        None
    }
}

fn parse_type(text: &str) -> Result<VarType, Error> {
    let text = strip_word(text, "var")
        .or_else(|| strip_word(text, "par"))
        .unwrap_or(text);

    if let Some(rest) = strip_word(text, "set") {
        let elem = strip_word(rest, "of").ok_or_else(|| type_error(text))?;
        let elem = parse_type(elem)?;
        return match elem {
            VarType::Set(_) | VarType::Array { .. } | VarType::EnumDecl => Err(type_error(text)),
            elem => Ok(VarType::set_of(elem)),
        };
    }

    if let Some(rest) = text.strip_prefix("array") {
        let rest = rest.trim_start();
        let inner = rest.strip_prefix('[').ok_or_else(|| type_error(text))?;
        let close = inner.find(']').ok_or_else(|| type_error(text))?;
        let dims = inner[..close].split(',').count();
        if inner[..close].trim().is_empty() || dims > MAX_ARRAY_DIMS {
            return Err(type_error(text));
        }
        let elem = strip_word(inner[close + 1..].trim_start(), "of").ok_or_else(|| type_error(text))?;
        let elem = parse_type(elem)?;
        return match elem {
            VarType::Array { .. } | VarType::EnumDecl => Err(type_error(text)),
            elem => Ok(VarType::array_of(dims, elem)),
        };
    }

    match text {
        "bool" => Ok(VarType::Bool),
        "int" => Ok(VarType::Int),
        "float" => Ok(VarType::Float),
        "string" => Ok(VarType::Str),
        "enum" => Ok(VarType::EnumDecl),
        _ if text.contains("..") => {
            // Subtype like `1..10` or `0.0..1.0`.
            if text.replace("..", "").contains('.') {
                Ok(VarType::Float)
            } else {
                Ok(VarType::Int)
            }
        }
        _ if is_identifier(text) => Ok(VarType::Enum(text.to_string())),
        _ => Err(type_error(text)),
    }
}

/// Declared types by variable name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VarTypes {
    types: BTreeMap<String, VarType>,
}

impl VarTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, var_type: VarType) -> &mut Self {
        self.types.insert(name.into(), var_type);
        self
    }

    /// Parses `var_type` and records it for `name`.
    pub fn declare(&mut self, name: impl Into<String>, var_type: &str) -> Result<&mut Self, Error> {
        let parsed = var_type.parse::<VarType>()?;
        Ok(self.insert(name, parsed))
    }

    pub fn get(&self, name: &str) -> Option<&VarType> {
        self.types.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Names typed as enum declarations.
    pub fn enum_decls(&self) -> impl Iterator<Item = &str> {
        self.types
            .iter()
            .filter(|(_, var_type)| **var_type == VarType::EnumDecl)
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{VarType, VarTypes};
    use crate::core::error::ErrorKind;

    #[test]
    fn scalar_and_enum_types_parse() {
        assert_eq!("int".parse::<VarType>().expect("int"), VarType::Int);
        assert_eq!("var float".parse::<VarType>().expect("float"), VarType::Float);
        assert_eq!("1..10".parse::<VarType>().expect("subrange"), VarType::Int);
        assert_eq!("0.0..1.0".parse::<VarType>().expect("float range"), VarType::Float);
        assert_eq!("enum".parse::<VarType>().expect("enum"), VarType::EnumDecl);
        assert_eq!(
            "Color".parse::<VarType>().expect("enum name"),
            VarType::Enum("Color".to_string())
        );
    }

    #[test]
    fn compound_types_parse() {
        assert_eq!(
            "set of int".parse::<VarType>().expect("set"),
            VarType::set_of(VarType::Int)
        );
        assert_eq!(
            "array[int, 1..3] of set of Color".parse::<VarType>().expect("array"),
            VarType::array_of(2, VarType::set_of(VarType::Enum("Color".to_string())))
        );
        assert_eq!(
            VarType::array_of(2, VarType::Float).to_string(),
            "array[int, int] of float"
        );
    }

    #[test]
    fn malformed_types_are_usage_errors() {
        for text in ["set of", "array[] of int", "array[int] of array[int] of int", "3x"] {
            let err = text.parse::<VarType>().expect_err(text);
            assert_eq!(err.kind(), ErrorKind::Usage);
        }
        let seven = "array[int, int, int, int, int, int, int] of int";
        assert!(seven.parse::<VarType>().is_err());
    }

    #[test]
    fn var_types_track_enum_declarations() {
        let mut types = VarTypes::new();
        types.declare("Color", "enum").expect("enum");
        types.declare("x", "array[int] of Color").expect("array");
        assert_eq!(types.enum_decls().collect::<Vec<_>>(), vec!["Color"]);
        assert!(matches!(types.get("x"), Some(VarType::Array { dims: 1, .. })));
    }
}
