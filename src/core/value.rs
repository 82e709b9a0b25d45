//! Purpose: Native value model for dzn data: scalars, sets, arrays, enums, assignments.
//! Exports: `Value`, `SetValue`, `ArrayValue`, `EnumTable`, `EnumDecl`, `EnumId`, `EnumCase`, `Assignment`.
//! Role: Closed tagged variant consumed by the encoder and produced by the decoders.
//! Invariants: `SetValue` members are scalars, sorted ascending and de-duplicated.
//! Invariants: Enum values are index pairs into an `EnumTable`; they never own their declaration.
//! Invariants: `Assignment` names are unique and keep insertion order.
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Enum(EnumCase),
    Set(SetValue),
    Array(ArrayValue),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Enum(_) => "enum",
            Value::Set(_) => "set",
            Value::Array(_) => "array",
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Set(_) | Value::Array(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<EnumCase> {
        match self {
            Value::Enum(case) => Some(*case),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&SetValue> {
        match self {
            Value::Set(set) => Some(set),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Builds a 1-based sequence array from anything convertible to values.
    pub fn seq<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Value::Array(ArrayValue::Seq(items.into_iter().map(Into::into).collect()))
    }

    /// Builds an explicitly indexed array.
    pub fn indexed<T: Into<Value>>(items: impl IntoIterator<Item = (i64, T)>) -> Self {
        Value::Array(ArrayValue::Indexed(
            items
                .into_iter()
                .map(|(index, item)| (index, item.into()))
                .collect(),
        ))
    }

    pub fn int_set(items: impl IntoIterator<Item = i64>) -> Self {
        Value::Set(SetValue::from_ints(items))
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) => 1,
            Value::Float(_) => 2,
            Value::Str(_) => 3,
            Value::Enum(_) => 4,
            Value::Set(_) => 5,
            Value::Array(_) => 6,
        }
    }

    fn scalar_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Enum(a), Value::Enum(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<EnumCase> for Value {
    fn from(value: EnumCase) -> Self {
        Value::Enum(value)
    }
}

impl From<SetValue> for Value {
    fn from(value: SetValue) -> Self {
        Value::Set(value)
    }
}

impl From<ArrayValue> for Value {
    fn from(value: ArrayValue) -> Self {
        Value::Array(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::seq(items)
    }
}

/// Set of scalars kept in canonical (ascending, unique) order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SetValue {
    items: Vec<Value>,
}

impl SetValue {
    pub fn new(items: impl IntoIterator<Item = Value>) -> Result<Self, Error> {
        let mut items = items.into_iter().collect::<Vec<_>>();
        if let Some(bad) = items.iter().find(|item| !item.is_scalar()) {
            return Err(Error::new(ErrorKind::Encoding)
                .with_message(format!("set members must be scalars, found {}", bad.kind_name())));
        }
        items.sort_by(Value::scalar_cmp);
        items.dedup_by(|a, b| a.scalar_cmp(b) == Ordering::Equal);
        Ok(Self { items })
    }

    pub fn from_ints(items: impl IntoIterator<Item = i64>) -> Self {
        let mut ints = items.into_iter().collect::<Vec<_>>();
        ints.sort_unstable();
        ints.dedup();
        Self {
            items: ints.into_iter().map(Value::Int).collect(),
        }
    }

    pub fn range(lo: i64, hi: i64) -> Self {
        if lo > hi {
            return Self::default();
        }
        Self::from_ints(lo..=hi)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.items
            .binary_search_by(|item| item.scalar_cmp(value))
            .is_ok()
    }

    /// Returns `(lo, hi)` when the set is a non-empty run of consecutive integers.
    pub fn contiguous_range(&self) -> Option<(i64, i64)> {
        let first = self.items.first()?.as_int()?;
        let last = self.items.last()?.as_int()?;
        if !self.items.iter().all(|item| matches!(item, Value::Int(_))) {
            return None;
        }
        let span = i128::from(last) - i128::from(first) + 1;
        (span == self.items.len() as i128).then_some((first, last))
    }
}

impl<'a> IntoIterator for &'a SetValue {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Array storage: a 1-based native sequence, or an explicit integer index map.
#[derive(Clone, Debug, PartialEq)]
pub enum ArrayValue {
    Seq(Vec<Value>),
    Indexed(BTreeMap<i64, Value>),
}

impl ArrayValue {
    pub fn len(&self) -> usize {
        match self {
            ArrayValue::Seq(items) => items.len(),
            ArrayValue::Indexed(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up an element by its dzn index (1-based for sequences).
    pub fn get(&self, index: i64) -> Option<&Value> {
        match self {
            ArrayValue::Seq(items) => usize::try_from(index - 1)
                .ok()
                .and_then(|offset| items.get(offset)),
            ArrayValue::Indexed(items) => items.get(&index),
        }
    }

    pub fn values(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            ArrayValue::Seq(items) => Box::new(items.iter()),
            ArrayValue::Indexed(items) => Box::new(items.values()),
        }
    }

    /// Index keys in ascending order.
    pub fn keys(&self) -> Vec<i64> {
        match self {
            ArrayValue::Seq(items) => (1..=items.len() as i64).collect(),
            ArrayValue::Indexed(items) => items.keys().copied().collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct EnumId(usize);

/// One enum case: the declaration it belongs to and its 0-based position.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct EnumCase {
    decl: EnumId,
    index: usize,
}

impl EnumCase {
    pub fn decl(&self) -> EnumId {
        self.decl
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// 1-based ordinal, as MiniZinc numbers enum cases.
    pub fn ordinal(&self) -> i64 {
        self.index as i64 + 1
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnumDecl {
    name: String,
    cases: Vec<String>,
}

impl EnumDecl {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cases(&self) -> &[String] {
        &self.cases
    }
}

/// Enum declarations known to one model/session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnumTable {
    decls: Vec<EnumDecl>,
}

impl EnumTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a declaration. Re-declaring an identical enum returns the existing id.
    pub fn declare<S: Into<String>>(
        &mut self,
        name: impl Into<String>,
        cases: impl IntoIterator<Item = S>,
    ) -> Result<EnumId, Error> {
        let name = name.into();
        let cases = cases.into_iter().map(Into::into).collect::<Vec<String>>();
        if !is_identifier(&name) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid enum name `{name}`")));
        }
        if let Some(id) = self.lookup(&name) {
            if self.decls[id.0].cases == cases {
                return Ok(id);
            }
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("enum `{name}` is already declared with different cases")));
        }
        for (position, case) in cases.iter().enumerate() {
            if !is_identifier(case) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("invalid case `{case}` in enum `{name}`")));
            }
            if cases[..position].contains(case) || self.resolve_case(case).is_some() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("enum case `{case}` is declared more than once")));
            }
        }
        self.decls.push(EnumDecl { name, cases });
        Ok(EnumId(self.decls.len() - 1))
    }

    pub fn get(&self, id: EnumId) -> Option<&EnumDecl> {
        self.decls.get(id.0)
    }

    pub fn lookup(&self, name: &str) -> Option<EnumId> {
        self.decls
            .iter()
            .position(|decl| decl.name == name)
            .map(EnumId)
    }

    /// Finds `case` inside the enum `decl`.
    pub fn case(&self, decl: EnumId, case: &str) -> Option<EnumCase> {
        let index = self.get(decl)?.cases.iter().position(|name| name == case)?;
        Some(EnumCase { decl, index })
    }

    /// Finds `case` in any declared enum; case names are unique across the table.
    pub fn resolve_case(&self, case: &str) -> Option<EnumCase> {
        self.decls.iter().enumerate().find_map(|(decl, entry)| {
            entry
                .cases
                .iter()
                .position(|name| name == case)
                .map(|index| EnumCase {
                    decl: EnumId(decl),
                    index,
                })
        })
    }

    pub fn case_name(&self, case: EnumCase) -> Option<&str> {
        self.get(case.decl)?
            .cases
            .get(case.index)
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EnumId, &EnumDecl)> {
        self.decls
            .iter()
            .enumerate()
            .map(|(index, decl)| (EnumId(index), decl))
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

pub(crate) fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Variable assignments of one statement block, in insertion order.
#[derive(Clone, Debug, Default)]
pub struct Assignment {
    entries: Vec<(String, Value)>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `name`, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(key, _)| *key == name) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.entries.push((name, value));
        None
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let position = self.entries.iter().position(|(key, _)| key == name)?;
        Some(self.entries.remove(position).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Value)> {
        self.entries
            .iter_mut()
            .map(|(key, value)| (key.as_str(), value))
    }
}

// Order of entries does not matter for equality.
impl PartialEq for Assignment {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(name, value)| other.get(name) == Some(value))
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Assignment {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut assignment = Assignment::new();
        for (name, value) in iter {
            assignment.insert(name, value);
        }
        assignment
    }
}

impl IntoIterator for Assignment {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{ArrayValue, Assignment, EnumTable, SetValue, Value};
    use crate::core::error::ErrorKind;

    #[test]
    fn sets_are_canonical_and_order_independent() {
        let a = SetValue::from_ints([5, 1, 3, 1]);
        let b = SetValue::from_ints([1, 3, 5]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert!(a.contains(&Value::Int(3)));
        assert!(!a.contains(&Value::Int(2)));
    }

    #[test]
    fn contiguous_range_detection() {
        assert_eq!(SetValue::from_ints(1..=5).contiguous_range(), Some((1, 5)));
        assert_eq!(SetValue::from_ints([1, 3, 5]).contiguous_range(), None);
        assert_eq!(SetValue::default().contiguous_range(), None);
        let floats = SetValue::new([Value::Float(1.0), Value::Float(2.0)]).expect("set");
        assert_eq!(floats.contiguous_range(), None);
    }

    #[test]
    fn set_rejects_nested_collections() {
        let err = SetValue::new([Value::int_set([1])]).expect_err("nested set");
        assert_eq!(err.kind(), ErrorKind::Encoding);
    }

    #[test]
    fn enum_table_resolves_cases_by_index() {
        let mut table = EnumTable::new();
        let color = table.declare("Color", ["red", "green", "blue"]).expect("declare");
        let green = table.case(color, "green").expect("case");
        assert_eq!(green.ordinal(), 2);
        assert_eq!(table.case_name(green), Some("green"));
        assert_eq!(table.resolve_case("blue").map(|case| case.index()), Some(2));
        assert_eq!(table.declare("Color", ["red", "green", "blue"]).expect("same"), color);
    }

    #[test]
    fn enum_table_rejects_shared_case_names() {
        let mut table = EnumTable::new();
        table.declare("Color", ["red", "green"]).expect("declare");
        let err = table.declare("Light", ["red", "amber"]).expect_err("duplicate case");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn assignment_equality_ignores_order() {
        let a: Assignment = [("x", Value::Int(1)), ("y", Value::Bool(true))]
            .into_iter()
            .collect();
        let b: Assignment = [("y", Value::Bool(true)), ("x", Value::Int(1))]
            .into_iter()
            .collect();
        assert_eq!(a, b);
        assert_eq!(a.names().collect::<Vec<_>>(), vec!["x", "y"]);
    }

    #[test]
    fn array_lookup_uses_dzn_indices() {
        let seq = ArrayValue::Seq(vec![Value::Int(7), Value::Int(8)]);
        assert_eq!(seq.get(1), Some(&Value::Int(7)));
        assert_eq!(seq.get(0), None);
        let Value::Array(indexed) = Value::indexed([(0, 4), (1, 5)]) else {
            panic!("array");
        };
        assert_eq!(indexed.get(0), Some(&Value::Int(4)));
        assert_eq!(indexed.keys(), vec![0, 1]);
    }
}
