//! Purpose: Collapse decoded index-mapped arrays into native nested sequences.
//! Exports: `Rebase`, `rebase_value`, `rebase_assignment`, `is_one_based`.
//! Role: Post-processing step applied by the decoders after an array is built.
//! Invariants: `Auto` only rewrites arrays whose every dimension starts at 1 (lossless).
//! Invariants: `Force` renumbers every dimension from 1 and drops the original index-sets.
//! Invariants: Rebasing an array already in sequence form is a no-op.
use crate::core::value::{ArrayValue, Assignment, Value};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Rebase {
    /// Sequence form when every dimension is 1-based, index map otherwise.
    #[default]
    Auto,
    /// Always sequence form; original index-sets are discarded.
    Force,
    /// Always index-map form.
    Never,
}

/// Applies `mode` to every array inside `value`.
pub fn rebase_value(value: Value, mode: Rebase) -> Value {
    match value {
        Value::Array(array) => Value::Array(rebase_array(array, mode)),
        other => other,
    }
}

pub fn rebase_assignment(assignment: &mut Assignment, mode: Rebase) {
    for (_, value) in assignment.iter_mut() {
        let taken = std::mem::replace(value, Value::Bool(false));
        *value = rebase_value(taken, mode);
    }
}

fn rebase_array(array: ArrayValue, mode: Rebase) -> ArrayValue {
    match mode {
        Rebase::Auto if is_one_based(&array) => into_seq(array),
        Rebase::Auto => array,
        Rebase::Force => into_seq(array),
        Rebase::Never => into_indexed(array),
    }
}

/// True when the array and every nested array start at index 1 with no gaps.
pub fn is_one_based(array: &ArrayValue) -> bool {
    let own = match array {
        ArrayValue::Seq(_) => true,
        ArrayValue::Indexed(items) => items
            .keys()
            .enumerate()
            .all(|(offset, key)| *key == offset as i64 + 1),
    };
    own && array.values().all(|item| match item {
        Value::Array(inner) => is_one_based(inner),
        _ => true,
    })
}

fn into_seq(array: ArrayValue) -> ArrayValue {
    let items = match array {
        ArrayValue::Seq(items) => items,
        ArrayValue::Indexed(items) => items.into_values().collect(),
    };
    ArrayValue::Seq(items.into_iter().map(seq_child).collect())
}

fn seq_child(value: Value) -> Value {
    match value {
        Value::Array(inner) => Value::Array(into_seq(inner)),
        other => other,
    }
}

fn into_indexed(array: ArrayValue) -> ArrayValue {
    let entries = match array {
        ArrayValue::Indexed(items) => items.into_iter().collect::<Vec<_>>(),
        ArrayValue::Seq(items) => (1..).zip(items).collect(),
    };
    ArrayValue::Indexed(
        entries
            .into_iter()
            .map(|(index, value)| match value {
                Value::Array(inner) => (index, Value::Array(into_indexed(inner))),
                other => (index, other),
            })
            .collect(),
    )
}
