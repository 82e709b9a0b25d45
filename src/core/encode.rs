//! Purpose: Serialize native values into dzn statements.
//! Exports: `EncodeOptions`, `encode_value`, `encode_statement`, `encode_enum`, `encode_assignment`, `encode_data`, `infer_type`.
//! Role: Write half of the codec; output is what the flattening collaborator reads.
//! Invariants: Output is deterministic: sets ascend, arrays flatten row-major.
//! Invariants: Arrays must be rectangular with contiguous index-sets and at most 6 dimensions.
//! Invariants: Floats always carry a decimal point; non-finite floats are rejected.
use std::collections::BTreeSet;

use crate::core::error::{Error, ErrorKind};
use crate::core::types::MAX_ARRAY_DIMS;
use crate::core::value::{
    ArrayValue, Assignment, EnumDecl, EnumId, EnumTable, SetValue, Value, is_identifier,
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EncodeOptions {
    /// Prefix each statement with its inferred type (`int: x = 3;`).
    pub declare: bool,
}

type IndexSet = (i64, i64);

fn encoding_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Encoding).with_message(message)
}

/// Renders a single value without a statement wrapper.
pub fn encode_value(value: &Value, enums: &EnumTable) -> Result<String, Error> {
    match value {
        Value::Set(set) => render_set(set, enums),
        Value::Array(array) => render_array(array, enums),
        scalar => render_scalar(scalar, enums),
    }
}

/// Renders `name = value;`, optionally with a leading type declaration.
pub fn encode_statement(
    name: &str,
    value: &Value,
    enums: &EnumTable,
    options: EncodeOptions,
) -> Result<String, Error> {
    if !is_identifier(name) {
        return Err(encoding_error(format!("`{name}` is not a valid variable name")));
    }
    let rendered = encode_value(value, enums)?;
    if options.declare {
        let var_type = infer_type(value, enums)?;
        Ok(format!("{var_type}: {name} = {rendered};"))
    } else {
        Ok(format!("{name} = {rendered};"))
    }
}

/// Renders an enum declaration statement (`Color = {red, green};`).
pub fn encode_enum(decl: &EnumDecl, options: EncodeOptions) -> String {
    let keyword = if options.declare { "enum " } else { "" };
    format!("{keyword}{} = {{{}}};", decl.name(), decl.cases().join(", "))
}

/// Encodes every entry in insertion order. Each enum referenced by a value is
/// declared once, just before its first use.
pub fn encode_assignment(
    assignment: &Assignment,
    enums: &EnumTable,
    options: EncodeOptions,
) -> Result<Vec<String>, Error> {
    let mut statements = Vec::with_capacity(assignment.len());
    let mut declared = BTreeSet::new();
    for (name, value) in assignment.iter() {
        let mut used = BTreeSet::new();
        collect_enums(value, &mut used);
        for id in used {
            if declared.insert(id) {
                let decl = enums.get(id).ok_or_else(|| {
                    encoding_error(format!("value of `{name}` references an undeclared enum"))
                })?;
                statements.push(encode_enum(decl, options));
            }
        }
        statements.push(encode_statement(name, value, enums, options)?);
    }
    Ok(statements)
}

/// Encodes an assignment as one dzn document, one statement per line.
pub fn encode_data(
    assignment: &Assignment,
    enums: &EnumTable,
    options: EncodeOptions,
) -> Result<String, Error> {
    Ok(encode_assignment(assignment, enums, options)?.join("\n"))
}

fn collect_enums(value: &Value, used: &mut BTreeSet<EnumId>) {
    match value {
        Value::Enum(case) => {
            used.insert(case.decl());
        }
        Value::Set(set) => set.iter().for_each(|item| collect_enums(item, used)),
        Value::Array(array) => array.values().for_each(|item| collect_enums(item, used)),
        _ => {}
    }
}

/// dzn type of a value, as used in declarations.
pub fn infer_type(value: &Value, enums: &EnumTable) -> Result<String, Error> {
    match value {
        Value::Bool(_) => Ok("bool".to_string()),
        Value::Int(_) => Ok("int".to_string()),
        Value::Float(_) => Ok("float".to_string()),
        Value::Str(_) => Ok("string".to_string()),
        Value::Enum(case) => enums
            .get(case.decl())
            .map(|decl| decl.name().to_string())
            .ok_or_else(|| encoding_error("enum value references an undeclared enum")),
        Value::Set(set) => {
            let first = set
                .iter()
                .next()
                .ok_or_else(|| encoding_error("cannot infer the type of an empty set"))?;
            Ok(format!("set of {}", infer_type(first, enums)?))
        }
        Value::Array(array) => {
            let index_sets = index_sets(array, 1)?;
            if index_sets.is_empty() {
                return Err(encoding_error("cannot infer the type of an empty array"));
            }
            let mut element = value;
            for _ in 0..index_sets.len() {
                element = match element {
                    Value::Array(inner) => inner
                        .values()
                        .next()
                        .ok_or_else(|| encoding_error("cannot infer the type of an empty array"))?,
                    other => other,
                };
            }
            Ok(format!(
                "array[{}] of {}",
                render_index_sets(&index_sets),
                infer_type(element, enums)?
            ))
        }
    }
}

fn render_scalar(value: &Value, enums: &EnumTable) -> Result<String, Error> {
    match value {
        Value::Bool(flag) => Ok(if *flag { "true" } else { "false" }.to_string()),
        Value::Int(number) => Ok(number.to_string()),
        Value::Float(number) => render_float(*number),
        Value::Str(text) => Ok(quote(text)),
        Value::Enum(case) => enums
            .case_name(*case)
            .map(str::to_string)
            .ok_or_else(|| encoding_error("enum value references an undeclared enum")),
        Value::Set(_) | Value::Array(_) => Err(encoding_error(format!(
            "{} is not a scalar value",
            value.kind_name()
        ))),
    }
}

fn render_float(number: f64) -> Result<String, Error> {
    if !number.is_finite() {
        return Err(encoding_error(format!("float {number} has no dzn representation")));
    }
    let mut text = number.to_string();
    if !text.contains('.') {
        text.push_str(".0");
    }
    Ok(text)
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn render_set(set: &SetValue, enums: &EnumTable) -> Result<String, Error> {
    if let Some((lo, hi)) = set.contiguous_range() {
        return Ok(format!("{lo}..{hi}"));
    }
    let items = set
        .iter()
        .map(|item| render_scalar(item, enums))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("{{{}}}", items.join(", ")))
}

fn render_element(value: &Value, enums: &EnumTable) -> Result<String, Error> {
    match value {
        Value::Set(set) => render_set(set, enums),
        other => render_scalar(other, enums),
    }
}

fn render_index_sets(index_sets: &[IndexSet]) -> String {
    index_sets
        .iter()
        .map(|(lo, hi)| format!("{lo}..{hi}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_array(array: &ArrayValue, enums: &EnumTable) -> Result<String, Error> {
    let index_sets = index_sets(array, 1)?;
    if index_sets.is_empty() {
        return Ok("array1d({}, [])".to_string());
    }
    let mut flat = Vec::new();
    flatten(array, index_sets.len(), &mut flat);
    let items = flat
        .into_iter()
        .map(|item| render_element(item, enums))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!(
        "array{}d({}, [{}])",
        index_sets.len(),
        render_index_sets(&index_sets),
        items.join(", ")
    ))
}

fn flatten<'a>(array: &'a ArrayValue, dims: usize, out: &mut Vec<&'a Value>) {
    for item in array.values() {
        match item {
            Value::Array(inner) if dims > 1 => flatten(inner, dims - 1, out),
            leaf => out.push(leaf),
        }
    }
}

fn bounds(array: &ArrayValue) -> Result<IndexSet, Error> {
    match array {
        ArrayValue::Seq(items) => Ok((1, items.len() as i64)),
        ArrayValue::Indexed(items) => {
            let (Some(lo), Some(hi)) = (items.keys().next(), items.keys().next_back()) else {
                return Err(encoding_error("empty array has no index set"));
            };
            let span = i128::from(*hi) - i128::from(*lo) + 1;
            if span != items.len() as i128 {
                return Err(encoding_error(format!(
                    "array indices {lo}..{hi} are not contiguous ({} entries)",
                    items.len()
                )));
            }
            Ok((*lo, *hi))
        }
    }
}

/// Index-set of every dimension, outermost first; empty for an empty array.
fn index_sets(array: &ArrayValue, depth: usize) -> Result<Vec<IndexSet>, Error> {
    if depth > MAX_ARRAY_DIMS {
        return Err(encoding_error(format!(
            "arrays support at most {MAX_ARRAY_DIMS} dimensions"
        )));
    }
    if array.is_empty() {
        return Ok(Vec::new());
    }
    let own = bounds(array)?;

    let nested = array
        .values()
        .filter(|item| matches!(item, Value::Array(_)))
        .count();
    if nested == 0 {
        return Ok(vec![own]);
    }
    if nested != array.len() {
        return Err(encoding_error(
            "array mixes nested arrays with plain elements",
        ));
    }

    let mut child_sets: Option<Vec<IndexSet>> = None;
    for item in array.values() {
        let Value::Array(inner) = item else {
            continue;
        };
        let sets = index_sets(inner, depth + 1)?;
        if sets.is_empty() {
            return Err(encoding_error("nested arrays must not be empty"));
        }
        match &child_sets {
            None => child_sets = Some(sets),
            Some(expected) if *expected == sets => {}
            Some(expected) => {
                return Err(encoding_error(format!(
                    "array is not rectangular: child index sets [{}] and [{}] differ",
                    render_index_sets(expected),
                    render_index_sets(&sets)
                )));
            }
        }
    }

    let mut sets = vec![own];
    sets.extend(child_sets.unwrap_or_default());
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::{EncodeOptions, encode_assignment, encode_statement, encode_value, infer_type};
    use crate::core::error::ErrorKind;
    use crate::core::value::{Assignment, EnumTable, SetValue, Value};

    fn encode(value: &Value) -> String {
        encode_value(value, &EnumTable::new()).expect("encode")
    }

    fn nested(depth: usize) -> Value {
        let mut value = Value::seq([1, 2]);
        for _ in 1..depth {
            value = Value::seq([value.clone(), value]);
        }
        value
    }

    #[test]
    fn scalars_render_as_dzn_literals() {
        assert_eq!(encode(&Value::Int(-4)), "-4");
        assert_eq!(encode(&Value::Float(2.0)), "2.0");
        assert_eq!(encode(&Value::Float(0.125)), "0.125");
        assert_eq!(encode(&Value::Bool(true)), "true");
        assert_eq!(encode(&Value::from("a \"b\" \\c")), r#""a \"b\" \\c""#);
    }

    #[test]
    fn non_finite_floats_are_rejected() {
        let err = encode_value(&Value::Float(f64::NAN), &EnumTable::new()).expect_err("nan");
        assert_eq!(err.kind(), ErrorKind::Encoding);
    }

    #[test]
    fn contiguous_sets_use_range_literals() {
        assert_eq!(encode(&Value::int_set([1, 2, 3, 4, 5])), "1..5");
        assert_eq!(encode(&Value::int_set([5, 3, 1])), "{1, 3, 5}");
        assert_eq!(encode(&Value::Set(SetValue::default())), "{}");
    }

    #[test]
    fn indexed_array_keeps_its_bounds() {
        let statement = encode_statement(
            "a",
            &Value::indexed([(1, 2), (2, 4), (3, 6)]),
            &EnumTable::new(),
            EncodeOptions::default(),
        )
        .expect("encode");
        assert_eq!(statement, "a = array1d(1..3, [2, 4, 6]);");

        let shifted = Value::indexed([(0, Value::seq([1, 2])), (1, Value::seq([3, 4]))]);
        assert_eq!(encode(&shifted), "array2d(0..1, 1..2, [1, 2, 3, 4])");
    }

    #[test]
    fn empty_array_has_empty_index_set() {
        assert_eq!(encode(&Value::seq(Vec::<Value>::new())), "array1d({}, [])");
    }

    #[test]
    fn ragged_arrays_are_rejected() {
        let ragged = Value::seq([Value::seq([1, 2]), Value::seq([3])]);
        let err = encode_value(&ragged, &EnumTable::new()).expect_err("ragged");
        assert_eq!(err.kind(), ErrorKind::Encoding);

        let mixed = Value::seq([Value::seq([1]), Value::Int(2)]);
        assert!(encode_value(&mixed, &EnumTable::new()).is_err());

        let gap = Value::indexed([(1, 1), (3, 3)]);
        assert!(encode_value(&gap, &EnumTable::new()).is_err());
    }

    #[test]
    fn depth_limit_is_six_dimensions() {
        let six = encode(&nested(6));
        assert!(six.starts_with("array6d(1..2, 1..2, 1..2, 1..2, 1..2, 1..2, ["));

        let err = encode_value(&nested(7), &EnumTable::new()).expect_err("too deep");
        assert_eq!(err.kind(), ErrorKind::Encoding);
    }

    #[test]
    fn sets_inside_arrays_render_inline() {
        let value = Value::seq([Value::int_set([1, 2]), Value::int_set([1, 4])]);
        assert_eq!(encode(&value), "array1d(1..2, [1..2, {1, 4}])");
    }

    #[test]
    fn assignment_declares_enums_before_use() {
        let mut enums = EnumTable::new();
        let color = enums.declare("Color", ["red", "green"]).expect("declare");
        let green = enums.case(color, "green").expect("green");
        let red = enums.case(color, "red").expect("red");

        let mut data = Assignment::new();
        data.insert("n", Value::Int(2));
        data.insert("c", Value::Enum(green));
        data.insert("cs", Value::seq([red, green]));

        let statements =
            encode_assignment(&data, &enums, EncodeOptions::default()).expect("encode");
        assert_eq!(
            statements,
            vec![
                "n = 2;".to_string(),
                "Color = {red, green};".to_string(),
                "c = green;".to_string(),
                "cs = array1d(1..2, [red, green]);".to_string(),
            ]
        );
    }

    #[test]
    fn declarations_carry_inferred_types() {
        let options = EncodeOptions { declare: true };
        let enums = EnumTable::new();
        let grid = Value::seq([Value::seq([1.5, 2.5])]);
        assert_eq!(
            encode_statement("g", &grid, &enums, options).expect("encode"),
            "array[1..1, 1..2] of float: g = array2d(1..1, 1..2, [1.5, 2.5]);"
        );
        assert_eq!(
            infer_type(&Value::int_set([3, 9]), &enums).expect("type"),
            "set of int"
        );
        assert!(infer_type(&Value::Set(SetValue::default()), &enums).is_err());
    }

    #[test]
    fn invalid_names_are_rejected() {
        let err = encode_statement("1x", &Value::Int(1), &EnumTable::new(), EncodeOptions::default())
            .expect_err("bad name");
        assert_eq!(err.kind(), ErrorKind::Encoding);
    }
}
