//! Purpose: Convert between native values and MiniZinc's JSON value encoding.
//! Exports: `value_to_json`, `assignment_to_json`, `value_from_json`, `assignment_from_json`.
//! Role: Used by JSON output modes of the stream parser and by the CLI.
//! Invariants: Sets are `{"set": [...]}` with `[lo, hi]` runs; enum cases are `{"e": name}`.
//! Invariants: Index-mapped arrays are `{"indexed": [[index, value], ...]}`; sequences are lists.
use serde_json::{Map, Number, json};

use crate::core::decode::truncate_snippet;
use crate::core::error::{Error, ErrorKind};
use crate::core::types::{MAX_ARRAY_DIMS, VarType, VarTypes};
use crate::core::value::{ArrayValue, Assignment, EnumTable, SetValue, Value};

const SNIPPET_MAX: usize = 120;

fn encoding_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Encoding).with_message(message)
}

fn parse_error(message: impl Into<String>, json: &serde_json::Value) -> Error {
    Error::new(ErrorKind::Parse)
        .with_message(message)
        .with_fragment(truncate_snippet(&json.to_string(), SNIPPET_MAX))
}

pub fn value_to_json(value: &Value, enums: &EnumTable) -> Result<serde_json::Value, Error> {
    match value {
        Value::Bool(flag) => Ok(json!(flag)),
        Value::Int(number) => Ok(json!(number)),
        Value::Float(number) => Number::from_f64(*number)
            .map(serde_json::Value::Number)
            .ok_or_else(|| encoding_error(format!("float {number} has no JSON representation"))),
        Value::Str(text) => Ok(json!(text)),
        Value::Enum(case) => enums
            .case_name(*case)
            .map(|name| json!({ "e": name }))
            .ok_or_else(|| encoding_error("enum value references an undeclared enum")),
        Value::Set(set) => set_to_json(set, enums),
        Value::Array(ArrayValue::Seq(items)) => items
            .iter()
            .map(|item| value_to_json(item, enums))
            .collect::<Result<Vec<_>, _>>()
            .map(serde_json::Value::Array),
        Value::Array(ArrayValue::Indexed(items)) => {
            let pairs = items
                .iter()
                .map(|(index, item)| Ok(json!([index, value_to_json(item, enums)?])))
                .collect::<Result<Vec<_>, Error>>()?;
            Ok(json!({ "indexed": pairs }))
        }
    }
}

fn set_to_json(set: &SetValue, enums: &EnumTable) -> Result<serde_json::Value, Error> {
    let mut members = Vec::new();
    let mut run: Option<(i64, i64)> = None;
    for item in set {
        if let Value::Int(number) = item {
            match run {
                Some((lo, hi)) if hi.checked_add(1) == Some(*number) => run = Some((lo, *number)),
                Some(done) => {
                    members.push(run_to_json(done));
                    run = Some((*number, *number));
                }
                None => run = Some((*number, *number)),
            }
            continue;
        }
        if let Some(done) = run.take() {
            members.push(run_to_json(done));
        }
        members.push(value_to_json(item, enums)?);
    }
    if let Some(done) = run {
        members.push(run_to_json(done));
    }
    Ok(json!({ "set": members }))
}

fn run_to_json((lo, hi): (i64, i64)) -> serde_json::Value {
    if lo == hi { json!(lo) } else { json!([lo, hi]) }
}

/// Renders an assignment as a JSON object.
pub fn assignment_to_json(
    assignment: &Assignment,
    enums: &EnumTable,
) -> Result<Map<String, serde_json::Value>, Error> {
    let mut object = Map::new();
    for (name, value) in assignment.iter() {
        object.insert(name.to_string(), value_to_json(value, enums)?);
    }
    Ok(object)
}

/// Reads a JSON object of `name: value` pairs, using declared types when given.
pub fn assignment_from_json(
    json: &serde_json::Value,
    enums: &EnumTable,
    types: Option<&VarTypes>,
) -> Result<Assignment, Error> {
    let object = json
        .as_object()
        .ok_or_else(|| parse_error("expected a JSON object of assignments", json))?;
    let mut assignment = Assignment::new();
    for (name, item) in object {
        let hint = types.and_then(|types| types.get(name));
        let value = value_from_json(item, enums, hint)
            .map_err(|err| err.with_hint(format!("while reading `{name}`")))?;
        assignment.insert(name.clone(), value);
    }
    Ok(assignment)
}

pub fn value_from_json(
    json: &serde_json::Value,
    enums: &EnumTable,
    hint: Option<&VarType>,
) -> Result<Value, Error> {
    match hint {
        Some(VarType::Array { dims, elem }) => array_from_json(json, enums, *dims, Some(&**elem), 1),
        Some(VarType::Set(elem)) => set_from_json(json, enums, Some(&**elem)),
        _ if json.is_array() && hint.is_none() => array_from_json(json, enums, 0, None, 1),
        _ if json.get("indexed").is_some() && hint.is_none() => {
            array_from_json(json, enums, 0, None, 1)
        }
        _ if json.get("set").is_some() && hint.is_none() => set_from_json(json, enums, None),
        _ => scalar_from_json(json, enums, hint),
    }
}

/// `dims == 0` means the nesting depth is inferred from the JSON itself.
fn array_from_json(
    json: &serde_json::Value,
    enums: &EnumTable,
    dims: usize,
    elem: Option<&VarType>,
    depth: usize,
) -> Result<Value, Error> {
    if depth > MAX_ARRAY_DIMS {
        return Err(parse_error(
            format!("arrays support at most {MAX_ARRAY_DIMS} dimensions"),
            json,
        ));
    }
    let child = |item: &serde_json::Value| -> Result<Value, Error> {
        let nested = item.is_array() || item.get("indexed").is_some();
        if (dims == 0 && nested) || depth < dims {
            array_from_json(item, enums, dims, elem, depth + 1)
        } else {
            match elem {
                Some(VarType::Set(inner)) => set_from_json(item, enums, Some(&**inner)),
                None if item.get("set").is_some() => set_from_json(item, enums, None),
                _ => scalar_from_json(item, enums, elem),
            }
        }
    };

    if let Some(items) = json.as_array() {
        return items
            .iter()
            .map(child)
            .collect::<Result<Vec<_>, _>>()
            .map(|items| Value::Array(ArrayValue::Seq(items)));
    }
    let pairs = json
        .get("indexed")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| parse_error("expected a JSON array", json))?;
    let mut entries = std::collections::BTreeMap::new();
    for pair in pairs {
        let (Some(index), Some(item)) = (
            pair.get(0).and_then(serde_json::Value::as_i64),
            pair.get(1),
        ) else {
            return Err(parse_error("indexed entries must be [index, value] pairs", pair));
        };
        entries.insert(index, child(item)?);
    }
    Ok(Value::Array(ArrayValue::Indexed(entries)))
}

fn set_from_json(
    json: &serde_json::Value,
    enums: &EnumTable,
    elem: Option<&VarType>,
) -> Result<Value, Error> {
    let members = json
        .get("set")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| parse_error("expected a {\"set\": [...]} object", json))?;
    let mut items = Vec::new();
    for member in members {
        match member.as_array().map(Vec::as_slice) {
            Some([lo, hi]) => items.extend(range_from_json(lo, hi, enums, elem, member)?),
            Some(_) => return Err(parse_error("set ranges must be [lo, hi] pairs", member)),
            None => items.push(scalar_from_json(member, enums, elem)?),
        }
    }
    SetValue::new(items)
        .map(Value::Set)
        .map_err(|err| parse_error(err.message().unwrap_or("invalid set"), json))
}

fn range_from_json(
    lo: &serde_json::Value,
    hi: &serde_json::Value,
    enums: &EnumTable,
    elem: Option<&VarType>,
    member: &serde_json::Value,
) -> Result<Vec<Value>, Error> {
    if let (Some(lo), Some(hi)) = (lo.as_i64(), hi.as_i64()) {
        if matches!(elem, Some(VarType::Float)) {
            return Err(parse_error("float ranges are not supported", member));
        }
        let span = i128::from(hi) - i128::from(lo) + 1;
        if span > i128::from(crate::core::decode::MAX_RANGE_LEN) {
            return Err(parse_error("set range is too large", member));
        }
        return Ok((lo..=hi).map(Value::Int).collect());
    }
    let (Value::Enum(lo), Value::Enum(hi)) = (
        scalar_from_json(lo, enums, elem)?,
        scalar_from_json(hi, enums, elem)?,
    ) else {
        return Err(parse_error("range bounds must both be integers or enum cases", member));
    };
    if lo.decl() != hi.decl() {
        return Err(parse_error("range spans cases of different enums", member));
    }
    let cases = enums
        .get(lo.decl())
        .map(|decl| decl.cases())
        .unwrap_or_default();
    Ok(cases
        .iter()
        .skip(lo.index())
        .take((hi.index() + 1).saturating_sub(lo.index()))
        .filter_map(|case| enums.case(lo.decl(), case))
        .map(Value::Enum)
        .collect())
}

fn enum_from_name(
    name: &str,
    enums: &EnumTable,
    hint: Option<&VarType>,
    json: &serde_json::Value,
) -> Result<Value, Error> {
    match hint {
        Some(VarType::Enum(enum_name)) => {
            let decl = enums
                .lookup(enum_name)
                .ok_or_else(|| parse_error(format!("enum `{enum_name}` is not declared"), json))?;
            enums.case(decl, name).map(Value::Enum).ok_or_else(|| {
                parse_error(format!("`{name}` is not a case of enum `{enum_name}`"), json)
            })
        }
        None => Ok(enums
            .resolve_case(name)
            .map_or_else(|| Value::Str(name.to_string()), Value::Enum)),
        Some(other) => Err(parse_error(format!("expected {other}, found enum case"), json)),
    }
}

fn scalar_from_json(
    json: &serde_json::Value,
    enums: &EnumTable,
    hint: Option<&VarType>,
) -> Result<Value, Error> {
    let mismatch = |found: &str| match hint {
        Some(expected) => parse_error(format!("expected {expected}, found {found}"), json),
        None => parse_error(format!("unsupported JSON {found}"), json),
    };
    match (json, hint) {
        (serde_json::Value::Bool(flag), None | Some(VarType::Bool)) => Ok(Value::Bool(*flag)),
        (serde_json::Value::Number(number), None | Some(VarType::Int)) if number.is_i64() => {
            Ok(Value::Int(number.as_i64().unwrap_or_default()))
        }
        (serde_json::Value::Number(number), None | Some(VarType::Float)) => number
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| mismatch("number")),
        (serde_json::Value::String(text), None | Some(VarType::Str)) => Ok(Value::Str(text.clone())),
        (serde_json::Value::String(text), Some(VarType::Enum(_))) => {
            enum_from_name(text, enums, hint, json)
        }
        (serde_json::Value::Object(object), _) if object.len() == 1 => {
            match object.get("e").and_then(serde_json::Value::as_str) {
                Some(name) => enum_from_name(name, enums, hint, json),
                None => Err(mismatch("object")),
            }
        }
        (serde_json::Value::Null, _) => Err(mismatch("null")),
        (serde_json::Value::Bool(_), _) => Err(mismatch("bool")),
        (serde_json::Value::Number(_), _) => Err(mismatch("number")),
        (serde_json::Value::String(_), _) => Err(mismatch("string")),
        (serde_json::Value::Array(_), _) => Err(mismatch("array")),
        (serde_json::Value::Object(_), _) => Err(mismatch("object")),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{assignment_from_json, assignment_to_json, value_from_json, value_to_json};
    use crate::core::error::ErrorKind;
    use crate::core::types::{VarType, VarTypes};
    use crate::core::value::{EnumTable, Value};

    #[test]
    fn sets_use_range_runs() {
        let enums = EnumTable::new();
        let json = value_to_json(&Value::int_set([1, 2, 3, 7, 9, 10]), &enums).expect("json");
        assert_eq!(json, json!({ "set": [[1, 3], 7, [9, 10]] }));
        let back = value_from_json(&json, &enums, None).expect("value");
        assert_eq!(back, Value::int_set([1, 2, 3, 7, 9, 10]));
    }

    #[test]
    fn nested_lists_become_sequences() {
        let enums = EnumTable::new();
        let value = value_from_json(&json!([[1, 2], [3, 4]]), &enums, None).expect("value");
        assert_eq!(value, Value::seq([Value::seq([1, 2]), Value::seq([3, 4])]));
    }

    #[test]
    fn indexed_arrays_keep_their_keys() {
        let enums = EnumTable::new();
        let indexed = Value::indexed([(0, 5), (1, 6)]);
        let json = value_to_json(&indexed, &enums).expect("json");
        assert_eq!(json, json!({ "indexed": [[0, 5], [1, 6]] }));
        assert_eq!(value_from_json(&json, &enums, None).expect("value"), indexed);
    }

    #[test]
    fn enum_objects_resolve_against_the_table() {
        let mut enums = EnumTable::new();
        let color = enums.declare("Color", ["red", "green"]).expect("declare");
        let green = enums.case(color, "green").expect("green");
        let value = value_from_json(&json!({ "e": "green" }), &enums, None).expect("value");
        assert_eq!(value, Value::Enum(green));
        assert_eq!(value_to_json(&value, &enums).expect("json"), json!({ "e": "green" }));

        let typed = Some(VarType::Enum("Color".to_string()));
        let err = value_from_json(&json!({ "e": "blue" }), &enums, typed.as_ref())
            .expect_err("unknown case");
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn declared_types_promote_numbers() {
        let mut types = VarTypes::new();
        types.declare("x", "float").expect("type");
        types.declare("grid", "array[int, int] of float").expect("type");
        let enums = EnumTable::new();
        let assignment = assignment_from_json(
            &json!({ "x": 2, "grid": [[1, 2.5]], "n": 4 }),
            &enums,
            Some(&types),
        )
        .expect("assignment");
        assert_eq!(assignment.get("x"), Some(&Value::Float(2.0)));
        assert_eq!(assignment.get("grid"), Some(&Value::seq([Value::seq([1.0, 2.5])])));
        assert_eq!(assignment.get("n"), Some(&Value::Int(4)));
    }

    #[test]
    fn assignments_round_trip_through_json() {
        let enums = EnumTable::new();
        let assignment = [
            ("a", Value::Int(2)),
            ("b", Value::Float(0.5)),
            ("s", Value::from("txt")),
            ("xs", Value::seq([true, false])),
        ]
        .into_iter()
        .collect();
        let object = assignment_to_json(&assignment, &enums).expect("json");
        let back = assignment_from_json(&serde_json::Value::Object(object), &enums, None)
            .expect("assignment");
        assert_eq!(back, assignment);
    }

    #[test]
    fn unsupported_json_is_a_parse_error() {
        let enums = EnumTable::new();
        for bad in [json!(null), json!({ "x": 1, "y": 2 }), json!({ "set": [[1, 2, 3]] })] {
            let err = value_from_json(&bad, &enums, None).expect_err("unsupported");
            assert_eq!(err.kind(), ErrorKind::Parse);
        }
    }
}
