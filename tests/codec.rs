// Codec integration tests: dzn text <-> native values <-> JSON through the public API.
use mznpipe::api::{
    ArrayValue, Assignment, DecodeOptions, EncodeOptions, EnumTable, ErrorKind, Rebase, SetValue,
    Value, VarTypes, assignment_from_json, assignment_to_json, decode, decode_file, decode_str,
    encode_data, encode_statement,
};
use serde_json::json;

#[test]
fn documented_example_decodes() {
    let assignment = decode_str("a = 2; b = {4, 6}; c = 1..3;").expect("decode");
    assert_eq!(assignment.get("a"), Some(&Value::Int(2)));
    assert_eq!(assignment.get("b"), Some(&Value::int_set([4, 6])));
    assert_eq!(assignment.get("c"), Some(&Value::Set(SetValue::range(1, 3))));
}

#[test]
fn encode_then_decode_preserves_values() {
    let mut enums = EnumTable::new();
    let color = enums.declare("Color", ["red", "green", "blue"]).expect("declare");
    let green = enums.case(color, "green").expect("case");

    let mut data = Assignment::new();
    data.insert("n", Value::Int(-4));
    data.insert("ratio", Value::Float(0.25));
    data.insert("name", Value::from("a \"quoted\" name"));
    data.insert("flags", Value::seq([true, false]));
    data.insert("weights", Value::indexed([(0, 1.5), (1, 2.5)]));
    data.insert("favourite", Value::from(green));
    data.insert("grid", Value::seq([Value::seq([1, 2]), Value::seq([3, 4])]));

    let text = encode_data(&data, &enums, EncodeOptions { declare: true }).expect("encode");
    let mut decoded_enums = EnumTable::new();
    let options = DecodeOptions::default().with_rebase(Rebase::Never);
    let decoded = decode(&text, &mut decoded_enums, &options).expect("decode");

    assert_eq!(decoded.get("n"), data.get("n"));
    assert_eq!(decoded.get("ratio"), data.get("ratio"));
    assert_eq!(decoded.get("name"), data.get("name"));
    assert_eq!(decoded.get("weights"), data.get("weights"));
    assert!(decoded_enums.lookup("Color").is_some());
    let favourite = decoded.get("favourite").and_then(Value::as_enum).expect("enum value");
    assert_eq!(decoded_enums.case_name(favourite), Some("green"));
    let grid = decoded.get("grid").and_then(Value::as_array).expect("grid");
    assert_eq!(grid.len(), 2);
}

#[test]
fn declared_statements_carry_types() {
    let enums = EnumTable::new();
    let statement = encode_statement(
        "xs",
        &Value::seq([1.0, 2.0]),
        &enums,
        EncodeOptions { declare: true },
    )
    .expect("encode");
    assert_eq!(statement, "array[1..2] of float: xs = array1d(1..2, [1.0, 2.0]);");
}

#[test]
fn offset_arrays_rebase_only_when_forced() {
    let text = "xs = array1d(0..2, [5, 6, 7]);";
    let auto = decode_str(text).expect("decode");
    match auto.get("xs") {
        Some(Value::Array(ArrayValue::Indexed(items))) => {
            assert_eq!(items.keys().next().copied(), Some(0));
        }
        other => panic!("expected an index-mapped array, got {other:?}"),
    }

    let forced = decode(
        text,
        &mut EnumTable::new(),
        &DecodeOptions::default().with_rebase(Rebase::Force),
    )
    .expect("decode");
    assert_eq!(forced.get("xs"), Some(&Value::seq([5, 6, 7])));
}

#[test]
fn type_hints_promote_ints_to_floats() {
    let mut types = VarTypes::new();
    types.declare("x", "float").expect("type");
    types.declare("s", "set of float").expect("type");
    let assignment = decode(
        "x = 3; s = {1, 2};",
        &mut EnumTable::new(),
        &DecodeOptions::default().with_types(types),
    )
    .expect("decode");
    assert_eq!(assignment.get("x"), Some(&Value::Float(3.0)));
    let set = assignment.get("s").and_then(Value::as_set).expect("set");
    assert!(set.contains(&Value::Float(2.0)));
}

#[test]
fn malformed_documents_report_position_and_fragment() {
    let err = decode_str("a = 1;\nb = {1,;").expect_err("malformed");
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert_eq!(err.line(), Some(2));
    assert!(err.fragment().unwrap_or_default().starts_with("b = {1,"));
}

#[test]
fn decode_file_reports_missing_paths() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = temp.path().join("missing.dzn");
    let err = decode_file(&missing, &mut EnumTable::new(), &DecodeOptions::default())
        .expect_err("missing");
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(err.path(), Some(missing.as_path()));

    let present = temp.path().join("data.dzn");
    std::fs::write(&present, "% header\nn = 5;\n").expect("write");
    let assignment =
        decode_file(&present, &mut EnumTable::new(), &DecodeOptions::default()).expect("decode");
    assert_eq!(assignment.get("n"), Some(&Value::Int(5)));
}

#[test]
fn json_values_follow_the_minizinc_encoding() {
    let mut enums = EnumTable::new();
    enums.declare("Color", ["red", "green"]).expect("declare");
    let json = json!({
        "s": {"set": [[1, 3], 7]},
        "c": {"e": "green"},
        "xs": [1, 2],
        "ys": {"indexed": [[0, true], [1, false]]},
    });
    let assignment = assignment_from_json(&json, &enums, None).expect("from json");
    assert_eq!(assignment.get("s"), Some(&Value::int_set([1, 2, 3, 7])));
    assert_eq!(assignment.get("xs"), Some(&Value::seq([1, 2])));

    let back = assignment_to_json(&assignment, &enums).expect("to json");
    assert_eq!(serde_json::Value::Object(back), json);
}
