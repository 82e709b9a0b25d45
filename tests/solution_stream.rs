// Solution-stream integration tests over captured solver output.
use std::io::BufReader;

use mznpipe::api::{
    ErrorKind, ErrorPolicy, OutputMode, ParserConfig, Solution, SolutionParser, Status, Value,
    parse_reader, parse_str,
};

const OPTIMIZATION_RUN: &str = "\
cost = 12;
x = [1, 2, 3];
----------
%%%mzn-stat: nodes=41
cost = 9;
x = [2, 1, 3];
----------
%%%mzn-stat: solveTime=0.014
==========
%%%mzn-stat: failures=17
";

#[test]
fn optimization_run_keeps_every_improvement() {
    let stream = parse_str(OPTIMIZATION_RUN, ParserConfig::new(OutputMode::Dict)).expect("parse");
    assert_eq!(stream.status(), Status::Complete);
    assert_eq!(stream.len(), 2);
    assert_eq!(stream.last().and_then(|best| best.get("cost")), Some(&Value::Int(9)));
    assert_eq!(stream.statistic("nodes"), Some(&serde_json::json!(41)));
    assert_eq!(stream.statistic("solveTime"), Some(&serde_json::json!(0.014)));
    assert_eq!(stream.statistic("failures"), Some(&serde_json::json!(17)));
    assert!(stream.clone().check().is_ok());
}

#[test]
fn captured_file_parses_like_a_string() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("run.out");
    std::fs::write(&path, OPTIMIZATION_RUN).expect("write");
    let file = std::fs::File::open(&path).expect("open");
    let from_file =
        parse_reader(BufReader::new(file), ParserConfig::new(OutputMode::Dict)).expect("parse");
    let from_str = parse_str(OPTIMIZATION_RUN, ParserConfig::new(OutputMode::Dict)).expect("parse");
    assert_eq!(from_file, from_str);
}

#[test]
fn incremental_feeding_yields_at_separators() {
    let mut parser = SolutionParser::new(ParserConfig::new(OutputMode::Dict));
    assert!(parser.feed_line(b"x = 1;\n").expect("line").is_none());
    let solution = parser.feed_line(b"----------\n").expect("separator");
    assert_eq!(
        solution.as_ref().and_then(|solution| solution.get("x")),
        Some(&Value::Int(1))
    );
    assert!(parser.feed_line(b"=====UNKNOWN=====\n").expect("terminator").is_none());
    assert_eq!(parser.status(), Some(Status::Unknown));

    let stream = parser.seal(solution.into_iter().collect());
    let err = stream.check().expect_err("unknown");
    assert_eq!(err.kind(), ErrorKind::Unknown);
    assert_eq!(err.partial().map(|partial| partial.len()), Some(1));
}

#[test]
fn terminal_statuses_map_to_error_kinds() {
    let cases = [
        ("=====UNSATISFIABLE=====", ErrorKind::Unsatisfiable),
        ("=====UNBOUNDED=====", ErrorKind::Unbounded),
        ("=====UNSATorUNBOUNDED=====", ErrorKind::UnsatOrUnbounded),
        ("=====ERROR=====", ErrorKind::Execution),
    ];
    for (terminator, kind) in cases {
        let stream =
            parse_str(&format!("{terminator}\n"), ParserConfig::new(OutputMode::Dict)).expect("parse");
        assert!(stream.is_empty());
        assert_eq!(stream.check().expect_err(terminator).kind(), kind);
    }
}

#[test]
fn skip_policy_reports_dropped_blocks() {
    let text = "x = 1;\n----------\nx = [1,;\n----------\nx = 3;\n----------\n";
    let config = ParserConfig::new(OutputMode::Dict).with_errors(ErrorPolicy::Skip);
    let stream = parse_str(text, config).expect("parse");
    assert_eq!(stream.status(), Status::Incomplete);
    assert_eq!(stream.len(), 2);
    let failure = &stream.skipped()[0];
    assert_eq!(failure.index, 1);
    assert_eq!(failure.line, 3);
    assert!(failure.snippet.contains("x = [1,"));
}

#[test]
fn raw_mode_keeps_block_text() {
    let text = "Solution: 3 queens\n% note\n----------\n==========\n";
    let stream = parse_str(text, ParserConfig::new(OutputMode::Raw)).expect("parse");
    assert_eq!(stream.len(), 1);
    match &stream[0] {
        Solution::Raw(block) => assert!(block.starts_with("Solution: 3 queens")),
        other => panic!("expected raw text, got {other:?}"),
    }
}

#[test]
fn json_stream_records_are_understood() {
    let text = concat!(
        r#"{"type": "solution", "output": {"json": {"x": 4, "s": {"set": [[1, 2]]}}}}"#,
        "\n",
        r#"{"type": "statistics", "statistics": {"nodes": 3}}"#,
        "\n",
        r#"{"type": "status", "status": "OPTIMAL_SOLUTION"}"#,
        "\n",
    );
    let stream = parse_str(text, ParserConfig::new(OutputMode::JsonLines)).expect("parse");
    assert_eq!(stream.len(), 1);
    assert_eq!(stream[0].get("x"), Some(&Value::Int(4)));
    assert_eq!(stream[0].get("s"), Some(&Value::int_set([1, 2])));
    assert_eq!(stream.statistic("nodes"), Some(&serde_json::json!(3)));
    assert_eq!(stream.status(), Status::Complete);
}
