//! Purpose: Decode JSON text and `--json-stream` records.
//! Exports: `from_str`, `StreamRecord`, `SolutionOutput`.
//! Role: Parser boundary that centralizes serde_json usage for the stream parser and CLI.
//! Invariants: Unknown record types decode to `StreamRecord::Other` instead of failing.
//! Notes: Error mapping is done by callsites so domain context stays explicit.
use serde::Deserialize;
use serde::de::DeserializeOwned;

pub(crate) fn from_str<T: DeserializeOwned>(input: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(input)
}

/// One line of solver output in JSON-lines mode.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum StreamRecord {
    Solution {
        output: SolutionOutput,
    },
    Status {
        status: String,
    },
    Statistics {
        #[serde(default)]
        statistics: serde_json::Map<String, serde_json::Value>,
    },
    Error {
        #[serde(default)]
        what: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SolutionOutput {
    #[serde(default)]
    pub(crate) json: Option<serde_json::Value>,
    #[serde(default)]
    pub(crate) dzn: Option<String>,
    #[serde(default)]
    pub(crate) raw: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{StreamRecord, from_str};

    #[test]
    fn records_decode_by_type_tag() {
        let solution: StreamRecord =
            from_str(r#"{"type":"solution","output":{"json":{"x":1}},"time":3}"#).expect("solution");
        assert!(matches!(solution, StreamRecord::Solution { output } if output.json.is_some()));

        let status: StreamRecord =
            from_str(r#"{"type":"status","status":"OPTIMAL_SOLUTION"}"#).expect("status");
        assert!(matches!(status, StreamRecord::Status { status } if status == "OPTIMAL_SOLUTION"));

        let comment: StreamRecord = from_str(r#"{"type":"comment","comment":"hi"}"#).expect("other");
        assert!(matches!(comment, StreamRecord::Other));
    }
}
