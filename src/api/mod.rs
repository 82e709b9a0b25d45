//! Purpose: Define the stable public Rust API boundary for mznpipe.
//! Exports: Value model, codec entry points, stream parser, and pipeline types.
//! Role: Public, additive-only surface used by the CLI and embedders.
//! Invariants: Everything the CLI needs is reachable from here.
//! Invariants: Additions only; renames go through a deprecation cycle.

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::decode::{DecodeOptions, decode, decode_file, decode_str, decode_value};
pub use crate::core::encode::{
    EncodeOptions, encode_assignment, encode_data, encode_enum, encode_statement, encode_value,
    infer_type,
};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::isolation::{
    ArtifactGuard, ArtifactKind, ArtifactSet, CleanupPolicy, Token, TokenSource, next_token,
};
pub use crate::core::parser::{
    ErrorPolicy, OutputMode, ParserConfig, SolutionParser, parse_reader, parse_reader_with,
    parse_str,
};
pub use crate::core::rebase::{Rebase, rebase_assignment, rebase_value};
pub use crate::core::solution::{BlockFailure, Solution, SolutionStream, Status};
pub use crate::core::types::{VarType, VarTypes};
pub use crate::core::value::{
    ArrayValue, Assignment, EnumCase, EnumDecl, EnumId, EnumTable, SetValue, Value,
};
pub use crate::json::convert::{
    assignment_from_json, assignment_to_json, value_from_json, value_to_json,
};
pub use crate::pipeline::{
    AsyncSolutions, CancelHandle, FlattenJob, Instance, MiniZinc, ModelSource, Pipeline,
    PipelineConfig, SolveJob, SolveOptions, Solutions, Toolchain,
};
