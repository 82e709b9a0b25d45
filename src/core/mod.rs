// Core modules: value model, dzn codec, solution-stream parsing, and invocation isolation.
pub mod decode;
pub mod encode;
pub mod error;
pub mod isolation;
pub mod parser;
pub mod rebase;
pub mod solution;
pub mod types;
pub mod value;
