//! Purpose: Library crate behind the `mznpipe` CLI: dzn codec, stream parser, solving pipeline.
//! Exports: `api` (stable surface), `core` (codec, parser, isolation), `json`, `pipeline`.
//! Role: Callers embed the pipeline directly; the binary is a thin JSON front-end.
//! Invariants: Prefer `api` paths; inner modules may move between releases.
//! Invariants: Core modules take explicit inputs and hold no global state beyond the token counter.
pub mod api;
pub(crate) mod artifact_paths;
pub mod core;
pub mod json;
pub mod pipeline;
