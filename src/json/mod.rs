//! Purpose: JSON boundary for solver records and native value conversion.
//! Exports: `convert` (value <-> JSON); `parse` stays crate-internal.
//! Role: Single seam for serde_json usage so callsites avoid ad hoc decode logic.
//! Invariants: Solver JSON is parsed only through `parse`; value mapping only through `convert`.

pub mod convert;
pub(crate) mod parse;
