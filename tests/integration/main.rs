//! End-to-end behavior of the hierarchical encoder.

#[path = "../common/mod.rs"]
mod common;

mod end_to_end;
mod invariants;
mod training;
