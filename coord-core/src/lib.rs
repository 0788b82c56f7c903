//! Trigger/action engine for the deterministic fault-injection test
//! coordinator: parses a declarative plan into a DAG of boolean predicates
//! over event notification streams, and fires actions when a DAG is
//! satisfied.
//!
//! This crate has no I/O of its own -- it is driven by `coord-server`, which
//! owns the RPC surface, reads the plan/mask files, and wires instrumented
//! callers' notifications into [`state_machine::StateMachine`].

pub mod action;
pub mod cache;
pub mod context;
pub mod diff;
pub mod error;
pub mod expr;
pub mod graph;
pub mod mask;
pub mod notification;
pub mod plan;
pub mod resource;
pub mod state_machine;
pub mod trigger;
pub mod value;

pub use error::Error;
