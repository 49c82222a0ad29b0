//! Core modules of the sequencing engine.
//!
//! All engine subsystems and shared primitives live here: the activity tree
//! model, rule evaluation, rollup, the navigation processor, and the
//! persistence layer behind them.

pub mod broker;
pub mod config;
pub mod course;
pub mod db;
pub mod error;
pub mod lrs;
pub mod nav;
pub mod rollup;
pub mod rules;
pub mod schemas;
pub mod session;
pub mod state;
pub mod store;
pub mod time;
pub mod tree;
