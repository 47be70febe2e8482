//! CLI commands

pub mod backend;
pub mod ui;
