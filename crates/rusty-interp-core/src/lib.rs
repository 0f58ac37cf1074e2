//! Core types, config, errors, and the streaming transcript model for Rusty Interpreter.

pub mod config;
pub mod error;
pub mod merge;
pub mod partial_json;
pub mod transcript;
