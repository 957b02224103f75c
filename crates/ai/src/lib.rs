//! Model-prompt boundary.
//!
//! The orchestration core talks to a language model only through
//! [`ModelClient`]; this crate also owns the prompts the core sends and the
//! parsing of the structured replies it expects back.

#![warn(missing_docs)]

pub mod client;
pub mod command;
pub mod prompt;

pub use client::{ModelClient, PromptRequest, PromptResponse};
pub use command::CommandModel;
pub use prompt::{
    decomposition_prompt, direct_prompt, parse_decomposition, DecompositionParseError, PromptScaffold,
};
