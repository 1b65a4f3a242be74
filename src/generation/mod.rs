//! Generation module
//!
//! Turns a ranked passage set into a cited answer through an
//! OpenRouter-compatible chat-completions endpoint.

pub mod client;
pub mod prompts;
pub mod types;

pub use client::OpenRouterGenerator;
pub use prompts::{LegalPrompt, PromptTemplate};
