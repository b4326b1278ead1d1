// src/llm/mod.rs
// Opaque prompt-in/text-out collaborator with per-call timeouts

mod client;
mod ollama;

pub use client::LlmClient;
pub use ollama::OllamaClient;
