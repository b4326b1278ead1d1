// src/hooks/mod.rs
// Coding-assistant hook handlers. Hooks are ephemeral subprocesses: they
// read one JSON payload from stdin, do their work, and must never block or
// fail the host assistant.

pub mod turn;
