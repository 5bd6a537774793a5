//! LLM request pipeline: prompt assembly, streaming, tool-call round-trips.
//! Split into a library so integration tests can exercise [`service`]
//! against a real (loopback) MQTT broker, the same way `main.rs` wires it.

pub mod character;
pub mod config;
pub mod models;
pub mod prompt;
pub mod provider;
pub mod rag;
pub mod service;
pub mod tools;
