//! Memory/RAG query service: embedding, hybrid retrieval, character
//! ownership. Split into a library so integration tests can exercise
//! [`service`] against a real (loopback) MQTT broker, the same way
//! `main.rs` wires it.

pub mod character;
pub mod config;
pub mod corpus;
pub mod embedder;
pub mod models;
pub mod service;
