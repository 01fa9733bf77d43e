//! Core types for the voicebridge call relay
//!
//! This crate provides the vocabulary shared by all other crates:
//! - Call identifiers
//! - Conversation turns
//! - Audio payload types

pub mod audio;
pub mod call;
pub mod conversation;

pub use audio::{AudioChunk, AudioEncoding, AudioFormat, MULAW_SILENCE};
pub use call::CallId;
pub use conversation::{Turn, TurnRole};
