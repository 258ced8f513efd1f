//! These models represent the objects passed around by the orchestrator
//!
//! Messages use the same shape as the OpenAI-compatible chat completion wire
//! format, so a conversation can be sent upstream, persisted to disk and
//! loaded back without any conversion step. Client-side-only messages are the
//! one extension: they live in the transcript but are filtered out before a
//! request is built.
pub mod chat;
pub mod message;
pub mod output;
pub mod tool;
