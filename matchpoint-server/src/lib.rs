//! Matchpoint signaling server library.
//!
//! Exposes the signaling relay for use in tests and embedding. The server
//! pairs exactly two WebSocket connections into a named room and forwards
//! opaque negotiation and game-state frames between them.

pub mod config;
pub mod registry;
pub mod relay;
