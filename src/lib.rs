//! Karos - MMORPG game-server request core
//!
//! The client-packet-handling core of an MMORPG world server: per-connection
//! flood protection with escalating punishment, and the transactional
//! request protocols (trade, enchant, invitations) that coordinate
//! multi-step mutations of shared inventory state across sessions.

/// Server configuration (flood-protection table)
pub mod config;
/// Game clock (monotonic tick counter)
pub mod core;
/// Client session / connection state
pub mod session;
/// Network-facing protection (flood governors, punishment sink)
pub mod network;
/// Game state and transactional request flows
pub mod game;
/// Log subscriber setup
pub mod telemetry;
