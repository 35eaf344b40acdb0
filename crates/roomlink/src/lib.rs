//! Roomlink - room-based real-time messaging server
//!
//! This crate provides:
//! - The room registry with per-room ordering, history and presence
//! - The axum WebSocket API
//! - Layered server configuration

// Re-export the wire protocol
pub use roomlink_types;

// Join URL announcement
pub mod announce;

// Server configuration
pub mod config;

// WebSocket server
pub mod server;
