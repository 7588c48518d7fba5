//! qbcli: command-line client for the qBittorrent WebUI.
//!
//! # Architecture Overview
//!
//! ```text
//!   CLI (main.rs)
//!        │
//!        ▼
//!   ┌──────────┐   fetch    ┌────────────┐  prepare  ┌────────────┐
//!   │  client  │───────────▶│ resilience │──────────▶│  attempt:  │
//!   │  (api)   │            │   engine   │  + retry  │ HTTP call  │
//!   └────┬─────┘            └────────────┘           └────────────┘
//!        │ session negotiation
//!        ▼
//!   ┌──────────┐  encrypt/decrypt  ┌─────────────┐
//!   │  cache   │◀─────────────────▶│ credentials │
//!   │ (tokens) │   scrypt + AEAD   │ (identity)  │
//!   └──────────┘                   └─────────────┘
//! ```
//!
//! Each request runs through the retry engine: the prepare phase negotiates a
//! session token (memory, then encrypted disk cache, then a live login), the
//! attempt phase executes the HTTP call and classifies its outcome as
//! transient or fatal. A rejected cached token evicts its cache slot, so the
//! next attempt authenticates fresh.

// Core subsystems
pub mod cache;
pub mod client;
pub mod credentials;
pub mod session;

// Cross-cutting concerns
pub mod resilience;

pub use client::{Client, ClientConfig, ClientError};
pub use credentials::ConnectionIdentity;
pub use session::SessionToken;
