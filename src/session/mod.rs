//! Monitoring sessions: the HTTP API client and the lifecycle manager.
//!
//! - [`client`]: [`SessionApi`] trait and its reqwest implementation
//! - [`manager`]: [`SessionManager`], which binds a started session to its
//!   event stream and buffer

pub mod client;
pub mod manager;

pub use client::{HttpSessionApi, HttpSessionApiBuilder, SessionApi, DEFAULT_BASE_URL};
pub use manager::{ManagerSettings, ManagerSnapshot, Readings, SessionManager, StreamStatus};
