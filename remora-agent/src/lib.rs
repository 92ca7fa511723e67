//! # remora-agent
//!
//! Host agent binary: serves remote-desktop sessions built from
//! `remora-core` over a length-delimited TCP control channel.

pub mod config;
pub mod platform;
pub mod protocol;
pub mod service;

pub use config::AgentConfig;
pub use service::AgentService;
