//! Control protocol for managing a running herald instance
//!
//! This module provides an IPC mechanism using Unix domain sockets to:
//! - Inspect the notification queue (list, view, stats)
//! - Retry or clear failed notifications
//! - Send a test notification through the configured transport
//! - Check that the service is alive
//!
//! The protocol uses bincode for efficient serialization.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::ControlClient;
pub use error::{ControlError, Result};
pub use protocol::{
    PROTOCOL_VERSION, QueueCommand, Request, RequestCommand, Response, ResponseData,
    ResponsePayload, SystemCommand,
};
pub use server::{CommandHandler, ControlServer};

/// Default path for the control socket
pub const DEFAULT_CONTROL_SOCKET: &str = "/tmp/herald.sock";
