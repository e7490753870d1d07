//! Network layer: connectivity tracking and the remote API collaborator.

pub mod client;
pub mod monitor;

pub use client::{RemoteApi, RemoteClient};
pub use monitor::NetworkMonitor;
