//! Shared primitives for the Marquee venue kiosk client.
//!
//! Everything here is plain data: device identity, screen geometry, the
//! content assignment that display instances coordinate on, and the action
//! commands carried inside poll responses. No I/O lives in this crate.

mod actions;
mod assignment;
mod identity;
mod screens;

pub mod channels;

pub use actions::{parse_actions, PollAction};
pub use assignment::{select_url, ContentAssignment};
pub use identity::DeviceIdentity;
pub use screens::{ScreenDescriptor, ScreenTopology};

use std::time::Duration;

/// Role a display instance plays for its lifetime, derived once from launch
/// parameters and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Primary,
    Secondary { slot: u32 },
    Unallocated,
}

impl SessionRole {
    /// Slot index absent or 1 means primary; 2+ is a secondary renderer.
    /// The unallocated flag wins over everything else.
    pub fn from_launch(slot: Option<u32>, unallocated: bool) -> Self {
        if unallocated {
            return SessionRole::Unallocated;
        }
        match slot {
            None | Some(0) | Some(1) => SessionRole::Primary,
            Some(n) => SessionRole::Secondary { slot: n },
        }
    }

    pub fn slot(&self) -> u32 {
        match self {
            SessionRole::Secondary { slot } => *slot,
            _ => 1,
        }
    }
}

/// Connection status as shown by the status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
}

/// Venue-service connection state owned by the primary instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub poll_interval: Duration,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            poll_interval: Duration::from_millis(30_000),
        }
    }
}
