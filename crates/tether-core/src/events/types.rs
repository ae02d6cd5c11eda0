use std::time::Duration;
use tether_common::types::{ConnectionState, ResizeRequest, SessionId};

/// User-visible notices. Only acquisition and transport problems surface here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The session backend could not be reached; running on a simulated session
    NoBackend,

    /// Input was dropped because the channel is not connected
    NotConnected,

    /// The channel dropped and a reconnect is scheduled
    Reconnecting { attempt: u32, delay: Duration },

    /// Reconnection attempts are exhausted; a full refresh is required
    ConnectionFailed { attempts: u32 },

    /// The backend reported an error for this session
    Remote(String),
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::NoBackend => f.write_str("session backend unavailable, running offline"),
            Notice::NotConnected => f.write_str("not connected, input dropped"),
            Notice::Reconnecting { attempt, delay } => {
                write!(f, "connection lost, reconnecting in {}ms (attempt {})", delay.as_millis(), attempt)
            }
            Notice::ConnectionFailed { attempts } => write!(
                f,
                "connection failed after {} attempts, restart to reconnect",
                attempts
            ),
            Notice::Remote(message) => write!(f, "server error: {}", message),
        }
    }
}

/// Events published by the resilience layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A session was acquired (or simulated) and the terminal is usable
    SessionReady(SessionId),

    /// The transport moved to a new state
    ConnectionChanged(ConnectionState),

    /// A coalesced resize was applied to the widget
    Resized(ResizeRequest),

    /// The user scrolled away from, or back to, the live tail
    ScrollChanged { user_scrolled: bool },

    /// Something the user should see
    Notice(Notice),

    /// The session was torn down
    Closed,
}
