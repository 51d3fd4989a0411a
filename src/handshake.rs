//! Connection handshake: connect → login → join → announce
//!
//! The machine is pure: the runtime reports the link status and the session
//! clock once per tick and executes whatever action comes back. At most one
//! transition happens per step, and each action is emitted exactly once per
//! connection.

use crate::config::HandshakeConfig;
use crate::transport::LinkStatus;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Disconnected,
    Connecting,
    /// Login sent at the given session time
    Authenticated { at: Duration },
    /// Join sent at the given session time
    Joined { at: Duration },
    Announced,
}

/// Protocol output the runtime must emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeAction {
    Login,
    Join,
    Announce,
}

#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: HandshakeState,
    post_auth_delay: Duration,
    post_join_delay: Duration,
}

impl ConnectionStateMachine {
    pub fn new(config: &HandshakeConfig) -> Self {
        Self {
            state: HandshakeState::Disconnected,
            post_auth_delay: config.post_auth_delay,
            post_join_delay: config.post_join_delay,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.state,
            HandshakeState::Authenticated { .. }
                | HandshakeState::Joined { .. }
                | HandshakeState::Announced
        )
    }

    pub fn has_joined(&self) -> bool {
        matches!(
            self.state,
            HandshakeState::Joined { .. } | HandshakeState::Announced
        )
    }

    pub fn is_announced(&self) -> bool {
        self.state == HandshakeState::Announced
    }

    /// Forget all progress; the next connection repeats the full handshake
    pub fn reset(&mut self) {
        if self.state != HandshakeState::Disconnected {
            debug!("Handshake reset from {:?}", self.state);
        }
        self.state = HandshakeState::Disconnected;
    }

    /// Advance by at most one transition
    pub fn step(&mut self, link: LinkStatus, now: Duration) -> Option<HandshakeAction> {
        match link {
            LinkStatus::Disconnected => {
                self.reset();
                None
            }
            LinkStatus::Connecting => {
                if self.state != HandshakeState::Connecting {
                    self.reset();
                    self.state = HandshakeState::Connecting;
                }
                None
            }
            LinkStatus::Connected => self.step_connected(now),
        }
    }

    fn step_connected(&mut self, now: Duration) -> Option<HandshakeAction> {
        match self.state {
            HandshakeState::Disconnected | HandshakeState::Connecting => {
                info!("Link up, logging in");
                self.state = HandshakeState::Authenticated { at: now };
                Some(HandshakeAction::Login)
            }
            HandshakeState::Authenticated { at } => {
                if now.saturating_sub(at) > self.post_auth_delay {
                    self.state = HandshakeState::Joined { at: now };
                    Some(HandshakeAction::Join)
                } else {
                    None
                }
            }
            HandshakeState::Joined { at } => {
                if now.saturating_sub(at) > self.post_join_delay {
                    self.state = HandshakeState::Announced;
                    Some(HandshakeAction::Announce)
                } else {
                    None
                }
            }
            HandshakeState::Announced => None,
        }
    }
}
