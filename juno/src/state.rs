//! Initialization state machine.

use std::fmt;

use juno_proto::RequestId;

use crate::error::{Error, Result};

/// Module lifecycle status.
///
/// Moves strictly forward: `Uninitialized` → `Initializing` →
/// `Initialized`. There is no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum ModuleState {
    /// `initialize` has not been called.
    #[default]
    Uninitialized,
    /// The handshake was sent and its acknowledgement is outstanding.
    Initializing,
    /// The host acknowledged the handshake.
    Initialized,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
        })
    }
}

/// Tracks the handshake and gates outbound operations on it.
#[derive(Debug, Default)]
pub(crate) struct InitGate {
    /// Current status.
    state: ModuleState,
    /// Token of the handshake request while it is outstanding.
    handshake: Option<RequestId>,
}

impl InitGate {
    /// Current status.
    pub(crate) const fn state(&self) -> ModuleState {
        self.state
    }

    /// Fails with [`Error::AlreadyInitialized`] unless no handshake has
    /// been attempted yet.
    pub(crate) fn ensure_uninitialized(&self) -> Result<()> {
        match self.state {
            ModuleState::Uninitialized => Ok(()),
            _ => Err(Error::AlreadyInitialized),
        }
    }

    /// Fails with [`Error::NotInitialized`] until a handshake has been sent.
    pub(crate) fn ensure_begun(&self) -> Result<()> {
        match self.state {
            ModuleState::Uninitialized => Err(Error::NotInitialized),
            _ => Ok(()),
        }
    }

    /// Records that the handshake `id` was sent.
    pub(crate) fn begin(&mut self, id: RequestId) {
        debug_assert_eq!(self.state, ModuleState::Uninitialized);
        self.state = ModuleState::Initializing;
        self.handshake = Some(id);
    }

    /// Completes the handshake if `id` is its token. Returns whether the
    /// state changed.
    pub(crate) fn complete(&mut self, id: &RequestId) -> bool {
        if self.state != ModuleState::Initializing || self.handshake.as_ref() != Some(id) {
            return false;
        }
        self.state = ModuleState::Initialized;
        self.handshake = None;
        true
    }
}
