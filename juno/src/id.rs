//! Correlation token generation.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use juno_proto::RequestId;

/// Produces correlation tokens of the form `{prefix}-{session}-{seq}`.
///
/// The session part is random per generator, so tokens from two module
/// instances sharing a host do not collide; the sequence part makes every
/// token from one generator distinct.
#[derive(Debug)]
pub(crate) struct IdGenerator {
    /// Leading component, normally the module id.
    prefix: String,
    /// Random per-generator component.
    session: u64,
    /// Next sequence number.
    next: u64,
}

impl IdGenerator {
    /// Creates a generator whose tokens start with `prefix`.
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        let mut h = RandomState::new().build_hasher();
        h.write_u64(u64::from(std::process::id()));
        h.write_u128(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos(),
        );
        Self {
            prefix: prefix.into(),
            session: h.finish() & 0xffff_ffff_ffff,
            next: 0,
        }
    }

    /// Switches the prefix for tokens generated from now on.
    pub(crate) fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
    }

    /// Returns a token not produced before by this generator.
    pub(crate) fn next_id(&mut self) -> RequestId {
        self.next += 1;
        RequestId::new(format!("{}-{:012x}-{}", self.prefix, self.session, self.next))
    }
}
