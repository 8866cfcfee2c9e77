//! In-flight request table and the futures handed back to callers.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use juno_proto::{MessageType, RequestId};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::id::IdGenerator;

/// The outbound request an entry is waiting on a reply for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    /// `initialize`, answered by type 2.
    Initialize,
    /// `call_function`, answered by type 4.
    CallFunction,
    /// `register_hook`, answered by type 6.
    RegisterHook,
    /// `declare_function`, answered by type 10.
    DeclareFunction,
}

impl RequestKind {
    /// Returns the request kind a reply of type `reply` settles.
    pub(crate) const fn answered_by(reply: MessageType) -> Option<Self> {
        match reply {
            MessageType::InitializeAck => Some(Self::Initialize),
            MessageType::FunctionResponse => Some(Self::CallFunction),
            MessageType::HookRegistered => Some(Self::RegisterHook),
            MessageType::FunctionDeclared => Some(Self::DeclareFunction),
            _ => None,
        }
    }
}

/// One in-flight request.
#[derive(Debug)]
struct Entry {
    /// Which reply type may settle this entry.
    kind: RequestKind,
    /// Name the request is about (module, function, or hook).
    subject: String,
    /// Single-use result slot.
    slot: oneshot::Sender<Result<Value>>,
}

/// Maps correlation tokens to the result slots awaiting their reply.
///
/// Every entry is settled at most once: settling removes it, and settling
/// an absent token is a no-op.
#[derive(Debug)]
pub(crate) struct PendingTable {
    /// Token source.
    ids: IdGenerator,
    /// Outstanding entries keyed by token.
    entries: HashMap<RequestId, Entry>,
}

impl PendingTable {
    /// Creates an empty table whose tokens start with `prefix`.
    pub(crate) fn new(prefix: &str) -> Self {
        Self {
            ids: IdGenerator::new(prefix),
            entries: HashMap::new(),
        }
    }

    /// Switches the token prefix, typically once the module id is known.
    pub(crate) fn set_prefix(&mut self, prefix: &str) {
        self.ids.set_prefix(prefix);
    }

    /// Returns a fresh token that is not currently pending, without
    /// recording an entry.
    pub(crate) fn fresh_id(&mut self) -> RequestId {
        loop {
            let id = self.ids.next_id();
            if !self.entries.contains_key(&id) {
                return id;
            }
        }
    }

    /// Records a new entry of `kind` about `subject` and returns its
    /// token and result.
    pub(crate) fn allocate<T>(&mut self, kind: RequestKind, subject: &str) -> (RequestId, Pending<T>) {
        let id = self.fresh_id();
        let (slot, rx) = oneshot::channel();
        let entry = Entry {
            kind,
            subject: subject.to_owned(),
            slot,
        };
        self.entries.insert(id.clone(), entry);
        (id.clone(), Pending::new(id, rx))
    }

    /// Returns the kind of the entry for `id`, if one is pending.
    pub(crate) fn kind_of(&self, id: &RequestId) -> Option<RequestKind> {
        self.entries.get(id).map(|e| e.kind)
    }

    /// Returns the subject of the entry for `id`, if one is pending.
    pub(crate) fn subject_of(&self, id: &RequestId) -> Option<&str> {
        self.entries.get(id).map(|e| e.subject.as_str())
    }

    /// Settles the entry for `id` with `value` if it is pending and of
    /// `kind`. Returns whether anything was settled.
    pub(crate) fn resolve(&mut self, id: &RequestId, kind: RequestKind, value: Value) -> bool {
        if self.kind_of(id) != Some(kind) {
            tracing::trace!(%id, ?kind, "no matching pending request");
            return false;
        }
        self.settle(id, Ok(value))
    }

    /// Fails the entry for `id` with `err`. Returns whether it was pending.
    pub(crate) fn reject(&mut self, id: &RequestId, err: Error) -> bool {
        self.settle(id, Err(err))
    }

    /// Fails every outstanding entry with the error produced by `err`.
    pub(crate) fn reject_all(&mut self, err: impl Fn() -> Error) {
        for (id, entry) in self.entries.drain() {
            tracing::debug!(%id, kind = ?entry.kind, "rejecting pending request");
            let _ = entry.slot.send(Err(err()));
        }
    }

    /// Removes `id` and delivers `outcome` to its slot.
    fn settle(&mut self, id: &RequestId, outcome: Result<Value>) -> bool {
        match self.entries.remove(id) {
            Some(entry) => {
                // The caller may have dropped its `Pending`; that is fine.
                let _ = entry.slot.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Number of outstanding entries.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A reply the host has not sent yet.
///
/// Resolves to the reply payload decoded as `T`. Dropping a `Pending`
/// does not cancel the request; use [`Module::cancel`] for that.
///
/// [`Module::cancel`]: crate::Module::cancel
#[must_use = "a Pending reply does nothing unless awaited"]
pub struct Pending<T> {
    /// Token of the request this result belongs to.
    id: RequestId,
    /// Receiving half of the entry's slot.
    rx: oneshot::Receiver<Result<Value>>,
    /// Type the payload is decoded into.
    _reply: PhantomData<fn() -> T>,
}

impl<T> Pending<T> {
    /// Wraps the receiving half of a result slot.
    const fn new(id: RequestId, rx: oneshot::Receiver<Result<Value>>) -> Self {
        Self {
            id,
            rx,
            _reply: PhantomData,
        }
    }

    /// Returns the correlation token of the underlying request.
    pub const fn request_id(&self) -> &RequestId {
        &self.id
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending").field("id", &self.id).finish_non_exhaustive()
    }
}

impl<T: DeserializeOwned> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|outcome| match outcome {
            Ok(Ok(value)) => serde_json::from_value(value).map_err(Error::from),
            Ok(Err(e)) => Err(e),
            // The table was dropped along with its module.
            Err(_) => Err(Error::Disconnected),
        })
    }
}
