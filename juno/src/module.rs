//! The module runtime: outbound requests and inbound dispatch.
//!
//! A [`Module`] owns the pending-request table, the function and hook
//! registries, and the initialization gate. Every public operation sends
//! at most one message and returns immediately; replies are matched later,
//! one inbound message at a time, by [`Module::dispatch`].

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use juno_proto::{Message, RequestId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::config::ModuleConfig;
use crate::connection::{Connection, Drained, Inbound, SocketConnection};
use crate::error::{Error, Result};
use crate::pending::{Pending, PendingTable, RequestKind};
use crate::registry::{FunctionHandler, FunctionRegistry, HookHandler, HookRegistry};
use crate::state::{InitGate, ModuleState};

/// Token prefix used until the module id is known.
const DEFAULT_ID_PREFIX: &str = "juno";

/// A module attached to a juno host.
///
/// Cloning is cheap and yields another handle to the same module.
#[derive(Clone)]
pub struct Module {
    /// Shared state.
    inner: Arc<Inner>,
}

/// State shared by all handles of one module.
struct Inner {
    /// Outbound transport.
    connection: Box<dyn Connection>,
    /// Everything mutated by requests and dispatch.
    core: Mutex<Core>,
}

/// Mutable module state, guarded as one unit.
#[derive(Debug)]
struct Core {
    /// Handshake status.
    init: InitGate,
    /// In-flight requests.
    pending: PendingTable,
    /// Functions the host may call.
    functions: FunctionRegistry,
    /// Hook subscriptions.
    hooks: HookRegistry,
}

/// What the dispatcher decided to do with an inbound message once the
/// state lock is released.
enum Action {
    /// Nothing left to do.
    Done,
    /// Run a declared function and answer the host.
    Invoke {
        /// Token of the inbound call, echoed in the response.
        request_id: RequestId,
        /// Function name, for logging.
        function: String,
        /// The declared handler.
        handler: FunctionHandler,
        /// Arguments as received.
        arguments: Option<Value>,
    },
    /// Run hook subscribers in registration order.
    Fire {
        /// Hook name, for logging.
        hook: String,
        /// Subscribers at the time the notification arrived.
        handlers: Vec<HookHandler>,
    },
}

impl Module {
    /// Creates a module that sends through `connection`.
    ///
    /// Inbound messages must be fed to [`Self::dispatch`], usually by
    /// running [`Self::listen`] on the connection's [`Inbound`] channel.
    pub fn new(connection: impl Connection) -> Self {
        let core = Core {
            init: InitGate::default(),
            pending: PendingTable::new(DEFAULT_ID_PREFIX),
            functions: FunctionRegistry::default(),
            hooks: HookRegistry::default(),
        };
        Self {
            inner: Arc::new(Inner {
                connection: Box::new(connection),
                core: Mutex::new(core),
            }),
        }
    }

    /// Connects to the host described by `config`, starts dispatching
    /// inbound messages on a background task, and sends the handshake.
    ///
    /// Returns the module and the pending handshake result. Must be called
    /// inside a Tokio runtime.
    ///
    /// The background task does not keep the module alive: dropping the
    /// last handle closes the connection, and the task exits at the next
    /// inbound message or when the host hangs up.
    pub async fn connect(config: &ModuleConfig) -> Result<(Self, Pending<bool>)> {
        let (connection, inbound) = SocketConnection::connect(&config.endpoint).await?;
        let module = Self::new(connection);
        tokio::spawn(listen_detached(Arc::downgrade(&module.inner), inbound));
        let ready = module.initialize(
            &config.module_id,
            &config.version,
            config.dependencies.clone(),
        )?;
        Ok((module, ready))
    }

    /// Current initialization status.
    pub fn state(&self) -> ModuleState {
        self.core().init.state()
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.core().pending.len()
    }

    /// Sends the one-time handshake.
    ///
    /// Fails immediately with [`Error::AlreadyInitialized`], without
    /// sending anything, once a handshake has been sent. The returned
    /// result resolves to `true` when the host acknowledges.
    pub fn initialize(
        &self,
        module_id: &str,
        version: &str,
        dependencies: BTreeMap<String, String>,
    ) -> Result<Pending<bool>> {
        let mut core = self.core();
        core.init.ensure_uninitialized()?;
        core.pending.set_prefix(module_id);
        let (request_id, pending) =
            self.request(&mut core, RequestKind::Initialize, module_id, |request_id| {
                Message::Initialize {
                    request_id,
                    module_id: module_id.to_owned(),
                    version: version.to_owned(),
                    dependencies,
                }
            })?;
        core.init.begin(request_id);
        Ok(pending)
    }

    /// Declares `name` as callable by the host and registers `callback`
    /// to serve it.
    ///
    /// The callback receives the call's `arguments` as sent (or `None`) and
    /// its return value is sent back as the response payload. Declaring a
    /// name again replaces the previous handler. Resolves to `true` when
    /// the host acknowledges the declaration.
    pub fn declare_function<F, R>(&self, name: &str, callback: F) -> Result<Pending<bool>>
    where
        F: Fn(Option<Value>) -> R + Send + Sync + 'static,
        R: Serialize,
    {
        let mut core = self.core();
        core.init.ensure_begun()?;

        let function = name.to_owned();
        let handler: FunctionHandler = Arc::new(move |arguments| {
            serde_json::to_value(callback(arguments)).unwrap_or_else(|e| {
                tracing::warn!(%function, error = %e, "function result is not serializable");
                Value::Null
            })
        });
        if core.functions.insert(name, handler).is_some() {
            tracing::warn!(function = name, "function redeclared, replacing handler");
        }

        let (_, pending) = self.request(&mut core, RequestKind::DeclareFunction, name, |request_id| {
            Message::DeclareFunction {
                request_id,
                function: name.to_owned(),
            }
        })?;
        Ok(pending)
    }

    /// Forgets the local handler for `name`. Nothing is sent to the host;
    /// later inbound calls to `name` are dropped.
    pub fn undeclare_function(&self, name: &str) -> bool {
        self.core().functions.remove(name)
    }

    /// Calls `name` on the host with `arguments`.
    ///
    /// Resolves to the `data` of the matching response.
    pub fn call_function(&self, name: &str, arguments: Map<String, Value>) -> Result<Pending<Value>> {
        let mut core = self.core();
        core.init.ensure_begun()?;
        let (_, pending) = self.request(&mut core, RequestKind::CallFunction, name, |request_id| {
            Message::FunctionCall {
                request_id,
                function: name.to_owned(),
                arguments: Some(Value::Object(arguments)),
            }
        })?;
        Ok(pending)
    }

    /// Subscribes `handler` to the hook `name`.
    ///
    /// Any number of handlers may subscribe to one hook; all of them run,
    /// in registration order, each time it fires. Resolves to `true` when
    /// the host acknowledges.
    pub fn register_hook<F>(&self, name: &str, handler: F) -> Result<Pending<bool>>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut core = self.core();
        core.init.ensure_begun()?;
        core.hooks.add(name, Arc::new(handler));
        let (_, pending) = self.request(&mut core, RequestKind::RegisterHook, name, |request_id| {
            Message::RegisterHook {
                request_id,
                hook: name.to_owned(),
            }
        })?;
        Ok(pending)
    }

    /// Fires the hook `name` on the host.
    ///
    /// No reply is expected; the returned token is the one attached to the
    /// outbound message.
    pub fn trigger_hook(&self, name: &str) -> Result<RequestId> {
        let mut core = self.core();
        core.init.ensure_begun()?;
        let request_id = core.pending.fresh_id();
        self.send(Message::TriggerHook {
            request_id: request_id.clone(),
            hook: name.to_owned(),
        })?;
        Ok(request_id)
    }

    /// Routes one inbound message.
    ///
    /// In order: a reply (types 2, 4, 6, 10) settles the pending request
    /// of the matching kind; a hook notification (type 8) runs the hook's
    /// subscribers whatever its token; a function call (type 3) whose token
    /// is not one of our own pending calls invokes the declared handler.
    /// Anything else is dropped.
    pub fn dispatch(&self, msg: Message) {
        tracing::debug!(kind = %msg.kind(), request_id = ?msg.request_id(), "received");
        let action = self.classify(msg);
        self.run(action);
    }

    /// Dispatches every message from `inbound` until it closes, then
    /// rejects whatever is still pending with [`Error::Disconnected`].
    ///
    /// A panicking handler is logged and does not end the loop.
    pub async fn listen(&self, mut inbound: Inbound) {
        while let Some(msg) = inbound.recv().await {
            self.dispatch(msg);
        }
        self.disconnected();
    }

    /// Cancels the pending request `id`, rejecting it with
    /// [`Error::Cancelled`]. Returns whether it was pending.
    ///
    /// A cancelled handshake leaves the module `Initializing`.
    pub fn cancel(&self, id: &RequestId) -> bool {
        self.core().pending.reject(id, Error::Cancelled)
    }

    /// Awaits `pending` for at most `timeout`; on expiry the request is
    /// cancelled and [`Error::Timeout`] returned.
    pub async fn wait_for<T: DeserializeOwned>(&self, pending: Pending<T>, timeout: Duration) -> Result<T> {
        let id = pending.request_id().clone();
        match tokio::time::timeout(timeout, pending).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.cancel(&id);
                Err(Error::Timeout)
            }
        }
    }

    /// Closes the connection and rejects every pending request with
    /// [`Error::Disconnected`].
    ///
    /// Messages sent before closing are still delivered; await the
    /// returned [`Drained`] to know when they have been written.
    pub fn close(&self) -> Drained {
        let drained = self.inner.connection.close();
        self.core().pending.reject_all(|| Error::Disconnected);
        drained
    }

    /// Rejects everything still pending once the inbound stream has ended.
    fn disconnected(&self) {
        tracing::debug!("inbound stream closed");
        self.core().pending.reject_all(|| Error::Disconnected);
    }

    /// Locks the module state, reusing it if poisoned. Handlers never run
    /// under this lock.
    fn core(&self) -> MutexGuard<'_, Core> {
        self.inner.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands `msg` to the connection.
    fn send(&self, msg: Message) -> Result<()> {
        tracing::debug!(kind = %msg.kind(), request_id = ?msg.request_id(), "sending");
        self.inner.connection.send(msg)
    }

    /// Allocates a pending entry, builds the message for its token, and
    /// sends it. The entry is discarded if sending fails.
    fn request<T>(
        &self,
        core: &mut Core,
        kind: RequestKind,
        subject: &str,
        build: impl FnOnce(RequestId) -> Message,
    ) -> Result<(RequestId, Pending<T>)> {
        let (request_id, pending) = core.pending.allocate(kind, subject);
        if let Err(e) = self.send(build(request_id.clone())) {
            core.pending.reject(&request_id, Error::Disconnected);
            return Err(e);
        }
        Ok((request_id, pending))
    }

    /// Applies the routing rules under the lock and returns any handler
    /// work to do after it is released.
    fn classify(&self, msg: Message) -> Action {
        let mut core = self.core();
        let kind = msg.kind();
        match msg {
            Message::HookFired { hook, .. } => {
                let handlers = core.hooks.handlers(&hook);
                if handlers.is_empty() {
                    tracing::debug!(%hook, "no subscribers for hook");
                }
                Action::Fire { hook, handlers }
            }
            Message::FunctionCall {
                request_id,
                function,
                arguments,
            } => {
                if core.pending.kind_of(&request_id) == Some(RequestKind::CallFunction) {
                    tracing::debug!(%request_id, "dropping function call echoing a pending call");
                    return Action::Done;
                }
                match core.functions.get(&function) {
                    Some(handler) => Action::Invoke {
                        request_id,
                        function,
                        handler,
                        arguments,
                    },
                    None => {
                        tracing::debug!(%function, "call to undeclared function dropped");
                        Action::Done
                    }
                }
            }
            Message::InitializeAck { request_id } => {
                if core.pending.resolve(&request_id, RequestKind::Initialize, Value::Bool(true)) {
                    core.init.complete(&request_id);
                    tracing::debug!(%request_id, "module initialized");
                }
                Action::Done
            }
            Message::FunctionResponse { request_id, data } => {
                core.pending.resolve(&request_id, RequestKind::CallFunction, data);
                Action::Done
            }
            Message::HookRegistered { request_id } => {
                core.pending.resolve(&request_id, RequestKind::RegisterHook, Value::Bool(true));
                Action::Done
            }
            Message::FunctionDeclared {
                request_id,
                function,
            } => {
                match core.pending.subject_of(&request_id) {
                    Some(declared) if declared != function => {
                        tracing::debug!(%request_id, %function, declared, "declaration ack names another function");
                    }
                    _ => {
                        core.pending.resolve(&request_id, RequestKind::DeclareFunction, Value::Bool(true));
                    }
                }
                Action::Done
            }
            _ => {
                tracing::debug!(%kind, "dropping unexpected message");
                Action::Done
            }
        }
    }

    /// Runs handler work decided by [`Self::classify`].
    fn run(&self, action: Action) {
        match action {
            Action::Done => {}
            Action::Fire { hook, handlers } => {
                for handler in handlers {
                    if catch_unwind(AssertUnwindSafe(|| handler())).is_err() {
                        tracing::warn!(%hook, "hook handler panicked");
                    }
                }
            }
            Action::Invoke {
                request_id,
                function,
                handler,
                arguments,
            } => {
                let data = catch_unwind(AssertUnwindSafe(|| handler(arguments))).unwrap_or_else(|_| {
                    tracing::warn!(%function, %request_id, "function handler panicked, answering null");
                    Value::Null
                });
                let response = Message::FunctionResponse {
                    request_id,
                    data,
                };
                if let Err(e) = self.send(response) {
                    tracing::warn!(%function, error = %e, "failed to send function response");
                }
            }
        }
    }
}

/// Dispatch loop for [`Module::connect`] that holds only a weak handle.
async fn listen_detached(module: Weak<Inner>, mut inbound: Inbound) {
    while let Some(msg) = inbound.recv().await {
        let Some(inner) = module.upgrade() else {
            tracing::debug!("module dropped, stopping dispatch");
            return;
        };
        Module { inner }.dispatch(msg);
    }
    if let Some(inner) = module.upgrade() {
        Module { inner }.disconnected();
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core();
        f.debug_struct("Module")
            .field("state", &core.init.state())
            .field("pending", &core.pending.len())
            .field("functions", &core.functions)
            .field("hooks", &core.hooks)
            .finish_non_exhaustive()
    }
}
