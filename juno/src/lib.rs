//! Module runtime for the juno host.
//!
//! A juno *module* talks to the host over one ordered connection. It
//! declares functions the host may call, subscribes to hooks the host
//! fires, and calls functions of other modules, all multiplexed over the
//! same stream. [`Module`] correlates replies with requests and routes
//! host-initiated calls and hook notifications to local handlers.
//!
//! # Quick start
//!
//! ```no_run
//! use juno::{Module, ModuleConfig};
//! use serde_json::{Map, Value};
//!
//! # async fn run() -> juno::Result<()> {
//! let config = ModuleConfig::builder()
//!     .module_id("math")
//!     .version("1.0.0")
//!     .endpoint("../juno.sock")
//!     .build()?;
//!
//! let (module, ready) = Module::connect(&config).await?;
//! ready.await?;
//!
//! module.declare_function("add", |args: Option<Value>| {
//!     let args = args.unwrap_or_default();
//!     args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0)
//! })?
//! .await?;
//!
//! module.register_hook("juno.activated", || println!("activated"))?.await?;
//! let reply = module.call_function("other.version", Map::new())?.await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

mod config;
mod connection;
mod error;
mod id;
mod module;
mod pending;
mod registry;
mod state;

pub use config::{ENV_SOCKET, ModuleConfig, ModuleConfigBuilder};
pub use connection::{Connection, Drained, Endpoint, Inbound, MemoryConnection, SocketConnection};
pub use error::{Error, Result};
pub use juno_proto::{Message, MessageType, RequestId};
pub use module::Module;
pub use pending::Pending;
pub use registry::{FunctionHandler, HookHandler};
pub use state::ModuleState;
