//! Subcommands: call, trigger, listen, echo.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use juno::{Module, ModuleConfig};
use serde_json::{Map, Value};

/// Connection and identity flags shared by every subcommand.
#[derive(clap::Args)]
pub struct ConnectArgs {
    /// Host endpoint: socket path, `host:port`, `unix:<path>` or
    /// `tcp:<host:port>` [default: $JUNO_SOCKET or ../juno.sock].
    #[arg(short = 's', long, global = true)]
    pub socket: Option<String>,

    /// Module id to register under.
    #[arg(long, global = true, default_value = "juno-cli")]
    pub module_id: String,

    /// Module version announced in the handshake.
    #[arg(long, global = true, default_value = env!("CARGO_PKG_VERSION"))]
    pub module_version: String,

    /// Declare a dependency (format: name=version). Repeatable.
    #[arg(short = 'd', long = "dependency", global = true, value_parser = parse_dependency)]
    pub dependencies: Vec<(String, String)>,

    /// Seconds to wait for each reply from juno.
    #[arg(short = 't', long, global = true, default_value_t = 10)]
    pub timeout: u64,
}

impl ConnectArgs {
    /// Builds the module configuration from the flags.
    fn config(&self) -> Result<ModuleConfig> {
        let mut builder = ModuleConfig::builder()
            .module_id(&self.module_id)
            .version(&self.module_version)
            .request_timeout(Duration::from_secs(self.timeout.max(1)));
        if let Some(socket) = &self.socket {
            builder = builder.endpoint(socket);
        }
        for (name, version) in &self.dependencies {
            builder = builder.dependency(name, version);
        }
        Ok(builder.build()?)
    }

    /// Connects and waits for juno to acknowledge the handshake.
    async fn connect(&self) -> Result<(Module, Duration)> {
        let config = self.config()?;
        let timeout = config
            .request_timeout
            .unwrap_or(Duration::from_secs(self.timeout));
        let (module, ready) = Module::connect(&config)
            .await
            .with_context(|| format!("failed to connect to {}", config.endpoint))?;
        module
            .wait_for(ready, timeout)
            .await
            .context("juno did not acknowledge the handshake")?;
        tracing::info!(module_id = %config.module_id, endpoint = %config.endpoint, "initialized");
        Ok((module, timeout))
    }
}

/// Arguments for `juno-module call`.
#[derive(clap::Args)]
pub struct CallArgs {
    /// Fully qualified function name (e.g. `math.add`).
    pub function: String,

    /// Call arguments as a JSON object.
    #[arg(short = 'a', long = "args")]
    pub arguments: Option<String>,

    /// Print the response on one line.
    #[arg(long)]
    pub compact: bool,
}

pub async fn call(connect: &ConnectArgs, args: CallArgs) -> Result<()> {
    let arguments = parse_arguments(args.arguments.as_deref())?;
    let (module, timeout) = connect.connect().await?;

    let pending = module.call_function(&args.function, arguments)?;
    let data = module
        .wait_for(pending, timeout)
        .await
        .with_context(|| format!("call to {} failed", args.function))?;

    if args.compact {
        println!("{data}");
    } else {
        println!("{}", serde_json::to_string_pretty(&data)?);
    }
    module.close().await;
    Ok(())
}

pub async fn trigger(connect: &ConnectArgs, hook: &str) -> Result<()> {
    let (module, _) = connect.connect().await?;
    let request_id = module.trigger_hook(hook)?;
    tracing::debug!(%request_id, hook, "hook triggered");
    module.close().await;
    Ok(())
}

pub async fn listen(connect: &ConnectArgs, hooks: &[String]) -> Result<()> {
    let (module, timeout) = connect.connect().await?;
    for hook in hooks {
        let name = hook.clone();
        let pending = module.register_hook(hook, move || println!("{name}"))?;
        module
            .wait_for(pending, timeout)
            .await
            .with_context(|| format!("failed to register hook {hook}"))?;
    }
    eprintln!("listening for {} hook(s), press Ctrl-C to stop", hooks.len());
    tokio::signal::ctrl_c().await?;
    module.close().await;
    Ok(())
}

pub async fn echo(connect: &ConnectArgs, functions: &[String]) -> Result<()> {
    let (module, timeout) = connect.connect().await?;
    for function in functions {
        let name = function.clone();
        let pending = module.declare_function(function, move |args| {
            tracing::info!(function = %name, ?args, "called");
            args.unwrap_or(Value::Null)
        })?;
        module
            .wait_for(pending, timeout)
            .await
            .with_context(|| format!("failed to declare function {function}"))?;
    }
    eprintln!("serving {} function(s), press Ctrl-C to stop", functions.len());
    tokio::signal::ctrl_c().await?;
    module.close().await;
    Ok(())
}

/// Parses a `name=version` dependency flag.
fn parse_dependency(s: &str) -> Result<(String, String)> {
    match s.split_once('=') {
        Some((name, version)) if !name.is_empty() && !version.is_empty() => {
            Ok((name.to_owned(), version.to_owned()))
        }
        _ => bail!("expected name=version, got `{s}`"),
    }
}

/// Parses the `--args` flag; absent means an empty object.
fn parse_arguments(raw: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw).context("--args is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--args must be a JSON object, got {other}"),
    }
}
