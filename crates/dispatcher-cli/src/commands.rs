//! Subcommand implementations

use anyhow::{Context, Result, anyhow, bail};
use dispatcher_rpc::errno::{self, Errno};
use dispatcher_rpc::{ClientError, ClientEvent, DispatcherClient, RpcException};
use serde_json::Value;
use tracing::{debug, warn};

/// Parse a command-line argument as JSON, falling back to a plain string.
pub fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Render a server error with its symbolic errno name when known.
pub fn describe_exception(exception: &RpcException) -> String {
    let mut text = match exception.errno_name() {
        Some(name) => format!("[{name}] {}", exception.message),
        None => format!("[{}] {}", exception.code, exception.message),
    };
    if let Some(extra) = &exception.extra {
        text.push_str(&format!(" ({extra})"));
    }
    text
}

pub async fn run_call(client: &DispatcherClient, method: &str, args: &[String]) -> Result<()> {
    let args: Vec<Value> = args.iter().map(|raw| parse_arg(raw)).collect();
    debug!("Calling {} with {} args", method, args.len());

    match client.call(method, args).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(ClientError::Rpc(exception)) => {
            Err(anyhow!("{method} failed: {}", describe_exception(&exception)))
        }
        Err(e) => Err(e).with_context(|| format!("Call to {method} failed")),
    }
}

pub async fn run_listen(client: &mut DispatcherClient, patterns: &[String]) -> Result<()> {
    for pattern in patterns {
        client.subscribe(pattern)?;
    }
    eprintln!("Listening for {} (Ctrl-C to stop)", patterns.join(", "));

    loop {
        tokio::select! {
            event = client.recv() => match event {
                Some(ClientEvent::Event { name, args }) => {
                    println!("{name}: {}", serde_json::to_string(&args)?);
                }
                Some(ClientEvent::Error(report)) => warn!("{}", report),
                Some(ClientEvent::Disconnected) | None => bail!("Connection closed"),
                Some(_) => {}
            },
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                return Ok(());
            }
        }
    }
}

pub fn run_emit(client: &DispatcherClient, name: &str, args: &str) -> Result<()> {
    let args = parse_arg(args);
    client
        .emit_event(name, args)
        .with_context(|| format!("Failed to emit {name}"))
}

pub fn run_login(client: &DispatcherClient) -> Result<()> {
    let Some(session) = client.session() else {
        bail!("No credentials given; use --username/--password or --token");
    };

    println!("User: {}", session.username);
    println!("Token: {}", session.token);
    match session.lifetime {
        Some(seconds) => println!("Lifetime: {seconds}s"),
        None => println!("Lifetime: unlimited"),
    }
    Ok(())
}

/// Find an errno by symbolic name or numeric code.
pub fn find_errno(query: &str) -> Option<Errno> {
    match query.parse::<i32>() {
        Ok(code) => errno::name_of(code).and_then(errno::lookup),
        Err(_) => errno::lookup(&query.to_ascii_uppercase()),
    }
}

pub fn run_errno(query: &str) -> Result<()> {
    let entry = find_errno(query).with_context(|| format!("Unknown errno: {query}"))?;
    println!("{} ({}): {}", entry.name, entry.code, entry.description);
    Ok(())
}
