//! Parsing helpers for command-line values.

use anyhow::{anyhow, Result};
use serde_json::Value;
use wirerpc_common::protocol::ServiceInstance;

/// Splits `host:port`.
///
/// The port is taken after the last colon; a bracketed IPv6 host keeps its
/// brackets so the instance address stays connectable.
pub fn parse_instance(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("Invalid instance '{}': expected host:port", addr))?;
    if host.is_empty() {
        return Err(anyhow!("Invalid instance '{}': empty host", addr));
    }
    let port = port
        .parse::<u16>()
        .map_err(|e| anyhow!("Invalid port in '{}': {}", addr, e))?;
    Ok((host.to_string(), port))
}

/// Builds one instance of `service` per `host:port` flag.
pub fn instances_for(service: &str, addrs: &[String]) -> Result<Vec<ServiceInstance>> {
    addrs
        .iter()
        .enumerate()
        .map(|(i, addr)| {
            let (host, port) = parse_instance(addr)?;
            Ok(ServiceInstance::new(format!("cli-{}", i), service, host, port))
        })
        .collect()
}

/// Parses the `--args` value.
///
/// A JSON array is the positional argument list; any other JSON value is
/// passed as the single argument.
pub fn parse_call_args(raw: &str) -> Result<Vec<Value>> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| anyhow!("Invalid JSON in args: {}", e))?;
    Ok(match value {
        Value::Array(items) => items,
        other => vec![other],
    })
}
