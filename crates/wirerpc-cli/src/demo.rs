//! Demo service exposed by `wirerpc serve`.

use std::time::Duration;

use serde_json::json;
use wirerpc_server::{MethodTable, ServiceBuilder, ServiceError};

/// Name the demo service is published under
pub const SERVICE_NAME: &str = "EchoService";

/// Methods:
///
/// - `echo(string)`: returns its argument
/// - `upper(string)`: returns its argument upper-cased
/// - `add(i64, i64)`: returns the sum
/// - `sleep(u64)`: waits that many milliseconds, then returns them
/// - `fail(string)`: raises `IllegalStateException` with the given message
pub fn echo_service() -> MethodTable {
    ServiceBuilder::new(SERVICE_NAME)
        .method("echo", |inv| Ok(inv.arg::<serde_json::Value>(0)?))
        .method("upper", |inv| Ok(json!(inv.arg::<String>(0)?.to_uppercase())))
        .method("add", |inv| {
            let a = inv.arg::<i64>(0)?;
            let b = inv.arg::<i64>(1)?;
            a.checked_add(b)
                .map(|sum| json!(sum))
                .ok_or_else(|| ServiceError::new("ArithmeticException", "integer overflow"))
        })
        .method("sleep", |inv| {
            let ms = inv.arg::<u64>(0)?;
            std::thread::sleep(Duration::from_millis(ms));
            Ok(json!(ms))
        })
        .method("fail", |inv| {
            let message = inv.arg::<String>(0).unwrap_or_else(|_| "boom".to_string());
            Err(ServiceError::illegal_state(message))
        })
        .build()
}
