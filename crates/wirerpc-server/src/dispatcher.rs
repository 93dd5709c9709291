use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use wirerpc_common::protocol::{Request, Response, SERVICE_NOT_FOUND};
use wirerpc_metrics::{MetricsCollector, ServerMetricsCollector};

use crate::directory::ServiceDirectory;
use crate::service::{Invocation, ServiceError, PANIC};

/// Error kind for failures inside the dispatcher itself
pub const INTERNAL_ERROR: &str = "InternalError";

/// Routes decoded requests to the services in a [`ServiceDirectory`].
///
/// Every request produces exactly one response:
///
/// - `_info` / `_metrics` are answered from the metrics collector under any
///   service name
/// - an unknown service yields a [`SERVICE_NOT_FOUND`] failure without
///   invoking anything
/// - otherwise the service runs on a blocking worker; its value or error
///   (including a panic) becomes the response
pub struct Dispatcher {
    directory: Arc<ServiceDirectory>,
    metrics: Arc<ServerMetricsCollector>,
}

impl Dispatcher {
    pub fn new(directory: Arc<ServiceDirectory>) -> Self {
        Self::with_metrics(directory, Arc::new(ServerMetricsCollector::new()))
    }

    pub fn with_metrics(
        directory: Arc<ServiceDirectory>,
        metrics: Arc<ServerMetricsCollector>,
    ) -> Self {
        Self { directory, metrics }
    }

    pub fn directory(&self) -> &Arc<ServiceDirectory> {
        &self.directory
    }

    pub fn metrics(&self) -> &Arc<ServerMetricsCollector> {
        &self.metrics
    }

    pub async fn dispatch(&self, request: Request) -> Response {
        let correlation_id = request.correlation_id.clone();
        tracing::debug!(
            correlation_id = %correlation_id,
            service = %request.service_name,
            method = %request.method_name,
            "Dispatching request"
        );

        if self.metrics.is_builtin(&request.method_name) {
            return self
                .metrics
                .handle_builtin(&request.method_name, &correlation_id)
                .unwrap_or_else(|e| {
                    Response::error(correlation_id.clone(), INTERNAL_ERROR, e.to_string())
                });
        }

        let Some(service) = self.directory.lookup(&request.service_name) else {
            tracing::debug!(service = %request.service_name, "Service not found");
            return Response::error(
                correlation_id,
                SERVICE_NOT_FOUND,
                format!("No service registered as '{}'", request.service_name),
            );
        };

        let metric_key = format!("{}.{}", request.service_name, request.method_name);
        let start_time = Instant::now();
        let invocation = Invocation::new(request);

        let outcome = tokio::task::spawn_blocking(move || service.invoke(&invocation))
            .await
            .unwrap_or_else(|e| {
                if e.is_panic() {
                    Err(ServiceError::new(PANIC, panic_message(e.into_panic())))
                } else {
                    Err(ServiceError::new(INTERNAL_ERROR, e.to_string()))
                }
            });

        match outcome {
            Ok(value) => {
                self.metrics.record_call(&metric_key, start_time, true);
                Response::success(correlation_id, value)
            }
            Err(err) => {
                self.metrics.record_call(&metric_key, start_time, false);
                tracing::debug!(method = %metric_key, error = %err, "Service raised an error");
                Response::error(correlation_id, err.error_type, err.message)
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Service panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ServiceBuilder, ServiceResult, ILLEGAL_STATE, NO_SUCH_METHOD};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wirerpc_common::protocol::{Outcome, RpcError};

    fn dispatcher() -> Dispatcher {
        let directory = Arc::new(ServiceDirectory::new());
        directory.register(
            "EchoService",
            ServiceBuilder::new("EchoService")
                .method("echo", |inv| Ok(json!(inv.arg::<String>(0)?)))
                .method("fail", |_| Err(ServiceError::illegal_state("boom")))
                .method("panic", |_| panic!("handler exploded"))
                .method("slow", |_| {
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(json!("slow"))
                })
                .method("fast", |_| Ok(json!("fast")))
                .build(),
        );
        Dispatcher::new(directory)
    }

    fn request(id: &str, service: &str, method: &str) -> Request {
        Request::new(id, service, method)
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let response = dispatcher()
            .dispatch(request("c-1", "EchoService", "echo").with_param("string", json!("hello")))
            .await;
        assert_eq!(response.correlation_id, "c-1");
        assert_eq!(response.into_result().unwrap(), json!("hello"));
    }

    #[tokio::test]
    async fn test_service_not_found_invokes_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let directory = Arc::new(ServiceDirectory::new());
        let counter = Arc::clone(&calls);
        directory.register("Counter", move |_: &Invocation| -> ServiceResult {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!(null))
        });
        let dispatcher = Dispatcher::new(directory);

        let response = dispatcher.dispatch(request("c-2", "Missing", "echo")).await;
        match response.outcome {
            Outcome::Failure(err) => {
                assert_eq!(err.error_type, SERVICE_NOT_FOUND);
                assert!(err.message.contains("Missing"));
            }
            other => panic!("Expected failure, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_service_error_becomes_error_response() {
        let response = dispatcher()
            .dispatch(request("c-3", "EchoService", "fail"))
            .await;
        match response.into_result() {
            Err(RpcError::RemoteFailure { error_type, message }) => {
                assert_eq!(error_type, ILLEGAL_STATE);
                assert_eq!(message, "boom");
            }
            other => panic!("Expected RemoteFailure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        let dispatcher = dispatcher();
        let response = dispatcher
            .dispatch(request("c-4", "EchoService", "panic"))
            .await;
        match response.outcome {
            Outcome::Failure(err) => {
                assert_eq!(err.error_type, PANIC);
                assert!(err.message.contains("handler exploded"));
            }
            other => panic!("Expected failure, got {:?}", other),
        }

        // The dispatcher keeps serving after a panic
        let response = dispatcher
            .dispatch(request("c-5", "EchoService", "fast"))
            .await;
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_unknown_method_on_known_service() {
        let response = dispatcher()
            .dispatch(request("c-6", "EchoService", "missing"))
            .await;
        match response.outcome {
            Outcome::Failure(err) => assert_eq!(err.error_type, NO_SUCH_METHOD),
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_builtins_answer_under_any_service() {
        let dispatcher = dispatcher();

        let info = dispatcher
            .dispatch(request("c-7", "Whatever", "_info"))
            .await
            .into_result()
            .unwrap();
        assert_eq!(info["role"], "server");

        dispatcher
            .dispatch(request("c-8", "EchoService", "echo").with_param("string", json!("x")))
            .await;
        let metrics = dispatcher
            .dispatch(request("c-9", "EchoService", "_metrics"))
            .await
            .into_result()
            .unwrap();
        assert_eq!(metrics["methods"]["EchoService.echo"]["call_count"], 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_handler_does_not_block_others() {
        let dispatcher = Arc::new(dispatcher());

        let slow = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                dispatcher
                    .dispatch(request("slow", "EchoService", "slow"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        let fast = dispatcher
            .dispatch(request("fast", "EchoService", "fast"))
            .await;
        assert!(fast.is_success());
        assert!(started.elapsed() < Duration::from_millis(200));

        assert!(slow.await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_records_failures() {
        let dispatcher = dispatcher();
        dispatcher
            .dispatch(request("c-10", "EchoService", "fail"))
            .await;
        let snapshot = dispatcher.metrics().snapshot();
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.methods["EchoService.fail"].failure_count, 1);
    }
}
