use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tonic::Code;
use tower::{Layer, Service};
use tracing::{info, warn, Instrument, Span};

use super::path::{caller_kind, default_ignored_paths, is_ignored, RpcPath};

#[derive(Clone, Debug)]
pub struct GrpcLoggingConfig {
    /// Path prefixes that are never logged.
    pub ignored_paths: Vec<String>,
}

impl Default for GrpcLoggingConfig {
    fn default() -> Self {
        Self {
            ignored_paths: default_ignored_paths(),
        }
    }
}

/// Tower layer logging one line per gRPC request: operation, caller kind,
/// gRPC status and duration.
#[derive(Clone, Default)]
pub struct GrpcLoggingLayer {
    config: GrpcLoggingConfig,
}

impl GrpcLoggingLayer {
    pub fn new(config: GrpcLoggingConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for GrpcLoggingLayer {
    type Service = GrpcLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        GrpcLoggingService {
            inner: service,
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
pub struct GrpcLoggingService<S> {
    inner: S,
    config: GrpcLoggingConfig,
}

fn grpc_code<B>(response: &http::Response<B>) -> Code {
    response
        .headers()
        .get("grpc-status")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i32>().ok())
        .map(Code::from_i32)
        .unwrap_or(Code::Ok)
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for GrpcLoggingService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    S::Error: std::fmt::Display,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        let path = req.uri().path().to_string();
        let ignored = is_ignored(&self.config.ignored_paths, &path);
        let caller = caller_kind(req.headers());
        let start = Instant::now();
        let future = self.inner.call(req);
        let span = Span::current();

        Box::pin(
            async move {
                let result = future.await;
                if ignored {
                    return result;
                }

                let rpc = RpcPath::parse(&path);
                let elapsed_ms = start.elapsed().as_millis();
                match &result {
                    Ok(response) => {
                        let code = grpc_code(response);
                        // Streaming responses report their status in trailers.
                        info!(
                            service = %rpc.service,
                            method = %rpc.method,
                            caller,
                            grpc_status = ?code,
                            duration_ms = %elapsed_ms,
                            "{} {:?} in {}ms",
                            rpc.operation(),
                            code,
                            elapsed_ms
                        );
                    }
                    Err(e) => {
                        warn!(
                            service = %rpc.service,
                            method = %rpc.method,
                            caller,
                            duration_ms = %elapsed_ms,
                            error = %e,
                            "{} failed in {}ms",
                            rpc.operation(),
                            elapsed_ms
                        );
                    }
                }
                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grpc_code_from_headers() {
        let ok = http::Response::builder().body(()).unwrap();
        assert_eq!(grpc_code(&ok), Code::Ok);

        let failed = http::Response::builder()
            .header("grpc-status", "9")
            .body(())
            .unwrap();
        assert_eq!(grpc_code(&failed), Code::FailedPrecondition);
    }
}
