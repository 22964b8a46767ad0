use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::{Request, Response};
use opentelemetry::{global, propagation::Extractor, trace::TraceContextExt as _};
use tower::{Layer, Service};
use tracing::{field, info_span, Instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::path::{default_ignored_paths, is_ignored, RpcPath};

#[derive(Clone, Debug)]
pub struct GrpcTracingConfig {
    pub ignored_paths: Vec<String>,
}

impl Default for GrpcTracingConfig {
    fn default() -> Self {
        Self {
            ignored_paths: default_ignored_paths(),
        }
    }
}

/// Tower layer opening one span per gRPC request, parented on the W3C
/// trace context carried in the request headers.
#[derive(Clone, Default)]
pub struct GrpcTracingLayer {
    config: GrpcTracingConfig,
}

impl GrpcTracingLayer {
    pub fn new(config: GrpcTracingConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for GrpcTracingLayer {
    type Service = GrpcTracingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        GrpcTracingService {
            inner: service,
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
pub struct GrpcTracingService<S> {
    inner: S,
    config: GrpcTracingConfig,
}

struct HeaderExtractor<'a>(&'a http::HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

fn request_span(rpc: &RpcPath) -> Span {
    info_span!(
        target: "grpc",
        "grpc_request",
        otel.name = %rpc.operation(),
        rpc.system = "grpc",
        rpc.service = %format!("{}.{}", rpc.package, rpc.service),
        rpc.method = %rpc.method,
        rpc.grpc.status_code = field::Empty,
        otel.status_code = field::Empty,
        trace_id = field::Empty,
    )
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for GrpcTracingService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Error: std::fmt::Display,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let path = req.uri().path().to_string();
        if is_ignored(&self.config.ignored_paths, &path) {
            return Box::pin(self.inner.call(req));
        }

        let parent = global::get_text_map_propagator(|propagator| {
            propagator.extract(&HeaderExtractor(req.headers()))
        });
        let span = request_span(&RpcPath::parse(&path));
        span.set_parent(parent);

        let mut inner = self.inner.clone();
        Box::pin(
            async move {
                let current = Span::current();
                let context = current.context();
                let span_context = context.span().span_context().clone();
                if span_context.is_valid() {
                    current.record("trace_id", span_context.trace_id().to_string());
                }

                let result = inner.call(req).await;

                let code = match &result {
                    Ok(response) => response
                        .headers()
                        .get("grpc-status")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<i32>().ok())
                        .unwrap_or(0),
                    // UNKNOWN
                    Err(_) => 2,
                };
                current.record("rpc.grpc.status_code", code);
                if code != 0 {
                    current.record("otel.status_code", "ERROR");
                }
                result
            }
            .instrument(span),
        )
    }
}
