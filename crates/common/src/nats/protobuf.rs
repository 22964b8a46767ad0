use crate::nats::{set_parent_from_headers, ConsumeRequest, ConsumeResponse};
use anyhow::Result;
use futures::future::BoxFuture;
use prost::Message as ProstMessage;
use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{error, info_span, Instrument};

/// Business handler for one decoded protobuf message.
pub type ProtobufHandler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Tower service decoding each message as `T` before handing it to the
/// handler. Messages that do not decode are acked and dropped so they are
/// not redelivered; handler failures are naked.
pub struct ProtobufService<T> {
    handler: ProtobufHandler<T>,
    _message: PhantomData<fn() -> T>,
}

impl<T> Clone for ProtobufService<T> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            _message: PhantomData,
        }
    }
}

impl<T> ProtobufService<T> {
    pub fn new(handler: ProtobufHandler<T>) -> Self {
        Self {
            handler,
            _message: PhantomData,
        }
    }
}

impl<T> Service<ConsumeRequest> for ProtobufService<T>
where
    T: ProstMessage + Default + Send + 'static,
{
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let span = info_span!(
            "nats_message",
            messaging.system = "nats",
            messaging.destination.name = %req.subject,
            payload_size = req.payload.len(),
        );
        set_parent_from_headers(&span, req.headers.as_ref());
        let handler = self.handler.clone();

        Box::pin(
            async move {
                let decoded = match T::decode(req.payload.as_ref()) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        error!(
                            error = %e,
                            subject = %req.subject,
                            message_type = std::any::type_name::<T>(),
                            "failed to decode protobuf message, dropping"
                        );
                        return Ok(ConsumeResponse::Ack);
                    }
                };
                match handler(decoded).await {
                    Ok(()) => Ok(ConsumeResponse::Ack),
                    Err(e) => Ok(ConsumeResponse::nak(e.to_string())),
                }
            }
            .instrument(span),
        )
    }
}
