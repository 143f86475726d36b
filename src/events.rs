//! Response event protocol.
//!
//! The interceptor consumes and re-emits a response as an ordered event
//! stream: exactly one [`ResponseStart`] followed by one or more
//! [`BodyChunk`]s. A chunk with `has_more == true` marks the response as
//! streaming. Downstream delivery goes through a [`ResponseSink`], which
//! must receive events in original order, exactly once.

use async_trait::async_trait;
use bytes::Bytes;

/// Status and headers of an outbound response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseStart {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

/// One piece of the response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyChunk {
    pub bytes: Bytes,
    /// More chunks follow. True on any chunk means the response is
    /// streaming and will not be cached.
    pub has_more: bool,
}

impl BodyChunk {
    pub fn last(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            has_more: false,
        }
    }

    pub fn partial(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            has_more: true,
        }
    }
}

/// A response event consumed and re-emitted by the interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEvent {
    Start(ResponseStart),
    Body(BodyChunk),
}

/// Downstream consumer of response events.
#[async_trait]
pub trait ResponseSink: Send {
    async fn emit(&mut self, event: ResponseEvent);
}

/// Sink that collects emitted events in order.
///
/// Used by the middleware to pull events back out of the interceptor and by
/// tests to assert ordering.
#[derive(Debug, Default)]
pub struct BufferSink {
    events: Vec<ResponseEvent>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return all events emitted so far.
    pub fn drain(&mut self) -> Vec<ResponseEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[ResponseEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl ResponseSink for BufferSink {
    async fn emit(&mut self, event: ResponseEvent) {
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffer_sink_preserves_order() {
        let mut sink = BufferSink::new();
        sink.emit(ResponseEvent::Start(ResponseStart {
            status: 200,
            headers: vec![],
        }))
        .await;
        sink.emit(ResponseEvent::Body(BodyChunk::partial("a"))).await;
        sink.emit(ResponseEvent::Body(BodyChunk::last("b"))).await;

        let events = sink.drain();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ResponseEvent::Start(_)));
        assert!(matches!(
            &events[1],
            ResponseEvent::Body(chunk) if chunk.has_more && chunk.bytes == "a"
        ));
        assert!(matches!(
            &events[2],
            ResponseEvent::Body(chunk) if !chunk.has_more && chunk.bytes == "b"
        ));
        assert!(sink.is_empty());
    }
}
