use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use parley_model::{
    ErrorKind, ModelResponse, ModelResponseEvent, UsageSummary,
};
use pin_project_lite::pin_project;

use crate::Error;
use crate::io::Sse;
use crate::proto::ChatCompletionChunk;

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvents = Result<(Vec<ModelResponseEvent>, Sse), Error>;

pin_project! {
    pub struct OpenAIResponse {
        queued: VecDeque<ModelResponseEvent>,
        next_events_fut: Option<PinnedFuture<NextEvents>>,
    }
}

impl OpenAIResponse {
    /// Creates a response that streams events out of an SSE body.
    #[inline]
    pub(crate) fn from_sse(sse: Sse) -> Self {
        Self {
            queued: VecDeque::new(),
            next_events_fut: Some(Box::pin(next_events(sse))),
        }
    }

    /// Creates a response from an already-buffered completion, for
    /// endpoints running in non-streaming mode. The full text surfaces
    /// as a single delta event.
    pub(crate) fn from_buffered(
        content: Option<String>,
        usage: Option<UsageSummary>,
    ) -> Self {
        let mut queued = VecDeque::new();
        if let Some(content) = content.filter(|c| !c.is_empty()) {
            queued.push_back(ModelResponseEvent::MessageDelta(content));
        }
        if let Some(usage) = usage {
            queued.push_back(ModelResponseEvent::Usage(usage));
        }
        Self {
            queued,
            next_events_fut: None,
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        loop {
            if let Some(event) = this.queued.pop_front() {
                return Poll::Ready(Ok(Some(event)));
            }
            let Some(next_events_fut) = this.next_events_fut else {
                // The stream has been exhausted.
                return Poll::Ready(Ok(None));
            };
            match ready!(next_events_fut.as_mut().poll(cx)) {
                Ok((events, sse)) => {
                    if events.is_empty() {
                        *this.next_events_fut = None;
                        return Poll::Ready(Ok(None));
                    }
                    this.queued.extend(events);
                    // The stream may still have more data to pull,
                    // create a new future for the next events.
                    *this.next_events_fut = Some(Box::pin(next_events(sse)));
                }
                Err(err) => {
                    *this.next_events_fut = None;
                    return Poll::Ready(Err(err));
                }
            }
        }
    }
}

/// Pulls SSE payloads until one chunk yields at least one event, or the
/// stream ends (`[DONE]` or EOF), in which case the event list is
/// empty.
async fn next_events(mut sse: Sse) -> NextEvents {
    loop {
        let payload = match sse.next_data().await {
            Ok(Some(payload)) => payload,
            Ok(None) => return Ok((vec![], sse)),
            Err(err) => {
                return Err(Error::new(
                    format!("{err:?}"),
                    ErrorKind::Transport,
                ));
            }
        };
        trace!("got sse payload: {payload}");
        if payload == "[DONE]" {
            return Ok((vec![], sse));
        }

        // A single corrupt chunk must not lose already-received
        // content, so skip it instead of failing the whole stream.
        let chunk = match serde_json::from_str::<ChatCompletionChunk>(&payload)
        {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!("skipping malformed chunk: {err}");
                continue;
            }
        };

        let mut events = Vec::with_capacity(2);
        let content = chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty());
        if let Some(content) = content {
            events.push(ModelResponseEvent::MessageDelta(content));
        }
        if let Some(usage) = chunk.usage {
            events.push(ModelResponseEvent::Usage(usage.into()));
        }
        if !events.is_empty() {
            return Ok((events, sse));
        }
    }
}
