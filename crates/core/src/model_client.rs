use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;

use parley_model::{
    ModelProvider, ModelProviderError, ModelRequest, ModelResponse,
    ModelResponseEvent, UsageSummary,
};
use tracing::Instrument;

type SendRequestResult =
    Result<ModelClientResponse, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, Box<dyn Fn(String) + Send + 'static>)
        -> BoxedSendRequestFuture + Send + Sync
>;

/// A wrapper around a model provider that provides a type-erased
/// interface for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't
        // have a generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req, on_fragment| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let resp_or_err = fut.await;
                    handle_response::<P>(resp_or_err, on_fragment).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self { handler_fn }
    }

    /// Sends a request, forwarding each content fragment to
    /// `on_fragment` in arrival order, and returns the fully
    /// reassembled response.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    #[inline]
    pub async fn send_request(
        &self,
        req: ModelRequest,
        on_fragment: impl Fn(String) + Send + 'static,
    ) -> SendRequestResult {
        (self.handler_fn)(req, Box::new(on_fragment)).await
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug)]
pub struct ModelClientResponse {
    /// The concatenation of all content fragments.
    pub text: String,
    /// The endpoint's usage record, if it emitted one.
    pub usage: Option<UsageSummary>,
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
    on_fragment: Box<dyn Fn(String) + Send + 'static>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("got an error: {err:?}");
            return Err(Box::new(err));
        }
    };

    let mut text = String::new();
    let mut usage = None;

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                error!("got an error: {err:?}");
                return Err(Box::new(err));
            }
        };

        let Some(event) = event else {
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(fragment) => {
                text.push_str(&fragment);
                on_fragment(fragment);
            }
            ModelResponseEvent::Usage(summary) => {
                usage = Some(summary);
            }
        }
    }

    trace!("finished a request");

    Ok(ModelClientResponse { text, usage })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parley_model::ModelMessage;
    use parley_test_model::{
        PresetEvent, PresetResponse, TestModelProvider,
    };

    use super::*;

    #[tokio::test]
    async fn test_send_request() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_context_step();
        model_provider.add_response_step(PresetResponse::with_events([
            PresetEvent::MessageDelta("How ".to_owned()),
            PresetEvent::MessageDelta("are ".to_owned()),
            PresetEvent::MessageDelta("you?".to_owned()),
            PresetEvent::Usage(UsageSummary {
                prompt_tokens: 1,
                completion_tokens: 3,
                total_tokens: 4,
            }),
        ]));

        let model_client = ModelClient::new(model_provider);

        let fragment_count = Arc::new(AtomicUsize::new(0));
        let resp = model_client
            .send_request(
                ModelRequest {
                    messages: vec![ModelMessage::User("Hi".to_owned())],
                },
                {
                    let fragment_count = Arc::clone(&fragment_count);
                    move |_| {
                        fragment_count.fetch_add(1, Ordering::Relaxed);
                    }
                },
            )
            .await
            .unwrap();
        assert_eq!(resp.text, "How are you?");
        assert_eq!(resp.usage.unwrap().total_tokens, 4);
        assert_eq!(fragment_count.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_error_handling() {
        let model_provider = TestModelProvider::default();
        let model_client = ModelClient::new(model_provider);
        let resp_or_err = model_client
            .send_request(
                ModelRequest {
                    messages: vec![ModelMessage::User("Hi".to_owned())],
                },
                |_| {},
            )
            .await;
        assert!(resp_or_err.is_err());
    }
}
