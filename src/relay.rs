use std::task::{Context, Poll};

use tokio_stream::{Stream, StreamExt};
use tracing::{error, info, info_span, warn, Span};
use uuid::Uuid;

use crate::accumulator::FragmentAccumulator;
use crate::models::{GenerationRequest, OutwardEvent};
use crate::prompt;
use crate::render::TemplateRenderer;
use crate::upstream::UpstreamStreamClient;

/// Drives prompt -> upstream -> (accumulate -> render) for one request at a
/// time per returned stream. Each stream owns its upstream connection and
/// buffer; dropping it closes the connection.
pub struct RelayOrchestrator {
    client: UpstreamStreamClient,
    renderer: TemplateRenderer,
}

impl RelayOrchestrator {
    pub fn new(client: UpstreamStreamClient) -> Self {
        Self { client, renderer: TemplateRenderer }
    }

    /// Every model fragment becomes one `Data` event, then `Done`.
    pub fn stream_raw(&self, request: &GenerationRequest) -> impl Stream<Item = OutwardEvent> + Send + 'static {
        let prompt = prompt::build(&request.topic, &request.description, request.template_kind);
        let fragments = self.client.stream(&prompt);
        let request_id = Uuid::new_v4();
        let topic = request.topic.clone();
        let template = request.template_kind.as_str();
        let images = request.images.len();
        let span = info_span!("request", %request_id, template, mode = "raw");

        let events = async_stream::stream! {
            info!(%topic, images, "🚀 Starting raw content stream");
            let mut fragments = Box::pin(fragments);
            let mut sent = 0usize;
            while let Some(item) = fragments.next().await {
                match item {
                    Ok(fragment) => {
                        sent += 1;
                        yield OutwardEvent::data(fragment);
                    }
                    Err(e) => {
                        error!(error = %e, sent, "❌ Raw content stream failed");
                        yield OutwardEvent::Error { message: e.to_string() };
                        return;
                    }
                }
            }
            info!(fragments = sent, "✅ Raw content stream finished");
            yield OutwardEvent::Done;
        };
        in_span(span, events)
    }

    /// Buffers the whole model output, then emits one `Data` event per
    /// rendered HTML fragment, then `Done`. Unparsable output is rendered as
    /// the fallback document rather than an `Error`.
    pub fn stream_rendered(&self, request: &GenerationRequest) -> impl Stream<Item = OutwardEvent> + Send + 'static {
        let kind = request.template_kind;
        let prompt = prompt::build(&request.topic, &request.description, kind);
        let fragments = self.client.stream(&prompt);
        let limit = self.client.settings().max_document_bytes;
        let renderer = self.renderer;
        let request_id = Uuid::new_v4();
        let topic = request.topic.clone();
        let images = request.images.len();
        let span = info_span!("request", %request_id, template = kind.as_str(), mode = "rendered");

        let events = async_stream::stream! {
            info!(%topic, images, "🚀 Starting rendered content stream");
            let mut fragments = Box::pin(fragments);
            let mut acc = FragmentAccumulator::with_limit(limit);
            while let Some(item) = fragments.next().await {
                match item {
                    Ok(fragment) => acc.push(&fragment),
                    Err(e) => {
                        error!(error = %e, received = acc.fragments(), "❌ Rendered content stream failed");
                        yield OutwardEvent::Error { message: e.to_string() };
                        return;
                    }
                }
            }
            drop(fragments);
            info!(fragments = acc.fragments(), bytes = acc.buffered_bytes(), "📥 Model output complete, parsing");

            let outcome = acc.finish();
            if let Err(err) = &outcome {
                warn!(reason = %err.reason, "⚠️ Model output did not parse, sending raw-content document");
            }
            let mut sent = 0usize;
            for fragment in renderer.render_outcome(&outcome, kind) {
                sent += 1;
                yield OutwardEvent::data(fragment);
            }
            info!(fragments = sent, "✅ Rendered content stream finished");
            yield OutwardEvent::Done;
        };
        in_span(span, events)
    }
}

/// Enters `span` around every poll, so upstream log lines carry the request id.
fn in_span<S>(span: Span, events: S) -> impl Stream<Item = S::Item> + Send + 'static
where
    S: Stream + Send + 'static,
{
    let mut events = Box::pin(events);
    futures_util::stream::poll_fn(move |cx: &mut Context<'_>| -> Poll<Option<S::Item>> {
        let _entered = span.enter();
        events.as_mut().poll_next(cx)
    })
}
