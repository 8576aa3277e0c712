use crate::chat::{CanonicalDelta, ChatRequest, EncodedImage, ResolvedMessage};
use crate::config::ModelRegistry;
use crate::error::{GatewayError, Result};
use crate::image;
use crate::normalize::DeltaNormalizer;
use crate::provider::{adapter_for, LineDecoder, LineEvent, LineSplitter};
use crate::session::SessionStore;
use futures::StreamExt;
use futures_core::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Dispatch orchestrator: selects the dialect for the requested model and
/// drives translate -> HTTP stream -> decode -> normalize as one lazy,
/// pull-driven pipeline.
#[derive(Clone)]
pub struct Gateway {
    http: reqwest::Client,
    registry: Arc<ModelRegistry>,
    sessions: SessionStore,
}

impl Gateway {
    pub fn new(http: reqwest::Client, registry: ModelRegistry) -> Self {
        Self {
            http,
            registry: Arc::new(registry),
            sessions: SessionStore::new(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Streams canonical deltas for one chat request.
    ///
    /// The returned stream is lazy: no network call is made until the
    /// first poll. Dropping the stream or firing `cancel` stops line
    /// reads and closes the upstream connection; cancellation ends the
    /// stream without an error item.
    pub fn generate_stream(
        &self,
        req: ChatRequest,
        conversation_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<CanonicalDelta>> {
        let http = self.http.clone();
        let registry = self.registry.clone();
        let sessions = self.sessions.clone();
        let conversation_id = conversation_id.into();

        futures::stream::once(async move {
            match start(http, registry, sessions, req, conversation_id, cancel).await {
                Ok(stream) => stream,
                Err(e) => futures::stream::iter([Err(e)]).boxed(),
            }
        })
        .flatten()
        .boxed()
    }
}

async fn start(
    http: reqwest::Client,
    registry: Arc<ModelRegistry>,
    sessions: SessionStore,
    req: ChatRequest,
    conversation_id: String,
    cancel: CancellationToken,
) -> Result<BoxStream<'static, Result<CanonicalDelta>>> {
    // A token that fired before the first poll must never reach the
    // provider: it would start generating (and billing) for a caller
    // that is already gone.
    if cancel.is_cancelled() {
        return Ok(futures::stream::empty().boxed());
    }

    let cfg = registry.lookup(&req.model)?;
    if cfg.endpoint.trim().is_empty() {
        return Err(GatewayError::ConfigurationMissing(format!(
            "provider '{}' has no endpoint",
            cfg.name
        )));
    }
    let api_key = std::env::var(&cfg.api_key_env).map_err(|_| {
        GatewayError::ConfigurationMissing(format!(
            "environment variable {} is not set",
            cfg.api_key_env
        ))
    })?;

    let adapter = adapter_for(&cfg);
    let fetch_images = cfg.flags.enable_image_upload && adapter.supports_images();
    let history = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(futures::stream::empty().boxed()),
        history = resolve_history(&http, &req, fetch_images) => history?,
    };
    let session = sessions.get(&conversation_id);
    let search = req.enable_search && cfg.flags.enable_search;
    let body = adapter.translate(&cfg, &history, session.as_deref(), search)?;

    tracing::debug!(
        model = %cfg.name,
        kind = ?cfg.kind,
        stream = cfg.flags.stream,
        turns = history.len(),
        "dispatching upstream request"
    );

    let send = adapter.prepare(&http, &cfg, &api_key)?.json(&body).send();
    let resp = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(futures::stream::empty().boxed()),
        resp = send => resp.map_err(|e| {
            tracing::warn!(error = %e, model = %cfg.name, "upstream request failed");
            GatewayError::UpstreamProtocol("upstream request failed".to_string())
        })?,
    };

    let status = resp.status();
    if !status.is_success() {
        let detail = resp.text().await.unwrap_or_default();
        // Upstream detail goes to the log, never back to the caller.
        tracing::warn!(%status, detail = %detail, model = %cfg.name, "upstream returned error status");
        return Err(GatewayError::UpstreamProtocol(format!(
            "upstream returned HTTP {}",
            status.as_u16()
        )));
    }

    let mut normalizer = DeltaNormalizer::new(cfg.flags.incremental_output);

    if !cfg.flags.stream {
        let text = resp
            .text()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "failed to read upstream body");
                GatewayError::UpstreamProtocol("upstream response unreadable".to_string())
            })?;
        let frag = adapter.decode_body(&text)?;
        if let Some(sid) = &frag.session_id {
            sessions.set(&conversation_id, sid.clone());
        }
        let mut deltas: Vec<Result<CanonicalDelta>> =
            normalizer.push(&frag).into_iter().map(Ok).collect();
        if let Some(close) = normalizer.close_delta() {
            deltas.push(Ok(close));
        }
        return Ok(futures::stream::iter(deltas).boxed());
    }

    let (tx, rx) = mpsc::channel::<Result<CanonicalDelta>>(64);
    let mut decoder = adapter.decoder();
    let reader_cancel = cancel.clone();

    tokio::spawn(async move {
        let mut bytes = resp.bytes_stream();
        let mut splitter = LineSplitter::new();

        'read: loop {
            let item = tokio::select! {
                biased;
                _ = reader_cancel.cancelled() => {
                    // Dropping `bytes` aborts the connection; nothing
                    // buffered survives cancellation.
                    return;
                }
                item = bytes.next() => item,
            };

            let Some(item) = item else {
                // End of body without an explicit terminator (Gemini).
                if let Some(line) = splitter.finish() {
                    match feed(
                        &line,
                        decoder.as_mut(),
                        &mut normalizer,
                        &sessions,
                        &conversation_id,
                        &tx,
                    )
                    .await
                    {
                        Feed::Continue => {}
                        Feed::Done | Feed::ReceiverGone => break 'read,
                        Feed::Failed => return,
                    }
                }
                break 'read;
            };

            let chunk = match item {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(error = %e, "network error mid-stream");
                    let _ = tx
                        .send(Err(GatewayError::UpstreamProtocol(
                            "upstream stream failed".to_string(),
                        )))
                        .await;
                    return;
                }
            };

            for line in splitter.push(&chunk) {
                match feed(
                    &line,
                    decoder.as_mut(),
                    &mut normalizer,
                    &sessions,
                    &conversation_id,
                    &tx,
                )
                .await
                {
                    Feed::Continue => {}
                    Feed::Done | Feed::ReceiverGone => break 'read,
                    Feed::Failed => return,
                }
            }
        }

        // Normal end of stream: close a dangling reasoning block.
        if let Some(close) = normalizer.close_delta() {
            let _ = tx.send(Ok(close)).await;
        }
    });

    // Fragments already sitting in the channel when the token fires are
    // discarded, so delivery stops at the very next pull, not merely at
    // the next upstream read.
    let out = ReceiverStream::new(rx)
        .take_while(move |_| futures::future::ready(!cancel.is_cancelled()));
    Ok(out.boxed())
}

enum Feed {
    Continue,
    /// Explicit terminator reached.
    Done,
    /// Consumer stopped pulling; stop reading upstream.
    ReceiverGone,
    /// Protocol error already sent downstream.
    Failed,
}

async fn feed(
    line: &str,
    decoder: &mut dyn LineDecoder,
    normalizer: &mut DeltaNormalizer,
    sessions: &SessionStore,
    conversation_id: &str,
    tx: &mpsc::Sender<Result<CanonicalDelta>>,
) -> Feed {
    let event = match decoder.push_line(line) {
        Ok(ev) => ev,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            return Feed::Failed;
        }
    };
    match event {
        LineEvent::Skip => Feed::Continue,
        LineEvent::Done => Feed::Done,
        LineEvent::Fragment(frag) => {
            if let Some(sid) = &frag.session_id {
                sessions.set(conversation_id, sid.clone());
            }
            for delta in normalizer.push(&frag) {
                if tx.send(Ok(delta)).await.is_err() {
                    return Feed::ReceiverGone;
                }
            }
            Feed::Continue
        }
    }
}

async fn resolve_history(
    http: &reqwest::Client,
    req: &ChatRequest,
    fetch_images: bool,
) -> Result<Vec<ResolvedMessage>> {
    let mut out = Vec::with_capacity(req.history.len());
    for msg in &req.history {
        let mut images = Vec::new();
        // Images are silently dropped when the provider config does not
        // take uploads or the dialect is text-only; no fetch happens at
        // all in either case.
        if fetch_images {
            for url in &msg.images {
                let base64 = image::fetch_and_encode(http, url).await?;
                images.push(EncodedImage { base64 });
            }
        }
        out.push(ResolvedMessage {
            role: msg.role,
            content: msg.content.clone(),
            images,
        });
    }
    Ok(out)
}
