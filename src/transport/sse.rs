use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use snafu::prelude::*;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use url::Url;

use super::{error, OpenError, ReadyState, Transport, TransportHandle, TransportSignal};

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

static EVENT_STREAM_MIME: &str = "text/event-stream";

/// Error when create http client for sse transport
#[derive(Debug, Snafu)]
#[snafu(
    display("create sse http client failed: {source}"),
    visibility(pub(crate)),
    module(client_error),
    context(suffix(false))
)]
pub struct CreateClientError {
    /// source error
    pub source: reqwest::Error,
}

/// Server-sent events transport over HTTP
#[derive(Debug, Clone)]
pub struct SseTransport {
    client: reqwest::Client,
}

impl SseTransport {
    /// Create a transport with its own http client
    pub fn new() -> Result<Self, CreateClientError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .deflate(true)
            .user_agent(APP_USER_AGENT)
            .build()
            .context(client_error::CreateClient)?;

        Ok(Self { client })
    }

    /// Create a transport sharing an existing http client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for SseTransport {
    fn open(&self, url: &Url) -> Result<Box<dyn TransportHandle>, OpenError> {
        ensure!(
            url.scheme() == "http" || url.scheme() == "https",
            error::InvalidSchema {
                url: url.as_str(),
                schema: url.scheme(),
            }
        );

        log::debug!("Open sse stream {}", url);

        let (signal_tx, signal_rx) = mpsc::channel(32);
        let (ready_tx, ready_rx) = watch::channel(ReadyState::Connecting);

        let reader = tokio::spawn(read_stream(
            self.client.clone(),
            url.clone(),
            signal_tx,
            ready_tx,
        ));

        Ok(Box::new(SseHandle {
            signals: signal_rx,
            ready: ready_rx,
            reader,
            closed: false,
        }))
    }
}

async fn fail(signals: &mpsc::Sender<TransportSignal>, ready: &watch::Sender<ReadyState>) {
    ready.send_replace(ReadyState::Closed);
    let _ = signals.send(TransportSignal::Error).await;
}

async fn read_stream(
    client: reqwest::Client,
    url: Url,
    signals: mpsc::Sender<TransportSignal>,
    ready: watch::Sender<ReadyState>,
) {
    let resp = match client
        .get(url.clone())
        .header(ACCEPT, EVENT_STREAM_MIME)
        .header(CACHE_CONTROL, "no-cache")
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(err) => {
            log::warn!("Request sse stream {} failed: {}", url, err);
            fail(&signals, &ready).await;
            return;
        }
    };

    if !resp.status().is_success() {
        log::warn!("Sse stream {} got http status code {}", url, resp.status());
        fail(&signals, &ready).await;
        return;
    }

    if let Some(ct) = resp.headers().get(CONTENT_TYPE) {
        let ct = ct.to_str().unwrap_or_default();
        if !ct.contains(EVENT_STREAM_MIME) {
            log::warn!("Sse stream {} has content type {}", url, ct);
            fail(&signals, &ready).await;
            return;
        }
    }

    ready.send_replace(ReadyState::Open);
    if signals.send(TransportSignal::Open).await.is_err() {
        log::debug!("Signal receiver dropped, stop reading");
        return;
    }

    let mut events = resp.bytes_stream().eventsource();

    while let Some(item) = events.next().await {
        match item {
            Ok(event) if event.event.is_empty() || event.event == "message" => {
                log::trace!("Sse event id={:?} data={}", event.id, event.data);
                if signals
                    .send(TransportSignal::Message(event.data))
                    .await
                    .is_err()
                {
                    log::debug!("Signal receiver dropped, stop reading");
                    return;
                }
            }
            Ok(event) => {
                log::trace!("Skip sse event of type {}", event.event);
            }
            Err(err) => {
                log::warn!("Sse stream {} broken: {}", url, err);
                fail(&signals, &ready).await;
                return;
            }
        }
    }

    log::warn!("Sse stream {} ended by server", url);
    fail(&signals, &ready).await;
}

#[derive(Debug)]
struct SseHandle {
    signals: mpsc::Receiver<TransportSignal>,
    ready: watch::Receiver<ReadyState>,
    reader: JoinHandle<()>,
    closed: bool,
}

#[async_trait::async_trait]
impl TransportHandle for SseHandle {
    async fn next_signal(&mut self) -> Option<TransportSignal> {
        self.signals.recv().await
    }

    fn ready_state(&self) -> ReadyState {
        if self.closed {
            ReadyState::Closed
        } else {
            *self.ready.borrow()
        }
    }

    fn close(&mut self) {
        if !self.closed {
            log::trace!("Close sse handle");
            self.closed = true;
            self.reader.abort();
            self.signals.close();
        }
    }
}

impl Drop for SseHandle {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
