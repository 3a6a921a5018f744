//! Scripted transport for driving the client in tests.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use tokio::sync::mpsc;
use url::Url;

use super::{OpenError, ReadyState, Transport, TransportHandle, TransportSignal};

#[derive(Debug, Default)]
struct Inner {
    remotes: Vec<FakeRemote>,
    refuse_next: usize,
}

/// Transport whose handles are controlled by the test through [`FakeRemote`]s
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeTransport {
    inner: Arc<Mutex<Inner>>,
}

impl FakeTransport {
    pub fn refuse_next(&self, n: usize) {
        self.inner.lock().unwrap().refuse_next = n;
    }

    /// open calls including refused ones
    pub fn opened(&self) -> usize {
        self.inner.lock().unwrap().remotes.len()
    }

    pub fn remote(&self, i: usize) -> FakeRemote {
        self.inner.lock().unwrap().remotes[i].clone()
    }

    pub fn last(&self) -> FakeRemote {
        self.inner.lock().unwrap().remotes.last().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    fn open(&self, url: &Url) -> Result<Box<dyn TransportHandle>, OpenError> {
        let mut inner = self.inner.lock().unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let remote = FakeRemote {
            tx,
            ready: Arc::new(Mutex::new(ReadyState::Connecting)),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let handle = FakeHandle {
            rx,
            ready: remote.ready.clone(),
            closed: remote.closed.clone(),
        };

        inner.remotes.push(remote);

        if inner.refuse_next > 0 {
            inner.refuse_next -= 1;
            return Err(OpenError::Refused {
                url: url.to_string(),
                reason: "scripted refusal".to_string(),
            });
        }

        Ok(Box::new(handle))
    }
}

/// Server side of one fake handle
#[derive(Debug, Clone)]
pub(crate) struct FakeRemote {
    tx: mpsc::UnboundedSender<TransportSignal>,
    ready: Arc<Mutex<ReadyState>>,
    closed: Arc<AtomicBool>,
}

impl FakeRemote {
    pub fn open(&self) {
        *self.ready.lock().unwrap() = ReadyState::Open;
        let _ = self.tx.send(TransportSignal::Open);
    }

    pub fn message(&self, payload: &str) {
        let _ = self.tx.send(TransportSignal::Message(payload.to_string()));
    }

    pub fn error(&self) {
        *self.ready.lock().unwrap() = ReadyState::Closed;
        let _ = self.tx.send(TransportSignal::Error);
    }

    /// closed without telling anyone
    pub fn go_silent(&self) {
        *self.ready.lock().unwrap() = ReadyState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct FakeHandle {
    rx: mpsc::UnboundedReceiver<TransportSignal>,
    ready: Arc<Mutex<ReadyState>>,
    closed: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl TransportHandle for FakeHandle {
    async fn next_signal(&mut self) -> Option<TransportSignal> {
        self.rx.recv().await
    }

    fn ready_state(&self) -> ReadyState {
        if self.closed.load(Ordering::SeqCst) {
            ReadyState::Closed
        } else {
            *self.ready.lock().unwrap()
        }
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.rx.close();
    }
}
