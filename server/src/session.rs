//! One connected voice client.
//!
//! A session owns the write half of its connection and every synthesis task
//! it has launched. Writes are serialized through a single async lock, so
//! chunks from concurrent requests never interleave inside a frame. Once
//! [`Session::stop`] begins, no further write reaches the transport: every
//! delivery re-checks the cancellation token after taking the lock, and
//! `stop` cancels the token before it waits for the lock.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use futures_util::{FutureExt, Stream, StreamExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tts_core::{AudioChunk, AudioStream, ChunkProducer, SynthesisRequest, VoiceSettings};

use crate::error::SessionError;
use crate::metrics::RelayMetrics;
use crate::protocol::{parse_control, ControlMessage, ErrorNotification, InboundFrame, OutboundFrame};
use crate::registry::{ClientId, SessionRegistry};
use crate::transport::{FrameSink, TransportError};

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Applied to requests that leave voice, rate or volume out.
    pub voice: VoiceSettings,
    /// Upper bound on a single transport write. A client that stops reading
    /// is disconnected once a write stalls this long.
    pub write_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            voice: VoiceSettings::default(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Everything a new session needs from the process.
#[derive(Clone)]
pub struct SessionContext {
    pub producer: Arc<dyn ChunkProducer>,
    pub registry: Arc<SessionRegistry>,
    pub metrics: Arc<RelayMetrics>,
    pub settings: SessionSettings,
}

pub struct Session {
    id: ClientId,
    generation: u64,
    sink: AsyncMutex<Box<dyn FrameSink>>,
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
    stopped: AtomicBool,
    producer: Arc<dyn ChunkProducer>,
    registry: Weak<SessionRegistry>,
    metrics: Arc<RelayMetrics>,
    settings: SessionSettings,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Build a session around an accepted connection. It is not registered
    /// and does not read anything until [`Session::run`] is driven.
    pub fn new(id: ClientId, sink: Box<dyn FrameSink>, ctx: &SessionContext) -> Arc<Self> {
        Arc::new(Self {
            id,
            generation: ctx.registry.next_generation(),
            sink: AsyncMutex::new(sink),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(JoinSet::new()),
            stopped: AtomicBool::new(false),
            producer: Arc::clone(&ctx.producer),
            registry: Arc::downgrade(&ctx.registry),
            metrics: Arc::clone(&ctx.metrics),
            settings: ctx.settings.clone(),
        })
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Synthesis tasks that have not finished yet.
    pub fn active_tasks(&self) -> usize {
        let mut tasks = self.lock_tasks();
        reap_finished(&self.id, &mut tasks);
        tasks.len()
    }

    /// Inbound message loop. Returns after the client goes away, the
    /// transport fails, or the session is stopped from elsewhere; the
    /// session is always stopped on return.
    pub async fn run<S>(self: &Arc<Self>, mut inbound: S)
    where
        S: Stream<Item = Result<InboundFrame, TransportError>> + Send + Unpin,
    {
        debug!(client_id = %self.id, generation = self.generation, "session loop started");

        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break,
                frame = inbound.next() => frame,
            };

            match frame {
                Some(Ok(InboundFrame::Text(text))) => {
                    let outcome = AssertUnwindSafe(self.handle(&text)).catch_unwind().await;
                    if let Err(panic) = outcome {
                        let detail = panic_message(panic.as_ref());
                        error!(client_id = %self.id, "Message handler panicked: {}", detail);
                        self.reject(SessionError::Internal(detail)).await;
                    }
                }
                Some(Ok(InboundFrame::Binary(bytes))) => {
                    debug!(client_id = %self.id, len = bytes.len(), "binary frame from client");
                    self.reject(SessionError::MalformedMessage(
                        "Expected a text frame carrying JSON".to_string(),
                    ))
                    .await;
                }
                Some(Ok(InboundFrame::Close)) | None => {
                    info!(client_id = %self.id, "Client disconnected");
                    break;
                }
                Some(Err(e)) => {
                    warn!(client_id = %self.id, "WebSocket receive error: {}", e);
                    break;
                }
            }
        }

        self.stop().await;
    }

    /// Process one inbound text message.
    pub async fn handle(self: &Arc<Self>, raw: &str) {
        match parse_control(raw) {
            Ok(ControlMessage::Tts(command)) => {
                let text = command.text.unwrap_or_default();
                if text.is_empty() {
                    debug!(client_id = %self.id, "{}", SessionError::EmptyRequest);
                    return;
                }
                let request = SynthesisRequest::new(text, &self.settings.voice).with_overrides(
                    command.voice,
                    command.rate,
                    command.volume,
                );
                self.spawn_synthesis(request);
            }
            Ok(ControlMessage::Ignored(kind)) => {
                debug!(client_id = %self.id, kind = ?kind, "ignoring message");
            }
            Err(e) => self.reject(e).await,
        }
    }

    /// Send one audio chunk. Any failure stops the session.
    pub async fn deliver_chunk(&self, chunk: AudioChunk) -> Result<(), SessionError> {
        self.deliver(OutboundFrame::Audio(chunk)).await
    }

    /// Send an error frame. Any failure stops the session.
    pub async fn deliver_error(&self, notification: ErrorNotification) -> Result<(), SessionError> {
        self.deliver(OutboundFrame::Error(notification)).await?;
        self.metrics.record_error_frame();
        Ok(())
    }

    /// Tear the session down. Safe to call any number of times from any task.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();

        if let Some(registry) = self.registry.upgrade() {
            registry.remove_session(self.id.as_str(), self.generation);
        }

        {
            let mut sink = self.sink.lock().await;
            match timeout(self.settings.write_timeout, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(client_id = %self.id, "close failed: {}", e),
                Err(_) => debug!(client_id = %self.id, "close timed out"),
            }
        }

        // Must stay after the last await: stop may be running inside one of
        // these tasks.
        let aborted = {
            let mut tasks = self.lock_tasks();
            reap_finished(&self.id, &mut tasks);
            let in_flight = tasks.len();
            tasks.abort_all();
            in_flight
        };

        self.metrics.record_session_closed(aborted);
        info!(
            client_id = %self.id,
            generation = self.generation,
            aborted,
            "Session stopped"
        );
    }

    fn spawn_synthesis(self: &Arc<Self>, request: SynthesisRequest) {
        if self.cancel.is_cancelled() {
            return;
        }
        debug!(
            client_id = %self.id,
            voice = %request.voice,
            chars = request.text.chars().count(),
            "starting synthesis"
        );
        let audio = self.producer.produce(request);
        let session = Arc::clone(self);

        let mut tasks = self.lock_tasks();
        reap_finished(&self.id, &mut tasks);
        tasks.spawn(async move { session.stream_audio(audio).await });
    }

    async fn stream_audio(self: Arc<Self>, mut audio: AudioStream) {
        let started = Instant::now();
        self.metrics.record_synthesis_started();
        let mut chunks = 0usize;
        let mut bytes = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.metrics.record_synthesis_cancelled();
                    debug!(client_id = %self.id, chunks, "synthesis cancelled");
                    return;
                }
                next = audio.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    let len = chunk.len();
                    if self.deliver_chunk(chunk).await.is_err() {
                        self.metrics.record_synthesis_cancelled();
                        return;
                    }
                    chunks += 1;
                    bytes += len;
                    self.metrics.record_chunk(len);
                }
                Some(Err(e)) => {
                    self.metrics.record_synthesis_failed();
                    let error = SessionError::from(e);
                    error!(client_id = %self.id, "{}", error);
                    let _ = self.deliver_error(ErrorNotification::from(&error)).await;
                    return;
                }
                None => {
                    self.metrics.record_synthesis_completed(started.elapsed());
                    info!(client_id = %self.id, chunks, bytes, "Synthesis complete");
                    return;
                }
            }
        }
    }

    /// Report a non-fatal error to the client.
    async fn reject(&self, error: SessionError) {
        self.metrics.record_rejected();
        warn!(client_id = %self.id, kind = ?error.kind(), "{}", error);
        let _ = self.deliver_error(ErrorNotification::from(&error)).await;
    }

    async fn deliver(&self, frame: OutboundFrame) -> Result<(), SessionError> {
        let result = {
            let mut sink = self.sink.lock().await;
            if self.cancel.is_cancelled() {
                return Err(SessionError::Closed);
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(SessionError::Closed),
                sent = timeout(self.settings.write_timeout, sink.send(frame)) => match sent {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(SessionError::TransportWrite(e.to_string())),
                    Err(_) => Err(SessionError::TransportWrite(format!(
                        "write timed out after {:?}",
                        self.settings.write_timeout
                    ))),
                },
            }
        };

        if let Err(e) = &result {
            if !matches!(e, SessionError::Closed) {
                warn!(client_id = %self.id, "{}", e);
            }
            self.stop().await;
        }
        result
    }

    fn lock_tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn reap_finished(id: &ClientId, tasks: &mut JoinSet<()>) {
    while let Some(done) = tasks.try_join_next() {
        if let Err(e) = done {
            if e.is_panic() {
                error!(client_id = %id, "Synthesis task panicked: {}", e);
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
