//! WebSocket client to the media backend.
//!
//! One [`BackendClient`] value is owned by the process and injected into
//! the ingest controller. The connection lifecycle is
//! DISCONNECTED -> CONNECTING -> CONNECTED: [`BackendClient::connect`]
//! refuses to overlap with itself, and any transport loss drains every
//! outstanding request before the [`BackendEvent::Disconnected`]
//! notification goes out.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use actix_codec::Framed;
use actix_http::ws;
use async_trait::async_trait;
use awc::BoxedSocket;
use futures::{
    channel::{mpsc, oneshot},
    stream::{SplitSink, SplitStream},
    SinkExt as _, StreamExt as _,
};

use crate::{conf, prelude::*, sdp::Candidate, utils};

use super::{
    proto::{
        Body, ForwardParams, HandleId, Incoming, Jsep, JoinParams,
        PluginData, Request, SessionId,
    },
    BackendError, BackendEvent, MediaBackend, PublishReply,
};

type WsSink = SplitSink<Framed<BoxedSocket, ws::Codec>, ws::Message>;
type WsStream = SplitStream<Framed<BoxedSocket, ws::Codec>>;
type Waiter = oneshot::Sender<Result<Incoming, BackendError>>;

/// Client holding the single WebSocket session to the media backend.
///
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct BackendClient {
    inner: Arc<Inner>,
}

struct Inner {
    conf: conf::Backend,
    events: mpsc::UnboundedSender<BackendEvent>,
    state: Mutex<ConnState>,
    transactions: Mutex<HashMap<String, Waiter>>,
    /// Monotonic connection counter, letting tasks of a previous
    /// connection detect that they are stale.
    generation: AtomicU64,
}

enum ConnState {
    Disconnected,
    Connecting,
    Connected {
        session: SessionId,
        tx: mpsc::UnboundedSender<ws::Message>,
        generation: u64,
    },
}

impl BackendClient {
    /// Creates a new disconnected client, returning it together with the
    /// stream of [`BackendEvent`]s it will push.
    #[must_use]
    pub fn new(
        conf: conf::Backend,
    ) -> (Self, mpsc::UnboundedReceiver<BackendEvent>) {
        let (events, rx) = mpsc::unbounded();
        let client = Self {
            inner: Arc::new(Inner {
                conf,
                events,
                state: Mutex::new(ConnState::Disconnected),
                transactions: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        };
        (client, rx)
    }

    /// Establishes the WebSocket transport and creates the backend
    /// session, starting the keep-alive task.
    ///
    /// # Errors
    ///
    /// - [`BackendError::AlreadyConnected`] if a connect attempt overlaps
    ///   with another one (or with a live connection).
    /// - [`BackendError::Transport`] / [`BackendError::Rejected`] on
    ///   handshake failures; the client is DISCONNECTED again afterwards.
    pub async fn connect(&self) -> Result<(), BackendError> {
        {
            let mut state = self.inner.state.lock().unwrap();
            match *state {
                ConnState::Disconnected => *state = ConnState::Connecting,
                _ => return Err(BackendError::AlreadyConnected),
            }
        }

        match self.establish().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut state = self.inner.state.lock().unwrap();
                if matches!(*state, ConnState::Connecting) {
                    *state = ConnState::Disconnected;
                }
                Err(e)
            }
        }
    }

    /// Destroys the backend session (fire-and-forget) and drops the
    /// connection without emitting [`BackendEvent::Disconnected`].
    pub fn close(&self) {
        let sender = {
            let state = self.inner.state.lock().unwrap();
            match &*state {
                ConnState::Connected { session, tx, .. } => {
                    Some((tx.clone(), *session))
                }
                _ => None,
            }
        };
        if let Some((tx, session)) = sender {
            let _ = tx.unbounded_send(encode(&Request::Destroy {
                session_id: session,
                transaction: utils::nonce(),
            }));
        }
        // Stale-ify the reader so transport teardown stays silent.
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        *self.inner.state.lock().unwrap() = ConnState::Disconnected;
        drain_waiters(&self.inner);
    }

    async fn establish(&self) -> Result<(), BackendError> {
        let (_, framed) = awc::Client::new()
            .ws(self.inner.conf.url.as_str())
            .connect()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let generation =
            self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (sink, stream) = framed.split();
        let (tx, rx) = mpsc::unbounded();

        actix_rt::spawn(write_frames(rx, sink));
        actix_rt::spawn(read_frames(
            Arc::clone(&self.inner),
            stream,
            tx.clone(),
            generation,
        ));

        let reply = self
            .request(
                &tx,
                Request::Create {
                    transaction: utils::nonce(),
                },
            )
            .await?;
        let session = match reply {
            Incoming::Success {
                data: Some(data), ..
            } => SessionId(data.id),
            Incoming::Error { error, .. } => {
                return Err(BackendError::Rejected {
                    code: error.code,
                    reason: error.reason,
                });
            }
            _ => return Err(BackendError::UnexpectedReply),
        };

        *self.inner.state.lock().unwrap() = ConnState::Connected {
            session,
            tx,
            generation,
        };
        actix_rt::spawn(keep_alive(Arc::clone(&self.inner), generation));

        info!("Backend session {} established", session);
        Ok(())
    }

    /// Sends the request and awaits its terminal reply.
    ///
    /// `ack` frames leave the waiter registered; the waiter is removed on
    /// the terminal frame, on timeout and on connection loss.
    async fn request(
        &self,
        tx: &mpsc::UnboundedSender<ws::Message>,
        request: Request,
    ) -> Result<Incoming, BackendError> {
        let transaction = request.transaction().to_owned();
        let (waiter, reply) = oneshot::channel();
        self.inner
            .transactions
            .lock()
            .unwrap()
            .insert(transaction.clone(), waiter);

        if tx.unbounded_send(encode(&request)).is_err() {
            self.inner.transactions.lock().unwrap().remove(&transaction);
            return Err(BackendError::NotConnected);
        }

        match tokio::time::timeout(self.inner.conf.request_timeout, reply)
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BackendError::Disconnected),
            Err(_) => {
                self.inner
                    .transactions
                    .lock()
                    .unwrap()
                    .remove(&transaction);
                Err(BackendError::RequestTimeout)
            }
        }
    }

    /// Returns the write half and session id of the live connection.
    fn sender(
        &self,
    ) -> Result<(mpsc::UnboundedSender<ws::Message>, SessionId), BackendError>
    {
        match &*self.inner.state.lock().unwrap() {
            ConnState::Connected { session, tx, .. } => {
                Ok((tx.clone(), *session))
            }
            _ => Err(BackendError::NotConnected),
        }
    }

    /// Sends a plugin request on the handle and interprets the terminal
    /// reply, surfacing plugin-level errors.
    async fn plugin_request(
        &self,
        handle: HandleId,
        body: Body,
        jsep: Option<Jsep>,
    ) -> Result<(Option<PluginData>, Option<Jsep>), BackendError> {
        let (tx, session) = self.sender()?;
        let reply = self
            .request(
                &tx,
                Request::Message {
                    session_id: session,
                    handle_id: handle,
                    transaction: utils::nonce(),
                    body,
                    jsep,
                },
            )
            .await?;
        let (plugindata, jsep) = match reply {
            Incoming::Success { plugindata, .. } => (plugindata, None),
            Incoming::Event {
                plugindata, jsep, ..
            } => (plugindata, jsep),
            Incoming::Error { error, .. } => {
                return Err(BackendError::Rejected {
                    code: error.code,
                    reason: error.reason,
                });
            }
            _ => return Err(BackendError::UnexpectedReply),
        };
        if let Some(e) = plugindata.as_ref().and_then(PluginData::error) {
            return Err(BackendError::Rejected { code: 0, reason: e });
        }
        Ok((plugindata, jsep))
    }
}

#[async_trait]
impl MediaBackend for BackendClient {
    fn is_connected(&self) -> bool {
        matches!(
            *self.inner.state.lock().unwrap(),
            ConnState::Connected { .. },
        )
    }

    async fn attach(&self) -> Result<HandleId, BackendError> {
        let (tx, session) = self.sender()?;
        let reply = self
            .request(
                &tx,
                Request::Attach {
                    session_id: session,
                    plugin: self.inner.conf.plugin.clone(),
                    transaction: utils::nonce(),
                },
            )
            .await?;
        match reply {
            Incoming::Success {
                data: Some(data), ..
            } => Ok(HandleId(data.id)),
            Incoming::Error { error, .. } => Err(BackendError::Rejected {
                code: error.code,
                reason: error.reason,
            }),
            _ => Err(BackendError::UnexpectedReply),
        }
    }

    async fn join_and_configure(
        &self,
        handle: HandleId,
        params: JoinParams,
        offer: String,
    ) -> Result<PublishReply, BackendError> {
        let (plugindata, jsep) = self
            .plugin_request(
                handle,
                Body::JoinAndConfigure(params),
                Some(Jsep::offer(offer)),
            )
            .await?;
        let answer = jsep.ok_or(BackendError::UnexpectedReply)?.sdp;
        Ok(PublishReply {
            answer,
            publisher: plugindata.as_ref().and_then(PluginData::publisher),
        })
    }

    async fn reconfigure(
        &self,
        handle: HandleId,
        offer: String,
    ) -> Result<String, BackendError> {
        let (_, jsep) = self
            .plugin_request(
                handle,
                Body::Configure {
                    audio: true,
                    video: true,
                },
                Some(Jsep::offer(offer)),
            )
            .await?;
        jsep.map(|j| j.sdp).ok_or(BackendError::UnexpectedReply)
    }

    async fn trickle(
        &self,
        handle: HandleId,
        candidates: Vec<Candidate>,
    ) -> Result<(), BackendError> {
        if candidates.is_empty() {
            return Ok(());
        }
        let (tx, session) = self.sender()?;
        tx.unbounded_send(encode(&Request::Trickle {
            session_id: session,
            handle_id: handle,
            transaction: utils::nonce(),
            payload: candidates.into(),
        }))
        .map_err(|_| BackendError::NotConnected)
    }

    async fn forward_rtp(
        &self,
        handle: HandleId,
        params: ForwardParams,
    ) -> Result<(), BackendError> {
        let _ = self
            .plugin_request(handle, Body::RtpForward(params), None)
            .await?;
        Ok(())
    }

    async fn detach(&self, handle: HandleId) -> Result<(), BackendError> {
        let (tx, session) = match self.sender() {
            Ok(sender) => sender,
            // The handle died with the connection.
            Err(_) => return Ok(()),
        };
        match self
            .request(
                &tx,
                Request::Detach {
                    session_id: session,
                    handle_id: handle,
                    transaction: utils::nonce(),
                },
            )
            .await
        {
            Ok(_) | Err(BackendError::Rejected { .. }) => Ok(()),
            Err(other) => Err(other),
        }
    }
}

/// Encodes a request into a WebSocket text frame.
fn encode(request: &Request) -> ws::Message {
    ws::Message::Text(serde_json::to_string(request).unwrap().into())
}

/// Forwards queued frames into the WebSocket sink until either side
/// closes.
async fn write_frames(
    mut rx: mpsc::UnboundedReceiver<ws::Message>,
    mut sink: WsSink,
) {
    while let Some(msg) = rx.next().await {
        if sink.send(msg).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Reads frames until the transport dies, routing every parsed message.
async fn read_frames(
    inner: Arc<Inner>,
    mut stream: WsStream,
    tx: mpsc::UnboundedSender<ws::Message>,
    generation: u64,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(ws::Frame::Text(bytes)) | Ok(ws::Frame::Binary(bytes)) => {
                match serde_json::from_slice::<Incoming>(&bytes) {
                    Ok(incoming) => route(&inner, incoming),
                    Err(e) => warn!("Unparsable backend frame: {}", e),
                }
            }
            Ok(ws::Frame::Ping(payload)) => {
                if tx.unbounded_send(ws::Message::Pong(payload)).is_err() {
                    break;
                }
            }
            Ok(ws::Frame::Close(reason)) => {
                debug!("Backend closed the connection: {:?}", reason);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Backend transport failure: {}", e);
                break;
            }
        }
    }
    transport_lost(&inner, generation);
}

/// Routes one inbound frame: solicited frames complete their waiter
/// (which is removed before any event handling can run), everything else
/// is interpreted as an unsolicited event.
fn route(inner: &Arc<Inner>, frame: Incoming) {
    if let Some(transaction) = frame.transaction() {
        if frame.is_ack() {
            // Terminal reply follows later; the waiter stays registered.
            return;
        }
        let waiter =
            inner.transactions.lock().unwrap().remove(transaction);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(Ok(frame));
            }
            None => debug!("Reply for unknown transaction dropped"),
        }
        return;
    }

    match frame {
        Incoming::HangUp {
            sender: Some(handle),
            reason,
        } => {
            info!(
                "Backend hung up handle {}: {}",
                handle,
                reason.as_deref().unwrap_or("unknown"),
            );
            let _ = inner
                .events
                .unbounded_send(BackendEvent::HandleClosed(handle));
        }
        Incoming::Detached {
            sender: Some(handle),
        } => {
            let _ = inner
                .events
                .unbounded_send(BackendEvent::HandleClosed(handle));
        }
        Incoming::Timeout { session_id } => {
            warn!("Backend expired session {}", session_id);
            disconnect_now(inner);
        }
        _ => {}
    }
}

/// Reacts to the transport of the provided connection generation dying.
fn transport_lost(inner: &Arc<Inner>, generation: u64) {
    if inner.generation.load(Ordering::SeqCst) != generation {
        return;
    }
    disconnect_now(inner);
}

/// Moves the client to DISCONNECTED, drains all waiters and, if a session
/// was live, emits [`BackendEvent::Disconnected`].
fn disconnect_now(inner: &Arc<Inner>) {
    let was_connected = {
        let mut state = inner.state.lock().unwrap();
        let was = matches!(*state, ConnState::Connected { .. });
        *state = ConnState::Disconnected;
        was
    };
    drain_waiters(inner);
    if was_connected {
        info!("Backend connection lost");
        let _ = inner.events.unbounded_send(BackendEvent::Disconnected);
    }
}

/// Fails every outstanding request with [`BackendError::Disconnected`].
fn drain_waiters(inner: &Inner) {
    let waiters: Vec<Waiter> = inner
        .transactions
        .lock()
        .unwrap()
        .drain()
        .map(|(_, waiter)| waiter)
        .collect();
    for waiter in waiters {
        let _ = waiter.send(Err(BackendError::Disconnected));
    }
}

/// Emits a keep-alive on the session every configured interval, for as
/// long as the connection of the provided generation stays live.
async fn keep_alive(inner: Arc<Inner>, generation: u64) {
    let mut interval = tokio::time::interval(inner.conf.keepalive_interval);
    interval.tick().await;
    loop {
        interval.tick().await;
        let sender = {
            match &*inner.state.lock().unwrap() {
                ConnState::Connected {
                    session,
                    tx,
                    generation: current,
                } if *current == generation => Some((tx.clone(), *session)),
                _ => None,
            }
        };
        let (tx, session) = match sender {
            Some(sender) => sender,
            None => return,
        };
        // No waiter: a missed keep-alive reply is not a disconnect.
        if tx
            .unbounded_send(encode(&Request::KeepAlive {
                session_id: session,
                transaction: utils::nonce(),
            }))
            .is_err()
        {
            return;
        }
    }
}
