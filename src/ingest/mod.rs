//! Per-endpoint ingest state machine.
//!
//! Every endpoint moves IDLE -> NEGOTIATING -> ACTIVE on publish, trickles
//! and restarts while ACTIVE, and falls back to IDLE on teardown, on a
//! backend-closed handle and on backend loss. Operations on one endpoint
//! are totally ordered by its async lock; the fast in-use rejection of
//! concurrent publishes is decided on registry state so a second POST
//! never queues behind a negotiation in flight.

use std::sync::Arc;

use futures::{channel::mpsc, StreamExt as _};
use rand::Rng as _;

use crate::{
    backend::{
        proto::{ForwardParams, HandleId, JoinParams, PublisherId},
        BackendClient, BackendError, BackendEvent, MediaBackend,
    },
    conf,
    endpoint::{
        EndpointId, EndpointInfo, EndpointSpec, Endpoints, Recipient,
        ResourceId, Session,
    },
    errors::GatewayError,
    events::{Events, GatewayEvent},
    prelude::*,
    sdp,
    utils,
};

/// Outcome of a successful publish.
#[derive(Clone, Debug)]
pub struct Published {
    /// Resource id the session is addressed by.
    pub resource: ResourceId,

    /// Initial ETag of the session.
    pub etag: String,

    /// SDP answer produced by the backend.
    pub answer: String,
}

/// Outcome of a successful `PATCH` on a resource.
#[derive(Clone, Debug)]
pub enum PatchOutcome {
    /// Candidates were forwarded; no restart took place.
    Trickled {
        /// Unchanged current ETag.
        etag: String,
    },

    /// An ICE restart completed.
    Restarted {
        /// Freshly generated ETag.
        etag: String,

        /// `application/trickle-ice-sdpfrag` projection of the new
        /// answer.
        fragment: String,
    },
}

/// Controller driving the ingest state machine of every endpoint.
///
/// Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct IngestController(Arc<Inner>);

struct Inner {
    endpoints: Endpoints,
    backend: Arc<dyn MediaBackend>,
    events: Events,
    whip: conf::Whip,
}

impl IngestController {
    /// Creates a new controller over the provided registry and backend.
    #[must_use]
    pub fn new(
        endpoints: Endpoints,
        backend: Arc<dyn MediaBackend>,
        events: Events,
        whip: conf::Whip,
    ) -> Self {
        Self(Arc::new(Inner {
            endpoints,
            backend,
            events,
            whip,
        }))
    }

    /// Registers a new endpoint.
    ///
    /// # Errors
    ///
    /// See [`Endpoints::create`].
    pub fn create_endpoint(
        &self,
        id: EndpointId,
        spec: EndpointSpec,
    ) -> Result<EndpointId, GatewayError> {
        let id = self.0.endpoints.create(id, spec)?;
        info!("Endpoint {} created", id);
        Ok(id)
    }

    /// Lists projections of all endpoints.
    #[must_use]
    pub fn list_endpoints(&self) -> Vec<EndpointInfo> {
        self.0.endpoints.list()
    }

    /// Publishes an SDP offer on the endpoint, negotiating a session with
    /// the backend.
    ///
    /// On any failure past the handle attach, the handle is detached
    /// best-effort, the reserved resource id is released and the endpoint
    /// is IDLE again before the error is returned.
    pub async fn publish(
        &self,
        id: &EndpointId,
        offer: String,
    ) -> Result<Published, GatewayError> {
        match self.0.endpoints.is_idle(id) {
            Some(true) => {}
            Some(false) => return Err(GatewayError::InUse),
            None => return Err(GatewayError::NotFound),
        }
        if !self.0.backend.is_connected() {
            return Err(GatewayError::BackendUnavailable);
        }
        if !sdp::contains_session_description(&offer) {
            return Err(GatewayError::UnsupportedMedia);
        }

        let lock = self
            .0
            .endpoints
            .lock_of(id)
            .ok_or(GatewayError::NotFound)?;
        let _guard = lock.lock().await;

        let spec = self
            .0
            .endpoints
            .spec_of(id)
            .ok_or(GatewayError::NotFound)?;
        let (resource, etag) = self.0.endpoints.begin_negotiation(id)?;
        let ice = sdp::extract_ice_credentials(&offer);

        match self.negotiate(&spec, offer.clone()).await {
            Ok((handle, publisher, answer)) => {
                let session = Session {
                    handle,
                    publisher,
                    sdp_offer: offer,
                    ice,
                    resource: resource.clone(),
                    etag: etag.clone(),
                };
                if let Err(e) =
                    self.0.endpoints.complete_publish(id, session)
                {
                    // The session was invalidated (backend loss or
                    // endpoint destruction) while negotiating.
                    self.detach_quietly(handle).await;
                    self.0.endpoints.abort_negotiation(id, &resource);
                    return Err(e);
                }
                info!(
                    "Endpoint {} is publishing as resource {}",
                    id, resource,
                );
                self.0
                    .events
                    .publish(&GatewayEvent::EndpointActive(id.clone()));
                Ok(Published {
                    resource,
                    etag,
                    answer,
                })
            }
            Err((handle, e)) => {
                if let Some(handle) = handle {
                    self.detach_quietly(handle).await;
                }
                self.0.endpoints.abort_negotiation(id, &resource);
                Err(e.into())
            }
        }
    }

    /// Applies a trickle/restart `PATCH` addressed by the resource id.
    pub async fn patch(
        &self,
        resource: &ResourceId,
        body: &str,
        if_match: Option<&str>,
    ) -> Result<PatchOutcome, GatewayError> {
        let id = self
            .0
            .endpoints
            .resolve_resource(resource)
            .ok_or(GatewayError::NotFound)?;
        if !self.0.backend.is_connected() {
            return Err(GatewayError::BackendUnavailable);
        }
        let lock = self
            .0
            .endpoints
            .lock_of(&id)
            .ok_or(GatewayError::NotFound)?;
        let _guard = lock.lock().await;

        let (_, session) = self
            .0
            .endpoints
            .session_by_resource(resource)
            .ok_or(GatewayError::NotFound)?;

        let fragment = sdp::parse_fragment(body);
        let new_ice = session
            .ice
            .as_ref()
            .and_then(|current| fragment.restart_credentials(current));

        if self.0.whip.strict_etags {
            check_precondition(new_ice.is_some(), &session.etag, if_match)?;
        }

        let new_ice = match new_ice {
            None => {
                self.0
                    .backend
                    .trickle(session.handle, fragment.candidates)
                    .await?;
                return Ok(PatchOutcome::Trickled {
                    etag: session.etag,
                });
            }
            Some(new_ice) => new_ice,
        };

        let rewritten =
            sdp::rewrite_ice_credentials(&session.sdp_offer, &new_ice);
        let answer = self
            .0
            .backend
            .reconfigure(session.handle, rewritten.clone())
            .await?;
        // Candidates collected in the same request go out only after the
        // backend produced the answer to the rewritten offer.
        if !fragment.candidates.is_empty() {
            if let Err(e) = self
                .0
                .backend
                .trickle(session.handle, fragment.candidates)
                .await
            {
                warn!(
                    "Dropped candidates of restarting resource {}: {}",
                    resource, e,
                );
            }
        }
        let etag = utils::nonce();
        self.0.endpoints.commit_restart(
            &id,
            rewritten,
            new_ice,
            etag.clone(),
        )?;
        info!("Resource {} completed ICE restart", resource);
        Ok(PatchOutcome::Restarted {
            etag,
            fragment: sdp::restart_answer_fragment(&answer),
        })
    }

    /// Tears the session addressed by the resource id down.
    ///
    /// Succeeds even if the backend is gone: the handle detach is
    /// best-effort only.
    pub async fn teardown(
        &self,
        resource: &ResourceId,
    ) -> Result<(), GatewayError> {
        let id = self
            .0
            .endpoints
            .resolve_resource(resource)
            .ok_or(GatewayError::NotFound)?;
        let lock = self
            .0
            .endpoints
            .lock_of(&id)
            .ok_or(GatewayError::NotFound)?;
        let _guard = lock.lock().await;

        let session = self
            .0
            .endpoints
            .clear_session(&id, Some(resource))
            .ok_or(GatewayError::NotFound)?;
        self.detach_quietly(session.handle).await;
        info!("Resource {} torn down", resource);
        self.0
            .events
            .publish(&GatewayEvent::EndpointInactive(id));
        Ok(())
    }

    /// Destroys the endpoint, tearing down its active session first.
    pub async fn destroy_endpoint(
        &self,
        id: &EndpointId,
    ) -> Result<(), GatewayError> {
        let lock = self
            .0
            .endpoints
            .lock_of(id)
            .ok_or(GatewayError::NotFound)?;
        let _guard = lock.lock().await;

        if let Some(session) = self.0.endpoints.clear_session(id, None) {
            self.detach_quietly(session.handle).await;
            self.0
                .events
                .publish(&GatewayEvent::EndpointInactive(id.clone()));
        }
        if self.0.endpoints.remove(id) {
            info!("Endpoint {} destroyed", id);
            Ok(())
        } else {
            Err(GatewayError::NotFound)
        }
    }

    /// Reacts to the backend spontaneously closing a plugin handle: the
    /// owning endpoint is torn down without a detach call.
    pub async fn on_handle_closed(&self, handle: HandleId) {
        let id = match self.0.endpoints.find_by_handle(handle) {
            Some(id) => id,
            None => return,
        };
        let lock = match self.0.endpoints.lock_of(&id) {
            Some(lock) => lock,
            None => return,
        };
        let _guard = lock.lock().await;

        // Re-check under the lock: the session may have been replaced
        // while this notification waited its turn.
        if self.0.endpoints.find_by_handle(handle) != Some(id.clone()) {
            return;
        }
        if self.0.endpoints.clear_session(&id, None).is_some() {
            info!(
                "Endpoint {} went inactive: backend closed handle {}",
                id, handle,
            );
            self.0
                .events
                .publish(&GatewayEvent::EndpointInactive(id));
        }
    }

    /// Reacts to the backend connection being lost: every non-IDLE
    /// endpoint moves to IDLE atomically, with no detach calls.
    pub fn on_backend_disconnected(&self) {
        let swept = self.0.endpoints.sweep_non_idle();
        if !swept.is_empty() {
            info!(
                "Backend connection lost: {} ingest session(s) invalidated",
                swept.len(),
            );
        }
        for id in swept {
            self.0
                .events
                .publish(&GatewayEvent::EndpointInactive(id));
        }
        self.0.events.publish(&GatewayEvent::BackendDisconnected);
    }

    /// Announces a re-established backend connection.
    pub fn on_backend_reconnected(&self) {
        info!("Backend connection re-established");
        self.0.events.publish(&GatewayEvent::BackendReconnected);
    }

    /// Runs the publish negotiation on the backend: attach, join and
    /// configure, and the optional plain-RTP forward.
    ///
    /// On error returns the handle attached so far (if any) for cleanup.
    async fn negotiate(
        &self,
        spec: &EndpointSpec,
        offer: String,
    ) -> Result<
        (HandleId, Option<PublisherId>, String),
        (Option<HandleId>, BackendError),
    > {
        let backend = &self.0.backend;
        let handle = backend.attach().await.map_err(|e| (None, e))?;
        let params = JoinParams::publisher(
            spec.room,
            spec.label.clone(),
            spec.pin.clone(),
        );
        let reply = backend
            .join_and_configure(handle, params, offer)
            .await
            .map_err(|e| (Some(handle), e))?;

        if let Some(recipient) =
            spec.recipient.as_ref().filter(|r| r.has_targets())
        {
            match reply.publisher {
                Some(publisher) => {
                    let params = forward_params(spec, recipient, publisher);
                    backend
                        .forward_rtp(handle, params)
                        .await
                        .map_err(|e| (Some(handle), e))?;
                }
                None => warn!(
                    "No publisher id in the backend reply; \
                     RTP forwarding skipped",
                ),
            }
        }
        Ok((handle, reply.publisher, reply.answer))
    }

    async fn detach_quietly(&self, handle: HandleId) {
        if let Err(e) = self.0.backend.detach(handle).await {
            debug!("Detach of handle {} failed: {}", handle, e);
        }
    }
}

/// Builds `rtp_forward` parameters for the endpoint's recipient, drawing
/// fresh random SSRCs for every enabled target.
fn forward_params(
    spec: &EndpointSpec,
    recipient: &Recipient,
    publisher: PublisherId,
) -> ForwardParams {
    let mut rng = rand::thread_rng();
    let audio = recipient.audio_port > 0;
    let video = recipient.video_port > 0;
    ForwardParams {
        room: spec.room,
        publisher_id: publisher,
        host: recipient.host.clone(),
        audio_port: Some(recipient.audio_port).filter(|_| audio),
        audio_ssrc: audio.then(|| rng.gen()),
        video_port: Some(recipient.video_port).filter(|_| video),
        video_ssrc: video.then(|| rng.gen()),
        video_rtcp_port: Some(recipient.video_rtcp_port)
            .filter(|p| video && *p > 0),
        secret: spec.secret.clone(),
        admin_key: spec.admin_key.clone(),
    }
}

/// Evaluates the `If-Match` precondition of a `PATCH` under strict ETag
/// checking: a restart requires exactly `"*"` (quoted), anything else
/// requires the current quoted ETag.
fn check_precondition(
    restart: bool,
    etag: &str,
    if_match: Option<&str>,
) -> Result<(), GatewayError> {
    let presented =
        if_match.ok_or(GatewayError::PreconditionFailed)?;
    let expected_match = if restart {
        presented == "\"*\""
    } else {
        presented == format!("\"{}\"", etag)
    };
    if expected_match {
        Ok(())
    } else {
        Err(GatewayError::PreconditionFailed)
    }
}

/// Supervises the backend connection: establishes it with backoff, and on
/// every loss sweeps the ingest state before reconnecting.
pub async fn supervise_backend(
    client: BackendClient,
    controller: IngestController,
    mut events: mpsc::UnboundedReceiver<BackendEvent>,
    conf: conf::Backend,
) {
    connect_with_backoff(&client, &conf).await;
    while let Some(event) = events.next().await {
        match event {
            BackendEvent::HandleClosed(handle) => {
                let controller = controller.clone();
                actix_rt::spawn(async move {
                    controller.on_handle_closed(handle).await;
                });
            }
            BackendEvent::Disconnected => {
                controller.on_backend_disconnected();
                connect_with_backoff(&client, &conf).await;
                controller.on_backend_reconnected();
            }
        }
    }
}

/// Retries [`BackendClient::connect`] until it succeeds, backing off
/// between attempts.
async fn connect_with_backoff(client: &BackendClient, conf: &conf::Backend) {
    let mut delay = conf.reconnect_initial_delay;
    loop {
        match client.connect().await {
            Ok(()) => return,
            Err(e) => {
                warn!(
                    "Backend connect failed: {}; retrying in {:?}",
                    e, delay,
                );
                tokio::time::sleep(delay).await;
                delay = conf.next_reconnect_delay(delay);
            }
        }
    }
}
