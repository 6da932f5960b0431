//! In-memory registry of WHIP endpoints and the resource index.
//!
//! The registry is the single source of truth for endpoint state. Its inner
//! mutex is only ever held for plain map operations, never across awaits;
//! long-running per-endpoint operations serialize on the endpoint's own
//! async lock obtained via [`Endpoints::lock_of`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use futures::lock::Mutex as AsyncMutex;

use crate::{
    auth::Token,
    backend::proto::HandleId,
    conf::IceServer,
    errors::GatewayError,
    sdp::IceCredentials,
    utils,
};

use super::{
    EndpointId, EndpointInfo, EndpointSpec, IngestState, ResourceId, Session,
};

/// Registry of WHIP endpoints known to this gateway process.
#[derive(Clone, Debug, Default)]
pub struct Endpoints {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    /// All endpoints, keyed by their stable id.
    endpoints: HashMap<EndpointId, Entry>,

    /// Reverse index from session resource ids to owning endpoints.
    resources: HashMap<ResourceId, EndpointId>,
}

#[derive(Debug)]
struct Entry {
    spec: EndpointSpec,
    state: IngestState,
    lock: Arc<AsyncMutex<()>>,
}

impl Endpoints {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new endpoint.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidArgument`] if the id is syntactically
    ///   invalid.
    /// - [`GatewayError::IdTaken`] if an endpoint with this id exists.
    pub fn create(
        &self,
        id: EndpointId,
        spec: EndpointSpec,
    ) -> Result<EndpointId, GatewayError> {
        if !id.is_valid() {
            return Err(GatewayError::InvalidArgument(format!(
                "malformed endpoint id: {}",
                id,
            )));
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.endpoints.contains_key(&id) {
            return Err(GatewayError::IdTaken);
        }
        inner.endpoints.insert(
            id.clone(),
            Entry {
                spec,
                state: IngestState::Idle,
                lock: Arc::new(AsyncMutex::new(())),
            },
        );
        Ok(id)
    }

    /// Removes the endpoint, dropping any resource index entries it owns.
    ///
    /// Returns `false` if no such endpoint exists.
    pub fn remove(&self, id: &EndpointId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.endpoints.remove(id).is_none() {
            return false;
        }
        inner.resources.retain(|_, owner| owner != id);
        true
    }

    /// Indicates whether an endpoint with the provided id exists.
    #[must_use]
    pub fn contains(&self, id: &EndpointId) -> bool {
        self.inner.lock().unwrap().endpoints.contains_key(id)
    }

    /// Indicates whether the endpoint is IDLE right now.
    ///
    /// `None` means the endpoint does not exist.
    #[must_use]
    pub fn is_idle(&self, id: &EndpointId) -> Option<bool> {
        let inner = self.inner.lock().unwrap();
        inner.endpoints.get(id).map(|e| e.state.is_idle())
    }

    /// Returns the authorization token of the endpoint.
    ///
    /// Outer `None` means the endpoint does not exist.
    #[must_use]
    pub fn token_of(&self, id: &EndpointId) -> Option<Option<Token>> {
        let inner = self.inner.lock().unwrap();
        inner.endpoints.get(id).map(|e| e.spec.token.clone())
    }

    /// Returns the per-endpoint ICE-server override.
    ///
    /// Outer `None` means the endpoint does not exist.
    #[must_use]
    pub fn ice_servers_of(
        &self,
        id: &EndpointId,
    ) -> Option<Option<Vec<IceServer>>> {
        let inner = self.inner.lock().unwrap();
        inner.endpoints.get(id).map(|e| e.spec.ice_servers.clone())
    }

    /// Returns a copy of the endpoint's static description.
    #[must_use]
    pub fn spec_of(&self, id: &EndpointId) -> Option<EndpointSpec> {
        let inner = self.inner.lock().unwrap();
        inner.endpoints.get(id).map(|e| e.spec.clone())
    }

    /// Returns the async lock serializing operations on the endpoint.
    #[must_use]
    pub fn lock_of(&self, id: &EndpointId) -> Option<Arc<AsyncMutex<()>>> {
        let inner = self.inner.lock().unwrap();
        inner.endpoints.get(id).map(|e| Arc::clone(&e.lock))
    }

    /// Lists projections of all endpoints, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<EndpointInfo> {
        let inner = self.inner.lock().unwrap();
        let mut infos: Vec<_> = inner
            .endpoints
            .iter()
            .map(|(id, e)| EndpointInfo {
                id: id.clone(),
                room: e.spec.room,
                label: e.spec.label.clone(),
                enabled: matches!(e.state, IngestState::Active(_)),
                pin: e.spec.pin.is_some(),
                secret: e.spec.secret.is_some(),
                admin_key: e.spec.admin_key.is_some(),
                token: e.spec.token.is_some(),
                ice_servers: e.spec.ice_servers.is_some(),
                recipient: e.spec.recipient.is_some(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        infos
    }

    /// Moves an IDLE endpoint into NEGOTIATING, reserving a fresh resource
    /// id and an initial ETag for the session being established.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::NotFound`] if the endpoint does not exist.
    /// - [`GatewayError::InUse`] if the endpoint is not IDLE.
    pub fn begin_negotiation(
        &self,
        id: &EndpointId,
    ) -> Result<(ResourceId, String), GatewayError> {
        let mut inner = self.inner.lock().unwrap();
        let resource = reserve_resource_id(&inner.resources);
        let entry = inner
            .endpoints
            .get_mut(id)
            .ok_or(GatewayError::NotFound)?;
        if !entry.state.is_idle() {
            return Err(GatewayError::InUse);
        }
        entry.state = IngestState::Negotiating {
            resource: resource.clone(),
        };
        inner.resources.insert(resource.clone(), id.clone());
        Ok((resource, utils::nonce()))
    }

    /// Rolls a failed negotiation back to IDLE, releasing the reserved
    /// resource id.
    pub fn abort_negotiation(&self, id: &EndpointId, resource: &ResourceId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.endpoints.get_mut(id) {
            match &entry.state {
                IngestState::Negotiating { resource: r } if r == resource => {
                    entry.state = IngestState::Idle;
                }
                _ => return,
            }
        }
        if inner.resources.get(resource) == Some(id) {
            inner.resources.remove(resource);
        }
    }

    /// Completes a negotiation, moving the endpoint into ACTIVE.
    ///
    /// # Errors
    ///
    /// Errors if the endpoint is no longer NEGOTIATING for the session's
    /// resource (the session was invalidated while the backend exchange was
    /// in flight).
    pub fn complete_publish(
        &self,
        id: &EndpointId,
        session: Session,
    ) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .endpoints
            .get_mut(id)
            .ok_or(GatewayError::NotFound)?;
        match &entry.state {
            IngestState::Negotiating { resource }
                if *resource == session.resource =>
            {
                entry.state = IngestState::Active(session);
                Ok(())
            }
            _ => Err(GatewayError::Backend(
                "session was invalidated while negotiating".into(),
            )),
        }
    }

    /// Returns the endpoint owning the provided resource id.
    #[must_use]
    pub fn resolve_resource(&self, resource: &ResourceId) -> Option<EndpointId> {
        self.inner.lock().unwrap().resources.get(resource).cloned()
    }

    /// Returns the active session addressed by the provided resource id,
    /// together with its owning endpoint.
    #[must_use]
    pub fn session_by_resource(
        &self,
        resource: &ResourceId,
    ) -> Option<(EndpointId, Session)> {
        let inner = self.inner.lock().unwrap();
        let id = inner.resources.get(resource)?.clone();
        match &inner.endpoints.get(&id)?.state {
            IngestState::Active(session) if session.resource == *resource => {
                Some((id, session.clone()))
            }
            _ => None,
        }
    }

    /// Clears the endpoint's active session, releasing its resource id.
    ///
    /// When `resource` is provided, the session is cleared only if it is
    /// addressed by that resource id. Returns the cleared session.
    pub fn clear_session(
        &self,
        id: &EndpointId,
        resource: Option<&ResourceId>,
    ) -> Option<Session> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.endpoints.get_mut(id)?;
        let session = match &entry.state {
            IngestState::Active(session)
                if resource.map_or(true, |r| *r == session.resource) =>
            {
                session.clone()
            }
            _ => return None,
        };
        entry.state = IngestState::Idle;
        inner.resources.remove(&session.resource);
        Some(session)
    }

    /// Replaces the stored offer, ICE credentials and ETag of an active
    /// session after a completed ICE restart.
    ///
    /// # Errors
    ///
    /// Errors if the endpoint no longer holds an active session (it was
    /// invalidated while the restart was in flight).
    pub fn commit_restart(
        &self,
        id: &EndpointId,
        sdp_offer: String,
        ice: IceCredentials,
        etag: String,
    ) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .endpoints
            .get_mut(id)
            .ok_or(GatewayError::NotFound)?;
        match &mut entry.state {
            IngestState::Active(session) => {
                session.sdp_offer = sdp_offer;
                session.ice = Some(ice);
                session.etag = etag;
                Ok(())
            }
            _ => Err(GatewayError::Backend(
                "session was invalidated while restarting".into(),
            )),
        }
    }

    /// Returns the endpoint whose active session owns the provided backend
    /// handle.
    #[must_use]
    pub fn find_by_handle(&self, handle: HandleId) -> Option<EndpointId> {
        let inner = self.inner.lock().unwrap();
        inner.endpoints.iter().find_map(|(id, e)| match &e.state {
            IngestState::Active(session) if session.handle == handle => {
                Some(id.clone())
            }
            _ => None,
        })
    }

    /// Atomically moves every non-IDLE endpoint to IDLE, releasing all
    /// resource ids. Returns the affected endpoints.
    ///
    /// Used when the backend connection is lost: by the time this returns,
    /// no endpoint references a dead backend handle anymore.
    pub fn sweep_non_idle(&self) -> Vec<EndpointId> {
        let mut inner = self.inner.lock().unwrap();
        let mut swept = Vec::new();
        let Inner {
            endpoints,
            resources,
        } = &mut *inner;
        for (id, entry) in endpoints.iter_mut() {
            if let Some(resource) = entry.state.resource() {
                resources.remove(resource);
                entry.state = IngestState::Idle;
                swept.push(id.clone());
            }
        }
        swept
    }
}

/// Draws random resource ids until one not present in the index is found.
fn reserve_resource_id(
    resources: &HashMap<ResourceId, EndpointId>,
) -> ResourceId {
    loop {
        let candidate = ResourceId::from(utils::nonce());
        if !resources.contains_key(&candidate) {
            return candidate;
        }
    }
}
