//! WHIP protocol handlers: publish, trickle/restart and teardown.

use actix_web::{
    http::header,
    web::{Bytes, Data, Path},
    HttpRequest, HttpResponse,
};

use crate::{
    auth,
    conf::IceServer,
    endpoint::{EndpointId, ResourceId},
    errors::GatewayError,
    ingest::PatchOutcome,
};

use super::AppContext;

/// Media type of publish bodies.
const SDP: &str = "application/sdp";

/// Media type of trickle/restart bodies.
const TRICKLE: &str = "application/trickle-ice-sdpfrag";

/// `GET /healthcheck`: liveness probe.
pub async fn healthcheck() -> HttpResponse {
    HttpResponse::Ok().finish()
}

/// Catch-all answering `405 Method Not Allowed`.
pub async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

/// `OPTIONS /endpoint/{id}`: CORS preflight, advertising the ICE servers
/// via `Link` headers.
///
/// Never fails: an unknown endpoint or a rejected authorization only
/// drops the advertisement from the `204` response.
pub async fn preflight(
    path: Path<String>,
    req: HttpRequest,
    state: Data<AppContext>,
) -> HttpResponse {
    let id = EndpointId::from(path.into_inner());
    let mut resp = HttpResponse::NoContent();
    resp.insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((
            header::ACCESS_CONTROL_ALLOW_METHODS,
            "OPTIONS, POST, PATCH, DELETE",
        ))
        .insert_header((
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            "Authorization, Content-Type, If-Match",
        ))
        .insert_header((
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            "Location, Link",
        ));
    if let Some(token) = state.endpoints.token_of(&id) {
        if auth::authorize(token.as_ref(), auth_header(&req)) {
            for server in advertised_servers(&state, &id) {
                resp.append_header((header::LINK, ice_link(&server)));
            }
        }
    }
    resp.finish()
}

/// `POST /endpoint/{id}`: publishes the SDP offer of the request body.
pub async fn publish(
    path: Path<String>,
    req: HttpRequest,
    body: Bytes,
    state: Data<AppContext>,
) -> Result<HttpResponse, GatewayError> {
    let id = EndpointId::from(path.into_inner());
    let token = state
        .endpoints
        .token_of(&id)
        .ok_or(GatewayError::NotFound)?;
    if !content_type_is(&req, SDP) {
        return Err(GatewayError::UnsupportedMedia);
    }
    if !auth::authorize(token.as_ref(), auth_header(&req)) {
        return Err(GatewayError::Unauthorized);
    }
    let offer = String::from_utf8(body.to_vec())
        .map_err(|_| GatewayError::UnsupportedMedia)?;

    let published = state.controller.publish(&id, offer).await?;

    let location = format!(
        "{}/resource/{}",
        state.conf.whip.base_path, published.resource,
    );
    let mut resp = HttpResponse::Created();
    resp.content_type(SDP)
        .insert_header((header::LOCATION, location))
        .insert_header((header::ETAG, quoted(&published.etag)))
        .insert_header(("Accept-Patch", TRICKLE))
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            "Location, Link",
        ));
    for server in advertised_servers(&state, &id) {
        resp.append_header((header::LINK, ice_link(&server)));
    }
    Ok(resp.body(published.answer))
}

/// `PATCH /resource/{rid}`: trickles ICE candidates or performs an ICE
/// restart, depending on the fragment's credentials.
pub async fn patch(
    path: Path<String>,
    req: HttpRequest,
    body: Bytes,
    state: Data<AppContext>,
) -> Result<HttpResponse, GatewayError> {
    if !state.conf.whip.trickle {
        return Ok(HttpResponse::MethodNotAllowed().finish());
    }
    let resource = ResourceId::from(path.into_inner());
    authorize_resource(&state, &resource, &req)?;
    if !content_type_is(&req, TRICKLE) {
        return Err(GatewayError::UnsupportedMedia);
    }
    let body = std::str::from_utf8(&body)
        .map_err(|_| GatewayError::UnsupportedMedia)?;
    let if_match = req
        .headers()
        .get(header::IF_MATCH)
        .and_then(|v| v.to_str().ok());

    match state.controller.patch(&resource, body, if_match).await? {
        PatchOutcome::Trickled { etag } => Ok(HttpResponse::NoContent()
            .insert_header((header::ETAG, quoted(&etag)))
            .finish()),
        PatchOutcome::Restarted { etag, fragment } => Ok(HttpResponse::Ok()
            .content_type(TRICKLE)
            .insert_header((header::ETAG, quoted(&etag)))
            .body(fragment)),
    }
}

/// `DELETE /resource/{rid}`: tears the session down.
pub async fn teardown(
    path: Path<String>,
    req: HttpRequest,
    state: Data<AppContext>,
) -> Result<HttpResponse, GatewayError> {
    let resource = ResourceId::from(path.into_inner());
    authorize_resource(&state, &resource, &req)?;
    state.controller.teardown(&resource).await?;
    Ok(HttpResponse::Ok().finish())
}

/// Checks the request's bearer token against the endpoint owning the
/// resource.
fn authorize_resource(
    state: &AppContext,
    resource: &ResourceId,
    req: &HttpRequest,
) -> Result<(), GatewayError> {
    let id = state
        .endpoints
        .resolve_resource(resource)
        .ok_or(GatewayError::NotFound)?;
    let token = state
        .endpoints
        .token_of(&id)
        .ok_or(GatewayError::NotFound)?;
    if auth::authorize(token.as_ref(), auth_header(req)) {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized)
    }
}

fn auth_header(req: &HttpRequest) -> Option<&str> {
    req.headers().get(header::AUTHORIZATION)?.to_str().ok()
}

/// Checks the request's `Content-Type` against the expected media type,
/// ignoring any parameters.
fn content_type_is(req: &HttpRequest, expected: &str) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .map_or(false, |ct| ct.trim().eq_ignore_ascii_case(expected))
}

fn quoted(etag: &str) -> String {
    format!("\"{}\"", etag)
}

/// Formats one `Link: <uri>; rel="ice-server"` advertisement.
fn ice_link(server: &IceServer) -> String {
    let mut link = format!("<{}>; rel=\"ice-server\"", server.uri);
    if let (Some(username), Some(credential)) =
        (&server.username, &server.credential)
    {
        link.push_str(&format!(
            "; username=\"{}\"; credential=\"{}\"; \
             credential-type=\"password\"",
            username, credential,
        ));
    }
    link
}

/// Resolves the servers advertised for the endpoint: the per-endpoint
/// override when present, the global configuration otherwise. Servers
/// with non-ICE URI schemes are dropped.
fn advertised_servers(state: &AppContext, id: &EndpointId) -> Vec<IceServer> {
    state
        .endpoints
        .ice_servers_of(id)
        .flatten()
        .unwrap_or_else(|| state.conf.ice.servers.clone())
        .into_iter()
        .filter(IceServer::is_advertisable)
        .collect()
}
