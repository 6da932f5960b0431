//! Administrative handlers: create, list and destroy endpoints.
//!
//! Not part of the WHIP surface; listings expose presence flags only and
//! never leak tokens, PINs or secrets.

use actix_web::{
    web::{Data, Json, Path},
    HttpResponse,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::Token,
    conf::IceServer,
    endpoint::{EndpointId, EndpointSpec, Recipient},
    errors::GatewayError,
};

use super::AppContext;

/// Body of a `POST /admin/endpoints` request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEndpoint {
    /// Endpoint id, restricted to `[A-Za-z0-9_-]+`.
    pub id: String,

    /// Backend room the endpoint publishes into.
    pub room: u64,

    /// Display label; defaults to `WHIP Publisher <room>`.
    #[serde(default)]
    pub label: Option<String>,

    /// Room PIN, if the room requires one.
    #[serde(default)]
    pub pin: Option<String>,

    /// Room secret for privileged requests.
    #[serde(default)]
    pub secret: Option<String>,

    /// Backend admin key for privileged requests.
    #[serde(default)]
    pub admin_key: Option<String>,

    /// Bearer token required from publishing clients.
    #[serde(default)]
    pub token: Option<String>,

    /// Per-endpoint ICE-server advertisement override.
    #[serde(default)]
    pub ice_servers: Option<Vec<IceServer>>,

    /// Plain-RTP forwarding target.
    #[serde(default)]
    pub recipient: Option<Recipient>,
}

/// `POST /admin/endpoints`: registers a new endpoint.
pub async fn create(
    data: Json<CreateEndpoint>,
    state: Data<AppContext>,
) -> Result<HttpResponse, GatewayError> {
    let data = data.into_inner();
    let room = data.room;
    let spec = EndpointSpec {
        room,
        label: data
            .label
            .unwrap_or_else(|| EndpointSpec::default_label(room)),
        pin: data.pin,
        secret: data.secret,
        admin_key: data.admin_key,
        token: data.token.map(Token::Static),
        ice_servers: data.ice_servers,
        recipient: data.recipient,
    };
    let id = state
        .controller
        .create_endpoint(EndpointId::from(data.id), spec)?;
    Ok(HttpResponse::Ok().json(json!({ "id": id })))
}

/// `GET /admin/endpoints`: lists projections of all endpoints.
pub async fn list(state: Data<AppContext>) -> HttpResponse {
    HttpResponse::Ok().json(state.controller.list_endpoints())
}

/// `DELETE /admin/endpoints/{id}`: destroys the endpoint, tearing down
/// its active session first.
pub async fn destroy(
    path: Path<String>,
    state: Data<AppContext>,
) -> Result<HttpResponse, GatewayError> {
    state
        .controller
        .destroy_endpoint(&EndpointId::from(path.into_inner()))
        .await?;
    Ok(HttpResponse::Ok().finish())
}
