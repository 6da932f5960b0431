//! HTTP surface of the gateway.
//!
//! The handlers here are thin: they validate headers, call into the core
//! and shape the response envelope. All semantics live in
//! [`crate::ingest`].

pub mod admin;
pub mod whip;

use actix_cors::Cors;
use actix_web::{
    http::{Method, StatusCode},
    middleware, web, App, HttpResponse, HttpServer, ResponseError,
};
use serde_json::json;

use crate::{
    conf::Conf, endpoint::Endpoints, errors::GatewayError,
    ingest::IngestController, prelude::*,
};

/// Context shared by all request handlers.
#[derive(Clone)]
pub struct AppContext {
    /// Controller driving the ingest sessions.
    pub controller: IngestController,

    /// Endpoint registry, for token and advertisement lookups.
    pub endpoints: Endpoints,

    /// Application configuration.
    pub conf: Conf,
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InUse | Self::Unauthorized => StatusCode::FORBIDDEN,
            Self::IdTaken => StatusCode::CONFLICT,
            Self::UnsupportedMedia => StatusCode::NOT_ACCEPTABLE,
            Self::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            Self::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(json!({ "error": self.to_string() }))
    }
}

/// Returns a function registering all routes and application data of the
/// gateway, usable both by [`run`] and by test harnesses.
pub fn app_config(ctx: AppContext) -> impl Fn(&mut web::ServiceConfig) + Clone
{
    move |cfg: &mut web::ServiceConfig| {
        let base = ctx.conf.whip.base_path.clone();
        cfg.app_data(web::Data::new(ctx.clone()))
            .route("/healthcheck", web::get().to(whip::healthcheck))
            .service(
                web::scope(&base)
                    .service(
                        web::resource("/endpoint/{id}")
                            .route(web::post().to(whip::publish))
                            .route(
                                web::method(Method::OPTIONS)
                                    .to(whip::preflight),
                            )
                            .route(
                                web::route().to(whip::method_not_allowed),
                            ),
                    )
                    .service(
                        web::resource("/resource/{rid}")
                            .route(web::patch().to(whip::patch))
                            .route(web::delete().to(whip::teardown))
                            .route(
                                web::route().to(whip::method_not_allowed),
                            ),
                    ),
            )
            .service(
                web::scope("/admin")
                    .wrap(Cors::permissive())
                    .service(
                        web::resource("/endpoints")
                            .route(web::post().to(admin::create))
                            .route(web::get().to(admin::list)),
                    )
                    .service(
                        web::resource("/endpoints/{id}")
                            .route(web::delete().to(admin::destroy)),
                    ),
            );
    }
}

/// Runs the HTTP server until it is stopped.
///
/// # Errors
///
/// Errors if the listener cannot be bound; this is fatal for the process.
pub async fn run(conf: Conf, ctx: AppContext) -> std::io::Result<()> {
    let addr = conf.server.bind_addr();
    let config = app_config(ctx);
    info!("Starting HTTP server on {}", addr);
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .configure(config.clone())
    })
    .bind(addr)?
    .run()
    .await
}
