//! WHIP gateway executable.

use std::sync::Arc;

use whip_gateway::{
    api, backend::BackendClient, conf::Conf, endpoint::Endpoints,
    events::Events, ingest, ingest::IngestController, log,
};

fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();

    let conf = match Conf::parse() {
        Ok(conf) => conf,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let _log_guard = log::init();

    actix::System::new().block_on(run(conf))
}

async fn run(conf: Conf) -> std::io::Result<()> {
    let endpoints = Endpoints::new();
    let events = Events::new();
    let (client, backend_events) = BackendClient::new(conf.backend.clone());
    let controller = IngestController::new(
        endpoints.clone(),
        Arc::new(client.clone()),
        events.clone(),
        conf.whip.clone(),
    );

    actix_rt::spawn(ingest::supervise_backend(
        client.clone(),
        controller.clone(),
        backend_events,
        conf.backend.clone(),
    ));

    let ctx = api::AppContext {
        controller,
        endpoints,
        conf: conf.clone(),
    };
    let result = api::run(conf, ctx).await;
    client.close();
    result
}
