//! Backend-loss scenarios: the sweep to IDLE and recovery afterwards.

use actix_web::{
    http::{header, StatusCode},
    test, App,
};
use whip_gateway::{
    api,
    endpoint::{EndpointId, EndpointSpec},
    events::GatewayEvent,
};

use crate::{gateway, mock::Call, OFFER};

#[actix_rt::test]
async fn backend_loss_idles_every_endpoint_without_detaching() {
    let gw = gateway();
    let first = EndpointId::from("first");
    let second = EndpointId::from("second");
    gw.controller
        .create_endpoint(first.clone(), EndpointSpec::new(1))
        .unwrap();
    gw.controller
        .create_endpoint(second.clone(), EndpointSpec::new(2))
        .unwrap();
    let published = gw
        .controller
        .publish(&first, OFFER.to_owned())
        .await
        .unwrap();
    gw.controller
        .publish(&second, OFFER.to_owned())
        .await
        .unwrap();

    let mut rx = gw.events.subscribe();
    let calls_before = gw.mock.calls().len();

    gw.mock.set_connected(false);
    gw.controller.on_backend_disconnected();

    // Every endpoint is IDLE and no detach was attempted.
    assert!(gw.controller.list_endpoints().iter().all(|e| !e.enabled));
    assert!(!gw.mock.calls()[calls_before..]
        .iter()
        .any(|c| matches!(c, Call::Detach(_))));

    let mut inactive = 0;
    let mut disconnected = 0;
    while let Ok(Some(event)) = rx.try_next() {
        match event {
            GatewayEvent::EndpointInactive(_) => inactive += 1,
            GatewayEvent::BackendDisconnected => disconnected += 1,
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert_eq!(inactive, 2);
    assert_eq!(disconnected, 1);

    // Resources were released together with the sessions.
    let app = test::init_service(
        App::new().configure(api::app_config(gw.ctx())),
    )
    .await;
    let stale = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/whip/resource/{}", published.resource))
            .to_request(),
    )
    .await;
    assert_eq!(stale.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn endpoints_are_publishable_again_after_reconnect() {
    let gw = gateway();
    let id = EndpointId::from("abc");
    gw.controller
        .create_endpoint(id.clone(), EndpointSpec::new(1234))
        .unwrap();
    gw.controller.publish(&id, OFFER.to_owned()).await.unwrap();

    gw.mock.set_connected(false);
    gw.controller.on_backend_disconnected();

    let app = test::init_service(
        App::new().configure(api::app_config(gw.ctx())),
    )
    .await;
    let while_down = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/whip/endpoint/abc")
            .insert_header((header::CONTENT_TYPE, "application/sdp"))
            .set_payload(OFFER)
            .to_request(),
    )
    .await;
    assert_eq!(while_down.status(), StatusCode::SERVICE_UNAVAILABLE);

    let mut rx = gw.events.subscribe();
    gw.mock.set_connected(true);
    gw.controller.on_backend_reconnected();
    assert_eq!(
        rx.try_next().unwrap(),
        Some(GatewayEvent::BackendReconnected),
    );

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/whip/endpoint/abc")
            .insert_header((header::CONTENT_TYPE, "application/sdp"))
            .set_payload(OFFER)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[actix_rt::test]
async fn spontaneous_handle_closure_tears_the_owner_down() {
    let gw = gateway();
    let id = EndpointId::from("abc");
    gw.controller
        .create_endpoint(id.clone(), EndpointSpec::new(1234))
        .unwrap();
    gw.controller.publish(&id, OFFER.to_owned()).await.unwrap();
    let handle = match gw.mock.calls().last().unwrap() {
        Call::JoinAndConfigure(handle) => *handle,
        other => panic!("unexpected call: {:?}", other),
    };

    let mut rx = gw.events.subscribe();
    let calls_before = gw.mock.calls().len();
    gw.controller.on_handle_closed(handle).await;

    assert!(!gw.controller.list_endpoints()[0].enabled);
    // The handle is already gone; no detach goes out.
    assert_eq!(gw.mock.calls().len(), calls_before);
    assert_eq!(
        rx.try_next().unwrap(),
        Some(GatewayEvent::EndpointInactive(id)),
    );
}
