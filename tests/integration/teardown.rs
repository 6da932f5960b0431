//! Teardown and endpoint-destruction scenarios.

use actix_web::{
    http::{header, StatusCode},
    test, App,
};
use whip_gateway::{
    api,
    auth::Token,
    endpoint::{EndpointId, EndpointSpec},
};

use crate::{gateway, mock::Call, OFFER};

#[actix_rt::test]
async fn delete_tears_down_and_second_delete_is_404() {
    let gw = gateway();
    let id = EndpointId::from("abc");
    gw.controller
        .create_endpoint(id.clone(), EndpointSpec::new(1234))
        .unwrap();
    let published =
        gw.controller.publish(&id, OFFER.to_owned()).await.unwrap();
    let app = test::init_service(
        App::new().configure(api::app_config(gw.ctx())),
    )
    .await;

    let uri = format!("/whip/resource/{}", published.resource);
    let resp = test::call_service(
        &app,
        test::TestRequest::delete().uri(&uri).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(gw.mock.calls().iter().any(|c| matches!(c, Call::Detach(_))));

    // The endpoint survives its session, publishable again.
    let listed = gw.controller.list_endpoints();
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].enabled);
    assert!(gw.controller.publish(&id, OFFER.to_owned()).await.is_ok());

    let again = test::call_service(
        &app,
        test::TestRequest::delete().uri(&uri).to_request(),
    )
    .await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn delete_on_unknown_resource_is_404() {
    let gw = gateway();
    let app = test::init_service(
        App::new().configure(api::app_config(gw.ctx())),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri("/whip/resource/aaaaaaaaaaaaaaaa")
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn delete_succeeds_even_with_the_backend_gone() {
    let gw = gateway();
    let id = EndpointId::from("abc");
    gw.controller
        .create_endpoint(id.clone(), EndpointSpec::new(1234))
        .unwrap();
    let published =
        gw.controller.publish(&id, OFFER.to_owned()).await.unwrap();
    gw.mock.set_connected(false);
    let app = test::init_service(
        App::new().configure(api::app_config(gw.ctx())),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/whip/resource/{}", published.resource))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(!gw.controller.list_endpoints()[0].enabled);
}

#[actix_rt::test]
async fn delete_requires_the_endpoint_token() {
    let gw = gateway();
    let id = EndpointId::from("locked");
    gw.controller
        .create_endpoint(
            id.clone(),
            EndpointSpec {
                token: Some(Token::Static("t".into())),
                ..EndpointSpec::new(1234)
            },
        )
        .unwrap();
    let published =
        gw.controller.publish(&id, OFFER.to_owned()).await.unwrap();
    let app = test::init_service(
        App::new().configure(api::app_config(gw.ctx())),
    )
    .await;

    let uri = format!("/whip/resource/{}", published.resource);
    let unauthorized = test::call_service(
        &app,
        test::TestRequest::delete().uri(&uri).to_request(),
    )
    .await;
    assert_eq!(unauthorized.status(), StatusCode::FORBIDDEN);

    let authorized = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri(&uri)
            .insert_header((header::AUTHORIZATION, "Bearer t"))
            .to_request(),
    )
    .await;
    assert_eq!(authorized.status(), StatusCode::OK);
}

#[actix_rt::test]
async fn destroying_an_endpoint_tears_its_session_down_first() {
    let gw = gateway();
    let id = EndpointId::from("abc");
    gw.controller
        .create_endpoint(id.clone(), EndpointSpec::new(1234))
        .unwrap();
    let published =
        gw.controller.publish(&id, OFFER.to_owned()).await.unwrap();
    let app = test::init_service(
        App::new().configure(api::app_config(gw.ctx())),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri("/admin/endpoints/abc")
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(gw.mock.calls().iter().any(|c| matches!(c, Call::Detach(_))));
    assert!(gw.controller.list_endpoints().is_empty());

    // Both the endpoint and its resource are gone.
    let publish = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/whip/endpoint/abc")
            .insert_header((header::CONTENT_TYPE, "application/sdp"))
            .set_payload(OFFER)
            .to_request(),
    )
    .await;
    assert_eq!(publish.status(), StatusCode::NOT_FOUND);

    let delete = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/whip/resource/{}", published.resource))
            .to_request(),
    )
    .await;
    assert_eq!(delete.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn destroying_an_unknown_endpoint_is_404() {
    let gw = gateway();
    let app = test::init_service(
        App::new().configure(api::app_config(gw.ctx())),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri("/admin/endpoints/ghost")
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
