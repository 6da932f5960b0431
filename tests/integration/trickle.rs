//! Trickle and ICE-restart scenarios over the `PATCH` surface.

use actix_web::{
    http::{header, StatusCode},
    test, App,
};
use whip_gateway::{
    api,
    endpoint::{EndpointId, EndpointSpec},
    ingest::Published,
    sdp::Candidate,
};

use crate::{assert_nonce, gateway, gateway_with, header_str, mock::Call,
            TestGateway, OFFER};

const TRICKLE_BODY: &str = "a=ice-ufrag:U1\r\n\
                            a=ice-pwd:P1\r\n\
                            a=candidate:1 1 udp 1 1.2.3.4 1 typ host\r\n";

const RESTART_BODY: &str = "a=ice-ufrag:U2\r\n\
                            a=ice-pwd:P2\r\n\
                            a=candidate:2 1 udp 1 5.6.7.8 1 typ host\r\n\
                            a=end-of-candidates\r\n";

async fn published(gw: &TestGateway) -> Published {
    gw.controller
        .create_endpoint(EndpointId::from("abc"), EndpointSpec::new(1234))
        .unwrap();
    gw.controller
        .publish(&EndpointId::from("abc"), OFFER.to_owned())
        .await
        .unwrap()
}

fn patch_req(
    resource: &str,
    body: &'static str,
    if_match: Option<&str>,
) -> actix_http::Request {
    let mut req = test::TestRequest::patch()
        .uri(&format!("/whip/resource/{}", resource))
        .insert_header((
            header::CONTENT_TYPE,
            "application/trickle-ice-sdpfrag",
        ))
        .set_payload(body);
    if let Some(value) = if_match {
        req = req.insert_header((header::IF_MATCH, value));
    }
    req.to_request()
}

#[actix_rt::test]
async fn trickle_forwards_candidates_and_keeps_the_etag() {
    let gw = gateway();
    let published = published(&gw).await;
    let app = test::init_service(
        App::new().configure(api::app_config(gw.ctx())),
    )
    .await;

    let resp = test::call_service(
        &app,
        patch_req(
            published.resource.as_str(),
            TRICKLE_BODY,
            Some(&format!("\"{}\"", published.etag)),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        header_str(&resp, header::ETAG),
        format!("\"{}\"", published.etag),
    );

    let calls = gw.mock.calls();
    match calls.last().unwrap() {
        Call::Trickle(_, candidates) => {
            assert_eq!(
                candidates,
                &[Candidate::fragment(
                    "candidate:1 1 udp 1 1.2.3.4 1 typ host".into(),
                )],
            );
        }
        other => panic!("unexpected call: {:?}", other),
    }
}

#[actix_rt::test]
async fn trickle_delivers_the_end_of_candidates_sentinel() {
    let gw = gateway();
    let published = published(&gw).await;
    let app = test::init_service(
        App::new().configure(api::app_config(gw.ctx())),
    )
    .await;

    let resp = test::call_service(
        &app,
        patch_req(
            published.resource.as_str(),
            "a=candidate:1 1 udp 1 1.2.3.4 1 typ host\r\n\
             a=end-of-candidates\r\n",
            None,
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    match gw.mock.calls().last().unwrap() {
        Call::Trickle(_, candidates) => {
            assert_eq!(candidates.len(), 2);
            assert_eq!(candidates[1], Candidate::completed());
        }
        other => panic!("unexpected call: {:?}", other),
    }
}

#[actix_rt::test]
async fn restart_rewrites_credentials_and_rotates_the_etag() {
    let gw = gateway();
    let published = published(&gw).await;
    let app = test::init_service(
        App::new().configure(api::app_config(gw.ctx())),
    )
    .await;

    let resp = test::call_service(
        &app,
        patch_req(published.resource.as_str(), RESTART_BODY, Some("\"*\"")),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        header_str(&resp, header::CONTENT_TYPE),
        "application/trickle-ice-sdpfrag",
    );

    let etag = header_str(&resp, header::ETAG).to_owned();
    assert_ne!(etag, format!("\"{}\"", published.etag));
    assert_nonce(etag.trim_matches('"'));

    // Candidates of the restart request go out only after the answer.
    let calls = gw.mock.calls();
    let reconfigure = calls
        .iter()
        .position(|c| matches!(c, Call::Reconfigure(_)))
        .unwrap();
    let trickle = calls
        .iter()
        .rposition(|c| matches!(c, Call::Trickle(..)))
        .unwrap();
    assert!(reconfigure < trickle);

    // The fragment projects ICE-relevant lines of the rewritten answer.
    let body = test::read_body(resp).await;
    let body = std::str::from_utf8(&body).unwrap();
    assert!(body.contains("a=group:BUNDLE 0 1"));
    assert!(body.contains("m=audio 9 UDP/TLS/RTP/SAVPF 111"));
    assert!(body.contains("a=ice-ufrag:U2"));
    assert!(body.contains("a=ice-pwd:P2"));
    assert!(!body.contains("o=-"));
}

#[actix_rt::test]
async fn every_restart_produces_a_fresh_etag() {
    let gw = gateway();
    let published = published(&gw).await;
    let app = test::init_service(
        App::new().configure(api::app_config(gw.ctx())),
    )
    .await;

    let first = test::call_service(
        &app,
        patch_req(
            published.resource.as_str(),
            "a=ice-ufrag:U2\r\na=ice-pwd:P2\r\n",
            Some("\"*\""),
        ),
    )
    .await;
    assert_eq!(first.status(), StatusCode::OK);
    let first_etag = header_str(&first, header::ETAG).to_owned();

    let second = test::call_service(
        &app,
        patch_req(
            published.resource.as_str(),
            "a=ice-ufrag:U3\r\na=ice-pwd:P3\r\n",
            Some("\"*\""),
        ),
    )
    .await;
    assert_eq!(second.status(), StatusCode::OK);
    let second_etag = header_str(&second, header::ETAG).to_owned();

    assert_ne!(first_etag, format!("\"{}\"", published.etag));
    assert_ne!(second_etag, first_etag);
}

#[actix_rt::test]
async fn strict_etags_enforce_the_if_match_preconditions() {
    let gw = gateway_with(|conf| conf.whip.strict_etags = true);
    let published = published(&gw).await;
    let app = test::init_service(
        App::new().configure(api::app_config(gw.ctx())),
    )
    .await;

    let stale = test::call_service(
        &app,
        patch_req(
            published.resource.as_str(),
            TRICKLE_BODY,
            Some("\"someoldetag1234\""),
        ),
    )
    .await;
    assert_eq!(stale.status(), StatusCode::PRECONDITION_FAILED);

    let missing = test::call_service(
        &app,
        patch_req(published.resource.as_str(), TRICKLE_BODY, None),
    )
    .await;
    assert_eq!(missing.status(), StatusCode::PRECONDITION_FAILED);

    // `"*"` is reserved for restarts.
    let wildcard_trickle = test::call_service(
        &app,
        patch_req(published.resource.as_str(), TRICKLE_BODY, Some("\"*\"")),
    )
    .await;
    assert_eq!(
        wildcard_trickle.status(),
        StatusCode::PRECONDITION_FAILED,
    );

    let current = test::call_service(
        &app,
        patch_req(
            published.resource.as_str(),
            TRICKLE_BODY,
            Some(&format!("\"{}\"", published.etag)),
        ),
    )
    .await;
    assert_eq!(current.status(), StatusCode::NO_CONTENT);

    // Unquoted wildcard is not an acceptable restart precondition.
    let unquoted = test::call_service(
        &app,
        patch_req(published.resource.as_str(), RESTART_BODY, Some("*")),
    )
    .await;
    assert_eq!(unquoted.status(), StatusCode::PRECONDITION_FAILED);

    let restart = test::call_service(
        &app,
        patch_req(published.resource.as_str(), RESTART_BODY, Some("\"*\"")),
    )
    .await;
    assert_eq!(restart.status(), StatusCode::OK);
}

#[actix_rt::test]
async fn patch_is_405_when_trickle_is_disabled() {
    let gw = gateway_with(|conf| conf.whip.trickle = false);
    let published = published(&gw).await;
    let app = test::init_service(
        App::new().configure(api::app_config(gw.ctx())),
    )
    .await;

    let resp = test::call_service(
        &app,
        patch_req(published.resource.as_str(), TRICKLE_BODY, None),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[actix_rt::test]
async fn patch_with_wrong_content_type_is_406() {
    let gw = gateway();
    let published = published(&gw).await;
    let app = test::init_service(
        App::new().configure(api::app_config(gw.ctx())),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::patch()
            .uri(&format!("/whip/resource/{}", published.resource))
            .insert_header((header::CONTENT_TYPE, "application/sdp"))
            .set_payload(TRICKLE_BODY)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);
}

#[actix_rt::test]
async fn patch_on_unknown_resource_is_404() {
    let gw = gateway();
    let app = test::init_service(
        App::new().configure(api::app_config(gw.ctx())),
    )
    .await;

    let resp = test::call_service(
        &app,
        patch_req("aaaaaaaaaaaaaaaa", TRICKLE_BODY, None),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
