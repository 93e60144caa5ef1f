//! Retry boundaries as seen by callers of the transport.

use crate::common::fast_transport;
use cloudsqlctl::core::{FetchFailure, UpgradeError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_two_failures_then_success_is_transparent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let body = fast_transport().get_text(&format!("{}/flaky", server.uri())).await.unwrap();
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_three_failures_surface_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let err = fast_transport().get_text(&format!("{}/down", server.uri())).await.unwrap_err();
    let UpgradeError::Transport {
        attempts,
        source,
        ..
    } = err
    else {
        panic!("expected transport error, got {err:?}");
    };
    assert_eq!(attempts, 3);
    assert!(matches!(
        source,
        FetchFailure::Status {
            status: 503,
            ..
        }
    ));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(410))
        .expect(1)
        .mount(&server)
        .await;

    let err = fast_transport().get_text(&format!("{}/gone", server.uri())).await.unwrap_err();
    assert!(matches!(
        err,
        UpgradeError::HttpStatus {
            status: 410,
            ..
        }
    ));
}
