//! Integration tests for the HTTP statistics client against a mock API

use crate::support::channel;
use channel_stats_harvester::api::{
    ApiError, StatsApi, StatsClientFactory, YoutubeClientFactory, YoutubeStatsClient,
};
use channel_stats_harvester::credentials::Credential;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &str = "test-developer-key";

fn client(server: &MockServer) -> YoutubeStatsClient {
    YoutubeStatsClient::new(reqwest::Client::new(), server.uri(), KEY).unwrap()
}

fn error_body(code: u16, reason: &str, message: &str) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "code": code,
            "message": message,
            "errors": [{"domain": "youtube.quota", "reason": reason, "message": message}]
        }
    })
}

#[tokio::test]
async fn test_fetch_parses_statistics() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/channels"))
        .and(query_param("part", "statistics"))
        .and(query_param("id", "UCabc"))
        .and(query_param("key", KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "kind": "youtube#channelListResponse",
            "etag": "list-etag",
            "pageInfo": {"totalResults": 1, "resultsPerPage": 5},
            "items": [{
                "kind": "youtube#channel",
                "etag": "item-etag",
                "id": "UCabc",
                "statistics": {
                    "viewCount": "123456",
                    "subscriberCount": "789",
                    "hiddenSubscriberCount": false,
                    "videoCount": "42"
                }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server)
        .fetch_statistics(&channel("UCabc"))
        .await
        .unwrap();

    assert_eq!(response.items.len(), 1);
    let item = &response.items[0];
    assert_eq!(item.id, "UCabc");
    assert_eq!(item.statistics.view_count, Some(123_456));
    assert_eq!(item.statistics.subscriber_count, Some(789));
    assert_eq!(item.statistics.video_count, Some(42));
}

#[tokio::test]
async fn test_item_without_view_count_is_kept() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/channels"))
        .and(query_param("id", "UCpartial"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "kind": "youtube#channelListResponse",
            "etag": "list-etag",
            "items": [{
                "kind": "youtube#channel",
                "etag": "item-etag",
                "id": "UCpartial",
                "statistics": {"hiddenSubscriberCount": false, "videoCount": "3"}
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server)
        .fetch_statistics(&channel("UCpartial"))
        .await
        .unwrap();

    let stats = &response.items[0].statistics;
    assert_eq!(stats.view_count, None);
    assert_eq!(stats.subscriber_count, None);
    assert_eq!(stats.video_count, Some(3));
}

#[tokio::test]
async fn test_unknown_channel_returns_no_items() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/channels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "kind": "youtube#channelListResponse",
            "etag": "list-etag",
            "pageInfo": {"totalResults": 0, "resultsPerPage": 5}
        })))
        .mount(&server)
        .await;

    let response = client(&server)
        .fetch_statistics(&channel("UCgone"))
        .await
        .unwrap();
    assert!(response.items.is_empty());
}

#[tokio::test]
async fn test_server_errors_are_service_unavailable() {
    for status in [500u16, 503] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels"))
            .respond_with(
                ResponseTemplate::new(status).set_body_json(error_body(
                    status,
                    "backendError",
                    "Backend Error",
                )),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_statistics(&channel("UCabc"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ApiError::ServiceUnavailable {
                status,
                message: "Backend Error".to_string()
            }
        );
    }
}

#[tokio::test]
async fn test_quota_exceeded_is_authorization_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/channels"))
        .respond_with(ResponseTemplate::new(403).set_body_json(error_body(
            403,
            "quotaExceeded",
            "The request cannot be completed because you have exceeded your quota.",
        )))
        .mount(&server)
        .await;

    match client(&server).fetch_statistics(&channel("UCabc")).await {
        Err(ApiError::AuthorizationInvalid { status, reason, .. }) => {
            assert_eq!(status, 403);
            assert_eq!(reason, "quotaExceeded");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_key_is_authorization_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/channels"))
        .respond_with(ResponseTemplate::new(400).set_body_json(error_body(
            400,
            "keyInvalid",
            "API key not valid. Please pass a valid API key.",
        )))
        .mount(&server)
        .await;

    let err = client(&server)
        .fetch_statistics(&channel("UCabc"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApiError::AuthorizationInvalid { status: 400, .. }
    ));
}

#[tokio::test]
async fn test_other_client_errors_are_unclassified() {
    for (status, reason) in [(400u16, "invalidPart"), (404, "notFound")] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels"))
            .respond_with(
                ResponseTemplate::new(status).set_body_json(error_body(status, reason, "nope")),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_statistics(&channel("UCabc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Other(_)), "status {status}: {err:?}");
    }
}

#[tokio::test]
async fn test_factory_binds_credential_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/channels"))
        .and(query_param("key", "second-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "kind": "youtube#channelListResponse",
            "etag": "e",
            "items": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let factory = YoutubeClientFactory::with_client(reqwest::Client::new(), server.uri());
    let client = factory
        .build(&Credential::new("second-key", "ops@example.com", "p2"))
        .unwrap();
    client.fetch_statistics(&channel("UCabc")).await.unwrap();

    assert!(factory
        .build(&Credential::new("  ", "ops@example.com", "p3"))
        .is_err());
}
