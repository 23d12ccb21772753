mod support;

use std::time::Duration;

use support::FakeTimelineServer;
use timeline_mirror::provider::{Credentials, HttpTimelineClient};
use timeline_mirror_core::contract::{FeedIdentity, FeedProvider, ItemId, PageRequest, ProviderError};

fn credentials() -> Credentials {
    Credentials {
        consumer_key: "consumer-key".into(),
        consumer_secret: "consumer-secret".into(),
        access_token: "access-token".into(),
        access_secret: "access-secret".into(),
    }
}

fn client(base_url: &str) -> HttpTimelineClient {
    HttpTimelineClient::new(base_url, Duration::from_secs(5), credentials(), "id")
        .expect("client builds")
}

fn request(feed: &str) -> PageRequest {
    PageRequest {
        feed: FeedIdentity::from(feed),
        since_id: None,
        max_id: None,
        cursor: None,
        page_size: 2,
    }
}

#[tokio::test]
async fn fetches_a_bounded_page_with_credentials() {
    let server = FakeTimelineServer::start().await.with_feed("alice", 1..=20);
    let client = client(&server.base_url);

    let page = client
        .fetch_page(PageRequest {
            since_id: Some(ItemId(5)),
            max_id: Some(ItemId(9)),
            ..request("alice")
        })
        .await
        .expect("page");

    let ids: Vec<ItemId> = page.items.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![ItemId(8), ItemId(7)]);
    assert_eq!(page.next_cursor.as_deref(), Some("2"));
    assert_eq!(page.items[0].payload["user"]["screen_name"], "alice");

    let seen = &server.requests()[0];
    assert_eq!(seen.path, "/timelines/alice");
    assert_eq!(seen.query["count"], "2");
    assert_eq!(seen.query["since_id"], "5");
    assert_eq!(seen.query["max_id"], "9");
    assert!(!seen.query.contains_key("cursor"));
    assert_eq!(seen.headers["x-access-token"], "access-token");
    assert_eq!(seen.headers["x-access-secret"], "access-secret");
    assert!(seen.headers["authorization"].starts_with("Basic "));
}

#[tokio::test]
async fn follows_the_continuation_cursor_to_the_end() {
    let server = FakeTimelineServer::start().await.with_feed("alice", 1..=3);
    let client = client(&server.base_url);

    let first = client.fetch_page(request("alice")).await.unwrap();
    let second = client
        .fetch_page(PageRequest {
            cursor: first.next_cursor.clone(),
            ..request("alice")
        })
        .await
        .unwrap();

    assert_eq!(first.items.len(), 2);
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].id, ItemId(1));
    assert_eq!(second.next_cursor, None);
    assert_eq!(server.requests()[1].query["cursor"], "2");
}

#[tokio::test]
async fn too_many_requests_is_a_rate_limit() {
    let server = FakeTimelineServer::start()
        .await
        .with_feed("alice", 1..=3)
        .throttle_call(0);

    let err = client(&server.base_url)
        .fetch_page(request("alice"))
        .await
        .unwrap_err();

    assert_eq!(err, ProviderError::RateLimited);
}

#[tokio::test]
async fn unknown_feed_is_rejected() {
    let server = FakeTimelineServer::start().await;

    let err = client(&server.base_url)
        .fetch_page(request("ghost"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Rejected(msg) if msg.contains("404")));
}

#[tokio::test]
async fn fragment_characters_in_a_feed_do_not_reach_another_feed() {
    let server = FakeTimelineServer::start().await.with_feed("alice", 1..=3);

    let err = client(&server.base_url)
        .fetch_page(request("alice#x"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Rejected(msg) if msg.contains("404")));
    assert_eq!(server.requests()[0].path, "/timelines/alice%23x");
}

#[tokio::test]
async fn feeds_with_reserved_characters_round_trip() {
    let server = FakeTimelineServer::start()
        .await
        .with_feed("team/ops news", 10..=11);

    let page = client(&server.base_url)
        .fetch_page(request("team/ops news"))
        .await
        .expect("escaped feed is served");

    let ids: Vec<ItemId> = page.items.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![ItemId(11), ItemId(10)]);
    assert_eq!(server.requests()[0].path, "/timelines/team%2Fops%20news");
}

#[tokio::test]
async fn unreachable_provider_is_transient() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{addr}"))
        .fetch_page(request("alice"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Transient(_)));
}
