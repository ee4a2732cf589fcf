//! Asset reverse-proxy tests through the HTTP surface

mod common;

use common::test_server::FAKE_IMAGE;
use common::{FakeUpstream, TestServer};

#[tokio::test]
async fn test_repeat_request_is_served_from_disk() {
    let upstream = FakeUpstream::start().await;
    let server = TestServer::start_with_upstream(&upstream.url).await;
    let url = server.http_url("/0/covers/m1/cover.png");

    let first = reqwest::get(&url).await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(first.headers()["content-type"], "image/png");
    let first = first.bytes().await.unwrap();

    let second = reqwest::get(&url).await.unwrap();
    assert_eq!(second.status(), 200);
    let second = second.bytes().await.unwrap();

    assert_eq!(&first[..], FAKE_IMAGE);
    assert_eq!(first, second);
    assert_eq!(upstream.hits(), 1);

    let on_disk = std::fs::read(server.temp.path().join("cache/covers/m1/cover.png")).unwrap();
    assert_eq!(on_disk, FAKE_IMAGE);
}

#[tokio::test]
async fn test_upstream_failure_is_relayed_and_not_cached() {
    let upstream = FakeUpstream::start().await;
    let server = TestServer::start_with_upstream(&upstream.url).await;
    let url = server.http_url("/0/gone/page.jpg");

    for _ in 0..2 {
        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), 404);
    }
    assert_eq!(upstream.hits(), 2);
    assert!(!server.temp.path().join("cache/gone/page.jpg").exists());
}

#[tokio::test]
async fn test_path_escape_is_rejected() {
    let upstream = FakeUpstream::start().await;
    let server = TestServer::start_with_upstream(&upstream.url).await;

    let response = reqwest::get(server.http_url("/0/covers%2F..%2F..%2Fsecret"))
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(upstream.hits(), 0);
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let server = TestServer::start().await;
    let response = reqwest::get(server.http_url("/0/covers/x.png")).await.unwrap();
    assert_eq!(response.status(), 502);
}
