//! Library update scheduler tests through the socket and the updater handle

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;

use mangahub::LibraryStore;

use common::{chapter, TestServer, WsClient};

#[tokio::test]
async fn test_progress_is_broadcast_to_every_client() {
    let server = TestServer::start().await;
    server.follow("m1", "One");
    server.follow("m2", "Two");
    server.follow("m3", "Three");
    server
        .source
        .set_feed("m2", vec![chapter("c1", "m2", "1", 10)]);

    let mut a = WsClient::connect(&server.ws_url()).await;
    let mut b = WsClient::connect(&server.ws_url()).await;
    server.wait_for_connections(2).await;

    a.request(1, 60, json!(null)).await;

    let events = b.recv_update_events().await;
    assert_eq!(events.len(), 4);
    for (i, event) in events[..3].iter().enumerate() {
        assert_eq!(event["body"]["progress"], i + 1);
        assert_eq!(event["body"]["total"], 3);
    }
    assert!(events[3]["body"].is_null());

    // The trigger reply itself is private to the requester
    let reply = a.recv_reply(1).await;
    assert_eq!(reply["task"], 60);

    a.request(2, 61, json!(null)).await;
    let state = a.recv_reply(2).await;
    assert!(state["body"].is_null());
    assert_eq!(server.store.chapters_by_manga("m2").unwrap().len(), 1);
}

#[tokio::test]
async fn test_trigger_while_running_joins_the_pass() {
    let server = TestServer::start().await;
    server.follow("m1", "One");
    server.follow("m2", "Two");
    *server.source.latency.lock() = Some(Duration::from_millis(100));

    let first = server.updater.trigger();
    assert!(first.is_some());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let updater = server.updater.clone();
        handles.push(tokio::spawn(async move { updater.trigger() }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_some());
    }

    server.updater.wait_idle().await;
    assert_eq!(server.updater.passes(), 1);
    assert_eq!(server.source.manga_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failing_title_is_skipped() {
    let server = TestServer::start().await;
    server.follow("m1", "One");
    server.follow("m2", "Two");
    server.source.failing.lock().insert("m1".to_string());
    server
        .source
        .set_feed("m2", vec![chapter("c9", "m2", "9", 90)]);

    let mut client = WsClient::connect(&server.ws_url()).await;
    server.wait_for_connections(1).await;
    server.updater.trigger();

    let events = client.recv_update_events().await;
    assert_eq!(events.len(), 3);
    assert_eq!(events[1]["body"]["progress"], 2);
    assert_eq!(server.store.chapters_by_manga("m2").unwrap().len(), 1);
    assert!(server.services.prefs().library().last_updated > 0);
}

#[tokio::test]
async fn test_library_listing_rebuilt_after_pass() {
    let server = TestServer::start().await;
    server.follow("m1", "Old title");
    let before = server.services.library().unwrap();
    assert_eq!(before[0].title, "Old title");

    server.source.add_manga(common::manga("m1", "New title"));
    server.updater.trigger();
    server.updater.wait_idle().await;

    let mut after = server.services.library().unwrap();
    for _ in 0..100 {
        if after[0].title == "New title" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        after = server.services.library().unwrap();
    }
    assert_eq!(after[0].title, "New title");
}
