//! Common test utilities and fixtures for mangahub integration tests
//!
//! This module provides:
//! - `ScriptedSource`, an in-memory metadata source tests fill by hand
//! - `TestServer`, a full server on an ephemeral port with a temp data dir
//! - `WsClient`, a small WebSocket client speaking the task protocol
//! - `FakeUpstream`, an image host that counts requests

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod test_server;
pub mod ws_client;

pub use test_server::{FakeUpstream, ScriptedSource, TestServer};
pub use ws_client::WsClient;

use mangahub::{Chapter, Manga};

pub fn manga(id: &str, title: &str) -> Manga {
    Manga {
        title: title.to_string(),
        ..Manga::new(id)
    }
}

pub fn chapter(id: &str, manga_id: &str, number: &str, publish_at: i64) -> Chapter {
    Chapter {
        id: id.to_string(),
        manga_id: manga_id.to_string(),
        chapter: number.to_string(),
        publish_at,
        ..Default::default()
    }
}
