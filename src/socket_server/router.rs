//! Task dispatch
//!
//! The handler table is built once in [`Router::new`]. Every inbound frame is
//! decoded, looked up by task and answered through the hub: broadcast-classed
//! tasks go to every client, everything else only to the sender.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use serde_json::Value;

use super::handlers;
use super::hub::{ConnectionId, HubHandle};
use super::protocol::{IncomingMessage, OutgoingMessage, Task};
use crate::error::Result;
use crate::server::sync::LibraryUpdater;
use crate::services::Services;

/// Everything a handler may touch
pub struct AppContext {
    pub services: Arc<Services>,
    pub updater: Arc<LibraryUpdater>,
}

pub type Handler =
    Box<dyn Fn(Arc<AppContext>, Option<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Arc<AppContext>, Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Box::new(move |ctx, body| Box::pin(f(ctx, body)))
}

pub struct Router {
    handlers: HashMap<Task, Handler>,
    ctx: Arc<AppContext>,
    hub: HubHandle,
}

impl Router {
    pub fn new(ctx: Arc<AppContext>, hub: HubHandle) -> Self {
        let mut table: HashMap<Task, Handler> = HashMap::new();

        table.insert(Task::GetManga, handler(handlers::get_manga));
        table.insert(Task::UpdateManga, handler(handlers::update_manga));
        table.insert(Task::FollowManga, handler(handlers::follow_manga));
        table.insert(Task::UnfollowManga, handler(handlers::unfollow_manga));

        table.insert(Task::GetChapter, handler(handlers::get_chapter));
        table.insert(Task::UpdateChapter, handler(handlers::update_chapter));
        table.insert(Task::GetChapters, handler(handlers::get_chapters));
        table.insert(Task::UpdateChapters, handler(handlers::update_chapters));

        table.insert(Task::ReadPage, handler(handlers::read_page));
        table.insert(Task::ReadChapter, handler(handlers::read_chapter));
        table.insert(Task::UnreadChapter, handler(handlers::unread_chapter));

        table.insert(Task::Library, handler(handlers::library));
        table.insert(Task::Browse, handler(handlers::browse));
        table.insert(Task::Tags, handler(handlers::tags));
        table.insert(Task::Updates, handler(handlers::updates));
        table.insert(Task::History, handler(handlers::history));

        table.insert(Task::GetPrefs, handler(handlers::get_prefs));
        table.insert(Task::GetBrowsePreference, handler(handlers::get_browse_preference));
        table.insert(Task::GetLibraryPreference, handler(handlers::get_library_preference));
        table.insert(Task::GetReaderPreference, handler(handlers::get_reader_preference));
        table.insert(Task::UpdateBrowsePreference, handler(handlers::update_browse_preference));
        table.insert(Task::UpdateLibraryPreference, handler(handlers::update_library_preference));
        table.insert(Task::UpdateReaderPreference, handler(handlers::update_reader_preference));

        table.insert(Task::UpdateLibrary, handler(handlers::update_library));
        table.insert(Task::GetUpdateLibraryState, handler(handlers::get_update_library_state));

        Self {
            handlers: table,
            ctx,
            hub,
        }
    }

    pub fn is_routable(&self, task: Task) -> bool {
        self.handlers.contains_key(&task)
    }

    /// Decode one frame from `connection`, run its handler and route the reply
    pub async fn dispatch(&self, connection: ConnectionId, text: &str) {
        let request: IncomingMessage = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(connection, "Dropping undecodable message: {}", e);
                return;
            }
        };

        let Some((task, handler)) = Task::try_from(request.task)
            .ok()
            .and_then(|task| self.handlers.get(&task).map(|h| (task, h)))
        else {
            tracing::warn!(
                connection,
                identifier = request.identifier,
                task = request.task,
                "Dropping message for unknown task"
            );
            return;
        };

        let start = Instant::now();
        let result = handler(Arc::clone(&self.ctx), request.body).await;
        if let Err(e) = &result {
            tracing::warn!(connection, task = ?task, identifier = request.identifier, "Task failed: {}", e);
        }
        tracing::debug!(
            connection,
            task = ?task,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Task handled"
        );

        let reply = OutgoingMessage::reply(request.identifier, task, result);
        if task.is_broadcast() {
            self.hub.broadcast(&reply);
        } else {
            self.hub.send(connection, &reply);
        }
    }
}
