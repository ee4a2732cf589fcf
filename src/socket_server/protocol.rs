//! Socket protocol message types
//!
//! One JSON object per WebSocket text frame:
//!
//! ```json
//! // Client -> Server
//! {"identifier": 7, "task": 1, "body": "a96676e5-8ae2-425e-b549-7f15dd34a6d8"}
//!
//! // Server -> Client
//! {"identifier": 7, "task": 1, "body": {...}}
//! {"identifier": 8, "task": 3, "error": "manga not found: ..."}
//! {"task": 60, "body": {"progress": 2, "total": 10, "current": "..."}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Integer-coded operations exchanged with the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Task {
    GetManga,
    UpdateManga,
    FollowManga,
    UnfollowManga,

    GetChapter,
    UpdateChapter,
    GetChapters,
    UpdateChapters,

    ReadPage,
    ReadChapter,
    UnreadChapter,

    Library,
    Browse,
    Tags,
    Updates,
    History,

    GetPrefs,
    GetBrowsePreference,
    GetLibraryPreference,
    GetReaderPreference,

    UpdateBrowsePreference,
    UpdateLibraryPreference,
    UpdateReaderPreference,

    UpdateLibrary,
    GetUpdateLibraryState,
}

impl Task {
    pub const ALL: [Task; 25] = [
        Task::GetManga,
        Task::UpdateManga,
        Task::FollowManga,
        Task::UnfollowManga,
        Task::GetChapter,
        Task::UpdateChapter,
        Task::GetChapters,
        Task::UpdateChapters,
        Task::ReadPage,
        Task::ReadChapter,
        Task::UnreadChapter,
        Task::Library,
        Task::Browse,
        Task::Tags,
        Task::Updates,
        Task::History,
        Task::GetPrefs,
        Task::GetBrowsePreference,
        Task::GetLibraryPreference,
        Task::GetReaderPreference,
        Task::UpdateBrowsePreference,
        Task::UpdateLibraryPreference,
        Task::UpdateReaderPreference,
        Task::UpdateLibrary,
        Task::GetUpdateLibraryState,
    ];

    pub fn code(self) -> i64 {
        match self {
            Task::GetManga => 1,
            Task::UpdateManga => 2,
            Task::FollowManga => 3,
            Task::UnfollowManga => 4,
            Task::GetChapter => 5,
            Task::UpdateChapter => 6,
            Task::GetChapters => 7,
            Task::UpdateChapters => 8,
            Task::ReadPage => 9,
            Task::ReadChapter => 10,
            Task::UnreadChapter => 11,
            Task::Library => 30,
            Task::Browse => 31,
            Task::Tags => 32,
            Task::Updates => 33,
            Task::History => 34,
            Task::GetPrefs => 40,
            Task::GetBrowsePreference => 41,
            Task::GetLibraryPreference => 42,
            Task::GetReaderPreference => 43,
            Task::UpdateBrowsePreference => 51,
            Task::UpdateLibraryPreference => 52,
            Task::UpdateReaderPreference => 53,
            Task::UpdateLibrary => 60,
            Task::GetUpdateLibraryState => 61,
        }
    }

    /// Tasks that mutate shared state; their replies go to every client.
    pub fn is_broadcast(self) -> bool {
        matches!(
            self,
            Task::UpdateManga
                | Task::FollowManga
                | Task::UnfollowManga
                | Task::UpdateChapter
                | Task::UpdateChapters
                | Task::ReadPage
                | Task::ReadChapter
                | Task::UnreadChapter
                | Task::UpdateReaderPreference
        )
    }
}

impl TryFrom<i64> for Task {
    type Error = String;

    fn try_from(code: i64) -> std::result::Result<Self, Self::Error> {
        Task::ALL
            .iter()
            .copied()
            .find(|task| task.code() == code)
            .ok_or_else(|| format!("unknown task: {}", code))
    }
}

impl From<Task> for i64 {
    fn from(task: Task) -> i64 {
        task.code()
    }
}

/// Client-to-server envelope. `task` stays raw so unknown codes can be
/// logged with their identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub identifier: i64,
    pub task: i64,
    #[serde(default)]
    pub body: Option<Value>,
}

/// Server-to-client envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Echo of the request identifier; absent on server-initiated broadcasts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<i64>,
    pub task: Task,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutgoingMessage {
    /// Reply to a request; an error becomes the `error` field
    pub fn reply(identifier: i64, task: Task, result: Result<Value>) -> Self {
        match result {
            Ok(body) => Self {
                identifier: Some(identifier),
                task,
                body: Some(body),
                error: None,
            },
            Err(e) => Self {
                identifier: Some(identifier),
                task,
                body: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Server-initiated message with no request to correlate
    pub fn event(task: Task, body: Value) -> Self {
        Self {
            identifier: None,
            task,
            body: Some(body),
            error: None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HubError;

    #[test]
    fn test_task_codes_roundtrip() {
        for task in Task::ALL {
            assert_eq!(Task::try_from(task.code()), Ok(task));
        }
        assert!(Task::try_from(12).is_err());
        assert_eq!(Task::UpdateLibrary.code(), 60);
    }

    #[test]
    fn test_broadcast_set() {
        let broadcast: Vec<i64> = Task::ALL
            .iter()
            .filter(|t| t.is_broadcast())
            .map(|t| t.code())
            .collect();
        assert_eq!(broadcast, vec![2, 3, 4, 6, 8, 9, 10, 11, 53]);
    }

    #[test]
    fn test_incoming_parse() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"identifier":3,"task":999,"body":{"a":1}}"#).unwrap();
        assert_eq!(msg.identifier, 3);
        assert_eq!(msg.task, 999);
        assert!(msg.body.is_some());

        let msg: IncomingMessage = serde_json::from_str(r#"{"identifier":4,"task":30}"#).unwrap();
        assert!(msg.body.is_none());

        assert!(serde_json::from_str::<IncomingMessage>(r#"{"task":30}"#).is_err());
    }

    #[test]
    fn test_reply_serialization() {
        let ok = OutgoingMessage::reply(5, Task::Library, Ok(Value::Null));
        assert_eq!(ok.to_json().unwrap(), r#"{"identifier":5,"task":30,"body":null}"#);

        let err = OutgoingMessage::reply(
            6,
            Task::FollowManga,
            Err(HubError::not_found("manga", "x")),
        );
        assert_eq!(
            err.to_json().unwrap(),
            r#"{"identifier":6,"task":3,"error":"manga not found: x"}"#
        );

        let event = OutgoingMessage::event(Task::UpdateLibrary, Value::Null);
        assert_eq!(event.to_json().unwrap(), r#"{"task":60,"body":null}"#);
    }
}
