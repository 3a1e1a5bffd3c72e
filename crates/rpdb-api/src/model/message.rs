// Response envelopes and socket message shapes.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::entry::Entry;
use super::update::Update;

/// Short phrase describing an operation and its status, translated to
/// the client language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResponseMessage {
    /// The message text in the client language.
    pub client: String,
}

impl ResponseMessage {
    pub fn new(client: impl Into<String>) -> Self {
        ResponseMessage {
            client: client.into(),
        }
    }
}

impl fmt::Display for ResponseMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.client)
    }
}

/// Standalone `{"message": {...}}` body returned by single mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResponseMessageWrapper {
    pub message: ResponseMessage,
}

/// Result of executing an entry whose attribute expects a response.
/// A code other than zero indicates an error, unix style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExecutionResponse {
    /// Id of the executed entry.
    pub entry_id: i64,

    /// Response code of the execution.
    #[serde(rename = "response_code")]
    pub code: i64,

    /// Message to display to the requesting client.
    #[serde(rename = "response")]
    pub text: String,
}

/// A message received over the socket connection, tagged by its `type`
/// field. Unrecognized types decode to [`Unknown`](SocketMessage::Unknown)
/// so newer servers can add message kinds without breaking old clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SocketMessage {
    /// A new change set for the cached data.
    Update { update: Update },

    /// An entry to execute immediately; the server waits for the
    /// client's [`ExecutionResponse`].
    ExecResponse { exec_response: Entry },

    /// Entries that are never persisted server-side and only exist on
    /// this connection.
    NoDb {
        no_db: Vec<Entry>,
        #[serde(default)]
        update: Update,
    },

    #[serde(other)]
    Unknown,
}

/// Envelope for messages the client writes to the socket.
#[derive(Debug, Clone, Serialize)]
pub struct SocketClientMessage {
    pub exec_response: ExecutionResponse,
}

// ── Tests ────────────────────────────────────────────────────────────
