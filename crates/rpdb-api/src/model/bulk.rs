// Bulk operation responses: per-element status plus an overview.

use serde::{Deserialize, Serialize};

use super::message::ResponseMessage;
use crate::error::RemoteErrorBody;

/// Result of a bulk request.
///
/// A bulk call succeeds as a whole even when individual elements fail;
/// inspect the per-element rows for error handling. `T` is the payload
/// of one row (an entry for create/update, a plain id for delete).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, bound(deserialize = "T: serde::Deserialize<'de> + Default"))]
pub struct BulkResponse<T> {
    /// Operation counters grouped by status.
    pub overview: BulkOverview,

    /// Short summary phrase for the client.
    pub message: ResponseMessage,

    /// One row per requested element.
    #[serde(rename = "response")]
    pub response_data: Vec<BulkData<T>>,
}

impl<T> Default for BulkResponse<T> {
    fn default() -> Self {
        BulkResponse {
            overview: BulkOverview::default(),
            message: ResponseMessage::default(),
            response_data: Vec::new(),
        }
    }
}

impl<T> BulkResponse<T> {
    /// Whether every requested operation was executed successfully.
    pub fn was_successful(&self) -> bool {
        self.overview.errors == 0 && self.overview.exists == 0
    }
}

/// Counters of executed bulk operations grouped by their status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BulkOverview {
    pub successful: i64,
    pub errors: i64,
    pub exists: i64,
}

/// A single element handled by a bulk request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, bound(deserialize = "T: serde::Deserialize<'de> + Default"))]
pub struct BulkData<T> {
    /// Outcome of the operation for this element.
    pub status: BulkStatus,

    /// HTTP-like status code of the operation.
    #[serde(rename = "code")]
    pub status_code: u16,

    /// The object that was handled.
    pub data: T,

    /// Error details when the status code is 300 or above.
    #[serde(rename = "Error", skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteErrorBody>,
}

impl<T: Default> Default for BulkData<T> {
    fn default() -> Self {
        BulkData {
            status: BulkStatus::Failed,
            status_code: 0,
            data: T::default(),
            error: None,
        }
    }
}

/// Status of a single bulk element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BulkStatus {
    /// Older servers spell this as `error`.
    #[default]
    #[serde(alias = "error")]
    Failed,
    Created,
    Exists,
    Deleted,
    Updated,
    Equal,
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::entry::Entry;

    #[test]
    fn decode_bulk_entry_response() {
        let json = r#"{
            "overview": { "successful": 1, "errors": 1, "exists": 0 },
            "message": { "client": "1 of 2 entries were created" },
            "response": [
                { "status": "created", "code": 201, "data": { "id": 5, "attribute": { "id": 1 } } },
                {
                    "status": "failed",
                    "code": 400,
                    "data": {},
                    "Error": { "id": "INVALID_DATE", "message": "Date lies in the past" }
                }
            ]
        }"#;

        let bulk: BulkResponse<Entry> = serde_json::from_str(json).unwrap();
        assert!(!bulk.was_successful());
        assert_eq!(bulk.response_data.len(), 2);
        assert_eq!(bulk.response_data[0].status, BulkStatus::Created);
        assert_eq!(bulk.response_data[0].data.id, 5);
        assert_eq!(
            bulk.response_data[1].error.as_ref().unwrap().id,
            "INVALID_DATE"
        );
    }

    #[test]
    fn decode_bulk_id_response() {
        let json = r#"{
            "overview": { "successful": 1, "errors": 0, "exists": 0 },
            "message": { "client": "ok" },
            "response": [ { "status": "deleted", "code": 200, "data": 11 } ]
        }"#;

        let bulk: BulkResponse<i64> = serde_json::from_str(json).unwrap();
        assert!(bulk.was_successful());
        assert_eq!(bulk.response_data[0].data, 11);
        assert_eq!(bulk.response_data[0].status, BulkStatus::Deleted);
    }

    #[test]
    fn status_round_trip() {
        for (status, wire) in [
            (BulkStatus::Failed, r#""failed""#),
            (BulkStatus::Created, r#""created""#),
            (BulkStatus::Exists, r#""exists""#),
            (BulkStatus::Deleted, r#""deleted""#),
            (BulkStatus::Updated, r#""updated""#),
            (BulkStatus::Equal, r#""equal""#),
        ] {
            assert_eq!(serde_json::to_string(&status).unwrap(), wire);
            let back: BulkStatus = serde_json::from_str(wire).unwrap();
            assert_eq!(back, status);
        }

        // Legacy spelling decodes to the failed status.
        let legacy: BulkStatus = serde_json::from_str(r#""error""#).unwrap();
        assert_eq!(legacy, BulkStatus::Failed);
    }
}
