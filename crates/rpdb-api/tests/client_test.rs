// Integration tests for `ApiClient` using wiremock.

use serde_json::json;
use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rpdb_api::{ApiClient, ApiConfig, BulkStatus, Entry, EntryFilter, Error, UpdateRequest};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, ApiClient) {
    let server = MockServer::start().await;

    let mut config = ApiConfig::new("test-key");
    config.base_url = server.uri();
    config.language = "en".into();
    config.treat_as_java_client = true;

    let client = ApiClient::new(config).unwrap();
    (server, client)
}

fn entry_json(id: i64, attribute_id: i64, date_time: &str) -> serde_json::Value {
    json!({
        "id": id,
        "attribute": { "id": attribute_id },
        "date_time": date_time,
        "date_time_execution": null,
        "parameters": [],
        "creator": 1
    })
}

// ── Happy-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_get_entries_sends_required_headers() {
    let (server, client) = setup().await;

    Mock::given(method("PROPFIND"))
        .and(path("/entry"))
        .and(header("X-Api-Key", "test-key"))
        .and(header("Java-Client", "true"))
        .and(header("Language", "en"))
        .and(header("Multi-Instance", "false"))
        .and(header_exists("Client-Version"))
        .and(header_exists("Client-Date"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            entry_json(1, 3, "2030-05-01T12:00:00"),
            entry_json(2, 3, "2030-05-02T12:00:00"),
        ])))
        .mount(&server)
        .await;

    let entries = client.get_entries(&EntryFilter::default()).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, 1);
    assert_eq!(entries[0].attribute.id(), 3);
}

#[tokio::test]
async fn test_get_entries_no_content_is_empty() {
    let (server, client) = setup().await;

    Mock::given(method("PROPFIND"))
        .and(path("/entry"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let entries = client.get_entries(&EntryFilter::default()).await.unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn test_get_entry() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/entry/7"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(entry_json(7, 3, "2030-05-01T08:30:00")),
        )
        .mount(&server)
        .await;

    let entry = client.get_entry(7).await.unwrap();
    assert_eq!(entry.id, 7);
    assert!(entry.date_time.is_set());
    assert!(!entry.date_time_execution.is_set());
}

#[tokio::test]
async fn test_get_attributes_no_content() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/attribute"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    assert!(client.get_attributes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_attribute_by_name() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/attribute"))
        .and(query_param("name", "shutdown"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 3, "name": "shutdown", "execute_always": true }
        ])))
        .mount(&server)
        .await;

    let attribute = client.get_attribute_by_name("shutdown").await.unwrap();
    assert_eq!(attribute.id, 3);
    assert!(attribute.execute_always);
}

#[tokio::test]
async fn test_get_attribute_by_name_requires_single_match() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/attribute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 3, "name": "a" },
            { "id": 4, "name": "b" }
        ])))
        .mount(&server)
        .await;

    let err = client.get_attribute_by_name("a").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_get_update_query_parameters() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/update/42"))
        .and(query_param("only_version", "false"))
        .and(query_param("max_version", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "version": 43,
            "version_date": "2030-01-01T10:00:00",
            "entry": { "deleted": [9] },
            "attribute": {}
        })))
        .mount(&server)
        .await;

    let update = client
        .get_update(&UpdateRequest {
            latest_version: 42,
            max_version: 50,
            ..UpdateRequest::default()
        })
        .await
        .unwrap();

    assert_eq!(update.version, 43);
    assert_eq!(update.entry.deleted, vec![9]);
}

#[tokio::test]
async fn test_mark_entry_executed() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api-key/execution/12"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": { "client": "ok" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    client.mark_entry_executed(12).await.unwrap();
}

// ── Bulk behaviour ──────────────────────────────────────────────────

#[tokio::test]
async fn test_bulk_create_extracts_touched_entries() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/entry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "overview": { "successful": 2, "errors": 1, "exists": 0 },
            "message": { "client": "2 of 3 created" },
            "response": [
                { "status": "created", "code": 201, "data": entry_json(5, 1, "2030-06-01T10:00:00") },
                { "status": "updated", "code": 200, "data": entry_json(6, 1, "2030-06-02T10:00:00") },
                { "status": "failed", "code": 400, "data": {},
                  "Error": { "id": "INVALID_DATE", "message": "Date lies in the past" } }
            ]
        })))
        .mount(&server)
        .await;

    let entries = vec![Entry::default(), Entry::default(), Entry::default()];
    let (touched, bulk) = client.create_entries(&entries).await.unwrap();

    assert_eq!(touched.len(), 2);
    assert_eq!(touched[0].id, 5);
    assert_eq!(touched[1].id, 6);
    assert!(!bulk.was_successful());
    assert_eq!(bulk.response_data[2].status, BulkStatus::Failed);
}

#[tokio::test]
async fn test_bulk_delete_sends_id_body() {
    let (server, client) = setup().await;

    Mock::given(method("PATCH"))
        .and(path("/entry/delete"))
        .and(body_json(json!({ "bulk": [11] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "overview": { "successful": 1, "errors": 0, "exists": 0 },
            "message": { "client": "deleted" },
            "response": [ { "status": "deleted", "code": 200, "data": 11 } ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (deleted, bulk) = client.delete_entries(&[11]).await.unwrap();
    assert_eq!(deleted, vec![11]);
    assert!(bulk.was_successful());
}

#[tokio::test]
async fn test_bulk_body_wins_over_error_status() {
    // Bulk endpoints may answer >= 300 while still delivering a valid
    // per-element body; the body has to be preferred.
    let (server, client) = setup().await;

    Mock::given(method("PATCH"))
        .and(path("/entry/delete"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "overview": { "successful": 0, "errors": 1, "exists": 0 },
            "message": { "client": "nothing deleted" },
            "response": [
                { "status": "failed", "code": 404, "data": 9,
                  "Error": { "id": "ENTRY_NOT_FOUND", "message": "Entry was not found" } }
            ]
        })))
        .mount(&server)
        .await;

    let (deleted, bulk) = client.delete_entries(&[9]).await.unwrap();
    assert!(deleted.is_empty());
    assert_eq!(bulk.overview.errors, 1);
    assert_eq!(
        bulk.response_data[0].error.as_ref().unwrap().id,
        "ENTRY_NOT_FOUND"
    );
}

// ── Error mapping ───────────────────────────────────────────────────

#[tokio::test]
async fn test_recognized_error_body_maps_to_remote() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/entry/99"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "id": "ENTRY_NOT_FOUND", "message": "Entry was not found" }
        })))
        .mount(&server)
        .await;

    match client.get_entry(99).await.unwrap_err() {
        Error::Remote { id, code, message, .. } => {
            assert_eq!(id, "ENTRY_NOT_FOUND");
            assert_eq!(code, 404);
            assert_eq!(message, "Entry was not found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_body_is_not_interpreted() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/entry/1"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
        .mount(&server)
        .await;

    match client.get_entry(1).await.unwrap_err() {
        Error::Server { code, .. } => assert_eq!(code, 502),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_unrecognized_error_body_maps_to_local() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/entry/5"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    match client.delete_entry(5).await.unwrap_err() {
        Error::Local { cause, path } => {
            assert!(cause.contains("403"), "cause was: {cause}");
            assert!(path.contains("/entry/5"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
