use serde_json::json;
use vaultsync_core::{
    ChangeKind, NewFileRecord, RecordUpdate, SortOrder, StoreClient, format_millis,
};
use wiremock::matchers::{body_bytes, body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn record_json(id: &str, name: &str, modified_at: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "extension": "xml",
        "content_ref": format!("https://blobs.example/{name}"),
        "owner_id": "owner-1",
        "uploaded_at": "2024-01-01T00:00:00Z",
        "uploaded_by": "a@example.com",
        "modified_at": modified_at,
        "modified_by": "a@example.com"
    })
}

#[tokio::test]
async fn get_account_sends_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/account"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "owner_id": "owner-1",
            "email": "a@example.com"
        })))
        .mount(&server)
        .await;

    let client = StoreClient::with_base_url(&server.uri(), "test-token").unwrap();
    let account = client.get_account().await.unwrap();

    assert_eq!(account.owner_id, "owner-1");
    assert_eq!(account.email.as_deref(), Some("a@example.com"));
}

#[tokio::test]
async fn find_record_filters_by_owner_and_name() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/files"))
        .and(query_param("owner_id", "owner-1"))
        .and(query_param("name", "Hello World.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [record_json("r1", "Hello World.xml", "2024-01-02T00:00:00Z")]
        })))
        .mount(&server)
        .await;

    let client = StoreClient::with_base_url(&server.uri(), "test-token").unwrap();
    let record = client
        .find_record("owner-1", "Hello World.xml")
        .await
        .unwrap()
        .expect("record should be found");

    assert_eq!(record.id, "r1");
    assert_eq!(record.modified_at_millis().unwrap(), Some(1_704_153_600_000));
}

#[tokio::test]
async fn find_record_returns_none_for_empty_list() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(&server)
        .await;

    let client = StoreClient::with_base_url(&server.uri(), "test-token").unwrap();
    assert!(client.find_record("owner-1", "a.xml").await.unwrap().is_none());
}

#[tokio::test]
async fn list_records_orders_by_upload_time() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/files"))
        .and(query_param("owner_id", "owner-1"))
        .and(query_param("extension", "png"))
        .and(query_param("order_by", "uploaded_at"))
        .and(query_param("direction", "desc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                record_json("r2", "b.png", "2024-01-02T00:00:00Z"),
                record_json("r1", "a.png", "2024-01-01T00:00:00Z")
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = StoreClient::with_base_url(&server.uri(), "test-token").unwrap();
    let records = client
        .list_records("owner-1", Some("png"), SortOrder::Descending)
        .await
        .unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].name, "b.png");
}

#[tokio::test]
async fn put_blob_uploads_raw_bytes_under_owner_and_name() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/blobs/owner-1/a.xml"))
        .and(body_bytes(b"<a/>".to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content_ref": "https://blobs.example/owner-1/a.xml?v=2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = StoreClient::with_base_url(&server.uri(), "test-token").unwrap();
    let blob = client
        .put_blob("owner-1", "a.xml", b"<a/>".to_vec())
        .await
        .unwrap();

    assert_eq!(blob.content_ref, "https://blobs.example/owner-1/a.xml?v=2");
}

#[tokio::test]
async fn delete_blob_reports_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/blobs/owner-1/gone.xml"))
        .respond_with(ResponseTemplate::new(404).set_body_string("object-not-found"))
        .mount(&server)
        .await;

    let client = StoreClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client
        .delete_blob("owner-1", "gone.xml")
        .await
        .expect_err("missing blob should fail");

    assert!(err.is_not_found());
}

#[tokio::test]
async fn create_record_posts_json_body() {
    let server = MockServer::start().await;
    let modified_at = format_millis(1_700_000_000_000).unwrap();

    let new_record = NewFileRecord {
        name: "a.xml".into(),
        extension: "xml".into(),
        content_ref: "https://blobs.example/a.xml".into(),
        owner_id: "owner-1".into(),
        uploaded_at: "2024-01-01T00:00:00Z".into(),
        uploaded_by: Some("a@example.com".into()),
        modified_at: modified_at.clone(),
        modified_by: Some("a@example.com".into()),
    };

    Mock::given(method("POST"))
        .and(path("/v1/files"))
        .and(body_json(json!({
            "name": "a.xml",
            "extension": "xml",
            "content_ref": "https://blobs.example/a.xml",
            "owner_id": "owner-1",
            "uploaded_at": "2024-01-01T00:00:00Z",
            "uploaded_by": "a@example.com",
            "modified_at": modified_at,
            "modified_by": "a@example.com"
        })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(record_json("r1", "a.xml", &modified_at)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = StoreClient::with_base_url(&server.uri(), "test-token").unwrap();
    let created = client.create_record(&new_record).await.unwrap();

    assert_eq!(created.id, "r1");
}

#[tokio::test]
async fn update_record_patches_by_id() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/v1/files/r1"))
        .and(body_json(json!({
            "content_ref": "https://blobs.example/a.xml?v=3",
            "modified_at": "2024-03-01T00:00:00Z",
            "modified_by": "b@example.com"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(record_json(
            "r1",
            "a.xml",
            "2024-03-01T00:00:00Z",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let client = StoreClient::with_base_url(&server.uri(), "test-token").unwrap();
    let existing: vaultsync_core::FileRecord =
        serde_json::from_value(record_json("r1", "a.xml", "2024-01-01T00:00:00Z")).unwrap();
    let updated = client
        .update_record(
            &existing,
            &RecordUpdate {
                content_ref: "https://blobs.example/a.xml?v=3".into(),
                modified_at: "2024-03-01T00:00:00Z".into(),
                modified_by: Some("b@example.com".into()),
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.modified_at.as_deref(), Some("2024-03-01T00:00:00Z"));
}

#[tokio::test]
async fn changes_passes_cursor() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/changes"))
        .and(query_param("owner_id", "owner-1"))
        .and(query_param("cursor", "c-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cursor": "c-8",
            "changes": [
                { "kind": "removed", "record": record_json("r1", "a.xml", "2024-01-01T00:00:00Z") }
            ]
        })))
        .mount(&server)
        .await;

    let client = StoreClient::with_base_url(&server.uri(), "test-token").unwrap();
    let page = client.changes("owner-1", Some("c-7")).await.unwrap();

    assert_eq!(page.cursor, "c-8");
    assert_eq!(page.changes.len(), 1);
    assert_eq!(page.changes[0].kind, ChangeKind::Removed);
}

#[tokio::test]
async fn unauthorized_is_classified_as_auth() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/account"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
        .mount(&server)
        .await;

    let client = StoreClient::with_base_url(&server.uri(), "stale").unwrap();
    let err = client.get_account().await.expect_err("401 should fail");

    assert!(err.is_auth());
    assert!(!err.is_not_found());
}
