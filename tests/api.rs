use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use docvault::{
    AppState, db,
    jobs::{
        extractor::PlaceholderExtractor,
        notifier::LogNotifier,
        queue::{JobQueue, RetryPolicy},
        tasks::{MaintenanceSettings, TaskRunner},
        worker::{WorkerConfig, WorkerPool},
    },
    models::{access_log::AccessAction, client::ClientRegion, job::JobKind, user::User},
    routes::routes::routes,
    services::{
        access_log_service::AccessLogService,
        document_service::{DocumentService, DocumentSettings},
        storage::{
            ObjectLocation, ObjectStore,
            local::LocalObjectStore,
            memory::MemoryObjectStore,
            region::{RegionRouter, StoreTarget},
        },
        user_service::{NewUser, UserService},
    },
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;
use uuid::Uuid;

const PDF: &[u8] = b"%PDF-1.4\n1 0 obj << >> stream\nBT (PASSPORT P1234567) Tj ET\nendstream\n%%EOF";
const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR\x00\x00\x00\x01\x00\x00\x00\x01";
const BOUNDARY: &str = "docvault-test-boundary";
const AU_BUCKET: &str = "immigration-docs-au";
const IN_BUCKET: &str = "immigration-docs-in";

struct TestApp {
    router: Router,
    store: Arc<MemoryObjectStore>,
    workers: WorkerPool,
    queue: JobQueue,
    access_logs: AccessLogService,
    staff: (User, String),
    officer: (User, String),
    other_officer: (User, String),
}

async fn test_app() -> TestApp {
    test_app_with(RetryPolicy::default()).await
}

async fn test_app_with(policy: RetryPolicy) -> TestApp {
    let store = Arc::new(MemoryObjectStore::new());
    let dyn_store: Arc<dyn ObjectStore> = store.clone();
    let regions = RegionRouter::new(
        ClientRegion::Australia,
        StoreTarget::new(AU_BUCKET, "ap-southeast-2", dyn_store.clone()),
        true,
    )
    .with_target(
        ClientRegion::India,
        StoreTarget::new(IN_BUCKET, "ap-south-1", dyn_store),
    );
    build(regions, None, policy, store).await
}

async fn build(
    regions: RegionRouter,
    local: Option<LocalObjectStore>,
    policy: RetryPolicy,
    store: Arc<MemoryObjectStore>,
) -> TestApp {
    let pool = db::connect_in_memory().await.unwrap();
    db::migrate(&pool).await.unwrap();
    let queue = JobQueue::new(pool.clone(), policy);
    let documents = DocumentService::new(pool.clone(), queue.clone(), regions, DocumentSettings::default());
    let runner = TaskRunner::new(
        documents.clone(),
        Arc::new(PlaceholderExtractor),
        Arc::new(LogNotifier),
        MaintenanceSettings::default(),
    );
    let workers = WorkerPool::new(queue.clone(), runner, WorkerConfig::default());
    let state = AppState::new(pool.clone(), documents, local);
    let router = routes(state, 64 * 1024 * 1024);

    let users = UserService::new(pool.clone());
    let staff = make_user(&users, "admin", true).await;
    let officer = make_user(&users, "olive", false).await;
    let other_officer = make_user(&users, "oscar", false).await;

    TestApp {
        router,
        store,
        workers,
        queue,
        access_logs: AccessLogService::new(pool),
        staff,
        officer,
        other_officer,
    }
}

async fn make_user(users: &UserService, username: &str, is_staff: bool) -> (User, String) {
    let user = users
        .create_user(NewUser {
            username: username.into(),
            email: format!("{username}@agency.example"),
            first_name: username.to_uppercase(),
            last_name: "Tester".into(),
            is_staff,
        })
        .await
        .unwrap();
    let token = users.issue_token(user.id).await.unwrap();
    (user, token)
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a str, &'a [u8]),
}

fn multipart(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
                );
            }
            Part::File(name, filename, content_type, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, value)
    }

    async fn call(&self, method: &str, uri: &str, token: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header("x-forwarded-for", "198.51.100.23, 10.0.0.1")
            .header(header::USER_AGENT, "api-tests");
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    async fn post_multipart(&self, uri: &str, token: &str, parts: &[Part<'_>]) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Token {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart(parts)))
            .unwrap();
        self.send(request).await
    }

    async fn create_client(&self, token: &str, email: &str, region: &str) -> Uuid {
        let (status, body) = self
            .call(
                "POST",
                "/clients/",
                token,
                Some(json!({
                    "first_name": "Jane",
                    "last_name": "Citizen",
                    "email": email,
                    "phone": "+61400000000",
                    "destination_country": "AU",
                    "visa_type": "skilled",
                    "region": region,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().parse().unwrap()
    }

    async fn upload_passport(&self, token: &str, client_id: Uuid) -> Value {
        let client_id = client_id.to_string();
        let (status, body) = self
            .post_multipart(
                "/documents/",
                token,
                &[
                    Part::Text("client_id", &client_id),
                    Part::Text("document_type", "passport"),
                    Part::Text("title", "Passport"),
                    Part::File("file", "passport scan.pdf", "application/pdf", PDF),
                ],
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    async fn actions_for(&self, document_id: &str) -> Vec<AccessAction> {
        self.access_logs
            .for_document(document_id.parse().unwrap())
            .await
            .unwrap()
            .into_iter()
            .map(|log| log.action)
            .collect()
    }
}

fn location(body: &Value) -> ObjectLocation {
    ObjectLocation {
        bucket: body["bucket"].as_str().unwrap().into(),
        key: body["object_key"].as_str().unwrap().into(),
        region: body["region"].as_str().unwrap().into(),
    }
}

#[tokio::test]
async fn au_passport_flows_from_upload_to_verification() {
    let app = test_app().await;
    let officer = &app.officer.1;
    let client_id = app.create_client(officer, "jane@example.com", "AU").await;

    let uploaded = app.upload_passport(officer, client_id).await;
    let doc_id = uploaded["id"].as_str().unwrap().to_string();
    assert_eq!(uploaded["status"], "uploaded");
    assert_eq!(uploaded["bucket"], AU_BUCKET);
    assert_eq!(uploaded["region"], "ap-southeast-2");
    assert_eq!(uploaded["file_type"], "application/pdf");
    assert_eq!(uploaded["storage_class"], "STANDARD");
    let key = uploaded["object_key"].as_str().unwrap();
    assert!(key.starts_with(&format!("documents/clients/{client_id}/passport/")), "{key}");
    assert!(key.ends_with("_passport_scan.pdf"), "{key}");
    assert!(app.store.contains(&location(&uploaded)));
    assert_eq!(app.actions_for(&doc_id).await, [AccessAction::Upload]);

    // Processing then the case-officer notification.
    assert_eq!(app.workers.drain().await.unwrap(), 2);
    let (status, processed) = app.call("GET", &format!("/documents/{doc_id}/"), officer, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(processed["status"], "processed");
    assert_eq!(processed["extracted_data"]["document_category"], "identity");
    assert_eq!(processed["ocr_text"], "PASSPORT P1234567");

    let logs_before_verify = app.actions_for(&doc_id).await.len();
    let (status, verified) = app
        .call(
            "POST",
            &format!("/documents/{doc_id}/verify/"),
            officer,
            Some(json!({"notes": "matches application"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{verified}");
    assert_eq!(verified["status"], "verified");
    assert_eq!(verified["verified_by"], app.officer.0.id.to_string());
    assert_eq!(verified["verification_notes"], "matches application");
    assert!(verified["verified_at"].is_string());
    assert_eq!(app.actions_for(&doc_id).await.len(), logs_before_verify);

    let (status, link) = app
        .call("GET", &format!("/documents/{doc_id}/download/"), officer, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(link["expires_in"], 3600);
    assert_eq!(link["filename"], "passport scan.pdf");
    assert!(link["download_url"].as_str().unwrap().contains(key));
    assert_eq!(app.actions_for(&doc_id).await.last(), Some(&AccessAction::Download));

    let logs = app.access_logs.for_document(doc_id.parse().unwrap()).await.unwrap();
    assert_eq!(logs[0].ip_address.as_deref(), Some("198.51.100.23"));
}

#[tokio::test]
async fn india_clients_land_in_the_india_bucket() {
    let app = test_app().await;
    let client_id = app.create_client(&app.officer.1, "ravi@example.com", "IN").await;
    let uploaded = app.upload_passport(&app.officer.1, client_id).await;
    assert_eq!(uploaded["bucket"], IN_BUCKET);
    assert_eq!(uploaded["region"], "ap-south-1");
}

#[tokio::test]
async fn download_links_expire_within_the_ttl() {
    let app = test_app().await;
    let client_id = app.create_client(&app.officer.1, "jane@example.com", "AU").await;
    let uploaded = app.upload_passport(&app.officer.1, client_id).await;
    let before = Utc::now().timestamp();

    let (_, link) = app
        .call("GET", &format!("/documents/{}/download/", uploaded["id"].as_str().unwrap()), &app.officer.1, None)
        .await;
    let url = link["download_url"].as_str().unwrap();
    let expires: i64 = url.rsplit("expires=").next().unwrap().parse().unwrap();
    assert!(expires >= before + 3600 - 1);
    assert!(expires <= Utc::now().timestamp() + 3600);
}

#[tokio::test]
async fn bulk_upload_reports_each_file() {
    let app = test_app().await;
    let client_id = app.create_client(&app.officer.1, "jane@example.com", "AU").await.to_string();

    let (status, report) = app
        .post_multipart(
            "/documents/bulk_upload/",
            &app.officer.1,
            &[
                Part::Text("client_id", &client_id),
                Part::Text("document_type", "bank_statement"),
                Part::File("files", "march.pdf", "application/pdf", PDF),
                Part::File("files", "notes.txt", "text/plain", b"not a document"),
                Part::File("files", "april.png", "image/png", PNG),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["uploaded"], 2);
    assert_eq!(report["failed"], 1);
    let results = report["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["status"], "uploaded");
    assert_eq!(results[1]["status"], "failed");
    assert_eq!(results[1]["index"], 1);
    assert!(results[1]["errors"]["file"].is_array());
    assert!(results[1].get("document_id").is_none());
    assert_eq!(results[2]["status"], "uploaded");
    assert_eq!(app.store.len(), 2);

    let jobs = app.queue.list(Some(JobKind::ProcessDocument), None).await.unwrap();
    assert_eq!(jobs.len(), 2);

    let (_, listing) = app
        .call("GET", &format!("/clients/{client_id}/documents/"), &app.officer.1, None)
        .await;
    assert_eq!(listing.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn statistics_totals_agree() {
    let app = test_app().await;
    let client_id = app.create_client(&app.officer.1, "jane@example.com", "AU").await;
    app.upload_passport(&app.officer.1, client_id).await;
    app.upload_passport(&app.officer.1, client_id).await;
    app.workers.run_once().await.unwrap();

    let (status, stats) = app.call("GET", "/documents/statistics/", &app.officer.1, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total"], 2);
    let by_status = stats["by_status"].as_object().unwrap();
    assert_eq!(by_status.len(), 6);
    assert_eq!(by_status["processed"], 1);
    assert_eq!(by_status["uploaded"], 1);
    assert_eq!(by_status["verified"], 0);
    let status_sum: i64 = by_status.values().map(|v| v.as_i64().unwrap()).sum();
    let type_sum: i64 = stats["by_type"].as_object().unwrap().values().map(|v| v.as_i64().unwrap()).sum();
    assert_eq!(status_sum, 2);
    assert_eq!(type_sum, 2);
    assert_eq!(stats["by_type"].as_object().unwrap().len(), 1);
}

#[tokio::test]
async fn delete_removes_the_row_even_when_the_object_delete_fails() {
    let app = test_app().await;
    let client_id = app.create_client(&app.officer.1, "jane@example.com", "AU").await;
    let uploaded = app.upload_passport(&app.officer.1, client_id).await;
    let doc_id = uploaded["id"].as_str().unwrap();
    app.store.fail_deletes(true);

    let (status, _) = app.call("DELETE", &format!("/documents/{doc_id}/"), &app.officer.1, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(app.store.delete_calls(), [location(&uploaded)]);

    let (status, _) = app.call("GET", &format!("/documents/{doc_id}/"), &app.officer.1, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    // The audit trail outlives the document.
    assert_eq!(app.actions_for(doc_id).await, [AccessAction::Upload, AccessAction::Delete]);
}

#[tokio::test]
async fn failed_object_writes_leave_no_row() {
    let app = test_app().await;
    let client_id = app.create_client(&app.officer.1, "jane@example.com", "AU").await.to_string();
    app.store.fail_puts(true);

    let (status, body) = app
        .post_multipart(
            "/documents/",
            &app.officer.1,
            &[
                Part::Text("client_id", &client_id),
                Part::Text("document_type", "passport"),
                Part::Text("title", "Passport"),
                Part::File("file", "passport.pdf", "application/pdf", PDF),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "storage_unavailable");

    let (_, listing) = app.call("GET", "/documents/", &app.officer.1, None).await;
    assert_eq!(listing["count"], 0);
    assert!(app.queue.list(None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn doubled_dots_in_filenames_upload_cleanly() {
    let app = test_app().await;
    let client_id = app.create_client(&app.officer.1, "jane@example.com", "AU").await.to_string();

    let (status, single) = app
        .post_multipart(
            "/documents/",
            &app.officer.1,
            &[
                Part::Text("client_id", &client_id),
                Part::Text("document_type", "passport"),
                Part::Text("title", "Passport"),
                Part::File("file", "scan..final.pdf", "application/pdf", PDF),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{single}");
    assert!(single["object_key"].as_str().unwrap().ends_with("_scan.final.pdf"));
    assert_eq!(single["original_filename"], "scan..final.pdf");

    let (status, report) = app
        .post_multipart(
            "/documents/bulk_upload/",
            &app.officer.1,
            &[
                Part::Text("client_id", &client_id),
                Part::Text("document_type", "passport"),
                Part::File("files", "scan..final.pdf", "application/pdf", PDF),
                Part::File("files", "..back...pdf", "application/pdf", PDF),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{report}");
    assert_eq!(report["uploaded"], 2);
    assert_eq!(report["failed"], 0);
    assert_eq!(app.store.len(), 3);
}

#[tokio::test]
async fn upload_validation_reports_every_field() {
    let app = test_app().await;
    let (status, body) = app
        .post_multipart(
            "/documents/",
            &app.officer.1,
            &[
                Part::Text("client_id", &Uuid::new_v4().to_string()),
                Part::Text("document_type", "diary"),
                Part::File("file", "passport.exe", "application/octet-stream", b"MZ\x90\x00"),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_failed");
    for field in ["client_id", "document_type", "title", "file"] {
        assert!(body["errors"][field].is_array(), "missing {field}: {body}");
    }
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn requests_without_a_valid_token_are_rejected() {
    let app = test_app().await;
    let request = Request::builder().uri("/documents/").body(Body::empty()).unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");

    let (status, _) = app.call("GET", "/clients/", "not-a-token", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/clients/")
        .header(header::COOKIE, format!("session={}", app.officer.1))
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(request).await.0, StatusCode::OK);

    let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    assert_eq!(app.send(request).await.0, StatusCode::OK);
}

#[tokio::test]
async fn access_logs_are_staff_only() {
    let app = test_app().await;
    let client_id = app.create_client(&app.officer.1, "jane@example.com", "AU").await;
    let uploaded = app.upload_passport(&app.officer.1, client_id).await;

    let (status, body) = app.call("GET", "/access-logs/", &app.officer.1, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "permission_denied");

    let uri = format!("/access-logs/?document_id={}&action=upload", uploaded["id"].as_str().unwrap());
    let (status, page) = app.call("GET", &uri, &app.staff.1, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["count"], 1);
    let log_id = page["results"][0]["id"].as_str().unwrap();

    let (status, log) = app.call("GET", &format!("/access-logs/{log_id}/"), &app.staff.1, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(log["user_id"], app.officer.0.id.to_string());
}

#[tokio::test]
async fn illegal_status_changes_conflict() {
    let app = test_app().await;
    let client_id = app.create_client(&app.officer.1, "jane@example.com", "AU").await;
    let uploaded = app.upload_passport(&app.officer.1, client_id).await;
    let doc_id = uploaded["id"].as_str().unwrap();

    let (status, body) = app.call("POST", &format!("/documents/{doc_id}/verify/"), &app.officer.1, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");

    app.workers.drain().await.unwrap();
    let (status, rejected) = app.call("POST", &format!("/documents/{doc_id}/reject/"), &app.officer.1, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rejected["status"], "rejected");

    let (status, queued) = app.call("POST", &format!("/documents/{doc_id}/reprocess/"), &app.officer.1, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(queued["status"], "queued");
}

#[tokio::test]
async fn exhausted_processing_can_be_reprocessed() {
    let app = test_app_with(RetryPolicy {
        max_attempts: 2,
        retry_delay: Duration::ZERO,
    })
    .await;
    let client_id = app.create_client(&app.officer.1, "jane@example.com", "AU").await;
    let uploaded = app.upload_passport(&app.officer.1, client_id).await;
    let doc_id = uploaded["id"].as_str().unwrap();

    app.store.fail_gets(true);
    app.workers.drain().await.unwrap();
    let (_, failed) = app.call("GET", &format!("/documents/{doc_id}/"), &app.officer.1, None).await;
    assert_eq!(failed["status"], "failed");
    assert!(failed["processing_error"].is_string());

    app.store.fail_gets(false);
    let (status, _) = app.call("POST", &format!("/documents/{doc_id}/reprocess/"), &app.officer.1, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    app.workers.drain().await.unwrap();
    let (_, processed) = app.call("GET", &format!("/documents/{doc_id}/"), &app.officer.1, None).await;
    assert_eq!(processed["status"], "processed");
    assert!(processed["processing_error"].is_null());
}

#[tokio::test]
async fn officers_only_see_their_own_clients() {
    let app = test_app().await;
    let client_id = app.create_client(&app.officer.1, "jane@example.com", "AU").await;
    let uploaded = app.upload_passport(&app.officer.1, client_id).await;
    let doc_id = uploaded["id"].as_str().unwrap();

    let other = &app.other_officer.1;
    assert_eq!(app.call("GET", &format!("/clients/{client_id}/"), other, None).await.0, StatusCode::NOT_FOUND);
    assert_eq!(app.call("GET", &format!("/documents/{doc_id}/"), other, None).await.0, StatusCode::NOT_FOUND);
    let (_, listing) = app.call("GET", "/documents/", other, None).await;
    assert_eq!(listing["count"], 0);

    // Staff see everything and can hand the case over.
    let (_, listing) = app.call("GET", "/documents/", &app.staff.1, None).await;
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["results"][0]["client_name"], "Jane Citizen");
    assert_eq!(listing["results"][0]["uploaded_by_name"], "OLIVE Tester");

    let (status, client) = app
        .call(
            "POST",
            &format!("/clients/{client_id}/assign/"),
            &app.staff.1,
            Some(json!({"user_id": app.other_officer.0.id})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(client["assignee"]["username"], "oscar");
    assert_eq!(app.call("GET", &format!("/documents/{doc_id}/"), other, None).await.0, StatusCode::OK);
}

#[tokio::test]
async fn soft_deleted_clients_disappear() {
    let app = test_app().await;
    let client_id = app.create_client(&app.officer.1, "jane@example.com", "AU").await;

    let (status, _) = app.call("DELETE", &format!("/clients/{client_id}/"), &app.officer.1, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.call("DELETE", &format!("/clients/{client_id}/"), &app.staff.1, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.call("GET", &format!("/clients/{client_id}/"), &app.staff.1, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, listing) = app.call("GET", "/clients/", &app.staff.1, None).await;
    assert_eq!(listing["count"], 0);
}

#[tokio::test]
async fn document_metadata_edits_keep_the_key() {
    let app = test_app().await;
    let client_id = app.create_client(&app.officer.1, "jane@example.com", "AU").await;
    let uploaded = app.upload_passport(&app.officer.1, client_id).await;
    let doc_id = uploaded["id"].as_str().unwrap();

    let (status, updated) = app
        .call(
            "PATCH",
            &format!("/documents/{doc_id}/"),
            &app.officer.1,
            Some(json!({"title": "Passport (renewed)", "document_type": "visa_application"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["title"], "Passport (renewed)");
    assert_eq!(updated["document_type"], "visa_application");
    assert_eq!(updated["object_key"], uploaded["object_key"]);
    assert_eq!(updated["version"], 1);
    assert_eq!(app.actions_for(doc_id).await.last(), Some(&AccessAction::Update));
}

#[tokio::test]
async fn local_presigned_links_are_served_and_verified() {
    let dir = tempfile::tempdir().unwrap();
    let local = LocalObjectStore::new(dir.path(), "http://docs.test", "local-signing-secret");
    let dyn_store: Arc<dyn ObjectStore> = Arc::new(local.clone());
    let regions = RegionRouter::single(StoreTarget::new(AU_BUCKET, "local", dyn_store));
    let app = build(regions, Some(local), RetryPolicy::default(), Arc::new(MemoryObjectStore::new())).await;

    let client_id = app.create_client(&app.officer.1, "jane@example.com", "AU").await;
    let uploaded = app.upload_passport(&app.officer.1, client_id).await;
    let (_, link) = app
        .call("GET", &format!("/documents/{}/download/", uploaded["id"].as_str().unwrap()), &app.officer.1, None)
        .await;
    let url = link["download_url"].as_str().unwrap();
    let path = url.strip_prefix("http://docs.test").unwrap();

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], PDF);

    let tampered = format!("{}x", path);
    let (status, body) = app
        .send(Request::builder().uri(tampered).body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
}
