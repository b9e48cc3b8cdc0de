//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tally_core::extract::ExtractorClient;
use tally_core::models::NewStatementImport;
use tally_core::normalize::Normalizer;
use tally_core::ocr::OcrClient;
use tally_core::storage::{LocalObjectStore, ObjectStore};
use tempfile::TempDir;
use tower::ServiceExt;

const USER: &str = "user-1";
const OPERATOR_KEY: &str = "operator-secret";
const BOUNDARY: &str = "tally-test-boundary";

struct TestApp {
    app: Router,
    db: Database,
    account_id: i64,
    _dir: TempDir,
}

fn setup_test_app_with(require_auth: bool, rate_limit_per_hour: i64) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::in_memory().unwrap();
    let account_id = db.create_account(USER, "Checking", 0.0).unwrap();

    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(dir.path()));
    let pipeline = ImportPipeline::new(
        db.clone(),
        OcrClient::mock(),
        ExtractorClient::mock(),
        store,
        Normalizer::default(),
    );
    let tally = TallyConfig {
        storage_dir: dir.path().to_path_buf(),
        rate_limit_per_hour,
        ..TallyConfig::default()
    };
    let config = ServerConfig {
        require_auth,
        allowed_origins: vec![],
        api_keys: vec![OPERATOR_KEY.to_string()],
    };

    TestApp {
        app: create_router(pipeline, &tally, config),
        db,
        account_id,
        _dir: dir,
    }
}

fn setup_test_app() -> TestApp {
    setup_test_app_with(true, 10)
}

async fn get_body_json(response: axum::response::Response) -> Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Statement document the mock OCR echoes and the mock extractor parses
fn statement(n: usize) -> Value {
    let rows: Vec<Value> = (0..n)
        .map(|i| {
            json!({
                "date": format!("2024-03-{:02}", i + 1),
                "description": format!("SHOP {}", i),
                "amount": -10.0,
                "type": "debit",
            })
        })
        .collect();
    json!({
        "statementPeriod": { "start": "2024-03-01", "end": "2024-03-31" },
        "balances": { "opening": 500.0, "closing": 500.0 - 10.0 * n as f64, "source": "closing_balance_line" },
        "transactions": rows,
    })
}

fn multipart_body(account_id: i64, file_name: &str, content: &[u8]) -> Body {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"accountId\"\r\n\r\n{id}\r\n",
            b = BOUNDARY,
            id = account_id
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: application/pdf\r\n\r\n",
            b = BOUNDARY,
            f = file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    Body::from(body)
}

fn upload_request(user: &str, account_id: i64, file_name: &str, content: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/imports")
        .header(USER_ID_HEADER, user)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(multipart_body(account_id, file_name, content))
        .unwrap()
}

fn json_request(method: &str, uri: &str, user: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(USER_ID_HEADER, user)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(USER_ID_HEADER, user)
        .body(Body::empty())
        .unwrap()
}

async fn upload(t: &TestApp, content: &Value) -> i64 {
    let response = t
        .app
        .clone()
        .oneshot(upload_request(
            USER,
            t.account_id,
            "march.pdf",
            content.to_string().as_bytes(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    get_body_json(response).await["id"].as_i64().unwrap()
}

async fn process(t: &TestApp, import_id: i64) -> Value {
    let response = t
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/process-statement",
            USER,
            json!({ "statementImportId": import_id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    get_body_json(response).await
}

// ========== Auth and Headers ==========

#[tokio::test]
async fn test_health_needs_no_identity() {
    let t = setup_test_app();

    let response = t
        .app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["database"], true);
}

#[tokio::test]
async fn test_missing_identity_is_unauthorized() {
    let t = setup_test_app();

    let response = t
        .app
        .oneshot(
            Request::builder()
                .uri("/api/accounts")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = get_body_json(response).await;
    assert_eq!(json["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_trigger_requires_identity() {
    let t = setup_test_app();

    let response = t
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/process-statement")
                .header("content-type", "application/json")
                .body(Body::from(json!({ "statementImportId": 1 }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = get_body_json(response).await;
    assert_eq!(json["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_security_headers() {
    let t = setup_test_app();

    let response = t.app.oneshot(get_request("/api/accounts", USER)).await.unwrap();

    let headers = response.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert!(headers.get("content-security-policy").is_some());
}

#[test]
fn test_validate_api_key() {
    let keys = vec!["key-one".to_string(), "key-two".to_string()];
    assert!(validate_api_key("key-two", &keys));
    assert!(!validate_api_key("key-three", &keys));
    assert!(!validate_api_key("key", &keys));
    assert!(!validate_api_key("anything", &[]));
}

#[test]
fn test_core_errors_map_to_codes() {
    let cases = [
        (tally_core::Error::NotFound("x".into()), StatusCode::NOT_FOUND, "NOT_FOUND"),
        (tally_core::Error::Forbidden("x".into()), StatusCode::FORBIDDEN, "FORBIDDEN"),
        (
            tally_core::Error::FileNotInStorage("x".into()),
            StatusCode::NOT_FOUND,
            "FILE_NOT_IN_STORAGE",
        ),
        (
            tally_core::Error::InvalidTransition {
                from: "pending".into(),
                to: "failed".into(),
            },
            StatusCode::CONFLICT,
            "CONFLICT",
        ),
        (tally_core::Error::InvalidData("x".into()), StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        (
            tally_core::Error::Storage("disk".into()),
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
        ),
    ];

    for (err, status, code) in cases {
        let app_err = AppError::from(err);
        assert_eq!(app_err.status(), status);
        assert_eq!(app_err.code(), code);
    }
}

// ========== Accounts ==========

#[tokio::test]
async fn test_create_and_list_accounts() {
    let t = setup_test_app();

    let response = t
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/accounts",
            "user-2",
            json!({ "name": "Savings", "openingBalance": 250.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = get_body_json(response).await;
    assert_eq!(json["name"], "Savings");
    assert_eq!(json["balance"], 250.0);

    let response = t.app.oneshot(get_request("/api/accounts", "user-2")).await.unwrap();
    let json = get_body_json(response).await;
    let accounts = json.as_array().unwrap();
    // Only the caller's own accounts
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0]["user_id"], "user-2");
}

#[tokio::test]
async fn test_get_other_users_account_forbidden() {
    let t = setup_test_app();

    let response = t
        .app
        .oneshot(get_request(&format!("/api/accounts/{}", t.account_id), "intruder"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_create_account_requires_name() {
    let t = setup_test_app();

    let response = t
        .app
        .oneshot(json_request("POST", "/api/accounts", USER, json!({ "name": "  " })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ========== Upload and Processing ==========

#[tokio::test]
async fn test_upload_then_process_statement() {
    let t = setup_test_app();
    let import_id = upload(&t, &statement(4)).await;

    let outcome = process(&t, import_id).await;
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["status"], "completed");
    assert_eq!(outcome["totalTransactions"], 4);
    assert_eq!(outcome["importedTransactions"], 4);
    assert_eq!(outcome["failedTransactions"], 0);

    let response = t
        .app
        .clone()
        .oneshot(get_request(&format!("/api/imports/{}", import_id), USER))
        .await
        .unwrap();
    let import = get_body_json(response).await;
    assert_eq!(import["status"], "completed");
    assert_eq!(import["parsingMethod"], "llm");

    let response = t
        .app
        .clone()
        .oneshot(get_request(&format!("/api/imports/{}/transactions", import_id), USER))
        .await
        .unwrap();
    let transactions = get_body_json(response).await;
    assert_eq!(transactions.as_array().unwrap().len(), 4);

    let account = t.db.get_account(t.account_id).unwrap().unwrap();
    assert_eq!(account.balance, 460.0);
}

#[tokio::test]
async fn test_process_accepts_import_id_alias() {
    let t = setup_test_app();
    let import_id = upload(&t, &statement(1)).await;

    let response = t
        .app
        .oneshot(json_request(
            "POST",
            "/api/process-statement",
            USER,
            json!({ "importId": import_id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_process_invalid_body() {
    let t = setup_test_app();

    let response = t
        .app
        .oneshot(json_request(
            "POST",
            "/process-statement",
            USER,
            json!({ "statementImportId": "seven" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = get_body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_process_missing_import() {
    let t = setup_test_app();

    let response = t
        .app
        .oneshot(json_request(
            "POST",
            "/process-statement",
            USER,
            json!({ "statementImportId": 999 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = get_body_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_process_other_users_import_forbidden() {
    let t = setup_test_app();
    let import_id = upload(&t, &statement(2)).await;

    let response = t
        .app
        .oneshot(json_request(
            "POST",
            "/process-statement",
            "intruder",
            json!({ "statementImportId": import_id }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = get_body_json(response).await;
    assert_eq!(json["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_process_file_not_in_storage() {
    let t = setup_test_app();
    let import = t
        .db
        .create_statement_import(&NewStatementImport {
            user_id: USER.into(),
            account_id: t.account_id,
            file_name: "gone.pdf".into(),
            file_path: format!("{}/{}/20240301-gone.pdf", USER, t.account_id),
            file_hash: None,
        })
        .unwrap();

    let response = t
        .app
        .oneshot(json_request(
            "POST",
            "/process-statement",
            USER,
            json!({ "statementImportId": import.id }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = get_body_json(response).await;
    assert_eq!(json["code"], "FILE_NOT_IN_STORAGE");

    let import = t.db.get_statement_import(import.id).unwrap().unwrap();
    assert_eq!(import.status, tally_core::models::ImportStatus::Pending);
}

#[tokio::test]
async fn test_upload_to_other_users_account_forbidden() {
    let t = setup_test_app();

    let response = t
        .app
        .oneshot(upload_request("intruder", t.account_id, "x.pdf", b"data"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_upload_missing_file_field() {
    let t = setup_test_app();
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"accountId\"\r\n\r\n{id}\r\n--{b}--\r\n",
        b = BOUNDARY,
        id = t.account_id
    );

    let response = t
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/imports")
                .header(USER_ID_HEADER, USER)
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_rate_limited() {
    let t = setup_test_app_with(true, 1);
    upload(&t, &statement(1)).await;

    // Admission reads the aggregate, so it only bites after a refresh
    RateLimiter::new(t.db.clone(), 1).refresh().unwrap();

    let response = t
        .app
        .clone()
        .oneshot(upload_request(USER, t.account_id, "april.pdf", b"{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let json = get_body_json(response).await;
    assert_eq!(json["code"], "RATE_LIMITED");

    let response = t.app.oneshot(get_request("/api/rate-limit", USER)).await.unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json["limit"], 1);
    assert_eq!(json["used"], 1);
}

// ========== Status, Checkpoints, Cancel ==========

#[tokio::test]
async fn test_list_imports_scoped_to_caller() {
    let t = setup_test_app();
    upload(&t, &statement(1)).await;

    let response = t.app.clone().oneshot(get_request("/api/imports", USER)).await.unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);

    let response = t.app.oneshot(get_request("/api/imports", "user-2")).await.unwrap();
    let json = get_body_json(response).await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_checkpoints_after_processing() {
    let t = setup_test_app();
    let import_id = upload(&t, &statement(3)).await;
    process(&t, import_id).await;

    let response = t
        .app
        .oneshot(get_request(&format!("/api/imports/{}/checkpoints", import_id), USER))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    let stages: Vec<&str> = json["checkpoints"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["stage"].as_str().unwrap())
        .collect();
    assert_eq!(stages.first(), Some(&"ocr_done"));
    assert_eq!(stages.last(), Some(&"post_insert"));
    assert!(json["unexplainedDrops"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_pending_import() {
    let t = setup_test_app();
    let import_id = upload(&t, &statement(2)).await;

    let response = t
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/imports/{}/cancel", import_id),
            USER,
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "cancelled");

    // A cancelled import reports its terminal status instead of running
    let outcome = process(&t, import_id).await;
    assert_eq!(outcome["success"], false);
    assert_eq!(outcome["status"], "cancelled");
    assert_eq!(outcome["importedTransactions"], 0);
}

// ========== Purge ==========

fn purge_request(import_id: i64, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/api/imports/{}/purge", import_id))
        .header("content-type", "application/json");
    if let Some(key) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", key));
    }
    builder
        .body(Body::from(json!({ "reason": "wrong account" }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_purge_requires_operator_key() {
    let t = setup_test_app();
    let import_id = upload(&t, &statement(2)).await;
    process(&t, import_id).await;

    // A user identity alone is not enough
    let mut request = purge_request(import_id, None);
    request
        .headers_mut()
        .insert(USER_ID_HEADER, USER.parse().unwrap());
    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = t
        .app
        .oneshot(purge_request(import_id, Some("wrong-key")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_purge_removes_import_rows() {
    let t = setup_test_app();
    let import_id = upload(&t, &statement(3)).await;
    process(&t, import_id).await;

    let response = t
        .app
        .clone()
        .oneshot(purge_request(import_id, Some(OPERATOR_KEY)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let report = get_body_json(response).await;
    assert_eq!(report["transactionsDeleted"], 3);
    assert_eq!(report["ocrResultsDeleted"], 1);
    assert_eq!(report["balanceRestored"], 0.0);

    let import = t.db.get_statement_import(import_id).unwrap().unwrap();
    assert_eq!(import.status, tally_core::models::ImportStatus::Failed);
    assert!(t.db.list_import_transactions(import_id).unwrap().is_empty());

    let audit = t.db.list_audit_for_entity("statement_import", import_id).unwrap();
    assert!(audit
        .iter()
        .any(|e| e.action == "import_purged" && e.actor == "api-key"));
}

#[tokio::test]
async fn test_purge_pending_import_conflicts() {
    let t = setup_test_app();
    let import_id = upload(&t, &statement(1)).await;

    let response = t
        .app
        .oneshot(purge_request(import_id, Some(OPERATOR_KEY)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = get_body_json(response).await;
    assert_eq!(json["code"], "CONFLICT");
}
