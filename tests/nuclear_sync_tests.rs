//! Full Gmail resync followed by an embedding cron run.

mod test_utils;

use crm_sync::models::Email;
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::json;
use test_utils::{
    TEST_USER, TestApp, cron_request, gmail_message, test_config, user_request,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_gmail() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/me/messages"))
        .and(header("authorization", "Bearer gmail-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [{ "id": "m1", "threadId": "t-m1" }, { "id": "m2", "threadId": "t-m2" }]
        })))
        .mount(&server)
        .await;
    for (id, subject) in [("m1", "Renewal terms"), ("m2", "Kickoff agenda")] {
        Mock::given(method("GET"))
            .and(path(format!("/users/me/messages/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(gmail_message(id, subject)))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/users/me/profile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "emailAddress": "ops@crm.example",
            "historyId": "98765"
        })))
        .mount(&server)
        .await;
    server
}

async fn connect_gmail(app: &TestApp) {
    let (status, body) = app
        .send(user_request(
            "PUT",
            "/api/integrations/gmail",
            TEST_USER,
            Some(json!({
                "accessToken": "gmail-access",
                "refreshToken": "gmail-refresh",
                "tokenExpiresAt": "2099-01-01T00:00:00Z"
            })),
        ))
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["hasRefreshToken"], true);
}

#[tokio::test]
async fn nuclear_gmail_sync_saves_mailbox_and_feeds_embedding_queue() {
    let gmail = mock_gmail().await;
    let mut config = test_config();
    config.providers.gmail_api_base = gmail.uri();
    let app = TestApp::new(config).await.unwrap();
    connect_gmail(&app).await;

    let (status, report) = app
        .send(user_request(
            "POST",
            "/api/nuclear-gmail-sync",
            TEST_USER,
            Some(json!({ "enableEmbeddings": true })),
        ))
        .await;
    assert_eq!(status, 200, "{report}");
    assert_eq!(report["mode"], "full");
    assert_eq!(report["outcome"]["saved"], 2);
    assert_eq!(report["historyId"], "98765");
    assert_eq!(Email::find().count(app.db()).await.unwrap(), 2);

    let (_, integrations) = app
        .send(user_request("GET", "/api/integrations", TEST_USER, None))
        .await;
    assert_eq!(integrations[0]["metadata"]["historyId"], "98765");
    assert!(integrations[0]["lastSyncAt"].is_string());

    let (_, stats) = app
        .send(cron_request("GET", "/api/cron/process-embeddings"))
        .await;
    assert_eq!(stats["pending"], 2);

    let (status, batch) = app
        .send(cron_request("POST", "/api/cron/process-embeddings?batchSize=10"))
        .await;
    assert_eq!(status, 200, "{batch}");
    assert_eq!(batch["processed"], 2);
    assert_eq!(batch["failed"], 0);

    let embedded = Email::find().all(app.db()).await.unwrap();
    assert!(embedded.iter().all(|e| e.embedding.is_some()));
}

#[tokio::test]
async fn nuclear_sync_without_integration_is_conflict() {
    let app = TestApp::new(test_config()).await.unwrap();
    let (status, body) = app
        .send(user_request(
            "POST",
            "/api/nuclear-calendar-sync",
            TEST_USER,
            Some(json!({})),
        ))
        .await;
    assert_eq!(status, 409, "{body}");
}

#[tokio::test]
async fn sync_runs_record_the_nuclear_pass() {
    let gmail = mock_gmail().await;
    let mut config = test_config();
    config.providers.gmail_api_base = gmail.uri();
    let app = TestApp::new(config).await.unwrap();
    connect_gmail(&app).await;

    let (status, _) = app
        .send(user_request(
            "POST",
            "/api/nuclear-gmail-sync",
            TEST_USER,
            Some(json!({})),
        ))
        .await;
    assert_eq!(status, 200);

    let (status, page) = app
        .send(user_request("GET", "/api/sync-runs?source=gmail", TEST_USER, None))
        .await;
    assert_eq!(status, 200, "{page}");
    let runs = page["runs"].as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["status"], "succeeded");
    assert_eq!(runs[0]["recordsSaved"], 2);
    assert!(page["nextCursor"].is_null());

    let (status, _) = app
        .send(user_request("GET", "/api/sync-runs?limit=0", TEST_USER, None))
        .await;
    assert_eq!(status, 400);
}
