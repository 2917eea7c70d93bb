//! Auth guards, fc-summary, handbooks, integrations and the signed Slack webhook.

mod test_utils;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, header};
use chrono::{Duration, Utc};
use crm_sync::models::solution_handbook;
use crm_sync::partner_billing::{InMemoryLedger, MongoLedger, PartnerTransaction};
use crm_sync::repositories::UserRepository;
use crm_sync::webhook_verification::{
    SLACK_SIGNATURE_HEADER, SLACK_TIMESTAMP_HEADER, sign_slack_request,
};
use sea_orm::{ActiveModelTrait, Set};
use serde_json::json;
use test_utils::{CRON_SECRET, TEST_USER, TestApp, cron_request, test_config, user_request};
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn health_and_root_are_public() {
    let app = TestApp::new(test_config()).await.unwrap();
    let (status, body) = app
        .send(Request::get("/healthz").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");

    let (status, body) = app
        .send(Request::get("/").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, 200);
    assert!(body["service"].is_string());
}

#[tokio::test]
async fn user_routes_require_operator_token_and_user_header() {
    let app = TestApp::new(test_config()).await.unwrap();

    let (status, _) = app
        .send(Request::get("/api/integrations").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, 401);

    let (status, _) = app
        .send(
            Request::get("/api/integrations")
                .header(header::AUTHORIZATION, format!("Bearer {CRON_SECRET}"))
                .header("X-User-Id", TEST_USER)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, 401);

    let (status, _) = app
        .send(
            Request::get("/api/integrations")
                .header(header::AUTHORIZATION, "Bearer test-operator-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn cron_routes_reject_wrong_or_missing_secret() {
    let app = TestApp::new(test_config()).await.unwrap();

    let (status, _) = app
        .send(
            Request::post("/api/cron/process-embeddings")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, 401);

    let (status, _) = app
        .send(user_request("POST", "/api/cron/cleanup-queue", TEST_USER, None))
        .await;
    assert_eq!(status, 401);

    let (status, body) = app
        .send(cron_request("POST", "/api/cron/cleanup-queue"))
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body, json!({ "deleted": 0, "recovered": 0 }));

    let (status, _) = app
        .send(cron_request("POST", "/api/cron/cleanup-queue?daysOld=0"))
        .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn cron_without_configured_secret_rejects_everything() {
    let mut config = test_config();
    config.cron_secret = None;
    let app = TestApp::new(config).await.unwrap();
    let (status, _) = app
        .send(cron_request("POST", "/api/cron/sync-incremental"))
        .await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn incremental_cron_with_no_users_reports_zero() {
    let app = TestApp::new(test_config()).await.unwrap();
    let (status, body) = app
        .send(cron_request("POST", "/api/cron/sync-incremental"))
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["totalUsers"], 0);
    assert_eq!(body["errors"], json!([]));
}

#[tokio::test]
async fn fc_summary_totals_partner_transactions() {
    let now = Utc::now();
    let ledger = InMemoryLedger::new(vec![
        ("org-1".to_string(), PartnerTransaction::credit(1000.0, now - Duration::days(400))),
        ("org-1".to_string(), PartnerTransaction::credit(500.0, now)),
        ("org-1".to_string(), PartnerTransaction::debit(300.0, now - Duration::days(400))),
        ("org-1".to_string(), PartnerTransaction::debit(75.0, now)),
        ("org-2".to_string(), PartnerTransaction::credit(9.0, now)),
    ]);
    let app = TestApp::with_ledger(test_config(), Arc::new(ledger))
        .await
        .unwrap();

    let (status, body) = app
        .send(user_request("GET", "/api/fc-summary/org-1", TEST_USER, None))
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["fcBought"], 1500.0);
    assert_eq!(body["fcConsumed"], 375.0);
    assert_eq!(body["fcRemaining"], 1125.0);
    assert_eq!(body["fcConsumedMTD"], 75.0);
    assert_eq!(body["fcConsumedYTD"], 75.0);

    let (status, body) = app
        .send(user_request("GET", "/api/fc-summary/unknown", TEST_USER, None))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["fcRemaining"], 0.0);
}

#[tokio::test]
async fn fc_summary_without_mongo_is_server_error() {
    let app = TestApp::with_ledger(test_config(), Arc::new(MongoLedger::new(None, "partners")))
        .await
        .unwrap();
    let (status, body) = app
        .send(user_request("GET", "/api/fc-summary/org-1", TEST_USER, None))
        .await;
    assert_eq!(status, 500, "{body}");
}

#[tokio::test]
async fn handbooks_are_scoped_to_their_owner() {
    let app = TestApp::new(test_config()).await.unwrap();
    let users = UserRepository::new(app.state.db.clone());
    let owner = users.get_or_create(TEST_USER).await.unwrap();

    let now = Utc::now().fixed_offset();
    let id = Uuid::new_v4();
    solution_handbook::ActiveModel {
        id: Set(id),
        user_id: Set(owner.id),
        title: Set("Onboarding playbook".to_string()),
        prompt: Set(Some("Summarise onboarding".to_string())),
        html_content: Set(Some("<h1>Welcome</h1>".to_string())),
        is_published: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(app.db())
    .await
    .unwrap();

    let (status, list) = app
        .send(user_request("GET", "/api/solution-handbooks", TEST_USER, None))
        .await;
    assert_eq!(status, 200);
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["title"], "Onboarding playbook");

    let uri = format!("/api/solution-handbooks/{id}");
    let (status, one) = app.send(user_request("GET", &uri, TEST_USER, None)).await;
    assert_eq!(status, 200);
    assert_eq!(one["htmlContent"], "<h1>Welcome</h1>");

    let (status, _) = app
        .send(user_request("GET", &uri, "someone_else", None))
        .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn integrations_reject_unknown_platforms_and_hide_tokens() {
    let app = TestApp::new(test_config()).await.unwrap();

    let (status, _) = app
        .send(user_request(
            "PUT",
            "/api/integrations/myspace",
            TEST_USER,
            Some(json!({ "accessToken": "x" })),
        ))
        .await;
    assert_eq!(status, 400);

    let (status, stored) = app
        .send(user_request(
            "PUT",
            "/api/integrations/hubspot",
            TEST_USER,
            Some(json!({ "accessToken": "secret-token", "metadata": { "portalId": 42 } })),
        ))
        .await;
    assert_eq!(status, 200, "{stored}");
    assert_eq!(stored["platform"], "hubspot");
    assert_eq!(stored["hasRefreshToken"], false);
    assert!(!stored.to_string().contains("secret-token"));
}

#[tokio::test]
async fn send_webhook_relays_upstream_status() {
    let n8n = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook/crm"))
        .and(body_partial_json(json!({ "event": "deal_won" })))
        .respond_with(ResponseTemplate::new(200))
        .mount(&n8n)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook/crm"))
        .and(body_partial_json(json!({ "event": "broken" })))
        .respond_with(ResponseTemplate::new(422).set_body_string("bad payload"))
        .mount(&n8n)
        .await;

    let mut config = test_config();
    config.providers.n8n_webhook_url = Some(format!("{}/webhook/crm", n8n.uri()));
    let app = TestApp::new(config).await.unwrap();

    let (status, body) = app
        .send(user_request(
            "POST",
            "/api/send-webhook",
            TEST_USER,
            Some(json!({ "event": "deal_won" })),
        ))
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body, json!({ "success": true }));

    let (status, body) = app
        .send(user_request(
            "POST",
            "/api/send-webhook",
            TEST_USER,
            Some(json!({ "event": "broken" })),
        ))
        .await;
    assert_eq!(status, 422);
    assert_eq!(body["error"], "bad payload");
}

fn slack_event(secret: &str, timestamp: u64, body: &str) -> Request<Body> {
    Request::post("/api/webhooks/slack")
        .header(header::CONTENT_TYPE, "application/json")
        .header(SLACK_TIMESTAMP_HEADER, timestamp.to_string())
        .header(
            SLACK_SIGNATURE_HEADER,
            sign_slack_request(secret, timestamp, body.as_bytes()),
        )
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn slack_webhook_answers_challenge_only_when_signed() {
    let mut config = test_config();
    config.providers.slack_signing_secret = Some("slack-secret".to_string());
    let app = TestApp::new(config).await.unwrap();

    let body = r#"{"type":"url_verification","challenge":"abc123"}"#;
    let now = Utc::now().timestamp() as u64;

    let (status, reply) = app.send(slack_event("slack-secret", now, body)).await;
    assert_eq!(status, 200);
    assert_eq!(reply, json!({ "challenge": "abc123" }));

    let (status, _) = app.send(slack_event("wrong-secret", now, body)).await;
    assert_eq!(status, 401);

    let (status, _) = app
        .send(slack_event("slack-secret", now - 3600, body))
        .await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn slack_webhook_acknowledges_event_callbacks() {
    let mut config = test_config();
    config.providers.slack_signing_secret = Some("slack-secret".to_string());
    let app = TestApp::new(config).await.unwrap();
    let now = Utc::now().timestamp() as u64;

    let body = r#"{"type":"event_callback","team_id":"T1","event":{"type":"message","channel":"C1","text":"hi"}}"#;
    let (status, reply) = app.send(slack_event("slack-secret", now, body)).await;
    assert_eq!(status, 200);
    assert_eq!(reply, json!({ "ok": true }));

    // Missing event fields are logged as empty, not rejected
    let body = r#"{"type":"event_callback"}"#;
    let (status, reply) = app.send(slack_event("slack-secret", now, body)).await;
    assert_eq!(status, 200);
    assert_eq!(reply, json!({ "ok": true }));
}
