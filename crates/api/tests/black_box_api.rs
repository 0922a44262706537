use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

use creditgate_ai::{CompletionError, CompletionProvider, CompletionRequest, CompletionResponse};
use creditgate_auth::JwtClaims;
use creditgate_core::AccountId;
use creditgate_infra::store::InMemoryStore;
use creditgate_infra::{Runtime, RuntimeOptions};
use creditgate_ledger::AccountRole;

const JWT_SECRET: &str = "test-secret";

/// Echoes the last message; a prompt of "fail" yields an upstream error.
struct EchoProvider;

#[async_trait]
impl CompletionProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, CompletionError> {
        let prompt = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        if prompt == "fail" {
            return Err(CompletionError::Http {
                status: 503,
                body: "overloaded".into(),
            });
        }
        Ok(CompletionResponse::with_content(format!("echo: {prompt}")))
    }
}

struct TestServer {
    base_url: String,
    runtime: Runtime,
    admin_token: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let options = RuntimeOptions {
            workers: 2,
            poll_interval: Duration::from_millis(20),
            await_timeout: Duration::from_secs(5),
            ..RuntimeOptions::default()
        };
        let runtime = Runtime::start(Arc::new(InMemoryStore::new()), Arc::new(EchoProvider), options);
        let admin = runtime
            .accounts
            .create_account(AccountRole::Admin, 0)
            .await
            .expect("failed to create admin");

        // Same router as prod, bound to an ephemeral port.
        let app = creditgate_api::app::build_app(JWT_SECRET, &runtime);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            runtime,
            admin_token: mint_jwt(admin.id),
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Provision a user through the admin API; returns (id, token).
    async fn create_user(&self, credits: i64) -> (String, String) {
        let res = self
            .client
            .post(self.url("/admin/accounts"))
            .bearer_auth(&self.admin_token)
            .json(&json!({ "role": "user", "initialCredits": credits }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: Value = res.json().await.unwrap();
        (
            body["account"]["id"].as_str().unwrap().to_string(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    async fn request_job(&self, token: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url("/jobs"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(sub: AccountId) -> String {
    let claims = JwtClaims::new(sub, Utc::now(), ChronoDuration::minutes(10));
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

async fn error_code(res: reqwest::Response) -> String {
    let body: Value = res.json().await.unwrap();
    body["error"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "unauthenticated");

    let res = srv
        .client
        .get(srv.url("/whoami"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn whoami_reports_the_stored_role() {
    let srv = TestServer::spawn().await;
    let (user_id, user_token) = srv.create_user(1).await;

    let res = srv
        .client
        .get(srv.url("/whoami"))
        .bearer_auth(&user_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["accountId"], user_id);
    assert_eq!(body["role"], "user");
    assert_eq!(body["unlimited"], false);

    let res = srv
        .client
        .get(srv.url("/whoami"))
        .bearer_auth(&srv.admin_token)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["role"], "admin");
    assert_eq!(body["unlimited"], true);
}

#[tokio::test]
async fn request_then_await_returns_the_completion() {
    let srv = TestServer::spawn().await;
    let (_, token) = srv.create_user(2).await;

    let res = srv.request_job(&token, json!({ "payload": { "prompt": "hi" } })).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let receipt: Value = res.json().await.unwrap();
    assert_eq!(receipt["newBalance"], 1);
    assert_eq!(receipt["unlimited"], false);
    let job_id = receipt["jobId"].as_str().unwrap().to_string();

    let res = srv
        .client
        .get(srv.url(&format!("/jobs/{job_id}/await?timeoutSecs=5")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let job: Value = res.json().await.unwrap();
    assert_eq!(job["status"], "completed");
    assert_eq!(job["result"], "echo: hi");

    let res = srv
        .client
        .get(srv.url("/account"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let status: Value = res.json().await.unwrap();
    assert_eq!(status["available"], 1);
    assert_eq!(status["used"], 1);

    let res = srv
        .client
        .get(srv.url("/account/ledger"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let entries: Value = res.json().await.unwrap();
    // Opening grant plus one usage entry.
    assert_eq!(entries.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn failed_job_surfaces_job_failed_on_await() {
    let srv = TestServer::spawn().await;
    let (_, token) = srv.create_user(1).await;

    let res = srv.request_job(&token, json!({ "payload": { "prompt": "fail" } })).await;
    let receipt: Value = res.json().await.unwrap();
    let job_id = receipt["jobId"].as_str().unwrap().to_string();

    let res = srv
        .client
        .get(srv.url(&format!("/jobs/{job_id}/await")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(error_code(res).await, "job_failed");
}

#[tokio::test]
async fn second_request_on_one_credit_is_insufficient() {
    let srv = TestServer::spawn().await;
    let (_, token) = srv.create_user(1).await;

    let first = srv.request_job(&token, json!({ "payload": { "prompt": "a" } })).await;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = srv.request_job(&token, json!({ "payload": { "prompt": "b" } })).await;
    assert_eq!(second.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(error_code(second).await, "insufficient_credits");
}

#[tokio::test]
async fn trial_is_claimed_once_per_business() {
    let srv = TestServer::spawn().await;
    let (_, a) = srv.create_user(3).await;
    let (_, b) = srv.create_user(3).await;

    let body = json!({ "businessId": "biz-7", "payload": { "prompt": "trial" } });
    assert_eq!(srv.request_job(&a, body.clone()).await.status(), StatusCode::CREATED);

    let res = srv.request_job(&b, body).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(res).await, "trial_already_used");
}

#[tokio::test]
async fn non_object_payload_is_invalid() {
    let srv = TestServer::spawn().await;
    let (_, token) = srv.create_user(1).await;

    let res = srv.request_job(&token, json!({ "payload": "just text" })).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(res).await, "invalid_argument");
}

#[tokio::test]
async fn jobs_are_private_to_their_owner_and_admins() {
    let srv = TestServer::spawn().await;
    let (_, owner) = srv.create_user(1).await;
    let (_, stranger) = srv.create_user(1).await;

    let receipt: Value = srv
        .request_job(&owner, json!({ "payload": { "prompt": "mine" } }))
        .await
        .json()
        .await
        .unwrap();
    let path = format!("/jobs/{}", receipt["jobId"].as_str().unwrap());

    let res = srv.client.get(srv.url(&path)).bearer_auth(&stranger).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = srv
        .client
        .get(srv.url(&format!("{path}/await")))
        .bearer_auth(&stranger)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = srv
        .client
        .get(srv.url(&path))
        .bearer_auth(&srv.admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_endpoints_reject_regular_users() {
    let srv = TestServer::spawn().await;
    let (user_id, token) = srv.create_user(1).await;

    let res = srv
        .client
        .post(srv.url("/admin/accounts"))
        .bearer_auth(&token)
        .json(&json!({ "role": "admin" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "permission_denied");

    let res = srv
        .client
        .post(srv.url(&format!("/admin/accounts/{user_id}/credits")))
        .bearer_auth(&token)
        .json(&json!({ "mode": "grant", "amount": 100 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_grants_blocks_and_unblocks() {
    let srv = TestServer::spawn().await;
    let (user_id, token) = srv.create_user(0).await;

    let res = srv
        .client
        .post(srv.url(&format!("/admin/accounts/{user_id}/credits")))
        .bearer_auth(&srv.admin_token)
        .json(&json!({ "mode": "grant", "amount": 5, "note": "welcome" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let account: Value = res.json().await.unwrap();
    assert_eq!(account["available"], 5);

    let res = srv
        .client
        .post(srv.url(&format!("/admin/accounts/{user_id}/block")))
        .bearer_auth(&srv.admin_token)
        .json(&json!({ "reason": "chargeback", "durationSecs": 3600 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv.request_job(&token, json!({ "payload": { "prompt": "x" } })).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "permission_denied");

    let res = srv
        .client
        .post(srv.url(&format!("/admin/accounts/{user_id}/unblock")))
        .bearer_auth(&srv.admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv.request_job(&token, json!({ "payload": { "prompt": "x" } })).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(srv.runtime.queries.status(user_id.parse().unwrap()).await.unwrap().available, 4);
}

#[tokio::test]
async fn unknown_mode_and_account_are_reported() {
    let srv = TestServer::spawn().await;
    let (user_id, _) = srv.create_user(1).await;

    let res = srv
        .client
        .post(srv.url(&format!("/admin/accounts/{user_id}/credits")))
        .bearer_auth(&srv.admin_token)
        .json(&json!({ "mode": "double", "amount": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = srv
        .client
        .get(srv.url(&format!("/admin/accounts/{}", AccountId::new())))
        .bearer_auth(&srv.admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
