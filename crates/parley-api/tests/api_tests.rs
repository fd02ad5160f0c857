use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header::AUTHORIZATION, header::CONTENT_TYPE},
};
use chrono::Utc;
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use parley_api::error::ERROR_KIND_HEADER;
use parley_api::{AppState, AppStateInner, build_router};
use parley_core::Engine;
use parley_db::Database;
use parley_gateway::{Dispatcher, RelayMode};
use parley_types::api::Claims;

type TestResult<T = ()> = anyhow::Result<T>;

const SECRET: &str = "api-test-secret";

struct TestContext {
    _temp_dir: TempDir,
    state: AppState,
}

struct TestResponse {
    status: StatusCode,
    kind: Option<String>,
    body: Value,
}

impl TestContext {
    fn new() -> TestResult<Self> {
        let temp_dir = TempDir::new()?;
        let db = Database::open(&temp_dir.path().join("parley.db"))?;
        let state = AppStateInner::new(
            Engine::new(Arc::new(db)),
            Dispatcher::new(RelayMode::Client),
            SECRET.to_string(),
            20,
        );
        Ok(Self {
            _temp_dir: temp_dir,
            state,
        })
    }

    fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        user: Option<Uuid>,
        body: Option<Value>,
    ) -> TestResult<TestResponse> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token(user)?));
        }
        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.router().oneshot(request).await?;
        let status = response.status();
        let kind = response
            .headers()
            .get(ERROR_KIND_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.into_body().collect().await?.to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok(TestResponse { status, kind, body })
    }

    async fn create_group(&self, owner: Uuid, name: &str, visibility: &str) -> TestResult<Uuid> {
        let resp = self
            .send(
                Method::POST,
                "/groups",
                Some(owner),
                Some(json!({ "name": name, "visibility": visibility })),
            )
            .await?;
        assert_eq!(resp.status, StatusCode::CREATED, "{}", resp.body);
        Ok(resp.body["data"]["id"].as_str().unwrap_or_default().parse()?)
    }

    async fn post_message(
        &self,
        author: Uuid,
        group_id: Uuid,
        text: &str,
        reply_to: Option<Uuid>,
    ) -> TestResult<Uuid> {
        let resp = self
            .send(
                Method::POST,
                "/messages",
                Some(author),
                Some(json!({ "groupId": group_id, "text": text, "replyToId": reply_to })),
            )
            .await?;
        assert_eq!(resp.status, StatusCode::CREATED, "{}", resp.body);
        Ok(resp.body["data"]["id"].as_str().unwrap_or_default().parse()?)
    }
}

fn token(user: Uuid) -> TestResult<String> {
    let claims = Claims {
        sub: user,
        exp: (Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )?)
}

fn assert_failure(resp: &TestResponse, status: StatusCode, kind: &str) {
    assert_eq!(resp.status, status, "{}", resp.body);
    assert_eq!(resp.kind.as_deref(), Some(kind));
    assert_eq!(resp.body["success"], false);
    assert!(resp.body["data"].is_null());
    assert!(!resp.body["message"].as_str().unwrap_or_default().is_empty());
}

#[tokio::test]
async fn health_needs_no_token() -> TestResult {
    let ctx = TestContext::new()?;
    let resp = ctx.send(Method::GET, "/health", None, None).await?;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["success"], true);
    assert_eq!(resp.body["data"]["status"], "ok");
    assert_eq!(resp.body["data"]["channels"], 0);
    Ok(())
}

#[tokio::test]
async fn missing_or_bad_token_is_unauthorized() -> TestResult {
    let ctx = TestContext::new()?;
    let resp = ctx.send(Method::GET, "/groups/public", None, None).await?;
    assert_failure(&resp, StatusCode::UNAUTHORIZED, "Unauthorized");

    let request = Request::builder()
        .uri("/groups/public")
        .header(AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())?;
    let response = ctx.router().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn unknown_route_is_not_found_envelope() -> TestResult {
    let ctx = TestContext::new()?;
    let resp = ctx.send(Method::GET, "/nope", Some(Uuid::new_v4()), None).await?;
    assert_failure(&resp, StatusCode::NOT_FOUND, "RecordNotFound");
    Ok(())
}

#[tokio::test]
async fn group_names_are_unique_per_visibility() -> TestResult {
    let ctx = TestContext::new()?;
    let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());

    ctx.create_group(u1, "X", "public").await?;
    let resp = ctx
        .send(
            Method::POST,
            "/groups",
            Some(u2),
            Some(json!({ "name": "X", "visibility": "public" })),
        )
        .await?;
    assert_failure(&resp, StatusCode::BAD_REQUEST, "NameTaken");

    ctx.create_group(u2, "X", "private").await?;

    let resp = ctx.send(Method::GET, "/groups/public", Some(u2), None).await?;
    assert_eq!(resp.body["data"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn malformed_body_is_validation_failure() -> TestResult {
    let ctx = TestContext::new()?;
    let user = Uuid::new_v4();

    let resp = ctx
        .send(
            Method::POST,
            "/groups",
            Some(user),
            Some(json!({ "name": "x", "visibility": "secret" })),
        )
        .await?;
    assert_failure(&resp, StatusCode::BAD_REQUEST, "ValidationFailed");

    let resp = ctx
        .send(Method::DELETE, "/groups?groupId=not-a-uuid", Some(user), None)
        .await?;
    assert_failure(&resp, StatusCode::BAD_REQUEST, "ValidationFailed");
    Ok(())
}

#[tokio::test]
async fn rename_rules() -> TestResult {
    let ctx = TestContext::new()?;
    let (owner, other) = (Uuid::new_v4(), Uuid::new_v4());
    let gid = ctx.create_group(owner, "alpha", "public").await?;

    let body = json!({ "groupId": gid, "name": "beta" });
    let resp = ctx.send(Method::PUT, "/groups", Some(other), Some(body.clone())).await?;
    assert_failure(&resp, StatusCode::FORBIDDEN, "Forbidden");

    let resp = ctx
        .send(
            Method::PUT,
            "/groups",
            Some(owner),
            Some(json!({ "groupId": gid, "name": "alpha" })),
        )
        .await?;
    assert_failure(&resp, StatusCode::BAD_REQUEST, "NoModification");

    let resp = ctx.send(Method::PUT, "/groups", Some(owner), Some(body)).await?;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["data"]["name"], "beta");
    Ok(())
}

#[tokio::test]
async fn private_groups_only_for_self_and_members() -> TestResult {
    let ctx = TestContext::new()?;
    let (owner, member, outsider) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let gid = ctx.create_group(owner, "team", "private").await?;

    let uri = format!("/groups/private?userId={}", owner);
    let resp = ctx.send(Method::GET, &uri, Some(outsider), None).await?;
    assert_failure(&resp, StatusCode::FORBIDDEN, "Forbidden");

    let resp = ctx.send(Method::GET, &uri, Some(owner), None).await?;
    assert_eq!(resp.body["data"][0]["id"], gid.to_string());

    let members = format!("/groups/members?groupId={}&userId={}", gid, member);
    let resp = ctx.send(Method::POST, &members, Some(owner), None).await?;
    assert_eq!(resp.status, StatusCode::CREATED);
    let resp = ctx.send(Method::POST, &members, Some(owner), None).await?;
    assert_failure(&resp, StatusCode::BAD_REQUEST, "AlreadyMember");

    let listing = format!("/groups/members?groupId={}", gid);
    let resp = ctx.send(Method::GET, &listing, Some(member), None).await?;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["data"][0]["userId"], owner.to_string());
    assert_eq!(resp.body["data"][1]["userId"], member.to_string());
    let resp = ctx.send(Method::GET, &listing, Some(outsider), None).await?;
    assert_failure(&resp, StatusCode::FORBIDDEN, "Forbidden");

    let byid = format!("/groups/byid?groupId={}", gid);
    let resp = ctx.send(Method::GET, &byid, Some(member), None).await?;
    assert_eq!(resp.status, StatusCode::OK);
    let resp = ctx.send(Method::GET, &byid, Some(outsider), None).await?;
    assert_failure(&resp, StatusCode::FORBIDDEN, "Forbidden");

    let resp = ctx.send(Method::DELETE, &members, Some(member), None).await?;
    assert_eq!(resp.status, StatusCode::OK);
    let resp = ctx.send(Method::DELETE, &members, Some(owner), None).await?;
    assert_failure(&resp, StatusCode::NOT_FOUND, "RecordNotFound");
    Ok(())
}

#[tokio::test]
async fn message_lifecycle() -> TestResult {
    let ctx = TestContext::new()?;
    let (author, other) = (Uuid::new_v4(), Uuid::new_v4());
    let gid = ctx.create_group(author, "general", "public").await?;

    let a = ctx.post_message(author, gid, "A", None).await?;
    let b = ctx.post_message(other, gid, "B", Some(a)).await?;
    let c = ctx.post_message(other, gid, "C", Some(b)).await?;

    let edit = json!({ "messageId": a, "text": "A2" });
    let resp = ctx.send(Method::PUT, "/messages", Some(other), Some(edit.clone())).await?;
    assert_failure(&resp, StatusCode::FORBIDDEN, "Forbidden");
    let resp = ctx.send(Method::PUT, "/messages", Some(author), Some(edit)).await?;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["data"]["text"], "A2");
    assert!(resp.body["data"]["editedAt"].is_string());

    let uri = format!("/messages?messageId={}", a);
    let resp = ctx.send(Method::DELETE, &uri, Some(other), None).await?;
    assert_failure(&resp, StatusCode::FORBIDDEN, "Forbidden");
    let resp = ctx.send(Method::DELETE, &uri, Some(author), None).await?;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["data"]["replyIds"], json!([b]));

    let resp = ctx
        .send(Method::GET, &format!("/messages/byid?messageId={}", b), Some(author), None)
        .await?;
    assert_failure(&resp, StatusCode::NOT_FOUND, "RecordNotFound");
    let resp = ctx
        .send(Method::GET, &format!("/messages/byid?messageId={}", c), Some(author), None)
        .await?;
    assert_eq!(resp.body["data"]["replyToId"], b.to_string());
    Ok(())
}

#[tokio::test]
async fn history_pages_are_stable() -> TestResult {
    let ctx = TestContext::new()?;
    let author = Uuid::new_v4();
    let gid = ctx.create_group(author, "general", "public").await?;
    let mut created = Vec::new();
    for i in 0..10 {
        created.push(ctx.post_message(author, gid, &format!("m{}", i), None).await?);
    }

    let mut seen = Vec::new();
    for skip in [0, 5] {
        let uri = format!("/messages?groupId={}&skip={}&pageSize=5", gid, skip);
        let resp = ctx.send(Method::GET, &uri, Some(author), None).await?;
        let page = resp.body["data"].as_array().cloned().unwrap_or_default();
        assert_eq!(page.len(), 5);
        for m in page {
            seen.push(m["id"].as_str().unwrap_or_default().parse::<Uuid>()?);
        }
    }
    seen.reverse();
    assert_eq!(seen, created);

    let uri = format!("/messages?groupId={}&skip=0", Uuid::new_v4());
    let resp = ctx.send(Method::GET, &uri, Some(author), None).await?;
    assert_failure(&resp, StatusCode::NOT_FOUND, "RecordNotFound");
    Ok(())
}

#[tokio::test]
async fn delete_group_cascades() -> TestResult {
    let ctx = TestContext::new()?;
    let (owner, member) = (Uuid::new_v4(), Uuid::new_v4());
    let gid = ctx.create_group(owner, "team", "private").await?;
    ctx.send(
        Method::POST,
        &format!("/groups/members?groupId={}&userId={}", gid, member),
        Some(owner),
        None,
    )
    .await?;
    ctx.post_message(member, gid, "hello", None).await?;

    let uri = format!("/groups?groupId={}", gid);
    let resp = ctx.send(Method::DELETE, &uri, Some(member), None).await?;
    assert_failure(&resp, StatusCode::FORBIDDEN, "Forbidden");

    let resp = ctx.send(Method::DELETE, &uri, Some(owner), None).await?;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["data"]["messagesDeleted"], 1);
    assert_eq!(resp.body["data"]["membershipsDeleted"], 2);

    let resp = ctx.send(Method::DELETE, &uri, Some(owner), None).await?;
    assert_failure(&resp, StatusCode::NOT_FOUND, "RecordNotFound");
    Ok(())
}
