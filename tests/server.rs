//! HTTP API tests driven through the router with `tower::ServiceExt::oneshot`.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::Engine;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use study_harness::app::StudyApp;
use study_harness::config::Config;
use study_harness::error::Result;
use study_harness::llm::{ChatRequest, DisabledClient, LlmClient};
use study_harness::server::router;
use study_harness::session::InMemorySessionStore;

/// Fake tutor: well-formed JSON for generation prompts, an echo for chat.
struct FakeTutor;

#[async_trait]
impl LlmClient for FakeTutor {
    fn model(&self) -> &str {
        "fake-tutor"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let prompt = request
            .turns
            .last()
            .map(|t| t.content.clone())
            .unwrap_or_default();
        let reply = if prompt.contains("course outline") {
            json!({ "sections": [
                { "title": "Basics", "topics": ["Cells", "Membranes"] },
                { "title": "Energy", "topics": ["Mitochondria", "ATP"] }
            ]})
        } else if prompt.contains("trainer covering") {
            json!({ "narration": "Here is the idea.", "bullets": ["first", "second"] })
        } else if prompt.contains("multiple-choice") {
            let count: usize = prompt
                .split_whitespace()
                .nth(1)
                .and_then(|n| n.parse().ok())
                .unwrap_or(1);
            Value::Array(
                (1..=count)
                    .map(|i| {
                        json!({
                            "prompt": format!("Question {}?", i),
                            "choices": ["right", "wrong a", "wrong b", "wrong c"],
                            "correct_answer": "right",
                            "rationale": "Because."
                        })
                    })
                    .collect(),
            )
        } else {
            return Ok(format!("Tutor says: {}", prompt));
        };
        Ok(reply.to_string())
    }
}

/// Replies with prose only, so every generation request is unusable.
struct Rambler;

#[async_trait]
impl LlmClient for Rambler {
    fn model(&self) -> &str {
        "rambler"
    }

    async fn complete(&self, _request: &ChatRequest) -> Result<String> {
        Ok("Sure! Let me think about that for a while.".to_string())
    }
}

fn app_router(tmp: &tempfile::TempDir, llm: Arc<dyn LlmClient>) -> Router {
    let app = StudyApp::with_components(
        Config::minimal(tmp.path()),
        Arc::new(InMemorySessionStore::new()),
        llm,
        None,
    );
    router(app)
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn upload_body(filename: &str, content: &[u8]) -> Value {
    json!({
        "filename": filename,
        "content_base64": base64::engine::general_purpose::STANDARD.encode(content),
    })
}

const NOTES: &[u8] = b"# Cells\n\nCells are the basic unit of life.\n\n\
    Mitochondria produce energy for the cell as ATP.";

async fn onboard_and_index(router: &Router) {
    let (status, _) = call(
        router,
        "POST",
        "/users/ada/onboarding",
        Some(json!({
            "user_name": "Ada",
            "study_subject": "Cell biology",
            "knowledge": "beginner"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(router, "POST", "/users/ada/documents", Some(upload_body("notes.md", NOTES))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = call(router, "POST", "/users/ada/index", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_health() {
    let tmp = tempfile::tempdir().unwrap();
    let router = app_router(&tmp, Arc::new(FakeTutor));

    let (status, body) = call(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_upload_validation() {
    let tmp = tempfile::tempdir().unwrap();
    let router = app_router(&tmp, Arc::new(FakeTutor));

    let (status, body) = call(&router, "POST", "/users/ada/documents", Some(upload_body("notes.md", NOTES))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["filename"], "notes.md");
    assert_eq!(body["format"], "markdown");
    assert_eq!(body["content_type"], "text/markdown");

    let (status, body) = call(&router, "POST", "/users/ada/documents", Some(upload_body("deck.pptx", b"PK"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "unsupported_format");

    let (status, body) = call(
        &router,
        "POST",
        "/users/ada/documents",
        Some(json!({ "filename": "a.txt", "content_base64": "***" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = call(&router, "GET", "/users/ada/documents", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["documents"], json!(["notes.md"]));
}

#[tokio::test]
async fn test_slides_and_quiz_flow() {
    let tmp = tempfile::tempdir().unwrap();
    let router = app_router(&tmp, Arc::new(FakeTutor));
    onboard_and_index(&router).await;

    let (status, slide) = call(&router, "POST", "/users/ada/slides", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(slide["index"], 0);
    assert_eq!(slide["total"], 4);

    let (_, slide) = call(&router, "POST", "/users/ada/slides/goto", Some(json!({ "direction": "next" }))).await;
    assert_eq!(slide["index"], 1);
    let (_, slide) = call(&router, "GET", "/users/ada/slides/current?narration=true", None).await;
    assert_eq!(slide["index"], 1);
    assert_eq!(slide["narration"], "Here is the idea.");
    let (status, _) = call(&router, "POST", "/users/ada/slides/goto", Some(json!({ "direction": "sideways" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, quiz) = call(&router, "POST", "/users/ada/quiz", Some(json!({ "count": 2 }))).await;
    assert_eq!(status, StatusCode::OK);
    let questions = quiz["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 2);
    assert!(questions[0].get("correct_answer").is_none());

    for number in [1, 2] {
        let (status, _) = call(
            &router,
            "POST",
            "/users/ada/quiz/answer",
            Some(json!({ "number": number, "choice": "right" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, result) = call(&router, "POST", "/users/ada/quiz/submit", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["score"], 2);
    assert_eq!(result["level"], "Advanced");

    let (_, session) = call(&router, "GET", "/users/ada/session", None).await;
    assert_eq!(session["mode"], "quiz");
    assert_eq!(session["preferences"]["knowledge_level"], "Advanced");
}

#[tokio::test]
async fn test_session_hides_quiz_answers() {
    let tmp = tempfile::tempdir().unwrap();
    let router = app_router(&tmp, Arc::new(FakeTutor));
    onboard_and_index(&router).await;

    let (status, _) = call(&router, "POST", "/users/ada/quiz", Some(json!({ "count": 2 }))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, session) = call(&router, "GET", "/users/ada/session", None).await;
    assert_eq!(status, StatusCode::OK);
    let quiz = session["quiz"].as_array().unwrap();
    assert_eq!(quiz.len(), 2);
    for question in quiz {
        assert!(question.get("correct_answer").is_none());
        assert!(question.get("rationale").is_none());
        assert_eq!(question["choices"].as_array().unwrap().len(), 4);
    }

    let (status, session) = call(&router, "POST", "/users/ada/mode", Some(json!({ "mode": "slides" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(session["quiz"][1].get("correct_answer").is_none());

    call(&router, "POST", "/users/ada/quiz/answer", Some(json!({ "number": 1, "choice": "wrong a" }))).await;
    call(&router, "POST", "/users/ada/quiz/answer", Some(json!({ "number": 2, "choice": "right" }))).await;
    let (status, result) = call(&router, "POST", "/users/ada/quiz/submit", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["review"][0]["correct_answer"], "right");

    // A submitted quiz can be answered and submitted again, so the review stays out.
    let (_, session) = call(&router, "GET", "/users/ada/session", None).await;
    assert_eq!(session["progress"]["last_quiz"]["score"], 1);
    assert!(session["progress"]["last_quiz"].get("review").is_none());
    assert!(session["quiz"][0].get("correct_answer").is_none());
}

#[tokio::test]
async fn test_mode_and_chat() {
    let tmp = tempfile::tempdir().unwrap();
    let router = app_router(&tmp, Arc::new(FakeTutor));
    onboard_and_index(&router).await;

    let (status, body) = call(&router, "POST", "/users/ada/mode", Some(json!({ "mode": "onboarding" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_transition");

    let (status, body) = call(&router, "POST", "/users/ada/chat", Some(json!({ "message": "What is ATP?" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "Tutor says: What is ATP?");
    assert_eq!(body["sources"], json!(["notes.md"]));

    let (status, body) = call(&router, "POST", "/users/ada/chat", Some(json!({ "message": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_error_statuses() {
    let tmp = tempfile::tempdir().unwrap();
    let router = app_router(&tmp, Arc::new(FakeTutor));

    let (status, body) = call(&router, "POST", "/users/ada/index", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "index_build");

    let (status, body) = call(&router, "POST", "/users/ada/slides", Some(json!({ "topic": "cells" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _) = call(&router, "GET", "/users/bad%20id/session", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_llm_failures_are_bad_gateway() {
    let tmp = tempfile::tempdir().unwrap();
    let router = app_router(&tmp, Arc::new(DisabledClient));
    let (status, body) = call(&router, "POST", "/users/ada/chat", Some(json!({ "message": "hi" }))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "llm_unavailable");

    let tmp = tempfile::tempdir().unwrap();
    let router = app_router(&tmp, Arc::new(Rambler));
    onboard_and_index(&router).await;
    let (status, body) = call(&router, "POST", "/users/ada/slides", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "generation");
}

#[tokio::test]
async fn test_logout_resets_session() {
    let tmp = tempfile::tempdir().unwrap();
    let router = app_router(&tmp, Arc::new(FakeTutor));
    onboard_and_index(&router).await;

    let (status, _) = call(&router, "DELETE", "/users/ada/session", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, session) = call(&router, "GET", "/users/ada/session", None).await;
    assert_eq!(session["mode"], "onboarding");
    assert!(session["preferences"].is_null());
    let (_, body) = call(&router, "GET", "/users/ada/documents", None).await;
    assert_eq!(body["documents"], json!([]));
}
