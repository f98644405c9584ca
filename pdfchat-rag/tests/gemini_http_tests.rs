//! Gemini providers against a local stand-in for the REST API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::http::{HeaderMap, StatusCode, Uri};
use pdfchat_rag::{
    CompletionService, EmbeddingProvider, GeminiClient, GeminiCompletionService,
    GeminiEmbeddingProvider, RagError, RetryPolicy, ServiceErrorKind,
};
use serde_json::{Value, json};

type Reply = (StatusCode, Json<Value>);

async fn spawn_stub(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub listener");
    let addr = listener.local_addr().expect("stub addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("stub run");
    });
    (format!("http://{}/v1beta", addr), handle)
}

fn client(base: &str) -> GeminiClient {
    GeminiClient::new("test-key", Duration::from_secs(5))
        .unwrap()
        .with_base_url(base)
        .with_retry_policy(RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
        })
}

fn error_body(status: StatusCode, message: &str) -> Reply {
    (status, Json(json!({ "error": { "code": status.as_u16(), "message": message } })))
}

fn answer_body(text: &str) -> Reply {
    (
        StatusCode::OK,
        Json(json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })),
    )
}

#[tokio::test]
async fn unavailable_service_is_retried_until_it_answers() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let app = Router::new().fallback(move |headers: HeaderMap, uri: Uri| {
        let counter = Arc::clone(&counter);
        async move {
            if headers.get("x-goog-api-key").map(|v| v.as_bytes()) != Some(b"test-key".as_slice())
            {
                return error_body(StatusCode::UNAUTHORIZED, "missing key");
            }
            if !uri.path().ends_with("/models/gemini-2.5-flash:generateContent") {
                return error_body(StatusCode::NOT_FOUND, "no such method");
            }
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                error_body(StatusCode::SERVICE_UNAVAILABLE, "model overloaded")
            } else {
                answer_body("The sky is blue.")
            }
        }
    });
    let (base, handle) = spawn_stub(app).await;

    let service = GeminiCompletionService::new(client(&base), None);
    let text = service.generate("What color is the sky?").await.unwrap();
    assert_eq!(text, "The sky is blue.");
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    handle.abort();
}

#[tokio::test]
async fn rejected_key_surfaces_immediately_with_the_service_message() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let app = Router::new().fallback(move || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            error_body(StatusCode::UNAUTHORIZED, "API key not valid. Please pass a valid API key.")
        }
    });
    let (base, handle) = spawn_stub(app).await;

    let service = GeminiCompletionService::new(client(&base), Some("models/gemini-pro".into()));
    let err = service.generate("hello").await.unwrap_err();
    match &err {
        RagError::GenerationError { provider, message, kind } => {
            assert_eq!(provider, "gemini-pro");
            assert!(message.contains("API key not valid"), "message: {message}");
            assert!(matches!(kind, ServiceErrorKind::Permanent));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.is_retryable());
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    handle.abort();
}

#[tokio::test]
async fn exhausted_retries_return_the_last_transient_error() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let app = Router::new().fallback(move || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            error_body(StatusCode::TOO_MANY_REQUESTS, "quota exceeded, slow down")
        }
    });
    let (base, handle) = spawn_stub(app).await;

    let embedder = GeminiEmbeddingProvider::new(client(&base)).with_output_dimensionality(3);
    let err = embedder.embed("hello").await.unwrap_err();
    assert!(matches!(
        err,
        RagError::EmbeddingError { kind: ServiceErrorKind::Transient, .. }
    ));
    // The first attempt plus two retries.
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    handle.abort();
}

#[tokio::test]
async fn batch_embeddings_follow_input_order() {
    let app = Router::new().fallback(|uri: Uri, Json(body): Json<Value>| async move {
        if !uri.path().ends_with(":batchEmbedContents") {
            return error_body(StatusCode::NOT_FOUND, "no such method");
        }
        let requests = body["requests"].as_array().cloned().unwrap_or_default();
        let embeddings: Vec<Value> = requests
            .iter()
            .map(|request| {
                assert_eq!(request["taskType"], "RETRIEVAL_DOCUMENT");
                assert_eq!(request["outputDimensionality"], 3);
                let text = request["content"]["parts"][0]["text"].as_str().unwrap_or_default();
                json!({ "values": [text.len() as f32, 0.0, 1.0] })
            })
            .collect();
        (StatusCode::OK, Json(json!({ "embeddings": embeddings })))
    });
    let (base, handle) = spawn_stub(app).await;

    let embedder = GeminiEmbeddingProvider::new(client(&base)).with_output_dimensionality(3);
    let vectors = embedder.embed_batch(&["a", "abc", "ab"]).await.unwrap();
    let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
    assert_eq!(lengths, vec![1.0, 3.0, 2.0]);

    handle.abort();
}

#[tokio::test]
async fn batch_with_missing_embeddings_is_a_permanent_error() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let app = Router::new().fallback(move || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            (StatusCode::OK, Json(json!({ "embeddings": [{ "values": [1.0, 0.0, 0.0] }] })))
        }
    });
    let (base, handle) = spawn_stub(app).await;

    let embedder = GeminiEmbeddingProvider::new(client(&base)).with_output_dimensionality(3);
    let err = embedder.embed_batch(&["first", "second"]).await.unwrap_err();
    match err {
        RagError::EmbeddingError { message, kind, .. } => {
            assert!(message.contains("1 embeddings for 2 texts"), "message: {message}");
            assert!(matches!(kind, ServiceErrorKind::Permanent));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    handle.abort();
}

#[tokio::test]
async fn model_listing_follows_page_tokens() {
    let app = Router::new().fallback(|uri: Uri| async move {
        let query = uri.query().unwrap_or_default();
        if query.contains("pageToken=second") {
            (
                StatusCode::OK,
                Json(json!({ "models": [{ "name": "models/gemini-2.5-pro" }] })),
            )
        } else {
            (
                StatusCode::OK,
                Json(json!({
                    "models": [{
                        "name": "models/gemini-2.5-flash",
                        "displayName": "Gemini 2.5 Flash",
                        "inputTokenLimit": 1048576
                    }],
                    "nextPageToken": "second"
                })),
            )
        }
    });
    let (base, handle) = spawn_stub(app).await;

    let models = client(&base).list_models().await.unwrap();
    let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["models/gemini-2.5-flash", "models/gemini-2.5-pro"]);
    assert_eq!(models[0].display_name, "Gemini 2.5 Flash");
    assert_eq!(models[0].input_token_limit, 1_048_576);

    handle.abort();
}
