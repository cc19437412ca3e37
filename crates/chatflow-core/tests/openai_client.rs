//! HTTP-level tests for the OpenAI-compatible client and the chat session
//! running on top of it, against a wiremock server.

use std::sync::Arc;

use chatflow_core::{
    ApiError, ApiResponse, ChatError, ChatMessage, ChatSession, ChatSettings, CompletionBackend,
    Credential, HttpClient, OpenAIClient, SendOptions, SendOutcome, StaticCredentials,
};
use futures_util::StreamExt;
use reqwest::Method;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SSE_BODY: &str = "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n\
                        data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"}}]}\n\n\
                        data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" there\"}}]}\n\n\
                        data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
                        data: [DONE]\n\n";

fn http_client(server: &MockServer) -> HttpClient {
    let credentials = StaticCredentials::new(Credential::new("sk-test"));
    HttpClient::new(&format!("{}/v1", server.uri()), Arc::new(credentials))
}

fn chat_session(server: &MockServer) -> ChatSession {
    let client = OpenAIClient::new(http_client(server));
    ChatSession::new(Arc::new(client), ChatSettings::new("gpt-4o-mini"))
}

async fn mount_stream(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(template)
        .mount(server)
        .await;
}

async fn mount_complete(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(template)
        .expect(1)
        .mount(server)
        .await;
}

fn fallback_reply() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "Fallback reply"}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
    }))
}

#[tokio::test]
async fn test_streamed_chat_commits_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("accept", "text/event-stream"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "stream": true,
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let chat = chat_session(&server);
    let outcome = chat.send_message("Hello", SendOptions::new()).await.unwrap();

    assert_eq!(outcome, SendOutcome::Committed { via_fallback: false, usage: None });
    let state = chat.snapshot();
    assert_eq!(state.messages, vec![ChatMessage::user("Hello"), ChatMessage::assistant("Hi there")]);
    assert!(state.error.is_none());
}

#[tokio::test]
async fn test_stream_http_error_falls_back_to_standard_request() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        ResponseTemplate::new(500).set_body_json(json!({"error": {"message": "stream broke"}})),
    )
    .await;
    mount_complete(&server, fallback_reply()).await;

    let chat = chat_session(&server);
    let outcome = chat.send_message("Hello", SendOptions::new()).await.unwrap();

    match outcome {
        SendOutcome::Committed { via_fallback, usage } => {
            assert!(via_fallback);
            assert_eq!(usage.map(|u| u.total_tokens), Some(5));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    let state = chat.snapshot();
    assert_eq!(state.messages.last(), Some(&ChatMessage::assistant("Fallback reply")));
    assert!(state.error.is_none());
}

#[tokio::test]
async fn test_empty_stream_body_falls_back() {
    let server = MockServer::start().await;
    mount_stream(&server, ResponseTemplate::new(204)).await;
    mount_complete(&server, fallback_reply()).await;

    let chat = chat_session(&server);
    chat.send_message("Hello", SendOptions::new()).await.unwrap();

    assert_eq!(chat.snapshot().messages.last(), Some(&ChatMessage::assistant("Fallback reply")));
}

#[tokio::test]
async fn test_null_fallback_content_commits_placeholder() {
    let server = MockServer::start().await;
    mount_stream(&server, ResponseTemplate::new(500)).await;
    mount_complete(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": null}, "finish_reason": "content_filter"}]
        })),
    )
    .await;

    let chat = chat_session(&server);
    let outcome = chat.send_message("Hello", SendOptions::new()).await.unwrap();

    assert_eq!(outcome, SendOutcome::Committed { via_fallback: true, usage: None });
    let state = chat.snapshot();
    assert_eq!(
        state.messages,
        vec![ChatMessage::user("Hello"), ChatMessage::assistant("No response received.")]
    );
    assert!(state.error.is_none());
}

#[tokio::test]
async fn test_both_attempts_failing_surfaces_error() {
    let server = MockServer::start().await;
    mount_stream(&server, ResponseTemplate::new(502).set_body_string("bad gateway")).await;
    mount_complete(
        &server,
        ResponseTemplate::new(429).set_body_json(json!({"error": "rate limit reached"})),
    )
    .await;

    let chat = chat_session(&server);
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let options = SendOptions::new().on_error(move |err| sink.lock().unwrap().push(err.to_string()));

    let err = chat.send_message("Hello", options).await.unwrap_err();
    match &err {
        ChatError::FallbackExhausted { stream, fallback } => {
            assert!(matches!(stream, ApiError::Http { status: 502, .. }));
            assert!(matches!(fallback, ApiError::Http { status: 429, .. }));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let state = chat.snapshot();
    assert_eq!(state.messages, vec![ChatMessage::user("Hello")]);
    assert!(state.error.as_deref().unwrap().contains("rate limit reached"));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_credential_fails_before_network() {
    let server = MockServer::start().await;
    let client = HttpClient::new(&server.uri(), Arc::new(StaticCredentials::empty()));

    let err = client
        .request(Method::GET, "models", None::<&()>, "gpt-4o")
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Unauthenticated { .. }));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_http_error_message_extraction() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "invalid api key"})))
        .mount(&server)
        .await;

    let err = http_client(&server)
        .request(Method::GET, "models", None::<&()>, "gpt-4o")
        .await
        .unwrap_err();

    match err {
        ApiError::Http { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "invalid api key");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_response_body_follows_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/files/1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("ok", "text/plain"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/echo"))
        .and(body_partial_json(json!({"ping": 1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pong": 1})))
        .mount(&server)
        .await;

    let client = http_client(&server);
    assert_eq!(
        client.request(Method::DELETE, "files/1", None::<&()>, "m").await.unwrap(),
        ApiResponse::Empty
    );
    assert_eq!(
        client.request(Method::GET, "/health", None::<&()>, "m").await.unwrap(),
        ApiResponse::Text("ok".to_string())
    );
    assert_eq!(
        client.request(Method::POST, "echo", Some(&json!({"ping": 1})), "m").await.unwrap(),
        ApiResponse::Json(json!({"pong": 1}))
    );
}

#[tokio::test]
async fn test_per_model_credential_overrides_endpoint_and_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/azure/chat/completions"))
        .and(header("api-key", "Bearer special-key"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(fallback_reply())
        .expect(1)
        .mount(&server)
        .await;

    let credentials = StaticCredentials::new(Credential::new("sk-default")).with(
        "special",
        Credential::new("special-key")
            .with_endpoint(format!("{}/azure", server.uri()))
            .with_auth_header("api-key"),
    );
    let client = OpenAIClient::new(HttpClient::new("http://unused.invalid/v1", Arc::new(credentials)));
    let chat = ChatSession::new(Arc::new(client), ChatSettings::new("special"));

    // The stream call also goes to /azure but has no matching mock (404), so
    // the reply arrives through the fallback.
    chat.send_message("Hello", SendOptions::new()).await.unwrap();
    assert_eq!(chat.snapshot().messages.last(), Some(&ChatMessage::assistant("Fallback reply")));
}

#[tokio::test]
async fn test_list_models_sorted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                {"id": "gpt-4o", "object": "model", "owned_by": "openai"},
                {"id": "gpt-3.5-turbo", "object": "model", "owned_by": "openai"}
            ]
        })))
        .mount(&server)
        .await;

    let models = OpenAIClient::new(http_client(&server)).list_models("gpt-4o").await.unwrap();
    assert_eq!(models, vec!["gpt-3.5-turbo".to_string(), "gpt-4o".to_string()]);
}

#[tokio::test]
async fn test_backend_stream_yields_chunks_directly() {
    let server = MockServer::start().await;
    mount_stream(&server, ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream")).await;

    let client = OpenAIClient::new(http_client(&server));
    let request = chatflow_core::ChatCompletionRequest {
        model: "gpt-4o-mini".to_string(),
        messages: vec![ChatMessage::user("Hello")],
        stream: false,
        temperature: 0.7,
        max_tokens: 64,
        top_p: 1.0,
    };

    let chunks: Vec<_> = client.stream(&request).await.unwrap().collect().await;
    let text: String = chunks
        .iter()
        .map(|c| c.as_ref().unwrap().content().unwrap_or_default())
        .collect();
    assert_eq!(chunks.len(), 4);
    assert_eq!(text, "Hi there");
}
