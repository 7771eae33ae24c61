use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::extract::{AUDIO_LINK_LABEL, AUDIO_SERVICE_ROOT, IMAGE_PROMPT_BASE};
use crate::settings::{Service, Settings};

const USER_AGENT: &str = "prompt-studio-api/0.1";
const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 1024;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("API key not configured for the OpenAI-compatible service")]
    MissingApiKey,
    #[error("{0}")]
    Request(String),
    #[error("completion endpoint returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to parse completion response: {0}")]
    Decode(String),
    #[error("completion endpoint returned no text")]
    EmptyResponse,
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

// ── Prompt templates ─────────────────────────────────────────────────────────

pub fn image_prompt(idea: &str, query: &str) -> String {
    format!(
        "You are an AI image generation assistant. Based on the idea \"{idea}\", describe \
         the picture in fluent, vivid English and put your description directly into the \
         {{query}} placeholder of the following URL, URL-encoding spaces:\n\
         ![image]({IMAGE_PROMPT_BASE}{{query}}?{query})"
    )
}

pub fn audio_prompt(idea: &str, query: &str) -> String {
    format!(
        "You are an AI narration assistant. Based on the idea \"{idea}\", write a short \
         spoken narration. Put the narration, URL-encoded, into the {{text}} placeholder of \
         the following link, then repeat the narration as plain text after the link:\n\
         [{AUDIO_LINK_LABEL}]({AUDIO_SERVICE_ROOT}{{text}}?{query})"
    )
}

// ── Client ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CompletionClient {
    http: Client,
}

impl CompletionClient {
    pub fn new(config: &AppConfig) -> Result<Self, UpstreamError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let mut builder = reqwest::ClientBuilder::new()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(USER_AGENT)
            .default_headers(headers);

        if config.insecure_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| UpstreamError::Request(e.to_string()))?;
        Ok(Self { http })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Send one prompt to whichever service `settings` selects and return the
    /// flattened response text.
    pub async fn complete(&self, settings: &Settings, prompt: &str) -> Result<String, UpstreamError> {
        let text = match settings.selected_service {
            Service::Ollama => self.complete_ollama(settings, prompt).await?,
            Service::OpenaiCompatible => self.complete_openai(settings, prompt).await?,
        };
        if text.trim().is_empty() {
            return Err(UpstreamError::EmptyResponse);
        }
        Ok(text)
    }

    async fn complete_ollama(&self, settings: &Settings, prompt: &str) -> Result<String, UpstreamError> {
        let url = format!("{}/api/generate", settings.ollama.api_url.trim_end_matches('/'));
        let request = GenerateRequest {
            model: &settings.ollama.model_name,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: TEMPERATURE,
                num_predict: MAX_TOKENS,
            },
        };

        tracing::info!(%url, model = %settings.ollama.model_name, "requesting local completion");
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error(e, "Is Ollama running?"))?;

        let body: GenerateResponse = decode(response).await?;
        Ok(body.response)
    }

    async fn complete_openai(&self, settings: &Settings, prompt: &str) -> Result<String, UpstreamError> {
        if settings.openai.api_key.trim().is_empty() {
            return Err(UpstreamError::MissingApiKey);
        }

        let url = format!(
            "{}/chat/completions",
            settings.openai.base_url.trim_end_matches('/')
        );
        let request = ChatRequest {
            model: &settings.openai.model_name,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        tracing::info!(%url, model = %settings.openai.model_name, "requesting chat completion");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&settings.openai.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error(e, "Check the service URL."))?;

        let body: ChatResponse = decode(response).await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(UpstreamError::EmptyResponse)
    }
}

fn request_error(e: reqwest::Error, hint: &str) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Request(format!("TimeoutError: {}", e))
    } else if e.is_connect() {
        UpstreamError::Request(format!("ConnectError: {}. {}", e, hint))
    } else {
        UpstreamError::Request(format!("RequestError: {}", e))
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, UpstreamError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(%status, "completion endpoint rejected request");
        return Err(UpstreamError::Status { status, body });
    }
    response
        .json()
        .await
        .map_err(|e| UpstreamError::Decode(e.to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::{json, Value};

    /// Serve `router` on an ephemeral local port and return its base URL.
    pub(crate) async fn spawn_mock(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client() -> CompletionClient {
        CompletionClient::new(&AppConfig::from_lookup(|_| None)).unwrap()
    }

    #[test]
    fn prompts_embed_templates_and_query() {
        let image = image_prompt("a cat", "width=1&height=2");
        assert!(image.contains("\"a cat\""));
        assert!(image.contains("![image](https://image.pollinations.ai/prompt/{query}?width=1&height=2)"));

        let audio = audio_prompt("hello", "model=openai-audio&voice=nova");
        assert!(audio.contains("[点击播放音频](https://text.pollinations.ai/{text}?model=openai-audio&voice=nova)"));
    }

    #[tokio::test]
    async fn ollama_generate_request_and_response() {
        let router = Router::new().route(
            "/api/generate",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "kevin_qwen:latest");
                assert_eq!(body["stream"], false);
                assert_eq!(body["options"]["num_predict"], 1024);
                Json(json!({ "response": format!("echo: {}", body["prompt"].as_str().unwrap()) }))
            }),
        );
        let base = spawn_mock(router).await;

        let mut settings = Settings::default();
        settings.ollama.api_url = format!("{}/", base);

        let text = client().complete(&settings, "draw").await.unwrap();
        assert_eq!(text, "echo: draw");
    }

    #[tokio::test]
    async fn openai_chat_request_and_response() {
        let router = Router::new().route(
            "/chat/completions",
            post(
                |headers: axum::http::HeaderMap, Json(body): Json<Value>| async move {
                    assert_eq!(headers["authorization"], "Bearer sk-test");
                    assert_eq!(body["messages"][0]["role"], "user");
                    assert_eq!(body["messages"][0]["content"], "draw");
                    Json(json!({ "choices": [{ "message": { "content": "done" } }] }))
                },
            ),
        );
        let base = spawn_mock(router).await;

        let mut settings = Settings::default();
        settings.selected_service = Service::OpenaiCompatible;
        settings.openai.base_url = base;
        settings.openai.api_key = "sk-test".to_string();

        assert_eq!(client().complete(&settings, "draw").await.unwrap(), "done");
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_io() {
        let mut settings = Settings::default();
        settings.selected_service = Service::OpenaiCompatible;
        settings.openai.base_url = "http://127.0.0.1:9".to_string();

        let err = client().complete(&settings, "draw").await.unwrap_err();
        assert!(matches!(err, UpstreamError::MissingApiKey));
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let router = Router::new().route(
            "/api/generate",
            post(|| async { (axum::http::StatusCode::NOT_FOUND, "model not found") }),
        );
        let base = spawn_mock(router).await;

        let mut settings = Settings::default();
        settings.ollama.api_url = base;

        match client().complete(&settings, "draw").await.unwrap_err() {
            UpstreamError::Status { status, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body, "model not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_and_empty_bodies_are_errors() {
        let router = Router::new()
            .route("/api/generate", post(|| async { Json(json!({ "text": "wrong shape" })) }))
            .route("/chat/completions", post(|| async { Json(json!({ "choices": [] })) }));
        let base = spawn_mock(router).await;

        let mut settings = Settings::default();
        settings.ollama.api_url = base.clone();
        let err = client().complete(&settings, "draw").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Decode(_)));

        settings.selected_service = Service::OpenaiCompatible;
        settings.openai.base_url = base;
        settings.openai.api_key = "sk-test".to_string();
        let err = client().complete(&settings, "draw").await.unwrap_err();
        assert!(matches!(err, UpstreamError::EmptyResponse));
    }
}
