use crate::config::Config;
use crate::error::ApiError;
use crate::models::{
    GeneratedImage, GenerationSettings, ImageFormat, ImageRequest, Material, Outline,
    OutlineChapter,
};
use crate::services::extract::parse_json_reply;
use crate::services::prompts;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Turns raw course-outline text into chapters and topics.
pub trait OutlineApi {
    fn extract_outline(
        &self,
        source_text: &str,
    ) -> impl Future<Output = Result<Outline, ApiError>> + Send;
}

/// Writes the reading material for one chapter.
pub trait ContentApi {
    fn generate_material(
        &self,
        chapter: &OutlineChapter,
        settings: &GenerationSettings,
    ) -> impl Future<Output = Result<Material, ApiError>> + Send;
}

pub trait ImageApi {
    fn generate_image(
        &self,
        request: &ImageRequest,
    ) -> impl Future<Output = Result<GeneratedImage, ApiError>> + Send;
}

/// Builds API clients for a session's keys.
pub trait Providers {
    type Outline: OutlineApi + Sync;
    type Content: ContentApi + Sync;
    type Image: ImageApi + Sync;

    fn outline_api(&self, api_key: &str) -> Self::Outline;
    fn content_api(&self, api_key: &str) -> Self::Content;
    fn image_api(&self, api_key: &str) -> Self::Image;
}

/// The real endpoints, sharing one connection pool.
#[derive(Clone)]
pub struct HttpProviders {
    client: reqwest::Client,
    config: Arc<Config>,
}

impl HttpProviders {
    pub fn new(config: Arc<Config>) -> Self {
        HttpProviders {
            client: reqwest::Client::new(),
            config,
        }
    }
}

impl Providers for HttpProviders {
    type Outline = GeminiClient;
    type Content = ChatClient;
    type Image = GeminiClient;

    fn outline_api(&self, api_key: &str) -> GeminiClient {
        GeminiClient::new(
            self.client.clone(),
            "Gemini",
            &self.config.gemini_api_base,
            &self.config.outline_model,
            api_key,
        )
    }

    fn content_api(&self, api_key: &str) -> ChatClient {
        ChatClient::new(
            self.client.clone(),
            &self.config.content_api_url,
            &self.config.content_model,
            api_key,
            self.config.content_max_tokens,
        )
    }

    fn image_api(&self, api_key: &str) -> GeminiClient {
        GeminiClient::new(
            self.client.clone(),
            "Gemini image",
            &self.config.gemini_api_base,
            &self.config.image_model,
            api_key,
        )
        .with_timeout(self.config.image_timeout)
    }
}

/// Client for Gemini `generateContent`, used both for outlines and images.
pub struct GeminiClient {
    client: reqwest::Client,
    provider: &'static str,
    api_base: String,
    model: String,
    api_key: String,
    timeout: Option<Duration>,
}

impl GeminiClient {
    pub fn new(
        client: reqwest::Client,
        provider: &'static str,
        api_base: &str,
        model: &str,
        api_key: &str,
    ) -> Self {
        GeminiClient {
            client,
            provider,
            api_base: api_base.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    async fn generate_content(&self, body: serde_json::Value) -> Result<GeminiResponse, ApiError> {
        debug!("Calling {} model {}", self.provider, self.model);

        // The key travels as a query parameter, not a header.
        let mut request_builder = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(timeout) = self.timeout {
            request_builder = request_builder.timeout(timeout);
        }

        send_json(self.provider, request_builder).await
    }
}

impl OutlineApi for GeminiClient {
    async fn extract_outline(&self, source_text: &str) -> Result<Outline, ApiError> {
        let body = json!({
            "contents": [{
                "parts": [{ "text": prompts::outline_prompt(source_text) }]
            }],
            "generationConfig": { "responseMimeType": "application/json" }
        });

        let response = self.generate_content(body).await?;
        let text = response.first_text().ok_or(ApiError::MissingField {
            provider: self.provider,
            path: "candidates[0].content.parts[0].text",
        })?;

        let outline: Outline = parse_json_reply(self.provider, text)?;
        info!("{} returned {} chapters", self.provider, outline.chapters.len());
        Ok(outline.normalized())
    }
}

impl ImageApi for GeminiClient {
    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage, ApiError> {
        let body = json!({
            "contents": [{
                "parts": [{ "text": request.prompt }]
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": {
                    "aspectRatio": request.ratio.as_str(),
                    "imageSize": request.size,
                }
            }
        });

        let response = self.generate_content(body).await?;
        response.first_image(self.provider)
    }
}

/// OpenAI-style chat completions endpoint (DeepSeek).
pub struct ChatClient {
    client: reqwest::Client,
    api_url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
}

const CHAT_PROVIDER: &str = "DeepSeek";

impl ChatClient {
    pub fn new(
        client: reqwest::Client,
        api_url: &str,
        model: &str,
        api_key: &str,
        max_tokens: u32,
    ) -> Self {
        ChatClient {
            client,
            api_url: api_url.to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            max_tokens,
        }
    }
}

impl ContentApi for ChatClient {
    async fn generate_material(
        &self,
        chapter: &OutlineChapter,
        settings: &GenerationSettings,
    ) -> Result<Material, ApiError> {
        debug!("Calling {} model {} for '{}'", CHAT_PROVIDER, self.model, chapter.chapter);

        let request_builder = self
            .client
            .post(&self.api_url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": [
                    { "role": "user", "content": prompts::content_prompt(chapter, settings) }
                ],
                "temperature": settings.temperature,
                "max_tokens": self.max_tokens,
                "response_format": { "type": "json_object" }
            }));

        let response: ChatResponse = send_json(CHAT_PROVIDER, request_builder).await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ApiError::MissingField {
                provider: CHAT_PROVIDER,
                path: "choices[0].message.content",
            })?;

        parse_json_reply(CHAT_PROVIDER, &content)
    }
}

async fn send_json<T: DeserializeOwned>(
    provider: &'static str,
    request_builder: reqwest::RequestBuilder,
) -> Result<T, ApiError> {
    let response = request_builder
        .send()
        .await
        .map_err(|e| ApiError::transport(provider, e))?;
    let status = response.status();
    let response_text = response
        .text()
        .await
        .map_err(|e| ApiError::transport(provider, e))?;

    if !status.is_success() {
        return Err(ApiError::Status {
            provider,
            status: status.as_u16(),
            body: response_text,
        });
    }

    serde_json::from_str(&response_text)
        .map_err(|source| ApiError::InvalidJson { provider, source })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default, alias = "mime_type")]
    mime_type: Option<String>,
    data: String,
}

impl GeminiResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
    }

    fn first_text(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .first()?
            .text
            .as_deref()
    }

    fn first_image(&self, provider: &'static str) -> Result<GeneratedImage, ApiError> {
        if let Some(inline) = self.parts().find_map(|p| p.inline_data.as_ref()) {
            let bytes = BASE64
                .decode(inline.data.trim())
                .map_err(|source| ApiError::ImageDecode { provider, source })?;
            let mime_type = inline.mime_type.as_deref().unwrap_or("image/png");
            let format = ImageFormat::from_mime(mime_type).ok_or_else(|| ApiError::NoImage {
                provider,
                detail: format!("unsupported image type {}", mime_type),
            })?;
            return Ok(GeneratedImage { bytes, format });
        }

        let detail = if let Some(text) = self.parts().find_map(|p| p.text.as_deref()) {
            format!("model returned text instead of an image: {}", text)
        } else if self.candidates.is_empty() {
            match &self.prompt_feedback {
                Some(feedback) => format!("likely blocked, prompt feedback: {}", feedback),
                None => "no candidates in response".to_string(),
            }
        } else {
            "no inline image data in response".to_string()
        };
        Err(ApiError::NoImage { provider, detail })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gemini(json: &str) -> GeminiResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn first_text_reads_first_part() {
        let response =
            gemini(r#"{"candidates":[{"content":{"parts":[{"text":"{\"chapters\":[]}"}]}}]}"#);
        assert_eq!(response.first_text(), Some(r#"{"chapters":[]}"#));
        assert_eq!(gemini(r#"{"candidates":[]}"#).first_text(), None);
    }

    #[test]
    fn inline_image_is_decoded_in_either_casing() {
        let camel = gemini(
            r#"{"candidates":[{"content":{"parts":[{"text":"here"},{"inlineData":{"mimeType":"image/png","data":"AQID"}}]}}]}"#,
        );
        let image = camel.first_image("Gemini image").unwrap();
        assert_eq!(image.bytes, vec![1, 2, 3]);
        assert_eq!(image.extension(), "png");

        let snake = gemini(
            r#"{"candidates":[{"content":{"parts":[{"inline_data":{"mime_type":"image/jpeg","data":"AQID"}}]}}]}"#,
        );
        assert_eq!(snake.first_image("Gemini image").unwrap().extension(), "jpeg");
    }

    #[test]
    fn unsupported_image_type_is_no_image() {
        let response = gemini(
            r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/webp","data":"AQID"}}]}}]}"#,
        );
        match response.first_image("Gemini image") {
            Err(ApiError::NoImage { detail, .. }) => assert!(detail.contains("image/webp")),
            other => panic!("expected NoImage, got {:?}", other),
        }
    }

    #[test]
    fn text_only_reply_is_no_image() {
        let response =
            gemini(r#"{"candidates":[{"content":{"parts":[{"text":"I can't draw that"}]}}]}"#);
        match response.first_image("Gemini image") {
            Err(ApiError::NoImage { detail, .. }) => assert!(detail.contains("I can't draw that")),
            other => panic!("expected NoImage, got {:?}", other),
        }
    }

    #[test]
    fn blocked_prompt_mentions_feedback() {
        let response = gemini(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#);
        match response.first_image("Gemini image") {
            Err(ApiError::NoImage { detail, .. }) => assert!(detail.contains("SAFETY")),
            other => panic!("expected NoImage, got {:?}", other),
        }
    }

    #[test]
    fn chat_response_without_content_is_tolerated_by_decoder() {
        let response: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant"}}]}"#).unwrap();
        assert!(response.choices[0].message.content.is_none());
    }

    #[test]
    fn endpoint_joins_base_and_model() {
        let client = GeminiClient::new(
            reqwest::Client::new(),
            "Gemini",
            "https://example.test/v1beta/",
            "gemini-2.5-flash",
            "k",
        );
        assert_eq!(
            client.endpoint(),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[derive(Debug)]
    struct Seen {
        path: String,
        query: Option<String>,
        authorization: Option<String>,
        body: serde_json::Value,
    }

    #[derive(Clone)]
    struct Stub {
        status: axum::http::StatusCode,
        reply: String,
        seen: Arc<std::sync::Mutex<Vec<Seen>>>,
    }

    async fn record(
        axum::extract::State(stub): axum::extract::State<Stub>,
        uri: axum::http::Uri,
        headers: axum::http::HeaderMap,
        body: axum::body::Bytes,
    ) -> (axum::http::StatusCode, String) {
        stub.seen.lock().unwrap().push(Seen {
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            authorization: headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null),
        });
        (stub.status, stub.reply.clone())
    }

    /// Local server answering every request with `reply`; returns its base url.
    async fn stub_server(status: u16, reply: &str) -> (String, Arc<std::sync::Mutex<Vec<Seen>>>) {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let stub = Stub {
            status: axum::http::StatusCode::from_u16(status).unwrap(),
            reply: reply.to_string(),
            seen: seen.clone(),
        };
        let app = axum::Router::new().fallback(record).with_state(stub);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), seen)
    }

    fn local_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    fn chapter() -> OutlineChapter {
        OutlineChapter {
            chapter: "Cells".into(),
            topics: vec!["Membranes".into()],
        }
    }

    #[tokio::test]
    async fn outline_request_sends_key_as_query_and_asks_for_json() {
        let reply = r#"{"candidates":[{"content":{"parts":[
            {"text":"{\"chapters\":[{\"chapter\":\"Cells\",\"topics\":[\"Membranes\"]}]}"}
        ]}}]}"#;
        let (base, seen) = stub_server(200, reply).await;
        let client = GeminiClient::new(
            local_client(),
            "Gemini",
            &format!("{}/v1beta/", base),
            "gemini-2.5-flash",
            "secret",
        );

        let outline = client.extract_outline("Week 1: Cells").await.unwrap();
        assert_eq!(outline.chapters, vec![chapter()]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].path, "/v1beta/models/gemini-2.5-flash:generateContent");
        assert_eq!(seen[0].query.as_deref(), Some("key=secret"));
        assert_eq!(seen[0].authorization, None);
        assert_eq!(
            seen[0].body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        let prompt = seen[0].body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.contains("Week 1: Cells"));
    }

    #[tokio::test]
    async fn content_request_uses_bearer_key_and_json_mode() {
        let reply = r#"{"choices":[{"message":{"content":"{\"title\":\"Cells\",\"topics\":[]}"}}]}"#;
        let (base, seen) = stub_server(200, reply).await;
        let client = ChatClient::new(
            local_client(),
            &format!("{}/chat/completions", base),
            "deepseek-chat",
            "k",
            16000,
        );

        let material = client
            .generate_material(&chapter(), &GenerationSettings::default())
            .await
            .unwrap();
        assert_eq!(material.title, "Cells");

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].path, "/chat/completions");
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer k"));
        assert_eq!(seen[0].body["model"], "deepseek-chat");
        assert_eq!(seen[0].body["max_tokens"], 16000);
        assert_eq!(seen[0].body["response_format"]["type"], "json_object");
        assert_eq!(seen[0].body["messages"][0]["role"], "user");
        assert!(seen[0].body["temperature"].is_number());
    }

    #[tokio::test]
    async fn image_request_carries_ratio_and_size() {
        let reply = r#"{"candidates":[{"content":{"parts":[
            {"inlineData":{"mimeType":"image/png","data":"AQID"}}
        ]}}]}"#;
        let (base, seen) = stub_server(200, reply).await;
        let client = GeminiClient::new(
            local_client(),
            "Gemini image",
            &base,
            "gemini-image",
            "img",
        )
        .with_timeout(Duration::from_secs(5));

        let image = client
            .generate_image(&ImageRequest {
                prompt: "A cell diagram".into(),
                ratio: crate::models::AspectRatio::Standard,
                size: "1K".into(),
            })
            .await
            .unwrap();
        assert_eq!(image.bytes, vec![1, 2, 3]);
        assert_eq!(image.format, ImageFormat::Png);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].query.as_deref(), Some("key=img"));
        let config = &seen[0].body["generationConfig"];
        assert_eq!(config["responseModalities"], json!(["IMAGE"]));
        assert_eq!(config["imageConfig"]["aspectRatio"], "4:3");
        assert_eq!(config["imageConfig"]["imageSize"], "1K");
        assert_eq!(seen[0].body["contents"][0]["parts"][0]["text"], "A cell diagram");
    }

    #[tokio::test]
    async fn error_status_keeps_the_body() {
        let (base, _seen) = stub_server(500, "boom").await;
        let client = ChatClient::new(
            local_client(),
            &format!("{}/chat/completions", base),
            "deepseek-chat",
            "k",
            16000,
        );

        match client
            .generate_material(&chapter(), &GenerationSettings::default())
            .await
        {
            Err(ApiError::Status { status, body, .. }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected Status, got {:?}", other),
        }
    }
}
