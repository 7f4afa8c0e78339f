use crate::config::Settings;
use crate::http::build_client;
use crate::models::{AnalysisResult, ClassificationError};
use crate::vision::response::parse_analysis;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1000;
/// The Messages API caps images at 5 MB of base64; stay under it.
pub const MAX_BASE64_BYTES: usize = 4 * 1024 * 1024;

const SYSTEM_PROMPT: &str = r#"
You identify objects in product photos so they can be searched for on French second-hand marketplaces.

1. Identify the main object in the image.
2. Classify it as exactly one of: book, clothing, electronics, furniture, tools, general.
   - book: books, magazines, comics, textbooks
   - clothing: clothes, shoes, accessories, bags, jewelry
   - electronics: phones, computers, cameras, TVs, audio equipment
   - furniture: tables, chairs, sofas, beds, storage
   - tools: hand tools, power tools, gardening equipment
   - general: everything else (toys, sports, home decor, ...)
3. Write 1 to 3 search queries IN FRENCH, each at most 200 characters, that would find similar items.

Respond with a single JSON object and nothing else:
{"object_type": "<category>", "description": "<short description>", "search_queries": [{"query": "<french query>", "confidence": <0..1>}], "confidence": <0..1>}

Example:
{"object_type": "book", "description": "Roman policier français", "search_queries": [{"query": "livre policier", "confidence": 0.9}, {"query": "roman thriller français", "confidence": 0.85}], "confidence": 0.92}
"#;

const USER_INSTRUCTION: &str =
    "Analyze this image and identify the object for French marketplace search. Return JSON only.";

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl VisionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            api_base: settings.anthropic_api_base.clone(),
            api_key: settings.anthropic_api_key.clone(),
            model: settings.claude_model.clone(),
            timeout: settings.vision_api_timeout,
        }
    }
}

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("ANTHROPIC_API_KEY is not set")]
    MissingApiKey,
    #[error("image too large for the vision api: {0} base64 bytes")]
    ImageTooLarge(usize),
    #[error("vision api request timed out")]
    Timeout,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid analysis json: {0}")]
    InvalidJson(String),
    #[error("unusable analysis: {0}")]
    Classification(#[from] ClassificationError),
}

pub struct VisionClient {
    http: Client,
    config: VisionConfig,
}

impl VisionClient {
    pub fn new(config: VisionConfig) -> Self {
        Self {
            http: build_client(config.timeout),
            config,
        }
    }

    pub fn with_client(config: VisionConfig, http: Client) -> Self {
        Self { http, config }
    }

    pub async fn analyze(
        &self,
        image: &[u8],
        media_type: &str,
    ) -> Result<AnalysisResult, VisionError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(VisionError::MissingApiKey)?;

        let data = BASE64.encode(image);
        if data.len() > MAX_BASE64_BYTES {
            return Err(VisionError::ImageTooLarge(data.len()));
        }

        let body = MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: MAX_TOKENS,
            system: SYSTEM_PROMPT.trim().to_string(),
            messages: vec![MessageParam {
                role: "user".into(),
                content: vec![
                    ContentBlock::Image {
                        source: ImageSource {
                            source_type: "base64".into(),
                            media_type: media_type.to_string(),
                            data,
                        },
                    },
                    ContentBlock::Text {
                        text: USER_INSTRUCTION.into(),
                    },
                ],
            }],
        };

        let base = self.config.api_base.trim().trim_end_matches('/');
        let response = self
            .http
            .post(format!("{base}/messages"))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    VisionError::Timeout
                } else {
                    VisionError::Http(err.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(VisionError::Http(format!("HTTP {}", response.status())));
        }

        let payload: MessagesResponse = response
            .json()
            .await
            .map_err(|err| VisionError::InvalidResponse(err.to_string()))?;

        let text = payload
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlockResponse::Text { text } => Some(text),
                ContentBlockResponse::Other => None,
            })
            .ok_or_else(|| VisionError::InvalidResponse("missing text block".into()))?;
        debug!(target = "photosearch.vision", raw = %text, "vision_raw_response");

        let analysis = parse_analysis(&text)?;
        info!(
            target = "photosearch.vision",
            object_type = analysis.object_type().as_str(),
            confidence = analysis.confidence(),
            queries = analysis.search_queries().len(),
            input_tokens = payload.usage.as_ref().map(|u| u.input_tokens),
            output_tokens = payload.usage.as_ref().map(|u| u.output_tokens),
            "image_analyzed"
        );
        Ok(analysis)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<MessageParam>,
}

#[derive(Debug, Serialize)]
struct MessageParam {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Image { source: ImageSource },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlockResponse>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlockResponse {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}
