use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use booksum_core::{OutputSchema, TextGenerator};
use reqwest::{header::HeaderValue, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::runtime::Runtime;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

const MAX_RETRIES: usize = 6;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const OPENAI_DEFAULT_CONTEXT: usize = 128_000;
const LOCAL_DEFAULT_CONTEXT: usize = 32_768;
const LOCAL_SUMMARY_WORDS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    Ollama,
    OpenAi,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini",
            LlmProvider::Ollama => "ollama",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "gemini" => Some(LlmProvider::Gemini),
            "ollama" => Some(LlmProvider::Ollama),
            "openai" => Some(LlmProvider::OpenAi),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini-2.5-flash-lite-preview-06-17",
            LlmProvider::Ollama => "llama3.1",
            LlmProvider::OpenAi => "gpt-4.1-mini",
            LlmProvider::Local => "local",
        }
    }

    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            LlmProvider::Gemini => Some("https://generativelanguage.googleapis.com/v1beta"),
            LlmProvider::Ollama => Some("http://localhost:11434"),
            LlmProvider::OpenAi => Some("https://api.openai.com/v1"),
            LlmProvider::Local => None,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, LlmProvider::Gemini | LlmProvider::OpenAi)
    }
}

/// Everything needed to reach one model. Credentials are passed in
/// explicitly; nothing here reads the environment.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Duration,
    /// Overrides the context length reported by the provider.
    pub context_tokens: Option<usize>,
    pub max_output_tokens: Option<u32>,
}

impl LlmConfig {
    pub fn new(provider: LlmProvider) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            api_key: None,
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            context_tokens: None,
            max_output_tokens: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_context_tokens(mut self, tokens: usize) -> Self {
        self.context_tokens = Some(tokens);
        self
    }

    fn base_url(&self) -> String {
        self.base_url
            .clone()
            .or_else(|| self.provider.default_base_url().map(str::to_string))
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string()
    }
}

/// Blocking [`TextGenerator`] over one of the supported providers. Model
/// metadata is read once, when the client is created.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    runtime: Arc<Runtime>,
    provider: LlmProvider,
    model: String,
    config: ProviderConfig,
    max_output_tokens: Option<u32>,
    context_tokens: usize,
    structured: bool,
}

#[derive(Clone)]
enum ProviderConfig {
    Gemini(GeminiConfig),
    Ollama(OllamaConfig),
    OpenAi(OpenAiConfig),
    Local,
}

#[derive(Clone)]
struct GeminiConfig {
    api_key: String,
    base_url: String,
}

#[derive(Clone)]
struct OllamaConfig {
    base_url: String,
}

#[derive(Clone)]
struct OpenAiConfig {
    api_key: String,
    base_url: String,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        if config.model.trim().is_empty() {
            bail!("model name must not be empty");
        }
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build http client")?;
        let runtime = Runtime::new().context("failed to create tokio runtime")?;
        let provider_config = match config.provider {
            LlmProvider::Gemini => ProviderConfig::Gemini(GeminiConfig {
                api_key: require_api_key(&config)?,
                base_url: config.base_url(),
            }),
            LlmProvider::Ollama => ProviderConfig::Ollama(OllamaConfig {
                base_url: config.base_url(),
            }),
            LlmProvider::OpenAi => ProviderConfig::OpenAi(OpenAiConfig {
                api_key: require_api_key(&config)?,
                base_url: config.base_url(),
            }),
            LlmProvider::Local => ProviderConfig::Local,
        };
        let mut client = Self {
            http,
            runtime: Arc::new(runtime),
            provider: config.provider,
            model: config.model.clone(),
            config: provider_config,
            max_output_tokens: config.max_output_tokens,
            context_tokens: 0,
            structured: true,
        };
        let metadata = client
            .runtime
            .block_on(client.describe(config.context_tokens))
            .with_context(|| {
                format!(
                    "failed to read metadata for {} model {}",
                    client.provider.as_str(),
                    client.model
                )
            })?;
        client.context_tokens = metadata.context_tokens;
        client.structured = metadata.structured;
        debug!(
            provider = client.provider.as_str(),
            model = %client.model,
            context_tokens = client.context_tokens,
            structured = client.structured,
            "llm client ready"
        );
        Ok(client)
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn complete(&self, prompt: &str, schema: Option<&OutputSchema>) -> Result<String> {
        debug!(
            provider = self.provider.as_str(),
            model = %self.model,
            prompt_chars = prompt.len(),
            structured = schema.is_some(),
            "sending prompt"
        );
        match &self.config {
            ProviderConfig::Gemini(cfg) => self.complete_gemini(cfg, prompt, schema).await,
            ProviderConfig::Ollama(cfg) => self.complete_ollama(cfg, prompt, schema).await,
            ProviderConfig::OpenAi(cfg) => self.complete_openai(cfg, prompt, schema).await,
            ProviderConfig::Local => Ok(local_response(prompt, schema)),
        }
    }

    pub fn complete_blocking(&self, prompt: &str, schema: Option<&OutputSchema>) -> Result<String> {
        self.runtime.block_on(self.complete(prompt, schema))
    }

    async fn describe(&self, context_override: Option<usize>) -> Result<ModelMetadata> {
        match &self.config {
            ProviderConfig::Gemini(cfg) => {
                let metadata = self.gemini_metadata(cfg).await?;
                Ok(ModelMetadata {
                    context_tokens: context_override.unwrap_or(metadata.input_token_limit),
                    structured: metadata
                        .supported_generation_methods
                        .iter()
                        .any(|method| method == "generateContent"),
                })
            }
            ProviderConfig::Ollama(cfg) => {
                let context_tokens = match context_override {
                    Some(tokens) => tokens,
                    None => self.ollama_context_length(cfg).await?,
                };
                Ok(ModelMetadata {
                    context_tokens,
                    structured: true,
                })
            }
            ProviderConfig::OpenAi(_) => Ok(ModelMetadata {
                context_tokens: context_override.unwrap_or(OPENAI_DEFAULT_CONTEXT),
                structured: true,
            }),
            ProviderConfig::Local => Ok(ModelMetadata {
                context_tokens: context_override.unwrap_or(LOCAL_DEFAULT_CONTEXT),
                structured: true,
            }),
        }
    }

    async fn gemini_metadata(&self, cfg: &GeminiConfig) -> Result<GeminiModelInfo> {
        let url = format!("{}/models/{}", cfg.base_url, self.model);
        let response = self
            .send_with_retry("gemini", || {
                self.http.get(&url).query(&[("key", cfg.api_key.as_str())])
            })
            .await?;
        let value = decode_body("gemini", response).await?;
        serde_json::from_value(value).context("failed to decode gemini model metadata")
    }

    async fn ollama_context_length(&self, cfg: &OllamaConfig) -> Result<usize> {
        let url = format!("{}/api/show", cfg.base_url);
        let payload = json!({ "model": self.model });
        let response = self
            .send_with_retry("ollama", || self.http.post(&url).json(&payload))
            .await?;
        let value = decode_body("ollama", response).await?;
        let info = value
            .get("model_info")
            .ok_or_else(|| anyhow!("ollama did not return model_info for {}", self.model))?;
        context_length_from_model_info(info)
            .ok_or_else(|| anyhow!("ollama model {} does not report a context length", self.model))
    }

    async fn complete_gemini(
        &self,
        cfg: &GeminiConfig,
        prompt: &str,
        schema: Option<&OutputSchema>,
    ) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", cfg.base_url, self.model);
        let mut generation = Map::new();
        if let Some(schema) = schema.filter(|_| self.structured) {
            generation.insert("responseMimeType".into(), json!("application/json"));
            generation.insert("responseSchema".into(), gemini_schema(schema.schema()));
        }
        if let Some(max) = self.max_output_tokens {
            generation.insert("maxOutputTokens".into(), json!(max));
        }
        let payload = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": generation,
        });
        let response = self
            .send_with_retry("gemini", || {
                self.http
                    .post(&url)
                    .query(&[("key", cfg.api_key.as_str())])
                    .json(&payload)
            })
            .await?;
        let value = decode_body("gemini", response).await?;
        let response: GeminiResponse =
            serde_json::from_value(value).context("failed to decode gemini response")?;
        response
            .text()
            .ok_or_else(|| anyhow!("missing text in Gemini response"))
    }

    async fn complete_ollama(
        &self,
        cfg: &OllamaConfig,
        prompt: &str,
        schema: Option<&OutputSchema>,
    ) -> Result<String> {
        let url = format!("{}/api/generate", cfg.base_url);
        let mut payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        if let Some(schema) = schema {
            payload["format"] = schema.schema().clone();
        }
        if let Some(max) = self.max_output_tokens {
            payload["options"] = json!({ "num_predict": max });
        }
        let response = self
            .send_with_retry("ollama", || self.http.post(&url).json(&payload))
            .await?;
        let value = decode_body("ollama", response).await?;
        value
            .get("response")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("missing text in Ollama response"))
    }

    async fn complete_openai(
        &self,
        cfg: &OpenAiConfig,
        prompt: &str,
        schema: Option<&OutputSchema>,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", cfg.base_url);
        let mut payload = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if let Some(schema) = schema {
            payload["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": schema.name(), "schema": schema.schema() },
            });
        }
        if let Some(max) = self.max_output_tokens {
            payload["max_tokens"] = json!(max);
        }
        let response = self
            .send_with_retry("openai", || {
                self.http
                    .post(&url)
                    .bearer_auth(&cfg.api_key)
                    .json(&payload)
            })
            .await?;
        let value = decode_body("openai", response).await?;
        extract_openai_text(&value).ok_or_else(|| anyhow!("missing text in OpenAI response"))
    }

    /// Sends the request built by `build`, retrying transport failures and
    /// HTTP 429 with exponential backoff. Other statuses are returned as is.
    async fn send_with_retry<F>(&self, label: &str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match build().send().await {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt > MAX_RETRIES {
                        return Err(err).with_context(|| format!("{label} request failed"));
                    }
                    let wait = backoff_delay(attempt, None);
                    warn!(provider = label, attempt, ?wait, error = %err, "request failed, retrying");
                    sleep(wait).await;
                    continue;
                }
            };
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt > MAX_RETRIES {
                    bail!("{label} rate limited after {MAX_RETRIES} retries");
                }
                let wait = backoff_delay(attempt, response.headers().get("retry-after"));
                warn!(provider = label, attempt, ?wait, "rate limited, backing off");
                sleep(wait).await;
                continue;
            }
            return Ok(response);
        }
    }
}

impl TextGenerator for LlmClient {
    fn name(&self) -> &str {
        &self.model
    }

    fn max_context_tokens(&self) -> Result<usize> {
        Ok(self.context_tokens)
    }

    fn supports_structured_output(&self) -> bool {
        self.structured
    }

    fn generate(&self, prompt: &str, schema: Option<&OutputSchema>) -> Result<String> {
        self.complete_blocking(prompt, schema)
    }
}

struct ModelMetadata {
    context_tokens: usize,
    structured: bool,
}

fn require_api_key(config: &LlmConfig) -> Result<String> {
    match config.api_key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => Err(anyhow!(
            "an API key is required for {} models",
            config.provider.as_str()
        )),
    }
}

fn backoff_delay(attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(value) = retry_after {
        if let Ok(text) = value.to_str() {
            if let Ok(secs) = text.trim().parse::<u64>() {
                return Duration::from_secs(secs.max(1));
            }
        }
    }
    let capped = attempt.min(6) as u32;
    Duration::from_secs(1u64 << capped)
}

async fn decode_body(label: &str, response: Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        bail!("{label} returned error (status {status}): {body}");
    }
    serde_json::from_str(&body).with_context(|| format!("failed to decode {label} response"))
}

/// Reads `<architecture>.context_length` from an Ollama `model_info` map.
fn context_length_from_model_info(info: &Value) -> Option<usize> {
    let arch = info.get("general.architecture")?.as_str()?;
    info.get(format!("{arch}.context_length"))?
        .as_u64()
        .map(|len| len as usize)
}

/// Gemini accepts an OpenAPI subset: upper-case type names and no
/// `additionalProperties`.
fn gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                match key.as_str() {
                    "additionalProperties" | "$schema" | "title" => {}
                    "type" => {
                        let upper = value
                            .as_str()
                            .map(|ty| json!(ty.to_uppercase()))
                            .unwrap_or_else(|| value.clone());
                        out.insert(key.clone(), upper);
                    }
                    _ => {
                        out.insert(key.clone(), gemini_schema(value));
                    }
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(gemini_schema).collect()),
        other => other.clone(),
    }
}

fn extract_openai_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(Value::as_str))
        .map(str::to_string)
}

/// Offline stand-in: the first words of the passage embedded in the prompt.
fn local_response(prompt: &str, schema: Option<&OutputSchema>) -> String {
    let summary = summarize_text(prompt_body(prompt), LOCAL_SUMMARY_WORDS);
    match schema {
        Some(_) => json!({ "summary": summary, "themes": [] }).to_string(),
        None => summary,
    }
}

/// Longest paragraph after the leading instructions, without a `Label:` line.
fn prompt_body(prompt: &str) -> &str {
    let paragraphs: Vec<&str> = prompt
        .split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .collect();
    let skip = usize::from(paragraphs.len() > 1);
    let body = paragraphs
        .iter()
        .skip(skip)
        .max_by_key(|paragraph| paragraph.len())
        .copied()
        .unwrap_or_default();
    match body.split_once('\n') {
        Some((label, rest)) if label.trim_end().ends_with(':') => rest,
        _ => body,
    }
}

fn summarize_text(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

#[derive(Deserialize)]
struct GeminiModelInfo {
    #[serde(rename = "inputTokenLimit")]
    input_token_limit: usize,
    #[serde(rename = "supportedGenerationMethods", default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

impl GeminiResponse {
    fn text(self) -> Option<String> {
        let candidate = self.candidates?.into_iter().next()?;
        let text: String = candidate
            .content?
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect();
        Some(text).filter(|text| !text.is_empty())
    }
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}
