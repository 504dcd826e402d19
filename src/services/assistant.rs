//! Generative-AI assistant and web search, proxied so the API key never
//! reaches the browser.

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::models::assistant::{SearchResult, SearchSource};
use crate::services::metrics;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const NO_ANSWER: &str = "Não consegui encontrar uma resposta.";
const NO_SUMMARY: &str = "Não foi possível gerar um resumo.";
const UNKNOWN_SOURCE: &str = "Fonte desconhecida";

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("O assistente não está configurado neste servidor.")]
    NotConfigured,
    #[error("{0}")]
    EmptyPrompt(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("API error (status {status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
}

pub type AssistantResult<T> = Result<T, AssistantError>;

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<Content>,
    pub grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize, Debug, Default)]
pub struct GroundingChunk {
    pub web: Option<WebSource>,
}

#[derive(Deserialize, Debug, Default)]
pub struct WebSource {
    pub uri: Option<String>,
    pub title: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first candidate, thought parts excluded.
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|p| p.thought != Some(true))
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    /// Web sources the answer was grounded on, deduplicated by uri. The
    /// first occurrence fixes the position, the last one the title.
    pub fn sources(&self) -> Vec<SearchSource> {
        let chunks = self
            .candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .map(|m| m.grounding_chunks.as_slice())
            .unwrap_or_default();

        let mut sources: Vec<SearchSource> = Vec::new();
        for web in chunks.iter().filter_map(|c| c.web.as_ref()) {
            let uri = web.uri.clone().unwrap_or_default();
            if uri.is_empty() {
                continue;
            }
            let title = web
                .title
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());
            match sources.iter_mut().find(|s| s.uri == uri) {
                Some(existing) => existing.title = title,
                None => sources.push(SearchSource { title, uri }),
            }
        }
        sources
    }
}

pub fn intranet_prompt(question: &str) -> String {
    format!(
        "Contexto: Você é um assistente de IA para a intranet de uma empresa. \
         Responda às perguntas dos funcionários de forma concisa e profissional. \
         Pergunta: \"{question}\""
    )
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub async fn generate(
        &self,
        text: &str,
        google_search: bool,
    ) -> AssistantResult<GenerateContentResponse> {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": text }] }],
        });
        if google_search {
            body["tools"] = json!([{ "googleSearch": {} }]);
        }

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AssistantError::Api {
                status: response.status(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// The assistant as exposed to routes; unconfigured when no API key is set.
#[derive(Clone, Default)]
pub struct AssistantService {
    client: Option<GeminiClient>,
}

impl AssistantService {
    pub fn new(client: Option<GeminiClient>) -> Self {
        Self { client }
    }

    fn client(&self) -> AssistantResult<&GeminiClient> {
        self.client.as_ref().ok_or(AssistantError::NotConfigured)
    }

    pub async fn ask(&self, prompt: &str) -> AssistantResult<String> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AssistantError::EmptyPrompt("Digite uma pergunta."));
        }
        let result = async {
            let response = self.client()?.generate(&intranet_prompt(prompt), false).await?;
            let text = response.text();
            Ok::<_, AssistantError>(if text.is_empty() { NO_ANSWER.to_string() } else { text })
        }
        .await;
        record("ask", &result);
        result
    }

    pub async fn search(&self, query: &str) -> AssistantResult<SearchResult> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AssistantError::EmptyPrompt("Digite um termo de busca."));
        }
        let result = async {
            let response = self.client()?.generate(query, true).await?;
            Ok::<_, AssistantError>(search_result(&response))
        }
        .await;
        record("search", &result);
        result
    }
}

pub fn search_result(response: &GenerateContentResponse) -> SearchResult {
    let summary = response.text();
    if summary.is_empty() {
        return SearchResult {
            summary: NO_SUMMARY.to_string(),
            sources: Vec::new(),
        };
    }
    SearchResult {
        summary,
        sources: response.sources(),
    }
}

fn record<T>(kind: &str, result: &AssistantResult<T>) {
    let status = match result {
        Ok(_) => "success",
        Err(AssistantError::NotConfigured) => "disabled",
        Err(_) => "failure",
    };
    metrics::ASSISTANT_COUNTER.with_label_values(&[kind, status]).inc();
}
