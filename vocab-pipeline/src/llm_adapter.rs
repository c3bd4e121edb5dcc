use crate::traits::JudgmentOracle;
use crate::types::{Judgment, OracleConfig, PipelineError, Result};
use crate::utils::text::strip_code_fence;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Dictionary-validation prompt for one word.
pub fn build_prompt(word: &str) -> String {
    let data = serde_json::to_string(&[word]).unwrap_or_else(|_| format!("[\"{}\"]", word));
    format!(
        "TASK: DICTIONARY VALIDATION CHECK\n\
         You are a strict database verification tool. Your ONLY job is to check if the following strings exist \
         in at least one of these specific major dictionaries:\n\
         1. Oxford English Dictionary (OED)\n\
         2. Merriam-Webster Unabridged\n\
         3. Collins English Dictionary\n\
         4. Cambridge Dictionary\n\
         5. Wordnik (only if backed by a valid source like American Heritage or Century)\n\n\
         RULES:\n\
         1. IF FOUND in any of the above -> SCORE 1.0\n\
         2. IF NOT FOUND -> SCORE 0.0\n\
         3. IGNORE wiktionary-only words, urban dictionary, or generic internet slang.\n\
         4. IGNORE foreign words unless they are established English loanwords in these dictionaries.\n\
         5. DO NOT GUESS. If you are not 100% sure it is in one of these books, score 0.0.\n\n\
         OUTPUT FORMAT (JSON ONLY):\n\
         {{\"word\": \"example\", \"score\": 1.0, \"reasoning\": \"Found in OED (archaic).\"}}\n\n\
         DATA TO CHECK: {}",
        data
    )
}

fn score_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a judgment for `word` out of a model reply.
///
/// Accepts a bare JSON object or an array of them, optionally wrapped in a
/// Markdown code fence. The score must lie in `[0, 1]`.
pub fn parse_judgment(word: &str, reply: &str) -> Result<Judgment> {
    let body = strip_code_fence(reply);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| PipelineError::MalformedResponse(format!("reply for {} is not JSON: {}", word, e)))?;

    let item = match &value {
        Value::Array(items) => items
            .iter()
            .find(|item| {
                item.get("word")
                    .and_then(Value::as_str)
                    .is_some_and(|w| w.eq_ignore_ascii_case(word))
            })
            .or_else(|| if items.len() == 1 { items.first() } else { None }),
        Value::Object(_) => Some(&value),
        _ => None,
    }
    .ok_or_else(|| PipelineError::MalformedResponse(format!("no judgment for {} in reply", word)))?;

    let score = item
        .get("score")
        .and_then(score_of)
        .filter(|s| s.is_finite() && (0.0..=1.0).contains(s))
        .ok_or_else(|| PipelineError::MalformedResponse(format!("missing or out-of-range score for {}", word)))?;
    let reasoning = item
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok(Judgment {
        word: word.to_string(),
        score,
        reasoning,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Gemini `generateContent` as a judgment oracle.
pub struct GeminiOracle {
    client: Client,
    config: OracleConfig,
    api_key: String,
}

impl GeminiOracle {
    pub fn new(config: OracleConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| PipelineError::Config("an API key is required (GOOGLE_API_KEY or --api-key)".to_string()))?;
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, config, api_key })
    }

    fn endpoint(&self) -> Result<Url> {
        let base = self.config.api_base.trim_end_matches('/');
        let model = self.config.model.trim_start_matches('/');
        Ok(Url::parse(&format!("{}/{}:generateContent", base, model))?)
    }
}

#[async_trait]
impl JudgmentOracle for GeminiOracle {
    fn oracle_name(&self) -> String {
        self.config.model.clone()
    }

    async fn assess(&self, word: &str) -> Result<Judgment> {
        let prompt = build_prompt(word);
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: &prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                response_mime_type: "application/json",
            },
        };

        let response = self
            .client
            .post(self.endpoint()?)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(PipelineError::RateLimited { retry_after_secs });
        }
        if status.is_server_error() {
            return Err(PipelineError::Transient(format!("oracle returned HTTP {}", status)));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(PipelineError::Config(format!("oracle rejected the API key (HTTP {})", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::MalformedResponse(format!("HTTP {}: {}", status, body)));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::MalformedResponse(e.to_string()))?;
        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        debug!("Oracle reply for {}: {}", word, text);

        parse_judgment(word, &text)
    }
}
