//! Receipt OCR through the Gemini `generateContent` endpoint.
//!
//! Every failure (network, timeout, HTTP status, malformed or incomplete
//! JSON) collapses to `None`: the caller falls back to manual entry.

use std::thread;
use std::time::Duration;

use base64::Engine;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{KakeiboError, Result};
use crate::models::Category;
use crate::remote::USER_AGENT;

const OCR_TIMEOUT_SECS: u64 = 10;
const RETRY_DELAY_MS: u64 = 500;
const REQUIRED_FIELDS: &[&str] = &["amount", "merchantName", "date", "category", "confidence"];

/// Structured fields extracted from one receipt. Values that failed
/// validation are `None` and must not be copied onto a draft.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrFields {
    pub amount: Option<u64>,
    pub merchant_name: String,
    pub date: Option<NaiveDate>,
    pub category: Option<Category>,
    pub confidence: f64,
}

pub trait ReceiptScanner {
    fn extract(&self, image: &[u8]) -> Option<OcrFields>;
}

pub fn sniff_mime(image: &[u8]) -> &'static str {
    if image.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if image.len() >= 12 && &image[0..4] == b"RIFF" && &image[8..12] == b"WEBP" {
        "image/webp"
    } else if image.len() >= 12
        && &image[4..8] == b"ftyp"
        && matches!(&image[8..12], b"heic" | b"heix" | b"mif1")
    {
        "image/heic"
    } else {
        "image/jpeg"
    }
}

fn extraction_prompt() -> String {
    let labels: Vec<&str> = Category::ALL.iter().map(|c| c.label()).collect();
    format!(
        "Extract the details of this receipt. Focus on the total amount, the store name and the \
         transaction date. Classify the expense into exactly one of these categories: {}. \
         Return JSON only.",
        labels.join(", ")
    )
}

fn response_schema() -> serde_json::Value {
    let labels: Vec<&str> = Category::ALL.iter().map(|c| c.label()).collect();
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "amount": { "type": "NUMBER", "description": "Total amount paid" },
            "merchantName": { "type": "STRING", "description": "Store name" },
            "date": { "type": "STRING", "description": "Transaction date (YYYY-MM-DD)" },
            "category": { "type": "STRING", "enum": labels, "description": "Expense category" },
            "confidence": { "type": "NUMBER", "description": "OCR confidence 0-1" }
        },
        "required": REQUIRED_FIELDS,
    })
}

/// Validate the model's JSON text. Unparseable JSON, a missing field, or a
/// non-string merchant, date or category and a non-numeric confidence reject
/// the whole result. An amount that is not a non-negative whole number, an
/// out-of-set category or an unparseable date only blank that one field.
pub fn parse_extraction(text: &str) -> Option<OcrFields> {
    let value: serde_json::Value = serde_json::from_str(text.trim()).ok()?;
    let obj = value.as_object()?;
    if REQUIRED_FIELDS.iter().any(|f| !obj.contains_key(*f)) {
        return None;
    }

    let amount = obj["amount"]
        .as_f64()
        .filter(|a| a.is_finite() && *a >= 0.0 && a.fract() == 0.0 && *a <= u64::MAX as f64)
        .map(|a| a as u64);
    let merchant_name = obj["merchantName"].as_str()?.trim().to_string();
    let date = NaiveDate::parse_from_str(obj["date"].as_str()?.trim(), "%Y-%m-%d").ok();
    let category = Category::lookup(obj["category"].as_str()?);
    let confidence = obj["confidence"].as_f64()?;
    let confidence = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };

    Some(OcrFields {
        amount,
        merchant_name,
        date,
        category,
        confidence,
    })
}

// ── Gemini wire types ───────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text {
        text: String,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    response_schema: serde_json::Value,
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
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

// ── Client ──────────────────────────────────────────────────────────

enum Attempt {
    Done(Option<OcrFields>),
    Transient(String),
}

pub struct GeminiScanner {
    http: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
    retry_delay: Duration,
}

impl GeminiScanner {
    pub fn new(endpoint: &str, model: &str, api_key: &str) -> Result<Self> {
        Self::with_timeout(endpoint, model, api_key, Duration::from_secs(OCR_TIMEOUT_SECS))
    }

    pub fn with_timeout(endpoint: &str, model: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| KakeiboError::Settings(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    fn url(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model)
    }

    fn request_body(&self, image: &[u8]) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: sniff_mime(image).to_string(),
                            data: base64::engine::general_purpose::STANDARD.encode(image),
                        },
                    },
                    Part::Text {
                        text: extraction_prompt(),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: response_schema(),
            },
        }
    }

    fn attempt(&self, body: &GenerateRequest) -> Attempt {
        let resp = match self
            .http
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
        {
            Ok(resp) => resp,
            Err(e) => return Attempt::Transient(e.to_string()),
        };

        let status = resp.status().as_u16();
        if status == 429 || status >= 500 {
            return Attempt::Transient(format!("HTTP {status}"));
        }
        if !resp.status().is_success() {
            tracing::warn!(status, "receipt scan rejected");
            return Attempt::Done(None);
        }

        let parsed: GenerateResponse = match resp.json() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "receipt scan returned an unreadable body");
                return Attempt::Done(None);
            }
        };
        let Some(text) = parsed.text() else {
            tracing::warn!("receipt scan returned no candidates");
            return Attempt::Done(None);
        };
        let fields = parse_extraction(&text);
        if fields.is_none() {
            tracing::warn!(raw = %text.chars().take(200).collect::<String>(), "receipt scan JSON did not match the schema");
        }
        Attempt::Done(fields)
    }
}

/// Run `attempt`, and once more after `delay` if the first try was transient.
fn retry_once(delay: Duration, mut attempt: impl FnMut() -> Attempt) -> Option<OcrFields> {
    match attempt() {
        Attempt::Done(fields) => fields,
        Attempt::Transient(reason) => {
            tracing::warn!(%reason, "receipt scan failed; retrying once");
            thread::sleep(delay);
            match attempt() {
                Attempt::Done(fields) => fields,
                Attempt::Transient(reason) => {
                    tracing::warn!(%reason, "receipt scan failed after retry");
                    None
                }
            }
        }
    }
}

impl ReceiptScanner for GeminiScanner {
    /// At most two attempts: the second only after a transient failure
    /// (transport error, timeout, HTTP 429 or 5xx).
    fn extract(&self, image: &[u8]) -> Option<OcrFields> {
        if image.is_empty() {
            return None;
        }
        let body = self.request_body(image);
        retry_once(self.retry_delay, || self.attempt(&body))
    }
}
