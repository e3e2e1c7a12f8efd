//! LLM-assisted duplicate detection
//!
//! Unmatched entities and contacts are cross-paired, scored by cheap rules,
//! and pairs above the preliminary gate go to an LLM judge. The judge's
//! JSON is parsed defensively; malformed responses are provider errors.
//! On persistent LLM failure the engine degrades to rule-only reporting.

use async_trait::async_trait;
use levenshtein::levenshtein;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use super::matcher::{normalize_name, normalize_phone};
use super::source::ExternalContact;
use crate::error::{MnemoError, Result};
use crate::types::Entity;

/// Minimum rule-based score for a pair to reach the LLM
pub const PRELIMINARY_SCORE_GATE: u32 = 20;

/// Per-call timeout for the judge
const JUDGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Confidence scale the judge is asked to follow
pub const JUDGE_SYSTEM_PROMPT: &str = "You compare two contact records and decide whether they \
describe the same person. Respond with a single JSON object: \
{\"confidence\": 0-100, \"reasoning\": \"...\", \"isDuplicate\": true|false}. \
Confidence scale: 100 exact match, 90-99 very likely the same person, \
70-89 likely, 50-69 possibly, below 50 different people.";

/// Verdict returned by the duplicate judge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateVerdict {
    pub confidence: u8,
    #[serde(default)]
    pub reasoning: String,
    #[serde(rename = "isDuplicate", alias = "is_duplicate")]
    pub is_duplicate: bool,
}

/// Trait for the LLM duplicate judge
#[async_trait]
pub trait DuplicateJudge: Send + Sync {
    /// Classify one candidate pair, given both sides as JSON documents
    async fn judge(
        &self,
        left: &serde_json::Value,
        right: &serde_json::Value,
    ) -> Result<DuplicateVerdict>;

    /// Model name for cost accounting
    fn model_name(&self) -> &str;
}

/// Rule-based preliminary score for a cross-pair (0..100-ish scale;
/// pairs scoring over [`PRELIMINARY_SCORE_GATE`] are LLM candidates)
pub fn preliminary_score(entity: &Entity, contact: &ExternalContact) -> u32 {
    let mut score = 0u32;

    // name: exact, near (edit distance), or word overlap
    let entity_name = normalize_name(&entity.name);
    let contact_name = normalize_name(&contact.name);
    if !entity_name.is_empty() && entity_name == contact_name {
        score += 40;
    } else if !entity_name.is_empty() && !contact_name.is_empty() {
        if levenshtein(&entity_name, &contact_name) <= 2 {
            score += 30;
        } else {
            let entity_words: HashSet<&str> = entity_name.split(' ').collect();
            let contact_words: HashSet<&str> = contact_name.split(' ').collect();
            let shared = entity_words.intersection(&contact_words).count();
            if shared > 0 {
                score += 15 * shared.min(2) as u32;
            }
        }
    }

    // shared email domain
    if let Some(entity_domain) = entity.email.as_deref().and_then(email_domain) {
        if contact
            .emails
            .iter()
            .filter_map(|e| email_domain(e))
            .any(|d| d == entity_domain)
        {
            score += 15;
        }
    }

    // phone: digits match
    if let Some(entity_phone) = entity.phone.as_deref().map(normalize_phone) {
        if !entity_phone.is_empty()
            && contact
                .phones
                .iter()
                .any(|p| normalize_phone(p) == entity_phone)
        {
            score += 25;
        }
    }

    // organization: exact or near
    if let (Some(entity_org), Some(contact_org)) =
        (entity.company.as_deref(), contact.organization.as_deref())
    {
        let a = entity_org.trim().to_lowercase();
        let b = contact_org.trim().to_lowercase();
        if !a.is_empty() && (a == b || a.starts_with(&b) || b.starts_with(&a)) {
            score += 15;
        }
    }

    // title
    if let (Some(entity_title), Some(contact_title)) =
        (entity.title.as_deref(), contact.title.as_deref())
    {
        if entity_title.trim().eq_ignore_ascii_case(contact_title.trim()) {
            score += 5;
        }
    }

    score
}

fn email_domain(email: &str) -> Option<String> {
    email.trim().rsplit_once('@').map(|(_, d)| d.to_lowercase())
}

/// Parse a judge response defensively. Accepts the JSON object anywhere in
/// the text and numeric confidence as int or float.
pub fn parse_verdict(text: &str) -> Result<DuplicateVerdict> {
    let start = text.find('{');
    let end = text.rfind('}');
    let (Some(start), Some(end)) = (start, end) else {
        return Err(MnemoError::Provider(
            "judge response contains no JSON object".to_string(),
        ));
    };
    if end < start {
        return Err(MnemoError::Provider(
            "judge response contains no JSON object".to_string(),
        ));
    }

    let value: serde_json::Value = serde_json::from_str(&text[start..=end])
        .map_err(|e| MnemoError::Provider(format!("malformed judge JSON: {}", e)))?;

    let confidence = value
        .get("confidence")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| MnemoError::Provider("judge response missing confidence".to_string()))?;
    if !(0.0..=100.0).contains(&confidence) {
        return Err(MnemoError::Provider(format!(
            "judge confidence {} out of range",
            confidence
        )));
    }

    let is_duplicate = value
        .get("isDuplicate")
        .or_else(|| value.get("is_duplicate"))
        .and_then(|v| v.as_bool())
        .ok_or_else(|| MnemoError::Provider("judge response missing isDuplicate".to_string()))?;

    let reasoning = value
        .get("reasoning")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    Ok(DuplicateVerdict {
        confidence: confidence.round() as u8,
        reasoning,
        is_duplicate,
    })
}

/// Call the judge with retries and exponential backoff (1s, 2s, 4s by
/// default, scaled by `base_delay`)
pub async fn judge_with_retry(
    judge: &dyn DuplicateJudge,
    left: &serde_json::Value,
    right: &serde_json::Value,
    max_retries: u32,
    base_delay: Duration,
) -> Result<DuplicateVerdict> {
    let mut attempt = 0u32;
    loop {
        let result = tokio::time::timeout(JUDGE_TIMEOUT, judge.judge(left, right))
            .await
            .map_err(|_| MnemoError::Timeout("duplicate judge call".to_string()))
            .and_then(|r| r);

        match result {
            Ok(verdict) => return Ok(verdict),
            Err(e) if attempt < max_retries && e.is_retryable() => {
                let backoff = base_delay * 2u32.pow(attempt);
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..100));
                tracing::warn!(attempt, error = %e, "judge call failed, backing off");
                tokio::time::sleep(backoff + jitter).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// OpenAI-compatible chat-completion judge
pub struct OpenAiJudge {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiJudge {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: model.into(),
        }
    }
}

#[async_trait]
impl DuplicateJudge for OpenAiJudge {
    async fn judge(
        &self,
        left: &serde_json::Value,
        right: &serde_json::Value,
    ) -> Result<DuplicateVerdict> {
        let user_prompt = format!(
            "Contact A:\n{}\n\nContact B:\n{}",
            serde_json::to_string_pretty(left)?,
            serde_json::to_string_pretty(right)?,
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": JUDGE_SYSTEM_PROMPT},
                    {"role": "user", "content": user_prompt},
                ],
                "temperature": 0,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MnemoError::Provider(format!(
                "LLM API error {}: {}",
                status, body
            )));
        }

        let data: serde_json::Value = response.json().await?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| MnemoError::Provider("invalid LLM response format".to_string()))?;

        parse_verdict(content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
