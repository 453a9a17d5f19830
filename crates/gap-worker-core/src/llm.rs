//! Typed operations against the text-generation model.
//!
//! Every operation shares one rate limiter and one circuit breaker — the
//! breaker is scoped to this client alone, never shared with the search or
//! extraction clients, so an LLM outage cannot falsely trip unrelated
//! upstreams.

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::LlmError;
use crate::json_parse::parse_json_safely;
use crate::models::{ExpandedDetails, ExtractedContent, InitialGap, PaperData, ValidationResult};
use crate::rate_limit::RateLimiter;
use crate::retry::{retry, RetryPolicy};

const MAX_SECTIONS: usize = 10;
const MAX_SECTION_CHARS: usize = 1000;

pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    rate_limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry_policy: RetryPolicy,
    rate_limited_backoff: Duration,
}

impl LlmClient {
    pub fn new(http: reqwest::Client, api_key: String, model: String, calls_per_minute: u32) -> Self {
        Self {
            http,
            api_key,
            model,
            rate_limiter: RateLimiter::new(calls_per_minute as usize, Duration::from_secs(60)),
            breaker: CircuitBreaker::new(3, Duration::from_secs(300)),
            retry_policy: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_secs(2),
                cap: Duration::from_secs(60),
            },
            rate_limited_backoff: Duration::from_secs(30),
        }
    }

    async fn generate(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, LlmError> {
        self.breaker.check()?;
        self.rate_limiter.acquire(cancel).await?;

        let result = retry(self.retry_policy, cancel, || async {
            let resp = self
                .http
                .post(format!(
                    "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
                    self.model, self.api_key
                ))
                .json(&json!({
                    "contents": [{"parts": [{"text": prompt}]}],
                }))
                .send()
                .await?;

            let status = resp.status();
            if status.as_u16() == 429 {
                tokio::time::sleep(self.rate_limited_backoff).await;
                return Err(LlmError::UpstreamStatus(429));
            }
            if !status.is_success() {
                return Err(LlmError::UpstreamStatus(status.as_u16()));
            }

            let body: serde_json::Value = resp.json().await?;
            body["candidates"][0]["content"]["parts"][0]["text"]
                .as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| LlmError::UnparsableResponse("missing candidate text".into()))
        })
        .await;

        match result {
            Ok(text) => {
                self.breaker.record_success();
                Ok(text)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(LlmError::RetriesExhausted(e.to_string()))
            }
        }
    }

    /// Generates 3-7 candidate research gaps from a bounded view of the
    /// paper. Returns an empty list (not an error) when generation is
    /// exhausted — "no gaps found" is a valid, non-erroneous outcome.
    pub async fn generate_initial_gaps(
        &self,
        paper: &PaperData,
        content: &ExtractedContent,
        cancel: &CancellationToken,
    ) -> Vec<InitialGap> {
        let prompt = build_initial_gaps_prompt(paper, content);
        match self.generate(&prompt, cancel).await {
            Ok(text) => match parse_json_safely(&text) {
                Some(value) => value
                    .get("gaps")
                    .or(Some(&value))
                    .and_then(|g| serde_json::from_value::<Vec<InitialGap>>(g.clone()).ok())
                    .unwrap_or_default(),
                None => {
                    warn!("initial gap generation returned unparsable JSON");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(error = %e, "initial gap generation failed, treating as zero gaps");
                Vec::new()
            }
        }
    }

    /// Returns a 2-4 word search query. Falls back to a deterministic
    /// derivation from the gap's own name/category on any failure.
    pub async fn generate_search_query(&self, gap: &InitialGap, cancel: &CancellationToken) -> String {
        let prompt = format!(
            "In 2 to 4 words, give a concise academic search query for this research gap.\nName: {}\nDescription: {}\nRespond with just the query text.",
            gap.name, gap.description
        );
        match self.generate(&prompt, cancel).await {
            Ok(text) => {
                let query = text.trim().trim_matches('"').to_string();
                if query.is_empty() {
                    fallback_query(gap)
                } else {
                    query
                }
            }
            Err(_) => fallback_query(gap),
        }
    }

    /// Validates a gap against related literature. On any failure, returns
    /// the pessimistic-for-invalidation fallback: errors never mark a gap
    /// invalid, they only lower confidence.
    pub async fn validate_gap(
        &self,
        gap: &InitialGap,
        related: &[ExtractedContent],
        cancel: &CancellationToken,
    ) -> ValidationResult {
        let prompt = build_validation_prompt(gap, related);
        match self.generate(&prompt, cancel).await {
            Ok(text) => match parse_json_safely(&text).and_then(|v| serde_json::from_value(v).ok()) {
                Some(result) => result,
                None => {
                    warn!("gap validation returned unparsable JSON");
                    ValidationResult::assumed_valid()
                }
            },
            Err(e) => {
                warn!(error = %e, "gap validation failed");
                ValidationResult::assumed_valid()
            }
        }
    }

    /// Expands a validated gap with impact/hints/topics. On failure returns
    /// a degraded object so the gap still appears in the response.
    pub async fn expand_gap_details(
        &self,
        gap: &InitialGap,
        validation: &ValidationResult,
        cancel: &CancellationToken,
    ) -> ExpandedDetails {
        let prompt = build_expansion_prompt(gap, validation);
        match self.generate(&prompt, cancel).await {
            Ok(text) => match parse_json_safely(&text) {
                Some(value) => normalize_expanded_details(value),
                None => {
                    debug!("gap expansion returned unparsable JSON, degrading");
                    ExpandedDetails::degraded()
                }
            },
            Err(e) => {
                debug!(error = %e, "gap expansion failed, degrading");
                ExpandedDetails::degraded()
            }
        }
    }
}

fn fallback_query(gap: &InitialGap) -> String {
    format!("{} {}", gap.name, gap.category)
        .to_lowercase()
        .split_whitespace()
        .take(4)
        .collect::<Vec<_>>()
        .join(" ")
}

fn build_initial_gaps_prompt(paper: &PaperData, content: &ExtractedContent) -> String {
    let mut ctx = format!("Title: {}\n", paper.title);
    if let Some(abstract_text) = &content.abstract_text {
        ctx.push_str(&format!("Abstract: {}\n", abstract_text));
    }
    for section in content.sections.iter().take(MAX_SECTIONS) {
        let truncated: String = section.text.chars().take(MAX_SECTION_CHARS).collect();
        ctx.push_str(&format!("## {}\n{}\n", section.heading, truncated));
    }
    if let Some(conclusion) = &content.conclusion {
        ctx.push_str(&format!("Conclusion: {}\n", conclusion));
    }
    format!(
        "Given the following paper, identify 3 to 7 unresolved research gaps. \
         Respond with JSON: {{\"gaps\": [{{\"name\": str, \"description\": str, \
         \"category\": one of theoretical|methodological|empirical|application|interdisciplinary, \
         \"reasoning\": str, \"evidence\": str}}]}}.\n\n{ctx}"
    )
}

fn build_validation_prompt(gap: &InitialGap, related: &[ExtractedContent]) -> String {
    let mut ctx = String::new();
    for (i, paper) in related.iter().take(10).enumerate() {
        let title = paper.title.as_deref().unwrap_or("Untitled");
        let abstract_text: String = paper
            .abstract_text
            .as_deref()
            .unwrap_or("")
            .chars()
            .take(500)
            .collect();
        ctx.push_str(&format!("{}. {} — {}\n", i + 1, title, abstract_text));
    }
    format!(
        "Given this research gap and related literature, determine whether the gap remains open. \
         Gap: {} — {}\nRelated papers:\n{ctx}\n\
         Respond with JSON: {{\"is_valid\": bool, \"confidence\": float 0-1, \"reasoning\": str, \
         \"should_modify\": bool, \"modification_suggestion\": str or null, \
         \"supporting_papers\": [str], \"conflicting_papers\": [str]}}.",
        gap.name, gap.description
    )
}

fn build_expansion_prompt(gap: &InitialGap, validation: &ValidationResult) -> String {
    format!(
        "Expand this validated research gap with actionable detail. \
         Gap: {} — {}\nValidation reasoning: {}\n\
         Respond with JSON: {{\"potential_impact\": str, \"research_hints\": str, \
         \"implementation_suggestions\": str, \"risks_and_challenges\": str, \
         \"required_resources\": str, \"estimated_difficulty\": one of low|medium|high, \
         \"estimated_timeline\": str, \"suggested_topics\": [at least 3 of {{\"title\": str, \
         \"description\": str, \"research_questions\": [str], \"methodology_suggestions\": str, \
         \"expected_outcomes\": str, \"relevance_score\": float 0-1}}]}}.",
        gap.name, gap.description, validation.reasoning
    )
}

/// LLM output occasionally arrives shape-mismatched (a list where a string
/// was requested); coerce rather than reject.
fn normalize_expanded_details(mut value: serde_json::Value) -> ExpandedDetails {
    if let Some(topics) = value.get_mut("suggested_topics").and_then(|t| t.as_array_mut()) {
        for topic in topics.iter_mut() {
            coerce_to_joined_string(topic, "methodology_suggestions");
            coerce_to_joined_string(topic, "expected_outcomes");
            coerce_to_list(topic, "research_questions");
        }
    }
    serde_json::from_value(value).unwrap_or_else(|_| ExpandedDetails::degraded())
}

fn coerce_to_joined_string(obj: &mut serde_json::Value, field: &str) {
    if let Some(serde_json::Value::Array(items)) = obj.get(field) {
        let joined = items
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        obj[field] = serde_json::Value::String(joined);
    }
}

fn coerce_to_list(obj: &mut serde_json::Value, field: &str) {
    if let Some(v @ serde_json::Value::String(_)) = obj.get(field).cloned() {
        obj[field] = serde_json::Value::Array(vec![v]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_query_derives_from_name_and_category() {
        let gap = InitialGap {
            name: "Scalable Transfer Learning".into(),
            description: "...".into(),
            category: "methodological".into(),
            reasoning: None,
            evidence: None,
        };
        assert_eq!(
            fallback_query(&gap),
            "scalable transfer learning methodological"
        );
    }

    #[test]
    fn normalize_coerces_list_fields_to_joined_strings() {
        let value = serde_json::json!({
            "suggested_topics": [{
                "title": "t", "description": "d",
                "research_questions": "only one question",
                "methodology_suggestions": ["do a", "do b"],
                "expected_outcomes": ["outcome a"],
                "relevance_score": 0.7
            }]
        });
        let details = normalize_expanded_details(value);
        let topic = &details.suggested_topics[0];
        assert_eq!(topic.research_questions, vec!["only one question"]);
        assert_eq!(topic.methodology_suggestions.as_deref(), Some("do a; do b"));
        assert_eq!(topic.expected_outcomes.as_deref(), Some("outcome a"));
    }
}
