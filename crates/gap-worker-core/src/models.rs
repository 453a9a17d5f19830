//! Wire schema and persisted data model for gap analysis.

use serde::{Deserialize, Serialize};

/// Inbound request as delivered on the bus.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapAnalysisRequest {
    pub paper_id: String,
    pub paper_extraction_id: String,
    pub correlation_id: String,
    pub request_id: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Outbound response published after (or instead of) processing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GapAnalysisResponse {
    pub request_id: String,
    pub correlation_id: String,
    pub status: AnalysisStatus,
    pub message: String,
    pub gap_analysis_id: Option<String>,
    pub total_gaps: i64,
    pub valid_gaps: i64,
    pub gaps: Vec<GapDetail>,
    pub error: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AnalysisStatus::Pending => "PENDING",
            AnalysisStatus::Processing => "PROCESSING",
            AnalysisStatus::Completed => "COMPLETED",
            AnalysisStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    Initial,
    Validating,
    Valid,
    Invalid,
    Modified,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceAnchor {
    pub paper_title: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedTopic {
    pub title: String,
    pub description: String,
    pub research_questions: Vec<String>,
    #[serde(default)]
    pub methodology_suggestions: Option<String>,
    #[serde(default)]
    pub expected_outcomes: Option<String>,
    pub relevance_score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GapDetail {
    pub gap_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub validation_status: ValidationStatus,
    pub confidence_score: f64,
    pub potential_impact: Option<String>,
    pub research_hints: Option<String>,
    pub implementation_suggestions: Option<String>,
    pub risks_and_challenges: Option<String>,
    pub required_resources: Option<String>,
    pub estimated_difficulty: Option<String>,
    pub estimated_timeline: Option<String>,
    pub evidence_anchors: Vec<EvidenceAnchor>,
    pub supporting_papers_count: usize,
    pub conflicting_papers_count: usize,
    pub suggested_topics: Vec<SuggestedTopic>,
}

/// A gap as first emitted by the LLM, pre-validation.
#[derive(Debug, Clone, Deserialize)]
pub struct InitialGap {
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub should_modify: bool,
    #[serde(default)]
    pub modification_suggestion: Option<String>,
    #[serde(default)]
    pub supporting_papers: Vec<String>,
    #[serde(default)]
    pub conflicting_papers: Vec<String>,
}

impl ValidationResult {
    /// Pessimistic-for-invalidation fallback used whenever the LLM call
    /// that would normally produce this result fails outright.
    pub fn assumed_valid() -> Self {
        Self {
            is_valid: true,
            confidence: 0.3,
            reasoning: "assumed valid under error".to_string(),
            should_modify: false,
            modification_suggestion: None,
            supporting_papers: Vec::new(),
            conflicting_papers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpandedDetails {
    #[serde(default)]
    pub potential_impact: Option<String>,
    #[serde(default)]
    pub research_hints: Option<String>,
    #[serde(default)]
    pub implementation_suggestions: Option<String>,
    #[serde(default)]
    pub risks_and_challenges: Option<String>,
    #[serde(default)]
    pub required_resources: Option<String>,
    #[serde(default)]
    pub estimated_difficulty: Option<String>,
    #[serde(default)]
    pub estimated_timeline: Option<String>,
    #[serde(default)]
    pub suggested_topics: Vec<SuggestedTopic>,
}

impl ExpandedDetails {
    pub fn degraded() -> Self {
        Self {
            potential_impact: Some("Unable to determine impact at this time.".to_string()),
            research_hints: None,
            implementation_suggestions: None,
            risks_and_challenges: None,
            required_resources: None,
            estimated_difficulty: None,
            estimated_timeline: None,
            suggested_topics: Vec::new(),
        }
    }
}

/// A paper as loaded from the externally owned `papers` table.
#[derive(Debug, Clone)]
pub struct PaperData {
    pub id: String,
    pub title: String,
    pub abstract_text: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractedSection {
    pub heading: String,
    pub text: String,
}

/// Structured text pulled from a PDF, either the source paper's own
/// extraction (loaded from the store) or a related paper's (produced by
/// the extraction client during validation).
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    pub sections: Vec<ExtractedSection>,
    pub methods: Option<String>,
    pub results: Option<String>,
    pub conclusion: Option<String>,
    pub extraction_success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PaperSearchResult {
    pub title: String,
    pub abstract_text: Option<String>,
    pub url: Option<String>,
    pub pdf_url: Option<String>,
    pub publication_date: Option<String>,
    pub authors: Vec<String>,
    pub venue: Option<String>,
}

/// A research gap after validation/expansion, ready to be persisted and
/// folded into the outbound response.
#[derive(Debug, Clone)]
pub struct ResearchGap {
    pub order_index: usize,
    pub initial: InitialGap,
    pub validation: ValidationResult,
    pub expanded: Option<ExpandedDetails>,
}

#[derive(Debug, Default)]
pub struct AnalysisCounters {
    pub total_gaps_identified: i64,
    pub valid_gaps_count: i64,
    pub invalid_gaps_count: i64,
    pub modified_gaps_count: i64,
}
