//! Per-request orchestration: fetch paper, generate gaps, validate and
//! expand each sequentially, persist, respond.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::StoreError;
use crate::models::{
    AnalysisCounters, AnalysisStatus, EvidenceAnchor, GapAnalysisRequest, GapAnalysisResponse,
    GapDetail, InitialGap, ValidationStatus,
};
use crate::ports::{ExtractionPort, LlmPort, SearchPort};
use crate::store::Store;

pub struct Pipeline {
    store: Arc<Store>,
    llm: Arc<dyn LlmPort>,
    search: Arc<dyn SearchPort>,
    extraction: Arc<dyn ExtractionPort>,
    search_max_results: usize,
}

impl Pipeline {
    pub fn new(
        store: Arc<Store>,
        llm: Arc<dyn LlmPort>,
        search: Arc<dyn SearchPort>,
        extraction: Arc<dyn ExtractionPort>,
        search_max_results: usize,
    ) -> Self {
        Self {
            store,
            llm,
            search,
            extraction,
            search_max_results,
        }
    }

    #[instrument(skip(self, request, cancel), fields(correlation_id = %request.correlation_id))]
    pub async fn analyze(
        &self,
        request: &GapAnalysisRequest,
        cancel: &CancellationToken,
    ) -> GapAnalysisResponse {
        let analysis_id = match self.store.upsert_analysis(
            &request.correlation_id,
            &request.request_id,
            &request.paper_id,
            &request.paper_extraction_id,
            &request.config,
        ) {
            Ok(id) => id,
            Err(e) => return failed_response(request, None, e.to_string()),
        };

        let (paper, content) = match self.store.load_paper(&request.paper_id, &request.paper_extraction_id) {
            Ok(pair) => pair,
            Err(e) => {
                let message = e.to_string();
                let _ = self.store.finalize(
                    analysis_id,
                    AnalysisStatus::Failed,
                    &AnalysisCounters::default(),
                    Some(&message),
                );
                return failed_response(request, Some(analysis_id), message);
            }
        };

        let initial_gaps = self.llm.generate_initial_gaps(&paper, &content, cancel).await;

        if initial_gaps.is_empty() {
            info!("no initial gaps identified");
            let _ = self.store.finalize(
                analysis_id,
                AnalysisStatus::Completed,
                &AnalysisCounters::default(),
                None,
            );
            return completed_response(request, analysis_id, Vec::new(), &AnalysisCounters::default());
        }

        let mut accepted: Vec<GapDetail> = Vec::new();
        // Sequential, bounded to 1 concurrent: the LLM rate limit admits
        // at most a couple of calls per minute, so fanning these out would
        // only pile up behind the limiter.
        for (index, gap) in initial_gaps.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(index, "deadline exceeded, dropping remaining gaps");
                break;
            }
            match self.process_one_gap(analysis_id, index, gap, cancel).await {
                Ok(Some(detail)) => accepted.push(detail),
                Ok(None) => {}
                Err(e) => {
                    warn!(index, error = %e, "gap processing failed, dropping this gap");
                }
            }
        }

        let counters = AnalysisCounters {
            total_gaps_identified: initial_gaps.len() as i64,
            valid_gaps_count: accepted.len() as i64,
            invalid_gaps_count: (initial_gaps.len() - accepted.len()) as i64,
            modified_gaps_count: 0,
        };

        if let Err(e) = self
            .store
            .finalize(analysis_id, AnalysisStatus::Completed, &counters, None)
        {
            error!(error = %e, "failed to finalize analysis");
        }

        completed_response(request, analysis_id, accepted, &counters)
    }

    async fn process_one_gap(
        &self,
        analysis_id: i64,
        index: usize,
        gap: &InitialGap,
        cancel: &CancellationToken,
    ) -> Result<Option<GapDetail>, StoreError> {
        let query = self.llm.generate_search_query(gap, cancel).await;
        let papers = self
            .search
            .search_papers(&query, self.search_max_results, cancel)
            .await;
        let extracted = self.extraction.extract_batch(&papers).await;

        let validation = self.llm.validate_gap(gap, &extracted, cancel).await;
        if !validation.is_valid {
            return Ok(None);
        }

        let expanded = self.llm.expand_gap_details(gap, &validation, cancel).await;

        let evidence_anchors = papers
            .iter()
            .zip(extracted.iter())
            .filter(|(_, content)| content.extraction_success)
            .map(|(paper, _)| EvidenceAnchor {
                paper_title: paper.title.clone(),
                reason: "cited as related work during validation".to_string(),
            })
            .collect();

        Ok(Some(GapDetail {
            gap_id: unique_gap_id(analysis_id, index),
            name: gap.name.clone(),
            description: gap.description.clone(),
            category: gap.category.clone(),
            validation_status: ValidationStatus::Valid,
            confidence_score: validation.confidence,
            potential_impact: expanded.potential_impact.clone(),
            research_hints: expanded.research_hints.clone(),
            implementation_suggestions: expanded.implementation_suggestions.clone(),
            risks_and_challenges: expanded.risks_and_challenges.clone(),
            required_resources: expanded.required_resources.clone(),
            estimated_difficulty: expanded.estimated_difficulty.clone(),
            estimated_timeline: expanded.estimated_timeline.clone(),
            evidence_anchors,
            supporting_papers_count: validation.supporting_papers.len(),
            conflicting_papers_count: validation.conflicting_papers.len(),
            suggested_topics: expanded.suggested_topics,
        }))
    }
}

/// Globally unique across analyses: the analysis id alone repeats across
/// restarts of the same paper, so a random suffix rules out collisions
/// between concurrently-running analyses sharing an index.
fn unique_gap_id(analysis_id: i64, index: usize) -> String {
    let suffix: String = (0..8).map(|_| char::from_digit(fastrand::u32(0..16), 16).unwrap()).collect();
    format!("{analysis_id}-{index}-{suffix}")
}

fn completed_response(
    request: &GapAnalysisRequest,
    analysis_id: i64,
    gaps: Vec<GapDetail>,
    counters: &AnalysisCounters,
) -> GapAnalysisResponse {
    GapAnalysisResponse {
        request_id: request.request_id.clone(),
        correlation_id: request.correlation_id.clone(),
        status: AnalysisStatus::Completed,
        message: "gap analysis completed".to_string(),
        gap_analysis_id: Some(analysis_id.to_string()),
        total_gaps: counters.total_gaps_identified,
        valid_gaps: counters.valid_gaps_count,
        gaps,
        error: None,
        completed_at: Some(now_iso8601()),
    }
}

fn failed_response(
    request: &GapAnalysisRequest,
    analysis_id: Option<i64>,
    error: String,
) -> GapAnalysisResponse {
    GapAnalysisResponse {
        request_id: request.request_id.clone(),
        correlation_id: request.correlation_id.clone(),
        status: AnalysisStatus::Failed,
        message: "gap analysis failed".to_string(),
        gap_analysis_id: analysis_id.map(|id| id.to_string()),
        total_gaps: 0,
        valid_gaps: 0,
        gaps: Vec::new(),
        error: Some(error),
        completed_at: Some(now_iso8601()),
    }
}

fn now_iso8601() -> String {
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    httpdate_from_secs(since_epoch.as_secs())
}

/// Minimal UTC ISO-8601 formatter so this module doesn't need a dedicated
/// date/time crate for a single timestamp field.
fn httpdate_from_secs(secs: u64) -> String {
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (h, m, s) = (rem / 3600, (rem % 3600) / 60, rem % 60);
    let (y, mo, d) = civil_from_days(days as i64);
    format!("{y:04}-{mo:02}-{d:02}T{h:02}:{m:02}:{s:02}Z")
}

/// Howard Hinnant's days-from-civil algorithm, inverted.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}
