//! End-to-end pipeline tests against fake LLM/search/extraction
//! collaborators — no test here depends on a live external service.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use gap_worker_core::models::{
    ExpandedDetails, ExtractedContent, GapAnalysisRequest, InitialGap, PaperSearchResult,
    ValidationResult,
};
use gap_worker_core::ports::{ExtractionPort, LlmPort, SearchPort};
use gap_worker_core::store::Store;
use gap_worker_core::Pipeline;
use tokio_util::sync::CancellationToken;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

struct FakeLlm {
    gaps: Vec<InitialGap>,
    /// Index of a gap the fake validator should reject outright, modeling
    /// a gap judged not-open-anymore after searching related literature.
    invalid_index: Option<usize>,
    /// Index of a gap whose expansion should come back as the degraded
    /// placeholder, modeling an expansion call that exhausted its retries.
    degraded_expand_index: Option<usize>,
    validate_calls: AtomicUsize,
    expand_calls: AtomicUsize,
}

impl FakeLlm {
    fn all_valid(gaps: Vec<InitialGap>) -> Self {
        Self {
            gaps,
            invalid_index: None,
            degraded_expand_index: None,
            validate_calls: AtomicUsize::new(0),
            expand_calls: AtomicUsize::new(0),
        }
    }
}

fn gap(name: &str, category: &str) -> InitialGap {
    InitialGap {
        name: name.to_string(),
        description: format!("{name} description"),
        category: category.to_string(),
        reasoning: None,
        evidence: None,
    }
}

impl LlmPort for FakeLlm {
    fn generate_initial_gaps<'a>(
        &'a self,
        _paper: &'a gap_worker_core::models::PaperData,
        _content: &'a ExtractedContent,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Vec<InitialGap>> {
        Box::pin(async move { self.gaps.clone() })
    }

    fn generate_search_query<'a>(
        &'a self,
        gap: &'a InitialGap,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, String> {
        Box::pin(async move { gap.name.to_lowercase() })
    }

    fn validate_gap<'a>(
        &'a self,
        _gap: &'a InitialGap,
        _related: &'a [ExtractedContent],
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ValidationResult> {
        let index = self.validate_calls.fetch_add(1, Ordering::SeqCst);
        let is_valid = Some(index) != self.invalid_index;
        Box::pin(async move {
            ValidationResult {
                is_valid,
                confidence: if is_valid { 0.9 } else { 0.2 },
                reasoning: if is_valid {
                    "looks open".to_string()
                } else {
                    "already addressed by related work".to_string()
                },
                should_modify: false,
                modification_suggestion: None,
                supporting_papers: vec![],
                conflicting_papers: vec![],
            }
        })
    }

    fn expand_gap_details<'a>(
        &'a self,
        _gap: &'a InitialGap,
        _validation: &'a ValidationResult,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ExpandedDetails> {
        let index = self.expand_calls.fetch_add(1, Ordering::SeqCst);
        let degraded = Some(index) == self.degraded_expand_index;
        Box::pin(async move {
            if degraded {
                ExpandedDetails::degraded()
            } else {
                ExpandedDetails {
                    potential_impact: Some("would unlock a new benchmark".to_string()),
                    research_hints: None,
                    implementation_suggestions: None,
                    risks_and_challenges: None,
                    required_resources: None,
                    estimated_difficulty: None,
                    estimated_timeline: None,
                    suggested_topics: Vec::new(),
                }
            }
        })
    }
}

struct FakeSearch;

impl SearchPort for FakeSearch {
    fn search_papers<'a>(
        &'a self,
        _query: &'a str,
        _max_results: usize,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Vec<PaperSearchResult>> {
        Box::pin(async move { Vec::new() })
    }
}

struct FakeExtraction;

impl ExtractionPort for FakeExtraction {
    fn extract_batch<'a>(&'a self, _papers: &'a [PaperSearchResult]) -> BoxFuture<'a, Vec<ExtractedContent>> {
        Box::pin(async move { Vec::new() })
    }
}

fn seed_store() -> Arc<Store> {
    Arc::new(Store::open_in_memory().unwrap())
}

#[tokio::test]
async fn happy_path_returns_completed_with_all_gaps_valid() {
    let store = seed_store();
    seed_minimal_paper(&store, "p1", "e1");

    let llm = Arc::new(FakeLlm::all_valid(vec![
        gap("Gap A", "theoretical"),
        gap("Gap B", "empirical"),
    ]));
    let pipeline = Pipeline::new(store, llm, Arc::new(FakeSearch), Arc::new(FakeExtraction), 5);

    let request = GapAnalysisRequest {
        paper_id: "p1".into(),
        paper_extraction_id: "e1".into(),
        correlation_id: "corr-1".into(),
        request_id: "req-1".into(),
        config: serde_json::json!({}),
    };
    let cancel = CancellationToken::new();
    let response = pipeline.analyze(&request, &cancel).await;

    assert_eq!(response.status, gap_worker_core::models::AnalysisStatus::Completed);
    assert_eq!(response.total_gaps, 2);
    assert_eq!(response.valid_gaps, 2);
    assert_eq!(response.gaps.len(), 2);
}

#[tokio::test]
async fn idempotent_redelivery_reuses_the_same_analysis_id() {
    let store = seed_store();
    seed_minimal_paper(&store, "p1", "e1");

    let llm = Arc::new(FakeLlm::all_valid(vec![gap("Gap A", "theoretical")]));
    let pipeline = Pipeline::new(store, llm, Arc::new(FakeSearch), Arc::new(FakeExtraction), 5);

    let request = GapAnalysisRequest {
        paper_id: "p1".into(),
        paper_extraction_id: "e1".into(),
        correlation_id: "corr-2".into(),
        request_id: "req-1".into(),
        config: serde_json::json!({}),
    };
    let cancel = CancellationToken::new();
    let first = pipeline.analyze(&request, &cancel).await;
    let second = pipeline.analyze(&request, &cancel).await;

    assert_eq!(first.gap_analysis_id, second.gap_analysis_id);
    assert_eq!(first.total_gaps, second.total_gaps);
}

#[tokio::test]
async fn no_gaps_identified_completes_with_empty_list() {
    let store = seed_store();
    seed_minimal_paper(&store, "p1", "e1");

    let llm = Arc::new(FakeLlm::all_valid(vec![]));
    let pipeline = Pipeline::new(store, llm, Arc::new(FakeSearch), Arc::new(FakeExtraction), 5);

    let request = GapAnalysisRequest {
        paper_id: "p1".into(),
        paper_extraction_id: "e1".into(),
        correlation_id: "corr-3".into(),
        request_id: "req-1".into(),
        config: serde_json::json!({}),
    };
    let cancel = CancellationToken::new();
    let response = pipeline.analyze(&request, &cancel).await;

    assert_eq!(response.status, gap_worker_core::models::AnalysisStatus::Completed);
    assert_eq!(response.total_gaps, 0);
    assert!(response.gaps.is_empty());
}

#[tokio::test]
async fn paper_not_found_yields_failed_response() {
    let store = seed_store();

    let llm = Arc::new(FakeLlm::all_valid(vec![]));
    let pipeline = Pipeline::new(store, llm, Arc::new(FakeSearch), Arc::new(FakeExtraction), 5);

    let request = GapAnalysisRequest {
        paper_id: "missing".into(),
        paper_extraction_id: "e1".into(),
        correlation_id: "corr-4".into(),
        request_id: "req-1".into(),
        config: serde_json::json!({}),
    };
    let cancel = CancellationToken::new();
    let response = pipeline.analyze(&request, &cancel).await;

    assert_eq!(response.status, gap_worker_core::models::AnalysisStatus::Failed);
    assert!(response.error.is_some());
}

#[tokio::test]
async fn invalid_gap_is_excluded_with_correct_counters() {
    let store = seed_store();
    seed_minimal_paper(&store, "p1", "e1");

    let llm = Arc::new(FakeLlm {
        gaps: vec![gap("Gap A", "theoretical"), gap("Gap B", "empirical")],
        invalid_index: Some(1),
        degraded_expand_index: None,
        validate_calls: AtomicUsize::new(0),
        expand_calls: AtomicUsize::new(0),
    });
    let pipeline = Pipeline::new(store, llm, Arc::new(FakeSearch), Arc::new(FakeExtraction), 5);

    let request = GapAnalysisRequest {
        paper_id: "p1".into(),
        paper_extraction_id: "e1".into(),
        correlation_id: "corr-5".into(),
        request_id: "req-1".into(),
        config: serde_json::json!({}),
    };
    let cancel = CancellationToken::new();
    let response = pipeline.analyze(&request, &cancel).await;

    assert_eq!(response.status, gap_worker_core::models::AnalysisStatus::Completed);
    assert_eq!(response.total_gaps, 2);
    assert_eq!(response.valid_gaps, 1);
    assert!(response.valid_gaps < response.total_gaps);
    assert_eq!(response.gaps.len(), 1);
    assert_eq!(response.gaps[0].name, "Gap A");
}

#[tokio::test]
async fn gap_ids_are_unique_across_analyses_of_the_same_paper() {
    let store = seed_store();
    seed_minimal_paper(&store, "p1", "e1");

    let llm = Arc::new(FakeLlm::all_valid(vec![gap("Gap A", "theoretical")]));
    let pipeline = Pipeline::new(store, llm, Arc::new(FakeSearch), Arc::new(FakeExtraction), 5);

    let first_request = GapAnalysisRequest {
        paper_id: "p1".into(),
        paper_extraction_id: "e1".into(),
        correlation_id: "corr-6".into(),
        request_id: "req-1".into(),
        config: serde_json::json!({}),
    };
    let second_request = GapAnalysisRequest {
        correlation_id: "corr-7".into(),
        ..first_request.clone()
    };
    let cancel = CancellationToken::new();
    let first = pipeline.analyze(&first_request, &cancel).await;
    let second = pipeline.analyze(&second_request, &cancel).await;

    assert_ne!(first.gaps[0].gap_id, second.gaps[0].gap_id);
}

#[tokio::test]
async fn expansion_exhaustion_still_yields_a_degraded_placeholder() {
    let store = seed_store();
    seed_minimal_paper(&store, "p1", "e1");

    let llm = Arc::new(FakeLlm {
        gaps: vec![gap("Gap A", "theoretical")],
        invalid_index: None,
        degraded_expand_index: Some(0),
        validate_calls: AtomicUsize::new(0),
        expand_calls: AtomicUsize::new(0),
    });
    let pipeline = Pipeline::new(store, llm, Arc::new(FakeSearch), Arc::new(FakeExtraction), 5);

    let request = GapAnalysisRequest {
        paper_id: "p1".into(),
        paper_extraction_id: "e1".into(),
        correlation_id: "corr-8".into(),
        request_id: "req-1".into(),
        config: serde_json::json!({}),
    };
    let cancel = CancellationToken::new();
    let response = pipeline.analyze(&request, &cancel).await;

    assert_eq!(response.valid_gaps, 1);
    assert_eq!(
        response.gaps[0].potential_impact.as_deref(),
        Some("Unable to determine impact at this time.")
    );
}

fn seed_minimal_paper(store: &Store, paper_id: &str, extraction_id: &str) {
    store.seed_for_tests(paper_id, extraction_id, "Example Paper", Some("An abstract"));
}
