//! Trait seams between the pipeline and its three external collaborators.
//!
//! Mirrors the teacher's `DatabaseBackend` pattern: a boxed-future return
//! type rather than `async-trait`, so the pipeline can be driven against
//! fakes in tests without paying for a proc-macro dependency.

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::models::{
    ExpandedDetails, ExtractedContent, InitialGap, PaperData, PaperSearchResult, ValidationResult,
};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait LlmPort: Send + Sync {
    fn generate_initial_gaps<'a>(
        &'a self,
        paper: &'a PaperData,
        content: &'a ExtractedContent,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Vec<InitialGap>>;

    fn generate_search_query<'a>(
        &'a self,
        gap: &'a InitialGap,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, String>;

    fn validate_gap<'a>(
        &'a self,
        gap: &'a InitialGap,
        related: &'a [ExtractedContent],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ValidationResult>;

    fn expand_gap_details<'a>(
        &'a self,
        gap: &'a InitialGap,
        validation: &'a ValidationResult,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ExpandedDetails>;
}

pub trait SearchPort: Send + Sync {
    fn search_papers<'a>(
        &'a self,
        query: &'a str,
        max_results: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Vec<PaperSearchResult>>;
}

pub trait ExtractionPort: Send + Sync {
    fn extract_batch<'a>(&'a self, papers: &'a [PaperSearchResult]) -> BoxFuture<'a, Vec<ExtractedContent>>;
}

impl LlmPort for crate::llm::LlmClient {
    fn generate_initial_gaps<'a>(
        &'a self,
        paper: &'a PaperData,
        content: &'a ExtractedContent,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Vec<InitialGap>> {
        Box::pin(self.generate_initial_gaps(paper, content, cancel))
    }

    fn generate_search_query<'a>(
        &'a self,
        gap: &'a InitialGap,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, String> {
        Box::pin(self.generate_search_query(gap, cancel))
    }

    fn validate_gap<'a>(
        &'a self,
        gap: &'a InitialGap,
        related: &'a [ExtractedContent],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ValidationResult> {
        Box::pin(self.validate_gap(gap, related, cancel))
    }

    fn expand_gap_details<'a>(
        &'a self,
        gap: &'a InitialGap,
        validation: &'a ValidationResult,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ExpandedDetails> {
        Box::pin(self.expand_gap_details(gap, validation, cancel))
    }
}

impl SearchPort for crate::search::SearchClient {
    fn search_papers<'a>(
        &'a self,
        query: &'a str,
        max_results: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Vec<PaperSearchResult>> {
        Box::pin(self.search_papers(query, max_results, cancel))
    }
}

impl ExtractionPort for crate::extraction::ExtractionClient {
    fn extract_batch<'a>(&'a self, papers: &'a [PaperSearchResult]) -> BoxFuture<'a, Vec<ExtractedContent>> {
        Box::pin(self.extract_batch(papers))
    }
}
