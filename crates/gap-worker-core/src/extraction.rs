//! PDF download and structured-text extraction via a GROBID-style service.
//!
//! Batches of 3 papers are processed with a 3 second pause between
//! batches, and within a batch concurrency is bounded by a semaphore of 2
//! so the extraction service is never hit with more than two requests at
//! once.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::ExtractionError;
use crate::models::{ExtractedContent, ExtractedSection, PaperSearchResult};

const MIN_PDF_BYTES: usize = 1000;
const BATCH_SIZE: usize = 3;
const BATCH_PAUSE: Duration = Duration::from_secs(3);
const INNER_CONCURRENCY: usize = 2;
const BACKOFF_503: [Duration; 3] = [
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(20),
];

static ARXIV_ABS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"arxiv\.org/abs/([a-zA-Z0-9.]+)").unwrap());
static PMC_ARTICLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ncbi\.nlm\.nih\.gov/pmc/articles/(PMC\d+)").unwrap());

pub struct ExtractionClient {
    http: reqwest::Client,
    grobid_url: String,
    grobid_timeout: Duration,
    semaphore: Arc<Semaphore>,
}

impl ExtractionClient {
    pub fn new(http: reqwest::Client, grobid_url: String, grobid_timeout: Duration) -> Self {
        Self {
            http,
            grobid_url,
            grobid_timeout,
            semaphore: Arc::new(Semaphore::new(INNER_CONCURRENCY)),
        }
    }

    pub async fn extract_batch(&self, papers: &[PaperSearchResult]) -> Vec<ExtractedContent> {
        let mut out = Vec::with_capacity(papers.len());
        for (i, chunk) in papers.chunks(BATCH_SIZE).enumerate() {
            if i > 0 {
                tokio::time::sleep(BATCH_PAUSE).await;
            }
            let futures = chunk.iter().map(|paper| self.extract_one(paper));
            out.extend(futures_util::future::join_all(futures).await);
        }
        out
    }

    async fn extract_one(&self, paper: &PaperSearchResult) -> ExtractedContent {
        let _permit = self.semaphore.acquire().await;

        let Some(pdf_url) = paper.pdf_url.as_deref().or(paper.url.as_deref()) else {
            return metadata_only(paper);
        };

        match self.extract_from_url(pdf_url, paper).await {
            Ok(content) => content,
            Err(e) => {
                debug!(error = %e, url = pdf_url, "extraction fell back to metadata only");
                metadata_only(paper)
            }
        }
    }

    async fn extract_from_url(
        &self,
        pdf_url: &str,
        paper: &PaperSearchResult,
    ) -> Result<ExtractedContent, ExtractionError> {
        let bytes = self.download_pdf(pdf_url).await?;
        self.extract_pdf_bytes(&bytes, paper).await
    }

    async fn download_pdf(&self, url: &str) -> Result<Vec<u8>, ExtractionError> {
        for candidate in candidate_urls(url) {
            if let Ok(bytes) = self.try_download(&candidate).await {
                if bytes.len() >= MIN_PDF_BYTES {
                    return Ok(bytes);
                }
            }
        }
        Err(ExtractionError::NoSource)
    }

    async fn try_download(&self, url: &str) -> Result<Vec<u8>, ExtractionError> {
        let resp = self
            .http
            .get(url)
            .header(
                "User-Agent",
                "Mozilla/5.0 (compatible; gap-worker/1.0; +https://example.invalid/bot)",
            )
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ExtractionError::UpstreamStatus(resp.status().as_u16()));
        }
        let bytes = resp.bytes().await?.to_vec();
        if bytes.len() < MIN_PDF_BYTES {
            return Err(ExtractionError::TooSmall(bytes.len()));
        }
        Ok(bytes)
    }

    async fn extract_pdf_bytes(
        &self,
        bytes: &[u8],
        paper: &PaperSearchResult,
    ) -> Result<ExtractedContent, ExtractionError> {
        for (attempt, backoff) in BACKOFF_503.iter().enumerate() {
            let form = reqwest::multipart::Form::new().part(
                "input",
                reqwest::multipart::Part::bytes(bytes.to_vec()).file_name("paper.pdf"),
            );
            let resp = self
                .http
                .post(format!("{}/api/processFulltextDocument", self.grobid_url))
                .timeout(self.grobid_timeout)
                .multipart(form)
                .send()
                .await?;

            match resp.status().as_u16() {
                200 => {
                    let tei = resp.text().await?;
                    return parse_tei(&tei, paper);
                }
                503 => {
                    warn!(attempt, "extractor busy (503), backing off");
                    tokio::time::sleep(*backoff).await;
                    continue;
                }
                500 => return Err(ExtractionError::CorruptInput),
                other => return Err(ExtractionError::UpstreamStatus(other)),
            }
        }
        Err(ExtractionError::UpstreamStatus(503))
    }
}

/// Derives alternative download URLs for known preprint/repository hosts
/// so an abstract-page link can still resolve to the actual PDF.
fn candidate_urls(url: &str) -> Vec<String> {
    let mut candidates = vec![url.to_string()];
    if let Some(caps) = ARXIV_ABS.captures(url) {
        candidates.push(format!("https://arxiv.org/pdf/{}", &caps[1]));
    }
    if let Some(caps) = PMC_ARTICLE.captures(url) {
        candidates.push(format!(
            "https://www.ncbi.nlm.nih.gov/pmc/articles/{}/pdf/",
            &caps[1]
        ));
    }
    candidates
}

fn metadata_only(paper: &PaperSearchResult) -> ExtractedContent {
    ExtractedContent {
        title: Some(paper.title.clone()),
        abstract_text: paper.abstract_text.clone(),
        sections: paper
            .abstract_text
            .as_ref()
            .map(|a| {
                vec![ExtractedSection {
                    heading: "Abstract".to_string(),
                    text: a.clone(),
                }]
            })
            .unwrap_or_default(),
        methods: None,
        results: None,
        conclusion: None,
        extraction_success: true,
        error: None,
    }
}

fn parse_tei(tei: &str, paper: &PaperSearchResult) -> Result<ExtractedContent, ExtractionError> {
    let mut reader = Reader::from_str(tei);
    reader.config_mut().trim_text(true);

    let mut title = None;
    let mut abstract_text = String::new();
    let mut sections: Vec<ExtractedSection> = Vec::new();

    let mut in_title = false;
    let mut in_abstract = false;
    let mut in_div = false;
    let mut in_head = false;
    let mut in_p = false;
    let mut current_heading = String::new();
    let mut current_text = String::new();
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ExtractionError::Parse(e.to_string()))?;
        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"title" if title.is_none() => in_title = true,
                b"abstract" => in_abstract = true,
                b"div" => {
                    in_div = true;
                    current_heading.clear();
                    current_text.clear();
                }
                b"head" if in_div => in_head = true,
                b"p" => in_p = true,
                _ => {}
            },
            Event::Text(e) => {
                let text = e
                    .unescape()
                    .map_err(|e| ExtractionError::Parse(e.to_string()))?
                    .into_owned();
                if in_title {
                    title = Some(text);
                } else if in_abstract {
                    abstract_text.push_str(&text);
                    abstract_text.push(' ');
                } else if in_head {
                    current_heading.push_str(&text);
                } else if in_p && in_div {
                    current_text.push_str(&text);
                    current_text.push(' ');
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"title" => in_title = false,
                b"abstract" => in_abstract = false,
                b"head" => in_head = false,
                b"p" => in_p = false,
                b"div" => {
                    in_div = false;
                    if !current_text.trim().is_empty() {
                        sections.push(ExtractedSection {
                            heading: if current_heading.trim().is_empty() {
                                "Section".to_string()
                            } else {
                                current_heading.trim().to_string()
                            },
                            text: current_text.trim().to_string(),
                        });
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let methods = find_section(&sections, &["method", "approach"]);
    let results = find_section(&sections, &["result", "experiment"]);
    let conclusion = find_section(&sections, &["conclusion", "discussion"]);

    Ok(ExtractedContent {
        title: title.or_else(|| Some(paper.title.clone())),
        abstract_text: if abstract_text.trim().is_empty() {
            paper.abstract_text.clone()
        } else {
            Some(abstract_text.trim().to_string())
        },
        sections,
        methods,
        results,
        conclusion,
        extraction_success: true,
        error: None,
    })
}

fn find_section(sections: &[ExtractedSection], needles: &[&str]) -> Option<String> {
    sections
        .iter()
        .find(|s| {
            let heading = s.heading.to_lowercase();
            needles.iter().any(|n| heading.contains(n))
        })
        .map(|s| s.text.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_urls_derives_arxiv_pdf_link() {
        let candidates = candidate_urls("https://arxiv.org/abs/1706.03762");
        assert!(candidates.contains(&"https://arxiv.org/pdf/1706.03762".to_string()));
    }

    #[test]
    fn candidate_urls_keeps_original_first() {
        let candidates = candidate_urls("https://example.com/paper.pdf");
        assert_eq!(candidates, vec!["https://example.com/paper.pdf".to_string()]);
    }

    const TEI: &str = r#"<TEI xmlns="http://www.tei-c.org/ns/1.0">
  <teiHeader>
    <fileDesc><titleStmt><title>Example Paper</title></titleStmt></fileDesc>
    <profileDesc><abstract><p>This is the abstract.</p></abstract></profileDesc>
  </teiHeader>
  <text><body>
    <div><head>Methods</head><p>We used a transformer.</p></div>
    <div><head>Results</head><p>It worked well.</p></div>
    <div><head>Conclusion</head><p>Future work remains.</p></div>
  </body></text>
</TEI>"#;

    fn sample_paper() -> PaperSearchResult {
        PaperSearchResult {
            title: "Example Paper".into(),
            abstract_text: None,
            url: None,
            pdf_url: None,
            publication_date: None,
            authors: vec![],
            venue: None,
        }
    }

    #[test]
    fn parses_title_abstract_and_sections() {
        let content = parse_tei(TEI, &sample_paper()).unwrap();
        assert_eq!(content.title.as_deref(), Some("Example Paper"));
        assert_eq!(content.abstract_text.as_deref(), Some("This is the abstract."));
        assert_eq!(content.sections.len(), 3);
    }

    #[test]
    fn derives_methods_results_conclusion_by_heading() {
        let content = parse_tei(TEI, &sample_paper()).unwrap();
        assert_eq!(content.methods.as_deref(), Some("We used a transformer."));
        assert_eq!(content.results.as_deref(), Some("It worked well."));
        assert_eq!(content.conclusion.as_deref(), Some("Future work remains."));
    }

    #[test]
    fn metadata_only_synthesizes_abstract_section() {
        let mut paper = sample_paper();
        paper.abstract_text = Some("An abstract with no PDF.".into());
        let content = metadata_only(&paper);
        assert!(content.extraction_success);
        assert_eq!(content.sections.len(), 1);
        assert_eq!(content.sections[0].heading, "Abstract");
    }
}
