//! Academic paper search against the arXiv Atom feed, with query
//! degradation and duplicate suppression.

use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::Reader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::PaperSearchResult;
use crate::rate_limit::RateLimiter;
use crate::retry::{retry, RetryPolicy};
use crate::similarity::dedup_by_title;

const ARXIV_API: &str = "https://export.arxiv.org/api/query";
const DEDUP_THRESHOLD: f64 = 0.8;

pub struct SearchClient {
    http: reqwest::Client,
    rate_limiter: RateLimiter,
    retry_policy: RetryPolicy,
}

impl SearchClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            rate_limiter: RateLimiter::new(5, Duration::from_secs(60)),
            retry_policy: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_secs(1),
                cap: Duration::from_secs(10),
            },
        }
    }

    /// Searches for `query`, degrading to a 2-word then 1-word query if the
    /// original yields nothing, then deduplicates by title similarity.
    /// Never raises: transport and parse failures degrade to an empty list.
    pub async fn search_papers(
        &self,
        query: &str,
        max_results: usize,
        cancel: &CancellationToken,
    ) -> Vec<PaperSearchResult> {
        let mut results = self.search_once(query, max_results, cancel).await;

        if results.is_empty() {
            let words: Vec<&str> = query.split_whitespace().collect();
            if words.len() > 2 {
                let degraded = words[..2].join(" ");
                debug!(original = query, degraded, "degrading search query to 2 words");
                results = self.search_once(&degraded, max_results, cancel).await;
            }
        }
        if results.is_empty() {
            if let Some(first) = query.split_whitespace().next() {
                debug!(original = query, degraded = first, "degrading search query to 1 word");
                results = self.search_once(first, max_results, cancel).await;
            }
        }

        dedup_by_title(results, DEDUP_THRESHOLD, |r| r.title.as_str())
            .into_iter()
            .take(max_results)
            .collect()
    }

    async fn search_once(
        &self,
        query: &str,
        max_results: usize,
        cancel: &CancellationToken,
    ) -> Vec<PaperSearchResult> {
        if self.rate_limiter.acquire(cancel).await.is_err() {
            return Vec::new();
        }

        let result = retry(self.retry_policy, cancel, || async {
            let resp = self
                .http
                .get(ARXIV_API)
                .query(&[
                    ("search_query", format!("all:{query}")),
                    ("start", "0".into()),
                    ("max_results", max_results.to_string()),
                ])
                .send()
                .await
                .map_err(|e| e.to_string())?;
            if !resp.status().is_success() {
                return Err(format!("arxiv returned status {}", resp.status()));
            }
            resp.text().await.map_err(|e| e.to_string())
        })
        .await;

        match result {
            Ok(body) => parse_atom_feed(&body).unwrap_or_else(|e| {
                warn!(error = %e, "failed to parse arxiv atom feed");
                Vec::new()
            }),
            Err(e) => {
                warn!(error = %e, "arxiv search request failed");
                Vec::new()
            }
        }
    }
}

#[derive(Default)]
struct EntryBuilder {
    title: String,
    summary: String,
    link: Option<String>,
    pdf_link: Option<String>,
    authors: Vec<String>,
    published: Option<String>,
}

impl EntryBuilder {
    fn finish(self) -> PaperSearchResult {
        PaperSearchResult {
            title: self.title.trim().replace('\n', " "),
            abstract_text: if self.summary.trim().is_empty() {
                None
            } else {
                Some(self.summary.trim().replace('\n', " "))
            },
            url: self.link,
            pdf_url: self.pdf_link,
            publication_date: self.published,
            authors: self.authors,
            venue: None,
        }
    }
}

fn parse_atom_feed(body: &str) -> Result<Vec<PaperSearchResult>, quick_xml::Error> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut results = Vec::new();
    let mut current: Option<EntryBuilder> = None;
    let mut in_title = false;
    let mut in_summary = false;
    let mut in_published = false;
    let mut in_author = false;
    let mut in_name = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"entry" => current = Some(EntryBuilder::default()),
                b"title" => in_title = true,
                b"summary" => in_summary = true,
                b"published" => in_published = true,
                b"author" => in_author = true,
                b"name" => in_name = true,
                b"link" => {
                    if let Some(entry) = current.as_mut() {
                        let href = e
                            .attributes()
                            .flatten()
                            .find(|a| a.key.as_ref() == b"href")
                            .map(|a| String::from_utf8_lossy(&a.value).to_string());
                        let title_attr = e
                            .attributes()
                            .flatten()
                            .find(|a| a.key.as_ref() == b"title")
                            .map(|a| String::from_utf8_lossy(&a.value).to_string());
                        if let Some(href) = href {
                            if title_attr.as_deref() == Some("pdf") {
                                entry.pdf_link = Some(href);
                            } else if entry.link.is_none() {
                                entry.link = Some(href);
                            }
                        }
                    }
                }
                _ => {}
            },
            Event::Text(e) => {
                let text = e.unescape()?.into_owned();
                if let Some(entry) = current.as_mut() {
                    if in_title {
                        entry.title.push_str(&text);
                    } else if in_summary {
                        entry.summary.push_str(&text);
                    } else if in_published {
                        entry.published = Some(text);
                    } else if in_author && in_name {
                        entry.authors.push(text);
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"entry" => {
                    if let Some(entry) = current.take() {
                        results.push(entry.finish());
                    }
                }
                b"title" => in_title = false,
                b"summary" => in_summary = false,
                b"published" => in_published = false,
                b"author" => in_author = false,
                b"name" => in_name = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <title>Attention Is All You Need</title>
    <summary>We propose a new simple network architecture.</summary>
    <published>2017-06-12T00:00:00Z</published>
    <author><name>Ashish Vaswani</name></author>
    <author><name>Noam Shazeer</name></author>
    <link href="http://arxiv.org/abs/1706.03762" rel="alternate"/>
    <link title="pdf" href="http://arxiv.org/pdf/1706.03762" rel="related"/>
  </entry>
  <entry>
    <title>Another Paper</title>
    <summary>Some other abstract.</summary>
    <link href="http://arxiv.org/abs/9999.00001" rel="alternate"/>
  </entry>
</feed>"#;

    #[test]
    fn parses_entries_with_authors_and_pdf_link() {
        let results = parse_atom_feed(FEED).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Attention Is All You Need");
        assert_eq!(results[0].authors, vec!["Ashish Vaswani", "Noam Shazeer"]);
        assert_eq!(
            results[0].pdf_url.as_deref(),
            Some("http://arxiv.org/pdf/1706.03762")
        );
        assert_eq!(
            results[0].url.as_deref(),
            Some("http://arxiv.org/abs/1706.03762")
        );
    }

    #[test]
    fn second_entry_has_no_pdf_link() {
        let results = parse_atom_feed(FEED).unwrap();
        assert!(results[1].pdf_url.is_none());
    }

    #[test]
    fn empty_feed_parses_to_empty_list() {
        let feed = r#"<feed xmlns="http://www.w3.org/2005/Atom"></feed>"#;
        let results = parse_atom_feed(feed).unwrap();
        assert!(results.is_empty());
    }
}
