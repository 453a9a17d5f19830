//! Process lifecycle: validate configuration, initialize collaborators,
//! probe readiness, then hand off to the bus consumer until shutdown.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gap_worker_core::{ExtractionClient, LlmClient, Pipeline, SearchClient, Settings, Store};

use crate::bus::Bus;

pub struct Supervisor {
    settings: Settings,
}

impl Supervisor {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Runs startup probes, then consumes until `cancel` fires. Startup
    /// failures exit non-zero unless `settings.debug` is set, in which
    /// case the worker logs a warning and continues in degraded mode.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let settings = self.settings;
        info!(?settings, "starting gap analysis worker");

        let store = match Store::open(&settings.db_path).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!(error = %e, "store initialization failed");
                if settings.debug {
                    warn!("continuing in degraded mode (DEBUG=1)");
                    return Ok(());
                }
                std::process::exit(1);
            }
        };

        let http = Client::builder()
            .timeout(settings.search_timeout)
            .build()?;

        if let Err(e) = probe_grobid(&http, &settings.grobid_url).await {
            warn!(error = %e, "extraction service readiness probe failed");
            if !settings.debug {
                std::process::exit(1);
            }
        }

        let llm = Arc::new(LlmClient::new(
            http.clone(),
            settings.gemini_api_key.clone(),
            settings.gemini_model.clone(),
            settings.gemini_rate_limit_per_minute,
        ));
        let search = Arc::new(SearchClient::new(http.clone()));
        let extraction = Arc::new(ExtractionClient::new(
            http.clone(),
            settings.grobid_url.clone(),
            settings.grobid_timeout,
        ));
        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            llm,
            search,
            extraction,
            settings.search_max_results,
        ));

        let bus = match Bus::connect(&settings.rabbitmq_url()).await {
            Ok(bus) => bus,
            Err(e) => {
                error!(error = %e, "bus connection failed after retries");
                if settings.debug {
                    warn!("continuing without bus connectivity (DEBUG=1)");
                    return Ok(());
                }
                std::process::exit(1);
            }
        };

        info!("worker ready, consuming gap analysis requests");
        bus.run(pipeline, settings.async_timeout, cancel).await?;
        info!("worker shut down cleanly");
        Ok(())
    }
}

async fn probe_grobid(http: &Client, grobid_url: &str) -> Result<(), reqwest::Error> {
    let resp = http
        .get(format!("{grobid_url}/api/isalive"))
        .timeout(Duration::from_secs(5))
        .send()
        .await?;
    resp.error_for_status().map(|_| ())
}
