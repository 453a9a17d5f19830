//! Message bus consumer: connects with retry, declares the request/response
//! topology, and drives one message through the pipeline at a time.

use std::sync::Arc;
use std::time::Duration;

use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gap_worker_core::models::{GapAnalysisRequest, GapAnalysisResponse};
use gap_worker_core::Pipeline;

const REQUEST_EXCHANGE: &str = "gap_analysis_requests";
const REQUEST_ROUTING_KEY: &str = "gap.analysis.request";
const REQUEST_QUEUE: &str = "gap_analysis_requests";
const RESPONSE_EXCHANGE: &str = "gap_analysis_responses";
const RESPONSE_ROUTING_KEY: &str = "gap.analysis.response";

const CONNECT_MAX_ATTEMPTS: u32 = 10;
const CONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const CONNECT_CAP_DELAY: Duration = Duration::from_secs(15);

pub struct Bus {
    channel: Channel,
}

impl Bus {
    /// Connects with exponential backoff (1s doubling, capped at 15s) up
    /// to 10 attempts, then declares the request/response topology and
    /// sets prefetch=1 so only one message is ever in flight per worker.
    pub async fn connect(amqp_url: &str) -> Result<Self, lapin::Error> {
        let mut attempt = 0;
        let connection = loop {
            match Connection::connect(amqp_url, ConnectionProperties::default()).await {
                Ok(conn) => break conn,
                Err(e) if attempt + 1 < CONNECT_MAX_ATTEMPTS => {
                    attempt += 1;
                    let delay = (CONNECT_BASE_DELAY * 2u32.pow(attempt - 1)).min(CONNECT_CAP_DELAY);
                    warn!(attempt, delay_secs = delay.as_secs(), error = %e, "bus connect failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        let channel = connection.create_channel().await?;
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await?;

        channel
            .exchange_declare(
                REQUEST_EXCHANGE,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .exchange_declare(
                RESPONSE_EXCHANGE,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_declare(
                REQUEST_QUEUE,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(
                REQUEST_QUEUE,
                REQUEST_EXCHANGE,
                REQUEST_ROUTING_KEY,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!("bus connected and topology declared");
        Ok(Self { channel })
    }

    /// Consumes deliveries until `cancel` fires, routing each through
    /// `pipeline` and publishing exactly one response per delivery.
    pub async fn run(
        self,
        pipeline: Arc<Pipeline>,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> Result<(), lapin::Error> {
        use futures_util::StreamExt;

        let mut consumer = self
            .channel
            .basic_consume(
                REQUEST_QUEUE,
                "gap-worker-consumer",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown requested, no longer accepting new deliveries");
                    return Ok(());
                }
                next = consumer.next() => {
                    let Some(delivery) = next else { return Ok(()); };
                    let delivery = match delivery {
                        Ok(d) => d,
                        Err(e) => {
                            error!(error = %e, "error receiving delivery");
                            continue;
                        }
                    };

                    let body = delivery.data.clone();
                    let response = self.handle_delivery(&body, &pipeline, deadline).await;

                    if let Err(e) = self.publish_response(&response).await {
                        error!(error = %e, "failed to publish response");
                    }
                    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                        error!(error = %e, "failed to ack delivery");
                    }
                }
            }
        }
    }

    async fn handle_delivery(
        &self,
        body: &[u8],
        pipeline: &Pipeline,
        deadline: Duration,
    ) -> GapAnalysisResponse {
        let request: GapAnalysisRequest = match serde_json::from_slice(body) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "malformed message body, acknowledging without processing");
                return malformed_response(e.to_string());
            }
        };

        let deadline_token = CancellationToken::new();
        let timer_token = deadline_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            timer_token.cancel();
        });

        pipeline.analyze(&request, &deadline_token).await
    }

    async fn publish_response(&self, response: &GapAnalysisResponse) -> Result<(), lapin::Error> {
        let body = serde_json::to_vec(response).unwrap_or_default();
        let mut headers = FieldTable::default();
        headers.insert(
            "correlation_id".into(),
            AMQPValue::LongString(LongString::from(response.correlation_id.clone())),
        );
        headers.insert(
            "request_id".into(),
            AMQPValue::LongString(LongString::from(response.request_id.clone())),
        );
        headers.insert(
            "status".into(),
            AMQPValue::LongString(LongString::from(response.status.to_string())),
        );

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2)
            .with_correlation_id(response.correlation_id.clone().into())
            .with_headers(headers);

        self.channel
            .basic_publish(
                RESPONSE_EXCHANGE,
                RESPONSE_ROUTING_KEY,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await?
            .await?;
        Ok(())
    }
}

fn malformed_response(error: String) -> GapAnalysisResponse {
    GapAnalysisResponse {
        request_id: String::new(),
        correlation_id: String::new(),
        status: gap_worker_core::models::AnalysisStatus::Failed,
        message: "request body was not valid JSON".to_string(),
        gap_analysis_id: None,
        total_gaps: 0,
        valid_gaps: 0,
        gaps: Vec::new(),
        error: Some(error),
        completed_at: None,
    }
}
