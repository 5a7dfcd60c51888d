//! OTLP/JSON metrics push.

use std::sync::Arc;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use super::{Metrics, Sampler, Snapshot};
use crate::config;

const UNIT_COUNT: &str = "1";
const UNIT_PERCENT: &str = "%";
const CUMULATIVE: &str = "AGGREGATION_TEMPORALITY_CUMULATIVE";
const UNREADABLE_BODY: &str = "<unreadable body>";

/// Reasons a push did not land. Never leaves [`Exporter::tick`].
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Connection, timeout or body encoding failure.
    #[error("failed to reach collector: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("collector answered {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Top-level OTLP metrics payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub resource_metrics: Vec<ResourceMetrics>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetrics {
    pub scope_metrics: Vec<ScopeMetrics>,
}

#[derive(Debug, Serialize)]
pub struct ScopeMetrics {
    pub metrics: Vec<Metric>,
}

#[derive(Debug, Serialize)]
pub struct Metric {
    pub name: &'static str,
    pub unit: &'static str,
    #[serde(flatten)]
    pub data: Data,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Data {
    Sum(Sum),
    Gauge(Gauge),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sum {
    pub data_points: Vec<DataPoint>,
    pub aggregation_temporality: &'static str,
    pub is_monotonic: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Gauge {
    pub data_points: Vec<DataPoint>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    #[serde(flatten)]
    pub value: Value,
    pub time_unix_nano: i64,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    AsInt(i64),
    AsDouble(f64),
}

#[derive(Debug, Serialize)]
pub struct Attribute {
    pub key: &'static str,
    pub value: AttributeValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeValue {
    pub string_value: String,
}

impl Attribute {
    fn new(key: &'static str, value: impl Into<String>) -> Self {
        Self {
            key,
            value: AttributeValue {
                string_value: value.into(),
            },
        }
    }
}

fn saturating_int(value: u64) -> Value {
    Value::AsInt(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Builds an [`Envelope`] per tick and posts it to the collector.
pub struct Exporter {
    client: Client,
    url: String,
    api_key: String,
    source: String,
    sampler: Arc<dyn Sampler>,
}

impl Exporter {
    /// Create a new [`Exporter`] from the `metrics` configuration.
    pub fn new(
        config: &config::Metrics,
        sampler: Arc<dyn Sampler>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            source: config.source.clone(),
            sampler,
        })
    }

    fn point(&self, value: Value, time_unix_nano: i64) -> DataPoint {
        DataPoint {
            value,
            time_unix_nano,
            attributes: vec![Attribute::new("source", &self.source)],
        }
    }

    fn sum(name: &'static str, data_points: Vec<DataPoint>, is_monotonic: bool) -> Metric {
        Metric {
            name,
            unit: UNIT_COUNT,
            data: Data::Sum(Sum {
                data_points,
                aggregation_temporality: CUMULATIVE,
                is_monotonic,
            }),
        }
    }

    fn gauge(name: &'static str, point: DataPoint) -> Metric {
        Metric {
            name,
            unit: UNIT_PERCENT,
            data: Data::Gauge(Gauge {
                data_points: vec![point],
            }),
        }
    }

    /// Shape a snapshot plus fresh host readings into an [`Envelope`].
    pub fn envelope(&self, snapshot: &Snapshot, time_unix_nano: i64) -> Envelope {
        let mut metrics = Vec::with_capacity(snapshot.requests.len() + 4);

        for (endpoint, count) in &snapshot.requests {
            let mut point = self.point(saturating_int(*count), time_unix_nano);
            point
                .attributes
                .insert(0, Attribute::new("endpoint", endpoint.to_string()));
            metrics.push(Self::sum("requests", vec![point], true));
        }

        metrics.push(Self::sum(
            "active_users",
            vec![self.point(saturating_int(snapshot.active_users), time_unix_nano)],
            false,
        ));

        let auth_points = [("success", snapshot.auth_success), ("failure", snapshot.auth_failure)]
            .into_iter()
            .map(|(status, count)| {
                let mut point = self.point(saturating_int(count), time_unix_nano);
                point.attributes.push(Attribute::new("status", status));
                point
            })
            .collect();
        metrics.push(Self::sum("auth_attempts", auth_points, false));

        metrics.push(Self::gauge(
            "cpu_usage",
            self.point(Value::AsInt(self.sampler.cpu_percent()), time_unix_nano),
        ));
        metrics.push(Self::gauge(
            "memory_usage",
            self.point(Value::AsDouble(self.sampler.memory_percent()), time_unix_nano),
        ));

        Envelope {
            resource_metrics: vec![ResourceMetrics {
                scope_metrics: vec![ScopeMetrics { metrics }],
            }],
        }
    }

    /// Push the current state of `metrics` once.
    pub async fn export(&self, metrics: &Metrics) -> Result<(), ExportError> {
        let time_unix_nano = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let envelope = self.envelope(&metrics.snapshot(), time_unix_nano);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&envelope)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    tracing::warn!(%status, error = %err, "cannot read collector response");
                    UNREADABLE_BODY.to_owned()
                },
            };
            return Err(ExportError::Rejected { status, body });
        }

        Ok(())
    }

    /// [`Exporter::export`], with failures logged and dropped.
    pub async fn tick(&self, metrics: &Metrics) {
        match self.export(metrics).await {
            Ok(()) => tracing::debug!(url = %self.url, "metrics pushed"),
            Err(ExportError::Rejected { status, body }) => {
                tracing::error!(%status, %body, "collector refused metrics")
            },
            Err(err) => tracing::error!(error = %err, "failed to push metrics"),
        }
    }
}
