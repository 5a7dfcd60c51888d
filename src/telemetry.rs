//! Telemetry logic.
//! Request, session and auth counters pushed to an OTLP/JSON collector.
mod exporter;
mod hooks;
mod sampler;
mod scheduler;
mod store;

pub use exporter::{
    Attribute, AttributeValue, Data, DataPoint, Envelope, ExportError,
    Exporter, Gauge, Metric, ResourceMetrics, ScopeMetrics, Sum, Value,
};
pub use hooks::{track_auth, track_requests};
pub use sampler::{HostSampler, Sampler, cpu_percent, memory_percent};
pub use scheduler::Scheduler;
pub use store::{Endpoint, Metrics, Snapshot};

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex, PoisonError};

    use axum::Router;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::routing::post;

    use crate::config;

    /// One push as seen by the fake collector.
    #[derive(Debug, Clone)]
    pub struct Received {
        pub authorization: String,
        pub content_type: String,
        pub body: serde_json::Value,
    }

    /// Throwaway collector answering every push with a fixed status.
    pub struct Collector {
        pub url: String,
        received: Arc<Mutex<Vec<Received>>>,
    }

    impl Collector {
        pub fn received(&self) -> Vec<Received> {
            self.received
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    pub fn metrics_config(url: &str) -> config::Metrics {
        config::Metrics {
            source: "pizza-test".into(),
            url: url.into(),
            api_key: "secret-key".into(),
            ..Default::default()
        }
    }

    pub async fn spawn_collector(status: StatusCode) -> Collector {
        let received = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::clone(&received);

        let app = Router::new().route(
            "/v1/metrics",
            post(move |headers: HeaderMap, body: Bytes| {
                let store = Arc::clone(&store);
                async move {
                    let read = |name: header::HeaderName| {
                        headers
                            .get(name)
                            .and_then(|value| value.to_str().ok())
                            .unwrap_or_default()
                            .to_owned()
                    };
                    store.lock().unwrap().push(Received {
                        authorization: read(header::AUTHORIZATION),
                        content_type: read(header::CONTENT_TYPE),
                        body: serde_json::from_slice(&body).unwrap(),
                    });

                    let reply = if status.is_success() {
                        "ok"
                    } else {
                        "collector unavailable"
                    };
                    (status, reply)
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Collector {
            url: format!("http://{addr}/v1/metrics"),
            received,
        }
    }
}
