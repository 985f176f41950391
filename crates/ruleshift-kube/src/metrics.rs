//! Custom metrics API source.

use chrono::{DateTime, Utc};
use kube::Client;
use ruleshift_autoscale::{MetricError, MetricResult, MetricSource, Sample};
use ruleshift_rules::Quantity;
use serde::Deserialize;
use tracing::debug;

/// `custom.metrics.k8s.io/v1beta1` MetricValueList.
#[derive(Debug, Deserialize)]
struct MetricValueList {
    #[serde(default)]
    items: Vec<MetricValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricValue {
    timestamp: DateTime<Utc>,
    value: String,
}

/// Reads service metrics from the custom metrics API. The scope is the
/// namespace of the rule.
#[derive(Clone)]
pub struct CustomMetricsSource {
    client: Client,
}

impl CustomMetricsSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn metric_path(namespace: &str, metric: &str) -> String {
    format!("/apis/custom.metrics.k8s.io/v1beta1/namespaces/{namespace}/services/*/{metric}")
}

impl MetricSource for CustomMetricsSource {
    async fn fetch(&self, metric: &str, scope: &str) -> MetricResult<Vec<Sample>> {
        let path = metric_path(scope, metric);
        let request = http::Request::get(path.as_str())
            .body(Vec::new())
            .map_err(|e| MetricError::Fetch {
                metric: metric.to_string(),
                reason: e.to_string(),
            })?;

        let list: MetricValueList = self.client.request(request).await.map_err(|e| match e {
            kube::Error::SerdeError(e) => MetricError::Parse {
                metric: metric.to_string(),
                reason: e.to_string(),
            },
            e => MetricError::Fetch {
                metric: metric.to_string(),
                reason: e.to_string(),
            },
        })?;
        debug!(%metric, namespace = %scope, items = list.items.len(), "metric fetched");

        list.items
            .into_iter()
            .map(|item| {
                let value = Quantity::parse(&item.value).map_err(|e| MetricError::Parse {
                    metric: metric.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(Sample::new(item.timestamp, value))
            })
            .collect()
    }
}
