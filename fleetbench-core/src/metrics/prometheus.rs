// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Prometheus-backed `MetricsSink` (spec.md section 6). Gauges are created
//! lazily per `(namespace, name)` pair the first time they're emitted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use prometheus::{Encoder, Gauge, Registry, TextEncoder};

use crate::capabilities::{MetricDimension, MetricsSink};
use crate::error::{Error, Result};

static COLLECTOR: OnceCell<Arc<PrometheusMetricsSink>> = OnceCell::new();

pub struct PrometheusMetricsSink {
    registry: Registry,
    gauges: Mutex<HashMap<String, Gauge>>,
}

impl PrometheusMetricsSink {
    pub fn new(registry: Registry) -> Self {
        Self { registry, gauges: Mutex::new(HashMap::new()) }
    }

    /// Process-wide singleton bound to the default prometheus registry,
    /// mirroring the scheduler's other process-wide singletons.
    pub fn current() -> Arc<PrometheusMetricsSink> {
        COLLECTOR
            .get_or_init(|| Arc::new(PrometheusMetricsSink::new(prometheus::default_registry().clone())))
            .clone()
    }

    fn gauge(&self, metric_name: &str) -> Gauge {
        let mut gauges = self.gauges.lock();
        if let Some(g) = gauges.get(metric_name) {
            return g.clone();
        }
        let gauge = Gauge::new(metric_name.to_string(), metric_name.to_string())
            .expect("gauge names are sanitized by the caller");
        self.registry
            .register(Box::new(gauge.clone()))
            .expect("metric name collision should not happen for sanitized names");
        gauges.insert(metric_name.to_string(), gauge.clone());
        gauge
    }
}

fn sanitize(namespace: &str, name: &str) -> String {
    format!("{namespace}_{name}").replace(['.', '-', ' '], "_")
}

#[async_trait]
impl MetricsSink for PrometheusMetricsSink {
    async fn emit(
        &self,
        namespace: &str,
        name: &str,
        value: f64,
        _unit: &str,
        _dimensions: &[MetricDimension],
        _timestamp: SystemTime,
    ) {
        let gauge = self.gauge(&sanitize(namespace, name));
        gauge.set(value);
    }
}

pub fn render() -> Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::Internal(format!("error encoding prometheus metrics: {e}")))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_creates_and_updates_gauge() {
        let sink = PrometheusMetricsSink::new(Registry::new());
        sink.emit("fleetbench", "jobs_active", 3.0, "count", &[], SystemTime::now()).await;
        sink.emit("fleetbench", "jobs_active", 5.0, "count", &[], SystemTime::now()).await;
        assert_eq!(sink.gauges.lock().len(), 1);
    }
}
