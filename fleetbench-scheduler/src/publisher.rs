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

//! Result Publisher (spec.md section 4.9). Publishing failures never change
//! a job's outcome; they're logged and left for a bounded retry queue.

use std::sync::Arc;
use std::time::SystemTime;

use fleetbench_core::capabilities::{MetricDimension, MetricsSink, ObjectMetadata, ObjectStore};
use fleetbench_core::model::{AggregatedResult, ExecutionReport};

pub struct Publisher {
    store: Arc<dyn ObjectStore>,
    metrics: Arc<dyn MetricsSink>,
    region: String,
    retry_queue: tokio::sync::Mutex<Vec<PendingPublish>>,
}

struct PendingPublish {
    key: String,
    bytes: Vec<u8>,
}

impl Publisher {
    pub fn new(store: Arc<dyn ObjectStore>, metrics: Arc<dyn MetricsSink>, region: String) -> Self {
        Self { store, metrics, region, retry_queue: tokio::sync::Mutex::new(Vec::new()) }
    }

    /// Write the raw report, the latest `AggregatedResult`, and a metrics
    /// event, spec.md section 4.9. Each artifact is attempted independently;
    /// a failure on one does not block the others.
    pub async fn publish(&self, report: &ExecutionReport, result: &AggregatedResult) {
        let now = chrono::Utc::now();
        let raw_key = fleetbench_core::keys::raw_result(
            &self.region,
            &result.instance_type,
            &result.job_id,
            now.format("%Y").to_string().parse().unwrap_or(1970),
            now.format("%m").to_string().parse().unwrap_or(1),
            now.format("%d").to_string().parse().unwrap_or(1),
        );
        self.try_put(&raw_key, report).await;

        let processed_key = result.object_key();
        self.try_put(&processed_key, result).await;

        let historical_key = fleetbench_core::keys::processed_historical(
            &now.format("%Y-%m-%d").to_string(),
            result.kind.as_str(),
            &result.instance_type,
        );
        self.try_put(&historical_key, result).await;

        self.emit_metrics(result).await;
    }

    async fn try_put(&self, key: &str, value: &impl serde::Serialize) {
        let bytes = match serde_json::to_vec(value) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to serialize publish artifact");
                return;
            }
        };
        if let Err(e) = self.store.put(key, bytes.clone(), ObjectMetadata::default()).await {
            tracing::warn!(key, error = %e, "failed to publish artifact, queued for retry");
            self.retry_queue.lock().await.push(PendingPublish { key: key.to_string(), bytes });
        }
    }

    /// Drain the bounded retry queue. Intended to run on a slow interval
    /// separate from the main publish path, per spec.md section 4.9.
    pub async fn retry_pending(&self) {
        let pending = std::mem::take(&mut *self.retry_queue.lock().await);
        for p in pending {
            if let Err(e) = self.store.put(&p.key, p.bytes.clone(), ObjectMetadata::default()).await {
                tracing::warn!(key = %p.key, error = %e, "publish retry failed again");
                self.retry_queue.lock().await.push(p);
            }
        }
    }

    async fn emit_metrics(&self, result: &AggregatedResult) {
        let family = result.instance_type.split('.').next().unwrap_or("").to_string();
        let dims = [
            MetricDimension { name: "instance_type".into(), value: result.instance_type.clone() },
            MetricDimension { name: "family".into(), value: family },
            MetricDimension { name: "kind".into(), value: result.kind.as_str().to_string() },
            MetricDimension { name: "region".into(), value: self.region.clone() },
            MetricDimension { name: "success".into(), value: result.validation.is_valid.to_string() },
        ];
        self.metrics
            .emit("fleetbench", "quality_score", result.quality_score, "ratio", &dims, SystemTime::now())
            .await;
        self.metrics
            .emit(
                "fleetbench",
                "execution_duration_seconds",
                result.execution_duration.as_secs_f64(),
                "seconds",
                &dims,
                SystemTime::now(),
            )
            .await;
    }

    pub async fn pending_retry_count(&self) -> usize {
        self.retry_queue.lock().await.len()
    }
}
