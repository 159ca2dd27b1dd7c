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

//! Async Collector (spec.md section 4.5).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fleetbench_core::aggregator::{self, AggregationConfig};
use fleetbench_core::capabilities::{ComputeProvider, MetricDimension, MetricsSink, ObjectStore};
use fleetbench_core::classifier::{classify, Classification, RawError};
use fleetbench_core::error::Failure;
use fleetbench_core::model::{AggregatedResult, ExecutionReport, LaunchRecord};

const POLL_INTERVAL_START: Duration = Duration::from_secs(15);
const POLL_INTERVAL_CAP: Duration = Duration::from_secs(120);
const TERMINATE_RETRY_ATTEMPTS: u32 = 5;
const TERMINATE_RETRY_BACKOFF: Duration = Duration::from_secs(30);

pub enum CollectOutcome {
    Succeeded(ExecutionReport, AggregatedResult),
    Failed(Failure),
}

pub struct Collector {
    compute: Arc<dyn ComputeProvider>,
    store: Arc<dyn ObjectStore>,
    metrics: Arc<dyn MetricsSink>,
    aggregation: AggregationConfig,
}

impl Collector {
    pub fn new(
        compute: Arc<dyn ComputeProvider>,
        store: Arc<dyn ObjectStore>,
        metrics: Arc<dyn MetricsSink>,
        aggregation: AggregationConfig,
    ) -> Self {
        Self { compute, store, metrics, aggregation }
    }

    /// Drive one `LaunchRecord` to a terminal outcome, spec.md section 4.5.
    /// `now` is injected so tests can simulate elapsed time without sleeping.
    pub async fn collect(
        &self,
        record: &LaunchRecord,
        requested_iterations: u32,
        now_fn: impl Fn() -> SystemTime,
    ) -> CollectOutcome {
        let sentinel_key = fleetbench_core::keys::sentinel(&record.job_id);
        let mut interval = POLL_INTERVAL_START;

        loop {
            match self.store.head(&sentinel_key).await {
                Ok(Some(_)) => break,
                Ok(None) => {}
                Err(e) => return CollectOutcome::Failed(Failure::new(Classification::Infrastructure, e.to_string())),
            }

            if now_fn() >= record.primary_timeout {
                return self.handle_timeout(record).await;
            }

            tokio::time::sleep(interval).await;
            interval = (interval * 2).min(POLL_INTERVAL_CAP);
        }

        let bytes = match self.store.get(&sentinel_key).await {
            Ok(Some(b)) => b,
            Ok(None) => return self.handle_timeout(record).await,
            Err(e) => return CollectOutcome::Failed(Failure::new(Classification::Infrastructure, e.to_string())),
        };

        let report: ExecutionReport = match serde_json::from_slice(&bytes) {
            Ok(r) => r,
            Err(e) => {
                return CollectOutcome::Failed(Failure::new(Classification::Infrastructure, format!("malformed execution report: {e}")))
            }
        };

        self.ensure_terminated(&record.vm_instance_id).await;

        if report.payload_exit_code != 0 {
            let classification = classify(&RawError {
                message: report.stderr_tail.clone(),
                payload_exit_code: Some(report.payload_exit_code),
                sentinel_observed: true,
                ..Default::default()
            });
            return CollectOutcome::Failed(
                Failure::new(classification, format!("payload exited {}", report.payload_exit_code))
                    .with_cause(report.stderr_tail),
            );
        }

        let wall_time = Duration::from_secs_f64(report.wall_time_secs.max(0.0));
        let kind = report
            .iterations
            .first()
            .map(|it| it.kind())
            .unwrap_or(fleetbench_core::model::BenchmarkKind::Stream);

        let aggregated = aggregator::aggregate(
            &record.job_id,
            &record.instance_type,
            kind,
            &report.iterations,
            requested_iterations,
            report.system_probe.clone(),
            wall_time,
            &self.aggregation,
        );

        self.emit_completion_metrics(&aggregated).await;

        if !aggregated.validation.is_valid {
            return CollectOutcome::Failed(Failure::new(
                Classification::Validation,
                format!("aggregation invalid: {:?}", aggregated.validation.errors),
            ));
        }

        CollectOutcome::Succeeded(report, aggregated)
    }

    async fn handle_timeout(&self, record: &LaunchRecord) -> CollectOutcome {
        self.ensure_terminated(&record.vm_instance_id).await;
        CollectOutcome::Failed(Failure::new(Classification::Timeout, "no sentinel observed before primary timeout"))
    }

    /// Idempotent VM termination with the retry budget from spec.md section 4.5 step 3.
    async fn ensure_terminated(&self, vm_instance_id: &str) {
        for attempt in 0..TERMINATE_RETRY_ATTEMPTS {
            if self.compute.terminate_vm(vm_instance_id).await.is_ok() {
                return;
            }
            tokio::time::sleep(TERMINATE_RETRY_BACKOFF * attempt.max(1)).await;
        }
    }

    async fn emit_completion_metrics(&self, result: &AggregatedResult) {
        self.metrics
            .emit(
                "fleetbench",
                "benchmark_execution_success",
                if result.validation.is_valid { 1.0 } else { 0.0 },
                "count",
                &[MetricDimension { name: "kind".into(), value: result.kind.as_str().into() }],
                SystemTime::now(),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetbench_core::capabilities::testing::{FakeComputeProvider, FakeMetricsSink, FakeObjectStore};
    use fleetbench_core::capabilities::ObjectStore as _;
    use fleetbench_core::model::{CacheLevelMetrics, IterationResult, SystemProbe};

    fn record() -> LaunchRecord {
        let now = SystemTime::now();
        LaunchRecord {
            job_id: "job-1".into(),
            instance_type: "m7i.large".into(),
            vm_instance_id: "vm-1".into(),
            launched_at: now,
            image_id: "ami-1".into(),
            payload_hash: String::new(),
            deadline: now + Duration::from_secs(3600),
            primary_timeout: now + Duration::from_secs(1800),
            emergency_timeout: now + Duration::from_secs(5400),
        }
    }

    fn probe() -> SystemProbe {
        SystemProbe {
            cpu_model: "x".into(),
            cache_bytes: CacheLevelMetrics { l1: 1.0, l2: 1.0, l3: 1.0, dram: 1.0 },
            numa_nodes: 1,
            memory_gb: 8.0,
        }
    }

    fn collector() -> (Collector, Arc<FakeObjectStore>, Arc<FakeComputeProvider>) {
        let compute = Arc::new(FakeComputeProvider::new());
        let store = Arc::new(FakeObjectStore::new());
        let metrics = Arc::new(FakeMetricsSink::new());
        let c = Collector::new(compute.clone(), store.clone(), metrics, AggregationConfig::default());
        (c, store, compute)
    }

    #[tokio::test]
    async fn clean_run_is_aggregated_and_vm_terminated() {
        let (collector, store, compute) = collector();
        let rec = record();
        let report = ExecutionReport {
            job_id: rec.job_id.clone(),
            iterations: (0..5)
                .map(|_| IterationResult::Stream { copy: 42.0, scale: 42.0, add: 42.0, triad: 41.95, error: false })
                .collect(),
            system_probe: probe(),
            wall_time_secs: 60.0,
            payload_exit_code: 0,
            stderr_tail: String::new(),
        };
        store
            .put(
                &fleetbench_core::keys::sentinel(&rec.job_id),
                serde_json::to_vec(&report).unwrap(),
                Default::default(),
            )
            .await
            .unwrap();

        compute.launch_vm(fleetbench_core::capabilities::LaunchRequest {
            instance_type: "m7i.large".into(),
            image_id: "ami".into(),
            user_data: String::new(),
            tags: Default::default(),
        })
        .await
        .ok();

        let outcome = collector.collect(&rec, 5, SystemTime::now).await;
        match outcome {
            CollectOutcome::Succeeded(report, result) => {
                assert!(result.validation.is_valid);
                assert_eq!(report.iterations.len(), 5);
            }
            CollectOutcome::Failed(f) => panic!("expected success, got {f}"),
        }
    }

    #[tokio::test]
    async fn no_sentinel_before_deadline_times_out() {
        let (collector, _store, _compute) = collector();
        let rec = record();
        let past_deadline = rec.primary_timeout + Duration::from_secs(1);
        let outcome = collector.collect(&rec, 5, move || past_deadline).await;
        match outcome {
            CollectOutcome::Failed(f) => assert_eq!(f.classification, Classification::Timeout),
            CollectOutcome::Succeeded(..) => panic!("expected timeout"),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_is_classified_as_benchmark() {
        let (collector, store, _compute) = collector();
        let rec = record();
        let report = ExecutionReport {
            job_id: rec.job_id.clone(),
            iterations: vec![],
            system_probe: probe(),
            wall_time_secs: 10.0,
            payload_exit_code: 127,
            stderr_tail: "gcc: command not found".into(),
        };
        store
            .put(
                &fleetbench_core::keys::sentinel(&rec.job_id),
                serde_json::to_vec(&report).unwrap(),
                Default::default(),
            )
            .await
            .unwrap();
        let outcome = collector.collect(&rec, 5, SystemTime::now).await;
        match outcome {
            CollectOutcome::Failed(f) => assert_eq!(f.classification, Classification::Benchmark),
            CollectOutcome::Succeeded(..) => panic!("expected benchmark failure"),
        }
    }
}
