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

//! Campaign runner: wires the planner, queue, launcher, collector,
//! publisher, watchdog and tracker into one end-to-end execution (spec.md
//! section 4, "Overview of the pipeline").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{NaiveTime, Utc};
use tokio_util::sync::CancellationToken;

use fleetbench_core::aggregator::AggregationConfig;
use fleetbench_core::capabilities::{ComputeProvider, MetricsSink, ObjectMetadata, ObjectStore, Quota};
use fleetbench_core::catalog::Catalog;
use fleetbench_core::classifier::Classification;
use fleetbench_core::config::{CampaignSpec, WindowSpec};
use fleetbench_core::error::Result;
use fleetbench_core::model::{JobState, JournalEntry, Window};

use fleetbench_launcher::{Collector, CollectOutcome, Launcher, LauncherConfig};

use crate::config::SchedulerConfig;
use crate::planner;
use crate::publisher::Publisher;
use crate::queue::{JobQueue, Outcome};
use crate::tracker::{Snapshot, Tracker};
use crate::watchdog::Watchdog;

/// Process-level exit codes (spec.md section 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    AllSucceeded = 0,
    NonRetryableFailures = 1,
    CircuitBreakerEngaged = 2,
    PlanningFailed = 3,
}

pub struct CampaignReport {
    pub exit_code: ExitCode,
    pub snapshot: Snapshot,
}

pub struct Campaign {
    compute: Arc<dyn ComputeProvider>,
    store: Arc<dyn ObjectStore>,
    metrics: Arc<dyn MetricsSink>,
    config: SchedulerConfig,
    spec: CampaignSpec,
}

impl Campaign {
    pub fn new(
        compute: Arc<dyn ComputeProvider>,
        store: Arc<dyn ObjectStore>,
        metrics: Arc<dyn MetricsSink>,
        config: SchedulerConfig,
        spec: CampaignSpec,
    ) -> Self {
        Self { compute, store, metrics, config, spec }
    }

    pub async fn run(&self) -> Result<CampaignReport> {
        let catalog = Catalog::load(&self.compute, &self.spec.region).await?;
        let windows: Vec<Window> = self.spec.windows.iter().map(window_from_spec).collect();

        let mut quotas = HashMap::new();
        for family in self.spec.families.iter() {
            quotas.insert(family.clone(), self.compute.quota(family).await.unwrap_or(Quota { limit: u32::MAX, in_use: 0 }));
        }

        let plan = match planner::plan(&self.spec, &catalog, &windows, &quotas, 1, SystemTime::now()) {
            Ok(p) => p,
            Err(_) => {
                return Ok(CampaignReport {
                    exit_code: ExitCode::PlanningFailed,
                    snapshot: Tracker::new(0).snapshot(),
                })
            }
        };

        let family_caps: HashMap<String, u32> = quotas.iter().map(|(f, q)| (f.clone(), q.limit)).collect();
        let queue = Arc::new(JobQueue::new(self.spec.max_concurrent, family_caps));
        let tracker = Arc::new(Tracker::new(plan.jobs.len() as u32));
        let watchdog = Arc::new(Watchdog::new(
            self.compute.clone(),
            self.config.circuit_breaker_window,
            self.config.circuit_breaker_threshold,
        ));
        let publisher = Arc::new(Publisher::new(self.store.clone(), self.metrics.clone(), self.config.region.clone()));

        let launcher = Arc::new(Launcher::new(
            self.compute.clone(),
            self.store.clone(),
            LauncherConfig {
                image_id_x86: self.config.image_id_x86.clone(),
                image_id_arm: self.config.image_id_arm.clone(),
                object_store_base_url: format!("s3://{}", self.config.object_store_bucket),
                primary_timeout: self.config.primary_timeout,
                emergency_buffer: self.config.emergency_buffer,
            },
        ));
        let collector = Arc::new(Collector::new(
            self.compute.clone(),
            self.store.clone(),
            self.metrics.clone(),
            AggregationConfig { cv_max: self.spec.quality_thresholds.cv_max, min_efficiency: self.spec.quality_thresholds.min_efficiency, ..Default::default() },
        ));

        for job in plan.jobs {
            let resumed_done = self.journal_status(&job.job_id).await.map(|e| e.is_resumable_done()).unwrap_or(false);
            if resumed_done {
                tracker.record_transition(None, JobState::Succeeded);
                continue;
            }
            tracker.record_transition(None, job.state);
            queue.enqueue(job);
        }

        let cancel = CancellationToken::new();
        let sweep_handle = self.spawn_watchdog_sweep(watchdog.clone(), cancel.clone());

        let catalog = Arc::new(catalog);
        let mut workers = Vec::new();
        for _ in 0..self.spec.max_concurrent {
            workers.push(self.spawn_worker(
                queue.clone(),
                catalog.clone(),
                launcher.clone(),
                collector.clone(),
                publisher.clone(),
                tracker.clone(),
                watchdog.clone(),
                self.store.clone(),
                cancel.clone(),
            ));
        }

        while !queue.is_empty_and_idle() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        cancel.cancel();
        for w in workers {
            let _ = w.await;
        }
        sweep_handle.abort();

        let snapshot = tracker.snapshot();
        let now = SystemTime::now();
        let exit_code = if watchdog.circuit_breaker_engaged(now) {
            ExitCode::CircuitBreakerEngaged
        } else if snapshot.by_state.get("failed").copied().unwrap_or(0) > 0
            || snapshot.by_state.get("timed_out").copied().unwrap_or(0) > 0
        {
            ExitCode::NonRetryableFailures
        } else {
            ExitCode::AllSucceeded
        };

        Ok(CampaignReport { exit_code, snapshot })
    }

    /// Last known journal status for a job, if one was ever written
    /// (spec.md section 8 "Restart safety"). Any read or parse failure is
    /// treated as "no prior status" so a corrupt entry never blocks a run.
    async fn journal_status(&self, job_id: &str) -> Option<JournalEntry> {
        let bytes = self.store.get(&fleetbench_core::keys::journal_job(job_id)).await.ok().flatten()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn spawn_watchdog_sweep(&self, watchdog: Arc<Watchdog>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let interval = self.config.watchdog_sweep_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let reaped = watchdog.sweep(SystemTime::now()).await;
                        for r in reaped {
                            tracing::warn!(job_id = %r.job_id, "watchdog reclaimed vm past emergency timeout");
                        }
                    }
                }
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_worker(
        &self,
        queue: Arc<JobQueue>,
        catalog: Arc<Catalog>,
        launcher: Arc<Launcher>,
        collector: Arc<Collector>,
        publisher: Arc<Publisher>,
        tracker: Arc<Tracker>,
        watchdog: Arc<Watchdog>,
        store: Arc<dyn ObjectStore>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if watchdog.circuit_breaker_engaged(SystemTime::now()) {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(5)) => continue,
                    }
                }

                let mut job = tokio::select! {
                    _ = cancel.cancelled() => break,
                    job = queue.reserve_next() => job,
                };

                tracker.record_transition(Some(job.state), JobState::Scheduled);
                let _ = job.transition(JobState::Scheduled);
                tracker.record_transition(Some(JobState::Scheduled), JobState::Launching);
                let _ = job.transition(JobState::Launching);

                let instance = match catalog.lookup(&job.instance_type) {
                    Ok(i) => i.clone(),
                    Err(_) => {
                        queue.release(job, Outcome::Failed(Classification::Infrastructure));
                        continue;
                    }
                };

                let record = match launcher.launch(&job, &instance, &cancel).await {
                    Ok(r) => r,
                    Err(failure) => {
                        tracker.record_failure(failure.classification);
                        let _ = job.transition(JobState::Failed);
                        tracker.record_transition(Some(JobState::Launching), JobState::Failed);
                        watchdog.record_outcome(false, SystemTime::now());
                        write_journal(&store, &job.job_id, JournalEntry::Failed { reason: failure.message.clone() }).await;
                        queue.release(job, Outcome::Failed(failure.classification));
                        continue;
                    }
                };
                watchdog.track(&record);

                tracker.record_transition(Some(JobState::Launching), JobState::Running);
                let _ = job.transition(JobState::Running);

                let outcome = collector.collect(&record, job.iterations, SystemTime::now).await;
                match outcome {
                    CollectOutcome::Succeeded(report, result) => {
                        let _ = job.transition(JobState::Succeeded);
                        tracker.record_transition(Some(JobState::Running), JobState::Succeeded);
                        tracker.record_duration(result.execution_duration);
                        watchdog.record_outcome(true, SystemTime::now());

                        write_journal(&store, &job.job_id, JournalEntry::Succeeded).await;
                        publisher.publish(&report, &result).await;
                        queue.release(job, Outcome::Succeeded);
                    }
                    CollectOutcome::Failed(failure) => {
                        tracker.record_failure(failure.classification);
                        let terminal = if failure.classification == Classification::Timeout {
                            JobState::TimedOut
                        } else {
                            JobState::Failed
                        };
                        let _ = job.transition(terminal);
                        tracker.record_transition(Some(JobState::Running), terminal);
                        watchdog.record_outcome(false, SystemTime::now());
                        let entry = if terminal == JobState::TimedOut {
                            JournalEntry::TimedOut
                        } else {
                            JournalEntry::Failed { reason: failure.message.clone() }
                        };
                        write_journal(&store, &job.job_id, entry).await;
                        queue.release(job, Outcome::Failed(failure.classification));
                    }
                }
            }
        })
    }
}

/// Persist a terminal journal entry so a restarted campaign can tell this
/// job is already done (spec.md section 8 "Restart safety"). Best-effort:
/// a write failure here only costs a redundant rerun on restart, never
/// correctness of this run.
async fn write_journal(store: &Arc<dyn ObjectStore>, job_id: &str, entry: JournalEntry) {
    if let Ok(bytes) = serde_json::to_vec(&entry) {
        let _ = store.put(&fleetbench_core::keys::journal_job(job_id), bytes, ObjectMetadata::default()).await;
    }
}

/// Resolve `HH:MM` window bounds onto today's date in UTC.
fn window_from_spec(spec: &WindowSpec) -> Window {
    let today = Utc::now().date_naive();
    let start = NaiveTime::parse_from_str(&spec.start_hhmm, "%H:%M").unwrap_or_default();
    let end = NaiveTime::parse_from_str(&spec.end_hhmm, "%H:%M").unwrap_or_default();
    let start_dt = today.and_time(start).and_utc();
    let end_dt = today.and_time(end).and_utc();
    Window {
        id: spec.id.clone(),
        start: SystemTime::from(start_dt),
        end: SystemTime::from(end_dt),
        capacity: u32::MAX,
        allowed_kinds: spec.allowed_kinds.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetbench_core::capabilities::testing::{FakeComputeProvider, FakeMetricsSink, FakeObjectStore};
    use fleetbench_core::config::{QualityThresholds, RetrySpec, WaveSpec};
    use fleetbench_core::model::{Architecture, BenchmarkKind, InstanceType};

    fn instance() -> InstanceType {
        InstanceType {
            name: "m7i.large".into(),
            family: "m7i".into(),
            size: "large".into(),
            architecture: Architecture::Intel,
            vcpus: 2,
            memory_gb: 8.0,
            socket_count: 1,
            numa_nodes: 1,
        }
    }

    fn spec() -> CampaignSpec {
        CampaignSpec {
            families: vec!["m7i".to_string()],
            sizes: vec!["large".to_string()],
            kinds: vec![BenchmarkKind::Stream],
            iterations: 5,
            region: "us-east-1".to_string(),
            max_concurrent: 2,
            windows: vec![WindowSpec {
                id: "w0".into(),
                start_hhmm: "00:00".into(),
                end_hhmm: "23:59".into(),
                allowed_kinds: vec![BenchmarkKind::Stream],
            }],
            waves: vec![WaveSpec { size: 1, priority: 10 }],
            retries: RetrySpec::default(),
            quality_thresholds: QualityThresholds::default(),
        }
    }

    #[tokio::test]
    async fn window_from_spec_resolves_hhmm_to_today() {
        let w = window_from_spec(&spec().windows[0]);
        assert!(w.end > w.start);
    }

    #[tokio::test]
    async fn campaign_with_empty_catalog_fails_planning() {
        let compute: Arc<dyn ComputeProvider> = Arc::new(FakeComputeProvider::new());
        let store: Arc<dyn ObjectStore> = Arc::new(FakeObjectStore::new());
        let metrics: Arc<dyn MetricsSink> = Arc::new(FakeMetricsSink::new());
        let campaign = Campaign::new(compute, store, metrics, SchedulerConfig::default(), spec());
        let report = campaign.run().await.unwrap();
        assert_eq!(report.exit_code, ExitCode::PlanningFailed);
    }

    #[tokio::test]
    async fn campaign_with_one_instance_drains_the_queue() {
        let compute = Arc::new(FakeComputeProvider::with_catalog(vec![instance()]));
        compute.set_quota("m7i", Quota { limit: 10, in_use: 0 });
        let compute: Arc<dyn ComputeProvider> = compute;
        let store: Arc<dyn ObjectStore> = Arc::new(FakeObjectStore::new());
        let metrics: Arc<dyn MetricsSink> = Arc::new(FakeMetricsSink::new());
        let campaign = Campaign::new(compute, store, metrics, SchedulerConfig::default(), spec());
        let report = campaign.run().await.unwrap();
        assert_eq!(report.snapshot.total_jobs, 1);
    }

    /// A job already journaled `Succeeded` from a prior run is counted as
    /// done and never re-enqueued (spec.md section 8 "Restart").
    #[tokio::test]
    async fn restarted_campaign_skips_already_succeeded_job() {
        let catalog = Catalog::load(
            &(Arc::new(FakeComputeProvider::with_catalog(vec![instance()])) as Arc<dyn ComputeProvider>),
            &spec().region,
        )
        .await
        .unwrap();
        let windows: Vec<Window> = spec().windows.iter().map(window_from_spec).collect();
        let plan = planner::plan(&spec(), &catalog, &windows, &HashMap::new(), 1, SystemTime::now()).unwrap();
        let job_id = plan.jobs[0].job_id.clone();

        let store: Arc<dyn ObjectStore> = Arc::new(FakeObjectStore::new());
        let entry = JournalEntry::Succeeded;
        store
            .put(&fleetbench_core::keys::journal_job(&job_id), serde_json::to_vec(&entry).unwrap(), ObjectMetadata::default())
            .await
            .unwrap();

        let compute = Arc::new(FakeComputeProvider::with_catalog(vec![instance()]));
        compute.set_quota("m7i", Quota { limit: 10, in_use: 0 });
        let compute: Arc<dyn ComputeProvider> = compute;
        let metrics: Arc<dyn MetricsSink> = Arc::new(FakeMetricsSink::new());
        let campaign = Campaign::new(compute, store, metrics, SchedulerConfig::default(), spec());
        let report = campaign.run().await.unwrap();

        assert_eq!(report.snapshot.total_jobs, 1);
        assert_eq!(report.snapshot.by_state.get("succeeded").copied().unwrap_or(0), 1);
        assert_eq!(report.exit_code, ExitCode::AllSucceeded);
    }
}
