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

//! Async Launcher (spec.md section 4.4).

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use fleetbench_core::capabilities::{ComputeProvider, LaunchRequest, ObjectMetadata, ObjectStore};
use fleetbench_core::classifier::Classification;
use fleetbench_core::error::Failure;
use fleetbench_core::model::{InstanceType, Job, JournalEntry, LaunchRecord};

use crate::payload::{self, PayloadSpec};

pub struct LauncherConfig {
    pub image_id_x86: String,
    pub image_id_arm: String,
    pub object_store_base_url: String,
    pub primary_timeout: Duration,
    pub emergency_buffer: Duration,
}

pub struct Launcher {
    compute: Arc<dyn ComputeProvider>,
    store: Arc<dyn ObjectStore>,
    config: LauncherConfig,
}

impl Launcher {
    pub fn new(compute: Arc<dyn ComputeProvider>, store: Arc<dyn ObjectStore>, config: LauncherConfig) -> Self {
        Self { compute, store, config }
    }

    fn image_id_for(&self, arch: fleetbench_core::model::Architecture) -> &str {
        match arch {
            fleetbench_core::model::Architecture::Arm => &self.config.image_id_arm,
            _ => &self.config.image_id_x86,
        }
    }

    /// Distinct from the sentinel key: the VM writes its `ExecutionReport`
    /// to the sentinel, so launch placeholders live in the job journal
    /// instead or the collector would mistake one for the other.
    fn journal_key(&self, job_id: &str) -> String {
        fleetbench_core::keys::journal_job(job_id)
    }

    fn sentinel_key(&self, job_id: &str) -> String {
        fleetbench_core::keys::sentinel(job_id)
    }

    fn heartbeat_url(&self, job_id: &str) -> String {
        format!("{}/heartbeats/{}.json", self.config.object_store_base_url, job_id)
    }

    fn sentinel_url(&self, job_id: &str) -> String {
        format!("{}/{}", self.config.object_store_base_url, self.sentinel_key(job_id))
    }

    /// `Launch(job) -> LaunchRecord`, spec.md section 4.4. `cancel` lets a
    /// campaign shutdown abort an in-flight launch without orphaning a VM.
    pub async fn launch(
        &self,
        job: &Job,
        instance: &InstanceType,
        cancel: &CancellationToken,
    ) -> Result<LaunchRecord, Failure> {
        let quota = self
            .compute
            .quota(&instance.family)
            .await
            .map_err(|e| Failure::new(Classification::Infrastructure, e.to_string()))?;
        if quota.in_use >= quota.limit {
            return Err(Failure::new(
                Classification::Quota,
                format!("quota exhausted for family {}: {}/{}", instance.family, quota.in_use, quota.limit),
            ));
        }

        let journal_key = self.journal_key(&job.job_id);
        self.put_placeholder(&journal_key, JournalEntry::Pending).await?;

        let payload = payload::render_script(&PayloadSpec {
            job_id: &job.job_id,
            kind: job.benchmark_kind,
            parameters: &job.parameters,
            iterations: job.iterations,
            architecture: instance.architecture,
            sentinel_put_url: &self.sentinel_url(&job.job_id),
            heartbeat_put_url: &self.heartbeat_url(&job.job_id),
            primary_timeout_secs: self.config.primary_timeout.as_secs(),
            emergency_timeout_secs: (self.config.primary_timeout + self.config.emergency_buffer).as_secs(),
        });
        let payload_hash = Self::hash_payload(&payload);

        let req = LaunchRequest {
            instance_type: instance.name.clone(),
            image_id: self.image_id_for(instance.architecture).to_string(),
            user_data: payload,
            tags: HashMap::from([("job_id".to_string(), job.job_id.clone())]),
        };

        let launch_result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(None),
            res = self.compute.launch_vm(req) => res.map_err(Some),
        };

        let vm_instance_id = match launch_result {
            Ok(id) => id,
            Err(maybe_err) => {
                let reason = match &maybe_err {
                    Some(e) => e.to_string(),
                    None => "launch cancelled".to_string(),
                };
                self.put_placeholder(&journal_key, JournalEntry::LaunchFailed { reason: reason.clone() })
                    .await
                    .ok();
                let classification = match &maybe_err {
                    Some(_) => fleetbench_core::classifier::classify(&fleetbench_core::classifier::RawError {
                        message: reason.clone(),
                        sentinel_observed: false,
                        ..Default::default()
                    }),
                    None => Classification::Infrastructure,
                };
                return Err(Failure::new(classification, reason));
            }
        };

        if cancel.is_cancelled() {
            let _ = self.compute.terminate_vm(&vm_instance_id).await;
            self.put_placeholder(&journal_key, JournalEntry::LaunchFailed { reason: "cancelled after launch".into() })
                .await
                .ok();
            return Err(Failure::new(Classification::Infrastructure, "launch cancelled after vm creation"));
        }

        let now = SystemTime::now();
        let record = LaunchRecord {
            job_id: job.job_id.clone(),
            instance_type: instance.name.clone(),
            vm_instance_id,
            launched_at: now,
            image_id: self.image_id_for(instance.architecture).to_string(),
            payload_hash,
            deadline: job.deadline,
            primary_timeout: now + self.config.primary_timeout,
            emergency_timeout: now + self.config.primary_timeout + self.config.emergency_buffer,
        };

        let bytes = serde_json::to_vec(&record).map_err(|e| Failure::new(Classification::Infrastructure, e.to_string()))?;
        self.store
            .put(&LaunchRecord::object_key(&job.job_id), bytes, ObjectMetadata::default())
            .await
            .map_err(|e| Failure::new(Classification::Infrastructure, e.to_string()))?;

        Ok(record)
    }

    /// Content-addresses the rendered payload so identical jobs resolve to
    /// the same hash for reproducible re-runs (spec.md section 4.9 item 2).
    fn hash_payload(payload: &str) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        payload.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    async fn put_placeholder(&self, key: &str, placeholder: JournalEntry) -> Result<(), Failure> {
        let bytes = serde_json::to_vec(&placeholder).map_err(|e| Failure::new(Classification::Infrastructure, e.to_string()))?;
        self.store
            .put(key, bytes, ObjectMetadata::default())
            .await
            .map_err(|e| Failure::new(Classification::Infrastructure, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetbench_core::capabilities::testing::{FakeComputeProvider, FakeObjectStore};
    use fleetbench_core::capabilities::ComputeProvider as _;
    use fleetbench_core::model::{Architecture, BenchmarkKind, BenchmarkParameters, JobState};
    use std::collections::HashMap as Map;

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

    fn job() -> Job {
        Job {
            job_id: "job-1".into(),
            instance_type: "m7i.large".into(),
            benchmark_kind: BenchmarkKind::Stream,
            parameters: BenchmarkParameters::Stream,
            iterations: 5,
            priority: 5,
            window_id: "w0".into(),
            wave_id: 0,
            deadline: SystemTime::now() + Duration::from_secs(3600),
            retries_remaining: 3,
            tags: Map::new(),
            state: JobState::Launching,
        }
    }

    fn launcher(compute: Arc<dyn ComputeProvider>, store: Arc<dyn ObjectStore>) -> Launcher {
        Launcher::new(
            compute,
            store,
            LauncherConfig {
                image_id_x86: "ami-x86".into(),
                image_id_arm: "ami-arm".into(),
                object_store_base_url: "https://bucket.example".into(),
                primary_timeout: Duration::from_secs(1800),
                emergency_buffer: Duration::from_secs(3600),
            },
        )
    }

    #[tokio::test]
    async fn happy_path_writes_launch_record_and_pending_sentinel() {
        let compute: Arc<dyn ComputeProvider> = Arc::new(FakeComputeProvider::new());
        let store: Arc<FakeObjectStore> = Arc::new(FakeObjectStore::new());
        let l = launcher(compute, store.clone());
        let record = l.launch(&job(), &instance(), &CancellationToken::new()).await.unwrap();
        assert_eq!(record.vm_instance_id, "vm-1");
        assert!(!record.payload_hash.is_empty());

        let journal = store.get(&fleetbench_core::keys::journal_job("job-1")).await.unwrap().unwrap();
        let placeholder: JournalEntry = serde_json::from_slice(&journal).unwrap();
        assert!(matches!(placeholder, JournalEntry::Pending));

        let record_bytes = store.get(&LaunchRecord::object_key("job-1")).await.unwrap();
        assert!(record_bytes.is_some());
    }

    #[tokio::test]
    async fn quota_exhausted_fails_fast_without_launching() {
        let compute = Arc::new(FakeComputeProvider::new());
        compute.set_quota("m7i", fleetbench_core::capabilities::Quota { limit: 1, in_use: 1 });
        let compute: Arc<dyn ComputeProvider> = compute;
        let store: Arc<dyn ObjectStore> = Arc::new(FakeObjectStore::new());
        let l = launcher(compute, store);
        let err = l.launch(&job(), &instance(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.classification, Classification::Quota);
    }

    #[tokio::test]
    async fn provider_failure_marks_placeholder_launch_failed() {
        let compute = Arc::new(FakeComputeProvider::new());
        compute.set_fail_launch(true);
        let compute: Arc<dyn ComputeProvider> = compute;
        let store: Arc<FakeObjectStore> = Arc::new(FakeObjectStore::new());
        let l = launcher(compute, store.clone());
        assert!(l.launch(&job(), &instance(), &CancellationToken::new()).await.is_err());

        let journal = store.get(&fleetbench_core::keys::journal_job("job-1")).await.unwrap().unwrap();
        let placeholder: JournalEntry = serde_json::from_slice(&journal).unwrap();
        assert!(matches!(placeholder, JournalEntry::LaunchFailed { .. }));
    }

    #[test]
    fn identical_payloads_hash_identically() {
        let a = Launcher::hash_payload("same script");
        let b = Launcher::hash_payload("same script");
        let c = Launcher::hash_payload("different script");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn cancellation_before_launch_terminates_nothing_and_fails() {
        let compute: Arc<dyn ComputeProvider> = Arc::new(FakeComputeProvider::new());
        let store: Arc<dyn ObjectStore> = Arc::new(FakeObjectStore::new());
        let l = launcher(compute, store);
        let token = CancellationToken::new();
        token.cancel();
        assert!(l.launch(&job(), &instance(), &token).await.is_err());
    }
}
