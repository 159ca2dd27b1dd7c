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

//! Campaign Planner (spec.md section 4.2). Planning is pure: no capability
//! calls beyond the catalog that was already loaded, no partial plans on
//! failure.

use std::collections::HashMap;
use std::time::SystemTime;

use fleetbench_core::capabilities::Quota;
use fleetbench_core::catalog::Catalog;
use fleetbench_core::config::CampaignSpec;
use fleetbench_core::error::{Error, Result};
use fleetbench_core::model::{BenchmarkKind, Job, JobState, Window};

/// Morning windows get a memory-benchmark priority bump, spec.md section 4.2
/// step 5. "Morning" is approximated by a window whose id contains "morning".
fn kind_priority_offset(kind: BenchmarkKind, window: &Window) -> u8 {
    let is_morning = window.id.to_lowercase().contains("morning");
    let is_memory_kind = matches!(kind, BenchmarkKind::Stream | BenchmarkKind::Cache);
    if is_morning && is_memory_kind {
        1
    } else {
        0
    }
}

/// Windows allowing `kind`, ordered by least committed load first so an
/// overflowing family falls through to the next-least-loaded window before
/// the planner gives up, spec.md section 4.2 step 6.
fn candidate_windows<'a>(kind: BenchmarkKind, windows: &'a [Window], committed_load: &HashMap<String, u32>) -> Vec<&'a Window> {
    let mut candidates: Vec<&Window> = windows.iter().filter(|w| w.allows(kind)).collect();
    candidates.sort_by_key(|w| committed_load.get(&w.id).copied().unwrap_or(0));
    candidates
}

pub struct Plan {
    pub jobs: Vec<Job>,
}

/// Build the totally ordered job sequence for a campaign, spec.md section
/// 4.2. `quotas` are pre-fetched per family so planning stays pure.
pub fn plan(
    spec: &CampaignSpec,
    catalog: &Catalog,
    windows: &[Window],
    quotas: &HashMap<String, Quota>,
    safety_margin: u32,
    now: SystemTime,
) -> Result<Plan> {
    let instances = catalog.expand(&spec.families, &spec.sizes);
    if instances.is_empty() {
        return Err(Error::InvalidSpec("no instance types matched families x sizes".to_string()));
    }

    let mut committed_load: HashMap<String, u32> = HashMap::new();
    let mut family_load_by_window: HashMap<(String, String), u32> = HashMap::new();
    let mut jobs = Vec::new();

    for instance in &instances {
        for &kind in &spec.kinds {
            let candidates = candidate_windows(kind, windows, &committed_load);
            if candidates.is_empty() {
                return Err(Error::InvalidSpec(format!("no window allows kind {:?}", kind)));
            }

            let quota = quotas.get(&instance.family).copied().unwrap_or(Quota { limit: u32::MAX, in_use: 0 });
            let cap = quota.limit.saturating_sub(quota.in_use).saturating_sub(safety_margin);

            let window = candidates.into_iter().find(|w| {
                let key = (w.id.clone(), instance.family.clone());
                family_load_by_window.get(&key).copied().unwrap_or(0) < cap
            });
            let window = match window {
                Some(w) => w,
                None => return Err(Error::QuotaSaturated { family: instance.family.clone(), shortfall: 1 }),
            };
            let key = (window.id.clone(), instance.family.clone());

            let wave_id = instance.wave_rank();
            let priority = (10u8.saturating_sub(wave_id as u8)).saturating_add(kind_priority_offset(kind, window));

            let job_id = deterministic_job_id(&spec.region, &instance.name, kind, 0);
            let job = Job {
                job_id,
                instance_type: instance.name.clone(),
                benchmark_kind: kind,
                parameters: default_parameters(kind),
                iterations: spec.iterations,
                priority,
                window_id: window.id.clone(),
                wave_id,
                deadline: now + (window.end.duration_since(window.start).unwrap_or_default()),
                retries_remaining: 3,
                tags: HashMap::new(),
                state: JobState::Pending,
            };

            *committed_load.entry(window.id.clone()).or_insert(0) += 1;
            *family_load_by_window.entry(key).or_insert(0) += 1;
            jobs.push(job);
        }
    }

    jobs.sort_by(|a, b| {
        a.window_id
            .cmp(&b.window_id)
            .then(a.wave_id.cmp(&b.wave_id))
            .then(b.priority.cmp(&a.priority))
            .then(a.job_id.cmp(&b.job_id))
    });

    Ok(Plan { jobs })
}

fn default_parameters(kind: BenchmarkKind) -> fleetbench_core::model::BenchmarkParameters {
    use fleetbench_core::model::{BenchmarkParameters, CacheLevel};
    match kind {
        BenchmarkKind::Stream => BenchmarkParameters::Stream,
        BenchmarkKind::Hpl => BenchmarkParameters::Hpl { block_size: 128 },
        BenchmarkKind::Coremark => BenchmarkParameters::Coremark,
        BenchmarkKind::Cache => BenchmarkParameters::Cache { levels: vec![CacheLevel::L1, CacheLevel::L2, CacheLevel::L3, CacheLevel::Dram] },
    }
}

/// Stable job id derived from `(region, instance_type, kind, seq_no)` so
/// replanning the same campaign reproduces identical job ids.
fn deterministic_job_id(region: &str, instance_type: &str, kind: BenchmarkKind, seq_no: u32) -> String {
    let namespace = uuid::Uuid::NAMESPACE_URL;
    let name = format!("{region}/{instance_type}/{}/{seq_no}", kind.as_str());
    uuid::Uuid::new_v5(&namespace, name.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetbench_core::capabilities::testing::FakeComputeProvider;
    use fleetbench_core::capabilities::ComputeProvider;
    use fleetbench_core::model::{Architecture, InstanceType};
    use std::sync::Arc;

    fn instance(name: &str, family: &str, size: &str) -> InstanceType {
        InstanceType {
            name: name.to_string(),
            family: family.to_string(),
            size: size.to_string(),
            architecture: Architecture::Intel,
            vcpus: 2,
            memory_gb: 8.0,
            socket_count: 1,
            numa_nodes: 1,
        }
    }

    async fn catalog_with(instances: Vec<InstanceType>) -> Catalog {
        let provider: Arc<dyn ComputeProvider> = Arc::new(FakeComputeProvider::with_catalog(instances));
        Catalog::load(&provider, "us-east-1").await.unwrap()
    }

    fn window(id: &str, kinds: Vec<BenchmarkKind>) -> Window {
        let now = SystemTime::now();
        Window { id: id.to_string(), start: now, end: now + std::time::Duration::from_secs(3600), capacity: 4, allowed_kinds: kinds }
    }

    fn spec() -> CampaignSpec {
        use fleetbench_core::config::{QualityThresholds, RetrySpec, WaveSpec, WindowSpec};
        CampaignSpec {
            families: vec!["m7i".to_string()],
            sizes: vec!["large".to_string()],
            kinds: vec![BenchmarkKind::Stream],
            iterations: 5,
            region: "us-east-1".to_string(),
            max_concurrent: 4,
            windows: vec![WindowSpec { id: "w0".into(), start_hhmm: "06:00".into(), end_hhmm: "12:00".into(), allowed_kinds: vec![BenchmarkKind::Stream] }],
            waves: vec![WaveSpec { size: 1, priority: 10 }],
            retries: RetrySpec::default(),
            quality_thresholds: QualityThresholds::default(),
        }
    }

    #[tokio::test]
    async fn plans_one_job_per_instance_kind_pair() {
        let catalog = catalog_with(vec![instance("m7i.large", "m7i", "large")]).await;
        let windows = vec![window("w0", vec![BenchmarkKind::Stream])];
        let quotas = HashMap::from([("m7i".to_string(), Quota { limit: 10, in_use: 0 })]);
        let plan = plan(&spec(), &catalog, &windows, &quotas, 1, SystemTime::now()).unwrap();
        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.jobs[0].window_id, "w0");
    }

    #[tokio::test]
    async fn same_inputs_produce_same_job_ids() {
        let catalog = catalog_with(vec![instance("m7i.large", "m7i", "large")]).await;
        let windows = vec![window("w0", vec![BenchmarkKind::Stream])];
        let quotas = HashMap::from([("m7i".to_string(), Quota { limit: 10, in_use: 0 })]);
        let p1 = plan(&spec(), &catalog, &windows, &quotas, 1, SystemTime::now()).unwrap();
        let p2 = plan(&spec(), &catalog, &windows, &quotas, 1, SystemTime::now()).unwrap();
        assert_eq!(p1.jobs[0].job_id, p2.jobs[0].job_id);
    }

    #[tokio::test]
    async fn quota_saturation_fails_the_whole_plan() {
        let catalog = catalog_with(vec![
            instance("m7i.large", "m7i", "large"),
            instance("m7i.xlarge", "m7i", "large"),
        ])
        .await;
        let windows = vec![window("w0", vec![BenchmarkKind::Stream])];
        let quotas = HashMap::from([("m7i".to_string(), Quota { limit: 1, in_use: 0 })]);
        let mut s = spec();
        s.sizes = vec!["large".to_string()];
        let result = plan(&s, &catalog, &windows, &quotas, 0, SystemTime::now());
        assert!(matches!(result, Err(Error::QuotaSaturated { .. })));
    }

    #[tokio::test]
    async fn ordering_is_window_then_wave_then_priority_desc_then_job_id() {
        let catalog = catalog_with(vec![
            instance("m7i.large", "m7i", "large"),
            instance("m7i.xlarge", "m7i", "xlarge"),
        ])
        .await;
        let windows = vec![window("w0", vec![BenchmarkKind::Stream])];
        let quotas = HashMap::from([("m7i".to_string(), Quota { limit: 10, in_use: 0 })]);
        let mut s = spec();
        s.sizes = vec!["large".to_string(), "xlarge".to_string()];
        let plan = plan(&s, &catalog, &windows, &quotas, 0, SystemTime::now()).unwrap();
        assert_eq!(plan.jobs.len(), 2);
        // large has wave_id 0, xlarge has wave_id 1: large must come first.
        assert!(plan.jobs[0].wave_id <= plan.jobs[1].wave_id);
    }
}
