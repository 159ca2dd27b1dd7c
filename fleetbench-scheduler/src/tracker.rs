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

//! Progress Tracker (spec.md section 4.11). Pure bookkeeping; the campaign
//! runner feeds it state transitions and terminal outcomes as they happen.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use fleetbench_core::classifier::Classification;
use fleetbench_core::model::JobState;

#[derive(Debug, Default)]
struct Counters {
    by_state: HashMap<&'static str, u32>,
    by_classification: HashMap<Classification, u32>,
    durations_secs: Vec<f64>,
    total_cost: f64,
    current_window: Option<String>,
    current_wave: Option<u32>,
    total_jobs: u32,
}

pub struct Tracker {
    counters: Mutex<Counters>,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub total_jobs: u32,
    pub by_state: HashMap<&'static str, u32>,
    pub current_window: Option<String>,
    pub current_wave: Option<u32>,
    pub eta: Option<Duration>,
    pub top_error_categories: Vec<(Classification, u32)>,
    pub estimated_cost_usd: f64,
}

fn state_name(state: JobState) -> &'static str {
    match state {
        JobState::Pending => "pending",
        JobState::Scheduled => "scheduled",
        JobState::Launching => "launching",
        JobState::Running => "running",
        JobState::Collecting => "collecting",
        JobState::Succeeded => "succeeded",
        JobState::Failed => "failed",
        JobState::TimedOut => "timed_out",
        JobState::Skipped => "skipped",
    }
}

impl Tracker {
    pub fn new(total_jobs: u32) -> Self {
        Self { counters: Mutex::new(Counters { total_jobs, ..Default::default() }) }
    }

    /// Record a job moving from `from` (`None` on first observation) to `to`.
    pub fn record_transition(&self, from: Option<JobState>, to: JobState) {
        let mut c = self.counters.lock();
        if let Some(from) = from {
            if let Some(count) = c.by_state.get_mut(state_name(from)) {
                *count = count.saturating_sub(1);
            }
        }
        *c.by_state.entry(state_name(to)).or_insert(0) += 1;
    }

    pub fn record_failure(&self, classification: Classification) {
        *self.counters.lock().by_classification.entry(classification).or_insert(0) += 1;
    }

    /// Record wall time for a completed job, used to estimate remaining time.
    pub fn record_duration(&self, duration: Duration) {
        self.counters.lock().durations_secs.push(duration.as_secs_f64());
    }

    /// Accrue `price_per_hour * duration` onto the running cost estimate.
    pub fn record_cost(&self, price_per_hour: f64, duration: Duration) {
        self.counters.lock().total_cost += price_per_hour * (duration.as_secs_f64() / 3600.0);
    }

    pub fn set_current_position(&self, window_id: impl Into<String>, wave_id: u32) {
        let mut c = self.counters.lock();
        c.current_window = Some(window_id.into());
        c.current_wave = Some(wave_id);
    }

    pub fn snapshot(&self) -> Snapshot {
        let c = self.counters.lock();

        let eta = median(&c.durations_secs).map(|median_secs| {
            let done: u32 = ["succeeded", "failed", "timed_out", "skipped"]
                .iter()
                .map(|s| c.by_state.get(s).copied().unwrap_or(0))
                .sum();
            let remaining = c.total_jobs.saturating_sub(done);
            Duration::from_secs_f64(median_secs * remaining as f64)
        });

        let mut top_errors: Vec<(Classification, u32)> =
            c.by_classification.iter().map(|(k, v)| (*k, *v)).collect();
        top_errors.sort_by(|a, b| b.1.cmp(&a.1));
        top_errors.truncate(5);

        Snapshot {
            total_jobs: c.total_jobs,
            by_state: c.by_state.clone(),
            current_window: c.current_window.clone(),
            current_wave: c.current_wave,
            eta,
            top_error_categories: top_errors,
            estimated_cost_usd: c.total_cost,
        }
    }
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_move_counts_between_states() {
        let t = Tracker::new(2);
        t.record_transition(None, JobState::Pending);
        t.record_transition(Some(JobState::Pending), JobState::Scheduled);
        let snap = t.snapshot();
        assert_eq!(snap.by_state.get("pending").copied().unwrap_or(0), 0);
        assert_eq!(snap.by_state.get("scheduled").copied().unwrap_or(0), 1);
    }

    #[test]
    fn eta_uses_median_duration_times_remaining() {
        let t = Tracker::new(4);
        t.record_transition(None, JobState::Succeeded);
        t.record_transition(None, JobState::Succeeded);
        t.record_duration(Duration::from_secs(100));
        t.record_duration(Duration::from_secs(200));
        let snap = t.snapshot();
        // median 150s, 2 jobs remaining (4 total, 2 succeeded) -> 300s.
        assert_eq!(snap.eta, Some(Duration::from_secs(300)));
    }

    #[test]
    fn top_error_categories_sorted_descending() {
        let t = Tracker::new(10);
        for _ in 0..3 {
            t.record_failure(Classification::Capacity);
        }
        t.record_failure(Classification::Quota);
        let snap = t.snapshot();
        assert_eq!(snap.top_error_categories[0], (Classification::Capacity, 3));
    }

    #[test]
    fn cost_accrues_price_times_hours() {
        let t = Tracker::new(1);
        t.record_cost(1.0, Duration::from_secs(3600 * 2));
        assert_eq!(t.snapshot().estimated_cost_usd, 2.0);
    }

    #[test]
    fn snapshot_with_no_completions_has_no_eta() {
        let t = Tracker::new(1);
        assert!(t.snapshot().eta.is_none());
    }
}
