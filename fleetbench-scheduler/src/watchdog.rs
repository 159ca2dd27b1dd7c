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

//! Cost-Protection Watchdog (spec.md section 4.10). Process-wide singleton
//! that forcefully reclaims VMs past their emergency timeout and trips a
//! circuit breaker on a sustained high failure rate.

use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use fleetbench_core::capabilities::ComputeProvider;
use fleetbench_core::model::LaunchRecord;

#[derive(Debug, Clone)]
struct Scheduled {
    job_id: String,
    vm_instance_id: String,
    emergency_timeout: SystemTime,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.emergency_timeout == other.emergency_timeout
    }
}
impl Eq for Scheduled {}
impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed so `BinaryHeap` (a max-heap) pops the earliest deadline first.
        other.emergency_timeout.cmp(&self.emergency_timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Success,
    Failure,
}

struct State {
    heap: BinaryHeap<Scheduled>,
    recent: VecDeque<(SystemTime, Signal)>,
}

/// Jobs the watchdog force-terminated for blowing past their emergency
/// timeout; the campaign runner marks these `Failed(timeout, emergency)`.
pub struct Reaped {
    pub job_id: String,
}

pub struct Watchdog {
    compute: Arc<dyn ComputeProvider>,
    state: Mutex<State>,
    window: Duration,
    threshold: f64,
}

impl Watchdog {
    pub fn new(compute: Arc<dyn ComputeProvider>, window: Duration, threshold: f64) -> Self {
        Self {
            compute,
            state: Mutex::new(State { heap: BinaryHeap::new(), recent: VecDeque::new() }),
            window,
            threshold,
        }
    }

    pub fn track(&self, record: &LaunchRecord) {
        self.state.lock().heap.push(Scheduled {
            job_id: record.job_id.clone(),
            vm_instance_id: record.vm_instance_id.clone(),
            emergency_timeout: record.emergency_timeout,
        });
    }

    pub fn record_outcome(&self, succeeded: bool, now: SystemTime) {
        let mut state = self.state.lock();
        let signal = if succeeded { Signal::Success } else { Signal::Failure };
        state.recent.push_back((now, signal));
        self.evict_stale(&mut state, now);
    }

    fn evict_stale(&self, state: &mut State, now: SystemTime) {
        while let Some((t, _)) = state.recent.front() {
            if now.duration_since(*t).unwrap_or_default() > self.window {
                state.recent.pop_front();
            } else {
                break;
            }
        }
    }

    /// `true` once the failure rate over the sliding window exceeds the
    /// configured threshold. New launches must be suspended while this holds.
    pub fn circuit_breaker_engaged(&self, now: SystemTime) -> bool {
        let mut state = self.state.lock();
        self.evict_stale(&mut state, now);
        if state.recent.is_empty() {
            return false;
        }
        let failures = state.recent.iter().filter(|(_, s)| *s == Signal::Failure).count();
        (failures as f64 / state.recent.len() as f64) > self.threshold
    }

    /// One sweep: pop every record past its emergency timeout, forcefully
    /// terminate it, and report it for terminal marking. Call on a fixed
    /// interval (default 30s, spec.md section 4.10).
    pub async fn sweep(&self, now: SystemTime) -> Vec<Reaped> {
        let expired: Vec<Scheduled> = {
            let mut state = self.state.lock();
            let mut expired = Vec::new();
            while let Some(top) = state.heap.peek() {
                if top.emergency_timeout <= now {
                    expired.push(state.heap.pop().unwrap());
                } else {
                    break;
                }
            }
            expired
        };

        let mut reaped = Vec::with_capacity(expired.len());
        for entry in expired {
            let _ = self.compute.terminate_vm(&entry.vm_instance_id).await;
            reaped.push(Reaped { job_id: entry.job_id });
        }
        reaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetbench_core::capabilities::testing::FakeComputeProvider;

    fn record(job_id: &str, emergency_in: Duration) -> LaunchRecord {
        let now = SystemTime::now();
        LaunchRecord {
            job_id: job_id.to_string(),
            instance_type: "m7i.large".into(),
            vm_instance_id: format!("vm-{job_id}"),
            launched_at: now,
            image_id: "ami".into(),
            payload_hash: String::new(),
            deadline: now + Duration::from_secs(7200),
            primary_timeout: now + Duration::from_secs(1800),
            emergency_timeout: now + emergency_in,
        }
    }

    #[tokio::test]
    async fn sweep_reaps_only_expired_records() {
        let compute: Arc<dyn ComputeProvider> = Arc::new(FakeComputeProvider::new());
        let w = Watchdog::new(compute, Duration::from_secs(900), 0.4);
        let now = SystemTime::now();
        w.track(&record("expired", Duration::from_secs(0)));
        w.track(&record("alive", Duration::from_secs(3600)));

        let reaped = w.sweep(now + Duration::from_secs(1)).await;
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].job_id, "expired");
    }

    #[test]
    fn circuit_breaker_trips_above_threshold() {
        let compute: Arc<dyn ComputeProvider> = Arc::new(FakeComputeProvider::new());
        let w = Watchdog::new(compute, Duration::from_secs(900), 0.4);
        let now = SystemTime::now();
        for _ in 0..6 {
            w.record_outcome(false, now);
        }
        for _ in 0..4 {
            w.record_outcome(true, now);
        }
        assert!(w.circuit_breaker_engaged(now));
    }

    #[test]
    fn circuit_breaker_stays_closed_below_threshold() {
        let compute: Arc<dyn ComputeProvider> = Arc::new(FakeComputeProvider::new());
        let w = Watchdog::new(compute, Duration::from_secs(900), 0.4);
        let now = SystemTime::now();
        for _ in 0..2 {
            w.record_outcome(false, now);
        }
        for _ in 0..8 {
            w.record_outcome(true, now);
        }
        assert!(!w.circuit_breaker_engaged(now));
    }

    #[test]
    fn stale_outcomes_fall_out_of_the_window() {
        let compute: Arc<dyn ComputeProvider> = Arc::new(FakeComputeProvider::new());
        let w = Watchdog::new(compute, Duration::from_secs(900), 0.4);
        let now = SystemTime::now();
        for _ in 0..6 {
            w.record_outcome(false, now);
        }
        let later = now + Duration::from_secs(1000);
        assert!(!w.circuit_breaker_engaged(later));
    }
}
