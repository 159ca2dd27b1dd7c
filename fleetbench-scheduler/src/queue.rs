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

//! Job Queue (spec.md section 4.3): a bounded-concurrency priority queue
//! with a global cap and a per-family cap derived from quota.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use fleetbench_core::classifier::{backoff_duration, Classification};
use fleetbench_core::model::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(Classification),
}

struct Entry {
    job: Job,
    ready_at: Option<Instant>,
}

impl Eq for Entry {}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for Entry {
    /// Queue order is `(window_id asc, wave_id asc, priority desc, job_id
    /// lexical)`, spec.md section 4.3. `BinaryHeap` is a max-heap, so we
    /// reverse window/wave/job_id but keep priority as-is.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .job
            .window_id
            .cmp(&self.job.window_id)
            .then_with(|| other.job.wave_id.cmp(&self.job.wave_id))
            .then_with(|| self.job.priority.cmp(&other.job.priority))
            .then_with(|| other.job.job_id.cmp(&self.job.job_id))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct State {
    heap: BinaryHeap<Entry>,
    in_flight: u32,
    in_flight_by_family: HashMap<String, u32>,
    family_caps: HashMap<String, u32>,
}

pub struct JobQueue {
    state: Mutex<State>,
    notify: Notify,
    max_concurrent: u32,
}

impl JobQueue {
    pub fn new(max_concurrent: u32, family_caps: HashMap<String, u32>) -> Self {
        Self {
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                in_flight: 0,
                in_flight_by_family: HashMap::new(),
                family_caps,
            }),
            notify: Notify::new(),
            max_concurrent,
        }
    }

    pub fn enqueue(&self, job: Job) {
        self.state.lock().heap.push(Entry { job, ready_at: None });
        self.notify.notify_one();
    }

    fn family_of(instance_type: &str) -> &str {
        instance_type.split('.').next().unwrap_or(instance_type)
    }

    /// Pop the next runnable job, blocking until a slot is free and the
    /// job's backoff (if any) has elapsed.
    pub async fn reserve_next(&self) -> Job {
        loop {
            let candidate = {
                let mut state = self.state.lock();
                if state.in_flight >= self.max_concurrent {
                    None
                } else {
                    self.pop_ready(&mut state)
                }
            };

            match candidate {
                Some(job) => return job,
                None => self.notify.notified().await,
            }
        }
    }

    fn pop_ready(&self, state: &mut State) -> Option<Job> {
        let now = Instant::now();
        let mut deferred = Vec::new();
        let mut result = None;

        while let Some(entry) = state.heap.pop() {
            if let Some(ready_at) = entry.ready_at {
                if ready_at > now {
                    deferred.push(entry);
                    continue;
                }
            }
            let family = Self::family_of(&entry.job.instance_type).to_string();
            let cap = state.family_caps.get(&family).copied().unwrap_or(u32::MAX);
            let used = state.in_flight_by_family.get(&family).copied().unwrap_or(0);
            if used >= cap {
                deferred.push(entry);
                continue;
            }

            state.in_flight += 1;
            *state.in_flight_by_family.entry(family).or_insert(0) += 1;
            result = Some(entry.job);
            break;
        }

        for entry in deferred {
            state.heap.push(entry);
        }
        result
    }

    /// Release a slot held by `job`. On a retryable failure, re-enqueue with
    /// a decremented retry budget and exponential backoff, spec.md section 4.3.
    pub fn release(&self, job: Job, outcome: Outcome) {
        let family = Self::family_of(&job.instance_type).to_string();
        {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            if let Some(count) = state.in_flight_by_family.get_mut(&family) {
                *count = count.saturating_sub(1);
            }
        }

        if let Outcome::Failed(classification) = outcome {
            let policy = classification.retry_policy();
            if job.retries_remaining > 0 && policy.max_attempts > 0 {
                let attempt = 3u32.saturating_sub(job.retries_remaining);
                let delay = backoff_duration(&policy, attempt, rand::random::<f64>());
                let mut retried = job;
                retried.retries_remaining -= 1;
                if classification == Classification::Timeout {
                    retried.iterations = (retried.iterations / 2).max(1);
                }
                let ready_at = Instant::now() + delay;
                self.state.lock().heap.push(Entry { job: retried, ready_at: Some(ready_at) });
            }
        }

        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` once nothing is queued and no job holds a slot, i.e. the
    /// campaign has nothing left to drain.
    pub fn is_empty_and_idle(&self) -> bool {
        let state = self.state.lock();
        state.heap.is_empty() && state.in_flight == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetbench_core::model::{BenchmarkKind, BenchmarkParameters, JobState};
    use std::time::SystemTime;

    fn job(id: &str, window: &str, wave: u32, priority: u8, instance_type: &str) -> Job {
        Job {
            job_id: id.to_string(),
            instance_type: instance_type.to_string(),
            benchmark_kind: BenchmarkKind::Stream,
            parameters: BenchmarkParameters::Stream,
            iterations: 5,
            priority,
            window_id: window.to_string(),
            wave_id: wave,
            deadline: SystemTime::now(),
            retries_remaining: 3,
            tags: HashMap::new(),
            state: JobState::Pending,
        }
    }

    #[tokio::test]
    async fn orders_by_window_then_wave_then_priority_desc_then_job_id() {
        let q = JobQueue::new(10, HashMap::new());
        q.enqueue(job("b", "w0", 0, 5, "m7i.large"));
        q.enqueue(job("a", "w0", 0, 5, "m7i.large"));
        q.enqueue(job("c", "w0", 1, 9, "m7i.large"));
        q.enqueue(job("d", "w1", 0, 1, "m7i.large"));

        let first = q.reserve_next().await;
        assert_eq!(first.job_id, "a");
        q.release(first, Outcome::Succeeded);

        let second = q.reserve_next().await;
        assert_eq!(second.job_id, "b");
        q.release(second, Outcome::Succeeded);

        let third = q.reserve_next().await;
        assert_eq!(third.job_id, "c");
        q.release(third, Outcome::Succeeded);

        let fourth = q.reserve_next().await;
        assert_eq!(fourth.job_id, "d");
    }

    #[tokio::test]
    async fn global_cap_blocks_extra_reservations() {
        let q = JobQueue::new(1, HashMap::new());
        q.enqueue(job("a", "w0", 0, 5, "m7i.large"));
        q.enqueue(job("b", "w0", 0, 5, "m7i.large"));

        let a = q.reserve_next().await;
        assert_eq!(a.job_id, "a");
        assert_eq!(q.state.lock().in_flight, 1);

        tokio::select! {
            _ = q.reserve_next() => panic!("should not reserve past the global cap"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }

        q.release(a, Outcome::Succeeded);
        let b = q.reserve_next().await;
        assert_eq!(b.job_id, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_is_requeued_with_decremented_budget() {
        let q = JobQueue::new(10, HashMap::new());
        q.enqueue(job("a", "w0", 0, 5, "m7i.large"));
        let a = q.reserve_next().await;
        let retries_before = a.retries_remaining;
        q.release(a, Outcome::Failed(Classification::Infrastructure));

        assert!(!q.is_empty());
        tokio::time::advance(Duration::from_secs(60)).await;

        let retried = q.reserve_next().await;
        assert_eq!(retried.job_id, "a");
        assert_eq!(retried.retries_remaining, retries_before - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_failure_is_requeued_with_halved_iterations() {
        let q = JobQueue::new(10, HashMap::new());
        q.enqueue(job("a", "w0", 0, 5, "m7i.large"));
        let a = q.reserve_next().await;
        assert_eq!(a.iterations, 5);
        q.release(a, Outcome::Failed(Classification::Timeout));

        tokio::time::advance(Duration::from_secs(120)).await;
        let retried = q.reserve_next().await;
        assert_eq!(retried.job_id, "a");
        assert_eq!(retried.iterations, 2);
    }

    #[tokio::test]
    async fn benchmark_failure_never_requeues() {
        let q = JobQueue::new(10, HashMap::new());
        q.enqueue(job("a", "w0", 0, 5, "m7i.large"));
        let a = q.reserve_next().await;
        q.release(a, Outcome::Failed(Classification::Benchmark));
        assert!(q.is_empty());
    }
}
