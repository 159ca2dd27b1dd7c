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

//! Failure classification and retry policy (spec.md section 4.8 / 7).
//!
//! All string-matching against provider error messages lives in `classify`.
//! Nothing else in the crate should match on error text.

use std::time::Duration;

/// The closed set of failure categories a job can terminate with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Quota,
    Capacity,
    Infrastructure,
    Benchmark,
    Timeout,
    Validation,
}

/// Shape of the retry behavior for one classification. Backoff is
/// exponential with full jitter, base/factor/cap as given.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub factor: f64,
    pub cap: Duration,
    /// Retry only after the current window has rolled over (quota classification).
    pub wait_for_window_rollover: bool,
}

impl Classification {
    /// Retry policy per spec.md section 4.8 / 7. Quota's retry count is not
    /// documented in the distilled spec (section 9 "open question"); this
    /// implementation resolves it to a single retry after the next window
    /// boundary, since the source material only describes "loops with skip".
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Classification::Quota => RetryPolicy {
                max_attempts: 1,
                base_backoff: Duration::from_secs(30),
                factor: 2.0,
                cap: Duration::from_secs(15 * 60),
                wait_for_window_rollover: true,
            },
            Classification::Capacity => RetryPolicy {
                max_attempts: 3,
                base_backoff: Duration::from_secs(120),
                factor: 2.0,
                cap: Duration::from_secs(15 * 60),
                wait_for_window_rollover: false,
            },
            Classification::Infrastructure => RetryPolicy {
                max_attempts: 5,
                base_backoff: Duration::from_secs(30),
                factor: 2.0,
                cap: Duration::from_secs(15 * 60),
                wait_for_window_rollover: false,
            },
            Classification::Benchmark => RetryPolicy {
                max_attempts: 0,
                base_backoff: Duration::from_secs(0),
                factor: 1.0,
                cap: Duration::from_secs(0),
                wait_for_window_rollover: false,
            },
            Classification::Timeout => RetryPolicy {
                max_attempts: 2,
                base_backoff: Duration::from_secs(30),
                factor: 2.0,
                cap: Duration::from_secs(15 * 60),
                wait_for_window_rollover: false,
            },
            Classification::Validation => RetryPolicy {
                max_attempts: 1,
                base_backoff: Duration::from_secs(30),
                factor: 2.0,
                cap: Duration::from_secs(15 * 60),
                wait_for_window_rollover: false,
            },
        }
    }
}

/// Backoff for attempt `n` (0-indexed), full jitter: `uniform(0, min(cap, base * factor^n))`.
pub fn backoff_duration(policy: &RetryPolicy, attempt: u32, jitter: f64) -> Duration {
    debug_assert!((0.0..1.0).contains(&jitter));
    let scaled = policy.base_backoff.as_secs_f64() * policy.factor.powi(attempt as i32);
    let bounded = scaled.min(policy.cap.as_secs_f64());
    Duration::from_secs_f64(bounded * jitter)
}

/// A raw error observation from the Launcher or Collector, prior to
/// classification. `payload_exit_code` is only populated once a sentinel's
/// `ExecutionReport` has been fetched.
#[derive(Debug, Clone, Default)]
pub struct RawError {
    pub message: String,
    pub payload_exit_code: Option<i32>,
    pub sentinel_observed: bool,
    pub insufficient_samples: bool,
    pub cv_above_hard_threshold: bool,
}

/// Classify a raw error into one of the six closed categories. First match
/// wins, per spec.md section 4.8.
pub fn classify(err: &RawError) -> Classification {
    let lower = err.message.to_lowercase();

    if contains_any(&lower, &["capacity", "insufficientinstancecapacity", "no capacity"]) {
        return Classification::Capacity;
    }
    if contains_any(&lower, &["quota", "limit exceeded", "rate limit", "throttl"]) {
        return Classification::Quota;
    }
    if contains_any(
        &lower,
        &["dns", "connection reset", "timed out connecting", "5xx", "network", "transport"],
    ) {
        return Classification::Infrastructure;
    }
    if let Some(code) = err.payload_exit_code {
        if code != 0 && contains_any(&lower, &["compile", "link", "command not found", "no such file"]) {
            return Classification::Benchmark;
        }
    }
    if !err.sentinel_observed {
        return Classification::Timeout;
    }
    if err.insufficient_samples || err.cv_above_hard_threshold {
        return Classification::Validation;
    }
    if let Some(code) = err.payload_exit_code {
        if code != 0 {
            return Classification::Benchmark;
        }
    }
    Classification::Infrastructure
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_capacity_first() {
        let err = RawError {
            message: "InsufficientInstanceCapacity: no capacity in az".into(),
            sentinel_observed: true,
            ..Default::default()
        };
        assert_eq!(classify(&err), Classification::Capacity);
    }

    #[test]
    fn classifies_quota() {
        let err = RawError {
            message: "RequestLimitExceeded: quota for family m7i reached".into(),
            sentinel_observed: true,
            ..Default::default()
        };
        assert_eq!(classify(&err), Classification::Quota);
    }

    #[test]
    fn classifies_infrastructure() {
        let err = RawError {
            message: "dns resolution failed for endpoint".into(),
            sentinel_observed: true,
            ..Default::default()
        };
        assert_eq!(classify(&err), Classification::Infrastructure);
    }

    #[test]
    fn classifies_benchmark_compile_error() {
        let err = RawError {
            message: "gcc: command not found".into(),
            payload_exit_code: Some(127),
            sentinel_observed: true,
            ..Default::default()
        };
        assert_eq!(classify(&err), Classification::Benchmark);
    }

    #[test]
    fn classifies_timeout_when_no_sentinel() {
        let err = RawError {
            message: "no sentinel observed before deadline".into(),
            sentinel_observed: false,
            ..Default::default()
        };
        assert_eq!(classify(&err), Classification::Timeout);
    }

    #[test]
    fn classifies_validation() {
        let err = RawError {
            message: "aggregation gate failed".into(),
            sentinel_observed: true,
            insufficient_samples: true,
            ..Default::default()
        };
        assert_eq!(classify(&err), Classification::Validation);
    }

    #[test]
    fn benchmark_never_retries() {
        assert_eq!(Classification::Benchmark.retry_policy().max_attempts, 0);
    }

    #[test]
    fn backoff_respects_cap() {
        let policy = Classification::Infrastructure.retry_policy();
        let d = backoff_duration(&policy, 20, 1.0);
        assert_eq!(d, policy.cap);
    }
}
