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

//! Closed, tagged benchmark kinds. Per spec.md section 9 ("Source used
//! runtime type tags and nil pointers liberally"), this is a fixed enum set,
//! never an open trait-object hierarchy.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BenchmarkKind {
    Stream,
    Hpl,
    Coremark,
    Cache,
}

impl BenchmarkKind {
    pub fn all() -> [BenchmarkKind; 4] {
        [
            BenchmarkKind::Stream,
            BenchmarkKind::Hpl,
            BenchmarkKind::Coremark,
            BenchmarkKind::Cache,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BenchmarkKind::Stream => "stream",
            BenchmarkKind::Hpl => "hpl",
            BenchmarkKind::Coremark => "coremark",
            BenchmarkKind::Cache => "cache",
        }
    }

    /// Default outlier-rejection threshold `T` for this kind (spec.md
    /// section 9: "Outlier threshold varies ... treat it as a per-kind
    /// configurable with defaults 2.5 unless overridden").
    pub fn default_outlier_threshold(&self) -> f64 {
        2.5
    }
}

/// Kind-specific sizing/iteration parameters carried on a `Job`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BenchmarkParameters {
    Stream,
    Hpl { block_size: u32 },
    Coremark,
    Cache { levels: Vec<CacheLevel> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLevel {
    L1,
    L2,
    L3,
    Dram,
}

/// Raw measurements for one iteration of one job. Invariant: all numeric
/// fields must be finite and non-negative; the driver flags a failed
/// iteration with `error` rather than emitting garbage values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IterationResult {
    Stream {
        copy: f64,
        scale: f64,
        add: f64,
        triad: f64,
        error: bool,
    },
    Hpl {
        gflops: f64,
        efficiency: f64,
        solve_time_s: f64,
        residual: f64,
        error: bool,
    },
    Coremark {
        ops_per_sec: f64,
        iterations_run: u64,
        error: bool,
    },
    Cache {
        bandwidth: CacheLevelMetrics,
        latency: CacheLevelMetrics,
        error: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheLevelMetrics {
    pub l1: f64,
    pub l2: f64,
    pub l3: f64,
    pub dram: f64,
}

impl IterationResult {
    pub fn has_error_flag(&self) -> bool {
        match self {
            IterationResult::Stream { error, .. } => *error,
            IterationResult::Hpl { error, .. } => *error,
            IterationResult::Coremark { error, .. } => *error,
            IterationResult::Cache { error, .. } => *error,
        }
    }

    /// True iff every numeric field is finite and non-negative and the
    /// iteration did not self-report an error. Invariant from spec.md
    /// section 3: "negative/zero/NaN => iteration rejected" (zero is
    /// allowed for counts like `iterations_run`, but not for the
    /// instantaneous rate/measurement fields).
    pub fn is_valid(&self) -> bool {
        if self.has_error_flag() {
            return false;
        }
        match self {
            IterationResult::Stream { copy, scale, add, triad, .. } => {
                [*copy, *scale, *add, *triad].iter().all(|v| finite_positive(*v))
            }
            IterationResult::Hpl { gflops, efficiency, solve_time_s, residual, .. } => {
                finite_positive(*gflops)
                    && finite_nonnegative(*efficiency)
                    && finite_positive(*solve_time_s)
                    && finite_nonnegative(*residual)
            }
            IterationResult::Coremark { ops_per_sec, .. } => finite_positive(*ops_per_sec),
            IterationResult::Cache { bandwidth, latency, .. } => {
                cache_metrics_valid(bandwidth) && cache_metrics_valid(latency)
            }
        }
    }

    pub fn kind(&self) -> BenchmarkKind {
        match self {
            IterationResult::Stream { .. } => BenchmarkKind::Stream,
            IterationResult::Hpl { .. } => BenchmarkKind::Hpl,
            IterationResult::Coremark { .. } => BenchmarkKind::Coremark,
            IterationResult::Cache { .. } => BenchmarkKind::Cache,
        }
    }
}

fn finite_positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

fn finite_nonnegative(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

fn cache_metrics_valid(m: &CacheLevelMetrics) -> bool {
    [m.l1, m.l2, m.l3, m.dram].iter().all(|v| finite_positive(*v))
}

/// System probe captured by the VM-side payload before execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemProbe {
    pub cpu_model: String,
    pub cache_bytes: CacheLevelMetrics,
    pub numa_nodes: u32,
    pub memory_gb: f64,
}

/// Produced by the VM-side payload and uploaded to the sentinel key
/// (spec.md section 3 "ExecutionReport").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub job_id: String,
    pub iterations: Vec<IterationResult>,
    pub system_probe: SystemProbe,
    pub wall_time_secs: f64,
    pub payload_exit_code: i32,
    pub stderr_tail: String,
}
