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

//! Statistical aggregator (spec.md section 4.7). Turns raw `IterationResult`
//! samples into an `AggregatedResult` with outlier rejection, confidence
//! intervals, and a per-kind quality score.

use std::collections::HashMap;
use std::time::Duration;

use crate::model::benchmark::{BenchmarkKind, CacheLevelMetrics, IterationResult, SystemProbe};
use crate::model::results::{AggregatedResult, Measurement, Validation};

#[derive(Debug, Clone, Copy)]
pub struct AggregationConfig {
    pub outlier_threshold: f64,
    pub ci_level: f64,
    pub cv_max: f64,
    pub min_efficiency: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            outlier_threshold: 2.5,
            ci_level: 0.95,
            cv_max: 10.0,
            min_efficiency: 0.7,
        }
    }
}

/// `max(3, ceil(iterations * 0.7))`, spec.md section 4.7 step 3.
pub fn min_valid_runs(iterations: u32) -> u32 {
    let scaled = (iterations as f64 * 0.7).ceil() as u32;
    scaled.max(3)
}

/// t-value approximation for a two-sided 95%-ish confidence interval,
/// spec.md section 4.7 step 5. Not a lookup table; three bands only.
fn t_value(n: u32) -> f64 {
    if n < 10 {
        3.18
    } else if n < 30 {
        2.26
    } else {
        1.96
    }
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn stddev(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    var.sqrt()
}

/// Aggregate one metric's raw samples into a `Measurement`, applying outlier
/// rejection and the minimum-samples gate. Returns an error string on the
/// gate instead of a `Measurement` when the kept set is too small.
pub fn aggregate_metric(
    raw: &[f64],
    requested_iterations: u32,
    cfg: &AggregationConfig,
) -> Result<Measurement, String> {
    let finite: Vec<f64> = raw.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return Err("insufficient_samples".to_string());
    }

    let pre_mean = mean(&finite);
    let pre_std = stddev(&finite, pre_mean);
    let kept: Vec<f64> = if pre_std == 0.0 {
        finite.clone()
    } else {
        finite
            .iter()
            .copied()
            .filter(|v| ((v - pre_mean) / pre_std).abs() <= cfg.outlier_threshold)
            .collect()
    };
    let n_outliers = (finite.len() - kept.len()) as u32;

    let min_runs = min_valid_runs(requested_iterations);
    if (kept.len() as u32) < min_runs {
        return Err("insufficient_samples".to_string());
    }

    let m = mean(&kept);
    let s = stddev(&kept, m);
    let cv_pct = if m == 0.0 { 0.0 } else { 100.0 * s / m };
    let (ci_lower, ci_upper) = if s == 0.0 {
        (m, m)
    } else {
        let h = t_value(kept.len() as u32) * s / (kept.len() as f64).sqrt();
        (m - h, m + h)
    };

    Ok(Measurement {
        mean: m,
        stddev: s,
        cv_pct,
        ci_lower,
        ci_upper,
        ci_level: cfg.ci_level,
        n_valid: kept.len() as u32,
        n_outliers,
    })
}

fn cache_level_raw(iterations: &[IterationResult], pick: impl Fn(&CacheLevelMetrics) -> f64, bandwidth: bool) -> Vec<f64> {
    iterations
        .iter()
        .filter(|it| it.is_valid())
        .filter_map(|it| match it {
            IterationResult::Cache { bandwidth: bw, latency, .. } => {
                Some(pick(if bandwidth { bw } else { latency }))
            }
            _ => None,
        })
        .collect()
}

/// Quality score per kind (spec.md section 4.7 step 6), clamped to `[0, 1]`.
fn quality_score(kind: BenchmarkKind, measurements: &HashMap<String, Measurement>, total_raw: u32, cfg: &AggregationConfig) -> f64 {
    let mut score: f64 = 1.0;
    match kind {
        BenchmarkKind::Stream => {
            if let Some(triad) = measurements.get("triad") {
                if triad.cv_pct > 10.0 {
                    score -= 0.3;
                }
                if triad.cv_pct > 5.0 {
                    score -= 0.1;
                }
                let outlier_frac = if total_raw == 0 { 0.0 } else { triad.n_outliers as f64 / total_raw as f64 };
                if outlier_frac > 0.15 {
                    score -= 0.2;
                }
            }
        }
        BenchmarkKind::Hpl => {
            if let Some(eff) = measurements.get("efficiency") {
                if eff.mean < cfg.min_efficiency {
                    score -= 0.2;
                }
                if eff.mean < 0.5 {
                    score -= 0.4;
                }
            }
            if let Some(res) = measurements.get("residual") {
                if res.mean > 1e-6 {
                    score -= 0.3;
                }
            }
        }
        BenchmarkKind::Coremark => {}
        BenchmarkKind::Cache => {
            for level in ["l1", "l2", "l3", "dram"] {
                if let Some(m) = measurements.get(level) {
                    if m.cv_pct > 8.0 {
                        score -= 0.2;
                    }
                }
            }
        }
    }
    score.clamp(0.0, 1.0)
}

/// Aggregate a complete `ExecutionReport`'s iterations into an
/// `AggregatedResult`. `requested_iterations` is the job's configured count,
/// used by the minimum-samples gate (not `iterations.len()`, which may
/// already be short due to dropped/error iterations).
pub fn aggregate(
    job_id: &str,
    instance_type: &str,
    kind: BenchmarkKind,
    iterations: &[IterationResult],
    requested_iterations: u32,
    system_probe: SystemProbe,
    execution_duration: Duration,
    cfg: &AggregationConfig,
) -> AggregatedResult {
    let mut measurements = HashMap::new();
    let mut errors = Vec::new();
    let total_raw = iterations.len() as u32;

    let mut insert_metric = |name: &str, raw: Vec<f64>| {
        match aggregate_metric(&raw, requested_iterations, cfg) {
            Ok(m) => {
                measurements.insert(name.to_string(), m);
            }
            Err(e) => errors.push(format!("{name}: {e}")),
        }
    };

    match kind {
        BenchmarkKind::Stream => {
            let picks: [(&str, fn(&IterationResult) -> Option<f64>); 4] = [
                ("copy", |r| match r { IterationResult::Stream { copy, .. } => Some(*copy), _ => None }),
                ("scale", |r| match r { IterationResult::Stream { scale, .. } => Some(*scale), _ => None }),
                ("add", |r| match r { IterationResult::Stream { add, .. } => Some(*add), _ => None }),
                ("triad", |r| match r { IterationResult::Stream { triad, .. } => Some(*triad), _ => None }),
            ];
            for (name, pick) in picks {
                let raw: Vec<f64> = iterations.iter().filter(|it| it.is_valid()).filter_map(pick).collect();
                insert_metric(name, raw);
            }
        }
        BenchmarkKind::Hpl => {
            let picks: [(&str, fn(&IterationResult) -> Option<f64>); 3] = [
                ("gflops", |r| match r { IterationResult::Hpl { gflops, .. } => Some(*gflops), _ => None }),
                ("efficiency", |r| match r { IterationResult::Hpl { efficiency, .. } => Some(*efficiency), _ => None }),
                ("residual", |r| match r { IterationResult::Hpl { residual, .. } => Some(*residual), _ => None }),
            ];
            for (name, pick) in picks {
                let raw: Vec<f64> = iterations.iter().filter(|it| it.is_valid()).filter_map(pick).collect();
                insert_metric(name, raw);
            }
        }
        BenchmarkKind::Coremark => {
            let raw: Vec<f64> = iterations
                .iter()
                .filter(|it| it.is_valid())
                .filter_map(|it| match it {
                    IterationResult::Coremark { ops_per_sec, .. } => Some(*ops_per_sec),
                    _ => None,
                })
                .collect();
            insert_metric("ops_per_sec", raw);
        }
        BenchmarkKind::Cache => {
            insert_metric("l1", cache_level_raw(iterations, |m| m.l1, true));
            insert_metric("l2", cache_level_raw(iterations, |m| m.l2, true));
            insert_metric("l3", cache_level_raw(iterations, |m| m.l3, true));
            insert_metric("dram", cache_level_raw(iterations, |m| m.dram, true));
        }
    }

    let score = quality_score(kind, &measurements, total_raw, cfg);
    let is_valid = errors.is_empty() && score >= 0.5;

    AggregatedResult {
        job_id: job_id.to_string(),
        kind,
        instance_type: instance_type.to_string(),
        measurements,
        quality_score: score,
        validation: Validation { is_valid, errors, warnings: Vec::new() },
        system_probe,
        execution_duration,
    }
}
