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

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::benchmark::{BenchmarkKind, SystemProbe};

/// One metric's statistics after outlier rejection (spec.md section 3
/// "AggregatedResult").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub mean: f64,
    pub stddev: f64,
    pub cv_pct: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub ci_level: f64,
    pub n_valid: u32,
    pub n_outliers: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Validation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Final, terminal artifact for one job after aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub job_id: String,
    pub kind: BenchmarkKind,
    pub instance_type: String,
    pub measurements: HashMap<String, Measurement>,
    pub quality_score: f64,
    pub validation: Validation,
    pub system_probe: SystemProbe,
    pub execution_duration: Duration,
}

impl AggregatedResult {
    pub fn object_key(&self) -> String {
        format!(
            "processed/latest/{}/{}.json",
            self.kind.as_str(),
            self.instance_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::benchmark::CacheLevelMetrics;

    fn sample() -> AggregatedResult {
        AggregatedResult {
            job_id: "j1".into(),
            kind: BenchmarkKind::Stream,
            instance_type: "m7i.large".into(),
            measurements: HashMap::new(),
            quality_score: 0.95,
            validation: Validation {
                is_valid: true,
                errors: vec![],
                warnings: vec![],
            },
            system_probe: SystemProbe {
                cpu_model: "x".into(),
                cache_bytes: CacheLevelMetrics { l1: 1.0, l2: 1.0, l3: 1.0, dram: 1.0 },
                numa_nodes: 1,
                memory_gb: 8.0,
            },
            execution_duration: Duration::from_secs(60),
        }
    }

    #[test]
    fn processed_key_is_last_writer_wins_by_instance_type() {
        assert_eq!(sample().object_key(), "processed/latest/stream/m7i.large.json");
    }
}
