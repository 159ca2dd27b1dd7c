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

//! Campaign spec file format (spec.md section 6) and its builder.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::BenchmarkKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSpec {
    pub id: String,
    pub start_hhmm: String,
    pub end_hhmm: String,
    pub allowed_kinds: Vec<BenchmarkKind>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WaveSpec {
    pub size: u32,
    pub priority: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrySpec {
    pub per_classification: std::collections::HashMap<String, u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityThresholds {
    pub cv_max: f64,
    pub min_efficiency: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self { cv_max: 10.0, min_efficiency: 0.7 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSpec {
    pub families: Vec<String>,
    pub sizes: Vec<String>,
    pub kinds: Vec<BenchmarkKind>,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    pub region: String,
    pub max_concurrent: u32,
    pub windows: Vec<WindowSpec>,
    pub waves: Vec<WaveSpec>,
    #[serde(default)]
    pub retries: RetrySpec,
    #[serde(default)]
    pub quality_thresholds: QualityThresholds,
}

fn default_iterations() -> u32 {
    5
}

impl CampaignSpec {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let spec: CampaignSpec = serde_json::from_slice(bytes)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if self.families.is_empty() {
            return Err(Error::InvalidSpec("families must not be empty".into()));
        }
        if self.sizes.is_empty() {
            return Err(Error::InvalidSpec("sizes must not be empty".into()));
        }
        if self.kinds.is_empty() {
            return Err(Error::InvalidSpec("kinds must not be empty".into()));
        }
        if self.iterations < 3 {
            return Err(Error::InvalidSpec("iterations must be >= 3".into()));
        }
        if self.windows.is_empty() {
            return Err(Error::InvalidSpec("at least one window is required".into()));
        }
        if self.max_concurrent == 0 {
            return Err(Error::InvalidSpec("max_concurrent must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_json() -> &'static str {
        r#"{
            "families": ["m7i"],
            "sizes": ["large"],
            "kinds": ["stream"],
            "iterations": 5,
            "region": "us-east-1",
            "max_concurrent": 4,
            "windows": [{"id": "w0", "start_hhmm": "06:00", "end_hhmm": "12:00", "allowed_kinds": ["stream"]}],
            "waves": [{"size": 1, "priority": 10}]
        }"#
    }

    #[test]
    fn parses_minimal_valid_spec() {
        let spec = CampaignSpec::from_json(valid_json().as_bytes()).unwrap();
        assert_eq!(spec.families, vec!["m7i".to_string()]);
        assert_eq!(spec.iterations, 5);
    }

    #[test]
    fn rejects_too_few_iterations() {
        let json = valid_json().replace("\"iterations\": 5", "\"iterations\": 1");
        assert!(CampaignSpec::from_json(json.as_bytes()).is_err());
    }

    #[test]
    fn rejects_empty_windows() {
        let json = valid_json().replace(
            r#""windows": [{"id": "w0", "start_hhmm": "06:00", "end_hhmm": "12:00", "allowed_kinds": ["stream"]}]"#,
            r#""windows": []"#,
        );
        assert!(CampaignSpec::from_json(json.as_bytes()).is_err());
    }
}
