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

//! FleetBench scheduler process configuration.

use std::time::Duration;

/// Process-wide configuration for the campaign runner, sourced from
/// environment variables (spec.md section 6) with builder overrides for
/// tests.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub region: String,
    pub image_id_x86: String,
    pub image_id_arm: String,
    pub object_store_bucket: String,
    pub max_concurrent: u32,
    pub primary_timeout: Duration,
    pub emergency_buffer: Duration,
    pub watchdog_sweep_interval: Duration,
    pub circuit_breaker_window: Duration,
    pub circuit_breaker_threshold: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            image_id_x86: String::new(),
            image_id_arm: String::new(),
            object_store_bucket: String::new(),
            max_concurrent: 8,
            primary_timeout: Duration::from_secs(30 * 60),
            emergency_buffer: Duration::from_secs(60 * 60),
            watchdog_sweep_interval: Duration::from_secs(30),
            circuit_breaker_window: Duration::from_secs(15 * 60),
            circuit_breaker_threshold: 0.4,
        }
    }
}

impl SchedulerConfig {
    /// Build a config from the environment variables named in spec.md
    /// section 6, falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("REGION") {
            cfg.region = v;
        }
        if let Ok(v) = std::env::var("IMAGE_ID_X86") {
            cfg.image_id_x86 = v;
        }
        if let Ok(v) = std::env::var("IMAGE_ID_ARM") {
            cfg.image_id_arm = v;
        }
        if let Ok(v) = std::env::var("OBJECT_STORE_BUCKET") {
            cfg.object_store_bucket = v;
        }
        if let Some(v) = std::env::var("MAX_CONCURRENT").ok().and_then(|s| s.parse().ok()) {
            cfg.max_concurrent = v;
        }
        if let Some(v) = std::env::var("PRIMARY_TIMEOUT_SEC").ok().and_then(|s| s.parse().ok()) {
            cfg.primary_timeout = Duration::from_secs(v);
        }
        if let Some(v) = std::env::var("EMERGENCY_BUFFER_SEC").ok().and_then(|s| s.parse().ok()) {
            cfg.emergency_buffer = Duration::from_secs(v);
        }
        cfg
    }

    pub fn with_max_concurrent(mut self, v: u32) -> Self {
        self.max_concurrent = v;
        self
    }

    pub fn with_primary_timeout(mut self, v: Duration) -> Self {
        self.primary_timeout = v;
        self
    }

    pub fn with_watchdog_sweep_interval(mut self, v: Duration) -> Self {
        self.watchdog_sweep_interval = v;
        self
    }

    pub fn with_circuit_breaker_threshold(mut self, v: f64) -> Self {
        self.circuit_breaker_threshold = v;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.max_concurrent, 8);
        assert!(cfg.circuit_breaker_threshold > 0.0 && cfg.circuit_breaker_threshold < 1.0);
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = SchedulerConfig::default()
            .with_max_concurrent(2)
            .with_circuit_breaker_threshold(0.5);
        assert_eq!(cfg.max_concurrent, 2);
        assert_eq!(cfg.circuit_breaker_threshold, 0.5);
    }
}
