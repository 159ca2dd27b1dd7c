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

use serde::{Deserialize, Serialize};

/// CPU architecture family, normalized from provider-specific naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Intel,
    Amd,
    Arm,
}

/// A VM type as enumerated by the `ComputeProvider`, normalized by the
/// catalog (spec.md section 4.1). Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceType {
    pub name: String,
    pub family: String,
    pub size: String,
    pub architecture: Architecture,
    pub vcpus: u32,
    pub memory_gb: f64,
    pub socket_count: u32,
    pub numa_nodes: u32,
}

impl InstanceType {
    /// Wave rank for this instance's size cohort, per spec.md section 4.2 step 3.
    pub fn wave_rank(&self) -> u32 {
        wave_rank_for_size(&self.size)
    }
}

/// `large -> 0, xlarge -> 1, 2xlarge -> 2, >=4xlarge -> 3`.
pub fn wave_rank_for_size(size: &str) -> u32 {
    let size = size.to_lowercase();
    if size == "large" {
        0
    } else if size == "xlarge" {
        1
    } else if size == "2xlarge" {
        2
    } else {
        3
    }
}

/// Classify architecture by trailing-letter naming convention. A trailing
/// `g` in the size token means arm, trailing `a` means amd, otherwise
/// intel. On ambiguity (name doesn't match the convention cleanly) callers
/// should prefer the provider-reported tag over this heuristic, per
/// spec.md section 4.1.
pub fn classify_architecture_by_name(name: &str) -> Architecture {
    // Names look like `m7i.large`, `m7a.xlarge`, `m7g.2xlarge`.
    let family = name.split('.').next().unwrap_or(name);
    let last = family.chars().last();
    match last {
        Some('g') => Architecture::Arm,
        Some('a') => Architecture::Amd,
        _ => Architecture::Intel,
    }
}
