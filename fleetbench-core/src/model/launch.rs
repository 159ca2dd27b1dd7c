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

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Written once by the Launcher, read by the Collector, never mutated
/// (spec.md section 3 "LaunchRecord").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchRecord {
    pub job_id: String,
    pub instance_type: String,
    pub vm_instance_id: String,
    pub launched_at: SystemTime,
    pub image_id: String,
    pub payload_hash: String,
    pub deadline: SystemTime,
    pub primary_timeout: SystemTime,
    pub emergency_timeout: SystemTime,
}

impl LaunchRecord {
    pub fn object_key(job_id: &str) -> String {
        format!("journal/launches/{job_id}.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_is_stable() {
        assert_eq!(
            LaunchRecord::object_key("abc"),
            "journal/launches/abc.json"
        );
    }
}
