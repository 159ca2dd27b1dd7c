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

//! ObjectStore key layout (spec.md section 6). Stable, part of the public
//! contract — do not reshuffle path segments without a migration plan.

pub fn raw_result(region: &str, instance_type: &str, job_id: &str, year: u32, month: u32, day: u32) -> String {
    format!("raw/{year:04}/{month:02}/{day:02}/{region}/{instance_type}/{job_id}.json")
}

pub fn processed_latest(kind: &str, instance_type: &str) -> String {
    format!("processed/latest/{kind}/{instance_type}.json")
}

pub fn processed_historical(date: &str, kind: &str, instance_type: &str) -> String {
    format!("processed/historical/{date}/{kind}/{instance_type}.json")
}

pub fn sentinel(job_id: &str) -> String {
    format!("sentinels/{job_id}.json")
}

pub fn journal_job(job_id: &str) -> String {
    format!("journal/jobs/{job_id}.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_contract() {
        assert_eq!(
            raw_result("us-east-1", "m7i.large", "j1", 2026, 8, 1),
            "raw/2026/08/01/us-east-1/m7i.large/j1.json"
        );
        assert_eq!(processed_latest("stream", "m7i.large"), "processed/latest/stream/m7i.large.json");
        assert_eq!(
            processed_historical("2026-08-01", "stream", "m7i.large"),
            "processed/historical/2026-08-01/stream/m7i.large.json"
        );
        assert_eq!(sentinel("j1"), "sentinels/j1.json");
        assert_eq!(journal_job("j1"), "journal/jobs/j1.json");
    }
}
