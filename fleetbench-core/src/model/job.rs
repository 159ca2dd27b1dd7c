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
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::benchmark::{BenchmarkKind, BenchmarkParameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Scheduled,
    Launching,
    Running,
    Collecting,
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
}

impl JobState {
    fn ordinal(&self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Scheduled => 1,
            JobState::Launching => 2,
            JobState::Running => 3,
            JobState::Collecting => 4,
            JobState::Succeeded => 5,
            JobState::Failed => 5,
            JobState::TimedOut => 5,
            JobState::Skipped => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::TimedOut | JobState::Skipped
        )
    }

    fn name(&self) -> &'static str {
        match self {
            JobState::Pending => "Pending",
            JobState::Scheduled => "Scheduled",
            JobState::Launching => "Launching",
            JobState::Running => "Running",
            JobState::Collecting => "Collecting",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
            JobState::TimedOut => "TimedOut",
            JobState::Skipped => "Skipped",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition. The only
    /// permitted regression is a retry sending a terminal-but-retryable job
    /// back to `Scheduled` (spec.md section 3, invariant iii).
    fn can_transition_to(&self, next: JobState) -> bool {
        if self.is_terminal() {
            return next == JobState::Scheduled;
        }
        next.ordinal() == self.ordinal() + 1 || next.is_terminal()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub instance_type: String,
    pub benchmark_kind: BenchmarkKind,
    pub parameters: BenchmarkParameters,
    pub iterations: u32,
    pub priority: u8,
    pub window_id: String,
    pub wave_id: u32,
    pub deadline: SystemTime,
    pub retries_remaining: u32,
    pub tags: HashMap<String, String>,
    pub state: JobState,
}

impl Job {
    /// Enforce state monotonicity (spec.md section 3, invariant iii) and
    /// the "TimedOut requires VM terminated first" rule is enforced by the
    /// caller (the collector marks the VM terminated before calling this
    /// with `TimedOut`); this function only guards the state graph shape.
    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                job_id: self.job_id.clone(),
                from: self.state.name(),
                to: next.name(),
            });
        }
        self.state = next;
        Ok(())
    }
}

/// Durable record of a job's last known status, keyed by `keys::journal_job`
/// (spec.md section 8 "Restart safety"). The launcher writes `Pending` and
/// `LaunchFailed` before a terminal outcome is known; the campaign runner
/// overwrites with a terminal variant once one is reached, so a restarted
/// process can tell which planned jobs are already done.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum JournalEntry {
    Pending,
    LaunchFailed { reason: String },
    Succeeded,
    Failed { reason: String },
    TimedOut,
}

impl JournalEntry {
    /// Whether a restarted campaign should skip replanning this job.
    pub fn is_resumable_done(&self) -> bool {
        matches!(self, JournalEntry::Succeeded)
    }
}

/// A half-open time interval associated with a benchmark theme
/// (spec.md section 3 "Window").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Window {
    pub id: String,
    pub start: SystemTime,
    pub end: SystemTime,
    pub capacity: u32,
    pub allowed_kinds: Vec<BenchmarkKind>,
}

impl Window {
    pub fn allows(&self, kind: BenchmarkKind) -> bool {
        self.allowed_kinds.contains(&kind)
    }
}
