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

//! FleetBench scheduler binary: loads a campaign spec, wires concrete
//! capability implementations, and runs the campaign to completion.

mod campaign;
mod config;
mod planner;
mod publisher;
mod queue;
mod tracker;
mod watchdog;

use std::process::ExitCode as ProcessExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use object_store::local::LocalFileSystem;
use tracing_subscriber::EnvFilter;

use fleetbench_core::capabilities::{ComputeProvider, LaunchRequest, MetricsSink, ObjectStore, Quota, VmDescription};
use fleetbench_core::config::CampaignSpec;
use fleetbench_core::error::{Error, Result};
use fleetbench_core::model::InstanceType;
use fleetbench_core::store::BackedObjectStore;

use crate::campaign::{Campaign, ExitCode};
use crate::config::SchedulerConfig;

/// Run a FleetBench campaign against a cloud fleet.
#[derive(Parser, Debug)]
#[command(name = "fleetbench-scheduler")]
struct Args {
    /// Path to a campaign spec JSON file (spec.md section 6).
    #[arg(long)]
    spec: String,
}

/// Stands in for the cloud SDK binding a deployment must supply. FleetBench
/// does not ship a cloud provider driver (spec.md section 1 "Non-goals");
/// every operation fails loudly instead of silently no-opping so a missing
/// binding is caught at the first scheduling attempt, not buried in logs.
struct UnconfiguredComputeProvider;

#[async_trait]
impl ComputeProvider for UnconfiguredComputeProvider {
    async fn list_instance_types(&self, _region: &str) -> Result<Vec<InstanceType>> {
        Err(Error::Capability("no ComputeProvider configured for this deployment".into()))
    }

    async fn quota(&self, _family: &str) -> Result<Quota> {
        Err(Error::Capability("no ComputeProvider configured for this deployment".into()))
    }

    async fn launch_vm(&self, _req: LaunchRequest) -> Result<String> {
        Err(Error::Capability("no ComputeProvider configured for this deployment".into()))
    }

    async fn terminate_vm(&self, _vm_instance_id: &str) -> Result<()> {
        Err(Error::Capability("no ComputeProvider configured for this deployment".into()))
    }

    async fn describe_vm(&self, _vm_instance_id: &str) -> Result<VmDescription> {
        Err(Error::Capability("no ComputeProvider configured for this deployment".into()))
    }
}

#[cfg(feature = "prometheus-metrics")]
fn metrics_sink() -> Arc<dyn MetricsSink> {
    fleetbench_core::metrics::prometheus::PrometheusMetricsSink::current()
}

#[cfg(not(feature = "prometheus-metrics"))]
fn metrics_sink() -> Arc<dyn MetricsSink> {
    struct NoopMetricsSink;
    #[async_trait]
    impl MetricsSink for NoopMetricsSink {
        async fn emit(
            &self,
            _namespace: &str,
            _name: &str,
            _value: f64,
            _unit: &str,
            _dimensions: &[fleetbench_core::capabilities::MetricDimension],
            _timestamp: std::time::SystemTime,
        ) {
        }
    }
    Arc::new(NoopMetricsSink)
}

#[cfg(feature = "prometheus-metrics")]
async fn spawn_metrics_endpoint() {
    use warp::Filter;
    let metrics = warp::path("metrics").map(|| match fleetbench_core::metrics::prometheus::render() {
        Ok(body) => warp::reply::with_header(body, "content-type", "text/plain; version=0.0.4"),
        Err(e) => warp::reply::with_header(e.to_string().into_bytes(), "content-type", "text/plain"),
    });
    tokio::spawn(warp::serve(metrics).run(([0, 0, 0, 0], 9090)));
}

#[cfg(not(feature = "prometheus-metrics"))]
async fn spawn_metrics_endpoint() {}

#[tokio::main]
async fn main() -> ProcessExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let scheduler_config = SchedulerConfig::from_env();

    let spec_bytes = match std::fs::read(&args.spec) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(path = %args.spec, error = %e, "failed to read campaign spec");
            return ProcessExitCode::from(3);
        }
    };
    let spec = match CampaignSpec::from_json(&spec_bytes) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "campaign spec failed validation");
            return ProcessExitCode::from(3);
        }
    };

    let compute: Arc<dyn ComputeProvider> = Arc::new(UnconfiguredComputeProvider);
    let store: Arc<dyn ObjectStore> = Arc::new(BackedObjectStore::new(Arc::new(LocalFileSystem::new())));
    let metrics = metrics_sink();

    spawn_metrics_endpoint().await;

    let campaign = Campaign::new(compute, store, metrics, scheduler_config, spec);
    match campaign.run().await {
        Ok(report) => {
            tracing::info!(
                exit_code = ?report.exit_code,
                total_jobs = report.snapshot.total_jobs,
                estimated_cost_usd = report.snapshot.estimated_cost_usd,
                "campaign finished"
            );
            ProcessExitCode::from(exit_code_value(report.exit_code))
        }
        Err(e) => {
            tracing::error!(error = %e, "campaign run failed");
            ProcessExitCode::from(4)
        }
    }
}

fn exit_code_value(code: ExitCode) -> u8 {
    match code {
        ExitCode::AllSucceeded => 0,
        ExitCode::NonRetryableFailures => 1,
        ExitCode::CircuitBreakerEngaged => 2,
        ExitCode::PlanningFailed => 3,
    }
}
