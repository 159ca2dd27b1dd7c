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

//! FleetBench error types.
//!
//! A single closed enum covers every failure the core and its collaborators
//! can produce. String-matching against provider error messages is
//! centralized in `crate::classifier::classify`, never scattered here.

use std::fmt;

use crate::classifier::Classification;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// The requested instance type is not present in the catalog.
    InstanceTypeNotFound(String),
    /// A family named in a campaign spec is not known to the catalog.
    UnknownFamily(String),
    /// A job state transition would skip a state or regress.
    InvalidTransition {
        job_id: String,
        from: &'static str,
        to: &'static str,
    },
    /// Planning could not place all requested jobs within the available windows.
    QuotaSaturated { family: String, shortfall: u32 },
    /// A campaign spec failed structural validation (e.g. `iterations == 0`).
    InvalidSpec(String),
    /// Wraps an underlying `ComputeProvider`, `ObjectStore`, or `MetricsSink` failure.
    Capability(String),
    /// JSON (de)serialization failure.
    Serde(String),
    /// Filesystem or network I/O failure.
    Io(String),
    /// Any other internal invariant violation.
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InstanceTypeNotFound(name) => {
                write!(f, "instance type not found in catalog: {name}")
            }
            Error::UnknownFamily(family) => {
                write!(f, "unknown instance family: {family}")
            }
            Error::InvalidTransition { job_id, from, to } => write!(
                f,
                "job {job_id} cannot transition from {from} to {to}"
            ),
            Error::QuotaSaturated { family, shortfall } => write!(
                f,
                "quota saturated for family {family}: {shortfall} job(s) could not be placed in any window"
            ),
            Error::InvalidSpec(msg) => write!(f, "invalid campaign spec: {msg}"),
            Error::Capability(msg) => write!(f, "capability error: {msg}"),
            Error::Serde(msg) => write!(f, "serialization error: {msg}"),
            Error::Io(msg) => write!(f, "i/o error: {msg}"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serde(e.to_string())
    }
}

impl From<object_store::Error> for Error {
    fn from(e: object_store::Error) -> Self {
        Error::Capability(e.to_string())
    }
}

/// A terminal, classified failure for a job. Carries enough context for the
/// final report (spec.md section 7 "User-visible behavior") without losing
/// the underlying cause chain.
#[derive(Debug, Clone)]
pub struct Failure {
    pub classification: Classification,
    pub message: String,
    pub cause_chain: Vec<String>,
    pub recoverable: bool,
}

impl Failure {
    pub fn new(classification: Classification, message: impl Into<String>) -> Self {
        let recoverable = classification.retry_policy().max_attempts > 0;
        Self {
            classification,
            message: message.into(),
            cause_chain: Vec::new(),
            recoverable,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause_chain.push(cause.into());
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.classification, self.message)
    }
}

impl std::error::Error for Failure {}
