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

//! Instance catalog (spec.md section 4.1). Loaded once per campaign from the
//! `ComputeProvider`, then queried in-memory for the lifetime of the run.

use std::collections::HashMap;
use std::sync::Arc;

use crate::capabilities::ComputeProvider;
use crate::error::{Error, Result};
use crate::model::{Architecture, InstanceType};

pub struct Catalog {
    by_name: HashMap<String, InstanceType>,
}

impl Catalog {
    pub async fn load(provider: &Arc<dyn ComputeProvider>, region: &str) -> Result<Self> {
        let types = provider.list_instance_types(region).await?;
        let by_name = types.into_iter().map(|t| (t.name.clone(), t)).collect();
        Ok(Self { by_name })
    }

    pub fn lookup(&self, name: &str) -> Result<&InstanceType> {
        self.by_name
            .get(name)
            .ok_or_else(|| Error::InstanceTypeNotFound(name.to_string()))
    }

    /// Cartesian product of `families` x `sizes`, filtered to combinations
    /// present in the catalog (spec.md section 4.1 "Expand").
    pub fn expand(&self, families: &[String], sizes: &[String]) -> Vec<&InstanceType> {
        self.by_name
            .values()
            .filter(|t| families.iter().any(|f| f == &t.family) && sizes.iter().any(|s| s == &t.size))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Architecture by naming convention, consulting the provider-reported tag
/// first when one is available (spec.md section 4.1 "on ambiguity").
pub fn architecture_of(name: &str, provider_tag: Option<Architecture>) -> Architecture {
    provider_tag.unwrap_or_else(|| crate::model::instance::classify_architecture_by_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::testing::FakeComputeProvider;

    fn instance(name: &str, family: &str, size: &str) -> InstanceType {
        InstanceType {
            name: name.to_string(),
            family: family.to_string(),
            size: size.to_string(),
            architecture: Architecture::Intel,
            vcpus: 2,
            memory_gb: 8.0,
            socket_count: 1,
            numa_nodes: 1,
        }
    }

    #[tokio::test]
    async fn load_indexes_by_name() {
        let provider: Arc<dyn ComputeProvider> = Arc::new(FakeComputeProvider::with_catalog(vec![
            instance("m7i.large", "m7i", "large"),
            instance("m7i.xlarge", "m7i", "xlarge"),
        ]));
        let catalog = Catalog::load(&provider, "us-east-1").await.unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.lookup("m7i.large").is_ok());
        assert!(catalog.lookup("missing").is_err());
    }

    #[tokio::test]
    async fn expand_is_cartesian_and_filters_unavailable() {
        let provider: Arc<dyn ComputeProvider> = Arc::new(FakeComputeProvider::with_catalog(vec![
            instance("m7i.large", "m7i", "large"),
            instance("m7g.large", "m7g", "large"),
            instance("m7i.2xlarge", "m7i", "2xlarge"),
        ]));
        let catalog = Catalog::load(&provider, "us-east-1").await.unwrap();
        let expanded = catalog.expand(&["m7i".to_string()], &["large".to_string()]);
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].name, "m7i.large");
    }

    #[test]
    fn architecture_prefers_provider_tag() {
        assert_eq!(architecture_of("m7g.large", Some(Architecture::Intel)), Architecture::Intel);
        assert_eq!(architecture_of("m7g.large", None), Architecture::Arm);
    }
}
