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

//! External collaborator capabilities (spec.md section 6). Every concrete
//! cloud/transport binding lives behind these traits; the rest of the crate
//! only ever talks to a `dyn ComputeProvider` / `dyn ObjectStore` / `dyn
//! MetricsSink`.

use std::collections::HashMap;
use std::time::SystemTime;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Architecture, InstanceType};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    pub limit: u32,
    pub in_use: u32,
}

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub instance_type: String,
    pub image_id: String,
    pub user_data: String,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Pending,
    Running,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct VmDescription {
    pub state: VmState,
    pub public_ip: Option<String>,
    pub launched_at: Option<SystemTime>,
}

#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn list_instance_types(&self, region: &str) -> Result<Vec<InstanceType>>;
    async fn quota(&self, family: &str) -> Result<Quota>;
    async fn launch_vm(&self, req: LaunchRequest) -> Result<String>;
    async fn terminate_vm(&self, vm_instance_id: &str) -> Result<()>;
    async fn describe_vm(&self, vm_instance_id: &str) -> Result<VmDescription>;
}

#[derive(Debug, Clone, Default)]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    pub attributes: HashMap<String, String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, metadata: ObjectMetadata) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn head(&self, key: &str) -> Result<Option<ObjectMetadata>>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct MetricDimension {
    pub name: String,
    pub value: String,
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn emit(
        &self,
        namespace: &str,
        name: &str,
        value: f64,
        unit: &str,
        dimensions: &[MetricDimension],
        timestamp: SystemTime,
    );
}

/// Normalize a provider-reported family/size pair into an `InstanceType`,
/// filling in architecture when the provider did not tag it explicitly.
pub fn normalize_instance_type(
    name: String,
    family: String,
    size: String,
    architecture: Option<Architecture>,
    vcpus: u32,
    memory_gb: f64,
    socket_count: u32,
    numa_nodes: u32,
) -> InstanceType {
    let architecture = architecture.unwrap_or_else(|| crate::model::instance::classify_architecture_by_name(&name));
    InstanceType {
        name,
        family,
        size,
        architecture,
        vcpus,
        memory_gb,
        socket_count,
        numa_nodes,
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// In-memory `ComputeProvider` fake. VM ids are assigned sequentially so
    /// tests can assert on exact ids.
    #[derive(Default)]
    pub struct FakeComputeProvider {
        inner: Mutex<FakeComputeState>,
    }

    #[derive(Default)]
    struct FakeComputeState {
        catalog: Vec<InstanceType>,
        quotas: HashMap<String, Quota>,
        vms: HashMap<String, VmDescription>,
        next_vm_id: u64,
        fail_launch: bool,
    }

    impl FakeComputeProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_catalog(catalog: Vec<InstanceType>) -> Self {
            let mut state = FakeComputeState::default();
            state.catalog = catalog;
            Self { inner: Mutex::new(state) }
        }

        pub fn set_quota(&self, family: &str, quota: Quota) {
            self.inner.lock().quotas.insert(family.to_string(), quota);
        }

        pub fn set_fail_launch(&self, fail: bool) {
            self.inner.lock().fail_launch = fail;
        }

        pub fn vm_count(&self) -> usize {
            self.inner.lock().vms.len()
        }
    }

    #[async_trait]
    impl ComputeProvider for FakeComputeProvider {
        async fn list_instance_types(&self, _region: &str) -> Result<Vec<InstanceType>> {
            Ok(self.inner.lock().catalog.clone())
        }

        async fn quota(&self, family: &str) -> Result<Quota> {
            Ok(self
                .inner
                .lock()
                .quotas
                .get(family)
                .copied()
                .unwrap_or(Quota { limit: u32::MAX, in_use: 0 }))
        }

        async fn launch_vm(&self, _req: LaunchRequest) -> Result<String> {
            let mut state = self.inner.lock();
            if state.fail_launch {
                return Err(crate::error::Error::Capability("InsufficientInstanceCapacity".into()));
            }
            state.next_vm_id += 1;
            let id = format!("vm-{}", state.next_vm_id);
            state.vms.insert(
                id.clone(),
                VmDescription { state: VmState::Running, public_ip: None, launched_at: None },
            );
            Ok(id)
        }

        async fn terminate_vm(&self, vm_instance_id: &str) -> Result<()> {
            if let Some(vm) = self.inner.lock().vms.get_mut(vm_instance_id) {
                vm.state = VmState::Terminated;
            }
            Ok(())
        }

        async fn describe_vm(&self, vm_instance_id: &str) -> Result<VmDescription> {
            self.inner
                .lock()
                .vms
                .get(vm_instance_id)
                .cloned()
                .ok_or_else(|| crate::error::Error::Capability(format!("unknown vm {vm_instance_id}")))
        }
    }

    /// In-memory `ObjectStore` fake with last-writer-wins semantics.
    #[derive(Default)]
    pub struct FakeObjectStore {
        objects: Mutex<HashMap<String, (Vec<u8>, ObjectMetadata)>>,
    }

    impl FakeObjectStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn shared() -> Arc<Self> {
            Arc::new(Self::new())
        }
    }

    #[async_trait]
    impl ObjectStore for FakeObjectStore {
        async fn put(&self, key: &str, bytes: Vec<u8>, metadata: ObjectMetadata) -> Result<()> {
            self.objects.lock().insert(key.to_string(), (bytes, metadata));
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.objects.lock().get(key).map(|(b, _)| b.clone()))
        }

        async fn head(&self, key: &str) -> Result<Option<ObjectMetadata>> {
            Ok(self.objects.lock().get(key).map(|(_, m)| m.clone()))
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>> {
            Ok(self
                .objects
                .lock()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }
    }

    /// In-memory `MetricsSink` fake that just records every call for assertions.
    #[derive(Default)]
    pub struct FakeMetricsSink {
        events: Mutex<Vec<(String, String, f64)>>,
    }

    impl FakeMetricsSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<(String, String, f64)> {
            self.events.lock().clone()
        }
    }

    #[async_trait]
    impl MetricsSink for FakeMetricsSink {
        async fn emit(
            &self,
            namespace: &str,
            name: &str,
            value: f64,
            _unit: &str,
            _dimensions: &[MetricDimension],
            _timestamp: SystemTime,
        ) {
            self.events.lock().push((namespace.to_string(), name.to_string(), value));
        }
    }

    #[tokio::test]
    async fn fake_compute_provider_assigns_sequential_ids() {
        let p = FakeComputeProvider::new();
        let req = LaunchRequest {
            instance_type: "m7i.large".into(),
            image_id: "ami-1".into(),
            user_data: String::new(),
            tags: HashMap::new(),
        };
        let id1 = p.launch_vm(req.clone()).await.unwrap();
        let id2 = p.launch_vm(req).await.unwrap();
        assert_eq!(id1, "vm-1");
        assert_eq!(id2, "vm-2");
        assert_eq!(p.vm_count(), 2);
    }

    #[tokio::test]
    async fn fake_compute_provider_honors_fail_launch() {
        let p = FakeComputeProvider::new();
        p.set_fail_launch(true);
        let req = LaunchRequest {
            instance_type: "m7i.large".into(),
            image_id: "ami-1".into(),
            user_data: String::new(),
            tags: HashMap::new(),
        };
        assert!(p.launch_vm(req).await.is_err());
    }

    #[tokio::test]
    async fn fake_object_store_is_last_writer_wins() {
        let s = FakeObjectStore::new();
        s.put("k", b"a".to_vec(), ObjectMetadata::default()).await.unwrap();
        s.put("k", b"b".to_vec(), ObjectMetadata::default()).await.unwrap();
        assert_eq!(s.get("k").await.unwrap(), Some(b"b".to_vec()));
    }

    #[tokio::test]
    async fn fake_object_store_list_filters_by_prefix() {
        let s = FakeObjectStore::new();
        s.put("a/1", vec![], ObjectMetadata::default()).await.unwrap();
        s.put("b/1", vec![], ObjectMetadata::default()).await.unwrap();
        let keys = s.list("a/").await.unwrap();
        assert_eq!(keys, vec!["a/1".to_string()]);
    }
}
