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

//! `ObjectStore` binding (spec.md section 6) over the `object_store` crate,
//! so any backend it supports (local disk, S3, GCS, in-memory) can serve as
//! the campaign's durable state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::path::Path as StorePath;
use object_store::ObjectStore as ObjectStoreBackend;

use crate::capabilities::{ObjectMetadata, ObjectStore};
use crate::error::Result;

/// Adapts any `object_store::ObjectStore` backend to our capability trait.
pub struct BackedObjectStore {
    inner: Arc<dyn ObjectStoreBackend>,
}

impl BackedObjectStore {
    pub fn new(inner: Arc<dyn ObjectStoreBackend>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ObjectStore for BackedObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, metadata: ObjectMetadata) -> Result<()> {
        let path = StorePath::from(key);
        self.inner.put(&path, bytes.into()).await?;
        let _ = metadata; // object_store has no first-class attribute bag; callers fold it into the key/body.
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = StorePath::from(key);
        match self.inner.get(&path).await {
            Ok(result) => {
                let bytes = result.bytes().await?;
                Ok(Some(bytes.to_vec()))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        let path = StorePath::from(key);
        match self.inner.head(&path).await {
            Ok(meta) => Ok(Some(ObjectMetadata {
                content_type: None,
                attributes: HashMap::from([("size".to_string(), meta.size.to_string())]),
            })),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let path = StorePath::from(prefix);
        let entries: Vec<_> = self.inner.list(Some(&path)).try_collect().await?;
        Ok(entries.into_iter().map(|m| m.location.to_string()).collect())
    }
}
