//! CRUD conformance run for one adapter: create, get, update, (status), delete,
//! each confirmed through a watch opened before the first write.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use fedtypes_core::{HandleList, NamespacedName, ObjectHandle, SchedulingStatus};
use fedtypes_store::{is_not_found, StoreClient};
use futures::StreamExt;
use kube::api::{DeleteParams, ListParams, WatchEvent, WatchParams};
use metrics::histogram;
use serde::Serialize;
use tracing::{debug, info};

use crate::adapter::{FederatedTypeAdapter, HandleWatch};

/// Annotation stamped on the test object by the update step.
pub const CRUD_TESTER_ANNOTATION: &str = "fedtypes.io/crud-tester";

const DELETE_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize)]
pub struct StepTiming {
    pub step: &'static str,
    pub millis: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrudReport {
    pub kind: &'static str,
    pub target: &'static str,
    pub object: String,
    pub steps: Vec<StepTiming>,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Expect { Added, Modified, Deleted }

impl Expect {
    fn matches(self, ev: &WatchEvent<ObjectHandle>) -> Option<&ObjectHandle> {
        match (self, ev) {
            (Expect::Added, WatchEvent::Added(o)) | (Expect::Modified, WatchEvent::Modified(o)) | (Expect::Deleted, WatchEvent::Deleted(o)) => Some(o),
            _ => None,
        }
    }
}

pub struct CrudTester {
    adapter: Arc<dyn FederatedTypeAdapter>,
    cluster: Option<StoreClient>,
    namespace: String,
    watch_timeout: Duration,
}

impl CrudTester {
    /// Tester against the federation API server the adapter is bound to.
    pub fn new(adapter: Arc<dyn FederatedTypeAdapter>, namespace: impl Into<String>, watch_timeout: Duration) -> Self {
        Self { adapter, cluster: None, namespace: namespace.into(), watch_timeout }
    }

    /// Drive the `cluster_*` operations against `client` instead.
    pub fn against_cluster(mut self, client: StoreClient) -> Self {
        self.cluster = Some(client);
        self
    }

    fn target(&self) -> &'static str { if self.cluster.is_some() { "cluster" } else { "federation" } }

    async fn create(&self, obj: &ObjectHandle) -> kube::Result<ObjectHandle> {
        match &self.cluster {
            Some(c) => self.adapter.cluster_create(c, obj).await,
            None => self.adapter.fed_create(obj).await,
        }
    }

    async fn get(&self, name: &NamespacedName) -> kube::Result<ObjectHandle> {
        match &self.cluster {
            Some(c) => self.adapter.cluster_get(c, name).await,
            None => self.adapter.fed_get(name).await,
        }
    }

    async fn list(&self) -> kube::Result<HandleList> {
        match &self.cluster {
            Some(c) => self.adapter.cluster_list(c, &self.namespace, &ListParams::default()).await,
            None => self.adapter.fed_list(&self.namespace, &ListParams::default()).await,
        }
    }

    async fn update(&self, obj: &ObjectHandle) -> kube::Result<ObjectHandle> {
        match &self.cluster {
            Some(c) => self.adapter.cluster_update(c, obj).await,
            None => self.adapter.fed_update(obj).await,
        }
    }

    async fn delete(&self, name: &NamespacedName) -> kube::Result<()> {
        match &self.cluster {
            Some(c) => self.adapter.cluster_delete(c, name, &DeleteParams::default()).await,
            None => self.adapter.fed_delete(name, &DeleteParams::default()).await,
        }
    }

    async fn watch(&self, version: &str) -> kube::Result<HandleWatch> {
        let wp = WatchParams::default();
        match &self.cluster {
            Some(c) => self.adapter.cluster_watch(c, &self.namespace, &wp, version).await,
            None => self.adapter.fed_watch(&self.namespace, &wp, version).await,
        }
    }

    /// Consume events until one of kind `expect` for `name` arrives.
    /// Events of other kinds or for other objects are skipped.
    async fn wait_for(&self, events: &mut HandleWatch, expect: Expect, name: &NamespacedName) -> Result<ObjectHandle> {
        let deadline = tokio::time::Instant::now() + self.watch_timeout;
        loop {
            let next = tokio::time::timeout_at(deadline, events.next())
                .await
                .map_err(|_| anyhow!("timed out waiting for {:?} of {}", expect, name))?;
            let ev = match next {
                Some(Ok(ev)) => ev,
                Some(Err(e)) => return Err(e).context(format!("watch failed waiting for {:?} of {}", expect, name)),
                None => bail!("watch closed waiting for {:?} of {}", expect, name),
            };
            if let WatchEvent::Error(status) = &ev {
                bail!("watch error waiting for {:?} of {}: {}", expect, name, status.message);
            }
            match expect.matches(&ev) {
                Some(obj) if self.adapter.is_expected_type(obj) && self.adapter.namespaced_name(obj) == *name => {
                    return Ok(obj.clone());
                }
                _ => debug!(kind = self.adapter.kind(), ?expect, "skipping unrelated watch event"),
            }
        }
    }

    async fn wait_until_gone(&self, name: &NamespacedName) -> Result<()> {
        let deadline = Instant::now() + self.watch_timeout;
        loop {
            match self.get(name).await {
                Err(e) if is_not_found(&e) => return Ok(()),
                Err(e) => return Err(e).context(format!("get {} after delete", name)),
                Ok(_) if Instant::now() >= deadline => bail!("{} still present after delete", name),
                Ok(_) => tokio::time::sleep(DELETE_POLL_INTERVAL).await,
            }
        }
    }

    pub async fn run(&self) -> Result<CrudReport> {
        let kind = self.adapter.kind();
        let mut steps = Vec::new();
        let mut mark = |step: &'static str, started: Instant| {
            let elapsed = started.elapsed();
            histogram!("fedtypes_crud_step_ms", elapsed.as_secs_f64() * 1000.0, "kind" => kind, "step" => step);
            steps.push(StepTiming { step, millis: elapsed.as_millis() as u64 });
        };

        let t = Instant::now();
        let listing = self.list().await.with_context(|| format!("list {} in {}", kind, self.namespace))?;
        let version = listing.resource_version.unwrap_or_default();
        let mut events = self.watch(&version).await.with_context(|| format!("watch {} from {:?}", kind, version))?;
        mark("list_watch", t);

        let t = Instant::now();
        let desired = self.adapter.new_test_object(&self.namespace);
        let created = self.create(&desired).await.with_context(|| format!("create test {}", kind))?;
        let name = self.adapter.namespaced_name(&created);
        info!(kind, target = self.target(), object = %name, "crud tester created object");
        self.wait_for(&mut events, Expect::Added, &name).await?;
        mark("create", t);

        let t = Instant::now();
        let fetched = self.get(&name).await.with_context(|| format!("get {}", name))?;
        if !self.adapter.equivalent(&created, &fetched) {
            bail!("fetched {} is not equivalent to the created object", name);
        }
        mark("get", t);

        let t = Instant::now();
        let mut changed = self.adapter.copy(&fetched);
        let meta = self.adapter.object_meta_mut(&mut changed);
        meta.resource_version = self.adapter.object_meta(&fetched).resource_version.clone();
        let annotations = meta.annotations.get_or_insert_with(Default::default);
        annotations.insert(CRUD_TESTER_ANNOTATION.to_string(), "updated".to_string());
        if let Some(sched) = self.adapter.scheduling() {
            annotations.insert(sched.preferences_annotation_name().to_string(), "{}".to_string());
        }
        let updated = self.update(&changed).await.with_context(|| format!("update {}", name))?;
        if let Some(sched) = self.adapter.scheduling() {
            if !sched.has_preferences(self.adapter.object_meta(&updated)) {
                bail!("updated {} lost its scheduling preferences", name);
            }
        }
        if !self.adapter.equivalent(&changed, &updated) {
            bail!("updated {} does not carry the requested change", name);
        }
        if self.adapter.equivalent(&fetched, &updated) {
            bail!("updated {} is still equivalent to its previous version", name);
        }
        self.wait_for(&mut events, Expect::Modified, &name).await?;
        mark("update", t);

        if let (Some(sched), None) = (self.adapter.scheduling(), &self.cluster) {
            let t = Instant::now();
            let mut current = updated.clone();
            let status = SchedulingStatus::new(1, 1, 1, 1);
            sched.update_status(&mut current, status).await.with_context(|| format!("update status of {}", name))?;
            let written = self.adapter.object_meta(&current).resource_version.clone();
            sched.update_status(&mut current, status).await.with_context(|| format!("repeat status of {}", name))?;
            if self.adapter.object_meta(&current).resource_version != written {
                bail!("repeating an identical status rewrote {}", name);
            }
            mark("update_status", t);
        }

        let t = Instant::now();
        self.delete(&name).await.with_context(|| format!("delete {}", name))?;
        self.wait_until_gone(&name).await?;
        self.wait_for(&mut events, Expect::Deleted, &name).await?;
        mark("delete", t);

        info!(kind, target = self.target(), object = %name, steps = steps.len(), "crud tester passed");
        Ok(CrudReport { kind, target: self.target(), object: name.to_string(), steps })
    }
}
