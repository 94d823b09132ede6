//! ReplicaSet adapter: the scheduling-aware kind. Replica counts are spread
//! across member clusters by the scheduler, and aggregated status flows back
//! onto the federated ReplicaSet.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use fedtypes_core::meta::{deep_copy_relevant_object_meta, object_meta_and_spec_equivalent};
use fedtypes_core::{HandleList, NamespacedName, ObjectHandle, ObjectMeta, SchedulingStatus};
use fedtypes_store::StoreClient;
use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetSpec, ReplicaSetStatus};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{DeleteParams, ListParams, WatchParams};
use kube::core::GroupVersionResource;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::adapter::{FederatedTypeAdapter, HandleWatch};
use crate::registry::{KindRegistry, RegistryError};
use crate::scheduling::{SchedulingAdapter, SchedulingBase, StatusUpdater};
use crate::typed::TypedOps;

pub const REPLICA_SET_KIND: &str = "replicaset";
pub const REPLICA_SET_CONTROLLER_NAME: &str = "replicasets";
pub const FED_REPLICA_SET_PREFERENCES_ANNOTATION: &str = "federation.kubernetes.io/replica-set-preferences";

pub fn register(registry: &mut KindRegistry) -> Result<(), RegistryError> {
    registry.register(
        REPLICA_SET_KIND,
        REPLICA_SET_CONTROLLER_NAME,
        vec![GroupVersionResource::gvr("apps", "v1", REPLICA_SET_CONTROLLER_NAME)],
        ReplicaSetAdapter::new_dyn,
    )
}

const OPS: TypedOps<ReplicaSet> = TypedOps::new(REPLICA_SET_KIND);

/// Counters currently stored on `rs`; absent status or fields read as zero.
fn stored_status(rs: &ReplicaSet) -> SchedulingStatus {
    match rs.status.as_ref() {
        Some(s) => SchedulingStatus::new(
            s.replicas,
            s.fully_labeled_replicas.unwrap_or(0),
            s.ready_replicas.unwrap_or(0),
            s.available_replicas.unwrap_or(0),
        ),
        None => SchedulingStatus::default(),
    }
}

/// Status write capability bound to the federation client.
pub struct ReplicaSetStatusUpdater {
    client: StoreClient,
}

impl ReplicaSetStatusUpdater {
    pub fn new(client: StoreClient) -> Self { Self { client } }
}

#[async_trait]
impl StatusUpdater for ReplicaSetStatusUpdater {
    async fn update_status(&self, obj: &mut ObjectHandle, status: SchedulingStatus) -> kube::Result<()> {
        let rs = OPS.downcast(obj);
        let current = stored_status(rs);
        // fully_labeled mirrors replicas for this kind.
        let desired = SchedulingStatus { fully_labeled_replicas: status.replicas, ..status };
        let namespace = rs.metadata.namespace.clone().unwrap_or_default();
        let name = rs.metadata.name.clone().unwrap_or_default();
        if current == desired {
            counter!("fedtypes_status_unchanged_total", 1u64, "kind" => REPLICA_SET_KIND);
            debug!(ns = %namespace, name = %name, ?status, "replicaset status unchanged");
            return Ok(());
        }
        let mut next = rs.clone();
        next.status = Some(ReplicaSetStatus {
            replicas: desired.replicas,
            fully_labeled_replicas: Some(desired.fully_labeled_replicas),
            ready_replicas: Some(desired.ready_replicas),
            available_replicas: Some(desired.available_replicas),
            ..Default::default()
        });
        match self.client.replace_status(&namespace, &next).await {
            Ok(updated) => {
                counter!("fedtypes_status_updates_total", 1u64, "kind" => REPLICA_SET_KIND);
                info!(ns = %namespace, name = %name, from = ?current, to = ?desired, "replicaset status updated");
                *obj = ObjectHandle::new(updated);
                Ok(())
            }
            Err(e) => {
                warn!(ns = %namespace, name = %name, error = %e, "replicaset status update failed");
                Err(e)
            }
        }
    }
}

pub struct ReplicaSetAdapter {
    scheduling: SchedulingBase,
    client: StoreClient,
}

impl ReplicaSetAdapter {
    pub fn new(client: StoreClient) -> Self {
        let updater = Arc::new(ReplicaSetStatusUpdater::new(client.clone()));
        Self::with_status_updater(client, updater)
    }

    pub fn with_status_updater(client: StoreClient, updater: Arc<dyn StatusUpdater>) -> Self {
        Self { scheduling: SchedulingBase::new(FED_REPLICA_SET_PREFERENCES_ANNOTATION, updater), client }
    }

    pub fn new_dyn(client: StoreClient) -> Arc<dyn FederatedTypeAdapter> { Arc::new(Self::new(client)) }

    fn copy_typed(rs: &ReplicaSet) -> ReplicaSet {
        ReplicaSet { metadata: deep_copy_relevant_object_meta(&rs.metadata), spec: rs.spec.clone(), status: None }
    }
}

#[async_trait]
impl FederatedTypeAdapter for ReplicaSetAdapter {
    fn kind(&self) -> &'static str { REPLICA_SET_KIND }

    fn object_type(&self) -> ObjectHandle { ObjectHandle::new(ReplicaSet::default()) }

    fn is_expected_type(&self, obj: &ObjectHandle) -> bool { OPS.is(obj) }

    fn copy(&self, obj: &ObjectHandle) -> ObjectHandle { ObjectHandle::new(Self::copy_typed(OPS.downcast(obj))) }

    fn equivalent(&self, a: &ObjectHandle, b: &ObjectHandle) -> bool {
        let (a, b) = (OPS.downcast(a), OPS.downcast(b));
        object_meta_and_spec_equivalent(&a.metadata, &a.spec, &b.metadata, &b.spec)
    }

    fn namespaced_name(&self, obj: &ObjectHandle) -> NamespacedName { OPS.namespaced_name(obj) }

    fn object_meta<'a>(&self, obj: &'a ObjectHandle) -> &'a ObjectMeta { OPS.meta(obj) }

    fn object_meta_mut<'a>(&self, obj: &'a mut ObjectHandle) -> &'a mut ObjectMeta { OPS.meta_mut(obj) }

    async fn fed_create(&self, obj: &ObjectHandle) -> kube::Result<ObjectHandle> { OPS.create(&self.client, obj).await }

    async fn fed_delete(&self, name: &NamespacedName, dp: &DeleteParams) -> kube::Result<()> { OPS.delete(&self.client, name, dp).await }

    async fn fed_get(&self, name: &NamespacedName) -> kube::Result<ObjectHandle> { OPS.get(&self.client, name).await }

    async fn fed_list(&self, namespace: &str, lp: &ListParams) -> kube::Result<HandleList> { OPS.list(&self.client, namespace, lp).await }

    async fn fed_update(&self, obj: &ObjectHandle) -> kube::Result<ObjectHandle> { OPS.update(&self.client, obj).await }

    async fn fed_watch(&self, namespace: &str, wp: &WatchParams, version: &str) -> kube::Result<HandleWatch> {
        OPS.watch(&self.client, namespace, wp, version).await
    }

    async fn cluster_create(&self, client: &StoreClient, obj: &ObjectHandle) -> kube::Result<ObjectHandle> { OPS.create(client, obj).await }

    async fn cluster_delete(&self, client: &StoreClient, name: &NamespacedName, dp: &DeleteParams) -> kube::Result<()> {
        OPS.delete(client, name, dp).await
    }

    async fn cluster_get(&self, client: &StoreClient, name: &NamespacedName) -> kube::Result<ObjectHandle> { OPS.get(client, name).await }

    async fn cluster_list(&self, client: &StoreClient, namespace: &str, lp: &ListParams) -> kube::Result<HandleList> {
        OPS.list(client, namespace, lp).await
    }

    async fn cluster_update(&self, client: &StoreClient, obj: &ObjectHandle) -> kube::Result<ObjectHandle> { OPS.update(client, obj).await }

    async fn cluster_watch(&self, client: &StoreClient, namespace: &str, wp: &WatchParams, version: &str) -> kube::Result<HandleWatch> {
        OPS.watch(client, namespace, wp, version).await
    }

    fn new_test_object(&self, namespace: &str) -> ObjectHandle {
        let labels = BTreeMap::from([("foo".to_string(), "bar".to_string())]);
        ObjectHandle::new(ReplicaSet {
            metadata: ObjectMeta {
                generate_name: Some("test-replicaset-".to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(ReplicaSetSpec {
                replicas: Some(3),
                selector: LabelSelector { match_labels: Some(labels.clone()), ..Default::default() },
                template: Some(PodTemplateSpec {
                    metadata: Some(ObjectMeta { labels: Some(labels), ..Default::default() }),
                    spec: Some(PodSpec {
                        termination_grace_period_seconds: Some(0),
                        containers: vec![Container {
                            name: "nginx".to_string(),
                            image: Some("nginx".to_string()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            }),
            status: None,
        })
    }

    fn scheduling(&self) -> Option<&dyn SchedulingAdapter> { Some(self) }
}

#[async_trait]
impl SchedulingAdapter for ReplicaSetAdapter {
    fn preferences_annotation_name(&self) -> &'static str { self.scheduling.preferences_annotation_name() }

    async fn update_status(&self, obj: &mut ObjectHandle, status: SchedulingStatus) -> kube::Result<()> {
        self.scheduling.update_status(obj, status).await
    }

    fn equivalent_ignoring_schedule(&self, a: &ObjectHandle, b: &ObjectHandle) -> bool {
        let (rs1, rs2) = (OPS.downcast(a), OPS.downcast(b));
        // A missing spec compares as the empty spec.
        let spec1 = rs1.spec.clone().unwrap_or_default();
        let spec2 = ReplicaSetSpec { replicas: spec1.replicas, ..rs2.spec.clone().unwrap_or_default() };
        object_meta_and_spec_equivalent(&rs1.metadata, &spec1, &rs2.metadata, &spec2)
    }
}
