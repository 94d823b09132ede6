//! ConfigMap adapter. Plain propagation, no scheduling.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use fedtypes_core::meta::{deep_copy_relevant_object_meta, object_meta_and_spec_equivalent};
use fedtypes_core::{HandleList, NamespacedName, ObjectHandle, ObjectMeta};
use fedtypes_store::StoreClient;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{DeleteParams, ListParams, WatchParams};
use kube::core::GroupVersionResource;

use crate::adapter::{FederatedTypeAdapter, HandleWatch};
use crate::registry::{KindRegistry, RegistryError};
use crate::typed::TypedOps;

pub const CONFIG_MAP_KIND: &str = "configmap";
pub const CONFIG_MAP_CONTROLLER_NAME: &str = "configmaps";

pub fn register(registry: &mut KindRegistry) -> Result<(), RegistryError> {
    registry.register(
        CONFIG_MAP_KIND,
        CONFIG_MAP_CONTROLLER_NAME,
        vec![GroupVersionResource::gvr("", "v1", CONFIG_MAP_CONTROLLER_NAME)],
        ConfigMapAdapter::new_dyn,
    )
}

const OPS: TypedOps<ConfigMap> = TypedOps::new(CONFIG_MAP_KIND);

pub struct ConfigMapAdapter {
    client: StoreClient,
}

impl ConfigMapAdapter {
    pub fn new(client: StoreClient) -> Self { Self { client } }

    pub fn new_dyn(client: StoreClient) -> Arc<dyn FederatedTypeAdapter> { Arc::new(Self::new(client)) }
}

#[async_trait]
impl FederatedTypeAdapter for ConfigMapAdapter {
    fn kind(&self) -> &'static str { CONFIG_MAP_KIND }

    fn object_type(&self) -> ObjectHandle { ObjectHandle::new(ConfigMap::default()) }

    fn is_expected_type(&self, obj: &ObjectHandle) -> bool { OPS.is(obj) }

    fn copy(&self, obj: &ObjectHandle) -> ObjectHandle {
        let cm = OPS.downcast(obj);
        ObjectHandle::new(ConfigMap {
            metadata: deep_copy_relevant_object_meta(&cm.metadata),
            data: cm.data.clone(),
            binary_data: cm.binary_data.clone(),
            immutable: cm.immutable,
        })
    }

    /// ConfigMaps carry no spec; the payload maps and the immutable flag stand in for it.
    fn equivalent(&self, a: &ObjectHandle, b: &ObjectHandle) -> bool {
        let (a, b) = (OPS.downcast(a), OPS.downcast(b));
        object_meta_and_spec_equivalent(
            &a.metadata,
            &(&a.data, &a.binary_data, a.immutable),
            &b.metadata,
            &(&b.data, &b.binary_data, b.immutable),
        )
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
        ObjectHandle::new(ConfigMap {
            metadata: ObjectMeta {
                generate_name: Some("test-configmap-".to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("A".to_string(), "ala ma kota".to_string())])),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedtypes_store::MemoryStore;
    use k8s_openapi::api::apps::v1::ReplicaSet;

    fn adapter() -> ConfigMapAdapter { ConfigMapAdapter::new(MemoryStore::new().into()) }

    #[test]
    fn no_scheduling_view() {
        let a = adapter();
        assert_eq!(a.kind(), "configmap");
        assert!(a.scheduling().is_none());
        assert!(!a.is_expected_type(&ObjectHandle::new(ReplicaSet::default())));
    }

    #[test]
    fn data_changes_break_equivalence() {
        let a = adapter();
        let h1 = a.new_test_object("ns");
        let mut h2 = a.copy(&h1);
        assert!(a.equivalent(&h1, &h2));
        if let Some(cm) = h2.downcast_mut::<ConfigMap>() {
            cm.data.get_or_insert_with(BTreeMap::new).insert("B".into(), "b".into());
        }
        assert!(!a.equivalent(&h1, &h2));
        assert_eq!(OPS.downcast(&h1).data.as_ref().map(BTreeMap::len), Some(1));

        let mut h3 = a.copy(&h1);
        if let Some(cm) = h3.downcast_mut::<ConfigMap>() {
            cm.immutable = Some(true);
        }
        assert!(!a.equivalent(&h3, &h1));
    }

    #[test]
    fn empty_labels_match_absent_labels() {
        let a = adapter();
        let h1 = a.new_test_object("ns");
        let mut h2 = a.copy(&h1);
        a.object_meta_mut(&mut h2).labels = Some(BTreeMap::new());
        assert!(a.equivalent(&h1, &h2));
    }

    #[tokio::test]
    async fn update_then_watch_sees_modification() {
        use futures::StreamExt;
        use kube::api::WatchEvent;

        let a = adapter();
        let created = a.fed_create(&a.new_test_object("ns")).await.expect("create");
        let listed = a.fed_list("ns", &ListParams::default()).await.expect("list");
        let rv = listed.resource_version.clone().unwrap_or_default();
        let mut events = a.fed_watch("ns", &WatchParams::default(), &rv).await.expect("watch");

        let mut next = a.copy(&created);
        a.object_meta_mut(&mut next).annotations = Some(BTreeMap::from([("k".to_string(), "v".to_string())]));
        let updated = a.fed_update(&next).await.expect("update");
        assert!(a.equivalent(&next, &updated));

        match events.next().await {
            Some(Ok(WatchEvent::Modified(obj))) => {
                assert!(a.is_expected_type(&obj));
                assert_eq!(a.namespaced_name(&obj), a.namespaced_name(&created));
            }
            other => panic!("expected Modified, got {other:?}"),
        }
    }
}
