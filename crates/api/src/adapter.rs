//! The resource-kind adapter contract the sync engine drives.

use async_trait::async_trait;
use fedtypes_core::{HandleList, NamespacedName, ObjectHandle, ObjectMeta};
use fedtypes_store::StoreClient;
use futures::stream::BoxStream;
use kube::api::{DeleteParams, ListParams, WatchEvent, WatchParams};

use crate::scheduling::SchedulingAdapter;

/// Watch stream over type-erased objects. The caller owns it; dropping it ends the watch.
pub type HandleWatch = BoxStream<'static, kube::Result<WatchEvent<ObjectHandle>>>;

/// Uniform access to one resource kind's federation-wide and per-cluster objects.
///
/// Handles obtained from an untyped source (watch events, lists of mixed
/// origin) must pass [`is_expected_type`](Self::is_expected_type) before any
/// other method sees them. Accessors, `copy` and `equivalent` panic on a
/// handle of another kind: that is a caller bug, not a runtime condition.
///
/// Store-backed methods issue exactly one request each and return the store's
/// error unchanged. Retry, backoff and not-found interpretation belong to the
/// engine.
#[async_trait]
pub trait FederatedTypeAdapter: Send + Sync {
    /// Registry key; never empty.
    fn kind(&self) -> &'static str;

    /// Empty instance of the kind's concrete shape.
    fn object_type(&self) -> ObjectHandle;

    fn is_expected_type(&self, obj: &ObjectHandle) -> bool;

    /// Federation-relevant metadata plus the full spec. Shares no storage with `obj`.
    fn copy(&self, obj: &ObjectHandle) -> ObjectHandle;

    /// Metadata and spec are equal for reconciliation purposes.
    fn equivalent(&self, a: &ObjectHandle, b: &ObjectHandle) -> bool;

    fn namespaced_name(&self, obj: &ObjectHandle) -> NamespacedName;

    fn object_meta<'a>(&self, obj: &'a ObjectHandle) -> &'a ObjectMeta;

    fn object_meta_mut<'a>(&self, obj: &'a mut ObjectHandle) -> &'a mut ObjectMeta;

    async fn fed_create(&self, obj: &ObjectHandle) -> kube::Result<ObjectHandle>;
    async fn fed_delete(&self, name: &NamespacedName, dp: &DeleteParams) -> kube::Result<()>;
    async fn fed_get(&self, name: &NamespacedName) -> kube::Result<ObjectHandle>;
    async fn fed_list(&self, namespace: &str, lp: &ListParams) -> kube::Result<HandleList>;
    async fn fed_update(&self, obj: &ObjectHandle) -> kube::Result<ObjectHandle>;
    async fn fed_watch(&self, namespace: &str, wp: &WatchParams, version: &str) -> kube::Result<HandleWatch>;

    async fn cluster_create(&self, client: &StoreClient, obj: &ObjectHandle) -> kube::Result<ObjectHandle>;
    async fn cluster_delete(&self, client: &StoreClient, name: &NamespacedName, dp: &DeleteParams) -> kube::Result<()>;
    async fn cluster_get(&self, client: &StoreClient, name: &NamespacedName) -> kube::Result<ObjectHandle>;
    async fn cluster_list(&self, client: &StoreClient, namespace: &str, lp: &ListParams) -> kube::Result<HandleList>;
    async fn cluster_update(&self, client: &StoreClient, obj: &ObjectHandle) -> kube::Result<ObjectHandle>;
    async fn cluster_watch(&self, client: &StoreClient, namespace: &str, wp: &WatchParams, version: &str) -> kube::Result<HandleWatch>;

    /// Minimal valid instance for conformance runs; `fed_create` on it succeeds
    /// against a conformant store.
    fn new_test_object(&self, namespace: &str) -> ObjectHandle;

    /// Scheduling-aware view, for kinds whose replicas are distributed by a scheduler.
    fn scheduling(&self) -> Option<&dyn SchedulingAdapter> { None }
}
