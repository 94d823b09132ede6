//! Typed plumbing shared by the concrete kind adapters: downcasting handles
//! and forwarding CRUD/watch to a store for one `k8s_openapi` type.

use std::marker::PhantomData;

use fedtypes_core::{HandleList, NamespacedName, ObjectHandle, ObjectMeta};
use fedtypes_store::{StoreClient, StoreResource, WatchStream};
use futures::StreamExt;
use kube::api::{DeleteParams, ListParams, WatchEvent, WatchParams};

use crate::adapter::HandleWatch;

pub(crate) struct TypedOps<K> {
    kind: &'static str,
    _marker: PhantomData<fn() -> K>,
}

fn erase_event<K: StoreResource>(ev: WatchEvent<K>) -> WatchEvent<ObjectHandle> {
    match ev {
        WatchEvent::Added(o) => WatchEvent::Added(ObjectHandle::new(o)),
        WatchEvent::Modified(o) => WatchEvent::Modified(ObjectHandle::new(o)),
        WatchEvent::Deleted(o) => WatchEvent::Deleted(ObjectHandle::new(o)),
        WatchEvent::Bookmark(b) => WatchEvent::Bookmark(b),
        WatchEvent::Error(e) => WatchEvent::Error(e),
    }
}

fn erase_watch<K: StoreResource>(stream: WatchStream<K>) -> HandleWatch {
    stream.map(|item| item.map(erase_event)).boxed()
}

fn erase_list<K: StoreResource>(listing: fedtypes_store::Listing<K>) -> HandleList {
    HandleList {
        resource_version: listing.resource_version,
        items: listing.items.into_iter().map(ObjectHandle::new).collect(),
    }
}

impl<K: StoreResource> TypedOps<K> {
    pub(crate) const fn new(kind: &'static str) -> Self { Self { kind, _marker: PhantomData } }

    pub(crate) fn is(&self, obj: &ObjectHandle) -> bool { obj.is::<K>() }

    /// Panics when `obj` holds another kind; callers guard with `is`.
    pub(crate) fn downcast<'a>(&self, obj: &'a ObjectHandle) -> &'a K {
        match obj.downcast_ref::<K>() {
            Some(o) => o,
            None => panic!("{} adapter handed a {} object; guard with is_expected_type", self.kind, obj.type_name()),
        }
    }

    pub(crate) fn downcast_mut<'a>(&self, obj: &'a mut ObjectHandle) -> &'a mut K {
        let found = obj.type_name();
        match obj.downcast_mut::<K>() {
            Some(o) => o,
            None => panic!("{} adapter handed a {} object; guard with is_expected_type", self.kind, found),
        }
    }

    pub(crate) fn meta<'a>(&self, obj: &'a ObjectHandle) -> &'a ObjectMeta { self.downcast(obj).meta() }

    pub(crate) fn meta_mut<'a>(&self, obj: &'a mut ObjectHandle) -> &'a mut ObjectMeta { self.downcast_mut(obj).meta_mut() }

    pub(crate) fn namespaced_name(&self, obj: &ObjectHandle) -> NamespacedName {
        let meta = self.meta(obj);
        NamespacedName::new(meta.namespace.as_deref().unwrap_or(""), meta.name.as_deref().unwrap_or(""))
    }

    fn namespace_of<'a>(&self, obj: &'a ObjectHandle) -> &'a str { self.meta(obj).namespace.as_deref().unwrap_or("") }

    pub(crate) async fn create(&self, client: &StoreClient, obj: &ObjectHandle) -> kube::Result<ObjectHandle> {
        let typed = self.downcast(obj);
        client.create(self.namespace_of(obj), typed).await.map(ObjectHandle::new)
    }

    pub(crate) async fn get(&self, client: &StoreClient, name: &NamespacedName) -> kube::Result<ObjectHandle> {
        client.get::<K>(name.namespace(), name.name()).await.map(ObjectHandle::new)
    }

    pub(crate) async fn list(&self, client: &StoreClient, namespace: &str, lp: &ListParams) -> kube::Result<HandleList> {
        client.list::<K>(namespace, lp).await.map(erase_list)
    }

    pub(crate) async fn update(&self, client: &StoreClient, obj: &ObjectHandle) -> kube::Result<ObjectHandle> {
        let typed = self.downcast(obj);
        client.replace(self.namespace_of(obj), typed).await.map(ObjectHandle::new)
    }

    pub(crate) async fn delete(&self, client: &StoreClient, name: &NamespacedName, dp: &DeleteParams) -> kube::Result<()> {
        client.delete::<K>(name.namespace(), name.name(), dp).await
    }

    pub(crate) async fn watch(&self, client: &StoreClient, namespace: &str, wp: &WatchParams, version: &str) -> kube::Result<HandleWatch> {
        client.watch::<K>(namespace, wp, version).await.map(erase_watch)
    }
}
