//! fedtypes core types: object handles, identity and scheduling status.

#![forbid(unsafe_code)]

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod meta;

pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Identifies one logical federated object. Join key between the
/// federation-wide object and its per-cluster copies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    namespace: String,
    name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    pub fn namespace(&self) -> &str { &self.namespace }
    pub fn name(&self) -> &str { &self.name }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Aggregate replica counters observed across member clusters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingStatus {
    pub replicas: i32,
    pub fully_labeled_replicas: i32,
    pub ready_replicas: i32,
    pub available_replicas: i32,
}

impl SchedulingStatus {
    pub fn new(replicas: i32, fully_labeled_replicas: i32, ready_replicas: i32, available_replicas: i32) -> Self {
        Self { replicas, fully_labeled_replicas, ready_replicas, available_replicas }
    }
}

/// Object-safe view of a concrete resource value held inside an [`ObjectHandle`].
pub trait Object: Any + Send + Sync + fmt::Debug {
    fn clone_boxed(&self) -> Box<dyn Object>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn type_name(&self) -> &'static str;
}

impl<T> Object for T
where
    T: Any + Send + Sync + fmt::Debug + Clone,
{
    fn clone_boxed(&self) -> Box<dyn Object> { Box::new(self.clone()) }
    fn as_any(&self) -> &dyn Any { self }
    fn as_any_mut(&mut self) -> &mut dyn Any { self }
    fn into_any(self: Box<Self>) -> Box<dyn Any> { self }
    fn type_name(&self) -> &'static str { std::any::type_name::<T>() }
}

/// Type-erased resource instance (metadata + spec + status) of some kind.
///
/// Only the adapter for that kind downcasts it. Cloning deep-clones the
/// inner value, so two handles never share mutable storage.
pub struct ObjectHandle {
    inner: Box<dyn Object>,
}

impl ObjectHandle {
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync + fmt::Debug + Clone,
    {
        Self { inner: Box::new(value) }
    }

    pub fn is<T: Any>(&self) -> bool { (*self.inner).as_any().is::<T>() }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> { (*self.inner).as_any().downcast_ref::<T>() }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> { (*self.inner).as_any_mut().downcast_mut::<T>() }

    /// Consume the handle, yielding the concrete value when the kind matches.
    pub fn into_inner<T: Any>(self) -> Option<T> {
        self.inner.into_any().downcast::<T>().ok().map(|b| *b)
    }

    /// Rust type name of the held value, for diagnostics.
    pub fn type_name(&self) -> &'static str { (*self.inner).type_name() }
}

impl Clone for ObjectHandle {
    fn clone(&self) -> Self { Self { inner: (*self.inner).clone_boxed() } }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Debug::fmt(&*self.inner, f) }
}

/// Result of a list call: items plus the list resourceVersion to watch from.
#[derive(Debug, Clone, Default)]
pub struct HandleList {
    pub resource_version: Option<String>,
    pub items: Vec<ObjectHandle>,
}

pub mod prelude {
    pub use super::{HandleList, NamespacedName, ObjectHandle, ObjectMeta, SchedulingStatus};
    pub use super::meta::{deep_copy_relevant_object_meta, object_meta_and_spec_equivalent, object_meta_equivalent};
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;

    fn cm(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta { name: Some(name.into()), namespace: Some("ns".into()), ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn handle_downcasts_only_to_held_type() {
        let h = ObjectHandle::new(cm("a"));
        assert!(h.is::<ConfigMap>());
        assert!(!h.is::<String>());
        assert_eq!(h.downcast_ref::<ConfigMap>().and_then(|c| c.metadata.name.as_deref()), Some("a"));
        assert!(h.downcast_ref::<u32>().is_none());
        assert!(h.type_name().ends_with("ConfigMap"));
    }

    #[test]
    fn cloned_handle_is_independent() {
        let h = ObjectHandle::new(cm("a"));
        let mut c = h.clone();
        c.downcast_mut::<ConfigMap>().expect("configmap").metadata.name = Some("b".into());
        assert_eq!(h.downcast_ref::<ConfigMap>().and_then(|c| c.metadata.name.clone()).as_deref(), Some("a"));
        assert_eq!(c.into_inner::<ConfigMap>().and_then(|c| c.metadata.name).as_deref(), Some("b"));
    }

    #[test]
    fn into_inner_wrong_type_is_none() {
        assert!(ObjectHandle::new(cm("a")).into_inner::<String>().is_none());
    }

    #[test]
    fn namespaced_name_display_and_serde() {
        let nn = NamespacedName::new("ns", "web");
        assert_eq!(nn.to_string(), "ns/web");
        assert_eq!(serde_json::to_value(&nn).expect("json"), serde_json::json!({"namespace": "ns", "name": "web"}));
    }

    #[test]
    fn scheduling_status_serializes_camel_case() {
        let s = SchedulingStatus::new(3, 3, 2, 1);
        let v = serde_json::to_value(s).expect("json");
        assert_eq!(v["fullyLabeledReplicas"], 3);
        assert_eq!(v["availableReplicas"], 1);
        assert_eq!(SchedulingStatus::default(), SchedulingStatus::new(0, 0, 0, 0));
    }
}
