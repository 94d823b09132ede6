//! Metadata copy and equivalence helpers shared by all kind adapters.
//!
//! Only fields that federation propagates are considered: name, namespace,
//! labels and annotations. Cluster-local bookkeeping (uid, resourceVersion,
//! generation, timestamps, managed fields) is never copied or compared.

use std::collections::BTreeMap;

use crate::ObjectMeta;

/// Copy the federation-relevant part of `meta` into a fresh value.
pub fn deep_copy_relevant_object_meta(meta: &ObjectMeta) -> ObjectMeta {
    ObjectMeta {
        name: meta.name.clone(),
        namespace: meta.namespace.clone(),
        labels: meta.labels.clone(),
        annotations: meta.annotations.clone(),
        ..Default::default()
    }
}

/// Name, namespace, labels and annotations match. Absent and empty maps are equal.
pub fn object_meta_equivalent(a: &ObjectMeta, b: &ObjectMeta) -> bool {
    a.name.as_deref().unwrap_or("") == b.name.as_deref().unwrap_or("")
        && a.namespace.as_deref().unwrap_or("") == b.namespace.as_deref().unwrap_or("")
        && maps_equivalent(&a.labels, &b.labels)
        && maps_equivalent(&a.annotations, &b.annotations)
}

/// Metadata per [`object_meta_equivalent`] and specs structurally equal.
pub fn object_meta_and_spec_equivalent<S>(meta_a: &ObjectMeta, spec_a: &S, meta_b: &ObjectMeta, spec_b: &S) -> bool
where
    S: PartialEq + ?Sized,
{
    object_meta_equivalent(meta_a, meta_b) && spec_a == spec_b
}

fn maps_equivalent(a: &Option<BTreeMap<String, String>>, b: &Option<BTreeMap<String, String>>) -> bool {
    let a = a.as_ref().filter(|m| !m.is_empty());
    let b = b.as_ref().filter(|m| !m.is_empty());
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ObjectMeta {
        ObjectMeta {
            name: Some("web".into()),
            namespace: Some("prod".into()),
            labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
            annotations: Some(BTreeMap::from([("a".to_string(), "1".to_string())])),
            uid: Some("1234".into()),
            resource_version: Some("42".into()),
            generation: Some(7),
            ..Default::default()
        }
    }

    #[test]
    fn copy_drops_cluster_local_fields() {
        let c = deep_copy_relevant_object_meta(&meta());
        assert_eq!(c.name.as_deref(), Some("web"));
        assert_eq!(c.namespace.as_deref(), Some("prod"));
        assert!(c.labels.is_some() && c.annotations.is_some());
        assert!(c.uid.is_none());
        assert!(c.resource_version.is_none());
        assert!(c.generation.is_none());
    }

    #[test]
    fn bookkeeping_is_ignored_by_equivalence() {
        let a = meta();
        let mut b = meta();
        b.uid = Some("other".into());
        b.resource_version = Some("99".into());
        b.generation = None;
        assert!(object_meta_equivalent(&a, &b));
    }

    #[test]
    fn empty_and_absent_maps_are_equal() {
        let mut a = meta();
        let mut b = meta();
        a.labels = None;
        b.labels = Some(BTreeMap::new());
        assert!(object_meta_equivalent(&a, &b));
        b.labels = Some(BTreeMap::from([("x".to_string(), "y".to_string())]));
        assert!(!object_meta_equivalent(&a, &b));
    }

    #[test]
    fn name_and_annotations_matter() {
        let a = meta();
        let mut b = meta();
        b.name = Some("api".into());
        assert!(!object_meta_equivalent(&a, &b));
        let mut c = meta();
        c.annotations = None;
        assert!(!object_meta_equivalent(&a, &c));
    }

    #[test]
    fn spec_difference_breaks_equivalence() {
        let m = meta();
        assert!(object_meta_and_spec_equivalent(&m, &Some(3), &m, &Some(3)));
        assert!(!object_meta_and_spec_equivalent(&m, &Some(3), &m, &Some(4)));
        assert!(!object_meta_and_spec_equivalent(&m, &Some(3), &m, &None));
    }
}
