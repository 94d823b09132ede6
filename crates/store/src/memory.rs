//! In-memory API server emulation.
//!
//! Objects are kept as JSON keyed by (resource, namespace, name) so any
//! `StoreResource` can be stored. Semantics follow the API server where the
//! adapters depend on them: generateName, uid/resourceVersion assignment,
//! optimistic concurrency on resourceVersion, status subresource isolation,
//! and ADDED/MODIFIED/DELETED watch events.

use std::sync::{Arc, PoisonError, RwLock};

use futures::stream;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{ListParams, WatchEvent};
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::{errors, Listing, StoreOp, StoreResource, WatchStream};

const DEFAULT_WATCH_CAP: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    resource: String,
    namespace: String,
    name: String,
}

#[derive(Debug, Clone, Copy)]
enum EventType {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
struct StoredEvent {
    resource: String,
    namespace: String,
    kind: EventType,
    object: Json,
}

#[derive(Default)]
struct State {
    objects: FxHashMap<Key, Json>,
    resource_version: u64,
    requests: FxHashMap<StoreOp, u64>,
}

/// Shared in-memory store. Clones observe the same objects.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    events: broadcast::Sender<StoredEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self { Self::with_watch_capacity(DEFAULT_WATCH_CAP) }
}

/// `resource.group` as the API server prints it in error messages.
fn resource_of<K: StoreResource>() -> String {
    let group = K::group(&());
    if group.is_empty() {
        K::plural(&()).to_string()
    } else {
        format!("{}.{}", K::plural(&()), group)
    }
}

fn key_of<K: StoreResource>(namespace: &str, name: &str) -> Key {
    Key { resource: resource_of::<K>(), namespace: namespace.to_string(), name: name.to_string() }
}

fn to_json<K: StoreResource>(obj: &K) -> kube::Result<Json> { serde_json::to_value(obj).map_err(kube::Error::SerdeError) }

fn from_json<K: StoreResource>(v: Json) -> kube::Result<K> { serde_json::from_value(v).map_err(kube::Error::SerdeError) }

fn stored_rv(v: &Json) -> Option<&str> {
    v.get("metadata").and_then(|m| m.get("resourceVersion")).and_then(|r| r.as_str())
}

/// Everything but metadata and status; a change here bumps generation.
fn desired_state(v: &Json) -> Json {
    let mut out = v.clone();
    if let Some(obj) = out.as_object_mut() {
        obj.remove("metadata");
        obj.remove("status");
    }
    out
}

fn random_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string().chars().take(5).collect()
}

/// Equality-based label selector (`a=b,c==d,e`); other operators never match.
fn selector_matches(selector: Option<&str>, labels: Option<&std::collections::BTreeMap<String, String>>) -> bool {
    let Some(selector) = selector.filter(|s| !s.trim().is_empty()) else { return true };
    selector.split(',').map(str::trim).all(|term| {
        let (k, v) = match term.split_once("==").or_else(|| term.split_once('=')) {
            Some((k, v)) => (k.trim(), Some(v.trim())),
            None => (term, None),
        };
        match (labels.and_then(|l| l.get(k)), v) {
            (Some(actual), Some(want)) => actual == want,
            (Some(_), None) => true,
            (None, _) => false,
        }
    })
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_watch_capacity(cap: usize) -> Self {
        let (events, _) = broadcast::channel(cap.max(1));
        Self { state: Arc::new(RwLock::new(State::default())), events }
    }

    /// Number of stored objects across all resources.
    pub fn len(&self) -> usize { self.read(|s| s.objects.len()) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// How many requests of `op` this store has served (successful or not).
    pub fn requests(&self, op: StoreOp) -> u64 { self.read(|s| s.requests.get(&op).copied().unwrap_or(0)) }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> T {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<T>(&self, op: StoreOp, f: impl FnOnce(&mut State) -> kube::Result<T>) -> kube::Result<T> {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *guard.requests.entry(op).or_insert(0) += 1;
        f(&mut guard)
    }

    /// Called with the state lock held so events leave in resourceVersion order.
    fn emit(&self, key: &Key, kind: EventType, object: Json) {
        // No receivers is fine; watches are optional.
        let _ = self.events.send(StoredEvent {
            resource: key.resource.clone(),
            namespace: key.namespace.clone(),
            kind,
            object,
        });
    }

    pub fn create<K: StoreResource>(&self, namespace: &str, obj: &K) -> kube::Result<K> {
        let resource = resource_of::<K>();
        let mut obj = obj.clone();
        let key = self.write(StoreOp::Create, |s| {
            let meta = obj.meta_mut();
            match meta.namespace.as_deref() {
                None => meta.namespace = Some(namespace.to_string()),
                Some(ns) if ns == namespace => {}
                Some(_) => {
                    return Err(errors::bad_request(
                        "the namespace of the provided object does not match the namespace sent on the request",
                    ))
                }
            }
            if meta.name.as_deref().unwrap_or("").is_empty() {
                match meta.generate_name.as_deref() {
                    Some(prefix) if !prefix.is_empty() => meta.name = Some(format!("{}{}", prefix, random_suffix())),
                    _ => return Err(errors::invalid(&resource, "metadata.name: Required value: name or generateName is required")),
                }
            }
            let name = meta.name.clone().unwrap_or_default();
            let key = Key { resource: resource.clone(), namespace: namespace.to_string(), name: name.clone() };
            if s.objects.contains_key(&key) {
                return Err(errors::already_exists(&resource, &name));
            }
            s.resource_version += 1;
            meta.resource_version = Some(s.resource_version.to_string());
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
            meta.creation_timestamp = Some(Time(chrono::Utc::now()));
            meta.generation = Some(1);
            let json = to_json(&obj)?;
            s.objects.insert(key.clone(), json.clone());
            self.emit(&key, EventType::Added, json);
            Ok(key)
        })?;
        debug!(resource = %key.resource, ns = %key.namespace, name = %key.name, "memory: created");
        Ok(obj)
    }

    pub fn get<K: StoreResource>(&self, namespace: &str, name: &str) -> kube::Result<K> {
        let key = key_of::<K>(namespace, name);
        let found = self.write(StoreOp::Get, |s| Ok(s.objects.get(&key).cloned()))?;
        match found {
            Some(v) => from_json(v),
            None => Err(errors::not_found(&key.resource, name)),
        }
    }

    pub fn list<K: StoreResource>(&self, namespace: &str, lp: &ListParams) -> kube::Result<Listing<K>> {
        let resource = resource_of::<K>();
        let (rv, mut items) = self.write(StoreOp::List, |s| {
            let items: Vec<(Key, Json)> = s
                .objects
                .iter()
                .filter(|(k, _)| k.resource == resource && (namespace.is_empty() || k.namespace == namespace))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Ok((s.resource_version, items))
        })?;
        items.sort_by(|(a, _), (b, _)| a.namespace.cmp(&b.namespace).then_with(|| a.name.cmp(&b.name)));
        let mut out = Vec::with_capacity(items.len());
        for (_, v) in items {
            let obj: K = from_json(v)?;
            if selector_matches(lp.label_selector.as_deref(), obj.meta().labels.as_ref()) {
                out.push(obj);
            }
        }
        Ok(Listing { resource_version: Some(rv.to_string()), items: out })
    }

    pub fn replace<K: StoreResource>(&self, namespace: &str, obj: &K) -> kube::Result<K> {
        let name = obj.meta().name.clone().unwrap_or_default();
        let key = key_of::<K>(namespace, &name);
        let incoming = to_json(obj)?;
        let json = self.write(StoreOp::Update, |s| {
            let stored = s.objects.get(&key).ok_or_else(|| errors::not_found(&key.resource, &name))?;
            check_version(obj, stored, &key)?;
            let mut next = incoming;
            // Status is owned by the status subresource.
            match stored.get("status") {
                Some(status) => next["status"] = status.clone(),
                None => {
                    if let Some(o) = next.as_object_mut() {
                        o.remove("status");
                    }
                }
            }
            let generation = stored["metadata"]["generation"].as_i64().unwrap_or(1);
            let bump = desired_state(stored) != desired_state(&next);
            s.resource_version += 1;
            next["metadata"]["uid"] = stored["metadata"]["uid"].clone();
            next["metadata"]["creationTimestamp"] = stored["metadata"]["creationTimestamp"].clone();
            next["metadata"]["namespace"] = Json::String(namespace.to_string());
            next["metadata"]["generation"] = Json::from(if bump { generation + 1 } else { generation });
            next["metadata"]["resourceVersion"] = Json::String(s.resource_version.to_string());
            s.objects.insert(key.clone(), next.clone());
            self.emit(&key, EventType::Modified, next.clone());
            Ok(next)
        })?;
        debug!(resource = %key.resource, ns = %key.namespace, name = %key.name, "memory: updated");
        from_json(json)
    }

    pub fn replace_status<K: StoreResource>(&self, namespace: &str, obj: &K) -> kube::Result<K> {
        let name = obj.meta().name.clone().unwrap_or_default();
        let key = key_of::<K>(namespace, &name);
        let incoming = to_json(obj)?;
        let json = self.write(StoreOp::UpdateStatus, |s| {
            let stored = s.objects.get(&key).ok_or_else(|| errors::not_found(&key.resource, &name))?;
            check_version(obj, stored, &key)?;
            let mut next = stored.clone();
            match incoming.get("status") {
                Some(status) => next["status"] = status.clone(),
                None => {
                    if let Some(o) = next.as_object_mut() {
                        o.remove("status");
                    }
                }
            }
            s.resource_version += 1;
            next["metadata"]["resourceVersion"] = Json::String(s.resource_version.to_string());
            s.objects.insert(key.clone(), next.clone());
            self.emit(&key, EventType::Modified, next.clone());
            Ok(next)
        })?;
        debug!(resource = %key.resource, ns = %key.namespace, name = %key.name, "memory: status updated");
        from_json(json)
    }

    pub fn delete<K: StoreResource>(&self, namespace: &str, name: &str) -> kube::Result<()> {
        let key = key_of::<K>(namespace, name);
        self.write(StoreOp::Delete, |s| {
            let removed = s.objects.remove(&key).ok_or_else(|| errors::not_found(&key.resource, name))?;
            self.emit(&key, EventType::Deleted, removed);
            Ok(())
        })?;
        debug!(resource = %key.resource, ns = %key.namespace, name = %key.name, "memory: deleted");
        Ok(())
    }

    /// Stream events for `K` in `namespace` (all namespaces when empty) from now on.
    /// A lagging receiver gets one 410 Expired error, as a real watch would.
    pub fn watch<K: StoreResource>(&self, namespace: &str) -> WatchStream<K> {
        let _ = self.write(StoreOp::Watch, |_| Ok(()));
        let rx = self.events.subscribe();
        let resource = resource_of::<K>();
        let namespace = namespace.to_string();
        let s = stream::unfold(Some(rx), move |rx| {
            let resource = resource.clone();
            let namespace = namespace.clone();
            async move {
                let mut rx = rx?;
                loop {
                    match rx.recv().await {
                        Ok(ev) => {
                            if ev.resource != resource || (!namespace.is_empty() && ev.namespace != namespace) {
                                continue;
                            }
                            let item = from_json::<K>(ev.object).map(|obj| match ev.kind {
                                EventType::Added => WatchEvent::Added(obj),
                                EventType::Modified => WatchEvent::Modified(obj),
                                EventType::Deleted => WatchEvent::Deleted(obj),
                            });
                            return Some((item, Some(rx)));
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, resource = %resource, "memory watch lagged");
                            return Some((Err(errors::expired("too old resource version")), None));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Box::pin(s)
    }
}

fn check_version<K: StoreResource>(obj: &K, stored: &Json, key: &Key) -> kube::Result<()> {
    match obj.meta().resource_version.as_deref() {
        Some(rv) if !rv.is_empty() && Some(rv) != stored_rv(stored) => Err(errors::conflict(&key.resource, &key.name)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetSpec, ReplicaSetStatus};
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn cm(name: &str, data: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta { name: Some(name.into()), ..Default::default() },
            data: Some(BTreeMap::from([("k".to_string(), data.to_string())])),
            ..Default::default()
        }
    }

    fn rs(name: &str, replicas: i32) -> ReplicaSet {
        ReplicaSet {
            metadata: ObjectMeta { name: Some(name.into()), ..Default::default() },
            spec: Some(ReplicaSetSpec { replicas: Some(replicas), ..Default::default() }),
            ..Default::default()
        }
    }

    #[test]
    fn create_assigns_bookkeeping_and_generates_names() {
        let store = MemoryStore::new();
        let mut obj = cm("", "v");
        obj.metadata.generate_name = Some("test-configmap-".into());
        let created = store.create("ns", &obj).expect("create");
        let name = created.metadata.name.clone().expect("name");
        assert!(name.starts_with("test-configmap-"));
        assert_eq!(name.len(), "test-configmap-".len() + 5);
        assert_eq!(created.metadata.namespace.as_deref(), Some("ns"));
        assert!(created.metadata.uid.is_some());
        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));
        let fetched: ConfigMap = store.get("ns", &name).expect("get");
        assert_eq!(fetched, created);
    }

    #[test]
    fn create_rejects_missing_name_and_duplicates() {
        let store = MemoryStore::new();
        let err = store.create("ns", &cm("", "v")).expect_err("no name");
        assert!(matches!(err, kube::Error::Api(ref ae) if ae.code == 422));
        store.create("ns", &cm("a", "v")).expect("create");
        let err = store.create("ns", &cm("a", "v")).expect_err("dup");
        assert!(errors::is_already_exists(&err));
        // same name in another namespace is a different object
        store.create("other", &cm("a", "v")).expect("create other ns");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn missing_objects_are_not_found() {
        let store = MemoryStore::new();
        assert!(errors::is_not_found(&store.get::<ConfigMap>("ns", "nope").expect_err("get")));
        assert!(errors::is_not_found(&store.replace("ns", &cm("nope", "v")).expect_err("update")));
        assert!(errors::is_not_found(&store.delete::<ConfigMap>("ns", "nope").expect_err("delete")));
    }

    #[test]
    fn stale_resource_version_conflicts() {
        let store = MemoryStore::new();
        let created = store.create("ns", &cm("a", "v1")).expect("create");
        let mut first = created.clone();
        first.data = Some(BTreeMap::from([("k".to_string(), "v2".to_string())]));
        store.replace("ns", &first).expect("update");
        let mut stale = created;
        stale.data = Some(BTreeMap::from([("k".to_string(), "v3".to_string())]));
        assert!(errors::is_conflict(&store.replace("ns", &stale).expect_err("stale")));
        // no resourceVersion means unconditional update
        stale.metadata.resource_version = None;
        let updated = store.replace("ns", &stale).expect("unconditional");
        assert_eq!(updated.data.and_then(|d| d.get("k").cloned()).as_deref(), Some("v3"));
    }

    #[test]
    fn update_and_status_are_isolated() {
        let store = MemoryStore::new();
        let created = store.create("ns", &rs("web", 2)).expect("create");
        assert_eq!(created.metadata.generation, Some(1));

        let mut with_status = created.clone();
        with_status.status = Some(ReplicaSetStatus { replicas: 2, ready_replicas: Some(1), ..Default::default() });
        with_status.spec = Some(ReplicaSetSpec { replicas: Some(9), ..Default::default() });
        let after_status = store.replace_status("ns", &with_status).expect("status");
        assert_eq!(after_status.status.as_ref().map(|s| s.replicas), Some(2));
        assert_eq!(after_status.spec.as_ref().and_then(|s| s.replicas), Some(2), "status write must not touch spec");

        let mut spec_change = after_status.clone();
        spec_change.status = None;
        spec_change.spec = Some(ReplicaSetSpec { replicas: Some(5), ..Default::default() });
        let after_update = store.replace("ns", &spec_change).expect("update");
        assert_eq!(after_update.spec.as_ref().and_then(|s| s.replicas), Some(5));
        assert_eq!(after_update.status.as_ref().map(|s| s.replicas), Some(2), "update must keep stored status");
        assert_eq!(after_update.metadata.generation, Some(2));
        assert_eq!(after_update.metadata.uid, created.metadata.uid);
        assert_eq!(store.requests(StoreOp::UpdateStatus), 1);
        assert_eq!(store.requests(StoreOp::Update), 1);
    }

    #[test]
    fn list_filters_by_namespace_and_labels() {
        let store = MemoryStore::new();
        let mut a = cm("a", "v");
        a.metadata.labels = Some(BTreeMap::from([("app".to_string(), "web".to_string())]));
        store.create("ns1", &a).expect("a");
        store.create("ns1", &cm("b", "v")).expect("b");
        store.create("ns2", &cm("c", "v")).expect("c");
        store.create("ns1", &rs("web", 1)).expect("rs");

        let ns1: Listing<ConfigMap> = store.list("ns1", &ListParams::default()).expect("list");
        let names: Vec<_> = ns1.items.iter().filter_map(|o| o.metadata.name.clone()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(ns1.resource_version.as_deref(), Some("4"));

        let all: Listing<ConfigMap> = store.list("", &ListParams::default()).expect("list all");
        assert_eq!(all.items.len(), 3);

        let labelled: Listing<ConfigMap> = store.list("", &ListParams::default().labels("app=web")).expect("labels");
        assert_eq!(labelled.items.len(), 1);
    }

    #[test]
    fn selector_terms() {
        let labels = BTreeMap::from([("app".to_string(), "web".to_string()), ("tier".to_string(), "fe".to_string())]);
        assert!(selector_matches(None, None));
        assert!(selector_matches(Some("app=web,tier==fe"), Some(&labels)));
        assert!(selector_matches(Some("tier"), Some(&labels)));
        assert!(!selector_matches(Some("app=api"), Some(&labels)));
        assert!(!selector_matches(Some("app"), None));
    }

    #[tokio::test]
    async fn watch_streams_matching_events() {
        let store = MemoryStore::new();
        let mut events = store.watch::<ConfigMap>("ns");
        store.create("other", &cm("ignored", "v")).expect("other ns");
        store.create("ns", &rs("ignored", 1)).expect("other kind");
        let created = store.create("ns", &cm("a", "v")).expect("create");
        store.replace("ns", &created).expect("update");
        store.delete::<ConfigMap>("ns", "a").expect("delete");

        let mut seen = Vec::new();
        for _ in 0..3 {
            let ev = tokio::time::timeout(std::time::Duration::from_secs(1), events.next())
                .await
                .expect("event in time")
                .expect("stream open")
                .expect("event ok");
            seen.push(match ev {
                WatchEvent::Added(o) => format!("added {}", o.metadata.name.unwrap_or_default()),
                WatchEvent::Modified(o) => format!("modified {}", o.metadata.name.unwrap_or_default()),
                WatchEvent::Deleted(o) => format!("deleted {}", o.metadata.name.unwrap_or_default()),
                other => format!("{other:?}"),
            });
        }
        assert_eq!(seen, vec!["added a", "modified a", "deleted a"]);
    }

    #[tokio::test]
    async fn concurrent_writers_deliver_events_in_version_order() {
        let store = MemoryStore::new();
        let mut events = store.watch::<ConfigMap>("ns");
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        store.create("ns", &cm(&format!("w{w}-{i}"), "v")).expect("create");
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().expect("writer");
        }

        let mut last = 0u64;
        for _ in 0..100 {
            let ev = tokio::time::timeout(std::time::Duration::from_secs(1), events.next())
                .await
                .expect("event in time")
                .expect("stream open")
                .expect("event ok");
            let WatchEvent::Added(o) = ev else { panic!("expected Added") };
            let rv: u64 = o.metadata.resource_version.as_deref().unwrap_or("0").parse().expect("numeric rv");
            assert!(rv > last, "rv {rv} delivered after {last}");
            last = rv;
        }
    }

    #[tokio::test]
    async fn lagging_watch_expires() {
        let store = MemoryStore::with_watch_capacity(1);
        let mut events = store.watch::<ConfigMap>("ns");
        for i in 0..4 {
            store.create("ns", &cm(&format!("c{i}"), "v")).expect("create");
        }
        let first = events.next().await.expect("item");
        let err = first.expect_err("lagged");
        assert!(matches!(err, kube::Error::Api(ref ae) if ae.code == 410));
        assert!(events.next().await.is_none());
    }
}
