//! fedtypes store: one client surface over the federation API server, member
//! clusters, and an in-memory API emulation used by tests and dry runs.
//!
//! Every call maps to exactly one store interaction. Errors are returned as the
//! backend produced them; there is no retry or translation at this layer.

#![forbid(unsafe_code)]

use std::fmt::Debug;

use anyhow::{Context, Result};
use futures::{stream::BoxStream, StreamExt};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams, WatchEvent, WatchParams},
    config::{Config, KubeConfigOptions},
    Client, Resource,
};
use metrics::counter;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

pub mod errors;
pub mod memory;

pub use errors::{is_already_exists, is_conflict, is_not_found};
pub use memory::MemoryStore;

/// Resource types the store can carry: namespaced, statically typed k8s objects.
pub trait StoreResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Serialize + DeserializeOwned + Debug + Send + Sync + 'static
{
}

impl<K> StoreResource for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Serialize + DeserializeOwned + Debug + Send + Sync + 'static
{
}

/// Long-lived event stream; dropping it ends the watch.
pub type WatchStream<K> = BoxStream<'static, kube::Result<WatchEvent<K>>>;

/// Items of a list call plus the list resourceVersion.
#[derive(Debug, Clone)]
pub struct Listing<K> {
    pub resource_version: Option<String>,
    pub items: Vec<K>,
}

/// Store operations, used for request accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Create,
    Get,
    List,
    Update,
    UpdateStatus,
    Delete,
    Watch,
}

impl StoreOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOp::Create => "create",
            StoreOp::Get => "get",
            StoreOp::List => "list",
            StoreOp::Update => "update",
            StoreOp::UpdateStatus => "update_status",
            StoreOp::Delete => "delete",
            StoreOp::Watch => "watch",
        }
    }
}

/// Client for one backing store (the federation API server or a member cluster).
/// Cheap to clone; clones share the underlying connection or memory state.
#[derive(Clone)]
pub enum StoreClient {
    Kube(Client),
    Memory(MemoryStore),
}

impl From<Client> for StoreClient {
    fn from(c: Client) -> Self { StoreClient::Kube(c) }
}

impl From<MemoryStore> for StoreClient {
    fn from(m: MemoryStore) -> Self { StoreClient::Memory(m) }
}

impl Debug for StoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreClient::Kube(_) => f.write_str("StoreClient::Kube"),
            StoreClient::Memory(m) => write!(f, "StoreClient::Memory({} objects)", m.len()),
        }
    }
}

/// Build a kube-backed client from the kubeconfig, optionally pinning a context.
pub async fn connect(context: Option<&str>) -> Result<StoreClient> {
    let client = match context {
        None => Client::try_default().await.context("creating kube client from default config")?,
        Some(ctx) => {
            let opts = KubeConfigOptions { context: Some(ctx.to_string()), ..Default::default() };
            let config = Config::from_kubeconfig(&opts)
                .await
                .with_context(|| format!("loading kubeconfig context {}", ctx))?;
            Client::try_from(config).with_context(|| format!("creating kube client for context {}", ctx))?
        }
    };
    info!(context = ?context, "store client connected");
    Ok(StoreClient::Kube(client))
}

fn api<K: StoreResource>(client: &Client, namespace: &str) -> Api<K> {
    if namespace.is_empty() {
        Api::all(client.clone())
    } else {
        Api::namespaced(client.clone(), namespace)
    }
}

fn object_name<K: Resource>(obj: &K) -> &str { obj.meta().name.as_deref().unwrap_or("") }

impl StoreClient {
    pub fn backend(&self) -> &'static str {
        match self {
            StoreClient::Kube(_) => "kube",
            StoreClient::Memory(_) => "memory",
        }
    }

    fn record<K: StoreResource>(&self, op: StoreOp, namespace: &str, name: &str) {
        counter!("fedtypes_store_requests_total", 1u64, "op" => op.as_str(), "backend" => self.backend());
        debug!(op = op.as_str(), backend = self.backend(), kind = %K::kind(&()), ns = %namespace, name = %name, "store request");
    }

    pub async fn create<K: StoreResource>(&self, namespace: &str, obj: &K) -> kube::Result<K> {
        self.record::<K>(StoreOp::Create, namespace, object_name(obj));
        match self {
            StoreClient::Kube(c) => api::<K>(c, namespace).create(&PostParams::default(), obj).await,
            StoreClient::Memory(m) => m.create(namespace, obj),
        }
    }

    pub async fn get<K: StoreResource>(&self, namespace: &str, name: &str) -> kube::Result<K> {
        self.record::<K>(StoreOp::Get, namespace, name);
        match self {
            StoreClient::Kube(c) => api::<K>(c, namespace).get(name).await,
            StoreClient::Memory(m) => m.get(namespace, name),
        }
    }

    /// List objects in `namespace`; an empty namespace lists across all namespaces.
    pub async fn list<K: StoreResource>(&self, namespace: &str, lp: &ListParams) -> kube::Result<Listing<K>> {
        self.record::<K>(StoreOp::List, namespace, "");
        match self {
            StoreClient::Kube(c) => {
                let list = api::<K>(c, namespace).list(lp).await?;
                Ok(Listing { resource_version: list.metadata.resource_version, items: list.items })
            }
            StoreClient::Memory(m) => m.list(namespace, lp),
        }
    }

    pub async fn replace<K: StoreResource>(&self, namespace: &str, obj: &K) -> kube::Result<K> {
        let name = object_name(obj);
        self.record::<K>(StoreOp::Update, namespace, name);
        match self {
            StoreClient::Kube(c) => api::<K>(c, namespace).replace(name, &PostParams::default(), obj).await,
            StoreClient::Memory(m) => m.replace(namespace, obj),
        }
    }

    /// Write the status subresource of `obj`; spec and metadata are left as stored.
    pub async fn replace_status<K: StoreResource>(&self, namespace: &str, obj: &K) -> kube::Result<K> {
        let name = object_name(obj);
        self.record::<K>(StoreOp::UpdateStatus, namespace, name);
        match self {
            StoreClient::Kube(c) => {
                let data = serde_json::to_vec(obj).map_err(kube::Error::SerdeError)?;
                api::<K>(c, namespace).replace_status(name, &PostParams::default(), data).await
            }
            StoreClient::Memory(m) => m.replace_status(namespace, obj),
        }
    }

    pub async fn delete<K: StoreResource>(&self, namespace: &str, name: &str, dp: &DeleteParams) -> kube::Result<()> {
        self.record::<K>(StoreOp::Delete, namespace, name);
        match self {
            StoreClient::Kube(c) => api::<K>(c, namespace).delete(name, dp).await.map(|_| ()),
            StoreClient::Memory(m) => m.delete::<K>(namespace, name),
        }
    }

    pub async fn watch<K: StoreResource>(&self, namespace: &str, wp: &WatchParams, version: &str) -> kube::Result<WatchStream<K>> {
        self.record::<K>(StoreOp::Watch, namespace, "");
        match self {
            StoreClient::Kube(c) => Ok(api::<K>(c, namespace).watch(wp, version).await?.boxed()),
            StoreClient::Memory(m) => Ok(m.watch::<K>(namespace)),
        }
    }
}
