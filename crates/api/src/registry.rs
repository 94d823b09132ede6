//! Kind registry: which resource kinds the engine reconciles and how to build
//! their adapters. Populated by explicit calls during startup, read-only after.

use std::collections::BTreeMap;
use std::sync::Arc;

use fedtypes_store::StoreClient;
use kube::core::GroupVersionResource;
use tracing::{debug, info};

use crate::adapter::FederatedTypeAdapter;

/// Builds the single adapter instance for a kind, bound to the federation client.
pub type AdapterFactory = fn(StoreClient) -> Arc<dyn FederatedTypeAdapter>;

#[derive(Debug, Clone)]
pub struct FederatedTypeDescriptor {
    pub kind: &'static str,
    pub controller_name: &'static str,
    pub resource_locations: Vec<GroupVersionResource>,
    pub constructor: AdapterFactory,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("federated type {0:?} is already registered")]
    AlreadyRegistered(String),
    #[error("federated type {0:?} is not registered")]
    NotFound(String),
    #[error("federated type kind must not be empty")]
    EmptyKind,
}

#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: BTreeMap<&'static str, FederatedTypeDescriptor>,
}

impl KindRegistry {
    pub fn new() -> Self { Self::default() }

    /// Registry holding every kind this crate ships, registered in a fixed order.
    pub fn builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        crate::replicaset::register(&mut registry)?;
        crate::configmap::register(&mut registry)?;
        info!(kinds = registry.len(), "federated types registered");
        Ok(registry)
    }

    pub fn register(
        &mut self,
        kind: &'static str,
        controller_name: &'static str,
        resource_locations: Vec<GroupVersionResource>,
        constructor: AdapterFactory,
    ) -> Result<(), RegistryError> {
        if kind.is_empty() {
            return Err(RegistryError::EmptyKind);
        }
        if self.kinds.contains_key(kind) {
            return Err(RegistryError::AlreadyRegistered(kind.to_string()));
        }
        debug!(kind, controller = controller_name, locations = resource_locations.len(), "register federated type");
        self.kinds.insert(kind, FederatedTypeDescriptor { kind, controller_name, resource_locations, constructor });
        Ok(())
    }

    pub fn lookup(&self, kind: &str) -> Result<&FederatedTypeDescriptor, RegistryError> {
        self.kinds.get(kind).ok_or_else(|| RegistryError::NotFound(kind.to_string()))
    }

    /// All descriptors, ordered by kind.
    pub fn all(&self) -> impl Iterator<Item = &FederatedTypeDescriptor> + '_ { self.kinds.values() }

    pub fn len(&self) -> usize { self.kinds.len() }

    pub fn is_empty(&self) -> bool { self.kinds.is_empty() }

    pub fn instantiate(&self, kind: &str, client: StoreClient) -> Result<Arc<dyn FederatedTypeAdapter>, RegistryError> {
        Ok((self.lookup(kind)?.constructor)(client))
    }

    /// One adapter per registered kind, all bound to `client`.
    pub fn instantiate_all(&self, client: &StoreClient) -> Vec<Arc<dyn FederatedTypeAdapter>> {
        self.all().map(|d| (d.constructor)(client.clone())).collect()
    }
}
