//! Fedtypes API: the adapter contract a federation sync engine drives for each
//! resource kind, the replica-scheduling specialization, and the kind registry.
//!
//! Adapters are built once per kind at startup from [`KindRegistry`] and then
//! shared read-only across reconciliation workers.

#![forbid(unsafe_code)]

pub mod adapter;
pub mod configmap;
pub mod crudtester;
pub mod registry;
pub mod replicaset;
pub mod scheduling;
pub mod settings;
mod typed;

pub use adapter::{FederatedTypeAdapter, HandleWatch};
pub use configmap::{ConfigMapAdapter, CONFIG_MAP_KIND};
pub use crudtester::{CrudReport, CrudTester, StepTiming};
pub use fedtypes_core::{HandleList, NamespacedName, ObjectHandle, SchedulingStatus};
pub use registry::{AdapterFactory, FederatedTypeDescriptor, KindRegistry, RegistryError};
pub use replicaset::{ReplicaSetAdapter, ReplicaSetStatusUpdater, FED_REPLICA_SET_PREFERENCES_ANNOTATION, REPLICA_SET_KIND};
pub use scheduling::{SchedulingAdapter, SchedulingBase, StatusUpdater};
pub use settings::Settings;
