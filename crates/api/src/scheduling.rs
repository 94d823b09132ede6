//! Replica-scheduling specialization layered on top of a kind adapter.
//!
//! A kind whose replicas are spread across clusters by an external scheduler
//! embeds a [`SchedulingBase`] and implements [`SchedulingAdapter`]. The engine
//! then uses `equivalent_ignoring_schedule` for its needs-update decision and
//! feeds aggregated cluster status through `update_status`.

use std::sync::Arc;

use async_trait::async_trait;
use fedtypes_core::{ObjectHandle, ObjectMeta, SchedulingStatus};

/// Writes an aggregated status onto a federated object.
///
/// Implementations compare the stored counters with `status` and issue at most
/// one status write, only when they differ. On success `obj` is replaced by
/// the object the store returned; on error `obj` is left untouched and the
/// store error is returned as-is.
#[async_trait]
pub trait StatusUpdater: Send + Sync {
    async fn update_status(&self, obj: &mut ObjectHandle, status: SchedulingStatus) -> kube::Result<()>;
}

#[async_trait]
pub trait SchedulingAdapter: Send + Sync {
    /// Annotation key carrying the scheduler's preferences for this kind.
    fn preferences_annotation_name(&self) -> &'static str;

    /// Reconcile an aggregated status onto `obj`. See [`StatusUpdater`].
    async fn update_status(&self, obj: &mut ObjectHandle, status: SchedulingStatus) -> kube::Result<()>;

    /// Equivalence with the scheduler-owned fields of `b` taken from `a`.
    fn equivalent_ignoring_schedule(&self, a: &ObjectHandle, b: &ObjectHandle) -> bool;

    /// Whether `meta` carries scheduling preferences. The value is never parsed here.
    fn has_preferences(&self, meta: &ObjectMeta) -> bool {
        meta.annotations
            .as_ref()
            .map(|a| a.contains_key(self.preferences_annotation_name()))
            .unwrap_or(false)
    }
}

/// State every scheduling-aware adapter embeds: the preference annotation key
/// and the status write capability bound to the federation client.
#[derive(Clone)]
pub struct SchedulingBase {
    preferences_annotation_name: &'static str,
    status_updater: Arc<dyn StatusUpdater>,
}

impl SchedulingBase {
    pub fn new(preferences_annotation_name: &'static str, status_updater: Arc<dyn StatusUpdater>) -> Self {
        Self { preferences_annotation_name, status_updater }
    }

    pub fn preferences_annotation_name(&self) -> &'static str { self.preferences_annotation_name }

    pub async fn update_status(&self, obj: &mut ObjectHandle, status: SchedulingStatus) -> kube::Result<()> {
        self.status_updater.update_status(obj, status).await
    }
}

impl std::fmt::Debug for SchedulingBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulingBase")
            .field("preferences_annotation_name", &self.preferences_annotation_name)
            .finish_non_exhaustive()
    }
}
