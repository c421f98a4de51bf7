//! Startup reconciliation of the persisted action set against the catalog.
//!
//! The catalog compiled into the binary is the source of truth. At startup
//! the reconciler inserts every catalog action missing from the store and
//! retires every stored action the catalog no longer names. The store grants
//! each new action to every superuser role in the same atomic write, so a
//! superuser never observes an action it does not hold.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use super::catalog::ActionCatalog;
use super::models::ActionId;
use super::store::RbacStore;
use crate::error::{GatehouseError, Result};
use crate::telemetry::metrics::RbacMetrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Plan
// ═══════════════════════════════════════════════════════════════════════════════

/// The difference between the catalog and the stored action set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Catalog actions missing from the store, in catalog order.
    pub to_add: Vec<ActionId>,
    /// Stored actions absent from the catalog, in store order.
    pub to_remove: Vec<ActionId>,
}

impl ReconcilePlan {
    /// Compute the plan. Pure; the two lists are always disjoint.
    pub fn compute(catalog: &ActionCatalog, existing: &[ActionId]) -> Self {
        let stored: HashSet<&ActionId> = existing.iter().collect();

        let to_add = catalog
            .iter()
            .filter(|id| !stored.contains(id))
            .cloned()
            .collect();

        let mut seen = HashSet::new();
        let to_remove = existing
            .iter()
            .filter(|id| !catalog.contains(id) && seen.insert(*id))
            .cloned()
            .collect();

        Self { to_add, to_remove }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Report
// ═══════════════════════════════════════════════════════════════════════════════

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub actions_added: Vec<ActionId>,
    pub actions_removed: Vec<ActionId>,
    pub grants_added: u64,
    pub grants_removed: u64,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.actions_added.is_empty()
            && self.actions_removed.is_empty()
            && self.grants_added == 0
            && self.grants_removed == 0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Reconciler
// ═══════════════════════════════════════════════════════════════════════════════

/// Brings the store's action set in line with an [`ActionCatalog`].
pub struct ActionReconciler {
    catalog: ActionCatalog,
    store: Arc<dyn RbacStore>,
    completed: OnceCell<ReconcileReport>,
}

impl ActionReconciler {
    pub fn new(catalog: ActionCatalog, store: Arc<dyn RbacStore>) -> Self {
        Self {
            catalog,
            store,
            completed: OnceCell::new(),
        }
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    /// Run one reconciliation pass.
    ///
    /// Each action insert or removal is its own atomic store write. A failure
    /// stops the pass and is returned as `ReconciliationFailed`; writes that
    /// already committed stay committed and the next pass picks up the rest.
    #[instrument(skip(self), fields(catalog_size = self.catalog.len()))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let existing = self
            .store
            .list_actions()
            .await
            .map_err(|e| fail("Failed to list stored actions", e))?;

        let plan = ReconcilePlan::compute(&self.catalog, &existing);
        let mut report = ReconcileReport::default();
        if plan.is_empty() {
            debug!(actions = existing.len(), "Action set already up to date");
            return Ok(report);
        }

        for action_id in &plan.to_add {
            let added = self
                .store
                .add_action(action_id)
                .await
                .map_err(|e| fail(format!("Failed to add action {}", action_id), e))?;

            // `None`: another instance added it after our read.
            if let Some(granted) = added {
                debug!(action_id = %action_id, grants = granted, "Action added");
                RbacMetrics::record_action_added(granted);
                report.actions_added.push(action_id.clone());
                report.grants_added += granted;
            }
        }

        for action_id in &plan.to_remove {
            let removed = self
                .store
                .remove_action(action_id)
                .await
                .map_err(|e| fail(format!("Failed to remove action {}", action_id), e))?;

            debug!(action_id = %action_id, grants = removed, "Action removed");
            RbacMetrics::record_action_removed(removed);
            report.actions_removed.push(action_id.clone());
            report.grants_removed += removed;
        }

        info!(
            actions_added = report.actions_added.len(),
            actions_removed = report.actions_removed.len(),
            grants_added = report.grants_added,
            grants_removed = report.grants_removed,
            "Action reconciliation complete"
        );

        Ok(report)
    }

    /// Reconcile at most once for this reconciler.
    ///
    /// Later calls return the first successful report without touching the
    /// store. A failed pass leaves the guard unset.
    pub async fn run_once(&self) -> Result<&ReconcileReport> {
        self.completed.get_or_try_init(|| self.reconcile()).await
    }
}

fn fail(message: impl Into<String>, source: GatehouseError) -> GatehouseError {
    GatehouseError::reconciliation(message).with_source(source)
}
