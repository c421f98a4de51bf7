//! Superuser role provisioning for new organizations.

use std::sync::Arc;

use tracing::{info, instrument};

use super::models::{OrgId, Organization, ProvisionedRole, RoleId, UserId};
use super::store::RbacStore;
use crate::error::Result;
use crate::telemetry::metrics::RbacMetrics;

/// Creates an organization's superuser role holding every stored action.
#[derive(Clone)]
pub struct SuperuserProvisioner {
    store: Arc<dyn RbacStore>,
}

impl SuperuserProvisioner {
    pub fn new(store: Arc<dyn RbacStore>) -> Self {
        Self { store }
    }

    /// Provision the superuser role for an existing organization and return
    /// its id.
    ///
    /// The action set is read and granted in the same atomic store write as
    /// the role insert. Fails with `DuplicateRecord` if the organization
    /// already has a superuser role.
    #[instrument(skip(self), fields(org_id = %org_id))]
    pub async fn provision(&self, org_id: &OrgId) -> Result<RoleId> {
        let provisioned = self.store.insert_superuser_role(org_id).await?;
        record(&provisioned);
        Ok(provisioned.role.role_id)
    }

    /// Create `org` with its superuser role and make `owner` a member of it.
    ///
    /// All three writes commit together or not at all, so a failed attempt
    /// leaves nothing behind and can be retried.
    #[instrument(skip(self, org), fields(org_id = %org.org_id, owner = %owner))]
    pub async fn provision_org(
        &self,
        org: &Organization,
        owner: &UserId,
    ) -> Result<ProvisionedRole> {
        let provisioned = self.store.create_org_with_superuser(org, owner).await?;
        record(&provisioned);
        Ok(provisioned)
    }
}

fn record(provisioned: &ProvisionedRole) {
    if provisioned.actions.is_empty() {
        info!("No actions to assign to the Superuser role");
    }
    RbacMetrics::record_superuser_role(provisioned.actions.len() as u64);
    info!(
        role_id = %provisioned.role.role_id,
        grants = provisioned.actions.len(),
        "Superuser role provisioned"
    );
}
