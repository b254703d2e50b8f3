use crate::kubeapi::ClusterApi;
use crate::PhaseResultExt;
use drydock_definitions::ClusterSpec;

use super::{wait, LifecycleOrchestrator};
use crate::Result;

impl LifecycleOrchestrator {
    /// Tear a cluster down
    ///
    /// Managed clusters are paused first so no controller fights the
    /// deletion, then the persisted object (with its embedded identity
    /// provider documents) goes, then the provider's own resources through
    /// CAPI deletion, and finally the provider gets a chance to verify
    /// nothing leaked.
    pub async fn delete_cluster(&self, management: &dyn ClusterApi, spec: &ClusterSpec) -> Result<()> {
        let name = spec.name();
        let reconciler = self.registry.get(spec.provider())?;

        if spec.cluster.is_self_managed() {
            management
                .delete_capi_cluster(name)
                .await
                .phase("deleting cluster")?;
            wait::capi_cluster_gone(management, name, self.timeouts.control_plane, &self.cancel)
                .await
                .phase("waiting for cluster deletion")?;
            reconciler
                .adapter()
                .post_cluster_delete_validate(management, name)
                .await
                .phase("validating provider cleanup")?;
        } else {
            // stop the reconciler racing the deletion
            self.pause_cluster(management, name).await?;

            management
                .delete_cluster_crd(name)
                .await
                .phase("deleting cluster object")?;

            // provider resources are owned by the capi cluster; deleting it
            // cascades through the machine controllers
            management
                .delete_capi_cluster(name)
                .await
                .phase("deleting provider resources")?;
            wait::capi_cluster_gone(management, name, self.timeouts.control_plane, &self.cancel)
                .await
                .phase("waiting for cluster deletion")?;
        }
        info!("deleted cluster {}", name);
        Ok(())
    }
}
