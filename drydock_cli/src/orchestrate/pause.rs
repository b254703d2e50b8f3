use crate::kubeapi::ClusterApi;
use crate::PhaseResultExt;
use drydock_definitions::status::{MANAGED_BY_CLI_ANNOTATION, PAUSED_ANNOTATION};

use super::LifecycleOrchestrator;
use crate::Result;

impl LifecycleOrchestrator {
    /// Suspend reconciliation of one cluster
    ///
    /// Two annotations: `paused` stops the reconciler, `managed-by-cli`
    /// keeps every controller's hands off while the cli drives.
    pub async fn pause_cluster(&self, client: &dyn ClusterApi, cluster: &str) -> Result<()> {
        client
            .annotate_cluster_crd(cluster, PAUSED_ANNOTATION, Some("true"))
            .await
            .phase("pausing reconciliation")?;
        client
            .annotate_cluster_crd(cluster, MANAGED_BY_CLI_ANNOTATION, Some("true"))
            .await
            .phase("pausing reconciliation")?;
        debug!("paused reconciliation of {}", cluster);
        Ok(())
    }

    /// Resume is symmetric and idempotent: absent annotations stay absent
    pub async fn resume_cluster(&self, client: &dyn ClusterApi, cluster: &str) -> Result<()> {
        client
            .annotate_cluster_crd(cluster, PAUSED_ANNOTATION, None)
            .await
            .phase("resuming reconciliation")?;
        client
            .annotate_cluster_crd(cluster, MANAGED_BY_CLI_ANNOTATION, None)
            .await
            .phase("resuming reconciliation")?;
        debug!("resumed reconciliation of {}", cluster);
        Ok(())
    }

    /// Pause a management cluster and every workload cluster it manages
    pub async fn pause_management(&self, client: &dyn ClusterApi, cluster: &str) -> Result<()> {
        for managed in self.managed_clusters(client, cluster).await? {
            self.pause_cluster(client, &managed).await?;
        }
        self.pause_cluster(client, cluster).await
    }

    pub async fn resume_management(&self, client: &dyn ClusterApi, cluster: &str) -> Result<()> {
        for managed in self.managed_clusters(client, cluster).await? {
            self.resume_cluster(client, &managed).await?;
        }
        self.resume_cluster(client, cluster).await
    }

    async fn managed_clusters(&self, client: &dyn ClusterApi, cluster: &str) -> Result<Vec<String>> {
        let all = client
            .list_cluster_crds()
            .await
            .phase("listing managed clusters")?;
        Ok(all
            .iter()
            .filter(|c| {
                c.metadata.name.as_deref() != Some(cluster)
                    && !c.spec.config.is_self_managed()
                    && c.spec.config.managed_by() == cluster
            })
            .map(|c| c.metadata.name.clone().unwrap_or_default())
            .collect())
    }
}
