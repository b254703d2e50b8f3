use chrono::{SecondsFormat, Utc};
use std::path::{Path, PathBuf};

use crate::kubeapi::ClusterApi;
use crate::PhaseResultExt;

use super::{wait, LifecycleOrchestrator};
use crate::{ErrorKind, Result};

/// Counts remembered from the source side of a move
#[derive(Debug, Clone, Default, PartialEq)]
struct MoveSnapshot {
    clusters: Vec<String>,
    control_planes: usize,
    machine_deployments: usize,
    machines: usize,
}

impl LifecycleOrchestrator {
    /// Move the CAPI management of every cluster from one side to the other
    ///
    /// The underlying move runs exactly once; a failure is fatal with no
    /// partial rollback, and the next reconcile starts from whatever state
    /// the move left behind.
    pub async fn move_capi(
        &self,
        from: &dyn ClusterApi,
        to: &dyn ClusterApi,
        from_kubeconfig: Option<&Path>,
        to_kubeconfig: Option<&Path>,
    ) -> Result<()> {
        // snapshot the source
        let snapshot = self.snapshot_source(from).await.phase("snapshotting source clusters")?;
        info!(
            "moving {} clusters ({} machines) from {} to {}",
            snapshot.clusters.len(),
            snapshot.machines,
            from.context_name(),
            to.context_name()
        );

        // the source must be settled before it gives anything up
        for cluster in &snapshot.clusters {
            wait::capi_cluster_ready(from, cluster, self.timeouts.control_plane, &self.cancel)
                .await
                .phase("waiting for source cluster readiness")?;
        }

        // at-most-once external move
        self.mover
            .move_management(from_kubeconfig, to_kubeconfig)
            .await
            .phase("moving cluster api resources")?;

        // destination reports every cluster ready again
        for cluster in &snapshot.clusters {
            wait::capi_cluster_ready(to, cluster, self.timeouts.control_plane, &self.cancel)
                .await
                .phase("waiting for destination cluster readiness")?;
        }

        // nothing was lost on the way over
        self.validate_destination(to, &snapshot)
            .await
            .phase("validating moved resources")?;
        Ok(())
    }

    async fn snapshot_source(&self, from: &dyn ClusterApi) -> Result<MoveSnapshot> {
        let clusters = from.list_capi_clusters().await?;
        let mut snapshot = MoveSnapshot::default();
        for cluster in &clusters {
            let name = cluster.metadata.name.clone().unwrap_or_default();
            if from.get_kubeadm_control_plane(&name).await?.is_some() {
                snapshot.control_planes += 1;
            }
            snapshot.machine_deployments += from.list_machine_deployments(&name).await?.len();
            snapshot.machines += from.list_machines(&name).await?.len();
            snapshot.clusters.push(name);
        }
        Ok(snapshot)
    }

    async fn validate_destination(&self, to: &dyn ClusterApi, snapshot: &MoveSnapshot) -> Result<()> {
        let mut control_planes = 0;
        let mut machine_deployments = 0;
        for cluster in &snapshot.clusters {
            let kcp = to.get_kubeadm_control_plane(cluster).await?;
            if let Some(kcp) = &kcp {
                control_planes += 1;
                let expected = kcp.spec.replicas.unwrap_or(1);
                let ready = kcp
                    .status
                    .as_ref()
                    .and_then(|s| s.readyReplicas)
                    .unwrap_or(0);
                if ready < expected {
                    return Err(ErrorKind::ExternalOperation(
                        "move validation".into(),
                        format!("{} control plane has {}/{} nodes after move", cluster, ready, expected),
                    )
                    .into());
                }
            }
            let mds = to.list_machine_deployments(cluster).await?;
            machine_deployments += mds.len();
            for md in &mds {
                let want = md.spec.replicas.unwrap_or(0);
                let have = md.status.as_ref().map(|s| s.replicas).unwrap_or(0);
                if have < want {
                    return Err(ErrorKind::ExternalOperation(
                        "move validation".into(),
                        format!("{} has {}/{} replicas after move", md.metadata.name.as_deref().unwrap_or_default(), have, want),
                    )
                    .into());
                }
            }
        }
        if control_planes != snapshot.control_planes || machine_deployments != snapshot.machine_deployments {
            return Err(ErrorKind::ExternalOperation(
                "move validation".into(),
                format!(
                    "destination has {}/{} control planes and {}/{} machine deployments",
                    control_planes, snapshot.control_planes, machine_deployments, snapshot.machine_deployments
                ),
            )
            .into());
        }
        Ok(())
    }

    /// Dump every CAPI-scoped resource into a timestamped directory
    pub async fn backup_capi(&self, kubeconfig: Option<&Path>) -> Result<PathBuf> {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let dir = self.writer.backup_dir(&stamp).phase("creating backup directory")?;
        self.mover
            .backup(kubeconfig, &dir)
            .await
            .phase("backing up cluster state")?;
        info!("cluster state backed up to {}", dir.display());
        Ok(dir)
    }
}
