use chrono::Utc;

use crate::capi;
use crate::kubeapi::ClusterApi;
use crate::reconcile::{self, Operation, UpgradeRender};
use crate::PhaseResultExt;
use drydock_definitions::ClusterSpec;

use super::{wait, LifecycleOrchestrator};
use crate::Result;

/// What an upgrade reconciliation did
#[derive(Debug, Clone, PartialEq)]
pub enum UpgradeOutcome {
    /// The no-op sentinel made it all the way through
    Unchanged,
    Applied(Operation),
}

impl LifecycleOrchestrator {
    /// The single-flighted reconcile entry point
    ///
    /// One reconcile per cluster at a time; a reconcile submitted while
    /// another runs queues its desired state, and queued states collapse
    /// so only the latest one is acted on. `None` means this submission
    /// collapsed into a newer one.
    pub async fn reconcile_cluster(
        &self,
        management: &dyn ClusterApi,
        workload: &dyn ClusterApi,
        current: &ClusterSpec,
        new: &ClusterSpec,
    ) -> Result<Option<UpgradeOutcome>> {
        self.flights
            .run(new.name(), (current.clone(), new.clone()), |(cur, desired)| async move {
                self.upgrade_workload(management, workload, &cur, &desired).await
            })
            .await
            .transpose()
    }

    /// The full upgrade-workload sequence against the management cluster
    pub async fn upgrade_workload(
        &self,
        management: &dyn ClusterApi,
        workload: &dyn ClusterApi,
        current: &ClusterSpec,
        new: &ClusterSpec,
    ) -> Result<UpgradeOutcome> {
        let name = new.name();
        let reconciler = self.registry.get(new.provider())?;

        // remember the groups on the cluster before we apply anything
        let mds_before = management
            .list_machine_deployments(name)
            .await
            .phase("reading current machine deployments")?;

        let render = reconciler
            .render_for_upgrade(management, current, new, &Utc::now(), &[], &self.cancel)
            .await
            .phase("rendering upgrade manifests")?;
        let (operation, rendered) = match render {
            UpgradeRender::NoChange => return Ok(UpgradeOutcome::Unchanged),
            UpgradeRender::Changed { operation, rendered } => (operation, rendered),
        };

        self.writer
            .write_capi_manifests(name, &rendered.combined())
            .phase("writing cluster manifest artifact")?;

        // control plane side first, always
        management
            .apply_manifests("control-plane", &rendered.control_plane)
            .await
            .phase("applying control plane manifests")?;

        let rolling = match operation {
            Operation::ScaleOnly | Operation::NoChange => false,
            _ => true,
        };

        // etcd must finish before the control plane templates take effect
        if new.cluster.externalEtcdConfiguration.is_some() && operation == Operation::VersionUpgrade {
            wait::etcd_ready(
                management,
                &capi::etcd_cluster_name(name),
                self.timeouts.external_etcd,
                &self.cancel,
            )
            .await
            .phase("waiting for external etcd")?;
        }

        if rolling {
            // observe the roll starting, then completing
            wait::control_plane_not_ready(management, name, self.timeouts.roll_observe, &self.cancel)
                .await
                .phase("observing control plane roll")?;
        }
        wait::control_plane_ready(management, name, self.timeouts.control_plane, &self.cancel)
            .await
            .phase("waiting for control plane")?;

        if rolling {
            reconciler
                .adapter()
                .post_control_plane_upgrade(management, new)
                .await
                .phase("running post control plane upgrade hook")?;
        }

        // workers after the control plane settles
        if !rendered.workers.is_empty() {
            management
                .apply_manifests("workers", &rendered.workers)
                .await
                .phase("applying worker manifests")?;
        }
        for group in &new.cluster.workerNodeGroupConfigurations {
            let md_name = reconcile::names::machine_deployment_name(name, &group.name);
            wait::machine_deployment_ready(
                management,
                name,
                &md_name,
                group.desired_count() as i32,
                self.timeouts.deployment,
                &self.cancel,
            )
            .await
            .phase("waiting for worker machine deployments")?;
        }

        // remove groups the new spec no longer has
        for stale in reconcile::removed_groups(new, &mds_before) {
            info!("removing stale worker group {}", stale);
            management
                .delete_machine_deployment(&stale)
                .await
                .phase("removing stale worker groups")?;
        }

        // optional identity authenticator rotation
        if rolling && new.aws_iam_config().is_some() {
            self.rotate_iam_authenticator(workload, new)
                .await
                .phase("rotating aws-iam-authenticator")?;
        }

        if rolling {
            self.networking
                .run_post_control_plane_upgrade_setup(workload, new)
                .await
                .phase("reconciling networking after upgrade")?;
        }

        Ok(UpgradeOutcome::Applied(operation))
    }

    /// Re-applies the authenticator daemonset pinned to the bundle image,
    /// which rotates its serving certificates as a side effect.
    async fn rotate_iam_authenticator(&self, workload: &dyn ClusterApi, spec: &ClusterSpec) -> Result<()> {
        let iam = match spec.aws_iam_config() {
            Some(i) => i,
            None => return Ok(()),
        };
        let manifest = serde_json::json!({
            "apiVersion": "drydock.dev/v1alpha1",
            "kind": "AwsIamAuthenticator",
            "metadata": { "name": spec.name(), "namespace": crate::capi::SYSTEM_NAMESPACE },
            "spec": {
                "image": spec.bundle.awsIamAuthenticator.uri(),
                "awsRegion": iam.awsRegion,
                "backendMode": iam.backendMode,
                "partition": iam.partition,
                "rotateCertificates": true,
            },
        });
        let body = serde_yaml::to_string(&manifest)?;
        workload.apply_manifests("aws-iam-authenticator", body.as_bytes()).await
    }
}
