use async_trait::async_trait;
use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::kubeapi::{self, ClusterApi};
use crate::reconcile::ReconcilerRegistry;
use crate::retry::CancellationToken;
use crate::singleflight::SingleFlight;
use drydock_definitions::ClusterSpec;

use super::{ErrorKind, Result, ResultExt};

/// Bounded waits on CAPI resources
pub mod wait;

/// Create-workload sequencing
mod create;
/// Upgrade-workload sequencing
mod upgrade;
pub use self::upgrade::UpgradeOutcome;
/// Management move and state backup
mod pivot;
/// Cluster deletion flows
mod delete;
/// Pause and resume of reconciliation
mod pause;

/// Every bound the orchestrator enforces, all overridable
#[derive(Debug, Clone)]
pub struct Timeouts {
    pub control_plane: Duration,
    pub external_etcd: Duration,
    pub deployment: Duration,
    pub machines: Duration,
    pub machine_backoff_base: Duration,
    pub machine_backoff_cap: Duration,
    pub bmc: Duration,
    pub unhealthy_machine: Duration,
    pub node_startup: Duration,
    /// How long a roll gets to visibly start before we assume it was fast
    pub roll_observe: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            control_plane: Duration::from_secs(60 * 60),
            external_etcd: Duration::from_secs(60 * 60),
            deployment: Duration::from_secs(30 * 60),
            machines: Duration::from_secs(30 * 60),
            machine_backoff_base: Duration::from_secs(1),
            machine_backoff_cap: Duration::from_secs(60),
            bmc: Duration::from_secs(5 * 60),
            unhealthy_machine: Duration::from_secs(10 * 60),
            node_startup: Duration::from_secs(20 * 60),
            roll_observe: Duration::from_secs(2 * 60),
        }
    }
}

impl Timeouts {
    /// "No timeouts": every bound becomes the maximum representable
    pub fn unbounded() -> Self {
        let max = Duration::from_secs(u64::max_value());
        Timeouts {
            control_plane: max,
            external_etcd: max,
            deployment: max,
            machines: max,
            bmc: max,
            unhealthy_machine: max,
            node_startup: max,
            ..Default::default()
        }
    }

    pub fn machine_backoff(&self) -> crate::retry::Backoff {
        crate::retry::Backoff::machine_wait().with_bounds(self.machine_backoff_base, self.machine_backoff_cap)
    }
}

/// Networking installation contract (the CNI itself is someone else's code)
#[async_trait]
pub trait Networking: Send + Sync {
    async fn install(&self, workload: &dyn ClusterApi, spec: &ClusterSpec) -> Result<()>;

    /// Fix CNI-side drift after a control plane roll
    async fn run_post_control_plane_upgrade_setup(
        &self,
        _workload: &dyn ClusterApi,
        _spec: &ClusterSpec,
    ) -> Result<()> {
        Ok(())
    }
}

/// Applies pre-rendered networking manifests built from the bundle images
pub struct ManifestNetworking {
    manifests: Vec<u8>,
}

impl ManifestNetworking {
    pub fn new(manifests: Vec<u8>) -> Self {
        ManifestNetworking { manifests }
    }

    /// The default networking payload: a cilium config pinned to the bundle
    pub fn cilium(spec: &ClusterSpec) -> Self {
        let config = serde_json::json!({
            "apiVersion": "drydock.dev/v1alpha1",
            "kind": "CiliumConfig",
            "metadata": { "name": spec.name(), "namespace": crate::capi::SYSTEM_NAMESPACE },
            "spec": {
                "cilium": { "image": spec.bundle.cilium.uri() },
                "operator": { "image": spec.bundle.ciliumOperator.uri() },
            },
        });
        let body = serde_yaml::to_string(&config).unwrap_or_default();
        ManifestNetworking::new(body.into_bytes())
    }
}

#[async_trait]
impl Networking for ManifestNetworking {
    async fn install(&self, workload: &dyn ClusterApi, spec: &ClusterSpec) -> Result<()> {
        info!("installing networking on {}", spec.name());
        workload.apply_manifests("networking", &self.manifests).await
    }

    async fn run_post_control_plane_upgrade_setup(
        &self,
        workload: &dyn ClusterApi,
        spec: &ClusterSpec,
    ) -> Result<()> {
        // re-applying the desired config reverts any drift the roll caused
        workload.apply_manifests("networking", &self.manifests).await?;
        debug!("reconciled networking for {}", spec.name());
        Ok(())
    }
}

/// The CAPI move/backup operation, an external process in production
#[async_trait]
pub trait CapiMover: Send + Sync {
    async fn move_management(&self, from: Option<&Path>, to: Option<&Path>) -> Result<()>;
    async fn backup(&self, kubeconfig: Option<&Path>, dir: &Path) -> Result<()>;
}

/// Shells out to clusterctl
pub struct Clusterctl;

#[async_trait]
impl CapiMover for Clusterctl {
    async fn move_management(&self, from: Option<&Path>, to: Option<&Path>) -> Result<()> {
        let mut args: Vec<String> = vec![
            "move".into(),
            "--namespace".into(),
            crate::capi::SYSTEM_NAMESPACE.into(),
        ];
        if let Some(f) = from {
            args.push("--kubeconfig".into());
            args.push(f.display().to_string());
        }
        if let Some(t) = to {
            args.push("--to-kubeconfig".into());
            args.push(t.display().to_string());
        }
        kubeapi::kexec("clusterctl", args)
            .await
            .map_err(|e| ErrorKind::ExternalOperation("clusterctl move".into(), e.to_string()).into())
    }

    async fn backup(&self, kubeconfig: Option<&Path>, dir: &Path) -> Result<()> {
        let mut args: Vec<String> = vec![
            "move".into(),
            "--namespace".into(),
            crate::capi::SYSTEM_NAMESPACE.into(),
            "--to-directory".into(),
            dir.display().to_string(),
        ];
        if let Some(k) = kubeconfig {
            args.push("--kubeconfig".into());
            args.push(k.display().to_string());
        }
        kubeapi::kexec("clusterctl", args)
            .await
            .map_err(|e| ErrorKind::ExternalOperation("clusterctl backup".into(), e.to_string()).into())
    }
}

/// Diagnostic bundle collection, opaque to the core
#[async_trait]
pub trait Diagnostics: Send + Sync {
    async fn snapshot(&self, cluster: &str) -> Result<PathBuf>;
}

/// MachineHealthCheck objects for the control plane and the workers
///
/// The unhealthy and node-startup bounds come straight from the timeout
/// table; "no timeouts" turns into the maximum representable duration.
pub fn machine_health_checks(cluster: &str, timeouts: &Timeouts) -> Result<Vec<u8>> {
    let unhealthy = format!("{}s", timeouts.unhealthy_machine.as_secs());
    let startup = format!("{}s", timeouts.node_startup.as_secs());
    let mut parts = vec![];
    for (suffix, selector_key) in &[
        ("kcp", "cluster.x-k8s.io/control-plane"),
        ("worker", "cluster.x-k8s.io/deployment-name"),
    ] {
        let mhc = serde_json::json!({
            "apiVersion": "cluster.x-k8s.io/v1beta1",
            "kind": "MachineHealthCheck",
            "metadata": {
                "name": format!("{}-{}-unhealthy", cluster, suffix),
                "namespace": crate::capi::SYSTEM_NAMESPACE,
            },
            "spec": {
                "clusterName": cluster,
                "maxUnhealthy": "100%",
                "nodeStartupTimeout": startup,
                "selector": { "matchExpressions": [
                    { "key": selector_key, "operator": "Exists" }
                ]},
                "unhealthyConditions": [
                    { "type": "Ready", "status": "Unknown", "timeout": unhealthy },
                    { "type": "Ready", "status": "False", "timeout": unhealthy }
                ],
            },
        });
        parts.push(serde_yaml::to_string(&mhc)?.trim_start_matches("---").trim().to_string());
    }
    Ok(parts.join("\n---\n").into_bytes())
}

/// On-disk artifacts under `<cluster>/`
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    base: PathBuf,
}

impl ArtifactWriter {
    pub fn new(base: &Path) -> Self {
        ArtifactWriter { base: base.to_path_buf() }
    }

    fn cluster_dir(&self, cluster: &str) -> Result<PathBuf> {
        let dir = self.base.join(cluster);
        fs::create_dir_all(&dir).chain_err(|| format!("creating {}", dir.display()))?;
        Ok(dir)
    }

    /// `<cluster>/<cluster>-drydock-cluster.yaml`: the cluster spec of record
    pub fn write_cluster_spec(&self, cluster: &str, raw_spec: &[u8]) -> Result<PathBuf> {
        let path = self.cluster_dir(cluster)?.join(format!("{}-drydock-cluster.yaml", cluster));
        let mut f = File::create(&path)?;
        f.write_all(raw_spec)?;
        debug!("wrote cluster spec to {}", path.display());
        Ok(path)
    }

    /// Where the spec of record lives for an existing cluster
    pub fn cluster_spec_path(&self, cluster: &str) -> PathBuf {
        self.base.join(cluster).join(format!("{}-drydock-cluster.yaml", cluster))
    }

    /// `<cluster>/generated/`: rendered CAPI manifests kept for support
    pub fn write_capi_manifests(&self, cluster: &str, rendered: &[u8]) -> Result<PathBuf> {
        let dir = self.cluster_dir(cluster)?.join("generated");
        fs::create_dir_all(&dir).chain_err(|| format!("creating {}", dir.display()))?;
        let path = dir.join(format!("{}-capi.yaml", cluster));
        let mut f = File::create(&path)?;
        f.write_all(rendered)?;
        debug!("wrote rendered capi manifests to {}", path.display());
        Ok(path)
    }

    /// Where the workload kubeconfig lives for an existing cluster
    pub fn kubeconfig_path(&self, cluster: &str) -> PathBuf {
        self.base
            .join(cluster)
            .join(format!("{}-drydock-cluster.kubeconfig", cluster))
    }

    /// `<cluster>/<cluster>-drydock-cluster.kubeconfig`
    pub fn write_kubeconfig(&self, cluster: &str, kubeconfig: &[u8]) -> Result<PathBuf> {
        let path = self
            .cluster_dir(cluster)?
            .join(format!("{}-drydock-cluster.kubeconfig", cluster));
        let mut f = File::create(&path)?;
        f.write_all(kubeconfig)?;
        info!("wrote workload kubeconfig to {}", path.display());
        Ok(path)
    }

    /// `cluster-state-backup-<RFC3339>/`
    pub fn backup_dir(&self, timestamp: &str) -> Result<PathBuf> {
        let dir = self.base.join(format!("cluster-state-backup-{}", timestamp));
        fs::create_dir_all(&dir).chain_err(|| format!("creating {}", dir.display()))?;
        Ok(dir)
    }
}

/// The procedural engine behind every cluster operation
///
/// Owns the bootstrap/workload/management handles for the duration of a
/// sequence; individual steps borrow the shared client surface.
pub struct LifecycleOrchestrator {
    pub registry: Arc<ReconcilerRegistry>,
    pub timeouts: Timeouts,
    pub networking: Arc<dyn Networking>,
    pub mover: Arc<dyn CapiMover>,
    pub writer: ArtifactWriter,
    pub cancel: CancellationToken,
    /// Per-cluster single flight for `reconcile_cluster`
    pub(crate) flights: SingleFlight<(ClusterSpec, ClusterSpec)>,
}

impl LifecycleOrchestrator {
    pub fn new(
        registry: Arc<ReconcilerRegistry>,
        networking: Arc<dyn Networking>,
        mover: Arc<dyn CapiMover>,
        writer: ArtifactWriter,
    ) -> Self {
        LifecycleOrchestrator {
            registry,
            timeouts: Timeouts::default(),
            networking,
            mover,
            writer,
            cancel: CancellationToken::new(),
            flights: SingleFlight::new(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Surface the first fatal error of a reconcile on the cluster status
    ///
    /// Written at most once per reconcile; best effort, since the same
    /// outage that failed the operation may block the status write too.
    pub async fn surface_failure(&self, client: &dyn ClusterApi, cluster: &str, err: &super::Error) {
        let mut status = match client.get_cluster_crd(cluster).await {
            Ok(Some(crd)) => crd.status.unwrap_or_default(),
            _ => Default::default(),
        };
        if status.failure_message.is_some() {
            return;
        }
        status.record_failure(err.to_string());
        if let Err(e) = client.update_cluster_status(cluster, &status).await {
            warn!("could not surface failure on {}: {}", cluster, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Timeouts;
    use std::time::Duration;

    #[test]
    fn default_bounds() {
        let t = Timeouts::default();
        assert_eq!(t.control_plane, Duration::from_secs(3600));
        assert_eq!(t.external_etcd, Duration::from_secs(3600));
        assert_eq!(t.deployment, Duration::from_secs(1800));
        assert_eq!(t.machines, Duration::from_secs(1800));
        assert_eq!(t.bmc, Duration::from_secs(300));
        assert_eq!(t.unhealthy_machine, Duration::from_secs(600));
        assert_eq!(t.node_startup, Duration::from_secs(1200));
    }

    #[test]
    fn unbounded_is_max_representable() {
        let t = Timeouts::unbounded();
        assert_eq!(t.control_plane, Duration::from_secs(u64::max_value()));
        assert_eq!(t.unhealthy_machine, Duration::from_secs(u64::max_value()));
        // poll cadence stays sane even without bounds
        assert_eq!(t.machine_backoff_base, Duration::from_secs(1));
    }
}
