use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Api, DeleteParams, ListParams, PatchParams, PatchStrategy},
    client::APIClient,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::capi::{self, rufio, tink, CLUSTER_NAME_LABEL, SYSTEM_NAMESPACE};
use crate::crds;
use crate::retry::Backoff;
use drydock_definitions::{ClusterStatus, Hardware};

use super::{ErrorKind, Result};

/// 5xx and connection-level failures are worth retrying; 4xx are not
fn is_transient(e: &kube::Error) -> bool {
    match e {
        kube::Error::Api(ae) => ae.code >= 500,
        _ => true,
    }
}

// Rebuilds the call each attempt so transient read hiccups get absorbed
macro_rules! with_retries {
    ($what:expr, $call:expr) => {{
        let mut backoff = Backoff::reads();
        loop {
            match $call.await {
                Ok(o) => break Ok(o),
                Err(e) => {
                    if !is_transient(&e) || !backoff.retryable() {
                        break Err(e);
                    }
                    warn!("{} failed transiently: {} (retrying)", $what, e);
                    backoff.sleep().await;
                }
            }
        }
    }};
}

macro_rules! ok_or_notfound {
    ($res:expr) => {
        match $res {
            Ok(o) => Ok(Some(o)),
            Err(kube::Error::Api(ref ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(ErrorKind::KubeError(e).into()),
        }
    };
}

/// The capability surface the reconcilers and the orchestrator program against
///
/// One implementation speaks to a real cluster through kube; tests swap in a
/// scripted recorder. The client is safe to share between reconcilers.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Human-readable handle for logs (kubeconfig path or "current-context")
    fn context_name(&self) -> String;

    /// Server-side force apply of a rendered manifest stream
    async fn apply_manifests(&self, what: &str, yaml: &[u8]) -> Result<()>;

    async fn get_kubeadm_control_plane(&self, name: &str) -> Result<Option<capi::KubeadmControlPlane>>;
    async fn list_machine_deployments(&self, cluster: &str) -> Result<Vec<capi::MachineDeployment>>;
    async fn list_machines(&self, cluster: &str) -> Result<Vec<capi::Machine>>;
    async fn get_capi_cluster(&self, name: &str) -> Result<Option<capi::Cluster>>;
    async fn list_capi_clusters(&self) -> Result<Vec<capi::Cluster>>;
    async fn delete_machine_deployment(&self, name: &str) -> Result<()>;
    async fn get_etcd_cluster(&self, name: &str) -> Result<Option<capi::EtcdadmCluster>>;

    /// Merge-patch an annotation; `None` removes it
    async fn annotate_etcd_cluster(&self, name: &str, key: &str, value: Option<&str>) -> Result<()>;

    async fn get_cluster_crd(&self, name: &str) -> Result<Option<crds::Cluster>>;
    async fn list_cluster_crds(&self) -> Result<Vec<crds::Cluster>>;
    async fn annotate_cluster_crd(&self, name: &str, key: &str, value: Option<&str>) -> Result<()>;
    async fn update_cluster_status(&self, name: &str, status: &ClusterStatus) -> Result<()>;
    async fn delete_cluster_crd(&self, name: &str) -> Result<()>;
    async fn delete_capi_cluster(&self, name: &str) -> Result<()>;

    /// The workload cluster kubeconfig from its CAPI secret
    async fn workload_kubeconfig(&self, cluster: &str) -> Result<Vec<u8>>;

    /// Bare metal inventory from the cluster; bool marks machine-bound records
    async fn list_hardware(&self) -> Result<Vec<(Hardware, bool)>>;
    async fn list_rufio_machines(&self) -> Result<Vec<rufio::Machine>>;
}

/// Thin retrying client over one cluster's api server
///
/// Holds an optional explicit kubeconfig so the orchestrator can address the
/// bootstrap, management and workload clusters separately during a pivot.
pub struct ClusterClient {
    client: APIClient,
    namespace: String,
    kubeconfig: Option<PathBuf>,
}

impl ClusterClient {
    /// Client for the current context (in-cluster config wins when present)
    pub async fn from_env() -> Result<Self> {
        let config = if let Ok(cfg) = kube::config::incluster_config() {
            cfg
        } else {
            kube::config::load_kube_config()
                .await
                .map_err(ErrorKind::KubeError)?
        };
        Ok(ClusterClient {
            client: APIClient::new(config),
            namespace: SYSTEM_NAMESPACE.into(),
            kubeconfig: None,
        })
    }

    /// Client for an explicit kubeconfig file
    ///
    /// The pivot sequences hold exclusive ownership of their cluster handles,
    /// so flipping the env var during construction cannot race another load.
    pub async fn for_kubeconfig(path: &Path) -> Result<Self> {
        std::env::set_var("KUBECONFIG", path);
        let config = kube::config::load_kube_config()
            .await
            .map_err(ErrorKind::KubeError)?;
        Ok(ClusterClient {
            client: APIClient::new(config),
            namespace: SYSTEM_NAMESPACE.into(),
            kubeconfig: Some(path.to_path_buf()),
        })
    }

    pub fn kubeconfig_path(&self) -> Option<&Path> {
        self.kubeconfig.as_ref().map(|p| p.as_path())
    }

    fn kcps(&self) -> Api<capi::KubeadmControlPlane> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn machine_deployments(&self) -> Api<capi::MachineDeployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn machines(&self) -> Api<capi::Machine> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn capi_clusters(&self) -> Api<capi::Cluster> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn etcd_clusters(&self) -> Api<capi::EtcdadmCluster> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn cluster_crds(&self) -> Api<crds::Cluster> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn rufio_machines(&self) -> Api<rufio::Machine> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn tink_hardware(&self) -> Api<tink::Hardware> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn cluster_selector(cluster: &str) -> ListParams {
        ListParams {
            label_selector: Some(format!("{}={}", CLUSTER_NAME_LABEL, cluster)),
            ..Default::default()
        }
    }

    fn annotation_patch(key: &str, value: Option<&str>) -> Vec<u8> {
        let body = serde_json::json!({
            "metadata": { "annotations": { key: value } }
        });
        serde_json::to_vec(&body).expect("annotation patch serializes")
    }

    fn merge_params() -> PatchParams {
        PatchParams {
            patch_strategy: PatchStrategy::Merge,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ClusterApi for ClusterClient {
    fn context_name(&self) -> String {
        match &self.kubeconfig {
            Some(p) => p.display().to_string(),
            None => "current-context".into(),
        }
    }

    async fn apply_manifests(&self, what: &str, yaml: &[u8]) -> Result<()> {
        use std::io::Write;
        let dir = std::env::temp_dir();
        let path = dir.join(format!("drydock-apply-{}-{}.yaml", what, std::process::id()));
        let mut f = std::fs::File::create(&path)?;
        f.write_all(yaml)?;
        let res = kubectl_apply(&path, self.kubeconfig.as_ref().map(|p| p.as_path())).await;
        let _ = std::fs::remove_file(&path);
        res
    }

    async fn get_kubeadm_control_plane(&self, name: &str) -> Result<Option<capi::KubeadmControlPlane>> {
        let api = self.kcps();
        ok_or_notfound!(with_retries!("get kubeadmcontrolplane", api.get(name)))
    }

    async fn list_machine_deployments(&self, cluster: &str) -> Result<Vec<capi::MachineDeployment>> {
        let api = self.machine_deployments();
        let lp = Self::cluster_selector(cluster);
        let list = with_retries!("list machinedeployments", api.list(&lp)).map_err(ErrorKind::KubeError)?;
        Ok(list.items)
    }

    async fn list_machines(&self, cluster: &str) -> Result<Vec<capi::Machine>> {
        let api = self.machines();
        let lp = Self::cluster_selector(cluster);
        let list = with_retries!("list machines", api.list(&lp)).map_err(ErrorKind::KubeError)?;
        Ok(list.items)
    }

    async fn get_capi_cluster(&self, name: &str) -> Result<Option<capi::Cluster>> {
        let api = self.capi_clusters();
        ok_or_notfound!(with_retries!("get capi cluster", api.get(name)))
    }

    async fn list_capi_clusters(&self) -> Result<Vec<capi::Cluster>> {
        let api = self.capi_clusters();
        let lp = ListParams::default();
        let list = with_retries!("list capi clusters", api.list(&lp)).map_err(ErrorKind::KubeError)?;
        Ok(list.items)
    }

    async fn delete_machine_deployment(&self, name: &str) -> Result<()> {
        let api = self.machine_deployments();
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ref ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(ErrorKind::KubeError(e).into()),
        }
    }

    async fn get_etcd_cluster(&self, name: &str) -> Result<Option<capi::EtcdadmCluster>> {
        let api = self.etcd_clusters();
        ok_or_notfound!(with_retries!("get etcdadmcluster", api.get(name)))
    }

    async fn annotate_etcd_cluster(&self, name: &str, key: &str, value: Option<&str>) -> Result<()> {
        let api = self.etcd_clusters();
        let patch = Self::annotation_patch(key, value);
        api.patch(name, &Self::merge_params(), patch)
            .await
            .map_err(ErrorKind::KubeError)?;
        Ok(())
    }

    async fn get_cluster_crd(&self, name: &str) -> Result<Option<crds::Cluster>> {
        let api = self.cluster_crds();
        ok_or_notfound!(with_retries!("get cluster", api.get(name)))
    }

    async fn list_cluster_crds(&self) -> Result<Vec<crds::Cluster>> {
        let api = self.cluster_crds();
        let lp = ListParams::default();
        let list = with_retries!("list clusters", api.list(&lp)).map_err(ErrorKind::KubeError)?;
        Ok(list.items)
    }

    async fn annotate_cluster_crd(&self, name: &str, key: &str, value: Option<&str>) -> Result<()> {
        let api = self.cluster_crds();
        let patch = Self::annotation_patch(key, value);
        api.patch(name, &Self::merge_params(), patch)
            .await
            .map_err(ErrorKind::KubeError)?;
        Ok(())
    }

    async fn update_cluster_status(&self, name: &str, status: &ClusterStatus) -> Result<()> {
        let api = self.cluster_crds();
        let body = serde_json::to_vec(&serde_json::json!({ "status": status }))?;
        api.patch_status(name, &Self::merge_params(), body)
            .await
            .map_err(ErrorKind::KubeError)?;
        Ok(())
    }

    async fn delete_cluster_crd(&self, name: &str) -> Result<()> {
        let api = self.cluster_crds();
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ref ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(ErrorKind::KubeError(e).into()),
        }
    }

    async fn delete_capi_cluster(&self, name: &str) -> Result<()> {
        let api = self.capi_clusters();
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ref ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(ErrorKind::KubeError(e).into()),
        }
    }

    async fn workload_kubeconfig(&self, cluster: &str) -> Result<Vec<u8>> {
        let api = self.secrets();
        let name = format!("{}-kubeconfig", cluster);
        let secret = with_retries!("get kubeconfig secret", api.get(&name)).map_err(ErrorKind::KubeError)?;
        let data = secret
            .data
            .and_then(|mut d: BTreeMap<String, k8s_openapi::ByteString>| d.remove("value"))
            .ok_or_else(|| format!("kubeconfig secret {} has no value key", name))?;
        Ok(data.0)
    }

    async fn list_hardware(&self) -> Result<Vec<(Hardware, bool)>> {
        let api = self.tink_hardware();
        let lp = ListParams::default();
        let list = with_retries!("list hardware", api.list(&lp)).map_err(ErrorKind::KubeError)?;
        let mut out = vec![];
        for hw in list.items {
            let bound = hw.metadata.labels.as_ref().map(|l| l.contains_key(tink::OWNER_NAME_LABEL)).unwrap_or(false);
            let dhcp = hw.spec.interfaces.first().and_then(|i| i.dhcp.clone()).unwrap_or_default();
            let ip = dhcp.ip.unwrap_or_default();
            out.push((
                Hardware {
                    hostname: hw.metadata.name.clone().unwrap_or_default(),
                    mac: dhcp.mac.to_lowercase(),
                    ip_address: ip.address,
                    gateway: ip.gateway,
                    netmask: ip.netmask,
                    nameservers: dhcp.name_servers,
                    disk: hw.spec.disks.first().map(|d| d.device.clone()).unwrap_or_default(),
                    labels: hw.metadata.labels.clone().unwrap_or_default(),
                    bmc: None,
                },
                bound,
            ));
        }
        Ok(out)
    }

    async fn list_rufio_machines(&self) -> Result<Vec<rufio::Machine>> {
        let api = self.rufio_machines();
        let lp = ListParams::default();
        let list = with_retries!("list rufio machines", api.list(&lp)).map_err(ErrorKind::KubeError)?;
        Ok(list.items)
    }
}

/// kubectl wrapper for the pieces kube 0.30 cannot express
///
/// Server-side apply with forced conflicts is the write path for every
/// rendered manifest; applying the same render twice produces no diffs.
pub async fn kubectl_apply(path: &Path, kubeconfig: Option<&Path>) -> Result<()> {
    let mut args: Vec<String> = vec![
        "apply".into(),
        "--server-side".into(),
        "--force-conflicts".into(),
        "-f".into(),
        path.display().to_string(),
    ];
    if let Some(kc) = kubeconfig {
        args.push("--kubeconfig".into());
        args.push(kc.display().to_string());
    }
    kexec("kubectl", args).await
}

/// Run a subprocess, surfacing stderr in logs and the exit code in errors
pub async fn kexec(cmd: &str, args: Vec<String>) -> Result<()> {
    debug!("{} {}", cmd, args.join(" "));
    let out = Command::new(cmd).args(&args).output().await?;
    let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
    if !stderr.is_empty() {
        warn!("{} stderr: {}", cmd, stderr);
    }
    if !out.status.success() {
        let code = out.status.code().unwrap_or(1001);
        return Err(ErrorKind::SubprocessFailure(cmd.to_string(), code).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::ClusterClient;

    #[test]
    fn annotation_patches() {
        let set = ClusterClient::annotation_patch("cluster.drydock.dev/paused", Some("true"));
        let v: serde_json::Value = serde_json::from_slice(&set).unwrap();
        assert_eq!(v["metadata"]["annotations"]["cluster.drydock.dev/paused"], "true");

        let unset = ClusterClient::annotation_patch("cluster.drydock.dev/paused", None);
        let v: serde_json::Value = serde_json::from_slice(&unset).unwrap();
        assert!(v["metadata"]["annotations"]["cluster.drydock.dev/paused"].is_null());
    }
}
