use chrono::Utc;
use std::path::{Path, PathBuf};

use crate::capi;
use crate::kubeapi::ClusterApi;
use crate::PhaseResultExt;
use drydock_definitions::{Catalogue, ClusterSpec};

use super::{wait, LifecycleOrchestrator};
use crate::Result;

impl LifecycleOrchestrator {
    /// Drive a workload create against the management cluster
    ///
    /// Returns the path of the workload kubeconfig; networking and storage
    /// installation run against the workload cluster afterwards via
    /// `finish_workload_setup`.
    pub async fn create_workload(
        &self,
        management: &dyn ClusterApi,
        spec: &ClusterSpec,
        catalogue: Option<&Catalogue>,
    ) -> Result<PathBuf> {
        let name = spec.name();
        let reconciler = self.registry.get(spec.provider())?;

        reconciler
            .adapter()
            .validate_create(management, spec, catalogue, self.timeouts.bmc, &self.cancel)
            .await
            .phase("validating create preconditions")?;

        // render, keep the artifact, force-apply
        let rendered = reconciler
            .render_for_create(spec, &Utc::now(), &[])
            .phase("rendering cluster manifests")?;
        self.writer
            .write_capi_manifests(name, &rendered.combined())
            .phase("writing cluster manifest artifact")?;
        management
            .apply_manifests("cluster", &rendered.combined())
            .await
            .phase("applying cluster manifests")?;

        // machine health checks carry the unhealthy/node-startup bounds
        let mhc = super::machine_health_checks(name, &self.timeouts)?;
        management
            .apply_manifests("machine-health-checks", &mhc)
            .await
            .phase("applying machine health checks")?;

        // etcd first when it is external
        if spec.cluster.externalEtcdConfiguration.is_some() {
            wait::etcd_ready(
                management,
                &capi::etcd_cluster_name(name),
                self.timeouts.external_etcd,
                &self.cancel,
            )
            .await
            .phase("waiting for external etcd")?;
        }

        // then the control plane
        wait::control_plane_ready(management, name, self.timeouts.control_plane, &self.cancel)
            .await
            .phase("waiting for control plane")?;

        // fetch, rewrite, persist the workload kubeconfig
        let raw = management
            .workload_kubeconfig(name)
            .await
            .phase("fetching workload kubeconfig")?;
        let rewritten = reconciler
            .adapter()
            .rewrite_kubeconfig(spec, raw)
            .phase("rewriting workload kubeconfig")?;
        let kubeconfig = self
            .writer
            .write_kubeconfig(name, &rewritten)
            .phase("writing workload kubeconfig")?;

        // every machine joined and healthy
        wait::machines_ready(
            management,
            spec,
            self.timeouts.machines,
            self.timeouts.machine_backoff(),
            &self.cancel,
        )
        .await
        .phase("waiting for machines")?;

        Ok(kubeconfig)
    }

    /// Networking then the provider's storage class, on the workload side
    pub async fn finish_workload_setup(&self, workload: &dyn ClusterApi, spec: &ClusterSpec) -> Result<()> {
        let reconciler = self.registry.get(spec.provider())?;

        self.networking
            .install(workload, spec)
            .await
            .phase("installing networking")?;

        if let Some(manifest) = reconciler.adapter().storage_class_manifest(spec) {
            workload
                .apply_manifests("storage-class", manifest.as_bytes())
                .await
                .phase("installing storage class")?;
        }
        Ok(())
    }

    /// Post-create hook for curated package manifests handed in by the user
    ///
    /// A license from the environment lands as a secret first so the
    /// package controllers can pick it up.
    pub async fn install_packages(&self, workload: &dyn ClusterApi, path: &Path) -> Result<()> {
        if let Ok(license) = std::env::var("DRYDOCK_LICENSE") {
            let secret = serde_json::json!({
                "apiVersion": "v1",
                "kind": "Secret",
                "metadata": { "name": "drydock-license", "namespace": crate::capi::SYSTEM_NAMESPACE },
                "stringData": { "license": license },
            });
            let body = serde_yaml::to_string(&secret)?;
            workload
                .apply_manifests("license", body.as_bytes())
                .await
                .phase("installing license secret")?;
        }
        let manifests = std::fs::read(path)?;
        workload
            .apply_manifests("packages", &manifests)
            .await
            .phase("installing packages")
    }
}
