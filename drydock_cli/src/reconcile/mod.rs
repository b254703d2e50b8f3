use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tera::Context;

use crate::capi;
use crate::kubeapi::ClusterApi;
use crate::render::{self, values, BuildOption, RenderedCluster, TemplateRenderer};
use crate::retry::CancellationToken;
use drydock_definitions::status::ETCD_UPGRADE_IN_PROGRESS_ANNOTATION;
use drydock_definitions::{Catalogue, ClusterSpec, ProviderKind};

use super::{Result, ResultExt};

/// Operation detection state machine
pub mod operation;
pub use self::operation::{detect, removed_groups, NamePlan, Operation};

/// Template name construction and rotation
pub mod names;

/// The per-provider template sets and hooks
pub mod providers;

/// What a provider contributes to the shared reconciler skeleton
///
/// The skeleton owns deciding, naming and rendering; adapters carry the
/// provider template text, placement values and lifecycle hooks.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;
    fn control_plane_template(&self) -> &'static str;
    fn workers_template(&self) -> &'static str;

    /// Placement values for the control plane (and anything cluster-wide)
    fn control_plane_context(&self, spec: &ClusterSpec, ctx: &mut Context) -> Result<()>;

    /// Placement values for one worker group
    fn worker_group_context(&self, spec: &ClusterSpec, group: &str, ctx: &mut Context) -> Result<()>;

    /// Provider pre-flight before a create (hardware checks on bare metal)
    async fn validate_create(
        &self,
        _client: &dyn ClusterApi,
        _spec: &ClusterSpec,
        _catalogue: Option<&Catalogue>,
        _bmc_timeout: std::time::Duration,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        Ok(())
    }

    /// Provider pre-flight before an upgrade or scale
    async fn validate_upgrade(
        &self,
        _client: &dyn ClusterApi,
        _current: &ClusterSpec,
        _new: &ClusterSpec,
        _operation: &Operation,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        Ok(())
    }

    /// Endpoint substitution etc. on the fetched workload kubeconfig
    fn rewrite_kubeconfig(&self, _spec: &ClusterSpec, raw: Vec<u8>) -> Result<Vec<u8>> {
        Ok(raw)
    }

    async fn post_control_plane_upgrade(&self, _client: &dyn ClusterApi, _spec: &ClusterSpec) -> Result<()> {
        Ok(())
    }

    /// Storage class applied to the workload cluster after networking
    fn storage_class_manifest(&self, _spec: &ClusterSpec) -> Option<String> {
        None
    }

    async fn post_cluster_delete_validate(&self, _client: &dyn ClusterApi, _cluster: &str) -> Result<()> {
        Ok(())
    }
}

/// Outcome of an upgrade render
#[derive(Debug)]
pub enum UpgradeRender {
    /// The no-op sentinel: nothing differs, nothing to apply
    NoChange,
    Changed {
        operation: Operation,
        rendered: RenderedCluster,
    },
}

/// One provider's reconciler: decide, name, render
///
/// Borrows a client per call; several reconcilers may share one client.
#[derive(Clone)]
pub struct ProviderReconciler {
    adapter: Arc<dyn ProviderAdapter>,
}

impl ProviderReconciler {
    pub fn new(adapter: Arc<dyn ProviderAdapter>) -> Self {
        ProviderReconciler { adapter }
    }

    pub fn kind(&self) -> ProviderKind {
        self.adapter.kind()
    }

    pub fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
        &self.adapter
    }

    /// Render everything for a brand new cluster with fresh template names
    pub fn render_for_create(
        &self,
        spec: &ClusterSpec,
        now: &DateTime<Utc>,
        opts: &[BuildOption],
    ) -> Result<RenderedCluster> {
        let plan = NamePlan::for_create(spec, now);
        self.render_with_plan(spec, &plan, opts)
    }

    /// Decide the operation against current state and render accordingly
    pub async fn render_for_upgrade(
        &self,
        client: &dyn ClusterApi,
        current_spec: &ClusterSpec,
        new_spec: &ClusterSpec,
        now: &DateTime<Utc>,
        opts: &[BuildOption],
        cancel: &CancellationToken,
    ) -> Result<UpgradeRender> {
        let name = new_spec.name();
        let current_kcp = client.get_kubeadm_control_plane(name).await?;
        let current_mds = client.list_machine_deployments(name).await?;

        let op = detect(current_spec, new_spec, current_kcp.as_ref(), &current_mds)?;
        if op == Operation::NoChange {
            debug!("{}: nothing to reconcile", name);
            return Ok(UpgradeRender::NoChange);
        }

        // provider pre-flight runs before anything observable happens
        self.adapter
            .validate_upgrade(client, current_spec, new_spec, &op, cancel)
            .await?;

        let current_etcd_template = match &new_spec.cluster.externalEtcdConfiguration {
            Some(_) => client
                .get_etcd_cluster(&capi::etcd_cluster_name(name))
                .await?
                .and_then(|e| e.spec.infrastructureTemplate.map(|t| t.name)),
            None => None,
        };

        // the external etcd ordering constraint: flag the etcd cluster as
        // upgrading before any new control plane template exists
        if op == Operation::VersionUpgrade && new_spec.cluster.externalEtcdConfiguration.is_some() {
            info!("{}: marking etcd upgrade in progress", name);
            client
                .annotate_etcd_cluster(
                    &capi::etcd_cluster_name(name),
                    ETCD_UPGRADE_IN_PROGRESS_ANNOTATION,
                    Some("true"),
                )
                .await?;
        }

        let plan = NamePlan::for_upgrade(
            new_spec,
            &op,
            current_kcp.as_ref(),
            &current_mds,
            current_etcd_template,
            now,
        );
        let mut rendered = self.render_with_plan(new_spec, &plan, opts)?;

        if op == Operation::ScaleOnly {
            // callers apply the residual to mutate replicas without rotation
            let kind = self.adapter.kind().machine_template_kind();
            rendered.control_plane = render::strip_documents_of_kind(&rendered.control_plane, kind)?;
            rendered.workers = render::strip_documents_of_kind(&rendered.workers, kind)?;
        }

        Ok(UpgradeRender::Changed {
            operation: op,
            rendered,
        })
    }

    /// Render with explicit template name mappings (the workers entry point)
    pub fn render_workers(
        &self,
        spec: &ClusterSpec,
        workload_template_names: &BTreeMap<String, String>,
        kubeadm_config_template_names: &BTreeMap<String, String>,
        opts: &[BuildOption],
    ) -> Result<Vec<u8>> {
        let base = render::context_for(spec, opts)?;
        let mut parts: Vec<String> = vec![];
        for group in &spec.cluster.workerNodeGroupConfigurations {
            let machine_template = workload_template_names
                .get(&group.name)
                .ok_or_else(|| format!("no workload template name for group {}", group.name))?;
            let kubeadm_template = kubeadm_config_template_names
                .get(&group.name)
                .ok_or_else(|| format!("no kubeadmconfig template name for group {}", group.name))?;
            let mut ctx = values::worker_context(spec, &base, &group.name, machine_template, kubeadm_template)?;
            self.adapter.worker_group_context(spec, &group.name, &mut ctx)?;
            let doc = TemplateRenderer::render(self.adapter.workers_template(), &ctx)
                .chain_err(|| format!("rendering worker group {}", group.name))?;
            parts.push(doc.trim_end().to_string());
        }
        let mut out = parts.join(render::DOC_SEPARATOR);
        out = self.mirror_substituted(spec, out);
        Ok(out.into_bytes())
    }

    fn render_with_plan(&self, spec: &ClusterSpec, plan: &NamePlan, opts: &[BuildOption]) -> Result<RenderedCluster> {
        // control plane
        let mut ctx = render::context_for(spec, opts)?;
        ctx.insert("controlPlaneTemplateName", &plan.control_plane);
        if let Some(etcd_template) = &plan.etcd {
            ctx.insert("etcdTemplateName", etcd_template);
        }
        self.adapter.control_plane_context(spec, &mut ctx)?;
        let cp = TemplateRenderer::render(self.adapter.control_plane_template(), &ctx)
            .chain_err(|| "rendering control plane")?;
        let cp = self.mirror_substituted(spec, cp);

        // workers (empty document for a single-node cluster)
        let workers = if spec.cluster.workerNodeGroupConfigurations.is_empty() {
            Vec::new()
        } else {
            let machine_names: BTreeMap<String, String> = plan
                .workers
                .iter()
                .map(|(g, n)| (g.clone(), n.machine_template.clone()))
                .collect();
            let kubeadm_names: BTreeMap<String, String> = plan
                .workers
                .iter()
                .map(|(g, n)| (g.clone(), n.kubeadm_config_template.clone()))
                .collect();
            self.render_workers(spec, &machine_names, &kubeadm_names, opts)?
        };

        Ok(RenderedCluster {
            control_plane: cp.into_bytes(),
            workers,
        })
    }

    fn mirror_substituted(&self, spec: &ClusterSpec, rendered: String) -> String {
        match &spec.cluster.registryMirrorConfiguration {
            Some(mirror) => render::substitute_mirror(&rendered, &mirror.public_mirror_endpoint()),
            None => rendered,
        }
    }
}

/// Dispatcher keyed by provider kind
///
/// Unknown kinds are logged and ignored so newer spec files degrade
/// gracefully on older binaries.
#[derive(Default)]
pub struct ReconcilerRegistry {
    table: BTreeMap<ProviderKind, ProviderReconciler>,
}

impl ReconcilerRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, reconciler: ProviderReconciler) {
        self.table.insert(reconciler.kind(), reconciler);
    }

    pub fn lookup(&self, kind: ProviderKind) -> Option<&ProviderReconciler> {
        let found = self.table.get(&kind);
        if found.is_none() {
            warn!("no reconciler registered for provider '{}' - ignoring", kind);
        }
        found
    }

    pub fn get(&self, kind: ProviderKind) -> Result<&ProviderReconciler> {
        self.table
            .get(&kind)
            .ok_or_else(|| super::ErrorKind::UnknownProvider(kind.to_string()).into())
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.table.keys().cloned().collect()
    }
}
