use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::orchestrate::{ArtifactWriter, CapiMover, Clusterctl, LifecycleOrchestrator, ManifestNetworking,
                         Networking, Timeouts};
use crate::reconcile::providers::{cloudstack::CloudStackAdapter, docker::DockerAdapter,
                                  nutanix::NutanixAdapter, snow::SnowAdapter,
                                  tinkerbell::TinkerbellAdapter, vsphere::VSphereAdapter};
use crate::reconcile::{ProviderReconciler, ReconcilerRegistry};
use crate::retry::CancellationToken;
use drydock_definitions::ClusterSpec;

use super::Result;

/// What one build step is allowed to fill in
#[derive(Default)]
struct Artifacts {
    registry: Option<Arc<ReconcilerRegistry>>,
    networking: Option<Arc<dyn Networking>>,
    mover: Option<Arc<dyn CapiMover>>,
    writer: Option<ArtifactWriter>,
}

type BuildStep = Box<dyn FnMut(&mut Artifacts) -> Result<()>>;

/// Lazy, idempotent assembly of the orchestrator's dependency set
///
/// Each registered step is guarded by a none-check on the artifact it
/// constructs, so re-running the steps is free; ordering comes from
/// append-only registration rather than an explicit dependency graph.
pub struct FactoryBuilder {
    steps: Vec<BuildStep>,
    artifacts: Artifacts,
    timeouts: Timeouts,
    cancel: CancellationToken,
}

impl FactoryBuilder {
    pub fn new() -> Self {
        FactoryBuilder {
            steps: vec![],
            artifacts: Artifacts::default(),
            timeouts: Timeouts::default(),
            cancel: CancellationToken::new(),
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

    /// Every known provider reconciler into the dispatch table
    pub fn with_all_providers(mut self) -> Self {
        self.steps.push(Box::new(|artifacts| {
            if artifacts.registry.is_some() {
                return Ok(());
            }
            let mut registry = ReconcilerRegistry::new();
            registry.insert(ProviderReconciler::new(Arc::new(DockerAdapter)));
            registry.insert(ProviderReconciler::new(Arc::new(VSphereAdapter)));
            registry.insert(ProviderReconciler::new(Arc::new(SnowAdapter)));
            registry.insert(ProviderReconciler::new(Arc::new(TinkerbellAdapter)));
            registry.insert(ProviderReconciler::new(Arc::new(CloudStackAdapter)));
            registry.insert(ProviderReconciler::new(Arc::new(NutanixAdapter)));
            artifacts.registry = Some(Arc::new(registry));
            Ok(())
        }));
        self
    }

    /// Networking payload pinned to this spec's bundle
    pub fn with_networking(mut self, spec: &ClusterSpec) -> Self {
        let payload = ManifestNetworking::cilium(spec);
        let mut payload = Some(payload);
        self.steps.push(Box::new(move |artifacts| {
            if artifacts.networking.is_some() {
                return Ok(());
            }
            if let Some(p) = payload.take() {
                artifacts.networking = Some(Arc::new(p));
            }
            Ok(())
        }));
        self
    }

    /// The external clusterctl mover
    pub fn with_clusterctl(mut self) -> Self {
        self.steps.push(Box::new(|artifacts| {
            if artifacts.mover.is_some() {
                return Ok(());
            }
            artifacts.mover = Some(Arc::new(Clusterctl));
            Ok(())
        }));
        self
    }

    /// Artifact directory for rendered specs and kubeconfigs
    pub fn with_artifact_dir(mut self, base: PathBuf) -> Self {
        self.steps.push(Box::new(move |artifacts| {
            if artifacts.writer.is_some() {
                return Ok(());
            }
            artifacts.writer = Some(ArtifactWriter::new(&base));
            Ok(())
        }));
        self
    }

    /// Build with a pre-made mover (tests script the external move)
    pub fn build_with_mover(mut self, mover: Arc<dyn CapiMover>) -> Result<LifecycleOrchestrator> {
        self.artifacts.mover = Some(mover);
        self.build()
    }

    /// Run the registered steps in order and assemble the orchestrator
    pub fn build(mut self) -> Result<LifecycleOrchestrator> {
        for step in &mut self.steps {
            step(&mut self.artifacts)?;
        }
        let registry = self
            .artifacts
            .registry
            .take()
            .ok_or("factory built without providers")?;
        let networking = self
            .artifacts
            .networking
            .take()
            .ok_or("factory built without networking")?;
        let mover = self.artifacts.mover.take().ok_or("factory built without a mover")?;
        let writer = self
            .artifacts
            .writer
            .take()
            .unwrap_or_else(|| ArtifactWriter::new(Path::new(".")));
        Ok(LifecycleOrchestrator::new(registry, networking, mover, writer)
            .with_timeouts(self.timeouts)
            .with_cancellation(self.cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::FactoryBuilder;
    use drydock_definitions::{ClusterSpec, ProviderKind};

    const SPEC: &str = r#"
apiVersion: drydock.dev/v1alpha1
kind: Cluster
metadata:
  name: mgmt
spec:
  kubernetesVersion: "1.24"
  controlPlaneConfiguration:
    count: 1
    machineGroupRef:
      kind: DockerMachineConfig
      name: mgmt-cp
  clusterNetwork:
    pods:
      cidrBlocks: ["192.168.0.0/16"]
    services:
      cidrBlocks: ["10.96.0.0/12"]
  datacenterRef:
    kind: DockerDatacenterConfig
    name: mgmt
---
apiVersion: drydock.dev/v1alpha1
kind: DockerDatacenterConfig
metadata:
  name: mgmt
spec: {}
---
apiVersion: drydock.dev/v1alpha1
kind: DockerMachineConfig
metadata:
  name: mgmt-cp
spec: {}
"#;

    #[test]
    fn builds_with_every_provider_registered() {
        let spec = ClusterSpec::from_str(SPEC, None).unwrap();
        let orchestrator = FactoryBuilder::new()
            .with_all_providers()
            .with_networking(&spec)
            .with_clusterctl()
            .with_artifact_dir(std::env::temp_dir())
            .build()
            .unwrap();
        let mut kinds = orchestrator.registry.kinds();
        kinds.sort();
        assert_eq!(kinds.len(), 6);
        assert!(orchestrator.registry.get(ProviderKind::Tinkerbell).is_ok());
        assert!(orchestrator.registry.lookup(ProviderKind::VSphere).is_some());
    }

    #[test]
    fn steps_are_idempotent() {
        // registering the same concern twice only constructs it once
        let spec = ClusterSpec::from_str(SPEC, None).unwrap();
        let orchestrator = FactoryBuilder::new()
            .with_all_providers()
            .with_all_providers()
            .with_networking(&spec)
            .with_clusterctl()
            .with_clusterctl()
            .build()
            .unwrap();
        assert_eq!(orchestrator.registry.kinds().len(), 6);
    }
}
