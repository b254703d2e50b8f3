//- drydock's own persisted cluster resource
use drydock_definitions::cluster::Cluster as ClusterConfig;
use drydock_definitions::ClusterStatus;
use kube_derive::CustomResource;

/// The persisted cluster object, `clusters.drydock.dev`
///
/// The spec is exactly the Cluster document from a spec file; controllers
/// and the cli coordinate through its annotations and status.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone)]
#[kube(
    group = "drydock.dev",
    kind = "Cluster",
    version = "v1alpha1",
    namespaced,
    status = "ClusterStatus"
)]
pub struct ClusterCrdSpec {
    #[serde(flatten)]
    pub config: ClusterConfig,
}

impl Cluster {
    /// The workload clusters a management cluster owns, out of a listing
    pub fn manages<'a>(&self, all: &'a [Cluster]) -> Vec<&'a Cluster> {
        all.iter()
            .filter(|c| !c.spec.config.is_self_managed() && self.metadata.name.as_deref() == Some(c.spec.config.managed_by()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Cluster, ClusterCrdSpec};
    use drydock_definitions::cluster::{Cluster as ClusterConfig, ManagementCluster};

    fn crd(name: &str, managed_by: Option<&str>) -> Cluster {
        let raw = r#"
kubernetesVersion: "1.23"
controlPlaneConfiguration:
  count: 1
clusterNetwork:
  pods:
    cidrBlocks: ["192.168.0.0/16"]
  services:
    cidrBlocks: ["10.96.0.0/12"]
datacenterRef:
  kind: DockerDatacenterConfig
  name: mgmt
"#;
        let mut config: ClusterConfig = serde_yaml::from_str(raw).unwrap();
        config.name = name.into();
        config.managementCluster = managed_by.map(|m| ManagementCluster { name: m.into() });
        let mut c = Cluster::new(name, ClusterCrdSpec { config });
        c.metadata.name = name.into();
        c
    }

    #[test]
    fn management_ownership() {
        let mgmt = crd("mgmt", None);
        let all = vec![crd("mgmt", None), crd("w0", Some("mgmt")), crd("w1", Some("other"))];
        let owned = mgmt.manages(&all);
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].metadata.name, "w0");
    }
}
