use regex::Regex;
use std::collections::BTreeMap;

use super::{ErrorKind, Result};
use crate::structs::{
    AutoScalingConfiguration, ClusterNetwork, ControlPlaneRolloutStrategy, ProxyConfiguration,
    RegistryMirror, Taint, WorkerRolloutStrategy,
};

/// A reference to a sibling document in the cluster spec file
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Ref {
    pub kind: String,
    pub name: String,
}

/// Host of the kube-vip style control plane endpoint
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Endpoint {
    pub host: String,
}

/// Control plane shape for a cluster
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ControlPlaneConfiguration {
    pub count: u32,

    /// Stable api-server endpoint; optional only for the docker sandbox
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machineGroupRef: Option<Ref>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgradeRolloutStrategy: Option<ControlPlaneRolloutStrategy>,
}

/// One worker node group
///
/// ```yaml
/// workerNodeGroupConfigurations:
/// - name: md-0
///   count: 2
///   machineGroupRef:
///     kind: VSphereMachineConfig
///     name: workers
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WorkerNodeGroupConfiguration {
    pub name: String,

    /// Desired machines; absent when the autoscaler owns the count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machineGroupRef: Option<Ref>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscalingConfiguration: Option<AutoScalingConfiguration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgradeRolloutStrategy: Option<WorkerRolloutStrategy>,
}

impl WorkerNodeGroupConfiguration {
    /// Machines the group wants right now (autoscaled groups start at min)
    pub fn desired_count(&self) -> u32 {
        if let Some(c) = self.count {
            return c;
        }
        self.autoscalingConfiguration.as_ref().map(|a| a.minCount).unwrap_or(1)
    }
}

/// External etcd topology; absent means stacked etcd
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExternalEtcdConfiguration {
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machineGroupRef: Option<Ref>,
}

/// Reference to the management cluster owning this one
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ManagementCluster {
    pub name: String,
}

/// The root cluster document of a spec file
///
/// Parsed from the `kind: Cluster` document; the name comes from the
/// document's metadata. Never mutated after `ClusterSpec` assembly.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Name from metadata.name; also the CAPI cluster name
    #[serde(default)]
    pub name: String,

    /// Target version, either `1.24` or a full `v1.24.2` tag
    pub kubernetesVersion: String,

    pub controlPlaneConfiguration: ControlPlaneConfiguration,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workerNodeGroupConfigurations: Vec<WorkerNodeGroupConfiguration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub externalEtcdConfiguration: Option<ExternalEtcdConfiguration>,

    pub clusterNetwork: ClusterNetwork,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxyConfiguration: Option<ProxyConfiguration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registryMirrorConfiguration: Option<RegistryMirror>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identityProviderRefs: Vec<Ref>,

    pub datacenterRef: Ref,

    /// Unset means this cluster manages itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managementCluster: Option<ManagementCluster>,
}

impl Default for ControlPlaneConfiguration {
    fn default() -> Self {
        ControlPlaneConfiguration {
            count: 1,
            endpoint: None,
            machineGroupRef: None,
            taints: vec![],
            labels: BTreeMap::new(),
            upgradeRolloutStrategy: None,
        }
    }
}

impl Cluster {
    pub fn verify(&self) -> Result<()> {
        // kube dns constraints on the name
        let name_re = Regex::new(r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$").unwrap();
        if !name_re.is_match(&self.name) {
            return Err(ErrorKind::InvalidClusterName(self.name.clone()).into());
        }
        if self.controlPlaneConfiguration.count == 0 {
            bail!("control plane count must be positive");
        }
        if let Some(strategy) = &self.controlPlaneConfiguration.upgradeRolloutStrategy {
            strategy.verify(self.controlPlaneConfiguration.count)?;
        }
        let mut seen = std::collections::BTreeSet::new();
        for group in &self.workerNodeGroupConfigurations {
            if !name_re.is_match(&group.name) {
                bail!("worker group name '{}' must be a dns label", group.name);
            }
            if !seen.insert(group.name.clone()) {
                bail!("worker group name '{}' is not unique", group.name);
            }
            if let Some(autoscaling) = &group.autoscalingConfiguration {
                autoscaling.verify()?;
            }
            if let Some(strategy) = &group.upgradeRolloutStrategy {
                strategy.verify(group.desired_count())?;
            }
        }
        if let Some(etcd) = &self.externalEtcdConfiguration {
            if etcd.count == 0 || etcd.count % 2 == 0 {
                bail!("external etcd count must be odd and at least 1, got {}", etcd.count);
            }
        }
        self.clusterNetwork.verify()?;
        if let Some(mirror) = &self.registryMirrorConfiguration {
            mirror.verify()?;
        }
        Ok(())
    }

    /// Whether this cluster hosts its own CAPI controllers
    pub fn is_self_managed(&self) -> bool {
        match &self.managementCluster {
            None => true,
            Some(m) => m.name == self.name,
        }
    }

    pub fn managed_by(&self) -> &str {
        match &self.managementCluster {
            Some(m) => &m.name,
            None => &self.name,
        }
    }

    /// Host of the control plane endpoint, if configured
    pub fn control_plane_endpoint(&self) -> Option<&str> {
        self.controlPlaneConfiguration.endpoint.as_ref().map(|e| e.host.as_str())
    }

    /// All machine group refs in (role, ref) form for resolution checks
    pub fn machine_group_refs(&self) -> Vec<(String, &Ref)> {
        let mut refs = vec![];
        if let Some(r) = &self.controlPlaneConfiguration.machineGroupRef {
            refs.push(("control plane".to_string(), r));
        }
        for group in &self.workerNodeGroupConfigurations {
            if let Some(r) = &group.machineGroupRef {
                refs.push((format!("worker group {}", group.name), r));
            }
        }
        if let Some(etcd) = &self.externalEtcdConfiguration {
            if let Some(r) = &etcd.machineGroupRef {
                refs.push(("external etcd".to_string(), r));
            }
        }
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::{CidrBlocks, ClusterNetwork};

    pub fn network() -> ClusterNetwork {
        ClusterNetwork {
            pods: CidrBlocks {
                cidrBlocks: vec!["192.168.0.0/16".into()],
            },
            services: CidrBlocks {
                cidrBlocks: vec!["10.96.0.0/12".into()],
            },
            dns: None,
        }
    }

    fn cluster() -> Cluster {
        Cluster {
            name: "mgmt".into(),
            kubernetesVersion: "1.23".into(),
            controlPlaneConfiguration: ControlPlaneConfiguration {
                count: 1,
                ..Default::default()
            },
            workerNodeGroupConfigurations: vec![WorkerNodeGroupConfiguration {
                name: "md-0".into(),
                count: Some(2),
                machineGroupRef: None,
                labels: BTreeMap::new(),
                taints: vec![],
                autoscalingConfiguration: None,
                upgradeRolloutStrategy: None,
            }],
            externalEtcdConfiguration: None,
            clusterNetwork: network(),
            proxyConfiguration: None,
            registryMirrorConfiguration: None,
            identityProviderRefs: vec![],
            datacenterRef: Ref {
                kind: "DockerDatacenterConfig".into(),
                name: "mgmt".into(),
            },
            managementCluster: None,
        }
    }

    #[test]
    fn valid_cluster_passes() {
        assert!(cluster().verify().is_ok());
        assert!(cluster().is_self_managed());
    }

    #[test]
    fn bad_names_fail() {
        let mut c = cluster();
        c.name = "Uppercase".into();
        assert!(c.verify().is_err());
        c.name = "-leading-dash".into();
        assert!(c.verify().is_err());
    }

    #[test]
    fn duplicate_worker_groups_fail() {
        let mut c = cluster();
        let dup = c.workerNodeGroupConfigurations[0].clone();
        c.workerNodeGroupConfigurations.push(dup);
        assert!(c.verify().is_err());
    }

    #[test]
    fn even_etcd_count_fails() {
        let mut c = cluster();
        c.externalEtcdConfiguration = Some(ExternalEtcdConfiguration {
            count: 2,
            machineGroupRef: None,
        });
        assert!(c.verify().is_err());
        c.externalEtcdConfiguration = Some(ExternalEtcdConfiguration {
            count: 3,
            machineGroupRef: None,
        });
        assert!(c.verify().is_ok());
    }

    #[test]
    fn managed_cluster_resolution() {
        let mut c = cluster();
        c.managementCluster = Some(ManagementCluster { name: "mgmt".into() });
        assert!(c.is_self_managed()); // points at itself
        c.managementCluster = Some(ManagementCluster { name: "corp-mgmt".into() });
        assert!(!c.is_self_managed());
        assert_eq!(c.managed_by(), "corp-mgmt");
    }
}
