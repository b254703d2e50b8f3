use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::capi::{KubeadmControlPlane, MachineDeployment};
use drydock_definitions::ClusterSpec;

use super::super::{ErrorKind, Result};
use super::names;

/// What one reconciliation has decided to do
///
/// The admission surface rejects mixed intents: replica changes may not ride
/// along with anything that rotates templates.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// No control plane on the cluster yet; everything gets fresh names
    NewCluster,
    /// Nothing differs; the reconciler returns its no-op sentinel
    NoChange,
    /// Only replica counts differ; machine templates are stripped from output
    ScaleOnly,
    /// Kubernetes version changed; every template rotates
    VersionUpgrade,
    /// Machine attributes changed for these worker groups only
    WorkloadTemplateChange(Vec<String>),
    /// Kubeadm config fields changed for these worker groups only
    KubeadmConfigChange(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq)]
struct GroupDiff {
    added: bool,
    scaled: bool,
    machine_changed: bool,
    kubeadm_changed: bool,
}

/// Detect the operation by diffing desired state against current
pub fn detect(
    current: &ClusterSpec,
    new: &ClusterSpec,
    current_kcp: Option<&KubeadmControlPlane>,
    _current_mds: &[MachineDeployment],
) -> Result<Operation> {
    if current_kcp.is_none() {
        return Ok(Operation::NewCluster);
    }

    let version_changed = current.bundle.kubernetesVersion != new.bundle.kubernetesVersion;

    let cp_cur = &current.cluster.controlPlaneConfiguration;
    let cp_new = &new.cluster.controlPlaneConfiguration;
    let cp_scaled = cp_cur.count != cp_new.count;
    let cp_machine_changed = current.control_plane_machine()? != new.control_plane_machine()?
        || cp_cur.endpoint != cp_new.endpoint
        || cp_cur.taints != cp_new.taints
        || cp_cur.labels != cp_new.labels;

    // cluster-wide fields that land in every rendered template
    let shared_changed = current.cluster.clusterNetwork != new.cluster.clusterNetwork
        || current.cluster.proxyConfiguration != new.cluster.proxyConfiguration
        || current.cluster.registryMirrorConfiguration != new.cluster.registryMirrorConfiguration
        || current.cluster.externalEtcdConfiguration != new.cluster.externalEtcdConfiguration;

    let mut groups: BTreeMap<String, GroupDiff> = BTreeMap::new();
    for g_new in &new.cluster.workerNodeGroupConfigurations {
        let mut diff = GroupDiff::default();
        match current
            .cluster
            .workerNodeGroupConfigurations
            .iter()
            .find(|g| g.name == g_new.name)
        {
            None => diff.added = true,
            Some(g_cur) => {
                diff.scaled = g_cur.desired_count() != g_new.desired_count();
                diff.machine_changed =
                    current.worker_machine(&g_cur.name)? != new.worker_machine(&g_new.name)?;
                diff.kubeadm_changed = g_cur.taints != g_new.taints
                    || g_cur.labels != g_new.labels
                    || g_cur.upgradeRolloutStrategy != g_new.upgradeRolloutStrategy;
            }
        }
        groups.insert(g_new.name.clone(), diff);
    }

    let machine_groups: Vec<String> = groups
        .iter()
        .filter(|(_, d)| d.machine_changed || d.added)
        .map(|(name, _)| name.clone())
        .collect();
    let kubeadm_groups: Vec<String> = groups
        .iter()
        .filter(|(_, d)| d.kubeadm_changed)
        .map(|(name, _)| name.clone())
        .collect();

    let rolling = version_changed
        || cp_machine_changed
        || shared_changed
        || !machine_groups.is_empty()
        || !kubeadm_groups.is_empty();
    let scaled = cp_scaled || groups.values().any(|d| d.scaled);

    if rolling && scaled {
        return Err(ErrorKind::PolicyViolation(
            "replica changes cannot be combined with an upgrade in one step".into(),
        )
        .into());
    }
    if version_changed {
        return Ok(Operation::VersionUpgrade);
    }
    if cp_machine_changed || shared_changed {
        // control plane attribute changes roll everything that embeds them
        return Ok(Operation::VersionUpgrade);
    }
    if !machine_groups.is_empty() {
        return Ok(Operation::WorkloadTemplateChange(machine_groups));
    }
    if !kubeadm_groups.is_empty() {
        return Ok(Operation::KubeadmConfigChange(kubeadm_groups));
    }
    if scaled {
        return Ok(Operation::ScaleOnly);
    }
    Ok(Operation::NoChange)
}

/// Worker groups present on the cluster but absent from the new spec
pub fn removed_groups(new: &ClusterSpec, current_mds: &[MachineDeployment]) -> Vec<String> {
    let keep: Vec<String> = new
        .cluster
        .workerNodeGroupConfigurations
        .iter()
        .map(|g| names::machine_deployment_name(new.name(), &g.name))
        .collect();
    current_mds
        .iter()
        .filter_map(|md| md.metadata.name.clone())
        .filter(|name| !keep.contains(name))
        .collect()
}

/// The template names one render will use
///
/// Rotation is decided per object: a fresh timestamped name when this
/// reconciliation requires node re-creation for it, the verbatim on-cluster
/// name otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct NamePlan {
    pub control_plane: String,
    pub etcd: Option<String>,
    pub workers: BTreeMap<String, GroupNames>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupNames {
    pub machine_template: String,
    pub kubeadm_config_template: String,
}

impl NamePlan {
    /// Fresh names across the board for a new cluster
    pub fn for_create(spec: &ClusterSpec, now: &DateTime<Utc>) -> NamePlan {
        let cluster = spec.name();
        let mut workers = BTreeMap::new();
        for g in &spec.cluster.workerNodeGroupConfigurations {
            workers.insert(
                g.name.clone(),
                GroupNames {
                    machine_template: names::timestamped(&names::worker_machine_template_base(cluster, &g.name), now),
                    kubeadm_config_template: names::timestamped(&names::kubeadm_config_template_base(cluster, &g.name), now),
                },
            );
        }
        NamePlan {
            control_plane: names::timestamped(&names::control_plane_template_base(cluster), now),
            etcd: spec
                .cluster
                .externalEtcdConfiguration
                .as_ref()
                .map(|_| names::timestamped(&names::etcd_template_base(cluster), now)),
            workers,
        }
    }

    /// Rotate or preserve names for an upgrade, based on the operation
    pub fn for_upgrade(
        spec: &ClusterSpec,
        operation: &Operation,
        current_kcp: Option<&KubeadmControlPlane>,
        current_mds: &[MachineDeployment],
        current_etcd_template: Option<String>,
        now: &DateTime<Utc>,
    ) -> NamePlan {
        let cluster = spec.name();
        let rotate_cp = match operation {
            Operation::NewCluster | Operation::VersionUpgrade => true,
            _ => false,
        };
        let control_plane = if rotate_cp {
            names::timestamped(&names::control_plane_template_base(cluster), now)
        } else {
            current_kcp
                .and_then(|kcp| kcp.machine_template_name())
                .unwrap_or_else(|| names::timestamped(&names::control_plane_template_base(cluster), now))
        };

        // external etcd template rotation on upgrade stays off; the current
        // name is reused verbatim even across version bumps
        let etcd = spec.cluster.externalEtcdConfiguration.as_ref().map(|_| {
            current_etcd_template
                .clone()
                .unwrap_or_else(|| names::timestamped(&names::etcd_template_base(cluster), now))
        });

        let mut workers = BTreeMap::new();
        for g in &spec.cluster.workerNodeGroupConfigurations {
            let md_name = names::machine_deployment_name(cluster, &g.name);
            let current_md = current_mds.iter().find(|md| md.metadata.name.as_deref() == Some(md_name.as_str()));
            let current_machine_template = current_md.and_then(|md| {
                md.spec
                    .template
                    .as_ref()
                    .and_then(|t| t.spec.as_ref())
                    .and_then(|s| s.infrastructureRef.as_ref())
                    .map(|r| r.name.clone())
            });
            let current_kubeadm_template = current_md.and_then(|md| {
                md.spec
                    .template
                    .as_ref()
                    .and_then(|t| t.spec.as_ref())
                    .and_then(|s| s.bootstrap.as_ref())
                    .and_then(|b| b.configRef.as_ref())
                    .map(|r| r.name.clone())
            });

            let rotate_machine = match operation {
                Operation::NewCluster | Operation::VersionUpgrade => true,
                Operation::WorkloadTemplateChange(groups) => groups.contains(&g.name),
                _ => current_machine_template.is_none(),
            };
            let rotate_kubeadm = match operation {
                Operation::NewCluster | Operation::VersionUpgrade => true,
                Operation::KubeadmConfigChange(groups) => groups.contains(&g.name),
                Operation::WorkloadTemplateChange(groups) => groups.contains(&g.name) && current_kubeadm_template.is_none(),
                _ => current_kubeadm_template.is_none(),
            };

            let machine_template = if rotate_machine {
                names::timestamped(&names::worker_machine_template_base(cluster, &g.name), now)
            } else {
                current_machine_template
                    .unwrap_or_else(|| names::timestamped(&names::worker_machine_template_base(cluster, &g.name), now))
            };
            let kubeadm_config_template = if rotate_kubeadm {
                names::timestamped(&names::kubeadm_config_template_base(cluster, &g.name), now)
            } else {
                current_kubeadm_template
                    .unwrap_or_else(|| names::timestamped(&names::kubeadm_config_template_base(cluster, &g.name), now))
            };
            workers.insert(
                g.name.clone(),
                GroupNames {
                    machine_template,
                    kubeadm_config_template,
                },
            );
        }

        NamePlan {
            control_plane,
            etcd,
            workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capi::{Bootstrap, KcpMachineTemplate, KubeadmControlPlane, KubeadmControlPlaneSpec,
                      MachineDeployment, MachineDeploymentSpec, MachineSpecTemplate, MachineTemplateSpec,
                      ObjectRef};
    use chrono::{TimeZone, Utc};
    use drydock_definitions::ClusterSpec;

    const SPEC: &str = r#"
apiVersion: drydock.dev/v1alpha1
kind: Cluster
metadata:
  name: mgmt
spec:
  kubernetesVersion: "1.23"
  controlPlaneConfiguration:
    count: 1
    endpoint:
      host: 10.20.30.40
    machineGroupRef:
      kind: VSphereMachineConfig
      name: mgmt-cp
  workerNodeGroupConfigurations:
  - name: md-0
    count: 1
    machineGroupRef:
      kind: VSphereMachineConfig
      name: mgmt-workers
  clusterNetwork:
    pods:
      cidrBlocks: ["192.168.0.0/16"]
    services:
      cidrBlocks: ["10.96.0.0/12"]
  datacenterRef:
    kind: VSphereDatacenterConfig
    name: mgmt
---
apiVersion: drydock.dev/v1alpha1
kind: VSphereDatacenterConfig
metadata:
  name: mgmt
spec:
  server: vcenter.corp
  datacenter: dc-1
  network: net
---
apiVersion: drydock.dev/v1alpha1
kind: VSphereMachineConfig
metadata:
  name: mgmt-cp
spec:
  datastore: ds
  folder: f
  network: net
  resourcePool: rp
  template: ubuntu-kube
  memoryMiB: 8192
  numCPUs: 2
  diskGiB: 25
---
apiVersion: drydock.dev/v1alpha1
kind: VSphereMachineConfig
metadata:
  name: mgmt-workers
spec:
  datastore: ds
  folder: f
  network: net
  resourcePool: rp
  template: ubuntu-kube
  memoryMiB: 8192
  numCPUs: 2
  diskGiB: 25
"#;

    fn spec() -> ClusterSpec {
        ClusterSpec::from_str(SPEC, None).unwrap()
    }

    fn kcp(template: &str) -> KubeadmControlPlane {
        let mut kcp = KubeadmControlPlane::new(
            "mgmt",
            KubeadmControlPlaneSpec {
                replicas: Some(1),
                version: "v1.23.7".into(),
                machineTemplate: Some(KcpMachineTemplate {
                    infrastructureRef: ObjectRef {
                        kind: "VSphereMachineTemplate".into(),
                        name: template.into(),
                        ..Default::default()
                    },
                }),
            },
        );
        kcp.metadata.name = "mgmt".into();
        kcp
    }

    fn md(name: &str, machine_template: &str, kubeadm_template: &str) -> MachineDeployment {
        let mut md = MachineDeployment::new(
            name,
            MachineDeploymentSpec {
                clusterName: "mgmt".into(),
                replicas: Some(1),
                template: Some(MachineTemplateSpec {
                    spec: Some(MachineSpecTemplate {
                        version: Some("v1.23.7".into()),
                        bootstrap: Some(Bootstrap {
                            configRef: Some(ObjectRef {
                                kind: "KubeadmConfigTemplate".into(),
                                name: kubeadm_template.into(),
                                ..Default::default()
                            }),
                        }),
                        infrastructureRef: Some(ObjectRef {
                            kind: "VSphereMachineTemplate".into(),
                            name: machine_template.into(),
                            ..Default::default()
                        }),
                    }),
                }),
            },
        );
        md.metadata.name = name.into();
        md
    }

    #[test]
    fn no_kcp_means_new_cluster() {
        let s = spec();
        assert_eq!(detect(&s, &s, None, &[]).unwrap(), Operation::NewCluster);
    }

    #[test]
    fn identical_specs_are_noop() {
        let s = spec();
        let k = kcp("mgmt-control-plane-template-1");
        assert_eq!(detect(&s, &s, Some(&k), &[]).unwrap(), Operation::NoChange);
    }

    #[test]
    fn replica_only_diff_is_scale() {
        let cur = spec();
        let new = ClusterSpec::from_str(&SPEC.replace("count: 1\n    machineGroupRef:\n      kind: VSphereMachineConfig\n      name: mgmt-workers", "count: 2\n    machineGroupRef:\n      kind: VSphereMachineConfig\n      name: mgmt-workers"), None).unwrap();
        let k = kcp("t");
        assert_eq!(detect(&cur, &new, Some(&k), &[]).unwrap(), Operation::ScaleOnly);
    }

    #[test]
    fn version_bump_is_upgrade() {
        let cur = spec();
        let new = ClusterSpec::from_str(&SPEC.replace("\"1.23\"", "\"1.24\""), None).unwrap();
        let k = kcp("t");
        assert_eq!(detect(&cur, &new, Some(&k), &[]).unwrap(), Operation::VersionUpgrade);
    }

    #[test]
    fn machine_attribute_change_hits_only_that_group() {
        let cur = spec();
        // grow the worker machines; the cp machine config is untouched
        let changed = SPEC.replace("name: mgmt-workers\nspec:\n  datastore: ds\n  folder: f\n  network: net\n  resourcePool: rp\n  template: ubuntu-kube\n  memoryMiB: 8192",
                                   "name: mgmt-workers\nspec:\n  datastore: ds\n  folder: f\n  network: net\n  resourcePool: rp\n  template: ubuntu-kube\n  memoryMiB: 16384");
        let new = ClusterSpec::from_str(&changed, None).unwrap();
        let k = kcp("t");
        assert_eq!(
            detect(&cur, &new, Some(&k), &[]).unwrap(),
            Operation::WorkloadTemplateChange(vec!["md-0".into()])
        );
    }

    #[test]
    fn scale_plus_rolling_is_rejected_as_policy() {
        let cur = spec();
        let changed = SPEC.replace("\"1.23\"", "\"1.24\"").replace(
            "- name: md-0\n    count: 1",
            "- name: md-0\n    count: 3",
        );
        let new = ClusterSpec::from_str(&changed, None).unwrap();
        let k = kcp("t");
        let err = detect(&cur, &new, Some(&k), &[]).unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::Policy);
    }

    #[test]
    fn name_plan_preserves_on_scale_and_rotates_on_upgrade() {
        let s = spec();
        let now = Utc.ymd(2022, 7, 19).and_hms(16, 5, 0);
        let k = kcp("mgmt-control-plane-template-1650000000");
        let mds = vec![md("mgmt-md-0", "mgmt-md-0-1650000000", "mgmt-md-0-template-1650000000")];

        let scale = NamePlan::for_upgrade(&s, &Operation::ScaleOnly, Some(&k), &mds, None, &now);
        assert_eq!(scale.control_plane, "mgmt-control-plane-template-1650000000");
        assert_eq!(scale.workers["md-0"].machine_template, "mgmt-md-0-1650000000");
        assert_eq!(scale.workers["md-0"].kubeadm_config_template, "mgmt-md-0-template-1650000000");

        let upgrade = NamePlan::for_upgrade(&s, &Operation::VersionUpgrade, Some(&k), &mds, None, &now);
        let stamp = now.timestamp();
        assert_eq!(upgrade.control_plane, format!("mgmt-control-plane-template-{}", stamp));
        assert_eq!(upgrade.workers["md-0"].machine_template, format!("mgmt-md-0-{}", stamp));
    }

    #[test]
    fn etcd_template_never_rotates_on_upgrade() {
        let with_etcd = SPEC.replace(
            "  clusterNetwork:",
            "  externalEtcdConfiguration:\n    count: 3\n    machineGroupRef:\n      kind: VSphereMachineConfig\n      name: mgmt-cp\n  clusterNetwork:",
        );
        let s = ClusterSpec::from_str(&with_etcd, None).unwrap();
        let now = Utc.ymd(2022, 7, 19).and_hms(16, 5, 0);
        let k = kcp("old-cp-template");
        let plan = NamePlan::for_upgrade(
            &s,
            &Operation::VersionUpgrade,
            Some(&k),
            &[],
            Some("mgmt-etcd-template-1650000000".into()),
            &now,
        );
        // conservative: the current name is reused verbatim
        assert_eq!(plan.etcd.as_deref(), Some("mgmt-etcd-template-1650000000"));
        // while the control plane rotates
        assert!(plan.control_plane.ends_with(&now.timestamp().to_string()));
    }

    #[test]
    fn removed_groups_found() {
        let s = spec();
        let mds = vec![
            md("mgmt-md-0", "a", "b"),
            md("mgmt-md-old", "c", "d"),
        ];
        assert_eq!(removed_groups(&s, &mds), vec!["mgmt-md-old".to_string()]);
    }
}
