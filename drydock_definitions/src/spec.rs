use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::{ErrorKind, Result, ResultExt};
use crate::bundle::VersionsBundle;
use crate::cluster::Cluster;
use crate::datacenter::{DatacenterConfig, ProviderKind};
use crate::machine::MachineConfig;
use crate::structs::{AwsIamConfig, OidcConfig};

/// API group all drydock documents live under
pub const API_VERSION: &str = "drydock.dev/v1alpha1";

#[derive(Deserialize, Debug)]
struct DocMeta {
    name: String,
}

/// Minimal first-pass parse to route documents by kind
#[derive(Deserialize, Debug)]
struct TypeMeta {
    #[serde(default)]
    apiVersion: String,
    kind: String,
}

#[derive(Deserialize, Debug)]
struct Doc<T> {
    #[allow(dead_code)]
    #[serde(default)]
    apiVersion: String,
    #[allow(dead_code)]
    kind: String,
    metadata: DocMeta,
    spec: T,
}

/// Split a multi-document yaml stream on its separators
fn yaml_documents(raw: &str) -> Vec<String> {
    let mut docs = vec![];
    let mut current = String::new();
    for line in raw.lines() {
        if line.trim_end() == "---" {
            if !current.trim().is_empty() {
                docs.push(current.clone());
            }
            current.clear();
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.trim().is_empty() {
        docs.push(current);
    }
    docs
}

/// The resolved, immutable cluster spec
///
/// Assembled once per reconciliation from the spec file (or the persisted
/// custom resources) plus the versions bundle. All machine group references
/// are resolved at build time so downstream code can index infallibly.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSpec {
    pub cluster: Cluster,
    pub datacenter: DatacenterConfig,
    machine_configs: BTreeMap<String, MachineConfig>,
    oidc_configs: BTreeMap<String, OidcConfig>,
    aws_iam_configs: BTreeMap<String, AwsIamConfig>,
    pub bundle: VersionsBundle,
}

impl ClusterSpec {
    /// Read and verify a spec file from disk
    pub fn from_file(path: &Path) -> Result<ClusterSpec> {
        let mut f = File::open(path).chain_err(|| format!("opening spec file {}", path.display()))?;
        let mut raw = String::new();
        f.read_to_string(&mut raw)?;
        Self::from_str(&raw, None)
    }

    /// Same, with a whole-bundle override
    pub fn from_file_with_bundle(path: &Path, bundle: VersionsBundle) -> Result<ClusterSpec> {
        let mut f = File::open(path).chain_err(|| format!("opening spec file {}", path.display()))?;
        let mut raw = String::new();
        f.read_to_string(&mut raw)?;
        Self::from_str(&raw, Some(bundle))
    }

    /// Parse the multi-document spec, resolve references and verify
    pub fn from_str(raw: &str, bundle_override: Option<VersionsBundle>) -> Result<ClusterSpec> {
        let mut cluster: Option<Cluster> = None;
        let mut datacenter: Option<DatacenterConfig> = None;
        let mut machine_configs = BTreeMap::new();
        let mut oidc_configs = BTreeMap::new();
        let mut aws_iam_configs = BTreeMap::new();

        for doc in yaml_documents(raw) {
            let tm: TypeMeta = serde_yaml::from_str(&doc).chain_err(|| "reading document type")?;
            if !tm.apiVersion.is_empty() && tm.apiVersion != API_VERSION {
                bail!("unsupported apiVersion '{}' (want {})", tm.apiVersion, API_VERSION);
            }
            match tm.kind.as_str() {
                "Cluster" => {
                    if cluster.is_some() {
                        bail!("spec file has more than one Cluster document");
                    }
                    let d: Doc<Cluster> = serde_yaml::from_str(&doc).chain_err(|| "reading Cluster")?;
                    let mut c = d.spec;
                    c.name = d.metadata.name;
                    cluster = Some(c);
                }
                "VSphereDatacenterConfig" => {
                    let d: Doc<crate::datacenter::VSphereDatacenterConfig> = serde_yaml::from_str(&doc)?;
                    datacenter = Some(DatacenterConfig::VSphere(d.spec));
                }
                "TinkerbellDatacenterConfig" => {
                    let d: Doc<crate::datacenter::TinkerbellDatacenterConfig> = serde_yaml::from_str(&doc)?;
                    datacenter = Some(DatacenterConfig::Tinkerbell(d.spec));
                }
                "DockerDatacenterConfig" => {
                    let d: Doc<crate::datacenter::DockerDatacenterConfig> = serde_yaml::from_str(&doc)?;
                    datacenter = Some(DatacenterConfig::Docker(d.spec));
                }
                "CloudStackDatacenterConfig" => {
                    let d: Doc<crate::datacenter::CloudStackDatacenterConfig> = serde_yaml::from_str(&doc)?;
                    datacenter = Some(DatacenterConfig::CloudStack(d.spec));
                }
                "NutanixDatacenterConfig" => {
                    let d: Doc<crate::datacenter::NutanixDatacenterConfig> = serde_yaml::from_str(&doc)?;
                    datacenter = Some(DatacenterConfig::Nutanix(d.spec));
                }
                "SnowDatacenterConfig" => {
                    let d: Doc<crate::datacenter::SnowDatacenterConfig> = serde_yaml::from_str(&doc)?;
                    datacenter = Some(DatacenterConfig::Snow(d.spec));
                }
                "VSphereMachineConfig" => {
                    let d: Doc<crate::machine::VSphereMachineConfig> = serde_yaml::from_str(&doc)?;
                    insert_machine(&mut machine_configs, d.metadata.name, MachineConfig::VSphere(d.spec))?;
                }
                "TinkerbellMachineConfig" => {
                    let d: Doc<crate::machine::TinkerbellMachineConfig> = serde_yaml::from_str(&doc)?;
                    insert_machine(&mut machine_configs, d.metadata.name, MachineConfig::Tinkerbell(d.spec))?;
                }
                "DockerMachineConfig" => {
                    let d: Doc<crate::machine::DockerMachineConfig> = serde_yaml::from_str(&doc)?;
                    insert_machine(&mut machine_configs, d.metadata.name, MachineConfig::Docker(d.spec))?;
                }
                "CloudStackMachineConfig" => {
                    let d: Doc<crate::machine::CloudStackMachineConfig> = serde_yaml::from_str(&doc)?;
                    insert_machine(&mut machine_configs, d.metadata.name, MachineConfig::CloudStack(d.spec))?;
                }
                "NutanixMachineConfig" => {
                    let d: Doc<crate::machine::NutanixMachineConfig> = serde_yaml::from_str(&doc)?;
                    insert_machine(&mut machine_configs, d.metadata.name, MachineConfig::Nutanix(d.spec))?;
                }
                "SnowMachineConfig" => {
                    let d: Doc<crate::machine::SnowMachineConfig> = serde_yaml::from_str(&doc)?;
                    insert_machine(&mut machine_configs, d.metadata.name, MachineConfig::Snow(d.spec))?;
                }
                "OIDCConfig" => {
                    let d: Doc<OidcConfig> = serde_yaml::from_str(&doc)?;
                    let mut cfg = d.spec;
                    cfg.name = d.metadata.name.clone();
                    cfg.verify()?;
                    oidc_configs.insert(d.metadata.name, cfg);
                }
                "AWSIamConfig" => {
                    let d: Doc<AwsIamConfig> = serde_yaml::from_str(&doc)?;
                    let mut cfg = d.spec;
                    cfg.name = d.metadata.name.clone();
                    cfg.verify()?;
                    aws_iam_configs.insert(d.metadata.name, cfg);
                }
                other => return Err(ErrorKind::UnknownDocumentKind(other.to_string()).into()),
            }
        }

        let cluster = cluster.ok_or_else(|| ErrorKind::MissingDocument("Cluster".into()))?;
        let datacenter = datacenter.ok_or_else(|| ErrorKind::MissingDocument("DatacenterConfig".into()))?;
        let bundle = match bundle_override {
            Some(b) => b,
            None => VersionsBundle::for_version(&cluster.kubernetesVersion)?,
        };

        let spec = ClusterSpec {
            cluster,
            datacenter,
            machine_configs,
            oidc_configs,
            aws_iam_configs,
            bundle,
        };
        spec.verify()?;
        Ok(spec)
    }

    pub fn verify(&self) -> Result<()> {
        self.cluster.verify()?;
        if self.cluster.datacenterRef.kind != self.datacenter.provider().datacenter_kind() {
            bail!(
                "datacenterRef kind '{}' does not match the {} datacenter document",
                self.cluster.datacenterRef.kind,
                self.datacenter.provider()
            );
        }
        // every machine group reference must resolve to exactly one config
        for (role, r) in self.cluster.machine_group_refs() {
            if r.kind != self.provider().machine_config_kind() {
                bail!("{} references a {} but the datacenter is {}", role, r.kind, self.provider());
            }
            if !self.machine_configs.contains_key(&r.name) {
                return Err(ErrorKind::UnknownMachineGroup(role, r.name.clone()).into());
            }
        }
        for idp in &self.cluster.identityProviderRefs {
            let found = match idp.kind.as_str() {
                "OIDCConfig" => self.oidc_configs.contains_key(&idp.name),
                "AWSIamConfig" => self.aws_iam_configs.contains_key(&idp.name),
                other => bail!("unknown identity provider kind '{}'", other),
            };
            if !found {
                bail!("identity provider ref '{}' has no matching {} document", idp.name, idp.kind);
            }
        }
        Ok(())
    }

    pub fn provider(&self) -> ProviderKind {
        self.datacenter.provider()
    }

    pub fn name(&self) -> &str {
        &self.cluster.name
    }

    fn machine(&self, role: &str, group: Option<&crate::cluster::Ref>) -> Result<&MachineConfig> {
        let r = group.ok_or_else(|| ErrorKind::UnknownMachineGroup(role.to_string(), "<unset>".into()))?;
        self.machine_configs
            .get(&r.name)
            .ok_or_else(|| ErrorKind::UnknownMachineGroup(role.to_string(), r.name.clone()).into())
    }

    pub fn control_plane_machine(&self) -> Result<&MachineConfig> {
        self.machine("control plane", self.cluster.controlPlaneConfiguration.machineGroupRef.as_ref())
    }

    pub fn worker_machine(&self, group: &str) -> Result<&MachineConfig> {
        let wg = self
            .cluster
            .workerNodeGroupConfigurations
            .iter()
            .find(|g| g.name == group)
            .ok_or_else(|| ErrorKind::UnknownMachineGroup(format!("worker group {}", group), group.into()))?;
        self.machine(&format!("worker group {}", group), wg.machineGroupRef.as_ref())
    }

    pub fn etcd_machine(&self) -> Result<Option<&MachineConfig>> {
        match &self.cluster.externalEtcdConfiguration {
            None => Ok(None),
            Some(etcd) => self.machine("external etcd", etcd.machineGroupRef.as_ref()).map(Some),
        }
    }

    pub fn machine_config(&self, name: &str) -> Option<&MachineConfig> {
        self.machine_configs.get(name)
    }

    /// The resolved oidc config, when the cluster references one
    pub fn oidc_config(&self) -> Option<&OidcConfig> {
        self.cluster
            .identityProviderRefs
            .iter()
            .find(|r| r.kind == "OIDCConfig")
            .and_then(|r| self.oidc_configs.get(&r.name))
    }

    /// The resolved aws iam config, when the cluster references one
    pub fn aws_iam_config(&self) -> Option<&AwsIamConfig> {
        self.cluster
            .identityProviderRefs
            .iter()
            .find(|r| r.kind == "AWSIamConfig")
            .and_then(|r| self.aws_iam_configs.get(&r.name))
    }
}

fn insert_machine(
    configs: &mut BTreeMap<String, MachineConfig>,
    name: String,
    mc: MachineConfig,
) -> Result<()> {
    if configs.insert(name.clone(), mc).is_some() {
        bail!("machine config '{}' is defined more than once", name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::ClusterSpec;

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
    count: 2
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
  network: /dc-1/network/VM Network
---
apiVersion: drydock.dev/v1alpha1
kind: VSphereMachineConfig
metadata:
  name: mgmt-cp
spec:
  osFamily: ubuntu
  datastore: ds-1
  folder: /dc-1/vm
  network: /dc-1/network/VM Network
  resourcePool: /dc-1/host/pool
  template: ubuntu-2004-kube-v1.23.7
  memoryMiB: 8192
  numCPUs: 2
  diskGiB: 25
---
apiVersion: drydock.dev/v1alpha1
kind: VSphereMachineConfig
metadata:
  name: mgmt-workers
spec:
  osFamily: ubuntu
  datastore: ds-1
  folder: /dc-1/vm
  network: /dc-1/network/VM Network
  resourcePool: /dc-1/host/pool
  template: ubuntu-2004-kube-v1.23.7
  memoryMiB: 8192
  numCPUs: 2
  diskGiB: 25
"#;

    #[test]
    fn full_spec_parses() {
        let spec = ClusterSpec::from_str(SPEC, None).unwrap();
        assert_eq!(spec.name(), "mgmt");
        assert_eq!(spec.provider().to_string(), "vsphere");
        assert_eq!(spec.bundle.kubernetesVersion, "v1.23.7");
        assert!(spec.control_plane_machine().is_ok());
        assert!(spec.worker_machine("md-0").is_ok());
        assert!(spec.worker_machine("md-9").is_err());
        assert!(spec.etcd_machine().unwrap().is_none());
    }

    #[test]
    fn dangling_machine_ref_fails() {
        // first occurrence is the group ref in the Cluster document
        let broken = SPEC.replacen("name: mgmt-workers", "name: somewhere-else", 1);
        assert!(ClusterSpec::from_str(&broken, None).is_err());
    }

    #[test]
    fn unknown_kind_fails() {
        let broken = format!("{}\n---\nkind: GitOpsConfig\nmetadata:\n  name: x\nspec: {{}}\n", SPEC);
        assert!(ClusterSpec::from_str(&broken, None).is_err());
    }
}
