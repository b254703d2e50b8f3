use drydock_definitions::ProviderKind;

use super::Result;

/// Emit a runnable starter spec for `generate clusterconfig`
///
/// The output parses back through `ClusterSpec::from_str` apart from the
/// placeholder fields the user must fill in.
pub fn clusterconfig(name: &str, provider: ProviderKind) -> Result<String> {
    let datacenter = datacenter_stub(name, provider);
    let machine = machine_stub(name, provider);
    let endpoint = match provider {
        ProviderKind::Docker => String::new(),
        _ => "    endpoint:\n      host: \"\"\n".to_string(),
    };
    let out = format!(
        r#"apiVersion: drydock.dev/v1alpha1
kind: Cluster
metadata:
  name: {name}
spec:
  kubernetesVersion: "1.27"
  controlPlaneConfiguration:
    count: 2
{endpoint}    machineGroupRef:
      kind: {machine_kind}
      name: {name}-cp
  workerNodeGroupConfigurations:
  - name: md-0
    count: 2
    machineGroupRef:
      kind: {machine_kind}
      name: {name}
  clusterNetwork:
    pods:
      cidrBlocks: ["192.168.0.0/16"]
    services:
      cidrBlocks: ["10.96.0.0/12"]
  datacenterRef:
    kind: {datacenter_kind}
    name: {name}
---
{datacenter}---
{machine}"#,
        name = name,
        endpoint = endpoint,
        machine_kind = provider.machine_config_kind(),
        datacenter_kind = provider.datacenter_kind(),
        datacenter = datacenter,
        machine = machine,
    );
    Ok(out)
}

fn datacenter_stub(name: &str, provider: ProviderKind) -> String {
    let body = match provider {
        ProviderKind::Docker | ProviderKind::Snow => "spec: {}\n".to_string(),
        ProviderKind::VSphere => "spec:\n  server: \"\"\n  datacenter: \"\"\n  network: \"\"\n".to_string(),
        ProviderKind::Tinkerbell => "spec:\n  tinkerbellIP: \"\"\n".to_string(),
        ProviderKind::CloudStack => {
            "spec:\n  managementApiEndpoint: \"\"\n  zones:\n  - name: \"\"\n    network: \"\"\n".to_string()
        }
        ProviderKind::Nutanix => "spec:\n  endpoint: \"\"\n".to_string(),
    };
    format!(
        "apiVersion: drydock.dev/v1alpha1\nkind: {}\nmetadata:\n  name: {}\n{}",
        provider.datacenter_kind(),
        name,
        body
    )
}

fn machine_stub(name: &str, provider: ProviderKind) -> String {
    let body = match provider {
        ProviderKind::Docker => "spec: {}\n".to_string(),
        ProviderKind::VSphere => "spec:\n  osFamily: ubuntu\n  datastore: \"\"\n  folder: \"\"\n  network: \"\"\n  resourcePool: \"\"\n  template: \"\"\n  memoryMiB: 8192\n  numCPUs: 2\n  diskGiB: 25\n  users:\n  - name: capv\n    sshAuthorizedKeys:\n    - \"\"\n".to_string(),
        ProviderKind::Tinkerbell => "spec:\n  osFamily: ubuntu\n  hardwareSelector:\n    type: node\n  users:\n  - name: ec2-user\n    sshAuthorizedKeys:\n    - \"\"\n".to_string(),
        ProviderKind::CloudStack => "spec:\n  osFamily: redhat\n  computeOffering: \"\"\n  template: \"\"\n  users:\n  - name: capc\n    sshAuthorizedKeys:\n    - \"\"\n".to_string(),
        ProviderKind::Nutanix => "spec:\n  osFamily: ubuntu\n  cluster: \"\"\n  subnet: \"\"\n  image: \"\"\n  vcpusPerSocket: 1\n  vcpuSockets: 2\n  memorySize: 4Gi\n  systemDiskSize: 40Gi\n  users:\n  - name: capx\n    sshAuthorizedKeys:\n    - \"\"\n".to_string(),
        ProviderKind::Snow => "spec:\n  osFamily: ubuntu\n  instanceType: sbe-c.large\n  devices: []\n".to_string(),
    };
    // one machine config shared by control plane and workers to start with
    format!(
        "apiVersion: drydock.dev/v1alpha1\nkind: {}\nmetadata:\n  name: {}-cp\n{}---\napiVersion: drydock.dev/v1alpha1\nkind: {}\nmetadata:\n  name: {}\n{}",
        provider.machine_config_kind(),
        name,
        body,
        provider.machine_config_kind(),
        name,
        body
    )
}

#[cfg(test)]
mod tests {
    use super::clusterconfig;
    use drydock_definitions::{ClusterSpec, ProviderKind};

    #[test]
    fn docker_starter_parses_back() {
        let out = clusterconfig("dev", ProviderKind::Docker).unwrap();
        let spec = ClusterSpec::from_str(&out, None).unwrap();
        assert_eq!(spec.name(), "dev");
        assert_eq!(spec.provider(), ProviderKind::Docker);
        assert!(spec.control_plane_machine().is_ok());
    }

    #[test]
    fn every_provider_has_a_starter() {
        for kind in ProviderKind::all() {
            let out = clusterconfig("starter", *kind).unwrap();
            assert!(out.contains(kind.datacenter_kind()));
            assert!(out.contains(kind.machine_config_kind()));
        }
    }
}
