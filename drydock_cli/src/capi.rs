//- minimal typed views of the CAPI objects we reconcile against
use kube_derive::CustomResource;

/// Namespace the management side objects live in
pub const SYSTEM_NAMESPACE: &str = "drydock-system";

/// Label CAPI puts on everything belonging to a cluster
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// A kubernetes-style condition as CAPI emits them
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CapiCondition {
    #[serde(rename = "type")]
    pub type_: String,
    /// "True" / "False" / "Unknown"
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [CapiCondition], type_: &str) -> Option<&'a CapiCondition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Tri-state view of a condition's status string
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl CapiCondition {
    pub fn state(&self) -> ConditionStatus {
        match self.status.as_str() {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }
}

/// Reference to another object, pared down to what we read
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ObjectRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apiVersion: Option<String>,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

// ---------------------------------------------------------------------------
// cluster.x-k8s.io

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    kind = "Cluster",
    version = "v1beta1",
    namespaced,
    status = "ClusterStatus"
)]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controlPlaneRef: Option<ObjectRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructureRef: Option<ObjectRef>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controlPlaneReady: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<CapiCondition>,
}

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    kind = "MachineDeployment",
    version = "v1beta1",
    namespaced,
    status = "MachineDeploymentStatus"
)]
pub struct MachineDeploymentSpec {
    pub clusterName: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<MachineTemplateSpec>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MachineTemplateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<MachineSpecTemplate>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MachineSpecTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<Bootstrap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructureRef: Option<ObjectRef>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Bootstrap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configRef: Option<ObjectRef>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MachineDeploymentStatus {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readyReplicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updatedReplicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailableReplicas: Option<i32>,
}

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    kind = "Machine",
    version = "v1beta1",
    namespaced,
    status = "MachineStatus"
)]
pub struct MachineSpec {
    pub clusterName: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MachineStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodeRef: Option<ObjectRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<CapiCondition>,
}

// ---------------------------------------------------------------------------
// controlplane.cluster.x-k8s.io

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default)]
#[kube(
    group = "controlplane.cluster.x-k8s.io",
    kind = "KubeadmControlPlane",
    version = "v1beta1",
    namespaced,
    status = "KubeadmControlPlaneStatus"
)]
pub struct KubeadmControlPlaneSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machineTemplate: Option<KcpMachineTemplate>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct KcpMachineTemplate {
    pub infrastructureRef: ObjectRef,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct KubeadmControlPlaneStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readyReplicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updatedReplicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<CapiCondition>,
}

impl KubeadmControlPlane {
    /// Name of the control plane machine template currently referenced
    pub fn machine_template_name(&self) -> Option<String> {
        self.spec
            .machineTemplate
            .as_ref()
            .map(|t| t.infrastructureRef.name.clone())
    }
}

// ---------------------------------------------------------------------------
// etcdcluster.cluster.x-k8s.io

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default)]
#[kube(
    group = "etcdcluster.cluster.x-k8s.io",
    kind = "EtcdadmCluster",
    version = "v1beta1",
    namespaced,
    status = "EtcdadmClusterStatus"
)]
pub struct EtcdadmClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructureTemplate: Option<ObjectRef>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct EtcdadmClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readyReplicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<CapiCondition>,
}

/// Conventional name of the etcdadm cluster object for a cluster
pub fn etcd_cluster_name(cluster: &str) -> String {
    format!("{}-etcd", cluster)
}

// ---------------------------------------------------------------------------
// bmc.tinkerbell.org (rufio)

pub mod rufio {
    use super::CapiCondition;
    use kube_derive::CustomResource;

    /// Condition type reported by the bmc controller
    pub const CONTACTABLE_CONDITION: &str = "Contactable";

    #[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default)]
    #[kube(
        group = "bmc.tinkerbell.org",
        kind = "Machine",
        version = "v1alpha1",
        namespaced,
        status = "RufioMachineStatus"
    )]
    pub struct RufioMachineSpec {
        pub connection: Connection,
    }

    #[derive(Serialize, Deserialize, Debug, Clone, Default)]
    pub struct Connection {
        pub host: String,
        #[serde(default)]
        pub insecureTLS: bool,
        pub authSecretRef: super::ObjectRef,
    }

    #[derive(Serialize, Deserialize, Debug, Clone, Default)]
    pub struct RufioMachineStatus {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub conditions: Vec<CapiCondition>,
    }
}

// ---------------------------------------------------------------------------
// tinkerbell.org

pub mod tink {
    use kube_derive::CustomResource;

    /// Label the stack stamps onto hardware once a machine owns it
    pub const OWNER_NAME_LABEL: &str = "v1alpha1.tinkerbell.org/ownerName";

    #[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default)]
    #[kube(
        group = "tinkerbell.org",
        kind = "Hardware",
        version = "v1alpha1",
        namespaced,
        status = "HardwareStatus"
    )]
    pub struct HardwareSpec {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub disks: Vec<Disk>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub interfaces: Vec<Interface>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub bmcRef: Option<super::ObjectRef>,
    }

    #[derive(Serialize, Deserialize, Debug, Clone, Default)]
    pub struct Disk {
        pub device: String,
    }

    #[derive(Serialize, Deserialize, Debug, Clone, Default)]
    pub struct Interface {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub dhcp: Option<Dhcp>,
    }

    #[derive(Serialize, Deserialize, Debug, Clone, Default)]
    pub struct Dhcp {
        #[serde(default)]
        pub mac: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub ip: Option<IpConfig>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub name_servers: Vec<String>,
    }

    #[derive(Serialize, Deserialize, Debug, Clone, Default)]
    pub struct IpConfig {
        #[serde(default)]
        pub address: String,
        #[serde(default)]
        pub gateway: String,
        #[serde(default)]
        pub netmask: String,
    }

    #[derive(Serialize, Deserialize, Debug, Clone, Default)]
    pub struct HardwareStatus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub state: Option<String>,
    }
}
