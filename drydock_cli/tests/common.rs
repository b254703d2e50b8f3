#![allow(dead_code)]
// Shared scripting harness for the lifecycle tests: a ClusterApi whose
// state is set up front and whose calls are recorded in order.
extern crate drydock;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use drydock::capi::{self, rufio, CapiCondition};
use drydock::crds;
use drydock::kubeapi::ClusterApi;
use drydock::{ClusterStatus, Hardware, Result};

#[derive(Default)]
pub struct RecordingClient {
    pub log: Mutex<Vec<String>>,
    pub kcp: Mutex<Option<capi::KubeadmControlPlane>>,
    pub mds: Mutex<Vec<capi::MachineDeployment>>,
    pub machines: Mutex<Vec<capi::Machine>>,
    pub capi_clusters: Mutex<Vec<capi::Cluster>>,
    pub etcd: Mutex<Option<capi::EtcdadmCluster>>,
    pub etcd_annotations: Mutex<BTreeMap<String, String>>,
    pub crds: Mutex<Vec<crds::Cluster>>,
    pub crd_annotations: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    pub hardware: Mutex<Vec<(Hardware, bool)>>,
    pub rufio_machines: Mutex<Vec<rufio::Machine>>,
    pub kubeconfig: Mutex<Vec<u8>>,
}

impl RecordingClient {
    pub fn new() -> Self {
        let client = RecordingClient::default();
        *client.kubeconfig.lock().unwrap() = b"apiVersion: v1\nkind: Config\nclusters:\n- name: mgmt\n  cluster:\n    server: https://172.18.0.2:6443\n".to_vec();
        client
    }

    pub fn record(&self, entry: &str) {
        self.log.lock().unwrap().push(entry.to_string());
    }

    pub fn log_entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Index of the first log entry starting with a prefix
    pub fn position_of(&self, prefix: &str) -> Option<usize> {
        self.log_entries().iter().position(|e| e.starts_with(prefix))
    }
}

#[async_trait]
impl ClusterApi for RecordingClient {
    fn context_name(&self) -> String {
        "recording".into()
    }

    async fn apply_manifests(&self, what: &str, _yaml: &[u8]) -> Result<()> {
        self.record(&format!("apply:{}", what));
        Ok(())
    }

    async fn get_kubeadm_control_plane(&self, _name: &str) -> Result<Option<capi::KubeadmControlPlane>> {
        Ok(self.kcp.lock().unwrap().clone())
    }

    async fn list_machine_deployments(&self, _cluster: &str) -> Result<Vec<capi::MachineDeployment>> {
        Ok(self.mds.lock().unwrap().clone())
    }

    async fn list_machines(&self, _cluster: &str) -> Result<Vec<capi::Machine>> {
        Ok(self.machines.lock().unwrap().clone())
    }

    async fn get_capi_cluster(&self, name: &str) -> Result<Option<capi::Cluster>> {
        Ok(self
            .capi_clusters
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.metadata.name.as_deref() == Some(name))
            .cloned())
    }

    async fn list_capi_clusters(&self) -> Result<Vec<capi::Cluster>> {
        Ok(self.capi_clusters.lock().unwrap().clone())
    }

    async fn delete_machine_deployment(&self, name: &str) -> Result<()> {
        self.record(&format!("delete-md:{}", name));
        self.mds.lock().unwrap().retain(|m| m.metadata.name.as_deref() != Some(name));
        Ok(())
    }

    async fn get_etcd_cluster(&self, _name: &str) -> Result<Option<capi::EtcdadmCluster>> {
        Ok(self.etcd.lock().unwrap().clone())
    }

    async fn annotate_etcd_cluster(&self, name: &str, key: &str, value: Option<&str>) -> Result<()> {
        self.record(&format!("annotate-etcd:{}:{}={}", name, key, value.unwrap_or("<removed>")));
        let mut annotations = self.etcd_annotations.lock().unwrap();
        match value {
            Some(v) => {
                annotations.insert(key.to_string(), v.to_string());
            }
            None => {
                annotations.remove(key);
            }
        }
        Ok(())
    }

    async fn get_cluster_crd(&self, name: &str) -> Result<Option<crds::Cluster>> {
        Ok(self
            .crds
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.metadata.name == name)
            .cloned())
    }

    async fn list_cluster_crds(&self) -> Result<Vec<crds::Cluster>> {
        Ok(self.crds.lock().unwrap().clone())
    }

    async fn annotate_cluster_crd(&self, name: &str, key: &str, value: Option<&str>) -> Result<()> {
        self.record(&format!("annotate-crd:{}:{}={}", name, key, value.unwrap_or("<removed>")));
        let mut all = self.crd_annotations.lock().unwrap();
        let annotations = all.entry(name.to_string()).or_insert_with(BTreeMap::new);
        match value {
            Some(v) => {
                annotations.insert(key.to_string(), v.to_string());
            }
            None => {
                annotations.remove(key);
            }
        }
        Ok(())
    }

    async fn update_cluster_status(&self, name: &str, status: &ClusterStatus) -> Result<()> {
        self.record(&format!(
            "status:{}:{}",
            name,
            status.failure_message.clone().unwrap_or_else(|| "ok".into())
        ));
        Ok(())
    }

    async fn delete_cluster_crd(&self, name: &str) -> Result<()> {
        self.record(&format!("delete-crd:{}", name));
        self.crds.lock().unwrap().retain(|c| c.metadata.name != name);
        Ok(())
    }

    async fn delete_capi_cluster(&self, name: &str) -> Result<()> {
        self.record(&format!("delete-capi:{}", name));
        self.capi_clusters.lock().unwrap().retain(|c| c.metadata.name != name);
        Ok(())
    }

    async fn workload_kubeconfig(&self, cluster: &str) -> Result<Vec<u8>> {
        self.record(&format!("kubeconfig:{}", cluster));
        Ok(self.kubeconfig.lock().unwrap().clone())
    }

    async fn list_hardware(&self) -> Result<Vec<(Hardware, bool)>> {
        Ok(self.hardware.lock().unwrap().clone())
    }

    async fn list_rufio_machines(&self) -> Result<Vec<rufio::Machine>> {
        Ok(self.rufio_machines.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// scripted object builders

pub fn condition(type_: &str, status: &str, message: Option<&str>) -> CapiCondition {
    CapiCondition {
        type_: type_.into(),
        status: status.into(),
        reason: None,
        message: message.map(String::from),
    }
}

pub fn ready_kcp(cluster: &str, replicas: i32, template: &str, version: &str) -> capi::KubeadmControlPlane {
    let mut kcp = capi::KubeadmControlPlane::new(
        cluster,
        capi::KubeadmControlPlaneSpec {
            replicas: Some(replicas),
            version: version.into(),
            machineTemplate: Some(capi::KcpMachineTemplate {
                infrastructureRef: capi::ObjectRef {
                    kind: "DockerMachineTemplate".into(),
                    name: template.into(),
                    ..Default::default()
                },
            }),
        },
    );
    kcp.metadata.name = cluster.into();
    kcp.status = Some(capi::KubeadmControlPlaneStatus {
        replicas: Some(replicas),
        readyReplicas: Some(replicas),
        updatedReplicas: Some(replicas),
        ready: Some(true),
        conditions: vec![condition("Available", "True", None)],
    });
    kcp
}

pub fn ready_md(cluster: &str, group: &str, replicas: i32, machine_template: &str, kubeadm_template: &str) -> capi::MachineDeployment {
    let name = format!("{}-{}", cluster, group);
    let mut md = capi::MachineDeployment::new(
        &name,
        capi::MachineDeploymentSpec {
            clusterName: cluster.into(),
            replicas: Some(replicas),
            template: Some(capi::MachineTemplateSpec {
                spec: Some(capi::MachineSpecTemplate {
                    version: None,
                    bootstrap: Some(capi::Bootstrap {
                        configRef: Some(capi::ObjectRef {
                            kind: "KubeadmConfigTemplate".into(),
                            name: kubeadm_template.into(),
                            ..Default::default()
                        }),
                    }),
                    infrastructureRef: Some(capi::ObjectRef {
                        kind: "DockerMachineTemplate".into(),
                        name: machine_template.into(),
                        ..Default::default()
                    }),
                }),
            }),
        },
    );
    md.metadata.name = name;
    md.status = Some(capi::MachineDeploymentStatus {
        replicas,
        readyReplicas: Some(replicas),
        updatedReplicas: Some(replicas),
        unavailableReplicas: Some(0),
    });
    md
}

pub fn ready_etcd(cluster: &str, replicas: i32, template: &str) -> capi::EtcdadmCluster {
    let name = format!("{}-etcd", cluster);
    let mut etcd = capi::EtcdadmCluster::new(
        &name,
        capi::EtcdadmClusterSpec {
            replicas: Some(replicas),
            infrastructureTemplate: Some(capi::ObjectRef {
                kind: "DockerMachineTemplate".into(),
                name: template.into(),
                ..Default::default()
            }),
        },
    );
    etcd.metadata.name = name;
    etcd.status = Some(capi::EtcdadmClusterStatus {
        ready: Some(true),
        readyReplicas: Some(replicas),
        conditions: vec![],
    });
    etcd
}

pub fn healthy_machine(cluster: &str, name: &str) -> capi::Machine {
    let mut machine = capi::Machine::new(
        name,
        capi::MachineSpec {
            clusterName: cluster.into(),
            version: None,
        },
    );
    machine.metadata.name = name.into();
    machine.status = Some(capi::MachineStatus {
        nodeRef: Some(capi::ObjectRef {
            kind: "Node".into(),
            name: name.into(),
            ..Default::default()
        }),
        phase: Some("Running".into()),
        conditions: vec![condition("NodeHealthy", "True", None)],
    });
    machine
}
