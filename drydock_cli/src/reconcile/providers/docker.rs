use async_trait::async_trait;
use tera::Context;

use crate::reconcile::ProviderAdapter;
use drydock_definitions::{ClusterSpec, ProviderKind};

use super::super::super::Result;

/// The local container sandbox: every "machine" is a kind-style node
/// container, the endpoint is a haproxy container CAPD manages itself.
pub struct DockerAdapter;

#[async_trait]
impl ProviderAdapter for DockerAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Docker
    }

    fn control_plane_template(&self) -> &'static str {
        CONTROL_PLANE_TEMPLATE
    }

    fn workers_template(&self) -> &'static str {
        WORKERS_TEMPLATE
    }

    fn control_plane_context(&self, spec: &ClusterSpec, ctx: &mut Context) -> Result<()> {
        ctx.insert("kindNodeImage", &spec.bundle.kindNode.uri());
        Ok(())
    }

    fn worker_group_context(&self, spec: &ClusterSpec, _group: &str, ctx: &mut Context) -> Result<()> {
        ctx.insert("kindNodeImage", &spec.bundle.kindNode.uri());
        Ok(())
    }

    /// From the host the load balancer is only reachable on localhost
    fn rewrite_kubeconfig(&self, _spec: &ClusterSpec, raw: Vec<u8>) -> Result<Vec<u8>> {
        let mut doc: serde_yaml::Value = serde_yaml::from_slice(&raw)?;
        if let Some(clusters) = doc.get_mut("clusters").and_then(|c| c.as_sequence_mut()) {
            for entry in clusters {
                if let Some(server) = entry
                    .get_mut("cluster")
                    .and_then(|c| c.get_mut("server"))
                {
                    if let Some(url) = server.as_str() {
                        let port = url.rsplitn(2, ':').next().unwrap_or("6443").to_string();
                        *server = serde_yaml::Value::String(format!("https://127.0.0.1:{}", port));
                    }
                }
            }
        }
        Ok(serde_yaml::to_vec(&doc)?)
    }
}

const CONTROL_PLANE_TEMPLATE: &str = r#"apiVersion: cluster.x-k8s.io/v1beta1
kind: Cluster
metadata:
  labels:
    cluster.x-k8s.io/cluster-name: {{ clusterName }}
  name: {{ clusterName }}
  namespace: {{ namespace }}
spec:
  clusterNetwork:
    pods:
      cidrBlocks: [{{ podCidrs | join(sep=",") }}]
    services:
      cidrBlocks: [{{ serviceCidrs | join(sep=",") }}]
  controlPlaneRef:
    apiVersion: controlplane.cluster.x-k8s.io/v1beta1
    kind: KubeadmControlPlane
    name: {{ clusterName }}
{% if externalEtcd %}
  managedExternalEtcdRef:
    apiVersion: etcdcluster.cluster.x-k8s.io/v1beta1
    kind: EtcdadmCluster
    name: {{ clusterName }}-etcd
    namespace: {{ namespace }}
{% endif %}
  infrastructureRef:
    apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
    kind: DockerCluster
    name: {{ clusterName }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: DockerCluster
metadata:
  name: {{ clusterName }}
  namespace: {{ namespace }}
spec: {}
---
apiVersion: controlplane.cluster.x-k8s.io/v1beta1
kind: KubeadmControlPlane
metadata:
  name: {{ clusterName }}
  namespace: {{ namespace }}
spec:
  machineTemplate:
    infrastructureRef:
      apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
      kind: DockerMachineTemplate
      name: {{ controlPlaneTemplateName }}
  kubeadmConfigSpec:
    clusterConfiguration:
      imageRepository: {{ pauseRepository | replace(from="/pause", to="") }}
      etcd:
{% if externalEtcd %}
        external:
          endpoints: []
{% else %}
        local:
          imageRepository: {{ etcdRepository }}
          imageTag: {{ etcdVersion }}
          extraArgs:
{{ etcdExtraArgs }}
{% endif %}
      dns:
        imageRepository: {{ corednsRepository }}
        imageTag: {{ corednsVersion }}
      apiServer:
        certSANs: [localhost, 127.0.0.1]
        extraArgs:
{{ apiServerExtraArgs }}
      controllerManager:
        extraArgs:
          enable-hostpath-provisioner: "true"
{{ controllerManagerExtraArgs }}
      scheduler:
        extraArgs:
{{ schedulerExtraArgs }}
    initConfiguration:
      nodeRegistration:
        criSocket: /var/run/containerd/containerd.sock
        kubeletExtraArgs:
          eviction-hard: nodefs.available<0%,nodefs.inodesFree<0%,imagefs.available<0%
{{ cpKubeletExtraArgs }}
{% if controlPlaneHasTaints %}
        taints:
{{ controlPlaneTaints }}
{% endif %}
    joinConfiguration:
      nodeRegistration:
        criSocket: /var/run/containerd/containerd.sock
        kubeletExtraArgs:
          eviction-hard: nodefs.available<0%,nodefs.inodesFree<0%,imagefs.available<0%
{{ cpKubeletExtraArgs }}
{% if controlPlaneHasTaints %}
        taints:
{{ controlPlaneTaints }}
{% endif %}
  replicas: {{ controlPlaneReplicas }}
{% if upgradeRolloutStrategy %}
  rolloutStrategy:
    rollingUpdate:
      maxSurge: {{ maxSurge }}
{% endif %}
  version: {{ kubernetesVersion }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: DockerMachineTemplate
metadata:
  name: {{ controlPlaneTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
      customImage: {{ kindNodeImage }}
      extraMounts:
      - containerPath: /var/run/docker.sock
        hostPath: /var/run/docker.sock
{% if externalEtcd %}
---
apiVersion: etcdcluster.cluster.x-k8s.io/v1beta1
kind: EtcdadmCluster
metadata:
  name: {{ clusterName }}-etcd
  namespace: {{ namespace }}
spec:
  replicas: {{ externalEtcdReplicas }}
  etcdadmConfigSpec:
    etcdadmBuiltin: true
    format: {{ etcdFormat }}
    cipherSuites: "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384"
  infrastructureTemplate:
    apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
    kind: DockerMachineTemplate
    name: {{ etcdTemplateName }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: DockerMachineTemplate
metadata:
  name: {{ etcdTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
      customImage: {{ kindNodeImage }}
      extraMounts:
      - containerPath: /var/run/docker.sock
        hostPath: /var/run/docker.sock
{% endif %}
"#;

const WORKERS_TEMPLATE: &str = r#"apiVersion: bootstrap.cluster.x-k8s.io/v1beta1
kind: KubeadmConfigTemplate
metadata:
  name: {{ workloadkubeadmconfigTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
      joinConfiguration:
        nodeRegistration:
          criSocket: /var/run/containerd/containerd.sock
          kubeletExtraArgs:
            eviction-hard: nodefs.available<0%,nodefs.inodesFree<0%,imagefs.available<0%
{% if workerNodeLabels %}
            node-labels: {{ workerNodeLabels }}
{% endif %}
{% if cgroupDriverSystemd %}
            cgroup-driver: systemd
{% endif %}
{{ workerKubeletExtraArgs }}
{% if workerHasTaints %}
          taints:
{{ workerTaints }}
{% endif %}
---
apiVersion: cluster.x-k8s.io/v1beta1
kind: MachineDeployment
metadata:
  name: {{ clusterName }}-{{ workerNodeGroupName }}
  namespace: {{ namespace }}
{% if autoscalingConfig %}
  annotations:
    cluster.x-k8s.io/cluster-api-autoscaler-node-group-min-size: "{{ autoscalingMinCount }}"
    cluster.x-k8s.io/cluster-api-autoscaler-node-group-max-size: "{{ autoscalingMaxCount }}"
{% endif %}
spec:
  clusterName: {{ clusterName }}
{% if not autoscalingConfig %}
  replicas: {{ workerReplicas }}
{% endif %}
  selector:
    matchLabels: {}
{% if upgradeRolloutStrategy %}
  strategy:
    rollingUpdate:
      maxSurge: {{ maxSurge }}
      maxUnavailable: {{ maxUnavailable }}
    type: RollingUpdate
{% endif %}
  template:
    metadata:
      labels:
        cluster.x-k8s.io/cluster-name: {{ clusterName }}
    spec:
      bootstrap:
        configRef:
          apiVersion: bootstrap.cluster.x-k8s.io/v1beta1
          kind: KubeadmConfigTemplate
          name: {{ workloadkubeadmconfigTemplateName }}
      clusterName: {{ clusterName }}
      infrastructureRef:
        apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
        kind: DockerMachineTemplate
        name: {{ workloadTemplateName }}
      version: {{ kubernetesVersion }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: DockerMachineTemplate
metadata:
  name: {{ workloadTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
      customImage: {{ kindNodeImage }}
      extraMounts:
      - containerPath: /var/run/docker.sock
        hostPath: /var/run/docker.sock
"#;
