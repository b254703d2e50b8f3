use async_trait::async_trait;
use tera::Context;

use crate::reconcile::ProviderAdapter;
use drydock_definitions::{ClusterSpec, MachineConfig, ProviderKind};

use super::super::super::Result;

/// Edge appliance clusters on Snowball devices through CAPAS
pub struct SnowAdapter;

fn placement(ctx: &mut Context, prefix: &str, mc: &MachineConfig) -> Result<()> {
    let m = match mc {
        MachineConfig::Snow(m) => m,
        _ => bail!("snow reconciler handed a non-snow machine config"),
    };
    ctx.insert(&format!("{}InstanceType", prefix), &m.instanceType);
    ctx.insert(&format!("{}Devices", prefix), &m.devices);
    ctx.insert(&format!("{}SshKeyName", prefix), &m.sshKeyName.clone().unwrap_or_default());
    Ok(())
}

#[async_trait]
impl ProviderAdapter for SnowAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Snow
    }

    fn control_plane_template(&self) -> &'static str {
        CONTROL_PLANE_TEMPLATE
    }

    fn workers_template(&self) -> &'static str {
        WORKERS_TEMPLATE
    }

    fn control_plane_context(&self, spec: &ClusterSpec, ctx: &mut Context) -> Result<()> {
        placement(ctx, "controlPlane", spec.control_plane_machine()?)
    }

    fn worker_group_context(&self, spec: &ClusterSpec, group: &str, ctx: &mut Context) -> Result<()> {
        placement(ctx, "worker", spec.worker_machine(group)?)
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
  controlPlaneEndpoint:
    host: {{ controlPlaneEndpointIp }}
    port: 6443
  controlPlaneRef:
    apiVersion: controlplane.cluster.x-k8s.io/v1beta1
    kind: KubeadmControlPlane
    name: {{ clusterName }}
  infrastructureRef:
    apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
    kind: AWSSnowCluster
    name: {{ clusterName }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: AWSSnowCluster
metadata:
  name: {{ clusterName }}
  namespace: {{ namespace }}
spec:
  controlPlaneEndpoint:
    host: {{ controlPlaneEndpointIp }}
    port: 6443
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
      kind: AWSSnowMachineTemplate
      name: {{ controlPlaneTemplateName }}
  kubeadmConfigSpec:
    clusterConfiguration:
      imageRepository: {{ pauseRepository | replace(from="/pause", to="") }}
      etcd:
        local:
          imageRepository: {{ etcdRepository }}
          imageTag: {{ etcdVersion }}
          extraArgs:
{{ etcdExtraArgs }}
      dns:
        imageRepository: {{ corednsRepository }}
        imageTag: {{ corednsVersion }}
      apiServer:
        extraArgs:
{{ apiServerExtraArgs }}
      controllerManager:
        extraArgs:
{{ controllerManagerExtraArgs }}
      scheduler:
        extraArgs:
{{ schedulerExtraArgs }}
{% if controlPlaneBottlerocket %}
      pause:
        imageRepository: {{ pauseRepository }}
        imageTag: {{ pauseVersion }}
      bottlerocketBootstrap:
        imageRepository: {{ bottlerocketBootstrapRepository }}
        imageTag: {{ bottlerocketBootstrapVersion }}
{% endif %}
{% if registryMirror %}
      registryMirror:
        endpoint: {{ registryMirrorEndpoint }}
{% if registryCACert %}
        caCert: |
{{ registryCACert | indent(spaces=10) }}
{% endif %}
{% endif %}
{% if proxyConfig and not controlPlaneBottlerocket %}
    files:
    - content: |
        [Service]
        Environment="HTTP_PROXY={{ httpProxy }}"
        Environment="HTTPS_PROXY={{ httpsProxy }}"
        Environment="NO_PROXY={{ noProxy | join(sep=",") }}"
      owner: root:root
      path: /etc/systemd/system/containerd.service.d/http-proxy.conf
{% endif %}
    format: {{ controlPlaneFormat }}
    initConfiguration:
      nodeRegistration:
        kubeletExtraArgs:
          provider-id: "aws-snow:////'{% raw %}{{ ds.meta_data.instance_id }}{% endraw %}'"
{{ cpKubeletExtraArgs }}
{% if controlPlaneHasTaints %}
        taints:
{{ controlPlaneTaints }}
{% endif %}
    joinConfiguration:
      nodeRegistration:
        kubeletExtraArgs:
          provider-id: "aws-snow:////'{% raw %}{{ ds.meta_data.instance_id }}{% endraw %}'"
{{ cpKubeletExtraArgs }}
{% if controlPlaneHasTaints %}
        taints:
{{ controlPlaneTaints }}
{% endif %}
{% if controlPlaneHasNtp %}
    ntp:
      enabled: true
      servers: [{{ controlPlaneNtpServers | join(sep=",") }}]
{% endif %}
    users:
    - name: {{ controlPlaneSshUsername }}
      sshAuthorizedKeys:
      - '{{ controlPlaneSshAuthorizedKey }}'
      sudo: ALL=(ALL) NOPASSWD:ALL
  replicas: {{ controlPlaneReplicas }}
{% if upgradeRolloutStrategy %}
  rolloutStrategy:
    rollingUpdate:
      maxSurge: {{ maxSurge }}
{% endif %}
  version: {{ kubernetesVersion }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: AWSSnowMachineTemplate
metadata:
  name: {{ controlPlaneTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
      instanceType: {{ controlPlaneInstanceType }}
      physicalNetworkConnector: SFP_PLUS
{% if controlPlaneSshKeyName %}
      sshKeyName: {{ controlPlaneSshKeyName }}
{% endif %}
      devices: [{{ controlPlaneDevices | join(sep=",") }}]
"#;

const WORKERS_TEMPLATE: &str = r#"apiVersion: bootstrap.cluster.x-k8s.io/v1beta1
kind: KubeadmConfigTemplate
metadata:
  name: {{ workloadkubeadmconfigTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
{% if workerBottlerocket %}
      pause:
        imageRepository: {{ pauseRepository }}
        imageTag: {{ pauseVersion }}
      bottlerocketBootstrap:
        imageRepository: {{ bottlerocketBootstrapRepository }}
        imageTag: {{ bottlerocketBootstrapVersion }}
{% endif %}
      format: {{ workerFormat }}
      joinConfiguration:
        nodeRegistration:
          kubeletExtraArgs:
            provider-id: "aws-snow:////'{% raw %}{{ ds.meta_data.instance_id }}{% endraw %}'"
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
{% if workerHasNtp %}
      ntp:
        enabled: true
        servers: [{{ workerNtpServers | join(sep=",") }}]
{% endif %}
      users:
      - name: {{ workerSshUsername }}
        sshAuthorizedKeys:
        - '{{ workerSshAuthorizedKey }}'
        sudo: ALL=(ALL) NOPASSWD:ALL
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
        kind: AWSSnowMachineTemplate
        name: {{ workloadTemplateName }}
      version: {{ kubernetesVersion }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: AWSSnowMachineTemplate
metadata:
  name: {{ workloadTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
      instanceType: {{ workerInstanceType }}
      physicalNetworkConnector: SFP_PLUS
{% if workerSshKeyName %}
      sshKeyName: {{ workerSshKeyName }}
{% endif %}
      devices: [{{ workerDevices | join(sep=",") }}]
"#;
