use async_trait::async_trait;
use tera::Context;

use crate::kubeapi::ClusterApi;
use crate::reconcile::{Operation, ProviderAdapter};
use crate::retry::CancellationToken;
use drydock_definitions::{Catalogue, ClusterSpec, MachineConfig, ProviderKind};

use super::super::super::Result;
use super::credentials_from_env;

/// Nutanix AHV clusters through CAPX
pub struct NutanixAdapter;

fn placement(ctx: &mut Context, prefix: &str, mc: &MachineConfig) -> Result<()> {
    let m = match mc {
        MachineConfig::Nutanix(m) => m,
        _ => bail!("nutanix reconciler handed a non-nutanix machine config"),
    };
    ctx.insert(&format!("{}PrismCluster", prefix), &m.cluster);
    ctx.insert(&format!("{}Subnet", prefix), &m.subnet);
    ctx.insert(&format!("{}Image", prefix), &m.image);
    ctx.insert(&format!("{}VcpusPerSocket", prefix), &m.vcpusPerSocket);
    ctx.insert(&format!("{}VcpuSockets", prefix), &m.vcpuSockets);
    ctx.insert(&format!("{}MemorySize", prefix), &m.memorySize);
    ctx.insert(&format!("{}SystemDiskSize", prefix), &m.systemDiskSize);
    Ok(())
}

fn datacenter_context(spec: &ClusterSpec, ctx: &mut Context) -> Result<()> {
    let dc = match &spec.datacenter {
        drydock_definitions::DatacenterConfig::Nutanix(d) => d,
        _ => bail!("nutanix reconciler handed a non-nutanix datacenter"),
    };
    ctx.insert("nutanixEndpoint", &dc.endpoint);
    ctx.insert("nutanixPort", &dc.port);
    Ok(())
}

#[async_trait]
impl ProviderAdapter for NutanixAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Nutanix
    }

    fn control_plane_template(&self) -> &'static str {
        CONTROL_PLANE_TEMPLATE
    }

    fn workers_template(&self) -> &'static str {
        WORKERS_TEMPLATE
    }

    fn control_plane_context(&self, spec: &ClusterSpec, ctx: &mut Context) -> Result<()> {
        datacenter_context(spec, ctx)?;
        let (user, pass) = credentials_from_env(ProviderKind::Nutanix)?;
        ctx.insert("nutanixUsername", &user);
        ctx.insert("nutanixPassword", &pass);
        placement(ctx, "controlPlane", spec.control_plane_machine()?)?;
        if let Some(etcd) = spec.etcd_machine()? {
            placement(ctx, "etcd", etcd)?;
        }
        Ok(())
    }

    fn worker_group_context(&self, spec: &ClusterSpec, group: &str, ctx: &mut Context) -> Result<()> {
        datacenter_context(spec, ctx)?;
        placement(ctx, "worker", spec.worker_machine(group)?)
    }

    async fn validate_create(
        &self,
        _client: &dyn ClusterApi,
        _spec: &ClusterSpec,
        _catalogue: Option<&Catalogue>,
        _bmc_timeout: std::time::Duration,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        credentials_from_env(ProviderKind::Nutanix).map(|_| ())
    }

    async fn validate_upgrade(
        &self,
        _client: &dyn ClusterApi,
        _current: &ClusterSpec,
        _new: &ClusterSpec,
        _operation: &Operation,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        credentials_from_env(ProviderKind::Nutanix).map(|_| ())
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
{% if externalEtcd %}
  managedExternalEtcdRef:
    apiVersion: etcdcluster.cluster.x-k8s.io/v1beta1
    kind: EtcdadmCluster
    name: {{ clusterName }}-etcd
    namespace: {{ namespace }}
{% endif %}
  infrastructureRef:
    apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
    kind: NutanixCluster
    name: {{ clusterName }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: NutanixCluster
metadata:
  name: {{ clusterName }}
  namespace: {{ namespace }}
spec:
  controlPlaneEndpoint:
    host: {{ controlPlaneEndpointIp }}
    port: 6443
  prismCentral:
    address: {{ nutanixEndpoint }}
    port: {{ nutanixPort }}
    insecure: false
    credentialRef:
      kind: Secret
      name: {{ clusterName }}-nutanix-credentials
---
apiVersion: v1
kind: Secret
metadata:
  name: {{ clusterName }}-nutanix-credentials
  namespace: {{ namespace }}
  labels:
    clusterctl.cluster.x-k8s.io/move: "true"
stringData:
  username: "{{ nutanixUsername }}"
  password: "{{ nutanixPassword }}"
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
      kind: NutanixMachineTemplate
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
        extraArgs:
          cloud-provider: external
{{ apiServerExtraArgs }}
      controllerManager:
        extraArgs:
          cloud-provider: external
{{ controllerManagerExtraArgs }}
      scheduler:
        extraArgs:
{{ schedulerExtraArgs }}
{% if registryMirror %}
      registryMirror:
        endpoint: {{ registryMirrorEndpoint }}
{% if registryCACert %}
        caCert: |
{{ registryCACert | indent(spaces=10) }}
{% endif %}
{% endif %}
    files:
    - content: |
        apiVersion: v1
        kind: Pod
        metadata:
          name: kube-vip
          namespace: kube-system
        spec:
          containers:
          - name: kube-vip
            image: {{ kubeVipImage }}
            args: [manager]
            env:
            - name: address
              value: {{ controlPlaneEndpointIp }}
            - name: port
              value: "6443"
            imagePullPolicy: IfNotPresent
            securityContext:
              capabilities:
                add: [NET_ADMIN, NET_RAW]
            volumeMounts:
            - mountPath: /etc/kubernetes/admin.conf
              name: kubeconfig
          hostNetwork: true
          volumes:
          - hostPath:
              path: /etc/kubernetes/admin.conf
              type: FileOrCreate
            name: kubeconfig
      owner: root:root
      path: /etc/kubernetes/manifests/kube-vip.yaml
{% if proxyConfig %}
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
          cloud-provider: external
{{ cpKubeletExtraArgs }}
{% if controlPlaneHasTaints %}
        taints:
{{ controlPlaneTaints }}
{% endif %}
    joinConfiguration:
      nodeRegistration:
        kubeletExtraArgs:
          cloud-provider: external
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
kind: NutanixMachineTemplate
metadata:
  name: {{ controlPlaneTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
      providerID: nutanix
      vcpusPerSocket: {{ controlPlaneVcpusPerSocket }}
      vcpuSockets: {{ controlPlaneVcpuSockets }}
      memorySize: {{ controlPlaneMemorySize }}
      systemDiskSize: {{ controlPlaneSystemDiskSize }}
      image:
        type: name
        name: {{ controlPlaneImage }}
      cluster:
        type: name
        name: {{ controlPlanePrismCluster }}
      subnet:
      - type: name
        name: {{ controlPlaneSubnet }}
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
    users:
    - name: {{ etcdSshUsername }}
      sshAuthorizedKeys:
      - '{{ etcdSshAuthorizedKey }}'
      sudo: ALL=(ALL) NOPASSWD:ALL
  infrastructureTemplate:
    apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
    kind: NutanixMachineTemplate
    name: {{ etcdTemplateName }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: NutanixMachineTemplate
metadata:
  name: {{ etcdTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
      providerID: nutanix
      vcpusPerSocket: {{ etcdVcpusPerSocket }}
      vcpuSockets: {{ etcdVcpuSockets }}
      memorySize: {{ etcdMemorySize }}
      systemDiskSize: {{ etcdSystemDiskSize }}
      image:
        type: name
        name: {{ etcdImage }}
      cluster:
        type: name
        name: {{ etcdPrismCluster }}
      subnet:
      - type: name
        name: {{ etcdSubnet }}
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
      format: {{ workerFormat }}
      joinConfiguration:
        nodeRegistration:
          kubeletExtraArgs:
            cloud-provider: external
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
{% if proxyConfig %}
      files:
      - content: |
          [Service]
          Environment="HTTP_PROXY={{ httpProxy }}"
          Environment="HTTPS_PROXY={{ httpsProxy }}"
          Environment="NO_PROXY={{ noProxy | join(sep=",") }}"
        owner: root:root
        path: /etc/systemd/system/containerd.service.d/http-proxy.conf
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
        kind: NutanixMachineTemplate
        name: {{ workloadTemplateName }}
      version: {{ kubernetesVersion }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: NutanixMachineTemplate
metadata:
  name: {{ workloadTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
      providerID: nutanix
      vcpusPerSocket: {{ workerVcpusPerSocket }}
      vcpuSockets: {{ workerVcpuSockets }}
      memorySize: {{ workerMemorySize }}
      systemDiskSize: {{ workerSystemDiskSize }}
      image:
        type: name
        name: {{ workerImage }}
      cluster:
        type: name
        name: {{ workerPrismCluster }}
      subnet:
      - type: name
        name: {{ workerSubnet }}
"#;
