use async_trait::async_trait;
use tera::Context;

use crate::hardware;
use crate::kubeapi::ClusterApi;
use crate::reconcile::{Operation, ProviderAdapter};
use crate::retry::CancellationToken;
use drydock_definitions::{Catalogue, ClusterSpec, MachineConfig, ProviderKind};

use super::super::super::Result;

/// Bare metal through the tinkerbell stack
///
/// Placement is a hardware label selector instead of any hypervisor
/// coordinates, and both create and upgrade run the catalogue validations
/// plus the bmc pre-flight before anything renders.
pub struct TinkerbellAdapter;

fn selector_context(ctx: &mut Context, prefix: &str, mc: &MachineConfig) -> Result<()> {
    let selector = match mc.hardware_selector() {
        Some(s) => s,
        None => bail!("tinkerbell reconciler handed a non-tinkerbell machine config"),
    };
    // pre-rendered at the matchLabels depth of the machine templates
    ctx.insert(
        &format!("{}HardwareSelector", prefix),
        &crate::render::to_partial_yaml(selector, 14)?,
    );
    Ok(())
}

fn datacenter_context(spec: &ClusterSpec, ctx: &mut Context) -> Result<()> {
    let dc = match &spec.datacenter {
        drydock_definitions::DatacenterConfig::Tinkerbell(d) => d,
        _ => bail!("tinkerbell reconciler handed a non-tinkerbell datacenter"),
    };
    ctx.insert("tinkerbellIP", &dc.tinkerbellIP);
    ctx.insert("osImageURL", &dc.osImageURL.clone().unwrap_or_default());
    Ok(())
}

#[async_trait]
impl ProviderAdapter for TinkerbellAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Tinkerbell
    }

    fn control_plane_template(&self) -> &'static str {
        CONTROL_PLANE_TEMPLATE
    }

    fn workers_template(&self) -> &'static str {
        WORKERS_TEMPLATE
    }

    fn control_plane_context(&self, spec: &ClusterSpec, ctx: &mut Context) -> Result<()> {
        datacenter_context(spec, ctx)?;
        selector_context(ctx, "controlPlane", spec.control_plane_machine()?)?;
        if let Some(etcd) = spec.etcd_machine()? {
            selector_context(ctx, "etcd", etcd)?;
        }
        Ok(())
    }

    fn worker_group_context(&self, spec: &ClusterSpec, group: &str, ctx: &mut Context) -> Result<()> {
        datacenter_context(spec, ctx)?;
        selector_context(ctx, "worker", spec.worker_machine(group)?)
    }

    /// Catalogue checks then the bmc pre-flight, before any template renders
    async fn validate_create(
        &self,
        client: &dyn ClusterApi,
        spec: &ClusterSpec,
        catalogue: Option<&Catalogue>,
        bmc_timeout: std::time::Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let catalogue = match catalogue {
            Some(c) => c,
            None => bail!("bare metal create needs a hardware inventory (--hardware-csv)"),
        };
        hardware::validate_create_capacity(catalogue, spec)?;
        hardware::bmc_preflight(client, catalogue, bmc_timeout, cancel).await
    }

    async fn validate_upgrade(
        &self,
        client: &dyn ClusterApi,
        current: &ClusterSpec,
        new: &ClusterSpec,
        operation: &Operation,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        hardware::validate_capacity_for_operation(client, current, new, operation).await
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
    kind: TinkerbellCluster
    name: {{ clusterName }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: TinkerbellCluster
metadata:
  name: {{ clusterName }}
  namespace: {{ namespace }}
spec:
  controlPlaneEndpoint:
    host: {{ controlPlaneEndpointIp }}
    port: 6443
  imageLookupBaseRegistry: "{{ tinkerbellIP }}:8080/"
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
      kind: TinkerbellMachineTemplate
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
            - name: vip_arp
              value: "true"
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
{% if proxyConfig and not controlPlaneBottlerocket %}
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
          provider-id: '{% raw %}{{ ds.meta_data.instance_id }}{% endraw %}'
{{ cpKubeletExtraArgs }}
{% if controlPlaneHasTaints %}
        taints:
{{ controlPlaneTaints }}
{% endif %}
    joinConfiguration:
      nodeRegistration:
        kubeletExtraArgs:
          provider-id: '{% raw %}{{ ds.meta_data.instance_id }}{% endraw %}'
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
kind: TinkerbellMachineTemplate
metadata:
  name: {{ controlPlaneTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
      hardwareAffinity:
        required:
        - labelSelector:
            matchLabels:
{{ controlPlaneHardwareSelector }}
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
    kind: TinkerbellMachineTemplate
    name: {{ etcdTemplateName }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: TinkerbellMachineTemplate
metadata:
  name: {{ etcdTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
      hardwareAffinity:
        required:
        - labelSelector:
            matchLabels:
{{ etcdHardwareSelector }}
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
            provider-id: '{% raw %}{{ ds.meta_data.instance_id }}{% endraw %}'
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
{% if proxyConfig and not workerBottlerocket %}
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
        kind: TinkerbellMachineTemplate
        name: {{ workloadTemplateName }}
      version: {{ kubernetesVersion }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: TinkerbellMachineTemplate
metadata:
  name: {{ workloadTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
      hardwareAffinity:
        required:
        - labelSelector:
            matchLabels:
{{ workerHardwareSelector }}
"#;
