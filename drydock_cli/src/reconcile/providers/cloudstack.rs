use async_trait::async_trait;
use tera::Context;

use crate::kubeapi::ClusterApi;
use crate::reconcile::{Operation, ProviderAdapter};
use crate::retry::CancellationToken;
use drydock_definitions::{Catalogue, ClusterSpec, MachineConfig, ProviderKind};

use super::super::super::Result;
use super::credentials_from_env;

/// CloudStack-backed clusters through CAPC
pub struct CloudStackAdapter;

fn placement(ctx: &mut Context, prefix: &str, mc: &MachineConfig) -> Result<()> {
    let m = match mc {
        MachineConfig::CloudStack(m) => m,
        _ => bail!("cloudstack reconciler handed a non-cloudstack machine config"),
    };
    ctx.insert(&format!("{}ComputeOffering", prefix), &m.computeOffering);
    ctx.insert(&format!("{}VMTemplate", prefix), &m.template);
    ctx.insert(&format!("{}DiskOffering", prefix), &m.diskOffering.clone().unwrap_or_default());
    ctx.insert(&format!("{}AffinityGroupIds", prefix), &m.affinityGroupIds);
    Ok(())
}

fn datacenter_context(spec: &ClusterSpec, ctx: &mut Context) -> Result<()> {
    let dc = match &spec.datacenter {
        drydock_definitions::DatacenterConfig::CloudStack(d) => d,
        _ => bail!("cloudstack reconciler handed a non-cloudstack datacenter"),
    };
    ctx.insert("cloudstackApiEndpoint", &dc.managementApiEndpoint);
    let zones: Vec<_> = dc.zones.iter().map(|z| z.name.clone()).collect();
    ctx.insert("cloudstackZones", &zones);
    ctx.insert(
        "cloudstackZoneNetwork",
        &dc.zones.first().map(|z| z.network.clone()).unwrap_or_default(),
    );
    Ok(())
}

#[async_trait]
impl ProviderAdapter for CloudStackAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::CloudStack
    }

    fn control_plane_template(&self) -> &'static str {
        CONTROL_PLANE_TEMPLATE
    }

    fn workers_template(&self) -> &'static str {
        WORKERS_TEMPLATE
    }

    fn control_plane_context(&self, spec: &ClusterSpec, ctx: &mut Context) -> Result<()> {
        datacenter_context(spec, ctx)?;
        let (user, pass) = credentials_from_env(ProviderKind::CloudStack)?;
        ctx.insert("cloudstackApiKey", &user);
        ctx.insert("cloudstackSecretKey", &pass);
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
        credentials_from_env(ProviderKind::CloudStack).map(|_| ())
    }

    async fn validate_upgrade(
        &self,
        _client: &dyn ClusterApi,
        _current: &ClusterSpec,
        _new: &ClusterSpec,
        _operation: &Operation,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        credentials_from_env(ProviderKind::CloudStack).map(|_| ())
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
    kind: CloudStackCluster
    name: {{ clusterName }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: CloudStackCluster
metadata:
  name: {{ clusterName }}
  namespace: {{ namespace }}
spec:
  controlPlaneEndpoint:
    host: {{ controlPlaneEndpointIp }}
    port: 6443
  failureDomains:
{% for zone in cloudstackZones %}
  - name: {{ zone }}
    zone:
      name: {{ zone }}
      network:
        name: {{ cloudstackZoneNetwork }}
    acsEndpoint:
      name: {{ clusterName }}-cloudstack-credentials
      namespace: {{ namespace }}
{% endfor %}
---
apiVersion: v1
kind: Secret
metadata:
  name: {{ clusterName }}-cloudstack-credentials
  namespace: {{ namespace }}
  labels:
    clusterctl.cluster.x-k8s.io/move: "true"
stringData:
  api-url: "{{ cloudstackApiEndpoint }}"
  api-key: "{{ cloudstackApiKey }}"
  secret-key: "{{ cloudstackSecretKey }}"
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
      kind: CloudStackMachineTemplate
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
    format: {{ controlPlaneFormat }}
    initConfiguration:
      nodeRegistration:
        kubeletExtraArgs:
          provider-id: "cloudstack:///'{% raw %}{{ ds.meta_data.instance_id }}{% endraw %}'"
{{ cpKubeletExtraArgs }}
{% if controlPlaneHasTaints %}
        taints:
{{ controlPlaneTaints }}
{% endif %}
    joinConfiguration:
      nodeRegistration:
        kubeletExtraArgs:
          provider-id: "cloudstack:///'{% raw %}{{ ds.meta_data.instance_id }}{% endraw %}'"
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
    preKubeadmCommands:
    - swapoff -a
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
kind: CloudStackMachineTemplate
metadata:
  name: {{ controlPlaneTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
      offering:
        name: {{ controlPlaneComputeOffering }}
      template:
        name: {{ controlPlaneVMTemplate }}
{% if controlPlaneDiskOffering %}
      diskOffering:
        name: {{ controlPlaneDiskOffering }}
        mountPath: /var/lib
        device: /dev/vdb
        filesystem: ext4
        label: data_disk
{% endif %}
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
    kind: CloudStackMachineTemplate
    name: {{ etcdTemplateName }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: CloudStackMachineTemplate
metadata:
  name: {{ etcdTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
      offering:
        name: {{ etcdComputeOffering }}
      template:
        name: {{ etcdVMTemplate }}
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
            provider-id: "cloudstack:///'{% raw %}{{ ds.meta_data.instance_id }}{% endraw %}'"
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
      preKubeadmCommands:
      - swapoff -a
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
        kind: CloudStackMachineTemplate
        name: {{ workloadTemplateName }}
      version: {{ kubernetesVersion }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: CloudStackMachineTemplate
metadata:
  name: {{ workloadTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
      offering:
        name: {{ workerComputeOffering }}
      template:
        name: {{ workerVMTemplate }}
{% if workerDiskOffering %}
      diskOffering:
        name: {{ workerDiskOffering }}
        mountPath: /var/lib
        device: /dev/vdb
        filesystem: ext4
        label: data_disk
{% endif %}
"#;
