use async_trait::async_trait;
use tera::Context;

use crate::kubeapi::ClusterApi;
use crate::reconcile::{Operation, ProviderAdapter};
use crate::retry::CancellationToken;
use drydock_definitions::{Catalogue, ClusterSpec, MachineConfig, ProviderKind};

use super::super::super::Result;
use super::credentials_from_env;

/// Kubeadm manifests for vSphere-backed clusters
///
/// The template set follows the CAPV object model: a VSphereCluster per
/// cluster, one VSphereMachineTemplate per role, kube-vip pinned as a static
/// pod on the control plane.
pub struct VSphereAdapter;

fn placement(ctx: &mut Context, prefix: &str, mc: &MachineConfig) -> Result<()> {
    let m = match mc {
        MachineConfig::VSphere(m) => m,
        _ => bail!("vsphere reconciler handed a non-vsphere machine config"),
    };
    ctx.insert(&format!("{}Datastore", prefix), &m.datastore);
    ctx.insert(&format!("{}Folder", prefix), &m.folder);
    ctx.insert(&format!("{}Network", prefix), &m.network);
    ctx.insert(&format!("{}ResourcePool", prefix), &m.resourcePool);
    ctx.insert(&format!("{}VMTemplate", prefix), &m.template);
    ctx.insert(&format!("{}MemoryMiB", prefix), &m.memoryMiB);
    ctx.insert(&format!("{}NumCPUs", prefix), &m.numCPUs);
    ctx.insert(&format!("{}DiskGiB", prefix), &m.diskGiB);
    ctx.insert(&format!("{}Tags", prefix), &m.tags);
    Ok(())
}

fn datacenter_context(spec: &ClusterSpec, ctx: &mut Context) -> Result<()> {
    let dc = match &spec.datacenter {
        drydock_definitions::DatacenterConfig::VSphere(d) => d,
        _ => bail!("vsphere reconciler handed a non-vsphere datacenter"),
    };
    ctx.insert("vsphereServer", &dc.server);
    ctx.insert("vsphereDatacenter", &dc.datacenter);
    ctx.insert("vsphereNetwork", &dc.network);
    ctx.insert("vsphereInsecure", &dc.insecure);
    ctx.insert("vsphereThumbprint", &dc.thumbprint.clone().unwrap_or_default());
    Ok(())
}

#[async_trait]
impl ProviderAdapter for VSphereAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::VSphere
    }

    fn control_plane_template(&self) -> &'static str {
        CONTROL_PLANE_TEMPLATE
    }

    fn workers_template(&self) -> &'static str {
        WORKERS_TEMPLATE
    }

    fn control_plane_context(&self, spec: &ClusterSpec, ctx: &mut Context) -> Result<()> {
        datacenter_context(spec, ctx)?;
        let (user, pass) = credentials_from_env(ProviderKind::VSphere)?;
        ctx.insert("vsphereUsername", &user);
        ctx.insert("vspherePassword", &pass);
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
        // datacenter reachability is the webhook's problem; here we only
        // insist the credentials exist before rendering secrets
        credentials_from_env(ProviderKind::VSphere).map(|_| ())
    }

    async fn validate_upgrade(
        &self,
        _client: &dyn ClusterApi,
        _current: &ClusterSpec,
        _new: &ClusterSpec,
        _operation: &Operation,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        credentials_from_env(ProviderKind::VSphere).map(|_| ())
    }

    fn storage_class_manifest(&self, _spec: &ClusterSpec) -> Option<String> {
        Some(STORAGE_CLASS.to_string())
    }
}

const STORAGE_CLASS: &str = r#"apiVersion: storage.k8s.io/v1
kind: StorageClass
metadata:
  name: standard
  annotations:
    storageclass.kubernetes.io/is-default-class: "true"
provisioner: csi.vsphere.vmware.com
parameters:
  storagepolicyname: vSAN Default Storage Policy
"#;

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
    kind: VSphereCluster
    name: {{ clusterName }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: VSphereCluster
metadata:
  name: {{ clusterName }}
  namespace: {{ namespace }}
spec:
  controlPlaneEndpoint:
    host: {{ controlPlaneEndpointIp }}
    port: 6443
  identityRef:
    kind: Secret
    name: {{ clusterName }}-vsphere-credentials
  server: {{ vsphereServer }}
{% if vsphereThumbprint %}
  thumbprint: '{{ vsphereThumbprint }}'
{% endif %}
---
apiVersion: v1
kind: Secret
metadata:
  name: {{ clusterName }}-vsphere-credentials
  namespace: {{ namespace }}
  labels:
    clusterctl.cluster.x-k8s.io/move: "true"
stringData:
  username: "{{ vsphereUsername }}"
  password: "{{ vspherePassword }}"
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
      kind: VSphereMachineTemplate
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
            args:
            - manager
            env:
            - name: vip_interface
              value: ""
            - name: address
              value: {{ controlPlaneEndpointIp }}
            - name: port
              value: "6443"
            - name: vip_arp
              value: "true"
            - name: vip_leaderelection
              value: "true"
            imagePullPolicy: IfNotPresent
            securityContext:
              capabilities:
                add:
                - NET_ADMIN
                - NET_RAW
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
{% if proxyConfig and controlPlaneBottlerocket %}
    proxyConfiguration:
      httpsProxy: {{ httpsProxy }}
      noProxy: [{{ noProxy | join(sep=",") }}]
{% endif %}
    format: {{ controlPlaneFormat }}
    initConfiguration:
      nodeRegistration:
        criSocket: /var/run/containerd/containerd.sock
        kubeletExtraArgs:
          cloud-provider: external
{{ cpKubeletExtraArgs }}
        name: '{% raw %}{{ ds.meta_data.hostname }}{% endraw %}'
{% if controlPlaneHasTaints %}
        taints:
{{ controlPlaneTaints }}
{% endif %}
    joinConfiguration:
      nodeRegistration:
        criSocket: /var/run/containerd/containerd.sock
        kubeletExtraArgs:
          cloud-provider: external
{{ cpKubeletExtraArgs }}
        name: '{% raw %}{{ ds.meta_data.hostname }}{% endraw %}'
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
    - hostname "{% raw %}{{ ds.meta_data.hostname }}{% endraw %}"
    - echo "127.0.0.1   localhost" >>/etc/hosts
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
kind: VSphereMachineTemplate
metadata:
  name: {{ controlPlaneTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
      cloneMode: linkedClone
      datacenter: '{{ vsphereDatacenter }}'
      datastore: '{{ controlPlaneDatastore }}'
      diskGiB: {{ controlPlaneDiskGiB }}
      folder: '{{ controlPlaneFolder }}'
      memoryMiB: {{ controlPlaneMemoryMiB }}
      network:
        devices:
        - dhcp4: true
          networkName: '{{ controlPlaneNetwork }}'
      numCPUs: {{ controlPlaneNumCPUs }}
      resourcePool: '{{ controlPlaneResourcePool }}'
      server: {{ vsphereServer }}
      template: '{{ controlPlaneVMTemplate }}'
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
{% if etcdHasNtp %}
    ntp:
      enabled: true
      servers: [{{ etcdNtpServers | join(sep=",") }}]
{% endif %}
    users:
    - name: {{ etcdSshUsername }}
      sshAuthorizedKeys:
      - '{{ etcdSshAuthorizedKey }}'
      sudo: ALL=(ALL) NOPASSWD:ALL
  infrastructureTemplate:
    apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
    kind: VSphereMachineTemplate
    name: {{ etcdTemplateName }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: VSphereMachineTemplate
metadata:
  name: {{ etcdTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
      cloneMode: linkedClone
      datacenter: '{{ vsphereDatacenter }}'
      datastore: '{{ etcdDatastore }}'
      diskGiB: {{ etcdDiskGiB }}
      folder: '{{ etcdFolder }}'
      memoryMiB: {{ etcdMemoryMiB }}
      network:
        devices:
        - dhcp4: true
          networkName: '{{ etcdNetwork }}'
      numCPUs: {{ etcdNumCPUs }}
      resourcePool: '{{ etcdResourcePool }}'
      server: {{ vsphereServer }}
      template: '{{ etcdVMTemplate }}'
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
          criSocket: /var/run/containerd/containerd.sock
          kubeletExtraArgs:
            cloud-provider: external
{% if workerNodeLabels %}
            node-labels: {{ workerNodeLabels }}
{% endif %}
{% if cgroupDriverSystemd %}
            cgroup-driver: systemd
{% endif %}
{{ workerKubeletExtraArgs }}
          name: '{% raw %}{{ ds.meta_data.hostname }}{% endraw %}'
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
      preKubeadmCommands:
      - hostname "{% raw %}{{ ds.meta_data.hostname }}{% endraw %}"
      - echo "127.0.0.1   localhost" >>/etc/hosts
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
        kind: VSphereMachineTemplate
        name: {{ workloadTemplateName }}
      version: {{ kubernetesVersion }}
---
apiVersion: infrastructure.cluster.x-k8s.io/v1beta1
kind: VSphereMachineTemplate
metadata:
  name: {{ workloadTemplateName }}
  namespace: {{ namespace }}
spec:
  template:
    spec:
      cloneMode: linkedClone
      datacenter: '{{ vsphereDatacenter }}'
      datastore: '{{ workerDatastore }}'
      diskGiB: {{ workerDiskGiB }}
      folder: '{{ workerFolder }}'
      memoryMiB: {{ workerMemoryMiB }}
      network:
        devices:
        - dhcp4: true
          networkName: '{{ workerNetwork }}'
      numCPUs: {{ workerNumCPUs }}
      resourcePool: '{{ workerResourcePool }}'
      server: {{ vsphereServer }}
      template: '{{ workerVMTemplate }}'
"#;
