use tera::Context;

use drydock_definitions::{ClusterSpec, MachineConfig, OSFamily};

use super::super::Result;
use super::extraargs::{self, Identities};

/// Build the shared value map for a cluster spec
///
/// Provider modules layer their placement values on top, and build options
/// get the final word.
pub fn base_context(spec: &ClusterSpec) -> Result<Context> {
    let cluster = &spec.cluster;
    let mut ctx = Context::new();

    ctx.insert("clusterName", &cluster.name);
    ctx.insert("namespace", &crate::capi::SYSTEM_NAMESPACE);
    ctx.insert("kubernetesVersion", &spec.bundle.kubernetesVersion);
    ctx.insert("controlPlaneReplicas", &cluster.controlPlaneConfiguration.count);
    ctx.insert(
        "controlPlaneEndpointIp",
        &cluster.control_plane_endpoint().unwrap_or(""),
    );
    ctx.insert("podCidrs", &cluster.clusterNetwork.pods.cidrBlocks);
    ctx.insert("serviceCidrs", &cluster.clusterNetwork.services.cidrBlocks);

    // component flag maps, pre-rendered at the indents the templates use
    let identities = Identities {
        oidc: spec.oidc_config().cloned(),
        aws_iam: spec.aws_iam_config().cloned(),
        pod_iam_issuer: None,
    };
    let apiserver = extraargs::apiserver_extra_args(spec, &identities);
    ctx.insert("apiServerExtraArgs", &apiserver.to_partial_yaml(10)?);
    ctx.insert(
        "controllerManagerExtraArgs",
        &extraargs::controller_manager_extra_args().to_partial_yaml(10)?,
    );
    ctx.insert("schedulerExtraArgs", &extraargs::scheduler_extra_args().to_partial_yaml(10)?);
    ctx.insert("etcdExtraArgs", &extraargs::etcd_extra_args().to_partial_yaml(12)?);
    // kubelet flags appear at different depths in the cp and worker templates
    ctx.insert("cpKubeletExtraArgs", &extraargs::kubelet_extra_args(spec).to_partial_yaml(10)?);
    ctx.insert("workerKubeletExtraArgs", &extraargs::kubelet_extra_args(spec).to_partial_yaml(12)?);
    ctx.insert("awsIamAuth", &identities.aws_iam.is_some());

    // images from the pinned bundle
    ctx.insert("pauseRepository", &spec.bundle.kubeDistro.pause.repository);
    ctx.insert("pauseVersion", &spec.bundle.kubeDistro.pause.tag);
    ctx.insert("etcdRepository", &spec.bundle.kubeDistro.etcd.repository);
    ctx.insert("etcdVersion", &spec.bundle.kubeDistro.etcd.tag);
    ctx.insert("corednsRepository", &spec.bundle.kubeDistro.coreDns.repository);
    ctx.insert("corednsVersion", &spec.bundle.kubeDistro.coreDns.tag);
    ctx.insert("kubeVipImage", &spec.bundle.kubeVip.uri());
    ctx.insert(
        "bottlerocketBootstrapRepository",
        &spec.bundle.bottlerocketBootstrap.repository,
    );
    ctx.insert("bottlerocketBootstrapVersion", &spec.bundle.bottlerocketBootstrap.tag);

    // registry mirror block, with credentials when authenticated
    if let Some(mirror) = &cluster.registryMirrorConfiguration {
        ctx.insert("registryMirror", &true);
        ctx.insert("registryMirrorEndpoint", &mirror.base_endpoint());
        ctx.insert("registryMirrorNamespaces", &mirror.namespacedEndpoints);
        ctx.insert("publicMirror", &mirror.public_mirror_endpoint());
        ctx.insert("registryCACert", &mirror.caCertContent.clone().unwrap_or_default());
        ctx.insert("registryAuth", &mirror.authenticate);
        if mirror.authenticate {
            let (user, pass) = drydock_definitions::structs::RegistryMirror::read_credentials()?;
            ctx.insert("registryUsername", &user);
            ctx.insert("registryPassword", &pass);
        }
    } else {
        ctx.insert("registryMirror", &false);
        ctx.insert("registryAuth", &false);
    }

    // proxy block with the ordered noProxy list
    if let Some(proxy) = &cluster.proxyConfiguration {
        let no_proxy = proxy.ordered_no_proxy(
            &cluster.clusterNetwork,
            spec.datacenter.endpoint().as_ref().map(|s| s.as_str()),
            cluster.control_plane_endpoint(),
            spec.datacenter.boot_ip().as_ref().map(|s| s.as_str()),
        );
        ctx.insert("proxyConfig", &true);
        ctx.insert("httpProxy", &proxy.httpProxy);
        ctx.insert("httpsProxy", &proxy.httpsProxy);
        ctx.insert("noProxy", &no_proxy);
    } else {
        ctx.insert("proxyConfig", &false);
    }

    // external etcd branch; machine values default for machine-less providers
    if let Some(etcd) = &cluster.externalEtcdConfiguration {
        ctx.insert("externalEtcd", &true);
        ctx.insert("externalEtcdReplicas", &etcd.count);
        ctx.insert("etcdSshAuthorizedKey", &"");
        ctx.insert("etcdSshUsername", &"capi-user");
        ctx.insert("etcdNtpServers", &Vec::<String>::new());
        ctx.insert("etcdHasNtp", &false);
        ctx.insert("etcdFormat", &"cloud-config");
        ctx.insert("etcdBottlerocket", &false);
        if let Ok(Some(mc)) = spec.etcd_machine() {
            insert_machine_values(&mut ctx, "etcd", mc)?;
        }
    } else {
        ctx.insert("externalEtcd", &false);
    }

    // control plane rollout strategy branch
    match &cluster.controlPlaneConfiguration.upgradeRolloutStrategy {
        Some(strategy) => {
            ctx.insert("upgradeRolloutStrategy", &true);
            ctx.insert("maxSurge", &strategy.rollingUpdate.maxSurge);
        }
        None => ctx.insert("upgradeRolloutStrategy", &false),
    }

    // control plane machine values
    let cp_machine = spec.control_plane_machine()?;
    insert_machine_values(&mut ctx, "controlPlane", cp_machine)?;
    ctx.insert(
        "controlPlaneTaints",
        &super::to_partial_yaml(&cluster.controlPlaneConfiguration.taints, 8)?,
    );
    ctx.insert("controlPlaneHasTaints", &!cluster.controlPlaneConfiguration.taints.is_empty());

    Ok(ctx)
}

/// Per-group worker values layered on a clone of the base context
pub fn worker_context(
    spec: &ClusterSpec,
    base: &Context,
    group_name: &str,
    workload_template_name: &str,
    kubeadm_config_template_name: &str,
) -> Result<Context> {
    let group = spec
        .cluster
        .workerNodeGroupConfigurations
        .iter()
        .find(|g| g.name == group_name)
        .ok_or_else(|| format!("unknown worker group {}", group_name))?;
    let mut ctx = base.clone();
    ctx.insert("workerNodeGroupName", &group.name);
    ctx.insert("workerReplicas", &group.desired_count());
    ctx.insert("workloadTemplateName", workload_template_name);
    ctx.insert("workloadkubeadmconfigTemplateName", kubeadm_config_template_name);

    let mc = spec.worker_machine(group_name)?;
    insert_machine_values(&mut ctx, "worker", mc)?;

    ctx.insert("workerTaints", &super::to_partial_yaml(&group.taints, 10)?);
    ctx.insert("workerHasTaints", &!group.taints.is_empty());
    let node_labels = group
        .labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");
    ctx.insert("workerNodeLabels", &node_labels);

    match &group.autoscalingConfiguration {
        Some(bounds) => {
            ctx.insert("autoscalingConfig", &true);
            ctx.insert("autoscalingMinCount", &bounds.minCount);
            ctx.insert("autoscalingMaxCount", &bounds.maxCount);
        }
        None => ctx.insert("autoscalingConfig", &false),
    }

    match &group.upgradeRolloutStrategy {
        Some(strategy) => {
            ctx.insert("upgradeRolloutStrategy", &true);
            ctx.insert("maxSurge", &strategy.rollingUpdate.maxSurge);
            ctx.insert("maxUnavailable", &strategy.rollingUpdate.maxUnavailable);
        }
        None => ctx.insert("upgradeRolloutStrategy", &false),
    }

    // temporary compat shim on the oldest supported minor: pin the worker
    // cgroup driver to systemd (remove when that minor ages out)
    ctx.insert(
        "cgroupDriverSystemd",
        &spec.bundle.is_minimum_supported_version(),
    );

    Ok(ctx)
}

/// Machine-config-derived values under a role prefix
///
/// Every key is role-scoped; etcd, control plane and workers may each run
/// a different os family in one cluster.
fn insert_machine_values(ctx: &mut Context, role: &str, mc: &MachineConfig) -> Result<()> {
    ctx.insert(&format!("{}SshAuthorizedKey", role), &mc.ssh_authorized_key()?);
    ctx.insert(&format!("{}SshUsername", role), &mc.base().users.first().map(|u| u.name.clone()).unwrap_or_else(|| "capi-user".into()));
    ctx.insert(&format!("{}NtpServers", role), &mc.ntp_servers());
    ctx.insert(&format!("{}HasNtp", role), &!mc.ntp_servers().is_empty());
    let os = mc.os_family();
    ctx.insert(&format!("{}Format", role), &os.bootstrap_format());
    ctx.insert(&format!("{}Bottlerocket", role), &(os == OSFamily::Bottlerocket));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::base_context;
    use drydock_definitions::ClusterSpec;

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
      kind: DockerMachineConfig
      name: mgmt-cp
  workerNodeGroupConfigurations:
  - name: md-0
    count: 2
    machineGroupRef:
      kind: DockerMachineConfig
      name: mgmt-workers
  clusterNetwork:
    pods:
      cidrBlocks: ["192.168.0.0/16"]
    services:
      cidrBlocks: ["10.96.0.0/12"]
  datacenterRef:
    kind: DockerDatacenterConfig
    name: mgmt
---
apiVersion: drydock.dev/v1alpha1
kind: DockerDatacenterConfig
metadata:
  name: mgmt
spec: {}
---
apiVersion: drydock.dev/v1alpha1
kind: DockerMachineConfig
metadata:
  name: mgmt-cp
spec: {}
---
apiVersion: drydock.dev/v1alpha1
kind: DockerMachineConfig
metadata:
  name: mgmt-workers
spec: {}
"#;

    #[test]
    fn base_values_carry_the_contract_keys() {
        let spec = ClusterSpec::from_str(SPEC, None).unwrap();
        let ctx = base_context(&spec).unwrap();
        let probe = "{{ clusterName }}|{{ kubernetesVersion }}|{{ controlPlaneReplicas }}|\
                     {{ controlPlaneEndpointIp }}|{{ externalEtcd }}|{{ controlPlaneFormat }}";
        let out = crate::render::TemplateRenderer::render(probe, &ctx).unwrap();
        assert_eq!(out.trim(), "mgmt|v1.23.7|1|10.20.30.40|false|cloud-config");

        // min supported minor turns the gate on
        let args = crate::render::TemplateRenderer::render("{{ apiServerExtraArgs }}", &ctx).unwrap();
        assert!(args.contains("feature-gates"));
        assert!(args.contains("ServiceLoadBalancerClass=true"));
    }
}
