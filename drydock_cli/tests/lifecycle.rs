extern crate drydock;

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use common::*;

use drydock::factory::FactoryBuilder;
use drydock::orchestrate::{wait, Timeouts, UpgradeOutcome};
use drydock::reconcile::{Operation, UpgradeRender};
use drydock::render;
use drydock::retry::CancellationToken;
use drydock::{ClusterSpec, ErrorCategory};

const DOCKER_SPEC: &str = include_str!("fixtures/docker-cluster.yaml");
const DOCKER_ETCD_SPEC: &str = include_str!("fixtures/docker-cluster-etcd.yaml");

fn spec(raw: &str) -> ClusterSpec {
    ClusterSpec::from_str(raw, None).unwrap()
}

fn orchestrator(spec: &ClusterSpec, timeouts: Timeouts) -> drydock::orchestrate::LifecycleOrchestrator {
    struct NoMove;
    #[async_trait::async_trait]
    impl drydock::orchestrate::CapiMover for NoMove {
        async fn move_management(
            &self,
            _from: Option<&std::path::Path>,
            _to: Option<&std::path::Path>,
        ) -> drydock::Result<()> {
            Ok(())
        }
        async fn backup(
            &self,
            _kubeconfig: Option<&std::path::Path>,
            _dir: &std::path::Path,
        ) -> drydock::Result<()> {
            Ok(())
        }
    }
    let dir = std::env::temp_dir().join(format!("drydock-test-{}", std::process::id()));
    let mut orchestrator = FactoryBuilder::new()
        .with_all_providers()
        .with_networking(spec)
        .with_artifact_dir(dir)
        .build_with_mover(Arc::new(NoMove))
        .unwrap();
    orchestrator.timeouts = timeouts;
    orchestrator
}

fn fast_timeouts() -> Timeouts {
    Timeouts {
        roll_observe: Duration::from_millis(10),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// scenario 1: create with stacked etcd and two worker groups

#[test]
fn create_renders_three_timestamped_templates() {
    let s = spec(DOCKER_SPEC);
    let now = Utc.ymd(2022, 7, 19).and_hms(16, 5, 0);
    let stamp = now.timestamp().to_string();

    let registry = {
        let o = orchestrator(&s, Timeouts::default());
        o.registry.clone()
    };
    let reconciler = registry.get(s.provider()).unwrap();
    let rendered = reconciler.render_for_create(&s, &now, &[]).unwrap();

    // exactly three machine templates, all carrying the injected timestamp
    let mut names = render::names_of_kind(&rendered.control_plane, "DockerMachineTemplate").unwrap();
    names.extend(render::names_of_kind(&rendered.workers, "DockerMachineTemplate").unwrap());
    assert_eq!(names.len(), 3);
    for name in &names {
        assert!(name.ends_with(&stamp), "{} should carry the timestamp", name);
    }
    assert_eq!(names[0], format!("mgmt-control-plane-template-{}", stamp));

    // one control plane with one replica
    let docs = render::parse_documents(&rendered.control_plane).unwrap();
    let kcp = docs
        .iter()
        .find(|d| d.get("kind").and_then(|k| k.as_str()) == Some("KubeadmControlPlane"))
        .unwrap();
    assert_eq!(kcp["spec"]["replicas"].as_i64(), Some(1));

    // no external etcd anywhere in the stream
    assert_eq!(render::count_documents_of_kind(&rendered.control_plane, "EtcdadmCluster").unwrap(), 0);

    // two machine deployments with replicas 2 and 1
    let worker_docs = render::parse_documents(&rendered.workers).unwrap();
    let replicas: Vec<i64> = worker_docs
        .iter()
        .filter(|d| d.get("kind").and_then(|k| k.as_str()) == Some("MachineDeployment"))
        .map(|d| d["spec"]["replicas"].as_i64().unwrap())
        .collect();
    assert_eq!(replicas, vec![2, 1]);
}

#[test]
fn single_node_cluster_has_empty_workers() {
    let raw = DOCKER_SPEC
        .replace(
            "  workerNodeGroupConfigurations:
  - name: md-0
    count: 2
    machineGroupRef:
      kind: DockerMachineConfig
      name: mgmt-workers
  - name: md-1
    count: 1
    machineGroupRef:
      kind: DockerMachineConfig
      name: mgmt-workers
",
            "",
        );
    let s = spec(&raw);
    let now = Utc.ymd(2022, 7, 19).and_hms(16, 5, 0);
    let o = orchestrator(&s, Timeouts::default());
    let rendered = o.registry.get(s.provider()).unwrap().render_for_create(&s, &now, &[]).unwrap();
    assert!(rendered.workers.is_empty());
    assert!(render::count_documents_of_kind(&rendered.control_plane, "KubeadmControlPlane").unwrap() == 1);
}

#[test]
fn create_render_round_trips_and_repeats() {
    let s = spec(DOCKER_SPEC);
    let now = Utc.ymd(2022, 7, 19).and_hms(16, 5, 0);
    let o = orchestrator(&s, Timeouts::default());
    let reconciler = o.registry.get(s.provider()).unwrap();

    let first = reconciler.render_for_create(&s, &now, &[]).unwrap();
    let second = reconciler.render_for_create(&s, &now, &[]).unwrap();
    // deterministic modulo the injected clock
    assert_eq!(first, second);

    // parse back and re-marshal: structurally equal documents
    let docs = render::parse_documents(&first.control_plane).unwrap();
    let reserialized = render::serialize_documents(&docs.iter().collect::<Vec<_>>()).unwrap();
    assert_eq!(docs, render::parse_documents(&reserialized).unwrap());
}

// ---------------------------------------------------------------------------
// scenario 2: scale a worker group without rotating anything

#[tokio::test]
async fn scale_strips_machine_templates() {
    let current = spec(DOCKER_SPEC);
    let new = spec(&DOCKER_SPEC.replace(
        "- name: md-0\n    count: 2",
        "- name: md-0\n    count: 3",
    ));

    let client = RecordingClient::new();
    *client.kcp.lock().unwrap() = Some(ready_kcp("mgmt", 1, "mgmt-control-plane-template-100", "v1.23.7"));
    *client.mds.lock().unwrap() = vec![
        ready_md("mgmt", "md-0", 2, "mgmt-md-0-100", "mgmt-md-0-template-100"),
        ready_md("mgmt", "md-1", 1, "mgmt-md-1-100", "mgmt-md-1-template-100"),
    ];

    let o = orchestrator(&new, fast_timeouts());
    let reconciler = o.registry.get(new.provider()).unwrap();
    let now = Utc.ymd(2022, 7, 19).and_hms(16, 5, 0);
    let cancel = CancellationToken::new();
    let outcome = reconciler
        .render_for_upgrade(&client, &current, &new, &now, &[], &cancel)
        .await
        .unwrap();

    let (operation, rendered) = match outcome {
        UpgradeRender::Changed { operation, rendered } => (operation, rendered),
        UpgradeRender::NoChange => panic!("scale should render"),
    };
    assert_eq!(operation, Operation::ScaleOnly);

    // zero machine template documents anywhere
    assert_eq!(render::count_documents_of_kind(&rendered.control_plane, "DockerMachineTemplate").unwrap(), 0);
    assert_eq!(render::count_documents_of_kind(&rendered.workers, "DockerMachineTemplate").unwrap(), 0);

    // the residual still mutates replicas on the existing deployment
    let docs = render::parse_documents(&rendered.workers).unwrap();
    let md0 = docs
        .iter()
        .find(|d| {
            d.get("kind").and_then(|k| k.as_str()) == Some("MachineDeployment")
                && d["metadata"]["name"].as_str() == Some("mgmt-md-0")
        })
        .unwrap();
    assert_eq!(md0["spec"]["replicas"].as_i64(), Some(3));

    // kubeadm config template names are reused verbatim
    let kubeadm_names = render::names_of_kind(&rendered.workers, "KubeadmConfigTemplate").unwrap();
    assert!(kubeadm_names.contains(&"mgmt-md-0-template-100".to_string()));
}

#[tokio::test]
async fn identical_specs_return_the_noop_sentinel() {
    let s = spec(DOCKER_SPEC);
    let client = RecordingClient::new();
    *client.kcp.lock().unwrap() = Some(ready_kcp("mgmt", 1, "mgmt-control-plane-template-100", "v1.23.7"));
    *client.mds.lock().unwrap() = vec![
        ready_md("mgmt", "md-0", 2, "mgmt-md-0-100", "mgmt-md-0-template-100"),
        ready_md("mgmt", "md-1", 1, "mgmt-md-1-100", "mgmt-md-1-template-100"),
    ];

    let o = orchestrator(&s, fast_timeouts());
    // through the single-flighted entry; a lone caller never collapses
    let outcome = o.reconcile_cluster(&client, &client, &s, &s).await.unwrap();
    assert_eq!(outcome, Some(UpgradeOutcome::Unchanged));
    // the sentinel means nothing was applied at all
    assert!(client.log_entries().iter().all(|e| !e.starts_with("apply:")));
}

#[tokio::test]
async fn scale_plus_upgrade_is_a_policy_violation() {
    let current = spec(DOCKER_SPEC);
    let new = spec(
        &DOCKER_SPEC
            .replace("\"1.23\"", "\"1.24\"")
            .replace("- name: md-0\n    count: 2", "- name: md-0\n    count: 4"),
    );
    let client = RecordingClient::new();
    *client.kcp.lock().unwrap() = Some(ready_kcp("mgmt", 1, "t", "v1.23.7"));

    let o = orchestrator(&new, fast_timeouts());
    let err = o.upgrade_workload(&client, &client, &current, &new).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Policy);
}

// ---------------------------------------------------------------------------
// scenario 3: version bump with external etcd

#[tokio::test]
async fn version_upgrade_with_external_etcd_orders_applies() {
    let current = spec(DOCKER_ETCD_SPEC);
    let new = spec(&DOCKER_ETCD_SPEC.replace("\"1.23\"", "\"1.24\""));

    let client = RecordingClient::new();
    *client.kcp.lock().unwrap() = Some(ready_kcp("mgmt", 1, "mgmt-control-plane-template-100", "v1.23.7"));
    *client.mds.lock().unwrap() = vec![ready_md("mgmt", "md-0", 1, "mgmt-md-0-100", "mgmt-md-0-template-100")];
    *client.etcd.lock().unwrap() = Some(ready_etcd("mgmt", 3, "mgmt-etcd-template-100"));

    let o = orchestrator(&new, fast_timeouts());
    let outcome = o.upgrade_workload(&client, &client, &current, &new).await.unwrap();
    assert_eq!(outcome, UpgradeOutcome::Applied(Operation::VersionUpgrade));

    // the etcd cluster is flagged before anything applies
    let log = client.log_entries();
    let annotate = client
        .position_of("annotate-etcd:mgmt-etcd:etcdcluster.drydock.dev/upgrade-in-progress=true")
        .expect("etcd must be annotated");
    let cp_apply = client.position_of("apply:control-plane").expect("control plane applied");
    let workers_apply = client.position_of("apply:workers").expect("workers applied");
    assert!(annotate < cp_apply, "etcd annotation must precede the control plane: {:?}", log);
    assert!(cp_apply < workers_apply, "control plane before workers: {:?}", log);
}

#[tokio::test]
async fn etcd_template_name_is_preserved_across_version_bumps() {
    let current = spec(DOCKER_ETCD_SPEC);
    let new = spec(&DOCKER_ETCD_SPEC.replace("\"1.23\"", "\"1.24\""));

    let client = RecordingClient::new();
    *client.kcp.lock().unwrap() = Some(ready_kcp("mgmt", 1, "mgmt-control-plane-template-100", "v1.23.7"));
    *client.mds.lock().unwrap() = vec![ready_md("mgmt", "md-0", 1, "mgmt-md-0-100", "mgmt-md-0-template-100")];
    *client.etcd.lock().unwrap() = Some(ready_etcd("mgmt", 3, "mgmt-etcd-template-100"));

    let o = orchestrator(&new, fast_timeouts());
    let reconciler = o.registry.get(new.provider()).unwrap();
    let now = Utc.ymd(2022, 7, 19).and_hms(16, 5, 0);
    let cancel = CancellationToken::new();
    let outcome = reconciler
        .render_for_upgrade(&client, &current, &new, &now, &[], &cancel)
        .await
        .unwrap();
    let rendered = match outcome {
        UpgradeRender::Changed { rendered, .. } => rendered,
        UpgradeRender::NoChange => panic!("version bump should render"),
    };

    let names = render::names_of_kind(&rendered.control_plane, "DockerMachineTemplate").unwrap();
    // conservative etcd behaviour: old template name reused verbatim
    assert!(names.contains(&"mgmt-etcd-template-100".to_string()));
    // while the control plane template rotates
    let stamp = now.timestamp().to_string();
    assert!(names.contains(&format!("mgmt-control-plane-template-{}", stamp)));
}

// ---------------------------------------------------------------------------
// mixed os families render per role

const VSPHERE_MIXED_OS_SPEC: &str = r#"
apiVersion: drydock.dev/v1alpha1
kind: Cluster
metadata:
  name: mixed
spec:
  kubernetesVersion: "1.24"
  controlPlaneConfiguration:
    count: 1
    endpoint:
      host: 10.20.30.40
    machineGroupRef:
      kind: VSphereMachineConfig
      name: mixed-cp
  workerNodeGroupConfigurations:
  - name: md-0
    count: 1
    machineGroupRef:
      kind: VSphereMachineConfig
      name: mixed-cp
  externalEtcdConfiguration:
    count: 3
    machineGroupRef:
      kind: VSphereMachineConfig
      name: mixed-etcd
  clusterNetwork:
    pods:
      cidrBlocks: ["192.168.0.0/16"]
    services:
      cidrBlocks: ["10.96.0.0/12"]
  datacenterRef:
    kind: VSphereDatacenterConfig
    name: mixed
---
apiVersion: drydock.dev/v1alpha1
kind: VSphereDatacenterConfig
metadata:
  name: mixed
spec:
  server: vcenter.corp
  datacenter: dc-1
  network: /dc-1/network/VM Network
---
apiVersion: drydock.dev/v1alpha1
kind: VSphereMachineConfig
metadata:
  name: mixed-cp
spec:
  osFamily: ubuntu
  datastore: ds-1
  folder: /dc-1/vm
  network: /dc-1/network/VM Network
  resourcePool: /dc-1/host/pool
  template: ubuntu-2004-kube-v1.24.2
  memoryMiB: 8192
  numCPUs: 2
  diskGiB: 25
---
apiVersion: drydock.dev/v1alpha1
kind: VSphereMachineConfig
metadata:
  name: mixed-etcd
spec:
  osFamily: bottlerocket
  datastore: ds-1
  folder: /dc-1/vm
  network: /dc-1/network/VM Network
  resourcePool: /dc-1/host/pool
  template: bottlerocket-kube-v1.24.2
  memoryMiB: 8192
  numCPUs: 2
  diskGiB: 25
"#;

#[test]
fn etcd_bootstrap_format_follows_its_own_machine_config() {
    std::env::set_var("DRYDOCK_VSPHERE_USERNAME", "administrator");
    std::env::set_var("DRYDOCK_VSPHERE_PASSWORD", "hunter2");
    let s = spec(VSPHERE_MIXED_OS_SPEC);
    let now = Utc.ymd(2022, 7, 19).and_hms(16, 5, 0);
    let o = orchestrator(&s, Timeouts::default());
    let rendered = o.registry.get(s.provider()).unwrap().render_for_create(&s, &now, &[]).unwrap();

    let docs = render::parse_documents(&rendered.control_plane).unwrap();
    // control plane on ubuntu keeps cloud-config
    let kcp = docs
        .iter()
        .find(|d| d.get("kind").and_then(|k| k.as_str()) == Some("KubeadmControlPlane"))
        .unwrap();
    assert_eq!(
        kcp["spec"]["kubeadmConfigSpec"]["format"].as_str(),
        Some("cloud-config")
    );
    // while etcd's own bottlerocket config drives its bootstrap format
    let etcd = docs
        .iter()
        .find(|d| d.get("kind").and_then(|k| k.as_str()) == Some("EtcdadmCluster"))
        .unwrap();
    assert_eq!(
        etcd["spec"]["etcdadmConfigSpec"]["format"].as_str(),
        Some("bottlerocket")
    );
}

// ---------------------------------------------------------------------------
// the create sequence end to end

#[tokio::test]
async fn create_sequence_runs_in_order() {
    let s = spec(DOCKER_SPEC);
    let client = RecordingClient::new();
    *client.kcp.lock().unwrap() = Some(ready_kcp("mgmt", 1, "mgmt-control-plane-template-100", "v1.23.7"));
    // 1 control plane + 2 md-0 + 1 md-1 machines, all healthy
    *client.machines.lock().unwrap() = vec![
        healthy_machine("mgmt", "mgmt-cp-0"),
        healthy_machine("mgmt", "mgmt-md-0-a"),
        healthy_machine("mgmt", "mgmt-md-0-b"),
        healthy_machine("mgmt", "mgmt-md-1-a"),
    ];

    let o = orchestrator(&s, fast_timeouts());
    let kubeconfig = o.create_workload(&client, &s, None).await.unwrap();
    assert!(kubeconfig.ends_with("mgmt-drydock-cluster.kubeconfig"));

    let apply = client.position_of("apply:cluster").unwrap();
    let mhc = client.position_of("apply:machine-health-checks").unwrap();
    let fetched = client.position_of("kubeconfig:mgmt").unwrap();
    assert!(apply < mhc && mhc < fetched);

    o.finish_workload_setup(&client, &s).await.unwrap();
    assert!(client.position_of("apply:networking").is_some());
    // docker has no storage class to install
    assert!(client.position_of("apply:storage-class").is_none());
}

// ---------------------------------------------------------------------------
// pause / resume

#[tokio::test]
async fn pause_then_resume_is_annotation_identity() {
    let s = spec(DOCKER_SPEC);
    let client = RecordingClient::new();
    let o = orchestrator(&s, fast_timeouts());

    o.pause_cluster(&client, "mgmt").await.unwrap();
    {
        let annotations = client.crd_annotations.lock().unwrap();
        assert_eq!(annotations["mgmt"].len(), 2);
    }
    o.resume_cluster(&client, "mgmt").await.unwrap();
    {
        let annotations = client.crd_annotations.lock().unwrap();
        assert!(annotations["mgmt"].is_empty());
    }
    // a second resume stays a no-op
    o.resume_cluster(&client, "mgmt").await.unwrap();
    assert!(client.crd_annotations.lock().unwrap()["mgmt"].is_empty());
}

// ---------------------------------------------------------------------------
// machine waits

#[tokio::test]
async fn machine_wait_times_out_on_empty_listings() {
    let s = spec(DOCKER_SPEC);
    let client = RecordingClient::new();
    let cancel = CancellationToken::new();
    let err = wait::machines_ready(
        &client,
        &s,
        Duration::from_millis(50),
        drydock::retry::Backoff::new(Duration::from_millis(10), Duration::from_millis(20), 1000),
        &cancel,
    )
    .await
    .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Transient);
}

#[tokio::test]
async fn machine_wait_fails_fast_on_unhealthy() {
    let s = spec(DOCKER_SPEC);
    let client = RecordingClient::new();
    let mut sick = healthy_machine("mgmt", "mgmt-md-0-xyz");
    sick.status.as_mut().unwrap().conditions = vec![condition("NodeHealthy", "False", Some("kubelet gone"))];
    *client.machines.lock().unwrap() = vec![sick];

    let cancel = CancellationToken::new();
    let err = wait::machines_ready(
        &client,
        &s,
        Duration::from_secs(30),
        drydock::retry::Backoff::new(Duration::from_millis(10), Duration::from_millis(20), 1000),
        &cancel,
    )
    .await
    .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Infrastructure);
    assert!(err.to_string().contains("kubelet gone"));
}

#[tokio::test]
async fn cancellation_surfaces_unchanged() {
    let s = spec(DOCKER_SPEC);
    let client = RecordingClient::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = wait::machines_ready(
        &client,
        &s,
        Duration::from_secs(30),
        drydock::retry::Backoff::new(Duration::from_millis(10), Duration::from_millis(20), 1000),
        &cancel,
    )
    .await
    .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Cancelled);
}

// ---------------------------------------------------------------------------
// bmc pre-flight

#[tokio::test]
async fn bmc_false_surfaces_its_message_verbatim() {
    use drydock::capi::rufio;
    let client = RecordingClient::new();
    let csv = "\
hostname,bmc_ip,bmc_username,bmc_password,mac,ip_address,gateway,nameservers,netmask,disk,labels
node-1,10.0.0.1,admin,secret,00:00:00:00:00:01,10.1.0.1,10.1.0.254,8.8.8.8,255.255.255.0,/dev/sda,type=cp
";
    let catalogue = drydock::Catalogue::from_csv_reader(csv.as_bytes()).unwrap();
    let mut machine = rufio::Machine::new(
        "bmc-node-1",
        rufio::RufioMachineSpec {
            connection: rufio::Connection {
                host: "10.0.0.1".into(),
                insecureTLS: true,
                authSecretRef: Default::default(),
            },
        },
    );
    machine.metadata.name = "bmc-node-1".into();
    machine.status = Some(rufio::RufioMachineStatus {
        conditions: vec![condition("Contactable", "False", Some("auth-failed"))],
    });
    *client.rufio_machines.lock().unwrap() = vec![machine];

    let cancel = CancellationToken::new();
    let err = drydock::hardware::bmc_preflight(&client, &catalogue, Duration::from_secs(5), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Infrastructure);
    assert!(err.to_string().contains("auth-failed"));
    // the machines were applied before the wait began
    assert_eq!(client.position_of("apply:bmc-machines"), Some(0));
}

// ---------------------------------------------------------------------------
// move

#[tokio::test]
async fn move_validates_both_sides() {
    let s = spec(DOCKER_SPEC);
    let client = RecordingClient::new();
    let mut cluster = drydock::capi::Cluster::new("mgmt", Default::default());
    cluster.metadata.name = "mgmt".into();
    cluster.status = Some(drydock::capi::ClusterStatus {
        phase: Some("Provisioned".into()),
        controlPlaneReady: Some(true),
        conditions: vec![condition("Ready", "True", None)],
    });
    *client.capi_clusters.lock().unwrap() = vec![cluster];
    *client.kcp.lock().unwrap() = Some(ready_kcp("mgmt", 1, "t", "v1.23.7"));
    *client.mds.lock().unwrap() = vec![ready_md("mgmt", "md-0", 2, "a", "b")];

    let o = orchestrator(&s, fast_timeouts());
    // same scripted state on both sides: nothing lost, move passes
    o.move_capi(&client, &client, None, None).await.unwrap();
}
