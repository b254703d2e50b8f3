use futures_timer::Delay;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::capi::rufio::{self, CONTACTABLE_CONDITION};
use crate::capi::{find_condition, ConditionStatus, ObjectRef, SYSTEM_NAMESPACE};
use crate::kubeapi::ClusterApi;
use crate::reconcile::Operation;
use crate::retry::CancellationToken;
use drydock_definitions::{Catalogue, ClusterSpec, Hardware};

use super::{ErrorKind, Result};

/// Default bound on the bmc contactable wait
pub const DEFAULT_BMC_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// One selector-carrying role of a spec
#[derive(Debug, Clone)]
pub struct RoleSelector {
    pub role: String,
    pub count: u32,
    pub surge: u32,
    pub selector: BTreeMap<String, String>,
}

/// All hardware-selecting roles in a spec, in control plane, etcd, worker order
pub fn role_selectors(spec: &ClusterSpec) -> Result<Vec<RoleSelector>> {
    let mut roles = vec![];
    let cp = spec.control_plane_machine()?;
    if let Some(selector) = cp.hardware_selector() {
        let strategy = &spec.cluster.controlPlaneConfiguration.upgradeRolloutStrategy;
        roles.push(RoleSelector {
            role: "control-plane".into(),
            count: spec.cluster.controlPlaneConfiguration.count,
            surge: strategy
                .as_ref()
                .map(|s| s.surge_count(spec.cluster.controlPlaneConfiguration.count))
                .unwrap_or(0),
            selector: selector.clone(),
        });
    }
    if let Some(etcd_cfg) = &spec.cluster.externalEtcdConfiguration {
        if let Some(mc) = spec.etcd_machine()? {
            if let Some(selector) = mc.hardware_selector() {
                roles.push(RoleSelector {
                    role: "etcd".into(),
                    count: etcd_cfg.count,
                    surge: 0,
                    selector: selector.clone(),
                });
            }
        }
    }
    for group in &spec.cluster.workerNodeGroupConfigurations {
        let mc = spec.worker_machine(&group.name)?;
        if let Some(selector) = mc.hardware_selector() {
            roles.push(RoleSelector {
                role: group.name.clone(),
                count: group.desired_count(),
                surge: group
                    .upgradeRolloutStrategy
                    .as_ref()
                    .map(|s| s.surge_count(group.desired_count()))
                    .unwrap_or(0),
                selector: selector.clone(),
            });
        }
    }
    Ok(roles)
}

/// Every record may satisfy at most one role's selector
pub fn validate_selectors_disjoint(catalogue: &Catalogue, roles: &[RoleSelector]) -> Result<()> {
    let selectors: Vec<&BTreeMap<String, String>> = roles.iter().map(|r| &r.selector).collect();
    catalogue.assert_disjoint_selectors(&selectors)?;
    Ok(())
}

/// Create: every role needs as many matching machines as it wants nodes
pub fn validate_create_capacity(catalogue: &Catalogue, spec: &ClusterSpec) -> Result<()> {
    let roles = role_selectors(spec)?;
    validate_selectors_disjoint(catalogue, &roles)?;
    for role in &roles {
        let available = catalogue.count_matching(&role.selector);
        if available < role.count as usize {
            return Err(ErrorKind::HardwareShortage(role.role.clone(), role.count as usize, available).into());
        }
    }
    Ok(())
}

fn free_count(inventory: &[(Hardware, bool)], selector: &BTreeMap<String, String>) -> usize {
    inventory
        .iter()
        .filter(|(hw, bound)| !bound && hw.matches(selector))
        .count()
}

/// Rolling upgrade: each role needs somewhere for its surge to land
pub fn validate_rolling_capacity(inventory: &[(Hardware, bool)], spec: &ClusterSpec) -> Result<()> {
    for role in &role_selectors(spec)? {
        let needed = std::cmp::max(1, role.surge) as usize;
        let free = free_count(inventory, &role.selector);
        if free < needed {
            return Err(ErrorKind::HardwareShortage(role.role.clone(), needed, free).into());
        }
    }
    Ok(())
}

/// Scale: increases need free machines covering the delta; decreases pass
pub fn validate_scale_capacity(
    inventory: &[(Hardware, bool)],
    current: &ClusterSpec,
    new: &ClusterSpec,
) -> Result<()> {
    let current_counts: BTreeMap<String, u32> = role_selectors(current)?
        .into_iter()
        .map(|r| (r.role, r.count))
        .collect();
    for role in &role_selectors(new)? {
        let was = current_counts.get(&role.role).cloned().unwrap_or(0);
        if role.count <= was {
            continue;
        }
        let delta = (role.count - was) as usize;
        let free = free_count(inventory, &role.selector);
        if free < delta {
            return Err(ErrorKind::HardwareShortage(role.role.clone(), delta, free).into());
        }
    }
    Ok(())
}

/// Capacity validation dispatched on the detected operation
pub async fn validate_capacity_for_operation(
    client: &dyn ClusterApi,
    current: &ClusterSpec,
    new: &ClusterSpec,
    operation: &Operation,
) -> Result<()> {
    match operation {
        Operation::NoChange => Ok(()),
        Operation::ScaleOnly => {
            let inventory = client.list_hardware().await?;
            validate_scale_capacity(&inventory, current, new)
        }
        _ => {
            let inventory = client.list_hardware().await?;
            validate_rolling_capacity(&inventory, new)
        }
    }
}

/// Conventional names for the rufio objects of one hardware record
fn bmc_machine_name(hw: &Hardware) -> String {
    format!("bmc-{}", hw.hostname)
}

/// The rufio machine + auth secret documents for a catalogue
pub fn render_bmc_machines(catalogue: &Catalogue) -> Result<Vec<u8>> {
    let mut parts = vec![];
    for hw in catalogue.records() {
        let bmc = match &hw.bmc {
            Some(b) => b,
            None => continue,
        };
        let name = bmc_machine_name(hw);
        let mut machine = rufio::Machine::new(
            &name,
            rufio::RufioMachineSpec {
                connection: rufio::Connection {
                    host: bmc.ip.clone(),
                    insecureTLS: true,
                    authSecretRef: ObjectRef {
                        apiVersion: Some("v1".into()),
                        kind: "Secret".into(),
                        name: format!("{}-auth", name),
                        namespace: Some(SYSTEM_NAMESPACE.into()),
                    },
                },
            },
        );
        machine.metadata.namespace = Some(SYSTEM_NAMESPACE.into());
        let secret = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": { "name": format!("{}-auth", name), "namespace": SYSTEM_NAMESPACE },
            "stringData": { "username": bmc.username, "password": bmc.password },
        });
        parts.push(serde_yaml::to_string(&machine)?.trim_start_matches("---").trim().to_string());
        parts.push(serde_yaml::to_string(&secret)?.trim_start_matches("---").trim().to_string());
    }
    Ok(parts.join("\n---\n").into_bytes())
}

/// Apply the rufio machines and wait for every bmc to report contactable
///
/// `False` fails immediately with the controller's message verbatim;
/// `Unknown` stays transient until the overall bound runs out.
pub async fn bmc_preflight(
    client: &dyn ClusterApi,
    catalogue: &Catalogue,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let expected: Vec<String> = catalogue
        .records()
        .iter()
        .filter(|hw| hw.bmc.is_some())
        .map(|hw| bmc_machine_name(hw))
        .collect();
    if expected.is_empty() {
        debug!("no bmcs in the catalogue, skipping pre-flight");
        return Ok(());
    }

    let rendered = render_bmc_machines(catalogue)?;
    client.apply_manifests("bmc-machines", &rendered).await?;

    let started = Instant::now();
    loop {
        cancel.check()?;
        let machines = client.list_rufio_machines().await?;
        let mut pending = vec![];
        for name in &expected {
            let machine = machines.iter().find(|m| m.metadata.name.as_deref() == Some(name.as_str()));
            let condition = machine.and_then(|m| {
                m.status
                    .as_ref()
                    .and_then(|s| find_condition(&s.conditions, CONTACTABLE_CONDITION).cloned())
            });
            match condition.as_ref().map(|c| c.state()) {
                Some(ConditionStatus::True) => {}
                Some(ConditionStatus::False) => {
                    let msg = condition
                        .and_then(|c| c.message)
                        .unwrap_or_else(|| "bmc controller reported failure".into());
                    let hostname = name.trim_start_matches("bmc-").to_string();
                    return Err(ErrorKind::BmcNotContactable(hostname, msg).into());
                }
                // missing or Unknown conditions are transient
                _ => pending.push(name.clone()),
            }
        }
        if pending.is_empty() {
            info!("all {} bmcs contactable", expected.len());
            return Ok(());
        }
        if started.elapsed() > timeout {
            return Err(ErrorKind::WaitTimeout(
                format!("bmc contactable ({} pending)", pending.len()),
                timeout.as_secs(),
            )
            .into());
        }
        debug!("waiting on {} bmcs", pending.len());
        Delay::new(Duration::from_secs(5)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drydock_definitions::{Catalogue, ClusterSpec};

    const SPEC: &str = r#"
apiVersion: drydock.dev/v1alpha1
kind: Cluster
metadata:
  name: metal
spec:
  kubernetesVersion: "1.23"
  controlPlaneConfiguration:
    count: 1
    endpoint:
      host: 10.20.30.40
    machineGroupRef:
      kind: TinkerbellMachineConfig
      name: metal-cp
  workerNodeGroupConfigurations:
  - name: md-0
    count: 2
    machineGroupRef:
      kind: TinkerbellMachineConfig
      name: metal-workers
    upgradeRolloutStrategy:
      rollingUpdate:
        maxSurge: 2
        maxUnavailable: 0
  clusterNetwork:
    pods:
      cidrBlocks: ["192.168.0.0/16"]
    services:
      cidrBlocks: ["10.96.0.0/12"]
  datacenterRef:
    kind: TinkerbellDatacenterConfig
    name: metal
---
apiVersion: drydock.dev/v1alpha1
kind: TinkerbellDatacenterConfig
metadata:
  name: metal
spec:
  tinkerbellIP: 10.20.30.50
---
apiVersion: drydock.dev/v1alpha1
kind: TinkerbellMachineConfig
metadata:
  name: metal-cp
spec:
  hardwareSelector:
    type: cp
---
apiVersion: drydock.dev/v1alpha1
kind: TinkerbellMachineConfig
metadata:
  name: metal-workers
spec:
  hardwareSelector:
    type: worker
"#;

    const CSV: &str = "\
hostname,bmc_ip,bmc_username,bmc_password,mac,ip_address,gateway,nameservers,netmask,disk,labels
node-1,10.0.0.1,admin,secret,00:00:00:00:00:01,10.1.0.1,10.1.0.254,8.8.8.8,255.255.255.0,/dev/sda,type=cp
node-2,10.0.0.2,admin,secret,00:00:00:00:00:02,10.1.0.2,10.1.0.254,8.8.8.8,255.255.255.0,/dev/sda,type=worker
node-3,10.0.0.3,admin,secret,00:00:00:00:00:03,10.1.0.3,10.1.0.254,8.8.8.8,255.255.255.0,/dev/sda,type=worker
";

    fn spec() -> ClusterSpec {
        ClusterSpec::from_str(SPEC, None).unwrap()
    }

    fn catalogue() -> Catalogue {
        Catalogue::from_csv_reader(CSV.as_bytes()).unwrap()
    }

    #[test]
    fn create_capacity_satisfied() {
        assert!(validate_create_capacity(&catalogue(), &spec()).is_ok());
    }

    #[test]
    fn create_capacity_shortage() {
        let short = CSV.lines().take(3).collect::<Vec<_>>().join("\n");
        let cat = Catalogue::from_csv_reader(short.as_bytes()).unwrap();
        let err = validate_create_capacity(&cat, &spec()).unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::Infrastructure);
        // md-0 wants 2, only 1 matches
        assert!(err.to_string().contains("md-0"));
    }

    #[test]
    fn rolling_needs_free_surge_room() {
        let all_free: Vec<_> = catalogue().records().iter().cloned().map(|h| (h, false)).collect();
        // surge of 2 but only 1 free worker: node-2 bound, node-3 free
        let mut one_bound = all_free.clone();
        one_bound[1].1 = true;
        let err = validate_rolling_capacity(&one_bound, &spec()).unwrap_err();
        assert!(err.to_string().contains("md-0"));

        // cp has no surge strategy: max(1, 0) = 1 free cp machine required
        let mut cp_bound = all_free.clone();
        cp_bound[0].1 = true;
        assert!(validate_rolling_capacity(&cp_bound, &spec()).is_err());
    }

    #[test]
    fn scale_decrease_needs_nothing() {
        let grown = SPEC.replace("count: 2", "count: 1");
        let new = ClusterSpec::from_str(&grown, None).unwrap();
        // everything bound: a decrease still validates
        let bound: Vec<_> = catalogue().records().iter().cloned().map(|h| (h, true)).collect();
        assert!(validate_scale_capacity(&bound, &spec(), &new).is_ok());
    }

    #[test]
    fn scale_increase_is_delta_aware() {
        let grown = SPEC.replace("count: 2", "count: 3");
        let new = ClusterSpec::from_str(&grown, None).unwrap();
        // one free worker covers the +1 delta
        let mut inventory: Vec<_> = catalogue().records().iter().cloned().map(|h| (h, true)).collect();
        inventory[2].1 = false;
        assert!(validate_scale_capacity(&inventory, &spec(), &new).is_ok());
        inventory[2].1 = true;
        assert!(validate_scale_capacity(&inventory, &spec(), &new).is_err());
    }

    #[test]
    fn bmc_machines_render() {
        let rendered = render_bmc_machines(&catalogue()).unwrap();
        let text = String::from_utf8(rendered).unwrap();
        assert!(text.contains("bmc-node-1"));
        assert!(text.contains("bmc-node-1-auth"));
        assert!(text.contains("host: 10.0.0.1"));
        assert_eq!(text.matches("kind: Machine").count(), 3);
        assert_eq!(text.matches("kind: Secret").count(), 3);
    }
}
