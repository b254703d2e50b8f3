use std::time::{Duration, Instant};

use crate::capi::{find_condition, ConditionStatus};
use crate::kubeapi::ClusterApi;
use crate::retry::{Backoff, CancellationToken};
use drydock_definitions::ClusterSpec;

use super::super::{ErrorKind, Result};

/// CAPI condition types the waits observe
pub const AVAILABLE_CONDITION: &str = "Available";
pub const READY_CONDITION: &str = "Ready";
pub const NODE_HEALTHY_CONDITION: &str = "NodeHealthy";

struct PollLoop {
    what: String,
    started: Instant,
    timeout: Duration,
    backoff: Backoff,
}

impl PollLoop {
    fn new(what: &str, timeout: Duration, backoff: Backoff) -> Self {
        PollLoop {
            what: what.to_string(),
            started: Instant::now(),
            timeout,
            backoff,
        }
    }

    /// Sleep towards the next poll, or time out
    async fn tick(&mut self, cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        if self.started.elapsed() > self.timeout {
            return Err(ErrorKind::WaitTimeout(self.what.clone(), self.timeout.as_secs()).into());
        }
        self.backoff.sleep().await;
        cancel.check()?;
        Ok(())
    }
}

/// Control plane Available, with all replicas up to date
pub async fn control_plane_ready(
    client: &dyn ClusterApi,
    cluster: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut poll = PollLoop::new(&format!("control plane of {}", cluster), timeout, Backoff::machine_wait());
    loop {
        if let Some(kcp) = client.get_kubeadm_control_plane(cluster).await? {
            if let Some(status) = &kcp.status {
                let expected = kcp.spec.replicas.unwrap_or(1);
                let ready = status.readyReplicas.unwrap_or(0) >= expected;
                let available = status.ready.unwrap_or(false)
                    || find_condition(&status.conditions, AVAILABLE_CONDITION)
                        .map(|c| c.state() == ConditionStatus::True)
                        .unwrap_or(false);
                if ready && available {
                    info!("control plane of {} is available", cluster);
                    return Ok(());
                }
            }
        }
        poll.tick(cancel).await?;
    }
}

/// Observe the rolling replacement actually starting
///
/// Bounded but forgiving: if the roll is fast enough that we never see a
/// not-ready reading, the wait gives up quietly at its deadline.
pub async fn control_plane_not_ready(
    client: &dyn ClusterApi,
    cluster: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let started = Instant::now();
    let mut backoff = Backoff::machine_wait();
    loop {
        cancel.check()?;
        match client.get_kubeadm_control_plane(cluster).await? {
            Some(kcp) => {
                let rolling = kcp
                    .status
                    .as_ref()
                    .map(|s| {
                        !s.ready.unwrap_or(false)
                            || s.updatedReplicas.unwrap_or(0) < kcp.spec.replicas.unwrap_or(1)
                    })
                    .unwrap_or(true);
                if rolling {
                    debug!("observed {} control plane rolling", cluster);
                    return Ok(());
                }
            }
            None => return Ok(()),
        }
        if started.elapsed() > timeout {
            debug!("never observed {} control plane not-ready, assuming fast roll", cluster);
            return Ok(());
        }
        backoff.sleep().await;
    }
}

/// Managed external etcd reports ready
pub async fn etcd_ready(
    client: &dyn ClusterApi,
    etcd_cluster: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut poll = PollLoop::new(&format!("external etcd {}", etcd_cluster), timeout, Backoff::machine_wait());
    loop {
        if let Some(etcd) = client.get_etcd_cluster(etcd_cluster).await? {
            if etcd.status.as_ref().and_then(|s| s.ready).unwrap_or(false) {
                info!("external etcd {} is ready", etcd_cluster);
                return Ok(());
            }
        }
        poll.tick(cancel).await?;
    }
}

/// Every expected machine has joined and reports healthy
///
/// Empty listings retry until the ceiling; a `NodeHealthy=False` machine
/// fails the whole wait immediately.
pub async fn machines_ready(
    client: &dyn ClusterApi,
    spec: &ClusterSpec,
    timeout: Duration,
    backoff: Backoff,
    cancel: &CancellationToken,
) -> Result<()> {
    let expected = (spec.cluster.controlPlaneConfiguration.count
        + spec
            .cluster
            .workerNodeGroupConfigurations
            .iter()
            .map(|g| g.desired_count())
            .sum::<u32>()) as usize;
    let mut poll = PollLoop::new(&format!("{} machines of {}", expected, spec.name()), timeout, backoff);
    loop {
        let machines = client.list_machines(spec.name()).await?;
        if !machines.is_empty() {
            let mut ready = 0;
            for machine in &machines {
                let status = match &machine.status {
                    Some(s) => s,
                    None => continue,
                };
                match find_condition(&status.conditions, NODE_HEALTHY_CONDITION).map(|c| (c.state(), c)) {
                    Some((ConditionStatus::False, c)) => {
                        let msg = c.message.clone().unwrap_or_else(|| "node unhealthy".into());
                        return Err(ErrorKind::MachineUnhealthy(machine.metadata.name.clone().unwrap_or_default(), msg).into());
                    }
                    Some((ConditionStatus::True, _)) if status.nodeRef.is_some() => ready += 1,
                    _ => {}
                }
            }
            if ready >= expected {
                info!("all {} machines of {} are healthy", expected, spec.name());
                return Ok(());
            }
            debug!("{}/{} machines ready", ready, expected);
        }
        poll.tick(cancel).await?;
    }
}

/// One machine deployment with all replicas ready
///
/// A transient 0-of-N reading right after an apply is tolerated once
/// before it counts as "still rolling".
pub async fn machine_deployment_ready(
    client: &dyn ClusterApi,
    cluster: &str,
    md_name: &str,
    expected: i32,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut poll = PollLoop::new(&format!("machine deployment {}", md_name), timeout, Backoff::machine_wait());
    let mut tolerated_zero = false;
    loop {
        let mds = client.list_machine_deployments(cluster).await?;
        if let Some(md) = mds.iter().find(|m| m.metadata.name.as_deref() == Some(md_name)) {
            if let Some(status) = &md.status {
                let ready = status.readyReplicas.unwrap_or(0);
                let updated = status.updatedReplicas.unwrap_or(0);
                if ready >= expected && updated >= expected {
                    info!("machine deployment {} has {} ready replicas", md_name, ready);
                    return Ok(());
                }
                if status.replicas == 0 && expected > 0 && !tolerated_zero {
                    debug!("tolerating transient 0-of-{} reading for {}", expected, md_name);
                    tolerated_zero = true;
                }
            }
        }
        poll.tick(cancel).await?;
    }
}

/// A CAPI cluster object reports Ready
pub async fn capi_cluster_ready(
    client: &dyn ClusterApi,
    cluster: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut poll = PollLoop::new(&format!("cluster {} ready", cluster), timeout, Backoff::machine_wait());
    loop {
        if let Some(c) = client.get_capi_cluster(cluster).await? {
            let ready = c
                .status
                .as_ref()
                .map(|s| {
                    find_condition(&s.conditions, READY_CONDITION)
                        .map(|c| c.state() == ConditionStatus::True)
                        .unwrap_or(false)
                        || s.phase.as_deref() == Some("Provisioned")
                })
                .unwrap_or(false);
            if ready {
                return Ok(());
            }
        }
        poll.tick(cancel).await?;
    }
}

/// A CAPI cluster object is fully deleted
pub async fn capi_cluster_gone(
    client: &dyn ClusterApi,
    cluster: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut poll = PollLoop::new(&format!("cluster {} deletion", cluster), timeout, Backoff::machine_wait());
    loop {
        if client.get_capi_cluster(cluster).await?.is_none() {
            return Ok(());
        }
        poll.tick(cancel).await?;
    }
}
