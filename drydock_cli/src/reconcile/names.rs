use chrono::{DateTime, Utc};

/// Template identity is the rotation signal: a fresh timestamp suffix makes
/// the controllers roll nodes, a byte-identical name preserves them. Nothing
/// else tracks "needs rotation".
pub fn timestamped(base: &str, now: &DateTime<Utc>) -> String {
    format!("{}-{}", base, now.timestamp())
}

pub fn control_plane_template_base(cluster: &str) -> String {
    format!("{}-control-plane-template", cluster)
}

pub fn etcd_template_base(cluster: &str) -> String {
    format!("{}-etcd-template", cluster)
}

pub fn worker_machine_template_base(cluster: &str, group: &str) -> String {
    format!("{}-{}", cluster, group)
}

pub fn kubeadm_config_template_base(cluster: &str, group: &str) -> String {
    format!("{}-{}-template", cluster, group)
}

/// MachineDeployment objects are named without a timestamp; their identity
/// is stable across rolls.
pub fn machine_deployment_name(cluster: &str, group: &str) -> String {
    format!("{}-{}", cluster, group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn timestamps_are_injected_not_sampled() {
        let now = Utc.ymd(2022, 7, 19).and_hms(16, 5, 0);
        let a = timestamped(&control_plane_template_base("mgmt"), &now);
        let b = timestamped(&control_plane_template_base("mgmt"), &now);
        assert_eq!(a, b); // same injected clock, same name
        assert_eq!(a, format!("mgmt-control-plane-template-{}", now.timestamp()));

        let later = Utc.ymd(2022, 7, 19).and_hms(16, 6, 0);
        assert_ne!(a, timestamped(&control_plane_template_base("mgmt"), &later));
    }

    #[test]
    fn name_shapes() {
        assert_eq!(machine_deployment_name("mgmt", "md-0"), "mgmt-md-0");
        assert_eq!(kubeadm_config_template_base("mgmt", "md-0"), "mgmt-md-0-template");
        assert_eq!(etcd_template_base("mgmt"), "mgmt-etcd-template");
    }
}
