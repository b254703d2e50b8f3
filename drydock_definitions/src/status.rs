use chrono::{SecondsFormat, Utc};

/// Reconciliation is suspended while this annotation is present
pub const PAUSED_ANNOTATION: &str = "cluster.drydock.dev/paused";

/// Controllers must leave the cluster alone; the cli owns it right now
pub const MANAGED_BY_CLI_ANNOTATION: &str = "cluster.drydock.dev/managed-by-cli";

/// Set on the etcdadm cluster before control plane templates rotate;
/// removed externally once etcd reports ready again
pub const ETCD_UPGRADE_IN_PROGRESS_ANNOTATION: &str = "etcdcluster.drydock.dev/upgrade-in-progress";

pub fn make_date() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Status block surfaced on the persisted cluster object
///
/// `failureMessage` is written at most once per reconcile, with the first
/// fatal error seen; transient noise stays in the event stream.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    #[serde(default)]
    pub conditions: Conditions,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Conditions {
    /// Control plane reached Available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_ready: Option<Condition>,

    /// Every machine deployment reports its replicas ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers_ready: Option<Condition>,

    /// External etcd reached ready (absent on stacked etcd)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_ready: Option<Condition>,

    /// Default networking installed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_cni_configured: Option<Condition>,
}

/// A single named condition, shaped like kubernetes conditions
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Condition {
    /// Whether or not in a good state
    pub status: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// When the condition was last written (RFC 3339 timestamp)
    #[serde(rename = "lastTransitionTime")]
    pub last_transition: String,
}

impl Condition {
    pub fn ok() -> Self {
        Condition {
            status: true,
            reason: None,
            message: None,
            last_transition: make_date(),
        }
    }

    pub fn bad(reason: &str, msg: String) -> Self {
        Condition {
            status: false,
            reason: Some(reason.into()),
            message: Some(msg),
            last_transition: make_date(),
        }
    }
}

impl ClusterStatus {
    /// Record the first fatal failure only
    pub fn record_failure(&mut self, msg: String) {
        if self.failure_message.is_none() {
            self.failure_message = Some(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClusterStatus, Condition};

    #[test]
    fn first_failure_wins() {
        let mut status = ClusterStatus::default();
        status.record_failure("waiting for control plane: timed out".into());
        status.record_failure("second error".into());
        assert_eq!(
            status.failure_message.unwrap(),
            "waiting for control plane: timed out"
        );
    }

    #[test]
    fn conditions_serialize_like_kube() {
        let cond = Condition::bad("MachineUnhealthy", "node gone".into());
        let encoded = serde_yaml::to_string(&cond).unwrap();
        assert!(encoded.contains("status: false"));
        assert!(encoded.contains("lastTransitionTime:"));
    }
}
