use super::super::Result;

// Untagged enum to mirror the kube intstr.IntOrString hybrid
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum AvailabilityPolicy {
    Percentage(String),
    Unsigned(u32),
}

// if it's a string, then '[0-9]+%' has to parse
impl AvailabilityPolicy {
    fn verify(&self, name: &str, maxNumber: u32) -> Result<()> {
        match self {
            AvailabilityPolicy::Unsigned(n) => {
                if *n > maxNumber {
                    bail!("Cannot have {} set higher than the replica count {}", name, maxNumber);
                }
            }
            AvailabilityPolicy::Percentage(s) => {
                if !s.ends_with('%') {
                    bail!("{} must end with a '%' sign", name);
                }
                let digits = s.chars().take_while(|ch| *ch != '%').collect::<String>();
                let res: u32 = digits.parse()?;
                if res > 100 {
                    bail!("Percentage value for {} cannot exceed 100", name);
                }
            }
        }
        Ok(())
    }

    /// How many machines the policy refers to, rounding up (for maxSurge)
    pub fn to_replicas_ceil(&self, replicas: u32) -> u32 {
        match self {
            AvailabilityPolicy::Percentage(percstr) => {
                let digits = percstr.chars().take_while(|ch| *ch != '%').collect::<String>();
                let perc: u32 = digits.parse().unwrap(); // safe due to verify ^
                ((f64::from(replicas) * f64::from(perc)) / 100.0).ceil() as u32
            }
            AvailabilityPolicy::Unsigned(u) => *u,
        }
    }

    /// How many machines the policy refers to, rounding down (for maxUnavailable)
    pub fn to_replicas_floor(&self, replicas: u32) -> u32 {
        match self {
            AvailabilityPolicy::Percentage(percstr) => {
                let digits = percstr.chars().take_while(|ch| *ch != '%').collect::<String>();
                let perc: u32 = digits.parse().unwrap(); // safe due to verify ^
                ((f64::from(replicas) * f64::from(perc)) / 100.0).floor() as u32
            }
            AvailabilityPolicy::Unsigned(u) => *u,
        }
    }
}

/// Rollout strategy for the control plane
///
/// Only surge is configurable; kubeadm control planes never take members away
/// below the configured count during a roll.
///
/// ```yaml
/// upgradeRolloutStrategy:
///   rollingUpdate:
///     maxSurge: 1
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ControlPlaneRolloutStrategy {
    pub rollingUpdate: ControlPlaneRollingUpdate,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ControlPlaneRollingUpdate {
    pub maxSurge: AvailabilityPolicy,
}

impl ControlPlaneRolloutStrategy {
    pub fn verify(&self, replicas: u32) -> Result<()> {
        self.rollingUpdate.maxSurge.verify("maxSurge", replicas)
    }

    pub fn surge_count(&self, replicas: u32) -> u32 {
        self.rollingUpdate.maxSurge.to_replicas_ceil(replicas)
    }
}

/// Rollout strategy for a worker node group
///
/// Both values are required when the strategy is set; partially specified
/// strategies are rejected at parse time.
///
/// ```yaml
/// upgradeRolloutStrategy:
///   rollingUpdate:
///     maxSurge: 1
///     maxUnavailable: 0
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkerRolloutStrategy {
    pub rollingUpdate: WorkerRollingUpdate,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkerRollingUpdate {
    pub maxSurge: AvailabilityPolicy,
    pub maxUnavailable: AvailabilityPolicy,
}

impl WorkerRolloutStrategy {
    pub fn verify(&self, replicas: u32) -> Result<()> {
        self.rollingUpdate.maxSurge.verify("maxSurge", replicas)?;
        self.rollingUpdate.maxUnavailable.verify("maxUnavailable", replicas)?;
        Ok(())
    }

    /// Extra machines a rolling replacement may create over the desired count
    pub fn surge_count(&self, replicas: u32) -> u32 {
        self.rollingUpdate.maxSurge.to_replicas_ceil(replicas)
    }

    pub fn unavailable_count(&self, replicas: u32) -> u32 {
        self.rollingUpdate.maxUnavailable.to_replicas_floor(replicas)
    }
}
