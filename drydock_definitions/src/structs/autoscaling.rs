use super::super::Result;

/// Autoscaler bounds for a worker node group
///
/// When set, the rendered MachineDeployment carries the autoscaler
/// annotations instead of a fixed replica count.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AutoScalingConfiguration {
    pub minCount: u32,
    pub maxCount: u32,
}

impl AutoScalingConfiguration {
    pub fn verify(&self) -> Result<()> {
        if self.minCount > self.maxCount {
            bail!("autoscaling minCount {} above maxCount {}", self.minCount, self.maxCount);
        }
        Ok(())
    }
}
