use std::collections::BTreeMap;

use super::{ErrorKind, Result};
use crate::structs::UserConfiguration;

/// Node operating system families supported across providers
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OSFamily {
    Ubuntu,
    Bottlerocket,
    RedHat,
}

impl Default for OSFamily {
    fn default() -> Self {
        OSFamily::Ubuntu
    }
}

impl OSFamily {
    /// Bootstrap format rendered into kubeadm config templates
    pub fn bootstrap_format(self) -> &'static str {
        match self {
            OSFamily::Bottlerocket => "bottlerocket",
            _ => "cloud-config",
        }
    }
}

/// NTP servers pushed to the host
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NtpConfiguration {
    pub servers: Vec<String>,
}

/// Free-form Bottlerocket settings blocks
///
/// Kept as raw yaml values since the settings surface moves faster than we
/// want to chase; serialization failures surface as render errors.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct BottlerocketConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot: Option<serde_yaml::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct HostOSConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ntpConfiguration: Option<NtpConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottlerocketConfiguration: Option<BottlerocketConfiguration>,
}

/// Fields every provider machine config shares
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct MachineConfigBase {
    #[serde(default)]
    pub osFamily: OSFamily,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<UserConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostOSConfiguration: Option<HostOSConfiguration>,
}

/// vSphere VM placement
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VSphereMachineConfig {
    #[serde(flatten)]
    pub base: MachineConfigBase,
    pub datastore: String,
    pub folder: String,
    pub network: String,
    pub resourcePool: String,
    /// VM template the clone is made from
    pub template: String,
    pub memoryMiB: u32,
    pub numCPUs: u32,
    pub diskGiB: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Bare metal machine config; placement is a hardware label selector
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TinkerbellMachineConfig {
    #[serde(flatten)]
    pub base: MachineConfigBase,
    pub hardwareSelector: BTreeMap<String, String>,
}

/// Docker sandbox machines have no placement at all
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DockerMachineConfig {
    #[serde(flatten)]
    pub base: MachineConfigBase,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CloudStackMachineConfig {
    #[serde(flatten)]
    pub base: MachineConfigBase,
    pub computeOffering: String,
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diskOffering: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affinityGroupIds: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NutanixMachineConfig {
    #[serde(flatten)]
    pub base: MachineConfigBase,
    pub cluster: String,
    pub subnet: String,
    pub image: String,
    pub vcpusPerSocket: u32,
    pub vcpuSockets: u32,
    pub memorySize: String,
    pub systemDiskSize: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SnowMachineConfig {
    #[serde(flatten)]
    pub base: MachineConfigBase,
    pub instanceType: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sshKeyName: Option<String>,
}

/// A provider machine config document, routed by its document kind
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum MachineConfig {
    VSphere(VSphereMachineConfig),
    Tinkerbell(TinkerbellMachineConfig),
    Docker(DockerMachineConfig),
    CloudStack(CloudStackMachineConfig),
    Nutanix(NutanixMachineConfig),
    Snow(SnowMachineConfig),
}

impl MachineConfig {
    pub fn base(&self) -> &MachineConfigBase {
        match self {
            MachineConfig::VSphere(m) => &m.base,
            MachineConfig::Tinkerbell(m) => &m.base,
            MachineConfig::Docker(m) => &m.base,
            MachineConfig::CloudStack(m) => &m.base,
            MachineConfig::Nutanix(m) => &m.base,
            MachineConfig::Snow(m) => &m.base,
        }
    }

    pub fn os_family(&self) -> OSFamily {
        self.base().osFamily
    }

    /// The first user's key, comment stripped, for template injection
    pub fn ssh_authorized_key(&self) -> Result<String> {
        match self.base().users.first() {
            Some(u) => u.stripped_ssh_key(),
            None => Ok("".into()),
        }
    }

    pub fn ntp_servers(&self) -> Vec<String> {
        self.base()
            .hostOSConfiguration
            .as_ref()
            .and_then(|h| h.ntpConfiguration.as_ref())
            .map(|n| n.servers.clone())
            .unwrap_or_default()
    }

    /// Bare metal hardware selector, when this is a tinkerbell config
    pub fn hardware_selector(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            MachineConfig::Tinkerbell(m) => Some(&m.hardwareSelector),
            _ => None,
        }
    }

    /// Bottlerocket settings serialized for template embedding
    pub fn bottlerocket_settings_yaml(&self, config_name: &str) -> Result<Option<String>> {
        let settings = match self.base().hostOSConfiguration.as_ref().and_then(|h| h.bottlerocketConfiguration.as_ref()) {
            Some(s) => s,
            None => return Ok(None),
        };
        match serde_yaml::to_string(settings) {
            Ok(s) => Ok(Some(s.trim_start_matches("---\n").to_string())),
            Err(e) => {
                debug!("failed to serialize bottlerocket settings: {}", e);
                Err(ErrorKind::UnserializableOsSettings(config_name.to_string()).into())
            }
        }
    }
}
