use std::fmt;
use std::str::FromStr;

use super::{Error, Result};

/// The provider dispatch key
///
/// Everything provider-specific hangs off this tag: document kinds,
/// reconcilers, credential env vars.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Docker,
    VSphere,
    Snow,
    Tinkerbell,
    CloudStack,
    Nutanix,
}

impl ProviderKind {
    pub fn all() -> &'static [ProviderKind] {
        &[
            ProviderKind::Docker,
            ProviderKind::VSphere,
            ProviderKind::Snow,
            ProviderKind::Tinkerbell,
            ProviderKind::CloudStack,
            ProviderKind::Nutanix,
        ]
    }

    /// Env var prefix for provider credentials, e.g. DRYDOCK_VSPHERE_USERNAME
    pub fn credential_env_prefix(self) -> String {
        format!("DRYDOCK_{}", self.to_string().to_uppercase())
    }

    pub fn datacenter_kind(self) -> &'static str {
        match self {
            ProviderKind::Docker => "DockerDatacenterConfig",
            ProviderKind::VSphere => "VSphereDatacenterConfig",
            ProviderKind::Snow => "SnowDatacenterConfig",
            ProviderKind::Tinkerbell => "TinkerbellDatacenterConfig",
            ProviderKind::CloudStack => "CloudStackDatacenterConfig",
            ProviderKind::Nutanix => "NutanixDatacenterConfig",
        }
    }

    pub fn machine_config_kind(self) -> &'static str {
        match self {
            ProviderKind::Docker => "DockerMachineConfig",
            ProviderKind::VSphere => "VSphereMachineConfig",
            ProviderKind::Snow => "SnowMachineConfig",
            ProviderKind::Tinkerbell => "TinkerbellMachineConfig",
            ProviderKind::CloudStack => "CloudStackMachineConfig",
            ProviderKind::Nutanix => "NutanixMachineConfig",
        }
    }

    /// Kind of the provider machine template objects stripped on scale
    pub fn machine_template_kind(self) -> &'static str {
        match self {
            ProviderKind::Docker => "DockerMachineTemplate",
            ProviderKind::VSphere => "VSphereMachineTemplate",
            ProviderKind::Snow => "AWSSnowMachineTemplate",
            ProviderKind::Tinkerbell => "TinkerbellMachineTemplate",
            ProviderKind::CloudStack => "CloudStackMachineTemplate",
            ProviderKind::Nutanix => "NutanixMachineTemplate",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ProviderKind::Docker => "docker",
            ProviderKind::VSphere => "vsphere",
            ProviderKind::Snow => "snow",
            ProviderKind::Tinkerbell => "tinkerbell",
            ProviderKind::CloudStack => "cloudstack",
            ProviderKind::Nutanix => "nutanix",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "docker" => Ok(ProviderKind::Docker),
            "vsphere" => Ok(ProviderKind::VSphere),
            "snow" => Ok(ProviderKind::Snow),
            "tinkerbell" => Ok(ProviderKind::Tinkerbell),
            "cloudstack" => Ok(ProviderKind::CloudStack),
            "nutanix" => Ok(ProviderKind::Nutanix),
            other => bail!("unknown provider kind '{}'", other),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VSphereDatacenterConfig {
    pub server: String,
    pub datacenter: String,
    pub network: String,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbprint: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TinkerbellDatacenterConfig {
    /// Boot/provisioning ip the stack answers dhcp/ipxe on
    pub tinkerbellIP: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osImageURL: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DockerDatacenterConfig {}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CloudStackDatacenterConfig {
    pub managementApiEndpoint: String,
    pub zones: Vec<CloudStackZone>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CloudStackZone {
    pub name: String,
    pub network: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NutanixDatacenterConfig {
    pub endpoint: String,
    #[serde(default = "NutanixDatacenterConfig::default_port")]
    pub port: u16,
}

impl NutanixDatacenterConfig {
    fn default_port() -> u16 {
        9440
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SnowDatacenterConfig {}

/// A provider datacenter document, routed by its document kind
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum DatacenterConfig {
    VSphere(VSphereDatacenterConfig),
    Tinkerbell(TinkerbellDatacenterConfig),
    Docker(DockerDatacenterConfig),
    CloudStack(CloudStackDatacenterConfig),
    Nutanix(NutanixDatacenterConfig),
    Snow(SnowDatacenterConfig),
}

impl DatacenterConfig {
    pub fn provider(&self) -> ProviderKind {
        match self {
            DatacenterConfig::VSphere(_) => ProviderKind::VSphere,
            DatacenterConfig::Tinkerbell(_) => ProviderKind::Tinkerbell,
            DatacenterConfig::Docker(_) => ProviderKind::Docker,
            DatacenterConfig::CloudStack(_) => ProviderKind::CloudStack,
            DatacenterConfig::Nutanix(_) => ProviderKind::Nutanix,
            DatacenterConfig::Snow(_) => ProviderKind::Snow,
        }
    }

    /// The datacenter endpoint appended to noProxy lists
    pub fn endpoint(&self) -> Option<String> {
        match self {
            DatacenterConfig::VSphere(d) => Some(d.server.clone()),
            DatacenterConfig::CloudStack(d) => Some(d.managementApiEndpoint.clone()),
            DatacenterConfig::Nutanix(d) => Some(format!("{}:{}", d.endpoint, d.port)),
            DatacenterConfig::Tinkerbell(_) | DatacenterConfig::Docker(_) | DatacenterConfig::Snow(_) => None,
        }
    }

    /// The bare metal boot ip, when the provider has one
    pub fn boot_ip(&self) -> Option<String> {
        match self {
            DatacenterConfig::Tinkerbell(d) => Some(d.tinkerbellIP.clone()),
            _ => None,
        }
    }
}
