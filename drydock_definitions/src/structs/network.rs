use cidr::IpCidr;
use std::str::FromStr;

use super::super::Result;

/// Pod and service networking for a cluster
///
/// ```yaml
/// clusterNetwork:
///   pods:
///     cidrBlocks: ["192.168.0.0/16"]
///   services:
///     cidrBlocks: ["10.96.0.0/12"]
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ClusterNetwork {
    pub pods: CidrBlocks,
    pub services: CidrBlocks,

    /// Override for the node resolv.conf handed to kubelet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsResolveConf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CidrBlocks {
    pub cidrBlocks: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DnsResolveConf {
    pub resolvConf: ResolvConfPath,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ResolvConfPath {
    pub path: String,
}

fn parse_blocks(blocks: &[String]) -> Result<Vec<IpCidr>> {
    let mut out = vec![];
    for b in blocks {
        let c = IpCidr::from_str(b).map_err(|e| format!("invalid cidr '{}': {}", b, e))?;
        out.push(c);
    }
    Ok(out)
}

fn overlaps(a: &IpCidr, b: &IpCidr) -> bool {
    a.contains(&b.first_address()) || b.contains(&a.first_address())
}

impl ClusterNetwork {
    pub fn verify(&self) -> Result<()> {
        if self.pods.cidrBlocks.is_empty() {
            bail!("clusterNetwork.pods needs at least one cidr block");
        }
        if self.services.cidrBlocks.is_empty() {
            bail!("clusterNetwork.services needs at least one cidr block");
        }
        let pods = parse_blocks(&self.pods.cidrBlocks)?;
        let services = parse_blocks(&self.services.cidrBlocks)?;
        for p in &pods {
            for s in &services {
                if overlaps(p, s) {
                    bail!("pod cidr {} overlaps service cidr {}", p, s);
                }
            }
        }
        Ok(())
    }
}
