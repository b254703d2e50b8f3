use super::network::ClusterNetwork;

/// Built-in entries appended after the user supplied ones.
///
/// Downstream consumers (containerd, kubelet drop-ins) are sensitive to the
/// list order, so these always come after cidrs and user entries.
pub const NO_PROXY_DEFAULTS: &[&str] = &[
    "localhost",
    "127.0.0.1",
    ".svc",
];

/// Egress proxy configuration
///
/// ```yaml
/// proxyConfiguration:
///   httpProxy: http://proxy.corp:3128
///   httpsProxy: http://proxy.corp:3128
///   noProxy:
///   - 10.20.0.0/16
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfiguration {
    pub httpProxy: String,
    pub httpsProxy: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub noProxy: Vec<String>,
}

impl ProxyConfiguration {
    /// Assemble the full noProxy list in its contract order:
    /// pod cidrs, service cidrs, user entries, built-in defaults, the
    /// datacenter endpoint, the control plane endpoint, and the boot ip when
    /// the provider has one. Duplicates are kept.
    pub fn ordered_no_proxy(
        &self,
        network: &ClusterNetwork,
        datacenter_endpoint: Option<&str>,
        control_plane_endpoint: Option<&str>,
        boot_ip: Option<&str>,
    ) -> Vec<String> {
        let mut out = vec![];
        out.extend(network.pods.cidrBlocks.iter().cloned());
        out.extend(network.services.cidrBlocks.iter().cloned());
        out.extend(self.noProxy.iter().cloned());
        out.extend(NO_PROXY_DEFAULTS.iter().map(|s| s.to_string()));
        if let Some(dc) = datacenter_endpoint {
            out.push(dc.to_string());
        }
        if let Some(cp) = control_plane_endpoint {
            out.push(cp.to_string());
        }
        if let Some(ip) = boot_ip {
            out.push(ip.to_string());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::super::network::{CidrBlocks, ClusterNetwork};
    use super::ProxyConfiguration;

    #[test]
    fn no_proxy_order_is_stable() {
        let network = ClusterNetwork {
            pods: CidrBlocks {
                cidrBlocks: vec!["192.168.0.0/16".into()],
            },
            services: CidrBlocks {
                cidrBlocks: vec!["10.96.0.0/12".into()],
            },
            dns: None,
        };
        let proxy = ProxyConfiguration {
            httpProxy: "http://proxy:3128".into(),
            httpsProxy: "http://proxy:3128".into(),
            noProxy: vec!["corp.internal".into(), "127.0.0.1".into()],
        };
        let got = proxy.ordered_no_proxy(&network, Some("vcenter.corp"), Some("10.20.30.40"), Some("10.20.30.50"));
        let want: Vec<String> = vec![
            "192.168.0.0/16", // pod cidrs first
            "10.96.0.0/12",   // then service cidrs
            "corp.internal",  // then user entries, duplicates preserved
            "127.0.0.1",
            "localhost",
            "127.0.0.1",
            ".svc",
            "vcenter.corp",
            "10.20.30.40",
            "10.20.30.50",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(got, want);
    }

    #[test]
    fn endpoints_are_optional() {
        let network = ClusterNetwork {
            pods: CidrBlocks {
                cidrBlocks: vec!["192.168.0.0/16".into()],
            },
            services: CidrBlocks {
                cidrBlocks: vec!["10.96.0.0/12".into()],
            },
            dns: None,
        };
        let proxy = ProxyConfiguration {
            httpProxy: "http://proxy:3128".into(),
            httpsProxy: "http://proxy:3128".into(),
            noProxy: vec![],
        };
        let got = proxy.ordered_no_proxy(&network, None, Some("10.20.30.40"), None);
        assert_eq!(got.last().unwrap(), "10.20.30.40");
        assert!(!got.contains(&"10.20.30.50".to_string()));
    }
}
