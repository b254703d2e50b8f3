use std::collections::BTreeMap;

use drydock_definitions::structs::{AwsIamConfig, OidcConfig};
use drydock_definitions::ClusterSpec;

use super::super::Result;
use super::to_partial_yaml;

/// Approved cipher suites pinned onto every component that takes them
pub const TLS_CIPHER_SUITES: &str = "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384";

/// Feature gate pinned on the oldest supported minor only
pub const LOAD_BALANCER_CLASS_GATE: &str = "ServiceLoadBalancerClass=true";

/// An ordered flag->value map rendered as a partial yaml block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtraArgs(BTreeMap<String, String>);

impl ExtraArgs {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, flag: &str, value: &str) -> &mut Self {
        self.0.insert(flag.to_string(), value.to_string());
        self
    }

    pub fn append(&mut self, other: ExtraArgs) -> &mut Self {
        self.0.extend(other.0);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, flag: &str) -> Option<&str> {
        self.0.get(flag).map(|s| s.as_str())
    }

    /// Partial yaml at the indent the enclosing template needs
    pub fn to_partial_yaml(&self, indent: usize) -> Result<String> {
        if self.0.is_empty() {
            return Ok(String::new());
        }
        to_partial_yaml(&self.0, indent)
    }

    /// Flags for the oidc identity provider
    pub fn oidc(config: &OidcConfig) -> ExtraArgs {
        let mut args = ExtraArgs::new();
        args.insert("oidc-issuer-url", &config.issuerUrl);
        args.insert("oidc-client-id", &config.clientId);
        if let Some(v) = &config.usernameClaim {
            args.insert("oidc-username-claim", v);
        }
        if let Some(v) = &config.usernamePrefix {
            args.insert("oidc-username-prefix", v);
        }
        if let Some(v) = &config.groupsClaim {
            args.insert("oidc-groups-claim", v);
        }
        if let Some(v) = &config.groupsPrefix {
            args.insert("oidc-groups-prefix", v);
        }
        if !config.requiredClaims.is_empty() {
            let claims = config
                .requiredClaims
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(",");
            args.insert("oidc-required-claim", &claims);
        }
        args
    }

    /// Webhook flag for the aws-iam-authenticator
    pub fn aws_iam(_config: &AwsIamConfig) -> ExtraArgs {
        let mut args = ExtraArgs::new();
        args.insert(
            "authentication-token-webhook-config-file",
            "/etc/kubernetes/aws-iam-authenticator/kubeconfig.yaml",
        );
        args
    }

    /// Service account issuer flags for pod-level iam
    pub fn pod_iam(issuer_url: &str) -> ExtraArgs {
        let mut args = ExtraArgs::new();
        args.insert("service-account-issuer", issuer_url);
        args.insert("service-account-jwks-uri", &format!("{}/openid/v1/jwks", issuer_url));
        args
    }
}

/// The full apiserver flag set for a spec
pub fn apiserver_extra_args(spec: &ClusterSpec, identities: &Identities) -> ExtraArgs {
    let mut args = ExtraArgs::new();
    args.insert("tls-cipher-suites", TLS_CIPHER_SUITES);
    if let Some(oidc) = &identities.oidc {
        args.append(ExtraArgs::oidc(oidc));
    }
    if let Some(iam) = &identities.aws_iam {
        args.append(ExtraArgs::aws_iam(iam));
    }
    if let Some(issuer) = &identities.pod_iam_issuer {
        args.append(ExtraArgs::pod_iam(issuer));
    }
    if spec.bundle.is_minimum_supported_version() {
        args.insert("feature-gates", LOAD_BALANCER_CLASS_GATE);
    }
    args
}

pub fn controller_manager_extra_args() -> ExtraArgs {
    let mut args = ExtraArgs::new();
    args.insert("tls-cipher-suites", TLS_CIPHER_SUITES);
    // one mask per ip family; dual stack keeps the v4 default
    args.insert("node-cidr-mask-size", "24");
    args
}

pub fn scheduler_extra_args() -> ExtraArgs {
    let mut args = ExtraArgs::new();
    args.insert("tls-cipher-suites", TLS_CIPHER_SUITES);
    args
}

pub fn etcd_extra_args() -> ExtraArgs {
    let mut args = ExtraArgs::new();
    args.insert("cipher-suites", TLS_CIPHER_SUITES);
    args
}

/// Kubelet flags shared by control plane and workers
pub fn kubelet_extra_args(spec: &ClusterSpec) -> ExtraArgs {
    let mut args = ExtraArgs::new();
    args.insert("tls-cipher-suites", TLS_CIPHER_SUITES);
    if let Some(dns) = &spec.cluster.clusterNetwork.dns {
        args.insert("resolv-conf", &dns.resolvConf.path);
    }
    args
}

/// Resolved identity provider documents for flag construction
///
/// The refs on the cluster point at sibling documents; the caller resolves
/// them before rendering (missing documents are a validation failure).
#[derive(Debug, Clone, Default)]
pub struct Identities {
    pub oidc: Option<OidcConfig>,
    pub aws_iam: Option<AwsIamConfig>,
    pub pod_iam_issuer: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use drydock_definitions::structs::OidcConfig;

    #[test]
    fn oidc_flags() {
        let oidc = OidcConfig {
            name: "sso".into(),
            issuerUrl: "https://sso.corp".into(),
            clientId: "kube".into(),
            usernameClaim: Some("email".into()),
            usernamePrefix: None,
            groupsClaim: None,
            groupsPrefix: None,
            requiredClaims: Default::default(),
        };
        let args = ExtraArgs::oidc(&oidc);
        assert_eq!(args.get("oidc-issuer-url"), Some("https://sso.corp"));
        assert_eq!(args.get("oidc-username-claim"), Some("email"));
        assert!(args.get("oidc-groups-claim").is_none());
    }

    #[test]
    fn partial_yaml_rendering() {
        let mut args = ExtraArgs::new();
        args.insert("b-flag", "2").insert("a-flag", "1");
        let block = args.to_partial_yaml(2).unwrap();
        // btree order: flags come out sorted
        assert_eq!(block, "  a-flag: \"1\"\n  b-flag: \"2\"");
    }

    #[test]
    fn empty_args_render_nothing() {
        assert_eq!(ExtraArgs::new().to_partial_yaml(4).unwrap(), "");
    }
}
