use semver::Version;
use std::fs::File;
use std::path::Path;

use super::{ErrorKind, Result};

/// Oldest kubernetes minor this release line still creates
pub const MIN_SUPPORTED_MINOR: u64 = 23;
/// Newest kubernetes minor this release line knows bundles for
pub const MAX_SUPPORTED_MINOR: u64 = 27;

/// Parse `1.24` or `v1.24.2` into a full semver version
pub fn parse_kubernetes_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim_start_matches('v');
    let padded = if trimmed.chars().filter(|c| *c == '.').count() == 1 {
        format!("{}.0", trimmed)
    } else {
        trimmed.to_string()
    };
    Version::parse(&padded).map_err(|_| ErrorKind::InvalidKubernetesVersion(raw.to_string()).into())
}

/// An image reference rendered into manifests
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Image {
    pub repository: String,
    pub tag: String,
}

impl Image {
    pub fn new(repository: &str, tag: &str) -> Self {
        Image {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    pub fn uri(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

/// Core kubernetes distro images for one minor
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KubeDistro {
    pub pause: Image,
    pub etcd: Image,
    pub coreDns: Image,
}

/// Every component image rendered into manifests for one kubernetes version
///
/// Immutable once attached to a `ClusterSpec`; overridable wholesale from a
/// bundles file but never field by field.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VersionsBundle {
    /// Full version tag, e.g. `v1.23.7`
    pub kubernetesVersion: String,
    pub kubeDistro: KubeDistro,
    /// Bootstrap container for bottlerocket nodes
    pub bottlerocketBootstrap: Image,
    /// etcdadm controller images for external etcd
    pub etcdadmBootstrap: Image,
    pub etcdadmController: Image,
    /// Default CNI images
    pub cilium: Image,
    pub ciliumOperator: Image,
    /// kube-vip static pod for the control plane endpoint
    pub kubeVip: Image,
    /// Node image for the docker sandbox provider
    pub kindNode: Image,
    /// aws-iam-authenticator server image
    pub awsIamAuthenticator: Image,
}

impl VersionsBundle {
    /// The built-in bundle table for a requested version
    pub fn for_version(raw: &str) -> Result<VersionsBundle> {
        let v = parse_kubernetes_version(raw)?;
        if v.major != 1 || v.minor < MIN_SUPPORTED_MINOR || v.minor > MAX_SUPPORTED_MINOR {
            return Err(ErrorKind::InvalidKubernetesVersion(raw.to_string()).into());
        }
        // patch pins per minor; the registry layout is uniform
        let (patch, etcd_tag, coredns_tag) = match v.minor {
            23 => ("v1.23.7", "v3.5.4", "v1.8.6"),
            24 => ("v1.24.2", "v3.5.4", "v1.8.7"),
            25 => ("v1.25.5", "v3.5.6", "v1.9.3"),
            26 => ("v1.26.2", "v3.5.7", "v1.9.3"),
            _ => ("v1.27.1", "v3.5.8", "v1.10.1"),
        };
        let distro = "public.ecr.aws/drydock-distro";
        Ok(VersionsBundle {
            kubernetesVersion: patch.to_string(),
            kubeDistro: KubeDistro {
                pause: Image::new(&format!("{}/kubernetes/pause", distro), patch),
                etcd: Image::new(&format!("{}/etcd-io/etcd", distro), etcd_tag),
                coreDns: Image::new(&format!("{}/coredns/coredns", distro), coredns_tag),
            },
            bottlerocketBootstrap: Image::new("public.ecr.aws/drydock/bottlerocket-bootstrap", patch),
            etcdadmBootstrap: Image::new("public.ecr.aws/drydock/etcdadm-bootstrap-provider", "v1.0.10"),
            etcdadmController: Image::new("public.ecr.aws/drydock/etcdadm-controller", "v1.0.16"),
            cilium: Image::new("public.ecr.aws/isovalent/cilium", "v1.11.15"),
            ciliumOperator: Image::new("public.ecr.aws/isovalent/operator-generic", "v1.11.15"),
            kubeVip: Image::new("public.ecr.aws/drydock/kube-vip", "v0.5.5"),
            kindNode: Image::new("public.ecr.aws/drydock/kind-node", patch),
            awsIamAuthenticator: Image::new("public.ecr.aws/drydock/aws-iam-authenticator", "v0.5.9"),
        })
    }

    /// Read a whole-bundle override from disk (the --bundles-override path)
    pub fn from_override_file(path: &Path) -> Result<VersionsBundle> {
        let f = File::open(path)?;
        let bundle: VersionsBundle = serde_yaml::from_reader(f)?;
        parse_kubernetes_version(&bundle.kubernetesVersion)?;
        Ok(bundle)
    }

    pub fn version(&self) -> Result<Version> {
        parse_kubernetes_version(&self.kubernetesVersion)
    }

    /// True when the bundle targets the minimum supported minor
    ///
    /// A couple of compatibility shims key off this: the LoadBalancerClass
    /// feature gate and the systemd cgroup driver pin.
    pub fn is_minimum_supported_version(&self) -> bool {
        match self.version() {
            Ok(v) => v.major == 1 && v.minor == MIN_SUPPORTED_MINOR,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_kubernetes_version, VersionsBundle};

    #[test]
    fn version_parsing() {
        assert_eq!(parse_kubernetes_version("1.23").unwrap().minor, 23);
        assert_eq!(parse_kubernetes_version("v1.24.2").unwrap().patch, 2);
        assert!(parse_kubernetes_version("banana").is_err());
    }

    #[test]
    fn bundles_resolve_per_minor() {
        let b = VersionsBundle::for_version("1.23").unwrap();
        assert_eq!(b.kubernetesVersion, "v1.23.7");
        assert!(b.is_minimum_supported_version());
        assert_eq!(b.kubeDistro.pause.uri(), "public.ecr.aws/drydock-distro/kubernetes/pause:v1.23.7");

        let b = VersionsBundle::for_version("1.24").unwrap();
        assert!(!b.is_minimum_supported_version());

        assert!(VersionsBundle::for_version("1.19").is_err());
        assert!(VersionsBundle::for_version("1.99").is_err());
    }
}
