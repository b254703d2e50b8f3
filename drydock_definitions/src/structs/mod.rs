/// Rolling update strategies for control plane and worker groups
pub mod rollingupdate;
pub use self::rollingupdate::{AvailabilityPolicy, ControlPlaneRolloutStrategy, WorkerRolloutStrategy};

/// Pod and service networking
pub mod network;
pub use self::network::{CidrBlocks, ClusterNetwork, DnsResolveConf};

/// Egress proxy configuration
pub mod proxy;
pub use self::proxy::ProxyConfiguration;

/// Container registry mirror
pub mod registry;
pub use self::registry::RegistryMirror;

/// Identity providers (OIDC / AWS IAM)
pub mod identity;
pub use self::identity::{AwsIamConfig, OidcConfig};

/// Node users and ssh keys
pub mod users;
pub use self::users::UserConfiguration;

/// Node taints
pub mod taints;
pub use self::taints::{Taint, TaintEffect};

/// Worker group autoscaler bounds
pub mod autoscaling;
pub use self::autoscaling::AutoScalingConfiguration;
