use std::collections::BTreeMap;
use std::env;

use super::super::{ErrorKind, Result};

/// Environment variables holding mirror credentials when `authenticate` is set
pub const REGISTRY_USERNAME_VAR: &str = "REGISTRY_USERNAME";
pub const REGISTRY_PASSWORD_VAR: &str = "REGISTRY_PASSWORD";

/// The registry namespace public images are normally pulled from
pub const DEFAULT_PUBLIC_REGISTRY: &str = "public.ecr.aws";

/// A container registry mirror sitting in front of the public registries
///
/// ```yaml
/// registryMirrorConfiguration:
///   endpoint: harbor.corp
///   port: 443
///   namespacedEndpoints:
///     docker.io: harbor.corp/v2/docker
///   caCertContent: |
///     -----BEGIN CERTIFICATE-----
///   authenticate: true
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RegistryMirror {
    /// Base endpoint, host only
    pub endpoint: String,

    #[serde(default = "RegistryMirror::default_port")]
    pub port: u16,

    /// Upstream registry host -> mirror endpoint overrides
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespacedEndpoints: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caCertContent: Option<String>,

    #[serde(default)]
    pub authenticate: bool,
}

impl RegistryMirror {
    fn default_port() -> u16 {
        443
    }

    /// host:port base of the mirror
    pub fn base_endpoint(&self) -> String {
        format!("{}:{}", self.endpoint, self.port)
    }

    /// The mirror endpoint that replaces the default public registry host
    pub fn public_mirror_endpoint(&self) -> String {
        match self.namespacedEndpoints.get(DEFAULT_PUBLIC_REGISTRY) {
            Some(e) => e.clone(),
            None => self.base_endpoint(),
        }
    }

    /// Credentials from the environment; required when authenticate is set
    pub fn read_credentials() -> Result<(String, String)> {
        let user = env::var(REGISTRY_USERNAME_VAR)
            .map_err(|_| ErrorKind::MissingMirrorCredentials(REGISTRY_USERNAME_VAR.into()))?;
        let pass = env::var(REGISTRY_PASSWORD_VAR)
            .map_err(|_| ErrorKind::MissingMirrorCredentials(REGISTRY_PASSWORD_VAR.into()))?;
        Ok((user, pass))
    }

    pub fn verify(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            bail!("registry mirror endpoint cannot be empty");
        }
        if self.authenticate {
            Self::read_credentials()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::RegistryMirror;
    use std::collections::BTreeMap;
    use std::env;

    fn mirror() -> RegistryMirror {
        RegistryMirror {
            endpoint: "harbor.corp".into(),
            port: 443,
            namespacedEndpoints: BTreeMap::new(),
            caCertContent: None,
            authenticate: false,
        }
    }

    #[test]
    fn endpoints() {
        let mut m = mirror();
        assert_eq!(m.base_endpoint(), "harbor.corp:443");
        assert_eq!(m.public_mirror_endpoint(), "harbor.corp:443");
        m.namespacedEndpoints
            .insert(super::DEFAULT_PUBLIC_REGISTRY.into(), "harbor.corp/v2/public".into());
        assert_eq!(m.public_mirror_endpoint(), "harbor.corp/v2/public");
    }

    #[test]
    fn authenticated_mirror_needs_credentials() {
        env::remove_var(super::REGISTRY_USERNAME_VAR);
        env::remove_var(super::REGISTRY_PASSWORD_VAR);
        let mut m = mirror();
        m.authenticate = true;
        assert!(m.verify().is_err());
        env::set_var(super::REGISTRY_USERNAME_VAR, "robot");
        env::set_var(super::REGISTRY_PASSWORD_VAR, "hunter2");
        assert!(m.verify().is_ok());
        env::remove_var(super::REGISTRY_USERNAME_VAR);
        env::remove_var(super::REGISTRY_PASSWORD_VAR);
    }
}
