use std::collections::BTreeMap;

use super::super::Result;

/// OIDC identity provider wired into the apiserver flags
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OidcConfig {
    /// Filled from document metadata, not the spec body
    #[serde(default)]
    pub name: String,
    pub issuerUrl: String,
    pub clientId: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usernameClaim: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usernamePrefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groupsClaim: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groupsPrefix: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requiredClaims: BTreeMap<String, String>,
}

impl OidcConfig {
    pub fn verify(&self) -> Result<()> {
        if !self.issuerUrl.starts_with("https://") {
            bail!("oidc issuerUrl must be https");
        }
        if self.clientId.is_empty() {
            bail!("oidc clientId cannot be empty");
        }
        Ok(())
    }
}

/// aws-iam-authenticator webhook configuration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AwsIamConfig {
    /// Filled from document metadata, not the spec body
    #[serde(default)]
    pub name: String,
    pub awsRegion: String,
    /// Authentication backends in fallback order, e.g. ["EKSConfigMap", "CRD"]
    pub backendMode: Vec<String>,
    #[serde(default = "AwsIamConfig::default_partition")]
    pub partition: String,
}

impl AwsIamConfig {
    fn default_partition() -> String {
        "aws".into()
    }

    pub fn verify(&self) -> Result<()> {
        if self.backendMode.is_empty() {
            bail!("aws iam config needs at least one backend mode");
        }
        Ok(())
    }
}
