use std::env;

use drydock_definitions::ProviderKind;

use super::super::Result;

/// The docker sandbox provider
pub mod docker;
/// The vSphere virtualization provider
pub mod vsphere;
/// The tinkerbell bare metal provider
pub mod tinkerbell;
/// The CloudStack orchestration provider
pub mod cloudstack;
/// The Nutanix provider
pub mod nutanix;
/// The Snow edge appliance provider
pub mod snow;

/// Provider credentials from `DRYDOCK_<PROVIDER>_USERNAME` / `_PASSWORD`
pub fn credentials_from_env(kind: ProviderKind) -> Result<(String, String)> {
    let prefix = kind.credential_env_prefix();
    let user_var = format!("{}_USERNAME", prefix);
    let pass_var = format!("{}_PASSWORD", prefix);
    let user = env::var(&user_var).map_err(|_| format!("{} not set in the environment", user_var))?;
    let pass = env::var(&pass_var).map_err(|_| format!("{} not set in the environment", pass_var))?;
    Ok((user, pass))
}
