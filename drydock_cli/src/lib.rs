#![recursion_limit = "1024"]
#![allow(renamed_and_removed_lints)]
#![allow(non_snake_case)]

#[macro_use]
extern crate serde_derive;
extern crate serde;
extern crate serde_json;
extern crate serde_yaml;

#[macro_use]
extern crate log;

extern crate chrono;
extern crate futures_timer;
extern crate kube;
extern crate rand;

#[macro_use]
extern crate tera;

#[cfg(test)]
#[macro_use]
extern crate maplit;

/// Where an error came from, and what the caller should do about it
///
/// Wrapping with phase context never changes the category; the cli exit code
/// and the controller requeue decision both key off it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorCategory {
    /// Spec fails invariants; the user must edit it. No requeue.
    Validation,
    /// Kube api hiccup or bounded wait exceeded; retried next reconcile.
    Transient,
    /// Operation disallowed outright (e.g. scale and upgrade together).
    Policy,
    /// An external process or collaborator failed mid-operation.
    External,
    /// Cancellation token fired; propagated unchanged.
    Cancelled,
    /// Hardware shortage or permanent out-of-band failure.
    Infrastructure,
}

impl ErrorCategory {
    /// Process exit code for the cli surface
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorCategory::Validation => 1,
            ErrorCategory::Policy => 3,
            _ => 2,
        }
    }
}

#[macro_use]
extern crate error_chain;
error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }
    links {
        Defs(drydock_definitions::Error, drydock_definitions::ErrorKind);
    }
    foreign_links {
        Fmt(::std::fmt::Error);
        Io(::std::io::Error) #[cfg(unix)];
        SerdeY(serde_yaml::Error);
        SerdeJ(serde_json::Error);
        Tmpl(tera::Error);
    }
    errors {
        KubeError(err: kube::Error) {
            description("kube api interaction failed")
            display("kube api interaction failed: {}", err)
        }
        ValidationFailed(reason: String) {
            description("cluster spec failed validation")
            display("cluster spec failed validation: {}", &reason)
        }
        PolicyViolation(reason: String) {
            description("operation is not allowed")
            display("operation is not allowed: {}", &reason)
        }
        WaitTimeout(what: String, secs: u64) {
            description("timed out waiting")
            display("timed out after {}s waiting for {}", secs, &what)
        }
        ExternalOperation(op: String, reason: String) {
            description("external operation failed")
            display("{} failed: {}", &op, &reason)
        }
        Cancelled {
            description("operation cancelled")
            display("operation cancelled")
        }
        HardwareShortage(group: String, needed: usize, available: usize) {
            description("not enough matching hardware")
            display("group '{}' needs {} machines but only {} match its selector", &group, needed, available)
        }
        BmcNotContactable(hostname: String, message: String) {
            description("bmc is not contactable")
            display("bmc for '{}' is not contactable: {}", &hostname, &message)
        }
        MachineUnhealthy(machine: String, message: String) {
            description("machine reports unhealthy")
            display("machine '{}' reports unhealthy: {}", &machine, &message)
        }
        SubprocessFailure(cmd: String, code: i32) {
            description("subprocess failed")
            display("subprocess '{}' failed with exit code {}", &cmd, code)
        }
        UnknownProvider(kind: String) {
            description("no reconciler registered for provider")
            display("no reconciler registered for provider '{}'", &kind)
        }
        Categorized(category: ErrorCategory, msg: String) {
            description("wrapped phase error")
            display("{}", &msg)
        }
    }
}

fn categorize_kind(kind: &ErrorKind) -> ErrorCategory {
    match kind {
        ErrorKind::Categorized(c, _) => *c,
        ErrorKind::ValidationFailed(_)
        | ErrorKind::Defs(_)
        | ErrorKind::Tmpl(_)
        | ErrorKind::SerdeY(_)
        | ErrorKind::SerdeJ(_)
        | ErrorKind::UnknownProvider(_) => ErrorCategory::Validation,
        ErrorKind::PolicyViolation(_) => ErrorCategory::Policy,
        ErrorKind::ExternalOperation(_, _) | ErrorKind::SubprocessFailure(_, _) => ErrorCategory::External,
        ErrorKind::Cancelled => ErrorCategory::Cancelled,
        ErrorKind::HardwareShortage(_, _, _)
        | ErrorKind::BmcNotContactable(_, _)
        | ErrorKind::MachineUnhealthy(_, _) => ErrorCategory::Infrastructure,
        _ => ErrorCategory::Transient,
    }
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        categorize_kind(self.kind())
    }

    /// Wrap with a phase name, keeping the original category intact
    pub fn in_phase(self, phase: &str) -> Error {
        let category = self.category();
        ErrorKind::Categorized(category, format!("{}: {}", phase, self)).into()
    }
}

/// Extension used by the orchestrator to tag results with their phase
pub trait PhaseResultExt<T> {
    fn phase(self, name: &str) -> Result<T>;
}

impl<T> PhaseResultExt<T> for Result<T> {
    fn phase(self, name: &str) -> Result<T> {
        self.map_err(|e| e.in_phase(name))
    }
}

extern crate drydock_definitions;
pub use drydock_definitions::{Catalogue, Cluster, ClusterSpec, ClusterStatus, Hardware,
                              MachineConfig, ProviderKind, VersionsBundle};

/// Typed CAPI resources, the consumed half of the wire surface
pub mod capi;

/// drydock's own persisted cluster resource
pub mod crds;

/// The retrying kube client capability surface
pub mod kubeapi;

/// Jittered backoff, poll loops and cancellation
pub mod retry;

/// Per-cluster single flight
pub mod singleflight;

/// Manifest rendering from cluster specs
pub mod render;

/// Per-provider reconcilers, operation detection and the dispatch registry
pub mod reconcile;

/// End to end sequencing of cluster operations
pub mod orchestrate;

/// Bare metal availability validation and bmc pre-flight
pub mod hardware;

/// Lazy dependency assembly for the registry
pub mod factory;

/// Starter spec generation
pub mod generate;

/// Process level initialisation before any command runs
pub fn init() -> Result<()> {
    // nothing global to set up yet; the hook keeps main uniform
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorCategory, ErrorKind, PhaseResultExt, Result};

    #[test]
    fn exit_codes_follow_taxonomy() {
        assert_eq!(ErrorCategory::Validation.exit_code(), 1);
        assert_eq!(ErrorCategory::Transient.exit_code(), 2);
        assert_eq!(ErrorCategory::Policy.exit_code(), 3);
        assert_eq!(ErrorCategory::External.exit_code(), 2);
        assert_eq!(ErrorCategory::Infrastructure.exit_code(), 2);
    }

    #[test]
    fn phase_wrapping_keeps_category() {
        let res: Result<()> = Err(ErrorKind::PolicyViolation("scale and upgrade together".into()).into());
        let wrapped = res.phase("reconciling workers").unwrap_err();
        assert_eq!(wrapped.category(), ErrorCategory::Policy);
        assert!(wrapped.to_string().starts_with("reconciling workers: "));

        // double wrapping still keeps it
        let err: Error = wrapped.in_phase("upgrading cluster");
        assert_eq!(err.category(), ErrorCategory::Policy);
    }

    #[test]
    fn unknown_kinds_default_transient() {
        let err: Error = "something odd".into();
        assert_eq!(err.category(), ErrorCategory::Transient);
    }
}
