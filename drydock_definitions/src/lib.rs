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

#[macro_use]
extern crate lazy_static;

extern crate regex;

extern crate chrono;
extern crate cidr;
extern crate csv;
extern crate semver;

#[cfg(test)]
#[macro_use]
extern crate maplit;

#[macro_use]
extern crate error_chain;
error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }
    links {}
    foreign_links {
        Fmt(::std::fmt::Error);
        Io(::std::io::Error) #[cfg(unix)];
        Int(::std::num::ParseIntError);
        SerdeY(serde_yaml::Error);
        SerdeJ(serde_json::Error);
        Csv(csv::Error);
        SemVer(semver::SemVerError);
    }
    errors {
        InvalidClusterName(name: String) {
            description("cluster name is not a valid dns label")
            display("cluster name '{}' is not a valid dns label", &name)
        }
        UnknownMachineGroup(role: String, group: String) {
            description("machine group reference does not resolve")
            display("{} references machine group '{}' which has no machine config", &role, &group)
        }
        UnknownDocumentKind(kind: String) {
            description("unrecognised document kind in spec file")
            display("unrecognised document kind '{}' in spec file", &kind)
        }
        MissingDocument(kind: String) {
            description("spec file is missing a required document")
            display("spec file has no {} document", &kind)
        }
        InvalidKubernetesVersion(version: String) {
            description("kubernetes version cannot be parsed")
            display("kubernetes version '{}' cannot be parsed", &version)
        }
        InvalidSshKey(key: String) {
            description("ssh authorized key cannot be parsed")
            display("ssh authorized key '{}' cannot be parsed", &key)
        }
        MissingMirrorCredentials(var: String) {
            description("registry mirror credentials not in environment")
            display("registry mirror requires {} in the environment", &var)
        }
        InvalidHardwareLabels(raw: String) {
            description("hardware labels cannot be parsed")
            display("hardware labels '{}' are not ;-separated k=v pairs", &raw)
        }
        DuplicateHardware(mac: String) {
            description("duplicate hardware mac address")
            display("hardware inventory has a duplicate mac address '{}'", &mac)
        }
        SelectorOverlap(hostname: String) {
            description("hardware matches more than one selector")
            display("hardware '{}' matches more than one machine group selector", &hostname)
        }
        UnserializableOsSettings(config: String) {
            description("host os settings cannot be serialized")
            display("host os settings on machine config '{}' cannot be serialized", &config)
        }
    }
}

/// The root cluster document and its nested configuration blocks
pub mod cluster;
pub use cluster::{Cluster, ControlPlaneConfiguration, ExternalEtcdConfiguration, Ref,
                  WorkerNodeGroupConfiguration};

/// Sub-structures shared between the cluster and machine documents
pub mod structs;

/// Per-provider machine config documents
pub mod machine;
pub use machine::{MachineConfig, OSFamily};

/// Per-provider datacenter documents and the provider dispatch key
pub mod datacenter;
pub use datacenter::{DatacenterConfig, ProviderKind};

/// Bundled component versions rendered into manifests
pub mod bundle;
pub use bundle::VersionsBundle;

/// The resolved, immutable cluster spec assembled from a spec file
pub mod spec;
pub use spec::ClusterSpec;

/// Status surfaced back onto the cluster object
pub mod status;
pub use status::ClusterStatus;

/// Bare-metal hardware records and the selector-indexed catalogue
pub mod hardware;
pub use hardware::{Catalogue, Hardware};

/// Process-wide feature gate cache
pub mod features;
