//! Host inventory and its translation into probe endpoints.
//!
//! The inventory is the JSON document written by the topology generator:
//!
//! ```json
//! {"hosts": [{"hostType": "moray", "ip": "10.0.0.7", "uuid": "...",
//!             "datacenter": "us-east-1", "server": "..."}]}
//! ```
//!
//! Only roles that map to a backend kind are checked; everything else
//! (storage, webapi, marlin agents, ...) is skipped.

use crate::config::Config;
use checker::{BackendKind, Credentials, EndpointConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// One deployed instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    /// Role of the instance (`moray`, `postgres`, `nameservice`, ...)
    pub host_type: String,
    /// Address on the checked network; agents may have none
    #[serde(default)]
    pub ip: Option<String>,
    pub uuid: String,
    #[serde(default)]
    pub datacenter: Option<String>,
    /// Compute node the instance runs on
    #[serde(default)]
    pub server: Option<String>,
}

/// The generator's output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostsDocument {
    pub hosts: Vec<HostRecord>,
}

impl HostsDocument {
    pub fn from_json(contents: &str) -> common::Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Read and parse the document at `path`
    pub fn load(path: impl AsRef<Path>) -> common::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            common::Error::hosts(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
    }
}

/// A host paired with the endpoint its probe will check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: HostRecord,
    pub endpoint: EndpointConfig,
}

/// Roles checked out of the box
fn default_role(role: &str) -> Option<BackendKind> {
    match role {
        "moray" | "electric-moray" => Some(BackendKind::Moray),
        "postgres" => Some(BackendKind::Postgres),
        "authcache" | "redis" => Some(BackendKind::Redis),
        "nameservice" | "zookeeper" => Some(BackendKind::Zookeeper),
        _ => None,
    }
}

/// Backend kind checked for `role`; `extra` wins over the built-in mapping
pub fn kind_for_role(role: &str, extra: &HashMap<String, BackendKind>) -> Option<BackendKind> {
    extra.get(role).copied().or_else(|| default_role(role))
}

/// Endpoints to check for every host in `doc`, in document order
pub fn to_endpoints(doc: &HostsDocument, config: &Config) -> Vec<Target> {
    doc.hosts
        .iter()
        .filter_map(|host| {
            let Some(kind) = kind_for_role(&host.host_type, &config.roles) else {
                debug!(role = %host.host_type, uuid = %host.uuid, "Skipping unchecked role");
                return None;
            };
            let Some(ip) = host.ip.as_deref() else {
                debug!(role = %host.host_type, uuid = %host.uuid, "Skipping host without an address");
                return None;
            };

            let settings = config.kinds.for_kind(kind);
            let mut endpoint = EndpointConfig::new(kind, ip);
            if let Some(port) = settings.port {
                endpoint = endpoint.with_port(port);
            }
            if let Some(timeout) = settings.connect_timeout {
                endpoint = endpoint.with_connect_timeout(timeout);
            }
            match (&settings.username, &settings.password) {
                (Some(username), password) => {
                    endpoint = endpoint
                        .with_credentials(Credentials::new(username.clone(), password.clone()));
                }
                (None, Some(password)) => {
                    endpoint = endpoint.with_credentials(Credentials::password_only(password.clone()));
                }
                (None, None) => {}
            }
            if let Some(target) = &settings.probe_target {
                endpoint = endpoint.with_probe_target(target.clone());
            }

            Some(Target {
                host: host.clone(),
                endpoint,
            })
        })
        .collect()
}
