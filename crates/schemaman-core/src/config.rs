//! Connection specifications and run options.
//!
//! A connection spec names a data set, the servers that can serve it, and
//! which of them is the master. It is stored as TOML:
//!
//! ```toml
//! alias = "opsdb"
//! name = "Operations configuration"
//!
//! [datasource]
//! database = "opsdb"
//! master_server_id = 1
//!
//! [[datasource.servers]]
//! id = 1
//! type = "surrealdb"
//! url = "surrealkv://.schemaman/opsdb"
//!
//! [users]
//! alice = 1
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, VcmError};

/// A named data set and the servers backing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    pub alias: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_group: Option<String>,
    pub datasource: DatasourceSpec,
    /// Username to user id, consumed by the static identity resolver
    #[serde(default)]
    pub users: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasourceSpec {
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_path: Option<PathBuf>,
    pub master_server_id: u32,
    pub servers: Vec<ServerSpec>,
}

/// One server able to serve the data set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub id: u32,
    /// Engine-type tag used to pick a driver (e.g. "memory", "surrealdb")
    #[serde(rename = "type")]
    pub engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Full endpoint URL; takes precedence over host/port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ServerSpec {
    /// Endpoint for URL-addressed engines, built from host/port when no URL is set.
    pub fn endpoint(&self) -> Option<String> {
        if let Some(url) = &self.url {
            return Some(url.clone());
        }
        let host = self.host.as_ref()?;
        Some(match self.port {
            Some(port) => format!("ws://{host}:{port}"),
            None => format!("ws://{host}"),
        })
    }
}

impl ConnectionSpec {
    /// Load a connection spec from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(VcmError::Configuration(format!(
                "connection spec does not exist: {}",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path)?;
        let spec: ConnectionSpec = toml::from_str(&text).map_err(|e| {
            VcmError::Configuration(format!(
                "could not parse connection spec {}: {}",
                path.display(),
                e
            ))
        })?;
        debug!(path = %path.display(), alias = %spec.alias, "loaded connection spec");
        Ok(spec)
    }

    /// Write this spec as TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = toml::to_string_pretty(self).map_err(|e| {
            VcmError::Configuration(format!(
                "could not encode connection spec {}: {}",
                path.display(),
                e
            ))
        })?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Resolve a server binding; `None` selects the master server.
    pub fn server(&self, server_id: Option<u32>) -> Result<&ServerSpec> {
        let id = server_id.unwrap_or(self.datasource.master_server_id);
        self.datasource
            .servers
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| {
                VcmError::Configuration(format!(
                    "server id {} is not listed in connection spec {}",
                    id, self.alias
                ))
            })
    }

    /// Read the database password from `password_path`, if configured.
    pub fn read_password(&self) -> Result<Option<String>> {
        match &self.datasource.password_path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    VcmError::Configuration(format!(
                        "could not read password file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(Some(text.trim().to_string()))
            }
            None => Ok(None),
        }
    }
}

/// Process-wide run options, passed explicitly into each request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Emit debug-level detail
    pub verbose: bool,
    /// Answer yes to every confirmation prompt
    pub always_yes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConnectionSpec {
        ConnectionSpec {
            alias: "opsdb".to_string(),
            name: "Operations".to_string(),
            owner_user: Some("ops".to_string()),
            owner_group: None,
            datasource: DatasourceSpec {
                database: "opsdb".to_string(),
                user: None,
                password_path: None,
                master_server_id: 1,
                servers: vec![
                    ServerSpec {
                        id: 1,
                        engine: "memory".to_string(),
                        host: None,
                        port: None,
                        url: None,
                        namespace: None,
                    },
                    ServerSpec {
                        id: 2,
                        engine: "surrealdb".to_string(),
                        host: Some("db.internal".to_string()),
                        port: Some(8000),
                        url: None,
                        namespace: None,
                    },
                ],
            },
            users: BTreeMap::from([("alice".to_string(), 1)]),
        }
    }

    #[test]
    fn save_then_load_preserves_spec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opsdb.toml");
        let spec = sample();

        spec.save(&path).unwrap();
        let loaded = ConnectionSpec::load(&path).unwrap();

        assert_eq!(loaded, spec);
    }

    #[test]
    fn load_missing_file_is_configuration_error() {
        let err = ConnectionSpec::load("/nonexistent/schemaman.toml").unwrap_err();
        assert!(matches!(err, VcmError::Configuration(_)));
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "alias = [unterminated").unwrap();

        let err = ConnectionSpec::load(&path).unwrap_err();
        assert!(matches!(err, VcmError::Configuration(_)));
    }

    #[test]
    fn server_defaults_to_master() {
        let spec = sample();
        assert_eq!(spec.server(None).unwrap().id, 1);
        assert_eq!(spec.server(Some(2)).unwrap().engine, "surrealdb");
    }

    #[test]
    fn unknown_server_is_configuration_error() {
        let err = sample().server(Some(9)).unwrap_err();
        assert!(matches!(err, VcmError::Configuration(_)));
    }

    #[test]
    fn endpoint_prefers_url_then_host() {
        let spec = sample();
        assert_eq!(
            spec.server(Some(2)).unwrap().endpoint().as_deref(),
            Some("ws://db.internal:8000")
        );
        assert_eq!(spec.server(Some(1)).unwrap().endpoint(), None);

        let mut server = spec.server(Some(2)).unwrap().clone();
        server.url = Some("mem://".to_string());
        assert_eq!(server.endpoint().as_deref(), Some("mem://"));
    }
}
