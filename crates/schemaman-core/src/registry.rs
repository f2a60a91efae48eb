//! Engine-type registry.
//!
//! A server's `type` tag selects the `DriverFactory` that connects to it.
//! The choice is made once, when a `RequestContext` is opened.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use schemaman_state::fakes::MemoryDriver;
use schemaman_state::{StorageDriver, StorageError, SurrealConfig, SurrealDriver};
use tracing::{debug, info};

use crate::config::{ConnectionSpec, ServerSpec};
use crate::error::{Result, VcmError};

/// Connects a configured server to a storage driver.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn connect(
        &self,
        spec: &ConnectionSpec,
        server: &ServerSpec,
    ) -> Result<Arc<dyn StorageDriver>>;
}

/// Factory for the "memory" engine.
///
/// Drivers are shared per (spec alias, server id), so every context bound
/// to the same server sees the same data.
#[derive(Debug, Default)]
pub struct MemoryDriverFactory {
    drivers: Mutex<HashMap<(String, u32), Arc<MemoryDriver>>>,
}

impl MemoryDriverFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DriverFactory for MemoryDriverFactory {
    async fn connect(
        &self,
        spec: &ConnectionSpec,
        server: &ServerSpec,
    ) -> Result<Arc<dyn StorageDriver>> {
        let mut drivers = self
            .drivers
            .lock()
            .map_err(|e| StorageError::Backend(format!("driver cache lock poisoned: {e}")))?;
        let driver: Arc<dyn StorageDriver> = drivers
            .entry((spec.alias.clone(), server.id))
            .or_insert_with(|| {
                debug!(alias = %spec.alias, server_id = server.id, "creating memory driver");
                Arc::new(MemoryDriver::new())
            })
            .clone();
        Ok(driver)
    }
}

/// Factory for the "surrealdb" engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SurrealDriverFactory;

#[async_trait]
impl DriverFactory for SurrealDriverFactory {
    async fn connect(
        &self,
        spec: &ConnectionSpec,
        server: &ServerSpec,
    ) -> Result<Arc<dyn StorageDriver>> {
        let endpoint = server.endpoint().ok_or_else(|| {
            VcmError::Configuration(format!(
                "server {} has neither url nor host configured",
                server.id
            ))
        })?;

        let mut config = SurrealConfig::new(endpoint)
            .with_namespace(server.namespace.as_deref().unwrap_or("schemaman"))
            .with_database(spec.datasource.database.as_str());
        if let (Some(user), Some(password)) = (&spec.datasource.user, spec.read_password()?) {
            config = config.with_credentials(user.as_str(), password, false);
        }

        let driver = SurrealDriver::connect(&config).await?;
        Ok(Arc::new(driver))
    }
}

/// Engine-type tag to driver factory.
#[derive(Default)]
pub struct DriverRegistry {
    factories: BTreeMap<String, Arc<dyn DriverFactory>>,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the "memory" and "surrealdb" engines.
    pub fn with_builtin() -> Self {
        Self::new()
            .with("memory", Arc::new(MemoryDriverFactory::new()))
            .with("surrealdb", Arc::new(SurrealDriverFactory))
    }

    pub fn with(mut self, engine: impl Into<String>, factory: Arc<dyn DriverFactory>) -> Self {
        self.register(engine, factory);
        self
    }

    pub fn register(&mut self, engine: impl Into<String>, factory: Arc<dyn DriverFactory>) {
        self.factories.insert(engine.into(), factory);
    }

    /// Registered engine tags, sorted.
    pub fn engines(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Connect to a server with the factory registered for its engine tag.
    pub async fn connect(
        &self,
        spec: &ConnectionSpec,
        server: &ServerSpec,
    ) -> Result<Arc<dyn StorageDriver>> {
        let factory = self.factories.get(&server.engine).ok_or_else(|| {
            VcmError::Configuration(format!(
                "unknown engine type {:?} for server {} (known: {})",
                server.engine,
                server.id,
                self.engines().join(", ")
            ))
        })?;

        let driver = factory.connect(spec, server).await?;
        info!(engine = %server.engine, server_id = server.id, "driver acquired");
        Ok(driver)
    }
}
