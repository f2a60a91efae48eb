//! Per-request context.
//!
//! A `RequestContext` binds one resolved user to one server's storage
//! driver for the life of a request. All version-store and change-list
//! operations run through it. The driver handle is released when the
//! context is dropped, on every exit path.

use std::sync::Arc;

use schemaman_state::{StorageDriver, Transaction, UserId};
use tracing::{debug, instrument};

use crate::change_list::ChangeListManager;
use crate::config::{ConnectionSpec, RunOptions, ServerSpec};
use crate::error::Result;
use crate::identity::{IdentityResolver, StaticIdentityResolver};
use crate::obs;
use crate::registry::DriverRegistry;
use crate::version_store::VersionStore;

pub struct RequestContext {
    username: String,
    user_id: UserId,
    server: ServerSpec,
    driver: Arc<dyn StorageDriver>,
    identity: Arc<dyn IdentityResolver>,
    options: RunOptions,
}

impl RequestContext {
    /// Resolve the user, pick the server (master when `server_id` is `None`)
    /// and acquire its driver.
    #[instrument(skip(spec, registry, identity, options), fields(alias = %spec.alias))]
    pub async fn open(
        spec: &ConnectionSpec,
        registry: &DriverRegistry,
        identity: Arc<dyn IdentityResolver>,
        username: &str,
        server_id: Option<u32>,
        options: RunOptions,
    ) -> Result<Self> {
        let server = spec.server(server_id)?.clone();
        let user_id = identity.resolve(username).await?;
        let driver = registry.connect(spec, &server).await?;
        debug!(user_id = %user_id, server_id = server.id, "request context opened");

        Ok(Self {
            username: username.to_string(),
            user_id,
            server,
            driver,
            identity,
            options,
        })
    }

    /// Bind an already-acquired driver to a user.
    ///
    /// The server is described as id 0 of the driver's engine and the
    /// identity resolver knows only this user.
    pub fn from_driver(
        driver: Arc<dyn StorageDriver>,
        username: impl Into<String>,
        user_id: UserId,
    ) -> Self {
        let username = username.into();
        let server = ServerSpec {
            id: 0,
            engine: driver.engine().to_string(),
            host: None,
            port: None,
            url: None,
            namespace: None,
        };
        let identity = Arc::new(StaticIdentityResolver::new().with_user(username.clone(), user_id));
        Self {
            username,
            user_id,
            server,
            driver,
            identity,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn server(&self) -> &ServerSpec {
        &self.server
    }

    pub fn driver(&self) -> &Arc<dyn StorageDriver> {
        &self.driver
    }

    pub fn options(&self) -> RunOptions {
        self.options
    }

    /// Resolve another username through this context's identity resolver.
    pub async fn resolve_user(&self, username: &str) -> Result<UserId> {
        self.identity.resolve(username).await
    }

    /// Span carrying this request's user and server id.
    pub fn span(&self) -> tracing::Span {
        obs::request_span(&self.username, self.server.id)
    }

    pub async fn test_connection(&self) -> Result<()> {
        self.driver.test_connection().await?;
        Ok(())
    }

    /// Open a transaction scope on this context's driver.
    pub fn begin(&self) -> Transaction {
        Transaction::begin(self.driver.clone())
    }

    pub fn versions(&self) -> VersionStore<'_> {
        VersionStore::new(self)
    }

    pub fn change_lists(&self) -> ChangeListManager<'_> {
        ChangeListManager::new(self)
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        debug!(
            engine = self.driver.engine(),
            server_id = self.server.id,
            user = %self.username,
            "driver released"
        );
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("username", &self.username)
            .field("user_id", &self.user_id)
            .field("server", &self.server)
            .field("engine", &self.driver.engine())
            .field("options", &self.options)
            .finish()
    }
}
