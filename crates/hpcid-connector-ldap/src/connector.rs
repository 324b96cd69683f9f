//! LDAP directory client
//!
//! Implements [`Directory`] over ldap3 with paged searches and server
//! failover.

use async_trait::async_trait;
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use hpcid_connector::error::{ConnectorError, ConnectorResult};
use hpcid_connector::resilience::with_timeout;

use crate::config::LdapConfig;
use crate::directory::{Directory, SearchScope};
use crate::entry::DirectoryEntry;
use crate::filter::Filter;

/// LDAP-backed directory.
pub struct LdapDirectory {
    config: LdapConfig,

    /// Cached LDAP connection (lazily initialized).
    connection: Arc<RwLock<Option<Ldap>>>,
}

impl LdapDirectory {
    /// Create a new directory client with the given configuration.
    pub fn new(config: LdapConfig) -> ConnectorResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            connection: Arc::new(RwLock::new(None)),
        })
    }

    pub fn config(&self) -> &LdapConfig {
        &self.config
    }

    /// Get an LDAP connection, creating one if necessary.
    async fn get_connection(&self) -> ConnectorResult<Ldap> {
        {
            let conn_guard = self.connection.read().await;
            if let Some(ref conn) = *conn_guard {
                return Ok(conn.clone());
            }
        }

        let conn = self.connect_any().await?;

        {
            let mut conn_guard = self.connection.write().await;
            *conn_guard = Some(conn.clone());
        }

        Ok(conn)
    }

    /// Drop the cached connection so the next call reconnects.
    async fn reset_connection(&self) {
        let mut conn_guard = self.connection.write().await;
        if let Some(mut conn) = conn_guard.take() {
            let _ = conn.unbind().await;
        }
    }

    /// Try each configured server in order.
    async fn connect_any(&self) -> ConnectorResult<Ldap> {
        let mut last_error = None;
        for uri in &self.config.uris {
            match self.create_connection(uri).await {
                Ok(ldap) => return Ok(ldap),
                Err(ConnectorError::AuthenticationFailed) => {
                    return Err(ConnectorError::AuthenticationFailed)
                }
                Err(e) => {
                    warn!(uri = %uri, error = %e, "LDAP server unavailable, trying next");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| ConnectorError::connection_failed("no LDAP servers configured")))
    }

    /// Create a new LDAP connection.
    async fn create_connection(&self, url: &str) -> ConnectorResult<Ldap> {
        debug!(url = %url, "Connecting to LDAP server");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.config.connection.connection_timeout())
            .set_starttls(self.config.use_starttls)
            .set_no_tls_verify(!self.config.tls_verify);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, url)
            .await
            .map_err(|e| {
                ConnectorError::connection_failed_with_source(
                    format!("Failed to connect to LDAP server at {url}"),
                    e,
                )
            })?;

        // Spawn the connection driver
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        ldap.with_timeout(self.config.connection.operation_timeout());

        let bind_dn = &self.config.bind_dn;
        let bind_password = self.config.bind_password.as_deref().unwrap_or("");

        debug!(bind_dn = %bind_dn, "Performing LDAP bind");

        let result = ldap
            .simple_bind(bind_dn, bind_password)
            .await
            .map_err(|e| {
                ConnectorError::connection_failed_with_source(
                    format!("LDAP bind failed for {bind_dn}"),
                    e,
                )
            })?;

        if result.rc != 0 {
            if result.rc == 49 {
                return Err(ConnectorError::AuthenticationFailed);
            }
            return Err(ConnectorError::connection_failed(format!(
                "LDAP bind failed with code {}: {}",
                result.rc, result.text
            )));
        }

        info!(url = %url, "LDAP connection established successfully");

        Ok(ldap)
    }

    async fn paged_search(
        &self,
        base: &str,
        scope: Scope,
        filter: &str,
        attributes: Vec<String>,
    ) -> ConnectorResult<Vec<DirectoryEntry>> {
        let page_size = i32::try_from(self.config.page_size).map_err(|_| {
            ConnectorError::invalid_config(format!("page_size {} is too large", self.config.page_size))
        })?;
        let mut ldap = self.get_connection().await?;

        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(page_size)),
        ];

        let mut stream = ldap
            .streaming_search_with(adapters, base, scope, filter, attributes)
            .await
            .map_err(|e| ConnectorError::connection_failed_with_source("LDAP search failed", e))?;

        let mut entries = Vec::new();
        while let Some(raw) = stream
            .next()
            .await
            .map_err(|e| ConnectorError::connection_failed_with_source("LDAP search failed", e))?
        {
            let entry = SearchEntry::construct(raw);
            entries.push(DirectoryEntry::new(entry.dn, entry.attrs));
        }

        let result = stream.finish().await;
        // noSuchObject: the search base does not exist, which is an empty result.
        if result.rc == 32 {
            return Ok(Vec::new());
        }
        result.success().map_err(|e| {
            ConnectorError::connection_failed_with_source("LDAP search did not complete", e)
        })?;

        Ok(entries)
    }
}

#[async_trait]
impl Directory for LdapDirectory {
    fn base_dn(&self) -> &str {
        &self.config.base_dn
    }

    #[instrument(skip(self, attributes), fields(filter = %filter))]
    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &Filter,
        attributes: &[&str],
    ) -> ConnectorResult<Vec<DirectoryEntry>> {
        let ldap_filter = filter.to_ldap();
        let scope = match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::Subtree => Scope::Subtree,
        };
        let attrs: Vec<String> = if attributes.is_empty() {
            vec!["*".to_string()]
        } else {
            attributes.iter().map(|a| (*a).to_string()).collect()
        };

        debug!(filter = %ldap_filter, base = %base, "Searching LDAP");

        let result = with_timeout(
            self.config.connection.operation_timeout(),
            "ldap search",
            self.paged_search(base, scope, &ldap_filter, attrs),
        )
        .await
        .and_then(|r| r);

        match result {
            Ok(entries) => {
                debug!(count = entries.len(), "LDAP search completed");
                Ok(entries)
            }
            Err(e) => {
                // A broken connection must not be reused by the next call.
                self.reset_connection().await;
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for LdapDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapDirectory")
            .field("config", &self.config.redacted())
            .finish()
    }
}
