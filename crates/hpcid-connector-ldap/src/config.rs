//! Directory configuration
//!
//! Connection and layout settings for the LDAP directory.

use serde::{Deserialize, Serialize};
use hpcid_connector::config::ConnectionSettings;
use hpcid_connector::error::{ConnectorError, ConnectorResult};

/// Configuration for the LDAP directory.
#[derive(Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// Server URIs (`ldap://` or `ldaps://`), tried in order.
    pub uris: Vec<String>,

    /// Use STARTTLS upgrade on plain LDAP connections.
    #[serde(default)]
    pub use_starttls: bool,

    /// Verify server certificates.
    #[serde(default = "default_tls_verify")]
    pub tls_verify: bool,

    /// Bind DN for authentication.
    pub bind_dn: String,

    /// Bind password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// Base DN for all searches (e.g. "dc=erc,dc=monash,dc=edu,dc=au").
    pub base_dn: String,

    /// Organizational unit holding project groups.
    #[serde(default = "default_project_ou")]
    pub project_ou: String,

    /// Organizational unit holding cluster access-control groups.
    #[serde(default = "default_acl_ou")]
    pub acl_ou: String,

    /// Page size for search operations.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Maximum nesting depth followed when expanding groups.
    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: u32,

    /// Object classes that mark an entry as a group.
    #[serde(default = "default_group_object_classes")]
    pub group_object_classes: Vec<String>,

    /// Connection settings (timeouts).
    #[serde(default)]
    pub connection: ConnectionSettings,
}

impl std::fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConfig")
            .field("uris", &self.uris)
            .field("use_starttls", &self.use_starttls)
            .field("tls_verify", &self.tls_verify)
            .field("bind_dn", &self.bind_dn)
            .field(
                "bind_password",
                &self.bind_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("base_dn", &self.base_dn)
            .field("project_ou", &self.project_ou)
            .field("acl_ou", &self.acl_ou)
            .field("page_size", &self.page_size)
            .field("max_nesting_depth", &self.max_nesting_depth)
            .field("group_object_classes", &self.group_object_classes)
            .field("connection", &self.connection)
            .finish()
    }
}

fn default_tls_verify() -> bool {
    true
}

fn default_project_ou() -> String {
    "collaborations".to_string()
}

fn default_acl_ou() -> String {
    "aclgroups".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_max_nesting_depth() -> u32 {
    16
}

fn default_group_object_classes() -> Vec<String> {
    vec![
        "groupOfNames".to_string(),
        "groupOfUniqueNames".to_string(),
        "posixGroup".to_string(),
        "auxPosixGroup".to_string(),
    ]
}

impl LdapConfig {
    /// Create a new configuration with required fields.
    pub fn new(uri: impl Into<String>, base_dn: impl Into<String>, bind_dn: impl Into<String>) -> Self {
        Self {
            uris: vec![uri.into()],
            use_starttls: false,
            tls_verify: default_tls_verify(),
            bind_dn: bind_dn.into(),
            bind_password: None,
            base_dn: base_dn.into(),
            project_ou: default_project_ou(),
            acl_ou: default_acl_ou(),
            page_size: default_page_size(),
            max_nesting_depth: default_max_nesting_depth(),
            group_object_classes: default_group_object_classes(),
            connection: ConnectionSettings::default(),
        }
    }

    /// Set the bind password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.bind_password = Some(password.into());
        self
    }

    /// Add a failover server.
    pub fn with_failover(mut self, uri: impl Into<String>) -> Self {
        self.uris.push(uri.into());
        self
    }

    /// Enable STARTTLS.
    pub fn with_starttls(mut self) -> Self {
        self.use_starttls = true;
        self
    }

    /// Set the page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the nesting depth bound.
    pub fn with_max_nesting_depth(mut self, depth: u32) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.uris.is_empty() {
            return Err(ConnectorError::invalid_config("at least one LDAP uri is required"));
        }
        for uri in &self.uris {
            if !(uri.starts_with("ldap://") || uri.starts_with("ldaps://")) {
                return Err(ConnectorError::invalid_config(format!(
                    "LDAP uri must start with ldap:// or ldaps://: {uri}"
                )));
            }
            if uri.starts_with("ldaps://") && self.use_starttls {
                return Err(ConnectorError::invalid_config(
                    "cannot use both ldaps:// and STARTTLS",
                ));
            }
        }

        if self.base_dn.is_empty() {
            return Err(ConnectorError::invalid_config("base_dn is required"));
        }

        if self.bind_dn.is_empty() {
            return Err(ConnectorError::invalid_config("bind_dn is required"));
        }

        if self.page_size == 0 || i32::try_from(self.page_size).is_err() {
            return Err(ConnectorError::invalid_config(format!(
                "page_size must be between 1 and {}",
                i32::MAX
            )));
        }

        if self.max_nesting_depth == 0 {
            return Err(ConnectorError::invalid_config(
                "max_nesting_depth must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Create a copy with the password removed, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.bind_password.is_some() {
            copy.bind_password = Some("***REDACTED***".to_string());
        }
        copy
    }
}
