//! Allocation registry configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use hpcid_connector::error::{ConnectorError, ConnectorResult};

use crate::registry::QuotaClass;

/// Where the allocation sheet lives and how to read it.
#[derive(Clone, Serialize, Deserialize)]
pub struct AllocationsConfig {
    /// Spreadsheet ID.
    pub sheet_id: String,

    /// Tab holding the project rows.
    pub sheet_name: String,

    /// Service-account key file (JSON) used to obtain access tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<PathBuf>,

    /// Pre-issued bearer token, used instead of `credentials_file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Sheets API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Storage size per mount point, per quota class.
    #[serde(default)]
    pub quotas: BTreeMap<QuotaClass, BTreeMap<String, String>>,

    /// Project codes accepted despite not matching the naming pattern.
    #[serde(default = "default_allow_list")]
    pub allow_list: Vec<String>,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://sheets.googleapis.com".to_string()
}

fn default_allow_list() -> Vec<String> {
    [
        "rdsmtest",
        "mmi-llsm",
        "uow-mh-cryoem",
        "training",
        "ptesting",
        "pMOSP",
        "pMERC",
        "mips-cryoem",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_request_timeout() -> u64 {
    30
}

impl std::fmt::Debug for AllocationsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationsConfig")
            .field("sheet_id", &self.sheet_id)
            .field("sheet_name", &self.sheet_name)
            .field("credentials_file", &self.credentials_file)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "***REDACTED***"),
            )
            .field("api_base", &self.api_base)
            .field("quotas", &self.quotas)
            .field("allow_list", &self.allow_list)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl AllocationsConfig {
    pub fn new(sheet_id: impl Into<String>, sheet_name: impl Into<String>) -> Self {
        Self {
            sheet_id: sheet_id.into(),
            sheet_name: sheet_name.into(),
            credentials_file: None,
            access_token: None,
            api_base: default_api_base(),
            quotas: BTreeMap::new(),
            allow_list: default_allow_list(),
            request_timeout_secs: default_request_timeout(),
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_file = Some(path.into());
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_quota(mut self, class: QuotaClass, mount_point: &str, size: &str) -> Self {
        self.quotas
            .entry(class)
            .or_default()
            .insert(mount_point.to_string(), size.to_string());
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Sizes for a quota class. Classes without their own entry use the
    /// default class's sizes.
    pub fn quota_for(&self, class: QuotaClass) -> BTreeMap<String, String> {
        self.quotas
            .get(&class)
            .or_else(|| self.quotas.get(&QuotaClass::Default))
            .cloned()
            .unwrap_or_default()
    }

    pub fn validate(&self) -> ConnectorResult<()> {
        if self.sheet_id.trim().is_empty() {
            return Err(ConnectorError::invalid_config("sheet_id is required"));
        }
        if self.sheet_name.trim().is_empty() {
            return Err(ConnectorError::invalid_config("sheet_name is required"));
        }
        if self.credentials_file.is_none() && self.access_token.is_none() {
            return Err(ConnectorError::invalid_config(
                "either credentials_file or access_token is required",
            ));
        }
        Ok(())
    }
}
