//! # Directory Connector
//!
//! LDAP access and group membership resolution for hpcid.
//!
//! Project and access-control groups live in organizational units of the
//! directory. Groups list members either as DNs in `member` (which may name
//! further groups) or as usernames in `memberUid`; both encodings can appear
//! on the same entry and are always drained together.
//!
//! ## Example
//!
//! ```ignore
//! use hpcid_connector_ldap::{DirectoryResolver, LdapConfig, LdapDirectory};
//!
//! let config = LdapConfig::new("ldaps://ldap.example.org", "dc=example,dc=org", "cn=hpcid")
//!     .with_password("secret");
//! let directory = Arc::new(LdapDirectory::new(config.clone())?);
//! let resolver = DirectoryResolver::from_config(directory, &config);
//!
//! let users = resolver.resolve_members("p123", &config.project_ou).await?;
//! ```

pub mod config;
pub mod connector;
pub mod directory;
pub mod entry;
pub mod filter;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod resolver;

// Re-exports
pub use config::LdapConfig;
pub use connector::LdapDirectory;
pub use directory::{Directory, SearchScope};
pub use entry::{DirectoryEntry, MemberEncoding};
pub use filter::Filter;
#[cfg(any(test, feature = "test-support"))]
pub use memory::InMemoryDirectory;
pub use resolver::{DirectoryResolver, Membership};
