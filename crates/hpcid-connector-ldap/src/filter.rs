//! Search filters
//!
//! A small filter model rendered to RFC 4515 strings for the server and
//! evaluated directly by the in-memory directory.

use std::fmt;

use crate::entry::{normalize_dn, DirectoryEntry};

/// Search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `(attr=value)`, case-insensitive.
    Equals { attribute: String, value: String },
    /// `(attr=*)`.
    Present { attribute: String },
    And { filters: Vec<Filter> },
    Or { filters: Vec<Filter> },
    Not { filter: Box<Filter> },
}

impl Filter {
    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present {
            attribute: attribute.into(),
        }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And { filters }
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or { filters }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Filter::Not {
            filter: Box::new(filter),
        }
    }

    /// Match any of the given object classes.
    pub fn any_object_class(classes: &[String]) -> Self {
        Filter::or(
            classes
                .iter()
                .map(|c| Filter::eq("objectClass", c.as_str()))
                .collect(),
        )
    }

    /// Render as an LDAP filter string.
    pub fn to_ldap(&self) -> String {
        match self {
            Filter::Equals { attribute, value } => {
                format!("({}={})", attribute, escape_filter_value(value))
            }
            Filter::Present { attribute } => format!("({attribute}=*)"),
            Filter::And { filters } => {
                let inner: Vec<String> = filters.iter().map(Filter::to_ldap).collect();
                format!("(&{})", inner.join(""))
            }
            Filter::Or { filters } => {
                let inner: Vec<String> = filters.iter().map(Filter::to_ldap).collect();
                format!("(|{})", inner.join(""))
            }
            Filter::Not { filter } => format!("(!{})", filter.to_ldap()),
        }
    }

    /// Evaluate against an entry.
    ///
    /// Values are compared case-insensitively; `member` values are compared
    /// as normalized DNs.
    pub fn matches(&self, entry: &DirectoryEntry) -> bool {
        match self {
            Filter::Equals { attribute, value } => {
                let is_dn = attribute.eq_ignore_ascii_case("member");
                entry.values(attribute).iter().any(|v| {
                    if is_dn {
                        normalize_dn(v) == normalize_dn(value)
                    } else {
                        v.eq_ignore_ascii_case(value)
                    }
                })
            }
            Filter::Present { attribute } => {
                attribute.eq_ignore_ascii_case("objectClass") || entry.has_attribute(attribute)
            }
            Filter::And { filters } => filters.iter().all(|f| f.matches(entry)),
            Filter::Or { filters } => filters.iter().any(|f| f.matches(entry)),
            Filter::Not { filter } => !filter.matches(entry),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ldap())
    }
}

/// Escape special characters in filter values (RFC 4515).
pub fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_group_lookup() {
        let filter = Filter::and(vec![
            Filter::eq("cn", "p123"),
            Filter::any_object_class(&["groupOfNames".to_string(), "posixGroup".to_string()]),
        ]);
        assert_eq!(
            filter.to_ldap(),
            "(&(cn=p123)(|(objectClass=groupOfNames)(objectClass=posixGroup)))"
        );
    }

    #[test]
    fn test_render_escapes_values() {
        let filter = Filter::eq("uid", "a*b(c)\\");
        assert_eq!(filter.to_ldap(), "(uid=a\\2ab\\28c\\29\\5c)");
        assert_eq!(Filter::not(Filter::present("mail")).to_string(), "(!(mail=*))");
    }

    #[test]
    fn test_matches_case_insensitively() {
        let entry = DirectoryEntry::builder("uid=alice,ou=people,dc=example,dc=org")
            .attr("objectClass", "posixAccount")
            .attr("uid", "alice")
            .build();

        assert!(Filter::and(vec![
            Filter::eq("UID", "Alice"),
            Filter::eq("objectclass", "POSIXACCOUNT"),
        ])
        .matches(&entry));
        assert!(!Filter::eq("uid", "bob").matches(&entry));
        assert!(Filter::present("objectClass").matches(&entry));
        assert!(!Filter::present("mail").matches(&entry));
    }

    #[test]
    fn test_matches_member_dn_normalized() {
        let group = DirectoryEntry::builder("cn=p123,ou=collaborations,dc=example,dc=org")
            .attr("member", "uid=alice, ou=people, dc=example, dc=org")
            .build();
        assert!(Filter::eq("member", "UID=alice,ou=People,dc=example,dc=org").matches(&group));
    }
}
