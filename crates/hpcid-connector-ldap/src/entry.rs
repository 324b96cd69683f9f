//! Directory entries
//!
//! Attribute names and object classes are normalized to lowercase on
//! construction so lookups do not depend on server casing.

use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A directory record, immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    dn: String,
    object_classes: BTreeSet<String>,
    attributes: BTreeMap<String, Vec<String>>,
}

/// How a group lists its members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberEncoding {
    /// `member`: member DNs, possibly of other groups.
    Modern(Vec<String>),
    /// `memberUid`: bare usernames needing a secondary lookup.
    Legacy(Vec<String>),
}

impl DirectoryEntry {
    /// Build an entry from raw attributes as returned by the server.
    pub fn new(dn: impl Into<String>, attrs: HashMap<String, Vec<String>>) -> Self {
        let mut attributes: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, values) in attrs {
            attributes
                .entry(name.to_ascii_lowercase())
                .or_default()
                .extend(values);
        }
        let object_classes = attributes
            .get("objectclass")
            .map(|classes| classes.iter().map(|c| c.to_ascii_lowercase()).collect())
            .unwrap_or_default();

        Self {
            dn: dn.into(),
            object_classes,
            attributes,
        }
    }

    /// Builder used by fixtures and the in-memory directory.
    pub fn builder(dn: impl Into<String>) -> DirectoryEntryBuilder {
        DirectoryEntryBuilder {
            dn: dn.into(),
            attrs: HashMap::new(),
        }
    }

    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// All values of an attribute, empty when absent.
    pub fn values(&self, attribute: &str) -> &[String] {
        self.attributes
            .get(&attribute.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First value of an attribute.
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.values(attribute).first().map(String::as_str)
    }

    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes.contains_key(&attribute.to_ascii_lowercase())
    }

    pub fn has_object_class(&self, class: &str) -> bool {
        self.object_classes.contains(&class.to_ascii_lowercase())
    }

    /// Whether any of the given object classes marks this entry as a group.
    pub fn is_group(&self, group_classes: &[String]) -> bool {
        group_classes.iter().any(|c| self.has_object_class(c))
    }

    /// Member encodings present on this entry, modern first.
    pub fn member_encodings(&self) -> Vec<MemberEncoding> {
        let mut encodings = Vec::new();
        if self.has_attribute("member") {
            encodings.push(MemberEncoding::Modern(self.values("member").to_vec()));
        }
        if self.has_attribute("memberUid") {
            encodings.push(MemberEncoding::Legacy(self.values("memberUid").to_vec()));
        }
        encodings
    }

    /// Username of this entry: its `uid` attribute, or the value of a
    /// `uid=` leading RDN.
    pub fn username(&self) -> Option<&str> {
        self.first("uid")
            .or_else(|| user_from_dn(&self.dn))
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }
}

/// Builder for [`DirectoryEntry`].
#[derive(Debug)]
pub struct DirectoryEntryBuilder {
    dn: String,
    attrs: HashMap<String, Vec<String>>,
}

impl DirectoryEntryBuilder {
    pub fn attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attrs
            .entry(name.to_string())
            .or_default()
            .push(value.into());
        self
    }

    pub fn attrs<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attrs
            .entry(name.to_string())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> DirectoryEntry {
        DirectoryEntry::new(self.dn, self.attrs)
    }
}

/// Lowercased DN with whitespace around RDN separators removed, for
/// identity comparisons.
pub fn normalize_dn(dn: &str) -> String {
    dn.split(',')
        .map(|rdn| rdn.trim().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

/// Attribute type and value of the leading RDN.
pub fn leading_rdn(dn: &str) -> Option<(&str, &str)> {
    let rdn = dn.split(',').next()?.trim();
    let (attr, value) = rdn.split_once('=')?;
    Some((attr.trim(), value.trim()))
}

/// The username when `dn` names a user entry (`uid=...,`), else `None`.
pub fn user_from_dn(dn: &str) -> Option<&str> {
    match leading_rdn(dn) {
        Some((attr, value)) if attr.eq_ignore_ascii_case("uid") && !value.is_empty() => {
            Some(value)
        }
        _ => None,
    }
}

/// Escape a value for use in a DN (RFC 4514).
pub fn escape_dn_value(value: &str) -> String {
    let count = value.chars().count();
    let mut result = String::with_capacity(value.len() * 2);

    for (i, ch) in value.chars().enumerate() {
        let is_first = i == 0;
        let is_last = i + 1 == count;

        match ch {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                result.push('\\');
                result.push(ch);
            }
            '\0' => result.push_str("\\00"),
            ' ' if is_first || is_last => result.push_str("\\20"),
            '#' if is_first => result.push_str("\\23"),
            _ => result.push(ch),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_names_are_case_insensitive() {
        let entry = DirectoryEntry::builder("cn=p123,ou=collaborations,dc=example,dc=org")
            .attr("objectClass", "groupOfNames")
            .attr("CN", "p123")
            .attrs("memberUID", ["alice"])
            .build();

        assert_eq!(entry.first("cn"), Some("p123"));
        assert_eq!(entry.values("memberuid"), ["alice".to_string()]);
        assert!(entry.has_object_class("GROUPOFNAMES"));
        assert!(entry.is_group(&["posixGroup".to_string(), "groupOfNames".to_string()]));
    }

    #[test]
    fn test_member_encodings_both_present() {
        let entry = DirectoryEntry::builder("cn=p123,dc=example,dc=org")
            .attrs("member", ["uid=alice,ou=people,dc=example,dc=org"])
            .attrs("memberUid", ["bob"])
            .build();

        assert_eq!(
            entry.member_encodings(),
            vec![
                MemberEncoding::Modern(vec!["uid=alice,ou=people,dc=example,dc=org".to_string()]),
                MemberEncoding::Legacy(vec!["bob".to_string()]),
            ]
        );
    }

    #[test]
    fn test_member_encodings_absent() {
        let entry = DirectoryEntry::builder("cn=empty,dc=example,dc=org").build();
        assert!(entry.member_encodings().is_empty());
    }

    #[test]
    fn test_user_from_dn() {
        assert_eq!(user_from_dn("uid=alice,ou=people,dc=example,dc=org"), Some("alice"));
        assert_eq!(user_from_dn("UID = bob ,dc=example"), Some("bob"));
        assert_eq!(user_from_dn("cn=p123,ou=collaborations"), None);
        assert_eq!(user_from_dn("uid=,dc=example"), None);
        assert_eq!(user_from_dn(""), None);
    }

    #[test]
    fn test_username_prefers_uid_attribute() {
        let entry = DirectoryEntry::builder("cn=Alice Smith,ou=people,dc=example,dc=org")
            .attr("uid", "asmith")
            .build();
        assert_eq!(entry.username(), Some("asmith"));

        let entry = DirectoryEntry::builder("uid=bob,ou=people,dc=example,dc=org").build();
        assert_eq!(entry.username(), Some("bob"));
    }

    #[test]
    fn test_normalize_dn() {
        assert_eq!(
            normalize_dn("CN=P123, OU=Collaborations,dc=Example"),
            "cn=p123,ou=collaborations,dc=example"
        );
    }

    #[test]
    fn test_escape_dn_value() {
        assert_eq!(escape_dn_value("collaborations"), "collaborations");
        assert_eq!(escape_dn_value("a,b"), "a\\,b");
        assert_eq!(escape_dn_value(" lead"), "\\20lead");
        assert_eq!(escape_dn_value("trail "), "trail\\20");
        assert_eq!(escape_dn_value("#x"), "\\23x");
    }
}
