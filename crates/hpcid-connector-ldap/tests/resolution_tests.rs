//! Nested group resolution across both member encodings.

use std::collections::BTreeSet;
use std::sync::Arc;

use hpcid_connector_ldap::{DirectoryResolver, InMemoryDirectory};

const BASE: &str = "dc=erc,dc=monash,dc=edu,dc=au";
const OU: &str = "collaborations";

fn as_set(users: &[String]) -> BTreeSet<&str> {
    users.iter().map(String::as_str).collect()
}

#[tokio::test]
async fn test_nested_group_with_legacy_members() {
    // G.member = [userA, H]; H.memberUid = [userB]
    let dir = InMemoryDirectory::new(BASE)
        .with_user("usera")
        .with_user("userb");
    let user_a = dir.user_dn("usera");
    let group_h = dir.group_dn(OU, "h");
    let dir = dir
        .with_group(OU, "h", &[], &["userb"])
        .with_group(OU, "g", &[user_a.as_str(), group_h.as_str()], &[]);

    let resolver = DirectoryResolver::new(Arc::new(dir), 16);
    let users = resolver.resolve_members("g", OU).await.unwrap();

    assert_eq!(as_set(&users), BTreeSet::from(["usera", "userb"]));
    assert_eq!(users.len(), 2);
}

#[tokio::test]
async fn test_cycle_terminates_with_union_of_users() {
    // G contains H contains G
    let dir = InMemoryDirectory::new(BASE)
        .with_user("alice")
        .with_user("bob")
        .with_user("carol");
    let alice = dir.user_dn("alice");
    let bob = dir.user_dn("bob");
    let group_g = dir.group_dn(OU, "g");
    let group_h = dir.group_dn(OU, "h");
    let dir = dir
        .with_group(OU, "g", &[alice.as_str(), group_h.as_str()], &[])
        .with_group(OU, "h", &[bob.as_str(), group_g.as_str()], &["carol"]);

    let dir = Arc::new(dir);
    let resolver = DirectoryResolver::new(dir.clone(), 16);
    let membership = resolver.resolve("g", OU).await.unwrap();

    assert_eq!(
        as_set(&membership.users),
        BTreeSet::from(["alice", "bob", "carol"])
    );
    assert_eq!(membership.cycles_detected, 1);
    assert!(!membership.depth_limited);
    // group lookup + read H + memberUid lookup for carol
    assert_eq!(dir.search_count(), 3);
}

#[tokio::test]
async fn test_self_referencing_group() {
    let dir = InMemoryDirectory::new(BASE).with_user("alice");
    let alice = dir.user_dn("alice");
    let group_g = dir.group_dn(OU, "g");
    let dir = dir.with_group(OU, "g", &[group_g.as_str(), alice.as_str()], &[]);

    let membership = DirectoryResolver::new(Arc::new(dir), 16)
        .resolve("g", OU)
        .await
        .unwrap();
    assert_eq!(membership.users, vec!["alice"]);
    assert_eq!(membership.cycles_detected, 1);
}

#[tokio::test]
async fn test_diamond_counts_each_user_once() {
    // G -> {H, I}; H -> {J}; I -> {J}; J -> {alice}
    let dir = InMemoryDirectory::new(BASE).with_user("alice");
    let alice = dir.user_dn("alice");
    let h = dir.group_dn(OU, "h");
    let i = dir.group_dn(OU, "i");
    let j = dir.group_dn(OU, "j");
    let dir = dir
        .with_group(OU, "j", &[alice.as_str()], &[])
        .with_group(OU, "h", &[j.as_str()], &[])
        .with_group(OU, "i", &[j.as_str()], &["alice"])
        .with_group(OU, "g", &[h.as_str(), i.as_str()], &[]);

    let membership = DirectoryResolver::new(Arc::new(dir), 16)
        .resolve("g", OU)
        .await
        .unwrap();
    assert_eq!(membership.users, vec!["alice"]);
    assert_eq!(membership.max_depth_traversed, 2);
}
