mod common;

use common::strategies::*;
use compat_matrix::version::{MinimumVersionPolicy, ReleaseVersion};
use proptest::prelude::*;
use std::cmp::Ordering;

fn parse(s: &str) -> ReleaseVersion {
    s.parse().unwrap()
}

proptest! {
    /// Property: every generated version string parses and displays back unchanged
    #[test]
    fn versions_display_as_parsed(raw in version_string_strategy()) {
        prop_assert_eq!(parse(&raw).to_string(), raw);
    }

    /// Property: untagged versions order exactly like their numeric components
    #[test]
    fn release_order_matches_numeric_tuple(a in release_string_strategy(), b in release_string_strategy()) {
        let (va, vb) = (parse(&a), parse(&b));
        prop_assert_eq!(va.cmp(&vb), va.core().cmp(&vb.core()));
    }

    /// Property: ordering is antisymmetric and consistent with equality
    #[test]
    fn ordering_is_total(a in version_string_strategy(), b in version_string_strategy()) {
        let (va, vb) = (parse(&a), parse(&b));
        prop_assert_eq!(va.cmp(&vb), vb.cmp(&va).reverse());
        prop_assert_eq!(va.cmp(&vb) == Ordering::Equal, va == vb);
    }

    /// Property: ordering is transitive
    #[test]
    fn ordering_is_transitive(
        a in version_string_strategy(),
        b in version_string_strategy(),
        c in version_string_strategy(),
    ) {
        let mut sorted = vec![parse(&a), parse(&b), parse(&c)];
        sorted.sort();
        prop_assert!(sorted[0] <= sorted[1] && sorted[1] <= sorted[2]);
        prop_assert!(sorted[0] <= sorted[2]);
    }

    /// Property: a pre-release sorts before its release
    #[test]
    fn prerelease_precedes_release(raw in release_string_strategy(), tag in "(alpha|beta|rc)[1-9]") {
        let release = parse(&raw);
        let pre = parse(&format!("{raw}-{tag}"));
        prop_assert!(pre < release);
    }

    /// Property: numeric pre-release identifiers order numerically, not as text
    #[test]
    fn prerelease_numeric_identifiers_order_numerically(
        raw in release_string_strategy(),
        a in 0u64..200,
        b in 0u64..200,
    ) {
        let (va, vb) = (parse(&format!("{raw}-rc.{a}")), parse(&format!("{raw}-rc.{b}")));
        prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
    }

    /// Property: the floor admits exactly the untagged versions at or above it
    #[test]
    fn floor_admits_untagged_versions_at_or_above(floor in release_string_strategy(), raw in version_string_strategy()) {
        let policy = MinimumVersionPolicy::new(parse(&floor));
        let version = parse(&raw);
        prop_assert_eq!(policy.admits(&version), !version.is_tagged() && version >= *policy.floor());
    }
}
