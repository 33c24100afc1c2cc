use proptest::prelude::*;

/// Strategy for release versions, tagged or not, with small components
pub fn version_string_strategy() -> impl Strategy<Value = String> {
    (
        0u64..4,
        0u64..25,
        0u64..15,
        prop::option::of("(alpha|beta|rc)([1-9]|\\.[0-9]{1,2})"),
        prop::option::of("(ent|fips1402)"),
    )
        .prop_map(|(major, minor, patch, pre, meta)| {
            let mut version = format!("{major}.{minor}.{patch}");
            if let Some(pre) = pre {
                version.push('-');
                version.push_str(&pre);
            }
            if let Some(meta) = meta {
                version.push('+');
                version.push_str(&meta);
            }
            version
        })
}

/// Strategy for untagged release versions
pub fn release_string_strategy() -> impl Strategy<Value = String> {
    (0u64..4, 0u64..25, 0u64..15).prop_map(|(a, b, c)| format!("{a}.{b}.{c}"))
}
