//! Fuzz test for resource path parsing
//!
//! Feeds arbitrary strings through `ResourcePath::parse` and the path
//! helpers to find panics on odd separators, parameters and slicing.
//!
//! Run with: cargo +nightly fuzz run path_fuzz -- -max_total_time=60

#![no_main]

use carrel_core::path::{absolute_path, ancestors, normalize, parent, relative_path};
use carrel_core::ResourcePath;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    let parsed = ResourcePath::parse(input);
    assert!(parsed.path().starts_with('/'), "parsed path must be absolute");
    assert!(!parsed.path().contains("//"), "parsed path has empty components");
    assert!(input.ends_with(parsed.fragment()));
    let _ = parsed.version();
    let _ = parsed.comment_id();
    let _ = parsed.path_with_version();

    let path = normalize(input);
    let chain = ancestors(&path);
    if path == "/" {
        assert!(chain.is_empty());
    } else {
        assert_eq!(chain.len(), path.matches('/').count());
        assert_eq!(chain.first().cloned(), parent(&path));
    }

    // Chroot mapping round-trips every normalized path
    let absolute = absolute_path(Some("/fuzz/base"), &path);
    assert_eq!(relative_path(Some("/fuzz/base"), &absolute), path);
});
