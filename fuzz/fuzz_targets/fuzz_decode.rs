//! Fuzz target for replication request decoding.
//!
//! This tests that decoding never panics on arbitrary input and that any
//! request it produces survives a re-encode.

#![no_main]

use backup_replicator::{classify, decode, Decoded};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Should never panic
    let classified = classify(data);

    if let Ok(Decoded::Request(request)) = classified {
        assert!(!request.bucket.is_empty());
        assert!(!request.object_key.is_empty());

        // Re-encoding yields the same request
        let again = decode(&request.to_payload()).expect("re-encoded payload decodes");
        assert_eq!(again, Some(request));
    }
});
