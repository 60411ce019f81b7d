//! Fuzz target for invalid-message policy parsing.
//!
//! This tests that parsing never panics and that every accepted name maps to
//! a policy whose display form parses back to itself.

#![no_main]

use backup_replicator::InvalidMessagePolicy;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|name: &str| {
    if let Ok(policy) = name.parse::<InvalidMessagePolicy>() {
        assert_eq!(policy.to_string().parse::<InvalidMessagePolicy>(), Ok(policy));
    }
});
