//! Fuzz testing for request input handling.
//!
//! This fuzz target feeds arbitrary bytes through the same steps a request
//! body or query string takes before reaching a handler. It ensures that:
//!
//! - URL-encoded parsing never panics on any byte sequence
//! - Collapsing repeated parameters always leaves scalar values
//! - Schema validation never panics and never echoes input in messages
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the validation fuzz target
//! cargo +nightly fuzz run fuzz_validation
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_validation -- -max_total_time=60
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::Value;

use hardened_api::middleware::{collapse_repeated, parse_urlencoded};
use hardened_api::schemas;
use hardened_api::validation::IdFormat;

fuzz_target!(|data: &[u8]| {
    // Form and query decoding
    let mut params = parse_urlencoded(data);
    collapse_repeated(&mut params, &[]);
    assert!(params.values().all(|v| !v.is_array()));

    let input = Value::Object(params);
    for schema in [
        schemas::create_user(),
        schemas::update_user(),
        schemas::list_users(),
        schemas::contact(),
        schemas::item_id(),
        schemas::user_id(IdFormat::UuidV4),
        schemas::user_id(IdFormat::Hex24),
    ] {
        if let Err(violations) = schema.validate(&input) {
            assert!(!violations.is_empty());
        }
    }

    // Raw JSON bodies
    if let Ok(value) = serde_json::from_slice::<Value>(data) {
        let _ = schemas::create_user().validate(&value);
        let _ = schemas::contact().validate(&value);
    }
});
