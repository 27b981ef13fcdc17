//! Fuzz target for `WireEvent::decode`
//!
//! The relay link delivers attacker-controllable bytes, so the decoder is a
//! direct attack surface:
//! - Completely arbitrary bytes (general malformation)
//! - Deeply nested CBOR (stack exhaustion)
//! - Huge claimed lengths (allocation pressure)
//!
//! # Invariants
//!
//! - Decoding NEVER panics
//! - Successfully decoded events re-encode and decode to the same value

#![no_main]

use libfuzzer_sys::fuzz_target;
use murmur_proto::WireEvent;

fuzz_target!(|data: &[u8]| {
    let Ok(event) = WireEvent::decode(data) else {
        return;
    };

    // Anything the decoder accepts must survive a round trip.
    let bytes = event.encode().expect("accepted event must re-encode");
    let again = WireEvent::decode(&bytes).expect("re-encoded event must decode");
    assert_eq!(event, again);
});
