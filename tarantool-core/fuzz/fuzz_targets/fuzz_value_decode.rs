#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

use tarantool_core::protocol::msgpack;

fuzz_target!(|data: &[u8]| {
    let mut src = data;
    let Ok(value) = msgpack::decode(&mut src) else {
        return;
    };

    // Encoding is canonical: a decoded value re-encodes to the same bytes
    // on every pass.
    let mut first = BytesMut::new();
    if msgpack::encode(&value, &mut first).is_err() {
        return;
    }
    let mut view = &first[..];
    let decoded = msgpack::decode(&mut view).expect("re-decode failed");
    let mut second = BytesMut::new();
    msgpack::encode(&decoded, &mut second).expect("re-encode failed");
    assert_eq!(first, second);
});
