#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

use tarantool_core::protocol::PacketCodec;

fuzz_target!(|data: &[u8]| {
    let mut codec = PacketCodec::with_max_frame_size(1024 * 1024);
    let mut buf = BytesMut::from(data);

    while let Ok(Some(packet)) = codec.decode(&mut buf) {
        let _ = packet.is_error();
        let _ = packet.into_result();
    }
});
