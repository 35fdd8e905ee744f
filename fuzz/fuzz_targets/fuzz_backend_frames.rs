#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use pgwire_client::core::codec::PgCodec;
use pgwire_client::protocol::backend::BackendMessage;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // First byte toggles skip mode so both decode paths are covered
    let Some((&mode, rest)) = data.split_first() else {
        return;
    };
    let mut codec = PgCodec::new(1 << 20);
    codec.set_skip_rows(mode & 1 == 1);
    let mut buf = BytesMut::from(rest);
    while let Ok(Some(frame)) = codec.decode(&mut buf) {
        let _ = BackendMessage::from_frame(frame);
    }
});
