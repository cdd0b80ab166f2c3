#![no_main]

use bridge_core::spi::BEAT_BYTES;
use bridge_server::wire::{decode_request, CommandHeader, Request, HEADER_BYTES};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((head, rest)) = data.split_first_chunk::<HEADER_BYTES>() else {
        return;
    };

    let header = CommandHeader::decode(head);
    assert_eq!(CommandHeader::decode(&header.encode()), header);

    let len = usize::try_from(header.payload_len()).unwrap_or(usize::MAX);
    let payload = rest[..len.min(rest.len())].to_vec();
    let short = payload.len() < len;

    if let Ok(Request::Command(command)) = decode_request(&header, payload) {
        assert!(!short, "accepted a truncated payload");
        assert!(command.validate().is_ok());
        assert_eq!(len % BEAT_BYTES, 0);
    }
});
