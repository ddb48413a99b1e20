#![no_main]
use eip_sim::{
    plc::{Plc, PlcKind, Session},
    server,
    tag::{TagDef, TagStore, TagType},
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut tags = TagStore::new();
    tags.insert(TagDef::new("Fuzz", TagType::DINT, &[4, 4]).unwrap())
        .unwrap();
    let plc = Plc::new(PlcKind::Micro800, None, tags).unwrap();

    let mut session = Session::new();

    // Drain the input as a frame stream, the way the TCP loop would.
    let mut buf = data;
    while let Ok((reply, consumed)) = server::process(buf, &mut session, &plc) {
        assert!(consumed <= buf.len());
        buf = &buf[consumed..];
        if reply.is_close() {
            break;
        }
    }
});
