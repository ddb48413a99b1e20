#![no_main]
use eip_sim::{
    plc::{Plc, PlcKind, Session},
    server,
    tag::{TagDef, TagStore, TagType},
};
use libfuzzer_sys::fuzz_target;

// Wrap the fuzzed bytes as the CIP payload of a well-formed SendRRData frame
// so the service layer sees them directly.
fuzz_target!(|data: &[u8]| {
    if data.len() > 4000 {
        return;
    }

    let mut tags = TagStore::new();
    tags.insert(TagDef::new("Fuzz", TagType::LINT, &[8]).unwrap())
        .unwrap();
    let plc = Plc::new(PlcKind::Micro800, None, tags).unwrap();

    let mut session = Session::new();

    let register = {
        let mut frame = vec![0x65, 0x00, 0x04, 0x00];
        frame.extend_from_slice(&[0; 20]);
        frame.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]);
        frame
    };
    let (reply, _) = server::process(&register, &mut session, &plc).expect("register failed");
    let handle = u32::from_le_bytes(reply.bytes()[4..8].try_into().unwrap());

    let mut payload = vec![0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xB2, 0x00];
    payload.extend_from_slice(&(data.len() as u16).to_le_bytes());
    payload.extend_from_slice(data);

    let mut frame = vec![0x6F, 0x00];
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(&handle.to_le_bytes());
    frame.extend_from_slice(&[0; 16]);
    frame.extend_from_slice(&payload);

    let _ = server::process(&frame, &mut session, &plc);
});
