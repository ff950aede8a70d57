#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tappet_zmtp::codec::{Decoded, MessageDecoder};
use tappet_zmtp::command::ZmtpCommand;
use tappet_zmtp::greeting::{ZmtpGreeting, GREETING_SIZE};

fuzz_target!(|data: &[u8]| {
    if data.len() >= GREETING_SIZE {
        let _ = ZmtpGreeting::parse(&data[..GREETING_SIZE]);
    }

    // Feed the frame decoder in uneven chunks, as a socket read would
    let mut decoder = MessageDecoder::new(Some(1 << 20));
    let mut buf = BytesMut::new();
    for chunk in data.chunks(7) {
        buf.extend_from_slice(chunk);
        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(Decoded::Command(payload))) => {
                    if let Ok(command) = ZmtpCommand::parse(&payload) {
                        let _ = command.properties();
                    }
                }
                Ok(Some(Decoded::Message(msg))) => assert!(!msg.is_empty()),
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
});
