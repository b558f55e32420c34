#![no_main]

use libfuzzer_sys::fuzz_target;
use mobdebug::wire::demux::{Demux, Output};
use mobdebug::wire::CommandKind;

mod utils;

const KINDS: [CommandKind; 4] = [
    CommandKind::Run,
    CommandKind::Exec,
    CommandKind::Stack,
    CommandKind::SetBreakpoint,
];

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let rest = utils::capped(rest);

    let mut demux = Demux::new();
    demux.expect_reply(KINDS[usize::from(selector) % KINDS.len()]);

    // Chunk boundaries must never change how many replies come out.
    let chunk = usize::from(selector >> 2).max(1);
    let mut replies = 0;
    for piece in rest.chunks(chunk) {
        for output in demux.feed(piece) {
            if let Output::Reply(_) = output {
                replies += 1;
            }
        }
    }
    assert!(replies <= 1, "one command produced {replies} replies");

    let mut whole = Demux::new();
    whole.expect_reply(KINDS[usize::from(selector) % KINDS.len()]);
    let whole_replies = whole
        .feed(rest)
        .into_iter()
        .filter(|output| matches!(output, Output::Reply(_)))
        .count();
    assert_eq!(replies, whole_replies);

    demux.reset();
    demux.close();
    assert!(demux.feed(b"200 OK\n").is_empty());
});
