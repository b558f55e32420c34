#![no_main]

use std::sync::mpsc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use mobdebug::lua::{self, ParseOptions};

mod utils;

const TIMEOUT: Duration = Duration::from_secs(2);

struct Runner {
    input_tx: mpsc::SyncSender<String>,
    output_rx: Mutex<mpsc::Receiver<()>>,
}

fn runner() -> &'static Runner {
    static RUNNER: OnceLock<Runner> = OnceLock::new();
    RUNNER.get_or_init(|| {
        let (input_tx, input_rx) = mpsc::sync_channel::<String>(0);
        let (output_tx, output_rx) = mpsc::sync_channel::<()>(0);

        std::thread::spawn(move || {
            let placeholder = ParseOptions {
                nil_placeholder: Some("nil".to_owned()),
            };
            for input in input_rx {
                // Malformed input must produce an error, never a panic or a hang.
                if let Ok(value) = lua::parse(&input) {
                    let _ = value.render();
                }
                let _ = lua::parse_with_options(&format!("return {{{input}}}"), &placeholder);
                let _ = output_tx.send(());
            }
        });

        Runner {
            input_tx,
            output_rx: Mutex::new(output_rx),
        }
    })
}

fuzz_target!(|data: &[u8]| {
    let Some(text) = utils::capped_utf8(data) else {
        return;
    };

    let runner = runner();
    runner
        .input_tx
        .send(text.to_owned())
        .expect("lua parse worker thread exited");

    match runner
        .output_rx
        .lock()
        .expect("lua parse worker receiver poisoned")
        .recv_timeout(TIMEOUT)
    {
        Ok(()) => {}
        Err(mpsc::RecvTimeoutError::Timeout) => panic!("lua parse fuzz target timed out"),
        Err(mpsc::RecvTimeoutError::Disconnected) => panic!("lua parse worker thread panicked"),
    }
});
