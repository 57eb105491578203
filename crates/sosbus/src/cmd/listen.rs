use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use sosbus_client::{Client, ConnectionState};

use crate::cmd::ListenArgs;
use crate::exit::{client_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_message, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let client = Client::new(args.server.client_config());

    // Printing happens on this thread; the callback only forwards.
    let (tx, rx) = mpsc::channel();
    client.register_trigger(args.filter.pattern(), move |message| {
        tx.send(message.clone())?;
        Ok(())
    });

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    client
        .connect()
        .map_err(|err| client_error("connect failed", err))?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(message) => {
                print_message(&message, format);
                printed = printed.saturating_add(1);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if client.state() == ConnectionState::Disconnected {
                    return Err(CliError::new(FAILURE, "connection to broker lost"));
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    client.disconnect();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
