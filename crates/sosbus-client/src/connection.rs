//! One live broker connection and its receiver thread.

use std::cell::Cell;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use sosbus_frame::{FrameConfig, FrameError, FrameReader, FrameWriter};
use sosbus_transport::{connect_with_retries, BusStream, Endpoint, TransportError};
use tracing::{debug, info, warn};

use crate::client::ClientConfig;
use crate::error::{ClientError, Result};
use crate::registry::TriggerRegistry;
use crate::waiter::SyncWaiter;

const RECEIVER_THREAD_NAME: &str = "sosbus-recv";

thread_local! {
    static ON_RECEIVER_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// True when called from a receiver thread, i.e. from inside a trigger callback.
pub(crate) fn on_receiver_thread() -> bool {
    ON_RECEIVER_THREAD.with(Cell::get)
}

/// Terminal state shared between a connection and its receiver thread.
#[derive(Debug, Default)]
pub(crate) struct LinkStatus {
    closing: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl LinkStatus {
    pub(crate) fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn fail(&self, reason: String) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

pub(crate) type SharedWriter = Arc<Mutex<FrameWriter<BusStream>>>;

/// An established connection: the write half, a handle used to shut the
/// socket down, and the receiver thread reading the other half.
pub(crate) struct Connection {
    endpoint: Endpoint,
    control: BusStream,
    writer: SharedWriter,
    link: Arc<LinkStatus>,
    receiver: Option<JoinHandle<()>>,
    receiver_id: Option<ThreadId>,
}

/// Signalled by the receiver thread once it is reading.
pub(crate) struct Ready {
    rx: mpsc::Receiver<()>,
}

impl Connection {
    /// Dial the broker and split the stream. The returned reader is handed
    /// to [`Connection::start`]; until then nothing is received.
    pub(crate) fn dial(config: &ClientConfig) -> Result<(Self, FrameReader<BusStream>)> {
        let endpoint = config.endpoint();
        let stream = connect_with_retries(&endpoint, config.retries, config.retry_delay)?;
        stream.set_nodelay(config.nodelay)?;

        let frame_config = FrameConfig {
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        };
        let reader = FrameReader::with_config_stream(stream.try_clone()?, frame_config.clone())?;
        let control = stream.try_clone()?;
        let writer = FrameWriter::with_config_stream(stream, frame_config)?;

        let connection = Self {
            endpoint,
            control,
            writer: Arc::new(Mutex::new(writer)),
            link: Arc::new(LinkStatus::default()),
            receiver: None,
            receiver_id: None,
        };
        Ok((connection, reader))
    }

    /// Spawn the receiver thread over `reader`.
    ///
    /// The connection is usable for posting before this is called, so a
    /// callback answering the very first message finds it in place.
    pub(crate) fn start(
        &mut self,
        reader: FrameReader<BusStream>,
        registry: Arc<TriggerRegistry>,
        waiter: Arc<SyncWaiter>,
    ) -> Result<Ready> {
        let generation = waiter.open();
        let (ready_tx, ready_rx) = mpsc::channel();

        let spawned = {
            let link = Arc::clone(&self.link);
            let waiter = Arc::clone(&waiter);
            let endpoint = self.endpoint.clone();
            thread::Builder::new()
                .name(RECEIVER_THREAD_NAME.to_owned())
                .spawn(move || {
                    let reason = receive_loop(reader, &registry, &waiter, ready_tx);
                    let reason = if link.is_closing() {
                        info!(addr = %endpoint, "connection closed");
                        "connection closed by client".to_owned()
                    } else {
                        warn!(addr = %endpoint, error = %reason, "receiver loop terminated");
                        reason.to_string()
                    };
                    link.fail(reason.clone());
                    waiter.close(generation, reason);
                })
        };

        match spawned {
            Ok(handle) => {
                self.receiver_id = Some(handle.thread().id());
                self.receiver = Some(handle);
                Ok(Ready { rx: ready_rx })
            }
            Err(err) => {
                let reason = "receiver thread could not be started";
                waiter.close(generation, reason);
                self.link.fail(reason.to_owned());
                let _ = self.control.shutdown();
                Err(TransportError::Io(err).into())
            }
        }
    }

    /// Block until the receiver thread confirms that it is reading.
    pub(crate) fn await_ready(ready: Ready, link: &LinkStatus) -> Result<()> {
        if ready.rx.recv().is_err() {
            return Err(ClientError::disconnected(
                link.failure()
                    .unwrap_or_else(|| "receiver thread exited during startup".to_owned()),
            ));
        }
        Ok(())
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn writer(&self) -> SharedWriter {
        Arc::clone(&self.writer)
    }

    pub(crate) fn link(&self) -> Arc<LinkStatus> {
        Arc::clone(&self.link)
    }

    /// Why the receiver loop ended, or `None` while it is still running.
    pub(crate) fn failure(&self) -> Option<String> {
        self.link.failure()
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.failure().is_none()
    }

    pub(crate) fn is_receiver_thread(&self) -> bool {
        self.receiver_id == Some(thread::current().id())
    }

    /// Shut the socket down and join the receiver thread.
    ///
    /// Called from the receiver thread itself (inside a trigger callback) the
    /// join is skipped; the loop ends once the callback returns.
    pub(crate) fn close(mut self) {
        self.link.closing.store(true, Ordering::Release);
        if let Err(err) = self.control.shutdown() {
            debug!(addr = %self.endpoint, error = %err, "socket shutdown failed");
        }

        let Some(receiver) = self.receiver.take() else {
            return;
        };
        if self.is_receiver_thread() {
            debug!("close requested from the receiver thread; not joining");
            return;
        }
        if receiver.join().is_err() {
            warn!(addr = %self.endpoint, "receiver thread panicked");
        }
    }
}

/// Read and dispatch messages until the stream fails. Returns the error that
/// ended the loop.
fn receive_loop(
    mut reader: FrameReader<BusStream>,
    registry: &TriggerRegistry,
    waiter: &SyncWaiter,
    ready: mpsc::Sender<()>,
) -> FrameError {
    ON_RECEIVER_THREAD.with(|flag| flag.set(true));
    if ready.send(()).is_err() {
        return FrameError::ConnectionReset;
    }
    drop(ready);
    debug!("receiver loop started");

    let polling = reader.config().read_timeout.is_some();
    loop {
        match reader.read_message() {
            Ok(message) => {
                let report = registry.dispatch(&message);
                let kept = waiter.offer(&message);
                debug!(
                    did = message.dest_module(),
                    sid = message.src_module(),
                    daddr = message.dest_addr(),
                    saddr = message.src_addr(),
                    msg_type = message.msg_type(),
                    len = message.payload().len(),
                    triggers = report.matched,
                    failed = report.failed,
                    waiter = kept,
                    "message received"
                );
            }
            Err(FrameError::Io(err))
                if polling && matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                continue;
            }
            Err(err) => return err,
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.receiver.is_some() {
            self.link.closing.store(true, Ordering::Release);
            let _ = self.control.shutdown();
        }
    }
}

/// Shut the socket under a torn writer down so the receiver loop ends and
/// the connection reports itself dead.
pub(crate) fn abandon_torn(writer: &FrameWriter<BusStream>) {
    if let Err(err) = writer.get_ref().shutdown() {
        debug!(error = %err, "socket shutdown after torn write failed");
    }
}
