//! Shell Channel: one long-lived `shell:` stream per connection, a FIFO
//! command queue serviced by a dedicated writer thread, and quiet-period
//! based output aggregation.
//!
//! The shell stream does not carry an exit code (spec §4.6); callers that
//! need one must embed their own sentinel in the command and scan for it,
//! e.g. `"… && echo __OK__ || echo __FAIL__"`.

use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::connection::Connection;
use crate::error::{Result, RustADBError};
use crate::mux::Stream;

type OutputCallback = Box<dyn FnMut(&[u8]) + Send>;
type CompleteCallback = Box<dyn FnOnce(Result<()>) + Send>;

enum ShellJob {
    Execute {
        command: String,
        on_output: OutputCallback,
        on_complete: CompleteCallback,
    },
}

pub struct ShellChannel {
    job_tx: Sender<ShellJob>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

fn normalize_shell_command(command: &str) -> String {
    if command.ends_with(" \n") || command.ends_with('\n') {
        command.to_string()
    } else {
        format!("{command}\n")
    }
}

impl ShellChannel {
    pub fn new(connection: Arc<Connection>) -> Self {
        let (job_tx, job_rx) = channel::<ShellJob>();
        let config = connection.config().clone();

        let worker = thread::spawn(move || {
            let mut stream: Option<Arc<Stream>> = None;

            for job in job_rx {
                let ShellJob::Execute {
                    command,
                    mut on_output,
                    on_complete,
                } = job;

                let outcome: Result<()> = (|| {
                    if stream.as_ref().map(|s| s.is_closed()).unwrap_or(true) {
                        stream = Some(connection.open_stream("shell:")?);
                    }
                    let active = stream.as_ref().expect("just opened above");

                    // Drain anything left over from a previous command.
                    while active.pop_inbound(Duration::ZERO)?.is_some() {}

                    let normalized = normalize_shell_command(&command);
                    connection.write_to_stream(
                        active,
                        normalized.as_bytes(),
                        config.stream_open_timeout,
                    )?;

                    let deadline = Instant::now() + config.shell_overall_timeout;
                    let mut seen_any_output = false;

                    loop {
                        if Instant::now() >= deadline {
                            break;
                        }
                        match active.pop_inbound(config.shell_quiet_period)? {
                            Some(chunk) => {
                                seen_any_output = true;
                                on_output(&chunk);
                            }
                            None => {
                                if seen_any_output {
                                    break;
                                }
                                if Instant::now() >= deadline {
                                    break;
                                }
                            }
                        }
                    }

                    Ok(())
                })();

                if let Err(ref e) = outcome {
                    log::warn!("shell command {command:?} failed: {e}");
                }

                // The shell stream does not carry exit status; whether the
                // command actually ran is reported via `outcome`, not a
                // fabricated exit code.
                on_complete(outcome);
            }
        });

        Self {
            job_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueues `command`; `on_output` is invoked for each chunk of output
    /// as it arrives, `on_complete` once after the quiet period/deadline
    /// with whether the command actually ran to completion.
    pub fn execute<F, C>(&self, command: &str, on_output: F, on_complete: C) -> Result<()>
    where
        F: FnMut(&[u8]) + Send + 'static,
        C: FnOnce(Result<()>) + Send + 'static,
    {
        self.job_tx
            .send(ShellJob::Execute {
                command: command.to_string(),
                on_output: Box::new(on_output),
                on_complete: Box::new(on_complete),
            })
            .map_err(|_| RustADBError::ConnectionLost)
    }

    /// Convenience wrapper that blocks the caller until the command
    /// completes, returning the concatenated output. Propagates whatever
    /// error the worker hit opening the stream or writing/reading from it,
    /// rather than returning a successful but truncated buffer.
    pub fn execute_sync(&self, command: &str, timeout: Duration) -> Result<Vec<u8>> {
        let (done_tx, done_rx) = channel::<Result<Vec<u8>>>();
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let buffer_for_output = buffer.clone();

        self.execute(
            command,
            move |chunk| buffer_for_output.lock().unwrap().extend_from_slice(chunk),
            move |outcome| {
                let result = outcome.map(|()| buffer.lock().unwrap().clone());
                let _ = done_tx.send(result);
            },
        )?;

        done_rx.recv_timeout(timeout).map_err(|_| RustADBError::ReadTimeout)?
    }
}

impl Drop for ShellChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().unwrap().take() {
            // Dropping `job_tx` (implicit, field drop order runs after this)
            // ends the worker's receive loop; join afterwards.
            drop(std::mem::replace(&mut self.job_tx, channel().0));
            let _ = handle.join();
        }
    }
}
