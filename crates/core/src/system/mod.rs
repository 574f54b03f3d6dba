// UART Echo - Store-and-Forward Relay
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod builder;

pub use builder::{boot, boot_with_storage, load_manifest};

use crate::metrics::RelayMetrics;
use crate::{EchoConfig, EchoError, EchoLoop, EchoResult, SerialPort, Storage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

pub const TASK_NAME: &str = "uart_echo_task";

/// A booted system: the echo task thread plus the supervisor's view of it.
#[derive(Debug)]
pub struct SystemHandle {
    stop: Arc<AtomicBool>,
    metrics: Arc<RelayMetrics>,
    task: JoinHandle<EchoResult<()>>,
    done: Receiver<()>,
    housekeeping: Duration,
}

/// Move the echo loop onto its own named thread.
pub fn spawn_echo_task<U, S>(
    uart: U,
    storage: S,
    config: EchoConfig,
    housekeeping: Duration,
) -> EchoResult<SystemHandle>
where
    U: SerialPort + 'static,
    S: Storage + 'static,
{
    let metrics = Arc::new(RelayMetrics::new());
    let stack_size = config.task_stack_size;
    let mut echo = EchoLoop::with_metrics(uart, storage, config, Arc::clone(&metrics))?;

    let stop = Arc::new(AtomicBool::new(false));
    let task_stop = Arc::clone(&stop);
    let (done_tx, done) = mpsc::channel();

    let task = thread::Builder::new()
        .name(TASK_NAME.to_string())
        .stack_size(stack_size)
        .spawn(move || {
            let result = echo.run(&task_stop);
            let _ = done_tx.send(());
            result
        })
        .map_err(EchoError::TaskSpawn)?;

    Ok(SystemHandle {
        stop,
        metrics,
        task,
        done,
        housekeeping,
    })
}

impl SystemHandle {
    /// Ask the echo task to exit after its current receive window.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Sleep in housekeeping intervals until the echo task ends, then return
    /// its result.
    pub fn supervise(self) -> EchoResult<()> {
        loop {
            match self.done.recv_timeout(self.housekeeping) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    debug!("Housekeeping: {:?}", self.metrics.summary());
                }
            }
        }
        self.join()
    }

    /// Stop the task and wait for it.
    pub fn shutdown(self) -> EchoResult<()> {
        self.stop();
        self.join()
    }

    fn join(self) -> EchoResult<()> {
        self.task.join().map_err(|_| EchoError::TaskPanicked)?
    }
}
