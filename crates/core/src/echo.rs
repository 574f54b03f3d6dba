// UART Echo - Store-and-Forward Relay
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The echo task: receive a chunk, relay it through the backing file, send
//! back what the file holds.

use crate::metrics::RelayMetrics;
use crate::{EchoConfig, EchoError, EchoResult, SerialPort, Storage, StorageError, UartError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uart_echo_config::{RelayMode, StorageErrorPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    /// Waiting in the receive window.
    Idle,
    /// A chunk arrived and has not been sent back yet.
    Received,
    /// The chunk went out on the transmit side.
    Replayed,
}

/// Result of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The receive window closed without data.
    Idle,
    Echoed { received: usize, transmitted: usize },
    /// A storage failure swallowed the chunk under the `continue` policy.
    Dropped { received: usize },
}

pub struct EchoLoop<U: SerialPort, S: Storage> {
    uart: U,
    storage: S,
    config: EchoConfig,
    rx_buf: Vec<u8>,
    tx_buf: Vec<u8>,
    pending: bool,
    state: RelayState,
    metrics: Arc<RelayMetrics>,
}

impl<U: SerialPort, S: Storage> std::fmt::Debug for EchoLoop<U, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EchoLoop")
            .field("config", &self.config)
            .field("pending", &self.pending)
            .field("state", &self.state)
            .finish()
    }
}

impl<U: SerialPort, S: Storage> EchoLoop<U, S> {
    pub fn new(uart: U, storage: S, config: EchoConfig) -> EchoResult<Self> {
        Self::with_metrics(uart, storage, config, Arc::new(RelayMetrics::new()))
    }

    pub fn with_metrics(
        uart: U,
        storage: S,
        config: EchoConfig,
        metrics: Arc<RelayMetrics>,
    ) -> EchoResult<Self> {
        config.validate()?;
        Ok(Self {
            rx_buf: vec![0; config.buffer_size],
            tx_buf: vec![0; config.buffer_size],
            uart,
            storage,
            config,
            pending: false,
            state: RelayState::Idle,
            metrics,
        })
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// True from the moment a chunk is received until it has been sent back.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &EchoConfig {
        &self.config
    }

    pub fn uart(&self) -> &U {
        &self.uart
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_parts(self) -> (U, S) {
        (self.uart, self.storage)
    }

    /// Run one iteration: clear buffers, wait one receive window, and relay
    /// whatever arrived.
    pub fn poll_once(&mut self) -> EchoResult<Outcome> {
        self.metrics.on_iteration();
        self.rx_buf.fill(0);
        self.tx_buf.fill(0);
        self.state = RelayState::Idle;

        let max_chunk = self.config.max_chunk();
        let received = self
            .uart
            .read_bytes(&mut self.rx_buf[..max_chunk], self.config.rx_timeout_ticks)?;
        if received == 0 {
            self.metrics.on_idle();
            return Ok(Outcome::Idle);
        }
        if received > max_chunk {
            return Err(UartError::Overrun {
                reported: received,
                window: max_chunk,
            }
            .into());
        }

        self.rx_buf[received] = 0;
        self.pending = true;
        self.state = RelayState::Received;
        self.metrics.on_received(received);
        debug!("Received {} bytes", received);

        let outcome = match self.config.mode {
            RelayMode::StoreAndForward => self.store_and_forward(received),
            RelayMode::Direct => self.forward_direct(received),
        };
        self.pending = false;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.state = RelayState::Idle;
                return Err(e);
            }
        };

        match outcome {
            Outcome::Echoed {
                received,
                transmitted,
            } => {
                self.state = RelayState::Replayed;
                self.metrics.on_echoed(transmitted);
                Ok(Outcome::Echoed {
                    received,
                    transmitted,
                })
            }
            other => {
                self.state = RelayState::Idle;
                Ok(other)
            }
        }
    }

    fn store_and_forward(&mut self, received: usize) -> EchoResult<Outcome> {
        let relay = self.config.relay_file.as_path();
        if let Err(e) = self.storage.write(relay, &self.rx_buf[..received]) {
            return self.storage_failure(received, e);
        }

        let recovered = match self.storage.read(relay, &mut self.tx_buf) {
            Ok(n) => n,
            Err(e) => return self.storage_failure(received, e),
        };
        if recovered != received {
            warn!(
                "Relay file returned {} bytes for a {} byte chunk",
                recovered, received
            );
        }

        let transmitted = self.uart.write_bytes(&self.tx_buf[..recovered])?;
        Ok(Outcome::Echoed {
            received,
            transmitted,
        })
    }

    fn forward_direct(&mut self, received: usize) -> EchoResult<Outcome> {
        let transmitted = self.uart.write_bytes(&self.rx_buf[..received])?;
        if let Err(e) = self
            .storage
            .write(&self.config.relay_file, &self.rx_buf[..received])
        {
            self.metrics.on_storage_failure();
            match self.config.on_storage_error {
                StorageErrorPolicy::Continue => warn!("Relay file not updated: {}", e),
                StorageErrorPolicy::Abort => return Err(e.into()),
            }
        }
        Ok(Outcome::Echoed {
            received,
            transmitted,
        })
    }

    fn storage_failure(&mut self, received: usize, err: StorageError) -> EchoResult<Outcome> {
        self.metrics.on_storage_failure();
        match self.config.on_storage_error {
            StorageErrorPolicy::Continue => {
                warn!("Dropping {} received bytes: {}", received, err);
                self.metrics.on_dropped();
                Ok(Outcome::Dropped { received })
            }
            StorageErrorPolicy::Abort => Err(err.into()),
        }
    }

    /// Poll until `stop` is raised or the UART peer disconnects.
    pub fn run(&mut self, stop: &AtomicBool) -> EchoResult<()> {
        while !stop.load(Ordering::SeqCst) {
            match self.poll_once() {
                Ok(_) => {}
                Err(EchoError::Uart(UartError::Disconnected)) => {
                    info!("UART peer disconnected, echo task exiting");
                    return Ok(());
                }
                Err(e) => {
                    error!("Echo task stopped: {}", e);
                    return Err(e);
                }
            }
        }
        debug!("Echo task stop requested");
        Ok(())
    }

    /// Run at most `iterations` polls and report each outcome.
    pub fn run_for(&mut self, iterations: usize) -> EchoResult<Vec<Outcome>> {
        let mut outcomes = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            outcomes.push(self.poll_once()?);
        }
        Ok(outcomes)
    }
}
