// UART Echo - Store-and-Forward Relay
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{EchoError, EchoResult, UartError, UartResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uart_echo_config::{
    EchoManifest, FlowControl, Parity, RelayMode, StorageErrorPolicy, MAX_BUFFER_SIZE,
};

/// Line settings handed to a UART backend when it is installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UartConfig {
    pub port: u8,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub flow_control: FlowControl,
    pub tx_pin: u8,
    pub rx_pin: u8,
    pub rts_pin: Option<u8>,
    pub cts_pin: Option<u8>,
    /// Driver-side receive ring, in bytes.
    pub rx_buffer_size: usize,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            port: 0,
            baud_rate: 115_200,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            flow_control: FlowControl::Disabled,
            tx_pin: 4,
            rx_pin: 5,
            rts_pin: None,
            cts_pin: None,
            rx_buffer_size: 4096,
        }
    }
}

impl UartConfig {
    pub fn from_manifest(manifest: &EchoManifest) -> EchoResult<Self> {
        let uart = &manifest.uart;
        let rx_buffer_size = manifest
            .driver_rx_buffer()
            .map_err(|e| EchoError::Config(format!("{:#}", e)))?;
        Ok(Self {
            port: uart.port,
            baud_rate: uart.baud_rate,
            data_bits: uart.data_bits,
            parity: uart.parity,
            stop_bits: uart.stop_bits,
            flow_control: uart.flow_control,
            tx_pin: uart.tx_pin,
            rx_pin: uart.rx_pin,
            rts_pin: uart.rts_pin,
            cts_pin: uart.cts_pin,
            rx_buffer_size,
        })
    }

    pub fn validate(&self) -> UartResult<()> {
        if self.baud_rate == 0 {
            return Err(UartError::InvalidConfig("baud rate is zero".into()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(UartError::InvalidConfig(format!(
                "{} data bits not supported",
                self.data_bits
            )));
        }
        if self.stop_bits != 1 && self.stop_bits != 2 {
            return Err(UartError::InvalidConfig(format!(
                "{} stop bits not supported",
                self.stop_bits
            )));
        }
        if self.tx_pin == self.rx_pin {
            return Err(UartError::InvalidConfig(format!(
                "TX and RX both assigned to pin {}",
                self.tx_pin
            )));
        }
        if self.flow_control == FlowControl::Hardware
            && (self.rts_pin.is_none() || self.cts_pin.is_none())
        {
            return Err(UartError::InvalidConfig(
                "hardware flow control needs both RTS and CTS pins".into(),
            ));
        }
        if self.rx_buffer_size == 0 {
            return Err(UartError::InvalidConfig("driver RX buffer is empty".into()));
        }
        Ok(())
    }

    /// Short form such as `115200 8N1`.
    pub fn framing(&self) -> String {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        };
        format!(
            "{} {}{}{}",
            self.baud_rate, self.data_bits, parity, self.stop_bits
        )
    }
}

/// Settings of the echo task itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoConfig {
    /// Size of both the receive and transmit buffers. One byte is reserved
    /// for the sentinel, so at most `buffer_size - 1` bytes move per chunk.
    pub buffer_size: usize,
    pub rx_timeout_ticks: u32,
    pub tick: Duration,
    /// Relay file path relative to the storage mount point.
    pub relay_file: PathBuf,
    pub mode: RelayMode,
    pub on_storage_error: StorageErrorPolicy,
    pub task_stack_size: usize,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            buffer_size: 2048,
            rx_timeout_ticks: 20,
            tick: Duration::from_millis(1),
            relay_file: PathBuf::from("uart_data.txt"),
            mode: RelayMode::StoreAndForward,
            on_storage_error: StorageErrorPolicy::Continue,
            task_stack_size: 64 * 1024,
        }
    }
}

impl EchoConfig {
    pub fn from_manifest(manifest: &EchoManifest) -> EchoResult<Self> {
        let to_config_error = |e: anyhow::Error| EchoError::Config(format!("{:#}", e));
        Ok(Self {
            buffer_size: manifest.buffer_size().map_err(to_config_error)?,
            rx_timeout_ticks: manifest.echo.rx_timeout_ticks,
            tick: Duration::from_millis(manifest.echo.tick_ms),
            relay_file: PathBuf::from(&manifest.storage.relay_file),
            mode: manifest.echo.mode,
            on_storage_error: manifest.echo.on_storage_error,
            task_stack_size: manifest.task_stack_size().map_err(to_config_error)?,
        })
    }

    pub fn validate(&self) -> EchoResult<()> {
        if self.buffer_size < 2 {
            return Err(EchoError::Config(format!(
                "buffer size {} leaves no room for data and sentinel",
                self.buffer_size
            )));
        }
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(EchoError::Config(format!(
                "buffer size {} exceeds the {} byte limit",
                self.buffer_size, MAX_BUFFER_SIZE
            )));
        }
        if self.relay_file.as_os_str().is_empty() {
            return Err(EchoError::Config("relay file path is empty".into()));
        }
        Ok(())
    }

    /// Largest chunk a single receive call may return.
    pub fn max_chunk(&self) -> usize {
        self.buffer_size.saturating_sub(1)
    }

    /// Wall-clock length of the receive window.
    pub fn rx_timeout(&self) -> Duration {
        self.tick * self.rx_timeout_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_manifest_maps_to_defaults() {
        let manifest = EchoManifest::default();
        assert_eq!(UartConfig::from_manifest(&manifest).unwrap(), UartConfig::default());
        assert_eq!(EchoConfig::from_manifest(&manifest).unwrap(), EchoConfig::default());
    }

    #[test]
    fn test_framing_string() {
        let cfg = UartConfig::default();
        assert_eq!(cfg.framing(), "115200 8N1");
    }

    #[test]
    fn test_hardware_flow_control_needs_pins() {
        let mut cfg = UartConfig {
            flow_control: FlowControl::Hardware,
            ..UartConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(UartError::InvalidConfig(_))));
        cfg.rts_pin = Some(18);
        cfg.cts_pin = Some(19);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_rx_timeout_and_chunk() {
        let cfg = EchoConfig::default();
        assert_eq!(cfg.rx_timeout(), Duration::from_millis(20));
        assert_eq!(cfg.max_chunk(), 2047);

        let tiny = EchoConfig {
            buffer_size: 1,
            ..EchoConfig::default()
        };
        assert!(tiny.validate().is_err());

        let huge = EchoConfig {
            buffer_size: MAX_BUFFER_SIZE + 1,
            ..EchoConfig::default()
        };
        assert!(matches!(huge.validate(), Err(EchoError::Config(_))));
    }
}
