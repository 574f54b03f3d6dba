// UART Echo - Store-and-Forward Relay
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{spawn_echo_task, SystemHandle};
use crate::{
    EchoConfig, EchoResult, FileStore, MountOptions, SerialPort, Storage, UartConfig, UartResult,
};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use uart_echo_config::EchoManifest;

/// Loads the manifest at `path`, or the stock configuration if none is given.
pub fn load_manifest(path: Option<&Path>) -> anyhow::Result<EchoManifest> {
    let manifest = if let Some(path) = path {
        info!("Loading echo manifest: {:?}", path);
        EchoManifest::from_file(path)?
    } else {
        info!("Using default echo configuration");
        EchoManifest::default()
    };

    Ok(manifest)
}

/// Mount the flash filesystem, install the UART and start the echo task.
///
/// Any failure here is a boot failure and the caller is expected to abort.
pub fn boot<U, F>(manifest: &EchoManifest, install_uart: F) -> EchoResult<SystemHandle>
where
    U: SerialPort + 'static,
    F: FnOnce(UartConfig) -> UartResult<U>,
{
    let storage = FileStore::mount(MountOptions::from(&manifest.storage))?;
    info!("Filesystem mounted at {:?}", storage.base_path());
    boot_with_storage(manifest, install_uart, storage)
}

/// Same as [`boot`] with an already mounted storage backend.
pub fn boot_with_storage<U, S, F>(
    manifest: &EchoManifest,
    install_uart: F,
    storage: S,
) -> EchoResult<SystemHandle>
where
    U: SerialPort + 'static,
    S: Storage + 'static,
    F: FnOnce(UartConfig) -> UartResult<U>,
{
    let uart_config = UartConfig::from_manifest(manifest)?;
    uart_config.validate()?;
    let echo_config = EchoConfig::from_manifest(manifest)?;
    echo_config.validate()?;

    let port = uart_config.port;
    let framing = uart_config.framing();
    let uart = install_uart(uart_config)?;
    info!("UART{} ready at {}", port, framing);

    let handle = spawn_echo_task(
        uart,
        storage,
        echo_config,
        Duration::from_millis(manifest.supervisor.housekeeping_interval_ms),
    )?;
    info!("System initialisation done, entering main loop");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::SimUart;
    use crate::{EchoError, MemStore, StorageError, UartError};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_load_default_manifest() {
        let manifest = load_manifest(None).unwrap();
        assert_eq!(manifest, EchoManifest::default());
    }

    #[test]
    fn test_boot_rejects_invalid_uart() {
        let mut manifest = EchoManifest::default();
        manifest.uart.baud_rate = 0;
        let err = boot_with_storage(&manifest, SimUart::install, MemStore::new()).unwrap_err();
        assert!(matches!(err, EchoError::Uart(UartError::InvalidConfig(_))));
    }

    #[test]
    fn test_boot_fails_when_mount_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("spiffs");
        std::fs::write(&base, b"not a dir").unwrap();

        let mut manifest = EchoManifest::default();
        manifest.storage.base_path = base;
        manifest.storage.format_if_mount_failed = false;
        let err = boot(&manifest, SimUart::install).unwrap_err();
        assert!(matches!(err, EchoError::Storage(StorageError::Mount { .. })));
    }

    #[test]
    fn test_booted_task_echoes_and_exits_on_hangup() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manifest = EchoManifest::default();
        manifest.storage.base_path = tmp.path().join("spiffs");
        manifest.supervisor.housekeeping_interval_ms = 5;

        let sink = Arc::new(Mutex::new(Vec::new()));
        let rx_slot = Arc::new(Mutex::new(None));
        let handle = {
            let sink = sink.clone();
            let rx_slot = rx_slot.clone();
            boot(&manifest, move |cfg| {
                let mut uart = SimUart::install(cfg)?;
                uart.set_sink(Some(sink), false);
                *rx_slot.lock().unwrap() = Some(uart.rx_handle());
                Ok(uart)
            })
            .unwrap()
        };

        let rx = rx_slot.lock().unwrap().take().unwrap();
        rx.inject(b"hello");
        rx.close();
        handle.supervise().unwrap();

        assert_eq!(*sink.lock().unwrap(), b"hello".to_vec());
        assert_eq!(
            std::fs::read(tmp.path().join("spiffs/uart_data.txt")).unwrap(),
            b"hello".to_vec()
        );
    }
}
