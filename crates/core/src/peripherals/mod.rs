// UART Echo - Store-and-Forward Relay
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod stream;
pub mod uart;

pub use stream::StreamUart;
pub use uart::{SimRxHandle, SimUart};
