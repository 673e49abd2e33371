// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;
mod events;
mod publisher;
mod sanitize;
mod ws;

pub use cli::{CliPublisher, CollectedResult};
pub use events::ClientEvent;
pub use publisher::EventPublisher;
pub use sanitize::{sanitize_filename_value, sanitize_result_for_ui};
pub use ws::WebSocketPublisher;
