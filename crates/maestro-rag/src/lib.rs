// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod http;
mod service;
mod types;

pub use http::HttpRagBackend;
pub use service::{McpRagSynthesizer, UnifiedRagService};
pub use types::{DiscoveredSource, RagBackend, RagResponse, RagServerInfo, UiSource};
