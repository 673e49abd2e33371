// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod approval;
mod args;
mod executor;

pub use approval::{ApprovalPolicy, ElicitationBroker, ElicitationResponse};
pub use args::{
    filter_args_to_schema, inject_context_into_args, parse_raw_arguments, sanitize_args_for_ui,
    schema_properties, tool_accepts_username, ArgInjectionContext,
};
pub use executor::{ToolExecutor, ToolSessionContext};
