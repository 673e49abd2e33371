// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "maestro",
    about = "Chat orchestration runtime: plain / RAG / tools / agent modes with streaming events"
)]
pub struct Cli {
    /// Explicit config file (merged over the discovered layers)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Send a single prompt through the pipeline and print the answer
    Ask {
        /// The user message
        prompt: String,

        /// Model override (defaults to the configured model)
        #[arg(long)]
        model: Option<String>,

        /// User email for authorization and file scoping
        #[arg(long)]
        user: Option<String>,

        /// Fully qualified tools to offer the model (server_tool)
        #[arg(long = "tool")]
        tools: Vec<String>,

        /// Qualified RAG sources to ground on (server:source)
        #[arg(long = "data-source")]
        data_sources: Vec<String>,

        /// Run the multi-step agent loop instead of single-shot modes
        #[arg(long)]
        agent: bool,

        /// Agent loop strategy: react | think-act | act
        #[arg(long)]
        strategy: Option<String>,

        /// Buffer all events and print a JSON result instead of streaming
        #[arg(long)]
        collect: bool,
    },

    /// Run the WebSocket gateway
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:8010")]
        addr: std::net::SocketAddr,
    },

    /// Print the merged configuration
    ShowConfig,
}
