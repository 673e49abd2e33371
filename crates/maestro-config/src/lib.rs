// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod env;
mod loader;
mod schema;

pub use env::{expand_env, expand_env_optional, EnvExpandError};
pub use loader::{load, CONFIG_ENV_VAR};
pub use schema::*;
