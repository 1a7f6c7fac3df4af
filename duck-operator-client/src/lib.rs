// SPDX-FileCopyrightText: 2025 the duck-operator authors
//
// SPDX-License-Identifier: ISC

//! Consumer-facing library for duck types: a polymorphic client that reads
//! across the member kinds of a DuckType, and a per-DuckType broker fanning
//! member events out to subscribers.

#[allow(unused_extern_crates)]
extern crate self as duck_operator_client;

pub mod broker;
pub mod client;
pub mod convert;
pub mod error;
pub mod track;

pub use broker::Broker;
pub use client::DuckClient;
pub use error::{DuckClientError, Result};
