// SPDX-FileCopyrightText: 2025 the duck-operator authors
//
// SPDX-License-Identifier: ISC

#[allow(unused_extern_crates)]
extern crate self as duck_operator_webhook;

pub mod admission;
pub mod router;
pub mod server;
