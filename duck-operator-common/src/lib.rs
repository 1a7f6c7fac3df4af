// SPDX-FileCopyrightText: 2025 the duck-operator authors
//
// SPDX-License-Identifier: ISC

#[allow(unused_extern_crates)]
extern crate self as duck_operator_common;

pub mod conditions;
pub mod config;
pub mod constant;
pub mod state;
pub mod telemetry;
