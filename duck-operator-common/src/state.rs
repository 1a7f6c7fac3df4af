// SPDX-FileCopyrightText: 2025 the duck-operator authors
//
// SPDX-License-Identifier: ISC

use crate::config::AppConfig;

#[derive(Clone, Default, Debug)]
pub struct State {
    pub config: AppConfig,
}
