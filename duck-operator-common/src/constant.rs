// SPDX-FileCopyrightText: 2025 the duck-operator authors
//
// SPDX-License-Identifier: ISC

pub static APP_NAME: &str = "duck-operator";
pub static ENV_PREFIX: &str = "DUCK_OPERATOR";

/// API group served by the operator's own resources.
pub static GROUP: &str = "duck.reconciler.io";
pub static VERSION: &str = "v1";

/// Finalizer asserted on both DuckType and Duck resources.
pub static FINALIZER: &str = "duck.reconciler.io/reconciler";

/// Label keys tying concrete roles to the aggregate roles of a duck type.
pub static TYPE_LABEL: &str = "ducks.reconciler.io/type";
pub static ROLE_LABEL: &str = "ducks.reconciler.io/role";
