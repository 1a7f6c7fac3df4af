// SPDX-FileCopyrightText: 2025 the duck-operator authors
//
// SPDX-License-Identifier: ISC

//! Condition bookkeeping shared by the DuckType and Duck statuses.
//!
//! Each resource declares a fixed set of dependent conditions that roll up
//! into a single `Ready` condition: `Ready` is `True` iff every dependent is
//! `True`; a `False` dependent makes it `False`, otherwise an `Unknown`
//! dependent makes it `Unknown`. The unhappy dependent's reason and message
//! bubble up so `kubectl get` shows the actual blocker.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

pub static CONDITION_READY: &str = "Ready";

pub static CONDITION_TRUE: &str = "True";
pub static CONDITION_FALSE: &str = "False";
pub static CONDITION_UNKNOWN: &str = "Unknown";

static REASON_INITIALIZING: &str = "Initializing";

/// A happy condition plus the dependent conditions rolled up into it.
#[derive(Debug, Clone, Copy)]
pub struct ConditionSet {
    happy_reason: &'static str,
    dependents: &'static [&'static str],
}

impl ConditionSet {
    pub const fn new(happy_reason: &'static str, dependents: &'static [&'static str]) -> Self {
        ConditionSet { happy_reason, dependents }
    }

    pub fn manage<'a>(&self, conditions: &'a mut Vec<Condition>, generation: i64) -> ConditionManager<'a> {
        ConditionManager {
            set: *self,
            conditions,
            generation,
        }
    }
}

/// Mutating view over a resource's conditions for one reconcile pass.
pub struct ConditionManager<'a> {
    set: ConditionSet,
    conditions: &'a mut Vec<Condition>,
    generation: i64,
}

impl ConditionManager<'_> {
    /// Seed every managed condition as `Unknown` without disturbing
    /// conditions that already exist.
    pub fn initialize(&mut self) {
        for type_ in self.set.dependents.iter().copied().chain([CONDITION_READY]) {
            if find(self.conditions, type_).is_none() {
                self.set_condition(type_, CONDITION_UNKNOWN, REASON_INITIALIZING, "");
            }
        }
    }

    pub fn mark_true(&mut self, type_: &str, reason: &str, message: &str) {
        self.set_condition(type_, CONDITION_TRUE, reason, message);
        self.recompute_happy();
    }

    pub fn mark_false(&mut self, type_: &str, reason: &str, message: &str) {
        self.set_condition(type_, CONDITION_FALSE, reason, message);
        self.recompute_happy();
    }

    pub fn mark_unknown(&mut self, type_: &str, reason: &str, message: &str) {
        self.set_condition(type_, CONDITION_UNKNOWN, reason, message);
        self.recompute_happy();
    }

    pub fn get(&self, type_: &str) -> Option<&Condition> {
        find(self.conditions, type_)
    }

    fn set_condition(&mut self, type_: &str, status: &str, reason: &str, message: &str) {
        let transitioned = Time(Utc::now());

        match self.conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = transitioned;
                }
                existing.status = status.to_string();
                existing.reason = reason.to_string();
                existing.message = message.to_string();
                existing.observed_generation = Some(self.generation);
            }
            None => self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: transitioned,
                observed_generation: Some(self.generation),
            }),
        }
    }

    fn recompute_happy(&mut self) {
        let mut unknown: Option<(String, String)> = None;

        for type_ in self.set.dependents.iter().copied() {
            let dependent = find(self.conditions, type_)
                .map(|c| (c.status.clone(), c.reason.clone(), c.message.clone()));
            let Some((status, reason, message)) = dependent else {
                if unknown.is_none() {
                    unknown = Some((REASON_INITIALIZING.to_string(), String::new()));
                }
                continue;
            };
            if status == CONDITION_FALSE {
                self.set_condition(CONDITION_READY, CONDITION_FALSE, &reason, &message);
                return;
            }
            if status != CONDITION_TRUE && unknown.is_none() {
                unknown = Some((reason, message));
            }
        }

        match unknown {
            Some((reason, message)) => {
                self.set_condition(CONDITION_READY, CONDITION_UNKNOWN, &reason, &message)
            }
            None => self.set_condition(CONDITION_READY, CONDITION_TRUE, self.set.happy_reason, ""),
        }
    }
}

fn find<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn get_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    find(conditions, type_)
}

pub fn condition_is_true(condition: Option<&Condition>) -> bool {
    condition.is_some_and(|c| c.status == CONDITION_TRUE)
}

/// Whether the resource's happy rollup is `True`.
pub fn is_ready(conditions: &[Condition]) -> bool {
    condition_is_true(find(conditions, CONDITION_READY))
}
