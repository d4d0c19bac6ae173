// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::Error;

/// Where an [`AsyncStateController`](crate::AsyncStateController) is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Nothing has been requested yet.
    Idle,
    /// An invocation is running.
    Pending,
    /// The latest invocation produced a value.
    SettledValue,
    /// The latest invocation failed.
    SettledError,
    /// The controller has been disposed. This phase is terminal.
    Disposed,
}

/// The observable state of a controller at one point in time.
#[derive(Clone, Debug)]
pub struct StateSnapshot<V> {
    pub(crate) phase: Phase,
    pub(crate) result: Option<V>,
    pub(crate) error: Option<Error>,
    pub(crate) generation: u64,
}

impl<V> StateSnapshot<V> {
    pub(crate) fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            result: None,
            error: None,
            generation: 0,
        }
    }

    /// Returns the lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the latest value, if the controller has one.
    #[must_use]
    pub fn result(&self) -> Option<&V> {
        self.result.as_ref()
    }

    /// Returns the latest error, if the last invocation failed.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Returns `true` while an invocation is running.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.phase == Phase::Pending
    }

    /// Returns the generation that produced this state.
    ///
    /// The generation grows by one for every started invocation and on disposal.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
