// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Startup failures.
//!
//! Once the system is running nothing fails in a way that crosses a task
//! boundary; exhaustion and full queues are handled where they happen. The
//! only typed error is the one `System::new` returns, after which the board
//! is expected to halt.

use core::fmt;

use crate::task::TaskId;

/// Why the system could not be brought up.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InitError {
    /// The roster lists this task more than once.
    DuplicateTask(TaskId),
    /// A timing setting would make a periodic loop spin. Carries the name of
    /// the setting or timer.
    ZeroPeriod(&'static str),
}

impl InitError {
    /// Name of the thing that could not be created, as printed in the
    /// `creation failed!` line.
    pub fn subject(&self) -> &'static str {
        match self {
            InitError::DuplicateTask(id) => id.name(),
            InitError::ZeroPeriod(name) => name,
        }
    }
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::DuplicateTask(id) => write!(f, "{id} is listed twice in the roster"),
            InitError::ZeroPeriod(name) => write!(f, "{name} has a zero period"),
        }
    }
}
