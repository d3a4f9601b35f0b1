// Copyright 2025 Tracejudge Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Explicit executor selection for the blocking measurement path.
//!
//! Blocking callers drive `a_measure` to completion through an
//! [`ExecutorHandle`] they obtained up front, instead of discovering a
//! runtime ambiently at call time. This makes the no-runtime fallback an
//! ordinary, testable branch rather than a recovery path.

use std::future::Future;

use tokio::runtime::Handle;

/// Where a blocking `measure` call runs its underlying future.
#[derive(Debug, Clone)]
pub enum ExecutorHandle {
    /// Block on an existing tokio runtime. Must not be used from within
    /// that runtime's own worker threads.
    Tokio(Handle),
    /// Drive the future on the calling thread with a local executor. Used
    /// when no runtime exists, or when the runtime is shutting down and can
    /// no longer accept work.
    Local,
}

impl ExecutorHandle {
    /// Handle for the current environment: the ambient tokio runtime when
    /// one is running, otherwise the local executor.
    pub fn current() -> Self {
        match Handle::try_current() {
            Ok(handle) => ExecutorHandle::Tokio(handle),
            Err(_) => ExecutorHandle::Local,
        }
    }

    /// Handle matching a metric's `async_mode` setting: runtime-backed when
    /// set, local otherwise.
    pub fn for_mode(async_mode: bool) -> Self {
        if async_mode {
            ExecutorHandle::current()
        } else {
            ExecutorHandle::Local
        }
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        match self {
            ExecutorHandle::Tokio(handle) => handle.block_on(future),
            ExecutorHandle::Local => futures::executor::block_on(future),
        }
    }
}
