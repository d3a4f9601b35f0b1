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

//! Shared data contracts for the tracejudge evaluation engine.
//!
//! This crate holds the types that cross crate boundaries: the immutable
//! [`TestCase`] bundle that metrics evaluate, the [`TestCaseField`] enum used
//! for required-parameter declarations, and the [`EvaluationRecord`] row
//! forwarded to a persistence sink.

mod record;
mod test_case;

pub use record::EvaluationRecord;
pub use test_case::{TestCase, TestCaseField};
