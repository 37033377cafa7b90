// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Enrollment operation internals.
//!
//! The public API is exposed through [`EnrollmentClient`](crate::EnrollmentClient).

pub mod enroll;
pub mod response;

pub use enroll::{EnrollmentPoller, EnrollmentSession, RequestSource};
pub use response::{parse_retry_after, Decoded, ResponseDecoder};
