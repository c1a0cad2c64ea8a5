// Copyright 2023 The Arbor Developers
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

//! The full node proper, split by concern: the node core and peak
//! processing, the sync coordinator, and the timelord-facing handlers of
//! the block assembly round-trip.

pub mod node;
pub mod sync;
pub mod timelord;
