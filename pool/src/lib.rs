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

//! The transaction pool: pending spend bundles, fingerprinted for cheap
//! mempool diffs between peers and revalidated on every peak change.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate failure_derive;

pub mod conditions;
mod pool;
pub mod types;

pub use crate::conditions::{check_conditions, ConditionOpcode};
pub use crate::pool::Mempool;
pub use crate::types::{
	BlockChainView, Condition, MempoolItem, Npc, PoolConfig, PoolError, ProgramRunner,
	SpendBundle,
};
