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

//! The blockchain itself: ingests sub-blocks from the network, validates
//! them against consensus rules and maintains the canonical chain, its
//! in-memory record cache, the transient sub-slot store and weight proofs.

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

mod chain;
mod error;
pub mod pipe;
pub mod store;
pub mod sub_slot_store;
pub mod types;
pub mod weight_proof;

pub use crate::chain::Blockchain;
pub use crate::error::{Error, ErrorKind};
pub use crate::store::{BlockStore, CoinStore, MemBlockStore, MemCoinStore};
pub use crate::sub_slot_store::SubSlotStore;
pub use crate::types::{PreValidationResult, ReceiveBlockResult};
pub use crate::weight_proof::{ProofBlockHeader, SubEpochData, WeightProof, WeightProofVerifier};
