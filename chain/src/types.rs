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

//! Base types that the block chain pipeline requires.

use crate::error::ErrorKind;

/// Outcome of handing one sub-block to the blockchain.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ReceiveBlockResult {
	/// The block extended the heaviest chain and is the new peak.
	NewPeak,
	/// The block was valid and stored but did not beat the current peak.
	AddedAsOrphan,
	/// The block was processed before; no side effects fired.
	AlreadyHaveBlock,
	/// The block failed validation; the sender should be penalized.
	InvalidBlock,
	/// The block's parent is unknown; the caller decides whether to fetch it.
	DisconnectedBlock,
}

/// Result of the chain-independent validation pass over one block.
/// Parallelizable and free of any chain state.
#[derive(Clone, Debug)]
pub struct PreValidationResult {
	/// Why the block failed, if it did.
	pub error: Option<ErrorKind>,
	/// Iterations the proof-of-space quality requires, on success.
	pub required_iters: Option<u64>,
}

impl PreValidationResult {
	/// A passing result.
	pub fn pass(required_iters: u64) -> PreValidationResult {
		PreValidationResult {
			error: None,
			required_iters: Some(required_iters),
		}
	}

	/// A failing result.
	pub fn fail(kind: ErrorKind) -> PreValidationResult {
		PreValidationResult {
			error: Some(kind),
			required_iters: None,
		}
	}
}
