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

//! Base types for the transaction pool implementation.

use arbor_core::core::{CoinRecord, Hash, Hashed, SerializedProgram, SubBlockRecord};

/// Pool error definitions.
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum PoolError {
	/// A condition carries an opcode outside the known set.
	#[fail(display = "Invalid Condition: opcode {}", _0)]
	InvalidCondition(u16),
	/// A condition assertion did not hold.
	#[fail(display = "Assertion Failed: {}", _0)]
	AssertionFailed(String),
	/// The bundle spends a coin another pool entry already spends.
	#[fail(display = "Double Spend: {:?}", _0)]
	DoubleSpend(Hash),
	/// The bundle spends a coin we do not know.
	#[fail(display = "Unknown Coin: {:?}", _0)]
	UnknownCoin(Hash),
	/// The bundle spends a coin that is already spent on chain.
	#[fail(display = "Coin Already Spent: {:?}", _0)]
	CoinSpent(Hash),
	/// The bundle is already in the pool.
	#[fail(display = "Already In Pool")]
	AlreadyInPool,
	/// No peak yet, the pool cannot accept anything.
	#[fail(display = "No Peak")]
	NoPeak,
	/// The script VM refused the program.
	#[fail(display = "Program Failure: {}", _0)]
	ProgramFailure(String),
	/// Anything else.
	#[fail(display = "Pool Error: {}", _0)]
	Other(String),
}

/// A pending transaction: an opaque program plus its aggregated signature.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SpendBundle {
	/// The serialized spend program.
	pub program: SerializedProgram,
	/// Aggregated BLS signature over the spends.
	pub aggregated_signature: Vec<u8>,
	/// Declared fee.
	pub fee: u64,
}

impl SpendBundle {
	/// Id of the bundle, the hash of its program and signature.
	pub fn name(&self) -> Hash {
		let mut data = self.program.0.clone();
		data.extend_from_slice(&self.aggregated_signature);
		data.hash()
	}
}

/// One raw condition as reported by the script VM: an opcode and its
/// arguments. Interpretation happens in [`crate::conditions`].
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Condition {
	/// Raw numeric opcode.
	pub opcode: u16,
	/// Opaque argument atoms.
	pub vars: Vec<Vec<u8>>,
}

/// Name, puzzle hash and conditions of one spend inside a bundle.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Npc {
	/// Id of the coin being spent.
	pub coin_name: Hash,
	/// Puzzle hash of the coin being spent.
	pub puzzle_hash: Hash,
	/// Conditions the spend imposes.
	pub conditions: Vec<Condition>,
}

/// The script VM collaborator. The pool never inspects program interiors;
/// it hands serialized programs over and consumes the reported results.
pub trait ProgramRunner: Send + Sync {
	/// Run a serialized program against serialized arguments, up to
	/// `max_cost`. Returns the cost and the serialized result.
	fn run_program(
		&self,
		program: &SerializedProgram,
		args: &[u8],
		max_cost: u64,
	) -> Result<(u64, Vec<u8>), PoolError>;

	/// Tree hash of a serialized program.
	fn tree_hash(&self, program: &SerializedProgram) -> Hash;

	/// Run the spends of a bundle and report each coin's conditions.
	fn get_name_puzzle_conditions(
		&self,
		program: &SerializedProgram,
		max_cost: u64,
	) -> Result<(u64, Vec<Npc>), PoolError>;
}

/// The pool's narrow, read-only view of chain state. Implemented by an
/// adapter on the node side, keeping pool and chain decoupled.
pub trait BlockChainView: Send + Sync {
	/// Record of the current peak.
	fn peak(&self) -> Option<SubBlockRecord>;

	/// Look up one coin in the unspent-coin view of the current peak.
	fn coin_record(&self, coin_id: &Hash) -> Option<CoinRecord>;
}

/// A bundle admitted to the pool, with its extracted spends.
#[derive(Clone, Debug)]
pub struct MempoolItem {
	/// Id of the bundle.
	pub name: Hash,
	/// The bundle itself.
	pub bundle: SpendBundle,
	/// Extracted spends.
	pub npc_list: Vec<Npc>,
	/// Cost the script VM charged.
	pub cost: u64,
}

/// Transaction pool configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
	/// Maximum number of bundles held.
	pub max_tx_count: usize,
	/// Cost ceiling per bundle.
	pub max_tx_cost: u64,
}

impl Default for PoolConfig {
	fn default() -> PoolConfig {
		PoolConfig {
			max_tx_count: 10_000,
			max_tx_cost: 100_000_000,
		}
	}
}
