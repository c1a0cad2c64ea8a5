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

//! The compact record kept for every accepted sub-block. Records are created
//! once when the chain accepts a block and never mutated; long forks may
//! evict them from the in-memory cache but the persisted copy remains.

use crate::consensus::{calculate_ip_iters, calculate_sp_iters, ConsensusConstants};
use crate::core::block::SubEpochSummary;
use crate::core::hash::Hash;

/// Canonical, hashable description of one accepted sub-block.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SubBlockRecord {
	/// Header hash of the sub-block.
	pub header_hash: Hash,
	/// Header hash of the previous sub-block, or the genesis marker.
	pub prev_hash: Hash,
	/// Height in the chain.
	pub sub_block_height: u32,
	/// Cumulative difficulty, strictly increasing along any accepted chain.
	pub weight: u128,
	/// Cumulative VDF iterations at the infusion point.
	pub total_iters: u128,
	/// Index of the signage point within its sub-slot.
	pub signage_point_index: u8,
	/// Iterations the proof-of-space quality requires.
	pub required_iters: u64,
	/// Sub-slot iterations in force for this sub-block.
	pub sub_slot_iters: u64,
	/// Infusions still required before the next sub-slot can close.
	pub deficit: u8,
	/// Signage point in the previous sub-slot, infusion point in this one.
	pub overflow: bool,
	/// True if this sub-block opened its sub-slot.
	pub first_in_sub_slot: bool,
	/// Reward chain hash at the infusion, the challenge the next infusion
	/// chains from.
	pub reward_infusion_new_challenge: Hash,
	/// Sub-epoch summary finalized by this sub-block, if any.
	pub sub_epoch_summary_included: Option<SubEpochSummary>,
}

impl SubBlockRecord {
	/// Whether this record is the challenge sub-block of its slot, the first
	/// infusion after a deficit reset.
	pub fn is_challenge_sub_block(&self, constants: &ConsensusConstants) -> bool {
		self.deficit == constants.min_sub_blocks_per_challenge_block - 1
	}

	/// Iterations from the start of the sub-slot to the infusion point.
	pub fn ip_iters(&self, constants: &ConsensusConstants) -> u64 {
		calculate_ip_iters(
			constants,
			self.sub_slot_iters,
			self.signage_point_index,
			self.required_iters,
		)
	}

	/// Iterations from the start of the sub-slot to the signage point.
	pub fn sp_iters(&self, constants: &ConsensusConstants) -> u64 {
		calculate_sp_iters(constants, self.sub_slot_iters, self.signage_point_index)
	}

	/// Total iterations at the start of the sub-slot holding the infusion
	/// point.
	pub fn ip_sub_slot_total_iters(&self, constants: &ConsensusConstants) -> u128 {
		self.total_iters - self.ip_iters(constants) as u128
	}

	/// Total iterations at the start of the sub-slot holding the signage
	/// point. One slot earlier than the infusion for overflow sub-blocks.
	pub fn sp_sub_slot_total_iters(&self, constants: &ConsensusConstants) -> u128 {
		let ip_slot_start = self.ip_sub_slot_total_iters(constants);
		if self.overflow {
			ip_slot_start.saturating_sub(self.sub_slot_iters as u128)
		} else {
			ip_slot_start
		}
	}

	/// Total iterations at the signage point.
	pub fn sp_total_iters(&self, constants: &ConsensusConstants) -> u128 {
		self.sp_sub_slot_total_iters(constants) + self.sp_iters(constants) as u128
	}
}
