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

//! Blocks and sub-blocks. A sub-block is the granular unit of consensus; the
//! ones carrying a transactions generator double as full blocks for
//! transaction purposes. An unfinished block is a sub-block still waiting for
//! its infusion-point VDFs from a timelord.

use byteorder::{BigEndian, WriteBytesExt};

use crate::core::hash::{Hash, Hashed};
use crate::core::proof::ProofOfSpace;
use crate::core::sub_slot::EndOfSubSlotBundle;
use crate::core::vdf::{InfusionPointVdfs, VdfInfo, VdfProof};

/// An opaque, serialized script program. The node never looks inside; the
/// script VM collaborator runs it and reports costs and conditions.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SerializedProgram(pub Vec<u8>);

impl Hashed for SerializedProgram {
	fn bytes(&self) -> Vec<u8> {
		self.0.clone()
	}
}

/// Where the pool reward of a block is directed.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PoolTarget {
	/// Puzzle hash receiving the pool portion of the reward.
	pub puzzle_hash: Hash,
	/// Maximum height this target is valid for, 0 for no limit.
	pub max_height: u32,
}

impl Hashed for PoolTarget {
	fn bytes(&self) -> Vec<u8> {
		let mut data = self.puzzle_hash.to_vec();
		data.write_u32::<BigEndian>(self.max_height).unwrap();
		data
	}
}

/// The farmer-chosen part of a sub-block that does not affect the trunk.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FoliageSubBlockData {
	/// Hash of the unfinished reward chain sub-block this foliage signs.
	pub unfinished_reward_block_hash: Hash,
	/// Pool reward target.
	pub pool_target: PoolTarget,
	/// Pool signature over the target, absent for pre-farm rewards.
	pub pool_signature: Option<Vec<u8>>,
	/// Puzzle hash receiving the farmer portion of the reward.
	pub farmer_reward_puzzle_hash: Hash,
}

impl Hashed for FoliageSubBlockData {
	fn bytes(&self) -> Vec<u8> {
		let mut data = self.unfinished_reward_block_hash.to_vec();
		data.extend_from_slice(&self.pool_target.bytes());
		if let Some(ref sig) = self.pool_signature {
			data.extend_from_slice(sig);
		}
		data.extend_from_slice(self.farmer_reward_puzzle_hash.to_slice());
		data
	}
}

/// Foliage of a sub-block. Its hash is the header hash of the block.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FoliageSubBlock {
	/// Header hash of the previous sub-block, or the genesis marker.
	pub prev_sub_block_hash: Hash,
	/// Hash of the reward chain sub-block.
	pub reward_block_hash: Hash,
	/// Farmer-chosen data.
	pub foliage_sub_block_data: FoliageSubBlockData,
	/// Plot key signature over the data above.
	pub foliage_sub_block_signature: Vec<u8>,
	/// Hash of the foliage block, present only on transaction blocks.
	pub foliage_block_hash: Option<Hash>,
	/// Plot key signature over the foliage block hash.
	pub foliage_block_signature: Option<Vec<u8>>,
}

impl Hashed for FoliageSubBlock {
	fn bytes(&self) -> Vec<u8> {
		let mut data = self.prev_sub_block_hash.to_vec();
		data.extend_from_slice(self.reward_block_hash.to_slice());
		data.extend_from_slice(&self.foliage_sub_block_data.bytes());
		data.extend_from_slice(&self.foliage_sub_block_signature);
		if let Some(ref h) = self.foliage_block_hash {
			data.extend_from_slice(h.to_slice());
		}
		data
	}
}

/// The transaction-block part of the foliage, only present on sub-blocks
/// that carry a transactions generator.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FoliageBlock {
	/// Header hash of the previous transaction block.
	pub prev_block_hash: Hash,
	/// Unix timestamp the farmer stamped the block with.
	pub timestamp: u64,
	/// Hash of the transactions filter.
	pub filter_hash: Hash,
	/// Merkle root of the coin additions.
	pub additions_root: Hash,
	/// Merkle root of the coin removals.
	pub removals_root: Hash,
	/// Hash of the transactions info.
	pub transactions_info_hash: Hash,
}

impl Hashed for FoliageBlock {
	fn bytes(&self) -> Vec<u8> {
		let mut data = self.prev_block_hash.to_vec();
		data.write_u64::<BigEndian>(self.timestamp).unwrap();
		data.extend_from_slice(self.filter_hash.to_slice());
		data.extend_from_slice(self.additions_root.to_slice());
		data.extend_from_slice(self.removals_root.to_slice());
		data.extend_from_slice(self.transactions_info_hash.to_slice());
		data
	}
}

/// The trunk of a sub-block: everything the timelords and the reward chain
/// commit to. Deterministic across foliage variants once unfinished fields
/// are stripped (see [`RewardChainSubBlock::get_unfinished`]).
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RewardChainSubBlock {
	/// Cumulative chain weight including this sub-block.
	pub weight: u128,
	/// Height of this sub-block.
	pub sub_block_height: u32,
	/// Cumulative VDF iterations at the infusion point.
	pub total_iters: u128,
	/// Index of the signage point within its sub-slot.
	pub signage_point_index: u8,
	/// Challenge chain challenge the proof of space answers.
	pub pos_ss_cc_challenge_hash: Hash,
	/// The proof of space.
	pub proof_of_space: ProofOfSpace,
	/// Challenge chain signage point VDF, absent at index 0.
	pub challenge_chain_sp_vdf: Option<VdfInfo>,
	/// Plot key signature over the challenge chain signage point.
	pub challenge_chain_sp_signature: Vec<u8>,
	/// Challenge chain infusion point VDF.
	pub challenge_chain_ip_vdf: VdfInfo,
	/// Reward chain signage point VDF, absent at index 0.
	pub reward_chain_sp_vdf: Option<VdfInfo>,
	/// Plot key signature over the reward chain signage point.
	pub reward_chain_sp_signature: Vec<u8>,
	/// Reward chain infusion point VDF.
	pub reward_chain_ip_vdf: VdfInfo,
	/// Infused challenge chain infusion point VDF, if one is running.
	pub infused_challenge_chain_ip_vdf: Option<VdfInfo>,
	/// True if this sub-block is also a transaction block.
	pub is_block: bool,
}

impl Hashed for RewardChainSubBlock {
	fn bytes(&self) -> Vec<u8> {
		let mut data = vec![];
		data.write_u128::<BigEndian>(self.weight).unwrap();
		data.write_u32::<BigEndian>(self.sub_block_height).unwrap();
		data.write_u128::<BigEndian>(self.total_iters).unwrap();
		data.push(self.signage_point_index);
		data.extend_from_slice(self.pos_ss_cc_challenge_hash.to_slice());
		data.extend_from_slice(&self.proof_of_space.bytes());
		if let Some(ref vdf) = self.challenge_chain_sp_vdf {
			data.extend_from_slice(&vdf.bytes());
		}
		data.extend_from_slice(&self.challenge_chain_ip_vdf.bytes());
		if let Some(ref vdf) = self.reward_chain_sp_vdf {
			data.extend_from_slice(&vdf.bytes());
		}
		data.extend_from_slice(&self.reward_chain_ip_vdf.bytes());
		if let Some(ref vdf) = self.infused_challenge_chain_ip_vdf {
			data.extend_from_slice(&vdf.bytes());
		}
		data.push(self.is_block as u8);
		data
	}
}

impl RewardChainSubBlock {
	/// Strip the infusion-point fields, yielding the deterministic trunk that
	/// identifies every foliage variant of the same unfinished block.
	pub fn get_unfinished(&self) -> RewardChainSubBlockUnfinished {
		RewardChainSubBlockUnfinished {
			total_iters: self.total_iters,
			signage_point_index: self.signage_point_index,
			pos_ss_cc_challenge_hash: self.pos_ss_cc_challenge_hash,
			proof_of_space: self.proof_of_space.clone(),
			challenge_chain_sp_vdf: self.challenge_chain_sp_vdf.clone(),
			challenge_chain_sp_signature: self.challenge_chain_sp_signature.clone(),
			reward_chain_sp_vdf: self.reward_chain_sp_vdf.clone(),
			reward_chain_sp_signature: self.reward_chain_sp_signature.clone(),
		}
	}
}

/// The trunk of an unfinished sub-block, before any infusion point exists.
/// Its hash is the trunk hash.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RewardChainSubBlockUnfinished {
	/// Cumulative VDF iterations at the signage point.
	pub total_iters: u128,
	/// Index of the signage point within its sub-slot.
	pub signage_point_index: u8,
	/// Challenge chain challenge the proof of space answers.
	pub pos_ss_cc_challenge_hash: Hash,
	/// The proof of space.
	pub proof_of_space: ProofOfSpace,
	/// Challenge chain signage point VDF, absent at index 0.
	pub challenge_chain_sp_vdf: Option<VdfInfo>,
	/// Plot key signature over the challenge chain signage point.
	pub challenge_chain_sp_signature: Vec<u8>,
	/// Reward chain signage point VDF, absent at index 0.
	pub reward_chain_sp_vdf: Option<VdfInfo>,
	/// Plot key signature over the reward chain signage point.
	pub reward_chain_sp_signature: Vec<u8>,
}

impl Hashed for RewardChainSubBlockUnfinished {
	fn bytes(&self) -> Vec<u8> {
		let mut data = vec![];
		data.write_u128::<BigEndian>(self.total_iters).unwrap();
		data.push(self.signage_point_index);
		data.extend_from_slice(self.pos_ss_cc_challenge_hash.to_slice());
		data.extend_from_slice(&self.proof_of_space.bytes());
		if let Some(ref vdf) = self.challenge_chain_sp_vdf {
			data.extend_from_slice(&vdf.bytes());
		}
		data.extend_from_slice(&self.challenge_chain_sp_signature);
		if let Some(ref vdf) = self.reward_chain_sp_vdf {
			data.extend_from_slice(&vdf.bytes());
		}
		data.extend_from_slice(&self.reward_chain_sp_signature);
		data
	}
}

/// A checkpoint inserted at sub-epoch boundaries, carrying the next epoch's
/// difficulty and sub-slot iterations when the boundary is also an epoch
/// boundary.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SubEpochSummary {
	/// Hash of the previous sub-epoch summary.
	pub prev_subepoch_summary_hash: Hash,
	/// Reward chain hash at the boundary.
	pub reward_chain_hash: Hash,
	/// Number of overflow sub-blocks in the finished sub-epoch.
	pub num_sub_blocks_overflow: u8,
	/// Difficulty for the next epoch, only at an epoch boundary.
	pub new_difficulty: Option<u64>,
	/// Sub-slot iterations for the next epoch, only at an epoch boundary.
	pub new_sub_slot_iters: Option<u64>,
}

impl Hashed for SubEpochSummary {
	fn bytes(&self) -> Vec<u8> {
		let mut data = self.prev_subepoch_summary_hash.to_vec();
		data.extend_from_slice(self.reward_chain_hash.to_slice());
		data.push(self.num_sub_blocks_overflow);
		if let Some(d) = self.new_difficulty {
			data.write_u64::<BigEndian>(d).unwrap();
		}
		if let Some(i) = self.new_sub_slot_iters {
			data.write_u64::<BigEndian>(i).unwrap();
		}
		data
	}
}

/// A complete sub-block as exchanged between full nodes.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FullBlock {
	/// Finished sub-slots since the previous sub-block, oldest first.
	pub finished_sub_slots: Vec<EndOfSubSlotBundle>,
	/// The trunk.
	pub reward_chain_sub_block: RewardChainSubBlock,
	/// Proof of the challenge chain signage point VDF.
	pub challenge_chain_sp_proof: Option<VdfProof>,
	/// Proof of the challenge chain infusion point VDF.
	pub challenge_chain_ip_proof: VdfProof,
	/// Proof of the reward chain signage point VDF.
	pub reward_chain_sp_proof: Option<VdfProof>,
	/// Proof of the reward chain infusion point VDF.
	pub reward_chain_ip_proof: VdfProof,
	/// Proof of the infused challenge chain VDF.
	pub infused_challenge_chain_ip_proof: Option<VdfProof>,
	/// The foliage.
	pub foliage_sub_block: FoliageSubBlock,
	/// Transaction-block foliage, on transaction blocks only.
	pub foliage_block: Option<FoliageBlock>,
	/// The transactions generator, on transaction blocks only.
	pub transactions_generator: Option<SerializedProgram>,
}

impl FullBlock {
	/// Header hash identifying this sub-block, the hash of its foliage.
	pub fn header_hash(&self) -> Hash {
		self.foliage_sub_block.hash()
	}

	/// Header hash of the previous sub-block.
	pub fn prev_header_hash(&self) -> Hash {
		self.foliage_sub_block.prev_sub_block_hash
	}

	/// Height of this sub-block.
	pub fn height(&self) -> u32 {
		self.reward_chain_sub_block.sub_block_height
	}

	/// Claimed cumulative weight.
	pub fn weight(&self) -> u128 {
		self.reward_chain_sub_block.weight
	}

	/// Cumulative iterations at the infusion point.
	pub fn total_iters(&self) -> u128 {
		self.reward_chain_sub_block.total_iters
	}

	/// Whether this sub-block opens a new sub-slot.
	pub fn first_in_sub_slot(&self) -> bool {
		!self.finished_sub_slots.is_empty() || self.height() == 0
	}

	/// True for sub-blocks that also carry transactions.
	pub fn is_block(&self) -> bool {
		self.foliage_block.is_some()
	}
}

/// A sub-block with its foliage attached but the infusion point VDFs still
/// missing, the intermediate product of the farmer / full node / timelord
/// assembly round-trip.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct UnfinishedBlock {
	/// Finished sub-slots since the previous sub-block, oldest first.
	pub finished_sub_slots: Vec<EndOfSubSlotBundle>,
	/// The unfinished trunk.
	pub reward_chain_sub_block: RewardChainSubBlockUnfinished,
	/// Proof of the challenge chain signage point VDF.
	pub challenge_chain_sp_proof: Option<VdfProof>,
	/// Proof of the reward chain signage point VDF.
	pub reward_chain_sp_proof: Option<VdfProof>,
	/// The foliage.
	pub foliage_sub_block: FoliageSubBlock,
	/// Transaction-block foliage, on transaction blocks only.
	pub foliage_block: Option<FoliageBlock>,
	/// The transactions generator, on transaction blocks only.
	pub transactions_generator: Option<SerializedProgram>,
}

impl UnfinishedBlock {
	/// The trunk hash: deterministic across foliage variants, used to
	/// deduplicate unfinished blocks in the store.
	pub fn trunk_hash(&self) -> Hash {
		self.reward_chain_sub_block.hash()
	}

	/// The partial hash: covers the foliage too, so two variants of the same
	/// trunk hash differently.
	pub fn partial_hash(&self) -> Hash {
		let mut data = self.reward_chain_sub_block.bytes();
		data.extend_from_slice(&self.foliage_sub_block.bytes());
		data.hash()
	}

	/// Header hash of the previous sub-block.
	pub fn prev_header_hash(&self) -> Hash {
		self.foliage_sub_block.prev_sub_block_hash
	}

	/// Cumulative iterations at the signage point.
	pub fn total_iters(&self) -> u128 {
		self.reward_chain_sub_block.total_iters
	}

	/// Index of the signage point within its sub-slot.
	pub fn signage_point_index(&self) -> u8 {
		self.reward_chain_sub_block.signage_point_index
	}

	/// Close this unfinished block into a full sub-block with the
	/// infusion-point VDFs delivered by a timelord. The caller supplies the
	/// chain-dependent trunk values and the rebuilt finished sub-slots list;
	/// the foliage is re-pointed at the finished trunk.
	pub fn into_full_block(
		self,
		infusion: InfusionPointVdfs,
		finished_sub_slots: Vec<EndOfSubSlotBundle>,
		weight: u128,
		sub_block_height: u32,
		total_iters: u128,
		is_block: bool,
	) -> FullBlock {
		let reward_chain_sub_block = RewardChainSubBlock {
			weight,
			sub_block_height,
			total_iters,
			signage_point_index: self.reward_chain_sub_block.signage_point_index,
			pos_ss_cc_challenge_hash: self.reward_chain_sub_block.pos_ss_cc_challenge_hash,
			proof_of_space: self.reward_chain_sub_block.proof_of_space,
			challenge_chain_sp_vdf: self.reward_chain_sub_block.challenge_chain_sp_vdf,
			challenge_chain_sp_signature: self.reward_chain_sub_block.challenge_chain_sp_signature,
			challenge_chain_ip_vdf: infusion.challenge_chain_ip_vdf,
			reward_chain_sp_vdf: self.reward_chain_sub_block.reward_chain_sp_vdf,
			reward_chain_sp_signature: self.reward_chain_sub_block.reward_chain_sp_signature,
			reward_chain_ip_vdf: infusion.reward_chain_ip_vdf,
			infused_challenge_chain_ip_vdf: infusion.infused_challenge_chain_ip_vdf,
			is_block,
		};
		let mut foliage_sub_block = self.foliage_sub_block;
		foliage_sub_block.reward_block_hash = reward_chain_sub_block.hash();
		FullBlock {
			finished_sub_slots,
			reward_chain_sub_block,
			challenge_chain_sp_proof: self.challenge_chain_sp_proof,
			challenge_chain_ip_proof: infusion.challenge_chain_ip_proof,
			reward_chain_sp_proof: self.reward_chain_sp_proof,
			reward_chain_ip_proof: infusion.reward_chain_ip_proof,
			infused_challenge_chain_ip_proof: infusion.infused_challenge_chain_ip_proof,
			foliage_sub_block,
			foliage_block: self.foliage_block,
			transactions_generator: self.transactions_generator,
		}
	}
}
