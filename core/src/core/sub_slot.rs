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

//! End-of-sub-slot structures and signage points. A sub-slot is the time
//! window bounded by an end-of-slot VDF; zero or more finished sub-slots may
//! precede any sub-block.

use byteorder::{BigEndian, WriteBytesExt};

use crate::core::hash::{Hash, Hashed};
use crate::core::vdf::{VdfInfo, VdfProof};

/// Challenge-chain part of an end of sub-slot. Carries the epoch transitions
/// when the slot closes an epoch.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ChallengeChainSubSlot {
	/// The challenge chain end-of-slot VDF.
	pub end_of_slot_vdf: VdfInfo,
	/// Hash of the infused challenge chain slot, if one was running.
	pub infused_challenge_chain_sub_slot_hash: Option<Hash>,
	/// Hash of the sub-epoch summary this slot finalizes, if any.
	pub sub_epoch_summary_hash: Option<Hash>,
	/// New sub-slot iterations taking effect, only at an epoch boundary.
	pub new_sub_slot_iters: Option<u64>,
	/// New difficulty taking effect, only at an epoch boundary.
	pub new_difficulty: Option<u64>,
}

impl Hashed for ChallengeChainSubSlot {
	fn bytes(&self) -> Vec<u8> {
		let mut data = self.end_of_slot_vdf.bytes();
		if let Some(ref h) = self.infused_challenge_chain_sub_slot_hash {
			data.extend_from_slice(h.to_slice());
		}
		if let Some(ref h) = self.sub_epoch_summary_hash {
			data.extend_from_slice(h.to_slice());
		}
		if let Some(iters) = self.new_sub_slot_iters {
			data.write_u64::<BigEndian>(iters).unwrap();
		}
		if let Some(diff) = self.new_difficulty {
			data.write_u64::<BigEndian>(diff).unwrap();
		}
		data
	}
}

/// Infused challenge chain part of an end of sub-slot.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct InfusedChallengeChainSubSlot {
	/// The infused challenge chain end-of-slot VDF.
	pub end_of_slot_vdf: VdfInfo,
}

impl Hashed for InfusedChallengeChainSubSlot {
	fn bytes(&self) -> Vec<u8> {
		self.end_of_slot_vdf.bytes()
	}
}

/// Reward-chain part of an end of sub-slot. Its hash becomes the reward
/// chain challenge of the following slot.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RewardChainSubSlot {
	/// The reward chain end-of-slot VDF.
	pub end_of_slot_vdf: VdfInfo,
	/// Hash of the challenge chain part.
	pub challenge_chain_sub_slot_hash: Hash,
	/// Hash of the infused challenge chain part, if one was running.
	pub infused_challenge_chain_sub_slot_hash: Option<Hash>,
	/// Infusions still required before the next slot can close.
	pub deficit: u8,
}

impl Hashed for RewardChainSubSlot {
	fn bytes(&self) -> Vec<u8> {
		let mut data = self.end_of_slot_vdf.bytes();
		data.extend_from_slice(self.challenge_chain_sub_slot_hash.to_slice());
		if let Some(ref h) = self.infused_challenge_chain_sub_slot_hash {
			data.extend_from_slice(h.to_slice());
		}
		data.push(self.deficit);
		data
	}
}

/// The VDF witnesses for one end of sub-slot.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SubSlotProofs {
	/// Proof of the challenge chain end-of-slot VDF.
	pub challenge_chain_slot_proof: VdfProof,
	/// Proof of the infused challenge chain end-of-slot VDF.
	pub infused_challenge_chain_slot_proof: Option<VdfProof>,
	/// Proof of the reward chain end-of-slot VDF.
	pub reward_chain_slot_proof: VdfProof,
}

/// A complete finished sub-slot: the three end-of-slot structures plus their
/// proofs, in the order they appear inside a block.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct EndOfSubSlotBundle {
	/// Challenge chain end of slot.
	pub challenge_chain: ChallengeChainSubSlot,
	/// Infused challenge chain end of slot, if one was running.
	pub infused_challenge_chain: Option<InfusedChallengeChainSubSlot>,
	/// Reward chain end of slot.
	pub reward_chain: RewardChainSubSlot,
	/// Witnesses for the three VDFs above.
	pub proofs: SubSlotProofs,
}

/// A signage point inside a sub-slot: the challenge and reward chain VDFs at
/// one of the slot's checkpoints, plus their proofs. The fields are absent
/// for index 0, where the slot itself is the signage point.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SignagePoint {
	/// Challenge chain signage point VDF.
	pub cc_vdf: Option<VdfInfo>,
	/// Proof of the challenge chain VDF.
	pub cc_proof: Option<VdfProof>,
	/// Reward chain signage point VDF.
	pub rc_vdf: Option<VdfInfo>,
	/// Proof of the reward chain VDF.
	pub rc_proof: Option<VdfProof>,
}
