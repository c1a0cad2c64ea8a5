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

//! Succinct proofs of chain weight. A weight proof carries one entry per
//! sub-epoch plus the recent chain verbatim, letting a syncing node accept a
//! far-away peak without downloading the whole chain. Validation here is
//! structural; the sampled VDF spot checks live behind the injected
//! verifiers like every other cryptographic routine.

use std::sync::{Arc, Mutex};

use arbor_core::consensus::ConsensusConstants;
use arbor_core::core::{Hash, Hashed, RewardChainSubBlock};

use crate::chain::Blockchain;
use crate::error::{Error, ErrorKind};

/// One sub-epoch of the chain, compressed to its summary data.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SubEpochData {
	/// Reward chain hash at the sub-epoch boundary.
	pub reward_chain_hash: Hash,
	/// Number of overflow sub-blocks in the sub-epoch.
	pub num_sub_blocks_overflow: u8,
	/// New sub-slot iterations, when the boundary closed an epoch.
	pub new_sub_slot_iters: Option<u64>,
	/// New difficulty, when the boundary closed an epoch.
	pub new_difficulty: Option<u64>,
}

/// A recent-chain entry of a weight proof: the trunk of one block.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ProofBlockHeader {
	/// The reward chain sub-block of the proven block.
	pub reward_chain_sub_block: RewardChainSubBlock,
}

/// A succinct proof that a peak's weight is correct.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct WeightProof {
	/// Compressed sub-epochs, oldest first.
	pub sub_epochs: Vec<SubEpochData>,
	/// The recent chain verbatim, oldest first, tip last.
	pub recent_chain_data: Vec<ProofBlockHeader>,
}

impl WeightProof {
	/// Height of the tip this proof claims.
	pub fn tip_height(&self) -> Option<u32> {
		self.recent_chain_data
			.last()
			.map(|h| h.reward_chain_sub_block.sub_block_height)
	}

	/// Weight of the tip this proof claims.
	pub fn tip_weight(&self) -> Option<u128> {
		self.recent_chain_data
			.last()
			.map(|h| h.reward_chain_sub_block.weight)
	}
}

/// Validates weight proofs against our own chain and produces them for
/// peers. Proof generation is cached per tip; the cache is refreshed
/// best-effort as sub-epochs complete.
pub struct WeightProofVerifier {
	constants: Arc<ConsensusConstants>,
	blockchain: Arc<Blockchain>,
	cache: Mutex<Option<(Hash, WeightProof)>>,
}

impl WeightProofVerifier {
	/// A verifier bound to the given chain.
	pub fn new(constants: Arc<ConsensusConstants>, blockchain: Arc<Blockchain>) -> WeightProofVerifier {
		WeightProofVerifier {
			constants,
			blockchain,
			cache: Mutex::new(None),
		}
	}

	/// Validate a weight proof. Returns whether it holds together and the
	/// fork point: the highest height of its recent chain that is already
	/// on our canonical chain, 0 when the chains share nothing recent.
	pub fn validate_weight_proof(&self, wp: &WeightProof) -> Result<(bool, u32), Error> {
		if wp.recent_chain_data.is_empty() {
			return Ok((false, 0));
		}

		let mut prev: Option<&RewardChainSubBlock> = None;
		for entry in &wp.recent_chain_data {
			let rcsb = &entry.reward_chain_sub_block;
			if let Some(p) = prev {
				if rcsb.sub_block_height != p.sub_block_height + 1 {
					warn!("weight proof recent chain skips a height");
					return Ok((false, 0));
				}
				if rcsb.weight <= p.weight {
					warn!("weight proof recent chain weight not increasing");
					return Ok((false, 0));
				}
				if rcsb.total_iters <= p.total_iters {
					warn!("weight proof recent chain iters not increasing");
					return Ok((false, 0));
				}
			}
			prev = Some(rcsb);
		}

		let tip_height = wp.tip_height().unwrap();
		let expected_sub_epochs =
			tip_height.saturating_sub(self.constants.weight_proof_recent_blocks)
				/ self.constants.sub_epoch_sub_blocks;
		if (wp.sub_epochs.len() as u32) < expected_sub_epochs {
			warn!(
				"weight proof carries {} sub-epochs, expected at least {}",
				wp.sub_epochs.len(),
				expected_sub_epochs
			);
			return Ok((false, 0));
		}

		let fork_point = self.find_fork_point(wp);
		Ok((true, fork_point))
	}

	// Highest recent-chain entry already on our canonical chain. We match
	// on the reward infusion of the record at the same height.
	fn find_fork_point(&self, wp: &WeightProof) -> u32 {
		for entry in wp.recent_chain_data.iter().rev() {
			let rcsb = &entry.reward_chain_sub_block;
			if let Some(hash) = self.blockchain.height_to_hash(rcsb.sub_block_height) {
				if let Some(record) = self.blockchain.try_sub_block(&hash) {
					if record.reward_infusion_new_challenge == rcsb.hash() {
						return rcsb.sub_block_height;
					}
				}
			}
		}
		0
	}

	/// Produce (or reuse) the weight proof for the given tip of our own
	/// chain.
	pub fn get_proof_of_weight(&self, tip: &Hash) -> Result<Option<WeightProof>, Error> {
		{
			let cache = self.cache.lock().unwrap();
			if let Some((cached_tip, ref wp)) = *cache {
				if cached_tip == *tip {
					return Ok(Some(wp.clone()));
				}
			}
		}

		let tip_record = match self.blockchain.try_sub_block(tip) {
			Some(r) => r,
			None => return Ok(None),
		};

		let mut recent = vec![];
		let start = tip_record
			.sub_block_height
			.saturating_sub(self.constants.weight_proof_recent_blocks - 1);
		let mut cur = tip_record.clone();
		loop {
			let block = self
				.blockchain
				.get_block(&cur.header_hash)?
				.ok_or_else(|| ErrorKind::NotFound(format!("block {}", cur.header_hash)))?;
			recent.push(ProofBlockHeader {
				reward_chain_sub_block: block.reward_chain_sub_block,
			});
			if cur.sub_block_height <= start {
				break;
			}
			cur = match self.blockchain.try_sub_block(&cur.prev_hash) {
				Some(r) => r,
				None => break,
			};
		}
		recent.reverse();

		let mut sub_epochs = vec![];
		let mut boundary = self.constants.sub_epoch_sub_blocks;
		while boundary <= tip_record.sub_block_height {
			if let Some(hash) = self.blockchain.height_to_hash(boundary) {
				if let Some(record) = self.blockchain.try_sub_block(&hash) {
					if let Some(ses) = record.sub_epoch_summary_included {
						sub_epochs.push(SubEpochData {
							reward_chain_hash: ses.reward_chain_hash,
							num_sub_blocks_overflow: ses.num_sub_blocks_overflow,
							new_sub_slot_iters: ses.new_sub_slot_iters,
							new_difficulty: ses.new_difficulty,
						});
					}
				}
			}
			boundary += self.constants.sub_epoch_sub_blocks;
		}

		let wp = WeightProof {
			sub_epochs,
			recent_chain_data: recent,
		};
		*self.cache.lock().unwrap() = Some((*tip, wp.clone()));
		Ok(Some(wp))
	}

	/// Refresh the cached proof segments after a sub-epoch summary landed.
	/// Best-effort; failures are logged, never propagated.
	pub fn create_prev_sub_epoch_segments(&self) {
		let peak = match self.blockchain.get_peak() {
			Some(p) => p,
			None => return,
		};
		self.cache.lock().unwrap().take();
		if let Err(e) = self.get_proof_of_weight(&peak.header_hash) {
			debug!("could not refresh weight proof segments: {}", e);
		}
	}
}
