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

//! Common test helpers: accept-all verifiers and a deterministic block
//! builder that produces sub-blocks the acceptance pipeline agrees with.

use std::sync::Arc;

use arbor_chain::{pipe, Blockchain, ErrorKind, MemBlockStore, MemCoinStore, ReceiveBlockResult};
use arbor_core::consensus::{calculate_ip_iters, calculate_sp_iters, ConsensusConstants};
use arbor_core::core::{
	ChallengeChainSubSlot, EndOfSubSlotBundle, FoliageBlock, FoliageSubBlock,
	FoliageSubBlockData, FullBlock, Hash, Hashed, PoolTarget, ProofOfSpace, ProofOfSpaceVerify,
	RewardChainSubBlock, RewardChainSubSlot, SubBlockRecord, SubSlotProofs, VdfInfo, VdfProof,
	VdfVerify, Verifiers, BlsVerify,
};

/// Proof-of-space stand-in: the iteration requirement is encoded in the
/// first eight bytes of the proof itself.
pub struct ProofBytesPoSpace;

impl ProofOfSpaceVerify for ProofBytesPoSpace {
	fn required_iters(&self, pos: &ProofOfSpace, _challenge: &Hash, _index: u8) -> Option<u64> {
		if pos.proof.len() < 8 {
			return None;
		}
		let mut value: u64 = 0;
		for b in &pos.proof[..8] {
			value = (value << 8) | *b as u64;
		}
		Some(value)
	}
}

struct AcceptAllVdf;

impl VdfVerify for AcceptAllVdf {
	fn verify(&self, _info: &VdfInfo, _proof: &VdfProof) -> bool {
		true
	}
}

struct AcceptAllBls;

impl BlsVerify for AcceptAllBls {
	fn verify(&self, _pk: &[u8], _msg: &[u8], _sig: &[u8]) -> bool {
		true
	}
}

pub fn test_verifiers() -> Verifiers {
	Verifiers {
		pospace: Arc::new(ProofBytesPoSpace),
		vdf: Arc::new(AcceptAllVdf),
		bls: Arc::new(AcceptAllBls),
	}
}

pub fn init_chain(constants: Arc<ConsensusConstants>) -> Blockchain {
	let _ = env_logger::try_init();
	Blockchain::create(
		Arc::new(MemBlockStore::new()),
		Arc::new(MemCoinStore::new()),
		constants,
		test_verifiers(),
	)
	.unwrap()
}

fn nonce_hash(prev: &Hash, nonce: u64, salt: u64) -> Hash {
	let mut data = prev.to_vec();
	data.extend_from_slice(&nonce.to_be_bytes());
	data.extend_from_slice(&salt.to_be_bytes());
	data.hash()
}

fn slot_bundle(challenge_seed: Hash, sub_slot_iters: u64) -> EndOfSubSlotBundle {
	let challenge_chain = ChallengeChainSubSlot {
		end_of_slot_vdf: VdfInfo {
			challenge: challenge_seed,
			number_of_iterations: sub_slot_iters,
			output: vec![1],
		},
		infused_challenge_chain_sub_slot_hash: None,
		sub_epoch_summary_hash: None,
		new_sub_slot_iters: None,
		new_difficulty: None,
	};
	let reward_chain = RewardChainSubSlot {
		end_of_slot_vdf: VdfInfo {
			challenge: challenge_seed,
			number_of_iterations: sub_slot_iters,
			output: vec![2],
		},
		challenge_chain_sub_slot_hash: challenge_chain.hash(),
		infused_challenge_chain_sub_slot_hash: None,
		deficit: 0,
	};
	EndOfSubSlotBundle {
		challenge_chain,
		infused_challenge_chain: None,
		reward_chain,
		proofs: SubSlotProofs {
			challenge_chain_slot_proof: VdfProof {
				witness_type: 1,
				witness: vec![0],
			},
			infused_challenge_chain_slot_proof: None,
			reward_chain_slot_proof: VdfProof {
				witness_type: 1,
				witness: vec![0],
			},
		},
	}
}

/// Everything the builder lets a test vary about the next block.
pub struct BlockOpts {
	pub nonce: u64,
	pub required_iters: u64,
	pub n_slots: usize,
	pub signage_point_index: u8,
	pub is_block: bool,
	pub timestamp: u64,
}

impl Default for BlockOpts {
	fn default() -> BlockOpts {
		BlockOpts {
			nonce: 0,
			required_iters: 10,
			n_slots: 0,
			signage_point_index: 1,
			is_block: false,
			timestamp: 1_600_000_000,
		}
	}
}

/// Build a sub-block on top of `prev` that the chain's own recomputation
/// will agree with.
pub fn make_block(
	constants: &ConsensusConstants,
	chain: &Blockchain,
	prev: Option<&SubBlockRecord>,
	opts: BlockOpts,
) -> FullBlock {
	let new_slots = opts.n_slots as u128;
	let new_slot = opts.n_slots > 0;
	let (difficulty, sub_slot_iters) = match prev {
		Some(p) => (
			chain.get_next_difficulty(&p.header_hash, new_slot),
			chain.get_next_slot_iters(&p.header_hash, new_slot),
		),
		None => (
			constants.difficulty_starting,
			constants.sub_slot_iters_starting,
		),
	};

	let (sub_block_height, weight, slot_start) = match prev {
		Some(p) => {
			let slot_start = if new_slots > 0 {
				p.ip_sub_slot_total_iters(constants)
					+ p.sub_slot_iters as u128
					+ (new_slots - 1) * sub_slot_iters as u128
			} else {
				p.ip_sub_slot_total_iters(constants)
			};
			(
				p.sub_block_height + 1,
				p.weight + difficulty as u128,
				slot_start,
			)
		}
		None => (0, difficulty as u128, new_slots * sub_slot_iters as u128),
	};
	let ip_iters = calculate_ip_iters(
		constants,
		sub_slot_iters,
		opts.signage_point_index,
		opts.required_iters,
	);
	let total_iters = slot_start + ip_iters as u128;

	let prev_hash = prev
		.map(|p| p.header_hash)
		.unwrap_or(constants.genesis_prev_hash);

	let finished_sub_slots: Vec<EndOfSubSlotBundle> = (0..opts.n_slots)
		.map(|i| slot_bundle(nonce_hash(&prev_hash, opts.nonce, i as u64), sub_slot_iters))
		.collect();

	let pos_challenge = match finished_sub_slots.last() {
		Some(bundle) => bundle.challenge_chain.hash(),
		None => match prev {
			Some(p) => nonce_hash(&p.header_hash, 0, 99),
			None => constants.first_cc_challenge,
		},
	};

	let mut proof = opts.required_iters.to_be_bytes().to_vec();
	proof.extend_from_slice(&opts.nonce.to_be_bytes());
	let proof_of_space = ProofOfSpace {
		challenge: pos_challenge,
		pool_public_key: vec![7; 48],
		plot_public_key: vec![8; 48],
		size: 32,
		proof,
	};

	let sp_iters = calculate_sp_iters(constants, sub_slot_iters, opts.signage_point_index);
	let (cc_sp_vdf, rc_sp_vdf, cc_sp_proof, rc_sp_proof) = if opts.signage_point_index > 0 {
		(
			Some(VdfInfo {
				challenge: pos_challenge,
				number_of_iterations: sp_iters,
				output: vec![3],
			}),
			Some(VdfInfo {
				challenge: nonce_hash(&pos_challenge, opts.nonce, 3),
				number_of_iterations: sp_iters,
				output: vec![4],
			}),
			Some(VdfProof {
				witness_type: 1,
				witness: vec![0],
			}),
			Some(VdfProof {
				witness_type: 1,
				witness: vec![0],
			}),
		)
	} else {
		(None, None, None, None)
	};

	let reward_chain_sub_block = RewardChainSubBlock {
		weight,
		sub_block_height,
		total_iters,
		signage_point_index: opts.signage_point_index,
		pos_ss_cc_challenge_hash: pos_challenge,
		proof_of_space,
		challenge_chain_sp_vdf: cc_sp_vdf,
		challenge_chain_sp_signature: vec![5; 96],
		challenge_chain_ip_vdf: VdfInfo {
			challenge: pos_challenge,
			number_of_iterations: ip_iters,
			output: vec![6],
		},
		reward_chain_sp_vdf: rc_sp_vdf,
		reward_chain_sp_signature: vec![5; 96],
		reward_chain_ip_vdf: VdfInfo {
			challenge: nonce_hash(&prev_hash, opts.nonce, 7),
			number_of_iterations: ip_iters,
			output: vec![7],
		},
		infused_challenge_chain_ip_vdf: None,
		is_block: opts.is_block,
	};

	let foliage_block = if opts.is_block {
		Some(FoliageBlock {
			prev_block_hash: prev_hash,
			timestamp: opts.timestamp,
			filter_hash: nonce_hash(&prev_hash, opts.nonce, 8),
			additions_root: Hash([1; 32]),
			removals_root: Hash([2; 32]),
			transactions_info_hash: Hash([3; 32]),
		})
	} else {
		None
	};

	let foliage_sub_block_data = FoliageSubBlockData {
		unfinished_reward_block_hash: reward_chain_sub_block.get_unfinished().hash(),
		pool_target: PoolTarget {
			puzzle_hash: Hash([4; 32]),
			max_height: 0,
		},
		pool_signature: Some(vec![9; 96]),
		farmer_reward_puzzle_hash: Hash([5; 32]),
	};
	let foliage_sub_block = FoliageSubBlock {
		prev_sub_block_hash: prev_hash,
		reward_block_hash: reward_chain_sub_block.hash(),
		foliage_sub_block_data,
		foliage_sub_block_signature: vec![6; 96],
		foliage_block_hash: foliage_block.as_ref().map(|fb| fb.hash()),
		foliage_block_signature: foliage_block.as_ref().map(|_| vec![6; 96]),
	};

	FullBlock {
		finished_sub_slots,
		reward_chain_sub_block,
		challenge_chain_sp_proof: cc_sp_proof,
		challenge_chain_ip_proof: VdfProof {
			witness_type: 1,
			witness: vec![0],
		},
		reward_chain_sp_proof: rc_sp_proof,
		reward_chain_ip_proof: VdfProof {
			witness_type: 1,
			witness: vec![0],
		},
		infused_challenge_chain_ip_proof: None,
		foliage_sub_block,
		foliage_block,
		transactions_generator: None,
	}
}
// generators stay empty here; the chain tests never run the script VM

/// Pre-validate and hand a block to the chain the way the node does.
pub fn push_block(
	constants: &ConsensusConstants,
	chain: &Blockchain,
	block: &FullBlock,
) -> (ReceiveBlockResult, Option<ErrorKind>, Option<u32>) {
	let pre = pipe::pre_validate(block, constants, &test_verifiers());
	chain.receive_block(block, &pre, None)
}

/// Extend the canonical chain by `n` blocks, each opening a fresh sub-slot
/// so the iteration counters keep advancing.
pub fn grow_chain(constants: &ConsensusConstants, chain: &Blockchain, n: u32) {
	for _ in 0..n {
		let prev = chain.get_peak();
		let block = make_block(
			constants,
			chain,
			prev.as_ref(),
			BlockOpts {
				is_block: true,
				n_slots: 1,
				..Default::default()
			},
		);
		let (result, err, _) = push_block(constants, chain, &block);
		assert_eq!(
			result,
			ReceiveBlockResult::NewPeak,
			"chain extension failed: {:?}",
			err
		);
	}
}
