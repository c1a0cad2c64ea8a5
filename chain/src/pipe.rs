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

//! Implementation of the chain block acceptance (or refusal) pipeline.
//!
//! The chain-free checks live in [`pre_validate`] so they can run on a
//! worker pool without any locks; everything that needs the previous record
//! runs in [`build_record`] under the chain's write lock.

use arbor_core::consensus::{
	calculate_ip_iters, is_overflow_sub_block, ConsensusConstants,
};
use arbor_core::core::{
	FullBlock, Hashed, SubBlockRecord, SubEpochSummary, UnfinishedBlock, Verifiers,
};

use crate::error::ErrorKind;
use crate::types::PreValidationResult;

/// Contextual information required to turn a pre-validated block into a
/// record, all of it read from the chain before the block is committed.
pub struct BlockContext<'a> {
	/// Consensus constants in force.
	pub constants: &'a ConsensusConstants,
	/// Record of the previous sub-block, `None` only for genesis.
	pub prev: Option<SubBlockRecord>,
	/// Difficulty in force for this sub-block.
	pub difficulty: u64,
	/// Sub-slot iterations in force for this sub-block.
	pub sub_slot_iters: u64,
	/// Sub-epoch summary this sub-block finalizes, if any.
	pub ses: Option<SubEpochSummary>,
}

// block processing pipeline
// 1. chain-free validity: proof of space, signatures, VDF witnesses
// 2. does it connect, and what does the chain say its parameters are
// 3. recompute the trunk values and refuse anything that disagrees
// 4. store it, then let the chain decide whether the peak moved

/// First, chain-free level of block validation. The checks are arranged by
/// cost to keep the DoS surface as small as possible. Returns the iteration
/// requirement of the proof of space on success.
pub fn pre_validate(
	block: &FullBlock,
	constants: &ConsensusConstants,
	verifiers: &Verifiers,
) -> PreValidationResult {
	let rcsb = &block.reward_chain_sub_block;

	if rcsb.signage_point_index >= constants.num_sps_sub_slot {
		return PreValidationResult::fail(ErrorKind::InvalidSignagePointIndex(
			rcsb.signage_point_index,
		));
	}

	if block.foliage_sub_block.reward_block_hash != rcsb.hash() {
		return PreValidationResult::fail(ErrorKind::InvalidFoliageSignature);
	}

	let required_iters = match verifiers.pospace.required_iters(
		&rcsb.proof_of_space,
		&rcsb.pos_ss_cc_challenge_hash,
		rcsb.signage_point_index,
	) {
		Some(iters) => iters,
		None => return PreValidationResult::fail(ErrorKind::InvalidProofOfSpace),
	};

	if !verifiers.bls.verify(
		&rcsb.proof_of_space.plot_public_key,
		&block.foliage_sub_block.foliage_sub_block_data.bytes(),
		&block.foliage_sub_block.foliage_sub_block_signature,
	) {
		return PreValidationResult::fail(ErrorKind::InvalidFoliageSignature);
	}

	if !verifiers
		.vdf
		.verify(&rcsb.challenge_chain_ip_vdf, &block.challenge_chain_ip_proof)
		|| !verifiers
			.vdf
			.verify(&rcsb.reward_chain_ip_vdf, &block.reward_chain_ip_proof)
	{
		return PreValidationResult::fail(ErrorKind::InvalidVdf);
	}

	if let Err(e) = validate_finished_sub_slots(block, verifiers) {
		return PreValidationResult::fail(e);
	}

	PreValidationResult::pass(required_iters)
}

/// Validates the internal consistency of a block's finished sub-slots: the
/// reward chain must commit to the challenge chain, consecutive slots must
/// chain into each other, and every end-of-slot VDF must verify.
pub fn validate_finished_sub_slots(
	block: &FullBlock,
	verifiers: &Verifiers,
) -> Result<(), ErrorKind> {
	let mut prev_cc_hash = None;
	for bundle in &block.finished_sub_slots {
		if bundle.reward_chain.challenge_chain_sub_slot_hash != bundle.challenge_chain.hash() {
			return Err(ErrorKind::InvalidSubSlotLinkage);
		}
		if let Some(prev) = prev_cc_hash {
			if bundle.challenge_chain.end_of_slot_vdf.challenge != prev {
				return Err(ErrorKind::InvalidSubSlotLinkage);
			}
		}
		if !verifiers.vdf.verify(
			&bundle.challenge_chain.end_of_slot_vdf,
			&bundle.proofs.challenge_chain_slot_proof,
		) || !verifiers.vdf.verify(
			&bundle.reward_chain.end_of_slot_vdf,
			&bundle.proofs.reward_chain_slot_proof,
		) {
			return Err(ErrorKind::InvalidVdf);
		}
		prev_cc_hash = Some(bundle.challenge_chain.hash());
	}
	Ok(())
}

/// Chain-free validation of an unfinished block: proof of space, foliage
/// signature and any signage point VDFs it carries. Returns the iteration
/// requirement on success.
pub fn validate_unfinished(
	block: &UnfinishedBlock,
	constants: &ConsensusConstants,
	verifiers: &Verifiers,
) -> Result<u64, ErrorKind> {
	let rcsb = &block.reward_chain_sub_block;

	if rcsb.signage_point_index >= constants.num_sps_sub_slot {
		return Err(ErrorKind::InvalidSignagePointIndex(rcsb.signage_point_index));
	}

	let required_iters = verifiers
		.pospace
		.required_iters(
			&rcsb.proof_of_space,
			&rcsb.pos_ss_cc_challenge_hash,
			rcsb.signage_point_index,
		)
		.ok_or(ErrorKind::InvalidProofOfSpace)?;

	if !verifiers.bls.verify(
		&rcsb.proof_of_space.plot_public_key,
		&block.foliage_sub_block.foliage_sub_block_data.bytes(),
		&block.foliage_sub_block.foliage_sub_block_signature,
	) {
		return Err(ErrorKind::InvalidFoliageSignature);
	}

	if let (Some(vdf), Some(proof)) = (&rcsb.challenge_chain_sp_vdf, &block.challenge_chain_sp_proof)
	{
		if !verifiers.vdf.verify(vdf, proof) {
			return Err(ErrorKind::InvalidVdf);
		}
	}
	if let (Some(vdf), Some(proof)) = (&rcsb.reward_chain_sp_vdf, &block.reward_chain_sp_proof) {
		if !verifiers.vdf.verify(vdf, proof) {
			return Err(ErrorKind::InvalidVdf);
		}
	}

	Ok(required_iters)
}

/// Recomputes the trunk values of a block from its parent's record and
/// refuses the block if its claims disagree. On success, the derived record
/// is what the chain stores; it is never mutated afterwards.
pub fn build_record(
	block: &FullBlock,
	required_iters: u64,
	ctx: &BlockContext<'_>,
) -> Result<SubBlockRecord, ErrorKind> {
	let constants = ctx.constants;
	let rcsb = &block.reward_chain_sub_block;
	let new_slots = block.finished_sub_slots.len() as u128;
	let ssi = ctx.sub_slot_iters;

	let (sub_block_height, weight, slot_start, deficit) = match ctx.prev {
		Some(ref prev) => {
			let height = prev
				.sub_block_height
				.checked_add(1)
				.ok_or(ErrorKind::InvalidBlockHeight)?;
			let weight = prev.weight + ctx.difficulty as u128;
			let slot_start = if new_slots > 0 {
				let prev_slot_end =
					prev.ip_sub_slot_total_iters(constants) + prev.sub_slot_iters as u128;
				prev_slot_end + (new_slots - 1) * ssi as u128
			} else {
				prev.ip_sub_slot_total_iters(constants)
			};
			let deficit = if new_slots > 0 && prev.deficit == 0 {
				constants.min_sub_blocks_per_challenge_block - 1
			} else {
				prev.deficit.saturating_sub(1)
			};
			(height, weight, slot_start, deficit)
		}
		None => (
			0,
			ctx.difficulty as u128,
			new_slots * ssi as u128,
			constants.min_sub_blocks_per_challenge_block - 1,
		),
	};

	let ip_iters = calculate_ip_iters(constants, ssi, rcsb.signage_point_index, required_iters);
	let total_iters = slot_start + ip_iters as u128;

	if rcsb.sub_block_height != sub_block_height {
		return Err(ErrorKind::InvalidBlockHeight);
	}
	if rcsb.weight != weight {
		return Err(ErrorKind::InvalidWeight);
	}
	if rcsb.total_iters != total_iters {
		return Err(ErrorKind::InvalidTotalIters);
	}

	Ok(SubBlockRecord {
		header_hash: block.header_hash(),
		prev_hash: block.prev_header_hash(),
		sub_block_height,
		weight,
		total_iters,
		signage_point_index: rcsb.signage_point_index,
		required_iters,
		sub_slot_iters: ssi,
		deficit,
		overflow: is_overflow_sub_block(constants, rcsb.signage_point_index),
		first_in_sub_slot: new_slots > 0 || sub_block_height == 0,
		reward_infusion_new_challenge: rcsb.hash(),
		sub_epoch_summary_included: ctx.ses.clone(),
	})
}
