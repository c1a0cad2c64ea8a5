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

//! Consensus constants and the proof-of-space-and-time iteration arithmetic.
//! The constants are injected into every consumer rather than read from a
//! global, so tests and alternative networks can run with their own set.

use crate::core::hash::{tag_hash, Hash, ZERO_HASH};

/// All consensus parameters for one network.
#[derive(Clone, Debug)]
pub struct ConsensusConstants {
	/// Number of signage points per sub-slot.
	pub num_sps_sub_slot: u8,
	/// Signage-point intervals between a signage point and its infusion.
	pub num_sp_intervals_extra: u8,
	/// Hard cap on sub-blocks per sub-slot.
	pub max_sub_slot_sub_blocks: u32,
	/// Infusions required after a challenge block before the slot can close.
	pub min_sub_blocks_per_challenge_block: u8,
	/// Sub-blocks per epoch (difficulty adjustment interval).
	pub epoch_sub_blocks: u32,
	/// Sub-blocks per sub-epoch (summary checkpoint interval).
	pub sub_epoch_sub_blocks: u32,
	/// Difficulty of the first epoch.
	pub difficulty_starting: u64,
	/// Sub-slot iterations of the first epoch.
	pub sub_slot_iters_starting: u64,
	/// Number of recent blocks carried verbatim in a weight proof.
	pub weight_proof_recent_blocks: u32,
	/// Window size for batched sub-block requests.
	pub max_block_count_per_requests: u32,
	/// Target size of the in-memory sub-block record cache.
	pub sub_blocks_cache_size: u32,
	/// Height below which transactions are frozen after launch.
	pub initial_freeze_period: u32,
	/// Previous-hash marker carried by the genesis sub-block.
	pub genesis_prev_hash: Hash,
	/// Challenge chain challenge of the first sub-slot.
	pub first_cc_challenge: Hash,
	/// Reward chain challenge of the first sub-slot.
	pub first_rc_challenge: Hash,
	/// Pool puzzle hash the pre-farm is paid to.
	pub genesis_pre_farm_pool_puzzle_hash: Hash,
}

impl ConsensusConstants {
	/// Constants for the main network.
	pub fn mainnet() -> ConsensusConstants {
		ConsensusConstants {
			num_sps_sub_slot: 64,
			num_sp_intervals_extra: 3,
			max_sub_slot_sub_blocks: 128,
			min_sub_blocks_per_challenge_block: 16,
			epoch_sub_blocks: 4608,
			sub_epoch_sub_blocks: 384,
			difficulty_starting: 2u64.pow(14),
			sub_slot_iters_starting: 2u64.pow(27),
			weight_proof_recent_blocks: 500,
			max_block_count_per_requests: 32,
			sub_blocks_cache_size: 500 + 3 * 128,
			initial_freeze_period: 10_000,
			genesis_prev_hash: ZERO_HASH,
			first_cc_challenge: tag_hash("arbor-first-cc-challenge"),
			first_rc_challenge: tag_hash("arbor-first-rc-challenge"),
			genesis_pre_farm_pool_puzzle_hash: tag_hash("arbor-pre-farm-pool"),
		}
	}

	/// Small parameters for fast, deterministic tests.
	pub fn testing() -> ConsensusConstants {
		ConsensusConstants {
			num_sps_sub_slot: 16,
			num_sp_intervals_extra: 3,
			max_sub_slot_sub_blocks: 50,
			min_sub_blocks_per_challenge_block: 4,
			epoch_sub_blocks: 64,
			sub_epoch_sub_blocks: 16,
			difficulty_starting: 16,
			sub_slot_iters_starting: 1024,
			weight_proof_recent_blocks: 500,
			max_block_count_per_requests: 32,
			sub_blocks_cache_size: 340,
			initial_freeze_period: 0,
			genesis_prev_hash: ZERO_HASH,
			first_cc_challenge: tag_hash("arbor-first-cc-challenge"),
			first_rc_challenge: tag_hash("arbor-first-rc-challenge"),
			genesis_pre_farm_pool_puzzle_hash: tag_hash("arbor-pre-farm-pool"),
		}
	}
}

/// An overflow sub-block has its signage point in the previous sub-slot and
/// its infusion point in the current one.
pub fn is_overflow_sub_block(constants: &ConsensusConstants, signage_point_index: u8) -> bool {
	signage_point_index >= constants.num_sps_sub_slot - constants.num_sp_intervals_extra
}

/// Iterations between two consecutive signage points.
pub fn calculate_sp_interval_iters(constants: &ConsensusConstants, sub_slot_iters: u64) -> u64 {
	sub_slot_iters / constants.num_sps_sub_slot as u64
}

/// Iterations from the start of the sub-slot to the given signage point.
pub fn calculate_sp_iters(
	constants: &ConsensusConstants,
	sub_slot_iters: u64,
	signage_point_index: u8,
) -> u64 {
	signage_point_index as u64 * calculate_sp_interval_iters(constants, sub_slot_iters)
}

/// Iterations from the start of the sub-slot to the infusion point of a
/// proof with the given quality. Wraps into the next slot for overflows.
pub fn calculate_ip_iters(
	constants: &ConsensusConstants,
	sub_slot_iters: u64,
	signage_point_index: u8,
	required_iters: u64,
) -> u64 {
	let sp_iters = calculate_sp_iters(constants, sub_slot_iters, signage_point_index);
	let extra = constants.num_sp_intervals_extra as u64
		* calculate_sp_interval_iters(constants, sub_slot_iters);
	(sp_iters + extra + required_iters) % sub_slot_iters
}

/// Whether a sub-block at this height closes a sub-epoch, making it carry a
/// sub-epoch summary.
pub fn can_finish_sub_epoch(constants: &ConsensusConstants, sub_block_height: u32) -> bool {
	sub_block_height > 0 && (sub_block_height + 1) % constants.sub_epoch_sub_blocks == 0
}

/// Whether a sub-block at this height closes a full epoch, allowing the
/// difficulty and sub-slot iterations to change at the next slot.
pub fn can_finish_epoch(constants: &ConsensusConstants, sub_block_height: u32) -> bool {
	sub_block_height > 0 && (sub_block_height + 1) % constants.epoch_sub_blocks == 0
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn overflow_boundary() {
		let c = ConsensusConstants::testing();
		// 16 signage points, 3 extra intervals: 13 and above overflow
		assert!(!is_overflow_sub_block(&c, 12));
		assert!(is_overflow_sub_block(&c, 13));
		assert!(is_overflow_sub_block(&c, 15));
	}

	#[test]
	fn sp_and_ip_iters() {
		let c = ConsensusConstants::testing();
		let ssi = c.sub_slot_iters_starting;
		let interval = calculate_sp_interval_iters(&c, ssi);
		assert_eq!(interval, 64);
		assert_eq!(calculate_sp_iters(&c, ssi, 4), 4 * 64);
		// infusion lands after the extra intervals plus the quality iters
		assert_eq!(calculate_ip_iters(&c, ssi, 4, 10), 4 * 64 + 3 * 64 + 10);
		// overflow wraps into the next slot
		let wrapped = calculate_ip_iters(&c, ssi, 15, 10);
		assert!(wrapped < 3 * interval + 10);
	}

	#[test]
	fn epoch_boundaries() {
		let c = ConsensusConstants::testing();
		assert!(!can_finish_sub_epoch(&c, 0));
		assert!(can_finish_sub_epoch(&c, 15));
		assert!(!can_finish_sub_epoch(&c, 16));
		assert!(can_finish_epoch(&c, 63));
		assert!(!can_finish_epoch(&c, 15));
	}
}
