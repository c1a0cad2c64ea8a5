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

mod common;

use std::sync::Arc;

use arbor_chain::{ErrorKind, ReceiveBlockResult};
use arbor_core::consensus::ConsensusConstants;
use arbor_core::core::Hash;

use self::common::{grow_chain, init_chain, make_block, push_block, BlockOpts};

#[test]
fn genesis_is_first_peak() {
	let constants = Arc::new(ConsensusConstants::testing());
	let chain = init_chain(constants.clone());
	assert!(chain.get_peak().is_none());

	let genesis = make_block(&constants, &chain, None, BlockOpts::default());
	let (result, err, fork) = push_block(&constants, &chain, &genesis);
	assert_eq!(result, ReceiveBlockResult::NewPeak, "{:?}", err);
	assert_eq!(fork, Some(0));

	let peak = chain.get_peak().unwrap();
	assert_eq!(peak.sub_block_height, 0);
	assert!(peak.first_in_sub_slot);
	assert_eq!(peak.weight, constants.difficulty_starting as u128);
}

#[test]
fn check_known() {
	let constants = Arc::new(ConsensusConstants::testing());
	let chain = init_chain(constants.clone());
	grow_chain(&constants, &chain, 3);

	let peak_before = chain.get_peak().unwrap();
	let latest = chain.get_full_peak().unwrap().unwrap();

	// attempt to reprocess the latest block
	let (result, err, fork) = push_block(&constants, &chain, &latest);
	assert_eq!(result, ReceiveBlockResult::AlreadyHaveBlock);
	assert!(err.is_none());
	assert!(fork.is_none());

	// no side effects fired
	assert_eq!(chain.get_peak().unwrap(), peak_before);
}

#[test]
fn disconnected_block_is_reported() {
	let constants = Arc::new(ConsensusConstants::testing());
	let chain = init_chain(constants.clone());
	grow_chain(&constants, &chain, 2);

	// a block whose parent record we never saw
	let stranger = init_chain(constants.clone());
	grow_chain(&constants, &stranger, 5);
	let orphan_parent = stranger.get_peak().unwrap();
	let block = make_block(&constants, &stranger, Some(&orphan_parent), BlockOpts::default());

	let (result, err, _) = push_block(&constants, &chain, &block);
	assert_eq!(result, ReceiveBlockResult::DisconnectedBlock);
	assert_eq!(err, Some(ErrorKind::InvalidPrevBlockHash));
}

#[test]
fn invalid_proof_of_space_is_rejected() {
	let constants = Arc::new(ConsensusConstants::testing());
	let chain = init_chain(constants.clone());
	grow_chain(&constants, &chain, 1);

	let prev = chain.get_peak().unwrap();
	let mut block = make_block(&constants, &chain, Some(&prev), BlockOpts::default());
	// a proof too short for any quality lookup
	block.reward_chain_sub_block.proof_of_space.proof = vec![1, 2];
	block.foliage_sub_block.reward_block_hash = {
		use arbor_core::core::Hashed;
		block.reward_chain_sub_block.hash()
	};

	let (result, err, _) = push_block(&constants, &chain, &block);
	assert_eq!(result, ReceiveBlockResult::InvalidBlock);
	assert_eq!(err, Some(ErrorKind::InvalidProofOfSpace));
}

#[test]
fn wrong_claimed_weight_is_rejected() {
	let constants = Arc::new(ConsensusConstants::testing());
	let chain = init_chain(constants.clone());
	grow_chain(&constants, &chain, 1);

	let prev = chain.get_peak().unwrap();
	let mut block = make_block(&constants, &chain, Some(&prev), BlockOpts::default());
	block.reward_chain_sub_block.weight += 1;
	block.foliage_sub_block.reward_block_hash = {
		use arbor_core::core::Hashed;
		block.reward_chain_sub_block.hash()
	};

	let (result, err, _) = push_block(&constants, &chain, &block);
	assert_eq!(result, ReceiveBlockResult::InvalidBlock);
	assert_eq!(err, Some(ErrorKind::InvalidWeight));
}

#[test]
fn peak_weight_is_monotonic_and_heights_connect() {
	let constants = Arc::new(ConsensusConstants::testing());
	let chain = init_chain(constants.clone());

	let mut last_weight = 0u128;
	for _ in 0..20 {
		let prev = chain.get_peak();
		let block = make_block(&constants, &chain, prev.as_ref(), BlockOpts::default());
		let (result, _, _) = push_block(&constants, &chain, &block);
		assert_eq!(result, ReceiveBlockResult::NewPeak);

		let peak = chain.get_peak().unwrap();
		assert!(peak.weight > last_weight);
		last_weight = peak.weight;

		// every stored record connects to its parent
		if peak.sub_block_height > 0 {
			let parent = chain.try_sub_block(&peak.prev_hash).unwrap();
			assert_eq!(parent.sub_block_height + 1, peak.sub_block_height);
		} else {
			assert_eq!(peak.prev_hash, constants.genesis_prev_hash);
		}
	}
}

#[test]
fn fork_with_equal_weight_keeps_current_peak() {
	let constants = Arc::new(ConsensusConstants::testing());
	let chain = init_chain(constants.clone());
	grow_chain(&constants, &chain, 3);

	let peak = chain.get_peak().unwrap();
	let fork_parent = chain.try_sub_block(&peak.prev_hash).unwrap();

	// a sibling of the current peak: same height, same weight
	let sibling = make_block(
		&constants,
		&chain,
		Some(&fork_parent),
		BlockOpts {
			nonce: 42,
			..Default::default()
		},
	);
	let (result, err, _) = push_block(&constants, &chain, &sibling);
	assert_eq!(result, ReceiveBlockResult::AddedAsOrphan, "{:?}", err);
	assert_eq!(chain.get_peak().unwrap().header_hash, peak.header_hash);
}

#[test]
fn heavier_fork_reorganizes() {
	let constants = Arc::new(ConsensusConstants::testing());
	let chain = init_chain(constants.clone());
	grow_chain(&constants, &chain, 5);

	let old_peak = chain.get_peak().unwrap();
	assert_eq!(old_peak.sub_block_height, 4);

	// fork off at height 2 and build a heavier branch
	let fork_point = chain.try_sub_block(&chain.height_to_hash(2).unwrap()).unwrap();
	let mut prev = fork_point.clone();
	let mut last_fork = None;
	for i in 0..3 {
		let block = make_block(
			&constants,
			&chain,
			Some(&prev),
			BlockOpts {
				nonce: 100 + i,
				..Default::default()
			},
		);
		let (result, err, fork) = push_block(&constants, &chain, &block);
		prev = chain.try_sub_block(&block.header_hash()).unwrap();
		last_fork = fork;
		if i < 2 {
			assert_eq!(result, ReceiveBlockResult::AddedAsOrphan, "{:?}", err);
		} else {
			// third fork block outweighs the old 5-block chain
			assert_eq!(result, ReceiveBlockResult::NewPeak, "{:?}", err);
		}
	}

	assert_eq!(last_fork, Some(2));
	let new_peak = chain.get_peak().unwrap();
	assert_eq!(new_peak.sub_block_height, 5);
	assert!(new_peak.weight > old_peak.weight);

	// the canonical height index follows the new branch
	assert_eq!(chain.height_to_hash(5), Some(new_peak.header_hash));
	let at_three = chain.height_to_hash(3).unwrap();
	assert_ne!(Some(at_three), chain.height_to_hash(4));
	assert_ne!(at_three, old_peak.prev_hash);
}

#[test]
fn single_block_extension_reports_prev_height_as_fork() {
	let constants = Arc::new(ConsensusConstants::testing());
	let chain = init_chain(constants.clone());
	grow_chain(&constants, &chain, 4);

	let prev = chain.get_peak().unwrap();
	let block = make_block(&constants, &chain, Some(&prev), BlockOpts::default());
	let (result, _, fork) = push_block(&constants, &chain, &block);
	assert_eq!(result, ReceiveBlockResult::NewPeak);
	assert_eq!(fork, Some(prev.sub_block_height));
}

#[test]
fn clean_records_keeps_persisted_copies() {
	let constants = Arc::new(ConsensusConstants::testing());
	let chain = init_chain(constants.clone());
	grow_chain(&constants, &chain, 10);

	let early_hash = chain.height_to_hash(1).unwrap();
	chain.clean_sub_block_records_below(5);

	// still resolvable through the store fallback
	assert!(chain.contains_sub_block(&early_hash));
	let record = chain.try_sub_block(&early_hash).unwrap();
	assert_eq!(record.sub_block_height, 1);

	// and the peak never goes anywhere
	assert!(chain.get_peak().is_some());
}

#[test]
fn warmup_restores_evicted_records() {
	let constants = Arc::new(ConsensusConstants::testing());
	let chain = init_chain(constants.clone());
	grow_chain(&constants, &chain, 10);

	chain.clean_sub_block_records_below(9);
	let before = chain.cached_record_count();
	chain.warmup(0).unwrap();
	assert!(chain.cached_record_count() > before);
}

#[test]
fn epoch_boundary_includes_summary() {
	let constants = Arc::new(ConsensusConstants::testing());
	let chain = init_chain(constants.clone());
	// one past the first sub-epoch boundary of the testing constants
	grow_chain(&constants, &chain, constants.sub_epoch_sub_blocks + 2);

	let boundary_hash = chain
		.height_to_hash(constants.sub_epoch_sub_blocks)
		.unwrap();
	let record = chain.try_sub_block(&boundary_hash).unwrap();
	let ses = record.sub_epoch_summary_included.expect("summary expected");
	assert!(ses.new_difficulty.is_none(), "not an epoch boundary yet");

	let off_boundary = chain
		.try_sub_block(&chain.height_to_hash(constants.sub_epoch_sub_blocks - 1).unwrap())
		.unwrap();
	assert!(off_boundary.sub_epoch_summary_included.is_none());
}

#[test]
fn pre_validate_batch_runs_in_parallel_workers() {
	let constants = Arc::new(ConsensusConstants::testing());
	let chain = init_chain(constants.clone());

	// build a short chain worth of blocks without committing them
	let mut blocks = vec![];
	let mut prev: Option<arbor_core::core::SubBlockRecord> = None;
	let staging = init_chain(constants.clone());
	for _ in 0..4 {
		let block = make_block(&constants, &staging, prev.as_ref(), BlockOpts::default());
		let (result, _, _) = push_block(&constants, &staging, &block);
		assert_eq!(result, ReceiveBlockResult::NewPeak);
		prev = staging.get_peak();
		blocks.push(block);
	}

	let rt = tokio::runtime::Runtime::new().unwrap();
	let results = rt.block_on(chain.pre_validate_blocks(blocks)).unwrap();
	assert_eq!(results.len(), 4);
	for r in results {
		assert!(r.error.is_none());
		assert!(r.required_iters.is_some());
	}
}

#[test]
fn fork_point_hint_is_honored() {
	let constants = Arc::new(ConsensusConstants::testing());
	let chain = init_chain(constants.clone());
	grow_chain(&constants, &chain, 4);

	// build a sibling branch that overtakes, handing the fork hint in
	let fork_parent = chain
		.try_sub_block(&chain.height_to_hash(1).unwrap())
		.unwrap();
	let mut prev = fork_parent;
	let mut blocks = vec![];
	for i in 0..4 {
		let block = make_block(
			&constants,
			&chain,
			Some(&prev),
			BlockOpts {
				nonce: 500 + i,
				..Default::default()
			},
		);
		let pre = arbor_chain::pipe::pre_validate(&block, &constants, &common::test_verifiers());
		let (_, _, _) = chain.receive_block(&block, &pre, Some(1));
		prev = chain.try_sub_block(&block.header_hash()).unwrap();
		blocks.push(block);
	}
	let new_peak = chain.get_peak().unwrap();
	assert_eq!(new_peak.sub_block_height, 5);
	assert_eq!(new_peak.header_hash, prev.header_hash);
}

#[test]
fn genesis_marker_is_not_a_stored_record() {
	let constants = Arc::new(ConsensusConstants::testing());
	let chain = init_chain(constants.clone());
	grow_chain(&constants, &chain, 1);
	assert!(!chain.contains_sub_block(&Hash([0; 32])));
}
