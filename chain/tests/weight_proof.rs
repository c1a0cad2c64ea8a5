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

use arbor_chain::{Blockchain, WeightProofVerifier};
use arbor_core::consensus::ConsensusConstants;

use self::common::{grow_chain, init_chain};

fn chain_with_proof(n: u32) -> (Arc<ConsensusConstants>, Arc<Blockchain>, WeightProofVerifier) {
	let constants = Arc::new(ConsensusConstants::testing());
	let chain = Arc::new(init_chain(constants.clone()));
	grow_chain(&constants, &chain, n);
	let verifier = WeightProofVerifier::new(constants.clone(), chain.clone());
	(constants, chain, verifier)
}

#[test]
fn own_proof_validates_with_tip_fork_point() {
	let (_, chain, verifier) = chain_with_proof(20);
	let peak = chain.get_peak().unwrap();

	let wp = verifier
		.get_proof_of_weight(&peak.header_hash)
		.unwrap()
		.expect("proof for own tip");
	assert_eq!(wp.tip_height(), Some(peak.sub_block_height));
	assert_eq!(wp.tip_weight(), Some(peak.weight));

	// our whole recent chain overlaps, so the fork point is the tip
	let (valid, fork_point) = verifier.validate_weight_proof(&wp).unwrap();
	assert!(valid);
	assert_eq!(fork_point, peak.sub_block_height);
}

#[test]
fn tampered_weight_fails_validation() {
	let (_, chain, verifier) = chain_with_proof(20);
	let peak = chain.get_peak().unwrap();

	let mut wp = verifier
		.get_proof_of_weight(&peak.header_hash)
		.unwrap()
		.unwrap();
	let last = wp.recent_chain_data.len() - 1;
	wp.recent_chain_data[last].reward_chain_sub_block.weight =
		wp.recent_chain_data[last - 1].reward_chain_sub_block.weight;

	let (valid, _) = verifier.validate_weight_proof(&wp).unwrap();
	assert!(!valid);
}

#[test]
fn foreign_chain_has_zero_fork_point() {
	let constants = Arc::new(ConsensusConstants::testing());

	// a fully disjoint chain produces a proof with no overlap
	let foreign = Arc::new(init_chain(constants.clone()));
	{
		// offset every block with a different nonce so the chains share
		// nothing
		let mut prev = None;
		for i in 0..15u64 {
			let block = common::make_block(
				&constants,
				&foreign,
				prev.as_ref(),
				common::BlockOpts {
					nonce: 1000 + i,
					..Default::default()
				},
			);
			let (result, err, _) = common::push_block(&constants, &foreign, &block);
			assert_eq!(result, arbor_chain::ReceiveBlockResult::NewPeak, "{:?}", err);
			prev = foreign.get_peak();
		}
	}
	let foreign_verifier = WeightProofVerifier::new(constants.clone(), foreign.clone());
	let wp = foreign_verifier
		.get_proof_of_weight(&foreign.get_peak().unwrap().header_hash)
		.unwrap()
		.unwrap();

	let ours = Arc::new(init_chain(constants.clone()));
	grow_chain(&constants, &ours, 15);
	let our_verifier = WeightProofVerifier::new(constants, ours);

	let (valid, fork_point) = our_verifier.validate_weight_proof(&wp).unwrap();
	assert!(valid, "structurally fine, just unrelated");
	assert_eq!(fork_point, 0);
}

#[test]
fn empty_recent_chain_is_invalid() {
	let (_, _, verifier) = chain_with_proof(5);
	let wp = arbor_chain::WeightProof {
		sub_epochs: vec![],
		recent_chain_data: vec![],
	};
	let (valid, fork) = verifier.validate_weight_proof(&wp).unwrap();
	assert!(!valid);
	assert_eq!(fork, 0);
}
