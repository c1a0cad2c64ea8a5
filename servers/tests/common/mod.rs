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

//! Shared fixtures for the node tests: accept-all verifiers, a block
//! builder the chain agrees with, a scripted mock peer and a node factory.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use arbor_chain::{
	pipe, Blockchain, MemBlockStore, MemCoinStore, ReceiveBlockResult, WeightProofVerifier,
};
use arbor_core::consensus::{calculate_ip_iters, calculate_sp_iters, ConsensusConstants};
use arbor_core::core::{
	BlsVerify, ChallengeChainSubSlot, EndOfSubSlotBundle, FoliageBlock, FoliageSubBlock,
	FoliageSubBlockData, FullBlock, Hash, Hashed, PoolTarget, ProofOfSpace, ProofOfSpaceVerify,
	RewardChainSubBlock, RewardChainSubBlockUnfinished, RewardChainSubSlot, SerializedProgram,
	SubBlockRecord, SubSlotProofs, UnfinishedBlock, VdfInfo, VdfProof, VdfVerify, Verifiers,
};
use arbor_p2p::msg::{
	Message, RequestProofOfWeight, RequestSubBlock, RequestSubBlocks, RejectSubBlocks,
	RespondProofOfWeight, RespondSubBlock, RespondSubBlocks,
};
use arbor_p2p::{Error as P2PError, NodeType, Peer, PeerId, SubBlocksReply};
use arbor_pool::{Npc, PoolError, ProgramRunner};
use arbor_servers::{FullNode, ServerConfig};

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

/// Script VM stand-in: every program is empty.
pub struct NoopRunner;

impl ProgramRunner for NoopRunner {
	fn run_program(
		&self,
		_program: &SerializedProgram,
		_args: &[u8],
		_max_cost: u64,
	) -> Result<(u64, Vec<u8>), PoolError> {
		Ok((0, vec![]))
	}

	fn tree_hash(&self, program: &SerializedProgram) -> Hash {
		program.hash()
	}

	fn get_name_puzzle_conditions(
		&self,
		_program: &SerializedProgram,
		_max_cost: u64,
	) -> Result<(u64, Vec<Npc>), PoolError> {
		Ok((0, vec![]))
	}
}

fn nonce_hash(prev: &Hash, nonce: u64, salt: u64) -> Hash {
	let mut data = prev.to_vec();
	data.extend_from_slice(&nonce.to_be_bytes());
	data.extend_from_slice(&salt.to_be_bytes());
	data.hash()
}

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
			is_block: true,
			timestamp: 1_600_000_000,
		}
	}
}

pub fn slot_bundle(challenge_seed: Hash, sub_slot_iters: u64) -> EndOfSubSlotBundle {
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

/// Build a sub-block on top of `prev` that the chain's recomputation will
/// agree with.
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
		transactions_generator: if opts.is_block {
			Some(SerializedProgram(vec![]))
		} else {
			None
		},
	}
}

/// Build an unfinished sub-block on top of `prev`; the trunk only depends
/// on the proof, so two calls with different `farmer_byte` share it.
pub fn make_unfinished(
	constants: &ConsensusConstants,
	chain: &Blockchain,
	prev: Option<&SubBlockRecord>,
	signage_point_index: u8,
	required_iters: u64,
	farmer_byte: u8,
) -> UnfinishedBlock {
	let (_, sub_slot_iters) = match prev {
		Some(p) => (
			chain.get_next_difficulty(&p.header_hash, false),
			chain.get_next_slot_iters(&p.header_hash, false),
		),
		None => (
			constants.difficulty_starting,
			constants.sub_slot_iters_starting,
		),
	};
	let slot_start = match prev {
		Some(p) => p.ip_sub_slot_total_iters(constants),
		None => 0,
	};
	let sp_iters = calculate_sp_iters(constants, sub_slot_iters, signage_point_index);
	let total_iters = slot_start + sp_iters as u128;

	let prev_hash = prev
		.map(|p| p.header_hash)
		.unwrap_or(constants.genesis_prev_hash);
	let pos_challenge = match prev {
		Some(p) => nonce_hash(&p.header_hash, 0, 99),
		None => constants.first_cc_challenge,
	};

	let proof = required_iters.to_be_bytes().to_vec();
	let reward_chain_sub_block = RewardChainSubBlockUnfinished {
		total_iters,
		signage_point_index,
		pos_ss_cc_challenge_hash: pos_challenge,
		proof_of_space: ProofOfSpace {
			challenge: pos_challenge,
			pool_public_key: vec![7; 48],
			plot_public_key: vec![8; 48],
			size: 32,
			proof,
		},
		challenge_chain_sp_vdf: if signage_point_index > 0 {
			Some(VdfInfo {
				challenge: pos_challenge,
				number_of_iterations: sp_iters,
				output: vec![3],
			})
		} else {
			None
		},
		challenge_chain_sp_signature: vec![5; 96],
		reward_chain_sp_vdf: if signage_point_index > 0 {
			Some(VdfInfo {
				challenge: nonce_hash(&pos_challenge, 0, 3),
				number_of_iterations: sp_iters,
				output: vec![4],
			})
		} else {
			None
		},
		reward_chain_sp_signature: vec![5; 96],
	};

	let foliage_sub_block_data = FoliageSubBlockData {
		unfinished_reward_block_hash: reward_chain_sub_block.hash(),
		pool_target: PoolTarget {
			puzzle_hash: Hash([4; 32]),
			max_height: 0,
		},
		pool_signature: Some(vec![9; 96]),
		farmer_reward_puzzle_hash: Hash([farmer_byte; 32]),
	};
	let foliage_sub_block = FoliageSubBlock {
		prev_sub_block_hash: prev_hash,
		reward_block_hash: Hash([0; 32]),
		foliage_sub_block_data,
		foliage_sub_block_signature: vec![6; 96],
		foliage_block_hash: None,
		foliage_block_signature: None,
	};

	UnfinishedBlock {
		finished_sub_slots: vec![],
		reward_chain_sub_block,
		challenge_chain_sp_proof: Some(VdfProof {
			witness_type: 1,
			witness: vec![0],
		}),
		reward_chain_sp_proof: Some(VdfProof {
			witness_type: 1,
			witness: vec![0],
		}),
		foliage_sub_block,
		foliage_block: None,
		transactions_generator: None,
	}
}

/// Extend a chain by `n` canonical blocks, each opening a fresh sub-slot
/// so the iteration counters keep advancing.
pub fn grow_chain(constants: &ConsensusConstants, chain: &Blockchain, n: u32) {
	for _ in 0..n {
		let prev = chain.get_peak();
		grow_one(
			constants,
			chain,
			prev.as_ref(),
			BlockOpts {
				n_slots: 1,
				..Default::default()
			},
		);
	}
}

/// Extend a chain by one block built with the given options.
pub fn grow_one(
	constants: &ConsensusConstants,
	chain: &Blockchain,
	prev: Option<&SubBlockRecord>,
	opts: BlockOpts,
) -> FullBlock {
	let block = make_block(constants, chain, prev, opts);
	let pre = pipe::pre_validate(&block, constants, &test_verifiers());
	let (result, err, _) = chain.receive_block(&block, &pre, None);
	assert_eq!(
		result,
		ReceiveBlockResult::NewPeak,
		"chain extension failed: {:?}",
		err
	);
	block
}

/// A fresh chain over in-memory stores.
pub fn new_chain(constants: Arc<ConsensusConstants>) -> Arc<Blockchain> {
	Arc::new(
		Blockchain::create(
			Arc::new(MemBlockStore::new()),
			Arc::new(MemCoinStore::new()),
			constants,
			test_verifiers(),
		)
		.unwrap(),
	)
}

/// Node under test plus its recorded state changes.
pub struct TestNode {
	pub node: Arc<FullNode>,
	pub constants: Arc<ConsensusConstants>,
	pub events: Arc<Mutex<Vec<String>>>,
}

pub fn build_node(constants: Arc<ConsensusConstants>) -> TestNode {
	let _ = env_logger::try_init();
	let node = FullNode::new(
		ServerConfig::default(),
		constants.clone(),
		Arc::new(MemBlockStore::new()),
		Arc::new(MemCoinStore::new()),
		test_verifiers(),
		Arc::new(NoopRunner),
	)
	.unwrap();
	let events = Arc::new(Mutex::new(vec![]));
	let sink = events.clone();
	node.set_state_changed_callback(Box::new(move |change| {
		sink.lock().unwrap().push(change.to_owned());
	}));
	TestNode {
		node,
		constants,
		events,
	}
}

/// Feed the node's chain the canonical prefix of a remote chain, without
/// any peak post-processing.
pub fn adopt_chain(
	constants: &ConsensusConstants,
	node: &Arc<FullNode>,
	remote: &Blockchain,
	up_to: u32,
) {
	let chain = node.blockchain();
	for height in 0..=up_to {
		let hash = remote.height_to_hash(height).expect("canonical block");
		let block = remote.get_block(&hash).unwrap().unwrap();
		let pre = pipe::pre_validate(&block, constants, &test_verifiers());
		let (result, err, _) = chain.receive_block(&block, &pre, None);
		assert_eq!(
			result,
			ReceiveBlockResult::NewPeak,
			"adopting height {} failed: {:?}",
			height,
			err
		);
	}
}

/// A scripted peer serving blocks out of a chain instance.
pub struct MockPeer {
	id: PeerId,
	node_type: NodeType,
	remote: Option<Arc<Blockchain>>,
	constants: Arc<ConsensusConstants>,
	pub sent: Mutex<Vec<Message>>,
	closed: AtomicBool,
	pub wp_requests: AtomicUsize,
	// every ranged request fails while this is set
	pub fail_sub_blocks: AtomicBool,
	// report a tip one height off in weight proofs
	pub lie_wp_height: bool,
}

impl MockPeer {
	pub fn new(
		id_byte: u8,
		node_type: NodeType,
		remote: Option<Arc<Blockchain>>,
		constants: Arc<ConsensusConstants>,
	) -> Arc<MockPeer> {
		Arc::new(MockPeer {
			id: PeerId([id_byte; 32]),
			node_type,
			remote,
			constants,
			sent: Mutex::new(vec![]),
			closed: AtomicBool::new(false),
			wp_requests: AtomicUsize::new(0),
			fail_sub_blocks: AtomicBool::new(false),
			lie_wp_height: false,
		})
	}

	pub fn new_lying(
		id_byte: u8,
		remote: Arc<Blockchain>,
		constants: Arc<ConsensusConstants>,
	) -> Arc<MockPeer> {
		Arc::new(MockPeer {
			id: PeerId([id_byte; 32]),
			node_type: NodeType::FullNode,
			remote: Some(remote),
			constants,
			sent: Mutex::new(vec![]),
			closed: AtomicBool::new(false),
			wp_requests: AtomicUsize::new(0),
			fail_sub_blocks: AtomicBool::new(false),
			lie_wp_height: true,
		})
	}

	pub fn sent_count(&self) -> usize {
		self.sent.lock().unwrap().len()
	}

	fn canonical_block(&self, height: u32) -> Option<FullBlock> {
		let remote = self.remote.as_ref()?;
		let hash = remote.height_to_hash(height)?;
		remote.get_block(&hash).ok().flatten()
	}
}

#[async_trait]
impl Peer for MockPeer {
	fn peer_node_id(&self) -> PeerId {
		self.id
	}

	fn node_type(&self) -> NodeType {
		self.node_type
	}

	fn peer_host(&self) -> String {
		format!("mock-{}", self.id)
	}

	fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	async fn close(&self) {
		self.closed.store(true, Ordering::SeqCst);
	}

	async fn send(&self, msg: Message) -> Result<(), P2PError> {
		if self.is_closed() {
			return Err(P2PError::ConnectionClosed);
		}
		self.sent.lock().unwrap().push(msg);
		Ok(())
	}

	async fn request_sub_block(
		&self,
		request: RequestSubBlock,
	) -> Result<RespondSubBlock, P2PError> {
		if self.is_closed() {
			return Err(P2PError::ConnectionClosed);
		}
		match self.canonical_block(request.sub_block_height) {
			Some(sub_block) => Ok(RespondSubBlock { sub_block }),
			None => Err(P2PError::Internal(format!(
				"no block at height {}",
				request.sub_block_height
			))),
		}
	}

	async fn request_sub_blocks(
		&self,
		request: RequestSubBlocks,
	) -> Result<SubBlocksReply, P2PError> {
		if self.is_closed() {
			return Err(P2PError::ConnectionClosed);
		}
		if self.fail_sub_blocks.load(Ordering::SeqCst) {
			return Err(P2PError::ConnectionClosed);
		}
		let mut sub_blocks = vec![];
		for height in request.start_sub_height..=request.end_sub_height {
			match self.canonical_block(height) {
				Some(b) => sub_blocks.push(b),
				None => {
					return Ok(SubBlocksReply::Reject(RejectSubBlocks {
						start_sub_height: request.start_sub_height,
						end_sub_height: request.end_sub_height,
					}));
				}
			}
		}
		Ok(SubBlocksReply::SubBlocks(RespondSubBlocks {
			start_sub_height: request.start_sub_height,
			end_sub_height: request.end_sub_height,
			sub_blocks,
		}))
	}

	async fn request_proof_of_weight(
		&self,
		request: RequestProofOfWeight,
	) -> Result<RespondProofOfWeight, P2PError> {
		self.wp_requests.fetch_add(1, Ordering::SeqCst);
		let remote = self
			.remote
			.as_ref()
			.ok_or_else(|| P2PError::Internal("no chain to prove".to_owned()))?;
		let verifier = WeightProofVerifier::new(self.constants.clone(), remote.clone());
		let mut wp = verifier
			.get_proof_of_weight(&request.tip)
			.map_err(|e| P2PError::Internal(format!("{}", e)))?
			.ok_or_else(|| P2PError::Internal("unknown tip".to_owned()))?;
		if self.lie_wp_height {
			let last = wp.recent_chain_data.len() - 1;
			wp.recent_chain_data[last]
				.reward_chain_sub_block
				.sub_block_height += 1;
		}
		Ok(RespondProofOfWeight {
			wp,
			tip: request.tip,
		})
	}
}

/// The peak announcement for a chain's current tip.
pub fn peak_announcement(chain: &Blockchain) -> arbor_p2p::msg::NewPeak {
	let peak = chain.get_peak().unwrap();
	let full = chain.get_full_peak().unwrap().unwrap();
	arbor_p2p::msg::NewPeak {
		header_hash: peak.header_hash,
		sub_block_height: peak.sub_block_height,
		weight: peak.weight,
		fork_point_hint: peak.sub_block_height.saturating_sub(1),
		unfinished_reward_hash: full.reward_chain_sub_block.get_unfinished().hash(),
	}
}
