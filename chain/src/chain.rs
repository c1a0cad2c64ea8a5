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

//! Facade and handler for the rest of the blockchain implementation
//! and mostly the chain pipeline.
//!
//! Readers may look at the record cache without the async lock because
//! records are never mutated in place; writers must hold [`Blockchain::lock`]
//! across any mutation sequence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::future::join_all;
use tokio::sync::Mutex;

use arbor_core::consensus::{
	can_finish_epoch, can_finish_sub_epoch, is_overflow_sub_block, ConsensusConstants,
};
use arbor_core::core::{
	EndOfSubSlotBundle, FullBlock, Hash, Hashed, SubBlockRecord, SubEpochSummary,
	UnfinishedBlock, Verifiers,
};

use crate::error::{Error, ErrorKind};
use crate::pipe::{self, BlockContext};
use crate::store::{BlockStore, CoinStore};
use crate::types::{PreValidationResult, ReceiveBlockResult};

/// Upper bound on backwards walks through block bodies when locating the
/// sub-slots around a block.
const MAX_SLOT_WALK_BLOCKS: u32 = 1_000;

struct ChainState {
	// in-memory record cache; a superset of the recent canonical chain,
	// orphans included
	records: HashMap<Hash, SubBlockRecord>,
	// canonical chain only
	height_to_hash: HashMap<u32, Hash>,
	peak: Option<Hash>,
}

/// Facade to the blockchain block processing pipeline and storage. Holds the
/// write lock callers must take around any mutation sequence.
pub struct Blockchain {
	/// Async write lock serializing block commits, unfinished-block
	/// validation, warmup and peak post-processing.
	pub lock: Mutex<()>,

	constants: Arc<ConsensusConstants>,
	verifiers: Verifiers,
	block_store: Arc<dyn BlockStore>,
	coin_store: Arc<dyn CoinStore>,
	state: RwLock<ChainState>,
}

impl Blockchain {
	/// Initializes the blockchain and returns a new instance. Picks the peak
	/// up from the block store when one was persisted and warms the record
	/// cache around it.
	pub fn create(
		block_store: Arc<dyn BlockStore>,
		coin_store: Arc<dyn CoinStore>,
		constants: Arc<ConsensusConstants>,
		verifiers: Verifiers,
	) -> Result<Blockchain, Error> {
		let chain = Blockchain {
			lock: Mutex::new(()),
			constants,
			verifiers,
			block_store,
			coin_store,
			state: RwLock::new(ChainState {
				records: HashMap::new(),
				height_to_hash: HashMap::new(),
				peak: None,
			}),
		};

		if let Some(peak_hash) = chain.block_store.load_peak()? {
			let peak = chain
				.block_store
				.get_record(&peak_hash)?
				.ok_or_else(|| ErrorKind::NotFound(format!("peak record {}", peak_hash)))?;
			{
				let mut state = chain.state.write().unwrap();
				state.peak = Some(peak_hash);
			}
			// rebuild the canonical height index by walking back from the peak
			let mut cur = peak.clone();
			loop {
				{
					let mut state = chain.state.write().unwrap();
					state.height_to_hash.insert(cur.sub_block_height, cur.header_hash);
					state.records.insert(cur.header_hash, cur.clone());
				}
				if cur.sub_block_height == 0 {
					break;
				}
				cur = chain
					.block_store
					.get_record(&cur.prev_hash)?
					.ok_or_else(|| ErrorKind::NotFound(format!("record {}", cur.prev_hash)))?;
			}
			info!(
				"blockchain init: peak {} at {}",
				peak.header_hash, peak.sub_block_height
			);
		} else {
			info!("blockchain init: empty store");
		}
		Ok(chain)
	}

	/// Consensus constants this chain runs under.
	pub fn constants(&self) -> Arc<ConsensusConstants> {
		self.constants.clone()
	}

	/// The coin store this chain reorganizes.
	pub fn coin_store(&self) -> Arc<dyn CoinStore> {
		self.coin_store.clone()
	}

	/// The block store backing this chain.
	pub fn block_store(&self) -> Arc<dyn BlockStore> {
		self.block_store.clone()
	}

	/// Whether the record of this header hash is known, in memory or
	/// persisted.
	pub fn contains_sub_block(&self, header_hash: &Hash) -> bool {
		if self.state.read().unwrap().records.contains_key(header_hash) {
			return true;
		}
		self.block_store
			.get_record(header_hash)
			.map(|r| r.is_some())
			.unwrap_or(false)
	}

	/// Record for the given header hash, if known.
	pub fn try_sub_block(&self, header_hash: &Hash) -> Option<SubBlockRecord> {
		if let Some(r) = self.state.read().unwrap().records.get(header_hash) {
			return Some(r.clone());
		}
		self.block_store.get_record(header_hash).ok().flatten()
	}

	/// Record for the given header hash, as an error if missing.
	pub fn sub_block_record(&self, header_hash: &Hash) -> Result<SubBlockRecord, Error> {
		self.try_sub_block(header_hash)
			.ok_or_else(|| ErrorKind::NotFound(format!("sub block {}", header_hash)).into())
	}

	/// Canonical header hash at the given height.
	pub fn height_to_hash(&self, sub_block_height: u32) -> Option<Hash> {
		self.state
			.read()
			.unwrap()
			.height_to_hash
			.get(&sub_block_height)
			.cloned()
	}

	/// The current peak record, `None` on an empty chain.
	pub fn get_peak(&self) -> Option<SubBlockRecord> {
		let peak_hash = self.state.read().unwrap().peak?;
		self.try_sub_block(&peak_hash)
	}

	/// Height of the current peak.
	pub fn peak_height(&self) -> Option<u32> {
		self.get_peak().map(|p| p.sub_block_height)
	}

	/// The full block at the current peak.
	pub fn get_full_peak(&self) -> Result<Option<FullBlock>, Error> {
		match self.state.read().unwrap().peak {
			Some(hash) => self.block_store.get_block(&hash),
			None => Ok(None),
		}
	}

	/// Full block by header hash.
	pub fn get_block(&self, header_hash: &Hash) -> Result<Option<FullBlock>, Error> {
		self.block_store.get_block(header_hash)
	}

	/// Runs the chain-free validation of a batch of blocks on the blocking
	/// worker pool, in parallel. No mutation, no locks.
	pub async fn pre_validate_blocks(
		&self,
		blocks: Vec<FullBlock>,
	) -> Result<Vec<PreValidationResult>, Error> {
		let mut handles = Vec::with_capacity(blocks.len());
		for block in blocks {
			let constants = self.constants.clone();
			let verifiers = self.verifiers.clone();
			handles.push(tokio::task::spawn_blocking(move || {
				pipe::pre_validate(&block, &constants, &verifiers)
			}));
		}
		let mut results = Vec::with_capacity(handles.len());
		for joined in join_all(handles).await {
			results.push(
				joined.map_err(|e| ErrorKind::Other(format!("pre-validation worker: {}", e)))?,
			);
		}
		Ok(results)
	}

	/// Attempt to add a new block to the chain. Must be called with
	/// [`Blockchain::lock`] held. Returns what happened to the block, an
	/// error tag when it was refused, and the fork height when the peak
	/// moved.
	pub fn receive_block(
		&self,
		block: &FullBlock,
		pre: &PreValidationResult,
		fork_point_hint: Option<u32>,
	) -> (ReceiveBlockResult, Option<ErrorKind>, Option<u32>) {
		let header_hash = block.header_hash();
		if self.contains_sub_block(&header_hash) {
			return (ReceiveBlockResult::AlreadyHaveBlock, None, None);
		}
		if let Some(ref e) = pre.error {
			return (ReceiveBlockResult::InvalidBlock, Some(e.clone()), None);
		}
		let required_iters = match pre.required_iters {
			Some(iters) => iters,
			None => {
				return (
					ReceiveBlockResult::InvalidBlock,
					Some(ErrorKind::InvalidProofOfSpace),
					None,
				);
			}
		};

		let genesis = block.prev_header_hash() == self.constants.genesis_prev_hash;
		let prev = if genesis {
			None
		} else {
			match self.try_sub_block(&block.prev_header_hash()) {
				Some(p) => Some(p),
				None => {
					return (
						ReceiveBlockResult::DisconnectedBlock,
						Some(ErrorKind::InvalidPrevBlockHash),
						None,
					);
				}
			}
		};

		if let Err(e) = self.check_slot_capacity(block, prev.as_ref()) {
			return (ReceiveBlockResult::InvalidBlock, Some(e), None);
		}
		let overflow =
			is_overflow_sub_block(&self.constants, block.reward_chain_sub_block.signage_point_index);
		if overflow && self.first_sub_slot_of_new_epoch(&block.finished_sub_slots, prev.as_ref()) {
			return (
				ReceiveBlockResult::InvalidBlock,
				Some(ErrorKind::OverflowInNewEpoch),
				None,
			);
		}

		let new_slot = !block.finished_sub_slots.is_empty();
		let (difficulty, sub_slot_iters) = match prev {
			Some(ref p) => (
				self.get_next_difficulty(&p.header_hash, new_slot),
				self.get_next_slot_iters(&p.header_hash, new_slot),
			),
			None => (
				self.constants.difficulty_starting,
				self.constants.sub_slot_iters_starting,
			),
		};

		let ses = prev.as_ref().and_then(|p| self.make_sub_epoch_summary(p));
		let ctx = BlockContext {
			constants: &self.constants,
			prev: prev.clone(),
			difficulty,
			sub_slot_iters,
			ses,
		};
		let record = match pipe::build_record(block, required_iters, &ctx) {
			Ok(r) => r,
			Err(e) => return (ReceiveBlockResult::InvalidBlock, Some(e), None),
		};

		if let Err(e) = self.block_store.add_block(block, &record) {
			return (ReceiveBlockResult::InvalidBlock, Some(e.kind()), None);
		}
		self.state
			.write()
			.unwrap()
			.records
			.insert(record.header_hash, record.clone());

		let peak = self.get_peak();
		match peak {
			None => match self.commit_new_peak(block, &record, 0, false) {
				Ok(()) => (ReceiveBlockResult::NewPeak, None, Some(0)),
				Err(e) => (ReceiveBlockResult::InvalidBlock, Some(e.kind()), None),
			},
			Some(ref p) if record.weight > p.weight => {
				// single-block extension of the current peak skips all of
				// the reorg machinery
				let (fork_height, reorg) = if record.prev_hash == p.header_hash {
					(p.sub_block_height, false)
				} else {
					let fork = fork_point_hint.unwrap_or_else(|| self.find_fork_point(&record));
					(fork, true)
				};
				match self.commit_new_peak(block, &record, fork_height, reorg) {
					Ok(()) => (ReceiveBlockResult::NewPeak, None, Some(fork_height)),
					Err(e) => (ReceiveBlockResult::InvalidBlock, Some(e.kind()), None),
				}
			}
			// ties keep the current peak
			Some(_) => (ReceiveBlockResult::AddedAsOrphan, None, None),
		}
	}

	// Reorganize the coin store to the fork point, then re-apply the new
	// chain from there forward and move the peak.
	fn commit_new_peak(
		&self,
		block: &FullBlock,
		record: &SubBlockRecord,
		fork_height: u32,
		reorg: bool,
	) -> Result<(), Error> {
		if reorg {
			self.coin_store.rollback_to_block(fork_height)?;
		}

		// collect the new canonical path back to the fork point
		let mut path = vec![record.clone()];
		let mut cur = record.clone();
		while cur.sub_block_height > 0 && cur.sub_block_height > fork_height + 1 {
			cur = self.try_sub_block(&cur.prev_hash).ok_or_else(|| {
				Error::from(ErrorKind::NotFound(format!("record {}", cur.prev_hash)))
			})?;
			path.push(cur.clone());
		}
		path.reverse();

		for r in &path {
			let b = if r.header_hash == record.header_hash {
				block.clone()
			} else {
				self.block_store.get_block(&r.header_hash)?.ok_or_else(|| {
					Error::from(ErrorKind::NotFound(format!("block {}", r.header_hash)))
				})?
			};
			self.coin_store.new_block(&b)?;
		}

		{
			let mut state = self.state.write().unwrap();
			let stale: Vec<u32> = state
				.height_to_hash
				.keys()
				.cloned()
				.filter(|h| *h > record.sub_block_height)
				.collect();
			for h in stale {
				state.height_to_hash.remove(&h);
			}
			for r in &path {
				state.height_to_hash.insert(r.sub_block_height, r.header_hash);
			}
			state.peak = Some(record.header_hash);
		}
		self.block_store.save_peak(&record.header_hash)?;
		Ok(())
	}

	// Highest ancestor of the new tip shared with the canonical chain.
	fn find_fork_point(&self, new_tip: &SubBlockRecord) -> u32 {
		let mut cur = new_tip.clone();
		loop {
			if cur.sub_block_height == 0 {
				return 0;
			}
			if self.height_to_hash(cur.sub_block_height - 1) == Some(cur.prev_hash) {
				return cur.sub_block_height - 1;
			}
			match self.try_sub_block(&cur.prev_hash) {
				Some(p) => cur = p,
				None => return 0,
			}
		}
	}

	// Refuse blocks that would overfill their sub-slot.
	fn check_slot_capacity(
		&self,
		block: &FullBlock,
		prev: Option<&SubBlockRecord>,
	) -> Result<(), ErrorKind> {
		if !block.finished_sub_slots.is_empty() {
			return Ok(());
		}
		let mut count: u32 = 1;
		let mut cur = prev.cloned();
		while let Some(r) = cur {
			count += 1;
			if r.first_in_sub_slot {
				break;
			}
			if count > self.constants.max_sub_slot_sub_blocks {
				return Err(ErrorKind::TooManySubBlocksInSlot);
			}
			cur = self.try_sub_block(&r.prev_hash);
		}
		if count > self.constants.max_sub_slot_sub_blocks {
			return Err(ErrorKind::TooManySubBlocksInSlot);
		}
		Ok(())
	}

	/// Whether a block sitting on `prev` with the given finished sub-slots
	/// lands in the first sub-slot of a new epoch. Overflow sub-blocks are
	/// forbidden there.
	pub fn first_sub_slot_of_new_epoch(
		&self,
		finished_sub_slots: &[EndOfSubSlotBundle],
		prev: Option<&SubBlockRecord>,
	) -> bool {
		if let Some(first) = finished_sub_slots.first() {
			return first.challenge_chain.new_difficulty.is_some();
		}
		// no slots in the block itself: inspect the chain preceding the prev
		let mut cur = prev.cloned();
		while let Some(r) = cur {
			if r.first_in_sub_slot {
				if let Some(ref ses) = r.sub_epoch_summary_included {
					if ses.new_difficulty.is_some() {
						return true;
					}
				}
				return false;
			}
			cur = self.try_sub_block(&r.prev_hash);
		}
		false
	}

	/// Difficulty that went into the given record, the delta to its parent's
	/// weight.
	pub fn get_difficulty(&self, record: &SubBlockRecord) -> u64 {
		match self.try_sub_block(&record.prev_hash) {
			Some(prev) => (record.weight - prev.weight) as u64,
			None => record.weight as u64,
		}
	}

	/// Difficulty in force for the sub-block following `header_hash`. Only
	/// changes when an epoch ends and a new slot begins.
	pub fn get_next_difficulty(&self, header_hash: &Hash, new_slot: bool) -> u64 {
		let record = match self.try_sub_block(header_hash) {
			Some(r) => r,
			None => return self.constants.difficulty_starting,
		};
		let current = self.get_difficulty(&record);
		if new_slot && can_finish_epoch(&self.constants, record.sub_block_height) {
			self.epoch_average_difficulty(&record).unwrap_or(current)
		} else {
			current
		}
	}

	/// Sub-slot iterations in force for the sub-block following
	/// `header_hash`.
	pub fn get_next_slot_iters(&self, header_hash: &Hash, _new_slot: bool) -> u64 {
		match self.try_sub_block(header_hash) {
			Some(r) => r.sub_slot_iters,
			None => self.constants.sub_slot_iters_starting,
		}
	}

	// Average difficulty over the epoch ending at `record`, the value the
	// next epoch runs at.
	fn epoch_average_difficulty(&self, record: &SubBlockRecord) -> Option<u64> {
		let epoch = self.constants.epoch_sub_blocks;
		let start_height = (record.sub_block_height + 1).checked_sub(epoch)?;
		let mut cur = record.clone();
		while cur.sub_block_height > start_height {
			cur = self.try_sub_block(&cur.prev_hash)?;
		}
		let start_weight = if start_height == 0 { 0 } else { cur.weight };
		let avg = (record.weight - start_weight) / epoch as u128;
		Some(std::cmp::max(1, avg as u64))
	}

	/// The sub-epoch summary a sub-block on top of `prev` must include, if
	/// its height is a sub-epoch boundary.
	pub fn make_sub_epoch_summary(&self, prev: &SubBlockRecord) -> Option<SubEpochSummary> {
		if !can_finish_sub_epoch(&self.constants, prev.sub_block_height) {
			return None;
		}
		let mut prev_ses_hash = self.constants.first_cc_challenge;
		let mut num_overflow: u8 = 0;
		let mut cur = Some(prev.clone());
		let mut walked = 0;
		while let Some(r) = cur {
			if walked > 0 {
				if let Some(ref ses) = r.sub_epoch_summary_included {
					prev_ses_hash = ses.hash();
					break;
				}
			}
			if walked < self.constants.sub_epoch_sub_blocks && r.overflow {
				num_overflow = num_overflow.saturating_add(1);
			}
			walked += 1;
			cur = self.try_sub_block(&r.prev_hash);
		}
		let (new_difficulty, new_sub_slot_iters) =
			if can_finish_epoch(&self.constants, prev.sub_block_height) {
				(
					Some(self.get_next_difficulty(&prev.header_hash, true)),
					Some(self.get_next_slot_iters(&prev.header_hash, true)),
				)
			} else {
				(None, None)
			};
		Some(SubEpochSummary {
			prev_subepoch_summary_hash: prev_ses_hash,
			reward_chain_hash: prev.reward_infusion_new_challenge,
			num_sub_blocks_overflow: num_overflow,
			new_difficulty,
			new_sub_slot_iters,
		})
	}

	/// Summary the unfinished block sitting on `prev_hash` would include.
	pub fn next_sub_epoch_summary(&self, prev_hash: &Hash) -> Option<SubEpochSummary> {
		if *prev_hash == self.constants.genesis_prev_hash {
			return None;
		}
		let prev = self.try_sub_block(prev_hash)?;
		self.make_sub_epoch_summary(&prev)
	}

	/// Validates an unfinished block against the chain. Must be called with
	/// [`Blockchain::lock`] held. Yields `required_iters` or an error tag.
	pub fn validate_unfinished_block(
		&self,
		block: &UnfinishedBlock,
	) -> (Option<u64>, Option<ErrorKind>) {
		if block.prev_header_hash() != self.constants.genesis_prev_hash
			&& !self.contains_sub_block(&block.prev_header_hash())
		{
			return (None, Some(ErrorKind::InvalidPrevBlockHash));
		}
		match pipe::validate_unfinished(block, &self.constants, &self.verifiers) {
			Ok(iters) => (Some(iters), None),
			Err(e) => (None, Some(e)),
		}
	}

	/// Ensure the in-memory record cache holds records around the fork point
	/// before a batch is committed against it.
	pub fn warmup(&self, fork_point: u32) -> Result<(), Error> {
		let start = fork_point.saturating_sub(self.constants.sub_blocks_cache_size);
		let stop = match self.peak_height() {
			Some(h) => std::cmp::max(h, fork_point),
			None => fork_point,
		};
		let records = self.block_store.get_records_in_range(start, stop)?;
		let mut state = self.state.write().unwrap();
		for r in records {
			state.records.insert(r.header_hash, r);
		}
		Ok(())
	}

	/// Evict in-memory records below the default watermark, a cache worth of
	/// blocks behind the peak. Persisted copies remain.
	pub fn clean_sub_block_records(&self) {
		if let Some(peak_height) = self.peak_height() {
			let below = peak_height.saturating_sub(self.constants.sub_blocks_cache_size);
			self.clean_sub_block_records_below(below);
		}
	}

	/// Evict in-memory records with a height below the given one.
	pub fn clean_sub_block_records_below(&self, below: u32) {
		let mut state = self.state.write().unwrap();
		let peak = state.peak;
		state
			.records
			.retain(|hh, r| r.sub_block_height >= below || Some(*hh) == peak);
	}

	/// Number of records currently held in memory.
	pub fn cached_record_count(&self) -> usize {
		self.state.read().unwrap().records.len()
	}

	/// The finished sub-slots that opened the sub-slots holding the signage
	/// point and the infusion point of the given block. `None` entries mean
	/// the slot in question is the first one of the chain.
	pub fn get_sp_and_ip_sub_slots(
		&self,
		header_hash: &Hash,
	) -> Result<Option<(Option<EndOfSubSlotBundle>, Option<EndOfSubSlotBundle>)>, Error> {
		let block = match self.get_block(header_hash)? {
			Some(b) => b,
			None => return Ok(None),
		};
		let overflow = is_overflow_sub_block(
			&self.constants,
			block.reward_chain_sub_block.signage_point_index,
		);
		let ip_sub_slot = self.slot_opener_before(&block, 0)?;
		let sp_sub_slot = if overflow {
			self.slot_opener_before(&block, 1)?
		} else {
			ip_sub_slot.clone()
		};
		Ok(Some((sp_sub_slot, ip_sub_slot)))
	}

	// The `skip`-th finished sub-slot found scanning backwards from the
	// given block, this block's own slots included.
	fn slot_opener_before(
		&self,
		block: &FullBlock,
		mut skip: usize,
	) -> Result<Option<EndOfSubSlotBundle>, Error> {
		let mut cur = block.clone();
		let mut walked = 0;
		loop {
			for bundle in cur.finished_sub_slots.iter().rev() {
				if skip == 0 {
					return Ok(Some(bundle.clone()));
				}
				skip -= 1;
			}
			if cur.prev_header_hash() == self.constants.genesis_prev_hash {
				return Ok(None);
			}
			walked += 1;
			if walked > MAX_SLOT_WALK_BLOCKS {
				return Ok(None);
			}
			cur = match self.get_block(&cur.prev_header_hash())? {
				Some(b) => b,
				None => return Ok(None),
			};
		}
	}

	/// Recent reward chain infusions walking back from the peak, oldest
	/// first, for the timelords.
	pub fn get_recent_reward_challenges(&self) -> Vec<(Hash, u128)> {
		let mut out = vec![];
		let mut cur = self.get_peak();
		let limit = 2 * self.constants.max_sub_slot_sub_blocks;
		while let Some(r) = cur {
			out.push((r.reward_infusion_new_challenge, r.total_iters));
			if out.len() as u32 >= limit {
				break;
			}
			cur = self.try_sub_block(&r.prev_hash);
		}
		out.reverse();
		out
	}
}
