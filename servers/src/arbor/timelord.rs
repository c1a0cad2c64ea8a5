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

//! The block assembly round-trip: unfinished blocks come in from farmers
//! and peers, go out to timelords, and come back as infusion-point VDFs
//! that close them into full sub-blocks. The infusion-point and
//! end-of-sub-slot handlers are serialized by the timelord lock so their
//! reads of the sub-slot store and the peak are stable.

use std::sync::Arc;

use arbor_chain::ErrorKind;
use arbor_core::consensus::{calculate_ip_iters, calculate_sp_iters, can_finish_epoch, is_overflow_sub_block};
use arbor_core::core::{
	FullBlock, Hash, Hashed, InfusionPointVdfs, PoolTarget, SubBlockRecord, UnfinishedBlock,
};
use arbor_p2p::msg::{
	FarmerNewSignagePoint, Message, NewInfusionPointVdf, NewSignagePointOrEndOfSubSlot,
	NewUnfinishedSubBlock, RequestSignagePointOrEndOfSubSlot, RespondEndOfSubSlot,
	RespondSubBlock, RespondUnfinishedSubBlock, TimelordNewUnfinishedSubBlock,
};
use arbor_p2p::{NodeType, Peer, PeerId};

use crate::arbor::node::FullNode;
use crate::common::types::Error;

impl FullNode {
	// sub-slot iterations and difficulty for a block sitting on `prev_sb`,
	// given whether it starts a new slot
	fn sub_slot_iters_and_difficulty(
		&self,
		prev_sb: Option<&SubBlockRecord>,
		new_slot: bool,
	) -> (u64, u64) {
		match prev_sb {
			Some(p) => (
				self.blockchain.get_next_slot_iters(&p.header_hash, new_slot),
				self.blockchain.get_next_difficulty(&p.header_hash, new_slot),
			),
			None => (
				self.constants.sub_slot_iters_starting,
				self.constants.difficulty_starting,
			),
		}
	}

	/// A block claiming the pre-farm pool target anywhere but on top of
	/// genesis must carry a valid pool signature.
	pub fn has_valid_pool_sig(&self, block: &FullBlock) -> bool {
		let foliage = &block.foliage_sub_block;
		let data = &foliage.foliage_sub_block_data;
		let pre_farm_target = PoolTarget {
			puzzle_hash: self.constants.genesis_pre_farm_pool_puzzle_hash,
			max_height: 0,
		};
		if data.pool_target == pre_farm_target
			&& foliage.prev_sub_block_hash != self.constants.genesis_prev_hash
		{
			match data.pool_signature {
				Some(ref sig) => self.verifiers.bls.verify(
					&block.reward_chain_sub_block.proof_of_space.pool_public_key,
					&data.pool_target.bytes(),
					sig,
				),
				None => false,
			}
		} else {
			true
		}
	}

	// whether a block whose previous record is `prev_sb` (and which brings
	// no finished slots of its own) sits in the first sub-slot of a new
	// epoch
	fn prev_chain_in_new_epoch_slot(&self, prev_sb: Option<&SubBlockRecord>) -> bool {
		let mut curr = prev_sb.cloned();
		while let Some(c) = curr {
			if c.first_in_sub_slot {
				return c
					.sub_epoch_summary_included
					.as_ref()
					.map_or(false, |ses| ses.new_difficulty.is_some());
			}
			curr = self.blockchain.try_sub_block(&c.prev_hash);
		}
		false
	}

	/// We received an unfinished sub-block, created by us or relayed by a
	/// peer. If it checks out it goes to the timelords for infusion and is
	/// advertised to the other full nodes.
	pub async fn respond_unfinished_sub_block(
		&self,
		respond: RespondUnfinishedSubBlock,
		peer: Option<PeerId>,
		farmed_block: bool,
	) -> Result<(), Error> {
		let block: UnfinishedBlock = respond.unfinished_sub_block;

		// the exact foliage variant was processed before; dropping repeats
		// here keeps one trunk from being validated over and over
		if self.sub_slot_store.seen_unfinished_block(block.partial_hash()) {
			return Ok(());
		}
		// a block with the same trunk is already stored, any further
		// foliage variant adds nothing
		if self
			.sub_slot_store
			.get_unfinished_block(&block.trunk_hash())
			.is_some()
		{
			return Ok(());
		}

		let genesis = block.prev_header_hash() == self.constants.genesis_prev_hash;
		if !genesis && !self.blockchain.contains_sub_block(&block.prev_header_hash()) {
			// no need to request the parent, the peer will send it via its
			// peak announcement
			debug!("received a disconnected unfinished block");
			return Ok(());
		}

		if let Some(peak) = self.blockchain.get_peak() {
			if block.total_iters() < peak.sp_total_iters(&self.constants) {
				// far behind the peak, cannot add weight to our chain
				return Ok(());
			}
		}

		let prev_sb = if genesis {
			None
		} else {
			Some(self.blockchain.sub_block_record(&block.prev_header_hash())?)
		};

		let overflow = is_overflow_sub_block(&self.constants, block.signage_point_index());

		// count the sub-blocks in the slot and detect a fresh epoch slot
		let mut first_ss_new_epoch = false;
		let num_sub_blocks_in_ss;
		if let Some(first_slot) = block.finished_sub_slots.first() {
			num_sub_blocks_in_ss = 1u32;
			if first_slot.challenge_chain.new_difficulty.is_some() {
				first_ss_new_epoch = true;
			}
		} else {
			let mut count = 2u32;
			let mut curr = prev_sb
				.as_ref()
				.and_then(|p| self.blockchain.try_sub_block(&p.prev_hash));
			let mut reached_slot_start = prev_sb
				.as_ref()
				.map_or(true, |p| p.first_in_sub_slot);
			while !reached_slot_start {
				match curr {
					Some(c) => {
						count += 1;
						reached_slot_start = c.first_in_sub_slot;
						curr = self.blockchain.try_sub_block(&c.prev_hash);
					}
					None => break,
				}
			}
			num_sub_blocks_in_ss = count;
			if self.prev_chain_in_new_epoch_slot(prev_sb.as_ref()) {
				first_ss_new_epoch = true;
			} else if let Some(ref p) = prev_sb {
				// the prev can finish an epoch, so we are in a new one
				if can_finish_epoch(&self.constants, p.sub_block_height) {
					first_ss_new_epoch = true;
				}
			}
		}

		if overflow && first_ss_new_epoch {
			// no overflow sub-blocks in the first sub-slot of a new epoch
			return Ok(());
		}
		if num_sub_blocks_in_ss > self.constants.max_sub_slot_sub_blocks {
			warn!("too many sub-blocks added, not adding sub-block");
			return Ok(());
		}

		{
			let _lock = self.blockchain.lock.lock().await;
			let (required_iters, error_code) = self.blockchain.validate_unfinished_block(&block);
			if let Some(code) = error_code {
				return Err(Error::Consensus {
					code,
					header_hash: block.partial_hash(),
				});
			}
			debug_assert!(required_iters.is_some());
		}

		// another task may have raced us through validation
		if self
			.sub_slot_store
			.get_unfinished_block(&block.trunk_hash())
			.is_some()
		{
			return Ok(());
		}

		let sub_height = prev_sb
			.as_ref()
			.map(|p| p.sub_block_height + 1)
			.unwrap_or(0);
		let ses = self.blockchain.next_sub_epoch_summary(&block.prev_header_hash());

		self.sub_slot_store.add_unfinished_block(sub_height, block.clone());
		if farmed_block {
			info!("🍀 farmed unfinished block {}", block.partial_hash());
		} else {
			info!("added unfinished block {}, not farmed", block.partial_hash());
		}

		let new_slot = !block.finished_sub_slots.is_empty();
		let (sub_slot_iters, difficulty) =
			self.sub_slot_iters_and_difficulty(prev_sb.as_ref(), new_slot);

		// previous reward chain hash the timelord infuses against
		let rc_prev = if block.signage_point_index() == 0 {
			let pos_challenge = block.reward_chain_sub_block.pos_ss_cc_challenge_hash;
			match self.sub_slot_store.get_sub_slot(&pos_challenge) {
				Some((eos, _, _)) => eos.reward_chain.hash(),
				None => {
					if pos_challenge == self.constants.first_cc_challenge {
						self.constants.first_rc_challenge
					} else {
						warn!("do not have sub slot {}", pos_challenge);
						return Ok(());
					}
				}
			}
		} else {
			match block.reward_chain_sub_block.reward_chain_sp_vdf {
				Some(ref vdf) => vdf.challenge,
				None => {
					warn!("unfinished block has no reward chain signage point");
					return Ok(());
				}
			}
		};

		let timelord_request = TimelordNewUnfinishedSubBlock {
			reward_chain_sub_block: block.reward_chain_sub_block.clone(),
			difficulty,
			sub_slot_iters,
			foliage_sub_block: block.foliage_sub_block.clone(),
			sub_epoch_summary: ses,
			rc_prev,
		};
		self.peers
			.send_to_all(
				Message::TimelordNewUnfinishedSubBlock(timelord_request),
				NodeType::Timelord,
			)
			.await;

		let advertisement = NewUnfinishedSubBlock {
			unfinished_reward_hash: block.trunk_hash(),
		};
		let msg = Message::NewUnfinishedSubBlock(advertisement);
		match peer {
			Some(peer_id) => {
				self.peers
					.send_to_all_except(msg, NodeType::FullNode, peer_id)
					.await
			}
			None => self.peers.send_to_all(msg, NodeType::FullNode).await,
		}
		self.state_changed("unfinished_sub_block");
		Ok(())
	}

	/// A timelord finished the infusion-point VDFs for an unfinished block
	/// we relayed: assemble the full sub-block and feed it through the
	/// normal ingestion path.
	pub async fn new_infusion_point_vdf(
		&self,
		request: NewInfusionPointVdf,
	) -> Result<(), Error> {
		let _timelord = self.timelord_lock.lock().await;
		self.new_infusion_point_vdf_locked(request.infusion).await
	}

	pub(crate) async fn new_infusion_point_vdf_locked(
		&self,
		infusion: InfusionPointVdfs,
	) -> Result<(), Error> {
		let unfinished_block = match self
			.sub_slot_store
			.get_unfinished_block(&infusion.unfinished_reward_hash)
		{
			Some(b) => b,
			None => {
				warn!(
					"do not have unfinished reward chain block {}, cannot finish",
					infusion.unfinished_reward_hash
				);
				return Ok(());
			}
		};

		// map the infusion challenge through any empty sub-slots back to
		// the reward infusion it chains from
		let target_rc_hash = self
			.sub_slot_store
			.unwind_rc_challenge(infusion.reward_chain_ip_vdf.challenge);

		let prev_sb: Option<SubBlockRecord>;
		if target_rc_hash == self.constants.first_rc_challenge {
			prev_sb = None;
		} else {
			// look for the prev sub-block among the last records before the
			// peak
			let mut found = None;
			let mut curr = self.blockchain.get_peak();
			for _ in 0..10 {
				match curr {
					None => break,
					Some(c) => {
						if c.reward_infusion_new_challenge == target_rc_hash {
							found = Some(c);
							break;
						}
						curr = self.blockchain.try_sub_block(&c.prev_hash);
					}
				}
			}
			match found {
				Some(c) => prev_sb = Some(c),
				None => {
					// keep the request around; it may resolve at the next
					// peak or end of slot
					self.sub_slot_store.add_to_future_ip(infusion.clone());
					warn!(
						"previous block is none, infusion point {}",
						infusion.reward_chain_ip_vdf.challenge
					);
					return Ok(());
				}
			}
		}

		let signage_point_index = unfinished_block.signage_point_index();
		let overflow = is_overflow_sub_block(&self.constants, signage_point_index);
		let pos_challenge = unfinished_block
			.reward_chain_sub_block
			.pos_ss_cc_challenge_hash;
		let finished_sub_slots = self.sub_slot_store.get_finished_sub_slots(
			prev_sb.as_ref(),
			&pos_challenge,
			overflow,
		);

		let new_slot = !finished_sub_slots.is_empty();
		let (sub_slot_iters, difficulty) =
			self.sub_slot_iters_and_difficulty(prev_sb.as_ref(), new_slot);

		let sub_slot_start_iters = if pos_challenge == self.constants.first_cc_challenge {
			0u128
		} else {
			match self.sub_slot_store.get_sub_slot(&pos_challenge) {
				Some((_, _, start)) => start,
				None => {
					warn!("do not have sub slot {}", pos_challenge);
					return Ok(());
				}
			}
		};
		let sp_total_iters = sub_slot_start_iters
			+ calculate_sp_iters(&self.constants, sub_slot_iters, signage_point_index) as u128;
		debug!(
			"infusing {} with sp total iters {}",
			infusion.unfinished_reward_hash, sp_total_iters
		);

		// recompute the trunk values the finished block must carry, the
		// same way ingestion will recompute them
		let required_iters = match self.verifiers.pospace.required_iters(
			&unfinished_block.reward_chain_sub_block.proof_of_space,
			&pos_challenge,
			signage_point_index,
		) {
			Some(iters) => iters,
			None => {
				return Err(Error::Consensus {
					code: ErrorKind::InvalidProofOfSpace,
					header_hash: infusion.unfinished_reward_hash,
				});
			}
		};
		let new_slots = finished_sub_slots.len() as u128;
		let slot_start = match prev_sb {
			Some(ref p) => {
				if new_slots > 0 {
					p.ip_sub_slot_total_iters(&self.constants)
						+ p.sub_slot_iters as u128
						+ (new_slots - 1) * sub_slot_iters as u128
				} else {
					p.ip_sub_slot_total_iters(&self.constants)
				}
			}
			None => new_slots * sub_slot_iters as u128,
		};
		let ip_iters = calculate_ip_iters(
			&self.constants,
			sub_slot_iters,
			signage_point_index,
			required_iters,
		);
		let total_iters = slot_start + ip_iters as u128;
		let sub_block_height = prev_sb
			.as_ref()
			.map(|p| p.sub_block_height + 1)
			.unwrap_or(0);
		let weight = prev_sb
			.as_ref()
			.map(|p| p.weight + difficulty as u128)
			.unwrap_or(difficulty as u128);

		let is_block = unfinished_block.foliage_block.is_some();
		let block = unfinished_block.clone().into_full_block(
			infusion,
			finished_sub_slots,
			weight,
			sub_block_height,
			total_iters,
			is_block,
		);

		if !self.has_valid_pool_sig(&block) {
			warn!("trying to make a pre-farm block but height is not 0");
			return Ok(());
		}

		// no overflow sub-blocks in the first sub-slot of each epoch
		let first_ss_new_epoch = match block.finished_sub_slots.first() {
			Some(first_slot) => first_slot.challenge_chain.new_difficulty.is_some(),
			None => self.prev_chain_in_new_epoch_slot(prev_sb.as_ref()),
		};
		if first_ss_new_epoch && overflow {
			return Ok(());
		}

		match self
			.respond_sub_block(RespondSubBlock { sub_block: block }, None)
			.await
		{
			Ok(()) => Ok(()),
			Err(Error::Consensus { code, header_hash }) => {
				// the VDF is discarded, the node keeps running
				warn!(
					"consensus error validating sub-block {}: {}",
					header_hash, code
				);
				Ok(())
			}
			Err(e) => Err(e),
		}
	}

	/// A finished end of sub-slot from a peer or timelord. If it connects,
	/// it is stored, advertised, and any infusion points it unblocks are
	/// processed; farmers get the new signage point. Returns whether the
	/// slot was added.
	pub async fn respond_end_of_sub_slot(
		&self,
		request: RespondEndOfSubSlot,
		peer: &Arc<dyn Peer>,
	) -> Result<bool, Error> {
		let _timelord = self.timelord_lock.lock().await;

		let bundle = &request.end_of_slot_bundle;
		let cc_challenge = bundle.challenge_chain.end_of_slot_vdf.challenge;

		let have_prev = self.sub_slot_store.get_sub_slot(&cc_challenge).is_some()
			|| cc_challenge == self.constants.first_cc_challenge;
		if !have_prev {
			// ask for the previous one instead of adding out of order
			let msg = Message::RequestSignagePointOrEndOfSubSlot(
				RequestSignagePointOrEndOfSubSlot {
					challenge_hash: cc_challenge,
					index_from_challenge: 0,
					last_rc_infusion: Hash([0; 32]),
				},
			);
			let _ = peer.send(msg).await;
			return Ok(false);
		}

		let peak = self.blockchain.get_peak();
		let (next_difficulty, next_sub_slot_iters) = match peak {
			Some(ref p) if p.sub_block_height > 2 => (
				self.blockchain.get_next_difficulty(&p.header_hash, true),
				self.blockchain.get_next_slot_iters(&p.header_hash, true),
			),
			_ => (
				self.constants.difficulty_starting,
				self.constants.sub_slot_iters_starting,
			),
		};

		// adds the sub-slot and potentially unblocks cached infusions; an
		// empty list still means the slot itself was added
		match self
			.sub_slot_store
			.new_finished_sub_slot(bundle, peak.as_ref())
		{
			Some(new_infusions) => {
				info!(
					"⏲️  finished sub slot {}, number of sub-slots: {}, rc hash: {}, deficit {}",
					bundle.challenge_chain.hash(),
					self.sub_slot_store.finished_sub_slots_len(),
					bundle.reward_chain.hash(),
					bundle.reward_chain.deficit,
				);

				let broadcast = NewSignagePointOrEndOfSubSlot {
					prev_challenge_hash: Some(cc_challenge),
					challenge_hash: bundle.challenge_chain.hash(),
					index_from_challenge: 0,
					last_rc_infusion: bundle.reward_chain.end_of_slot_vdf.challenge,
				};
				self.peers
					.send_to_all_except(
						Message::NewSignagePointOrEndOfSubSlot(broadcast),
						NodeType::FullNode,
						peer.peer_node_id(),
					)
					.await;

				for infusion in new_infusions {
					self.new_infusion_point_vdf_locked(infusion).await?;
				}

				let farmer_broadcast = FarmerNewSignagePoint {
					challenge_hash: bundle.challenge_chain.hash(),
					challenge_chain_sp: bundle.challenge_chain.hash(),
					reward_chain_sp: bundle.reward_chain.hash(),
					difficulty: next_difficulty,
					sub_slot_iters: next_sub_slot_iters,
					signage_point_index: 0,
				};
				self.peers
					.send_to_all(
						Message::FarmerNewSignagePoint(farmer_broadcast),
						NodeType::Farmer,
					)
					.await;
				Ok(true)
			}
			None => {
				info!("end of slot not added, cc challenge {}", cc_challenge);
				Ok(false)
			}
		}
	}
}
