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

//! Transient storage for everything that lives between two peaks: finished
//! sub-slots, signage points, unfinished blocks, candidate blocks and
//! infusion points that arrived too early. Mutated only through its own
//! methods; all state is dropped or pruned as the peak advances.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lru_cache::LruCache;

use arbor_core::consensus::ConsensusConstants;
use arbor_core::core::{
	EndOfSubSlotBundle, Hash, Hashed, InfusionPointVdfs, SignagePoint, SubBlockRecord,
	UnfinishedBlock,
};

// Bound on the "seen unfinished" set; it is also cleared every 1000 blocks.
const SEEN_CACHE_SIZE: usize = 10_000;

struct SlotEntry {
	// end of slot that opened this sub-slot; None only for the first slot
	// of the chain
	eos: Option<EndOfSubSlotBundle>,
	// total iterations when this sub-slot began
	start_total_iters: u128,
	sps: Vec<Option<SignagePoint>>,
}

struct Inner {
	slots: Vec<SlotEntry>,
	seen_unfinished: LruCache<Hash, ()>,
	// unfinished blocks keyed by trunk hash
	unfinished: HashMap<Hash, (u32, UnfinishedBlock)>,
	// farmer candidates keyed by trunk hash
	candidates: HashMap<Hash, (u32, UnfinishedBlock)>,
	// infusion points waiting for their previous sub-block, keyed by the
	// reward chain challenge they infuse from
	future_ips: HashMap<Hash, Vec<InfusionPointVdfs>>,
}

/// Store for transient consensus objects, shared between the peak processor
/// and the timelord-facing handlers.
pub struct SubSlotStore {
	constants: Arc<ConsensusConstants>,
	inner: Mutex<Inner>,
}

impl SubSlotStore {
	/// A new store holding only the first, empty sub-slot.
	pub fn new(constants: Arc<ConsensusConstants>) -> SubSlotStore {
		let store = SubSlotStore {
			constants: constants.clone(),
			inner: Mutex::new(Inner {
				slots: vec![],
				seen_unfinished: LruCache::new(SEEN_CACHE_SIZE),
				unfinished: HashMap::new(),
				candidates: HashMap::new(),
				future_ips: HashMap::new(),
			}),
		};
		store.initialize_genesis_sub_slot();
		store
	}

	/// Reset the slot list to the single genesis sub-slot.
	pub fn initialize_genesis_sub_slot(&self) {
		let mut inner = self.inner.lock().unwrap();
		inner.slots = vec![SlotEntry {
			eos: None,
			start_total_iters: 0,
			sps: empty_sps(&self.constants),
		}];
	}

	fn slot_challenge(&self, entry: &SlotEntry) -> Hash {
		match entry.eos {
			Some(ref eos) => eos.challenge_chain.hash(),
			None => self.constants.first_cc_challenge,
		}
	}

	/// Number of sub-slots currently tracked.
	pub fn finished_sub_slots_len(&self) -> usize {
		self.inner.lock().unwrap().slots.len()
	}

	/// Record an unfinished partial hash as seen; true if it was seen
	/// before.
	pub fn seen_unfinished_block(&self, partial_hash: Hash) -> bool {
		let mut inner = self.inner.lock().unwrap();
		if inner.seen_unfinished.contains_key(&partial_hash) {
			return true;
		}
		inner.seen_unfinished.insert(partial_hash, ());
		false
	}

	/// Forget all seen unfinished partial hashes.
	pub fn clear_seen_unfinished_blocks(&self) {
		self.inner.lock().unwrap().seen_unfinished.clear();
	}

	/// Store an unfinished block under its trunk hash.
	pub fn add_unfinished_block(&self, sub_height: u32, block: UnfinishedBlock) {
		let mut inner = self.inner.lock().unwrap();
		inner
			.unfinished
			.insert(block.trunk_hash(), (sub_height, block));
	}

	/// Unfinished block for the given trunk hash.
	pub fn get_unfinished_block(&self, trunk_hash: &Hash) -> Option<UnfinishedBlock> {
		self.inner
			.lock()
			.unwrap()
			.unfinished
			.get(trunk_hash)
			.map(|(_, b)| b.clone())
	}

	/// Drop unfinished blocks below the given height.
	pub fn clear_unfinished_blocks_below(&self, sub_height: u32) {
		self.inner
			.lock()
			.unwrap()
			.unfinished
			.retain(|_, (h, _)| *h >= sub_height);
	}

	/// Store a farmer candidate block under its trunk hash.
	pub fn add_candidate_block(&self, sub_height: u32, block: UnfinishedBlock) {
		let mut inner = self.inner.lock().unwrap();
		inner
			.candidates
			.insert(block.trunk_hash(), (sub_height, block));
	}

	/// Candidate block for the given trunk hash.
	pub fn get_candidate_block(&self, trunk_hash: &Hash) -> Option<UnfinishedBlock> {
		self.inner
			.lock()
			.unwrap()
			.candidates
			.get(trunk_hash)
			.map(|(_, b)| b.clone())
	}

	/// Drop candidate blocks below the given height.
	pub fn clear_candidate_blocks_below(&self, sub_height: u32) {
		self.inner
			.lock()
			.unwrap()
			.candidates
			.retain(|_, (h, _)| *h >= sub_height);
	}

	/// Cache an infusion point whose previous sub-block is not known yet,
	/// keyed on the challenge it waits for.
	pub fn add_to_future_ip(&self, infusion: InfusionPointVdfs) {
		let mut inner = self.inner.lock().unwrap();
		inner
			.future_ips
			.entry(infusion.reward_chain_ip_vdf.challenge)
			.or_insert_with(Vec::new)
			.push(infusion);
	}

	fn drain_future_ips(inner: &mut Inner, challenge: &Hash) -> Vec<InfusionPointVdfs> {
		inner.future_ips.remove(challenge).unwrap_or_default()
	}

	/// Append a finished sub-slot if it chains from the last one we hold.
	/// `None` means duplicate or disconnected; otherwise the (possibly
	/// empty) list of cached infusion points that may now resolve.
	pub fn new_finished_sub_slot(
		&self,
		bundle: &EndOfSubSlotBundle,
		_peak: Option<&SubBlockRecord>,
	) -> Option<Vec<InfusionPointVdfs>> {
		let mut inner = self.inner.lock().unwrap();
		let bundle_hash = bundle.challenge_chain.hash();
		if inner
			.slots
			.iter()
			.any(|s| s.eos.as_ref().map(|e| e.challenge_chain.hash()) == Some(bundle_hash))
		{
			return None;
		}
		let (expected, last_start) = match inner.slots.last() {
			Some(last) => (self.slot_challenge(last), last.start_total_iters),
			None => (self.constants.first_cc_challenge, 0),
		};
		if bundle.challenge_chain.end_of_slot_vdf.challenge != expected {
			return None;
		}
		let start_total_iters =
			last_start + bundle.challenge_chain.end_of_slot_vdf.number_of_iterations as u128;
		inner.slots.push(SlotEntry {
			eos: Some(bundle.clone()),
			start_total_iters,
			sps: empty_sps(&self.constants),
		});
		let rc_hash = bundle.reward_chain.hash();
		Some(SubSlotStore::drain_future_ips(&mut inner, &rc_hash))
	}

	/// The finished sub-slot whose challenge chain hash is `challenge`,
	/// with its index and the total iterations at which the slot it opened
	/// began. `None` for the first slot of the chain.
	pub fn get_sub_slot(&self, challenge: &Hash) -> Option<(EndOfSubSlotBundle, usize, u128)> {
		let inner = self.inner.lock().unwrap();
		for (i, entry) in inner.slots.iter().enumerate() {
			if let Some(ref eos) = entry.eos {
				if eos.challenge_chain.hash() == *challenge {
					return Some((eos.clone(), i, entry.start_total_iters));
				}
			}
		}
		None
	}

	/// Insert a signage point into its sub-slot. Idempotent; false when the
	/// slot is unknown or the index is out of range.
	pub fn new_signage_point(&self, index: u8, sp: SignagePoint) -> bool {
		if index as usize >= self.constants.num_sps_sub_slot as usize {
			return false;
		}
		let challenge = match sp.cc_vdf {
			Some(ref vdf) => vdf.challenge,
			// at index 0 the slot itself is the signage point
			None => return true,
		};
		let mut inner = self.inner.lock().unwrap();
		for entry in inner.slots.iter_mut() {
			let slot_challenge = match entry.eos {
				Some(ref eos) => eos.challenge_chain.hash(),
				None => self.constants.first_cc_challenge,
			};
			if slot_challenge == challenge {
				entry.sps[index as usize] = Some(sp);
				return true;
			}
		}
		false
	}

	/// Signage point previously stored for the slot and index.
	pub fn get_signage_point(&self, challenge: &Hash, index: u8) -> Option<SignagePoint> {
		let inner = self.inner.lock().unwrap();
		for entry in &inner.slots {
			let slot_challenge = match entry.eos {
				Some(ref eos) => eos.challenge_chain.hash(),
				None => self.constants.first_cc_challenge,
			};
			if slot_challenge == *challenge {
				return entry.sps.get(index as usize).cloned().flatten();
			}
		}
		None
	}

	/// Update the slot list for a new peak. Slots the peak has moved past
	/// are pruned; on a non-trivial fork the list is rebuilt from the slots
	/// around the peak. Returns any queued end-of-slot that is now the one
	/// following the peak's slot, plus cached infusion points chaining from
	/// the peak's infusion.
	pub fn new_peak(
		&self,
		record: &SubBlockRecord,
		sp_sub_slot: Option<&EndOfSubSlotBundle>,
		ip_sub_slot: Option<&EndOfSubSlotBundle>,
		fork_is_nontrivial: bool,
	) -> (Option<EndOfSubSlotBundle>, Vec<InfusionPointVdfs>) {
		let ip_slot_start = record.ip_sub_slot_total_iters(&self.constants);
		let mut inner = self.inner.lock().unwrap();

		let have_peak_slot = inner
			.slots
			.iter()
			.any(|s| s.start_total_iters == ip_slot_start);

		if fork_is_nontrivial || !have_peak_slot {
			let mut slots = vec![];
			if record.overflow && sp_sub_slot.map(|s| s.challenge_chain.hash())
				!= ip_sub_slot.map(|s| s.challenge_chain.hash())
			{
				slots.push(SlotEntry {
					eos: sp_sub_slot.cloned(),
					start_total_iters: record.sp_sub_slot_total_iters(&self.constants),
					sps: empty_sps(&self.constants),
				});
			}
			slots.push(SlotEntry {
				eos: ip_sub_slot.cloned(),
				start_total_iters: ip_slot_start,
				sps: empty_sps(&self.constants),
			});
			inner.slots = slots;
		} else {
			inner.slots.retain(|s| s.start_total_iters >= ip_slot_start);
		}

		let added_eos = inner
			.slots
			.iter()
			.find(|s| s.start_total_iters > ip_slot_start)
			.and_then(|s| s.eos.clone());
		let new_ips =
			SubSlotStore::drain_future_ips(&mut inner, &record.reward_infusion_new_challenge);
		(added_eos, new_ips)
	}

	/// Follow end-of-slot links backwards from a reward chain challenge,
	/// mapping it through any empty sub-slots to the infusion challenge
	/// they started from.
	pub fn unwind_rc_challenge(&self, target: Hash) -> Hash {
		let inner = self.inner.lock().unwrap();
		let mut target = target;
		for entry in inner.slots.iter().rev() {
			if let Some(ref eos) = entry.eos {
				if eos.reward_chain.hash() == target {
					target = eos.reward_chain.end_of_slot_vdf.challenge;
				}
			}
		}
		target
	}

	/// Rebuild the finished sub-slot list a block sitting on `prev_sb` must
	/// embed: every end of slot that closed after the prev's infusion, up to
	/// the slot the proof of space answers (one further for overflows).
	pub fn get_finished_sub_slots(
		&self,
		prev_sb: Option<&SubBlockRecord>,
		pos_ss_cc_challenge: &Hash,
		overflow: bool,
	) -> Vec<EndOfSubSlotBundle> {
		let threshold = prev_sb.map(|p| p.total_iters).unwrap_or(0);
		let inner = self.inner.lock().unwrap();
		let mut out = vec![];
		let mut target_seen = false;
		for entry in &inner.slots {
			if let Some(ref eos) = entry.eos {
				if entry.start_total_iters <= threshold {
					continue;
				}
				if target_seen {
					// one extra slot for the overflow infusion
					out.push(eos.clone());
					break;
				}
				out.push(eos.clone());
				if eos.challenge_chain.hash() == *pos_ss_cc_challenge {
					if !overflow {
						break;
					}
					target_seen = true;
				}
			}
		}
		out
	}
}

fn empty_sps(constants: &ConsensusConstants) -> Vec<Option<SignagePoint>> {
	vec![None; constants.num_sps_sub_slot as usize]
}
