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

//! The pool itself. Holds pending spend bundles keyed by name, an index of
//! the coins they remove, and produces the fingerprint filter peers use to
//! request only the entries they are missing.

use std::collections::{HashMap, HashSet};
use std::hash::Hasher;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use croaring::Bitmap;
use siphasher::sip::SipHasher24;

use arbor_core::core::{Hash, SubBlockRecord};

use crate::conditions::check_conditions;
use crate::types::{
	BlockChainView, MempoolItem, Npc, PoolConfig, PoolError, ProgramRunner, SpendBundle,
};

struct Inner {
	items: HashMap<Hash, MempoolItem>,
	// coin id -> bundle that removes it
	removals: HashMap<Hash, Hash>,
	peak: Option<SubBlockRecord>,
}

/// The transaction pool. Admission validates against the unspent-coin view
/// of the current peak; every peak change re-runs that validation for the
/// whole pool.
pub struct Mempool {
	config: PoolConfig,
	runner: Arc<dyn ProgramRunner>,
	chain: Arc<dyn BlockChainView>,
	inner: RwLock<Inner>,
}

impl Mempool {
	/// Create a new pool over the given chain view and script VM.
	pub fn new(
		config: PoolConfig,
		chain: Arc<dyn BlockChainView>,
		runner: Arc<dyn ProgramRunner>,
	) -> Mempool {
		Mempool {
			config,
			runner,
			chain,
			inner: RwLock::new(Inner {
				items: HashMap::new(),
				removals: HashMap::new(),
				peak: None,
			}),
		}
	}

	/// Number of bundles currently pending.
	pub fn size(&self) -> usize {
		self.inner.read().unwrap().items.len()
	}

	/// Whether a bundle with this name is pending.
	pub fn contains(&self, name: &Hash) -> bool {
		self.inner.read().unwrap().items.contains_key(name)
	}

	/// Pending bundle by name.
	pub fn get(&self, name: &Hash) -> Option<MempoolItem> {
		self.inner.read().unwrap().items.get(name).cloned()
	}

	/// Try to admit a spend bundle. On success returns its name.
	pub fn new_spend_bundle(&self, bundle: SpendBundle) -> Result<Hash, PoolError> {
		let name = bundle.name();
		if self.contains(&name) {
			return Err(PoolError::AlreadyInPool);
		}
		let peak = match self.inner.read().unwrap().peak.clone() {
			Some(p) => p,
			None => return Err(PoolError::NoPeak),
		};
		if self.size() >= self.config.max_tx_count {
			return Err(PoolError::Other("pool is full".to_owned()));
		}

		let (cost, npc_list) = self
			.runner
			.get_name_puzzle_conditions(&bundle.program, self.config.max_tx_cost)?;

		let removals: HashSet<Hash> = npc_list.iter().map(|npc| npc.coin_name).collect();
		{
			let inner = self.inner.read().unwrap();
			for coin in &removals {
				if let Some(other) = inner.removals.get(coin) {
					return Err(PoolError::DoubleSpend(*other));
				}
			}
		}

		self.validate_npcs(&npc_list, &removals, &peak)?;

		let mut inner = self.inner.write().unwrap();
		for coin in &removals {
			inner.removals.insert(*coin, name);
		}
		inner.items.insert(
			name,
			MempoolItem {
				name,
				bundle,
				npc_list,
				cost,
			},
		);
		debug!("pool: admitted {}, {} pending", name, inner.items.len());
		Ok(name)
	}

	// every spend must remove a known, unspent coin and all its conditions
	// must hold against the peak
	fn validate_npcs(
		&self,
		npc_list: &[Npc],
		removals: &HashSet<Hash>,
		peak: &SubBlockRecord,
	) -> Result<(), PoolError> {
		let now_millis = Utc::now().timestamp_millis() as u64;
		for npc in npc_list {
			let record = self
				.chain
				.coin_record(&npc.coin_name)
				.ok_or(PoolError::UnknownCoin(npc.coin_name))?;
			if !record.unspent() {
				return Err(PoolError::CoinSpent(npc.coin_name));
			}
			check_conditions(npc, &record, removals, peak.sub_block_height, now_millis)?;
		}
		Ok(())
	}

	/// The peak moved: remember it and drop every bundle that no longer
	/// validates against the new unspent-coin view.
	pub fn new_peak(&self, peak: Option<SubBlockRecord>) {
		let peak = match peak {
			Some(p) => p,
			None => return,
		};
		let items: Vec<MempoolItem> = {
			let mut inner = self.inner.write().unwrap();
			inner.peak = Some(peak.clone());
			inner.items.values().cloned().collect()
		};

		let mut dropped = vec![];
		for item in items {
			let removals: HashSet<Hash> =
				item.npc_list.iter().map(|npc| npc.coin_name).collect();
			if self.validate_npcs(&item.npc_list, &removals, &peak).is_err() {
				dropped.push(item);
			}
		}

		if !dropped.is_empty() {
			let mut inner = self.inner.write().unwrap();
			for item in &dropped {
				inner.items.remove(&item.name);
				for npc in &item.npc_list {
					inner.removals.remove(&npc.coin_name);
				}
			}
			info!(
				"pool: dropped {} stale bundles at peak {}",
				dropped.len(),
				peak.sub_block_height
			);
		}
	}

	/// Fingerprint filter of everything pending, keyed to the current peak.
	/// Peers send back the transactions whose fingerprints we lack.
	pub fn get_filter(&self) -> Vec<u8> {
		let inner = self.inner.read().unwrap();
		let (k0, k1) = match inner.peak {
			Some(ref p) => sip_keys(&p.header_hash),
			None => (0, 0),
		};
		let mut bitmap = Bitmap::create();
		for name in inner.items.keys() {
			bitmap.add(short_id(name, k0, k1));
		}
		bitmap.serialize()
	}

	/// Names in our pool whose fingerprints are missing from a peer's
	/// filter, the entries the peer asked us to send.
	pub fn missing_from_filter(&self, filter: &[u8]) -> Vec<Hash> {
		let bitmap = Bitmap::deserialize(filter);
		let inner = self.inner.read().unwrap();
		let (k0, k1) = match inner.peak {
			Some(ref p) => sip_keys(&p.header_hash),
			None => (0, 0),
		};
		inner
			.items
			.keys()
			.filter(|name| !bitmap.contains(short_id(name, k0, k1)))
			.cloned()
			.collect()
	}
}

// filter fingerprints are keyed by the peak so they cannot be precomputed
fn sip_keys(peak_hash: &Hash) -> (u64, u64) {
	let mut k0: u64 = 0;
	let mut k1: u64 = 0;
	for i in 0..8 {
		k0 = (k0 << 8) | peak_hash.0[i] as u64;
		k1 = (k1 << 8) | peak_hash.0[i + 8] as u64;
	}
	(k0, k1)
}

fn short_id(name: &Hash, k0: u64, k1: u64) -> u32 {
	let mut hasher = SipHasher24::new_with_keys(k0, k1);
	hasher.write(name.to_slice());
	(hasher.finish() & 0xffff_ffff) as u32
}
