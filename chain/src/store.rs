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

//! Storage seams the chain delegates persistence to. The chain only defines
//! the schema it needs (blocks with their records, coin spent/unspent
//! status); the backing database lives behind these traits. The in-memory
//! implementations back the test suites and small ephemeral nodes.

use std::collections::HashMap;
use std::sync::RwLock;

use arbor_core::core::{Coin, CoinRecord, FullBlock, Hash, SubBlockRecord};

use crate::error::{Error, ErrorKind};

/// Persistence for full blocks and their records, keyed by header hash.
pub trait BlockStore: Send + Sync {
	/// Save a block together with its derived record.
	fn add_block(&self, block: &FullBlock, record: &SubBlockRecord) -> Result<(), Error>;

	/// Fetch a full block by header hash.
	fn get_block(&self, header_hash: &Hash) -> Result<Option<FullBlock>, Error>;

	/// Fetch the record of a block by header hash.
	fn get_record(&self, header_hash: &Hash) -> Result<Option<SubBlockRecord>, Error>;

	/// All records with heights in `[start, stop]`, any chain, no order
	/// guarantee.
	fn get_records_in_range(&self, start: u32, stop: u32) -> Result<Vec<SubBlockRecord>, Error>;

	/// Persist the peak header hash.
	fn save_peak(&self, header_hash: &Hash) -> Result<(), Error>;

	/// Load the persisted peak header hash, if the store is not empty.
	fn load_peak(&self) -> Result<Option<Hash>, Error>;
}

/// Persistence for the coin set. Applied and rolled back in lockstep with
/// peak transitions; the chain never mutates coins any other way.
pub trait CoinStore: Send + Sync {
	/// Record the coin effects of a newly canonical block.
	fn new_block(&self, block: &FullBlock) -> Result<(), Error>;

	/// Undo all coin effects above the given height.
	fn rollback_to_block(&self, sub_height: u32) -> Result<(), Error>;

	/// Look up one coin.
	fn get_coin_record(&self, coin_id: &Hash) -> Result<Option<CoinRecord>, Error>;
}

/// An implementation of the block store backed by in-memory maps.
pub struct MemBlockStore {
	inner: RwLock<MemBlockStoreInner>,
}

#[derive(Default)]
struct MemBlockStoreInner {
	blocks: HashMap<Hash, FullBlock>,
	records: HashMap<Hash, SubBlockRecord>,
	by_height: HashMap<u32, Vec<Hash>>,
	peak: Option<Hash>,
}

impl MemBlockStore {
	/// A new, empty store.
	pub fn new() -> MemBlockStore {
		MemBlockStore {
			inner: RwLock::new(MemBlockStoreInner::default()),
		}
	}
}

impl Default for MemBlockStore {
	fn default() -> MemBlockStore {
		MemBlockStore::new()
	}
}

impl BlockStore for MemBlockStore {
	fn add_block(&self, block: &FullBlock, record: &SubBlockRecord) -> Result<(), Error> {
		let mut inner = self.inner.write().unwrap();
		let hh = record.header_hash;
		inner.blocks.insert(hh, block.clone());
		inner.records.insert(hh, record.clone());
		let entry = inner
			.by_height
			.entry(record.sub_block_height)
			.or_insert_with(Vec::new);
		if !entry.contains(&hh) {
			entry.push(hh);
		}
		Ok(())
	}

	fn get_block(&self, header_hash: &Hash) -> Result<Option<FullBlock>, Error> {
		Ok(self.inner.read().unwrap().blocks.get(header_hash).cloned())
	}

	fn get_record(&self, header_hash: &Hash) -> Result<Option<SubBlockRecord>, Error> {
		Ok(self.inner.read().unwrap().records.get(header_hash).cloned())
	}

	fn get_records_in_range(&self, start: u32, stop: u32) -> Result<Vec<SubBlockRecord>, Error> {
		let inner = self.inner.read().unwrap();
		let mut out = vec![];
		for height in start..=stop {
			if let Some(hashes) = inner.by_height.get(&height) {
				for hh in hashes {
					if let Some(r) = inner.records.get(hh) {
						out.push(r.clone());
					}
				}
			}
		}
		Ok(out)
	}

	fn save_peak(&self, header_hash: &Hash) -> Result<(), Error> {
		self.inner.write().unwrap().peak = Some(*header_hash);
		Ok(())
	}

	fn load_peak(&self) -> Result<Option<Hash>, Error> {
		Ok(self.inner.read().unwrap().peak)
	}
}

/// An implementation of the coin store backed by in-memory maps. Tracks the
/// two reward coins of every transaction block; spends are recorded through
/// [`MemCoinStore::set_spent`], which stands in for the generator run the
/// script VM collaborator performs in a full deployment.
pub struct MemCoinStore {
	records: RwLock<HashMap<Hash, CoinRecord>>,
}

impl MemCoinStore {
	/// A new, empty store.
	pub fn new() -> MemCoinStore {
		MemCoinStore {
			records: RwLock::new(HashMap::new()),
		}
	}

	/// The reward coins a transaction block confirms.
	pub fn reward_coins(block: &FullBlock) -> Vec<Coin> {
		let data = &block.foliage_sub_block.foliage_sub_block_data;
		vec![
			Coin {
				parent_coin_info: block.header_hash(),
				puzzle_hash: data.farmer_reward_puzzle_hash,
				amount: 250_000_000_000,
			},
			Coin {
				parent_coin_info: block.header_hash(),
				puzzle_hash: data.pool_target.puzzle_hash,
				amount: 1_750_000_000_000,
			},
		]
	}

	/// Mark a coin spent at the given height.
	pub fn set_spent(&self, coin_id: &Hash, sub_height: u32) -> Result<(), Error> {
		let mut records = self.records.write().unwrap();
		match records.get_mut(coin_id) {
			Some(r) => {
				r.spent_sub_height = Some(sub_height);
				Ok(())
			}
			None => Err(ErrorKind::NotFound(format!("coin {}", coin_id)).into()),
		}
	}
}

impl Default for MemCoinStore {
	fn default() -> MemCoinStore {
		MemCoinStore::new()
	}
}

impl CoinStore for MemCoinStore {
	fn new_block(&self, block: &FullBlock) -> Result<(), Error> {
		if !block.is_block() {
			return Ok(());
		}
		let mut records = self.records.write().unwrap();
		for coin in MemCoinStore::reward_coins(block) {
			let name = coin.name();
			records.entry(name).or_insert(CoinRecord {
				coin,
				confirmed_sub_height: block.height(),
				spent_sub_height: None,
				coinbase: true,
			});
		}
		Ok(())
	}

	fn rollback_to_block(&self, sub_height: u32) -> Result<(), Error> {
		let mut records = self.records.write().unwrap();
		records.retain(|_, r| r.confirmed_sub_height <= sub_height);
		for r in records.values_mut() {
			if let Some(spent) = r.spent_sub_height {
				if spent > sub_height {
					r.spent_sub_height = None;
				}
			}
		}
		Ok(())
	}

	fn get_coin_record(&self, coin_id: &Hash) -> Result<Option<CoinRecord>, Error> {
		Ok(self.records.read().unwrap().get(coin_id).cloned())
	}
}
