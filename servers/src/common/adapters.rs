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

//! Adapters between subsystems that must stay decoupled from each other.

use std::sync::Arc;

use arbor_chain::Blockchain;
use arbor_core::core::{CoinRecord, Hash, SubBlockRecord};
use arbor_pool::BlockChainView;

/// Implements the view of the blockchain required by the transaction pool
/// to operate. Mostly needed to break any direct lifecycle or
/// implementation dependency between the pool and the chain.
#[derive(Clone)]
pub struct PoolToChainAdapter {
	chain: Arc<Blockchain>,
}

impl PoolToChainAdapter {
	/// Create a new pool adapter over the chain.
	pub fn new(chain: Arc<Blockchain>) -> PoolToChainAdapter {
		PoolToChainAdapter { chain }
	}
}

impl BlockChainView for PoolToChainAdapter {
	fn peak(&self) -> Option<SubBlockRecord> {
		self.chain.get_peak()
	}

	fn coin_record(&self, coin_id: &Hash) -> Option<CoinRecord> {
		self.chain
			.coin_store()
			.get_coin_record(coin_id)
			.ok()
			.flatten()
	}
}
