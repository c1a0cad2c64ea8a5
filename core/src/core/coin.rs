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

//! Coins and their spent/unspent records, the conceptual schema the coin
//! store collaborator persists.

use byteorder::{BigEndian, WriteBytesExt};

use crate::core::hash::{Hash, Hashed};

/// A coin: an amount locked under a puzzle, created by a parent coin.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Coin {
	/// Id of the coin that created this one.
	pub parent_coin_info: Hash,
	/// Puzzle hash the amount is locked under.
	pub puzzle_hash: Hash,
	/// Amount in base units.
	pub amount: u64,
}

impl Hashed for Coin {
	fn bytes(&self) -> Vec<u8> {
		let mut data = self.parent_coin_info.to_vec();
		data.extend_from_slice(self.puzzle_hash.to_slice());
		data.write_u64::<BigEndian>(self.amount).unwrap();
		data
	}
}

impl Coin {
	/// The coin id, hash of its canonical serialization.
	pub fn name(&self) -> Hash {
		self.hash()
	}
}

/// A coin together with its confirmation and spend status.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct CoinRecord {
	/// The coin itself.
	pub coin: Coin,
	/// Height of the sub-block that confirmed the coin.
	pub confirmed_sub_height: u32,
	/// Height of the sub-block that spent it, if spent.
	pub spent_sub_height: Option<u32>,
	/// True for farmer / pool reward coins.
	pub coinbase: bool,
}

impl CoinRecord {
	/// Whether the coin is still unspent.
	pub fn unspent(&self) -> bool {
		self.spent_sub_height.is_none()
	}
}
