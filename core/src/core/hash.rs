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

//! Hash function and the `Hashed` trait.
//!
//! Primary hash function used to identify blocks, sub-slots, coins and
//! unfinished blocks throughout the protocol.

use std::fmt;

use blake2_rfc::blake2b::blake2b;

/// A hash to uniquely (or close enough) identify one of the main blockchain
/// constructs. Used pervasively for sub-blocks, sub-slots and coins.
#[derive(Copy, Clone, PartialEq, PartialOrd, Eq, Ord, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl fmt::Display for Hash {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for i in self.0.iter().cloned() {
			write!(f, "{:02x}", i)?;
		}
		Ok(())
	}
}

impl fmt::Debug for Hash {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		// abbreviated form, full hashes drown the logs
		for i in self.0[..4].iter().cloned() {
			write!(f, "{:02x}", i)?;
		}
		Ok(())
	}
}

impl Hash {
	/// Creates a new hash from a vector, which must hold at least 32 bytes.
	pub fn from_vec(v: Vec<u8>) -> Hash {
		let mut a = [0; 32];
		a.copy_from_slice(&v[..32]);
		Hash(a)
	}

	/// Converts the hash to a byte vector.
	pub fn to_vec(&self) -> Vec<u8> {
		self.0.to_vec()
	}

	/// Converts the hash to a byte slice.
	pub fn to_slice(&self) -> &[u8] {
		&self.0
	}
}

/// The hash of all zeroes, doubling as the marker for "no previous".
pub const ZERO_HASH: Hash = Hash([0; 32]);

/// A trait for types that get their hash from their canonical byte
/// serialization.
pub trait Hashed {
	/// Canonical byte serialization of the type, the hash preimage.
	fn bytes(&self) -> Vec<u8>;

	/// The hash of the canonical serialization.
	fn hash(&self) -> Hash {
		let data = self.bytes();
		Hash::from_vec(blake2b(32, &[], &data).as_bytes().to_vec())
	}
}

impl Hashed for [u8] {
	fn bytes(&self) -> Vec<u8> {
		self.to_owned()
	}
}

impl Hashed for Vec<u8> {
	fn bytes(&self) -> Vec<u8> {
		self.clone()
	}
}

/// Hash of a domain-separation tag, handy for deriving well-known protocol
/// constants (genesis challenges and the like).
pub fn tag_hash(tag: &str) -> Hash {
	tag.as_bytes().hash()
}
