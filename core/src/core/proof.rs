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

//! Proof-of-space value type. Plot format and quality-string lookups are a
//! collaborator concern, the node only carries the proof around and asks a
//! verifier for the resulting iteration requirement.

use crate::core::hash::{Hash, Hashed};

/// A farmer's claim that it holds a plot eligible for the given challenge.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ProofOfSpace {
	/// Challenge this proof answers.
	pub challenge: Hash,
	/// BLS public key of the pool this plot is tied to.
	pub pool_public_key: Vec<u8>,
	/// BLS public key of the plot itself.
	pub plot_public_key: Vec<u8>,
	/// Plot size parameter (k).
	pub size: u8,
	/// The space proof, opaque to the node.
	pub proof: Vec<u8>,
}

impl Hashed for ProofOfSpace {
	fn bytes(&self) -> Vec<u8> {
		let mut data = vec![];
		data.extend_from_slice(self.challenge.to_slice());
		data.extend_from_slice(&self.pool_public_key);
		data.extend_from_slice(&self.plot_public_key);
		data.push(self.size);
		data.extend_from_slice(&self.proof);
		data
	}
}
