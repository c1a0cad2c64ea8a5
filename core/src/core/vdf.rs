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

//! Verifiable-delay-function value types. The classgroup arithmetic itself is
//! a collaborator behind the verifier traits; here VDF outputs and proofs are
//! opaque byte strings with a canonical serialization.

use byteorder::{BigEndian, WriteBytesExt};

use crate::core::hash::{Hash, Hashed};

/// Output of a VDF evaluation: the challenge it started from, how many
/// iterations were run and the resulting (opaque) classgroup element.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct VdfInfo {
	/// Challenge the VDF was seeded with.
	pub challenge: Hash,
	/// Number of iterations the VDF claims to have run.
	pub number_of_iterations: u64,
	/// Serialized classgroup element produced at the end of the run.
	pub output: Vec<u8>,
}

impl Hashed for VdfInfo {
	fn bytes(&self) -> Vec<u8> {
		let mut data = vec![];
		data.extend_from_slice(self.challenge.to_slice());
		data.write_u64::<BigEndian>(self.number_of_iterations).unwrap();
		data.extend_from_slice(&self.output);
		data
	}
}

/// Witness allowing fast verification of a [`VdfInfo`].
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct VdfProof {
	/// Witness type, determines the verification recursion depth.
	pub witness_type: u8,
	/// Serialized witness data.
	pub witness: Vec<u8>,
}

/// The infusion-point VDFs and proofs a timelord produces for one unfinished
/// block, everything needed to close it into a full sub-block.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct InfusionPointVdfs {
	/// Trunk hash of the unfinished block these VDFs infuse.
	pub unfinished_reward_hash: Hash,
	/// Challenge chain infusion VDF.
	pub challenge_chain_ip_vdf: VdfInfo,
	/// Proof for the challenge chain infusion VDF.
	pub challenge_chain_ip_proof: VdfProof,
	/// Reward chain infusion VDF.
	pub reward_chain_ip_vdf: VdfInfo,
	/// Proof for the reward chain infusion VDF.
	pub reward_chain_ip_proof: VdfProof,
	/// Infused challenge chain VDF, absent before the first infusion of the
	/// current challenge block.
	pub infused_challenge_chain_ip_vdf: Option<VdfInfo>,
	/// Proof for the infused challenge chain VDF.
	pub infused_challenge_chain_ip_proof: Option<VdfProof>,
}
