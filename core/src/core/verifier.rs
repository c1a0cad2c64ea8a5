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

//! Seams for the cryptographic collaborators. The chain pipeline is
//! parameterized over these traits the same way it is over its stores; the
//! actual classgroup, plot and BLS routines live outside this repository.

use std::sync::Arc;

use crate::core::hash::Hash;
use crate::core::proof::ProofOfSpace;
use crate::core::vdf::{VdfInfo, VdfProof};

/// Proof-of-space verification. Returns the number of VDF iterations the
/// proof quality requires before the block can be infused, or `None` if the
/// proof does not verify for the challenge.
pub trait ProofOfSpaceVerify: Send + Sync {
	/// Verify the proof against the challenge and derive `required_iters`.
	fn required_iters(
		&self,
		pos: &ProofOfSpace,
		challenge: &Hash,
		signage_point_index: u8,
	) -> Option<u64>;
}

/// Verifies a VDF output against its witness.
pub trait VdfVerify: Send + Sync {
	/// True if the proof is a valid witness for the claimed VDF output.
	fn verify(&self, info: &VdfInfo, proof: &VdfProof) -> bool;
}

/// Verifies BLS signatures (foliage, pool and signage-point signatures).
pub trait BlsVerify: Send + Sync {
	/// True if `signature` is valid for `message` under `public_key`.
	fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;
}

/// The bundle of verifiers injected into the chain pipeline.
#[derive(Clone)]
pub struct Verifiers {
	/// Proof-of-space collaborator.
	pub pospace: Arc<dyn ProofOfSpaceVerify>,
	/// VDF collaborator.
	pub vdf: Arc<dyn VdfVerify>,
	/// BLS signature collaborator.
	pub bls: Arc<dyn BlsVerify>,
}
