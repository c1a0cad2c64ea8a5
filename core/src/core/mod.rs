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

//! Core types for the consensus layer.

pub mod block;
pub mod coin;
pub mod hash;
pub mod proof;
pub mod record;
pub mod sub_slot;
pub mod vdf;
pub mod verifier;

pub use self::block::{
	FoliageBlock, FoliageSubBlock, FoliageSubBlockData, FullBlock, PoolTarget,
	RewardChainSubBlock, RewardChainSubBlockUnfinished, SerializedProgram, SubEpochSummary,
	UnfinishedBlock,
};
pub use self::coin::{Coin, CoinRecord};
pub use self::hash::{Hash, Hashed, ZERO_HASH};
pub use self::proof::ProofOfSpace;
pub use self::record::SubBlockRecord;
pub use self::sub_slot::{
	ChallengeChainSubSlot, EndOfSubSlotBundle, InfusedChallengeChainSubSlot, RewardChainSubSlot,
	SignagePoint, SubSlotProofs,
};
pub use self::vdf::{InfusionPointVdfs, VdfInfo, VdfProof};
pub use self::verifier::{BlsVerify, ProofOfSpaceVerify, VdfVerify, Verifiers};
