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

//! Message types exchanged with the four peer classes. Request/response
//! pairs travel through the [`crate::Peer`] calls; everything else is
//! wrapped in [`Message`] and broadcast through the registry.

use arbor_chain::WeightProof;
use arbor_core::core::{
	EndOfSubSlotBundle, FoliageSubBlock, FullBlock, Hash, InfusionPointVdfs,
	RewardChainSubBlock, RewardChainSubBlockUnfinished, SubEpochSummary, UnfinishedBlock,
};

/// A peer announces its peak.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct NewPeak {
	/// Header hash of the announced peak.
	pub header_hash: Hash,
	/// Height of the announced peak.
	pub sub_block_height: u32,
	/// Weight of the announced peak.
	pub weight: u128,
	/// The sender's fork point against its previous peak, a hint to avoid
	/// redundant ancestry walks.
	pub fork_point_hint: u32,
	/// Trunk hash of the peak, to skip re-downloading transactions we hold.
	pub unfinished_reward_hash: Hash,
}

/// Request one sub-block by height.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RequestSubBlock {
	/// Height requested.
	pub sub_block_height: u32,
	/// Whether to include the transactions generator.
	pub include_transactions: bool,
}

/// One sub-block, answering [`RequestSubBlock`].
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RespondSubBlock {
	/// The sub-block.
	pub sub_block: FullBlock,
}

/// Request a range of sub-blocks.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RequestSubBlocks {
	/// First height requested.
	pub start_sub_height: u32,
	/// Last height requested, inclusive.
	pub end_sub_height: u32,
	/// Whether to include transactions generators.
	pub include_transactions: bool,
}

/// A range of sub-blocks, answering [`RequestSubBlocks`].
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RespondSubBlocks {
	/// First height included.
	pub start_sub_height: u32,
	/// Last height included.
	pub end_sub_height: u32,
	/// The sub-blocks, ascending by height.
	pub sub_blocks: Vec<FullBlock>,
}

/// The peer cannot serve the requested range.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RejectSubBlocks {
	/// First height of the rejected range.
	pub start_sub_height: u32,
	/// Last height of the rejected range.
	pub end_sub_height: u32,
}

/// Request a weight proof for a peak.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RequestProofOfWeight {
	/// Height of the peak the proof must reach.
	pub sub_block_height: u32,
	/// Header hash of that peak.
	pub tip: Hash,
}

/// A weight proof, answering [`RequestProofOfWeight`].
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RespondProofOfWeight {
	/// The proof.
	pub wp: WeightProof,
	/// Header hash of the proven peak.
	pub tip: Hash,
}

/// Advertises a new signage point or end of sub-slot to other full nodes.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct NewSignagePointOrEndOfSubSlot {
	/// Challenge the advertised object chains from.
	pub prev_challenge_hash: Option<Hash>,
	/// Challenge chain hash of the advertised object.
	pub challenge_hash: Hash,
	/// Signage point index, 0 for an end of sub-slot.
	pub index_from_challenge: u8,
	/// Last reward chain infusion before the object.
	pub last_rc_infusion: Hash,
}

/// Ask a peer for a signage point or end of sub-slot we are missing.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RequestSignagePointOrEndOfSubSlot {
	/// Challenge chain hash wanted.
	pub challenge_hash: Hash,
	/// Signage point index, 0 for an end of sub-slot.
	pub index_from_challenge: u8,
	/// Last reward chain infusion seen.
	pub last_rc_infusion: Hash,
}

/// A finished end of sub-slot from a peer or timelord.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RespondEndOfSubSlot {
	/// The finished sub-slot.
	pub end_of_slot_bundle: EndOfSubSlotBundle,
}

/// Ask a freshly connected peer for the mempool entries our filter lacks.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RequestMempoolTransactions {
	/// Serialized filter of the transactions we already hold.
	pub filter: Vec<u8>,
}

/// Advertises an unfinished block by trunk hash.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct NewUnfinishedSubBlock {
	/// Trunk hash of the unfinished block.
	pub unfinished_reward_hash: Hash,
}

/// A complete unfinished block.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RespondUnfinishedSubBlock {
	/// The unfinished block.
	pub unfinished_sub_block: UnfinishedBlock,
}

/// Infusion point VDFs from a timelord for an unfinished block we relayed.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct NewInfusionPointVdf {
	/// The VDFs and proofs.
	pub infusion: InfusionPointVdfs,
}

/// Peak package for timelords: everything they need to continue their
/// chains on top of it.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TimelordNewPeak {
	/// Trunk of the peak.
	pub reward_chain_sub_block: RewardChainSubBlock,
	/// Difficulty after the peak.
	pub difficulty: u64,
	/// Deficit at the peak.
	pub deficit: u8,
	/// Sub-slot iterations after the peak.
	pub sub_slot_iters: u64,
	/// Summary the next block would include, if at a boundary.
	pub sub_epoch_summary: Option<SubEpochSummary>,
	/// Recent reward chain infusions, oldest first.
	pub recent_reward_challenges: Vec<(Hash, u128)>,
	/// Total iterations of the last challenge block or end of slot.
	pub last_challenge_sb_or_eos_total_iters: u128,
}

/// Unfinished block package for timelords.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TimelordNewUnfinishedSubBlock {
	/// Trunk of the unfinished block.
	pub reward_chain_sub_block: RewardChainSubBlockUnfinished,
	/// Difficulty in force for the block.
	pub difficulty: u64,
	/// Sub-slot iterations in force for the block.
	pub sub_slot_iters: u64,
	/// Foliage of the unfinished block.
	pub foliage_sub_block: FoliageSubBlock,
	/// Summary the block would include, if at a boundary.
	pub sub_epoch_summary: Option<SubEpochSummary>,
	/// Reward chain challenge preceding the block.
	pub rc_prev: Hash,
}

/// Peak announcement shaped for wallets.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct WalletNewPeak {
	/// Header hash of the peak.
	pub header_hash: Hash,
	/// Height of the peak.
	pub sub_block_height: u32,
	/// Weight of the peak.
	pub weight: u128,
	/// Fork point against the previous peak the wallet saw.
	pub fork_point: u32,
}

/// New signage point for farmers, with the parameters to farm against.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FarmerNewSignagePoint {
	/// Challenge the signage point descends from.
	pub challenge_hash: Hash,
	/// Challenge chain hash of the signage point.
	pub challenge_chain_sp: Hash,
	/// Reward chain hash of the signage point.
	pub reward_chain_sp: Hash,
	/// Current difficulty.
	pub difficulty: u64,
	/// Current sub-slot iterations.
	pub sub_slot_iters: u64,
	/// Index of the signage point.
	pub signage_point_index: u8,
}

/// Envelope for everything the node pushes to peers outside a
/// request/response exchange.
#[derive(Clone, Debug)]
pub enum Message {
	/// Peak announcement to full nodes.
	NewPeak(NewPeak),
	/// Signage point or end of sub-slot advertisement to full nodes.
	NewSignagePointOrEndOfSubSlot(NewSignagePointOrEndOfSubSlot),
	/// Request for a missing signage point or end of sub-slot.
	RequestSignagePointOrEndOfSubSlot(RequestSignagePointOrEndOfSubSlot),
	/// Unfinished block advertisement to full nodes.
	NewUnfinishedSubBlock(NewUnfinishedSubBlock),
	/// Mempool diff request to a freshly connected full node.
	RequestMempoolTransactions(RequestMempoolTransactions),
	/// Peak package to timelords.
	TimelordNewPeak(TimelordNewPeak),
	/// Unfinished block package to timelords.
	TimelordNewUnfinishedSubBlock(TimelordNewUnfinishedSubBlock),
	/// Peak announcement to wallets.
	WalletNewPeak(WalletNewPeak),
	/// Signage point announcement to farmers.
	FarmerNewSignagePoint(FarmerNewSignagePoint),
}
