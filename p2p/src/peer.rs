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

//! The handle the node holds for one connected peer. The transport
//! implements this; the node only ever talks through it. Connections are
//! owned exclusively by the registry, handles are non-owning and safe to
//! clone into tasks.

use async_trait::async_trait;

use crate::msg::{
	Message, RejectSubBlocks, RequestProofOfWeight, RequestSubBlock, RequestSubBlocks,
	RespondProofOfWeight, RespondSubBlock, RespondSubBlocks,
};
use crate::types::{Error, NodeType, PeerId};

/// Answer to a ranged sub-block request.
#[derive(Clone, Debug)]
pub enum SubBlocksReply {
	/// The blocks.
	SubBlocks(RespondSubBlocks),
	/// The peer cannot serve the range.
	Reject(RejectSubBlocks),
}

/// One connected peer. Every call suspends at the transport; callers wrap
/// requests in their own deadline.
#[async_trait]
pub trait Peer: Send + Sync {
	/// Stable identity of the peer.
	fn peer_node_id(&self) -> PeerId;

	/// The class this peer connected as.
	fn node_type(&self) -> NodeType;

	/// Printable address for logs.
	fn peer_host(&self) -> String;

	/// Whether the connection has been torn down.
	fn is_closed(&self) -> bool;

	/// Tear the connection down.
	async fn close(&self);

	/// Push a message without awaiting an answer.
	async fn send(&self, msg: Message) -> Result<(), Error>;

	/// Fetch one sub-block by height.
	async fn request_sub_block(&self, request: RequestSubBlock)
		-> Result<RespondSubBlock, Error>;

	/// Fetch a range of sub-blocks.
	async fn request_sub_blocks(&self, request: RequestSubBlocks)
		-> Result<SubBlocksReply, Error>;

	/// Fetch a weight proof for a peak this peer announced.
	async fn request_proof_of_weight(
		&self,
		request: RequestProofOfWeight,
	) -> Result<RespondProofOfWeight, Error>;
}
