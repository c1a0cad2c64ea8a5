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

//! Base types for the peer-to-peer layer.

use std::fmt;

/// Identity of a peer, derived from its transport certificate.
#[derive(Copy, Clone, PartialEq, PartialOrd, Eq, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl fmt::Display for PeerId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for i in self.0[..8].iter().cloned() {
			write!(f, "{:02x}", i)?;
		}
		Ok(())
	}
}

impl fmt::Debug for PeerId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

/// The class a connected peer belongs to; broadcasts are fanned out per
/// class.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum NodeType {
	/// Another full node.
	FullNode,
	/// A wallet following the chain through us.
	Wallet,
	/// A timelord running VDFs for us.
	Timelord,
	/// A farmer looking for signage points.
	Farmer,
}

bitflags! {
	/// Options for what type of interaction a peer supports
	#[derive(Serialize, Deserialize)]
	pub struct Capabilities: u32 {
		/// We don't know (yet) what the peer can do.
		const UNKNOWN = 0b0000_0000;
		/// Can provide full history of sub-blocks.
		const FULL_HIST = 0b0000_0001;
		/// Can provide recent sub-blocks and weight proofs.
		const FAST_SYNC_NODE = 0b0000_0010;
		/// Can relay unfinished blocks and signage points.
		const UNFINISHED_RELAY = 0b0000_0100;
		/// All capabilities of a full node.
		const FULL_NODE = Capabilities::FULL_HIST.bits
			| Capabilities::FAST_SYNC_NODE.bits
			| Capabilities::UNFINISHED_RELAY.bits;
	}
}

/// Errors on the peer-to-peer surface.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Error {
	/// The request did not complete within its deadline.
	Timeout,
	/// The connection is gone.
	ConnectionClosed,
	/// The peer answered with a reject.
	Rejected,
	/// The peer answered with something of the wrong shape or content.
	PeerLied(String),
	/// Failure while handing a message to the transport.
	Send(String),
	/// Anything else.
	Internal(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Error::Timeout => write!(f, "peer request timed out"),
			Error::ConnectionClosed => write!(f, "connection closed"),
			Error::Rejected => write!(f, "peer rejected the request"),
			Error::PeerLied(s) => write!(f, "peer lied: {}", s),
			Error::Send(s) => write!(f, "send failed: {}", s),
			Error::Internal(s) => write!(f, "p2p error: {}", s),
		}
	}
}

/// Configuration for the peer-to-peer layer, fed by the node config.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct P2PConfig {
	/// Total number of peers to aim for.
	pub target_peer_count: usize,
	/// How many of those we dial ourselves.
	pub target_outbound_peer_count: usize,
	/// Path to the persisted peer table.
	pub peer_db_path: String,
	/// Introducer used for initial discovery.
	pub introducer_peer: Option<String>,
	/// Seconds between connection attempts of the discovery loop.
	pub peer_connect_interval: u64,
}

impl Default for P2PConfig {
	fn default() -> P2PConfig {
		P2PConfig {
			target_peer_count: 60,
			target_outbound_peer_count: 8,
			peer_db_path: "db/peers.dat".to_owned(),
			introducer_peer: None,
			peer_connect_interval: 500,
		}
	}
}
