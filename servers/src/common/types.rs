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

//! Server types

use std::convert::From;
use std::fmt;

use arbor_chain as chain;
use arbor_core::core::Hash;
use arbor_p2p as p2p;
use arbor_pool::{PoolConfig, PoolError};

/// Sub-blocks behind an announced peak below which we backtrack one block
/// at a time instead of batching.
const DEFAULT_SHORT_SYNC_BEHIND: u32 = 20;

/// Sub-blocks behind an announced peak below which we batch-sync without a
/// weight proof.
const DEFAULT_SYNC_BEHIND: u32 = 300;

/// Error type wrapping underlying module errors.
#[derive(Debug)]
pub enum Error {
	/// Error originating from the blockchain implementation.
	Chain(chain::Error),
	/// Error originating from the peer-to-peer layer.
	P2P(p2p::Error),
	/// Error originating from the transaction pool.
	Pool(PoolError),
	/// Authoritative consensus rejection of a specific block.
	Consensus {
		/// Why the block was rejected.
		code: chain::ErrorKind,
		/// Header hash of the rejected block.
		header_hash: Hash,
	},
	/// A peer did not answer within its deadline.
	PeerTimeout,
	/// A peer answered with the wrong shape, weight or height.
	PeerLied(String),
	/// A sync attempt could not proceed; not fatal for the node.
	SyncFailed(String),
}

impl From<chain::Error> for Error {
	fn from(e: chain::Error) -> Error {
		Error::Chain(e)
	}
}

impl From<p2p::Error> for Error {
	fn from(e: p2p::Error) -> Error {
		match e {
			p2p::Error::Timeout => Error::PeerTimeout,
			p2p::Error::PeerLied(s) => Error::PeerLied(s),
			other => Error::P2P(other),
		}
	}
}

impl From<PoolError> for Error {
	fn from(e: PoolError) -> Error {
		Error::Pool(e)
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Error::Chain(e) => write!(f, "chain error: {}", e),
			Error::P2P(e) => write!(f, "p2p error: {}", e),
			Error::Pool(e) => write!(f, "pool error: {}", e),
			Error::Consensus { code, header_hash } => {
				write!(f, "consensus error {} for block {}", code, header_hash)
			}
			Error::PeerTimeout => write!(f, "peer timed out"),
			Error::PeerLied(s) => write!(f, "peer lied: {}", s),
			Error::SyncFailed(s) => write!(f, "sync failed: {}", s),
		}
	}
}

/// Full server configuration, aggregating what the different components
/// consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
	/// Path to the on-disk block and coin store.
	pub database_path: String,

	/// Total number of peers to aim for.
	#[serde(default = "default_target_peer_count")]
	pub target_peer_count: usize,

	/// How many of those we dial ourselves.
	#[serde(default = "default_target_outbound_peer_count")]
	pub target_outbound_peer_count: usize,

	/// Path to the persisted peer table for the discovery collaborator.
	pub peer_db_path: String,

	/// Introducer used for initial peer discovery.
	pub introducer_peer: Option<String>,

	/// Seconds between connection attempts of the discovery loop.
	#[serde(default = "default_peer_connect_interval")]
	pub peer_connect_interval: u64,

	/// Backtrack-sync cutoff, in sub-blocks above our peak.
	#[serde(default = "default_short_sync_behind")]
	pub short_sync_sub_blocks_behind_threshold: u32,

	/// Batch-sync cutoff, in sub-blocks above our peak.
	#[serde(default = "default_sync_behind")]
	pub sync_sub_blocks_behind_threshold: u32,

	/// Transaction pool configuration.
	#[serde(default)]
	pub pool_config: PoolConfig,
}

fn default_target_peer_count() -> usize {
	60
}

fn default_target_outbound_peer_count() -> usize {
	8
}

fn default_peer_connect_interval() -> u64 {
	500
}

fn default_short_sync_behind() -> u32 {
	DEFAULT_SHORT_SYNC_BEHIND
}

fn default_sync_behind() -> u32 {
	DEFAULT_SYNC_BEHIND
}

impl Default for ServerConfig {
	fn default() -> ServerConfig {
		ServerConfig {
			database_path: "db/blockchain.db".to_owned(),
			target_peer_count: default_target_peer_count(),
			target_outbound_peer_count: default_target_outbound_peer_count(),
			peer_db_path: "db/peers.dat".to_owned(),
			introducer_peer: None,
			peer_connect_interval: default_peer_connect_interval(),
			short_sync_sub_blocks_behind_threshold: default_short_sync_behind(),
			sync_sub_blocks_behind_threshold: default_sync_behind(),
			pool_config: PoolConfig::default(),
		}
	}
}

impl ServerConfig {
	/// Adapter for configuring the peer-to-peer layer.
	pub fn p2p_config(&self) -> p2p::P2PConfig {
		p2p::P2PConfig {
			target_peer_count: self.target_peer_count,
			target_outbound_peer_count: self.target_outbound_peer_count,
			peer_db_path: self.peer_db_path.clone(),
			introducer_peer: self.introducer_peer.clone(),
			peer_connect_interval: self.peer_connect_interval,
		}
	}
}
