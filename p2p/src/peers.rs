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

//! The registry of connected peers. The registry is the sole owner of the
//! connection set; everything else holds non-owning handles, so dropping a
//! peer here is what actually disconnects it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::msg::Message;
use crate::peer::Peer;
use crate::types::{NodeType, PeerId};

/// All currently connected peers, indexed by identity.
pub struct Peers {
	peers: RwLock<HashMap<PeerId, Arc<dyn Peer>>>,
}

impl Peers {
	/// An empty registry.
	pub fn new() -> Peers {
		Peers {
			peers: RwLock::new(HashMap::new()),
		}
	}

	/// Adds the peer to the registry, keyed by its identity.
	pub fn add_connected(&self, peer: Arc<dyn Peer>) {
		let id = peer.peer_node_id();
		let mut peers = self.peers.write().unwrap();
		peers.insert(id, peer);
	}

	/// Drops the peer from the registry. Returns the handle so the caller
	/// can close it.
	pub fn remove(&self, peer_id: &PeerId) -> Option<Arc<dyn Peer>> {
		self.peers.write().unwrap().remove(peer_id)
	}

	/// Handle for a connected peer, if still connected.
	pub fn get_connected_peer(&self, peer_id: &PeerId) -> Option<Arc<dyn Peer>> {
		self.peers.read().unwrap().get(peer_id).cloned()
	}

	/// Whether the peer is currently connected.
	pub fn is_connected(&self, peer_id: &PeerId) -> bool {
		self.peers.read().unwrap().contains_key(peer_id)
	}

	/// Number of connected peers, all classes.
	pub fn peer_count(&self) -> usize {
		self.peers.read().unwrap().len()
	}

	/// All connected peers.
	pub fn all_peers(&self) -> Vec<Arc<dyn Peer>> {
		self.peers.read().unwrap().values().cloned().collect()
	}

	/// All connected peers of one class.
	pub fn connected_peers(&self, node_type: NodeType) -> Vec<Arc<dyn Peer>> {
		self.peers
			.read()
			.unwrap()
			.values()
			.filter(|p| p.node_type() == node_type)
			.cloned()
			.collect()
	}

	/// Identities of all connected peers of one class.
	pub fn connected_peer_ids(&self, node_type: NodeType) -> Vec<PeerId> {
		self.connected_peers(node_type)
			.iter()
			.map(|p| p.peer_node_id())
			.collect()
	}

	/// Broadcast a message to every connected peer of the class.
	pub async fn send_to_all(&self, msg: Message, node_type: NodeType) {
		let peers = self.connected_peers(node_type);
		let mut count = 0;
		for peer in peers {
			if let Err(e) = peer.send(msg.clone()).await {
				debug!("send_to_all: skipped {}: {}", peer.peer_host(), e);
			} else {
				count += 1;
			}
		}
		trace!("send_to_all: sent to {} {:?} peers", count, node_type);
	}

	/// Broadcast a message to every connected peer of the class except one,
	/// typically the peer the payload came from.
	pub async fn send_to_all_except(&self, msg: Message, node_type: NodeType, except: PeerId) {
		let peers = self.connected_peers(node_type);
		for peer in peers {
			if peer.peer_node_id() == except {
				continue;
			}
			if let Err(e) = peer.send(msg.clone()).await {
				debug!("send_to_all_except: skipped {}: {}", peer.peer_host(), e);
			}
		}
	}
}

impl Default for Peers {
	fn default() -> Peers {
		Peers::new()
	}
}
