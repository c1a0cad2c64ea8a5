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

//! Shared view of the synchronization state: whether we are in sync mode,
//! which peak each peer last announced, which peak we are syncing towards
//! and which peers are currently serving us a batch sync.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use arbor_core::core::Hash;
use arbor_p2p::PeerId;

struct Inner {
	sync_mode: bool,
	target_hash: Option<Hash>,
	target_height: Option<u32>,
	// peer -> last announced (peak hash, height, weight)
	peer_peaks: HashMap<PeerId, (Hash, u32, u128)>,
	// reverse index: peak hash -> peers known to hold it
	peak_peers: HashMap<Hash, HashSet<PeerId>>,
	// peers currently serving us a batch sync, at most once each
	batch_syncing: HashSet<PeerId>,
}

/// Synchronization bookkeeping shared by the message handlers and the
/// long-sync task.
pub struct SyncState {
	inner: RwLock<Inner>,
	peers_changed: AtomicBool,
}

impl SyncState {
	/// Fresh state: not syncing, nothing known.
	pub fn new() -> SyncState {
		SyncState {
			inner: RwLock::new(Inner {
				sync_mode: false,
				target_hash: None,
				target_height: None,
				peer_peaks: HashMap::new(),
				peak_peers: HashMap::new(),
				batch_syncing: HashSet::new(),
			}),
			peers_changed: AtomicBool::new(false),
		}
	}

	/// Whether the long-sync path currently owns peak advancement.
	pub fn sync_mode(&self) -> bool {
		self.inner.read().unwrap().sync_mode
	}

	/// Enter or leave sync mode.
	pub fn set_sync_mode(&self, mode: bool) {
		self.inner.write().unwrap().sync_mode = mode;
	}

	/// Remember the peak we are syncing towards.
	pub fn set_peak_target(&self, hash: Hash, height: u32) {
		let mut inner = self.inner.write().unwrap();
		inner.target_hash = Some(hash);
		inner.target_height = Some(height);
	}

	/// Header hash of the sync target, if one is set.
	pub fn target_hash(&self) -> Option<Hash> {
		self.inner.read().unwrap().target_hash
	}

	/// Height of the sync target, if one is set.
	pub fn target_height(&self) -> Option<u32> {
		self.inner.read().unwrap().target_height
	}

	/// Record that a peer announced (or was verified to hold) a peak.
	pub fn add_peak_peer(&self, peak_hash: Hash, peer: PeerId, weight: u128, height: u32) {
		let mut inner = self.inner.write().unwrap();
		if let Some((old_hash, _, _)) = inner.peer_peaks.insert(peer, (peak_hash, height, weight))
		{
			if old_hash != peak_hash {
				if let Some(set) = inner.peak_peers.get_mut(&old_hash) {
					set.remove(&peer);
				}
			}
		}
		inner
			.peak_peers
			.entry(peak_hash)
			.or_insert_with(HashSet::new)
			.insert(peer);
		drop(inner);
		self.peers_changed.store(true, Ordering::Relaxed);
	}

	/// Peers known to hold the given peak.
	pub fn get_peak_peers(&self, peak_hash: &Hash) -> HashSet<PeerId> {
		self.inner
			.read()
			.unwrap()
			.peak_peers
			.get(peak_hash)
			.cloned()
			.unwrap_or_default()
	}

	/// Announced peaks of the given peers.
	pub fn peer_peaks(&self, peers: &[PeerId]) -> Vec<(Hash, u32, u128)> {
		let inner = self.inner.read().unwrap();
		peers
			.iter()
			.filter_map(|p| inner.peer_peaks.get(p).cloned())
			.collect()
	}

	/// Heaviest peak announced by any of the given peers.
	pub fn get_heaviest_peak(&self, peers: &[PeerId]) -> Option<(Hash, u32, u128)> {
		self.peer_peaks(peers)
			.into_iter()
			.max_by_key(|(_, _, weight)| *weight)
	}

	/// Mark a peer as serving us a batch sync. False if it already is, in
	/// which case the caller must not start another one.
	pub fn batch_syncing_insert(&self, peer: PeerId) -> bool {
		self.inner.write().unwrap().batch_syncing.insert(peer)
	}

	/// Unmark a peer as serving a batch sync; success and failure paths
	/// both end up here.
	pub fn batch_syncing_remove(&self, peer: &PeerId) {
		self.inner.write().unwrap().batch_syncing.remove(peer);
	}

	/// Whether a peer currently serves us a batch sync.
	pub fn batch_syncing_contains(&self, peer: &PeerId) -> bool {
		self.inner.read().unwrap().batch_syncing.contains(peer)
	}

	/// Number of batch syncs in flight.
	pub fn batch_syncing_len(&self) -> usize {
		self.inner.read().unwrap().batch_syncing.len()
	}

	/// A peer went away: forget its peak and wake the long-sync loop up so
	/// it can re-poll its peer list.
	pub fn peer_disconnected(&self, peer: &PeerId) {
		let mut inner = self.inner.write().unwrap();
		if let Some((peak_hash, _, _)) = inner.peer_peaks.remove(peer) {
			if let Some(set) = inner.peak_peers.get_mut(&peak_hash) {
				set.remove(peer);
			}
		}
		inner.batch_syncing.remove(peer);
		drop(inner);
		self.peers_changed.store(true, Ordering::Relaxed);
	}

	/// Take-and-clear the peers-changed signal.
	pub fn peers_changed_take(&self) -> bool {
		self.peers_changed.swap(false, Ordering::Relaxed)
	}

	/// Drop all sync information: target, peer peaks and batch membership.
	pub fn clear_sync_info(&self) {
		let mut inner = self.inner.write().unwrap();
		inner.target_hash = None;
		inner.target_height = None;
		inner.peer_peaks.clear();
		inner.peak_peers.clear();
	}
}

impl Default for SyncState {
	fn default() -> SyncState {
		SyncState::new()
	}
}
