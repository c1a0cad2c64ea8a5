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

//! Sync coordination. A peak announcement picks one of three strategies by
//! distance: backtrack one block at a time, batch-download a nearby range,
//! or run a full long sync anchored on a weight proof. Only the long sync
//! flips the node into sync mode; the short paths reuse the normal block
//! ingestion.

use std::cmp::min;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::seq::SliceRandom;
use rand::thread_rng;
use tokio::time::{sleep, timeout};

use arbor_core::core::{FullBlock, Hash};
use arbor_p2p::msg::{
	Message, NewPeak, RequestProofOfWeight, RequestSubBlock, RequestSubBlocks, WalletNewPeak,
};
use arbor_p2p::{NodeType, Peer, PeerId, SubBlocksReply};
use arbor_chain::ReceiveBlockResult;

use crate::arbor::node::FullNode;
use crate::common::types::Error;

/// Deadline for a single request to one peer.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for a weight proof, which is a much larger download.
const WEIGHT_PROOF_TIMEOUT: Duration = Duration::from_secs(60);

/// How far below our own peak the backtrack strategy searches for a fork
/// point before giving up.
const BACKTRACK_DEPTH: u32 = 5;

/// Outcome of one committed batch.
pub struct BatchAddResult {
	/// Whether the peak moved while the batch was applied.
	pub advanced_peak: bool,
	/// Fork height of the last peak transition in the batch.
	pub fork_height: Option<u32>,
}

impl FullNode {
	/// A peer announced a new peak: gatekeep, then pick a sync strategy.
	pub async fn new_peak(
		&self,
		request: NewPeak,
		peer: &Arc<dyn Peer>,
	) -> Result<(), Error> {
		// track this peak/peer combination in case we want to sync to it
		self.sync_state.add_peak_peer(
			request.header_hash,
			peer.peer_node_id(),
			request.weight,
			request.sub_block_height,
		);

		if self.blockchain.contains_sub_block(&request.header_hash) {
			return Ok(());
		}

		// not interested in less heavy peaks
		let peak = self.blockchain.get_peak();
		let curr_peak_height = peak.as_ref().map(|p| p.sub_block_height).unwrap_or(0);
		if let Some(ref p) = peak {
			if p.weight > request.weight {
				return Ok(());
			}
		}

		if self.sync_state.sync_mode() {
			// while syncing, only refresh peer information for the target:
			// if this peer is not yet known to hold it, ask
			let (target_hash, target_height) = match (
				self.sync_state.target_hash(),
				self.sync_state.target_height(),
			) {
				(Some(h), Some(height)) => (h, height),
				_ => return Ok(()),
			};
			if request.header_hash != target_hash
				&& !self
					.sync_state
					.get_peak_peers(&target_hash)
					.contains(&peer.peer_node_id())
			{
				let response = timeout(
					REQUEST_TIMEOUT,
					peer.request_sub_block(RequestSubBlock {
						sub_block_height: target_height,
						include_transactions: false,
					}),
				)
				.await;
				if let Ok(Ok(respond)) = response {
					if respond.sub_block.header_hash() == target_hash {
						self.sync_state.add_peak_peer(
							target_hash,
							peer.peer_node_id(),
							respond.sub_block.weight(),
							target_height,
						);
					}
				}
			}
			return Ok(());
		}

		if request.sub_block_height
			<= curr_peak_height + self.config.short_sync_sub_blocks_behind_threshold
		{
			// the normal case of receiving the next sub-block
			debug!("doing backtrack sync");
			if self
				.short_sync_backtrack(peer, curr_peak_height, request.sub_block_height)
				.await?
			{
				return Ok(());
			}
		}

		if request.sub_block_height < self.constants.weight_proof_recent_blocks {
			// syncing more than a few blocks at the start of the chain
			// TODO: anchor weight proofs at the chain start so this special
			// case can go away
			debug!("doing batch sync, no backup");
			self.short_sync_batch(peer, 0, request.sub_block_height).await?;
			return Ok(());
		}

		if request.sub_block_height
			< curr_peak_height + self.config.sync_sub_blocks_behind_threshold
		{
			// behind, but not by that much
			debug!("doing batch sync");
			if self
				.short_sync_batch(
					peer,
					curr_peak_height.saturating_sub(20),
					request.sub_block_height,
				)
				.await?
			{
				return Ok(());
			}
		}

		// either the short strategies could not find the fork point, or we
		// are very far behind: long sync
		let node = self.myself();
		let handle = tokio::spawn(async move {
			node.sync().await;
		});
		*self.sync_task.lock().unwrap() = Some(handle);
		Ok(())
	}

	/// Backtrack sync: download sub-blocks one at a time from newest to
	/// oldest until the parent connects. True iff the fork point was found
	/// within [`BACKTRACK_DEPTH`] of our peak.
	pub async fn short_sync_backtrack(
		&self,
		peer: &Arc<dyn Peer>,
		peak_sub_height: u32,
		target_sub_height: u32,
	) -> Result<bool, Error> {
		let floor = peak_sub_height.saturating_sub(BACKTRACK_DEPTH);
		let mut curr_sub_height = target_sub_height;
		let mut found_fork_point = false;
		let mut responses = vec![];
		loop {
			let respond = timeout(
				REQUEST_TIMEOUT,
				peer.request_sub_block(RequestSubBlock {
					sub_block_height: curr_sub_height,
					include_transactions: true,
				}),
			)
			.await
			.map_err(|_| Error::PeerTimeout)?
			.map_err(|e| {
				Error::SyncFailed(format!(
					"failed to fetch sub-block {} from {}: {}",
					curr_sub_height,
					peer.peer_host(),
					e
				))
			})?;
			let connects = self
				.blockchain
				.contains_sub_block(&respond.sub_block.prev_header_hash())
				|| respond.sub_block.prev_header_hash() == self.constants.genesis_prev_hash;
			responses.push(respond);
			if connects {
				found_fork_point = true;
				break;
			}
			if curr_sub_height == 0 || curr_sub_height <= floor {
				break;
			}
			curr_sub_height -= 1;
		}
		if found_fork_point {
			for response in responses.into_iter().rev() {
				self.respond_sub_block(response, Some(peer.peer_node_id()))
					.await?;
			}
		}
		Ok(found_fork_point)
	}

	/// Batch short-sync: download `[start, target]` in windows. If the
	/// first block does not connect to our chain this is a deep fork and we
	/// return false so the caller can fall back to a long sync.
	pub async fn short_sync_batch(
		&self,
		peer: &Arc<dyn Peer>,
		start_sub_height: u32,
		target_sub_height: u32,
	) -> Result<bool, Error> {
		if start_sub_height > 0 {
			let first = timeout(
				REQUEST_TIMEOUT,
				peer.request_sub_block(RequestSubBlock {
					sub_block_height: start_sub_height,
					include_transactions: false,
				}),
			)
			.await
			.map_err(|_| Error::PeerTimeout)?
			.map_err(|e| {
				Error::SyncFailed(format!(
					"could not fetch sub-block at height {}: {}",
					start_sub_height, e
				))
			})?;
			if !self
				.blockchain
				.contains_sub_block(&first.sub_block.prev_header_hash())
			{
				// first block not connected to our chain, long sync instead
				info!("batch syncing stopped, this is a deep chain");
				return Ok(false);
			}
		}

		// at most one concurrent batch sync per peer
		if !self.sync_state.batch_syncing_insert(peer.peer_node_id()) {
			return Ok(true);
		}
		info!(
			"starting batch short sync from {} to height {}",
			start_sub_height, target_sub_height
		);

		let result = self
			.short_sync_batch_inner(peer, start_sub_height, target_sub_height)
			.await;
		self.sync_state.batch_syncing_remove(&peer.peer_node_id());
		result?;
		Ok(true)
	}

	async fn short_sync_batch_inner(
		&self,
		peer: &Arc<dyn Peer>,
		start_sub_height: u32,
		target_sub_height: u32,
	) -> Result<(), Error> {
		let batch_size = self.constants.max_block_count_per_requests;
		let mut sub_height = start_sub_height;
		while sub_height <= target_sub_height {
			let end_height = min(target_sub_height, sub_height + batch_size - 1);
			let request = RequestSubBlocks {
				start_sub_height: sub_height,
				end_sub_height: end_height,
				include_transactions: true,
			};
			let reply = timeout(REQUEST_TIMEOUT, peer.request_sub_blocks(request))
				.await
				.map_err(|_| Error::PeerTimeout)?
				.map_err(Error::from)?;
			let blocks = match reply {
				SubBlocksReply::SubBlocks(r) => r.sub_blocks,
				SubBlocksReply::Reject(_) => {
					return Err(Error::SyncFailed(format!(
						"invalid response for sub-blocks {}-{}",
						sub_height, end_height
					)));
				}
			};
			{
				let _lock = self.blockchain.lock.lock().await;
				let batch = self
					.receive_sub_block_batch(blocks, peer.peer_node_id(), None)
					.await?;
				if batch.advanced_peak {
					let peak = self.blockchain.get_peak().ok_or_else(|| {
						Error::SyncFailed("no peak after batch commit".to_owned())
					})?;
					let peak_fb = self.blockchain.get_full_peak()?.ok_or_else(|| {
						Error::SyncFailed("peak block missing from store".to_owned())
					})?;
					let fork_height = batch.fork_height.unwrap_or(0);
					self.peak_post_processing(
						&peak_fb,
						&peak,
						fork_height,
						Some(peer.peer_node_id()),
					)
					.await?;
					info!("added sub-blocks {}-{}", sub_height, end_height);
				}
			}
			if end_height == target_sub_height {
				break;
			}
			sub_height = end_height + 1;
		}
		Ok(())
	}

	/// Pre-validate and commit an ordered batch. The caller must hold the
	/// blockchain lock. The fork point hint is consumed only until the peak
	/// first advances, to avoid redundant ancestry walks.
	pub async fn receive_sub_block_batch(
		&self,
		blocks: Vec<FullBlock>,
		peer: PeerId,
		fork_point: Option<u32>,
	) -> Result<BatchAddResult, Error> {
		let mut advanced_peak = false;
		let mut fork_height: Option<u32> = Some(0);
		let pre_validation_results = self.blockchain.pre_validate_blocks(blocks.clone()).await?;

		for (i, block) in blocks.iter().enumerate() {
			if let Some(ref e) = pre_validation_results[i].error {
				error!("invalid block from peer {}: {}", peer, e);
				return Err(Error::Consensus {
					code: e.clone(),
					header_hash: block.header_hash(),
				});
			}
			let hint = if advanced_peak { None } else { fork_point };
			let (result, error, fh) =
				self.blockchain
					.receive_block(block, &pre_validation_results[i], hint);
			match result {
				ReceiveBlockResult::NewPeak => {
					advanced_peak = true;
					fork_height = fh;
				}
				ReceiveBlockResult::InvalidBlock | ReceiveBlockResult::DisconnectedBlock => {
					let code = error.unwrap_or(arbor_chain::ErrorKind::Other(
						"rejected".to_owned(),
					));
					error!("error {}, invalid block from peer {}", code, peer);
					return Err(Error::Consensus {
						code,
						header_hash: block.header_hash(),
					});
				}
				_ => {}
			}
			// schedule weight-proof segment creation when a boundary landed
			if let Some(record) = self.blockchain.try_sub_block(&block.header_hash()) {
				if record.sub_epoch_summary_included.is_some() {
					self.weight_proof.create_prev_sub_epoch_segments();
				}
			}
		}
		self.state_changed("new_peak");
		Ok(BatchAddResult {
			advanced_peak,
			fork_height,
		})
	}

	/// Performs a full sync of the blockchain up to the heaviest announced
	/// peak: wait for peaks, pick the heaviest, validate a weight proof
	/// from a random holder, then download from the fork point in batches.
	/// Runs as a named, cancellable background task.
	pub async fn sync(self: Arc<Self>) {
		// ensure we are only syncing once and not double calling
		if self.sync_state.sync_mode() {
			return;
		}
		self.sync_state.set_sync_mode(true);
		self.state_changed("sync_mode");

		tokio::select! {
			result = self.sync_inner() => {
				if let Err(e) = result {
					error!("error with syncing: {}", e);
				}
			}
			_ = self.sync_cancel.notified() => {
				warn!("syncing failed, cancelled");
			}
		}

		if self.is_shut_down() {
			return;
		}
		self.finish_sync().await;
	}

	async fn sync_inner(&self) -> Result<(), Error> {
		info!("starting to perform sync");
		info!("waiting to receive peaks from peers");

		// wait until at least 3 peers hold announced peaks, up to 20s
		let mut peak_hashes: Vec<Hash> = vec![];
		for _ in 0..200 {
			if self.is_shut_down() {
				return Ok(());
			}
			let connected = self.peers.connected_peer_ids(NodeType::FullNode);
			if connected.is_empty() {
				warn!("sync: no peers available");
				break;
			}
			peak_hashes = self
				.sync_state
				.peer_peaks(&connected)
				.into_iter()
				.map(|(hash, _, _)| hash)
				.collect();
			if self.get_peers_with_peaks(&peak_hashes).len() >= 3 {
				break;
			}
			sleep(Duration::from_millis(100)).await;
		}
		info!("collected a total of {} peaks", peak_hashes.len());

		// the heaviest announced peak wins, like the longest chain rule
		let connected = self.peers.connected_peer_ids(NodeType::FullNode);
		let (peak_hash, peak_height, peak_weight) = self
			.sync_state
			.get_heaviest_peak(&connected)
			.ok_or_else(|| Error::SyncFailed("no peaks collected".to_owned()))?;
		self.sync_state.set_peak_target(peak_hash, peak_height);
		info!("selected peak {}, {}", peak_height, peak_hash);

		// check which peers are updated to this height
		let full_nodes = self.peers.connected_peers(NodeType::FullNode);
		let polls = full_nodes.iter().map(|p| {
			let p = p.clone();
			async move {
				let response = timeout(
					REQUEST_TIMEOUT,
					p.request_sub_block(RequestSubBlock {
						sub_block_height: peak_height,
						include_transactions: true,
					}),
				)
				.await;
				(p.peer_node_id(), response)
			}
		});
		for (peer_id, response) in join_all(polls).await {
			if let Ok(Ok(respond)) = response {
				if respond.sub_block.header_hash() == peak_hash {
					self.sync_state
						.add_peak_peer(peak_hash, peer_id, peak_weight, peak_height);
				}
			}
		}

		let peers_with_peak = self.get_peers_with_peaks(&[peak_hash]);
		if peers_with_peak.is_empty() {
			return Err(Error::SyncFailed(format!(
				"no peers with header hash {}",
				peak_hash
			)));
		}
		info!(
			"total of {} peers with peak {}",
			peers_with_peak.len(),
			peak_height
		);

		if let Some(our_peak) = self.blockchain.get_peak() {
			if peak_weight <= our_peak.weight {
				return Err(Error::SyncFailed("already caught up".to_owned()));
			}
		}

		// request the weight proof from one random holder of the peak
		let weight_proof_peer = peers_with_peak
			.choose(&mut thread_rng())
			.cloned()
			.expect("peers_with_peak is non-empty");
		info!(
			"requesting weight proof from peer {} up to height {}",
			weight_proof_peer.peer_host(),
			peak_height
		);

		let request = RequestProofOfWeight {
			sub_block_height: peak_height,
			tip: peak_hash,
		};
		let response = match timeout(
			WEIGHT_PROOF_TIMEOUT,
			weight_proof_peer.request_proof_of_weight(request),
		)
		.await
		{
			Ok(Ok(r)) => r,
			_ => {
				// they have not behaved properly
				weight_proof_peer.close().await;
				return Err(Error::PeerTimeout);
			}
		};

		if response.wp.tip_height() != Some(peak_height) {
			weight_proof_peer.close().await;
			return Err(Error::PeerLied(format!(
				"weight proof had the wrong height: {}",
				weight_proof_peer.peer_host()
			)));
		}
		if response.wp.tip_weight() != Some(peak_weight) {
			weight_proof_peer.close().await;
			return Err(Error::PeerLied(format!(
				"weight proof had the wrong weight: {}",
				weight_proof_peer.peer_host()
			)));
		}

		let (validated, fork_point) = self.weight_proof.validate_weight_proof(&response.wp)?;
		if !validated {
			weight_proof_peer.close().await;
			return Err(Error::SyncFailed("weight proof validation failed".to_owned()));
		}

		info!(
			"re-checked peers: total of {} peers with peak {}",
			self.get_peers_with_peaks(&[peak_hash]).len(),
			peak_height
		);

		{
			let _lock = self.blockchain.lock.lock().await;
			self.blockchain.warmup(fork_point)?;
		}
		self.sync_from_fork_point(fork_point, peak_height, &peak_hash)
			.await
	}

	/// Returns connected peers known to hold one of the given peaks.
	pub fn get_peers_with_peaks(&self, peak_hashes: &[Hash]) -> Vec<Arc<dyn Peer>> {
		let mut filtered: Vec<Arc<dyn Peer>> = vec![];
		for peak_hash in peak_hashes {
			for peer_id in self.sync_state.get_peak_peers(peak_hash) {
				if let Some(peer) = self.peers.get_connected_peer(&peer_id) {
					if !filtered.iter().any(|p| p.peer_node_id() == peer_id) {
						filtered.push(peer);
					}
				}
			}
		}
		filtered
	}

	/// Download and commit everything between the fork point and the
	/// target, window by window, rotating through the peers that hold the
	/// target peak and dropping the ones that fail.
	pub async fn sync_from_fork_point(
		&self,
		fork_point_height: u32,
		target_peak_sub_height: u32,
		peak_hash: &Hash,
	) -> Result<(), Error> {
		info!(
			"start syncing from fork point at {} up to {}",
			fork_point_height, target_peak_sub_height
		);
		let mut peers_with_peak = self.get_peers_with_peaks(&[*peak_hash]);
		if peers_with_peak.is_empty() {
			return Err(Error::SyncFailed(format!(
				"not syncing, no peers with header hash {}",
				peak_hash
			)));
		}

		let batch_size = self.constants.max_block_count_per_requests;
		let mut advanced_peak = false;
		let mut start_height = fork_point_height;

		while start_height <= target_peak_sub_height {
			let end_height = min(target_peak_sub_height, start_height + batch_size - 1);
			let request = RequestSubBlocks {
				start_sub_height: start_height,
				end_sub_height: end_height,
				include_transactions: true,
			};
			info!("requesting sub-blocks: {} to {}", start_height, end_height);

			let mut batch_added = false;
			let mut failed_peers: Vec<PeerId> = vec![];
			for peer in &peers_with_peak {
				if peer.is_closed() {
					failed_peers.push(peer.peer_node_id());
					continue;
				}
				let reply =
					timeout(REQUEST_TIMEOUT, peer.request_sub_blocks(request.clone())).await;
				let blocks = match reply {
					Ok(Ok(SubBlocksReply::SubBlocks(r))) => r.sub_blocks,
					// rejects, wrong shapes and timeouts all disqualify the
					// peer for this sync
					_ => {
						failed_peers.push(peer.peer_node_id());
						continue;
					}
				};
				let committed = {
					let _lock = self.blockchain.lock.lock().await;
					let hint = if advanced_peak {
						None
					} else {
						Some(fork_point_height)
					};
					self.receive_sub_block_batch(blocks, peer.peer_node_id(), hint)
						.await
				};
				match committed {
					Ok(batch) => {
						if batch.advanced_peak {
							advanced_peak = true;
						}
						batch_added = true;
						break;
					}
					Err(e) => {
						warn!(
							"disconnecting {} for invalid batch: {}",
							peer.peer_host(),
							e
						);
						peer.close().await;
						failed_peers.push(peer.peer_node_id());
						continue;
					}
				}
			}

			// keep the wallets informed while the long sync runs
			if let Some(peak) = self.blockchain.get_peak() {
				let msg = Message::WalletNewPeak(WalletNewPeak {
					header_hash: peak.header_hash,
					sub_block_height: peak.sub_block_height,
					weight: peak.weight,
					fork_point: peak.sub_block_height.saturating_sub(1),
				});
				self.peers.send_to_all(msg, NodeType::Wallet).await;
			}

			peers_with_peak.retain(|p| {
				!p.is_closed() && !failed_peers.contains(&p.peer_node_id())
			});
			if self.sync_state.peers_changed_take() {
				peers_with_peak = self.get_peers_with_peaks(&[*peak_hash]);
				info!(
					"number of peers we are syncing from: {}",
					peers_with_peak.len()
				);
			}

			if !batch_added {
				info!(
					"failed to fetch sub-blocks {} to {} from peers",
					start_height, end_height
				);
				break;
			}

			info!("added sub-blocks {} to {}", start_height, end_height);
			if let Some(peak) = self.blockchain.get_peak() {
				let cache = self.constants.sub_blocks_cache_size;
				self.blockchain.clean_sub_block_records_below(min(
					end_height.saturating_sub(cache),
					peak.sub_block_height.saturating_sub(cache),
				));
			}

			if end_height >= target_peak_sub_height {
				break;
			}
			start_height = end_height + 1;
		}
		Ok(())
	}

	/// Finalize a sync: leave sync mode, clear sync information and re-run
	/// peak post-processing so peers and subsystems observe the final
	/// state. Runs on success, failure and cancellation alike; committed
	/// blocks stand.
	pub async fn finish_sync(&self) {
		self.sync_state.set_sync_mode(false);
		self.state_changed("sync_mode");

		let peak = self.blockchain.get_peak();
		{
			let _lock = self.blockchain.lock.lock().await;
			self.sync_state.clear_sync_info();
			if let Some(ref peak) = peak {
				if let Ok(Some(peak_fb)) = self.blockchain.get_full_peak() {
					if let Err(e) = self
						.peak_post_processing(
							&peak_fb,
							peak,
							peak.sub_block_height.saturating_sub(1),
							None,
						)
						.await
					{
						warn!("peak post-processing after sync failed: {}", e);
					}
				}
			}
		}

		if let Some(peak) = peak {
			// refresh the cached weight proof for the new peak, best-effort
			if let Err(e) = self.weight_proof.get_proof_of_weight(&peak.header_hash) {
				debug!("could not refresh weight proof: {}", e);
			}
			self.state_changed("sub_block");
		}
	}
}
