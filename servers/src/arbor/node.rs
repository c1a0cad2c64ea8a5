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

//! The full node core: construction, connection onboarding, single-block
//! ingestion and peak post-processing. The sync strategies live in the
//! sibling `sync` module, the timelord round-trip in `timelord`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use arbor_chain::{
	BlockStore, Blockchain, CoinStore, ErrorKind, ReceiveBlockResult, SubSlotStore,
	WeightProofVerifier,
};
use arbor_core::consensus::ConsensusConstants;
use arbor_core::core::{
	FullBlock, Hashed, SignagePoint, SubBlockRecord, Verifiers,
};
use arbor_p2p::msg::{
	Message, NewPeak, RequestMempoolTransactions, RespondSubBlock, TimelordNewPeak,
	WalletNewPeak, NewSignagePointOrEndOfSubSlot,
};
use arbor_p2p::{NodeType, Peer, PeerId, Peers};
use arbor_pool::{Mempool, ProgramRunner};

use crate::common::adapters::PoolToChainAdapter;
use crate::common::sync_state::SyncState;
use crate::common::types::{Error, ServerConfig};

/// How stale the peak's transaction-block timestamp may be before we stop
/// calling ourselves synced.
const SYNCED_HORIZON_SECS: u64 = 20 * 60;

/// Callback the embedder registers for node state changes.
pub type StateChangedCallback = Box<dyn Fn(&str) + Send + Sync>;

/// The full node. One instance per process, shared behind an `Arc` by the
/// connection handlers and the background sync task.
pub struct FullNode {
	pub(crate) config: ServerConfig,
	pub(crate) constants: Arc<ConsensusConstants>,
	pub(crate) verifiers: Verifiers,
	pub(crate) blockchain: Arc<Blockchain>,
	pub(crate) sub_slot_store: Arc<SubSlotStore>,
	pub(crate) sync_state: Arc<SyncState>,
	pub(crate) mempool: Arc<Mempool>,
	pub(crate) weight_proof: Arc<WeightProofVerifier>,
	pub(crate) peers: Arc<Peers>,
	// serializes the infusion-point and end-of-sub-slot handlers
	pub(crate) timelord_lock: Mutex<()>,
	pub(crate) sync_task: StdMutex<Option<JoinHandle<()>>>,
	pub(crate) sync_cancel: Notify,
	pub(crate) shut_down: AtomicBool,
	// non-owning handle to ourselves for spawning named background tasks
	myself: StdMutex<Option<Weak<FullNode>>>,
	state_changed_callback: StdMutex<Option<StateChangedCallback>>,
}

impl FullNode {
	/// Build a node over the injected stores, verifiers and script VM.
	pub fn new(
		config: ServerConfig,
		constants: Arc<ConsensusConstants>,
		block_store: Arc<dyn BlockStore>,
		coin_store: Arc<dyn CoinStore>,
		verifiers: Verifiers,
		runner: Arc<dyn ProgramRunner>,
	) -> Result<Arc<FullNode>, Error> {
		let blockchain = Arc::new(Blockchain::create(
			block_store,
			coin_store,
			constants.clone(),
			verifiers.clone(),
		)?);
		let sub_slot_store = Arc::new(SubSlotStore::new(constants.clone()));
		let weight_proof = Arc::new(WeightProofVerifier::new(
			constants.clone(),
			blockchain.clone(),
		));
		let mempool = Arc::new(Mempool::new(
			config.pool_config.clone(),
			Arc::new(PoolToChainAdapter::new(blockchain.clone())),
			runner,
		));

		let node = Arc::new(FullNode {
			config,
			constants,
			verifiers,
			blockchain,
			sub_slot_store,
			sync_state: Arc::new(SyncState::new()),
			mempool,
			weight_proof,
			peers: Arc::new(Peers::new()),
			timelord_lock: Mutex::new(()),
			sync_task: StdMutex::new(None),
			sync_cancel: Notify::new(),
			shut_down: AtomicBool::new(false),
			myself: StdMutex::new(None),
			state_changed_callback: StdMutex::new(None),
		});
		*node.myself.lock().unwrap() = Some(Arc::downgrade(&node));
		Ok(node)
	}

	pub(crate) fn myself(&self) -> Arc<FullNode> {
		self.myself
			.lock()
			.unwrap()
			.as_ref()
			.and_then(|w| w.upgrade())
			.expect("node handle outlives its tasks")
	}

	/// Bring dependent subsystems in line with a peak loaded from disk.
	pub async fn start(&self) -> Result<(), Error> {
		if let Some(peak) = self.blockchain.get_peak() {
			info!(
				"blockchain initialized to peak {} height {}",
				peak.header_hash, peak.sub_block_height
			);
			self.mempool.new_peak(Some(peak.clone()));
			if let Some(full_peak) = self.blockchain.get_full_peak()? {
				let _lock = self.blockchain.lock.lock().await;
				self.peak_post_processing(
					&full_peak,
					&peak,
					peak.sub_block_height.saturating_sub(1),
					None,
				)
				.await?;
			}
		} else {
			info!("initialized with empty blockchain");
		}
		Ok(())
	}

	/// Register the embedder's state-change callback.
	pub fn set_state_changed_callback(&self, callback: StateChangedCallback) {
		*self.state_changed_callback.lock().unwrap() = Some(callback);
	}

	pub(crate) fn state_changed(&self, change: &str) {
		if let Some(ref cb) = *self.state_changed_callback.lock().unwrap() {
			cb(change);
		}
	}

	/// The chain this node maintains.
	pub fn blockchain(&self) -> Arc<Blockchain> {
		self.blockchain.clone()
	}

	/// The sub-slot store of this node.
	pub fn sub_slot_store(&self) -> Arc<SubSlotStore> {
		self.sub_slot_store.clone()
	}

	/// The sync state of this node.
	pub fn sync_state(&self) -> Arc<SyncState> {
		self.sync_state.clone()
	}

	/// The transaction pool of this node.
	pub fn mempool(&self) -> Arc<Mempool> {
		self.mempool.clone()
	}

	/// The peer registry of this node.
	pub fn peers(&self) -> Arc<Peers> {
		self.peers.clone()
	}

	/// Stop background work; infinite loops observe this and wind down.
	pub fn close(&self) {
		self.shut_down.store(true, Ordering::SeqCst);
		self.sync_cancel.notify_waiters();
		if let Some(handle) = self.sync_task.lock().unwrap().take() {
			handle.abort();
		}
	}

	pub(crate) fn is_shut_down(&self) -> bool {
		self.shut_down.load(Ordering::SeqCst)
	}

	/// Whether we consider ourselves caught up: a peak exists, its latest
	/// transaction block is recent, and we are not in sync mode.
	pub fn synced(&self) -> bool {
		if self.sync_state.sync_mode() {
			return false;
		}
		let timestamp = match self.latest_peak_timestamp() {
			Some(ts) => ts,
			None => return false,
		};
		let now = Utc::now().timestamp() as u64;
		timestamp + SYNCED_HORIZON_SECS > now
	}

	// timestamp of the latest transaction block at or below the peak
	fn latest_peak_timestamp(&self) -> Option<u64> {
		let mut block = self.blockchain.get_full_peak().ok()??;
		for _ in 0..100 {
			if let Some(ref foliage_block) = block.foliage_block {
				return Some(foliage_block.timestamp);
			}
			if block.prev_header_hash() == self.constants.genesis_prev_hash {
				return None;
			}
			block = self.blockchain.get_block(&block.prev_header_hash()).ok()??;
		}
		None
	}

	/// Whenever we connect to another node or wallet, send them our current
	/// peak. Farmers get signage points as they happen; timelords get the
	/// full peak package.
	pub async fn on_connect(&self, peer: Arc<dyn Peer>) -> Result<(), Error> {
		self.peers.add_connected(peer.clone());
		self.state_changed("add_connection");

		if peer.node_type() == NodeType::FullNode {
			// ask for the mempool entries our filter lacks, but only when
			// our own view of the chain is current
			if self.synced()
				&& self.blockchain.peak_height().unwrap_or(0)
					> self.constants.initial_freeze_period
			{
				let request = RequestMempoolTransactions {
					filter: self.mempool.get_filter(),
				};
				let _ = peer
					.send(Message::RequestMempoolTransactions(request))
					.await;
			}
		}

		let full_peak = match self.blockchain.get_full_peak()? {
			Some(b) => b,
			None => return Ok(()),
		};
		let peak = self.blockchain.sub_block_record(&full_peak.header_hash())?;

		match peer.node_type() {
			NodeType::FullNode => {
				let request = NewPeak {
					header_hash: peak.header_hash,
					sub_block_height: peak.sub_block_height,
					weight: peak.weight,
					fork_point_hint: peak.sub_block_height,
					unfinished_reward_hash: full_peak
						.reward_chain_sub_block
						.get_unfinished()
						.hash(),
				};
				let _ = peer.send(Message::NewPeak(request)).await;
			}
			NodeType::Wallet => {
				let request = WalletNewPeak {
					header_hash: peak.header_hash,
					sub_block_height: peak.sub_block_height,
					weight: peak.weight,
					fork_point: peak.sub_block_height,
				};
				let _ = peer.send(Message::WalletNewPeak(request)).await;
			}
			NodeType::Timelord => {
				self.send_peak_to_timelords().await?;
			}
			NodeType::Farmer => {}
		}
		Ok(())
	}

	/// A peer went away: drop it from the registry and the sync
	/// bookkeeping.
	pub fn on_disconnect(&self, peer_id: &PeerId) {
		if let Some(peer) = self.peers.remove(peer_id) {
			info!("peer disconnected {}", peer.peer_host());
		}
		self.sync_state.peer_disconnected(peer_id);
		self.state_changed("close_connection");
	}

	/// Receive a full sub-block from a peer full node (or ourselves, at the
	/// end of the assembly round-trip). Ignored while syncing: the sync
	/// path owns peak advancement.
	pub async fn respond_sub_block(
		&self,
		respond_sub_block: RespondSubBlock,
		peer: Option<PeerId>,
	) -> Result<(), Error> {
		let mut sub_block: FullBlock = respond_sub_block.sub_block;
		if self.sync_state.sync_mode() {
			return Ok(());
		}

		let header_hash = sub_block.header_hash();
		if self.blockchain.contains_sub_block(&header_hash) {
			return Ok(());
		}

		if sub_block.transactions_generator.is_none() && sub_block.is_block() {
			// we may have asked for this block without transactions because
			// the unfinished version already brought them
			let unfinished_rh = sub_block.reward_chain_sub_block.get_unfinished().hash();
			if let Some(unfinished) = self.sub_slot_store.get_unfinished_block(&unfinished_rh) {
				if unfinished.transactions_generator.is_some() {
					sub_block.transactions_generator = unfinished.transactions_generator;
				}
			}
		}

		{
			let _lock = self.blockchain.lock.lock().await;
			let validation_start = Utc::now();
			let pre_validation = self
				.blockchain
				.pre_validate_blocks(vec![sub_block.clone()])
				.await?;
			let pre = pre_validation.into_iter().next().ok_or_else(|| {
				Error::SyncFailed(format!("failed to validate sub-block {}", header_hash))
			})?;

			let (added, error_code, fork_height) = match pre.error {
				Some(ErrorKind::InvalidPrevBlockHash) => (
					ReceiveBlockResult::DisconnectedBlock,
					Some(ErrorKind::InvalidPrevBlockHash),
					None,
				),
				Some(e) => {
					return Err(Error::Consensus {
						code: e,
						header_hash,
					});
				}
				None => self.blockchain.receive_block(&sub_block, &pre, None),
			};

			let validation_time = Utc::now() - validation_start;

			match added {
				ReceiveBlockResult::AlreadyHaveBlock => return Ok(()),
				ReceiveBlockResult::InvalidBlock => {
					let code = error_code.unwrap_or(ErrorKind::Other("unknown".to_owned()));
					error!(
						"block {} at height {} is invalid: {}",
						header_hash,
						sub_block.height(),
						code
					);
					return Err(Error::Consensus { code, header_hash });
				}
				ReceiveBlockResult::DisconnectedBlock => {
					info!(
						"disconnected block {} at height {}",
						header_hash,
						sub_block.height()
					);
					return Ok(());
				}
				ReceiveBlockResult::NewPeak => {
					let new_peak = self.blockchain.get_peak().ok_or_else(|| {
						Error::SyncFailed("no peak after new peak commit".to_owned())
					})?;
					let fork_height = fork_height.unwrap_or(0);
					debug!(
						"validation time for peak: {}ms",
						validation_time.num_milliseconds()
					);
					self.peak_post_processing(&sub_block, &new_peak, fork_height, peer)
						.await?;
				}
				ReceiveBlockResult::AddedAsOrphan => {
					info!(
						"received orphan block of height {} rh {}",
						sub_block.height(),
						sub_block.reward_chain_sub_block.hash()
					);
				}
			}
		}

		// removes all temporary data for old blocks
		if let Some(peak) = self.blockchain.get_peak() {
			let clear_height = peak.sub_block_height.saturating_sub(50);
			self.sub_slot_store.clear_candidate_blocks_below(clear_height);
			self.sub_slot_store.clear_unfinished_blocks_below(clear_height);
			if peak.sub_block_height % 1000 == 0 && !self.sync_state.sync_mode() {
				// occasionally clear stale sync peer info
				self.sync_state.clear_sync_info();
			}
		}
		self.state_changed("sub_block");
		Ok(())
	}

	/// Runs under the blockchain lock right after a commit moved the peak:
	/// updates the dependent subsystems, then notifies every peer class.
	/// Broadcasts happen only after the mempool and the sub-slot store have
	/// seen the new peak.
	pub async fn peak_post_processing(
		&self,
		sub_block: &FullBlock,
		record: &SubBlockRecord,
		fork_height: u32,
		peer: Option<PeerId>,
	) -> Result<(), Error> {
		let difficulty = self
			.blockchain
			.get_next_difficulty(&record.header_hash, false);
		let sub_slot_iters = self
			.blockchain
			.get_next_slot_iters(&record.header_hash, false);

		info!(
			"🌱 updated peak to height {}, weight {}, hh {}, forked at {}, rh {}, total iters {}, overflow {}, deficit {}, difficulty {}, sub slot iters {}",
			record.sub_block_height,
			record.weight,
			record.header_hash,
			fork_height,
			record.reward_infusion_new_challenge,
			record.total_iters,
			record.overflow,
			record.deficit,
			difficulty,
			sub_slot_iters,
		);

		let sub_slots = self
			.blockchain
			.get_sp_and_ip_sub_slots(&record.header_hash)?
			.ok_or_else(|| Error::SyncFailed("peak block missing from store".to_owned()))?;

		if !self.sync_state.sync_mode() {
			self.blockchain.clean_sub_block_records();
		}

		let fork_is_nontrivial = record.sub_block_height != 0
			&& fork_height != record.sub_block_height.saturating_sub(1);
		let (added_eos, _new_ips) = self.sub_slot_store.new_peak(
			record,
			sub_slots.0.as_ref(),
			sub_slots.1.as_ref(),
			fork_is_nontrivial,
		);

		// ensure the peak's signage point is in the store, for consistency
		// with lookups by the other subsystems
		self.sub_slot_store.new_signage_point(
			record.signage_point_index,
			SignagePoint {
				cc_vdf: sub_block.reward_chain_sub_block.challenge_chain_sp_vdf.clone(),
				cc_proof: sub_block.challenge_chain_sp_proof.clone(),
				rc_vdf: sub_block.reward_chain_sub_block.reward_chain_sp_vdf.clone(),
				rc_proof: sub_block.reward_chain_sp_proof.clone(),
			},
		);

		// the mempool revalidates its entries against the new coin view
		self.mempool.new_peak(self.blockchain.get_peak());

		// pending end of slots that land after this peak become visible now
		if let Some(eos) = added_eos {
			let broadcast = NewSignagePointOrEndOfSubSlot {
				prev_challenge_hash: Some(eos.challenge_chain.end_of_slot_vdf.challenge),
				challenge_hash: eos.challenge_chain.hash(),
				index_from_challenge: 0,
				last_rc_infusion: eos.reward_chain.end_of_slot_vdf.challenge,
			};
			self.peers
				.send_to_all(
					Message::NewSignagePointOrEndOfSubSlot(broadcast),
					NodeType::FullNode,
				)
				.await;
		}

		if record.sub_block_height % 1000 == 0 {
			// occasionally clear the seen list to keep it small
			self.sub_slot_store.clear_seen_unfinished_blocks();
		}

		if !self.sync_state.sync_mode() {
			self.send_peak_to_timelords().await?;

			// tell full nodes about the new peak
			let msg = Message::NewPeak(NewPeak {
				header_hash: record.header_hash,
				sub_block_height: record.sub_block_height,
				weight: record.weight,
				fork_point_hint: fork_height,
				unfinished_reward_hash: sub_block
					.reward_chain_sub_block
					.get_unfinished()
					.hash(),
			});
			match peer {
				Some(peer_id) => {
					self.peers
						.send_to_all_except(msg, NodeType::FullNode, peer_id)
						.await
				}
				None => self.peers.send_to_all(msg, NodeType::FullNode).await,
			}
		}

		// tell wallets about the new peak
		let msg = Message::WalletNewPeak(WalletNewPeak {
			header_hash: record.header_hash,
			sub_block_height: record.sub_block_height,
			weight: record.weight,
			fork_point: fork_height,
		});
		self.peers.send_to_all(msg, NodeType::Wallet).await;

		self.state_changed("new_peak");
		Ok(())
	}

	/// Sends the current peak to timelords, with everything they need to
	/// continue the chains on top of it.
	pub async fn send_peak_to_timelords(&self) -> Result<(), Error> {
		let peak_block = match self.blockchain.get_full_peak()? {
			Some(b) => b,
			None => return Ok(()),
		};
		let peak = self
			.blockchain
			.sub_block_record(&peak_block.header_hash())?;
		let difficulty = self.blockchain.get_next_difficulty(&peak.header_hash, false);
		let ses = self.blockchain.make_sub_epoch_summary(&peak);
		let recent_rc = self.blockchain.get_recent_reward_challenges();

		// walk back to the last challenge sub-block; every chain prefix
		// starts with a first-in-sub-slot record, so this terminates there
		// at the latest
		let mut curr = peak.clone();
		while !curr.is_challenge_sub_block(&self.constants) && !curr.first_in_sub_slot {
			curr = match self.blockchain.try_sub_block(&curr.prev_hash) {
				Some(p) => p,
				None => break,
			};
		}
		let last_csb_or_eos = if curr.is_challenge_sub_block(&self.constants) {
			curr.total_iters
		} else {
			curr.ip_sub_slot_total_iters(&self.constants)
		};

		let timelord_new_peak = TimelordNewPeak {
			reward_chain_sub_block: peak_block.reward_chain_sub_block.clone(),
			difficulty,
			deficit: peak.deficit,
			sub_slot_iters: peak.sub_slot_iters,
			sub_epoch_summary: ses,
			recent_reward_challenges: recent_rc,
			last_challenge_sb_or_eos_total_iters: last_csb_or_eos,
		};
		self.peers
			.send_to_all(Message::TimelordNewPeak(timelord_new_peak), NodeType::Timelord)
			.await;
		Ok(())
	}
}
