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

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use arbor_core::consensus::ConsensusConstants;
use arbor_p2p::msg::Message;
use arbor_p2p::{NodeType, Peer};

use self::common::{
	adopt_chain, build_node, grow_chain, new_chain, peak_announcement, MockPeer,
};

fn constants() -> Arc<ConsensusConstants> {
	Arc::new(ConsensusConstants::testing())
}

#[tokio::test]
async fn backtrack_sync_applies_responses_forward() {
	let constants = constants();

	// the remote is three blocks ahead of us on the same chain
	let remote = new_chain(constants.clone());
	grow_chain(&constants, &remote, 104);
	let fixture = build_node(constants.clone());
	adopt_chain(&constants, &fixture.node, &remote, 100);
	assert_eq!(fixture.node.blockchain().peak_height(), Some(100));

	let announcer = MockPeer::new(1, NodeType::FullNode, Some(remote.clone()), constants.clone());
	let observer = MockPeer::new(2, NodeType::FullNode, None, constants.clone());
	fixture.node.peers().add_connected(announcer.clone());
	fixture.node.peers().add_connected(observer.clone());

	let peer: Arc<dyn Peer> = announcer.clone();
	fixture
		.node
		.new_peak(peak_announcement(&remote), &peer)
		.await
		.unwrap();

	assert_eq!(fixture.node.blockchain().peak_height(), Some(103));

	// the first transition extends our old peak, so the first broadcast
	// carries its height as the fork point
	let sent = observer.sent.lock().unwrap();
	let forks: Vec<u32> = sent
		.iter()
		.filter_map(|m| match m {
			Message::NewPeak(p) => Some(p.fork_point_hint),
			_ => None,
		})
		.collect();
	assert_eq!(forks.first(), Some(&100));
	assert_eq!(forks.len(), 3);

	// the announcing peer never gets its own blocks back
	assert!(announcer
		.sent
		.lock()
		.unwrap()
		.iter()
		.all(|m| !matches!(m, Message::NewPeak(_))));
}

#[tokio::test]
async fn batch_sync_below_recent_threshold_needs_no_weight_proof() {
	let constants = constants();
	assert!(50 < constants.weight_proof_recent_blocks);

	let remote = new_chain(constants.clone());
	grow_chain(&constants, &remote, 51);
	let fixture = build_node(constants.clone());

	let peer = MockPeer::new(1, NodeType::FullNode, Some(remote.clone()), constants.clone());
	fixture.node.peers().add_connected(peer.clone());

	let handle: Arc<dyn Peer> = peer.clone();
	fixture
		.node
		.new_peak(peak_announcement(&remote), &handle)
		.await
		.unwrap();

	assert_eq!(fixture.node.blockchain().peak_height(), Some(50));
	assert_eq!(peer.wp_requests.load(Ordering::SeqCst), 0);
	// the batch bookkeeping is cleaned up on the way out
	assert_eq!(fixture.node.sync_state().batch_syncing_len(), 0);
}

#[tokio::test]
async fn batch_sync_with_unknown_parent_backs_off() {
	let constants = constants();

	// two chains that share nothing
	let ours = build_node(constants.clone());
	{
		let chain = ours.node.blockchain();
		for _ in 0..30 {
			let prev = chain.get_peak();
			common::grow_one(&constants, &chain, prev.as_ref(), common::BlockOpts::default());
		}
	}
	let foreign = new_chain(constants.clone());
	{
		let mut i = 0u64;
		for _ in 0..40 {
			let prev = foreign.get_peak();
			common::grow_one(
				&constants,
				&foreign,
				prev.as_ref(),
				common::BlockOpts {
					nonce: 9000 + i,
					..Default::default()
				},
			);
			i += 1;
		}
	}

	let peer = MockPeer::new(1, NodeType::FullNode, Some(foreign.clone()), constants.clone());
	ours.node.peers().add_connected(peer.clone());

	let handle: Arc<dyn Peer> = peer.clone();
	let found = ours
		.node
		.short_sync_batch(&handle, 10, 40)
		.await
		.unwrap();
	assert!(!found, "a deep fork cannot be batch synced");
	assert_eq!(ours.node.blockchain().peak_height(), Some(29));
	assert_eq!(ours.node.sync_state().batch_syncing_len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn long_sync_disconnects_lying_weight_proof_peer() {
	let constants = constants();
	let remote = new_chain(constants.clone());
	grow_chain(&constants, &remote, 31);
	let tip = remote.get_peak().unwrap();

	let fixture = build_node(constants.clone());
	let mut peers = vec![];
	for i in 1..=3u8 {
		let peer = MockPeer::new_lying(i, remote.clone(), constants.clone());
		fixture.node.peers().add_connected(peer.clone());
		fixture.node.sync_state().add_peak_peer(
			tip.header_hash,
			peer.peer_node_id(),
			tip.weight,
			tip.sub_block_height,
		);
		peers.push(peer);
	}

	fixture.node.clone().sync().await;

	// the provider was closed, sync mode was restored, nothing committed
	assert!(!fixture.node.sync_state().sync_mode());
	assert_eq!(peers.iter().filter(|p| p.is_closed()).count(), 1);
	assert!(fixture.node.blockchain().get_peak().is_none());
	// both sync-mode transitions were surfaced
	let events = fixture.events.lock().unwrap();
	assert!(events.iter().filter(|e| *e == "sync_mode").count() >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn long_sync_without_peers_fails_softly() {
	let constants = constants();
	let fixture = build_node(constants.clone());

	fixture.node.clone().sync().await;

	assert!(!fixture.node.sync_state().sync_mode());
	assert!(fixture.node.blockchain().get_peak().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sync_from_fork_point_rotates_to_the_next_peer() {
	let constants = constants();
	let remote = new_chain(constants.clone());
	grow_chain(&constants, &remote, 41);
	let tip = remote.get_peak().unwrap();

	let fixture = build_node(constants.clone());
	let flaky = MockPeer::new(1, NodeType::FullNode, Some(remote.clone()), constants.clone());
	flaky.fail_sub_blocks.store(true, Ordering::SeqCst);
	let healthy = MockPeer::new(2, NodeType::FullNode, Some(remote.clone()), constants.clone());
	for peer in [&flaky, &healthy] {
		fixture.node.peers().add_connected(peer.clone());
		fixture.node.sync_state().add_peak_peer(
			tip.header_hash,
			peer.peer_node_id(),
			tip.weight,
			tip.sub_block_height,
		);
	}
	fixture.node.sync_state().set_sync_mode(true);
	fixture.node.sync_state().peers_changed_take();

	fixture
		.node
		.sync_from_fork_point(0, tip.sub_block_height, &tip.header_hash)
		.await
		.unwrap();

	assert_eq!(fixture.node.blockchain().peak_height(), Some(40));
	// request failures drop the peer from the rotation without closing it
	assert!(!flaky.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sync_from_fork_point_stops_when_every_peer_fails() {
	let constants = constants();
	let remote = new_chain(constants.clone());
	grow_chain(&constants, &remote, 20);
	let tip = remote.get_peak().unwrap();

	let fixture = build_node(constants.clone());
	let peer = MockPeer::new(1, NodeType::FullNode, Some(remote.clone()), constants.clone());
	peer.fail_sub_blocks.store(true, Ordering::SeqCst);
	fixture.node.peers().add_connected(peer.clone());
	fixture.node.sync_state().add_peak_peer(
		tip.header_hash,
		peer.peer_node_id(),
		tip.weight,
		tip.sub_block_height,
	);
	fixture.node.sync_state().set_sync_mode(true);

	fixture
		.node
		.sync_from_fork_point(0, tip.sub_block_height, &tip.header_hash)
		.await
		.unwrap();

	// nothing could be fetched; the loop exits instead of spinning
	assert!(fixture.node.blockchain().get_peak().is_none());
}

#[tokio::test]
async fn respond_sub_block_is_idempotent() {
	let constants = constants();
	let remote = new_chain(constants.clone());
	grow_chain(&constants, &remote, 2);

	let fixture = build_node(constants.clone());
	adopt_chain(&constants, &fixture.node, &remote, 0);

	let block_one = remote
		.get_block(&remote.height_to_hash(1).unwrap())
		.unwrap()
		.unwrap();
	let respond = arbor_p2p::msg::RespondSubBlock {
		sub_block: block_one,
	};

	fixture
		.node
		.respond_sub_block(respond.clone(), None)
		.await
		.unwrap();
	let events_after_first = fixture
		.events
		.lock()
		.unwrap()
		.iter()
		.filter(|e| *e == "new_peak")
		.count();
	assert_eq!(events_after_first, 1);

	// delivering the same block again fires no side effects
	fixture.node.respond_sub_block(respond, None).await.unwrap();
	let events_after_second = fixture
		.events
		.lock()
		.unwrap()
		.iter()
		.filter(|e| *e == "new_peak")
		.count();
	assert_eq!(events_after_second, 1);
	assert_eq!(fixture.node.blockchain().peak_height(), Some(1));
}

#[tokio::test]
async fn new_peak_refreshes_target_peers_while_syncing() {
	let constants = constants();
	let remote = new_chain(constants.clone());
	grow_chain(&constants, &remote, 10);
	let tip = remote.get_peak().unwrap();

	let fixture = build_node(constants.clone());
	fixture.node.sync_state().set_sync_mode(true);
	fixture
		.node
		.sync_state()
		.set_peak_target(tip.header_hash, tip.sub_block_height);

	// a peer shows up announcing some other, lighter peak; we check
	// whether it holds our target anyway
	let peer = MockPeer::new(5, NodeType::FullNode, Some(remote.clone()), constants.clone());
	fixture.node.peers().add_connected(peer.clone());
	let other = remote.height_to_hash(4).unwrap();
	let announcement = arbor_p2p::msg::NewPeak {
		header_hash: other,
		sub_block_height: 4,
		weight: remote.try_sub_block(&other).unwrap().weight,
		fork_point_hint: 3,
		unfinished_reward_hash: other,
	};
	let handle: Arc<dyn Peer> = peer.clone();
	fixture.node.new_peak(announcement, &handle).await.unwrap();

	assert!(fixture
		.node
		.sync_state()
		.get_peak_peers(&tip.header_hash)
		.contains(&peer.peer_node_id()));
}
