// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Stream dispatcher and fleet registry.
//!
//! One dispatcher owns the registry of connected edges. Each registered
//! edge gets a bounded FIFO queue; `broadcast` pushes matching updates onto
//! every queue. A full queue drops the event and flags the edge for resync
//! rather than growing without bound; the drop count is surfaced as a
//! metric and a `resync` sentinel is delivered once the queue drains.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use flagship_core::{EdgeHello, EdgeLiveness, EdgeServerRecord, FlagUpdate, StreamEvent};

/// A connected edge: its fleet record plus the outbound queue.
struct EdgeHandle {
	record: EdgeServerRecord,
	/// Dropped on disconnect; the record lingers until eviction.
	sender: Option<mpsc::Sender<StreamEvent>>,
	needs_resync: bool,
}

/// Observability view of one edge, served by `/edge/servers`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EdgeServerInfo {
	#[serde(flatten)]
	pub record: EdgeServerRecord,
	/// Events waiting in this edge's outbound queue.
	pub pending: usize,
	pub needs_resync: bool,
}

/// Registry of connected edges plus the broadcast fan-out.
pub struct Dispatcher {
	edges: RwLock<HashMap<String, EdgeHandle>>,
	queue_size: usize,
	heartbeat: Duration,
	retention: Duration,
	dropped: AtomicU64,
}

impl Dispatcher {
	pub fn new(queue_size: usize, heartbeat: Duration, retention: Duration) -> Self {
		Dispatcher {
			edges: RwLock::new(HashMap::new()),
			queue_size,
			heartbeat,
			retention,
			dropped: AtomicU64::new(0),
		}
	}

	/// Registers an edge after a successful handshake and returns its
	/// outbound queue. A `connected` acknowledgement is already enqueued.
	/// Re-registering a server id replaces the previous connection.
	pub async fn register(
		&self,
		hello: &EdgeHello,
		remote_addr: Option<String>,
	) -> mpsc::Receiver<StreamEvent> {
		let (tx, rx) = mpsc::channel(self.queue_size);

		let now = Utc::now();
		let record = EdgeServerRecord {
			server_id: hello.server_id.clone(),
			project: hello.project.clone(),
			environment: hello.environment.clone(),
			region: hello.region.clone(),
			version: hello.version.clone(),
			remote_addr,
			connected_at: now,
			last_ping: now,
			liveness: EdgeLiveness::Connected,
		};

		// Queue capacity is at least 1, so the acknowledgement always fits.
		let _ = tx.try_send(StreamEvent::connected(&hello.server_id));

		let handle = EdgeHandle {
			record,
			sender: Some(tx),
			needs_resync: false,
		};

		let replaced = self
			.edges
			.write()
			.await
			.insert(hello.server_id.clone(), handle)
			.is_some();

		info!(
			server_id = %hello.server_id,
			project = %hello.project,
			environment = %hello.environment,
			replaced,
			"edge registered"
		);

		rx
	}

	/// Records a keepalive from an edge. Delivers the pending `resync`
	/// sentinel if the edge previously overflowed and the queue has room.
	pub async fn ping(&self, server_id: &str) {
		let mut edges = self.edges.write().await;
		let Some(handle) = edges.get_mut(server_id) else {
			return;
		};

		handle.record.last_ping = Utc::now();
		handle.record.liveness = EdgeLiveness::Connected;

		if handle.needs_resync {
			if let Some(sender) = &handle.sender {
				if sender.try_send(StreamEvent::resync()).is_ok() {
					handle.needs_resync = false;
					debug!(server_id = %server_id, "resync sentinel delivered");
				}
			}
		}
	}

	/// Marks an edge disconnected and closes its queue. The record stays
	/// visible until the sweeper evicts it.
	pub async fn disconnect(&self, server_id: &str) {
		let mut edges = self.edges.write().await;
		if let Some(handle) = edges.get_mut(server_id) {
			handle.record.liveness = EdgeLiveness::Disconnected;
			handle.sender = None;
			info!(server_id = %server_id, "edge disconnected");
		}
	}

	/// Fans an update out to every edge subscribed to its project and
	/// environment ("all" matches every project). Returns how many queues
	/// accepted the event.
	pub async fn broadcast(&self, update: &FlagUpdate) -> usize {
		let mut edges = self.edges.write().await;
		let mut delivered = 0;

		for handle in edges.values_mut() {
			if handle.record.environment != update.environment {
				continue;
			}
			if handle.record.project != "all" && handle.record.project != update.project_id {
				continue;
			}
			let Some(sender) = &handle.sender else {
				continue;
			};

			match sender.try_send(StreamEvent::FlagUpdate(update.clone())) {
				Ok(()) => delivered += 1,
				Err(mpsc::error::TrySendError::Full(_)) => {
					self.dropped.fetch_add(1, Ordering::Relaxed);
					handle.needs_resync = true;
					warn!(
						server_id = %handle.record.server_id,
						flag_key = %update.flag_key,
						"edge queue full, dropping update and flagging resync"
					);
				}
				Err(mpsc::error::TrySendError::Closed(_)) => {
					handle.record.liveness = EdgeLiveness::Disconnected;
					handle.sender = None;
				}
			}
		}

		debug!(flag_key = %update.flag_key, delivered, "update broadcast");
		delivered
	}

	/// One health sweep: derive liveness from ping age and evict records
	/// disconnected past the retention window.
	pub async fn sweep(&self) {
		let now = Utc::now();
		let heartbeat = chrono::Duration::from_std(self.heartbeat)
			.unwrap_or_else(|_| chrono::Duration::seconds(30));
		let retention = chrono::Duration::from_std(self.retention)
			.unwrap_or_else(|_| chrono::Duration::hours(1));

		let mut edges = self.edges.write().await;
		for handle in edges.values_mut() {
			let derived = handle.record.derived_liveness(now, heartbeat);
			if derived != handle.record.liveness {
				debug!(
					server_id = %handle.record.server_id,
					from = ?handle.record.liveness,
					to = ?derived,
					"edge liveness transition"
				);
				handle.record.liveness = derived;
				if derived == EdgeLiveness::Disconnected {
					handle.sender = None;
				}
			}
		}

		edges.retain(|server_id, handle| {
			let evict = handle.record.evictable(now, retention);
			if evict {
				info!(server_id = %server_id, "evicting stale edge record");
			}
			!evict
		});
	}

	/// Spawns the periodic health sweeper.
	pub fn start_sweeper(self: std::sync::Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
		tokio::spawn(async move {
			let mut tick = tokio::time::interval(interval);
			tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
			loop {
				tick.tick().await;
				self.sweep().await;
			}
		})
	}

	/// Snapshot of the fleet for observability.
	pub async fn servers(&self) -> Vec<EdgeServerInfo> {
		let edges = self.edges.read().await;
		let mut servers: Vec<EdgeServerInfo> = edges
			.values()
			.map(|handle| EdgeServerInfo {
				record: handle.record.clone(),
				pending: handle
					.sender
					.as_ref()
					.map(|s| self.queue_size - s.capacity())
					.unwrap_or(0),
				needs_resync: handle.needs_resync,
			})
			.collect();
		servers.sort_by(|a, b| a.record.server_id.cmp(&b.record.server_id));
		servers
	}

	/// Total events dropped to full queues since boot.
	pub fn dropped(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}

	pub async fn connected_count(&self) -> usize {
		self.edges
			.read()
			.await
			.values()
			.filter(|h| h.record.liveness == EdgeLiveness::Connected)
			.count()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use flagship_core::{Flag, FlagKind, UpdateOp};

	fn hello(server_id: &str, project: &str, environment: &str) -> EdgeHello {
		EdgeHello {
			server_id: server_id.to_string(),
			region: Some("eu-west".to_string()),
			version: Some("0.1.0".to_string()),
			project: project.to_string(),
			environment: environment.to_string(),
		}
	}

	fn update(project: &str, environment: &str) -> FlagUpdate {
		FlagUpdate::update(Flag::new(project, "some.flag", environment, FlagKind::Boolean))
	}

	fn dispatcher(queue: usize) -> Dispatcher {
		Dispatcher::new(queue, Duration::from_secs(30), Duration::from_secs(3600))
	}

	#[tokio::test]
	async fn register_enqueues_connected_ack() {
		let dispatcher = dispatcher(8);
		let mut rx = dispatcher.register(&hello("edge-1", "all", "prod"), None).await;

		match rx.recv().await.unwrap() {
			StreamEvent::Connected { server_id, .. } => assert_eq!(server_id, "edge-1"),
			other => panic!("expected connected ack, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn broadcast_matches_project_and_environment() {
		let dispatcher = dispatcher(8);
		let mut all_prod = dispatcher.register(&hello("edge-all", "all", "prod"), None).await;
		let mut web_prod = dispatcher.register(&hello("edge-web", "web", "prod"), None).await;
		let mut web_dev = dispatcher.register(&hello("edge-dev", "web", "dev"), None).await;
		let mut mobile_prod = dispatcher
			.register(&hello("edge-mobile", "mobile", "prod"), None)
			.await;

		// Drain the connected acks.
		for rx in [&mut all_prod, &mut web_prod, &mut web_dev, &mut mobile_prod] {
			rx.recv().await.unwrap();
		}

		let delivered = dispatcher.broadcast(&update("web", "prod")).await;
		assert_eq!(delivered, 2);

		assert!(matches!(
			all_prod.try_recv().unwrap(),
			StreamEvent::FlagUpdate(u) if u.action == UpdateOp::Update
		));
		assert!(matches!(
			web_prod.try_recv().unwrap(),
			StreamEvent::FlagUpdate(_)
		));
		assert!(web_dev.try_recv().is_err());
		assert!(mobile_prod.try_recv().is_err());
	}

	#[tokio::test]
	async fn full_queue_drops_and_flags_resync() {
		let dispatcher = dispatcher(1);
		let mut rx = dispatcher.register(&hello("edge-1", "all", "prod"), None).await;
		// The connected ack occupies the single slot; the broadcast must
		// drop.
		let delivered = dispatcher.broadcast(&update("web", "prod")).await;
		assert_eq!(delivered, 0);
		assert_eq!(dispatcher.dropped(), 1);

		let servers = dispatcher.servers().await;
		assert!(servers[0].needs_resync);

		// Draining the queue and pinging delivers the resync sentinel.
		rx.recv().await.unwrap();
		dispatcher.ping("edge-1").await;
		assert!(matches!(rx.recv().await.unwrap(), StreamEvent::Resync { .. }));

		let servers = dispatcher.servers().await;
		assert!(!servers[0].needs_resync);
	}

	#[tokio::test]
	async fn sweep_transitions_liveness_and_evicts() {
		let dispatcher = Dispatcher::new(8, Duration::from_millis(10), Duration::from_millis(50));
		let _rx = dispatcher.register(&hello("edge-1", "all", "prod"), None).await;

		tokio::time::sleep(Duration::from_millis(60)).await;
		dispatcher.sweep().await;
		let servers = dispatcher.servers().await;
		assert_eq!(servers[0].record.liveness, EdgeLiveness::Disconnected);

		// Past retention the record is evicted entirely.
		dispatcher.sweep().await;
		assert!(dispatcher.servers().await.is_empty());
	}

	#[tokio::test]
	async fn ping_restores_connected() {
		let dispatcher = Dispatcher::new(8, Duration::from_millis(10), Duration::from_secs(3600));
		let _rx = dispatcher.register(&hello("edge-1", "all", "prod"), None).await;

		tokio::time::sleep(Duration::from_millis(30)).await;
		dispatcher.sweep().await;
		assert_ne!(
			dispatcher.servers().await[0].record.liveness,
			EdgeLiveness::Connected
		);

		dispatcher.ping("edge-1").await;
		assert_eq!(
			dispatcher.servers().await[0].record.liveness,
			EdgeLiveness::Connected
		);
	}

	#[tokio::test]
	async fn broadcast_to_closed_receiver_marks_disconnected() {
		let dispatcher = dispatcher(8);
		let rx = dispatcher.register(&hello("edge-1", "all", "prod"), None).await;
		drop(rx);

		let delivered = dispatcher.broadcast(&update("web", "prod")).await;
		assert_eq!(delivered, 0);
		assert_eq!(
			dispatcher.servers().await[0].record.liveness,
			EdgeLiveness::Disconnected
		);
	}
}
