//! Connection hub: live-connection bookkeeping and broadcast delivery.

use crate::channel::ChannelId;
use crate::connection::{
    CloseCode, Connection, ConnectionId, Transport, REASON_EXPIRED, REASON_UNKNOWN_CHANNEL,
};
use crate::error::{DeliveryError, PushError, TransportError};
use crate::event::{EventBus, PushEvent};
use crate::user::UserRegistry;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Maximum number of concurrent connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

/// Delivery attempts before giving up on a contended connection.
pub const DEFAULT_MAX_SEND_ATTEMPTS: u32 = 100;

/// Pause between contended delivery attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Tunables for the hub. Defaults give a retry budget of roughly one second.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Connection cap across all channels.
    pub max_connections: usize,
    /// Attempts per delivery before reporting retry exhaustion.
    pub max_send_attempts: u32,
    /// Sleep between contended attempts.
    pub retry_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_send_attempts: DEFAULT_MAX_SEND_ATTEMPTS,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HubStats {
    /// Current number of live connections.
    pub current_connections: usize,
    /// Connections accepted since start.
    pub total_connections: u64,
    /// Broadcasts requested since start.
    pub total_broadcasts: u64,
    /// Handshakes refused since start.
    pub total_rejected: u64,
}

/// Eventual result of one delivery attempt chain to one connection.
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// The message was written. `retries` is zero on the fast path.
    Delivered {
        /// How many contended attempts preceded the successful write.
        retries: u32,
    },
    /// The message was not written.
    Failed(DeliveryError),
}

impl DeliveryOutcome {
    /// Whether the message reached the transport.
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Handle to one in-flight delivery. Await [`Delivery::outcome`] to learn
/// whether the write eventually succeeded; dropping the handle does not
/// cancel the attempt.
#[derive(Debug)]
pub struct Delivery {
    /// Connection the delivery targets.
    pub connection: ConnectionId,
    /// Channel id the delivery was fanned out for.
    pub channel: ChannelId,
    handle: JoinHandle<DeliveryOutcome>,
}

impl Delivery {
    /// Wait for the delivery to finish.
    pub async fn outcome(self) -> DeliveryOutcome {
        self.handle
            .await
            .unwrap_or(DeliveryOutcome::Failed(DeliveryError::TaskFailed))
    }
}

/// The delivery engine: tracks live connections per channel id, accepts or
/// refuses handshakes, fans out messages and fires lifecycle events.
#[derive(Debug)]
pub struct ConnectionHub {
    buckets: RwLock<HashMap<ChannelId, HashMap<ConnectionId, Arc<Connection>>>>,
    users: Arc<UserRegistry>,
    events: Arc<EventBus>,
    config: HubConfig,
    stats: RwLock<HubStats>,
}

impl ConnectionHub {
    /// Create a hub with default tunables.
    pub fn new(users: Arc<UserRegistry>, events: Arc<EventBus>) -> Self {
        Self::with_config(users, events, HubConfig::default())
    }

    /// Create a hub with explicit tunables.
    pub fn with_config(users: Arc<UserRegistry>, events: Arc<EventBus>, config: HubConfig) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            users,
            events,
            config,
            stats: RwLock::new(HubStats::default()),
        }
    }

    /// Pre-create an empty bucket for a freshly issued channel id.
    ///
    /// Must happen before the id is handed to any client, so a connection
    /// racing to open immediately after registration is not refused.
    pub fn register_channel_id(&self, id: &ChannelId) {
        self.buckets.write().entry(id.clone()).or_default();
    }

    /// Whether a bucket exists for `id`.
    pub fn is_registered(&self, id: &ChannelId) -> bool {
        self.buckets.read().contains_key(id)
    }

    /// Admit or refuse an inbound connection presenting `id`.
    ///
    /// Unknown ids are refused with a policy-violation close; the connection
    /// never reaches the open state. On success the connection is tagged
    /// with the owning identity and an `Opened` event fires.
    pub fn accept(
        &self,
        id: ChannelId,
        transport: Box<dyn Transport>,
    ) -> Result<Arc<Connection>, PushError> {
        let conn = Arc::new(Connection::pending(id.clone(), transport));

        if self.connection_count() >= self.config.max_connections {
            self.stats.write().total_rejected += 1;
            conn.mark_closed();
            if let Err(err) = conn.close_transport(CloseCode::GoingAway, "Connection limit") {
                debug!(channel = %id, error = %err, "Close of refused connection failed");
            }
            return Err(PushError::ConnectionLimit(self.config.max_connections));
        }

        let admitted = {
            let mut buckets = self.buckets.write();
            match buckets.get_mut(&id) {
                Some(bucket) => {
                    conn.open();
                    bucket.insert(conn.id.clone(), conn.clone());
                    true
                }
                None => false,
            }
        };

        if !admitted {
            self.stats.write().total_rejected += 1;
            conn.mark_closed();
            if let Err(err) = conn.close_transport(CloseCode::PolicyViolation, REASON_UNKNOWN_CHANNEL)
            {
                debug!(channel = %id, error = %err, "Close of refused connection failed");
            }
            warn!(channel = %id, "Connection refused, unknown channel id");
            return Err(PushError::UnknownChannel(id));
        }

        let user = self.users.resolve_identity(id.name(), &id);
        conn.set_user(user.clone());
        self.stats.write().total_connections += 1;

        info!(channel = %id, connection = %conn.id, user = ?user, "Connection opened");
        self.events.publish(PushEvent::Opened {
            channel: id.name().to_string(),
            user,
        });

        Ok(conn)
    }

    /// Fan `text` out to every live connection in the bucket for `id`.
    ///
    /// Returns one [`Delivery`] handle per attempted connection; the caller
    /// is never blocked on transport writes or retries. Connections no
    /// longer open at iteration time are skipped, not failed.
    pub fn broadcast(&self, id: &ChannelId, text: &str) -> Vec<Delivery> {
        let connections: Vec<Arc<Connection>> = self
            .buckets
            .read()
            .get(id)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default();

        self.stats.write().total_broadcasts += 1;

        let deliveries: Vec<Delivery> = connections
            .into_iter()
            .filter(|conn| conn.is_open())
            .map(|conn| {
                let text = text.to_string();
                let config = self.config.clone();
                Delivery {
                    connection: conn.id.clone(),
                    channel: id.clone(),
                    handle: tokio::spawn(deliver(conn, text, config)),
                }
            })
            .collect();

        debug!(channel = %id, recipients = deliveries.len(), "Broadcast dispatched");
        deliveries
    }

    /// Remove a connection after its transport ended, firing a `Closed`
    /// event with the given code. Idempotent.
    pub fn close(&self, conn: &Arc<Connection>, code: CloseCode) {
        if !conn.mark_closed() {
            return;
        }
        if let Some(bucket) = self.buckets.write().get_mut(conn.channel_id()) {
            bucket.remove(&conn.id);
        }

        let user = conn.user();
        info!(
            channel = %conn.channel_id(),
            connection = %conn.id,
            code = %code,
            "Connection closed"
        );
        self.events.publish(PushEvent::Closed {
            channel: conn.channel_id().name().to_string(),
            user,
            code,
        });
    }

    /// Scope teardown: drop each id's bucket and force-close everything
    /// still in it with the fixed expiry reason. Transport failures during
    /// the forced close are logged, never propagated.
    pub fn deregister(&self, ids: &[ChannelId]) {
        let mut removed: Vec<Arc<Connection>> = Vec::new();
        {
            let mut buckets = self.buckets.write();
            for id in ids {
                if let Some(bucket) = buckets.remove(id) {
                    removed.extend(bucket.into_values());
                }
            }
        }

        for conn in removed {
            if !conn.mark_closed() {
                continue;
            }
            if let Err(err) = conn.close_transport(CloseCode::Normal, REASON_EXPIRED) {
                debug!(
                    channel = %conn.channel_id(),
                    connection = %conn.id,
                    error = %err,
                    "Transport close during teardown failed"
                );
            }
            self.events.publish(PushEvent::Closed {
                channel: conn.channel_id().name().to_string(),
                user: conn.user(),
                code: CloseCode::Normal,
            });
        }

        debug!(channels = ids.len(), "Channel ids deregistered");
    }

    /// Current number of live connections across all buckets.
    pub fn connection_count(&self) -> usize {
        self.buckets.read().values().map(|b| b.len()).sum()
    }

    /// Live connections currently in the bucket for `id`.
    pub fn channel_connection_count(&self, id: &ChannelId) -> usize {
        self.buckets.read().get(id).map_or(0, |b| b.len())
    }

    /// Hub statistics.
    pub fn stats(&self) -> HubStats {
        let mut stats = self.stats.read().clone();
        stats.current_connections = self.connection_count();
        stats
    }
}

/// One delivery attempt chain against one connection.
///
/// Write contention is retried on a fixed interval up to the configured
/// budget; the loop aborts as soon as the connection leaves the open state.
/// Any other transport error fails the delivery immediately.
async fn deliver(conn: Arc<Connection>, text: String, config: HubConfig) -> DeliveryOutcome {
    let mut attempts: u32 = 0;
    loop {
        if !conn.is_open() {
            return DeliveryOutcome::Failed(DeliveryError::ConnectionClosed);
        }
        attempts += 1;
        match conn.send_text(&text) {
            Ok(()) => {
                let retries = attempts - 1;
                if retries > 0 {
                    warn!(
                        channel = %conn.channel_id(),
                        connection = %conn.id,
                        retries,
                        "Delivered after retries, consider reducing send frequency"
                    );
                }
                return DeliveryOutcome::Delivered { retries };
            }
            Err(TransportError::WriteContention) => {
                if attempts >= config.max_send_attempts {
                    warn!(
                        channel = %conn.channel_id(),
                        connection = %conn.id,
                        attempts,
                        "Giving up delivery after persistent write contention"
                    );
                    return DeliveryOutcome::Failed(DeliveryError::RetriesExhausted { attempts });
                }
                tokio::time::sleep(config.retry_interval).await;
            }
            Err(TransportError::Closed) => {
                return DeliveryOutcome::Failed(DeliveryError::ConnectionClosed);
            }
            Err(err) => {
                error!(
                    channel = %conn.channel_id(),
                    connection = %conn.id,
                    user = ?conn.user(),
                    error = %err,
                    "Delivery failed"
                );
                return DeliveryOutcome::Failed(DeliveryError::Transport(err));
            }
        }
    }
}
