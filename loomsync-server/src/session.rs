//! Session creation, device registration, expiry, heartbeat, and statistics
//! (C8).
//!
//! Mirrors the teacher's `ConnectionManager`/`Connection` split: a
//! connection is a thin, cloneable handle around an outbound `mpsc` channel
//! plus health bookkeeping behind `RwLock`s, and the registry owns the
//! `DashMap` of live sessions the way `ConnectionManager` owns its
//! connections and rooms.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use loomsync_core::ir::IrDocument;

use crate::error::{Result, ServerError};
use crate::protocol::Frame;

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

/// A single live stream within a session, bound to one client endpoint.
#[derive(Clone)]
pub struct DeviceConnection {
    pub connection_id: String,
    pub device_id: String,
    pub platform: String,
    pub device_name: Option<String>,
    pub protocol_version: String,
    pub connected_at: DateTime<Utc>,
    last_ping_at: Arc<RwLock<DateTime<Utc>>>,
    last_acked_sequence: Arc<RwLock<u64>>,
    sender: mpsc::Sender<Frame>,
}

impl fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("connection_id", &self.connection_id)
            .field("device_id", &self.device_id)
            .field("platform", &self.platform)
            .field("channel_closed", &self.sender.is_closed())
            .finish()
    }
}

impl DeviceConnection {
    fn new(device_id: String, platform: String, device_name: Option<String>, protocol_version: String, sender: mpsc::Sender<Frame>) -> Self {
        Self {
            connection_id: random_token(8),
            device_id,
            platform,
            device_name,
            protocol_version,
            connected_at: Utc::now(),
            last_ping_at: Arc::new(RwLock::new(Utc::now())),
            last_acked_sequence: Arc::new(RwLock::new(0)),
            sender,
        }
    }

    pub async fn send(&self, frame: Frame) -> Result<()> {
        self.sender
            .send(frame)
            .await
            .map_err(|_| ServerError::Protocol("device stream closed".to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub async fn touch_ping(&self) {
        *self.last_ping_at.write().await = Utc::now();
    }

    pub async fn last_ping_at(&self) -> DateTime<Utc> {
        *self.last_ping_at.read().await
    }

    pub async fn record_ack(&self, sequence: u64) {
        let mut current = self.last_acked_sequence.write().await;
        if sequence > *current {
            *current = sequence;
        }
    }

    pub async fn last_acked_sequence(&self) -> u64 {
        *self.last_acked_sequence.read().await
    }

    pub async fn is_healthy(&self, connection_timeout: Duration) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.last_ping_at().await);
        elapsed.to_std().map(|d| d < connection_timeout).unwrap_or(false)
    }
}

/// A logical channel between a host and its devices (spec.md §3).
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    expires_at: RwLock<DateTime<Utc>>,
    pub current_ir: RwLock<Option<IrDocument>>,
    next_sequence: AtomicU64,
    pub devices: DashMap<String, Arc<DeviceConnection>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("device_count", &self.devices.len())
            .field("next_sequence", &self.next_sequence.load(Ordering::SeqCst))
            .finish()
    }
}

impl Session {
    fn new(timeout: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: random_token(16),
            created_at: now,
            expires_at: RwLock::new(now + chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::hours(8))),
            current_ir: RwLock::new(None),
            next_sequence: AtomicU64::new(0),
            devices: DashMap::new(),
        }
    }

    pub async fn expires_at(&self) -> DateTime<Utc> {
        *self.expires_at.read().await
    }

    pub async fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at().await
    }

    pub async fn extend(&self, by: Duration) {
        let mut expires_at = self.expires_at.write().await;
        *expires_at = Utc::now() + chrono::Duration::from_std(by).unwrap_or(chrono::Duration::hours(8));
    }

    /// Monotonic per-session sequence number, incremented by the dispatcher
    /// on every flush (spec.md §3's `nextSequence` invariant).
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::SeqCst)
    }

    pub async fn broadcast(&self, frame: Frame) {
        for device in self.devices.iter() {
            if device.is_closed() {
                continue;
            }
            if let Err(e) = device.send(frame.clone()).await {
                warn!(connection_id = %device.connection_id, error = %e, "failed to send frame to device");
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionRegistryConfig {
    pub session_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub connection_timeout: Duration,
    pub cleanup_interval: Duration,
}

impl Default for SessionRegistryConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(8 * 60 * 60),
            heartbeat_interval: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHealth {
    pub connection_id: String,
    pub device_id: String,
    pub healthy: bool,
    pub last_ping_at: DateTime<Utc>,
    pub last_acked_sequence: u64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHealth {
    pub healthy: usize,
    pub unhealthy: usize,
    pub devices: Vec<DeviceHealth>,
}

#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub session_count: usize,
    pub total_devices: usize,
    pub devices_per_session: Vec<(String, usize)>,
}

/// Owns every live [`Session`]; the session-domain's single source of
/// truth for lifecycle (spec.md §4.8).
pub struct SessionRegistry {
    config: SessionRegistryConfig,
    sessions: DashMap<String, Arc<Session>>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("session_count", &self.sessions.len())
            .finish()
    }
}

impl SessionRegistry {
    pub fn new(config: SessionRegistryConfig) -> Arc<Self> {
        Arc::new(Self { config, sessions: DashMap::new() })
    }

    pub fn create_session(&self) -> Arc<Session> {
        let session = Arc::new(Session::new(self.config.session_timeout));
        self.sessions.insert(session.id.clone(), session.clone());
        info!(session_id = %session.id, "session created");
        session
    }

    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| s.clone())
    }

    /// Closes every device stream with normal closure and removes the
    /// session.
    pub fn delete_session(&self, id: &str) -> bool {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.devices.clear();
            info!(session_id = %id, "session deleted");
            true
        } else {
            false
        }
    }

    pub async fn extend_session(&self, id: &str) -> Result<DateTime<Utc>> {
        let session = self.get_session(id).ok_or_else(|| ServerError::SessionNotFound(id.to_string()))?;
        session.extend(self.config.session_timeout).await;
        Ok(session.expires_at().await)
    }

    /// Admit a new device onto `session_id`, verifying the session exists
    /// and has not expired (spec.md §4.8's admission contract).
    pub async fn admit_device(
        &self,
        session_id: &str,
        device_id: String,
        platform: String,
        device_name: Option<String>,
        protocol_version: String,
    ) -> Result<(Arc<Session>, Arc<DeviceConnection>, mpsc::Receiver<Frame>)> {
        let session = self.get_session(session_id).ok_or_else(|| ServerError::SessionNotFound(session_id.to_string()))?;
        if session.is_expired().await {
            return Err(ServerError::SessionExpired(session_id.to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        let connection = Arc::new(DeviceConnection::new(device_id, platform, device_name, protocol_version, tx));
        session.devices.insert(connection.connection_id.clone(), connection.clone());
        info!(session_id, connection_id = %connection.connection_id, "device admitted");
        Ok((session, connection, rx))
    }

    pub fn remove_device(&self, session_id: &str, connection_id: &str) {
        if let Some(session) = self.get_session(session_id) {
            session.devices.remove(connection_id);
        }
    }

    /// Force-close idle device streams (spec.md §4.8's heartbeat contract)
    /// and return the connection ids that were dropped.
    pub async fn enforce_heartbeat(&self) -> Vec<(String, String)> {
        let mut dropped = Vec::new();
        for session in self.sessions.iter() {
            let mut stale = Vec::new();
            for device in session.devices.iter() {
                if !device.is_healthy(self.config.connection_timeout).await {
                    stale.push(device.connection_id.clone());
                }
            }
            for connection_id in stale {
                session.devices.remove(&connection_id);
                warn!(session_id = %session.id, connection_id, "closing stream: connection timeout");
                dropped.push((session.id.clone(), connection_id));
            }
        }
        dropped
    }

    /// Purge sessions past `expiresAt`, returning their ids.
    pub async fn purge_expired(&self) -> Vec<String> {
        let mut expired_ids = Vec::new();
        for session in self.sessions.iter() {
            if session.is_expired().await {
                expired_ids.push(session.id.clone());
            }
        }
        for id in &expired_ids {
            self.delete_session(id);
        }
        expired_ids
    }

    pub async fn session_health(&self, id: &str) -> Option<SessionHealth> {
        let session = self.get_session(id)?;
        let mut health = SessionHealth::default();
        for device in session.devices.iter() {
            let healthy = device.is_healthy(self.config.connection_timeout).await;
            if healthy {
                health.healthy += 1;
            } else {
                health.unhealthy += 1;
            }
            health.devices.push(DeviceHealth {
                connection_id: device.connection_id.clone(),
                device_id: device.device_id.clone(),
                healthy,
                last_ping_at: device.last_ping_at().await,
                last_acked_sequence: device.last_acked_sequence().await,
            });
        }
        Some(health)
    }

    pub fn stats(&self) -> RegistryStats {
        let devices_per_session: Vec<(String, usize)> = self
            .sessions
            .iter()
            .map(|s| (s.id.clone(), s.devices.len()))
            .collect();
        RegistryStats {
            session_count: self.sessions.len(),
            total_devices: devices_per_session.iter().map(|(_, n)| n).sum(),
            devices_per_session,
        }
    }

    /// Spawn the heartbeat and expiry-cleanup timed tasks (spec.md §5's
    /// session domain). Both tasks exit once `cancel` fires.
    pub fn spawn_background(self: &Arc<Self>, cancel: tokio_util::sync::CancellationToken) {
        let heartbeat_registry = self.clone();
        let heartbeat_cancel = cancel.clone();
        let heartbeat_interval = self.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            loop {
                tokio::select! {
                    _ = heartbeat_cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        heartbeat_registry.enforce_heartbeat().await;
                    }
                }
            }
        });

        let cleanup_registry = self.clone();
        let cleanup_cancel = cancel;
        let cleanup_interval = self.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                tokio::select! {
                    _ = cleanup_cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        cleanup_registry.purge_expired().await;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let registry = SessionRegistry::new(SessionRegistryConfig::default());
        let session = registry.create_session();
        let fetched = registry.get_session(&session.id).unwrap();
        assert_eq!(fetched.id, session.id);
    }

    #[tokio::test]
    async fn admit_device_rejects_unknown_session() {
        let registry = SessionRegistry::new(SessionRegistryConfig::default());
        let result = registry
            .admit_device("missing".to_string().as_str(), "d1".into(), "ios".into(), None, "1.0.0".into())
            .await;
        assert!(matches!(result, Err(ServerError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn admit_device_rejects_expired_session() {
        let registry = SessionRegistry::new(SessionRegistryConfig {
            session_timeout: Duration::from_millis(1),
            ..SessionRegistryConfig::default()
        });
        let session = registry.create_session();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = registry
            .admit_device(&session.id, "d1".into(), "ios".into(), None, "1.0.0".into())
            .await;
        assert!(matches!(result, Err(ServerError::SessionExpired(_))));
    }

    #[tokio::test]
    async fn extend_session_pushes_back_expiry() {
        let registry = SessionRegistry::new(SessionRegistryConfig::default());
        let session = registry.create_session();
        let before = session.expires_at().await;
        registry.extend_session(&session.id).await.unwrap();
        let after = registry.get_session(&session.id).unwrap().expires_at().await;
        assert!(after >= before);
    }

    #[tokio::test]
    async fn purge_expired_removes_only_expired_sessions() {
        let registry = SessionRegistry::new(SessionRegistryConfig::default());
        let live = registry.create_session();
        let expiring = SessionRegistry::new(SessionRegistryConfig {
            session_timeout: Duration::from_millis(1),
            ..SessionRegistryConfig::default()
        });
        let expired_session = expiring.create_session();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let purged = expiring.purge_expired().await;
        assert_eq!(purged, vec![expired_session.id.clone()]);
        assert!(registry.get_session(&live.id).is_some());
    }

    #[tokio::test]
    async fn stats_reports_session_and_device_counts() {
        let registry = SessionRegistry::new(SessionRegistryConfig::default());
        let session = registry.create_session();
        registry
            .admit_device(&session.id, "d1".into(), "ios".into(), None, "1.0.0".into())
            .await
            .unwrap();
        let stats = registry.stats();
        assert_eq!(stats.session_count, 1);
        assert_eq!(stats.total_devices, 1);
    }
}
