//! Registration and heartbeat loop.

use crate::client::{HubClient, HubError, HubResult};
use crate::config::AgentConfig;
use crate::identity::{IdentityResolver, ResolvedIdentity};
use pwnhub_core::Patch;
use pwnhub_core::api::{HeartbeatRequest, RegisterRequest};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

/// Count files in `dir` whose extension matches one of `extensions`
/// (case-insensitive, with leading dot). A missing directory counts as zero.
pub async fn count_captures(dir: &Path, extensions: &[String]) -> i64 {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to read capture directory");
            return 0;
        }
    };

    let mut count = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Error while counting captures");
                break;
            }
        };
        let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
        if is_file && has_capture_extension(&entry.path(), extensions) {
            count += 1;
        }
    }
    count
}

fn has_capture_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

/// Mutable loop state, owned by [`Agent::run`].
#[derive(Debug)]
struct Session {
    identity: ResolvedIdentity,
    registered: bool,
    reported_hostname: Option<String>,
}

/// The on-device agent: resolves identity, registers, then heartbeats.
pub struct Agent {
    config: Arc<AgentConfig>,
    client: HubClient,
    resolver: IdentityResolver,
}

impl Agent {
    pub fn new(config: Arc<AgentConfig>) -> HubResult<Self> {
        let client = HubClient::new(&config.hub_url, config.request_timeout())?;
        let resolver = IdentityResolver::new(config.identity.clone(), config.state_file.clone());
        Ok(Self {
            config,
            client,
            resolver,
        })
    }

    pub fn client(&self) -> &HubClient {
        &self.client
    }

    /// Run until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let identity = self.resolver.resolve();
        tracing::info!(
            serial = %identity.serial,
            hostname = ?identity.hostname,
            image_generation = identity.image_generation,
            hub = %self.client.base_url(),
            "Agent starting"
        );

        let mut session = Session {
            identity,
            registered: false,
            reported_hostname: None,
        };

        if let Err(e) = self.register(&mut session).await {
            tracing::warn!(error = %e, "Initial registration failed, retrying on next tick");
        }

        let period = self.config.heartbeat_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.tick(&mut session) => result,
            };

            if let Err(e) = result {
                tracing::warn!(
                    serial = %session.identity.serial,
                    error = %e,
                    cooldown_secs = self.config.error_cooldown_secs,
                    "Heartbeat failed"
                );
                if sleep_or_cancel(self.config.error_cooldown(), &cancel).await {
                    break;
                }
            }
        }

        tracing::info!(serial = %session.identity.serial, "Agent stopped");
    }

    async fn tick(&self, session: &mut Session) -> HubResult<()> {
        if !session.registered {
            return self.register(session).await;
        }
        match self.heartbeat(session).await {
            Err(HubError::UnknownDevice) => {
                tracing::warn!(
                    serial = %session.identity.serial,
                    "Hub does not know this device, re-registering"
                );
                session.registered = false;
                self.register(session).await
            }
            other => other,
        }
    }

    async fn register(&self, session: &mut Session) -> HubResult<()> {
        let hostname = self.resolver.hostname();
        let handshake_count =
            count_captures(&self.config.handshake_dir, &self.config.capture_extensions).await;
        let request = RegisterRequest {
            serial: session.identity.serial.clone(),
            hostname: hostname.clone(),
            ssh_fingerprint: session.identity.ssh_fingerprint.clone(),
            image_generation: Some(session.identity.image_generation),
            handshake_count: Some(handshake_count),
        };

        let device = self.client.register(&request).await?;
        session.registered = true;
        session.reported_hostname = hostname;
        tracing::info!(
            serial = %device.serial,
            handshake_count = device.handshake_count,
            image_generation = device.image_generation,
            "Registered with hub"
        );
        Ok(())
    }

    async fn heartbeat(&self, session: &mut Session) -> HubResult<()> {
        let hostname = self.resolver.hostname();
        let handshake_count =
            count_captures(&self.config.handshake_dir, &self.config.capture_extensions).await;

        let mut request = HeartbeatRequest::new(session.identity.serial.clone());
        request.handshake_count = Patch::Value(handshake_count);
        let hostname_changed = hostname != session.reported_hostname;
        if hostname_changed {
            request.hostname = hostname.clone().into();
        }

        self.client.heartbeat(&request).await?;
        if hostname_changed {
            tracing::info!(
                serial = %session.identity.serial,
                hostname = ?hostname,
                "Reported hostname change"
            );
            session.reported_hostname = hostname;
        }
        tracing::debug!(
            serial = %session.identity.serial,
            handshake_count = handshake_count,
            "Heartbeat sent"
        );
        Ok(())
    }
}

/// Sleep for `duration`; returns true if cancelled first.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extensions() -> Vec<String> {
        vec![".cap".to_string(), ".pcap".to_string(), ".hccapx".to_string()]
    }

    #[tokio::test]
    async fn test_count_captures_matches_extensions_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.pcap", "b.CAP", "c.hccapx", "d.txt", "e", "f.pcap.json"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.pcap")).unwrap();

        assert_eq!(count_captures(dir.path(), &extensions()).await, 3);
    }

    #[tokio::test]
    async fn test_count_captures_missing_dir_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(count_captures(&missing, &extensions()).await, 0);
    }

    #[test]
    fn test_extension_without_dot_also_matches() {
        let exts = vec!["pcap".to_string()];
        assert!(has_capture_extension(Path::new("/x/y.PCAP"), &exts));
        assert!(!has_capture_extension(Path::new("/x/pcap"), &exts));
    }

    #[tokio::test]
    async fn test_sleep_or_cancel_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(sleep_or_cancel(Duration::from_secs(3600), &cancel).await);
    }
}
