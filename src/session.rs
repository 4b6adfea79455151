//! Session establishment and lifecycle: direct or bastion-tunneled
//! connect, the SFTP sub-channel, command execution, and teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use russh::keys::ssh_key;
use russh::{ChannelMsg, Disconnect, client};
use russh_sftp::client::SftpSession;
use tracing::{info, warn};

use crate::auth::{AuthNegotiator, ChallengeResolver};
use crate::config::{ConnectionProfile, ProfileRecord};
use crate::error::{AppError, Result};
use crate::filesystem::SftpRemote;

/// Accept-on-first-use host key policy.
struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = AppError;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// The profile pair one session is built from. `bastion` present means
/// the target is reached through a forwarded channel.
#[derive(Debug, Clone)]
pub struct SessionProfiles {
    pub target: ConnectionProfile,
    pub bastion: Option<ConnectionProfile>,
}

impl SessionProfiles {
    pub fn direct(target: ConnectionProfile) -> Self {
        Self {
            target,
            bastion: None,
        }
    }

    pub fn from_record(record: &ProfileRecord) -> Self {
        Self {
            target: record.target.clone(),
            bastion: record.use_bastion.then(|| record.bastion.clone()),
        }
    }
}

/// Captured output of one remote command.
#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<u32>,
}

/// The live connection pair plus the SFTP sub-channel.
///
/// Owns its connections exclusively: they are opened here and closed
/// here, never mid-transfer. At most one transfer run may borrow the
/// SFTP side at a time; a second attempt is rejected, not queued.
pub struct SessionHandle {
    target: client::Handle<ClientHandler>,
    bastion: Option<client::Handle<ClientHandler>>,
    sftp: Arc<SftpSession>,
    target_label: String,
    transfer_slot: TransferSlot,
}

impl SessionHandle {
    /// Establish the session: bastion leg first when enabled, then the
    /// target (through the forwarded channel if there is one), then the
    /// SFTP subsystem. Any failure closes whatever was already open,
    /// target leg before bastion leg.
    pub async fn connect(profiles: &SessionProfiles, resolver: &ChallengeResolver) -> Result<Self> {
        profiles.target.validate()?;

        let config = Arc::new(client::Config {
            keepalive_interval: Some(Duration::from_secs(30)),
            ..Default::default()
        });

        let (target, bastion) = match &profiles.bastion {
            Some(bastion_profile) => {
                Self::connect_via_bastion(config, bastion_profile, &profiles.target, resolver)
                    .await?
            }
            None => {
                let target = Self::connect_direct(config, &profiles.target, resolver).await?;
                (target, None)
            }
        };

        let sftp = match Self::open_sftp(&target).await {
            Ok(sftp) => sftp,
            Err(e) => {
                let _ = target.disconnect(Disconnect::ByApplication, "", "").await;
                if let Some(bastion) = &bastion {
                    let _ = bastion.disconnect(Disconnect::ByApplication, "", "").await;
                }
                return Err(e);
            }
        };

        info!("session established to {}", profiles.target.host_port());

        Ok(Self {
            target,
            bastion,
            sftp: Arc::new(sftp),
            target_label: profiles.target.host_port(),
            transfer_slot: TransferSlot::default(),
        })
    }

    async fn connect_direct(
        config: Arc<client::Config>,
        profile: &ConnectionProfile,
        resolver: &ChallengeResolver,
    ) -> Result<client::Handle<ClientHandler>> {
        info!("direct connection to {}", profile.host_port());
        let mut target = client::connect(config, profile.host_port(), ClientHandler)
            .await
            .map_err(|e| AppError::Network(format!("connect {} failed: {e}", profile.host_port())))?;

        let negotiator = AuthNegotiator::new(profile, resolver);
        if let Err(e) = negotiator.authenticate(&mut target).await {
            let _ = target.disconnect(Disconnect::ByApplication, "", "").await;
            return Err(e);
        }

        Ok(target)
    }

    async fn connect_via_bastion(
        config: Arc<client::Config>,
        bastion_profile: &ConnectionProfile,
        target_profile: &ConnectionProfile,
        resolver: &ChallengeResolver,
    ) -> Result<(
        client::Handle<ClientHandler>,
        Option<client::Handle<ClientHandler>>,
    )> {
        bastion_profile.validate()?;

        info!("connecting to bastion {}", bastion_profile.host_port());
        let mut bastion = client::connect(config.clone(), bastion_profile.host_port(), ClientHandler)
            .await
            .map_err(|e| {
                AppError::Network(format!(
                    "connect {} failed: {e}",
                    bastion_profile.host_port()
                ))
            })?;

        let negotiator = AuthNegotiator::new(bastion_profile, resolver);
        if let Err(e) = negotiator.authenticate(&mut bastion).await {
            let _ = bastion.disconnect(Disconnect::ByApplication, "", "").await;
            return Err(e);
        }

        info!(
            "bastion authenticated, opening channel to {}",
            target_profile.host_port()
        );
        let channel = match bastion
            .channel_open_direct_tcpip(
                target_profile.host.as_str(),
                target_profile.port as u32,
                bastion_profile.host.as_str(),
                0,
            )
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                let _ = bastion.disconnect(Disconnect::ByApplication, "", "").await;
                return Err(AppError::Tunnel {
                    host: target_profile.host.clone(),
                    port: target_profile.port,
                    reason: e.to_string(),
                });
            }
        };

        let mut target =
            match client::connect_stream(config, channel.into_stream(), ClientHandler).await {
                Ok(handle) => handle,
                Err(e) => {
                    let _ = bastion.disconnect(Disconnect::ByApplication, "", "").await;
                    return Err(AppError::Tunnel {
                        host: target_profile.host.clone(),
                        port: target_profile.port,
                        reason: e.to_string(),
                    });
                }
            };

        let negotiator = AuthNegotiator::new(target_profile, resolver);
        if let Err(e) = negotiator.authenticate(&mut target).await {
            let _ = target.disconnect(Disconnect::ByApplication, "", "").await;
            let _ = bastion.disconnect(Disconnect::ByApplication, "", "").await;
            return Err(e);
        }

        Ok((target, Some(bastion)))
    }

    async fn open_sftp(target: &client::Handle<ClientHandler>) -> Result<SftpSession> {
        let channel = target.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| AppError::RemoteIo(format!("failed to start SFTP subsystem: {e}")))
    }

    pub fn has_bastion(&self) -> bool {
        self.bastion.is_some()
    }

    pub fn target_label(&self) -> &str {
        &self.target_label
    }

    /// The remote-filesystem view the transfer engine consumes.
    pub fn remote(&self) -> SftpRemote {
        SftpRemote::new(Arc::clone(&self.sftp))
    }

    /// Pre-flight liveness probe. A dead connection is reported
    /// distinctly so the caller can reconnect instead of retrying.
    pub async fn probe(&self) -> Result<()> {
        self.sftp
            .read_dir(".")
            .await
            .map(|_| ())
            .map_err(|e| AppError::StaleConnection(e.to_string()))
    }

    /// Claim the single transfer slot for this session. A second claim
    /// while one run is active is rejected.
    pub fn begin_transfer(&self) -> Result<TransferGuard<'_>> {
        self.transfer_slot.claim()
    }

    /// Run one command line on the target, capturing stdout, stderr and
    /// the exit status.
    pub async fn exec(&self, command: &str) -> Result<CommandOutput> {
        let mut channel = self.target.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        loop {
            let Some(msg) = channel.wait().await else {
                break;
            };
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
        })
    }

    /// Tear down the session: target connection first, then the
    /// bastion. The reversed order would orphan the forwarded channel.
    pub async fn close(self) -> Result<()> {
        let mut first_error: Option<AppError> = None;

        if let Err(e) = self
            .target
            .disconnect(Disconnect::ByApplication, "", "")
            .await
        {
            warn!("target disconnect failed: {}", e);
            first_error.get_or_insert(e.into());
        }

        if let Some(bastion) = &self.bastion
            && let Err(e) = bastion.disconnect(Disconnect::ByApplication, "", "").await
        {
            warn!("bastion disconnect failed: {}", e);
            first_error.get_or_insert(e.into());
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Latch enforcing one active transfer run per session.
#[derive(Default)]
struct TransferSlot(AtomicBool);

impl TransferSlot {
    fn claim(&self) -> Result<TransferGuard<'_>> {
        if self
            .0
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(AppError::Validation(
                "a transfer is already active on this session".to_string(),
            ));
        }
        Ok(TransferGuard { slot: self })
    }
}

/// Marks a transfer run as active; releases the slot on drop, also on
/// error paths.
pub struct TransferGuard<'a> {
    slot: &'a TransferSlot,
}

impl Drop for TransferGuard<'_> {
    fn drop(&mut self) {
        self.slot.0.store(false, Ordering::Release);
    }
}
