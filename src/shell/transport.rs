// src/shell/transport.rs

//! Byte-level transport underneath a remote session.
//!
//! Sessions talk to a [`ShellTransport`] instead of an SSH channel directly.
//! Production uses [`SshConnector`] (`russh`); tests plug in a scripted
//! fake shell.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client;
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::errors::{FleetError, Result};
use crate::types::{Credential, Host};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An interactive, bidirectional byte stream to a remote shell.
pub trait ShellTransport: Send {
    fn send<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>>;

    /// Next chunk of output, or `None` once the remote side closed.
    fn recv(&mut self) -> BoxFuture<'_, io::Result<Option<Vec<u8>>>>;

    fn close(&mut self) -> BoxFuture<'_, io::Result<()>>;

    fn is_connected(&self) -> bool;
}

/// Opens transports for hosts.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        host: &'a Host,
        settings: &'a Settings,
    ) -> BoxFuture<'a, Result<Box<dyn ShellTransport>>>;
}

fn connection_error(host: &Host, message: impl ToString) -> FleetError {
    FleetError::Connection {
        host: host.to_string(),
        message: message.to_string(),
    }
}

/// SSH connector backed by `russh`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshConnector;

impl Connector for SshConnector {
    fn connect<'a>(
        &'a self,
        host: &'a Host,
        settings: &'a Settings,
    ) -> BoxFuture<'a, Result<Box<dyn ShellTransport>>> {
        Box::pin(async move {
            let timeout = settings.connection_timeout;
            match tokio::time::timeout(timeout, open_ssh(host, settings)).await {
                Ok(result) => result,
                Err(_) => Err(connection_error(
                    host,
                    format!("timed out after {} ms", timeout.as_millis()),
                )),
            }
        })
    }
}

async fn open_ssh(host: &Host, settings: &Settings) -> Result<Box<dyn ShellTransport>> {
    info!(host = %host, "opening SSH connection");

    let config = Arc::new(client::Config::default());
    let handler = ClientHandler {
        hostname: host.hostname.clone(),
        port: host.ssh_port,
        known_hosts: settings.known_hosts.clone(),
    };

    let mut handle = client::connect(config, (host.hostname.as_str(), host.ssh_port), handler)
        .await
        .map_err(|e| connection_error(host, e))?;

    let authenticated = match &host.credential {
        Credential::Password(password) => handle
            .authenticate_password(host.username.clone(), password.clone())
            .await
            .map_err(|e| connection_error(host, e))?,
        Credential::KeyFile(path) => {
            let key = load_key(host, path)?;
            handle
                .authenticate_publickey(host.username.clone(), Arc::new(key))
                .await
                .map_err(|e| connection_error(host, e))?
        }
        Credential::DefaultIdentity => {
            let path = settings
                .identity
                .as_deref()
                .ok_or_else(|| connection_error(host, "no identity file configured"))?;
            let key = load_key(host, path)?;
            handle
                .authenticate_publickey(host.username.clone(), Arc::new(key))
                .await
                .map_err(|e| connection_error(host, e))?
        }
    };

    if !authenticated {
        return Err(connection_error(host, "authentication rejected"));
    }

    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| connection_error(host, e))?;
    channel
        .request_pty(false, "xterm", 200, 24, 0, 0, &[])
        .await
        .map_err(|e| connection_error(host, e))?;
    channel
        .request_shell(true)
        .await
        .map_err(|e| connection_error(host, e))?;

    debug!(host = %host, "interactive shell channel open");

    Ok(Box::new(SshTransport {
        handle,
        channel,
        connected: true,
    }))
}

fn load_key(host: &Host, path: &Path) -> Result<KeyPair> {
    russh_keys::load_secret_key(path, None).map_err(|e| {
        connection_error(host, format!("cannot load key {}: {e}", path.display()))
    })
}

struct ClientHandler {
    hostname: String,
    port: u16,
    known_hosts: Option<PathBuf>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let verdict = match &self.known_hosts {
            Some(path) => russh_keys::check_known_hosts_path(
                &self.hostname,
                self.port,
                server_public_key,
                path,
            ),
            None => russh_keys::check_known_hosts(&self.hostname, self.port, server_public_key),
        };

        match verdict {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!(host = %self.hostname, port = self.port, "server key not in known hosts");
                Ok(false)
            }
            Err(e) => {
                warn!(host = %self.hostname, port = self.port, error = %e, "server key rejected");
                Ok(false)
            }
        }
    }
}

struct SshTransport {
    handle: client::Handle<ClientHandler>,
    channel: russh::Channel<client::Msg>,
    connected: bool,
}

impl ShellTransport for SshTransport {
    fn send<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            self.channel.data(data).await.map_err(io::Error::other)
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, io::Result<Option<Vec<u8>>>> {
        Box::pin(async move {
            loop {
                match self.channel.wait().await {
                    Some(ChannelMsg::Data { data }) => return Ok(Some(data.to_vec())),
                    Some(ChannelMsg::ExtendedData { data, .. }) => return Ok(Some(data.to_vec())),
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                        self.connected = false;
                        return Ok(None);
                    }
                    Some(_) => continue,
                }
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            self.connected = false;
            let mut first_error: Option<io::Error> = None;

            if let Err(e) = self.channel.close().await {
                debug!(error = %e, "closing shell channel failed");
                first_error.get_or_insert(io::Error::other(e));
            }
            if let Err(e) = self
                .handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
            {
                debug!(error = %e, "disconnecting SSH session failed");
                first_error.get_or_insert(io::Error::other(e));
            }

            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
