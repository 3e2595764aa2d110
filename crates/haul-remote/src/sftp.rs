//! Remote reached over SFTP on an SSH connection.
//!
//! The connection is driven by the tokio runtime that was current when
//! [`SftpFs::connect`] ran. The [`RemoteFs`] methods block on that runtime,
//! so they must be called from worker threads or `spawn_blocking`, never
//! from inside an async task.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use russh::client::{self, Handle};
use russh::keys::{self, ssh_key, PrivateKeyWithHashAlg};
use russh_sftp::client::fs::File;
use russh_sftp::client::SftpSession;
use tokio::io::AsyncReadExt;
use tokio::runtime;
use tracing::{debug, warn};

use crate::listing::walk_listing;
use crate::{Entry, RemoteError, RemoteFile, RemoteFs, Result, Walk};

/// How to log in.
#[derive(Debug, Clone)]
pub enum SftpAuth {
    Password(String),
    /// Key file, with the passphrase if it is encrypted
    Key {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct SftpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SftpAuth,
    /// Skip the `~/.ssh/known_hosts` check
    pub insecure_known_hosts: bool,
}

impl SftpSettings {
    fn location(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

struct HostKeys {
    host: String,
    port: u16,
    insecure: bool,
}

impl client::Handler for HostKeys {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        if self.insecure {
            return Ok(true);
        }
        let known = keys::check_known_hosts(&self.host, self.port, server_public_key)?;
        if !known {
            warn!(host = %self.host, "Server key not found in known_hosts");
        }
        Ok(known)
    }
}

struct Connection {
    sftp: SftpSession,
    // Keeps the SSH transport open for the lifetime of the SFTP session.
    _ssh: Handle<HostKeys>,
}

pub struct SftpFs {
    runtime: runtime::Handle,
    conn: Option<Connection>,
}

impl SftpFs {
    /// Connect, authenticate, and start the SFTP subsystem.
    ///
    /// Every failure up to a working session is [`RemoteError::Unreachable`].
    pub async fn connect(settings: &SftpSettings) -> Result<Self> {
        let unreachable = |reason: String| RemoteError::Unreachable {
            location: settings.location(),
            reason,
        };

        let handler = HostKeys {
            host: settings.host.clone(),
            port: settings.port,
            insecure: settings.insecure_known_hosts,
        };
        let config = Arc::new(client::Config::default());
        let mut ssh = client::connect(config, (settings.host.as_str(), settings.port), handler)
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        let auth = match &settings.auth {
            SftpAuth::Password(password) => ssh
                .authenticate_password(settings.username.as_str(), password.as_str())
                .await
                .map_err(|e| unreachable(e.to_string()))?,
            SftpAuth::Key { path, passphrase } => {
                let key = keys::load_secret_key(path, passphrase.as_deref())
                    .map_err(|e| unreachable(format!("cannot load {}: {}", path.display(), e)))?;
                let hash_alg = ssh
                    .best_supported_rsa_hash()
                    .await
                    .map_err(|e| unreachable(e.to_string()))?
                    .flatten();
                ssh.authenticate_publickey(
                    settings.username.as_str(),
                    PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                )
                .await
                .map_err(|e| unreachable(e.to_string()))?
            }
        };
        if !auth.success() {
            return Err(unreachable("authentication rejected".to_string()));
        }

        let channel = ssh
            .channel_open_session()
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        debug!(remote = %settings.location(), "SFTP session established");
        Ok(Self {
            runtime: runtime::Handle::current(),
            conn: Some(Connection { sftp, _ssh: ssh }),
        })
    }

    fn session(&self, path: &str) -> Result<&SftpSession> {
        self.conn
            .as_ref()
            .map(|c| &c.sftp)
            .ok_or_else(|| RemoteError::io(path, io::Error::from(io::ErrorKind::NotConnected)))
    }
}

fn sftp_error(path: &str, e: russh_sftp::client::error::Error) -> RemoteError {
    RemoteError::io(path, io::Error::other(e.to_string()))
}

impl RemoteFs for SftpFs {
    fn read_dir(&self, path: &str) -> Result<Vec<Entry>> {
        let sftp = self.session(path)?;
        let listing = self
            .runtime
            .block_on(sftp.read_dir(path))
            .map_err(|e| sftp_error(path, e))?;

        let mut entries: Vec<Entry> = listing
            .filter(|item| item.file_name() != "." && item.file_name() != "..")
            .map(|item| {
                let is_dir = item.file_type().is_dir();
                Entry {
                    name: item.file_name(),
                    is_dir,
                    size: if is_dir { 0 } else { item.metadata().size.unwrap_or(0) },
                }
            })
            .collect();

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn walk(&self, path: &str) -> Walk<'_> {
        walk_listing(path, move |dir| self.read_dir(dir))
    }

    fn open(&self, path: &str) -> Result<Box<dyn RemoteFile>> {
        let sftp = self.session(path)?;
        let (file, size) = self
            .runtime
            .block_on(async {
                let file = sftp.open(path).await?;
                let size = file.metadata().await?.size.unwrap_or(0);
                Ok::<_, russh_sftp::client::error::Error>((file, size))
            })
            .map_err(|e| sftp_error(path, e))?;

        Ok(Box::new(SftpFile {
            runtime: self.runtime.clone(),
            file: Some(file),
            size,
        }))
    }
}

impl Drop for SftpFs {
    fn drop(&mut self) {
        // Session teardown spawns onto the runtime.
        let _guard = self.runtime.enter();
        drop(self.conn.take());
    }
}

struct SftpFile {
    runtime: runtime::Handle,
    file: Option<File>,
    size: u64,
}

impl Read for SftpFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => self.runtime.block_on(file.read(buf)),
            None => Ok(0),
        }
    }
}

impl RemoteFile for SftpFile {
    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }
}

impl Drop for SftpFile {
    fn drop(&mut self) {
        // Closing the remote handle spawns onto the runtime.
        let _guard = self.runtime.enter();
        drop(self.file.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let settings = SftpSettings {
            host: "127.0.0.1".to_string(),
            port,
            username: "haul".to_string(),
            auth: SftpAuth::Password("secret".to_string()),
            insecure_known_hosts: true,
        };
        let err = SftpFs::connect(&settings).await.err().unwrap();

        match err {
            RemoteError::Unreachable { location, .. } => {
                assert_eq!(location, format!("haul@127.0.0.1:{}", port));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
