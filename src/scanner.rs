//! Malware scanning of attachments.
//!
//! `ClamdScanner` streams every attachment to a clamd daemon using the
//! `zINSTREAM` command; a single positive verdict marks the whole message.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::error::ScanError;
use crate::message::Attachment;

/// clamd rejects chunks above its StreamMaxLength; stay well below.
const CHUNK_SIZE: usize = 64 * 1024;

#[async_trait]
pub trait MalwareScanner: Send + Sync {
    /// `true` when any attachment is infected.
    async fn scan(&self, attachments: &[Attachment]) -> Result<bool, ScanError>;
}

/// Used when scanning is disabled.
pub struct NoopScanner;

#[async_trait]
impl MalwareScanner for NoopScanner {
    async fn scan(&self, _attachments: &[Attachment]) -> Result<bool, ScanError> {
        Ok(false)
    }
}

/// clamd over TCP.
pub struct ClamdScanner {
    address: String,
}

impl ClamdScanner {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    async fn connect(&self) -> Result<TcpStream, ScanError> {
        TcpStream::connect(&self.address)
            .await
            .map_err(|e| ScanError::Connect {
                address: self.address.clone(),
                reason: e.to_string(),
            })
    }

    /// Block until clamd answers `PONG`, retrying every `interval`.
    pub async fn wait_ready(&self, interval: Duration, attempts: u32) -> Result<(), ScanError> {
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.ping().await {
                Ok(()) => {
                    info!(address = %self.address, "clamd is ready");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "clamd not ready yet");
                    last_error = Some(e);
                }
            }
            tokio::time::sleep(interval).await;
        }
        Err(last_error.unwrap_or_else(|| ScanError::Protocol("no ping attempts made".into())))
    }

    async fn ping(&self) -> Result<(), ScanError> {
        let mut stream = self.connect().await?;
        stream.write_all(b"zPING\0").await.map_err(protocol)?;
        let reply = read_reply(&mut stream).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(ScanError::Protocol(format!("unexpected ping reply: {reply}")))
        }
    }

    async fn scan_one(&self, attachment: &Attachment) -> Result<bool, ScanError> {
        let mut stream = self.connect().await?;
        stream.write_all(b"zINSTREAM\0").await.map_err(protocol)?;
        for chunk in attachment.bytes.chunks(CHUNK_SIZE) {
            let len = u32::try_from(chunk.len())
                .map_err(|_| ScanError::Protocol("chunk too large".into()))?;
            stream
                .write_all(&len.to_be_bytes())
                .await
                .map_err(protocol)?;
            stream.write_all(chunk).await.map_err(protocol)?;
        }
        stream.write_all(&0u32.to_be_bytes()).await.map_err(protocol)?;
        let reply = read_reply(&mut stream).await?;
        interpret_reply(&reply)
    }
}

#[async_trait]
impl MalwareScanner for ClamdScanner {
    async fn scan(&self, attachments: &[Attachment]) -> Result<bool, ScanError> {
        for attachment in attachments {
            if self.scan_one(attachment).await? {
                warn!(file = %attachment.name, "Malware detected");
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn protocol(e: std::io::Error) -> ScanError {
    ScanError::Protocol(e.to_string())
}

async fn read_reply(stream: &mut TcpStream) -> Result<String, ScanError> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.map_err(protocol)?;
    Ok(String::from_utf8_lossy(&buf)
        .trim_end_matches(['\0', '\n'])
        .to_string())
}

/// `stream: OK`, `stream: Eicar-Signature FOUND` or `... ERROR`.
fn interpret_reply(reply: &str) -> Result<bool, ScanError> {
    if reply.ends_with("FOUND") {
        Ok(true)
    } else if reply.ends_with("OK") {
        Ok(false)
    } else {
        Err(ScanError::Protocol(format!("scan failed: {reply}")))
    }
}
