use async_trait::async_trait;
use clamav_client::{clean, Tcp};
use std::str;
use std::time::{Duration, Instant};

use super::{Classification, InspectionError, Inspector};

/// Inspector backed by a clamd daemon over TCP.
///
/// Every failure to get a verdict (connection, timeout, unparsable reply) is an
/// `InspectionError`, so the worker retries instead of passing the file.
#[derive(Clone, Debug)]
pub struct ClamAvInspector {
    host: String,
    port: u16,
    /// Timeout in seconds for each scan operation (default: 30)
    timeout_secs: u64,
}

impl ClamAvInspector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_timeout(host, port, 30)
    }

    pub fn with_timeout(host: impl Into<String>, port: u16, timeout_secs: u64) -> Self {
        Self {
            host: host.into(),
            port,
            timeout_secs,
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Pull the signature name out of a `stream: Eicar-Signature FOUND` reply.
fn virus_name(response: &[u8]) -> String {
    let response_str = str::from_utf8(response).map(str::trim).unwrap_or("unknown");
    if !response_str.contains("FOUND") {
        return "unknown".to_string();
    }
    response_str
        .split(':')
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or("unknown")
        .to_string()
}

#[async_trait]
impl Inspector for ClamAvInspector {
    fn name(&self) -> &'static str {
        "clamav"
    }

    /// Uses the sync client inside spawn_blocking to avoid !Send futures.
    async fn inspect(&self, data: &[u8]) -> Result<Classification, InspectionError> {
        let start = Instant::now();
        tracing::debug!(host = %self.host, port = %self.port, "Starting ClamAV scan");

        let data = data.to_vec();
        let address = self.address();
        let timeout_secs = self.timeout_secs;

        let result = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            tokio::task::spawn_blocking(move || {
                let connection = Tcp {
                    host_address: address.as_str(),
                };
                clamav_client::scan_buffer(data.as_slice(), connection, None)
                    .map_err(|e| InspectionError::Unavailable(format!("ClamAV scan error: {}", e)))
                    .and_then(|response| {
                        clean(&response)
                            .map(|is_clean| (is_clean, response.clone()))
                            .map_err(|e| {
                                InspectionError::BadResponse(format!(
                                    "Failed to parse ClamAV response: {}",
                                    e
                                ))
                            })
                    })
            }),
        )
        .await;

        match result {
            Ok(Ok(Ok((true, _)))) => {
                tracing::info!(
                    duration_ms = start.elapsed().as_millis(),
                    "ClamAV scan completed: clean"
                );
                Ok(Classification::Clean)
            }
            Ok(Ok(Ok((false, response)))) => {
                tracing::warn!(
                    duration_ms = start.elapsed().as_millis(),
                    virus = %virus_name(&response),
                    "ClamAV scan detected virus"
                );
                Ok(Classification::Infected)
            }
            Ok(Ok(Err(e))) => {
                tracing::error!(error = %e, "ClamAV scan failed");
                Err(e)
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "ClamAV scan task panicked");
                Err(InspectionError::Unavailable(format!(
                    "ClamAV scan task join error: {}",
                    e
                )))
            }
            Err(_) => {
                tracing::error!(timeout_secs, "ClamAV scan timeout");
                Err(InspectionError::Timeout(timeout_secs))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virus_name_parsing() {
        assert_eq!(virus_name(b"stream: Eicar-Test-Signature FOUND\0"), "Eicar-Test-Signature");
        assert_eq!(virus_name(b"stream: OK\0"), "unknown");
        assert_eq!(virus_name(&[0xff, 0xfe]), "unknown");
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_an_error_not_a_verdict() {
        // Port 1 on localhost is reserved and refuses connections.
        let inspector = ClamAvInspector::with_timeout("127.0.0.1", 1, 5);
        let result = inspector.inspect(b"bitcoin").await;
        assert!(result.is_err());
    }
}
