//! Error kinds for the proxy core and the exit codes they map to.

use thiserror::Error;

/// Errors the core can raise. Packet-level failures (malformed frames,
/// unknown ICMPv6 types) are logged and dropped inline in the handler and
/// never reach this type.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("interface '{0}' does not exist or has no MAC address")]
    InvalidInterface(String),

    #[error("interface '{0}' was registered more than once")]
    DuplicateInterface(String),

    #[error("loopback interface 'lo' cannot be proxied")]
    LoopbackRefused,

    #[error("failed to start packet capture on '{iface}': {source}")]
    SniffCapture {
        iface: String,
        #[source]
        source: pcap::Error,
    },

    #[error("route save file I/O error: {0}")]
    SaveFileIo(#[from] std::io::Error),

    #[error("route save file is not valid JSON: {0}")]
    SaveFileFormat(#[from] serde_json::Error),
}

impl ProxyError {
    /// Process exit code for errors that are fatal at startup. Errors with
    /// no code here (save-file problems) are logged and tolerated.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProxyError::InvalidInterface(_)
            | ProxyError::DuplicateInterface(_)
            | ProxyError::LoopbackRefused
            | ProxyError::SniffCapture { .. } => Some(1),
            ProxyError::SaveFileIo(_) | ProxyError::SaveFileFormat(_) => None,
        }
    }
}
