//! # WinRM client
//!
//! Client for Microsoft's WS-Management (WinRM) protocol: open a remote
//! Windows command shell over HTTP(S), run commands or PowerShell scripts
//! with streamed stdout/stderr, and issue WQL queries against WMI.
//!
//! - **Shell lifecycle** – Create/Delete of cmd shells, Command start,
//!   Signal(terminate)
//! - **Output streaming** – the multi-round Receive pump with base64
//!   stream decoding and exit-code aggregation
//! - **WQL / WMI** – WS-Enumeration with WQL filters, Pull continuation,
//!   uniform record normalization
//! - **Transports** – Kerberos (SPNEGO/GSSAPI), plaintext basic, and TLS
//!   basic with a configurable CA trust path
//!
//! ```rust,ignore
//! use winrm::{Credential, HttpTransport, SessionOptions, WinRmConfig, WinRmSession};
//!
//! let config = WinRmConfig::new("server01");
//! let cred = Credential::new("Administrator", "password");
//! let transport = HttpTransport::tls(&config, &cred, &SessionOptions::default())?;
//! let mut session = WinRmSession::new(transport);
//!
//! let output = session.run_cmd("ipconfig", &["/all"]).await?;
//! println!("{}", output.stdout());
//! ```

pub mod auth;
pub mod error;
pub mod response;
pub mod session;
pub mod soap;
pub mod transport;
pub mod types;
pub mod wql;

pub use error::{WinRmError, WinRmResult};
pub use response::WqlRecord;
pub use session::{encode_powershell_script, OutputSink, WinRmSession};
pub use transport::{HttpTransport, WsmanTransport};
pub use types::{
    CommandOutput, Credential, KerberosConfig, OutputChunk, SessionOptions, StreamKind,
    TransportProtocol, WinRmConfig,
};
pub use wql::WqlBuilder;
