//! Connection configuration, session options, output model, and the
//! WS-Management protocol constant tables.

use serde::{Deserialize, Serialize};

// ─── Transport Protocol ──────────────────────────────────────────────────────

/// Transport protocol for the WinRM listener.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    /// WinRM over HTTP (port 5985)
    Http,
    /// WinRM over HTTPS (port 5986)
    Https,
}

impl Default for TransportProtocol {
    fn default() -> Self {
        Self::Https
    }
}

impl TransportProtocol {
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Http => 5985,
            Self::Https => 5986,
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

// ─── Credentials ─────────────────────────────────────────────────────────────

/// Username/password credentials for Basic, NTLM, and Negotiate auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Domain for domain-joined authentication
    #[serde(default)]
    pub domain: Option<String>,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Some(password.into()),
            domain: None,
        }
    }

    /// The `DOMAIN\user` form expected by Windows auth schemes.
    pub fn qualified_username(&self) -> String {
        match self.domain {
            Some(ref d) => format!("{}\\{}", d, self.username),
            None => self.username.clone(),
        }
    }
}

/// Kerberos (SPNEGO/GSSAPI) transport parameters. The actual credential
/// acquisition is delegated to a [`crate::auth::GssapiContext`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KerberosConfig {
    /// Kerberos realm (e.g. `CORP.EXAMPLE.COM`)
    pub realm: String,
    /// Service class for the SPN (default: `HTTP`)
    #[serde(default = "default_service")]
    pub service: String,
    /// Optional keytab path handed to the GSSAPI layer
    #[serde(default)]
    pub keytab_path: Option<String>,
}

fn default_service() -> String {
    "HTTP".to_string()
}

impl KerberosConfig {
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            service: default_service(),
            keytab_path: None,
        }
    }

    /// Service principal name for a target host, `HTTP/host@REALM`.
    pub fn spn(&self, host: &str) -> String {
        format!("{}/{}@{}", self.service, host, self.realm)
    }
}

// ─── Connection Configuration ────────────────────────────────────────────────

/// Connection parameters identifying a WinRM listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinRmConfig {
    /// Target hostname or IP address
    pub computer_name: String,
    /// Connection port (defaults based on transport)
    #[serde(default)]
    pub port: Option<u16>,
    /// Transport protocol
    #[serde(default)]
    pub transport: TransportProtocol,
    /// Application name for the WinRM URI (default: `wsman`)
    #[serde(default = "default_app_name")]
    pub application_name: String,
    /// Custom endpoint URI (overrides the computed one)
    #[serde(default)]
    pub connection_uri: Option<String>,
    /// Skip CA check for self-signed certificates
    #[serde(default)]
    pub skip_ca_check: bool,
    /// Skip CN check for certificate hostname mismatch
    #[serde(default)]
    pub skip_cn_check: bool,
    /// PEM bundle to trust instead of the system roots (TLS transport)
    #[serde(default)]
    pub ca_trust_path: Option<String>,
}

fn default_app_name() -> String {
    "wsman".to_string()
}

impl WinRmConfig {
    pub fn new(computer_name: impl Into<String>) -> Self {
        Self {
            computer_name: computer_name.into(),
            port: None,
            transport: TransportProtocol::default(),
            application_name: default_app_name(),
            connection_uri: None,
            skip_ca_check: false,
            skip_cn_check: false,
            ca_trust_path: None,
        }
    }

    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.transport.default_port())
    }

    /// The full WinRM endpoint URI.
    pub fn endpoint_uri(&self) -> String {
        if let Some(ref uri) = self.connection_uri {
            return uri.clone();
        }
        format!(
            "{}://{}:{}/{}",
            self.transport.scheme(),
            self.computer_name,
            self.effective_port(),
            self.application_name
        )
    }
}

// ─── Session Options ─────────────────────────────────────────────────────────

/// Per-operation parameters snapshotted into each envelope's header block.
/// Mutable between operations via the session setters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    /// Server-side operation timeout in seconds (default: 60)
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_sec: u32,
    /// Maximum envelope size in octets (default: 153600)
    #[serde(default = "default_max_envelope_size")]
    pub max_envelope_size: usize,
    /// BCP-47 locale tag for Locale/DataLocale headers (default: `en-US`)
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_operation_timeout() -> u32 {
    60
}

fn default_max_envelope_size() -> usize {
    153600
}

fn default_locale() -> String {
    "en-US".to_string()
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            operation_timeout_sec: default_operation_timeout(),
            max_envelope_size: default_max_envelope_size(),
            locale: default_locale(),
        }
    }
}

// ─── Output Model ────────────────────────────────────────────────────────────

/// Which remote console stream a chunk came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// One decoded stream chunk, in remote emission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputChunk {
    pub stream: StreamKind,
    pub data: Vec<u8>,
}

impl OutputChunk {
    /// The chunk bytes as text (lossy for non-UTF-8 console output).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Aggregated output of a remote command: the ordered chunk sequence and
/// the exit code once the command reached the Done state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub chunks: Vec<OutputChunk>,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Concatenated stdout text across all chunks, in arrival order.
    pub fn stdout(&self) -> String {
        self.stream_text(StreamKind::Stdout)
    }

    /// Concatenated stderr text across all chunks, in arrival order.
    pub fn stderr(&self) -> String {
        self.stream_text(StreamKind::Stderr)
    }

    fn stream_text(&self, kind: StreamKind) -> String {
        let mut out = String::new();
        for chunk in self.chunks.iter().filter(|c| c.stream == kind) {
            out.push_str(&chunk.text());
        }
        out
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

// ─── SOAP / WS-Management Protocol Constants ─────────────────────────────────

/// WS-Management SOAP namespaces, keyed by the envelope prefixes they are
/// bound to on the wire.
pub struct WsManNamespace;

impl WsManNamespace {
    /// `env`
    pub const SOAP: &'static str = "http://www.w3.org/2003/05/soap-envelope";
    /// `a`
    pub const ADDRESSING: &'static str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
    /// `b`
    pub const CIMBINDING: &'static str = "http://schemas.dmtf.org/wbem/wsman/1/cimbinding.xsd";
    /// `n`
    pub const ENUMERATION: &'static str = "http://schemas.xmlsoap.org/ws/2004/09/enumeration";
    /// `x`
    pub const TRANSFER: &'static str = "http://schemas.xmlsoap.org/ws/2004/09/transfer";
    /// `w`
    pub const WSMAN: &'static str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
    /// `p`
    pub const MSWSMAN: &'static str = "http://schemas.microsoft.com/wbem/wsman/1/wsman.xsd";
    /// `rsp`
    pub const SHELL: &'static str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";
    pub const WSMAN_FAULT: &'static str = "http://schemas.microsoft.com/wbem/wsman/1/wsmanfault";
}

/// WS-Management SOAP action URIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsManAction {
    Create,
    Delete,
    Command,
    Receive,
    Send,
    Signal,
    Enumerate,
    Pull,
    Identify,
}

impl WsManAction {
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Create => "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create",
            Self::Delete => "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete",
            Self::Command => "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command",
            Self::Receive => "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive",
            Self::Send => "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Send",
            Self::Signal => "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal",
            Self::Enumerate => "http://schemas.xmlsoap.org/ws/2004/09/enumeration/Enumerate",
            Self::Pull => "http://schemas.xmlsoap.org/ws/2004/09/enumeration/Pull",
            Self::Identify => {
                "http://schemas.dmtf.org/wbem/wsman/identity/1/wsmanidentity/Identify"
            }
        }
    }
}

/// Signal codes for the Signal operation.
pub struct WsManSignal;

impl WsManSignal {
    pub const TERMINATE: &'static str =
        "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";
    pub const CTRL_C: &'static str =
        "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/ctrl_c";
    pub const CTRL_BREAK: &'static str =
        "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/ctrl_break";
}

/// WS-Management resource URIs.
pub struct WsManResourceUri;

impl WsManResourceUri {
    /// The cmd.exe shell resource.
    pub const SHELL: &'static str =
        "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";
    /// Base for WMI provider resources; see [`wmi_resource_uri`].
    pub const WMI_BASE: &'static str = "http://schemas.microsoft.com/wbem/wsman/1/wmi";
}

/// Default WMI namespace selector (all classes under root/cimv2).
pub const DEFAULT_WMI_NAMESPACE: &str = "root/cimv2/*";

/// Resource URI for a WMI namespace, accepting either `/` or `\` separators.
pub fn wmi_resource_uri(namespace: &str) -> String {
    format!(
        "{}/{}",
        WsManResourceUri::WMI_BASE,
        namespace.replace('\\', "/")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_uri_from_parts() {
        let mut config = WinRmConfig::new("server01");
        config.transport = TransportProtocol::Http;
        assert_eq!(config.endpoint_uri(), "http://server01:5985/wsman");
        assert_eq!(config.effective_port(), 5985);
    }

    #[test]
    fn endpoint_uri_override() {
        let mut config = WinRmConfig::new("ignored");
        config.connection_uri = Some("https://gw.example.com:443/custom".into());
        assert_eq!(config.endpoint_uri(), "https://gw.example.com:443/custom");
    }

    #[test]
    fn https_default_port() {
        let config = WinRmConfig::new("server01");
        assert_eq!(config.effective_port(), 5986);
        assert!(config.endpoint_uri().starts_with("https://"));
    }

    #[test]
    fn qualified_username() {
        let mut cred = Credential::new("jeff", "pw");
        assert_eq!(cred.qualified_username(), "jeff");
        cred.domain = Some("CORP".into());
        assert_eq!(cred.qualified_username(), "CORP\\jeff");
    }

    #[test]
    fn kerberos_spn() {
        let krb = KerberosConfig::new("CORP.EXAMPLE.COM");
        assert_eq!(krb.spn("dc01"), "HTTP/dc01@CORP.EXAMPLE.COM");
    }

    #[test]
    fn session_option_defaults() {
        let opts = SessionOptions::default();
        assert_eq!(opts.operation_timeout_sec, 60);
        assert_eq!(opts.max_envelope_size, 153600);
        assert_eq!(opts.locale, "en-US");
    }

    #[test]
    fn wmi_resource_uri_normalizes_separators() {
        assert_eq!(
            wmi_resource_uri(r"root\cimv2\*"),
            "http://schemas.microsoft.com/wbem/wsman/1/wmi/root/cimv2/*"
        );
        assert_eq!(
            wmi_resource_uri(DEFAULT_WMI_NAMESPACE),
            "http://schemas.microsoft.com/wbem/wsman/1/wmi/root/cimv2/*"
        );
    }

    #[test]
    fn command_output_stream_accessors() {
        let out = CommandOutput {
            chunks: vec![
                OutputChunk {
                    stream: StreamKind::Stdout,
                    data: b"hello ".to_vec(),
                },
                OutputChunk {
                    stream: StreamKind::Stderr,
                    data: b"oops".to_vec(),
                },
                OutputChunk {
                    stream: StreamKind::Stdout,
                    data: b"world".to_vec(),
                },
            ],
            exit_code: Some(0),
        };
        assert_eq!(out.stdout(), "hello world");
        assert_eq!(out.stderr(), "oops");
        assert!(out.is_success());
    }
}
