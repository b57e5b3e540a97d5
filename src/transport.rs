//! HTTP transport for WS-Management envelopes.
//!
//! The transport owns authentication and the HTTP exchange; the protocol
//! layer hands it a serialized envelope and gets back the response body.
//! Three credential flavors map onto the constructors: Kerberos
//! (SPNEGO/GSSAPI), plaintext basic over HTTP, and basic over TLS with an
//! optional CA trust path.

use crate::auth::{AuthProvider, BasicAuth, GssapiContext, KerberosAuth, NegotiateAuth};
use crate::error::{WinRmError, WinRmResult};
use crate::response;
use crate::types::{Credential, KerberosConfig, SessionOptions, WinRmConfig};
use log::{debug, trace, warn};
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::StatusCode;

/// Extra client-side read deadline on top of the server-side
/// OperationTimeout, to catch dead sockets.
const READ_TIMEOUT_SLACK_SECS: u64 = 10;

/// Upper bound on 401 challenge rounds before giving up.
const MAX_AUTH_ROUNDS: u32 = 5;

/// Capability consumed by the protocol layer: send one envelope, receive
/// one response document body.
#[async_trait::async_trait]
pub trait WsmanTransport: Send {
    /// POST a SOAP envelope and return the response body. SOAP faults
    /// travel back as response bodies for the protocol layer to type;
    /// HTTP-level failures surface as [`WinRmError::Transport`].
    async fn send_request(&mut self, envelope: &str) -> WinRmResult<String>;

    /// The endpoint URL requests are addressed to (the `a:To` header).
    fn endpoint(&self) -> &str;
}

// ─── HTTP Transport ──────────────────────────────────────────────────────────

/// reqwest-backed transport speaking `application/soap+xml`.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    auth: Box<dyn AuthProvider>,
    auth_header: Option<String>,
    request_counter: u64,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint)
            .field("auth", &self.auth.name())
            .field("auth_header", &self.auth_header)
            .field("request_counter", &self.request_counter)
            .finish()
    }
}

impl HttpTransport {
    /// Plaintext transport: basic auth over HTTP (port 5985 by default).
    pub fn plaintext(
        config: &WinRmConfig,
        credential: &Credential,
        options: &SessionOptions,
    ) -> WinRmResult<Self> {
        Self::with_auth(config, options, Box::new(BasicAuth::new(credential)))
    }

    /// TLS transport: basic auth over HTTPS, optionally pinned to the CA
    /// bundle at `config.ca_trust_path`.
    pub fn tls(
        config: &WinRmConfig,
        credential: &Credential,
        options: &SessionOptions,
    ) -> WinRmResult<Self> {
        Self::with_auth(config, options, Box::new(BasicAuth::new(credential)))
    }

    /// Negotiate transport: SPNEGO over the `Negotiate` HTTP scheme,
    /// settling on NTLM when no Kerberos context is available.
    pub fn negotiate(
        config: &WinRmConfig,
        credential: &Credential,
        options: &SessionOptions,
    ) -> WinRmResult<Self> {
        Self::with_auth(config, options, Box::new(NegotiateAuth::new(credential)))
    }

    /// Kerberos transport: GSSAPI tokens from the injected context are
    /// shuttled through the `Negotiate` scheme for the SPN
    /// `<service>/<computer_name>@<realm>`.
    pub fn kerberos(
        config: &WinRmConfig,
        kerberos: &KerberosConfig,
        context: Box<dyn GssapiContext>,
        options: &SessionOptions,
    ) -> WinRmResult<Self> {
        let spn = kerberos.spn(&config.computer_name);
        Self::with_auth(config, options, Box::new(KerberosAuth::new(spn, context)))
    }

    /// Build a transport around an arbitrary auth provider.
    pub fn with_auth(
        config: &WinRmConfig,
        options: &SessionOptions,
        auth: Box<dyn AuthProvider>,
    ) -> WinRmResult<Self> {
        let endpoint = config.endpoint_uri();
        if auth.requires_https() && endpoint.starts_with("http://") {
            warn!(
                "{} auth transmits credentials over unencrypted HTTP to {}",
                auth.name(),
                endpoint
            );
        }

        let mut builder = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                options.operation_timeout_sec as u64 + READ_TIMEOUT_SLACK_SECS,
            ))
            .connect_timeout(std::time::Duration::from_secs(15));

        if config.skip_ca_check || config.skip_cn_check {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(ref path) = config.ca_trust_path {
            let pem = std::fs::read(path).map_err(|e| {
                WinRmError::InvalidArgument(format!("cannot read CA trust path {}: {}", path, e))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| WinRmError::InvalidArgument(format!("bad CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| WinRmError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            auth,
            auth_header: None,
            request_counter: 0,
        })
    }
}

#[async_trait::async_trait]
impl WsmanTransport for HttpTransport {
    async fn send_request(&mut self, envelope: &str) -> WinRmResult<String> {
        self.request_counter += 1;
        let req_id = self.request_counter;

        if self.auth_header.is_none() {
            self.auth_header = self.auth.initial_auth_header()?;
        }

        debug!(
            "WinRM request #{} to {} ({} bytes)",
            req_id,
            self.endpoint,
            envelope.len()
        );
        trace!("WinRM request #{} body:\n{}", req_id, envelope);

        let mut rounds = 0;
        loop {
            let mut request = self
                .client
                .post(&self.endpoint)
                .header(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/soap+xml;charset=UTF-8"),
                )
                .body(envelope.to_string());

            if let Some(ref header) = self.auth_header {
                let value = HeaderValue::from_str(header)
                    .map_err(|e| WinRmError::Auth(format!("invalid auth header: {}", e)))?;
                request = request.header(AUTHORIZATION, value);
            }

            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED {
                rounds += 1;
                if rounds > MAX_AUTH_ROUNDS {
                    return Err(WinRmError::Auth(format!(
                        "{} authentication gave up after {} rounds",
                        self.auth.name(),
                        rounds
                    )));
                }
                let challenge = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                trace!("WinRM request #{} challenge: {}", req_id, challenge);

                match self.auth.process_challenge(&challenge).await? {
                    Some(header) => {
                        self.auth_header = Some(header);
                        continue;
                    }
                    None => {
                        return Err(WinRmError::Auth(format!(
                            "server rejected {} credentials",
                            self.auth.name()
                        )))
                    }
                }
            }

            let body = response.text().await?;
            trace!(
                "WinRM response #{}: status={}, {} bytes",
                req_id,
                status,
                body.len()
            );

            if status.is_success() {
                return Ok(body);
            }
            // WinRM delivers SOAP faults on HTTP 500; a body the fault
            // parser recognizes goes back to the protocol layer for
            // typing, anything else is a transport failure.
            if matches!(
                response::check_fault(&body),
                Err(WinRmError::SoapFault { .. })
            ) {
                return Ok(body);
            }
            return Err(WinRmError::Transport(format!(
                "HTTP {} from {}",
                status.as_u16(),
                self.endpoint
            )));
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransportProtocol;

    #[test]
    fn plaintext_transport_targets_http_endpoint() {
        let mut config = WinRmConfig::new("server01");
        config.transport = TransportProtocol::Http;
        let transport = HttpTransport::plaintext(
            &config,
            &Credential::new("jeff", "pw"),
            &SessionOptions::default(),
        )
        .unwrap();
        assert_eq!(transport.endpoint(), "http://server01:5985/wsman");
    }

    #[test]
    fn tls_transport_targets_https_endpoint() {
        let config = WinRmConfig::new("server01");
        let transport = HttpTransport::tls(
            &config,
            &Credential::new("jeff", "pw"),
            &SessionOptions::default(),
        )
        .unwrap();
        assert_eq!(transport.endpoint(), "https://server01:5986/wsman");
    }

    #[test]
    fn missing_ca_trust_path_is_rejected_before_send() {
        let mut config = WinRmConfig::new("server01");
        config.ca_trust_path = Some("/nonexistent/ca.pem".into());
        let err = HttpTransport::tls(
            &config,
            &Credential::new("jeff", "pw"),
            &SessionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, WinRmError::InvalidArgument(_)));
    }
}
