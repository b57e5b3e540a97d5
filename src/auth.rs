//! Authentication providers for the WinRM HTTP transport.
//!
//! Providers produce `Authorization` header values and drive the 401
//! challenge-response rounds the transport runs. Basic is single-round;
//! NTLM/Negotiate is the three-message handshake; Kerberos wraps an
//! externally supplied GSSAPI context.

use crate::error::{WinRmError, WinRmResult};
use crate::types::Credential;
use base64::Engine;
use hmac::{Hmac, Mac};
use log::debug;
use md4::{Digest, Md4};
use md5::Md5;

// ─── Auth Provider Trait ─────────────────────────────────────────────────────

/// A mechanism that can authenticate WinRM HTTP requests.
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    /// Name of this auth mechanism.
    fn name(&self) -> &str;

    /// Header value for the first request, if the mechanism sends one
    /// before seeing a challenge.
    fn initial_auth_header(&mut self) -> WinRmResult<Option<String>>;

    /// Process a 401 challenge and return the next header value.
    /// `None` means the mechanism has no further rounds to offer.
    async fn process_challenge(&mut self, challenge: &str) -> WinRmResult<Option<String>>;

    /// Whether this mechanism transmits reusable credentials and should
    /// only run over HTTPS.
    fn requires_https(&self) -> bool {
        false
    }
}

// ─── Basic Authentication ────────────────────────────────────────────────────

/// HTTP Basic authentication (base64 `DOMAIN\user:password`).
pub struct BasicAuth {
    username: String,
    password: String,
}

impl BasicAuth {
    pub fn new(credential: &Credential) -> Self {
        Self {
            username: credential.qualified_username(),
            password: credential.password.clone().unwrap_or_default(),
        }
    }
}

#[async_trait::async_trait]
impl AuthProvider for BasicAuth {
    fn name(&self) -> &str {
        "Basic"
    }

    fn initial_auth_header(&mut self) -> WinRmResult<Option<String>> {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.username, self.password));
        Ok(Some(format!("Basic {}", encoded)))
    }

    async fn process_challenge(&mut self, _challenge: &str) -> WinRmResult<Option<String>> {
        Ok(None)
    }

    fn requires_https(&self) -> bool {
        true
    }
}

// ─── NTLM Authentication ─────────────────────────────────────────────────────

/// NTLM challenge-response authentication.
///
/// Three-message handshake: the client opens with a Negotiate (Type 1)
/// message, the server answers 401 with a Challenge (Type 2), and the
/// client completes with an Authenticate (Type 3) message carrying the
/// NTLMv2 response.
pub struct NtlmAuth {
    username: String,
    password: String,
    domain: String,
    workstation: String,
    state: NtlmState,
}

#[derive(Debug, PartialEq)]
enum NtlmState {
    Initial,
    NegotiateSent,
    Authenticated,
}

const NTLM_SIGNATURE: &[u8] = b"NTLMSSP\0";

const NTLM_NEGOTIATE_FLAGS: u32 = 0x0000_0001 // UNICODE
    | 0x0000_0002 // OEM
    | 0x0000_0004 // REQUEST_TARGET
    | 0x0000_0200 // NTLM
    | 0x0000_8000 // ALWAYS_SIGN
    | 0x0008_0000 // EXTENDED_SESSIONSECURITY
    | 0x2000_0000 // 128-bit
    | 0x8000_0000; // 56-bit

impl NtlmAuth {
    pub fn new(credential: &Credential) -> Self {
        let workstation = std::env::var("COMPUTERNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "WORKSTATION".to_string())
            .to_uppercase();

        Self {
            username: credential.username.clone(),
            password: credential.password.clone().unwrap_or_default(),
            domain: credential.domain.clone().unwrap_or_else(|| ".".to_string()),
            workstation,
            state: NtlmState::Initial,
        }
    }

    fn negotiate_header(&self) -> String {
        let token = build_negotiate_message();
        format!(
            "Negotiate {}",
            base64::engine::general_purpose::STANDARD.encode(token)
        )
    }
}

/// NTLM Type 1 (Negotiate) message with empty domain/workstation buffers.
fn build_negotiate_message() -> Vec<u8> {
    let mut msg = Vec::with_capacity(32);
    msg.extend_from_slice(NTLM_SIGNATURE);
    msg.extend_from_slice(&1u32.to_le_bytes());
    msg.extend_from_slice(&NTLM_NEGOTIATE_FLAGS.to_le_bytes());
    // DomainNameFields and WorkstationFields, both empty
    for _ in 0..2 {
        msg.extend_from_slice(&0u16.to_le_bytes());
        msg.extend_from_slice(&0u16.to_le_bytes());
        msg.extend_from_slice(&0u32.to_le_bytes());
    }
    msg
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}

/// A security-buffer field descriptor: len, maxlen, offset.
fn push_sec_buf(msg: &mut Vec<u8>, len: usize, offset: u32) {
    msg.extend_from_slice(&(len as u16).to_le_bytes());
    msg.extend_from_slice(&(len as u16).to_le_bytes());
    msg.extend_from_slice(&offset.to_le_bytes());
}

/// NTLMv2 response: HMAC-MD5 proof over the server challenge and a
/// timestamped client blob, keyed by HMAC-MD5(MD4(password),
/// UPPER(user)+domain).
fn ntlmv2_response(
    username: &str,
    password: &str,
    domain: &str,
    server_challenge: &[u8],
) -> WinRmResult<Vec<u8>> {
    let nt_hash = Md4::digest(utf16le(password));

    let identity = utf16le(&format!("{}{}", username.to_uppercase(), domain));
    let mut mac = Hmac::<Md5>::new_from_slice(nt_hash.as_slice())
        .map_err(|e| WinRmError::Auth(format!("HMAC init: {}", e)))?;
    mac.update(&identity);
    let ntlmv2_hash = mac.finalize().into_bytes();

    let client_challenge: [u8; 8] = rand::random();
    let mut blob = Vec::with_capacity(28);
    blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]);
    blob.extend_from_slice(&[0x00; 4]);
    blob.extend_from_slice(&filetime_now().to_le_bytes());
    blob.extend_from_slice(&client_challenge);
    blob.extend_from_slice(&[0x00; 4]);

    let mut proof_mac = Hmac::<Md5>::new_from_slice(ntlmv2_hash.as_slice())
        .map_err(|e| WinRmError::Auth(format!("HMAC init: {}", e)))?;
    proof_mac.update(server_challenge);
    proof_mac.update(&blob);
    let proof = proof_mac.finalize().into_bytes();

    let mut response = proof.as_slice().to_vec();
    response.extend_from_slice(&blob);
    Ok(response)
}

/// NTLM Type 3 (Authenticate) message.
fn build_authenticate_message(
    username: &str,
    password: &str,
    domain: &str,
    workstation: &str,
    challenge: &[u8],
) -> WinRmResult<Vec<u8>> {
    if challenge.len() < 32 {
        return Err(WinRmError::Auth(
            "NTLM challenge message is too short".to_string(),
        ));
    }
    let server_challenge = &challenge[24..32];
    let nt_response = ntlmv2_response(username, password, domain, server_challenge)?;

    let domain_bytes = utf16le(domain);
    let user_bytes = utf16le(username);
    let ws_bytes = utf16le(workstation);

    // Fixed part: signature + type + six security buffers + flags = 64 bytes
    let payload_base: u32 = 64;
    let domain_off = payload_base;
    let user_off = domain_off + domain_bytes.len() as u32;
    let ws_off = user_off + user_bytes.len() as u32;
    let nt_off = ws_off + ws_bytes.len() as u32;
    let key_off = nt_off + nt_response.len() as u32;

    let mut msg = Vec::with_capacity(key_off as usize);
    msg.extend_from_slice(NTLM_SIGNATURE);
    msg.extend_from_slice(&3u32.to_le_bytes());
    push_sec_buf(&mut msg, 0, nt_off); // LM response, empty for NTLMv2
    push_sec_buf(&mut msg, nt_response.len(), nt_off);
    push_sec_buf(&mut msg, domain_bytes.len(), domain_off);
    push_sec_buf(&mut msg, user_bytes.len(), user_off);
    push_sec_buf(&mut msg, ws_bytes.len(), ws_off);
    push_sec_buf(&mut msg, 0, key_off); // session key, not negotiated
    msg.extend_from_slice(&NTLM_NEGOTIATE_FLAGS.to_le_bytes());

    msg.extend_from_slice(&domain_bytes);
    msg.extend_from_slice(&user_bytes);
    msg.extend_from_slice(&ws_bytes);
    msg.extend_from_slice(&nt_response);
    Ok(msg)
}

/// Current time as a Windows FILETIME: 100ns intervals since 1601-01-01.
fn filetime_now() -> u64 {
    const EPOCH_DELTA_SECS: u64 = 11_644_473_600;
    let unix_secs = chrono::Utc::now().timestamp() as u64;
    (unix_secs + EPOCH_DELTA_SECS) * 10_000_000
}

#[async_trait::async_trait]
impl AuthProvider for NtlmAuth {
    fn name(&self) -> &str {
        "NTLM"
    }

    fn initial_auth_header(&mut self) -> WinRmResult<Option<String>> {
        self.state = NtlmState::NegotiateSent;
        Ok(Some(self.negotiate_header()))
    }

    async fn process_challenge(&mut self, challenge: &str) -> WinRmResult<Option<String>> {
        match self.state {
            NtlmState::Initial => {
                self.state = NtlmState::NegotiateSent;
                Ok(Some(self.negotiate_header()))
            }
            NtlmState::NegotiateSent => {
                let token = challenge
                    .strip_prefix("Negotiate ")
                    .or_else(|| challenge.strip_prefix("NTLM "))
                    .ok_or_else(|| {
                        WinRmError::Auth(format!("unexpected challenge header: {}", challenge))
                    })?;
                let challenge_bytes = base64::engine::general_purpose::STANDARD
                    .decode(token.trim())
                    .map_err(|e| WinRmError::Auth(format!("bad challenge token: {}", e)))?;

                let authenticate = build_authenticate_message(
                    &self.username,
                    &self.password,
                    &self.domain,
                    &self.workstation,
                    &challenge_bytes,
                )?;
                self.state = NtlmState::Authenticated;
                Ok(Some(format!(
                    "Negotiate {}",
                    base64::engine::general_purpose::STANDARD.encode(authenticate)
                )))
            }
            NtlmState::Authenticated => Ok(None),
        }
    }
}

// ─── Negotiate (SPNEGO) ──────────────────────────────────────────────────────

/// Negotiate authentication. Without a Kerberos context this settles on
/// the NTLM leg of SPNEGO, which every WinRM listener accepts under the
/// `Negotiate` scheme.
pub struct NegotiateAuth {
    inner: NtlmAuth,
}

impl NegotiateAuth {
    pub fn new(credential: &Credential) -> Self {
        Self {
            inner: NtlmAuth::new(credential),
        }
    }
}

#[async_trait::async_trait]
impl AuthProvider for NegotiateAuth {
    fn name(&self) -> &str {
        "Negotiate"
    }

    fn initial_auth_header(&mut self) -> WinRmResult<Option<String>> {
        self.inner.initial_auth_header()
    }

    async fn process_challenge(&mut self, challenge: &str) -> WinRmResult<Option<String>> {
        self.inner.process_challenge(challenge).await
    }
}

// ─── Kerberos (GSSAPI) ───────────────────────────────────────────────────────

/// Security-context seam for Kerberos. Credential acquisition and token
/// generation live in the caller's GSSAPI/SSPI library; this crate only
/// shuttles the tokens through the HTTP Negotiate scheme.
pub trait GssapiContext: Send + Sync {
    /// Advance the context. `input` is the server token from the last
    /// 401 challenge, absent on the first call. Returns the next token
    /// to send, or `None` when the context is established.
    fn step(&mut self, input: Option<&[u8]>) -> WinRmResult<Option<Vec<u8>>>;

    /// Whether the context has completed its handshake.
    fn is_complete(&self) -> bool;
}

/// Kerberos authentication over the HTTP `Negotiate` scheme, backed by an
/// injected [`GssapiContext`].
pub struct KerberosAuth {
    spn: String,
    context: Box<dyn GssapiContext>,
}

impl KerberosAuth {
    pub fn new(spn: impl Into<String>, context: Box<dyn GssapiContext>) -> Self {
        Self {
            spn: spn.into(),
            context,
        }
    }

    fn header_for(token: Vec<u8>) -> String {
        format!(
            "Negotiate {}",
            base64::engine::general_purpose::STANDARD.encode(token)
        )
    }
}

#[async_trait::async_trait]
impl AuthProvider for KerberosAuth {
    fn name(&self) -> &str {
        "Kerberos"
    }

    fn initial_auth_header(&mut self) -> WinRmResult<Option<String>> {
        debug!("acquiring initial Kerberos token for {}", self.spn);
        match self.context.step(None)? {
            Some(token) => Ok(Some(Self::header_for(token))),
            None => Err(WinRmError::Auth(format!(
                "GSSAPI context for {} produced no initial token",
                self.spn
            ))),
        }
    }

    async fn process_challenge(&mut self, challenge: &str) -> WinRmResult<Option<String>> {
        if self.context.is_complete() {
            return Ok(None);
        }
        let token = challenge
            .strip_prefix("Negotiate ")
            .or_else(|| challenge.strip_prefix("Kerberos "))
            .ok_or_else(|| {
                WinRmError::Auth(format!("unexpected challenge header: {}", challenge))
            })?;
        let input = base64::engine::general_purpose::STANDARD
            .decode(token.trim())
            .map_err(|e| WinRmError::Auth(format!("bad challenge token: {}", e)))?;
        Ok(self.context.step(Some(&input))?.map(Self::header_for))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_header_encodes_qualified_user() {
        let mut cred = Credential::new("jeff", "s3cret");
        cred.domain = Some("CORP".into());
        let mut auth = BasicAuth::new(&cred);
        let header = auth.initial_auth_header().unwrap().unwrap();
        let encoded = header.strip_prefix("Basic ").unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(decoded, b"CORP\\jeff:s3cret");
    }

    #[test]
    fn basic_is_single_round() {
        let cred = Credential::new("jeff", "pw");
        let mut auth = BasicAuth::new(&cred);
        let next = tokio_test_block(auth.process_challenge("Basic realm=\"WinRM\""));
        assert!(next.unwrap().is_none());
    }

    #[test]
    fn negotiate_message_layout() {
        let msg = build_negotiate_message();
        assert_eq!(&msg[..8], NTLM_SIGNATURE);
        assert_eq!(u32::from_le_bytes(msg[8..12].try_into().unwrap()), 1);
        assert_eq!(msg.len(), 32);
    }

    #[test]
    fn ntlm_initial_header_is_negotiate_token() {
        let cred = Credential::new("jeff", "pw");
        let mut auth = NtlmAuth::new(&cred);
        let header = auth.initial_auth_header().unwrap().unwrap();
        assert!(header.starts_with("Negotiate "));
        let token = base64::engine::general_purpose::STANDARD
            .decode(header.strip_prefix("Negotiate ").unwrap())
            .unwrap();
        assert_eq!(&token[..8], NTLM_SIGNATURE);
    }

    #[test]
    fn ntlm_completes_after_server_challenge() {
        let cred = Credential::new("jeff", "pw");
        let mut auth = NtlmAuth::new(&cred);
        auth.initial_auth_header().unwrap();

        // Minimal Type 2: signature, type, target fields, flags, challenge
        let mut type2 = Vec::new();
        type2.extend_from_slice(NTLM_SIGNATURE);
        type2.extend_from_slice(&2u32.to_le_bytes());
        type2.extend_from_slice(&[0u8; 8]); // target name fields
        type2.extend_from_slice(&0u32.to_le_bytes()); // flags
        type2.extend_from_slice(&[0xAA; 8]); // server challenge
        type2.extend_from_slice(&[0u8; 8]); // reserved
        let challenge = format!(
            "Negotiate {}",
            base64::engine::general_purpose::STANDARD.encode(&type2)
        );

        let header = tokio_test_block(auth.process_challenge(&challenge))
            .unwrap()
            .unwrap();
        let token = base64::engine::general_purpose::STANDARD
            .decode(header.strip_prefix("Negotiate ").unwrap())
            .unwrap();
        assert_eq!(&token[..8], NTLM_SIGNATURE);
        assert_eq!(u32::from_le_bytes(token[8..12].try_into().unwrap()), 3);

        // Handshake done, no further rounds
        let done = tokio_test_block(auth.process_challenge(&challenge)).unwrap();
        assert!(done.is_none());
    }

    #[test]
    fn authenticate_message_offsets_are_consistent() {
        let msg =
            build_authenticate_message("jeff", "pw", "CORP", "WS01", &[0u8; 40]).unwrap();
        // NT response security buffer: len at 20, offset at 24
        let nt_len = u16::from_le_bytes(msg[20..22].try_into().unwrap()) as usize;
        let nt_off = u32::from_le_bytes(msg[24..28].try_into().unwrap()) as usize;
        assert_eq!(nt_off + nt_len, msg.len());
        // Domain buffer starts right after the 64-byte fixed part
        let domain_off = u32::from_le_bytes(msg[32..36].try_into().unwrap()) as usize;
        assert_eq!(domain_off, 64);
    }

    struct FakeGssapi {
        tokens: Vec<Vec<u8>>,
        complete: bool,
    }

    impl GssapiContext for FakeGssapi {
        fn step(&mut self, _input: Option<&[u8]>) -> WinRmResult<Option<Vec<u8>>> {
            if self.tokens.is_empty() {
                self.complete = true;
                Ok(None)
            } else {
                Ok(Some(self.tokens.remove(0)))
            }
        }

        fn is_complete(&self) -> bool {
            self.complete
        }
    }

    #[test]
    fn kerberos_shuttles_gssapi_tokens() {
        let ctx = FakeGssapi {
            tokens: vec![b"tok1".to_vec(), b"tok2".to_vec()],
            complete: false,
        };
        let mut auth = KerberosAuth::new("HTTP/dc01@CORP.EXAMPLE.COM", Box::new(ctx));

        let first = auth.initial_auth_header().unwrap().unwrap();
        assert_eq!(
            first,
            format!(
                "Negotiate {}",
                base64::engine::general_purpose::STANDARD.encode(b"tok1")
            )
        );

        let challenge = format!(
            "Negotiate {}",
            base64::engine::general_purpose::STANDARD.encode(b"server-tok")
        );
        let second = tokio_test_block(auth.process_challenge(&challenge))
            .unwrap()
            .unwrap();
        assert!(second.starts_with("Negotiate "));

        let done = tokio_test_block(auth.process_challenge(&challenge)).unwrap();
        assert!(done.is_none());
    }

    #[test]
    fn filetime_is_past_windows_epoch() {
        // 2020-01-01 as FILETIME
        assert!(filetime_now() > 132_223_104_000_000_000);
    }

    fn tokio_test_block<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }
}
