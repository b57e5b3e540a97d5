//! Session facade over a WS-Management transport.
//!
//! Operations are stateless and keyed by caller-supplied ShellId and
//! CommandId values. Resource discipline: every Create is paired with a
//! Delete, and every Command with a Signal(terminate) before its parent's
//! Delete. The composite flows guarantee that pairing on every path; the
//! low-level operations leave it to the caller.
//!
//! A session is a single protocol conversation: WinRM's Receive semantics
//! assume one consumer per CommandId, so a session must not be shared for
//! concurrent operations against the same shell. Independent sessions can
//! run in parallel, each owning its transport.

use crate::error::{WinRmError, WinRmResult};
use crate::response::{self, WqlRecord};
use crate::soap;
use crate::transport::WsmanTransport;
use crate::types::{
    wmi_resource_uri, CommandOutput, OutputChunk, SessionOptions, WsManSignal,
    DEFAULT_WMI_NAMESPACE,
};
use base64::Engine;
use log::{debug, warn};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Streaming sink invoked once per non-empty chunk, in arrival order.
pub type OutputSink<'a> = &'a mut dyn FnMut(&OutputChunk);

/// WinRM session: builds operation envelopes, sends them through the
/// transport, and types the results.
pub struct WinRmSession<T: WsmanTransport> {
    transport: T,
    options: SessionOptions,
}

impl<T: WsmanTransport> WinRmSession<T> {
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, SessionOptions::default())
    }

    pub fn with_options(transport: T, options: SessionOptions) -> Self {
        Self { transport, options }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    // ─── Option Setters ──────────────────────────────────────────────────

    /// Server-side operation timeout, serialized as `PT<sec>S` in every
    /// subsequent envelope.
    pub fn set_operation_timeout(&mut self, seconds: u32) -> WinRmResult<()> {
        if seconds == 0 {
            return Err(WinRmError::InvalidArgument(
                "operation timeout must be at least one second".to_string(),
            ));
        }
        self.options.operation_timeout_sec = seconds;
        Ok(())
    }

    pub fn set_max_envelope_size(&mut self, octets: usize) -> WinRmResult<()> {
        if octets == 0 {
            return Err(WinRmError::InvalidArgument(
                "max envelope size must be non-zero".to_string(),
            ));
        }
        self.options.max_envelope_size = octets;
        Ok(())
    }

    pub fn set_locale(&mut self, locale: &str) -> WinRmResult<()> {
        if locale.trim().is_empty() {
            return Err(WinRmError::InvalidArgument(
                "locale must be a BCP-47 tag".to_string(),
            ));
        }
        self.options.locale = locale.to_string();
        Ok(())
    }

    fn timeout_literal(&self) -> String {
        soap::iso8601_duration(self.options.operation_timeout_sec)
    }

    /// Send one envelope and type any SOAP fault in the reply.
    async fn send(&mut self, envelope: String) -> WinRmResult<String> {
        let body = self.transport.send_request(&envelope).await?;
        response::check_fault(&body)?;
        Ok(body)
    }

    // ─── Shell Lifecycle ─────────────────────────────────────────────────

    /// Create a cmd shell with the default stdin/stdout+stderr streams.
    pub async fn open_shell(&mut self) -> WinRmResult<String> {
        self.open_shell_with_streams("stdin", "stdout stderr").await
    }

    pub async fn open_shell_with_streams(
        &mut self,
        input_streams: &str,
        output_streams: &str,
    ) -> WinRmResult<String> {
        let envelope = soap::build_create_shell_envelope(
            self.transport.endpoint(),
            &soap::new_message_id(),
            input_streams,
            output_streams,
            &self.timeout_literal(),
            self.options.max_envelope_size,
            &self.options.locale,
        );
        let body = self.send(envelope).await?;
        let shell_id = response::extract_shell_id(&body)?.ok_or_else(|| {
            WinRmError::Protocol("CreateResponse did not contain a ShellId".to_string())
        })?;
        debug!("opened shell {}", shell_id);
        Ok(shell_id)
    }

    /// Delete a shell. Open shells without a matching Delete leak state on
    /// the remote host.
    pub async fn close_shell(&mut self, shell_id: &str) -> WinRmResult<()> {
        let envelope = soap::build_delete_shell_envelope(
            self.transport.endpoint(),
            &soap::new_message_id(),
            shell_id,
            &self.timeout_literal(),
            self.options.max_envelope_size,
            &self.options.locale,
        );
        self.send(envelope).await?;
        debug!("closed shell {}", shell_id);
        Ok(())
    }

    // ─── Command Execution ───────────────────────────────────────────────

    /// Start a command in a shell and return its CommandId.
    pub async fn run_command(
        &mut self,
        shell_id: &str,
        command: &str,
        arguments: &[&str],
    ) -> WinRmResult<String> {
        if command.trim().is_empty() {
            return Err(WinRmError::InvalidArgument("command is empty".to_string()));
        }
        let envelope = soap::build_command_envelope(
            self.transport.endpoint(),
            &soap::new_message_id(),
            shell_id,
            command,
            arguments,
            &self.timeout_literal(),
            self.options.max_envelope_size,
            &self.options.locale,
        );
        let body = self.send(envelope).await?;
        let command_id = response::extract_command_id(&body)?.ok_or_else(|| {
            WinRmError::Protocol("CommandResponse did not contain a CommandId".to_string())
        })?;
        debug!("started command {} in shell {}", command_id, shell_id);
        Ok(command_id)
    }

    /// Drain a command to completion, aggregating chunks and exit code.
    pub async fn get_command_output(
        &mut self,
        shell_id: &str,
        command_id: &str,
    ) -> WinRmResult<CommandOutput> {
        self.pump(shell_id, command_id, None, None).await
    }

    /// Like [`get_command_output`](Self::get_command_output), invoking the
    /// sink once per chunk as it arrives.
    pub async fn get_command_output_with_sink(
        &mut self,
        shell_id: &str,
        command_id: &str,
        sink: OutputSink<'_>,
    ) -> WinRmResult<CommandOutput> {
        self.pump(shell_id, command_id, Some(sink), None).await
    }

    /// Drain with a client-side deadline; an expired deadline stops the
    /// Receive loop with [`WinRmError::Cancelled`].
    pub async fn get_command_output_with_deadline(
        &mut self,
        shell_id: &str,
        command_id: &str,
        sink: Option<OutputSink<'_>>,
        timeout: Duration,
    ) -> WinRmResult<CommandOutput> {
        let deadline = Instant::now() + timeout;
        self.pump(shell_id, command_id, sink, Some(deadline)).await
    }

    /// The Receive loop. A response without new streams and without the
    /// Done state is a legal mid-command answer; the server blocks on its
    /// own OperationTimeout, so looping immediately does not busy-spin.
    async fn pump(
        &mut self,
        shell_id: &str,
        command_id: &str,
        mut sink: Option<&mut dyn FnMut(&OutputChunk)>,
        deadline: Option<Instant>,
    ) -> WinRmResult<CommandOutput> {
        let mut output = CommandOutput::default();
        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(WinRmError::Cancelled(format!(
                        "receive deadline expired for command {}",
                        command_id
                    )));
                }
            }

            let envelope = soap::build_receive_envelope(
                self.transport.endpoint(),
                &soap::new_message_id(),
                shell_id,
                command_id,
                "stdout stderr",
                &self.timeout_literal(),
                self.options.max_envelope_size,
                &self.options.locale,
            );
            let body = self.send(envelope).await?;
            let round = response::parse_receive_response(&body)?;

            for chunk in round.chunks {
                if let Some(sink) = sink.as_mut() {
                    sink(&chunk);
                }
                output.chunks.push(chunk);
            }

            if round.done {
                output.exit_code = Some(round.exit_code.ok_or_else(|| {
                    WinRmError::Protocol(format!(
                        "command {} reached Done without an ExitCode",
                        command_id
                    ))
                })?);
                return Ok(output);
            }
        }
    }

    /// Write stdin data to a running command.
    pub async fn send_input(
        &mut self,
        shell_id: &str,
        command_id: &str,
        data: &[u8],
        end_of_stream: bool,
    ) -> WinRmResult<()> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
        let envelope = soap::build_send_envelope(
            self.transport.endpoint(),
            &soap::new_message_id(),
            shell_id,
            command_id,
            &encoded,
            end_of_stream,
            &self.timeout_literal(),
            self.options.max_envelope_size,
            &self.options.locale,
        );
        self.send(envelope).await?;
        Ok(())
    }

    /// Signal a command with an arbitrary signal code URI.
    pub async fn signal(
        &mut self,
        shell_id: &str,
        command_id: &str,
        signal_code: &str,
    ) -> WinRmResult<()> {
        let envelope = soap::build_signal_envelope(
            self.transport.endpoint(),
            &soap::new_message_id(),
            shell_id,
            command_id,
            signal_code,
            &self.timeout_literal(),
            self.options.max_envelope_size,
            &self.options.locale,
        );
        self.send(envelope).await?;
        Ok(())
    }

    /// Close a command's streams.
    pub async fn signal_terminate(
        &mut self,
        shell_id: &str,
        command_id: &str,
    ) -> WinRmResult<()> {
        self.signal(shell_id, command_id, WsManSignal::TERMINATE).await
    }

    // ─── Composite Flows ─────────────────────────────────────────────────

    /// Open a shell, run a command to completion, then terminate and
    /// delete. Cleanup runs on every path once the shell exists; a pump
    /// failure is surfaced in preference to any cleanup error.
    pub async fn run_cmd(
        &mut self,
        command: &str,
        arguments: &[&str],
    ) -> WinRmResult<CommandOutput> {
        self.run_cmd_inner(command, arguments, None, None).await
    }

    /// [`run_cmd`](Self::run_cmd) with a streaming sink.
    pub async fn run_cmd_with_sink(
        &mut self,
        command: &str,
        arguments: &[&str],
        sink: OutputSink<'_>,
    ) -> WinRmResult<CommandOutput> {
        self.run_cmd_inner(command, arguments, Some(sink), None).await
    }

    /// [`run_cmd`](Self::run_cmd) with a client-side deadline on the
    /// output pump. On expiry the command is still terminated and the
    /// shell deleted; the cancellation is surfaced.
    pub async fn run_cmd_with_deadline(
        &mut self,
        command: &str,
        arguments: &[&str],
        timeout: Duration,
    ) -> WinRmResult<CommandOutput> {
        let deadline = Instant::now() + timeout;
        self.run_cmd_inner(command, arguments, None, Some(deadline)).await
    }

    async fn run_cmd_inner(
        &mut self,
        command: &str,
        arguments: &[&str],
        sink: Option<&mut dyn FnMut(&OutputChunk)>,
        deadline: Option<Instant>,
    ) -> WinRmResult<CommandOutput> {
        let shell_id = self.open_shell().await?;

        let mut command_id = None;
        let result = match self.run_command(&shell_id, command, arguments).await {
            Ok(id) => {
                let pumped = self.pump(&shell_id, &id, sink, deadline).await;
                command_id = Some(id);
                pumped
            }
            Err(e) => Err(e),
        };

        let mut cleanup_error = None;
        if let Some(ref id) = command_id {
            if let Err(e) = self.signal_terminate(&shell_id, id).await {
                warn!("terminate signal for command {} failed: {}", id, e);
                cleanup_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.close_shell(&shell_id).await {
            warn!("delete of shell {} failed: {}", shell_id, e);
            cleanup_error.get_or_insert(e);
        }

        match result {
            Ok(output) => match cleanup_error {
                Some(e) => Err(e),
                None => Ok(output),
            },
            Err(e) => Err(e),
        }
    }

    /// Run a PowerShell script via `powershell -encodedCommand`.
    pub async fn run_powershell(&mut self, script: &str) -> WinRmResult<CommandOutput> {
        if script.trim().is_empty() {
            return Err(WinRmError::InvalidArgument("script is empty".to_string()));
        }
        let command = format!(
            "powershell -encodedCommand {}",
            encode_powershell_script(script)
        );
        self.run_cmd(&command, &[]).await
    }

    // ─── WQL / WMI ───────────────────────────────────────────────────────

    /// Run a WQL query against the default `root/cimv2` namespace.
    pub async fn run_wql(
        &mut self,
        wql: &str,
    ) -> WinRmResult<HashMap<String, Vec<WqlRecord>>> {
        self.run_wql_in_namespace(DEFAULT_WMI_NAMESPACE, wql).await
    }

    /// Run a WQL query against an explicit WMI namespace. Follows
    /// EnumerationContext with Pull rounds until the sequence ends.
    /// Results are grouped by class element name; single instances come
    /// back as singleton lists so the shape is uniform.
    pub async fn run_wql_in_namespace(
        &mut self,
        namespace: &str,
        wql: &str,
    ) -> WinRmResult<HashMap<String, Vec<WqlRecord>>> {
        if wql.trim().is_empty() {
            return Err(WinRmError::InvalidArgument("WQL query is empty".to_string()));
        }
        let resource_uri = wmi_resource_uri(namespace);

        let envelope = soap::build_enumerate_envelope(
            self.transport.endpoint(),
            &soap::new_message_id(),
            &resource_uri,
            wql,
            &self.timeout_literal(),
            self.options.max_envelope_size,
            &self.options.locale,
        );
        let body = self.send(envelope).await?;
        let mut page = response::parse_enumeration_response(&body)?;
        let mut items = std::mem::take(&mut page.items);

        while !page.end_of_sequence {
            let Some(context) = page.context.take() else {
                break;
            };
            let envelope = soap::build_pull_envelope(
                self.transport.endpoint(),
                &soap::new_message_id(),
                &resource_uri,
                &context,
                &self.timeout_literal(),
                self.options.max_envelope_size,
                &self.options.locale,
            );
            let body = self.send(envelope).await?;
            page = response::parse_enumeration_response(&body)?;
            for (class, records) in std::mem::take(&mut page.items) {
                items.entry(class).or_default().extend(records);
            }
        }

        Ok(items)
    }

    // ─── Diagnostics ─────────────────────────────────────────────────────

    /// Probe the listener with a wsmanidentity Identify request.
    pub async fn identify(&mut self) -> WinRmResult<Option<String>> {
        let envelope = soap::build_identify_envelope(
            self.transport.endpoint(),
            &soap::new_message_id(),
        );
        let body = self.send(envelope).await?;
        response::extract_identify(&body)
    }
}

/// Encode a script the way `powershell -encodedCommand` expects:
/// UTF-16LE bytes, base64.
pub fn encode_powershell_script(script: &str) -> String {
    let utf16: Vec<u8> = script
        .encode_utf16()
        .flat_map(|c| c.to_le_bytes())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(utf16)
}
