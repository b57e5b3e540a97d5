//! SOAP 1.2 envelope builders for WS-Management requests.
//!
//! Each operation has a `build_*_envelope` function that assembles the
//! WS-Addressing / WS-Management header block and the operation body into
//! a complete envelope string. Header attribute placement is significant:
//! Action, ResourceURI, MaxEnvelopeSize, the ReplyTo address, and the
//! SelectorSet all carry `mustUnderstand="true"`, and Option/Selector
//! elements carry their `Name` attribute.

use crate::types::{WsManAction, WsManNamespace, WsManResourceUri};

/// Dialect URI for WQL enumeration filters.
pub const WQL_DIALECT: &str = "http://schemas.microsoft.com/wbem/wsman/1/WQL";

/// The anonymous WS-Addressing reply-to role.
const ANONYMOUS_ADDRESS: &str =
    "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";

/// Upper bound requested from WQL enumerations in one round.
pub const ENUMERATION_MAX_ELEMENTS: u32 = 32000;

// ─── Primitives ──────────────────────────────────────────────────────────────

/// Serialize a second count as an ISO-8601 duration (`PT60S`).
pub fn iso8601_duration(seconds: u32) -> String {
    format!("PT{}S", seconds)
}

/// A fresh `uuid:`-prefixed uppercase message id.
pub fn new_message_id() -> String {
    format!("uuid:{}", uuid::Uuid::new_v4().to_string().to_uppercase())
}

/// Escape element text content.
pub fn xml_escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Escape attribute values (additionally quotes).
pub fn xml_escape_attr(s: &str) -> String {
    xml_escape_text(s).replace('"', "&quot;").replace('\'', "&apos;")
}

// ─── Header Assembly ─────────────────────────────────────────────────────────

/// Build the WS-Addressing + WS-Management header block shared by every
/// operation. `selectors` and `options` become a `w:SelectorSet` and a
/// `w:OptionSet` respectively when non-empty.
#[allow(clippy::too_many_arguments)]
fn build_soap_header(
    action: &str,
    endpoint: &str,
    message_id: &str,
    resource_uri: &str,
    selectors: &[(&str, &str)],
    options: &[(&str, &str)],
    timeout: &str,
    max_envelope_size: usize,
    locale: &str,
) -> String {
    let mut header = format!(
        r#"<env:Header>
    <a:To>{endpoint}</a:To>
    <a:ReplyTo>
      <a:Address mustUnderstand="true">{anonymous}</a:Address>
    </a:ReplyTo>
    <w:MaxEnvelopeSize mustUnderstand="true">{max_envelope}</w:MaxEnvelopeSize>
    <a:MessageID>{message_id}</a:MessageID>
    <w:Locale xml:lang="{locale}" mustUnderstand="false"/>
    <p:DataLocale xml:lang="{locale}" mustUnderstand="false"/>
    <w:OperationTimeout>{timeout}</w:OperationTimeout>
    <w:ResourceURI mustUnderstand="true">{resource}</w:ResourceURI>
    <a:Action mustUnderstand="true">{action}</a:Action>"#,
        endpoint = xml_escape_text(endpoint),
        anonymous = ANONYMOUS_ADDRESS,
        max_envelope = max_envelope_size,
        message_id = message_id,
        locale = xml_escape_attr(locale),
        timeout = timeout,
        resource = resource_uri,
        action = action,
    );

    if !selectors.is_empty() {
        header.push_str("\n    <w:SelectorSet mustUnderstand=\"true\">");
        for (name, value) in selectors {
            header.push_str(&format!(
                "\n      <w:Selector Name=\"{}\">{}</w:Selector>",
                xml_escape_attr(name),
                xml_escape_text(value)
            ));
        }
        header.push_str("\n    </w:SelectorSet>");
    }

    if !options.is_empty() {
        header.push_str("\n    <w:OptionSet>");
        for (name, value) in options {
            header.push_str(&format!(
                "\n      <w:Option Name=\"{}\">{}</w:Option>",
                xml_escape_attr(name),
                xml_escape_text(value)
            ));
        }
        header.push_str("\n    </w:OptionSet>");
    }

    header.push_str("\n  </env:Header>");
    header
}

/// Wrap a header and body into a complete SOAP 1.2 envelope with the
/// fixed WS-Management prefix bindings.
fn wrap_envelope(header: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<env:Envelope xmlns:env="{soap}" xmlns:a="{addressing}" xmlns:b="{cimbinding}" xmlns:n="{enumeration}" xmlns:x="{transfer}" xmlns:w="{wsman}" xmlns:p="{mswsman}" xmlns:rsp="{shell}">
  {header}
  <env:Body>{body}</env:Body>
</env:Envelope>"#,
        soap = WsManNamespace::SOAP,
        addressing = WsManNamespace::ADDRESSING,
        cimbinding = WsManNamespace::CIMBINDING,
        enumeration = WsManNamespace::ENUMERATION,
        transfer = WsManNamespace::TRANSFER,
        wsman = WsManNamespace::WSMAN,
        mswsman = WsManNamespace::MSWSMAN,
        shell = WsManNamespace::SHELL,
        header = header,
        body = body,
    )
}

// ─── Operation Envelopes ─────────────────────────────────────────────────────

/// Create a shell on the cmd resource. The server replies with the
/// ShellId selector used by every subsequent operation.
#[allow(clippy::too_many_arguments)]
pub fn build_create_shell_envelope(
    endpoint: &str,
    message_id: &str,
    input_streams: &str,
    output_streams: &str,
    timeout: &str,
    max_envelope_size: usize,
    locale: &str,
) -> String {
    let header = build_soap_header(
        WsManAction::Create.uri(),
        endpoint,
        message_id,
        WsManResourceUri::SHELL,
        &[],
        &[("WINRS_NOPROFILE", "FALSE"), ("WINRS_CODEPAGE", "437")],
        timeout,
        max_envelope_size,
        locale,
    );

    let body = format!(
        r#"
    <rsp:Shell>
      <rsp:InputStreams>{}</rsp:InputStreams>
      <rsp:OutputStreams>{}</rsp:OutputStreams>
    </rsp:Shell>
  "#,
        xml_escape_text(input_streams),
        xml_escape_text(output_streams),
    );

    wrap_envelope(&header, &body)
}

/// Delete (close) a shell. The Body is empty for Delete.
pub fn build_delete_shell_envelope(
    endpoint: &str,
    message_id: &str,
    shell_id: &str,
    timeout: &str,
    max_envelope_size: usize,
    locale: &str,
) -> String {
    let header = build_soap_header(
        WsManAction::Delete.uri(),
        endpoint,
        message_id,
        WsManResourceUri::SHELL,
        &[("ShellId", shell_id)],
        &[],
        timeout,
        max_envelope_size,
        locale,
    );

    wrap_envelope(&header, "")
}

/// Start a command within a shell. The command is emitted double-quoted
/// verbatim; each argument becomes its own `rsp:Arguments` element.
#[allow(clippy::too_many_arguments)]
pub fn build_command_envelope(
    endpoint: &str,
    message_id: &str,
    shell_id: &str,
    command: &str,
    arguments: &[&str],
    timeout: &str,
    max_envelope_size: usize,
    locale: &str,
) -> String {
    let header = build_soap_header(
        WsManAction::Command.uri(),
        endpoint,
        message_id,
        WsManResourceUri::SHELL,
        &[("ShellId", shell_id)],
        &[
            ("WINRS_CONSOLEMODE_STDIN", "TRUE"),
            ("WINRS_SKIP_CMD_SHELL", "FALSE"),
        ],
        timeout,
        max_envelope_size,
        locale,
    );

    let args_xml: String = arguments
        .iter()
        .map(|a| format!("\n      <rsp:Arguments>{}</rsp:Arguments>", xml_escape_text(a)))
        .collect();

    let body = format!(
        r#"
    <rsp:CommandLine>
      <rsp:Command>"{}"</rsp:Command>{}
    </rsp:CommandLine>
  "#,
        xml_escape_text(command),
        args_xml,
    );

    wrap_envelope(&header, &body)
}

/// Drain the next batch of output from a running command.
#[allow(clippy::too_many_arguments)]
pub fn build_receive_envelope(
    endpoint: &str,
    message_id: &str,
    shell_id: &str,
    command_id: &str,
    desired_streams: &str,
    timeout: &str,
    max_envelope_size: usize,
    locale: &str,
) -> String {
    let header = build_soap_header(
        WsManAction::Receive.uri(),
        endpoint,
        message_id,
        WsManResourceUri::SHELL,
        &[("ShellId", shell_id)],
        &[],
        timeout,
        max_envelope_size,
        locale,
    );

    let body = format!(
        r#"
    <rsp:Receive>
      <rsp:DesiredStream CommandId="{}">{}</rsp:DesiredStream>
    </rsp:Receive>
  "#,
        xml_escape_attr(command_id),
        xml_escape_text(desired_streams),
    );

    wrap_envelope(&header, &body)
}

/// Write base64-encoded stdin data to a running command.
#[allow(clippy::too_many_arguments)]
pub fn build_send_envelope(
    endpoint: &str,
    message_id: &str,
    shell_id: &str,
    command_id: &str,
    encoded_data: &str,
    end_of_stream: bool,
    timeout: &str,
    max_envelope_size: usize,
    locale: &str,
) -> String {
    let header = build_soap_header(
        WsManAction::Send.uri(),
        endpoint,
        message_id,
        WsManResourceUri::SHELL,
        &[("ShellId", shell_id)],
        &[],
        timeout,
        max_envelope_size,
        locale,
    );

    let end_attr = if end_of_stream { r#" End="true""# } else { "" };
    let body = format!(
        r#"
    <rsp:Send>
      <rsp:Stream Name="stdin" CommandId="{}"{}>{}</rsp:Stream>
    </rsp:Send>
  "#,
        xml_escape_attr(command_id),
        end_attr,
        encoded_data,
    );

    wrap_envelope(&header, &body)
}

/// Signal a command; the input element carries the CommandId attribute and
/// the signal code URI as its `rsp:Code` child.
#[allow(clippy::too_many_arguments)]
pub fn build_signal_envelope(
    endpoint: &str,
    message_id: &str,
    shell_id: &str,
    command_id: &str,
    signal_code: &str,
    timeout: &str,
    max_envelope_size: usize,
    locale: &str,
) -> String {
    let header = build_soap_header(
        WsManAction::Signal.uri(),
        endpoint,
        message_id,
        WsManResourceUri::SHELL,
        &[("ShellId", shell_id)],
        &[],
        timeout,
        max_envelope_size,
        locale,
    );

    let body = format!(
        r#"
    <rsp:Signal CommandId="{}">
      <rsp:Code>{}</rsp:Code>
    </rsp:Signal>
  "#,
        xml_escape_attr(command_id),
        signal_code,
    );

    wrap_envelope(&header, &body)
}

/// Start a WS-Enumeration against a WMI resource with a WQL filter.
#[allow(clippy::too_many_arguments)]
pub fn build_enumerate_envelope(
    endpoint: &str,
    message_id: &str,
    resource_uri: &str,
    wql: &str,
    timeout: &str,
    max_envelope_size: usize,
    locale: &str,
) -> String {
    let header = build_soap_header(
        WsManAction::Enumerate.uri(),
        endpoint,
        message_id,
        resource_uri,
        &[],
        &[],
        timeout,
        max_envelope_size,
        locale,
    );

    let body = format!(
        r#"
    <n:Enumerate>
      <w:OptimizeEnumeration/>
      <w:MaxElements>{}</w:MaxElements>
      <w:Filter Dialect="{}">{}</w:Filter>
    </n:Enumerate>
  "#,
        ENUMERATION_MAX_ELEMENTS,
        WQL_DIALECT,
        xml_escape_text(wql),
    );

    wrap_envelope(&header, &body)
}

/// Pull the next batch of an enumeration that did not finish in one round.
#[allow(clippy::too_many_arguments)]
pub fn build_pull_envelope(
    endpoint: &str,
    message_id: &str,
    resource_uri: &str,
    enumeration_context: &str,
    timeout: &str,
    max_envelope_size: usize,
    locale: &str,
) -> String {
    let header = build_soap_header(
        WsManAction::Pull.uri(),
        endpoint,
        message_id,
        resource_uri,
        &[],
        &[],
        timeout,
        max_envelope_size,
        locale,
    );

    let body = format!(
        r#"
    <n:Pull>
      <n:EnumerationContext>{}</n:EnumerationContext>
      <w:MaxElements>{}</w:MaxElements>
    </n:Pull>
  "#,
        xml_escape_text(enumeration_context),
        ENUMERATION_MAX_ELEMENTS,
    );

    wrap_envelope(&header, &body)
}

/// The wsmanidentity Identify probe. Identify takes no addressing headers
/// beyond To/Action/MessageID/ReplyTo.
pub fn build_identify_envelope(endpoint: &str, message_id: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<env:Envelope xmlns:env="{soap}" xmlns:a="{addressing}" xmlns:w="{wsman}">
  <env:Header>
    <a:To>{endpoint}</a:To>
    <a:ReplyTo>
      <a:Address mustUnderstand="true">{anonymous}</a:Address>
    </a:ReplyTo>
    <a:MessageID>{message_id}</a:MessageID>
    <a:Action mustUnderstand="true">{action}</a:Action>
  </env:Header>
  <env:Body/>
</env:Envelope>"#,
        soap = WsManNamespace::SOAP,
        addressing = WsManNamespace::ADDRESSING,
        wsman = WsManNamespace::WSMAN,
        endpoint = xml_escape_text(endpoint),
        anonymous = ANONYMOUS_ADDRESS,
        message_id = message_id,
        action = WsManAction::Identify.uri(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_envelope() -> String {
        build_create_shell_envelope(
            "http://host:5985/wsman",
            "uuid:11111111-1111-1111-1111-111111111111",
            "stdin",
            "stdout stderr",
            "PT60S",
            153600,
            "en-US",
        )
    }

    #[test]
    fn duration_literal() {
        assert_eq!(iso8601_duration(60), "PT60S");
        assert_eq!(iso8601_duration(1), "PT1S");
        assert_eq!(iso8601_duration(3600), "PT3600S");
    }

    #[test]
    fn message_id_is_uppercase_uuid() {
        let id = new_message_id();
        assert!(id.starts_with("uuid:"));
        let raw = &id["uuid:".len()..];
        assert_eq!(raw.len(), 36);
        assert!(raw
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c) || c == '-'));
    }

    #[test]
    fn message_ids_are_fresh() {
        let ids: Vec<String> = (0..16).map(|_| new_message_id()).collect();
        for (i, a) in ids.iter().enumerate() {
            for b in ids.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn header_carries_must_understand_flags() {
        let env = create_envelope();
        assert!(env.contains(r#"<a:Action mustUnderstand="true">"#));
        assert!(env.contains(r#"<w:ResourceURI mustUnderstand="true">"#));
        assert!(env.contains(r#"<w:MaxEnvelopeSize mustUnderstand="true">153600"#));
        assert!(env.contains(r#"<a:Address mustUnderstand="true">"#));
    }

    #[test]
    fn header_locale_elements_are_empty_with_lang() {
        let env = create_envelope();
        assert!(env.contains(r#"<w:Locale xml:lang="en-US" mustUnderstand="false"/>"#));
        assert!(env.contains(r#"<p:DataLocale xml:lang="en-US" mustUnderstand="false"/>"#));
    }

    #[test]
    fn create_shell_options() {
        let env = create_envelope();
        assert!(env.contains(r#"<w:Option Name="WINRS_NOPROFILE">FALSE</w:Option>"#));
        assert!(env.contains(r#"<w:Option Name="WINRS_CODEPAGE">437</w:Option>"#));
        assert!(env.contains("<rsp:InputStreams>stdin</rsp:InputStreams>"));
        assert!(env.contains("<rsp:OutputStreams>stdout stderr</rsp:OutputStreams>"));
    }

    #[test]
    fn command_is_double_quoted_with_arguments() {
        let env = build_command_envelope(
            "http://host:5985/wsman",
            "uuid:22222222-2222-2222-2222-222222222222",
            "ABC-123",
            "ipconfig",
            &["/all"],
            "PT60S",
            153600,
            "en-US",
        );
        assert!(env.contains(r#"<rsp:Command>"ipconfig"</rsp:Command>"#));
        assert!(env.contains("<rsp:Arguments>/all</rsp:Arguments>"));
        assert!(env.contains(r#"<w:Selector Name="ShellId">ABC-123</w:Selector>"#));
        assert!(env.contains(r#"<w:Option Name="WINRS_CONSOLEMODE_STDIN">TRUE</w:Option>"#));
        assert!(env.contains(r#"<w:Option Name="WINRS_SKIP_CMD_SHELL">FALSE</w:Option>"#));
    }

    #[test]
    fn receive_targets_command() {
        let env = build_receive_envelope(
            "http://host:5985/wsman",
            "uuid:33333333-3333-3333-3333-333333333333",
            "ABC-123",
            "CMD-1",
            "stdout stderr",
            "PT60S",
            153600,
            "en-US",
        );
        assert!(env.contains(r#"<rsp:DesiredStream CommandId="CMD-1">stdout stderr</rsp:DesiredStream>"#));
    }

    #[test]
    fn signal_carries_command_id_attribute() {
        let env = build_signal_envelope(
            "http://host:5985/wsman",
            "uuid:44444444-4444-4444-4444-444444444444",
            "ABC-123",
            "CMD-1",
            crate::types::WsManSignal::TERMINATE,
            "PT60S",
            153600,
            "en-US",
        );
        assert!(env.contains(r#"<rsp:Signal CommandId="CMD-1">"#));
        assert!(env.contains("signal/terminate</rsp:Code>"));
    }

    #[test]
    fn delete_body_is_empty() {
        let env = build_delete_shell_envelope(
            "http://host:5985/wsman",
            "uuid:55555555-5555-5555-5555-555555555555",
            "ABC-123",
            "PT60S",
            153600,
            "en-US",
        );
        assert!(env.contains("<env:Body></env:Body>"));
        assert!(env.contains("transfer/Delete"));
    }

    #[test]
    fn enumerate_carries_wql_filter() {
        let env = build_enumerate_envelope(
            "http://host:5985/wsman",
            "uuid:66666666-6666-6666-6666-666666666666",
            &crate::types::wmi_resource_uri(crate::types::DEFAULT_WMI_NAMESPACE),
            "SELECT * FROM Win32_Service",
            "PT60S",
            153600,
            "en-US",
        );
        assert!(env.contains(
            r#"<w:Filter Dialect="http://schemas.microsoft.com/wbem/wsman/1/WQL">SELECT * FROM Win32_Service</w:Filter>"#
        ));
        assert!(env.contains("<w:OptimizeEnumeration/>"));
        assert!(env.contains("<w:MaxElements>32000</w:MaxElements>"));
    }

    #[test]
    fn text_escaping_preserves_quotes() {
        assert_eq!(xml_escape_text(r#"a "b" & <c>"#), r#"a "b" &amp; &lt;c&gt;"#);
        assert_eq!(xml_escape_attr(r#"a "b""#), "a &quot;b&quot;");
    }
}
