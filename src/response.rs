//! Response document parsing for WS-Management replies.
//!
//! All parsing is namespace-prefix agnostic: servers differ in the
//! prefixes they bind (`rsp:` vs `x:` vs default), so elements are matched
//! by local name only.

use crate::error::{WinRmError, WinRmResult};
use crate::types::{OutputChunk, StreamKind};
use base64::Engine;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

/// One property set from a WQL enumeration: the instance element's
/// attributes plus each direct child element's text, keyed by local name.
pub type WqlRecord = HashMap<String, String>;

/// Parsed content of one Receive round.
#[derive(Debug, Clone, Default)]
pub struct ReceiveResponse {
    /// Decoded non-empty stream chunks, in document order.
    pub chunks: Vec<OutputChunk>,
    /// Whether the response carried `CommandState .../Done`.
    pub done: bool,
    /// Exit code, present only alongside the Done state.
    pub exit_code: Option<i32>,
}

/// Parsed content of one EnumerateResponse or PullResponse.
#[derive(Debug, Clone, Default)]
pub struct EnumerationPage {
    /// Instances grouped by class element name. Single instances are
    /// singleton lists so the shape is uniform.
    pub items: HashMap<String, Vec<WqlRecord>>,
    /// Context token for a follow-up Pull, when the sequence continues.
    pub context: Option<String>,
    /// Whether the server marked the sequence complete.
    pub end_of_sequence: bool,
}

fn local_is(e: &BytesStart, name: &str) -> bool {
    e.local_name().as_ref() == name.as_bytes()
}

fn attr_value(e: &BytesStart, name: &str) -> WinRmResult<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| {
            WinRmError::Protocol(format!("malformed attribute in response: {}", err))
        })?;
        if attr.key.local_name().as_ref() == name.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|err| WinRmError::Protocol(format!("bad attribute value: {}", err)))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// All attributes of an element as a record, keyed by local name.
fn attribute_record(e: &BytesStart) -> WinRmResult<WqlRecord> {
    let mut record = HashMap::new();
    for attr in e.attributes() {
        let attr = attr
            .map_err(|err| WinRmError::Protocol(format!("malformed attribute: {}", err)))?;
        if attr.key.as_ref() == b"xmlns" || attr.key.as_ref().starts_with(b"xmlns:") {
            continue;
        }
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| WinRmError::Protocol(format!("bad attribute value: {}", err)))?;
        record.insert(key, value.into_owned());
    }
    Ok(record)
}

// ─── Fault Detection ─────────────────────────────────────────────────────────

/// Inspect a response for a SOAP Fault body. Returns the typed fault when
/// one is present; Ok otherwise. The fault code comes from
/// `WSManFault/@Code`, the message from the WSManFault message text with
/// the `env:Reason/env:Text` as fallback.
pub fn check_fault(xml: &str) -> WinRmResult<()> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_fault = false;
    let mut fault_code: Option<String> = None;
    let mut wsman_message: Option<String> = None;
    let mut reason_text: Option<String> = None;
    let mut capture: Option<&'static str> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if local_is(e, "Fault") {
                    in_fault = true;
                } else if in_fault && local_is(e, "WSManFault") {
                    if fault_code.is_none() {
                        fault_code = attr_value(e, "Code")?;
                    }
                    capture = Some("wsmanfault");
                } else if in_fault && local_is(e, "Message") {
                    capture = Some("wsmanfault");
                } else if in_fault && local_is(e, "Text") {
                    capture = Some("reason");
                }
            }
            Ok(Event::Empty(ref e)) => {
                if in_fault && local_is(e, "WSManFault") && fault_code.is_none() {
                    fault_code = attr_value(e, "Code")?;
                }
            }
            Ok(Event::Text(ref t)) => {
                if let Some(target) = capture {
                    let text = t.unescape()?.into_owned();
                    if text.trim().is_empty() {
                        continue;
                    }
                    let slot = match target {
                        "wsmanfault" => &mut wsman_message,
                        _ => &mut reason_text,
                    };
                    if slot.is_none() {
                        *slot = Some(text.trim().to_string());
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let local = e.local_name();
                if local.as_ref() == b"Message" || local.as_ref() == b"Text" {
                    capture = None;
                } else if local.as_ref() == b"Fault" {
                    in_fault = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }

    if fault_code.is_some() || wsman_message.is_some() || reason_text.is_some() {
        let message = wsman_message
            .or(reason_text)
            .unwrap_or_else(|| "unspecified WSMan fault".to_string());
        return Err(WinRmError::fault(fault_code.unwrap_or_default(), message));
    }
    Ok(())
}

// ─── Shell / Command Identifiers ─────────────────────────────────────────────

/// Extract the ShellId from a CreateResponse: the text of the
/// `Selector[@Name='ShellId']` element, with the `Shell/@ShellId`
/// attribute as fallback.
pub fn extract_shell_id(xml: &str) -> WinRmResult<Option<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_shell_selector = false;
    let mut attribute_fallback: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if local_is(e, "Selector") {
                    in_shell_selector = attr_value(e, "Name")?.as_deref() == Some("ShellId");
                } else if attribute_fallback.is_none() {
                    attribute_fallback = attr_value(e, "ShellId")?;
                }
            }
            Ok(Event::Empty(ref e)) => {
                if attribute_fallback.is_none() {
                    attribute_fallback = attr_value(e, "ShellId")?;
                }
            }
            Ok(Event::Text(ref t)) => {
                if in_shell_selector {
                    return Ok(Some(t.unescape()?.trim().to_string()));
                }
            }
            Ok(Event::End(_)) => in_shell_selector = false,
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }

    Ok(attribute_fallback)
}

/// Extract the CommandId from a CommandResponse.
pub fn extract_command_id(xml: &str) -> WinRmResult<Option<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_command_id = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => in_command_id = local_is(e, "CommandId"),
            Ok(Event::Text(ref t)) => {
                if in_command_id {
                    return Ok(Some(t.unescape()?.trim().to_string()));
                }
            }
            Ok(Event::End(_)) => in_command_id = false,
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }
    Ok(None)
}

// ─── Receive Responses ───────────────────────────────────────────────────────

/// Parse a ReceiveResponse into decoded chunks, the Done flag, and the
/// exit code. Streams with absent or empty text are skipped; chunk order
/// is document order.
pub fn parse_receive_response(xml: &str) -> WinRmResult<ReceiveResponse> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut result = ReceiveResponse::default();
    let mut current_stream: Option<StreamKind> = None;
    let mut in_exit_code = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if local_is(e, "Stream") {
                    current_stream = match attr_value(e, "Name")?.as_deref() {
                        Some("stdout") => Some(StreamKind::Stdout),
                        Some("stderr") => Some(StreamKind::Stderr),
                        _ => None,
                    };
                } else if local_is(e, "CommandState") {
                    if let Some(state) = attr_value(e, "State")? {
                        if state.ends_with("/Done") {
                            result.done = true;
                        }
                    }
                } else if local_is(e, "ExitCode") {
                    in_exit_code = true;
                }
            }
            Ok(Event::Empty(ref e)) => {
                if local_is(e, "CommandState") {
                    if let Some(state) = attr_value(e, "State")? {
                        if state.ends_with("/Done") {
                            result.done = true;
                        }
                    }
                }
            }
            Ok(Event::Text(ref t)) => {
                if let Some(stream) = current_stream {
                    let encoded = t.unescape()?;
                    let encoded = encoded.trim();
                    if !encoded.is_empty() {
                        let data = base64::engine::general_purpose::STANDARD.decode(encoded)?;
                        if !data.is_empty() {
                            result.chunks.push(OutputChunk { stream, data });
                        }
                    }
                } else if in_exit_code {
                    let text = t.unescape()?;
                    result.exit_code = Some(text.trim().parse::<i32>().map_err(|_| {
                        WinRmError::Protocol(format!("non-integer ExitCode: {}", text))
                    })?);
                }
            }
            Ok(Event::End(ref e)) => {
                let local = e.local_name();
                if local.as_ref() == b"Stream" {
                    current_stream = None;
                } else if local.as_ref() == b"ExitCode" {
                    in_exit_code = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }

    Ok(result)
}

// ─── Enumeration Responses ───────────────────────────────────────────────────

/// Parse an EnumerateResponse or PullResponse. Each child of the Items
/// element becomes an instance record keyed by its class element name;
/// record fields are the instance's attributes plus each direct child
/// element's text.
pub fn parse_enumeration_response(xml: &str) -> WinRmResult<EnumerationPage> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page = EnumerationPage::default();
    let mut depth: usize = 0;
    let mut items_depth: Option<usize> = None;
    let mut class_depth: Option<usize> = None;
    let mut class_name = String::new();
    let mut record: WqlRecord = HashMap::new();
    let mut prop_name: Option<String> = None;
    let mut prop_text = String::new();
    let mut in_context = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                depth += 1;
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if local == "Items" {
                    items_depth = Some(depth);
                } else if local == "EnumerationContext" {
                    in_context = true;
                } else if local == "EndOfSequence" {
                    page.end_of_sequence = true;
                } else if items_depth.map(|d| depth == d + 1).unwrap_or(false) {
                    class_name = local;
                    class_depth = Some(depth);
                    record = attribute_record(e)?;
                } else if class_depth.map(|d| depth == d + 1).unwrap_or(false) {
                    prop_name = Some(local);
                    prop_text.clear();
                }
            }
            Ok(Event::Empty(ref e)) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if local == "EndOfSequence" {
                    page.end_of_sequence = true;
                } else if items_depth == Some(depth) {
                    // instance emitted as an empty tag, attribute-only
                    page.items
                        .entry(local)
                        .or_default()
                        .push(attribute_record(e)?);
                } else if class_depth == Some(depth) && prop_name.is_none() {
                    // nil or empty property element directly under the instance
                    record.insert(local, String::new());
                }
            }
            Ok(Event::Text(ref t)) => {
                if in_context {
                    let text = t.unescape()?.trim().to_string();
                    if !text.is_empty() {
                        page.context = Some(text);
                    }
                } else if prop_name.is_some() {
                    prop_text.push_str(t.unescape()?.as_ref());
                }
            }
            Ok(Event::End(ref e)) => {
                let local = e.local_name();
                if local.as_ref() == b"EnumerationContext" {
                    in_context = false;
                } else if class_depth == Some(depth) {
                    page.items
                        .entry(std::mem::take(&mut class_name))
                        .or_default()
                        .push(std::mem::take(&mut record));
                    class_depth = None;
                } else if class_depth.map(|d| depth == d + 1).unwrap_or(false) {
                    if let Some(name) = prop_name.take() {
                        record.insert(name, std::mem::take(&mut prop_text));
                    }
                } else if items_depth == Some(depth) && local.as_ref() == b"Items" {
                    items_depth = None;
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }

    Ok(page)
}

// ─── Identify ────────────────────────────────────────────────────────────────

/// Extract vendor/version text from an IdentifyResponse.
pub fn extract_identify(xml: &str) -> WinRmResult<Option<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut vendor: Option<String> = None;
    let mut version: Option<String> = None;
    let mut capture: Option<&'static str> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if local_is(e, "ProductVendor") {
                    capture = Some("vendor");
                } else if local_is(e, "ProductVersion") {
                    capture = Some("version");
                }
            }
            Ok(Event::Text(ref t)) => match capture {
                Some("vendor") => vendor = Some(t.unescape()?.trim().to_string()),
                Some("version") => version = Some(t.unescape()?.trim().to_string()),
                _ => {}
            },
            Ok(Event::End(_)) => capture = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }

    Ok(match (vendor, version) {
        (Some(vendor), Some(version)) => Some(format!("{} {}", vendor, version)),
        (Some(one), None) | (None, Some(one)) => Some(one),
        (None, None) => None,
    })
}
