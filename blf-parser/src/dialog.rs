//! RFC 4235 dialog-info decoding.
//!
//! PBXs disagree on the shape of dialog-info bodies. Some declare the
//! `urn:ietf:params:xml:ns:dialog-info` default namespace and some omit it;
//! some report a dialog's state in a `<state>` child element and some as a
//! `state` attribute on `<dialog>`. The differences are captured as data in
//! [`SchemaVariant`] and one event-driven walker decodes every variant:
//!
//! ```xml
//! <dialog-info xmlns="urn:ietf:params:xml:ns:dialog-info" version="1"
//!              state="full" entity="sip:1001@pbx.example.com">
//!   <dialog id="a1" direction="recipient">
//!     <state>early</state>
//!     <local><identity>sip:1001@pbx.example.com</identity></local>
//!   </dialog>
//! </dialog-info>
//! ```

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;

use crate::error::{ParseError, ParseResult};
use crate::state::LineState;

/// Namespace declared by conforming dialog-info documents
pub const DIALOG_INFO_NAMESPACE: &str = "urn:ietf:params:xml:ns:dialog-info";

/// One accepted shape of a dialog-info document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaVariant {
    /// Short label used in diagnostics
    pub name: &'static str,
    /// Namespace every matched element must be bound to, or `None` to match
    /// elements by local name alone
    pub namespace: Option<&'static str>,
}

impl SchemaVariant {
    pub const NAMESPACED: SchemaVariant = SchemaVariant {
        name: "namespaced",
        namespace: Some(DIALOG_INFO_NAMESPACE),
    };

    pub const NAMESPACE_FREE: SchemaVariant = SchemaVariant {
        name: "namespace-free",
        namespace: None,
    };

    fn accepts(&self, ns: &ResolveResult) -> bool {
        match self.namespace {
            None => true,
            Some(expected) => {
                matches!(ns, ResolveResult::Bound(Namespace(uri)) if *uri == expected.as_bytes())
            }
        }
    }
}

/// Decode strategies in the order they are tried
pub const SCHEMA_VARIANTS: &[SchemaVariant] = &[SchemaVariant::NAMESPACED, SchemaVariant::NAMESPACE_FREE];

/// A decoded dialog-info document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialogInfo {
    /// `entity` attribute of the root, e.g. `sip:1001@pbx.example.com`
    pub entity: Option<String>,
    /// Sub-dialogs in document order
    pub dialogs: Vec<DialogRecord>,
}

/// One `<dialog>` entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialogRecord {
    pub id: Option<String>,
    pub direction: Option<String>,
    /// Text of the `<state>` child element
    pub state_element: Option<String>,
    /// Value of the `state` attribute on `<dialog>`
    pub state_attribute: Option<String>,
    /// Text of `<local><identity>`
    pub local_identity: Option<String>,
}

impl DialogRecord {
    /// The child element wins over the attribute; the result is trimmed and lowercased.
    pub fn effective_state(&self) -> String {
        let element = self.state_element.as_deref().map(str::trim).unwrap_or("");
        let state = if element.is_empty() {
            self.state_attribute.as_deref().map(str::trim).unwrap_or("")
        } else {
            element
        };
        state.to_ascii_lowercase()
    }
}

impl DialogInfo {
    /// Reduce the sub-dialogs to a single line state.
    ///
    /// Terminated and stateless dialogs are skipped. The first remaining
    /// dialog decides: trying, proceeding and early ring; anything else is busy.
    /// No remaining dialog means idle.
    pub fn line_state(&self) -> LineState {
        for dialog in &self.dialogs {
            match dialog.effective_state().as_str() {
                "" | "terminated" => continue,
                "trying" | "proceeding" | "early" => return LineState::Ringing,
                _ => return LineState::Busy,
            }
        }
        LineState::Idle
    }

    /// Extension from the entity, falling back to the first dialog's local identity.
    pub fn extension(&self) -> Option<String> {
        self.entity
            .as_deref()
            .and_then(extract_user)
            .or_else(|| {
                self.dialogs
                    .first()
                    .and_then(|d| d.local_identity.as_deref())
                    .and_then(extract_user)
            })
            .map(str::to_string)
    }
}

/// Extract `identifier` from `scheme:identifier@host`.
///
/// Without `@` the whole remainder after the scheme is returned. Values with
/// no scheme separator, or an empty identifier, yield `None`.
pub fn extract_user(uri: &str) -> Option<&str> {
    let (_, rest) = uri.trim().split_once(':')?;
    let user = rest.split_once('@').map_or(rest, |(user, _)| user);
    if user.is_empty() {
        None
    } else {
        Some(user)
    }
}

/// Decode `body` with each variant in [`SCHEMA_VARIANTS`] order, returning the
/// first success or the last failure.
pub fn decode_dialog_info(body: &[u8]) -> ParseResult<DialogInfo> {
    let mut last_error = ParseError::InvalidXmlStructure("no schema variants".to_string());
    for variant in SCHEMA_VARIANTS {
        match decode_with(body, variant) {
            Ok(info) => return Ok(info),
            Err(e) => last_error = e,
        }
    }
    Err(last_error)
}

/// Normalized line state of a dialog-info body; [`LineState::Unknown`] when no
/// variant can decode it.
pub fn parse_dialog_info(body: &[u8]) -> LineState {
    match decode_dialog_info(body) {
        Ok(info) => info.line_state(),
        Err(_) => LineState::Unknown,
    }
}

/// Extension named by a namespaced dialog-info body.
///
/// Documents without the namespace yield `None`; callers fall back to the
/// routing headers.
pub fn extension_from_dialog_info(body: &[u8]) -> Option<String> {
    decode_with(body, &SchemaVariant::NAMESPACED).ok()?.extension()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Root,
    Dialog,
    State,
    Local,
    Identity,
    Other,
}

struct Walker<'v> {
    variant: &'v SchemaVariant,
    info: DialogInfo,
    stack: Vec<Frame>,
    text: String,
}

impl<'v> Walker<'v> {
    fn open(&mut self, start: &BytesStart, in_scope: bool) -> ParseResult<Frame> {
        let local = start.local_name();
        let local = local.as_ref();

        let frame = match self.stack.last() {
            None => {
                if local != b"dialog-info" {
                    return Err(ParseError::InvalidXmlStructure(format!(
                        "unexpected root element <{}>",
                        String::from_utf8_lossy(local)
                    )));
                }
                if !in_scope {
                    return Err(ParseError::NamespaceProcessingFailed(format!(
                        "root element is not bound to {} ({} variant)",
                        self.variant.namespace.unwrap_or("any namespace"),
                        self.variant.name
                    )));
                }
                self.info.entity = attribute(start, b"entity")?;
                Frame::Root
            }
            Some(Frame::Root) if in_scope && local == b"dialog" => {
                self.info.dialogs.push(DialogRecord {
                    id: attribute(start, b"id")?,
                    direction: attribute(start, b"direction")?,
                    state_attribute: attribute(start, b"state")?,
                    ..DialogRecord::default()
                });
                Frame::Dialog
            }
            Some(Frame::Dialog) if in_scope && local == b"state" => Frame::State,
            Some(Frame::Dialog) if in_scope && local == b"local" => Frame::Local,
            Some(Frame::Local) if in_scope && local == b"identity" => Frame::Identity,
            Some(_) => Frame::Other,
        };

        if matches!(frame, Frame::State | Frame::Identity) {
            self.text.clear();
        }
        Ok(frame)
    }

    fn close(&mut self, frame: Frame) {
        if !matches!(frame, Frame::State | Frame::Identity) {
            return;
        }
        let text = std::mem::take(&mut self.text);
        let Some(dialog) = self.info.dialogs.last_mut() else {
            return;
        };
        match frame {
            Frame::State => dialog.state_element = Some(text),
            Frame::Identity if dialog.local_identity.is_none() => dialog.local_identity = Some(text),
            _ => {}
        }
    }

    fn collecting_text(&self) -> bool {
        matches!(self.stack.last(), Some(Frame::State | Frame::Identity))
    }
}

/// Decode `body` under a single schema variant.
pub fn decode_with(body: &[u8], variant: &SchemaVariant) -> ParseResult<DialogInfo> {
    let mut reader = NsReader::from_reader(body);
    let mut buf = Vec::new();
    let mut walker = Walker {
        variant,
        info: DialogInfo::default(),
        stack: Vec::new(),
        text: String::new(),
    };

    loop {
        buf.clear();
        let (ns, event) = reader
            .read_resolved_event_into(&mut buf)
            .map_err(|e| ParseError::XmlDeserializationFailed(e.to_string()))?;
        let in_scope = variant.accepts(&ns);

        match event {
            Event::Start(ref start) => {
                let frame = walker.open(start, in_scope)?;
                walker.stack.push(frame);
            }
            Event::Empty(ref start) => {
                let frame = walker.open(start, in_scope)?;
                if frame == Frame::Root {
                    // <dialog-info/> has no dialogs
                    return Ok(walker.info);
                }
                walker.close(frame);
            }
            Event::Text(ref text) if walker.collecting_text() => {
                let text = text
                    .unescape()
                    .map_err(|e| ParseError::XmlDeserializationFailed(e.to_string()))?;
                walker.text.push_str(&text);
            }
            Event::CData(ref data) if walker.collecting_text() => {
                walker.text.push_str(&String::from_utf8_lossy(data));
            }
            Event::End(_) => {
                if let Some(frame) = walker.stack.pop() {
                    walker.close(frame);
                }
                if walker.stack.is_empty() {
                    return Ok(walker.info);
                }
            }
            Event::Eof => {
                return Err(ParseError::InvalidXmlStructure(
                    "document ended before dialog-info was closed".to_string(),
                ));
            }
            _ => {}
        }
    }
}

fn attribute(start: &BytesStart, name: &[u8]) -> ParseResult<Option<String>> {
    for attr in start.attributes() {
        let attr = attr.map_err(|e| ParseError::XmlDeserializationFailed(e.to_string()))?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        if attr.key.local_name().as_ref() == name {
            let value = attr
                .unescape_value()
                .map_err(|e| ParseError::XmlDeserializationFailed(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}
