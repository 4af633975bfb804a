//! OCPP-S envelope framing
//!
//! Decodes a SOAP envelope into flat header and body mappings plus a raw
//! notification blob for structured body elements, and encodes replies,
//! faults and outbound requests. Element names are matched by local name so
//! any namespace prefix is accepted.
//!
//! ```text
//! <s:Envelope>
//!   <s:Header> chargeBoxIdentity, a:MessageID, a:From, a:To, a:Action ... </s:Header>
//!   <s:Body>
//!     <bootNotificationRequest> chargePointVendor, chargePointModel ... </bootNotificationRequest>
//!   </s:Body>
//! </s:Envelope>
//! ```

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{CanonicalMessage, ProtocolFault};

/// Media type of SOAP 1.2 messages
pub const CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// Ordered name/value pairs
pub type StringPairs = Vec<(String, String)>;

const SOAP_ENVELOPE_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
const ADDRESSING_NS: &str = "http://www.w3.org/2005/08/addressing";
const ANONYMOUS_ADDRESS: &str = "http://www.w3.org/2005/08/addressing/anonymous";
const URN_UUID: &str = "urn:uuid:";

/// Header elements that wrap their value in `<a:Address>`.
const ADDRESS_HEADERS: &[&str] = &["From", "ReplyTo", "FaultTo"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SoapError {
    #[error("Invalid XML: {0}")]
    Xml(String),

    #[error("Missing SOAP element: {0}")]
    MissingElement(&'static str),

    #[error("Not a SOAP envelope: root element is <{0}>")]
    NotAnEnvelope(String),

    #[error("Invalid XML element name: {0:?}")]
    InvalidElementName(String),
}

/// Default namespace of the OCPP-S service the envelope is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceNamespace {
    /// Replies from the Central System service
    CentralSystem,
    /// Requests pushed to a charge point service
    ChargePoint,
}

impl ServiceNamespace {
    fn urn(&self) -> &'static str {
        match self {
            Self::CentralSystem => "urn://Ocpp/Cs/2012/06/",
            Self::ChargePoint => "urn://Ocpp/Cp/2012/06/",
        }
    }
}

// ── XML tree ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct XmlNode {
    name: String,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn path(&self, names: &[&str]) -> Option<&XmlNode> {
        names.iter().try_fold(self, |node, name| node.child(name))
    }

    fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        out.push('>');
        if self.children.is_empty() {
            out.push_str(&escape(self.text.as_str()));
        }
        for child in &self.children {
            child.write_to(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }

    fn to_json(&self) -> Value {
        if self.children.is_empty() {
            return Value::String(self.text.clone());
        }
        let mut map = Map::new();
        for child in &self.children {
            insert_repeated(&mut map, &child.name, child.to_json());
        }
        Value::Object(map)
    }
}

fn insert_repeated(map: &mut Map<String, Value>, key: &str, value: Value) {
    match map.get_mut(key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(key.to_string(), value);
        }
    }
}

fn local(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

fn parse_tree(xml: &str) -> Result<XmlNode, SoapError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(XmlNode {
                name: local(e.local_name().as_ref()),
                ..XmlNode::default()
            }),
            Ok(Event::Empty(e)) => {
                let node = XmlNode {
                    name: local(e.local_name().as_ref()),
                    ..XmlNode::default()
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Ok(Event::End(_)) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| SoapError::Xml("unbalanced end tag".into()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| SoapError::Xml(e.to_string()))?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(SoapError::Xml(format!(
                    "{} at position {}",
                    e,
                    reader.buffer_position()
                )))
            }
        }
    }

    if !stack.is_empty() {
        return Err(SoapError::Xml("unexpected end of document".into()));
    }
    root.ok_or(SoapError::MissingElement("Envelope"))
}

// ── SoapMessage ────────────────────────────────────────────────

/// Fault carried in a SOAP body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapFault {
    pub code: String,
    pub sub_code: String,
    pub reason: String,
    pub detail: String,
}

impl From<&ProtocolFault> for SoapFault {
    fn from(fault: &ProtocolFault) -> Self {
        Self {
            code: fault.soap_code().to_string(),
            sub_code: fault.code.clone(),
            reason: fault.description.clone(),
            detail: fault.detail_text(),
        }
    }
}

/// Decoded SOAP envelope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SoapMessage {
    /// Header values keyed by local element name
    pub headers: StringPairs,
    /// Local name of the first body element, e.g. `authorizeRequest`
    pub operation: String,
    /// Body children holding plain text
    pub values: StringPairs,
    /// Raw XML of body children that have their own structure
    pub notification: Option<String>,
    pub fault: Option<SoapFault>,
}

impl SoapMessage {
    /// Decode envelope text.
    pub fn decode(xml: &str) -> Result<Self, SoapError> {
        let root = parse_tree(xml)?;
        if root.name != "Envelope" {
            return Err(SoapError::NotAnEnvelope(root.name));
        }

        let mut message = SoapMessage::default();

        if let Some(header) = root.child("Header") {
            for item in &header.children {
                let value = match item.child("Address") {
                    Some(address) => address.text.clone(),
                    None => item.text.clone(),
                };
                message.headers.push((item.name.clone(), value));
            }
        }

        let body = root.child("Body").ok_or(SoapError::MissingElement("Body"))?;
        let operation = body
            .children
            .first()
            .ok_or(SoapError::MissingElement("Body content"))?;
        message.operation = operation.name.clone();

        if operation.name == "Fault" {
            message.fault = Some(SoapFault {
                code: text_at(operation, &["Code", "Value"]),
                sub_code: text_at(operation, &["Code", "Subcode", "Value"]),
                reason: text_at(operation, &["Reason", "Text"]),
                detail: operation
                    .child("Detail")
                    .map(|d| {
                        let mut raw = d.text.clone();
                        for c in &d.children {
                            c.write_to(&mut raw);
                        }
                        raw
                    })
                    .unwrap_or_default(),
            });
            return Ok(message);
        }

        let mut notification = String::new();
        for value in &operation.children {
            if value.children.is_empty() {
                message.values.push((value.name.clone(), value.text.clone()));
            } else {
                value.write_to(&mut notification);
            }
        }
        if !notification.is_empty() {
            message.notification = Some(notification);
        }

        Ok(message)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn identity(&self) -> Option<&str> {
        self.header("chargeBoxIdentity").filter(|s| !s.is_empty())
    }

    /// Operation name: the `Action` header without its leading slash, or the
    /// body element name with the `Request`/`Response` suffix removed.
    pub fn action(&self) -> String {
        if let Some(action) = self.header("Action").map(|a| a.trim_start_matches('/')) {
            if !action.is_empty() {
                return action.trim_end_matches("Response").to_string();
            }
        }
        let base = self
            .operation
            .strip_suffix("Request")
            .or_else(|| self.operation.strip_suffix("Response"))
            .unwrap_or(&self.operation);
        upper_first(base)
    }

    pub fn is_response(&self) -> bool {
        self.operation.ends_with("Response")
    }

    /// Body values as a JSON object. Structured children are recovered from
    /// the notification blob with a second parse.
    pub fn payload(&self) -> Result<Map<String, Value>, SoapError> {
        let mut map = Map::new();
        for (name, value) in &self.values {
            insert_repeated(&mut map, name, Value::String(value.clone()));
        }
        if let Some(raw) = &self.notification {
            for (name, value) in notification_to_json(raw)? {
                insert_repeated(&mut map, &name, value);
            }
        }
        Ok(map)
    }

    /// Map onto the canonical model: `*Request` is a Call, `*Response` a
    /// CallResult, a fault a CallError.
    pub fn to_canonical(&self) -> Result<CanonicalMessage, SoapError> {
        let relates_to = self
            .header("RelatesTo")
            .or_else(|| self.header("MessageID"))
            .map(unique_id_of)
            .unwrap_or_default();

        if let Some(fault) = &self.fault {
            let code = if fault.sub_code.is_empty() {
                &fault.code
            } else {
                &fault.sub_code
            };
            let details = if fault.detail.is_empty() {
                Value::Object(Map::new())
            } else {
                Value::String(fault.detail.clone())
            };
            return Ok(CanonicalMessage::CallError {
                unique_id: relates_to,
                error_code: code.clone(),
                error_description: fault.reason.clone(),
                payload: details,
            });
        }

        let payload = Value::Object(self.payload()?);
        if self.is_response() {
            return Ok(CanonicalMessage::result(relates_to, payload));
        }

        let message_id = self
            .header("MessageID")
            .ok_or(SoapError::MissingElement("MessageID"))?;
        Ok(CanonicalMessage::call(unique_id_of(message_id), self.action(), payload))
    }

    /// Headers for the reply to this request: addressing swapped, action
    /// suffixed with `Response`.
    pub fn prepare_response(&self) -> StringPairs {
        let get = |name: &str| self.header(name).unwrap_or_default().to_string();
        let message_id = get("MessageID");
        vec![
            ("chargeBoxIdentity".into(), get("chargeBoxIdentity")),
            ("MessageID".into(), message_id.clone()),
            ("From".into(), get("To")),
            ("To".into(), get("From")),
            ("ReplyTo".into(), get("ReplyTo")),
            ("FaultTo".into(), get("FaultTo")),
            ("Action".into(), format!("{}Response", get("Action"))),
            ("RelatesTo".into(), message_id),
        ]
    }
}

fn text_at(node: &XmlNode, path: &[&str]) -> String {
    node.path(path).map(|n| n.text.clone()).unwrap_or_default()
}

/// Secondary parse of a notification blob into JSON fields.
pub fn notification_to_json(raw: &str) -> Result<Map<String, Value>, SoapError> {
    let wrapped = format!("<notification>{raw}</notification>");
    match parse_tree(&wrapped)?.to_json() {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

/// Strip the `urn:uuid:` prefix of a WS-Addressing message id.
pub fn unique_id_of(message_id: &str) -> String {
    message_id
        .strip_prefix(URN_UUID)
        .unwrap_or(message_id)
        .to_string()
}

pub fn message_id_for(unique_id: &str) -> String {
    format!("{URN_UUID}{unique_id}")
}

fn upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Body element name of an operation, e.g. `("Authorize", "Response")` →
/// `authorizeResponse`.
pub fn body_element(action: &str, suffix: &str) -> String {
    format!("{}{}", lower_first(action), suffix)
}

// ── Encoding ───────────────────────────────────────────────────

fn envelope_open(out: &mut String, ns: ServiceNamespace) {
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<s:Envelope xmlns:s=\"{SOAP_ENVELOPE_NS}\" xmlns:a=\"{ADDRESSING_NS}\" xmlns=\"{}\">\n",
        ns.urn()
    ));
}

fn write_headers(out: &mut String, headers: &[(String, String)]) {
    out.push_str("<s:Header>\n");
    for (name, value) in headers.iter().filter(|(_, v)| !v.is_empty()) {
        let value = escape(value.as_str());
        let tag = if name == "chargeBoxIdentity" {
            name.clone()
        } else {
            format!("a:{name}")
        };
        if ADDRESS_HEADERS.contains(&name.as_str()) {
            out.push_str(&format!("<{tag}><a:Address>{value}</a:Address></{tag}>\n"));
        } else {
            out.push_str(&format!("<{tag}>{value}</{tag}>\n"));
        }
    }
    out.push_str("</s:Header>\n");
}

/// Payload keys become element names; anything that is not a plain XML
/// name would break out of its element.
fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn write_value(out: &mut String, name: &str, value: &Value) -> Result<(), SoapError> {
    if !is_xml_name(name) {
        return Err(SoapError::InvalidElementName(name.to_string()));
    }
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                write_value(out, name, item)?;
            }
        }
        Value::Object(map) => {
            out.push_str(&format!("<{name}>"));
            for (key, child) in map {
                write_value(out, key, child)?;
            }
            out.push_str(&format!("</{name}>"));
        }
        Value::String(s) => out.push_str(&format!("<{name}>{}</{name}>", escape(s.as_str()))),
        other => out.push_str(&format!("<{name}>{other}</{name}>")),
    }
    Ok(())
}

/// Encode an envelope whose body element `operation` holds `payload`. An
/// empty `operation` leaves the body empty.
pub fn encode_envelope(
    ns: ServiceNamespace,
    headers: &[(String, String)],
    operation: &str,
    payload: &Value,
) -> Result<String, SoapError> {
    let mut out = String::new();
    envelope_open(&mut out, ns);
    write_headers(&mut out, headers);
    out.push_str("<s:Body>\n");
    match payload {
        _ if operation.is_empty() => {}
        Value::Object(map) if !map.is_empty() => {
            out.push_str(&format!("<{operation}>\n"));
            for (key, value) in map {
                write_value(&mut out, key, value)?;
                out.push('\n');
            }
            out.push_str(&format!("</{operation}>\n"));
        }
        _ => out.push_str(&format!("<{operation}/>\n")),
    }
    out.push_str("</s:Body>\n</s:Envelope>");
    Ok(out)
}

/// Encode a SOAP 1.2 fault envelope.
pub fn encode_fault(headers: &[(String, String)], fault: &SoapFault) -> String {
    let mut out = String::new();
    envelope_open(&mut out, ServiceNamespace::CentralSystem);
    write_headers(&mut out, headers);
    out.push_str("<s:Body>\n<s:Fault>\n");
    out.push_str(&format!(
        "<s:Code><s:Value>s:{}</s:Value><s:Subcode><s:Value>{}</s:Value></s:Subcode></s:Code>\n",
        escape(fault.code.as_str()),
        escape(fault.sub_code.as_str())
    ));
    out.push_str(&format!(
        "<s:Reason><s:Text xml:lang=\"en\">{}</s:Text></s:Reason>\n",
        escape(fault.reason.as_str())
    ));
    out.push_str(&format!("<s:Detail>{}</s:Detail>\n", escape(fault.detail.as_str())));
    out.push_str("</s:Fault>\n</s:Body>\n</s:Envelope>");
    out
}

/// Headers of a request pushed to a charge point.
pub fn request_headers(identity: &str, action: &str, unique_id: &str, from: &str, to: &str) -> StringPairs {
    vec![
        ("chargeBoxIdentity".into(), identity.to_string()),
        ("MessageID".into(), message_id_for(unique_id)),
        ("From".into(), from.to_string()),
        ("ReplyTo".into(), ANONYMOUS_ADDRESS.to_string()),
        ("To".into(), to.to_string()),
        ("Action".into(), format!("/{action}")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorCode, MessageKind};
    use serde_json::json;

    const AUTHORIZE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:a="http://www.w3.org/2005/08/addressing" xmlns="urn://Ocpp/Cs/2012/06/">
  <s:Header>
    <chargeBoxIdentity>CP-SOAP-1</chargeBoxIdentity>
    <a:Action>/Authorize</a:Action>
    <a:MessageID>urn:uuid:0d5c8a8e-1b1f-4c55-9f1b-1f3a2c1d9e77</a:MessageID>
    <a:From><a:Address>http://10.0.0.5:8080/</a:Address></a:From>
    <a:ReplyTo><a:Address>http://www.w3.org/2005/08/addressing/anonymous</a:Address></a:ReplyTo>
    <a:To>http://cs.example.com/Ocpp</a:To>
  </s:Header>
  <s:Body>
    <authorizeRequest>
      <idTag>TAG&amp;1</idTag>
    </authorizeRequest>
  </s:Body>
</s:Envelope>"#;

    const STOP: &str = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:a="http://www.w3.org/2005/08/addressing">
  <s:Header>
    <chargeBoxIdentity>CP-SOAP-1</chargeBoxIdentity>
    <a:Action>/StopTransaction</a:Action>
    <a:MessageID>urn:uuid:42</a:MessageID>
  </s:Header>
  <s:Body>
    <stopTransactionRequest>
      <transactionId>7</transactionId>
      <meterStop>2000</meterStop>
      <timestamp>2024-01-01T01:00:00Z</timestamp>
      <transactionData>
        <values>
          <timestamp>2024-01-01T00:30:00Z</timestamp>
          <value unit="Wh">100</value>
          <value unit="Wh">200</value>
        </values>
      </transactionData>
    </stopTransactionRequest>
  </s:Body>
</s:Envelope>"#;

    #[test]
    fn decode_headers_and_values() {
        let msg = SoapMessage::decode(AUTHORIZE).unwrap();
        assert_eq!(msg.identity(), Some("CP-SOAP-1"));
        assert_eq!(msg.header("From"), Some("http://10.0.0.5:8080/"));
        assert_eq!(msg.operation, "authorizeRequest");
        assert_eq!(msg.values, vec![("idTag".to_string(), "TAG&1".to_string())]);
        assert!(msg.notification.is_none());
        assert_eq!(msg.action(), "Authorize");
    }

    #[test]
    fn request_maps_to_call() {
        let msg = SoapMessage::decode(AUTHORIZE).unwrap().to_canonical().unwrap();
        assert_eq!(msg.kind(), MessageKind::Call);
        assert_eq!(msg.unique_id(), "0d5c8a8e-1b1f-4c55-9f1b-1f3a2c1d9e77");
        assert_eq!(msg.payload(), &json!({"idTag": "TAG&1"}));
    }

    #[test]
    fn structured_body_goes_to_notification() {
        let msg = SoapMessage::decode(STOP).unwrap();
        assert_eq!(msg.values.len(), 3);
        let raw = msg.notification.as_deref().unwrap();
        assert!(raw.starts_with("<transactionData>"));

        let payload = msg.payload().unwrap();
        let values = &payload["transactionData"]["values"];
        assert_eq!(values["timestamp"], "2024-01-01T00:30:00Z");
        assert_eq!(values["value"], json!(["100", "200"]));
    }

    #[test]
    fn action_falls_back_to_body_element() {
        let xml = r#"<Envelope><Header><MessageID>1</MessageID></Header><Body><heartbeatRequest/></Body></Envelope>"#;
        let msg = SoapMessage::decode(xml).unwrap();
        assert_eq!(msg.action(), "Heartbeat");
        assert_eq!(msg.to_canonical().unwrap().payload(), &json!({}));
    }

    #[test]
    fn response_maps_to_call_result() {
        let xml = r#"<s:Envelope xmlns:s="x" xmlns:a="y"><s:Header><a:RelatesTo>urn:uuid:abc</a:RelatesTo>
            <a:Action>/ResetResponse</a:Action></s:Header>
            <s:Body><resetResponse><status>Accepted</status></resetResponse></s:Body></s:Envelope>"#;
        let msg = SoapMessage::decode(xml).unwrap().to_canonical().unwrap();
        assert_eq!(msg, CanonicalMessage::result("abc", json!({"status": "Accepted"})));
    }

    #[test]
    fn fault_maps_to_call_error() {
        let fault = SoapFault::from(&ProtocolFault::new(ErrorCode::NotSupported, "no <way>"));
        let xml = encode_fault(&[("RelatesTo".into(), "urn:uuid:f1".into())], &fault);
        let decoded = SoapMessage::decode(&xml).unwrap();
        assert_eq!(decoded.fault.as_ref().unwrap().code, "s:Sender");
        let msg = decoded.to_canonical().unwrap();
        match msg {
            CanonicalMessage::CallError {
                unique_id,
                error_code,
                error_description,
                ..
            } => {
                assert_eq!(unique_id, "f1");
                assert_eq!(error_code, "NotSupported");
                assert_eq!(error_description, "no <way>");
            }
            other => panic!("expected CallError, got {other:?}"),
        }
    }

    #[test]
    fn prepare_response_swaps_addressing() {
        let request = SoapMessage::decode(AUTHORIZE).unwrap();
        let headers = request.prepare_response();
        let get = |n: &str| headers.iter().find(|(k, _)| k == n).map(|(_, v)| v.as_str());
        assert_eq!(get("From"), Some("http://cs.example.com/Ocpp"));
        assert_eq!(get("To"), Some("http://10.0.0.5:8080/"));
        assert_eq!(get("Action"), Some("/AuthorizeResponse"));
        assert_eq!(get("RelatesTo"), request.header("MessageID"));
    }

    #[test]
    fn encoded_reply_decodes_back() {
        let request = SoapMessage::decode(AUTHORIZE).unwrap();
        let payload = json!({"idTagInfo": {"status": "Accepted", "expiryDate": "2024-01-01T00:05:00.000Z"}});
        let xml = encode_envelope(
            ServiceNamespace::CentralSystem,
            &request.prepare_response(),
            &body_element("Authorize", "Response"),
            &payload,
        )
        .unwrap();
        assert!(xml.contains("<a:From><a:Address>http://cs.example.com/Ocpp</a:Address></a:From>"));
        let reply = SoapMessage::decode(&xml).unwrap();
        assert_eq!(reply.identity(), Some("CP-SOAP-1"));
        assert!(reply.is_response());
        let msg = reply.to_canonical().unwrap();
        assert_eq!(msg.payload(), &payload);
    }

    #[test]
    fn request_headers_use_urn_message_id() {
        let headers = request_headers("CP1", "Reset", "abc", "http://cs/", "http://cp/");
        assert!(headers.contains(&("MessageID".into(), "urn:uuid:abc".into())));
        assert!(headers.contains(&("Action".into(), "/Reset".into())));
        let xml = encode_envelope(ServiceNamespace::ChargePoint, &headers, "resetRequest", &json!({"type": "Soft"}))
            .unwrap();
        assert!(xml.contains("xmlns=\"urn://Ocpp/Cp/2012/06/\""));
        assert!(xml.contains("<type>Soft</type>"));
    }

    #[test]
    fn rejects_non_envelopes() {
        assert!(matches!(
            SoapMessage::decode("<html><body/></html>"),
            Err(SoapError::NotAnEnvelope(_))
        ));
        assert!(matches!(
            SoapMessage::decode("<Envelope><Header/></Envelope>"),
            Err(SoapError::MissingElement("Body"))
        ));
        assert!(SoapMessage::decode("<Envelope><Body>").is_err());
        assert!(SoapMessage::decode("not xml at all").is_err());
    }

    #[test]
    fn payload_keys_must_be_element_names() {
        for key in ["a b", "x<y", "1st", "", "k/>"] {
            let mut inner = Map::new();
            inner.insert(key.to_string(), json!("v"));
            let payload = json!({"outer": inner});
            assert_eq!(
                encode_envelope(ServiceNamespace::ChargePoint, &[], "dataTransferRequest", &payload),
                Err(SoapError::InvalidElementName(key.to_string())),
                "{key:?}"
            );
        }
        let xml = encode_envelope(
            ServiceNamespace::ChargePoint,
            &[],
            "dataTransferRequest",
            &json!({"vendor_id.x-1": "V", "_data": ["a", "b"]}),
        )
        .unwrap();
        assert!(xml.contains("<vendor_id.x-1>V</vendor_id.x-1>"));
        assert!(xml.contains("<_data>a</_data><_data>b</_data>"));
    }
}
