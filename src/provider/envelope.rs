//! SOAP Envelope Codec
//!
//! Builds request envelopes and decodes responses with a streaming XML
//! reader. Decoding collects the leaf fields of the expected response
//! element (namespace prefixes ignored) and then checks the fields the
//! operation needs. A missing or unparsable field is a [`ParseError`],
//! never a silent default.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use thiserror::Error;

use super::codes::classify;
use super::{
    BalanceInfo, ProviderOutcome, ProviderRejection, StatusReport, TransferReceipt, TransportFault,
};

pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Gateway operation, sent as the SOAPAction header and body element name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    BalanceCheck,
    SendTransfer,
    StatusCheck,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::BalanceCheck => "BalanceCheck",
            Action::SendTransfer => "SendTransfer",
            Action::StatusCheck => "StatusCheck",
        }
    }

    pub fn response_element(&self) -> &'static str {
        match self {
            Action::BalanceCheck => "BalanceCheckResponse",
            Action::SendTransfer => "SendTransferResponse",
            Action::StatusCheck => "StatusCheckResponse",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Invalid XML: {0}")]
    Xml(String),

    #[error("Response element {0} not found")]
    MissingElement(&'static str),

    #[error("Missing required field {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to encode request envelope: {0}")]
pub struct EncodeError(String);

/// Build a request envelope with one child element per field
pub fn build_request(action: Action, fields: &[(&str, &str)]) -> Result<String, EncodeError> {
    let mut writer = Writer::new(Vec::new());

    let mut envelope = BytesStart::new("soapenv:Envelope");
    envelope.push_attribute(("xmlns:soapenv", SOAP_ENV_NS));

    let mut events = vec![
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
        Event::Start(envelope),
        Event::Start(BytesStart::new("soapenv:Body")),
        Event::Start(BytesStart::new(action.as_str())),
    ];
    for (name, value) in fields {
        events.push(Event::Start(BytesStart::new(*name)));
        events.push(Event::Text(BytesText::new(value)));
        events.push(Event::End(BytesEnd::new(*name)));
    }
    events.push(Event::End(BytesEnd::new(action.as_str())));
    events.push(Event::End(BytesEnd::new("soapenv:Body")));
    events.push(Event::End(BytesEnd::new("soapenv:Envelope")));

    for event in events {
        writer
            .write_event(event)
            .map_err(|e| EncodeError(e.to_string()))?;
    }

    String::from_utf8(writer.into_inner()).map_err(|e| EncodeError(e.to_string()))
}

/// Leaf fields of a response element
#[derive(Debug, Default)]
pub struct ResponseFields {
    fields: HashMap<String, String>,
}

impl ResponseFields {
    pub fn required(&self, name: &'static str) -> Result<&str, ParseError> {
        match self.fields.get(name) {
            Some(v) if !v.is_empty() => Ok(v.as_str()),
            _ => Err(ParseError::MissingField(name)),
        }
    }

    pub fn optional(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn required_i64(&self, name: &'static str) -> Result<i64, ParseError> {
        let raw = self.required(name)?;
        raw.parse().map_err(|_| ParseError::InvalidValue {
            field: name,
            value: raw.to_string(),
        })
    }

    fn optional_i64(&self, name: &'static str) -> Result<Option<i64>, ParseError> {
        self.optional(name)
            .map(|raw| {
                raw.parse().map_err(|_| ParseError::InvalidValue {
                    field: name,
                    value: raw.to_string(),
                })
            })
            .transpose()
    }
}

/// Does the body look like an HTML page instead of XML?
pub fn is_html(body: &str) -> bool {
    let head: String = body
        .trim_start()
        .chars()
        .take(14)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

/// Collect the leaf fields of `action`'s response element
pub fn parse_response(action: Action, body: &str) -> Result<ResponseFields, ParseError> {
    let target = action.response_element();
    let mut reader = Reader::from_str(body);

    let mut found = false;
    let mut depth_in_target = 0usize;
    let mut current: Option<String> = None;
    let mut text = String::new();
    let mut out = ResponseFields::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(e.local_name().as_ref());
                if depth_in_target == 0 {
                    if name == target {
                        found = true;
                        depth_in_target = 1;
                    }
                } else {
                    depth_in_target += 1;
                    current = Some(name);
                    text.clear();
                }
            }
            Ok(Event::Empty(e)) => {
                if depth_in_target > 0 {
                    out.fields
                        .insert(local_name(e.local_name().as_ref()), String::new());
                } else if local_name(e.local_name().as_ref()) == target {
                    found = true;
                }
            }
            Ok(Event::Text(t)) => {
                if current.is_some() {
                    let value = t.unescape().map_err(|e| ParseError::Xml(e.to_string()))?;
                    text.push_str(&value);
                }
            }
            Ok(Event::CData(t)) => {
                if current.is_some() {
                    text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Ok(Event::End(e)) => {
                if depth_in_target == 0 {
                    continue;
                }
                depth_in_target -= 1;
                let name = local_name(e.local_name().as_ref());
                if current.as_deref() == Some(name.as_str()) {
                    out.fields.insert(name, text.trim().to_string());
                }
                current = None;
                text.clear();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ParseError::Xml(e.to_string())),
        }
    }

    if !found {
        return Err(ParseError::MissingElement(target));
    }
    Ok(out)
}

/// Shared decode path: HTML check, envelope parse, code check, payload
fn decode<T>(
    action: Action,
    body: &str,
    extract: impl FnOnce(&ResponseFields, &str) -> Result<T, ParseError>,
) -> ProviderOutcome<T> {
    if is_html(body) {
        return ProviderOutcome::TransportFault(TransportFault::HtmlBody);
    }

    let fields = match parse_response(action, body) {
        Ok(fields) => fields,
        Err(e) => return ProviderOutcome::TransportFault(e.into()),
    };

    let code = match fields.required("ResponseCode") {
        Ok(code) => code,
        Err(e) => return ProviderOutcome::TransportFault(e.into()),
    };
    let message = fields.optional("ResponseMessage").unwrap_or_default();

    if !classify(code).is_success() {
        return ProviderOutcome::ApplicationError(ProviderRejection::new(code, message));
    }

    // A success without its payload is not proof of anything
    match extract(&fields, message) {
        Ok(payload) => ProviderOutcome::Success(payload),
        Err(e) => ProviderOutcome::TransportFault(e.into()),
    }
}

pub fn decode_balance(body: &str) -> ProviderOutcome<BalanceInfo> {
    decode(Action::BalanceCheck, body, |f, message| {
        Ok(BalanceInfo {
            balance_mb: f.required_i64("Balance")?,
            expiry: f.optional("Expiry").map(str::to_string),
            message: message.to_string(),
        })
    })
}

pub fn decode_transfer(body: &str) -> ProviderOutcome<TransferReceipt> {
    decode(Action::SendTransfer, body, |f, message| {
        Ok(TransferReceipt {
            provider_ref: f.required("ProviderRef")?.to_string(),
            provider_txn_ref: f.required("TransactionRef")?.to_string(),
            message: message.to_string(),
        })
    })
}

pub fn decode_status(body: &str) -> ProviderOutcome<StatusReport> {
    decode(Action::StatusCheck, body, |f, message| {
        Ok(StatusReport {
            message: message.to_string(),
            amount_mb: f.optional_i64("Amount")?,
            provider_ref: f.required("ProviderRef")?.to_string(),
            provider_txn_ref: f.required("TransactionRef")?.to_string(),
            sender: f.optional("Sender").map(str::to_string),
            recipient: f.optional("Recipient").map(str::to_string),
        })
    })
}
