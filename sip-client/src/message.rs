//! SIP message helpers on top of `rsip`.
//!
//! Parsing expands compact header forms (`v`, `f`, `t`, `i`, ...) that
//! `rsip` leaves as `Header::Other` and frames the body by `Content-Length`.
//! Messages built here always carry an accurate `Content-Length`.

use std::mem;

use rsip::headers::{self, UntypedHeader};
use rsip::{Header, Headers, Request, Response, SipMessage, StatusCode, Version};

use crate::error::MessageError;

/// Parse one datagram.
///
/// A missing or unusable Content-Length takes the rest of the datagram as body.
pub fn parse_message(data: &[u8]) -> Result<SipMessage, MessageError> {
    let text = std::str::from_utf8(data).map_err(|_| MessageError::InvalidEncoding)?;
    let mut message = SipMessage::try_from(text).map_err(|e| MessageError::Malformed(e.to_string()))?;

    let (headers, body) = match &mut message {
        SipMessage::Request(request) => (&mut request.headers, &mut request.body),
        SipMessage::Response(response) => (&mut response.headers, &mut response.body),
    };
    expand_compact_headers(headers);

    if let Some(expected) = content_length(headers) {
        if body.len() < expected {
            return Err(MessageError::TruncatedBody {
                expected,
                actual: body.len(),
            });
        }
        body.truncate(expected);
    }

    Ok(message)
}

fn expand_compact_headers(headers: &mut Headers) {
    let mut collected: Vec<Header> = mem::take(headers).into();
    for header in collected.iter_mut() {
        if let Header::Other(name, value) = header {
            if let Some(expanded) = expand_compact_header(name, value) {
                *header = expanded;
            }
        }
    }
    *headers = collected.into();
}

fn expand_compact_header(name: &str, value: &str) -> Option<Header> {
    let value = value.to_string();
    match name.to_ascii_lowercase().as_str() {
        "v" => Some(Header::Via(headers::Via::new(value))),
        "f" => Some(Header::From(headers::From::new(value))),
        "t" => Some(Header::To(headers::To::new(value))),
        "i" => Some(Header::CallId(headers::CallId::new(value))),
        "m" => Some(Header::Contact(headers::Contact::new(value))),
        "l" => Some(Header::ContentLength(headers::ContentLength::new(value))),
        "c" => Some(Header::ContentType(headers::ContentType::new(value))),
        "e" => Some(Header::ContentEncoding(headers::ContentEncoding::new(value))),
        "k" => Some(Header::Supported(headers::Supported::new(value))),
        "s" => Some(Header::Subject(headers::Subject::new(value))),
        "o" => Some(Header::Event(headers::Event::new(value))),
        _ => None,
    }
}

fn content_length(headers: &Headers) -> Option<usize> {
    headers.iter().find_map(|header| match header {
        Header::ContentLength(length) => length.value().trim().parse().ok(),
        _ => None,
    })
}

/// Value of the first header named `name`, compared case-insensitively.
pub fn header_value(headers: &Headers, name: &str) -> Option<String> {
    headers.iter().find_map(|header| {
        let line = header.to_string();
        let (header_name, value) = line.split_once(':')?;
        if header_name.trim().eq_ignore_ascii_case(name) {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}

/// Look up a `;name=value` parameter of a header value.
///
/// For name-addr values (`<sip:...>;tag=x`) only the parameters after the
/// closing `>` are considered. A flag parameter without `=` yields `""`.
pub fn header_param<'a>(value: &'a str, name: &str) -> Option<&'a str> {
    let params = match value.rfind('>') {
        Some(index) => &value[index + 1..],
        None => value,
    };
    params.split(';').skip(1).find_map(|param| {
        let (key, val) = param.split_once('=').unwrap_or((param, ""));
        if key.trim().eq_ignore_ascii_case(name) {
            Some(val.trim().trim_matches('"'))
        } else {
            None
        }
    })
}

/// User part of a SIP URI or name-addr, `None` when there is no `@`.
pub fn uri_user(value: &str) -> Option<&str> {
    let value = value.trim();
    let uri = match (value.find('<'), value.find('>')) {
        (Some(open), Some(close)) if open < close => &value[open + 1..close],
        _ => value.split(';').next().unwrap_or(value),
    };
    let uri = uri
        .strip_prefix("sips:")
        .or_else(|| uri.strip_prefix("sip:"))
        .unwrap_or(uri);
    let (user, _) = uri.split_once('@')?;
    let user = user.split(';').next().unwrap_or(user);
    if user.is_empty() {
        None
    } else {
        Some(user)
    }
}

/// `branch` parameter of the topmost Via
pub fn via_branch(headers: &Headers) -> Option<&str> {
    headers
        .iter()
        .find_map(|header| match header {
            Header::Via(via) => Some(via.value()),
            _ => None,
        })
        .and_then(|via| header_param(via, "branch"))
}

pub fn call_id(headers: &Headers) -> Option<&str> {
    headers.iter().find_map(|header| match header {
        Header::CallId(call_id) => Some(call_id.value().trim()),
        _ => None,
    })
}

/// Sequence number of the CSeq header
pub fn cseq(headers: &Headers) -> Option<u32> {
    headers.iter().find_map(|header| match header {
        Header::CSeq(cseq) => cseq.value().split_whitespace().next()?.parse().ok(),
        _ => None,
    })
}

/// Numeric Expires header
pub fn expires(headers: &Headers) -> Option<u32> {
    headers.iter().find_map(|header| match header {
        Header::Expires(expires) => expires.value().trim().parse().ok(),
        _ => None,
    })
}

/// `expires` parameter of the first Contact
pub fn contact_expires(headers: &Headers) -> Option<u32> {
    headers.iter().find_map(|header| match header {
        Header::Contact(contact) => header_param(contact.value(), "expires")?.parse().ok(),
        _ => None,
    })
}

/// Tag of the To header
pub fn to_tag(headers: &Headers) -> Option<&str> {
    headers.iter().find_map(|header| match header {
        Header::To(to) => header_param(to.value(), "tag").filter(|tag| !tag.is_empty()),
        _ => None,
    })
}

/// Reason phrase of a status code, without the number
pub fn reason_phrase(status: &StatusCode) -> String {
    let text = status.to_string();
    match text.split_once(' ') {
        Some((_, reason)) => reason.trim().to_string(),
        None => String::new(),
    }
}

/// Build a response that copies Via, From, To, Call-ID and CSeq.
pub fn response_to(request: &Request, status: StatusCode) -> Response {
    let mut headers = Headers::default();
    for header in request.headers.iter() {
        if matches!(
            header,
            Header::Via(_) | Header::From(_) | Header::To(_) | Header::CallId(_) | Header::CSeq(_)
        ) {
            headers.push(header.clone());
        }
    }
    headers.push(Header::ContentLength(headers::ContentLength::new("0")));

    Response {
        status_code: status,
        version: Version::V2,
        headers,
        body: Vec::new(),
    }
}

/// Replace any Content-Length with the real body length.
pub fn set_content_length(headers: &mut Headers, body: &[u8]) {
    headers.retain(|header| !matches!(header, Header::ContentLength(_)));
    headers.push(Header::ContentLength(headers::ContentLength::new(body.len().to_string())));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsip::Method;
    use rstest::rstest;

    const NOTIFY: &str = "NOTIFY sip:blf@192.0.2.10:5060 SIP/2.0\r\n\
v: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bKabc;rport\r\n\
f: <sip:1001@10.0.0.1>;tag=as1234\r\n\
t: <sip:blf@10.0.0.1>;tag=5678\r\n\
i: 12345@10.0.0.1\r\n\
CSeq: 102 NOTIFY\r\n\
o: dialog\r\n\
Subscription-State: active;expires=3599\r\n\
c: application/dialog-info+xml\r\n\
l: 5\r\n\
\r\n\
hello";

    fn request(raw: &str) -> Request {
        match parse_message(raw.as_bytes()).unwrap() {
            SipMessage::Request(request) => request,
            SipMessage::Response(_) => panic!("expected request"),
        }
    }

    #[test]
    fn test_parse_request_with_compact_headers() {
        let request = request(NOTIFY);
        assert_eq!(request.method, Method::Notify);
        assert_eq!(request.uri.to_string(), "sip:blf@192.0.2.10:5060");
        assert_eq!(via_branch(&request.headers), Some("z9hG4bKabc"));
        assert_eq!(call_id(&request.headers), Some("12345@10.0.0.1"));
        assert_eq!(cseq(&request.headers), Some(102));
        assert_eq!(to_tag(&request.headers), Some("5678"));
        assert_eq!(
            header_value(&request.headers, "Content-Type").as_deref(),
            Some("application/dialog-info+xml")
        );
        assert_eq!(header_value(&request.headers, "event").as_deref(), Some("dialog"));
        assert_eq!(request.body, b"hello");
    }

    #[test]
    fn test_body_framed_by_content_length() {
        let raw = "SIP/2.0 200 OK\r\nCall-ID: x\r\nContent-Length: 3\r\n\r\nabcdef";
        let SipMessage::Response(response) = parse_message(raw.as_bytes()).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(response.status_code.code(), 200);
        assert_eq!(response.body, b"abc");
    }

    #[test]
    fn test_truncated_body_is_rejected() {
        let raw = "SIP/2.0 200 OK\r\nContent-Length: 10\r\n\r\nabc";
        assert!(matches!(
            parse_message(raw.as_bytes()),
            Err(MessageError::TruncatedBody { expected: 10, actual: 3 })
        ));
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        assert!(matches!(parse_message(&[0xff, 0xfe, 0x00]), Err(MessageError::InvalidEncoding)));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(parse_message(b"garbage").is_err());
    }

    #[test]
    fn test_response_copies_dialog_headers() {
        let request = request(NOTIFY);
        let response = response_to(&request, StatusCode::OK);

        assert_eq!(via_branch(&response.headers), Some("z9hG4bKabc"));
        assert_eq!(call_id(&response.headers), Some("12345@10.0.0.1"));
        assert_eq!(cseq(&response.headers), Some(102));
        assert_eq!(to_tag(&response.headers), Some("5678"));
        assert_eq!(header_value(&response.headers, "Event"), None);

        let text = response.to_string();
        assert!(text.starts_with("SIP/2.0 200 OK\r\n"));
        assert!(text.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn test_set_content_length_replaces() {
        let mut headers = Headers::default();
        headers.push(Header::ContentLength(headers::ContentLength::new("999")));
        set_content_length(&mut headers, b"abc");
        assert_eq!(header_value(&headers, "Content-Length").as_deref(), Some("3"));
        assert_eq!(headers.iter().count(), 1);
    }

    #[test]
    fn test_reason_phrase() {
        assert_eq!(reason_phrase(&StatusCode::NotFound), "Not Found");
    }

    #[rstest]
    #[case("<sip:1001@pbx.example.com>;tag=x", Some("1001"))]
    #[case("\"Reception\" <sips:2002@pbx>", Some("2002"))]
    #[case("sip:3003@10.0.0.1;transport=udp", Some("3003"))]
    #[case("<sip:pbx.example.com>", None)]
    #[case("<sip:@pbx>", None)]
    fn test_uri_user(#[case] value: &str, #[case] expected: Option<&str>) {
        assert_eq!(uri_user(value), expected);
    }

    #[rstest]
    #[case("<sip:1001@pbx>;tag=abc", "tag", Some("abc"))]
    #[case("<sip:1001@pbx;transport=udp>;tag=abc", "transport", None)]
    #[case("SIP/2.0/UDP 1.2.3.4;rport;branch=z9hG4bK1", "branch", Some("z9hG4bK1"))]
    #[case("SIP/2.0/UDP 1.2.3.4;rport;branch=z9hG4bK1", "rport", Some(""))]
    #[case("<sip:1001@pbx>", "tag", None)]
    fn test_header_param(#[case] value: &str, #[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(header_param(value, name), expected);
    }
}
