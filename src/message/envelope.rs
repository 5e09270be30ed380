// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! JSON envelope carried by the topic in json mode.
//!
//! Each payload describes one captured HTTP request. [`HttpEnvelope::dump`]
//! renders it into the replay record layout:
//!
//! ```text
//! <type> <id> <timestamp>\n
//! <method> <url> HTTP/1.1\r\n
//! <header>: <value>\r\n
//! \r\n
//! <body>
//! ```

use std::collections::BTreeMap;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::AppResult;

const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpEnvelope {
    #[serde(rename = "Req_URL")]
    pub url: String,
    #[serde(rename = "Req_Type")]
    pub kind: String,
    #[serde(rename = "Req_ID")]
    pub id: String,
    #[serde(rename = "Req_Ts")]
    pub timestamp: String,
    #[serde(rename = "Req_Method")]
    pub method: String,
    #[serde(rename = "Req_Body", skip_serializing_if = "String::is_empty")]
    pub body: String,
    /// sorted, so the rendered header block is deterministic
    #[serde(rename = "Req_Headers", skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl HttpEnvelope {
    /// Decodes one payload. Nothing is rendered unless the whole document
    /// parses.
    pub fn from_json(payload: &[u8]) -> AppResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn to_json(&self) -> AppResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn dump(&self) -> Vec<u8> {
        let header_len: usize = self
            .headers
            .iter()
            .map(|(name, value)| name.len() + value.len() + 4)
            .sum();
        let mut buf = BytesMut::with_capacity(
            self.kind.len()
                + self.id.len()
                + self.timestamp.len()
                + self.method.len()
                + self.url.len()
                + header_len
                + self.body.len()
                + 32,
        );

        buf.put_slice(format!("{} {} {}\n", self.kind, self.id, self.timestamp).as_bytes());
        buf.put_slice(format!("{} {} HTTP/1.1", self.method, self.url).as_bytes());
        buf.put_slice(CRLF);
        for (name, value) in &self.headers {
            buf.put_slice(format!("{name}: {value}").as_bytes());
            buf.put_slice(CRLF);
        }
        buf.put_slice(CRLF);
        buf.put_slice(self.body.as_bytes());

        buf.to_vec()
    }

    /// Decode then render, the transformation applied by json mode.
    pub fn render(payload: &[u8]) -> AppResult<Vec<u8>> {
        Ok(Self::from_json(payload)?.dump())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::AppError;

    #[test]
    fn test_dump_layout() {
        let payload = br#"{
            "Req_URL": "/api/v1/users?id=7",
            "Req_Type": "1",
            "Req_ID": "2eb7f1b8",
            "Req_Ts": "1539090462153209855",
            "Req_Method": "POST",
            "Req_Body": "name=alpha",
            "Req_Headers": {"User-Agent": "curl/7.61", "Content-Type": "text/plain"}
        }"#;

        let rendered = HttpEnvelope::render(payload).unwrap();
        let expected = "1 2eb7f1b8 1539090462153209855\n\
                        POST /api/v1/users?id=7 HTTP/1.1\r\n\
                        Content-Type: text/plain\r\n\
                        User-Agent: curl/7.61\r\n\
                        \r\n\
                        name=alpha";
        assert_eq!(String::from_utf8(rendered).unwrap(), expected);
    }

    #[test]
    fn test_dump_without_headers_or_body() {
        let envelope = HttpEnvelope {
            url: "/".to_string(),
            kind: "1".to_string(),
            id: "a".to_string(),
            timestamp: "1".to_string(),
            method: "GET".to_string(),
            ..Default::default()
        };
        assert_eq!(envelope.dump(), b"1 a 1\nGET / HTTP/1.1\r\n\r\n".to_vec());
    }

    #[test]
    fn test_to_json_skips_empty_optionals() {
        let envelope = HttpEnvelope {
            url: "/".to_string(),
            method: "GET".to_string(),
            ..Default::default()
        };
        let json = String::from_utf8(envelope.to_json().unwrap()).unwrap();
        assert!(!json.contains("Req_Body"));
        assert!(!json.contains("Req_Headers"));
        assert_eq!(HttpEnvelope::from_json(json.as_bytes()).unwrap(), envelope);
    }

    #[rstest]
    #[case(b"not json".as_slice())]
    #[case(b"{\"Req_URL\": ".as_slice())]
    #[case(b"[1, 2, 3]".as_slice())]
    #[case(b"{\"Req_Headers\": \"oops\"}".as_slice())]
    #[case(b"".as_slice())]
    fn test_malformed_payload_is_rejected(#[case] payload: &[u8]) {
        let result = HttpEnvelope::render(payload);
        assert!(matches!(result, Err(AppError::Decode(_))));
    }
}
