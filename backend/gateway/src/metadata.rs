//! Investment NFT metadata decoding.
//!
//! Token URIs come in several encodings: base64 data URIs, plain data URIs,
//! `ipfs://` pointers, inline JSON and HTTP(S) URLs. [`decode_token_uri`]
//! resolves each of them to the same [`Metadata`] shape.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::errors::{GatewayError, Result};
use crate::ipfs::IpfsBridge;
use crate::units::Amount;

pub const ATTR_INVESTMENT_AMOUNT: &str = "Investment Amount";
pub const ATTR_EQUITY_PERCENTAGE: &str = "Equity Percentage";
pub const ATTR_INVESTMENT_DATE: &str = "Investment Date";

const BASE64_JSON_PREFIX: &str = "data:application/json;base64,";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub trait_type: String,
    pub value: Value,
}

impl Attribute {
    pub fn text(trait_type: &str, value: impl Into<String>) -> Self {
        Self {
            trait_type: trait_type.to_string(),
            value: Value::String(value.into()),
        }
    }

    /// The value as text; numbers are rendered as written.
    pub fn value_text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// ERC-721 style metadata. `attributes` is mandatory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
    pub attributes: Vec<Attribute>,
}

impl Metadata {
    pub fn attribute(&self, trait_type: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.trait_type == trait_type)
    }

    /// Minimal metadata rebuilt from direct contract reads.
    pub fn fallback(startup_title: &str, amount: Amount, now: DateTime<Utc>) -> Self {
        Self {
            name: format!("Investment in {startup_title}"),
            description: format!("Investment certificate for {startup_title}"),
            image: String::new(),
            attributes: vec![
                Attribute::text(ATTR_INVESTMENT_AMOUNT, format!("{} AVAX", amount.display())),
                Attribute::text(ATTR_INVESTMENT_DATE, now.timestamp().to_string()),
            ],
        }
    }
}

/// The recognised token URI encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenUri<'a> {
    /// `data:application/json;base64,<payload>`
    DataBase64(&'a str),
    /// `data:<mime>,<payload>` without base64
    DataPlain(&'a str),
    /// `ipfs://<cid>[/path]`
    Ipfs(&'a str),
    /// Inline JSON object
    Json(&'a str),
    /// `http://` or `https://` URL
    Http(&'a str),
    Unknown(&'a str),
}

impl<'a> TokenUri<'a> {
    pub fn classify(uri: &'a str) -> Self {
        let uri = uri.trim();
        if let Some(payload) = uri.strip_prefix(BASE64_JSON_PREFIX) {
            Self::DataBase64(payload)
        } else if let Some(rest) = uri.strip_prefix("data:") {
            match rest.split_once(',') {
                Some((header, payload)) if header.ends_with(";base64") => Self::DataBase64(payload),
                Some((_, payload)) => Self::DataPlain(payload),
                None => Self::Unknown(uri),
            }
        } else if let Some(path) = uri.strip_prefix("ipfs://") {
            Self::Ipfs(path.strip_prefix("ipfs/").unwrap_or(path))
        } else if uri.starts_with('{') {
            Self::Json(uri)
        } else if uri.starts_with("http://") || uri.starts_with("https://") {
            Self::Http(uri)
        } else {
            Self::Unknown(uri)
        }
    }
}

/// Resolve a token URI to its metadata.
///
/// Network lookups go through `ipfs` (read gateway for `ipfs://`, plain GET
/// for HTTP). Errors are returned rather than swallowed so the caller can fall
/// back to contract reads.
pub async fn decode_token_uri(uri: &str, ipfs: &IpfsBridge) -> Result<Metadata> {
    let text = match TokenUri::classify(uri) {
        TokenUri::DataBase64(payload) => {
            let bytes = BASE64
                .decode(payload.trim())
                .map_err(|e| GatewayError::Metadata(format!("invalid base64: {e}")))?;
            String::from_utf8(bytes)
                .map_err(|e| GatewayError::Metadata(format!("invalid utf-8: {e}")))?
        }
        TokenUri::DataPlain(payload) => payload.to_string(),
        TokenUri::Ipfs(path) => ipfs.fetch_text(&ipfs.read_url(path)).await?,
        TokenUri::Json(raw) => raw.to_string(),
        TokenUri::Http(url) => ipfs.fetch_text(url).await?,
        TokenUri::Unknown(raw) => {
            warn!("Unrecognized token URI format: {raw}");
            raw.to_string()
        }
    };

    parse_metadata(&text)
}

/// Parse metadata JSON, retrying on the outermost `{...}` span when the text
/// has junk around the object.
pub fn parse_metadata(text: &str) -> Result<Metadata> {
    match serde_json::from_str::<Metadata>(text) {
        Ok(metadata) => Ok(metadata),
        Err(first) => {
            let start = text.find('{');
            let end = text.rfind('}');
            match (start, end) {
                (Some(start), Some(end)) if start < end => {
                    serde_json::from_str::<Metadata>(&text[start..=end]).map_err(|e| {
                        GatewayError::Metadata(format!("unparseable metadata: {e}"))
                    })
                }
                _ => Err(GatewayError::Metadata(format!(
                    "unparseable metadata: {first}"
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::ipfs::{IpfsPinner, MockPinner};

    fn sample_json() -> String {
        json!({
            "name": "Investment #7",
            "description": "Certificate",
            "image": "ipfs://QmImage",
            "attributes": [
                { "trait_type": "Investment Amount", "value": "2.5 AVAX" },
                { "trait_type": "Equity Percentage", "value": "1.25%" },
                { "trait_type": "Investment Date", "value": 1704067200 }
            ]
        })
        .to_string()
    }

    #[test]
    fn classify_each_encoding() {
        assert!(matches!(
            TokenUri::classify("data:application/json;base64,e30="),
            TokenUri::DataBase64("e30=")
        ));
        assert!(matches!(
            TokenUri::classify("data:application/json;utf8,{}"),
            TokenUri::DataPlain("{}")
        ));
        assert!(matches!(
            TokenUri::classify("ipfs://ipfs/QmAbc"),
            TokenUri::Ipfs("QmAbc")
        ));
        assert!(matches!(TokenUri::classify(" {\"a\":1}"), TokenUri::Json(_)));
        assert!(matches!(
            TokenUri::classify("https://example.com/1.json"),
            TokenUri::Http(_)
        ));
        assert!(matches!(TokenUri::classify("ar://xyz"), TokenUri::Unknown(_)));
    }

    #[tokio::test]
    async fn all_encodings_decode_to_the_same_metadata() {
        let pinner = Arc::new(MockPinner::new());
        let cid = pinner
            .pin_json(&serde_json::from_str(&sample_json()).unwrap())
            .await
            .unwrap();
        pinner
            .serve("https://meta.example.com/7.json", &sample_json())
            .await;
        let ipfs = IpfsBridge::new(pinner, "https://gw.example/ipfs/", "https://ipfs.io/ipfs/");

        let uris = [
            format!("{BASE64_JSON_PREFIX}{}", BASE64.encode(sample_json())),
            format!("ipfs://{cid}"),
            sample_json(),
            "https://meta.example.com/7.json".to_string(),
        ];

        let expected = parse_metadata(&sample_json()).unwrap();
        for uri in &uris {
            let decoded = decode_token_uri(uri, &ipfs).await.unwrap();
            assert_eq!(decoded, expected, "uri: {uri}");
        }
        assert_eq!(expected.name, "Investment #7");
        assert_eq!(
            expected.attribute(ATTR_INVESTMENT_DATE).unwrap().value_text(),
            "1704067200"
        );
    }

    #[tokio::test]
    async fn unknown_scheme_does_not_panic() {
        let ipfs = IpfsBridge::new(Arc::new(MockPinner::new()), "https://gw/", "https://gw/");
        let result = decode_token_uri("ar://not-supported", &ipfs).await;
        assert!(matches!(result, Err(GatewayError::Metadata(_))));
    }

    #[test]
    fn json_is_extracted_from_surrounding_noise() {
        let noisy = format!("garbage before {} trailing", sample_json());
        let metadata = parse_metadata(&noisy).unwrap();
        assert_eq!(metadata.attributes.len(), 3);
    }

    #[test]
    fn missing_attributes_is_an_error() {
        let err = parse_metadata(r#"{"name":"no attrs"}"#).unwrap_err();
        assert!(matches!(err, GatewayError::Metadata(_)));
    }

    #[test]
    fn fallback_metadata_carries_amount() {
        let now = DateTime::from_timestamp(1_704_067_200, 0).unwrap();
        let amount = Amount(alloy_primitives::U256::from(3_000_000_000_000_000_000u128));
        let metadata = Metadata::fallback("Acme", amount, now);
        assert_eq!(metadata.name, "Investment in Acme");
        assert_eq!(
            metadata.attribute(ATTR_INVESTMENT_AMOUNT).unwrap().value_text(),
            "3.0 AVAX"
        );
        assert_eq!(
            metadata.attribute(ATTR_INVESTMENT_DATE).unwrap().value_text(),
            "1704067200"
        );
    }
}
