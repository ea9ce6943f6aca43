use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use time::{OffsetDateTime, format_description::FormatItem, macros::format_description};

use crate::{PortraitError, Result};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HMAC-SHA256";
const SCOPE_TERMINATOR: &str = "request";
const SIGNED_HEADERS: &str = "content-type;host;x-content-sha256;x-date";
const CONTENT_TYPE: &str = "application/json";

/// `X-Date` value plus the 8-char short date used in the credential scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignTimestamp {
    pub x_date: String,
    pub short_date: String,
}

impl SignTimestamp {
    pub fn now() -> Result<Self> {
        Self::from_datetime(OffsetDateTime::now_utc())
    }

    pub fn from_datetime(datetime: OffsetDateTime) -> Result<Self> {
        const X_DATE_FORMAT: &[FormatItem<'_>] =
            format_description!("[year][month][day]T[hour][minute][second]Z");

        let datetime = datetime.to_offset(time::UtcOffset::UTC);
        let x_date = datetime.format(X_DATE_FORMAT).map_err(|err| {
            PortraitError::Protocol(format!("failed to format x-date: {err}"))
        })?;
        Self::from_x_date(&x_date)
    }

    pub fn from_x_date(x_date: &str) -> Result<Self> {
        let x_date = x_date.trim();
        if x_date.len() != 16 || !x_date.is_ascii() {
            return Err(PortraitError::InvalidInput(format!(
                "x-date must look like YYYYMMDDTHHMMSSZ, got {x_date:?}"
            )));
        }
        Ok(Self {
            x_date: x_date.to_string(),
            short_date: x_date[..8].to_string(),
        })
    }
}

/// Long-lived access/secret key pair. `Debug` never prints either key.
#[derive(Clone)]
pub struct VolcCredentials {
    access_key: String,
    secret_key: String,
}

impl std::fmt::Debug for VolcCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolcCredentials")
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl VolcCredentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Result<Self> {
        let access_key = access_key.into();
        let secret_key = secret_key.into();
        if access_key.trim().is_empty() || secret_key.trim().is_empty() {
            return Err(PortraitError::missing_config("Jimeng"));
        }
        Ok(Self {
            access_key,
            secret_key,
        })
    }
}

/// Signs request bodies for the `HMAC-SHA256` canonical-request scheme used
/// by the visual generation API. Stateless apart from its fixed scope.
#[derive(Debug, Clone)]
pub struct VolcSigner {
    credentials: VolcCredentials,
    host: String,
    region: String,
    service: String,
}

impl VolcSigner {
    pub fn new(
        credentials: VolcCredentials,
        host: impl Into<String>,
        region: impl Into<String>,
        service: impl Into<String>,
    ) -> Result<Self> {
        let host = host.into();
        let region = region.into();
        let service = service.into();

        for (label, value) in [("host", &host), ("region", &region), ("service", &service)] {
            if value.trim().is_empty() {
                return Err(PortraitError::Config(format!(
                    "Missing Jimeng config ({label} is empty)"
                )));
            }
        }

        Ok(Self {
            credentials,
            host,
            region,
            service,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn sign_now(&self, body: &str, query: &BTreeMap<String, String>) -> Result<SignedEnvelope> {
        self.sign("POST", body, query, SignTimestamp::now()?)
    }

    pub fn sign(
        &self,
        method: &str,
        body: &str,
        query: &BTreeMap<String, String>,
        timestamp: SignTimestamp,
    ) -> Result<SignedEnvelope> {
        let payload_hash = sha256_hex(body.as_bytes());
        let canonical_headers = format!(
            "content-type:{CONTENT_TYPE}\nhost:{}\nx-content-sha256:{}\nx-date:{}\n",
            self.host, payload_hash, timestamp.x_date
        );
        let canonical_request = format!(
            "{}\n/\n{}\n{}\n{}\n{}",
            method.trim().to_ascii_uppercase(),
            canonical_query(query),
            canonical_headers,
            SIGNED_HEADERS,
            payload_hash
        );

        let scope = format!(
            "{}/{}/{}/{SCOPE_TERMINATOR}",
            timestamp.short_date, self.region, self.service
        );
        let string_to_sign = format!(
            "{ALGORITHM}\n{}\n{}\n{}",
            timestamp.x_date,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let signing_key = self.signing_key(&timestamp.short_date)?;
        let signature = hex_encode(&hmac_sha256(&signing_key, string_to_sign.as_bytes())?);
        let authorization = format!(
            "{ALGORITHM} Credential={}/{}, SignedHeaders={}, Signature={}",
            self.credentials.access_key, scope, SIGNED_HEADERS, signature
        );

        Ok(SignedEnvelope {
            authorization,
            x_date: timestamp.x_date,
            payload_hash,
            signature,
            canonical_request,
            string_to_sign,
        })
    }

    fn signing_key(&self, short_date: &str) -> Result<Vec<u8>> {
        let k_date = hmac_sha256(self.credentials.secret_key.as_bytes(), short_date.as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, self.service.as_bytes())?;
        hmac_sha256(&k_service, SCOPE_TERMINATOR.as_bytes())
    }
}

/// Headers for one outbound call. Computed fresh per request: the signed
/// timestamp is embedded, so an envelope must not be reused.
#[derive(Debug, Clone)]
pub struct SignedEnvelope {
    pub authorization: String,
    pub x_date: String,
    pub payload_hash: String,
    pub signature: String,
    pub canonical_request: String,
    pub string_to_sign: String,
}

impl SignedEnvelope {
    pub fn apply(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("content-type", CONTENT_TYPE)
            .header("x-date", &self.x_date)
            .header("x-content-sha256", &self.payload_hash)
            .header("authorization", &self.authorization)
    }

    pub fn canonical_request_hash(&self) -> String {
        sha256_hex(self.canonical_request.as_bytes())
    }

    pub fn string_to_sign_hash(&self) -> String {
        sha256_hex(self.string_to_sign.as_bytes())
    }
}

/// Query parameters sorted by key, RFC 3986 encoded, joined as `k=v&k=v`.
pub fn canonical_query(query: &BTreeMap<String, String>) -> String {
    query
        .iter()
        .map(|(name, value)| format!("{}={}", encode_rfc3986(name), encode_rfc3986(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encodes everything outside `A-Z a-z 0-9 - _ . ~` with uppercase hex.
pub fn encode_rfc3986(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for &byte in value.as_bytes() {
        let is_unreserved =
            matches!(byte, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~');
        if is_unreserved {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push(UPPER_HEX[(byte >> 4) as usize] as char);
            out.push(UPPER_HEX[(byte & 0x0f) as usize] as char);
        }
    }
    out
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|err| PortraitError::Config(format!("invalid hmac key: {err}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

const LOWER_HEX: &[u8; 16] = b"0123456789abcdef";
const UPPER_HEX: &[u8; 16] = b"0123456789ABCDEF";

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        out.push(LOWER_HEX[(byte >> 4) as usize] as char);
        out.push(LOWER_HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
