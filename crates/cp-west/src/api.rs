//! west.cn domain API: DNS record add / list / delete.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{WestError, WestResult};

pub const DEFAULT_API_BASE: &str = "https://api.west.cn/api/v2";
pub const CHALLENGE_TTL: u32 = 60;
pub const CHALLENGE_LEVEL: u32 = 10;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Envelope shared by every API answer
#[derive(Debug, Deserialize)]
struct WestResponse {
    #[serde(default)]
    result: i64,
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AddedRecord {
    #[serde(deserialize_with = "int_or_string")]
    id: i64,
}

/// DNS record as returned by the list endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct WestRecord {
    #[serde(deserialize_with = "int_or_string")]
    pub id: i64,
    /// Host part relative to the domain
    #[serde(default)]
    pub item: String,
    #[serde(default)]
    pub value: String,
    #[serde(rename = "type", default)]
    pub record_type: String,
}

/// Record ids come back as numbers or numeric strings depending on the endpoint
fn int_or_string<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Int(i64),
        Str(String),
    }
    match Id::deserialize(deserializer)? {
        Id::Int(i) => Ok(i),
        Id::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Authenticated client for the registrar API
pub struct WestClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl WestClient {
    pub fn new(base_url: &str, username: &str, password: &str) -> WestResult<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Add a TXT record, returning the registrar record id
    pub async fn add_txt_record(&self, domain: &str, host: &str, value: &str) -> WestResult<i64> {
        debug!(domain, host, "Adding TXT record");
        let data: AddedRecord = self
            .call(
                "adddnsrecord",
                vec![
                    ("domain", domain.to_string()),
                    ("host", host.to_string()),
                    ("type", "TXT".to_string()),
                    ("value", value.to_string()),
                    ("ttl", CHALLENGE_TTL.to_string()),
                    ("level", CHALLENGE_LEVEL.to_string()),
                ],
            )
            .await?
            .ok_or(WestError::MissingData("adddnsrecord"))?;

        info!(domain, host, record_id = data.id, "Created challenge TXT record");
        Ok(data.id)
    }

    /// List the records of a domain
    pub async fn list_records(&self, domain: &str, limit: u32) -> WestResult<Vec<WestRecord>> {
        let records: Option<Vec<WestRecord>> = self
            .call(
                "getdnsrecord",
                vec![("domain", domain.to_string()), ("limit", limit.to_string())],
            )
            .await?;
        Ok(records.unwrap_or_default())
    }

    pub async fn delete_record(&self, domain: &str, id: i64) -> WestResult<()> {
        debug!(domain, record_id = id, "Deleting TXT record");
        self.call::<serde_json::Value>("deldnsrecord", vec![("domain", domain.to_string()), ("id", id.to_string())])
            .await?;
        info!(domain, record_id = id, "Deleted challenge TXT record");
        Ok(())
    }

    /// POST a form to `?act=<act>` with auth fields; returns `data` decoded as `T`
    async fn call<T: DeserializeOwned>(
        &self,
        act: &str,
        mut form: Vec<(&'static str, String)>,
    ) -> WestResult<Option<T>> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default()
            .to_string();
        form.push(("token", auth_token(&self.username, &self.password, &timestamp)));
        form.push(("username", self.username.clone()));
        form.push(("time", timestamp));

        let url = format!("{}/domain/?act={}", self.base_url, act);
        let resp = self.http.post(&url).form(&form).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;

        let body = decode_gbk(&bytes);
        let envelope: WestResponse = serde_json::from_str(&body).map_err(|e| {
            warn!(act, status = %status, "Unparseable registrar response");
            WestError::Json(e)
        })?;

        if envelope.result != 200 {
            return Err(WestError::Api {
                errcode: envelope.errcode,
                msg: envelope.msg,
            });
        }

        match envelope.data {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }
}

/// md5 hex of username + password + timestamp
pub fn auth_token(username: &str, password: &str, timestamp: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(username.as_bytes());
    hasher.update(password.as_bytes());
    hasher.update(timestamp.as_bytes());
    hex::encode(hasher.finalize())
}

/// Registrar answers are GBK; ASCII passes through unchanged
pub fn decode_gbk(bytes: &[u8]) -> String {
    let (text, had_errors) = encoding_rs::GBK.decode_without_bom_handling(bytes);
    if had_errors {
        debug!("Registrar response contained invalid GBK sequences");
    }
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_token() {
        let token = auth_token("user", "pass", "1700000000000");
        assert_eq!(token.len(), 32);
        assert_eq!(token, auth_token("user", "pass", "1700000000000"));
        assert_ne!(token, auth_token("user", "pass", "1700000000001"));
        assert_eq!(auth_token("", "", ""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_decode_gbk() {
        let (encoded, _, _) = encoding_rs::GBK.encode("{\"msg\":\"记录已存在\"}");
        assert_eq!(decode_gbk(&encoded), "{\"msg\":\"记录已存在\"}");
        assert_eq!(decode_gbk(b"{\"result\":200}"), "{\"result\":200}");
    }

    #[test]
    fn test_record_ids_accept_strings() {
        let rec: WestRecord =
            serde_json::from_str(r#"{"id":"42","item":"_acme-challenge","value":"v","type":"TXT"}"#).unwrap();
        assert_eq!(rec.id, 42);
        assert_eq!(rec.record_type, "TXT");
        let added: AddedRecord = serde_json::from_str(r#"{"id":7}"#).unwrap();
        assert_eq!(added.id, 7);
    }
}
