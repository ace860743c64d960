//! Vendor cloud session client
//!
//! One authenticated session against the smart-lock backend: login,
//! device listing and the generic miot-spec RPC envelope. The session is
//! a single concrete type configured by [`CloudConfig`]; it keeps a
//! stable client fingerprint for its whole lifetime and an HTTP client
//! with a bounded timeout.

use crate::auth::StoredAuth;
use crate::cache::DeviceSource;
use crate::config::CloudConfig;
use crate::device::DeviceRecord;
use crate::error::{CloudError, CloudResult};
use async_trait::async_trait;
use md5::{Digest, Md5};
use rand::Rng;
use rand::distributions::Alphanumeric;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;

/// Login endpoint path
const LOGIN_PATH: &str = "speaker/oauth2/loginPassword";
/// Device-list endpoint path
const DEVICE_LIST_PATH: &str = "speaker/device/getUserDevice";
/// Application id the backend expects on every request
const APP_ID: &str = "c2a51810216243f69a55571973f1b5d7";
/// SDK version reported in the session cookie
const SDK_VERSION: &str = "3.8.6";
/// Sentinel some responses prepend to the JSON body
const SENTINEL: &str = "&&&START&&&";
/// Country code the login endpoint expects
const COUNTRY_CODE: u32 = 86;
/// Consecutive login failures tolerated before the session is reset
const MAX_FAILED_LOGINS: u32 = 10;

/// Stable per-session client identity
///
/// Generated once at session construction and sent with every request so
/// the backend sees one consistent client for the session's lifetime.
#[derive(Debug, Clone)]
pub struct ClientFingerprint {
    /// Random device identifier reported in the `deviceId` cookie
    pub device_id: String,
    pub useragent: String,
    pub locale: String,
    /// Local UTC offset in the backend's `GMT+HH:MM` form
    pub timezone: String,
}

impl ClientFingerprint {
    pub fn generate() -> Self {
        let agent_id = random_agent_id();
        Self {
            device_id: random_device_id(),
            useragent: format!(
                "Android-7.1.1-1.0.0-ONEPLUS A3010-136-{} APP/xiaomi.smarthome APPV/62830",
                agent_id
            ),
            locale: system_locale(),
            timezone: local_timezone(),
        }
    }
}

fn random_agent_id() -> String {
    let mut rng = rand::thread_rng();
    (0..13).map(|_| rng.gen_range(b'A'..=b'Z') as char).collect()
}

fn random_device_id() -> String {
    let mut rng = rand::thread_rng();
    (0..6).map(|_| rng.sample(Alphanumeric) as char).collect()
}

fn system_locale() -> String {
    std::env::var("LANG")
        .ok()
        .and_then(|l| l.split('.').next().map(str::to_owned))
        .filter(|l| !l.is_empty() && l != "C")
        .unwrap_or_else(|| "en_US".to_string())
}

fn local_timezone() -> String {
    let offset = chrono::Local::now().offset().local_minus_utc();
    let sign = if offset < 0 { '-' } else { '+' };
    let minutes = offset.abs() / 60;
    format!("GMT{}{:02}:{:02}", sign, minutes / 60, minutes % 60)
}

/// Reference to one miot-spec property
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct PropertyRef {
    pub siid: i64,
    pub piid: i64,
}

/// Authenticated session to the vendor smart-lock cloud
#[derive(Debug)]
pub struct CloudSession {
    config: CloudConfig,
    http: Client,
    fingerprint: ClientFingerprint,
    user_id: Option<String>,
    service_token: Option<String>,
    security_key: Option<String>,
    failed_logins: u32,
}

impl CloudSession {
    /// Create a new session from configuration
    ///
    /// Fails with [`CloudError::CredentialsInvalid`] when the username or
    /// password is empty; everything else is deferred to `login`.
    pub fn new(config: CloudConfig) -> CloudResult<Self> {
        if config.username.is_empty() || config.password.is_empty() {
            return Err(CloudError::CredentialsInvalid(
                "username or password can't be empty".to_string(),
            ));
        }
        let fingerprint = ClientFingerprint::generate();
        let http = build_http_client(&fingerprint, config.timeout);
        Ok(Self {
            config,
            http,
            fingerprint,
            user_id: None,
            service_token: None,
            security_key: None,
            failed_logins: 0,
        })
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    pub fn fingerprint(&self) -> &ClientFingerprint {
        &self.fingerprint
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Return the service token after a successful login
    pub fn service_token(&self) -> Option<&str> {
        self.service_token.as_deref()
    }

    pub fn security_key(&self) -> Option<&str> {
        self.security_key.as_deref()
    }

    pub fn failed_logins(&self) -> u32 {
        self.failed_logins
    }

    pub fn is_logged_in(&self) -> bool {
        self.user_id.is_some() && self.service_token.is_some()
    }

    /// Identity key for persisted records: user_id once known, else username
    pub fn identity(&self) -> &str {
        self.user_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.config.username)
    }

    /// Restore identity and tokens from a stored auth record
    ///
    /// No network call. Empty stored fields leave the session untouched.
    pub fn restore(&mut self, auth: &StoredAuth) {
        if !auth.user_id.is_empty() {
            self.user_id = Some(auth.user_id.clone());
        }
        if !auth.service_token.is_empty() {
            self.service_token = Some(auth.service_token.clone());
        }
        if !auth.security_key.is_empty() {
            self.security_key = Some(auth.security_key.clone());
        }
    }

    /// Export the persistable view of this session
    ///
    /// The password never appears here; `AuthStorage::save` decides the
    /// final `update_at`.
    pub fn to_stored(&self) -> StoredAuth {
        StoredAuth::new(
            &self.config.username,
            &self.config.server_region,
            self.user_id.clone().unwrap_or_default(),
            self.service_token.clone().unwrap_or_default(),
            self.security_key.clone().unwrap_or_default(),
        )
    }

    /// Log in to the vendor cloud
    ///
    /// No-op success when a user id and token are already held. Transient
    /// failures are reported as `Ok(false)` and counted; more than
    /// [`MAX_FAILED_LOGINS`] consecutive failures reset the session
    /// state. A backend rejection is raised as `AccessDenied`.
    pub async fn login(&mut self) -> CloudResult<bool> {
        if self.is_logged_in() {
            return Ok(true);
        }
        tracing::debug!(username = %self.config.username, "logging in to lock cloud");
        match self.perform_login().await {
            Ok(()) => {
                self.failed_logins = 0;
                Ok(true)
            }
            Err(CloudError::AccessDenied(msg)) => {
                self.note_login_failure();
                tracing::info!(
                    attempts = self.failed_logins,
                    "access denied logging in to lock cloud: {msg}"
                );
                self.reset_if_exhausted();
                Err(CloudError::AccessDenied(msg))
            }
            Err(err) => {
                self.note_login_failure();
                tracing::info!(
                    attempts = self.failed_logins,
                    "error logging in to lock cloud: {err}"
                );
                self.reset_if_exhausted();
                Ok(false)
            }
        }
    }

    fn note_login_failure(&mut self) {
        self.failed_logins += 1;
        self.service_token = None;
    }

    fn reset_if_exhausted(&mut self) {
        if self.failed_logins > MAX_FAILED_LOGINS {
            tracing::info!("repeated login errors, resetting session state");
            self.reset_session();
        }
    }

    /// Drop identity, tokens and cookies; keep the client fingerprint
    fn reset_session(&mut self) {
        self.user_id = None;
        self.service_token = None;
        self.security_key = None;
        self.failed_logins = 0;
        self.http = build_http_client(&self.fingerprint, self.config.timeout);
    }

    async fn perform_login(&mut self) -> CloudResult<()> {
        let url = self.endpoint(LOGIN_PATH);
        let body = json!({
            "countrycode": COUNTRY_CODE,
            "phone": self.config.username,
            "password": md5_hex(&self.config.password),
        });
        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if status != StatusCode::OK {
            tracing::warn!(status = %status, body = %text, "login request rejected");
            return Err(CloudError::AccessDenied(
                "Access denied. Did you set the correct username/password?".to_string(),
            ));
        }
        let payload = parse_payload(&text)?;
        let data = payload
            .get("data")
            .filter(|d| d.is_object())
            .ok_or_else(|| CloudError::Transient("login response missing data".to_string()))?;
        let user_id = json_text(data.get("id"));
        if user_id.is_empty() {
            return Err(CloudError::Transient(
                "login response missing user id".to_string(),
            ));
        }
        self.user_id = Some(user_id);
        let token = json_text(data.get("token"));
        if !token.is_empty() {
            self.service_token = Some(token);
        }
        let key = json_text(data.get("ssecurity"));
        if !key.is_empty() {
            self.security_key = Some(key);
        }
        Ok(())
    }

    /// Probe the backend without touching session state
    ///
    /// 403 means the credentials are wrong; anything else non-200 is a
    /// backend problem, not a credential problem.
    pub async fn check_access(&self) -> CloudResult<bool> {
        let url = self.endpoint(LOGIN_PATH);
        let body = json!({
            "countrycode": COUNTRY_CODE,
            "phone": self.config.username,
            "password": md5_hex(&self.config.password),
        });
        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        match status {
            StatusCode::OK => Ok(true),
            StatusCode::FORBIDDEN => Err(CloudError::AccessDenied(
                "Access denied. Did you set the correct username/password?".to_string(),
            )),
            _ => {
                let text = response.text().await?;
                tracing::warn!(status = %status, body = %text, "unexpected probe response");
                Err(CloudError::Transient(format!(
                    "login to lock cloud error: {} ({})",
                    text, status
                )))
            }
        }
    }

    /// Fetch the raw device list
    ///
    /// A non-200 response is an access problem, distinct from network or
    /// decode failures.
    pub async fn get_devices(&self) -> CloudResult<Vec<DeviceRecord>> {
        let url = self.endpoint(DEVICE_LIST_PATH);
        let body = json!({
            "token": self.service_token.as_deref().unwrap_or_default(),
            "userId": self.user_id.as_deref().unwrap_or_default(),
            "platform": "HomeAssistant",
        });
        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if status != StatusCode::OK {
            tracing::warn!(
                username = %self.config.username,
                status = %status,
                "device list request failed"
            );
            return Err(CloudError::AccessDenied(format!(
                "device list rejected with status {status}"
            )));
        }
        let payload = parse_payload(&text)?;
        let data = payload.get("data").cloned().unwrap_or(Value::Null);
        let devices: Vec<DeviceRecord> = serde_json::from_value(data)?;
        Ok(devices)
    }

    // ========== miot-spec RPC ==========

    /// POST an RPC payload to `{base_url}/{api_path}`
    ///
    /// Returns the decoded JSON object, or `None` when the backend
    /// answers non-200 (logged, not raised).
    pub async fn request_api(&self, api_path: &str, payload: &Value) -> CloudResult<Option<Value>> {
        let url = self.endpoint(api_path);
        let response = self.http.post(&url).json(payload).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if status != StatusCode::OK {
            tracing::warn!(api = api_path, status = %status, "rpc request failed");
            return Ok(None);
        }
        Ok(Some(parse_payload(&text)?))
    }

    /// Generic miot-spec call, returning the `result` field when present
    pub async fn request(&self, api: &str, params: Value) -> CloudResult<Option<Value>> {
        let params = if params.is_null() { json!([]) } else { params };
        let payload = json!({ "params": params });
        let rdt = self
            .request_api(&format!("miotspec/{}", api), &payload)
            .await?;
        Ok(rdt.as_ref().and_then(|v| v.get("result")).cloned())
    }

    pub async fn get_props(&self, params: Value) -> CloudResult<Option<Value>> {
        self.request("prop/get", params).await
    }

    pub async fn set_props(&self, params: Value) -> CloudResult<Option<Value>> {
        self.request("prop/set", params).await
    }

    pub async fn do_action(&self, params: Value) -> CloudResult<Option<Value>> {
        self.request("action", params).await
    }

    /// Read one property value
    pub async fn get_prop(&self, did: &str, siid: i64, piid: i64) -> CloudResult<Option<Value>> {
        let rls = self
            .get_props(json!([{ "did": did, "siid": siid, "piid": piid }]))
            .await?;
        Ok(rls
            .as_ref()
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .and_then(|r| r.get("value"))
            .cloned())
    }

    /// Write one property value
    pub async fn set_prop(
        &self,
        did: &str,
        siid: i64,
        piid: i64,
        value: Value,
    ) -> CloudResult<Option<Value>> {
        self.set_props(json!([{ "did": did, "siid": siid, "piid": piid, "value": value }]))
            .await
    }

    /// Read the properties named by an entity mapping
    ///
    /// Each result's `did` is rewritten to the mapping key so callers can
    /// relate values back to their own property names.
    pub async fn get_properties_for_mapping(
        &self,
        did: &str,
        mapping: &HashMap<String, PropertyRef>,
    ) -> CloudResult<Option<Vec<Value>>> {
        let mut pms = Vec::new();
        let mut rmp = HashMap::new();
        for (key, prop) in mapping {
            pms.push(json!({ "did": did, "siid": prop.siid, "piid": prop.piid }));
            rmp.insert(format!("prop.{}.{}", prop.siid, prop.piid), key.clone());
        }
        let Some(rls) = self.get_props(Value::Array(pms)).await? else {
            return Ok(None);
        };
        let Some(items) = rls.as_array().filter(|a| !a.is_empty()) else {
            return Ok(None);
        };
        let mut dls = Vec::new();
        for item in items {
            let siid = item.get("siid").and_then(Value::as_i64);
            let piid = item.get("piid").and_then(Value::as_i64);
            let key = match (siid, piid) {
                (Some(s), Some(p)) => rmp.get(&format!("prop.{}.{}", s, p)),
                _ => None,
            };
            let Some(key) = key else { continue };
            let mut item = item.clone();
            if let Some(obj) = item.as_object_mut() {
                obj.insert("did".to_string(), Value::String(key.clone()));
            }
            dls.push(item);
        }
        Ok(Some(dls))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl DeviceSource for CloudSession {
    fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref().filter(|id| !id.is_empty())
    }

    async fn fetch_devices(&self) -> CloudResult<Vec<DeviceRecord>> {
        self.get_devices().await
    }
}

fn build_http_client(fingerprint: &ClientFingerprint, timeout: u64) -> Client {
    let mut headers = HeaderMap::new();
    headers.insert("appid", HeaderValue::from_static(APP_ID));
    headers.insert("platform", HeaderValue::from_static("hass"));
    if let Ok(locale) = HeaderValue::from_str(&fingerprint.locale) {
        headers.insert("locale", locale);
    }
    if let Ok(timezone) = HeaderValue::from_str(&fingerprint.timezone) {
        headers.insert("timezone", timezone);
    }
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&fingerprint.useragent).expect("useragent is ASCII"),
    );
    headers.insert(
        COOKIE,
        HeaderValue::from_str(&format!(
            "sdkVersion={}; deviceId={}",
            SDK_VERSION, fingerprint.device_id
        ))
        .expect("cookie is ASCII"),
    );
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .default_headers(headers)
        .cookie_store(true)
        .build()
        .expect("Failed to build HTTP client")
}

/// Strip the vendor sentinel and decode the JSON body
fn parse_payload(text: &str) -> CloudResult<Value> {
    let cleaned = text.replace(SENTINEL, "");
    Ok(serde_json::from_str(cleaned.trim())?)
}

/// Render a JSON scalar as text; the backend is loose about id types
fn json_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
