//! Roster collaborator: the clan's member sheet in Google Sheets.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::SheetsConfig;
use crate::error::{CollaboratorError, ConfigError};
use crate::promotion::{name_key, RosterMember};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const TOKEN_LIFETIME_SECS: u64 = 3600;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Column letters for each logical roster field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterColumns {
    pub name: String,
    pub external_id: String,
    pub rank: String,
    pub counter: String,
    pub enrolled: String,
}

impl Default for RosterColumns {
    fn default() -> Self {
        Self {
            name: "A".to_string(),
            external_id: "B".to_string(),
            rank: "C".to_string(),
            counter: "D".to_string(),
            enrolled: "E".to_string(),
        }
    }
}

impl RosterColumns {
    fn all(&self) -> [(&'static str, &str); 5] {
        [
            ("MEMBER_NAME_COLUMN", &self.name),
            ("DISCORD_ID_COLUMN", &self.external_id),
            ("RANK_COLUMN", &self.rank),
            ("CAREER_COUNTER_COLUMN", &self.counter),
            ("ADDED_DATE_COLUMN", &self.enrolled),
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, letters) in self.all() {
            if column_index(letters).is_none() {
                return Err(ConfigError::Invalid {
                    name: name.to_string(),
                    reason: format!("'{letters}' is not a column letter"),
                });
            }
        }
        Ok(())
    }

    /// Right-most configured column, for sizing the read range.
    fn last_column(&self) -> &str {
        self.all()
            .into_iter()
            .max_by_key(|(_, letters)| column_index(letters).unwrap_or(0))
            .map(|(_, letters)| letters)
            .unwrap_or("Z")
    }
}

/// `A` → 0, `Z` → 25, `AA` → 26.
pub fn column_index(letters: &str) -> Option<usize> {
    let letters = letters.trim();
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    letters
        .chars()
        .try_fold(0usize, |acc, c| {
            let digit = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
            acc.checked_mul(26)?.checked_add(digit)
        })
        .map(|n| n - 1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    Text(String),
    Number(u64),
}

impl CellValue {
    fn to_json(&self) -> Value {
        match self {
            CellValue::Text(s) => json!(s),
            CellValue::Number(n) => json!(n),
        }
    }
}

/// A single-cell write addressed by column letter and 1-based row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellUpdate {
    pub column: String,
    pub row: u32,
    pub value: CellValue,
}

impl CellUpdate {
    pub fn a1(&self) -> String {
        format!("{}{}", self.column.to_ascii_uppercase(), self.row)
    }
}

/// A member joining the roster after an accepted application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRosterEntry {
    pub name: String,
    pub external_id: u64,
    pub rank: String,
    pub enrolled_at: String,
}

impl NewRosterEntry {
    /// One sheet row wide enough for every configured column, blanks elsewhere.
    pub fn to_row(&self, columns: &RosterColumns) -> Vec<Value> {
        let width = column_index(columns.last_column()).map_or(0, |i| i + 1);
        let mut row = vec![json!(""); width];
        let cells = [
            (&columns.name, json!(self.name)),
            (&columns.external_id, json!(self.external_id.to_string())),
            (&columns.rank, json!(self.rank)),
            (&columns.counter, json!(0)),
            (&columns.enrolled, json!(self.enrolled_at)),
        ];
        for (letters, value) in cells {
            if let Some(slot) = column_index(letters).and_then(|i| row.get_mut(i)) {
                *slot = value;
            }
        }
        row
    }
}

/// Tabular member store keyed by name.
#[async_trait]
pub trait RosterStore: Send + Sync {
    fn columns(&self) -> &RosterColumns;

    async fn read_members(&self) -> Result<Vec<RosterMember>, CollaboratorError>;

    /// Single-cell correction, e.g. linking a Discord id to an existing row.
    async fn write_cell(&self, update: CellUpdate) -> Result<(), CollaboratorError>;

    async fn batch_update(&self, updates: Vec<CellUpdate>) -> Result<(), CollaboratorError>;

    async fn append_member(&self, entry: NewRosterEntry) -> Result<(), CollaboratorError>;
}

fn cell_text(row: &[Value], idx: Option<usize>) -> String {
    match idx.and_then(|i| row.get(i)) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Maps raw sheet rows to members. Row 1 is the header; blank names are skipped.
pub fn parse_rows(values: &[Vec<Value>], columns: &RosterColumns) -> Vec<RosterMember> {
    let name_idx = column_index(&columns.name);
    let id_idx = column_index(&columns.external_id);
    let rank_idx = column_index(&columns.rank);
    let counter_idx = column_index(&columns.counter);
    let enrolled_idx = column_index(&columns.enrolled);

    values
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(i, row)| {
            let name = cell_text(row, name_idx);
            if name.is_empty() {
                return None;
            }

            let rank_text = cell_text(row, rank_idx);
            let rank = rank_text.parse().ok();
            if rank.is_none() && !rank_text.is_empty() {
                warn!("Unknown rank '{}' for {}", rank_text, name);
            }

            let enrolled = cell_text(row, enrolled_idx);
            Some(RosterMember {
                row: (i + 1) as u32,
                external_id: cell_text(row, id_idx).parse().ok(),
                rank,
                progress_counter: cell_text(row, counter_idx).parse().unwrap_or(0),
                enrolled_at: (!enrolled.is_empty()).then_some(enrolled),
                name,
            })
        })
        .collect()
}

/// Case-insensitive name lookup within a roster snapshot.
pub fn find_member<'a>(roster: &'a [RosterMember], name: &str) -> Option<&'a RosterMember> {
    let key = name_key(name);
    roster.iter().find(|m| name_key(&m.name) == key)
}

/// The roster row holding this Discord id, if any.
pub fn find_by_external_id(roster: &[RosterMember], external_id: u64) -> Option<&RosterMember> {
    roster.iter().find(|m| m.external_id == Some(external_id))
}

/// Google service account key, as downloaded from the cloud console.
#[derive(Deserialize, Debug)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: Option<String>,
}

#[derive(Serialize)]
struct TokenClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Deserialize, Debug)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

struct AccessToken {
    token: String,
    expires_at: Instant,
}

/// Roster backed by the Sheets v4 REST API, authenticated as a service account.
pub struct SheetsRoster {
    http: reqwest::Client,
    spreadsheet_id: String,
    tab: String,
    columns: RosterColumns,
    key: ServiceAccountKey,
    token: Mutex<Option<AccessToken>>,
}

impl SheetsRoster {
    pub fn new(config: &SheetsConfig) -> Result<Self, ConfigError> {
        let key: ServiceAccountKey =
            serde_json::from_str(&config.service_account_json).map_err(|e| ConfigError::Invalid {
                name: "GOOGLE_SERVICE_ACCOUNT_JSON".to_string(),
                reason: e.to_string(),
            })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ConfigError::Invalid {
                name: "GOOGLE_SHEETS_ID".to_string(),
                reason: e.to_string(),
            })?;
        info!("Configured Google Sheets roster for {}", key.client_email);
        Ok(Self {
            http,
            spreadsheet_id: config.spreadsheet_id.clone(),
            tab: config.tab.clone(),
            columns: config.columns.clone(),
            key,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, CollaboratorError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.token.clone());
            }
        }

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| CollaboratorError::Auth(e.to_string()))?
            .as_secs();
        let token_uri = self.key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let claims = TokenClaims {
            iss: &self.key.client_email,
            scope: SHEETS_SCOPE,
            aud: token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let signing_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| CollaboratorError::Auth(e.to_string()))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| CollaboratorError::Auth(e.to_string()))?;

        let response = self
            .http
            .post(token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CollaboratorError::Auth(format!(
                "token exchange returned {}",
                response.status()
            )));
        }
        let body = response.json::<TokenResponse>().await?;
        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(TOKEN_LIFETIME_SECS));
        *guard = Some(AccessToken {
            token: body.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(body.access_token)
    }

    fn values_url(&self, tail: &str) -> Result<Url, CollaboratorError> {
        let mut url =
            Url::parse(SHEETS_API).map_err(|e| CollaboratorError::Malformed(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| CollaboratorError::Malformed("sheets base url".to_string()))?
            .extend(["spreadsheets", self.spreadsheet_id.as_str(), tail]);
        Ok(url)
    }

    fn range(&self, a1: &str) -> String {
        format!("{}!{}", self.tab, a1)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, CollaboratorError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(CollaboratorError::Status {
            service: "Google Sheets",
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl RosterStore for SheetsRoster {
    fn columns(&self) -> &RosterColumns {
        &self.columns
    }

    async fn read_members(&self) -> Result<Vec<RosterMember>, CollaboratorError> {
        let token = self.access_token().await?;
        let mut url = self.values_url("values")?;
        url.path_segments_mut()
            .map_err(|_| CollaboratorError::Malformed("sheets url".to_string()))?
            .push(&self.range(&format!("A:{}", self.columns.last_column())));

        let response = self.http.get(url).bearer_auth(token).send().await?;
        let body = Self::check(response).await?.json::<ValueRange>().await?;
        let members = parse_rows(&body.values, &self.columns);
        info!("Retrieved {} members from Google Sheets", members.len());
        Ok(members)
    }

    async fn write_cell(&self, update: CellUpdate) -> Result<(), CollaboratorError> {
        let token = self.access_token().await?;
        let range = self.range(&update.a1());
        let mut url = self.values_url("values")?;
        url.path_segments_mut()
            .map_err(|_| CollaboratorError::Malformed("sheets url".to_string()))?
            .push(&range);
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");

        let response = self
            .http
            .put(url)
            .bearer_auth(token)
            .json(&json!({ "range": range, "values": [[update.value.to_json()]] }))
            .send()
            .await?;
        Self::check(response).await?;
        info!("Updated cell {}", range);
        Ok(())
    }

    async fn batch_update(&self, updates: Vec<CellUpdate>) -> Result<(), CollaboratorError> {
        if updates.is_empty() {
            return Ok(());
        }
        let token = self.access_token().await?;
        let url = self.values_url("values:batchUpdate")?;
        let data: Vec<Value> = updates
            .iter()
            .map(|u| json!({ "range": self.range(&u.a1()), "values": [[u.value.to_json()]] }))
            .collect();

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "valueInputOption": "USER_ENTERED", "data": data }))
            .send()
            .await?;
        Self::check(response).await?;
        info!("Completed batch update of {} cells", updates.len());
        Ok(())
    }

    async fn append_member(&self, entry: NewRosterEntry) -> Result<(), CollaboratorError> {
        let token = self.access_token().await?;
        let range = self.range(&format!("A:{}", self.columns.last_column()));
        let mut url = self.values_url("values")?;
        url.path_segments_mut()
            .map_err(|_| CollaboratorError::Malformed("sheets url".to_string()))?
            .push(&format!("{range}:append"));
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "values": [entry.to_row(&self.columns)] }))
            .send()
            .await?;
        Self::check(response).await?;
        info!("Added new roster entry for Discord ID {}", entry.external_id);
        Ok(())
    }
}
