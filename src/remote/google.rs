//! Google Sheets v4 and Drive v3 over HTTPS.
//!
//! Requests go through a blocking `reqwest` client. Access tokens come from a service
//! account via `yup-oauth2`, which is async; a private current-thread runtime drives it
//! and the token is fetched again once it expires.

use crate::remote::credential::CredentialFile;
use crate::remote::CellStyle;
use crate::remote::RemoteError;
use crate::remote::SheetService;
use crate::remote::SpreadsheetHandle;
use crate::remote::WorksheetHandle;
use crate::table::range::Range;
use reqwest::blocking::Client;
use reqwest::blocking::RequestBuilder;
use reqwest::Method;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use serde_json::Value as Json;
use std::time::Duration;
use tracing::debug;
use tracing::info;
use url::Url;
use yup_oauth2::AccessToken;
use yup_oauth2::ServiceAccountKey;

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DRIVE_API: &str = "https://www.googleapis.com/drive/v3/files";
const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive",
];
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const SPREADSHEET_MIME_TYPE: &str = "application/vnd.google-apps.spreadsheet";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpreadsheetResource {
    spreadsheet_id: String,
    spreadsheet_url: Option<String>,
    properties: Option<SpreadsheetProperties>,
    #[serde(default)]
    sheets: Vec<SheetResource>,
}

#[derive(Deserialize)]
struct SpreadsheetProperties {
    title: String,
}

#[derive(Deserialize)]
struct SheetResource {
    properties: SheetProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    #[serde(default)]
    sheet_id: i64,
    title: String,
    #[serde(default)]
    grid_properties: GridProperties,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GridProperties {
    #[serde(default)]
    row_count: usize,
    #[serde(default)]
    column_count: usize,
}

#[derive(Deserialize)]
struct BatchUpdateResponse {
    #[serde(default)]
    replies: Vec<Json>,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

pub struct GoogleSheetsClient {
    http: Client,
    runtime: tokio::runtime::Runtime,
    key: ServiceAccountKey,
    token: AccessToken,
}

impl GoogleSheetsClient {
    /// Exchanges the staged service-account key for an access token.
    /// The credential file can be dropped as soon as this returns.
    pub fn authenticate(credential: &CredentialFile) -> Result<GoogleSheetsClient, RemoteError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| RemoteError::Authentication(format!("cannot start token runtime: {e}")))?;
        let key = runtime
            .block_on(yup_oauth2::read_service_account_key(credential.path()))
            .map_err(|e| RemoteError::Authentication(format!("cannot read service account key: {e}")))?;
        let token = fetch_token(&runtime, &key).map_err(|e| RemoteError::Authentication(e.to_string()))?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Authentication(format!("cannot build HTTP client: {e}")))?;
        info!(account = credential.client_email(), "Authenticated with Google");
        Ok(GoogleSheetsClient {
            http,
            runtime,
            key,
            token,
        })
    }

    fn bearer(&mut self) -> Result<String, RemoteError> {
        if self.token.is_expired() {
            debug!("Refreshing access token");
            self.token = fetch_token(&self.runtime, &self.key)?;
        }
        self.token
            .token()
            .map(str::to_owned)
            .ok_or_else(|| RemoteError::Authentication("token response carried no access token".to_owned()))
    }

    fn send<T: DeserializeOwned>(&mut self, method: Method, url: Url, body: Option<Json>) -> Result<T, RemoteError> {
        let bearer = self.bearer()?;
        debug!(method = method.as_str(), url = url.as_str(), "Google API request");
        let mut request: RequestBuilder = self.http.request(method, url).bearer_auth(bearer);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().map_err(transport_error)?;
        let status = response.status();
        let text = response.text().map_err(transport_error)?;
        if !status.is_success() {
            return Err(classify(status, &text));
        }
        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| RemoteError::Permanent {
            status: Some(status.as_u16()),
            message: format!("unexpected response: {e}"),
        })
    }

    fn batch_update(&mut self, spreadsheet_id: &str, requests: Vec<Json>) -> Result<BatchUpdateResponse, RemoteError> {
        let url = endpoint(SHEETS_API, &[&format!("{spreadsheet_id}:batchUpdate")])?;
        self.send(Method::POST, url, Some(json!({ "requests": requests })))
    }

    fn values_url(&self, worksheet: &WorksheetHandle, range: &str, suffix: &str) -> Result<Url, RemoteError> {
        let a1 = format!("{}{suffix}", qualified_range(&worksheet.title, range));
        endpoint(SHEETS_API, &[&worksheet.spreadsheet_id, "values", &a1])
    }
}

fn fetch_token(runtime: &tokio::runtime::Runtime, key: &ServiceAccountKey) -> Result<AccessToken, RemoteError> {
    runtime.block_on(async {
        let authenticator = yup_oauth2::ServiceAccountAuthenticator::builder(key.clone())
            .build()
            .await
            .map_err(|e| RemoteError::Authentication(format!("cannot build authenticator: {e}")))?;
        authenticator.token(SCOPES).await.map_err(|e| RemoteError::Transient {
            status: None,
            message: format!("token request failed: {e}"),
        })
    })
}

fn endpoint(base: &str, segments: &[&str]) -> Result<Url, RemoteError> {
    let mut url = Url::parse(base).map_err(|e| RemoteError::Permanent {
        status: None,
        message: e.to_string(),
    })?;
    url.path_segments_mut()
        .map_err(|_| RemoteError::Permanent {
            status: None,
            message: format!("'{base}' cannot carry a path"),
        })?
        .extend(segments);
    Ok(url)
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    RemoteError::Transient {
        status: error.status().map(|status| status.as_u16()),
        message: error.to_string(),
    }
}

/// Maps an error response to a retry class. Rate limits may come back as 403, with
/// reasons such as `rateLimitExceeded`, `userRateLimitExceeded` or a `RESOURCE_EXHAUSTED` status.
fn classify(status: StatusCode, body: &str) -> RemoteError {
    let message = serde_json::from_str::<Json>(body)
        .ok()
        .and_then(|json| json["error"]["message"].as_str().map(str::to_owned))
        .unwrap_or_else(|| body.trim().to_owned());
    let code = Some(status.as_u16());
    let lowered = body.to_ascii_lowercase();
    let rate_limited = ["ratelimitexceeded", "rate_limit_exceeded", "resource_exhausted"]
        .iter()
        .any(|reason| lowered.contains(reason));
    match status {
        StatusCode::TOO_MANY_REQUESTS => RemoteError::Transient { status: code, message },
        StatusCode::FORBIDDEN if rate_limited => RemoteError::Transient { status: code, message },
        StatusCode::UNAUTHORIZED => RemoteError::Authentication(message),
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        status if status.is_server_error() => RemoteError::Transient { status: code, message },
        _ => RemoteError::Permanent { status: code, message },
    }
}

/// Prefixes an A1 range with the quoted worksheet title: `'Q3 ''final'''!A1:C9`.
fn qualified_range(title: &str, range: &str) -> String {
    format!("'{}'!{}", title.replace('\'', "''"), range)
}

fn grid_range(sheet_id: i64, range: &str) -> Result<Json, RemoteError> {
    let range = Range::try_from(range).map_err(|e| RemoteError::Permanent {
        status: None,
        message: e.to_string(),
    })?;
    let mut grid = json!({ "sheetId": sheet_id });
    if let Some(row) = range.row_lower_bound {
        grid["startRowIndex"] = json!(row);
    }
    if let Some(row) = range.row_upper_bound {
        grid["endRowIndex"] = json!(row + 1);
    }
    if let Some(col) = range.col_lower_bound {
        grid["startColumnIndex"] = json!(col);
    }
    if let Some(col) = range.col_upper_bound {
        grid["endColumnIndex"] = json!(col + 1);
    }
    Ok(grid)
}

/// Drive query literal: backslashes and single quotes are escaped.
fn drive_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn spreadsheet_handle(resource: SpreadsheetResource, fallback_title: &str) -> SpreadsheetHandle {
    let url = resource
        .spreadsheet_url
        .unwrap_or_else(|| format!("https://docs.google.com/spreadsheets/d/{}", resource.spreadsheet_id));
    SpreadsheetHandle {
        title: resource
            .properties
            .map(|properties| properties.title)
            .unwrap_or_else(|| fallback_title.to_owned()),
        id: resource.spreadsheet_id,
        url,
    }
}

fn worksheet_handle(spreadsheet_id: &str, properties: SheetProperties) -> WorksheetHandle {
    WorksheetHandle {
        spreadsheet_id: spreadsheet_id.to_owned(),
        sheet_id: properties.sheet_id,
        title: properties.title,
        rows: properties.grid_properties.row_count,
        cols: properties.grid_properties.column_count,
    }
}

impl SheetService for GoogleSheetsClient {
    fn create_spreadsheet(&mut self, title: &str) -> Result<SpreadsheetHandle, RemoteError> {
        let url = endpoint(SHEETS_API, &[])?;
        let resource: SpreadsheetResource = self.send(Method::POST, url, Some(json!({ "properties": { "title": title } })))?;
        let handle = spreadsheet_handle(resource, title);
        info!(spreadsheet = handle.title.as_str(), id = handle.id.as_str(), "Created spreadsheet");
        Ok(handle)
    }

    fn open_spreadsheet(&mut self, title: &str) -> Result<SpreadsheetHandle, RemoteError> {
        let mut url = endpoint(DRIVE_API, &[])?;
        let query = format!(
            "name = '{}' and mimeType = '{SPREADSHEET_MIME_TYPE}' and trashed = false",
            drive_literal(title)
        );
        url.query_pairs_mut()
            .append_pair("q", &query)
            .append_pair("fields", "files(id,name)")
            .append_pair("supportsAllDrives", "true")
            .append_pair("includeItemsFromAllDrives", "true");
        let list: FileList = self.send(Method::GET, url, None)?;
        let file = list
            .files
            .into_iter()
            .find(|file| file.name == title)
            .ok_or_else(|| RemoteError::NotFound(format!("spreadsheet titled '{title}'")))?;
        let url = endpoint(SHEETS_API, &[&file.id])?;
        let resource: SpreadsheetResource = self.send(Method::GET, url, None)?;
        Ok(spreadsheet_handle(resource, &file.name))
    }

    fn worksheets(&mut self, spreadsheet: &SpreadsheetHandle) -> Result<Vec<WorksheetHandle>, RemoteError> {
        let mut url = endpoint(SHEETS_API, &[&spreadsheet.id])?;
        url.query_pairs_mut().append_pair("fields", "spreadsheetId,sheets.properties");
        let resource: SpreadsheetResource = self.send(Method::GET, url, None)?;
        Ok(resource
            .sheets
            .into_iter()
            .map(|sheet| worksheet_handle(&spreadsheet.id, sheet.properties))
            .collect())
    }

    fn add_worksheet(&mut self, spreadsheet: &SpreadsheetHandle, title: &str, rows: usize, cols: usize) -> Result<WorksheetHandle, RemoteError> {
        let request = json!({
            "addSheet": {
                "properties": {
                    "title": title,
                    "gridProperties": { "rowCount": rows, "columnCount": cols }
                }
            }
        });
        let response = self.batch_update(&spreadsheet.id, vec![request])?;
        let properties = response
            .replies
            .into_iter()
            .next()
            .and_then(|mut reply| reply.pointer_mut("/addSheet/properties").map(Json::take))
            .and_then(|properties| serde_json::from_value::<SheetProperties>(properties).ok())
            .ok_or_else(|| RemoteError::Permanent {
                status: None,
                message: format!("addSheet for '{title}' returned no sheet properties"),
            })?;
        Ok(worksheet_handle(&spreadsheet.id, properties))
    }

    fn rename_worksheet(&mut self, worksheet: &WorksheetHandle, title: &str) -> Result<WorksheetHandle, RemoteError> {
        let request = json!({
            "updateSheetProperties": {
                "properties": { "sheetId": worksheet.sheet_id, "title": title },
                "fields": "title"
            }
        });
        self.batch_update(&worksheet.spreadsheet_id, vec![request])?;
        Ok(WorksheetHandle {
            title: title.to_owned(),
            ..worksheet.clone()
        })
    }

    fn resize_worksheet(&mut self, worksheet: &WorksheetHandle, rows: usize, cols: usize) -> Result<WorksheetHandle, RemoteError> {
        let request = json!({
            "updateSheetProperties": {
                "properties": {
                    "sheetId": worksheet.sheet_id,
                    "gridProperties": { "rowCount": rows, "columnCount": cols }
                },
                "fields": "gridProperties.rowCount,gridProperties.columnCount"
            }
        });
        self.batch_update(&worksheet.spreadsheet_id, vec![request])?;
        Ok(WorksheetHandle {
            rows,
            cols,
            ..worksheet.clone()
        })
    }

    fn clear(&mut self, worksheet: &WorksheetHandle) -> Result<(), RemoteError> {
        // A bare quoted title addresses the whole sheet
        let range = format!("'{}'", worksheet.title.replace('\'', "''"));
        let url = endpoint(SHEETS_API, &[&worksheet.spreadsheet_id, "values", &format!("{range}:clear")])?;
        let _: Json = self.send(Method::POST, url, Some(json!({})))?;
        Ok(())
    }

    fn update_range(&mut self, worksheet: &WorksheetHandle, range: &str, values: &[Vec<String>]) -> Result<(), RemoteError> {
        let mut url = self.values_url(worksheet, range, "")?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let body = json!({
            "range": qualified_range(&worksheet.title, range),
            "majorDimension": "ROWS",
            "values": values,
        });
        let _: Json = self.send(Method::PUT, url, Some(body))?;
        Ok(())
    }

    fn freeze_rows(&mut self, worksheet: &WorksheetHandle, rows: usize) -> Result<(), RemoteError> {
        let request = json!({
            "updateSheetProperties": {
                "properties": {
                    "sheetId": worksheet.sheet_id,
                    "gridProperties": { "frozenRowCount": rows }
                },
                "fields": "gridProperties.frozenRowCount"
            }
        });
        self.batch_update(&worksheet.spreadsheet_id, vec![request]).map(|_| ())
    }

    fn format_range(&mut self, worksheet: &WorksheetHandle, range: &str, style: &CellStyle) -> Result<(), RemoteError> {
        let request = json!({
            "repeatCell": {
                "range": grid_range(worksheet.sheet_id, range)?,
                "cell": { "userEnteredFormat": { "textFormat": { "bold": style.bold } } },
                "fields": "userEnteredFormat.textFormat.bold"
            }
        });
        self.batch_update(&worksheet.spreadsheet_id, vec![request]).map(|_| ())
    }

    fn auto_resize_columns(&mut self, worksheet: &WorksheetHandle, from: usize, to: usize) -> Result<(), RemoteError> {
        let request = json!({
            "autoResizeDimensions": {
                "dimensions": {
                    "sheetId": worksheet.sheet_id,
                    "dimension": "COLUMNS",
                    "startIndex": from,
                    "endIndex": to
                }
            }
        });
        self.batch_update(&worksheet.spreadsheet_id, vec![request]).map(|_| ())
    }

    fn share(&mut self, spreadsheet: &SpreadsheetHandle, email: &str, role: &str, notify: bool) -> Result<(), RemoteError> {
        let mut url = endpoint(DRIVE_API, &[&spreadsheet.id, "permissions"])?;
        url.query_pairs_mut()
            .append_pair("sendNotificationEmail", if notify { "true" } else { "false" })
            .append_pair("supportsAllDrives", "true");
        let body = json!({ "type": "user", "role": role, "emailAddress": email });
        let _: Json = self.send(Method::POST, url, Some(body))?;
        info!(spreadsheet = spreadsheet.title.as_str(), email, role, "Shared spreadsheet");
        Ok(())
    }
}
