//! PostgREST-style HTTP remote.
//!
//! Each table is a collection at `{base_url}/{table}`:
//!
//! - select: `GET ?updated_at=gt.<ts>&tenant_id=eq.<t>&id=in.(...)&order=updated_at.asc`
//! - insert: `POST` with `Prefer: resolution=ignore-duplicates`
//! - upsert: `POST` with `Prefer: resolution=merge-duplicates`
//! - delete: `DELETE ?id=in.(...)`

use std::time::Duration;

use chrono::SecondsFormat;
use fieldsync_engine::{RecordId, RemoteRow, Timestamp};
use reqwest::{Client, Method, RequestBuilder, Response};
use url::Url;

use super::{Filter, RemoteClient, RemoteError, RemoteFuture, RemoteResult};

const PREFER_INSERT: &str = "return=representation,resolution=ignore-duplicates";
const PREFER_UPSERT: &str = "return=representation,resolution=merge-duplicates";

#[derive(Debug, Clone)]
pub struct HttpRemote {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
    auth_token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: &str) -> RemoteResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        // Url::join replaces the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            http: Client::new(),
            base_url,
            api_key: None,
            auth_token: None,
        })
    }

    /// Per-request limit enforced by the HTTP client itself.
    pub fn with_timeout(mut self, limit: Duration) -> RemoteResult<Self> {
        self.http = Client::builder().timeout(limit).build()?;
        Ok(self)
    }

    /// Sent as the `apikey` header.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sent as `Authorization: Bearer <token>`.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn endpoint(&self, table: &str) -> RemoteResult<Url> {
        Ok(self.base_url.join(table)?)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut request = self.http.request(method, url);
        if let Some(api_key) = &self.api_key {
            request = request.header("apikey", api_key);
        }
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn write_rows(
        &self,
        table: &str,
        rows: Vec<RemoteRow>,
        prefer: &'static str,
    ) -> RemoteResult<Vec<RemoteRow>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .request(Method::POST, self.endpoint(table)?)
            .header("Prefer", prefer)
            .json(&rows)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn select_rows(&self, table: &str, filter: &Filter) -> RemoteResult<Vec<RemoteRow>> {
        let mut url = self.endpoint(table)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("select", "*");
            if let Some(after) = filter.updated_after {
                query.append_pair("updated_at", &format!("gt.{}", format_timestamp(after)));
            }
            if let Some(tenant_id) = &filter.tenant_id {
                query.append_pair("tenant_id", &format!("eq.{tenant_id}"));
            }
            if let Some(ids) = &filter.ids {
                query.append_pair("id", &id_list(ids));
            }
            query.append_pair("order", "updated_at.asc");
        }

        let response = self.request(Method::GET, url).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn delete_rows(&self, table: &str, ids: Vec<RecordId>) -> RemoteResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut url = self.endpoint(table)?;
        url.query_pairs_mut().append_pair("id", &id_list(&ids));

        let response = self
            .request(Method::DELETE, url)
            .header("Prefer", "return=minimal")
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn probe(&self) -> RemoteResult<()> {
        let response = self
            .request(Method::GET, self.base_url.clone())
            .send()
            .await?;
        if response.status().is_server_error() {
            return Err(RemoteError::Network(format!(
                "remote unhealthy: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

impl RemoteClient for HttpRemote {
    fn select<'a>(&'a self, table: &'a str, filter: &'a Filter) -> RemoteFuture<'a, Vec<RemoteRow>> {
        Box::pin(self.select_rows(table, filter))
    }

    fn insert<'a>(&'a self, table: &'a str, rows: Vec<RemoteRow>) -> RemoteFuture<'a, Vec<RemoteRow>> {
        Box::pin(self.write_rows(table, rows, PREFER_INSERT))
    }

    fn upsert<'a>(&'a self, table: &'a str, rows: Vec<RemoteRow>) -> RemoteFuture<'a, Vec<RemoteRow>> {
        Box::pin(self.write_rows(table, rows, PREFER_UPSERT))
    }

    fn delete<'a>(&'a self, table: &'a str, ids: Vec<RecordId>) -> RemoteFuture<'a, ()> {
        Box::pin(self.delete_rows(table, ids))
    }

    fn ping(&self) -> RemoteFuture<'_, ()> {
        Box::pin(self.probe())
    }
}

/// Map non-2xx responses: 4xx is the remote refusing the data, anything
/// else is treated as the network being unhealthy.
async fn check_status(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status.is_client_error() {
        Err(RemoteError::Validation {
            status: status.as_u16(),
            message: body,
        })
    } else {
        Err(RemoteError::Network(format!("{status}: {body}")))
    }
}

fn format_timestamp(at: Timestamp) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// `in.("a","b")`; ids are quoted so reserved characters survive.
fn id_list(ids: &[RecordId]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("\"{}\"", id.replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn base_url_gets_trailing_slash() {
        let remote = HttpRemote::new("https://example.test/rest/v1").unwrap();
        assert_eq!(
            remote.endpoint("farm_plots").unwrap().as_str(),
            "https://example.test/rest/v1/farm_plots"
        );
    }

    #[test]
    fn rejects_bad_url() {
        assert!(matches!(
            HttpRemote::new("not a url"),
            Err(RemoteError::InvalidUrl(_))
        ));
    }

    #[test]
    fn id_list_quotes_values() {
        let ids = vec!["f-1".to_string(), "we\"ird".to_string()];
        assert_eq!(id_list(&ids), r#"in.("f-1","we\"ird")"#);
    }

    #[test]
    fn timestamps_use_utc_suffix() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(format_timestamp(at), "2023-11-14T22:13:20.000000Z");
    }
}
