// Thin client for the hosted backend's REST interface (PostgREST dialect).
//
// Filters are encoded as query parameters: `area=ilike.*Penal*`,
// `episode_id=in.(1,2,3)`, `order=sequencia.asc`. Every request carries the
// project API key both as `apikey` and as a bearer token.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};

pub const EPISODES_TABLE: &str = "JURIFY";
pub const FAVORITES_TABLE: &str = "podcast_favorites";
pub const HISTORY_TABLE: &str = "podcast_history";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    params: Vec<(String, String)>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Query {
            table: table.to_string(),
            params: Vec::new(),
        }
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.params.push(("select".to_string(), columns.to_string()));
        self
    }

    pub fn eq(self, column: &str, value: impl ToString) -> Self {
        self.filter(column, format!("eq.{}", value.to_string()))
    }

    pub fn lt(self, column: &str, value: impl ToString) -> Self {
        self.filter(column, format!("lt.{}", value.to_string()))
    }

    // Case-insensitive substring match, like SQL `ILIKE '%term%'`
    pub fn ilike(self, column: &str, term: &str) -> Self {
        self.filter(column, format!("ilike.*{}*", term))
    }

    pub fn in_list<T: ToString>(self, column: &str, values: &[T]) -> Self {
        let joined = values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.filter(column, format!("in.({joined})"))
    }

    pub fn or(mut self, conditions: &[&str]) -> Self {
        self.params
            .push(("or".to_string(), format!("({})", conditions.join(","))));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        let dir = if ascending { "asc" } else { "desc" };
        self.params
            .push(("order".to_string(), format!("{column}.{dir}")));
        self
    }

    fn filter(mut self, column: &str, expr: String) -> Self {
        self.params.push((column.to_string(), expr));
        self
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestClient {
    pub fn new(base_url: &str, api_key: &str) -> StoreResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(RestClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.table_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    pub async fn fetch<T: DeserializeOwned>(&self, query: &Query) -> StoreResult<Vec<T>> {
        tracing::debug!(table = %query.table, params = ?query.params, "backend select");
        let response = self
            .request(reqwest::Method::GET, &query.table)
            .query(&query.params)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json::<Vec<T>>().await?)
    }

    pub async fn insert<T: Serialize>(&self, table: &str, row: &T) -> StoreResult<()> {
        let response = self
            .request(reqwest::Method::POST, table)
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    // Insert or update on the given unique columns
    pub async fn upsert<T: Serialize>(
        &self,
        table: &str,
        row: &T,
        on_conflict: &str,
    ) -> StoreResult<()> {
        let response = self
            .request(reqwest::Method::POST, table)
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    pub async fn delete(&self, query: &Query) -> StoreResult<()> {
        let response = self
            .request(reqwest::Method::DELETE, &query.table)
            .query(&query.params)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> StoreResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body = body.trim().chars().take(240).collect::<String>();
    Err(StoreError::Status {
        status: status.as_u16(),
        body,
    })
}
