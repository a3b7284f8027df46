//! PostgREST-compatible HTTP store.
//!
//! Tables live under `{base}/rest/v1/{table}`. Filters become
//! `column=eq.value` query parameters, sorting becomes
//! `order=column.asc|desc`, and writes ask for the stored representation
//! back with `Prefer: return=representation`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{Filter, OrderBy, RecordStore, Row, StoreError};

#[derive(Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    /// Bearer token forwarded for row-level security (the user's session)
    access_token: Option<String>,
}

impl RestStore {
    /// Client with a per-request `timeout`; an expired call surfaces as
    /// [`StoreError::Timeout`].
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            access_token: None,
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let mut req = self
            .client
            .request(method, self.table_url(table))
            .header(header::ACCEPT, "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("apikey", key);
        }
        if let Some(token) = self.access_token.as_ref().or(self.api_key.as_ref()) {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn rows(req: RequestBuilder) -> Result<Vec<Row>, StoreError> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, %body, "store request rejected");
            return Err(status_error(status, body));
        }
        Ok(resp.json::<Vec<Row>>().await?)
    }
}

/// Query parameters for a filtered, optionally sorted request.
pub fn query_params(filter: &Filter, order: Option<&OrderBy>) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = filter
        .clauses()
        .iter()
        .map(|(column, value)| (column.clone(), eq_operand(value)))
        .collect();
    if let Some(order) = order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push(("order".into(), format!("{}.{}", order.column, direction)));
    }
    params
}

fn eq_operand(value: &Value) -> String {
    match value {
        Value::Null => "is.null".into(),
        Value::String(s) => format!("eq.{s}"),
        other => format!("eq.{other}"),
    }
}

fn status_error(status: StatusCode, body: String) -> StoreError {
    match status {
        StatusCode::CONFLICT => StoreError::Constraint(body),
        StatusCode::NOT_FOUND => StoreError::Unavailable(format!("endpoint not found: {body}")),
        _ => StoreError::Http {
            status: status.as_u16(),
            body,
        },
    }
}

fn by_id(id: &str) -> Filter {
    Filter::new().eq("id", id)
}

#[async_trait]
impl RecordStore for RestStore {
    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        order: Option<&OrderBy>,
    ) -> Result<Vec<Row>, StoreError> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(query_params(filter, order));
        debug!(%table, ?params, "select");
        Self::rows(self.request(Method::GET, table).query(&params)).await
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError> {
        let req = self
            .request(Method::POST, table)
            .header("Prefer", "return=representation")
            .json(&row);
        Self::rows(req)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode(format!("insert into {table} returned no row")))
    }

    async fn update(&self, table: &str, id: &str, fields: Row) -> Result<Row, StoreError> {
        let req = self
            .request(Method::PATCH, table)
            .header("Prefer", "return=representation")
            .query(&query_params(&by_id(id), None))
            .json(&fields);
        Self::rows(req)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::RowNotFound {
                table: table.to_string(),
                id: id.to_string(),
            })
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), StoreError> {
        let resp = self
            .request(Method::DELETE, table)
            .query(&query_params(&by_id(id), None))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params() {
        let filter = Filter::new().eq("book_id", "b-1").eq("is_public", true);
        let params = query_params(&filter, Some(&OrderBy::asc("order")));
        assert_eq!(
            params,
            vec![
                ("book_id".to_string(), "eq.b-1".to_string()),
                ("is_public".to_string(), "eq.true".to_string()),
                ("order".to_string(), "order.asc".to_string()),
            ]
        );

        let params = query_params(&Filter::new().eq("subtitle", Value::Null), Some(&OrderBy::desc("created_at")));
        assert_eq!(params[0].1, "is.null");
        assert_eq!(params[1].1, "created_at.desc");
    }

    #[test]
    fn test_base_url_normalized() {
        let store = RestStore::new("http://localhost:3000/", Duration::from_secs(1)).unwrap();
        assert_eq!(store.table_url("books"), "http://localhost:3000/rest/v1/books");
    }
}
