use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregator::Aggregator;
use crate::article::Article;
use crate::cache::CacheState;
use crate::fetcher::HttpFetcher;

const DEFAULT_LIMIT: usize = 10;

pub struct AppState {
    pub aggregator: Arc<Aggregator<HttpFetcher>>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/articles", get(articles))
        .route("/articles/search", get(search))
        .route("/articles/category/:category", get(by_category))
        .route(
            "/sources",
            get(sources)
                .post(add_source)
                .put(set_sources)
                .delete(remove_source),
        )
        .route("/refresh", post(refresh))
        .route("/health", get(health))
        .with_state(state)
}

/// Article as sent to clients. `pubDateFormatted` is computed per response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleResponse {
    #[serde(flatten)]
    pub article: Article,
    pub pub_date_formatted: String,
}

fn render(articles: Vec<Article>) -> Json<Vec<ArticleResponse>> {
    let now = Utc::now();
    Json(
        articles
            .into_iter()
            .map(|article| ArticleResponse {
                pub_date_formatted: article.format_pub_date(now),
                article,
            })
            .collect(),
    )
}

#[derive(Debug, Serialize)]
pub struct SourceStatus {
    pub url: String,
    pub state: CacheState,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(String),
    #[error("Unknown feed source: {0}")]
    UnknownSource(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            AppError::UnknownSource(_) => StatusCode::NOT_FOUND,
        };
        (status, format!("Error: {}", self)).into_response()
    }
}

fn validate_url(url: &str) -> Result<String, AppError> {
    let url = url.trim();
    match reqwest::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(url.to_string()),
        _ => Err(AppError::InvalidUrl(url.to_string())),
    }
}

// Route handlers
pub async fn articles(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    render(state.aggregator.get_all().await)
}

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    render(state.aggregator.search(&query.q, limit).await)
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

pub async fn by_category(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    render(state.aggregator.by_category(&category, limit).await)
}

pub async fn sources(State(state): State<Arc<AppState>>) -> Json<Vec<SourceStatus>> {
    let statuses = state
        .aggregator
        .source_states()
        .await
        .into_iter()
        .map(|(url, state)| SourceStatus { url, state })
        .collect();
    Json(statuses)
}

#[derive(Deserialize)]
pub struct AddSourceRequest {
    pub url: String,
}

pub async fn add_source(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddSourceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let url = validate_url(&request.url)?;
    let status = if state.aggregator.add_source(&url).await {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, sources(State(state)).await))
}

#[derive(Deserialize)]
pub struct SetSourcesRequest {
    pub urls: Vec<String>,
}

pub async fn set_sources(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetSourcesRequest>,
) -> Result<impl IntoResponse, AppError> {
    let urls = request
        .urls
        .iter()
        .map(String::as_str)
        .map(validate_url)
        .collect::<Result<Vec<_>, _>>()?;

    state.aggregator.set_sources(urls).await;
    Ok(sources(State(state)).await)
}

#[derive(Deserialize)]
pub struct SourceQuery {
    pub url: String,
}

pub async fn remove_source(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SourceQuery>,
) -> Result<impl IntoResponse, AppError> {
    if state.aggregator.remove_source(&query.url).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::UnknownSource(query.url))
    }
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.aggregator.refresh().await;
    StatusCode::NO_CONTENT
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
