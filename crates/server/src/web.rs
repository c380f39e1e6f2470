use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fin_core::{Entry, TagSet, TagStore, KEY_DATE_FORMAT};
use fin_storage::{db, tags_file, DbPool};
use fin_suggest::TagSuggester;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Server state. Entries are fixed for the life of the process; the tag
/// store is the only mutable part and every writer goes through its lock.
pub struct AppState {
    pub entries: Vec<Entry>,
    pub tags: Mutex<TagStore>,
    pub persist: TagPersistence,
    pub suggester: TagSuggester,
}

/// Where accepted tag updates are written.
pub enum TagPersistence {
    /// Rewrite the whole tag file after each update.
    File(PathBuf),
    /// Apply each update to the `tag` table.
    Database(DbPool),
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState, static_dir: Option<&Path>) -> Router {
    let root = match static_dir {
        Some(dir) => post(update_tags).get_service(ServeDir::new(dir)),
        None => post(update_tags),
    };
    let mut app = Router::new()
        .route("/", root)
        .route("/data", get(data))
        .route("/suggest", get(suggest));
    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }
    app.layer(TraceLayer::new_for_http()).with_state(state)
}

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("request failed: {:#}", self.0);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", self.0)).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(e: E) -> Self {
        AppError(e.into())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EntryJson {
    pub id: String,
    pub number: String,
    pub date: String,
    pub amount: i64,
    pub payee: String,
    pub addr: String,
    pub tags: TagSet,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DataResponse {
    pub entries: Vec<EntryJson>,
}

async fn data(State(state): State<SharedState>) -> Json<DataResponse> {
    let tags = state.tags.lock().await;
    let entries = state
        .entries
        .iter()
        .map(|e| {
            let id = e.id();
            EntryJson {
                tags: tags.get(&id).cloned().unwrap_or_default(),
                id,
                number: e.number.clone(),
                date: e.date.format(KEY_DATE_FORMAT).to_string(),
                amount: e.amount,
                payee: e.payee.clone(),
                addr: e.address.clone(),
            }
        })
        .collect();
    Json(DataResponse { entries })
}

/// Body of `POST /`: every tag update applies to every id.
#[derive(Debug, Serialize, Deserialize)]
pub struct TagUpdate {
    pub ids: Vec<String>,
    pub tags: Vec<String>,
}

async fn update_tags(
    State(state): State<SharedState>,
    Json(update): Json<TagUpdate>,
) -> Result<StatusCode, AppError> {
    let mut tags = state.tags.lock().await;
    let mut next = tags.clone();
    next.update(&update.ids, &update.tags);
    match &state.persist {
        TagPersistence::File(path) => tags_file::save(path, &next).await?,
        TagPersistence::Database(pool) => db::update_tags(pool, &update.ids, &update.tags).await?,
    }
    *tags = next;
    info!(ids = update.ids.len(), tags = ?update.tags, "tags updated");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SuggestQuery {
    #[serde(default)]
    desc: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuggestResponse {
    pub tags: TagSet,
}

async fn suggest(
    State(state): State<SharedState>,
    Query(query): Query<SuggestQuery>,
) -> Json<SuggestResponse> {
    let tags = state.tags.lock().await;
    let suggested = state.suggester.suggest(&query.desc, &state.entries, &tags);
    Json(SuggestResponse { tags: suggested })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use chrono::NaiveDate;
    use tower::ServiceExt;

    fn entries() -> Vec<Entry> {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        (0..3)
            .map(|i| Entry::new(date, -100 * (i + 1), format!("CORNER CAFE {i}")))
            .chain([Entry::new(date, 250000, "PAYROLL")])
            .collect()
    }

    fn state(dir: &Path, tags: TagStore) -> SharedState {
        Arc::new(AppState {
            entries: entries(),
            tags: Mutex::new(tags),
            persist: TagPersistence::File(dir.join("tags")),
            suggester: TagSuggester::default(),
        })
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn data_lists_entries_with_tags() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TagStore::new();
        let payroll_id = entries()[3].id();
        store.update(&[payroll_id.as_str()], &["income"]);
        let app = router(state(dir.path(), store), None);

        let response = app
            .oneshot(Request::get("/data").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let data: DataResponse = body_json(response).await;
        assert_eq!(data.entries.len(), 4);
        let payroll = &data.entries[3];
        assert_eq!(payroll.id, payroll_id);
        assert_eq!(payroll.date, "2024/05/01");
        assert_eq!(payroll.amount, 250000);
        assert!(payroll.tags.contains("income"));
        assert!(data.entries[0].tags.is_empty());
    }

    #[tokio::test]
    async fn post_updates_and_saves_tags() {
        let dir = tempfile::tempdir().unwrap();
        let shared = state(dir.path(), TagStore::new());
        let ids: Vec<String> = entries()[..2].iter().map(Entry::id).collect();
        let body = serde_json::to_string(&TagUpdate {
            ids: ids.clone(),
            tags: vec!["coffee".to_string(), "".to_string()],
        })
        .unwrap();

        let response = router(shared.clone(), None)
            .oneshot(
                Request::post("/")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let tags = shared.tags.lock().await;
        assert!(tags.get(&ids[0]).unwrap().contains("coffee"));
        assert!(tags.get(&ids[1]).unwrap().contains("coffee"));
        let saved = tags_file::load(&dir.path().join("tags")).await.unwrap();
        assert_eq!(saved, *tags);
    }

    #[tokio::test]
    async fn post_writes_through_to_database() {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::create_db(&dir.path().join("fin.db")).await.unwrap();
        db::insert_entries(&pool, "card", &entries()).await.unwrap();
        let shared = Arc::new(AppState {
            entries: entries(),
            tags: Mutex::new(TagStore::new()),
            persist: TagPersistence::Database(pool.clone()),
            suggester: TagSuggester::default(),
        });
        let id = entries()[3].id();
        let body = serde_json::to_string(&TagUpdate {
            ids: vec![id.clone()],
            tags: vec!["income".to_string()],
        })
        .unwrap();

        let response = router(shared.clone(), None)
            .oneshot(
                Request::post("/")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        assert!(shared.tags.lock().await.get(&id).unwrap().contains("income"));
        let stored = db::all_entries(&pool).await.unwrap();
        let payroll = stored.iter().find(|s| s.id == id).unwrap();
        assert!(payroll.tags.contains("income"));
        assert!(!dir.path().join("tags").exists());
    }

    #[tokio::test]
    async fn failed_save_keeps_previous_tags() {
        let dir = tempfile::tempdir().unwrap();
        // The tag file's directory does not exist, so saving fails.
        let shared = Arc::new(AppState {
            entries: entries(),
            tags: Mutex::new(TagStore::new()),
            persist: TagPersistence::File(dir.path().join("missing").join("tags")),
            suggester: TagSuggester::default(),
        });
        let body = serde_json::to_string(&TagUpdate {
            ids: vec!["abc".to_string()],
            tags: vec!["x".to_string()],
        })
        .unwrap();

        let response = router(shared.clone(), None)
            .oneshot(
                Request::post("/")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(shared.tags.lock().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_post_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(state(dir.path(), TagStore::new()), None)
            .oneshot(
                Request::post("/")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{\"ids\": 3}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
        assert!(!dir.path().join("tags").exists());
    }

    #[tokio::test]
    async fn suggest_votes_from_neighbors() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TagStore::new();
        let cafe_ids: Vec<String> = entries()[..3].iter().map(Entry::id).collect();
        store.update(&cafe_ids, &["coffee"]);
        let app = router(state(dir.path(), store), None);

        let response = app
            .oneshot(
                Request::get("/suggest?desc=CORNER%20CAFE")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let got: SuggestResponse = body_json(response).await;
        assert_eq!(got.tags, ["coffee"].into_iter().collect());
    }

    #[tokio::test]
    async fn static_files_are_served() {
        let dir = tempfile::tempdir().unwrap();
        let web = dir.path().join("web");
        std::fs::create_dir(&web).unwrap();
        std::fs::write(web.join("index.html"), "<h1>fin</h1>").unwrap();
        std::fs::write(web.join("app.js"), "// app").unwrap();
        let shared = state(dir.path(), TagStore::new());

        let response = router(shared.clone(), Some(&web))
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router(shared, Some(&web))
            .oneshot(Request::get("/app.js").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
