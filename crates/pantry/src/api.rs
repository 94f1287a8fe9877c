use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::DbHandle;
use crate::errors::PantryError;
use crate::models::{GroceryItem, RemoveOutcome};

pub struct AppState {
    pub db: DbHandle,
}

pub type SharedState = Arc<AppState>;

// ── Response shapes ───────────────────────────────────────────────────

#[derive(Serialize)]
struct ItemResponse {
    item: GroceryItem,
}

#[derive(Serialize)]
struct ItemsResponse {
    items: Vec<GroceryItem>,
}

#[derive(Serialize)]
struct RemoveResponse {
    result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining: Option<i64>,
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    // The two-segment path serves both verbs: POST reads {name, qty},
    // DELETE reads {id, qty}.
    Router::new()
        .route("/items", get(list_items))
        .route("/items/{id}", get(get_item).delete(delete_item))
        .route("/items/{key}/{qty}", post(add_item).delete(remove_quantity))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn add_item(
    State(state): State<SharedState>,
    Path((item_name, quantity)): Path<(String, i64)>,
) -> Result<impl IntoResponse, PantryError> {
    let item = state
        .db
        .call(move |db| db.add_item(&item_name, quantity))
        .await?;
    Ok(Json(ItemResponse { item }))
}

async fn get_item(
    State(state): State<SharedState>,
    Path(item_id): Path<i64>,
) -> Result<impl IntoResponse, PantryError> {
    let item = state.db.call(move |db| db.get_item(item_id)).await?;
    Ok(Json(ItemResponse { item }))
}

async fn list_items(State(state): State<SharedState>) -> Result<impl IntoResponse, PantryError> {
    let items = state.db.call(|db| db.list_items()).await?;
    Ok(Json(ItemsResponse { items }))
}

async fn delete_item(
    State(state): State<SharedState>,
    Path(item_id): Path<i64>,
) -> Result<impl IntoResponse, PantryError> {
    state.db.call(move |db| db.delete_item(item_id)).await?;
    Ok(Json(RemoveResponse {
        result: "Item deleted.".into(),
        remaining: None,
    }))
}

async fn remove_quantity(
    State(state): State<SharedState>,
    Path((item_id, quantity)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, PantryError> {
    let outcome = state
        .db
        .call(move |db| db.remove_quantity(item_id, quantity))
        .await?;
    let response = match outcome {
        RemoveOutcome::Deleted => RemoveResponse {
            result: "Item deleted.".into(),
            remaining: None,
        },
        RemoveOutcome::Removed { removed, remaining } => RemoveResponse {
            result: format!("{} items removed.", removed),
            remaining: Some(remaining),
        },
    };
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PantryDb;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let db = PantryDb::new_in_memory().unwrap();
        let state = Arc::new(AppState {
            db: DbHandle::new(db),
        });
        api_router().with_state(state)
    }

    async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn add_twice_accumulates() {
        let app = test_app();
        let (status, json) = send(&app, "POST", "/items/apples/5").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["item"]["quantity"], 5);

        let (status, json) = send(&app, "POST", "/items/apples/3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["item"]["quantity"], 8);

        let (_, json) = send(&app, "GET", "/items").await;
        assert_eq!(json["items"].as_array().unwrap().len(), 1);
        assert_eq!(json["items"][0]["item_name"], "apples");
    }

    #[tokio::test]
    async fn add_zero_quantity_is_400() {
        let app = test_app();
        let (status, json) = send(&app, "POST", "/items/apples/0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "Quantity must be greater than 0.");
    }

    #[tokio::test]
    async fn get_missing_item_is_404() {
        let app = test_app();
        let (status, json) = send(&app, "GET", "/items/9").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["detail"], "Item not found.");
    }

    #[tokio::test]
    async fn removing_all_stock_reports_deletion_not_remaining() {
        let app = test_app();
        let (_, json) = send(&app, "POST", "/items/milk/5").await;
        let id = json["item"]["item_id"].as_i64().unwrap();

        let (status, json) = send(&app, "DELETE", &format!("/items/{id}/5")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["result"], "Item deleted.");
        assert!(json.get("remaining").is_none());

        let (status, _) = send(&app, "GET", &format!("/items/{id}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn partial_removal_reports_remaining() {
        let app = test_app();
        let (_, json) = send(&app, "POST", "/items/milk/5").await;
        let id = json["item"]["item_id"].as_i64().unwrap();

        let (status, json) = send(&app, "DELETE", &format!("/items/{id}/2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["result"], "2 items removed.");
        assert_eq!(json["remaining"], 3);
    }

    #[tokio::test]
    async fn plain_delete_removes_the_item() {
        let app = test_app();
        let (_, json) = send(&app, "POST", "/items/eggs/12").await;
        let id = json["item"]["item_id"].as_i64().unwrap();

        let (status, json) = send(&app, "DELETE", &format!("/items/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["result"], "Item deleted.");

        let (status, _) = send(&app, "DELETE", &format!("/items/{id}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
