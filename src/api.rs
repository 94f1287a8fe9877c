use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post, put},
};

use crate::auth::AuthUser;
use crate::db::DbHandle;
use crate::errors::SgeError;
use crate::models::{AlumnoPayload, Envelope, VacantePayload};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
}

pub type SharedState = Arc<AppState>;

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/db", get(health_db))
        .route("/private/whoami", get(whoami))
        .route("/alumnos", get(list_alumnos).post(create_alumno))
        .route(
            "/alumnos/{id_alumno}",
            get(get_alumno).put(update_alumno).delete(delete_alumno),
        )
        .route("/catalogos/provincias", get(list_provincias))
        .route("/vacantes", get(list_vacantes).post(create_vacante))
        .route(
            "/vacantes/{id_vacante}",
            put(update_vacante).delete(delete_vacante),
        )
        .route(
            "/vacantes/{id_vacante}/alumnos-disponibles",
            get(alumnos_disponibles),
        )
        .route(
            "/vacantes/{id_vacante}/alumnos/{id_alumno}",
            post(assign_alumno).delete(unassign_alumno),
        )
}

// ── Health & identity ─────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(Envelope::ok(
        "UP",
        serde_json::json!({ "status": "running" }),
    ))
}

async fn health_db(State(state): State<SharedState>) -> Result<impl IntoResponse, SgeError> {
    let value = state.db.call(|db| db.health_check()).await?;
    Ok(Json(Envelope::ok(
        "DB OK",
        serde_json::json!({ "select_1": value }),
    )))
}

async fn whoami(user: AuthUser) -> impl IntoResponse {
    Json(Envelope::ok("TOKEN OK", user))
}

// ── Alumnos ───────────────────────────────────────────────────────────

async fn list_alumnos(
    State(state): State<SharedState>,
    _user: AuthUser,
) -> Result<impl IntoResponse, SgeError> {
    let alumnos = state.db.call(|db| db.list_alumnos()).await?;
    Ok(Json(Envelope::ok("Listado de alumnos", alumnos)))
}

async fn get_alumno(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(id_alumno): Path<i64>,
) -> Result<impl IntoResponse, SgeError> {
    let alumno = state.db.call(move |db| db.get_alumno(id_alumno)).await?;
    Ok(Json(Envelope::ok("Detalle de alumno", alumno)))
}

async fn create_alumno(
    State(state): State<SharedState>,
    _user: AuthUser,
    Json(payload): Json<AlumnoPayload>,
) -> Result<impl IntoResponse, SgeError> {
    payload.validate()?;
    state
        .db
        .call(move |db| db.create_alumno(&payload))
        .await?;
    Ok(Json(Envelope::message("Alumno creado")))
}

async fn update_alumno(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(id_alumno): Path<i64>,
    Json(payload): Json<AlumnoPayload>,
) -> Result<impl IntoResponse, SgeError> {
    payload.validate()?;
    state
        .db
        .call(move |db| db.update_alumno(id_alumno, &payload))
        .await?;
    Ok(Json(Envelope::message("Alumno actualizado")))
}

async fn delete_alumno(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(id_alumno): Path<i64>,
) -> Result<impl IntoResponse, SgeError> {
    state.db.call(move |db| db.delete_alumno(id_alumno)).await?;
    Ok(Json(Envelope::message("Alumno eliminado")))
}

// ── Catálogos ─────────────────────────────────────────────────────────

async fn list_provincias(
    State(state): State<SharedState>,
    _user: AuthUser,
) -> Result<impl IntoResponse, SgeError> {
    let provincias = state.db.call(|db| db.list_provincias()).await?;
    Ok(Json(Envelope::data(provincias)))
}

// ── Vacantes ──────────────────────────────────────────────────────────

async fn list_vacantes(
    State(state): State<SharedState>,
    _user: AuthUser,
) -> Result<impl IntoResponse, SgeError> {
    let vacantes = state.db.call(|db| db.list_vacantes()).await?;
    Ok(Json(Envelope::ok("Listado de vacantes", vacantes)))
}

async fn create_vacante(
    State(state): State<SharedState>,
    _user: AuthUser,
    Json(payload): Json<VacantePayload>,
) -> Result<impl IntoResponse, SgeError> {
    payload.validate()?;
    state
        .db
        .call(move |db| db.create_vacante(&payload))
        .await?;
    Ok(Json(Envelope::message("Vacante creada")))
}

async fn update_vacante(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(id_vacante): Path<i64>,
    Json(payload): Json<VacantePayload>,
) -> Result<impl IntoResponse, SgeError> {
    payload.validate()?;
    state
        .db
        .call(move |db| db.update_vacante(id_vacante, &payload))
        .await?;
    Ok(Json(Envelope::message("Vacante actualizada")))
}

async fn delete_vacante(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(id_vacante): Path<i64>,
) -> Result<impl IntoResponse, SgeError> {
    state
        .db
        .call(move |db| db.delete_vacante(id_vacante))
        .await?;
    Ok(Json(Envelope::message("Vacante eliminada")))
}

async fn alumnos_disponibles(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(id_vacante): Path<i64>,
) -> Result<impl IntoResponse, SgeError> {
    let candidatos = state
        .db
        .call(move |db| db.alumnos_disponibles(id_vacante))
        .await?;
    Ok(Json(Envelope::ok("Alumnos disponibles", candidatos)))
}

// ── Asignaciones ──────────────────────────────────────────────────────

async fn assign_alumno(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path((id_vacante, id_alumno)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, SgeError> {
    state
        .db
        .call(move |db| db.assign_alumno(id_vacante, id_alumno))
        .await?;
    Ok(Json(Envelope::message("Alumno asignado a la vacante")))
}

async fn unassign_alumno(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path((id_vacante, id_alumno)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, SgeError> {
    state
        .db
        .call(move |db| db.unassign_alumno(id_vacante, id_alumno))
        .await?;
    Ok(Json(Envelope::message("Alumno desasignado de la vacante")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SgeDb;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const TOKEN: &str = "tok-tests";

    fn test_app() -> Router {
        let db = SgeDb::new_in_memory().unwrap();
        let tipo_centro = db.insert_tipo_entidad("CENTRO EDUCATIVO").unwrap();
        let tipo_empresa = db.insert_tipo_entidad("EMPRESA").unwrap();
        db.insert_entidad("IES La Marina", tipo_centro).unwrap();
        db.insert_entidad("Acme SL", tipo_empresa).unwrap();
        db.insert_ciclo("DAM").unwrap();
        db.insert_provincia("Valencia").unwrap();
        db.insert_provincia("Alicante").unwrap();
        db.insert_usuario("raquel", 1, Some(TOKEN)).unwrap();

        let state = Arc::new(AppState {
            db: DbHandle::new(db),
        });
        api_router().with_state(state)
    }

    fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
        req.header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["data"]["status"], "running");
    }

    #[tokio::test]
    async fn health_db_runs_select_one() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health/db")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["data"]["select_1"], 1);
    }

    #[tokio::test]
    async fn missing_token_is_401() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/alumnos")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(resp).await;
        assert_eq!(json["ok"], false);
        assert_eq!(json["message"], "Token no enviado");
    }

    #[tokio::test]
    async fn unknown_token_is_401() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/alumnos")
                    .header(header::AUTHORIZATION, "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(resp).await;
        assert_eq!(json["message"], "Token inválido");
    }

    #[tokio::test]
    async fn whoami_echoes_identity() {
        let app = test_app();
        let resp = app
            .oneshot(
                authed(Request::builder().uri("/private/whoami"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["message"], "TOKEN OK");
        assert_eq!(json["data"]["usuario"], "raquel");
        assert_eq!(json["data"]["id_rol"], 1);
    }

    #[tokio::test]
    async fn provincias_listing_has_null_message() {
        let app = test_app();
        let resp = app
            .oneshot(
                authed(Request::builder().uri("/catalogos/provincias"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert!(json["message"].is_null());
        assert_eq!(json["data"][0]["provincia"], "Alicante");
        assert_eq!(json["data"][1]["provincia"], "Valencia");
    }

    #[tokio::test]
    async fn create_alumno_validation_error_is_400() {
        let app = test_app();
        let payload = serde_json::json!({
            "nif_nie": "12345678Z",
            "nombre": "Lucía",
            "apellidos": "García",
            "fecha_nacimiento": "2006-03-14",
            "id_entidad_centro": 1,
            "id_ciclo": 1,
            "curso": 3,
            "telefono": "600111222"
        });
        let resp = app
            .oneshot(
                authed(Request::builder().method("POST").uri("/alumnos"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["ok"], false);
        assert!(json["data"].is_null());
    }

    #[tokio::test]
    async fn create_alumno_wrong_center_type_is_400() {
        let app = test_app();
        let payload = serde_json::json!({
            "nif_nie": "12345678Z",
            "nombre": "Lucía",
            "apellidos": "García",
            "fecha_nacimiento": "2006-03-14",
            "id_entidad_centro": 2,
            "id_ciclo": 1,
            "curso": 1,
            "telefono": "600111222"
        });
        let resp = app
            .oneshot(
                authed(Request::builder().method("POST").uri("/alumnos"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(
            json["message"],
            "La entidad seleccionada no es un CENTRO EDUCATIVO"
        );
    }

    #[tokio::test]
    async fn duplicate_nif_is_409() {
        let app = test_app();
        let payload = serde_json::json!({
            "nif_nie": "12345678Z",
            "nombre": "Lucía",
            "apellidos": "García",
            "fecha_nacimiento": "2006-03-14",
            "id_entidad_centro": 1,
            "id_ciclo": 1,
            "curso": 1,
            "telefono": "600111222"
        });
        for expected in [StatusCode::OK, StatusCode::CONFLICT] {
            let resp = app
                .clone()
                .oneshot(
                    authed(Request::builder().method("POST").uri("/alumnos"))
                        .header(header::CONTENT_TYPE, "application/json")
                        .body(Body::from(payload.to_string()))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(resp.status(), expected);
        }
    }

    #[tokio::test]
    async fn get_missing_alumno_is_404() {
        let app = test_app();
        let resp = app
            .oneshot(
                authed(Request::builder().uri("/alumnos/99"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json = body_json(resp).await;
        assert_eq!(json["message"], "Alumno no encontrado");
    }
}
