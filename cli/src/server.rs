use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use mealflo_core::error::PlanError;
use mealflo_core::models::{
    CsvImportSummary, DayGroupDetail, DayGroupPatch, NewDayGroup, NewPlacement, NewRecipe,
    PlacementDetail, PlacementPatch, Recipe, RecipeDetail, RecipePatch, ShoppingList,
    TodayOverview, User, WeekDetail, parse_iso_date,
};
use mealflo_core::service::MealPlanService;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MiB

/// Username that unauthenticated requests act as under `--no-auth`.
pub const DEV_USERNAME: &str = "dev";

#[derive(Clone)]
struct AppState {
    service: Arc<Mutex<MealPlanService>>,
    dev_user: Option<User>,
}

impl AppState {
    fn service(&self) -> MutexGuard<'_, MealPlanService> {
        self.service.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The user a request was authenticated as.
#[derive(Clone)]
struct AuthUser(User);

// --- Request / Response types ---

#[derive(Deserialize)]
struct SignupRequest {
    username: Option<String>,
}

#[derive(Serialize)]
struct SignupResponse {
    id: i64,
    username: String,
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WeekStartRequest {
    week_start: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsvImportRequest {
    csv_text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShoppingQuery {
    week_id: Option<i64>,
}

#[derive(Deserialize)]
struct OverviewQuery {
    date: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unauthorized,
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            Self::Internal(err) => {
                tracing::error!(error = %format!("{err:#}"), "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<PlanError> for ApiError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::InvalidInput(msg) => Self::BadRequest(msg),
            PlanError::NotFound(_) => Self::NotFound(err.to_string()),
            PlanError::CapacityExceeded { .. } => Self::BadRequest(err.to_string()),
            PlanError::Conflict(msg) => Self::Conflict(msg),
            PlanError::Store(err) => Self::Internal(err),
        }
    }
}

// --- Middleware ---

/// Resolve the bearer token, if any, to a user.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Option<User>, PlanError> {
    let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return Ok(None);
    };
    state.service().authenticate(token)
}

async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let authenticated = match authenticate(&state, request.headers()) {
        Ok(user) => user,
        Err(err) => return ApiError::from(err).into_response(),
    };

    // The dev user only stands in when no credentials were sent at all.
    let has_credentials = request.headers().contains_key(header::AUTHORIZATION);
    let fallback = if has_credentials {
        None
    } else {
        state.dev_user.clone()
    };
    let Some(user) = authenticated.or(fallback) else {
        tracing::debug!(path = %request.uri().path(), "rejected unauthenticated request");
        return ApiError::Unauthorized.into_response();
    };

    request.extensions_mut().insert(AuthUser(user));
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Public handlers ---

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), ApiError> {
    let (user, token) = state
        .service()
        .register_user(req.username.as_deref().unwrap_or_default())?;
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            id: user.id,
            username: user.username,
            token,
        }),
    ))
}

// --- Authenticated handlers ---

async fn me(Extension(AuthUser(user)): Extension<AuthUser>) -> Json<User> {
    Json(user)
}

async fn list_recipes(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Vec<Recipe>>, ApiError> {
    Ok(Json(state.service().list_recipes(user.id)?))
}

async fn create_recipe(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<NewRecipe>,
) -> Result<(StatusCode, Json<RecipeDetail>), ApiError> {
    let detail = state.service().create_recipe(user.id, req)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn get_recipe(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<RecipeDetail>, ApiError> {
    Ok(Json(state.service().get_recipe(user.id, id)?))
}

async fn update_recipe(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(req): Json<RecipePatch>,
) -> Result<Json<RecipeDetail>, ApiError> {
    Ok(Json(state.service().update_recipe(user.id, id, req)?))
}

async fn delete_recipe(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.service().delete_recipe(user.id, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn import_recipes_csv(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<CsvImportRequest>,
) -> Result<(StatusCode, Json<CsvImportSummary>), ApiError> {
    let summary = state
        .service()
        .import_recipes_csv(user.id, req.csv_text.as_deref().unwrap_or_default())?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn create_week(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<WeekStartRequest>,
) -> Result<(StatusCode, Json<WeekDetail>), ApiError> {
    let week = state
        .service()
        .get_or_create_week(user.id, req.week_start.as_deref())?;
    Ok((StatusCode::CREATED, Json(week)))
}

async fn get_week(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<WeekDetail>, ApiError> {
    Ok(Json(state.service().get_week(user.id, id)?))
}

async fn delete_week(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.service().delete_week(user.id, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn copy_week(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(req): Json<WeekStartRequest>,
) -> Result<(StatusCode, Json<WeekDetail>), ApiError> {
    let week = state
        .service()
        .copy_week(user.id, id, req.week_start.as_deref())?;
    Ok((StatusCode::CREATED, Json(week)))
}

async fn create_group(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<NewDayGroup>,
) -> Result<(StatusCode, Json<DayGroupDetail>), ApiError> {
    let group = state.service().create_day_group(user.id, &req)?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn update_group(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(req): Json<DayGroupPatch>,
) -> Result<Json<DayGroupDetail>, ApiError> {
    Ok(Json(state.service().update_day_group(user.id, id, &req)?))
}

async fn delete_group(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.service().delete_day_group(user.id, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_placement(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(group_id): Path<i64>,
    Json(req): Json<NewPlacement>,
) -> Result<(StatusCode, Json<PlacementDetail>), ApiError> {
    let placement = state.service().add_placement(user.id, group_id, &req)?;
    Ok((StatusCode::CREATED, Json(placement)))
}

async fn update_placement(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(req): Json<PlacementPatch>,
) -> Result<Json<PlacementDetail>, ApiError> {
    Ok(Json(state.service().update_placement(user.id, id, &req)?))
}

async fn delete_placement(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.service().delete_placement(user.id, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn shopping_list(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Query(params): Query<ShoppingQuery>,
) -> Result<Json<ShoppingList>, ApiError> {
    let week_id = params
        .week_id
        .ok_or_else(|| ApiError::BadRequest("weekId is required".to_string()))?;
    Ok(Json(state.service().shopping_list(user.id, week_id)?))
}

async fn today_overview(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Query(params): Query<OverviewQuery>,
) -> Result<Json<TodayOverview>, ApiError> {
    let date = match params.date.as_deref() {
        Some(d) => parse_iso_date(Some(d), "date")?,
        None => Local::now().date_naive(),
    };
    Ok(Json(state.service().today_overview(user.id, date)?))
}

// --- Router ---

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/me", get(me))
        .route("/api/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/api/recipes/{id}",
            get(get_recipe).patch(update_recipe).delete(delete_recipe),
        )
        .route("/api/recipes/from-csv", post(import_recipes_csv))
        .route("/api/meal-plans/weeks", post(create_week))
        .route(
            "/api/meal-plans/weeks/{id}",
            get(get_week).delete(delete_week),
        )
        .route("/api/meal-plans/weeks/{id}/copy", post(copy_week))
        .route("/api/meal-groups", post(create_group))
        .route(
            "/api/meal-groups/{id}",
            patch(update_group).delete(delete_group),
        )
        .route("/api/meal-groups/{id}/recipes", post(add_placement))
        .route(
            "/api/meal-group-recipes/{id}",
            patch(update_placement).delete(delete_placement),
        )
        .route("/api/shopping-lists", get(shopping_list))
        .route("/api/overview/today", get(today_overview))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .route("/api/health", get(health))
        .route("/api/auth/signup", post(signup))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    service: MealPlanService,
    port: u16,
    bind: &str,
    no_auth: bool,
) -> anyhow::Result<()> {
    let dev_user = if no_auth {
        Some(service.ensure_user(DEV_USERNAME)?)
    } else {
        None
    };

    if no_auth {
        tracing::warn!(
            user = DEV_USERNAME,
            "authentication disabled (--no-auth); unauthenticated requests act as the dev user"
        );
        if bind != "127.0.0.1" && bind != "localhost" {
            tracing::warn!(%bind, "listening on a non-loopback address with no authentication");
        }
    }

    let state = AppState {
        service: Arc::new(Mutex::new(service)),
        dev_user,
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    tracing::info!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn test_state(no_auth: bool) -> AppState {
        let service = MealPlanService::new_in_memory().unwrap();
        let dev_user = no_auth.then(|| service.ensure_user(DEV_USERNAME).unwrap());
        AppState {
            service: Arc::new(Mutex::new(service)),
            dev_user,
        }
    }

    fn test_app(no_auth: bool) -> Router {
        build_router(test_state(no_auth))
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn signup_token(app: &Router, username: &str) -> String {
        let (status, body) = send(
            app,
            "POST",
            "/api/auth/signup",
            None,
            Some(json!({ "username": username })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["token"].as_str().unwrap().to_string()
    }

    async fn create_recipe(app: &Router, token: &str, title: &str) -> i64 {
        let (status, body) = send(
            app,
            "POST",
            "/api/recipes",
            Some(token),
            Some(json!({
                "title": title,
                "servings": 2,
                "ingredients": [
                    { "name": "Flour", "quantity": 2, "unit": "cup" },
                    { "name": "Milk", "quantity": "1", "unit": "cup" }
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_i64().unwrap()
    }

    async fn create_week(app: &Router, token: &str, start: &str) -> i64 {
        let (status, body) = send(
            app,
            "POST",
            "/api/meal-plans/weeks",
            Some(token),
            Some(json!({ "weekStart": start })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_i64().unwrap()
    }

    async fn create_group(app: &Router, token: &str, week_id: i64, day: &str) -> i64 {
        let (status, body) = send(
            app,
            "POST",
            "/api/meal-groups",
            Some(token),
            Some(json!({ "weekId": week_id, "day": day, "name": "Dinner" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = test_app(false);
        let (status, body) = send(&app, "GET", "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn auth_missing_token_returns_401() {
        let app = test_app(false);
        let (status, body) = send(&app, "GET", "/api/recipes", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthorized");
    }

    #[tokio::test]
    async fn auth_wrong_token_returns_401() {
        let app = test_app(false);
        let (status, _) = send(&app, "GET", "/api/recipes", Some("wrong"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signup_then_me() {
        let app = test_app(false);
        let token = signup_token(&app, " Alice ").await;
        assert_eq!(token.len(), 64);

        let (status, body) = send(&app, "GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "alice");
        assert!(body.get("tokenHash").is_none());
    }

    #[tokio::test]
    async fn signup_duplicate_returns_409() {
        let app = test_app(false);
        signup_token(&app, "alice").await;
        let (status, _) = send(
            &app,
            "POST",
            "/api/auth/signup",
            None,
            Some(json!({ "username": "ALICE" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&app, "POST", "/api/auth/signup", None, Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "username is required");
    }

    #[tokio::test]
    async fn no_auth_mode_uses_dev_user() {
        let app = test_app(true);
        let (status, body) = send(&app, "GET", "/api/auth/me", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], DEV_USERNAME);

        let (status, _) = send(&app, "GET", "/api/auth/me", Some("not-a-token"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let token = signup_token(&app, "alice").await;
        let (status, body) = send(&app, "GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "alice");
    }

    #[tokio::test]
    async fn recipe_crud() {
        let app = test_app(false);
        let token = signup_token(&app, "alice").await;
        let id = create_recipe(&app, &token, "Pancakes").await;

        let (status, body) = send(&app, "GET", &format!("/api/recipes/{id}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Pancakes");
        assert_eq!(body["ingredients"][1]["quantity"], 1.0);
        assert_eq!(body["ingredients"][1]["sortOrder"], 1);

        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/api/recipes/{id}"),
            Some(&token),
            Some(json!({ "servings": 4, "description": null })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["servings"], 4);
        assert_eq!(body["ingredients"].as_array().unwrap().len(), 2);

        let (status, body) = send(&app, "GET", "/api/recipes", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) =
            send(&app, "DELETE", &format!("/api/recipes/{id}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);

        let (status, body) = send(&app, "GET", &format!("/api/recipes/{id}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Recipe not found");
    }

    #[tokio::test]
    async fn create_recipe_without_title_returns_400() {
        let app = test_app(false);
        let token = signup_token(&app, "alice").await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/recipes",
            Some(&token),
            Some(json!({ "title": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Recipe title is required");
    }

    #[tokio::test]
    async fn other_users_data_is_not_found() {
        let app = test_app(false);
        let alice = signup_token(&app, "alice").await;
        let bob = signup_token(&app, "bob").await;
        let recipe = create_recipe(&app, &alice, "Soup").await;
        let week = create_week(&app, &alice, "2024-03-04").await;
        let group = create_group(&app, &alice, week, "2024-03-05").await;

        for uri in [
            format!("/api/recipes/{recipe}"),
            format!("/api/meal-plans/weeks/{week}"),
            format!("/api/shopping-lists?weekId={week}"),
        ] {
            let (status, _) = send(&app, "GET", &uri, Some(&bob), None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/meal-groups/{group}/recipes"),
            Some(&bob),
            Some(json!({ "recipeId": recipe })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Meal group not found");

        let (status, _) = send(
            &app,
            "DELETE",
            &format!("/api/meal-groups/{group}"),
            Some(&bob),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn week_is_idempotent() {
        let app = test_app(false);
        let token = signup_token(&app, "alice").await;
        let a = create_week(&app, &token, "2024-03-04").await;
        let b = create_week(&app, &token, "2024-03-04").await;
        assert_eq!(a, b);

        let (status, body) = send(
            &app,
            "POST",
            "/api/meal-plans/weeks",
            Some(&token),
            Some(json!({ "weekStart": "March 4" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("weekStart"));
    }

    #[tokio::test]
    async fn meal_plan_flow_and_shopping_list() {
        let app = test_app(false);
        let token = signup_token(&app, "alice").await;
        let recipe = create_recipe(&app, &token, "Pancakes").await;
        let week = create_week(&app, &token, "2024-03-04").await;
        let group = create_group(&app, &token, week, "2024-03-05").await;

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/meal-groups/{group}/recipes"),
            Some(&token),
            Some(json!({ "recipeId": recipe })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["mealGroupId"], group);
        assert_eq!(body["plannedServings"], 2);
        assert_eq!(body["recipe"]["title"], "Pancakes");

        let (status, body) = send(
            &app,
            "GET",
            &format!("/api/meal-plans/weeks/{week}"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["weekStart"], "2024-03-04");
        assert_eq!(body["mealGroups"][0]["recipes"][0]["recipeId"], recipe);

        let (status, body) = send(
            &app,
            "GET",
            &format!("/api/shopping-lists?weekId={week}"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["weekId"], week);
        assert_eq!(
            body["items"],
            json!([
                { "name": "Flour", "unit": "cup", "quantity": 2.0 },
                { "name": "Milk", "unit": "cup", "quantity": 1.0 }
            ])
        );

        let (status, body) = send(
            &app,
            "GET",
            "/api/overview/today?date=2024-03-05",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["date"], "2024-03-05");
        assert_eq!(body["mealGroups"][0]["name"], "Dinner");
    }

    #[tokio::test]
    async fn sixth_placement_returns_400() {
        let app = test_app(false);
        let token = signup_token(&app, "alice").await;
        let recipe = create_recipe(&app, &token, "Soup").await;
        let week = create_week(&app, &token, "2024-03-04").await;
        let group = create_group(&app, &token, week, "2024-03-05").await;
        let uri = format!("/api/meal-groups/{group}/recipes");

        for _ in 0..5 {
            let (status, _) = send(&app, "POST", &uri, Some(&token), Some(json!({ "recipeId": recipe }))).await;
            assert_eq!(status, StatusCode::CREATED);
        }
        let (status, body) = send(&app, "POST", &uri, Some(&token), Some(json!({ "recipeId": recipe }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Meal group cannot exceed 5 recipes");
    }

    #[tokio::test]
    async fn placement_update_and_delete() {
        let app = test_app(false);
        let token = signup_token(&app, "alice").await;
        let recipe = create_recipe(&app, &token, "Soup").await;
        let week = create_week(&app, &token, "2024-03-04").await;
        let group = create_group(&app, &token, week, "2024-03-05").await;
        let (_, body) = send(
            &app,
            "POST",
            &format!("/api/meal-groups/{group}/recipes"),
            Some(&token),
            Some(json!({ "recipeId": recipe })),
        )
        .await;
        let placement = body["id"].as_i64().unwrap();
        let uri = format!("/api/meal-group-recipes/{placement}");

        let (status, body) = send(&app, "PATCH", &uri, Some(&token), Some(json!({ "plannedServings": 5 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["plannedServings"], 5);

        let (status, _) = send(&app, "PATCH", &uri, Some(&token), Some(json!({ "plannedServings": 0 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "DELETE", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "DELETE", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn copy_week_shifts_days() {
        let app = test_app(false);
        let token = signup_token(&app, "alice").await;
        let recipe = create_recipe(&app, &token, "Soup").await;
        let week = create_week(&app, &token, "2024-03-04").await;
        let group = create_group(&app, &token, week, "2024-03-05").await;
        send(
            &app,
            "POST",
            &format!("/api/meal-groups/{group}/recipes"),
            Some(&token),
            Some(json!({ "recipeId": recipe })),
        )
        .await;

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/meal-plans/weeks/{week}/copy"),
            Some(&token),
            Some(json!({ "weekStart": "2024-03-11" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["weekStart"], "2024-03-11");
        assert_eq!(body["mealGroups"][0]["day"], "2024-03-12");
        assert_eq!(body["mealGroups"][0]["recipes"][0]["recipeId"], recipe);
    }

    #[tokio::test]
    async fn group_validation_messages() {
        let app = test_app(false);
        let token = signup_token(&app, "alice").await;
        let week = create_week(&app, &token, "2024-03-04").await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/meal-groups",
            Some(&token),
            Some(json!({ "weekId": week, "name": "Lunch" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "day is required");

        let (status, body) = send(
            &app,
            "POST",
            "/api/meal-groups",
            Some(&token),
            Some(json!({ "weekId": 9999, "day": "2024-03-05", "name": "Lunch" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Week not found");
    }

    #[tokio::test]
    async fn csv_import_endpoint() {
        let app = test_app(false);
        let token = signup_token(&app, "alice").await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/recipes/from-csv",
            Some(&token),
            Some(json!({ "csvText": "title,ingredient,quantity,unit\nToast,Bread,2,slice\nToast,Butter,,\n" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["createdCount"], 1);
        assert_eq!(body["recipes"][0]["ingredients"][1]["quantity"], Value::Null);

        let (status, body) = send(&app, "POST", "/api/recipes/from-csv", Some(&token), Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "csvText is required");
    }

    #[tokio::test]
    async fn shopping_list_requires_week_id() {
        let app = test_app(false);
        let token = signup_token(&app, "alice").await;
        let (status, body) = send(&app, "GET", "/api/shopping-lists", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "weekId is required");
    }

    #[tokio::test]
    async fn security_headers_present() {
        let app = test_app(false);
        let response = app
            .oneshot(
                axum::http::Request::get("/api/recipes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(
            response.headers().get("content-security-policy").unwrap(),
            "default-src 'none'"
        );
    }

    #[tokio::test]
    async fn body_size_limit_rejects_oversized() {
        let app = test_app(true);

        let big_body = vec![b' '; BODY_LIMIT + 1];
        let response = app
            .oneshot(
                axum::http::Request::post("/api/recipes")
                    .header("content-type", "application/json")
                    .body(Body::from(big_body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn internal_error_does_not_leak_details() {
        let error = ApiError::from(PlanError::Store(anyhow::anyhow!(
            "secret database path /home/user/.local/share/mealflo/mealflo.db"
        )));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Internal server error");
    }
}
