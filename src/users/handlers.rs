use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, FromRef, Multipart, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use bytes::Bytes;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{extractors::AuthUser, jwt::JwtKeys, password},
    avatars,
    state::AppState,
    users::{
        dto::{
            is_valid_email, AvatarResponse, CredentialsRequest, LoginResponse, LoginUser,
            SignupResponse, SignupUser, UpdateSubscriptionRequest, UserInfoResponse,
        },
        repo::User,
    },
};

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/logout", get(logout))
        .route("/current", get(current))
        .route("/", patch(update_subscription))
        .route("/avatars", patch(update_avatar))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024)) // 10MB, avatars included
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SignupResponse>), (StatusCode, String)> {
    // Validator detail is deliberately not surfaced here
    let Ok(Json(mut payload)) = payload else {
        warn!("signup body failed validation");
        return Err((
            StatusCode::BAD_REQUEST,
            "Please fill all required fields".into(),
        ));
    };
    payload.email = payload.email.trim().to_lowercase();

    if payload.password.is_empty() || !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "signup body failed validation");
        return Err((
            StatusCode::BAD_REQUEST,
            "Please fill all required fields".into(),
        ));
    }

    // Uniqueness check and insert are separate statements; two concurrent
    // signups can both pass this check, the UNIQUE constraint then fails the
    // slower one with a 500.
    match User::find_by_email(&state.db, &payload.email).await {
        Ok(Some(_)) => {
            warn!(email = %payload.email, "email already registered");
            return Err((StatusCode::CONFLICT, "Email in use".into()));
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "find_by_email failed");
            return Err(internal(e));
        }
    }

    let avatar_url = avatars::identicon_url(&payload.email);
    let hash = password::hash_password(&payload.password).map_err(internal)?;

    let user = User::create(&state.db, &payload.email, &hash, &avatar_url)
        .await
        .map_err(|e| {
            error!(error = %e, "create user failed");
            internal(e)
        })?;

    info!(user_id = %user.id, email = %user.email, "user signed up");
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            // password carries the stored hash, not the plaintext
            user: SignupUser {
                email: user.email,
                password: user.password_hash,
                avatar_url: user.avatar_url,
            },
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, (StatusCode, String)> {
    let Ok(Json(mut payload)) = payload else {
        warn!("login body failed validation");
        return Err((StatusCode::BAD_REQUEST, "Invalid input".into()));
    };
    payload.email = payload.email.trim().to_lowercase();

    if payload.password.is_empty() || !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "login body failed validation");
        return Err((StatusCode::BAD_REQUEST, "Invalid input".into()));
    }

    let user = match User::find_by_email(&state.db, &payload.email).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            warn!(email = %payload.email, "login with unknown email");
            return Err((StatusCode::UNAUTHORIZED, "Wrong email".into()));
        }
        Err(e) => {
            error!(error = %e, "find_by_email failed");
            return Err(internal(e));
        }
    };

    let ok = password::verify_password(&payload.password, &user.password_hash)
        .map_err(internal)?;
    if !ok {
        warn!(user_id = %user.id, "login with wrong password");
        return Err((StatusCode::UNAUTHORIZED, "Wrong Password".into()));
    }

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id).map_err(internal)?;

    // Overwriting the stored token invalidates any earlier session
    let user = User::set_token(&state.db, user.id, Some(&token))
        .await
        .map_err(internal)?;

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(Json(LoginResponse {
        token,
        user: LoginUser { email: user.email },
    }))
}

#[instrument(skip(state, user))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<StatusCode, (StatusCode, String)> {
    User::set_token(&state.db, user.id, None)
        .await
        .map_err(internal)?;
    info!(user_id = %user.id, "user logged out");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(user))]
pub async fn current(AuthUser(user): AuthUser) -> Json<UserInfoResponse> {
    // The gate already loaded the record; no further store access
    Json(UserInfoResponse {
        email: user.email,
        subscription: user.subscription,
    })
}

#[instrument(skip(state, user, payload))]
pub async fn update_subscription(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<UpdateSubscriptionRequest>, JsonRejection>,
) -> Result<Json<UserInfoResponse>, (StatusCode, String)> {
    // Unlike signup/login this endpoint echoes the validator's own message
    let Json(payload) = payload.map_err(|e| {
        warn!(user_id = %user.id, "subscription body failed validation");
        (StatusCode::BAD_REQUEST, e.body_text())
    })?;

    let updated = User::set_subscription(&state.db, user.id, payload.subscription.as_str())
        .await
        .map_err(internal)?;

    info!(user_id = %updated.id, subscription = %updated.subscription, "subscription updated");
    Ok(Json(UserInfoResponse {
        email: updated.email,
        subscription: updated.subscription,
    }))
}

#[instrument(skip(state, user, multipart))]
pub async fn update_avatar(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<AvatarResponse>, (StatusCode, String)> {
    let mut upload: Option<(String, Bytes)> = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("avatar") {
            let original_name = field.file_name().unwrap_or("avatar").to_string();
            let data = field.bytes().await.map_err(internal)?;
            upload = Some((original_name, data));
        }
    }
    let Some((original_name, data)) = upload else {
        error!(user_id = %user.id, "no file uploaded");
        return Err((StatusCode::BAD_REQUEST, "No file uploaded".into()));
    };

    // A processing failure is logged and swallowed; the raw upload is kept
    let data = match avatars::resize_square(&data) {
        Ok(processed) => Bytes::from(processed),
        Err(e) => {
            error!(error = %e, user_id = %user.id, "avatar processing failed, keeping upload as-is");
            data
        }
    };

    let filename = avatars::filename_for(user.id, &original_name);
    let tmp_path = state.config.tmp_dir.join(&filename);
    tokio::fs::write(&tmp_path, &data).await.map_err(internal)?;

    // Last write wins; an earlier avatar with a different extension stays behind
    let dest = state.config.avatars_dir().join(&filename);
    tokio::fs::rename(&tmp_path, &dest).await.map_err(internal)?;

    let avatar_url = avatars::public_url(&filename);
    let updated = User::set_avatar_url(&state.db, user.id, &avatar_url)
        .await
        .map_err(internal)?;

    info!(user_id = %updated.id, avatar = %updated.avatar_url, "avatar updated");
    Ok(Json(AvatarResponse {
        avatar_url: updated.avatar_url,
    }))
}

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::{app::build_app, state::AppState};

    async fn send(req: Request<Body>) -> (StatusCode, String) {
        let app = build_app(AppState::fake());
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let body = res.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    fn json_post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn signup_with_a_missing_field_gets_the_generic_message() {
        let (status, body) = send(json_post("/signup", r#"{"email":"only@example.com"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Please fill all required fields");
    }

    #[tokio::test]
    async fn signup_with_a_malformed_email_gets_the_generic_message() {
        let (status, body) =
            send(json_post("/signup", r#"{"email":"nope","password":"pw"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Please fill all required fields");
    }

    #[tokio::test]
    async fn login_shape_failure_is_invalid_input() {
        let (status, body) = send(json_post("/login", r#"{"password":"pw"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Invalid input");
    }

    #[tokio::test]
    async fn current_without_a_token_is_unauthorized() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/current")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "Not authorized");
    }

    #[tokio::test]
    async fn current_with_a_garbage_token_is_unauthorized() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/current")
            .header(header::AUTHORIZATION, "Bearer not-a-real-token")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn non_bearer_auth_scheme_is_unauthorized() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/logout")
            .header(header::AUTHORIZATION, "Basic dXNlcjpwdw==")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn subscription_update_requires_a_token() {
        let req = Request::builder()
            .method(Method::PATCH)
            .uri("/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"subscription":"pro"}"#))
            .unwrap();
        let (status, _) = send(req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}
