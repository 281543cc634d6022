use axum::{Json, extract::State};

use crate::{
    AppState,
    api::models::{
        auth::{
            AuthResponse, AuthSuccessResponse, ChangePasswordRequest, LoginRequest, LoginResponse, LogoutResponse, MeResponse,
            RegisterRequest, RegisterResponse, RegistrationInfo,
        },
        users::{CurrentUser, ProfileResponse, Role, UserResponse},
    },
    auth::{password, session},
    config::{Config, PasswordConfig},
    db::{
        handlers::{Repository, Users},
        models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    },
    errors::Error,
    validation::{ValidatedJson, Validator},
};

fn registration_open(config: &Config) -> bool {
    config.auth.native.enabled && config.auth.native.allow_registration
}

fn check_password_length(field: &str, password: &str, config: &PasswordConfig) -> Result<(), Error> {
    let length = password.chars().count();
    let mut v = Validator::new();
    if length < config.min_length {
        v.error(field, format!("must be at least {} characters", config.min_length));
    }
    if length > config.max_length {
        v.error(field, format!("must be no more than {} characters", config.max_length));
    }
    v.finish()
}

fn invalid_credentials() -> Error {
    Error::Unauthenticated {
        message: Some("Invalid email or password".to_string()),
    }
}

/// Get registration information
#[utoipa::path(
    get,
    path = "/auth/register",
    tag = "auth",
    responses(
        (status = 200, description = "Registration info", body = RegistrationInfo),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_registration_info(State(state): State<AppState>) -> Json<RegistrationInfo> {
    let enabled = registration_open(&state.config);
    let password = &state.config.auth.native.password;
    Json(RegistrationInfo {
        enabled,
        message: if enabled {
            "Registration is enabled".to_string()
        } else {
            "Registration is disabled".to_string()
        },
        password_min_length: password.min_length,
        password_max_length: password.max_length,
    })
}

/// Register a new account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    tag = "auth",
    responses(
        (status = 201, description = "Account created, session cookie set", body = AuthResponse),
        (status = 400, description = "Invalid input or registration disabled"),
        (status = 409, description = "Email or username already taken"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<RegisterRequest>,
) -> Result<RegisterResponse, Error> {
    if !state.config.auth.native.enabled {
        return Err(Error::bad_request("Native authentication is disabled"));
    }
    if !state.config.auth.native.allow_registration {
        return Err(Error::bad_request("User registration is disabled"));
    }
    check_password_length("password", &request.password, &state.config.auth.native.password)?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;

    let mut user_repo = Users::new(&mut tx);
    if user_repo.get_user_by_email(&request.email).await?.is_some() {
        return Err(Error::conflict("An account with this email address already exists"));
    }

    let password_hash = password::hash_password(request.password).await?;
    let roles = match request.role {
        Some(Role::Landlord) => vec![Role::Tenant, Role::Landlord],
        _ => vec![Role::Tenant],
    };
    let create_request = UserCreateDBRequest {
        username: request.username,
        email: request.email.trim().to_lowercase(),
        display_name: request.display_name,
        avatar_url: None,
        roles,
        auth_source: "native".to_string(),
        password_hash: Some(password_hash),
        external_id: None,
    };

    let created_user = user_repo.create(&create_request).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    tracing::info!(user_id = %created_user.id, roles = ?created_user.roles, "Registered native account");

    let user_response = UserResponse::from(created_user);
    let current_user = CurrentUser::from(user_response.clone());
    let token = session::create_session_token(&current_user, &state.config)?;
    let cookie = create_session_cookie(&token, &state.config);

    let auth_response = AuthResponse {
        user: user_response,
        token,
        message: "Registration successful".to_string(),
    };

    Ok(RegisterResponse { auth_response, cookie })
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Login successful, session cookie set", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, ValidatedJson(request): ValidatedJson<LoginRequest>) -> Result<LoginResponse, Error> {
    if !state.config.auth.native.enabled {
        return Err(Error::bad_request("Native authentication is disabled"));
    }
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut user_repo = Users::new(&mut pool_conn);

    let user = user_repo
        .get_user_by_email(request.email.trim())
        .await?
        .ok_or_else(invalid_credentials)?;

    // Supabase-only accounts have no password
    let password_hash = user.password_hash.clone().ok_or_else(invalid_credentials)?;
    if !password::verify_password(request.password, password_hash).await? {
        return Err(invalid_credentials());
    }

    user_repo.update_last_login(user.id).await?;

    let user_response = UserResponse::from(user);
    let current_user = CurrentUser::from(user_response.clone());
    let token = session::create_session_token(&current_user, &state.config)?;
    let cookie = create_session_cookie(&token, &state.config);

    let auth_response = AuthResponse {
        user: user_response,
        token,
        message: "Login successful".to_string(),
    };

    Ok(LoginResponse { auth_response, cookie })
}

/// Logout (clear session)
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logout successful", body = AuthSuccessResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>) -> LogoutResponse {
    // Create expired cookie to clear session
    let cookie = format!(
        "{}=; Path=/; HttpOnly; Secure; SameSite=Strict; Max-Age=0",
        state.config.auth.native.session.cookie_name
    );

    LogoutResponse {
        auth_response: AuthSuccessResponse {
            message: "Logout successful".to_string(),
        },
        cookie,
    }
}

/// Change password for the authenticated user
#[utoipa::path(
    post,
    path = "/auth/password-change",
    request_body = ChangePasswordRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Password changed successfully", body = AuthSuccessResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Current password is incorrect"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn change_password(
    State(state): State<AppState>,
    current_user: CurrentUser,
    ValidatedJson(request): ValidatedJson<ChangePasswordRequest>,
) -> Result<Json<AuthSuccessResponse>, Error> {
    if !state.config.auth.native.enabled {
        return Err(Error::bad_request("Native authentication is disabled"));
    }
    check_password_length("new_password", &request.new_password, &state.config.auth.native.password)?;

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut user_repo = Users::new(&mut pool_conn);

    let user = user_repo
        .get_by_id(current_user.id)
        .await?
        .ok_or_else(|| Error::Unauthenticated {
            message: Some("User not found".to_string()),
        })?;

    let password_hash = user
        .password_hash
        .ok_or_else(|| Error::bad_request("Cannot change password for accounts that sign in through Supabase"))?;

    if !password::verify_password(request.current_password, password_hash).await? {
        return Err(Error::Unauthenticated {
            message: Some("Current password is incorrect".to_string()),
        });
    }

    let update_request = UserUpdateDBRequest {
        password_hash: Some(password::hash_password(request.new_password).await?),
        ..Default::default()
    };
    user_repo.update(current_user.id, &update_request).await?;

    tracing::info!(user_id = %current_user.id, "Password changed");

    Ok(Json(AuthSuccessResponse {
        message: "Password changed successfully".to_string(),
    }))
}

/// The authenticated user with roles and profile
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Not authenticated"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn me(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<MeResponse>, Error> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut user_repo = Users::new(&mut pool_conn);

    let user = user_repo
        .get_by_id(current_user.id)
        .await?
        .ok_or_else(|| Error::Unauthenticated {
            message: Some("User no longer exists".to_string()),
        })?;
    let detail = user_repo.get_profile(user.id).await?;
    let profile = ProfileResponse::new(&user, detail);

    Ok(Json(MeResponse {
        user: UserResponse::from(user),
        profile,
    }))
}

/// Helper function to create a session cookie
fn create_session_cookie(token: &str, config: &Config) -> String {
    let session_config = &config.auth.native.session;
    let max_age = session_config.timeout.as_secs();

    format!(
        "{}={}; Path=/; HttpOnly; Secure={}; SameSite={}; Max-Age={}",
        session_config.cookie_name, token, session_config.cookie_secure, session_config.cookie_same_site, max_age
    )
}
