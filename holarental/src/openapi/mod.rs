//! OpenAPI documentation for the marketplace API.
//!
//! [`ApiDoc`] covers every endpoint under `/api`. The document is served at
//! `/api-docs/openapi.json` and rendered with Scalar at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{api, errors::ErrorBody, validation::FieldError};

/// Session cookie and bearer token schemes referenced by the handlers.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "session_token".to_string(),
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                    "holarental_session",
                    "Session cookie set by `POST /auth/login` and `POST /auth/register`",
                ))),
            );
            components.security_schemes.insert(
                "bearer_token".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "A session token from the login response, or a Supabase access token when Supabase \
                            sign-in is enabled:\n\n```\nAuthorization: Bearer YOUR_TOKEN\n```",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "HolaRental API",
        description = "Rental marketplace: listings, rooms, contracts, payments, disputes and chat."
    ),
    servers(
        (url = "/api", description = "HolaRental API")
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::config::get_config,
        api::handlers::auth::get_registration_info,
        api::handlers::auth::register,
        api::handlers::auth::login,
        api::handlers::auth::logout,
        api::handlers::auth::change_password,
        api::handlers::auth::me,
        api::handlers::users::list_users,
        api::handlers::users::get_user,
        api::handlers::users::update_user_roles,
        api::handlers::users::delete_user,
        api::handlers::users::get_profile,
        api::handlers::users::update_profile,
        api::handlers::users::set_verification,
        api::handlers::housing_areas::create_housing_area,
        api::handlers::housing_areas::list_housing_areas,
        api::handlers::housing_areas::get_housing_area,
        api::handlers::housing_areas::update_housing_area,
        api::handlers::housing_areas::delete_housing_area,
        api::handlers::housing_areas::review_housing_area,
        api::handlers::rooms::create_room,
        api::handlers::rooms::list_area_rooms,
        api::handlers::rooms::search_rooms,
        api::handlers::rooms::get_room,
        api::handlers::rooms::update_room,
        api::handlers::rooms::delete_room,
        api::handlers::contracts::create_contract,
        api::handlers::contracts::list_contracts,
        api::handlers::contracts::get_contract,
        api::handlers::contracts::sign_contract,
        api::handlers::contracts::cancel_contract,
        api::handlers::contracts::request_extension,
        api::handlers::contracts::respond_extension,
        api::handlers::contracts::request_termination,
        api::handlers::contracts::confirm_termination,
        api::handlers::contracts::withdraw_termination,
        api::handlers::transactions::create_transaction,
        api::handlers::transactions::list_transactions,
        api::handlers::transactions::get_transaction,
        api::handlers::transactions::cancel_transaction,
        api::handlers::transactions::create_refund,
        api::handlers::payments::create_checkout,
        api::handlers::payments::sync_payment,
        api::handlers::payments::zalopay_callback,
        api::handlers::disputes::create_dispute,
        api::handlers::disputes::list_disputes,
        api::handlers::disputes::get_dispute,
        api::handlers::disputes::review_dispute,
        api::handlers::disputes::withdraw_dispute,
        api::handlers::disputes::resolve_dispute,
        api::handlers::chat::open_conversation,
        api::handlers::chat::list_conversations,
        api::handlers::chat::list_messages,
        api::handlers::chat::send_message,
        api::handlers::chat::mark_read,
        api::handlers::chat::stream_messages,
    ),
    components(
        schemas(
            ErrorBody,
            FieldError,
            api::models::config::PublicConfigResponse,
            api::models::auth::RegisterRequest,
            api::models::auth::LoginRequest,
            api::models::auth::ChangePasswordRequest,
            api::models::auth::AuthResponse,
            api::models::auth::AuthSuccessResponse,
            api::models::auth::RegistrationInfo,
            api::models::auth::MeResponse,
            api::models::users::Role,
            api::models::users::Gender,
            api::models::users::UserResponse,
            api::models::users::UserRolesUpdate,
            api::models::users::ProfileResponse,
            api::models::users::ProfileUpdate,
            api::models::users::VerificationUpdate,
            api::models::housing_areas::HousingAreaStatus,
            api::models::housing_areas::HousingAreaCreate,
            api::models::housing_areas::HousingAreaUpdate,
            api::models::housing_areas::HousingAreaReview,
            api::models::housing_areas::HousingAreaResponse,
            api::models::rooms::RoomStatus,
            api::models::rooms::RoomCreate,
            api::models::rooms::RoomUpdate,
            api::models::rooms::RoomResponse,
            api::models::contracts::ContractStatus,
            api::models::contracts::ContractRole,
            api::models::contracts::ContractCreate,
            api::models::contracts::ExtensionRequest,
            api::models::contracts::ExtensionDecision,
            api::models::contracts::TerminationRequest,
            api::models::contracts::ContractResponse,
            api::models::transactions::TransactionKind,
            api::models::transactions::TransactionStatus,
            api::models::transactions::PaymentMethod,
            api::models::transactions::TransactionCreate,
            api::models::transactions::TransactionCreateResponse,
            api::models::transactions::RefundCreate,
            api::models::transactions::TransactionResponse,
            api::models::payments::CheckoutResponse,
            api::models::payments::PaymentSyncResponse,
            api::models::payments::ZaloPayCallbackRequest,
            api::models::payments::ZaloPayCallbackResponse,
            api::models::disputes::DisputeCategory,
            api::models::disputes::DisputeStatus,
            api::models::disputes::DisputeResolution,
            api::models::disputes::DisputeCreate,
            api::models::disputes::DisputeResolve,
            api::models::disputes::DisputeResponse,
            api::models::chat::ConversationCreate,
            api::models::chat::ConversationResponse,
            api::models::chat::MessageCreate,
            api::models::chat::MessageResponse,
            api::models::chat::ReadReceiptResponse,
        )
    ),
    tags(
        (name = "config", description = "Public marketplace settings"),
        (name = "auth", description = "Registration, login and sessions"),
        (name = "users", description = "Accounts, roles and profiles"),
        (name = "housing_areas", description = "Listings and their moderation"),
        (name = "rooms", description = "Rooms and room search"),
        (name = "contracts", description = "Rental contracts and their lifecycle"),
        (name = "transactions", description = "Deposits, service fees, boosts and refunds"),
        (name = "payments", description = "ZaloPay checkout and callbacks"),
        (name = "disputes", description = "Contract disputes"),
        (name = "chat", description = "Conversations, messages and the live message stream"),
    )
)]
pub struct ApiDoc;
