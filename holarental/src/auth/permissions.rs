//! Role-based permissions.
//!
//! Each [`Role`] grants a fixed set of `(Resource, Operation)` pairs. Holding an `*All`
//! operation implies the matching `*Own` one. Admins hold everything.
//!
//! Handlers declare their requirement in the signature:
//!
//! ```ignore
//! async fn create_room(
//!     State(state): State<AppState>,
//!     _perm: RequiresPermission<resource::Rooms, operation::CreateOwn>,
//!     current_user: CurrentUser,
//! ) -> Result<Json<RoomResponse>> { ... }
//! ```
//!
//! Row ownership is checked in the handler once the row is loaded.

use std::marker::PhantomData;

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{
    AppState,
    api::models::users::{CurrentUser, Role},
    errors::Error,
    types::{Operation, Permission, Resource},
};

use Operation::*;

const PUBLIC_LISTINGS: &[(Resource, Operation)] = &[
    (Resource::HousingAreas, ReadAll),
    (Resource::Rooms, ReadAll),
    (Resource::Profiles, ReadAll),
];

const TENANT: &[(Resource, Operation)] = &[
    (Resource::Users, ReadOwn),
    (Resource::Users, UpdateOwn),
    (Resource::Profiles, UpdateOwn),
    (Resource::Contracts, CreateOwn),
    (Resource::Contracts, ReadOwn),
    (Resource::Contracts, UpdateOwn),
    (Resource::Disputes, CreateOwn),
    (Resource::Disputes, ReadOwn),
    (Resource::Disputes, UpdateOwn),
    (Resource::Conversations, CreateOwn),
    (Resource::Conversations, ReadOwn),
    (Resource::Conversations, UpdateOwn),
    (Resource::Transactions, CreateOwn),
    (Resource::Transactions, ReadOwn),
    (Resource::Payments, CreateOwn),
    (Resource::Payments, ReadOwn),
];

const LANDLORD: &[(Resource, Operation)] = &[
    (Resource::HousingAreas, CreateOwn),
    (Resource::HousingAreas, UpdateOwn),
    (Resource::HousingAreas, DeleteOwn),
    (Resource::Rooms, CreateOwn),
    (Resource::Rooms, UpdateOwn),
    (Resource::Rooms, DeleteOwn),
];

/// Whether `role` grants exactly `operation` on `resource`.
fn role_grants(role: Role, resource: Resource, operation: Operation) -> bool {
    let pair = (resource, operation);
    match role {
        Role::Admin => true,
        Role::Tenant => PUBLIC_LISTINGS.contains(&pair) || TENANT.contains(&pair),
        Role::Landlord => PUBLIC_LISTINGS.contains(&pair) || TENANT.contains(&pair) || LANDLORD.contains(&pair),
    }
}

pub fn has_permission(user: &CurrentUser, resource: Resource, operation: Operation) -> bool {
    user.roles.iter().any(|role| {
        role_grants(*role, resource, operation)
            || operation
                .widened()
                .is_some_and(|wider| role_grants(*role, resource, wider))
    })
}

/// Whether the user may act on rows they do not own.
pub fn can_read_all_resources(user: &CurrentUser, resource: Resource) -> bool {
    has_permission(user, resource, ReadAll)
}

pub fn check_permission(user: &CurrentUser, resource: Resource, operation: Operation) -> Result<(), Error> {
    if has_permission(user, resource, operation) {
        Ok(())
    } else {
        Err(Error::InsufficientPermissions {
            required: Permission::Allow(resource, operation),
            action: operation,
            resource,
        })
    }
}

pub trait ResourceMarker {
    const RESOURCE: Resource;
}

pub trait OperationMarker {
    const OPERATION: Operation;
}

/// Resource markers for [`RequiresPermission`]
pub mod resource {
    use super::ResourceMarker;
    use crate::types::Resource;

    macro_rules! markers {
        ($($name:ident),* $(,)?) => {
            $(
                pub struct $name;
                impl ResourceMarker for $name {
                    const RESOURCE: Resource = Resource::$name;
                }
            )*
        };
    }

    markers!(
        Users,
        Profiles,
        HousingAreas,
        Rooms,
        Contracts,
        Transactions,
        Payments,
        Disputes,
        Conversations,
        System,
    );
}

/// Operation markers for [`RequiresPermission`]
pub mod operation {
    use super::OperationMarker;
    use crate::types::Operation;

    macro_rules! markers {
        ($($name:ident),* $(,)?) => {
            $(
                pub struct $name;
                impl OperationMarker for $name {
                    const OPERATION: Operation = Operation::$name;
                }
            )*
        };
    }

    markers!(
        CreateAll,
        CreateOwn,
        ReadAll,
        ReadOwn,
        UpdateAll,
        UpdateOwn,
        DeleteAll,
        DeleteOwn,
        SystemAccess,
    );
}

/// Extractor that authenticates the caller and checks `O` on `R` before the handler runs.
pub struct RequiresPermission<R, O> {
    pub user: CurrentUser,
    _marker: PhantomData<(R, O)>,
}

impl<R, O> FromRequestParts<AppState> for RequiresPermission<R, O>
where
    R: ResourceMarker + Send + Sync,
    O: OperationMarker + Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        check_permission(&user, R::RESOURCE, O::OPERATION)?;
        Ok(Self {
            user,
            _marker: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user(roles: &[Role]) -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            username: "an".to_string(),
            email: "an@example.vn".to_string(),
            roles: roles.to_vec(),
            display_name: None,
            avatar_url: None,
        }
    }

    #[test]
    fn test_tenant_can_browse_and_rent_but_not_list() {
        let tenant = user(&[Role::Tenant]);
        assert!(has_permission(&tenant, Resource::Rooms, ReadAll));
        assert!(has_permission(&tenant, Resource::Rooms, ReadOwn));
        assert!(has_permission(&tenant, Resource::Contracts, CreateOwn));
        assert!(has_permission(&tenant, Resource::Payments, CreateOwn));
        assert!(!has_permission(&tenant, Resource::Rooms, CreateOwn));
        assert!(!has_permission(&tenant, Resource::HousingAreas, CreateOwn));
        assert!(!has_permission(&tenant, Resource::Contracts, ReadAll));
        assert!(!has_permission(&tenant, Resource::Users, ReadAll));
        assert!(!has_permission(&tenant, Resource::System, SystemAccess));
    }

    #[test]
    fn test_landlord_extends_tenant() {
        let landlord = user(&[Role::Tenant, Role::Landlord]);
        for op in [CreateOwn, UpdateOwn, DeleteOwn] {
            assert!(has_permission(&landlord, Resource::HousingAreas, op));
            assert!(has_permission(&landlord, Resource::Rooms, op));
        }
        assert!(!has_permission(&landlord, Resource::Rooms, DeleteAll));
        assert!(has_permission(&landlord, Resource::Contracts, CreateOwn));
        assert!(!has_permission(&landlord, Resource::Disputes, UpdateAll));
    }

    #[test]
    fn test_admin_holds_everything() {
        let admin = user(&[Role::Tenant, Role::Admin]);
        for resource in [Resource::Users, Resource::Transactions, Resource::Disputes, Resource::System] {
            for op in [CreateAll, ReadAll, UpdateAll, DeleteAll, SystemAccess] {
                assert!(has_permission(&admin, resource, op));
            }
        }
        assert!(can_read_all_resources(&admin, Resource::Contracts));
    }

    #[test]
    fn test_check_permission_reports_the_missing_pair() {
        let err = check_permission(&user(&[Role::Tenant]), Resource::Users, DeleteAll).unwrap_err();
        match err {
            Error::InsufficientPermissions { required, .. } => {
                assert_eq!(required, Permission::Allow(Resource::Users, DeleteAll));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_no_roles_no_permissions() {
        assert!(!has_permission(&user(&[]), Resource::Rooms, ReadAll));
    }
}
