use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::sync::SyncOutcome;
use crate::{
    error::AppResult,
    store::{Permission, Role, DEFAULT_GUARD},
    validation,
};

/// Body of `POST /roles` and `POST /permissions`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateNamedRequest {
    pub name: String,
    pub guard_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedInput {
    pub name: String,
    pub guard_name: String,
}

impl CreateNamedRequest {
    pub fn validate(self) -> AppResult<NamedInput> {
        Ok(NamedInput {
            name: validation::required("name", &self.name)?,
            guard_name: validation::optional(self.guard_name)
                .unwrap_or_else(|| DEFAULT_GUARD.to_string()),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SyncPermissionsRequest {
    pub permissions: Vec<String>,
}

impl SyncPermissionsRequest {
    pub fn validate(self) -> AppResult<BTreeSet<String>> {
        validation::name_set("permissions", self.permissions)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SyncRolesRequest {
    pub roles: Vec<String>,
}

impl SyncRolesRequest {
    pub fn validate(self) -> AppResult<BTreeSet<String>> {
        validation::name_set("roles", self.roles)
    }
}

#[derive(Debug, Serialize)]
pub struct RolesResponse {
    pub roles: Vec<Role>,
}

#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoleWithPermissions {
    pub role: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RolesWithPermissionsResponse {
    pub roles: Vec<RoleWithPermissions>,
}

#[derive(Debug, Serialize)]
pub struct RoleCreatedResponse {
    pub message: &'static str,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct PermissionCreatedResponse {
    pub message: &'static str,
    pub permission: Permission,
}

#[derive(Debug, Serialize)]
pub struct RoleSyncResponse {
    pub role: String,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

#[derive(Debug, Serialize)]
pub struct UserSyncResponse {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}
