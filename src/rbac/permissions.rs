//! Built-in role and permission vocabulary.

pub const USER_VIEW: &str = "user.view";
pub const USER_CREATE: &str = "user.create";
pub const USER_UPDATE: &str = "user.update";
pub const USER_DELETE: &str = "user.delete";

pub const ROLE_VIEW: &str = "role.view";
pub const ROLE_CREATE: &str = "role.create";
pub const ROLE_DELETE: &str = "role.delete";
/// Sync the roles held by a user.
pub const ROLE_ASSIGN_USER: &str = "role.assignUser";

pub const PERMISSION_VIEW: &str = "permission.view";
pub const PERMISSION_CREATE: &str = "permission.create";
pub const PERMISSION_DELETE: &str = "permission.delete";
/// Sync the permissions held by a role.
pub const PERMISSION_ASSIGN_ROLE: &str = "permission.assignRole";

pub const ALL: [&str; 12] = [
    USER_VIEW,
    USER_CREATE,
    USER_UPDATE,
    USER_DELETE,
    ROLE_VIEW,
    ROLE_CREATE,
    ROLE_DELETE,
    PERMISSION_VIEW,
    PERMISSION_CREATE,
    PERMISSION_DELETE,
    ROLE_ASSIGN_USER,
    PERMISSION_ASSIGN_ROLE,
];

/// Passes every permission gate.
pub const SUPER_ADMIN: &str = "super-admin";
pub const ADMIN: &str = "admin";
/// Given to every registered user.
pub const USER: &str = "user";

/// Roles the startup seed creates, with the permissions each one starts with.
pub fn seed_grants() -> Vec<(&'static str, Vec<&'static str>)> {
    let admin = ALL
        .iter()
        .copied()
        .filter(|p| *p != ROLE_ASSIGN_USER && *p != PERMISSION_ASSIGN_ROLE)
        .collect();
    vec![
        (SUPER_ADMIN, ALL.to_vec()),
        (ADMIN, admin),
        (USER, vec![USER_VIEW]),
    ]
}
