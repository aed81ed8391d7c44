use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    rbac::permissions::{ADMIN, USER},
    store::{Gender, NewUser, User},
    validation,
};

/// Largest accepted profile picture.
pub const MAX_PICTURE_BYTES: usize = 2 * 1024 * 1024;

/// Validated profile of a new (or revived) account.
#[derive(Debug, Clone)]
pub struct ProfileFields {
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: String,
    pub birth_date: Option<Date>,
    pub gender: Option<Gender>,
}

impl ProfileFields {
    pub fn into_new_user(self, password_hash: String) -> NewUser {
        NewUser {
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            birth_date: self.birth_date,
            gender: self.gender,
            password_hash,
        }
    }

    /// Overwrites a soft-deleted row in place. Absent optional fields keep
    /// what the row already had.
    pub fn revive(self, user: &mut User, password_hash: String, now: OffsetDateTime) {
        user.first_name = self.first_name;
        user.last_name = self.last_name.or(user.last_name.take());
        user.birth_date = self.birth_date.or(user.birth_date);
        user.gender = self.gender.or(user.gender);
        user.password_hash = password_hash;
        user.deleted_at = None;
        user.updated_at = now;
    }
}

/// Partial profile change. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub birth_date: Option<Date>,
    pub gender: Option<Gender>,
}

impl ProfilePatch {
    pub fn apply(self, user: &mut User) {
        if let Some(v) = self.first_name {
            user.first_name = v;
        }
        if let Some(v) = self.last_name {
            user.last_name = Some(v);
        }
        if let Some(v) = self.email {
            user.email = v;
        }
        if let Some(v) = self.birth_date {
            user.birth_date = Some(v);
        }
        if let Some(v) = self.gender {
            user.gender = Some(v);
        }
    }
}

/// User as shown to clients.
#[derive(Debug, Serialize)]
pub struct UserResource {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: String,
    pub birth_date: Option<String>,
    pub gender: Option<Gender>,
    pub profile_picture_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl UserResource {
    pub fn new(user: &User, profile_picture_url: Option<String>) -> Self {
        Self {
            id: user.id,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            birth_date: user.birth_date.map(|d| d.to_string()),
            gender: user.gender,
            profile_picture_url,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub users: Vec<UserResource>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub message: &'static str,
    pub user: UserResource,
}

/// Body of `POST /users`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateUserRequest {
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: String,
    pub birth_date: Option<String>,
    pub gender: Option<String>,
    pub password: String,
    pub role: Option<String>,
}

#[derive(Debug)]
pub struct CreateUserInput {
    pub profile: ProfileFields,
    pub password: String,
    pub role: &'static str,
}

impl CreateUserRequest {
    pub fn validate(self) -> AppResult<CreateUserInput> {
        let profile = ProfileFields {
            first_name: validation::required("first_name", &self.first_name)?,
            last_name: validation::optional(self.last_name),
            email: validation::email(&self.email)?,
            birth_date: validation::birth_date(self.birth_date.as_deref())?,
            gender: validation::gender(self.gender.as_deref())?,
        };
        validation::password("password", &self.password)?;
        let role = match validation::optional(self.role).as_deref() {
            None | Some("user") => USER,
            Some("admin") => ADMIN,
            Some(_) => return Err(AppError::validation("role must be one of: admin, user")),
        };
        Ok(CreateUserInput {
            profile,
            password: self.password,
            role,
        })
    }
}

/// Body of `PUT /users/:id`, also filled from the multipart text fields of
/// `PUT /user/profile`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub birth_date: Option<String>,
    pub gender: Option<String>,
    #[serde(alias = "password")]
    pub new_password: Option<String>,
    pub current_password: Option<String>,
}

#[derive(Debug, Default)]
pub struct UpdateInput {
    pub patch: ProfilePatch,
    pub new_password: Option<String>,
    pub current_password: Option<String>,
}

impl UpdateUserRequest {
    pub fn validate(self) -> AppResult<UpdateInput> {
        let first_name = match self.first_name {
            Some(raw) => Some(validation::required("first_name", &raw)?),
            None => None,
        };
        let email = match self.email {
            Some(raw) => Some(validation::email(&raw)?),
            None => None,
        };
        let patch = ProfilePatch {
            first_name,
            last_name: validation::optional(self.last_name),
            email,
            birth_date: validation::birth_date(self.birth_date.as_deref())?,
            gender: validation::gender(self.gender.as_deref())?,
        };
        let new_password = self.new_password.filter(|p| !p.is_empty());
        if let Some(p) = &new_password {
            validation::password("new_password", p)?;
        }
        Ok(UpdateInput {
            patch,
            new_password,
            current_password: self.current_password.filter(|p| !p.is_empty()),
        })
    }
}

/// Uploaded profile picture, already checked against the upload contract.
#[derive(Debug, Clone)]
pub struct PictureUpload {
    pub body: Bytes,
    pub content_type: String,
}

impl PictureUpload {
    pub fn new(body: Bytes, content_type: Option<&str>) -> AppResult<Self> {
        let content_type = match content_type {
            Some("image/jpeg") | Some("image/jpg") => "image/jpeg",
            Some("image/png") => "image/png",
            _ => {
                return Err(AppError::validation(
                    "profile_picture must be a jpeg or png image",
                ))
            }
        };
        if body.is_empty() {
            return Err(AppError::validation("profile_picture is empty"));
        }
        if body.len() > MAX_PICTURE_BYTES {
            return Err(AppError::validation("profile_picture must be at most 2 MiB"));
        }
        Ok(Self {
            body,
            content_type: content_type.to_string(),
        })
    }
}
