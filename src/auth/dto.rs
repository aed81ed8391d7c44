use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppResult,
    store::User,
    users::dto::{ProfileFields, UserResource},
    validation,
};

/// Request body for user registration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: String,
    pub birth_date: Option<String>,
    pub gender: Option<String>,
    pub password: String,
}

#[derive(Debug)]
pub struct RegisterInput {
    pub profile: ProfileFields,
    pub password: String,
}

impl RegisterRequest {
    pub fn validate(self) -> AppResult<RegisterInput> {
        let profile = ProfileFields {
            first_name: validation::required("first_name", &self.first_name)?,
            last_name: validation::optional(self.last_name),
            email: validation::email(&self.email)?,
            birth_date: validation::birth_date(self.birth_date.as_deref())?,
            gender: validation::gender(self.gender.as_deref())?,
        };
        validation::password("password", &self.password)?;
        Ok(RegisterInput {
            profile,
            password: self.password,
        })
    }
}

/// Request body for login.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(self) -> AppResult<LoginInput> {
        let email = validation::email(&self.email)?;
        if self.password.is_empty() {
            return Err(crate::error::AppError::validation("password is required"));
        }
        Ok(LoginInput {
            email,
            password: self.password,
        })
    }
}

/// Public part of the user returned after registration and login.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: String,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            email: u.email.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: &'static str,
    pub user: PublicUser,
}

/// Response returned after login.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub user: PublicUser,
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: UserResource,
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}
