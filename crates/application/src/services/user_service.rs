use std::sync::Arc;

use domain::{DomainError, ProfileChanges, User, UserEmail, UserId, Username};
use uuid::Uuid;

use crate::{
    clock::Clock, error::ApplicationError, password::PasswordHasher, repository::UserRepository,
};

#[derive(Debug, Clone)]
pub struct RegisterUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone)]
pub struct AuthenticateUserRequest {
    /// 含 `@` 时先按邮箱查找，找不到再按用户名查找
    pub email_or_username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ChangePasswordRequest {
    pub user_id: Uuid,
    pub old_password: String,
    pub new_password: String,
    pub confirm_new_password: String,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar: Option<Option<String>>,
    pub bio: Option<Option<String>>,
}

pub struct UserServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub clock: Arc<dyn Clock>,
}

pub struct UserService {
    deps: UserServiceDependencies,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn register(&self, request: RegisterUserRequest) -> Result<User, ApplicationError> {
        if request.password != request.confirm_password {
            return Err(DomainError::invalid_argument("password", "Passwords do not match").into());
        }
        if request.password.is_empty() {
            return Err(DomainError::invalid_argument("password", "cannot be empty").into());
        }

        let username = Username::parse(request.username)?;
        let email = UserEmail::parse(request.email)?;

        if self
            .deps
            .user_repository
            .find_by_username(username.clone())
            .await?
            .is_some()
            || self
                .deps
                .user_repository
                .find_by_email(email.clone())
                .await?
                .is_some()
        {
            return Err(DomainError::UserAlreadyExists.into());
        }

        let password_hash = self.deps.password_hasher.hash(&request.password).await?;
        let now = self.deps.clock.now();
        let user = User::register(
            UserId::from(Uuid::new_v4()),
            username,
            email,
            password_hash,
            now,
        );

        let stored = self.deps.user_repository.create(user).await?;
        tracing::info!(user_id = %stored.id, username = %stored.username, "user registered");
        Ok(stored)
    }

    pub async fn authenticate(
        &self,
        request: AuthenticateUserRequest,
    ) -> Result<User, ApplicationError> {
        let user = self
            .find_by_email_or_username(&request.email_or_username)
            .await?
            .ok_or(ApplicationError::Authentication)?;

        let password_ok = self
            .deps
            .password_hasher
            .verify(&request.password, &user.password)
            .await?;
        if !password_ok || !user.is_active {
            return Err(ApplicationError::Authentication);
        }

        let now = self.deps.clock.now();
        self.deps
            .user_repository
            .set_online(user.id, true, now)
            .await?;

        let mut user = user;
        user.set_online(true, now);
        Ok(user)
    }

    async fn find_by_email_or_username(
        &self,
        identifier: &str,
    ) -> Result<Option<User>, ApplicationError> {
        if identifier.contains('@') {
            if let Ok(email) = UserEmail::parse(identifier) {
                if let Some(user) = self.deps.user_repository.find_by_email(email).await? {
                    return Ok(Some(user));
                }
            }
        }
        match Username::parse(identifier) {
            Ok(username) => Ok(self.deps.user_repository.find_by_username(username).await?),
            Err(_) => Ok(None),
        }
    }

    pub async fn change_password(
        &self,
        request: ChangePasswordRequest,
    ) -> Result<(), ApplicationError> {
        if request.new_password != request.confirm_new_password {
            return Err(
                DomainError::invalid_argument("new_password", "New passwords do not match").into(),
            );
        }
        if request.new_password.is_empty() {
            return Err(DomainError::invalid_argument("new_password", "cannot be empty").into());
        }

        let mut user = self.get_user(request.user_id).await?;
        let old_ok = self
            .deps
            .password_hasher
            .verify(&request.old_password, &user.password)
            .await?;
        if !old_ok {
            return Err(ApplicationError::Authentication);
        }

        let hashed = self.deps.password_hasher.hash(&request.new_password).await?;
        user.set_password(hashed, self.deps.clock.now());
        self.deps.user_repository.update(user).await?;
        Ok(())
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<User, ApplicationError> {
        self.deps
            .user_repository
            .find_by_id(UserId::from(user_id))
            .await?
            .ok_or_else(|| DomainError::UserNotFound.into())
    }

    pub async fn list_users(&self, search: Option<String>) -> Result<Vec<User>, ApplicationError> {
        let search = search.filter(|query| !query.trim().is_empty());
        Ok(self.deps.user_repository.search(search).await?)
    }

    pub async fn update_user(
        &self,
        user_id: Uuid,
        request: UpdateUserRequest,
    ) -> Result<User, ApplicationError> {
        let mut user = self.get_user(user_id).await?;

        let username = request.username.map(Username::parse).transpose()?;
        let email = request.email.map(UserEmail::parse).transpose()?;

        if let Some(username) = &username {
            if username != &user.username {
                let taken = self
                    .deps
                    .user_repository
                    .find_by_username(username.clone())
                    .await?
                    .is_some();
                if taken {
                    return Err(DomainError::UserAlreadyExists.into());
                }
            }
        }
        if let Some(email) = &email {
            if email != &user.email {
                let taken = self
                    .deps
                    .user_repository
                    .find_by_email(email.clone())
                    .await?
                    .is_some();
                if taken {
                    return Err(DomainError::UserAlreadyExists.into());
                }
            }
        }

        user.update_profile(
            ProfileChanges {
                username,
                email,
                first_name: request.first_name,
                last_name: request.last_name,
                avatar: request.avatar,
                bio: request.bio,
            },
            self.deps.clock.now(),
        );
        Ok(self.deps.user_repository.update(user).await?)
    }

    pub async fn delete_user(&self, user_id: Uuid) -> Result<(), ApplicationError> {
        self.deps
            .user_repository
            .delete(UserId::from(user_id))
            .await
            .map_err(|err| match err {
                domain::RepositoryError::NotFound => {
                    ApplicationError::Domain(DomainError::UserNotFound)
                }
                other => ApplicationError::from(other),
            })
    }

    pub async fn mark_offline(&self, user_id: Uuid) -> Result<(), ApplicationError> {
        let now = self.deps.clock.now();
        self.deps
            .user_repository
            .set_online(UserId::from(user_id), false, now)
            .await?;
        Ok(())
    }
}
