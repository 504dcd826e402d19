//! Session issuing on top of the external auth script.
//!
//! A session is an HS256 token carrying the user's email, name, role and the
//! user's *session epoch*. The epoch is a per-user counter; bumping it
//! (logout, revocation, failed hydration) invalidates every token issued
//! before.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use tracing::info;

use crate::{
    error::{PortalError, PortalResult},
    middleware::auth::decode_access_token,
    models::{
        auth::{AuthenticatedUser, Claims},
        user::{
            normalize_email, AccessDenial, AccessStatus, PortalUser, SessionResponse,
            UpdateProfileRequest, UserRole,
        },
    },
    services::{apps_script::AppsScriptClient, live::LiveHub, metrics, profiles::ProfileService},
};

pub const SUSPENDED_MESSAGE: &str = "Seu acesso está suspenso. Procure um administrador.";

fn epoch_key(email: &str) -> String {
    format!("session_epoch:{}", normalize_email(email))
}

#[async_trait]
pub trait SessionEpochs: Send + Sync {
    async fn current(&self, email: &str) -> anyhow::Result<u64>;
    /// Advance the epoch, returning the new value.
    async fn bump(&self, email: &str) -> anyhow::Result<u64>;
}

#[derive(Clone)]
pub struct RedisSessionEpochs {
    redis: redis::aio::MultiplexedConnection,
}

impl RedisSessionEpochs {
    pub fn new(redis: redis::aio::MultiplexedConnection) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl SessionEpochs for RedisSessionEpochs {
    async fn current(&self, email: &str) -> anyhow::Result<u64> {
        let mut conn = self.redis.clone();
        let epoch: Option<u64> = redis::cmd("GET")
            .arg(epoch_key(email))
            .query_async(&mut conn)
            .await?;
        Ok(epoch.unwrap_or(0))
    }

    async fn bump(&self, email: &str) -> anyhow::Result<u64> {
        let mut conn = self.redis.clone();
        let epoch: u64 = redis::cmd("INCR")
            .arg(epoch_key(email))
            .query_async(&mut conn)
            .await?;
        Ok(epoch)
    }
}

pub fn generate_access_token(
    user: &PortalUser,
    epoch: u64,
    secret: &str,
    ttl_seconds: u64,
) -> anyhow::Result<String> {
    let now = Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: normalize_email(&user.email),
        name: user.display_name.clone(),
        role: user.role(),
        epoch,
        iat: now,
        exp: now + ttl_seconds as usize,
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

/// Re-read the stored access of `email`; a denied user loses every session.
/// Call after any change to the user's role or flag.
pub async fn enforce_access(
    profiles: &ProfileService,
    epochs: &dyn SessionEpochs,
    email: &str,
) -> PortalResult<AccessStatus> {
    let status = profiles.access_status(email).await?;
    if !status.has_access {
        epochs.bump(email).await?;
        info!("sessions of {} ended: {:?}", normalize_email(email), status.reason);
    }
    Ok(status)
}

#[derive(Clone)]
pub struct AuthService {
    script: AppsScriptClient,
    profiles: ProfileService,
    epochs: Arc<dyn SessionEpochs>,
    hub: LiveHub,
    jwt_secret: String,
    ttl_seconds: u64,
}

impl AuthService {
    pub fn new(
        script: AppsScriptClient,
        profiles: ProfileService,
        epochs: Arc<dyn SessionEpochs>,
        hub: LiveHub,
        jwt_secret: impl Into<String>,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            script,
            profiles,
            epochs,
            hub,
            jwt_secret: jwt_secret.into(),
            ttl_seconds,
        }
    }

    pub async fn sign_up(
        &self,
        name: &str,
        email: &str,
        password: &str,
        birthday: &str,
    ) -> PortalResult<SessionResponse> {
        let result = match self.script.sign_up(name, email, password, birthday).await {
            Ok(user) => self.open_session(user).await,
            Err(e) => Err(e.into()),
        };
        let status = if result.is_ok() { "success" } else { "failure" };
        metrics::SIGNUPS_COUNTER.with_label_values(&[status]).inc();
        result
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> PortalResult<SessionResponse> {
        let result = match self.script.sign_in(email, password).await {
            Ok(user) => self.open_session(user).await,
            Err(e) => Err(e.into()),
        };
        let status = if result.is_ok() { "success" } else { "failure" };
        metrics::LOGINS_COUNTER.with_label_values(&[status]).inc();
        result
    }

    /// Enrich a freshly authenticated user and issue a token, unless the
    /// account is suspended or still awaiting approval.
    async fn open_session(&self, user: PortalUser) -> PortalResult<SessionResponse> {
        let user = self.profiles.ensure_profile(user).await?;
        if !user.is_active() {
            return Err(PortalError::Forbidden(SUSPENDED_MESSAGE.into()));
        }
        if user.role() == UserRole::Pendente {
            info!("{} authenticated but awaits approval", user.email);
            return Ok(SessionResponse { token: None, user });
        }

        let token = self.issue(&user).await?;
        info!("session opened for {}", user.email);
        Ok(SessionResponse { token: Some(token), user })
    }

    async fn issue(&self, user: &PortalUser) -> PortalResult<String> {
        let epoch = self.epochs.current(&user.email).await?;
        Ok(generate_access_token(user, epoch, &self.jwt_secret, self.ttl_seconds)?)
    }

    /// Validate a bearer token, including its session epoch.
    pub async fn authenticate(&self, token: &str) -> PortalResult<AuthenticatedUser> {
        let user = decode_access_token(token, &self.jwt_secret)
            .map_err(|_| PortalError::Unauthorized("Sessão inválida ou expirada.".into()))?;
        if user.epoch != self.epochs.current(&user.email).await? {
            return Err(PortalError::Unauthorized("Sessão encerrada. Entre novamente.".into()));
        }
        Ok(user)
    }

    /// Re-read the stored profile of a signed-in user. A suspended or
    /// pending account is logged out everywhere.
    pub async fn hydrate(&self, caller: &AuthenticatedUser) -> PortalResult<PortalUser> {
        let user = self
            .profiles
            .ensure_profile(PortalUser {
                email: caller.email.clone(),
                display_name: caller.name.clone(),
                ..Default::default()
            })
            .await?;

        let status = if !user.is_active() {
            AccessStatus::denied(AccessDenial::Revoked)
        } else if user.role() == UserRole::Pendente {
            AccessStatus::denied(AccessDenial::Pending)
        } else {
            return Ok(user);
        };

        self.revoke(&caller.email).await?;
        let message = status.message().unwrap_or(SUSPENDED_MESSAGE);
        Err(PortalError::Forbidden(message.into()))
    }

    /// Update the caller's own profile and re-issue their token.
    pub async fn update_profile(
        &self,
        caller: &AuthenticatedUser,
        update: &UpdateProfileRequest,
    ) -> PortalResult<SessionResponse> {
        if update.is_empty() {
            return Err(PortalError::Validation("Nenhum dado para atualizar.".into()));
        }

        let user = self.script.update_profile(&caller.email, update).await?;
        if let Some(photo) = &update.photo_url {
            self.profiles.persist_photo(&caller.email, photo.as_deref()).await?;
        }
        self.refresh(user).await
    }

    /// Store a processed avatar and re-issue the caller's token.
    pub async fn update_photo(
        &self,
        caller: &AuthenticatedUser,
        data_url: &str,
    ) -> PortalResult<SessionResponse> {
        self.profiles.persist_photo(&caller.email, Some(data_url)).await?;
        let user = PortalUser {
            email: caller.email.clone(),
            display_name: caller.name.clone(),
            ..Default::default()
        };
        self.refresh(user).await
    }

    async fn refresh(&self, user: PortalUser) -> PortalResult<SessionResponse> {
        let user = self.profiles.ensure_profile(user).await?;
        let token = self.issue(&user).await?;
        Ok(SessionResponse { token: Some(token), user })
    }

    pub async fn request_password_reset(&self, email: &str) -> PortalResult<String> {
        if email.trim().is_empty() {
            return Err(PortalError::Validation("Informe o email.".into()));
        }
        Ok(self.script.request_reset(email.trim()).await?)
    }

    pub async fn confirm_password_reset(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> PortalResult<String> {
        if email.trim().is_empty() || code.trim().is_empty() || new_password.is_empty() {
            return Err(PortalError::Validation(
                "Email, código e nova senha são obrigatórios.".into(),
            ));
        }
        let msg = self
            .script
            .confirm_reset(email.trim(), code.trim(), new_password)
            .await?;
        // Old sessions die with the old password.
        self.revoke(email).await?;
        Ok(msg)
    }

    pub async fn logout(&self, caller: &AuthenticatedUser) -> PortalResult<()> {
        self.revoke(&caller.email).await?;
        info!("{} logged out", caller.email);
        Ok(())
    }

    /// Invalidate every outstanding token of `email`.
    pub async fn revoke(&self, email: &str) -> PortalResult<()> {
        self.epochs.bump(email).await?;
        Ok(())
    }

    /// Admin toggle of a user's active flag.
    pub async fn set_access(&self, email: &str, is_active: bool) -> PortalResult<AccessStatus> {
        self.profiles.update_access(email, is_active).await?;
        let state = if is_active { "granted" } else { "revoked" };
        metrics::ACCESS_CHANGES_COUNTER.with_label_values(&[state]).inc();
        self.apply_access(email).await
    }

    /// Admin change of a user's role.
    pub async fn set_role(&self, email: &str, role: UserRole) -> PortalResult<AccessStatus> {
        self.profiles.update_role(email, role).await?;
        metrics::ACCESS_CHANGES_COUNTER
            .with_label_values(&[&format!("role:{role}")])
            .inc();
        self.apply_access(email).await
    }

    async fn apply_access(&self, email: &str) -> PortalResult<AccessStatus> {
        let status = enforce_access(&self.profiles, self.epochs.as_ref(), email).await?;
        self.hub.publish_access(email, status);
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::{InMemoryPhotoStore, InMemoryProfileStore, InMemorySessionEpochs};

    const SECRET: &str = "test-secret";

    fn service() -> (AuthService, ProfileService, LiveHub) {
        let (auth, profiles, hub, _) = service_with_epochs();
        (auth, profiles, hub)
    }

    fn service_with_epochs() -> (AuthService, ProfileService, LiveHub, Arc<InMemorySessionEpochs>) {
        let profiles = ProfileService::new(
            Arc::new(InMemoryProfileStore::new()),
            Arc::new(InMemoryPhotoStore::new()),
        );
        let hub = LiveHub::new();
        let epochs = Arc::new(InMemorySessionEpochs::new());
        let script = AppsScriptClient::new(reqwest::Client::new(), "http://127.0.0.1:9/exec");
        let auth = AuthService::new(
            script,
            profiles.clone(),
            epochs.clone(),
            hub.clone(),
            SECRET,
            3600,
        );
        (auth, profiles, hub, epochs)
    }

    fn user(email: &str) -> PortalUser {
        PortalUser {
            email: email.into(),
            display_name: "Ana".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn active_user_gets_a_token_that_authenticates() {
        let (auth, _, _) = service();
        let session = auth.open_session(user("Ana@Icone.com")).await.unwrap();
        let token = session.token.unwrap();

        let caller = auth.authenticate(&token).await.unwrap();
        assert_eq!(caller.email, "ana@icone.com");
        assert_eq!(caller.name, "Ana");
        assert_eq!(caller.role, UserRole::User);
    }

    #[tokio::test]
    async fn pending_user_gets_no_token() {
        let (auth, profiles, _) = service();
        profiles.ensure_profile(user("p@icone.com")).await.unwrap();
        profiles.update_role("p@icone.com", UserRole::Pendente).await.unwrap();

        let session = auth.open_session(user("p@icone.com")).await.unwrap();
        assert!(session.token.is_none());
        assert_eq!(session.user.role, Some(UserRole::Pendente));
    }

    #[tokio::test]
    async fn suspended_user_cannot_open_a_session() {
        let (auth, profiles, _) = service();
        profiles.ensure_profile(user("s@icone.com")).await.unwrap();
        profiles.update_access("s@icone.com", false).await.unwrap();

        let err = auth.open_session(user("s@icone.com")).await.unwrap_err();
        assert!(matches!(err, PortalError::Forbidden(ref m) if m == SUSPENDED_MESSAGE));
    }

    #[tokio::test]
    async fn logout_invalidates_old_tokens_only() {
        let (auth, _, _) = service();
        let old = auth.open_session(user("a@b.c")).await.unwrap().token.unwrap();
        let caller = auth.authenticate(&old).await.unwrap();

        auth.logout(&caller).await.unwrap();
        assert!(matches!(
            auth.authenticate(&old).await,
            Err(PortalError::Unauthorized(_))
        ));

        let fresh = auth.open_session(user("a@b.c")).await.unwrap().token.unwrap();
        assert!(auth.authenticate(&fresh).await.is_ok());
    }

    #[tokio::test]
    async fn garbage_tokens_are_rejected() {
        let (auth, _, _) = service();
        assert!(matches!(
            auth.authenticate("not-a-jwt").await,
            Err(PortalError::Unauthorized(_))
        ));

        let foreign = generate_access_token(&user("a@b.c"), 0, "other-secret", 60).unwrap();
        assert!(matches!(
            auth.authenticate(&foreign).await,
            Err(PortalError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn hydrate_logs_out_revoked_users() {
        let (auth, profiles, _) = service();
        let token = auth.open_session(user("h@i.j")).await.unwrap().token.unwrap();
        let caller = auth.authenticate(&token).await.unwrap();

        let hydrated = auth.hydrate(&caller).await.unwrap();
        assert_eq!(hydrated.is_active, Some(true));

        profiles.update_access("h@i.j", false).await.unwrap();
        let err = auth.hydrate(&caller).await.unwrap_err();
        assert!(matches!(err, PortalError::Forbidden(_)));
        assert!(auth.authenticate(&token).await.is_err());
    }

    #[tokio::test]
    async fn admin_revocation_publishes_and_kills_sessions() {
        let (auth, _, hub) = service();
        let token = auth.open_session(user("r@s.t")).await.unwrap().token.unwrap();
        let mut rx = hub.subscribe_access();

        let status = auth.set_access("r@s.t", false).await.unwrap();
        assert_eq!(status, AccessStatus::denied(AccessDenial::Revoked));
        assert_eq!(rx.recv().await.unwrap().status, status);
        assert!(auth.authenticate(&token).await.is_err());

        let status = auth.set_access("r@s.t", true).await.unwrap();
        assert!(status.has_access);

        let status = auth.set_role("r@s.t", UserRole::Pendente).await.unwrap();
        assert_eq!(status, AccessStatus::denied(AccessDenial::Pending));
    }

    #[tokio::test]
    async fn out_of_band_revocation_is_enforced_on_tokens() {
        let (auth, profiles, _, epochs) = service_with_epochs();
        let token = auth.open_session(user("c@l.i")).await.unwrap().token.unwrap();

        // What `portal-admin set-access --active false` does.
        profiles.update_access("c@l.i", false).await.unwrap();
        let status = enforce_access(&profiles, epochs.as_ref(), "c@l.i").await.unwrap();
        assert!(!status.has_access);
        assert!(matches!(
            auth.authenticate(&token).await,
            Err(PortalError::Unauthorized(_))
        ));

        // Granting access back leaves fresh sessions alone.
        profiles.update_access("c@l.i", true).await.unwrap();
        let fresh = auth.open_session(user("c@l.i")).await.unwrap().token.unwrap();
        assert!(enforce_access(&profiles, epochs.as_ref(), "c@l.i").await.unwrap().has_access);
        assert!(auth.authenticate(&fresh).await.is_ok());
    }

    #[tokio::test]
    async fn demotion_to_pending_from_the_cli_ends_sessions() {
        let (auth, profiles, _, epochs) = service_with_epochs();
        let token = auth.open_session(user("d@e.f")).await.unwrap().token.unwrap();

        profiles.update_role("d@e.f", UserRole::Pendente).await.unwrap();
        enforce_access(&profiles, epochs.as_ref(), "d@e.f").await.unwrap();
        assert!(auth.authenticate(&token).await.is_err());
    }

    #[tokio::test]
    async fn empty_profile_update_is_rejected_locally() {
        let (auth, _, _) = service();
        let caller = AuthenticatedUser {
            email: "a@b.c".into(),
            name: "A".into(),
            role: UserRole::User,
            epoch: 0,
        };
        let err = auth
            .update_profile(&caller, &UpdateProfileRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));
    }

    #[tokio::test]
    async fn photo_update_refreshes_the_session() {
        let (auth, profiles, _) = service();
        let caller = AuthenticatedUser {
            email: "f@g.h".into(),
            name: "F".into(),
            role: UserRole::User,
            epoch: 0,
        };
        let session = auth.update_photo(&caller, "data:image/jpeg;base64,AAAA").await.unwrap();
        assert_eq!(session.user.photo_url.as_deref(), Some("data:image/jpeg;base64,AAAA"));
        assert!(session.token.is_some());
        assert_eq!(
            profiles.photo_of("f@g.h").await.unwrap().as_deref(),
            Some("data:image/jpeg;base64,AAAA")
        );
    }
}
