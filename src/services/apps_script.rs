//! Client for the external script endpoint that owns credentials.
//!
//! The script accepts `POST` bodies as `text/plain` JSON (it parses
//! `e.postData.contents` itself) and `GET` query strings for the password
//! reset actions. Every reply is a JSON document with an optional `ok`
//! flag and a `msg`.

use reqwest::{header, Client};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::user::{PortalUser, UpdateProfileRequest};

const INVALID_POST_ACTION: &str = "Ação POST inválida";

#[derive(Debug, Error)]
pub enum AppsScriptError {
    #[error("A resposta da rede não foi bem-sucedida (status: {0})")]
    Status(u16),
    #[error("O script retornou uma página inesperada. Verifique as permissões de acesso do script.")]
    UnexpectedHtml,
    #[error("Erro de configuração do servidor: a ação solicitada não está implementada no script.")]
    ActionNotImplemented,
    #[error("Resposta inválida do servidor.")]
    InvalidResponse,
    #[error("{0}")]
    Backend(String),
    #[error("Falha na comunicação com o servidor: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Lowercase hex SHA-256; the script stores password digests, never plaintext.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Interpret a raw script reply.
pub fn parse_reply(status: u16, body: &str) -> Result<Value, AppsScriptError> {
    if !(200..300).contains(&status) {
        return Err(AppsScriptError::Status(status));
    }
    if body.to_lowercase().contains("<html") {
        tracing::error!("auth script returned HTML instead of JSON");
        return Err(AppsScriptError::UnexpectedHtml);
    }

    let data: Value = serde_json::from_str(body).map_err(|e| {
        tracing::error!("auth script reply is not JSON: {e}");
        AppsScriptError::InvalidResponse
    })?;

    if data.get("ok") == Some(&Value::Bool(false)) {
        let msg = data.get("msg").and_then(Value::as_str).unwrap_or_default();
        if msg.contains(INVALID_POST_ACTION) {
            tracing::error!("auth script backend error: {msg}");
            return Err(AppsScriptError::ActionNotImplemented);
        }
        let msg = if msg.is_empty() {
            "Ocorreu um erro desconhecido no backend.".to_string()
        } else {
            msg.to_string()
        };
        return Err(AppsScriptError::Backend(msg));
    }

    Ok(data)
}

/// Pull the `user` object out of a reply, or fail with the script's message.
pub fn reply_user(data: &Value, fallback: &str) -> Result<PortalUser, AppsScriptError> {
    match data.get("user") {
        Some(user) if user.is_object() => {
            serde_json::from_value(user.clone()).map_err(|_| AppsScriptError::InvalidResponse)
        }
        _ => Err(AppsScriptError::Backend(reply_msg(data).unwrap_or(fallback).to_string())),
    }
}

fn reply_msg(data: &Value) -> Option<&str> {
    data.get("msg").and_then(Value::as_str).filter(|m| !m.is_empty())
}

/// Build the `updateProfile` payload from the fields present in `update`.
pub fn update_profile_payload(email: &str, update: &UpdateProfileRequest) -> Value {
    let mut payload = Map::new();
    payload.insert("action".into(), json!("updateProfile"));
    payload.insert("email".into(), json!(email));

    let fields = [
        ("displayName", &update.display_name),
        ("photoURL", &update.photo_url),
        ("birthday", &update.birthday),
        ("cpf", &update.cpf),
    ];
    for (name, value) in fields {
        if let Some(value) = value {
            payload.insert(name.into(), json!(value));
        }
    }

    Value::Object(payload)
}

#[derive(Clone)]
pub struct AppsScriptClient {
    client: Client,
    url: String,
}

impl AppsScriptClient {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }

    async fn post(&self, payload: &Value) -> Result<Value, AppsScriptError> {
        let response = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "text/plain;charset=utf-8")
            .body(payload.to_string())
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        parse_reply(status, &body)
    }

    async fn get(&self, params: &[(&str, &str)]) -> Result<Value, AppsScriptError> {
        let response = self.client.get(&self.url).query(params).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        parse_reply(status, &body)
    }

    pub async fn sign_up(
        &self,
        name: &str,
        email: &str,
        password: &str,
        birthday: &str,
    ) -> Result<PortalUser, AppsScriptError> {
        let data = self
            .post(&json!({
                "action": "signUp",
                "name": name,
                "email": email,
                "passwordHash": sha256_hex(password),
                "birthday": birthday,
            }))
            .await?;
        reply_user(&data, "Ocorreu um erro ao criar a conta.")
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<PortalUser, AppsScriptError> {
        let data = self
            .post(&json!({
                "action": "signIn",
                "email": email,
                "passwordHash": sha256_hex(password),
            }))
            .await?;
        reply_user(&data, "Ocorreu um erro ao fazer login.")
    }

    pub async fn update_profile(
        &self,
        email: &str,
        update: &UpdateProfileRequest,
    ) -> Result<PortalUser, AppsScriptError> {
        let data = self.post(&update_profile_payload(email, update)).await?;
        reply_user(&data, "Ocorreu um erro ao atualizar o perfil.")
    }

    pub async fn request_reset(&self, email: &str) -> Result<String, AppsScriptError> {
        let data = self.get(&[("action", "requestReset"), ("email", email)]).await?;
        Ok(reply_msg(&data).unwrap_or_default().to_string())
    }

    /// The script hashes `new_password` itself.
    pub async fn confirm_reset(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<String, AppsScriptError> {
        let data = self
            .get(&[
                ("action", "confirmReset"),
                ("email", email),
                ("code", code),
                ("newPassword", new_password),
            ])
            .await?;
        Ok(reply_msg(&data).unwrap_or_default().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::UserRole;

    #[test]
    fn password_digest_is_lowercase_hex_sha256() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn non_success_status_is_reported() {
        assert!(matches!(parse_reply(500, "{}"), Err(AppsScriptError::Status(500))));
    }

    #[test]
    fn html_reply_is_rejected() {
        let err = parse_reply(200, "<!DOCTYPE html><HTML><body>Login</body></HTML>").unwrap_err();
        assert!(matches!(err, AppsScriptError::UnexpectedHtml));
    }

    #[test]
    fn backend_failure_carries_message() {
        let err = parse_reply(200, r#"{"ok":false,"msg":"Senha incorreta."}"#).unwrap_err();
        assert_eq!(err.to_string(), "Senha incorreta.");

        let err = parse_reply(200, r#"{"ok":false}"#).unwrap_err();
        assert_eq!(err.to_string(), "Ocorreu um erro desconhecido no backend.");

        let err = parse_reply(200, r#"{"ok":false,"msg":"Ação POST inválida: updateProfile"}"#).unwrap_err();
        assert!(matches!(err, AppsScriptError::ActionNotImplemented));
    }

    #[test]
    fn invalid_json_is_rejected() {
        assert!(matches!(parse_reply(200, "not json"), Err(AppsScriptError::InvalidResponse)));
    }

    #[test]
    fn reply_without_user_uses_script_message() {
        let data = json!({ "ok": true, "msg": "Conta já existe." });
        let err = reply_user(&data, "fallback").unwrap_err();
        assert_eq!(err.to_string(), "Conta já existe.");

        let err = reply_user(&json!({ "ok": true }), "fallback").unwrap_err();
        assert_eq!(err.to_string(), "fallback");

        let user = reply_user(
            &json!({ "ok": true, "user": { "email": "a@b.c", "displayName": "A" } }),
            "fallback",
        )
        .unwrap();
        assert_eq!(user.email, "a@b.c");

        let user = reply_user(
            &json!({ "ok": true, "user": { "email": "a@b.c", "role": "Admin", "isActive": 1 } }),
            "fallback",
        )
        .unwrap();
        assert_eq!(user.role(), UserRole::User);
        assert!(user.is_active());
    }

    #[test]
    fn update_payload_only_carries_present_fields() {
        let update = UpdateProfileRequest {
            display_name: Some(Some("ANA".into())),
            photo_url: Some(None),
            ..Default::default()
        };
        let payload = update_profile_payload("ana@icone.com", &update);
        assert_eq!(payload["action"], "updateProfile");
        assert_eq!(payload["displayName"], "ANA");
        assert!(payload["photoURL"].is_null());
        assert!(payload.get("photoURL").is_some());
        assert!(payload.get("birthday").is_none());
        assert!(payload.get("cpf").is_none());
    }
}
