use async_trait::async_trait;
use learn_core::model::{ConfirmedGrant, GrantStatus, Language, SessionId};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;
use crate::error::{BlockReason, SessionClientError};

/// The remote system of record for session grants.
///
/// Implementations are stateless request/response adapters. Writing results
/// into the local store is the caller's job.
#[async_trait]
pub trait SessionAuthority: Send + Sync {
    /// Create a pending session with the selected budget.
    ///
    /// # Errors
    ///
    /// Returns `SessionClientError::Blocked` when the authority refuses a new
    /// session, or another variant on transport or decoding failures.
    async fn create(
        &self,
        minutes: i64,
        mood: Option<&str>,
        language: Language,
    ) -> Result<ConfirmedGrant, SessionClientError>;

    /// Activate a pending session. Repeated calls for an already active
    /// session return the same canonical record.
    ///
    /// # Errors
    ///
    /// Returns `SessionClientError` if the activation was not confirmed.
    async fn activate(&self, session_id: &SessionId) -> Result<ConfirmedGrant, SessionClientError>;

    /// The student's latest session while it is still usable (pending or
    /// active), as the authority sees it. `None` when there is nothing to
    /// resume.
    ///
    /// # Errors
    ///
    /// Returns `SessionClientError` on transport, status, or decoding
    /// failures.
    async fn current(&self) -> Result<Option<ConfirmedGrant>, SessionClientError>;

    /// Tell the authority a session has ended.
    ///
    /// # Errors
    ///
    /// Returns `SessionClientError` on transport or status failures.
    async fn end(&self, session_id: &SessionId) -> Result<(), SessionClientError>;
}

/// `SessionAuthority` over the student HTTP API.
#[derive(Clone)]
pub struct HttpSessionClient {
    client: Client,
    config: ApiConfig,
}

impl HttpSessionClient {
    /// Build a client for `config`.
    ///
    /// # Errors
    ///
    /// Returns `reqwest::Error` if the HTTP client cannot be constructed.
    pub fn new(config: ApiConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: config.build_client()?,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    async fn post<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response, SessionClientError> {
        let request = self.client.post(self.config.url(path)).json(body);
        Ok(self.config.authorize(request).send().await?)
    }
}

#[async_trait]
impl SessionAuthority for HttpSessionClient {
    async fn create(
        &self,
        minutes: i64,
        mood: Option<&str>,
        language: Language,
    ) -> Result<ConfirmedGrant, SessionClientError> {
        let payload = CreateRequest {
            minutes,
            mood,
            language: language.code(),
        };
        let response = self.post("create-session", &payload).await?;
        decode_session(response).await
    }

    async fn activate(&self, session_id: &SessionId) -> Result<ConfirmedGrant, SessionClientError> {
        let payload = SessionRequest { session_id };
        let response = self.post("activate-session", &payload).await?;
        let session = decode_session(response).await?;

        if session.status == GrantStatus::Pending {
            return Err(SessionClientError::InvalidResponse(
                "session still pending after activation".into(),
            ));
        }
        if &session.id != session_id {
            return Err(SessionClientError::InvalidResponse(format!(
                "activated session {} instead of {session_id}",
                session.id
            )));
        }
        Ok(session)
    }

    async fn current(&self) -> Result<Option<ConfirmedGrant>, SessionClientError> {
        let request = self.client.get(self.config.url("current-session"));
        let response = self.config.authorize(request).send().await?;
        decode_envelope(response).await
    }

    async fn end(&self, session_id: &SessionId) -> Result<(), SessionClientError> {
        let payload = SessionRequest { session_id };
        let response = self.post("end-session", &payload).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SessionClientError::HttpStatus(status));
        }
        Ok(())
    }
}

async fn decode_session(response: Response) -> Result<ConfirmedGrant, SessionClientError> {
    decode_envelope(response)
        .await?
        .ok_or_else(|| SessionClientError::InvalidResponse("missing session".into()))
}

async fn decode_envelope(response: Response) -> Result<Option<ConfirmedGrant>, SessionClientError> {
    let status = response.status();
    let body = response.bytes().await?;
    let envelope = serde_json::from_slice::<SessionEnvelope>(&body);

    if let Ok(SessionEnvelope {
        blocked: true,
        reason,
        ..
    }) = &envelope
    {
        return Err(SessionClientError::Blocked(BlockReason::from_wire(
            reason.as_deref(),
        )));
    }
    if !status.is_success() {
        return Err(SessionClientError::HttpStatus(status));
    }

    Ok(envelope
        .map_err(|err| SessionClientError::InvalidResponse(err.to_string()))?
        .session)
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    minutes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    mood: Option<&'a str>,
    language: &'static str,
}

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    session_id: &'a SessionId,
}

#[derive(Debug, Deserialize)]
struct SessionEnvelope {
    #[serde(default)]
    blocked: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    session: Option<ConfirmedGrant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_decodes_integer_ids_and_ended_status() {
        let raw = r#"{
            "ok": true,
            "session": {
                "id": 31,
                "minutes_allowed": 10,
                "mood": "happy",
                "language": "en",
                "status": "ended",
                "started_at": "2024-03-01T08:00:00+00:00",
                "ended_at": null
            }
        }"#;
        let envelope: SessionEnvelope = serde_json::from_str(raw).unwrap();
        let session = envelope.session.unwrap();
        assert_eq!(session.id, SessionId::from("31"));
        assert_eq!(session.status, GrantStatus::Expired);
        assert!(session.started_at.is_some());
    }

    #[test]
    fn blocked_body_decodes() {
        let raw = r#"{"ok": false, "blocked": true, "reason": "session_recent"}"#;
        let envelope: SessionEnvelope = serde_json::from_str(raw).unwrap();
        assert!(envelope.blocked);
        assert_eq!(
            BlockReason::from_wire(envelope.reason.as_deref()),
            BlockReason::SessionRecent
        );
    }

    #[test]
    fn session_request_serializes_id_as_text() {
        let id = SessionId::from("9");
        let body = serde_json::to_string(&SessionRequest { session_id: &id }).unwrap();
        assert_eq!(body, r#"{"session_id":"9"}"#);
    }
}
