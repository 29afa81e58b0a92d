//! Server-side session store with refresh-token rotation.
//!
//! Refresh credentials are opaque high-entropy values; only their SHA-256
//! hash is stored. Sessions form a rotation chain through
//! `parent_session_id`, and every member records the chain's root so a
//! replayed token can revoke the whole chain in one statement.

use chrono::{Duration, Utc};
use diesel::prelude::*;
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{NewSession, Session};
use crate::schema::sessions;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("refresh token not recognized")]
    NotFound,
    #[error("refresh token has expired")]
    Expired,
    #[error("refresh token replay detected")]
    Replayed,
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub fn generate_refresh_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct SessionStore;

impl SessionStore {
    /// Opens a fresh rotation chain for a login and returns the session plus
    /// the plaintext refresh token (never stored).
    pub fn issue(
        conn: &mut PgConnection,
        user_id: Uuid,
        workspace_id: Uuid,
        refresh_ttl_seconds: i64,
    ) -> Result<(Session, String), SessionError> {
        let token = generate_refresh_token();
        let session_id = Uuid::new_v4();

        let new_session = NewSession {
            id: session_id,
            user_id,
            workspace_id,
            refresh_token_hash: hash_token(&token),
            parent_session_id: None,
            root_session_id: session_id,
            expires_at: (Utc::now() + Duration::seconds(refresh_ttl_seconds)).naive_utc(),
        };

        let session = diesel::insert_into(sessions::table)
            .values(&new_session)
            .returning(Session::as_returning())
            .get_result(conn)?;

        Ok((session, token))
    }

    /// Rotates a presented refresh token.
    ///
    /// A token that maps to an already-revoked session with a parent is a
    /// replay of a rotated credential: the whole descendant chain is revoked
    /// and the caller gets `Replayed`. Legitimate rotation atomically revokes
    /// the presented session and inserts its successor.
    pub fn rotate(
        conn: &mut PgConnection,
        presented_token: &str,
        refresh_ttl_seconds: i64,
    ) -> Result<(Session, String), SessionError> {
        let token_hash = hash_token(presented_token);

        let presented: Session = sessions::table
            .filter(sessions::refresh_token_hash.eq(&token_hash))
            .select(Session::as_select())
            .first(conn)
            .optional()?
            .ok_or(SessionError::NotFound)?;

        if presented.revoked {
            warn!(
                session_id = %presented.id,
                user_id = %presented.user_id,
                "Rotated refresh token replayed; revoking chain"
            );
            Self::revoke_chain(conn, presented.root_session_id)?;
            return Err(SessionError::Replayed);
        }

        if presented.expires_at < Utc::now().naive_utc() {
            diesel::update(sessions::table.find(presented.id))
                .set(sessions::revoked.eq(true))
                .execute(conn)?;
            return Err(SessionError::Expired);
        }

        let token = generate_refresh_token();
        let successor = NewSession {
            id: Uuid::new_v4(),
            user_id: presented.user_id,
            workspace_id: presented.workspace_id,
            refresh_token_hash: hash_token(&token),
            parent_session_id: Some(presented.id),
            root_session_id: presented.root_session_id,
            expires_at: (Utc::now() + Duration::seconds(refresh_ttl_seconds)).naive_utc(),
        };

        let session = conn.transaction::<Session, diesel::result::Error, _>(|conn| {
            diesel::update(sessions::table.find(presented.id))
                .set(sessions::revoked.eq(true))
                .execute(conn)?;

            diesel::insert_into(sessions::table)
                .values(&successor)
                .returning(Session::as_returning())
                .get_result(conn)
        })?;

        Ok((session, token))
    }

    /// Revokes every session in the chain rooted at `root_session_id`.
    pub fn revoke_chain(
        conn: &mut PgConnection,
        root_session_id: Uuid,
    ) -> Result<usize, SessionError> {
        let count = diesel::update(
            sessions::table.filter(sessions::root_session_id.eq(root_session_id)),
        )
        .set(sessions::revoked.eq(true))
        .execute(conn)?;

        info!(root_session_id = %root_session_id, revoked = count, "Session chain revoked");
        Ok(count)
    }

    /// Logout revokes the whole chain the session belongs to, invalidating
    /// both the refresh credential and every outstanding access token bound
    /// to the chain's sessions.
    pub fn logout(conn: &mut PgConnection, session_id: Uuid) -> Result<usize, SessionError> {
        let root: Option<Uuid> = sessions::table
            .find(session_id)
            .select(sessions::root_session_id)
            .first(conn)
            .optional()?;

        match root {
            Some(root_id) => Self::revoke_chain(conn, root_id),
            None => Ok(0),
        }
    }

    /// Whether the session an access token is bound to is still live.
    /// The store is authoritative: revocation takes effect immediately.
    pub fn is_active(conn: &mut PgConnection, session_id: Uuid) -> Result<bool, SessionError> {
        let session: Option<Session> = sessions::table
            .find(session_id)
            .select(Session::as_select())
            .first(conn)
            .optional()?;

        Ok(matches!(session, Some(s) if !s.revoked))
    }

    pub fn cleanup_expired(conn: &mut PgConnection) -> Result<usize, SessionError> {
        let now = Utc::now().naive_utc();
        let count = diesel::delete(sessions::table.filter(sessions::expires_at.lt(now)))
            .execute(conn)?;
        Ok(count)
    }
}
