//! Join verification challenges.
//!
//! A user joining a verification room below the room's send threshold gets a
//! phrase by direct message and must repeat it. Session lifecycle:
//!
//! ```text
//! PENDING --match--------------------> VERIFIED
//! PENDING --attempts exhausted-------> FAILED
//! PENDING --room flag off / left-----> EXPIRED
//! ```
//!
//! Terminal sessions are kept for review; a later join after EXPIRED starts
//! a fresh challenge.

use crate::config::Config;
use crate::db::{Database, SessionState, VerificationSession};
use crate::error::{EngineError, EngineResult};
use crate::power::PowerLevels;
use crate::queue::{Action, ActionQueue, created_room};
use crate::transport::{CreateRoomRequest, Transport};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives verification sessions.
pub struct VerificationMachine {
    config: Arc<Config>,
    db: Database,
    transport: Arc<dyn Transport>,
    queue: ActionQueue,
}

impl VerificationMachine {
    pub fn new(
        config: Arc<Config>,
        db: Database,
        transport: Arc<dyn Transport>,
        queue: ActionQueue,
    ) -> Self {
        Self {
            config,
            db,
            transport,
            queue,
        }
    }

    async fn levels(&self, room: &str) -> EngineResult<PowerLevels> {
        self.transport
            .power_levels(room)
            .await
            .map_err(|e| EngineError::from_transport(room, e))
    }

    async fn is_enabled(&self, room: &str) -> EngineResult<bool> {
        Ok(self
            .db
            .rooms()
            .get(room)
            .await?
            .is_some_and(|r| r.verification_enabled))
    }

    fn pick_phrase(&self) -> EngineResult<String> {
        self.config
            .verification
            .phrases
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| EngineError::Configuration("no verification phrases configured".into()))
    }

    /// Direct-message room to use for `user`, reusing an earlier one.
    async fn dm_room(&self, user: &str) -> EngineResult<String> {
        let earlier = self
            .db
            .verification()
            .for_user(user)
            .await?
            .into_iter()
            .find_map(|s| s.dm_room);
        if let Some(dm) = earlier {
            return Ok(dm);
        }

        let output = self
            .queue
            .submit(Action::CreateRoom(CreateRoomRequest {
                name: "Verification".into(),
                is_direct: true,
                invite: vec![user.to_string()],
                ..Default::default()
            }))
            .await?;
        Ok(created_room(output)?)
    }

    async fn send(&self, room: &str, body: String) -> EngineResult<()> {
        self.queue
            .submit(Action::SendMessage {
                room: room.to_string(),
                body,
            })
            .await?;
        Ok(())
    }

    /// Handle a join. Returns the new session if a challenge was issued.
    pub async fn on_join(&self, user: &str, room: &str, now: i64) -> EngineResult<Option<VerificationSession>> {
        if user == self.config.bot.user_id || !self.is_enabled(room).await? {
            return Ok(None);
        }

        if let Some(existing) = self.db.verification().get(user, room).await? {
            match existing.state {
                SessionState::Pending | SessionState::Verified | SessionState::Failed => {
                    debug!(user = %user, room = %room, state = existing.state.as_str(), "Existing verification session kept");
                    return Ok(None);
                }
                SessionState::Expired => {}
            }
        }

        let levels = self.levels(room).await?;
        if levels.user_level(user) >= levels.send_threshold() {
            return Ok(None);
        }

        let phrase = self.pick_phrase()?;
        let dm_room = self.dm_room(user).await?;
        let room_name = self
            .transport
            .room_name(room)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| room.to_string());
        let challenge = self
            .config
            .verification
            .message
            .replace("{room}", &room_name)
            .replace("{phrase}", &phrase);
        self.send(&dm_room, challenge).await?;

        let session = VerificationSession {
            user_id: user.to_string(),
            room_id: room.to_string(),
            dm_room: Some(dm_room),
            phrase: Some(phrase),
            attempts_remaining: self.config.verification.attempts,
            state: SessionState::Pending,
            created_at: now,
            updated_at: now,
        };
        self.db.verification().put(&session).await?;
        info!(user = %user, room = %room, "Verification challenge issued");
        Ok(Some(session))
    }

    /// Case-sensitive matching is exact. Relaxed matching also ignores
    /// surrounding whitespace.
    fn phrase_matches(&self, answer: &str, phrase: &str) -> bool {
        if self.config.verification.case_sensitive {
            answer == phrase
        } else {
            answer.trim().to_lowercase() == phrase.trim().to_lowercase()
        }
    }

    /// Handle a direct message from `user` in `dm_room`.
    ///
    /// Returns the sessions that changed, with their new state.
    pub async fn on_direct_message(
        &self,
        user: &str,
        dm_room: &str,
        body: &str,
        now: i64,
    ) -> EngineResult<Vec<VerificationSession>> {
        let pending = self.db.verification().pending_in_dm(user, dm_room).await?;
        if pending.is_empty() {
            return Ok(pending);
        }

        let any_match = pending
            .iter()
            .any(|s| s.phrase.as_deref().is_some_and(|p| self.phrase_matches(body, p)));

        let mut changed = Vec::with_capacity(pending.len());
        for mut session in pending {
            if !self.is_enabled(&session.room_id).await? {
                changed.push(self.expire(session, now).await?);
                continue;
            }

            let matched = session
                .phrase
                .as_deref()
                .is_some_and(|p| self.phrase_matches(body, p));

            if matched {
                let room = session.room_id.clone();
                match self.verify(session, now).await {
                    Ok(verified) => changed.push(verified),
                    Err(e) => {
                        // session stays pending; a later answer or an admin raise completes it
                        warn!(user = %user, room = %room, error = %e, "Correct answer but verification could not be applied");
                        if let Err(e) = self
                            .send(
                                dm_room,
                                "Your answer was correct, but access could not be granted yet. An administrator will review your request.".into(),
                            )
                            .await
                        {
                            warn!(user = %user, error = %e, "Cannot send verification notice");
                        }
                    }
                }
                continue;
            }
            if any_match {
                // the answer was meant for another room's challenge
                continue;
            }

            session.attempts_remaining = session.attempts_remaining.saturating_sub(1);
            session.updated_at = now;
            if session.attempts_remaining == 0 {
                session.state = SessionState::Failed;
                warn!(user = %user, room = %session.room_id, "Verification failed, attempts exhausted");
                self.db.verification().put(&session).await?;
                self.send(
                    dm_room,
                    "No attempts remaining. An administrator will review your request.".into(),
                )
                .await?;
            } else {
                debug!(user = %user, room = %session.room_id, remaining = session.attempts_remaining, "Verification attempt rejected");
                self.db.verification().put(&session).await?;
                self.send(
                    dm_room,
                    format!(
                        "That is not the phrase. {} attempt(s) remaining.",
                        session.attempts_remaining
                    ),
                )
                .await?;
            }
            changed.push(session);
        }

        Ok(changed)
    }

    async fn verify(&self, mut session: VerificationSession, now: i64) -> EngineResult<VerificationSession> {
        let levels = self.levels(&session.room_id).await?;
        let threshold = levels.send_threshold();
        if levels.user_level(&session.user_id) < threshold {
            self.queue
                .submit(Action::SetUserLevels {
                    room: session.room_id.clone(),
                    changes: vec![(session.user_id.clone(), Some(threshold))],
                })
                .await?;
        }

        session.state = SessionState::Verified;
        session.updated_at = now;
        self.db.verification().put(&session).await?;
        info!(user = %session.user_id, room = %session.room_id, "User verified");

        if let Some(dm) = &session.dm_room
            && let Err(e) = self.send(dm, "Verified, welcome!".into()).await
        {
            warn!(user = %session.user_id, error = %e, "Cannot send verification notice");
        }
        Ok(session)
    }

    async fn expire(&self, mut session: VerificationSession, now: i64) -> EngineResult<VerificationSession> {
        session.state = SessionState::Expired;
        session.updated_at = now;
        self.db.verification().put(&session).await?;
        info!(user = %session.user_id, room = %session.room_id, "Verification session expired");
        Ok(session)
    }

    /// The user left `room`: a pending session expires.
    pub async fn on_leave(&self, user: &str, room: &str, now: i64) -> EngineResult<Option<VerificationSession>> {
        match self.db.verification().get(user, room).await? {
            Some(session) if session.state == SessionState::Pending => {
                Ok(Some(self.expire(session, now).await?))
            }
            _ => Ok(None),
        }
    }

    /// New power levels in `room`: pending users raised to the threshold by
    /// someone else count as verified.
    pub async fn on_power_levels(
        &self,
        room: &str,
        levels: &PowerLevels,
        now: i64,
    ) -> EngineResult<Vec<VerificationSession>> {
        let threshold = levels.send_threshold();
        let mut verified = Vec::new();
        for mut session in self.db.verification().pending_in_room(room).await? {
            if levels.user_level(&session.user_id) >= threshold {
                session.state = SessionState::Verified;
                session.updated_at = now;
                self.db.verification().put(&session).await?;
                info!(user = %session.user_id, room = %room, "Verified externally by power level change");
                verified.push(session);
            }
        }
        Ok(verified)
    }

    /// Turn verification on or off for `room`. Turning it off expires every
    /// pending session. Returns the previous value.
    pub async fn set_enabled(&self, room: &str, enabled: bool, now: i64) -> EngineResult<bool> {
        let rooms = self.db.rooms();
        if rooms.get(room).await?.is_none() {
            rooms.upsert(room, None, false, false, now).await?;
        }
        let previous = rooms.set_verification(room, enabled).await?;

        if !enabled {
            for session in self.db.verification().pending_in_room(room).await? {
                self.expire(session, now).await?;
            }
        }
        if previous != enabled {
            info!(room = %room, enabled, "Verification flag changed");
        }
        Ok(previous)
    }

    /// Align room flags with `verification.enabled_rooms`.
    pub async fn seed(&self, now: i64) -> EngineResult<()> {
        let configured = &self.config.verification.enabled_rooms;
        for room in configured {
            self.set_enabled(room, true, now).await?;
        }
        for room in self.db.rooms().verification_rooms().await? {
            if !configured.contains(&room) {
                self.set_enabled(&room, false, now).await?;
            }
        }
        Ok(())
    }

    /// Record members already at or above the send threshold as verified,
    /// without challenging them. Returns the users recorded.
    pub async fn migrate(&self, room: &str, now: i64) -> EngineResult<Vec<String>> {
        let levels = self.levels(room).await?;
        let threshold = levels.send_threshold();
        let members = self
            .transport
            .joined_members(room)
            .await
            .map_err(|e| EngineError::from_transport(room, e))?;

        let sessions = self.db.verification();
        let mut migrated = Vec::new();
        for member in members {
            if member == self.config.bot.user_id || levels.user_level(&member) < threshold {
                continue;
            }
            if sessions
                .get(&member, room)
                .await?
                .is_some_and(|s| s.state == SessionState::Verified)
            {
                continue;
            }
            sessions
                .put(&VerificationSession {
                    user_id: member.clone(),
                    room_id: room.to_string(),
                    dm_room: None,
                    phrase: None,
                    attempts_remaining: 0,
                    state: SessionState::Verified,
                    created_at: now,
                    updated_at: now,
                })
                .await?;
            migrated.push(member);
        }

        info!(room = %room, migrated = migrated.len(), "Existing members marked verified");
        Ok(migrated)
    }

    /// Per-room verification status of `user`.
    pub async fn status(&self, user: &str) -> EngineResult<Vec<VerificationSession>> {
        Ok(self.db.verification().for_user(user).await?)
    }
}
