//! Room and session registry for the signaling relay.
//!
//! The registry owns two correlated maps: rooms keyed by room code, and
//! sessions keyed by connection identity. Both live behind a single lock and
//! are only reachable through the composite operations ([`Registry::join`],
//! [`Registry::leave`], [`Registry::opponent_of`]), so the join/leave
//! protocol's multi-step updates are atomic and the maps can never drift
//! out of sync.
//!
//! The registry references connections by [`ConnId`] only. It never owns
//! connection I/O; delivering the notifications reported in its results is
//! the relay engine's job.

use std::collections::HashMap;
use std::fmt;

use matchpoint_proto::{ROOM_CODE_LEN, Role};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Identity of a live WebSocket connection, assigned at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(Uuid);

impl ConnId {
    /// Allocates a fresh connection identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Errors produced by registry operations.
///
/// All of these translate to a wire `error` message for the offending
/// connection; none of them changes room state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The room code was not exactly [`ROOM_CODE_LEN`] characters.
    #[error("room code must be exactly {ROOM_CODE_LEN} characters")]
    InvalidRoomCode,
    /// Both slots of the requested room are occupied.
    #[error("room is full")]
    RoomFull,
    /// The connection has no active session.
    #[error("not in a room")]
    NotInRoom,
    /// A session exists but its room does not. Indicates a registry
    /// invariant was violated; never expected in correct operation.
    #[error("room not found")]
    RoomNotFound,
}

/// A two-slot room. `first` is always occupied while the room exists.
#[derive(Debug)]
struct Room {
    first: ConnId,
    second: Option<ConnId>,
}

/// Per-connection membership record.
#[derive(Debug)]
struct Session {
    code: String,
    role: Role,
}

#[derive(Debug, Default)]
struct Inner {
    rooms: HashMap<String, Room>,
    sessions: HashMap<ConnId, Session>,
}

/// How a successful join changed the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// No room existed for the code; one was created with the joiner as
    /// primary.
    Created,
    /// The joiner filled the secondary slot. Carries the primary occupant,
    /// which must also be notified that the room is now full.
    Joined {
        /// The room's primary occupant.
        primary: ConnId,
    },
}

/// Everything a join produced, including the bookkeeping of the implicit
/// leave that runs when the connection was already in a room.
#[derive(Debug, PartialEq, Eq)]
pub struct JoinResult {
    /// Outcome of leaving the previous room, if the connection had one.
    /// Populated even when the join itself fails with [`RegistryError::RoomFull`],
    /// since the leave protocol runs before the join is processed.
    pub prior_leave: Option<LeaveOutcome>,
    /// The join itself.
    pub outcome: Result<JoinOutcome, RegistryError>,
}

/// Notification bookkeeping from a leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// Remaining occupant owed a `peer-left` notification, if any.
    pub peer_left: Option<ConnId>,
    /// Former secondary promoted to primary. Reported for observability;
    /// promotion needs no notification of its own.
    pub promoted: Option<ConnId>,
}

/// The room/session registry.
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Claims or joins the room identified by `code`.
    ///
    /// The code must be exactly [`ROOM_CODE_LEN`] characters; otherwise the
    /// operation fails up front with no state change. If the connection
    /// already occupies a room, the leave protocol for that room runs first
    /// and its bookkeeping is reported in [`JoinResult::prior_leave`].
    pub async fn join(&self, conn: ConnId, code: &str) -> JoinResult {
        if code.chars().count() != ROOM_CODE_LEN {
            return JoinResult {
                prior_leave: None,
                outcome: Err(RegistryError::InvalidRoomCode),
            };
        }

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let prior_leave = leave_locked(inner, conn);

        let outcome = match inner.rooms.get_mut(code) {
            None => {
                inner.rooms.insert(
                    code.to_string(),
                    Room {
                        first: conn,
                        second: None,
                    },
                );
                inner.sessions.insert(
                    conn,
                    Session {
                        code: code.to_string(),
                        role: Role::Primary,
                    },
                );
                Ok(JoinOutcome::Created)
            }
            Some(room) if room.second.is_none() => {
                room.second = Some(conn);
                let primary = room.first;
                inner.sessions.insert(
                    conn,
                    Session {
                        code: code.to_string(),
                        role: Role::Secondary,
                    },
                );
                Ok(JoinOutcome::Joined { primary })
            }
            Some(_) => Err(RegistryError::RoomFull),
        };

        JoinResult {
            prior_leave,
            outcome,
        }
    }

    /// Removes the connection's session and updates its room's slots.
    ///
    /// Returns `None` when the connection has no session (a no-op, safe to
    /// call any number of times). When the departing connection was primary
    /// and a secondary was present, the secondary is promoted and the room
    /// survives under the same code; with no secondary the room is deleted.
    pub async fn leave(&self, conn: ConnId) -> Option<LeaveOutcome> {
        let mut guard = self.inner.lock().await;
        leave_locked(&mut guard, conn)
    }

    /// Looks up the occupant of the other slot of the connection's room.
    ///
    /// `Ok(None)` means the room is half-occupied: nothing to relay to, not
    /// an error.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotInRoom`] when the connection has no session;
    /// [`RegistryError::RoomNotFound`] when the session's room is missing
    /// (an inconsistent-state fault, logged as a bug signal).
    pub async fn opponent_of(&self, conn: ConnId) -> Result<Option<ConnId>, RegistryError> {
        let inner = self.inner.lock().await;
        let session = inner.sessions.get(&conn).ok_or(RegistryError::NotInRoom)?;
        let Some(room) = inner.rooms.get(&session.code) else {
            tracing::error!(
                conn = %conn,
                code = %session.code,
                "session references a missing room"
            );
            return Err(RegistryError::RoomNotFound);
        };
        Ok(match session.role {
            Role::Primary => room.second,
            Role::Secondary => Some(room.first),
        })
    }

    /// Current room and session counts, for the observability side-channel.
    pub async fn counts(&self) -> (usize, usize) {
        let inner = self.inner.lock().await;
        (inner.rooms.len(), inner.sessions.len())
    }
}

/// The leave protocol, run under the registry lock.
///
/// Shared by [`Registry::leave`] and the implicit leave inside
/// [`Registry::join`] so both paths update the two maps identically.
fn leave_locked(inner: &mut Inner, conn: ConnId) -> Option<LeaveOutcome> {
    let session = inner.sessions.remove(&conn)?;

    let Some(room) = inner.rooms.get_mut(&session.code) else {
        // Invariant violation: a session outlived its room. Drop the session
        // and report nothing to notify.
        tracing::error!(
            conn = %conn,
            code = %session.code,
            "leaving session references a missing room"
        );
        return Some(LeaveOutcome {
            peer_left: None,
            promoted: None,
        });
    };

    let outcome = match session.role {
        Role::Primary => {
            if let Some(second) = room.second.take() {
                room.first = second;
                if let Some(peer_session) = inner.sessions.get_mut(&second) {
                    peer_session.role = Role::Primary;
                }
                LeaveOutcome {
                    peer_left: Some(second),
                    promoted: Some(second),
                }
            } else {
                inner.rooms.remove(&session.code);
                LeaveOutcome {
                    peer_left: None,
                    promoted: None,
                }
            }
        }
        Role::Secondary => {
            room.second = None;
            LeaveOutcome {
                peer_left: Some(room.first),
                promoted: None,
            }
        }
    };

    Some(outcome)
}
