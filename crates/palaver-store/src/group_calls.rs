//! Group calls and per-member participant status.
//!
//! The host joins the call at creation and every other group member starts
//! out `ringing`. The call itself follows the same lifecycle as a personal
//! call, driven by participant changes:
//!
//! - the first invitee to join moves a ringing call to `ongoing`;
//! - when every invitee has declined a ringing call it becomes `missed`;
//! - when the last joined participant leaves, a ringing call is `cancelled`
//!   and an ongoing one `ended`;
//! - the ring timeout turns a still-ringing call `missed`, and marks invitees
//!   of an ongoing call who never answered as `missed`.
//!
//! Closing a call marks remaining `ringing` participants `missed` and
//! remaining `joined` participants `left`.

use chrono::{DateTime, Utc};
use palaver_shared::channels::group_call_channel;
use palaver_shared::{
    CallEventKind, CallId, CallKind, CallStatus, CallType, GroupId, ParticipantStatus, UserId,
};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use crate::calls::append_call_event;
use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{GroupCall, GroupCallParticipant, GroupCallState};
use crate::sql::{self, parse_col, ts_col, ts_opt_col};

const CALL_COLUMNS: &str = "id, group_id, host_id, call_type, status, channel_name,
    created_at, started_at, ended_at, duration_secs";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Start a call in `group_id` hosted by `host`.
    pub fn create_group_call(
        &mut self,
        group_id: GroupId,
        host: UserId,
        call_type: CallType,
    ) -> Result<GroupCallState> {
        let id = CallId::new();
        let now = sql::now();
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if active_group_call(&tx, group_id)?.is_some() {
            return Err(StoreError::CallInProgress(group_id));
        }

        tx.execute(
            "INSERT INTO group_calls (id, group_id, host_id, call_type, status, channel_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                group_id.to_string(),
                host.to_string(),
                call_type.as_str(),
                CallStatus::Ringing.as_str(),
                group_call_channel(id),
                sql::ts(&now),
            ],
        )?;

        tx.execute(
            "INSERT INTO group_call_participants (call_id, user_id, status, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id.to_string(),
                host.to_string(),
                ParticipantStatus::Joined.as_str(),
                sql::ts(&now),
            ],
        )?;
        let invited = tx.execute(
            "INSERT INTO group_call_participants (call_id, user_id, status)
             SELECT ?1, user_id, ?2 FROM group_members
             WHERE group_id = ?3 AND user_id <> ?4",
            params![
                id.to_string(),
                ParticipantStatus::Ringing.as_str(),
                group_id.to_string(),
                host.to_string(),
            ],
        )?;

        append_call_event(
            &tx,
            id,
            CallKind::Group,
            Some(host),
            CallEventKind::Initiated,
            &serde_json::json!({ "group_id": group_id, "call_type": call_type, "invited": invited }),
            &now,
        )?;

        let state = query_state(&tx, id)?;
        tx.commit()?;

        tracing::debug!(call = %id, group = %group_id, invited, "created group call");
        Ok(state)
    }

    // ------------------------------------------------------------------
    // Participant actions
    // ------------------------------------------------------------------

    /// Answer a ringing invitation. Only current group members may join;
    /// members added after the call started join without an invitation.
    pub fn join_group_call(&mut self, id: CallId, user: UserId) -> Result<GroupCallState> {
        let now = sql::now();
        let tx = immediate(self)?;
        let call = query_group_call(&tx, id)?;
        ensure_active(&call, CallStatus::Ongoing)?;

        let member = tx
            .query_row(
                "SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                params![call.group_id.to_string(), user.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        if member.is_none() {
            return Err(StoreError::NotFound);
        }

        match participant_status(&tx, id, user)? {
            Some(current) => set_participant(&tx, id, user, current, ParticipantStatus::Joined, &now)?,
            None => {
                tx.execute(
                    "INSERT INTO group_call_participants (call_id, user_id, status, joined_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        id.to_string(),
                        user.to_string(),
                        ParticipantStatus::Joined.as_str(),
                        sql::ts(&now),
                    ],
                )?;
            }
        }
        append_call_event(
            &tx,
            id,
            CallKind::Group,
            Some(user),
            CallEventKind::Joined,
            &serde_json::json!({}),
            &now,
        )?;

        if call.status == CallStatus::Ringing {
            let affected = tx.execute(
                "UPDATE group_calls SET status = ?2, started_at = ?3
                 WHERE id = ?1 AND status = ?4",
                params![
                    id.to_string(),
                    CallStatus::Ongoing.as_str(),
                    sql::ts(&now),
                    CallStatus::Ringing.as_str(),
                ],
            )?;
            if affected == 0 {
                return Err(StoreError::InvalidTransition {
                    from: call.status,
                    to: CallStatus::Ongoing,
                });
            }
            append_call_event(
                &tx,
                id,
                CallKind::Group,
                Some(user),
                CallEventKind::Answered,
                &serde_json::json!({ "from": CallStatus::Ringing, "to": CallStatus::Ongoing }),
                &now,
            )?;
        }

        let state = query_state(&tx, id)?;
        tx.commit()?;
        Ok(state)
    }

    /// Turn down a ringing invitation.
    pub fn decline_group_call(&mut self, id: CallId, user: UserId) -> Result<GroupCallState> {
        let now = sql::now();
        let tx = immediate(self)?;
        let call = query_group_call(&tx, id)?;
        ensure_active(&call, CallStatus::Missed)?;

        let current = participant_status(&tx, id, user)?.ok_or(StoreError::NotFound)?;
        set_participant(&tx, id, user, current, ParticipantStatus::Declined, &now)?;
        append_call_event(
            &tx,
            id,
            CallKind::Group,
            Some(user),
            CallEventKind::Declined,
            &serde_json::json!({}),
            &now,
        )?;

        if call.status == CallStatus::Ringing && count_with_status(&tx, id, ParticipantStatus::Ringing)? == 0 {
            finish(&tx, &call, CallStatus::Missed, None, &now)?;
        }

        let state = query_state(&tx, id)?;
        tx.commit()?;
        Ok(state)
    }

    /// Hang up. Closes the call when nobody is left in it.
    pub fn leave_group_call(&mut self, id: CallId, user: UserId) -> Result<GroupCallState> {
        let now = sql::now();
        let tx = immediate(self)?;
        let call = query_group_call(&tx, id)?;
        ensure_active(&call, CallStatus::Ended)?;

        let current = participant_status(&tx, id, user)?.ok_or(StoreError::NotFound)?;
        set_participant(&tx, id, user, current, ParticipantStatus::Left, &now)?;
        append_call_event(
            &tx,
            id,
            CallKind::Group,
            Some(user),
            CallEventKind::Left,
            &serde_json::json!({}),
            &now,
        )?;

        if count_with_status(&tx, id, ParticipantStatus::Joined)? == 0 {
            let to = if call.status == CallStatus::Ringing {
                CallStatus::Cancelled
            } else {
                CallStatus::Ended
            };
            finish(&tx, &call, to, Some(user), &now)?;
        }

        let state = query_state(&tx, id)?;
        tx.commit()?;
        Ok(state)
    }

    /// Take a user who just left the group out of the group's active call:
    /// a pending invitation counts as declined, a joined user leaves. The
    /// call status is re-evaluated the same way as for those actions.
    /// Returns `None` when there is no active call or the user had no open
    /// participant row.
    pub fn withdraw_from_group_call(
        &mut self,
        group_id: GroupId,
        user: UserId,
    ) -> Result<Option<GroupCallState>> {
        let Some(call) = self.active_group_call_for_group(group_id)? else {
            return Ok(None);
        };
        match participant_status(self.conn(), call.id, user)? {
            Some(ParticipantStatus::Ringing) => self.decline_group_call(call.id, user).map(Some),
            Some(ParticipantStatus::Joined) => self.leave_group_call(call.id, user).map(Some),
            _ => Ok(None),
        }
    }

    /// Close the call for everyone: a ringing call is cancelled, an ongoing
    /// one ended. Host authorization is the caller's job.
    pub fn end_group_call(&mut self, id: CallId, actor: UserId) -> Result<GroupCallState> {
        let now = sql::now();
        let tx = immediate(self)?;
        let call = query_group_call(&tx, id)?;
        let to = match call.status {
            CallStatus::Ringing => CallStatus::Cancelled,
            _ => CallStatus::Ended,
        };
        finish(&tx, &call, to, Some(actor), &now)?;

        let state = query_state(&tx, id)?;
        tx.commit()?;
        Ok(state)
    }

    /// Ring timeout. Returns `None` when there was nothing left to expire.
    pub fn expire_group_call(&mut self, id: CallId) -> Result<Option<GroupCallState>> {
        let now = sql::now();
        let tx = immediate(self)?;
        let call = query_group_call(&tx, id)?;

        match call.status {
            CallStatus::Ringing => finish(&tx, &call, CallStatus::Missed, None, &now)?,
            CallStatus::Ongoing => {
                let unanswered = users_with_status(&tx, id, ParticipantStatus::Ringing)?;
                if unanswered.is_empty() {
                    return Ok(None);
                }
                for user in unanswered {
                    set_participant(
                        &tx,
                        id,
                        user,
                        ParticipantStatus::Ringing,
                        ParticipantStatus::Missed,
                        &now,
                    )?;
                    append_call_event(
                        &tx,
                        id,
                        CallKind::Group,
                        None,
                        CallEventKind::Missed,
                        &serde_json::json!({ "user_id": user }),
                        &now,
                    )?;
                }
            }
            _ => return Ok(None),
        }

        let state = query_state(&tx, id)?;
        tx.commit()?;
        Ok(Some(state))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_group_call(&self, id: CallId) -> Result<GroupCall> {
        query_group_call(self.conn(), id)
    }

    pub fn get_group_call_state(&self, id: CallId) -> Result<GroupCallState> {
        query_state(self.conn(), id)
    }

    pub fn get_group_call_participants(&self, id: CallId) -> Result<Vec<GroupCallParticipant>> {
        query_participants(self.conn(), id)
    }

    pub fn active_group_call_for_group(&self, group_id: GroupId) -> Result<Option<GroupCall>> {
        active_group_call(self.conn(), group_id)
    }

    /// Call history of a group, newest first.
    pub fn list_group_calls(&self, group_id: GroupId, limit: u32) -> Result<Vec<GroupCall>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CALL_COLUMNS} FROM group_calls
             WHERE group_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![group_id.to_string(), limit], row_to_group_call)?;
        sql::collect(rows)
    }

    /// Active calls created before `cutoff` that still have someone ringing.
    pub fn list_stale_ringing_group_calls(&self, cutoff: DateTime<Utc>) -> Result<Vec<CallId>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id FROM group_calls c
             WHERE c.status IN (?1, ?2) AND c.created_at < ?3
               AND (c.status = ?1 OR EXISTS (
                    SELECT 1 FROM group_call_participants p
                    WHERE p.call_id = c.id AND p.status = ?4))
             ORDER BY c.created_at ASC",
        )?;
        let rows = stmt.query_map(
            params![
                CallStatus::Ringing.as_str(),
                CallStatus::Ongoing.as_str(),
                sql::ts(&cutoff),
                ParticipantStatus::Ringing.as_str(),
            ],
            |row| parse_col(row, 0),
        )?;
        sql::collect(rows)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn immediate(db: &mut Database) -> Result<Transaction<'_>> {
    Ok(db
        .conn_mut()
        .transaction_with_behavior(TransactionBehavior::Immediate)?)
}

fn ensure_active(call: &GroupCall, wanted: CallStatus) -> Result<()> {
    if call.status.is_terminal() {
        return Err(StoreError::InvalidTransition {
            from: call.status,
            to: wanted,
        });
    }
    Ok(())
}

fn set_participant(
    conn: &Connection,
    id: CallId,
    user: UserId,
    from: ParticipantStatus,
    to: ParticipantStatus,
    now: &DateTime<Utc>,
) -> Result<()> {
    if !from.can_transition_to(to) {
        return Err(StoreError::InvalidParticipantTransition { from, to });
    }
    let stamp = sql::ts(now);
    let (joined_at, left_at) = match to {
        ParticipantStatus::Joined => (Some(stamp), None),
        ParticipantStatus::Left => (None, Some(stamp)),
        _ => (None, None),
    };
    let affected = conn.execute(
        "UPDATE group_call_participants
         SET status = ?3, joined_at = COALESCE(?4, joined_at), left_at = COALESCE(?5, left_at)
         WHERE call_id = ?1 AND user_id = ?2 AND status = ?6",
        params![
            id.to_string(),
            user.to_string(),
            to.as_str(),
            joined_at,
            left_at,
            from.as_str(),
        ],
    )?;
    if affected == 0 {
        return Err(StoreError::InvalidParticipantTransition { from, to });
    }
    Ok(())
}

/// Move the call to a terminal status and close out every participant.
fn finish(
    conn: &Connection,
    call: &GroupCall,
    to: CallStatus,
    actor: Option<UserId>,
    now: &DateTime<Utc>,
) -> Result<()> {
    if !call.status.can_transition_to(to) {
        return Err(StoreError::InvalidTransition {
            from: call.status,
            to,
        });
    }
    let duration = call
        .started_at
        .map(|started| (*now - started).num_seconds().max(0));

    let affected = conn.execute(
        "UPDATE group_calls SET status = ?2, ended_at = ?3, duration_secs = ?4
         WHERE id = ?1 AND status = ?5",
        params![
            call.id.to_string(),
            to.as_str(),
            sql::ts(now),
            duration,
            call.status.as_str(),
        ],
    )?;
    if affected == 0 {
        return Err(StoreError::InvalidTransition {
            from: call.status,
            to,
        });
    }

    conn.execute(
        "UPDATE group_call_participants SET status = ?2
         WHERE call_id = ?1 AND status = ?3",
        params![
            call.id.to_string(),
            ParticipantStatus::Missed.as_str(),
            ParticipantStatus::Ringing.as_str(),
        ],
    )?;
    conn.execute(
        "UPDATE group_call_participants SET status = ?2, left_at = ?3
         WHERE call_id = ?1 AND status = ?4",
        params![
            call.id.to_string(),
            ParticipantStatus::Left.as_str(),
            sql::ts(now),
            ParticipantStatus::Joined.as_str(),
        ],
    )?;

    append_call_event(
        conn,
        call.id,
        CallKind::Group,
        actor,
        CallEventKind::for_status(to),
        &serde_json::json!({ "from": call.status, "to": to, "duration_secs": duration }),
        now,
    )?;

    tracing::debug!(call = %call.id, from = %call.status, to = %to, "group call closed");
    Ok(())
}

fn participant_status(
    conn: &Connection,
    id: CallId,
    user: UserId,
) -> Result<Option<ParticipantStatus>> {
    let status = conn
        .query_row(
            "SELECT status FROM group_call_participants WHERE call_id = ?1 AND user_id = ?2",
            params![id.to_string(), user.to_string()],
            |row| parse_col(row, 0),
        )
        .optional()?;
    Ok(status)
}

fn users_with_status(
    conn: &Connection,
    id: CallId,
    status: ParticipantStatus,
) -> Result<Vec<UserId>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM group_call_participants WHERE call_id = ?1 AND status = ?2",
    )?;
    let rows = stmt.query_map(params![id.to_string(), status.as_str()], |row| {
        parse_col(row, 0)
    })?;
    sql::collect(rows)
}

fn count_with_status(conn: &Connection, id: CallId, status: ParticipantStatus) -> Result<u32> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM group_call_participants WHERE call_id = ?1 AND status = ?2",
        params![id.to_string(), status.as_str()],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn active_group_call(conn: &Connection, group_id: GroupId) -> Result<Option<GroupCall>> {
    let call = conn
        .query_row(
            &format!(
                "SELECT {CALL_COLUMNS} FROM group_calls
                 WHERE group_id = ?1 AND status IN (?2, ?3)
                 ORDER BY created_at DESC LIMIT 1"
            ),
            params![
                group_id.to_string(),
                CallStatus::Ringing.as_str(),
                CallStatus::Ongoing.as_str(),
            ],
            row_to_group_call,
        )
        .optional()?;
    Ok(call)
}

fn query_group_call(conn: &Connection, id: CallId) -> Result<GroupCall> {
    conn.query_row(
        &format!("SELECT {CALL_COLUMNS} FROM group_calls WHERE id = ?1"),
        params![id.to_string()],
        row_to_group_call,
    )
    .map_err(not_found)
}

fn query_participants(conn: &Connection, id: CallId) -> Result<Vec<GroupCallParticipant>> {
    let mut stmt = conn.prepare(
        "SELECT call_id, user_id, status, joined_at, left_at
         FROM group_call_participants WHERE call_id = ?1
         ORDER BY user_id ASC",
    )?;
    let rows = stmt.query_map(params![id.to_string()], |row| {
        Ok(GroupCallParticipant {
            call_id: parse_col(row, 0)?,
            user_id: parse_col(row, 1)?,
            status: parse_col(row, 2)?,
            joined_at: ts_opt_col(row, 3)?,
            left_at: ts_opt_col(row, 4)?,
        })
    })?;
    sql::collect(rows)
}

fn query_state(conn: &Connection, id: CallId) -> Result<GroupCallState> {
    Ok(GroupCallState {
        call: query_group_call(conn, id)?,
        participants: query_participants(conn, id)?,
    })
}

fn row_to_group_call(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupCall> {
    Ok(GroupCall {
        id: parse_col(row, 0)?,
        group_id: parse_col(row, 1)?,
        host_id: parse_col(row, 2)?,
        call_type: parse_col(row, 3)?,
        status: parse_col(row, 4)?,
        channel_name: row.get(5)?,
        created_at: ts_col(row, 6)?,
        started_at: ts_opt_col(row, 7)?,
        ended_at: ts_opt_col(row, 8)?,
        duration_secs: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::tests::add_user;

    struct Fixture {
        db: Database,
        group: GroupId,
        host: UserId,
        bob: UserId,
        carol: UserId,
    }

    fn fixture() -> Fixture {
        let mut db = Database::open_in_memory().unwrap();
        let host = add_user(&db, "Alice").id;
        let bob = add_user(&db, "Bob").id;
        let carol = add_user(&db, "Carol").id;
        let group = db.create_group("Team", None, host, &[bob, carol]).unwrap().id;
        Fixture {
            db,
            group,
            host,
            bob,
            carol,
        }
    }

    fn status_of(state: &GroupCallState, user: UserId) -> ParticipantStatus {
        state.participant(user).unwrap().status
    }

    #[test]
    fn test_create_rings_everyone_but_host() {
        let mut f = fixture();
        let state = f.db.create_group_call(f.group, f.host, CallType::Video).unwrap();

        assert_eq!(state.call.status, CallStatus::Ringing);
        assert_eq!(state.participants.len(), 3);
        assert_eq!(status_of(&state, f.host), ParticipantStatus::Joined);
        assert_eq!(status_of(&state, f.bob), ParticipantStatus::Ringing);
        assert!(state.call.channel_name.starts_with("group-call-"));

        assert!(matches!(
            f.db.create_group_call(f.group, f.bob, CallType::Audio),
            Err(StoreError::CallInProgress(g)) if g == f.group
        ));
    }

    #[test]
    fn test_first_join_starts_call() {
        let mut f = fixture();
        let id = f.db.create_group_call(f.group, f.host, CallType::Audio).unwrap().call.id;

        let state = f.db.join_group_call(id, f.bob).unwrap();
        assert_eq!(state.call.status, CallStatus::Ongoing);
        assert!(state.call.started_at.is_some());
        assert_eq!(status_of(&state, f.bob), ParticipantStatus::Joined);

        let state = f.db.join_group_call(id, f.carol).unwrap();
        assert_eq!(state.call.status, CallStatus::Ongoing);

        assert!(matches!(
            f.db.join_group_call(id, f.carol),
            Err(StoreError::InvalidParticipantTransition { .. })
        ));
    }

    #[test]
    fn test_everyone_declining_misses_the_call() {
        let mut f = fixture();
        let id = f.db.create_group_call(f.group, f.host, CallType::Audio).unwrap().call.id;

        let state = f.db.decline_group_call(id, f.bob).unwrap();
        assert_eq!(state.call.status, CallStatus::Ringing);

        let state = f.db.decline_group_call(id, f.carol).unwrap();
        assert_eq!(state.call.status, CallStatus::Missed);
        assert_eq!(status_of(&state, f.host), ParticipantStatus::Left);
        assert!(f.db.active_group_call_for_group(f.group).unwrap().is_none());
    }

    #[test]
    fn test_last_leave_ends_the_call() {
        let mut f = fixture();
        let id = f.db.create_group_call(f.group, f.host, CallType::Audio).unwrap().call.id;
        f.db.join_group_call(id, f.bob).unwrap();

        let state = f.db.leave_group_call(id, f.host).unwrap();
        assert_eq!(state.call.status, CallStatus::Ongoing);

        let state = f.db.leave_group_call(id, f.bob).unwrap();
        assert_eq!(state.call.status, CallStatus::Ended);
        assert_eq!(state.call.duration_secs, Some(0));
        assert_eq!(status_of(&state, f.carol), ParticipantStatus::Missed);
    }

    #[test]
    fn test_host_leaving_unanswered_call_cancels_it() {
        let mut f = fixture();
        let id = f.db.create_group_call(f.group, f.host, CallType::Audio).unwrap().call.id;
        let state = f.db.leave_group_call(id, f.host).unwrap();
        assert_eq!(state.call.status, CallStatus::Cancelled);
        assert_eq!(state.call.duration_secs, None);
    }

    #[test]
    fn test_end_is_final() {
        let mut f = fixture();
        let id = f.db.create_group_call(f.group, f.host, CallType::Audio).unwrap().call.id;
        f.db.join_group_call(id, f.bob).unwrap();

        let state = f.db.end_group_call(id, f.host).unwrap();
        assert_eq!(state.call.status, CallStatus::Ended);
        assert!(state
            .participants
            .iter()
            .all(|p| p.status.is_terminal()));

        assert!(matches!(
            f.db.end_group_call(id, f.host),
            Err(StoreError::InvalidTransition { from: CallStatus::Ended, .. })
        ));
        assert!(matches!(
            f.db.join_group_call(id, f.carol),
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_expire_ringing_and_ongoing() {
        let mut f = fixture();
        let id = f.db.create_group_call(f.group, f.host, CallType::Audio).unwrap().call.id;
        let state = f.db.expire_group_call(id).unwrap().unwrap();
        assert_eq!(state.call.status, CallStatus::Missed);
        assert!(f.db.expire_group_call(id).unwrap().is_none());

        let id = f.db.create_group_call(f.group, f.host, CallType::Audio).unwrap().call.id;
        f.db.join_group_call(id, f.bob).unwrap();
        let state = f.db.expire_group_call(id).unwrap().unwrap();
        assert_eq!(state.call.status, CallStatus::Ongoing);
        assert_eq!(status_of(&state, f.carol), ParticipantStatus::Missed);
        assert!(f.db.expire_group_call(id).unwrap().is_none());
    }

    #[test]
    fn test_late_member_can_join() {
        let mut f = fixture();
        let dave = add_user(&f.db, "Dave").id;
        let id = f.db.create_group_call(f.group, f.host, CallType::Audio).unwrap().call.id;

        assert!(matches!(f.db.join_group_call(id, dave), Err(StoreError::NotFound)));

        f.db.add_group_member(f.group, dave).unwrap();
        let state = f.db.join_group_call(id, dave).unwrap();
        assert_eq!(status_of(&state, dave), ParticipantStatus::Joined);
    }

    #[test]
    fn test_removed_member_cannot_join() {
        let mut f = fixture();
        let id = f.db.create_group_call(f.group, f.host, CallType::Audio).unwrap().call.id;

        f.db.remove_group_member(f.group, f.bob).unwrap();
        assert!(matches!(f.db.join_group_call(id, f.bob), Err(StoreError::NotFound)));
        assert_eq!(
            f.db.get_group_call(id).unwrap().status,
            CallStatus::Ringing
        );
    }

    #[test]
    fn test_withdraw_removed_members() {
        let mut f = fixture();
        f.db.create_group_call(f.group, f.host, CallType::Audio).unwrap();

        f.db.remove_group_member(f.group, f.bob).unwrap();
        let state = f.db.withdraw_from_group_call(f.group, f.bob).unwrap().unwrap();
        assert_eq!(status_of(&state, f.bob), ParticipantStatus::Declined);
        assert_eq!(state.call.status, CallStatus::Ringing);
        assert!(f.db.withdraw_from_group_call(f.group, f.bob).unwrap().is_none());

        // Carol was the last invitee still ringing.
        f.db.remove_group_member(f.group, f.carol).unwrap();
        let state = f.db.withdraw_from_group_call(f.group, f.carol).unwrap().unwrap();
        assert_eq!(state.call.status, CallStatus::Missed);
        assert!(f.db.withdraw_from_group_call(f.group, f.carol).unwrap().is_none());
    }

    #[test]
    fn test_withdraw_joined_member_leaves() {
        let mut f = fixture();
        let id = f.db.create_group_call(f.group, f.host, CallType::Audio).unwrap().call.id;
        f.db.join_group_call(id, f.bob).unwrap();

        f.db.remove_group_member(f.group, f.bob).unwrap();
        let state = f.db.withdraw_from_group_call(f.group, f.bob).unwrap().unwrap();
        assert_eq!(status_of(&state, f.bob), ParticipantStatus::Left);
        assert_eq!(state.call.status, CallStatus::Ongoing);
    }

    #[test]
    fn test_stale_lookup() {
        let mut f = fixture();
        let id = f.db.create_group_call(f.group, f.host, CallType::Audio).unwrap().call.id;
        let later = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(f.db.list_stale_ringing_group_calls(later).unwrap(), vec![id]);

        f.db.join_group_call(id, f.bob).unwrap();
        f.db.join_group_call(id, f.carol).unwrap();
        assert!(f.db.list_stale_ringing_group_calls(later).unwrap().is_empty());
        assert_eq!(f.db.list_group_calls(f.group, 10).unwrap().len(), 1);
    }
}
