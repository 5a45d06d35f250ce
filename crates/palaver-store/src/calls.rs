//! Personal calls and the shared call event log.
//!
//! Every status change runs inside an immediate transaction: the current row
//! is read, the requested transition is checked against
//! [`CallStatus::can_transition_to`], and the `UPDATE` repeats the status it
//! observed in its `WHERE` clause. Two actors racing on the same call (for
//! example an answer and the ring timeout) therefore serialize, and the loser
//! sees [`StoreError::InvalidTransition`] without writing anything.

use chrono::{DateTime, Utc};
use palaver_shared::channels::personal_call_channel;
use palaver_shared::{CallEventKind, CallId, CallKind, CallStatus, CallType, UserId};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{CallEvent, PersonalCall};
use crate::sql::{self, json_col, parse_col, parse_opt_col, ts_col, ts_opt_col};

const CALL_COLUMNS: &str = "id, caller_id, callee_id, call_type, status, channel_name,
    created_at, answered_at, ended_at, duration_secs";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Start ringing `callee`. Fails with [`StoreError::Busy`] if either party
    /// is already in a ringing or ongoing personal call.
    pub fn create_personal_call(
        &mut self,
        caller: UserId,
        callee: UserId,
        call_type: CallType,
    ) -> Result<PersonalCall> {
        let id = CallId::new();
        let call = PersonalCall {
            id,
            caller_id: caller,
            callee_id: callee,
            call_type,
            status: CallStatus::Ringing,
            channel_name: personal_call_channel(id),
            created_at: sql::now(),
            answered_at: None,
            ended_at: None,
            duration_secs: None,
        };

        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        for user in [caller, callee] {
            if active_personal_call(&tx, user)?.is_some() {
                return Err(StoreError::Busy(user));
            }
        }

        tx.execute(
            "INSERT INTO personal_calls (id, caller_id, callee_id, call_type, status, channel_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                caller.to_string(),
                callee.to_string(),
                call_type.as_str(),
                CallStatus::Ringing.as_str(),
                call.channel_name,
                sql::ts(&call.created_at),
            ],
        )?;
        append_call_event(
            &tx,
            id,
            CallKind::Personal,
            Some(caller),
            CallEventKind::Initiated,
            &serde_json::json!({ "callee_id": callee, "call_type": call_type }),
            &call.created_at,
        )?;
        tx.commit()?;

        Ok(call)
    }

    // ------------------------------------------------------------------
    // Transition
    // ------------------------------------------------------------------

    /// Move a call to `to`, stamping answer/end times and the duration.
    ///
    /// `actor` is recorded in the event log; `None` means the system did it.
    pub fn transition_personal_call(
        &mut self,
        id: CallId,
        actor: Option<UserId>,
        to: CallStatus,
    ) -> Result<PersonalCall> {
        let now = sql::now();
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = query_personal_call(&tx, id)?;
        if !current.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                from: current.status,
                to,
            });
        }

        let mut next = current.clone();
        next.status = to;
        if to == CallStatus::Ongoing {
            next.answered_at = Some(now);
        } else {
            next.ended_at = Some(now);
            next.duration_secs = next
                .answered_at
                .map(|answered| (now - answered).num_seconds().max(0));
        }

        let affected = tx.execute(
            "UPDATE personal_calls
             SET status = ?2, answered_at = ?3, ended_at = ?4, duration_secs = ?5
             WHERE id = ?1 AND status = ?6",
            params![
                id.to_string(),
                to.as_str(),
                next.answered_at.as_ref().map(sql::ts),
                next.ended_at.as_ref().map(sql::ts),
                next.duration_secs,
                current.status.as_str(),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::InvalidTransition {
                from: current.status,
                to,
            });
        }

        append_call_event(
            &tx,
            id,
            CallKind::Personal,
            actor,
            CallEventKind::for_status(to),
            &serde_json::json!({
                "from": current.status,
                "to": to,
                "duration_secs": next.duration_secs,
            }),
            &now,
        )?;
        tx.commit()?;

        tracing::debug!(call = %id, from = %current.status, to = %to, "personal call transition");
        Ok(next)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_personal_call(&self, id: CallId) -> Result<PersonalCall> {
        query_personal_call(self.conn(), id)
    }

    /// The ringing or ongoing call `user` takes part in, if any.
    pub fn active_personal_call_for(&self, user: UserId) -> Result<Option<PersonalCall>> {
        active_personal_call(self.conn(), user)
    }

    /// Call history for `user`, newest first.
    pub fn list_calls_for_user(&self, user: UserId, limit: u32) -> Result<Vec<PersonalCall>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CALL_COLUMNS} FROM personal_calls
             WHERE caller_id = ?1 OR callee_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![user.to_string(), limit], row_to_personal_call)?;
        sql::collect(rows)
    }

    /// Calls still ringing that were created before `cutoff`.
    pub fn list_stale_ringing_personal_calls(&self, cutoff: DateTime<Utc>) -> Result<Vec<CallId>> {
        let mut stmt = self.conn().prepare(
            "SELECT id FROM personal_calls
             WHERE status = ?1 AND created_at < ?2
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(
            params![CallStatus::Ringing.as_str(), sql::ts(&cutoff)],
            |row| parse_col(row, 0),
        )?;
        sql::collect(rows)
    }

    /// Event log of a call (either kind) in insertion order.
    pub fn list_call_events(&self, call_id: CallId) -> Result<Vec<CallEvent>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, call_id, call_kind, actor_id, event, metadata, created_at
             FROM call_events WHERE call_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![call_id.to_string()], |row| {
            Ok(CallEvent {
                id: row.get(0)?,
                call_id: parse_col(row, 1)?,
                call_kind: parse_col(row, 2)?,
                actor_id: parse_opt_col(row, 3)?,
                event: parse_col(row, 4)?,
                metadata: json_col(row, 5)?,
                created_at: ts_col(row, 6)?,
            })
        })?;
        sql::collect(rows)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn append_call_event(
    conn: &Connection,
    call_id: CallId,
    kind: CallKind,
    actor: Option<UserId>,
    event: CallEventKind,
    metadata: &serde_json::Value,
    at: &DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO call_events (call_id, call_kind, actor_id, event, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            call_id.to_string(),
            kind.as_str(),
            actor.map(|a| a.to_string()),
            event.as_str(),
            serde_json::to_string(metadata)?,
            sql::ts(at),
        ],
    )?;
    Ok(())
}

fn query_personal_call(conn: &Connection, id: CallId) -> Result<PersonalCall> {
    conn.query_row(
        &format!("SELECT {CALL_COLUMNS} FROM personal_calls WHERE id = ?1"),
        params![id.to_string()],
        row_to_personal_call,
    )
    .map_err(not_found)
}

fn active_personal_call(conn: &Connection, user: UserId) -> Result<Option<PersonalCall>> {
    let call = conn
        .query_row(
            &format!(
                "SELECT {CALL_COLUMNS} FROM personal_calls
                 WHERE (caller_id = ?1 OR callee_id = ?1) AND status IN (?2, ?3)
                 ORDER BY created_at DESC LIMIT 1"
            ),
            params![
                user.to_string(),
                CallStatus::Ringing.as_str(),
                CallStatus::Ongoing.as_str(),
            ],
            row_to_personal_call,
        )
        .optional()?;
    Ok(call)
}

fn row_to_personal_call(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersonalCall> {
    Ok(PersonalCall {
        id: parse_col(row, 0)?,
        caller_id: parse_col(row, 1)?,
        callee_id: parse_col(row, 2)?,
        call_type: parse_col(row, 3)?,
        status: parse_col(row, 4)?,
        channel_name: row.get(5)?,
        created_at: ts_col(row, 6)?,
        answered_at: ts_opt_col(row, 7)?,
        ended_at: ts_opt_col(row, 8)?,
        duration_secs: row.get(9)?,
    })
}
