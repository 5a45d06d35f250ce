//! Call signaling: the personal and group call state machines plus the
//! notification fan-out and ring timeouts around them.
//!
//! Every action follows the same shape: look the call up, check the actor,
//! apply the guarded transition in the store, then notify. Notifications and
//! call-summary messages are best effort; once a transition is committed a
//! delivery failure is only logged.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use palaver_shared::{
    CallId, CallKind, CallStatus, CallType, ChannelName, GroupId, ParticipantStatus, UserId,
};
use palaver_store::{Database, GroupCallState, NewMessage, PersonalCall, StoreError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::events::BroadcastEvent;
use crate::hub::Hub;
use crate::scheduler::RingTimeouts;

type Result<T> = std::result::Result<T, ServerError>;

/// Who may perform an action on a personal call.
#[derive(Debug, Clone, Copy)]
enum Party {
    Caller,
    Callee,
    Either,
}

impl Party {
    fn permits(self, call: &PersonalCall, user: UserId) -> bool {
        match self {
            Party::Caller => call.caller_id == user,
            Party::Callee => call.callee_id == user,
            Party::Either => call.is_party(user),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ParticipantAction {
    Join,
    Decline,
    Leave,
}

#[derive(Clone)]
pub struct CallService {
    db: Arc<Mutex<Database>>,
    hub: Hub,
    timeouts: RingTimeouts,
    ring_timeout: Duration,
}

impl CallService {
    pub fn new(db: Arc<Mutex<Database>>, hub: Hub, ring_timeout: Duration) -> Self {
        Self {
            db,
            hub,
            timeouts: RingTimeouts::new(),
            ring_timeout,
        }
    }

    // ------------------------------------------------------------------
    // Personal calls
    // ------------------------------------------------------------------

    pub async fn invite(
        &self,
        caller: UserId,
        callee: UserId,
        call_type: CallType,
    ) -> Result<PersonalCall> {
        if caller == callee {
            return Err(ServerError::Validation("You cannot call yourself".into()));
        }

        let call = {
            let mut db = self.db.lock().await;
            if !db.user_exists(callee)? {
                return Err(ServerError::NotFound("User"));
            }
            db.create_personal_call(caller, callee, call_type)?
        };
        info!(call = %call.id, caller = %caller, callee = %callee, %call_type, "Call invited");

        self.notify_parties(&call).await;
        self.schedule_personal_timeout(call.id, self.ring_timeout).await;
        Ok(call)
    }

    pub async fn answer(&self, actor: UserId, id: CallId) -> Result<PersonalCall> {
        self.act(actor, id, Party::Callee, CallStatus::Ongoing).await
    }

    pub async fn reject(&self, actor: UserId, id: CallId) -> Result<PersonalCall> {
        self.act(actor, id, Party::Callee, CallStatus::Rejected).await
    }

    pub async fn cancel(&self, actor: UserId, id: CallId) -> Result<PersonalCall> {
        self.act(actor, id, Party::Caller, CallStatus::Cancelled).await
    }

    pub async fn end(&self, actor: UserId, id: CallId) -> Result<PersonalCall> {
        self.act(actor, id, Party::Either, CallStatus::Ended).await
    }

    /// Ring timeout for a personal call. `None` when the call had already
    /// left `ringing`.
    pub async fn expire(&self, id: CallId) -> Result<Option<PersonalCall>> {
        let result = {
            let mut db = self.db.lock().await;
            db.transition_personal_call(id, None, CallStatus::Missed)
        };
        let call = match result {
            Ok(call) => call,
            Err(StoreError::InvalidTransition { from, .. }) => {
                debug!(call = %id, status = %from, "Ring timeout ignored");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        info!(call = %id, "Call missed");

        self.timeouts.cancel(id).await;
        self.after_personal_transition(&call).await;
        Ok(Some(call))
    }

    async fn act(
        &self,
        actor: UserId,
        id: CallId,
        party: Party,
        to: CallStatus,
    ) -> Result<PersonalCall> {
        let call = {
            let mut db = self.db.lock().await;
            let call = db
                .get_personal_call(id)
                .map_err(ServerError::lookup("Call"))?;
            if !party.permits(&call, actor) {
                return Err(ServerError::Forbidden(format!(
                    "You cannot mark this call {to}"
                )));
            }
            db.transition_personal_call(id, Some(actor), to)?
        };
        info!(call = %id, actor = %actor, status = %call.status, "Call updated");

        self.timeouts.cancel(id).await;
        self.after_personal_transition(&call).await;
        Ok(call)
    }

    async fn after_personal_transition(&self, call: &PersonalCall) {
        self.notify_parties(call).await;
        if call.status.is_terminal() {
            self.write_personal_summary(call).await;
        }
    }

    async fn notify_parties(&self, call: &PersonalCall) {
        let event = BroadcastEvent::for_personal_call(call.clone());
        self.hub
            .publish_all(
                [
                    ChannelName::user(call.caller_id),
                    ChannelName::user(call.callee_id),
                ],
                &event,
            )
            .await;
    }

    /// Record the outcome in the conversation between the two parties.
    async fn write_personal_summary(&self, call: &PersonalCall) {
        let message = NewMessage {
            call_metadata: Some(serde_json::json!({
                "call_id": call.id,
                "kind": CallKind::Personal,
                "call_type": call.call_type,
                "status": call.status,
                "duration_secs": call.duration_secs,
            })),
            ..Default::default()
        };
        let inserted = {
            let db = self.db.lock().await;
            db.insert_chat_message(call.caller_id, call.callee_id, &message)
        };
        match inserted {
            Ok(message) => {
                let channel = ChannelName::chat(message.sender_id, message.receiver_id);
                self.hub
                    .publish(channel, BroadcastEvent::MessageSent(message))
                    .await;
            }
            Err(e) => warn!(call = %call.id, error = %e, "Failed to write call summary"),
        }
    }

    async fn schedule_personal_timeout(&self, id: CallId, delay: Duration) {
        let service = self.clone();
        self.timeouts
            .schedule(id, delay, async move {
                if let Err(e) = service.expire(id).await {
                    warn!(call = %id, error = %e, "Ring timeout failed");
                }
            })
            .await;
    }

    // ------------------------------------------------------------------
    // Group calls
    // ------------------------------------------------------------------

    pub async fn start_group_call(
        &self,
        host: UserId,
        group_id: GroupId,
        call_type: CallType,
    ) -> Result<GroupCallState> {
        let state = {
            let mut db = self.db.lock().await;
            db.get_group(group_id).map_err(ServerError::lookup("Group"))?;
            if !db.is_group_member(group_id, host)? {
                return Err(ServerError::Forbidden("You are not a member of this group".into()));
            }
            db.create_group_call(group_id, host, call_type)?
        };
        info!(
            call = %state.call.id,
            group = %group_id,
            host = %host,
            invited = state.participants.len().saturating_sub(1),
            "Group call started"
        );

        let channels: Vec<ChannelName> = std::iter::once(ChannelName::group(group_id))
            .chain(
                state
                    .participants
                    .iter()
                    .filter(|p| p.status == ParticipantStatus::Ringing)
                    .map(|p| ChannelName::user(p.user_id)),
            )
            .collect();
        self.hub
            .publish_all(channels, &BroadcastEvent::GroupCallStarted(state.clone()))
            .await;

        self.schedule_group_timeout(state.call.id, self.ring_timeout).await;
        Ok(state)
    }

    pub async fn join_group_call(&self, user: UserId, id: CallId) -> Result<GroupCallState> {
        self.participant_action(user, id, ParticipantAction::Join).await
    }

    pub async fn decline_group_call(&self, user: UserId, id: CallId) -> Result<GroupCallState> {
        self.participant_action(user, id, ParticipantAction::Decline).await
    }

    pub async fn leave_group_call(&self, user: UserId, id: CallId) -> Result<GroupCallState> {
        self.participant_action(user, id, ParticipantAction::Leave).await
    }

    /// Host only.
    pub async fn end_group_call(&self, actor: UserId, id: CallId) -> Result<GroupCallState> {
        let state = {
            let mut db = self.db.lock().await;
            let call = db.get_group_call(id).map_err(ServerError::lookup("Call"))?;
            if call.host_id != actor {
                return Err(ServerError::Forbidden("Only the host can end this call".into()));
            }
            db.end_group_call(id, actor)?
        };
        info!(call = %id, status = %state.call.status, "Group call ended by host");

        self.close_group_call(&state).await;
        Ok(state)
    }

    /// Ring timeout for a group call. `None` when nobody was left ringing.
    pub async fn expire_group_call(&self, id: CallId) -> Result<Option<GroupCallState>> {
        let expired = {
            let mut db = self.db.lock().await;
            db.expire_group_call(id)?
        };
        let Some(state) = expired else {
            debug!(call = %id, "Group ring timeout ignored");
            return Ok(None);
        };

        if state.call.status.is_terminal() {
            info!(call = %id, "Group call missed");
            self.close_group_call(&state).await;
        } else {
            for participant in state
                .participants
                .iter()
                .filter(|p| p.status == ParticipantStatus::Missed)
            {
                self.hub
                    .publish(
                        ChannelName::group(state.call.group_id),
                        BroadcastEvent::GroupCallParticipantUpdated {
                            call: state.call.clone(),
                            participant: participant.clone(),
                        },
                    )
                    .await;
            }
        }
        Ok(Some(state))
    }

    async fn participant_action(
        &self,
        user: UserId,
        id: CallId,
        action: ParticipantAction,
    ) -> Result<GroupCallState> {
        let state = {
            let mut db = self.db.lock().await;
            let current = db
                .get_group_call_state(id)
                .map_err(ServerError::lookup("Call"))?;
            // Joining needs current membership; answering or hanging up an
            // existing participant row does not.
            let member = db.is_group_member(current.call.group_id, user)?;
            let allowed = match action {
                ParticipantAction::Join => member,
                ParticipantAction::Decline | ParticipantAction::Leave => {
                    member || current.participant(user).is_some()
                }
            };
            if !allowed {
                return Err(ServerError::Forbidden("You are not part of this call".into()));
            }
            let updated = match action {
                ParticipantAction::Join => db.join_group_call(id, user),
                ParticipantAction::Decline => db.decline_group_call(id, user),
                ParticipantAction::Leave => db.leave_group_call(id, user),
            };
            updated.map_err(ServerError::lookup("Participant"))?
        };
        debug!(call = %id, user = %user, ?action, status = %state.call.status, "Participant updated");

        self.after_participant_update(&state, user).await;
        Ok(state)
    }

    /// Called after `user` was removed from `group_id`: a pending invitation
    /// to the group's active call is declined and a joined user is hung up.
    pub async fn withdraw_member(
        &self,
        group_id: GroupId,
        user: UserId,
    ) -> Result<Option<GroupCallState>> {
        let withdrawn = {
            let mut db = self.db.lock().await;
            db.withdraw_from_group_call(group_id, user)?
        };
        let Some(state) = withdrawn else {
            return Ok(None);
        };
        info!(call = %state.call.id, user = %user, status = %state.call.status, "Removed member withdrawn from group call");

        self.after_participant_update(&state, user).await;
        Ok(Some(state))
    }

    async fn after_participant_update(&self, state: &GroupCallState, user: UserId) {
        if let Some(participant) = state.participant(user) {
            self.hub
                .publish(
                    ChannelName::group(state.call.group_id),
                    BroadcastEvent::GroupCallParticipantUpdated {
                        call: state.call.clone(),
                        participant: participant.clone(),
                    },
                )
                .await;
        }
        if state.call.status.is_terminal() {
            self.close_group_call(state).await;
        }
    }

    async fn close_group_call(&self, state: &GroupCallState) {
        self.timeouts.cancel(state.call.id).await;

        let channels: Vec<ChannelName> = std::iter::once(ChannelName::group(state.call.group_id))
            .chain(state.user_ids().map(ChannelName::user))
            .collect();
        self.hub
            .publish_all(channels, &BroadcastEvent::for_closed_group_call(state.clone()))
            .await;

        let call = &state.call;
        let message = NewMessage {
            call_metadata: Some(serde_json::json!({
                "call_id": call.id,
                "kind": CallKind::Group,
                "call_type": call.call_type,
                "status": call.status,
                "duration_secs": call.duration_secs,
                "participants": state.participants.iter()
                    .filter(|p| p.joined_at.is_some())
                    .map(|p| p.user_id)
                    .collect::<Vec<_>>(),
            })),
            ..Default::default()
        };
        let inserted = {
            let db = self.db.lock().await;
            db.insert_group_message(call.group_id, call.host_id, &message)
        };
        match inserted {
            Ok(message) => {
                self.hub
                    .publish(
                        ChannelName::group(call.group_id),
                        BroadcastEvent::GroupMessageSent(message),
                    )
                    .await;
            }
            Err(e) => warn!(call = %call.id, error = %e, "Failed to write group call summary"),
        }
    }

    async fn schedule_group_timeout(&self, id: CallId, delay: Duration) {
        let service = self.clone();
        self.timeouts
            .schedule(id, delay, async move {
                if let Err(e) = service.expire_group_call(id).await {
                    warn!(call = %id, error = %e, "Group ring timeout failed");
                }
            })
            .await;
    }

    // ------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------

    /// Re-arm ring timeouts lost with the previous process. Calls whose
    /// deadline already passed are expired immediately. Returns how many
    /// were expired.
    pub async fn recover(&self) -> Result<usize> {
        let now = Utc::now();
        let (personal, group) = {
            let db = self.db.lock().await;
            let personal = db
                .list_stale_ringing_personal_calls(now)?
                .into_iter()
                .map(|id| db.get_personal_call(id).map(|c| (id, c.created_at)))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let group = db
                .list_stale_ringing_group_calls(now)?
                .into_iter()
                .map(|id| db.get_group_call(id).map(|c| (id, c.created_at)))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            (personal, group)
        };

        let mut expired = 0;
        for (id, created_at) in personal {
            match remaining(created_at, self.ring_timeout, now) {
                Some(delay) => self.schedule_personal_timeout(id, delay).await,
                None => {
                    if self.expire(id).await?.is_some() {
                        expired += 1;
                    }
                }
            }
        }
        for (id, created_at) in group {
            match remaining(created_at, self.ring_timeout, now) {
                Some(delay) => self.schedule_group_timeout(id, delay).await,
                None => {
                    if self.expire_group_call(id).await?.is_some() {
                        expired += 1;
                    }
                }
            }
        }

        if expired > 0 {
            info!(expired, "Expired calls left ringing by a previous run");
        }
        Ok(expired)
    }
}

/// Time left before a call created at `created_at` times out, or `None` if
/// the deadline has passed.
fn remaining(
    created_at: chrono::DateTime<Utc>,
    timeout: Duration,
    now: chrono::DateTime<Utc>,
) -> Option<Duration> {
    let timeout = chrono::Duration::from_std(timeout).ok()?;
    (created_at + timeout - now)
        .to_std()
        .ok()
        .filter(|d| !d.is_zero())
}
