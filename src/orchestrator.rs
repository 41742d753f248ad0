use crate::consts::{ANSWER_PATH, OUTGOING_CALL_PATH, REPROMPT};
use crate::conversation_state::{CallInstruction, ConversationSettings, ConversationState};
use crate::generator::ResponseGenerator;
use crate::status_log::StatusSink;
use crate::twilio_types::StatusPayload;
use crate::types::{CallDirection, StatusEntry};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

type Session = Arc<tokio::sync::Mutex<ConversationState>>;

/// Routes webhook events to the per-call conversation by call sid.  Holds nothing but the
/// routing table; all conversational decisions live in `ConversationState`.
pub struct Orchestrator {
    // call sid => conversation
    sessions: Mutex<HashMap<String, Session>>,
    generator: Arc<dyn ResponseGenerator>,
    status_sink: Arc<dyn StatusSink>,
    settings: Arc<ConversationSettings>,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn ResponseGenerator>,
        status_sink: Arc<dyn StatusSink>,
        settings: ConversationSettings,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            generator,
            status_sink,
            settings: Arc::new(settings),
        }
    }

    fn session(&self, call_sid: &str) -> Option<Session> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(call_sid).cloned()
    }

    fn session_or_insert(
        &self,
        call_sid: &str,
        direction: CallDirection,
        custom_opening: Option<String>,
    ) -> Session {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(call_sid.to_string())
            .or_insert_with(|| {
                debug!(call_sid=%call_sid, direction=?direction, "new conversation");
                Arc::new(tokio::sync::Mutex::new(ConversationState::new(
                    call_sid.to_string(),
                    direction,
                    custom_opening,
                    self.generator.clone(),
                    self.settings.clone(),
                )))
            })
            .clone()
    }

    fn remove(&self, call_sid: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if sessions.remove(call_sid).is_some() {
            debug!(call_sid=%call_sid, "conversation removed");
        }
    }

    fn finish(&self, state: &ConversationState, out: Vec<CallInstruction>) -> Vec<CallInstruction> {
        if state.is_ended() {
            self.remove(&state.call_sid);
        }
        out
    }

    /// Inbound call connected, or redirected back after a silent greeting
    pub async fn answer_inbound(&self, call_sid: &str) -> Vec<CallInstruction> {
        let session = self.session_or_insert(call_sid, CallDirection::Inbound, None);
        let mut state = session.lock().await;
        let out = state.answer();
        self.finish(&state, out)
    }

    /// Outbound call answered; `message` is the opening recovered from the callback URL
    pub async fn answer_outbound(&self, call_sid: &str, message: Option<String>) -> Vec<CallInstruction> {
        let session = self.session_or_insert(call_sid, CallDirection::Outbound, message);
        let mut state = session.lock().await;
        let out = state.answer();
        self.finish(&state, out)
    }

    /// Speech result for a call.  An unknown call is sent back through the entry webhook for its
    /// direction; a call with no open window is acknowledged without touching its conversation.
    pub async fn process_speech(
        &self,
        call_sid: &str,
        direction: CallDirection,
        transcript: &str,
    ) -> Vec<CallInstruction> {
        let Some(session) = self.session(call_sid) else {
            warn!(call_sid=%call_sid, direction=?direction, "speech result for unknown call");
            let entry = match direction {
                CallDirection::Inbound => ANSWER_PATH,
                CallDirection::Outbound => OUTGOING_CALL_PATH,
            };
            let mut out = vec![];
            if transcript.trim().is_empty() {
                out.push(CallInstruction::Say(REPROMPT.to_string()));
            }
            out.push(CallInstruction::Redirect(entry));
            return out;
        };
        // a busy session is still processing an earlier delivery, so its window is closed
        let Ok(mut state) = session.try_lock() else {
            warn!(call_sid=%call_sid, "speech result while a turn is in progress; ignoring");
            return vec![];
        };
        match state.hear(transcript).await {
            Some(out) => self.finish(&state, out),
            None => ignored(&state),
        }
    }

    /// A follow-up listening window elapsed with no speech
    pub async fn listen_timeout(&self, call_sid: &str) -> Vec<CallInstruction> {
        let Some(session) = self.session(call_sid) else {
            warn!(call_sid=%call_sid, "listen timeout for unknown call");
            return vec![CallInstruction::Hangup];
        };
        let mut state = session.lock().await;
        match state.silence() {
            Some(out) => self.finish(&state, out),
            None => ignored(&state),
        }
    }

    /// Append a lifecycle row.  Never fails towards the carrier and never touches a conversation.
    pub async fn record_status(&self, payload: StatusPayload) {
        if self.session(&payload.call_sid).is_none() {
            debug!(call_sid=%payload.call_sid, "status for call without a live conversation");
        }
        info!(call_sid=%payload.call_sid, status=%payload.call_status, to=%payload.to, "call status");
        let entry = StatusEntry {
            timestamp: OffsetDateTime::now_utc(),
            call_sid: payload.call_sid,
            call_status: payload.call_status,
            to_number: payload.to,
        };
        if let Err(e) = self.status_sink.append(entry).await {
            error!(error=%e, "failed to append call status");
        }
    }

    /// Drop conversations that have seen no event for `max_idle`.  Returns how many were dropped.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        // a session locked by an in-flight event is busy, not idle
        sessions.retain(|_, session| match session.try_lock() {
            Ok(state) => state.idle_for() < max_idle && !state.is_ended(),
            Err(_) => true,
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, live = sessions.len(), "evicted idle conversations");
        }
        evicted
    }

    #[cfg(test)]
    pub fn live_sessions(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn ignored(state: &ConversationState) -> Vec<CallInstruction> {
    if state.is_ended() {
        vec![CallInstruction::Hangup]
    } else {
        vec![]
    }
}
