use crate::consts::{
    ANSWER_PATH, HEALTH_MESSAGE, LISTEN_LANGUAGE, LISTEN_TIMEOUT_PATH, LISTEN_TIMEOUT_SECS,
    OUTGOING_CALL_PATH, SPEECH_PATH, STATUS_PATH,
};
use crate::conversation_state::CallInstruction;
use crate::twilio_types::{
    wrap_twiml, GatherAction, GatherPrompt, HangupAction, OutgoingCallQuery, RedirectAction,
    Response, ResponseAction, SayAction, StatusPayload, VoicePayload,
};
use crate::types::{AppState, CallDirection};

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tracing::{error, info, trace, warn};

pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route(ANSWER_PATH, post(answer))
        .route(OUTGOING_CALL_PATH, post(outgoing_call))
        .route(SPEECH_PATH, post(process_speech))
        .route(LISTEN_TIMEOUT_PATH, post(listen_timeout))
        .route(STATUS_PATH, post(call_status))
        .route("/", get(|| async { HEALTH_MESSAGE }))
        .with_state(app_state)
}

/// Render state machine instructions as a TwiML document.
pub fn render_twiml(instructions: Vec<CallInstruction>) -> String {
    let actions = instructions
        .into_iter()
        .map(|instruction| match instruction {
            CallInstruction::Say(text) => ResponseAction::Say(say(text)),
            CallInstruction::Listen { prompt } => ResponseAction::Gather(GatherAction {
                input: "speech".to_string(),
                action: SPEECH_PATH.to_string(),
                method: Some("POST".to_string()),
                timeout: Some(LISTEN_TIMEOUT_SECS),
                speech_timeout: Some("auto".to_string()),
                language: Some(LISTEN_LANGUAGE.to_string()),
                prompts: prompt
                    .into_iter()
                    .map(|text| GatherPrompt::Say(say(text)))
                    .collect(),
            }),
            CallInstruction::Redirect(url) => ResponseAction::Redirect(RedirectAction {
                url: url.to_string(),
                method: Some("POST".to_string()),
            }),
            CallInstruction::Hangup => ResponseAction::Hangup(HangupAction {}),
        })
        .collect();
    let twiml = wrap_twiml(xmlserde::xml_serialize(Response { actions }));
    trace!("twiml: '{}'", twiml);
    twiml
}

fn say(text: String) -> SayAction {
    SayAction {
        text,
        language: Some(LISTEN_LANGUAGE.to_string()),
    }
}

fn twiml_response(instructions: Vec<CallInstruction>) -> (StatusCode, HeaderMap, String) {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/xml"),
    );
    (StatusCode::OK, headers, render_twiml(instructions))
}

fn parse_voice_payload(body: &str) -> Result<VoicePayload, (StatusCode, HeaderMap, String)> {
    let payload = serde_urlencoded::from_str::<VoicePayload>(body).map_err(|e| {
        error!(error=%e, "failed to deserialize Twilio voice payload");
        (
            StatusCode::BAD_REQUEST,
            HeaderMap::new(),
            "Bad request".to_string(),
        )
    })?;
    if payload.call_sid.trim().is_empty() {
        warn!("voice webhook without CallSid");
        return Err((
            StatusCode::BAD_REQUEST,
            HeaderMap::new(),
            "Missing CallSid".to_string(),
        ));
    }
    Ok(payload)
}

pub async fn answer(State(app_state): State<Arc<AppState>>, body: String) -> impl IntoResponse {
    trace!(body=%body, "answer request body");
    let payload = match parse_voice_payload(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    info!(call_sid=%payload.call_sid, from=?payload.from, to=?payload.to, "inbound call");
    let out = app_state
        .orchestrator
        .answer_inbound(&payload.call_sid)
        .await;
    twiml_response(out)
}

pub async fn outgoing_call(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<OutgoingCallQuery>,
    body: String,
) -> impl IntoResponse {
    trace!(body=%body, message=?query.message, "outgoing call request");
    let payload = match parse_voice_payload(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let out = app_state
        .orchestrator
        .answer_outbound(&payload.call_sid, query.message)
        .await;
    twiml_response(out)
}

pub async fn process_speech(
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> impl IntoResponse {
    trace!(body=%body, "speech request body");
    let payload = match parse_voice_payload(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let direction = payload
        .direction
        .as_deref()
        .map(CallDirection::from_twilio)
        .unwrap_or(CallDirection::Inbound);
    let transcript = payload.speech_result.unwrap_or_default();
    let out = app_state
        .orchestrator
        .process_speech(&payload.call_sid, direction, &transcript)
        .await;
    twiml_response(out)
}

pub async fn listen_timeout(
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> impl IntoResponse {
    let payload = match parse_voice_payload(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let out = app_state
        .orchestrator
        .listen_timeout(&payload.call_sid)
        .await;
    twiml_response(out)
}

/// Status callbacks are always acknowledged with 204, even when the body is unusable.
pub async fn call_status(State(app_state): State<Arc<AppState>>, body: String) -> StatusCode {
    trace!(body=%body, "status request body");
    let payload = serde_urlencoded::from_str::<StatusPayload>(&body).unwrap_or_else(|e| {
        error!(error=%e, "failed to deserialize Twilio status payload");
        StatusPayload::default()
    });
    app_state.orchestrator.record_status(payload).await;
    StatusCode::NO_CONTENT
}
