use crate::error::DispatchError;
use crate::twilio_types::{CallStatus, CreatedCall, TwilioErrorBody};

use async_trait::async_trait;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, error};

/// Status transitions the carrier reports back for every originated call
pub const STATUS_CALLBACK_EVENTS: &[&str] = &["initiated", "ringing", "answered", "completed"];

/// Everything the carrier needs to place one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCall {
    pub to: String,
    pub from: String,
    /// Fetched by the carrier once the callee answers
    pub answer_url: String,
    pub status_callback_url: String,
    /// Hold origination until this instant; carried out by the carrier
    pub scheduled_for: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedCall {
    pub call_sid: String,
    pub status: CallStatus,
}

/// Carrier capability used by the dispatcher
#[async_trait]
pub trait Telephony: Send + Sync {
    async fn create_call(&self, call: &OutboundCall) -> Result<PlacedCall, DispatchError>;
}

pub struct TwilioClient {
    http_client: reqwest::Client,
    account_sid: String,
    auth_token: String,
}

impl TwilioClient {
    pub fn new(http_client: reqwest::Client, account_sid: String, auth_token: String) -> Self {
        Self {
            http_client,
            account_sid,
            auth_token,
        }
    }
}

/// `YYYY-MM-DDTHH:MM:SSZ`, always in UTC
pub fn format_schedule_time(at: OffsetDateTime) -> Result<String, DispatchError> {
    at.to_offset(time::UtcOffset::UTC)
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
        ))
        .map_err(|e| DispatchError::InvalidRequest(format!("unformattable schedule time: {e}")))
}

fn call_form(call: &OutboundCall) -> Result<Vec<(&'static str, String)>, DispatchError> {
    let mut form = vec![
        ("To", call.to.clone()),
        ("From", call.from.clone()),
        ("Url", call.answer_url.clone()),
        ("Method", "POST".to_string()),
        ("StatusCallback", call.status_callback_url.clone()),
        ("StatusCallbackMethod", "POST".to_string()),
    ];
    // repeated key, one per subscribed event
    for event in STATUS_CALLBACK_EVENTS {
        form.push(("StatusCallbackEvent", event.to_string()));
    }
    if let Some(at) = call.scheduled_for {
        form.push(("ScheduleType", "fixed".to_string()));
        form.push(("ScheduledTime", format_schedule_time(at)?));
    }
    Ok(form)
}

#[async_trait]
impl Telephony for TwilioClient {
    async fn create_call(&self, call: &OutboundCall) -> Result<PlacedCall, DispatchError> {
        let account_sid = &self.account_sid;
        let url = format!("https://api.twilio.com/2010-04-01/Accounts/{account_sid}/Calls.json");
        let form = call_form(call)?;
        let resp = self
            .http_client
            .post(url)
            .basic_auth(account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                error!(error=%e, to=%call.to, "failed to send call request to twilio");
                DispatchError::Transport(e.to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            let message = match resp.json::<TwilioErrorBody>().await {
                Ok(body) => match body.code {
                    Some(code) => format!("{} (code {code})", body.message),
                    None => body.message,
                },
                Err(_) => status.to_string(),
            };
            error!(status=%status, to=%call.to, message=%message, "twilio rejected call");
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let created = resp.json::<CreatedCall>().await.map_err(|e| {
            error!(error=%e, "failed to deserialize twilio call resource");
            DispatchError::Malformed(e.to_string())
        })?;
        debug!(call_sid=%created.sid, status=%created.status, "twilio accepted call");

        Ok(PlacedCall {
            call_sid: created.sid,
            status: created.status,
        })
    }
}
