use crate::batch::BatchLog;
use crate::consts::{OUTGOING_CALL_PATH, STATUS_PATH};
use crate::error::{BatchError, DispatchError};
use crate::telephony::{OutboundCall, Telephony};
use crate::types::{CallHandle, DispatchOutcome, DispatchRequest};

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Originates outbound calls: one at a time, in paced batches, or scheduled with the carrier.
pub struct Dispatcher {
    telephony: Arc<dyn Telephony>,
    /// Public base URL the carrier calls back on, without a trailing slash
    webhook_url: String,
    from_number: String,
}

impl Dispatcher {
    pub fn new(telephony: Arc<dyn Telephony>, webhook_url: String, from_number: String) -> Self {
        Self {
            telephony,
            webhook_url: webhook_url.trim_end_matches('/').to_string(),
            from_number,
        }
    }

    /// Answer callback for an outbound call.  The custom message travels in the query string
    /// so the answer handler can recover it without any shared state.
    pub fn answer_url(&self, message: Option<&str>) -> String {
        let base = format!("{}{OUTGOING_CALL_PATH}", self.webhook_url);
        match message.filter(|m| !m.trim().is_empty()) {
            Some(m) => {
                let query = serde_urlencoded::to_string([("message", m)]).unwrap_or_default();
                format!("{base}?{query}")
            }
            None => base,
        }
    }

    fn outbound_call(
        &self,
        request: &DispatchRequest,
        scheduled_for: Option<OffsetDateTime>,
    ) -> Result<OutboundCall, DispatchError> {
        let to = request.to.trim();
        if to.is_empty() {
            return Err(DispatchError::InvalidRequest(
                "missing destination number".to_string(),
            ));
        }
        Ok(OutboundCall {
            to: to.to_string(),
            from: request
                .from
                .clone()
                .unwrap_or_else(|| self.from_number.clone()),
            answer_url: self.answer_url(request.message.as_deref()),
            status_callback_url: format!("{}{STATUS_PATH}", self.webhook_url),
            scheduled_for,
        })
    }

    async fn place(
        &self,
        request: &DispatchRequest,
        scheduled_for: Option<OffsetDateTime>,
    ) -> Result<CallHandle, DispatchError> {
        let call = self.outbound_call(request, scheduled_for)?;
        let placed = self.telephony.create_call(&call).await?;
        Ok(CallHandle {
            call_sid: placed.call_sid,
            to: call.to,
            status: placed.status,
            scheduled_for,
        })
    }

    /// Place one call immediately
    pub async fn originate(&self, request: &DispatchRequest) -> Result<CallHandle, DispatchError> {
        let handle = self.place(request, None).await?;
        info!(call_sid=%handle.call_sid, to=%handle.to, "call initiated");
        Ok(handle)
    }

    /// Ask the carrier to place the call at `at`.  Returns as soon as the carrier accepts.
    pub async fn schedule(
        &self,
        request: &DispatchRequest,
        at: OffsetDateTime,
    ) -> Result<CallHandle, DispatchError> {
        let handle = self.place(request, Some(at)).await?;
        info!(call_sid=%handle.call_sid, to=%handle.to, at=%at, "call scheduled");
        Ok(handle)
    }

    /// Originate each request in order, one at a time, sleeping `delay` between consecutive
    /// requests whatever their outcome.  Every attempted request is logged before the next
    /// starts.  Cancelling `shutdown` stops the batch during a delay.
    pub async fn run_batch<W: Write>(
        &self,
        requests: &[DispatchRequest],
        delay: Duration,
        log: &mut BatchLog<W>,
        shutdown: &CancellationToken,
    ) -> Result<Vec<DispatchOutcome>, BatchError> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for (idx, request) in requests.iter().enumerate() {
            if idx > 0 && !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => {
                        warn!(done=idx, remaining=requests.len() - idx, "batch interrupted by shutdown");
                        break;
                    }
                }
            }

            let outcome = if request.to.trim().is_empty() {
                warn!(row = idx + 1, "skipping batch row without a phone number");
                DispatchOutcome::Skipped {
                    reason: "missing destination number".to_string(),
                }
            } else {
                match self.originate(request).await {
                    Ok(handle) => DispatchOutcome::Initiated(handle),
                    Err(e) => {
                        error!(error=%e, to=%request.to, "batch call failed");
                        DispatchOutcome::Failed {
                            to: request.to.clone(),
                            reason: e.to_string(),
                        }
                    }
                }
            };
            log.record(request, &outcome)?;
            outcomes.push(outcome);
        }

        let initiated = outcomes
            .iter()
            .filter(|o| matches!(o, DispatchOutcome::Initiated(_)))
            .count();
        info!(attempted = outcomes.len(), initiated, "batch finished");
        Ok(outcomes)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::telephony::PlacedCall;
    use crate::twilio_types::CallStatus;

    use async_trait::async_trait;
    use std::sync::Mutex;
    use time::macros::datetime;
    use tokio::time::Instant;

    /// Records every call request with the instant it arrived; numbers listed in `reject`
    /// fail as carrier rejections.
    #[derive(Default)]
    pub(crate) struct FakeCarrier {
        pub placed: Mutex<Vec<(Instant, OutboundCall)>>,
        pub reject: Vec<String>,
    }

    #[async_trait]
    impl Telephony for FakeCarrier {
        async fn create_call(&self, call: &OutboundCall) -> Result<PlacedCall, DispatchError> {
            let mut placed = self.placed.lock().unwrap();
            placed.push((Instant::now(), call.clone()));
            if self.reject.contains(&call.to) {
                return Err(DispatchError::Rejected {
                    status: 400,
                    message: "The 'To' number is not a valid phone number.".to_string(),
                });
            }
            Ok(PlacedCall {
                call_sid: format!("CA{:04}", placed.len()),
                status: CallStatus::Queued,
            })
        }
    }

    fn dispatcher(carrier: Arc<FakeCarrier>) -> Dispatcher {
        Dispatcher::new(
            carrier,
            "https://agent.example.com/".to_string(),
            "+15559870000".to_string(),
        )
    }

    #[tokio::test]
    async fn originate_builds_callbacks_and_uses_default_from() {
        let carrier = Arc::new(FakeCarrier::default());
        let d = dispatcher(carrier.clone());
        let handle = d
            .originate(&DispatchRequest::new("+15551230000"))
            .await
            .unwrap();
        assert_eq!(handle.call_sid, "CA0001");
        assert_eq!(handle.scheduled_for, None);

        let placed = carrier.placed.lock().unwrap();
        let call = &placed[0].1;
        assert_eq!(call.from, "+15559870000");
        assert_eq!(call.answer_url, "https://agent.example.com/outgoing_call");
        assert_eq!(call.status_callback_url, "https://agent.example.com/call_status");
    }

    #[tokio::test]
    async fn originate_embeds_encoded_message() {
        let carrier = Arc::new(FakeCarrier::default());
        let d = dispatcher(carrier.clone());
        let request = DispatchRequest {
            to: "+15551230000".to_string(),
            message: Some("Hi & welcome, it's 50% off!".to_string()),
            from: Some("+15550001111".to_string()),
        };
        d.originate(&request).await.unwrap();

        let placed = carrier.placed.lock().unwrap();
        let call = &placed[0].1;
        assert_eq!(call.from, "+15550001111");
        let (base, query) = call.answer_url.split_once('?').unwrap();
        assert_eq!(base, "https://agent.example.com/outgoing_call");
        assert!(!query.contains(' ') && !query.contains('&'));
        let decoded: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(
            decoded,
            vec![("message".to_string(), "Hi & welcome, it's 50% off!".to_string())]
        );
    }

    #[tokio::test]
    async fn originate_rejects_missing_destination_without_dialing() {
        let carrier = Arc::new(FakeCarrier::default());
        let d = dispatcher(carrier.clone());
        let err = d.originate(&DispatchRequest::new("  ")).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRequest(_)));
        assert!(carrier.placed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn carrier_rejection_surfaces_as_dispatch_error() {
        let carrier = Arc::new(FakeCarrier {
            reject: vec!["+1000".to_string()],
            ..Default::default()
        });
        let d = dispatcher(carrier);
        let err = d.originate(&DispatchRequest::new("+1000")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn schedule_hands_time_to_carrier() {
        let carrier = Arc::new(FakeCarrier::default());
        let d = dispatcher(carrier.clone());
        let at = datetime!(2026-10-17 15:00:00 UTC);
        let handle = d
            .schedule(&DispatchRequest::new("+15551230000"), at)
            .await
            .unwrap();
        assert_eq!(handle.scheduled_for, Some(at));
        assert_eq!(carrier.placed.lock().unwrap()[0].1.scheduled_for, Some(at));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_is_sequential_paced_and_complete() {
        let carrier = Arc::new(FakeCarrier {
            reject: vec!["+15550000002".to_string()],
            ..Default::default()
        });
        let d = dispatcher(carrier.clone());
        let requests = vec![
            DispatchRequest::new("+15550000001").with_message("first"),
            DispatchRequest::new("+15550000002"),
            DispatchRequest::new(""),
            DispatchRequest::new("+15550000004"),
        ];
        let delay = Duration::from_secs(60);
        let mut log = BatchLog::new(Vec::new()).unwrap();
        let shutdown = CancellationToken::new();

        let outcomes = d
            .run_batch(&requests, delay, &mut log, &shutdown)
            .await
            .unwrap();

        let labels: Vec<&str> = outcomes.iter().map(|o| o.status_label()).collect();
        assert_eq!(labels, vec!["initiated", "failed", "skipped", "initiated"]);
        assert_eq!(log.rows(), 4);

        let placed = carrier.placed.lock().unwrap();
        let dialed: Vec<&str> = placed.iter().map(|(_, c)| c.to.as_str()).collect();
        assert_eq!(dialed, vec!["+15550000001", "+15550000002", "+15550000004"]);
        for pair in placed.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= delay);
        }
        // the skipped row still waits its turn
        assert!(placed[2].0 - placed[1].0 >= delay * 2);

        let text = String::from_utf8(log.into_inner()).unwrap();
        let rows: Vec<&str> = text.lines().skip(1).collect();
        assert!(rows[0].ends_with(",+15550000001,first,CA0001,initiated"));
        assert!(rows[1].ends_with(",+15550000002,,,failed"));
        assert!(rows[2].ends_with(",,,,skipped"));
        assert!(rows[3].ends_with(",+15550000004,,CA0003,initiated"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_batch_delay() {
        let carrier = Arc::new(FakeCarrier::default());
        let d = dispatcher(carrier.clone());
        let requests = vec![
            DispatchRequest::new("+15550000001"),
            DispatchRequest::new("+15550000002"),
        ];
        let mut log = BatchLog::new(Vec::new()).unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let outcomes = d
            .run_batch(&requests, Duration::from_secs(3600), &mut log, &shutdown)
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(log.rows(), 1);
        assert_eq!(carrier.placed.lock().unwrap().len(), 1);
    }
}
