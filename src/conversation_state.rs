use crate::config::{DEFAULT_MAX_EMPTY_TURNS, DEFAULT_OPENAI_TIMEOUT_SECS};
use crate::consts::{
    ANSWER_PATH, APOLOGY, CLOSING_LINE, CONTINUE_PROMPT, INBOUND_GREETING, LISTEN_TIMEOUT_PATH,
    OUTBOUND_GREETING, REPROMPT, SYSTEM_PROMPT,
};
use crate::generator::ResponseGenerator;
use crate::types::CallDirection;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Where a call's conversation currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Greeting,
    Listening,
    Processing,
    Responding,
    Ending,
}

/// Protocol-layer instruction emitted by a transition.  Rendered to TwiML by the handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallInstruction {
    Say(String),
    /// Open a bounded speech-capture window, optionally speaking a prompt while listening
    Listen { prompt: Option<String> },
    Redirect(&'static str),
    Hangup,
}

/// Where the carrier goes when a listening window elapses without speech
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceFallback {
    /// Come back to `/answer` and greet again
    Regreet,
    /// Report the silence to `/listen_timeout`
    Report,
    /// Say goodbye without another round trip
    Close,
}

pub struct ConversationSettings {
    pub system_prompt: String,
    /// Upper bound on one Response Generator call; elapsing counts as a failure
    pub generation_timeout: Duration,
    /// Consecutive empty turns tolerated before the call is closed
    pub max_empty_turns: u32,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            system_prompt: SYSTEM_PROMPT.to_string(),
            generation_timeout: Duration::from_secs(DEFAULT_OPENAI_TIMEOUT_SECS),
            max_empty_turns: DEFAULT_MAX_EMPTY_TURNS,
        }
    }
}

/// A single listen/respond cycle.  Dropped once its reply has been rendered.
pub struct ConversationTurn {
    pub seq: u32,
    pub transcript: String,
    pub reply: Option<String>,
}

pub struct ConversationState {
    pub call_sid: String,
    pub direction: CallDirection,
    phase: Phase,
    opening: String,
    turn_seq: u32,
    consecutive_empty: u32,
    last_event: Instant,
    generator: Arc<dyn ResponseGenerator>,
    settings: Arc<ConversationSettings>,
}

impl ConversationState {
    pub fn new(
        call_sid: String,
        direction: CallDirection,
        custom_opening: Option<String>,
        generator: Arc<dyn ResponseGenerator>,
        settings: Arc<ConversationSettings>,
    ) -> Self {
        let opening = custom_opening
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| match direction {
                CallDirection::Inbound => INBOUND_GREETING.to_string(),
                CallDirection::Outbound => OUTBOUND_GREETING.to_string(),
            });

        Self {
            call_sid,
            direction,
            phase: Phase::Greeting,
            opening,
            turn_seq: 0,
            consecutive_empty: 0,
            last_event: Instant::now(),
            generator,
            settings,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_ended(&self) -> bool {
        self.phase == Phase::Ending
    }

    pub fn idle_for(&self) -> Duration {
        self.last_event.elapsed()
    }

    /// Handle the answer webhook.  The first time it runs the greeting entry action; an
    /// inbound call is redirected back here when the greeting window hears nothing, which
    /// counts as an empty turn.
    pub fn answer(&mut self) -> Vec<CallInstruction> {
        self.last_event = Instant::now();
        match self.phase {
            Phase::Greeting => {
                info!(call_sid=%self.call_sid, direction=?self.direction, "greeting caller");
                self.phase = Phase::Listening;
                self.greeting_window()
            }
            Phase::Listening | Phase::Processing | Phase::Responding => {
                if self.note_empty_turn() {
                    return self.end();
                }
                debug!(call_sid=%self.call_sid, empty=self.consecutive_empty, "greeting again after silence");
                self.phase = Phase::Listening;
                self.greeting_window()
            }
            Phase::Ending => vec![CallInstruction::Hangup],
        }
    }

    /// Deliver a transcript from the open listening window.  Returns `None` when no window is
    /// open, which is how duplicate or late deliveries are ignored.
    pub async fn hear(&mut self, transcript: &str) -> Option<Vec<CallInstruction>> {
        if self.phase != Phase::Listening {
            warn!(call_sid=%self.call_sid, phase=?self.phase, "transcript with no open listening window");
            return None;
        }
        self.last_event = Instant::now();
        self.turn_seq += 1;
        let mut turn = ConversationTurn {
            seq: self.turn_seq,
            transcript: transcript.trim().to_string(),
            reply: None,
        };

        if turn.transcript.is_empty() {
            debug!(call_sid=%self.call_sid, seq=turn.seq, "empty transcript");
            if self.note_empty_turn() {
                return Some(self.end());
            }
            let mut out = vec![CallInstruction::Say(REPROMPT.to_string())];
            out.extend(self.listening_window(None, SilenceFallback::Report));
            return Some(out);
        }

        self.consecutive_empty = 0;
        self.phase = Phase::Processing;
        let spoken = match timeout(
            self.settings.generation_timeout,
            self.generator
                .reply(&self.settings.system_prompt, &turn.transcript),
        )
        .await
        {
            Ok(Ok(reply)) => {
                turn.reply = Some(reply.clone());
                reply
            }
            Ok(Err(e)) => {
                warn!(call_sid=%self.call_sid, error=%e, "response generation failed");
                APOLOGY.to_string()
            }
            Err(_) => {
                warn!(call_sid=%self.call_sid, timeout_ms=self.settings.generation_timeout.as_millis(), "response generation timed out");
                APOLOGY.to_string()
            }
        };
        debug!(call_sid=%self.call_sid, seq=turn.seq, replied=turn.reply.is_some(), "turn complete");

        self.phase = Phase::Responding;
        let mut out = vec![CallInstruction::Say(spoken)];
        out.extend(self.listening_window(
            Some(CONTINUE_PROMPT.to_string()),
            SilenceFallback::Report,
        ));
        Some(out)
    }

    /// The window opened after a reply or re-prompt elapsed with no speech
    pub fn silence(&mut self) -> Option<Vec<CallInstruction>> {
        if self.phase != Phase::Listening {
            warn!(call_sid=%self.call_sid, phase=?self.phase, "silence with no open listening window");
            return None;
        }
        self.last_event = Instant::now();
        info!(call_sid=%self.call_sid, "caller went quiet; closing");
        Some(self.end())
    }

    fn greeting_window(&mut self) -> Vec<CallInstruction> {
        let fallback = match self.direction {
            CallDirection::Inbound => SilenceFallback::Regreet,
            CallDirection::Outbound => SilenceFallback::Close,
        };
        self.listening_window(Some(self.opening.clone()), fallback)
    }

    fn listening_window(
        &mut self,
        prompt: Option<String>,
        fallback: SilenceFallback,
    ) -> Vec<CallInstruction> {
        self.phase = Phase::Listening;
        let mut out = vec![CallInstruction::Listen { prompt }];
        match fallback {
            SilenceFallback::Regreet => out.push(CallInstruction::Redirect(ANSWER_PATH)),
            SilenceFallback::Report => out.push(CallInstruction::Redirect(LISTEN_TIMEOUT_PATH)),
            SilenceFallback::Close => {
                out.push(CallInstruction::Say(CLOSING_LINE.to_string()));
                out.push(CallInstruction::Hangup);
            }
        }
        out
    }

    /// Count an empty turn; true once the bound is reached
    fn note_empty_turn(&mut self) -> bool {
        self.consecutive_empty += 1;
        self.consecutive_empty >= self.settings.max_empty_turns
    }

    fn end(&mut self) -> Vec<CallInstruction> {
        info!(call_sid=%self.call_sid, turns=self.turn_seq, "ending conversation");
        self.phase = Phase::Ending;
        vec![
            CallInstruction::Say(CLOSING_LINE.to_string()),
            CallInstruction::Hangup,
        ]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::GenerationError;

    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted generator that records every invocation
    pub(crate) struct MockGenerator {
        pub calls: Mutex<Vec<(String, String)>>,
        pub reply: Result<String, ()>,
        pub delay: Option<Duration>,
    }

    impl MockGenerator {
        pub(crate) fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(vec![]),
                reply: Ok(reply.to_string()),
                delay: None,
            })
        }

        pub(crate) fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(vec![]),
                reply: Err(()),
                delay: None,
            })
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ResponseGenerator for MockGenerator {
        async fn reply(&self, system: &str, user: &str) -> Result<String, GenerationError> {
            self.calls
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string()));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.reply
                .clone()
                .map_err(|_| GenerationError::Transport("connection refused".to_string()))
        }
    }

    fn state(direction: CallDirection, generator: Arc<MockGenerator>) -> ConversationState {
        ConversationState::new(
            "CA100".to_string(),
            direction,
            None,
            generator,
            Arc::new(ConversationSettings::default()),
        )
    }

    fn spoken(instructions: &[CallInstruction]) -> Vec<&str> {
        instructions
            .iter()
            .filter_map(|i| match i {
                CallInstruction::Say(text) => Some(text.as_str()),
                CallInstruction::Listen { prompt } => prompt.as_deref(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn inbound_greeting_listens_then_redirects_to_answer() {
        let mut s = state(CallDirection::Inbound, MockGenerator::replying("x"));
        assert_eq!(s.phase(), Phase::Greeting);
        let out = s.answer();
        assert_eq!(s.phase(), Phase::Listening);
        assert_eq!(
            out,
            vec![
                CallInstruction::Listen {
                    prompt: Some(INBOUND_GREETING.to_string())
                },
                CallInstruction::Redirect(ANSWER_PATH),
            ]
        );
    }

    #[test]
    fn outbound_greeting_uses_custom_opening_and_closes_on_silence() {
        let mut s = ConversationState::new(
            "CA200".to_string(),
            CallDirection::Outbound,
            Some("Hello, I am calling from the salon".to_string()),
            MockGenerator::replying("x"),
            Arc::new(ConversationSettings::default()),
        );
        let out = s.answer();
        assert_eq!(
            out,
            vec![
                CallInstruction::Listen {
                    prompt: Some("Hello, I am calling from the salon".to_string())
                },
                CallInstruction::Say(CLOSING_LINE.to_string()),
                CallInstruction::Hangup,
            ]
        );
    }

    #[test]
    fn blank_custom_opening_falls_back_to_default() {
        let mut s = ConversationState::new(
            "CA201".to_string(),
            CallDirection::Outbound,
            Some("   ".to_string()),
            MockGenerator::replying("x"),
            Arc::new(ConversationSettings::default()),
        );
        assert_eq!(spoken(&s.answer())[0], OUTBOUND_GREETING);
    }

    #[tokio::test]
    async fn empty_transcript_reprompts_without_generating() {
        let generator = MockGenerator::replying("unused");
        let mut s = state(CallDirection::Inbound, generator.clone());
        s.answer();
        let out = s.hear("").await.unwrap();
        assert_eq!(generator.call_count(), 0);
        assert_eq!(out[0], CallInstruction::Say(REPROMPT.to_string()));
        assert_eq!(out[1], CallInstruction::Listen { prompt: None });
        assert_eq!(s.phase(), Phase::Listening);
    }

    #[tokio::test]
    async fn transcript_is_sent_alone_with_persona() {
        let generator = MockGenerator::replying("We are open nine to five.");
        let mut s = state(CallDirection::Inbound, generator.clone());
        s.answer();
        let out = s.hear("What are your hours?").await.unwrap();

        let calls = generator.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![(SYSTEM_PROMPT.to_string(), "What are your hours?".to_string())]
        );
        assert_eq!(
            out,
            vec![
                CallInstruction::Say("We are open nine to five.".to_string()),
                CallInstruction::Listen {
                    prompt: Some(CONTINUE_PROMPT.to_string())
                },
                CallInstruction::Redirect(LISTEN_TIMEOUT_PATH),
            ]
        );
        assert_eq!(s.phase(), Phase::Listening);
    }

    #[tokio::test]
    async fn generation_failure_speaks_apology_and_keeps_listening() {
        let generator = MockGenerator::failing();
        let mut s = state(CallDirection::Outbound, generator.clone());
        s.answer();
        let out = s.hear("Can I book a haircut?").await.unwrap();
        assert_eq!(generator.call_count(), 1);
        assert_eq!(out[0], CallInstruction::Say(APOLOGY.to_string()));
        assert!(matches!(out[1], CallInstruction::Listen { .. }));
        assert_eq!(s.phase(), Phase::Listening);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_generation_times_out_into_apology() {
        let generator = Arc::new(MockGenerator {
            calls: Mutex::new(vec![]),
            reply: Ok("too late".to_string()),
            delay: Some(Duration::from_secs(60)),
        });
        let mut s = state(CallDirection::Inbound, generator.clone());
        s.answer();
        let out = s.hear("hello?").await.unwrap();
        assert_eq!(out[0], CallInstruction::Say(APOLOGY.to_string()));
        assert_eq!(s.phase(), Phase::Listening);
    }

    #[tokio::test]
    async fn consecutive_empty_turns_are_bounded() {
        let generator = MockGenerator::replying("unused");
        let mut s = state(CallDirection::Inbound, generator.clone());
        s.answer();
        assert_eq!(spoken(&s.hear("").await.unwrap()), vec![REPROMPT]);
        assert_eq!(spoken(&s.hear(" ").await.unwrap()), vec![REPROMPT]);
        let out = s.hear("").await.unwrap();
        assert_eq!(
            out,
            vec![
                CallInstruction::Say(CLOSING_LINE.to_string()),
                CallInstruction::Hangup
            ]
        );
        assert!(s.is_ended());
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn speech_resets_the_empty_turn_count() {
        let generator = MockGenerator::replying("Sure.");
        let mut s = state(CallDirection::Inbound, generator);
        s.answer();
        s.hear("").await.unwrap();
        s.hear("").await.unwrap();
        s.hear("book me in").await.unwrap();
        let out = s.hear("").await.unwrap();
        assert_eq!(out[0], CallInstruction::Say(REPROMPT.to_string()));
        assert!(!s.is_ended());
    }

    #[test]
    fn repeated_silent_greetings_end_inbound_call() {
        let mut s = state(CallDirection::Inbound, MockGenerator::replying("x"));
        s.answer();
        s.answer();
        s.answer();
        assert!(!s.is_ended());
        let out = s.answer();
        assert_eq!(spoken(&out), vec![CLOSING_LINE]);
        assert!(s.is_ended());
        assert_eq!(s.answer(), vec![CallInstruction::Hangup]);
    }

    #[tokio::test]
    async fn silence_after_reply_closes_and_late_transcript_is_ignored() {
        let generator = MockGenerator::replying("Anything else?");
        let mut s = state(CallDirection::Inbound, generator.clone());
        s.answer();
        s.hear("hi").await.unwrap();
        let out = s.silence().unwrap();
        assert_eq!(spoken(&out), vec![CLOSING_LINE]);
        assert!(s.is_ended());

        assert!(s.hear("wait").await.is_none());
        assert!(s.silence().is_none());
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn transcript_before_greeting_is_ignored() {
        let generator = MockGenerator::replying("x");
        let mut s = state(CallDirection::Inbound, generator.clone());
        assert!(s.hear("hello").await.is_none());
        assert_eq!(generator.call_count(), 0);
        assert_eq!(s.phase(), Phase::Greeting);
    }
}
