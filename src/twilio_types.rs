pub fn wrap_twiml(twiml: String) -> String {
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{twiml}")
}

mod twiml {
    use xmlserde_derives::XmlSerialize;

    #[derive(PartialEq, Eq, XmlSerialize)]
    #[xmlserde(root = b"Response")]
    pub struct Response {
        #[xmlserde(ty = "untag")]
        pub actions: Vec<ResponseAction>,
    }

    #[derive(PartialEq, Eq, XmlSerialize)]
    pub enum ResponseAction {
        #[xmlserde(name = b"Say")]
        Say(SayAction),
        #[xmlserde(name = b"Gather")]
        Gather(GatherAction),
        #[xmlserde(name = b"Redirect")]
        Redirect(RedirectAction),
        #[xmlserde(name = b"Hangup")]
        Hangup(HangupAction),
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct SayAction {
        #[xmlserde(ty = "text")]
        pub text: String,
        #[xmlserde(name = b"language", ty = "attr")]
        pub language: Option<String>,
    }

    /// Opens a listening window; nested prompts are spoken while listening.
    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct GatherAction {
        #[xmlserde(name = b"input", ty = "attr")]
        pub input: String,
        #[xmlserde(name = b"action", ty = "attr")]
        pub action: String,
        #[xmlserde(name = b"method", ty = "attr")]
        pub method: Option<String>,
        #[xmlserde(name = b"timeout", ty = "attr")]
        pub timeout: Option<u16>,
        #[xmlserde(name = b"speechTimeout", ty = "attr")]
        pub speech_timeout: Option<String>,
        #[xmlserde(name = b"language", ty = "attr")]
        pub language: Option<String>,
        #[xmlserde(ty = "untag")]
        pub prompts: Vec<GatherPrompt>,
    }

    #[derive(PartialEq, Eq, XmlSerialize)]
    pub enum GatherPrompt {
        #[xmlserde(name = b"Say")]
        Say(SayAction),
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct RedirectAction {
        #[xmlserde(ty = "text")]
        pub url: String,
        #[xmlserde(name = b"method", ty = "attr")]
        pub method: Option<String>,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct HangupAction {}
}
pub use twiml::*;

mod webhook {
    use serde::Deserialize;
    use std::fmt;

    #[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
    #[serde(rename_all = "kebab-case")]
    pub enum CallStatus {
        Queued,
        Initiated,
        Ringing,
        InProgress,
        Completed,
        Busy,
        Failed,
        NoAnswer,
        Canceled,
        #[default]
        #[serde(other)]
        Unknown,
    }

    impl CallStatus {
        pub fn as_str(&self) -> &'static str {
            match self {
                CallStatus::Queued => "queued",
                CallStatus::Initiated => "initiated",
                CallStatus::Ringing => "ringing",
                CallStatus::InProgress => "in-progress",
                CallStatus::Completed => "completed",
                CallStatus::Busy => "busy",
                CallStatus::Failed => "failed",
                CallStatus::NoAnswer => "no-answer",
                CallStatus::Canceled => "canceled",
                CallStatus::Unknown => "unknown",
            }
        }
    }

    impl fmt::Display for CallStatus {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// Form body of the voice webhooks (`/answer`, `/outgoing_call`, `/process_speech`).
    /// Every field is defaulted so a sparse request still parses.
    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "PascalCase")]
    pub struct VoicePayload {
        #[serde(default)]
        pub call_sid: String,
        #[serde(default)]
        pub from: Option<String>,
        #[serde(default)]
        pub to: Option<String>,
        /// `inbound`, `outbound-api` or `outbound-dial`
        #[serde(default)]
        pub direction: Option<String>,
        #[serde(default)]
        pub speech_result: Option<String>,
    }

    /// Form body of the status callback
    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "PascalCase")]
    pub struct StatusPayload {
        #[serde(default)]
        pub call_sid: String,
        #[serde(default)]
        pub call_status: CallStatus,
        #[serde(default)]
        pub to: String,
    }

    /// Query string of the outbound answer callback
    #[derive(Deserialize, Debug, Default)]
    pub struct OutgoingCallQuery {
        pub message: Option<String>,
    }
}
pub use webhook::*;

mod rest {
    use super::CallStatus;
    use serde::Deserialize;

    /// Subset of the call resource returned by `POST /Calls.json`
    #[derive(Deserialize, Debug)]
    pub struct CreatedCall {
        pub sid: String,
        #[serde(default)]
        pub status: CallStatus,
    }

    #[derive(Deserialize, Debug)]
    pub struct TwilioErrorBody {
        pub message: String,
        pub code: Option<u32>,
    }
}
pub use rest::*;
