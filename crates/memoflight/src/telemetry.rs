// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured logging of cache, controller and listener activity.
//!
//! Every event goes through [`emit`], which picks the `tracing` level from the activity and
//! attaches the `memoflight.name`, `memoflight.activity` and `memoflight.detail` fields. The crate
//! never installs a subscriber.

/// Name reported when a cache or resource was not given one.
pub(crate) const DEFAULT_NAME: &str = "memoflight";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activity {
    Hit,
    Miss,
    Expired,
    Coalesced,
    Inserted,
    Error,
    Started,
    Settled,
    Superseded,
    Disposed,
    ListenerFailed,
    LossyTimestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Activity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "cache.hit",
            Self::Miss => "cache.miss",
            Self::Expired => "cache.expired",
            Self::Coalesced => "cache.coalesced",
            Self::Inserted => "cache.inserted",
            Self::Error => "cache.error",
            Self::Started => "controller.started",
            Self::Settled => "controller.settled",
            Self::Superseded => "controller.superseded",
            Self::Disposed => "controller.disposed",
            Self::ListenerFailed => "listener.failed",
            Self::LossyTimestamp => "key.lossy_timestamp",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Self::Hit | Self::Miss | Self::Coalesced | Self::Started | Self::Superseded => Severity::Debug,
            Self::Expired | Self::Inserted | Self::Settled | Self::Disposed => Severity::Info,
            Self::LossyTimestamp => Severity::Warn,
            Self::Error | Self::ListenerFailed => Severity::Error,
        }
    }
}

/// Emits one event for `activity`.
///
/// `detail` is free-form context: the key for cache and controller events, the offending path
/// for key warnings, the error for failures.
pub(crate) fn emit(name: &str, activity: Activity, detail: &str) {
    let activity_name = activity.as_str();

    macro_rules! emit_event {
        ($level:ident) => {
            tracing::$level!(
                memoflight.name = name,
                memoflight.activity = activity_name,
                memoflight.detail = detail,
                "memoflight.event"
            )
        };
    }

    match activity.severity() {
        Severity::Error => emit_event!(error),
        Severity::Warn => emit_event!(warn),
        Severity::Info => emit_event!(info),
        Severity::Debug => emit_event!(debug),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LogCapture;

    #[test]
    fn activity_names_are_stable() {
        assert_eq!(Activity::Hit.as_str(), "cache.hit");
        assert_eq!(Activity::Miss.as_str(), "cache.miss");
        assert_eq!(Activity::Expired.as_str(), "cache.expired");
        assert_eq!(Activity::Coalesced.as_str(), "cache.coalesced");
        assert_eq!(Activity::Inserted.as_str(), "cache.inserted");
        assert_eq!(Activity::Error.as_str(), "cache.error");
        assert_eq!(Activity::Started.as_str(), "controller.started");
        assert_eq!(Activity::Settled.as_str(), "controller.settled");
        assert_eq!(Activity::Superseded.as_str(), "controller.superseded");
        assert_eq!(Activity::Disposed.as_str(), "controller.disposed");
        assert_eq!(Activity::ListenerFailed.as_str(), "listener.failed");
        assert_eq!(Activity::LossyTimestamp.as_str(), "key.lossy_timestamp");
    }

    #[test]
    fn emit_writes_all_fields() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        emit("profiles", Activity::ListenerFailed, "[\"alice\"]");

        capture.assert_contains("memoflight.name");
        capture.assert_contains("memoflight.activity");
        capture.assert_contains("memoflight.detail");
        capture.assert_contains("profiles");
        capture.assert_contains("listener.failed");
    }

    #[test]
    fn emit_uses_activity_severity() {
        let cases = [
            (Activity::Error, "ERROR"),
            (Activity::LossyTimestamp, "WARN"),
            (Activity::Inserted, "INFO"),
            (Activity::Hit, "DEBUG"),
        ];

        for (activity, level) in cases {
            let capture = LogCapture::new();
            let _guard = tracing::subscriber::set_default(capture.subscriber());
            emit("cache", activity, "");
            capture.assert_contains(level);
        }
    }
}
