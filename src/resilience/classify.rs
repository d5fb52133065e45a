//! Maps raw failure text to an [`ErrorKind`] and a user-facing sentence.
//!
//! Classification is a pure lookup over [`RULES`], an ordered table of
//! `(kind, matcher)` pairs. The first matching row wins. Status codes are
//! listed before keywords so an explicit HTTP status outranks incidental
//! wording in the response body.

use regex::Regex;
use std::sync::LazyLock;

use crate::core::action::Operation;
use crate::core::error::{ErrorKind, RemoteError};

/// Bump when a row is added, removed or reordered.
pub const CLASSIFIER_VERSION: u32 = 1;

static STATUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([1-5]\d{2})\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    /// Case-insensitive substring.
    Keyword(&'static str),
    /// A standalone three-digit status code.
    Status(u16),
    /// Any standalone status code in the inclusive range.
    StatusRange(u16, u16),
}

impl Matcher {
    fn matches(&self, lowered: &str, statuses: &[u16]) -> bool {
        match *self {
            Self::Keyword(k) => lowered.contains(k),
            Self::Status(code) => statuses.contains(&code),
            Self::StatusRange(lo, hi) => statuses.iter().any(|s| (lo..=hi).contains(s)),
        }
    }
}

use ErrorKind::*;
use Matcher::*;

pub static RULES: &[(ErrorKind, Matcher)] = &[
    // The backend reports a revoked mail/calendar grant with these markers,
    // sometimes alongside a 401.
    (ProviderDisconnected, Keyword("provider_disconnected")),
    (ProviderDisconnected, Keyword("provider disconnected")),
    (ProviderDisconnected, Keyword("invalid_grant")),
    (ProviderDisconnected, Keyword("reconnect your account")),
    (RateLimited, Status(429)),
    (Unauthorized, Status(401)),
    (Forbidden, Status(403)),
    (NotFound, Status(404)),
    (ServerUnavailable, StatusRange(500, 599)),
    (Network, Keyword("network")),
    (Network, Keyword("timeout")),
    (Network, Keyword("timed out")),
    (Network, Keyword("connection refused")),
    (Network, Keyword("connection reset")),
    (Network, Keyword("dns error")),
    (Network, Keyword("offline")),
    (Network, Keyword("failed to fetch")),
    (Network, Keyword("error sending request")),
    (RateLimited, Keyword("rate limit")),
    (RateLimited, Keyword("too many requests")),
    (Unauthorized, Keyword("unauthorized")),
    (Unauthorized, Keyword("unauthenticated")),
    (Unauthorized, Keyword("session expired")),
    (Forbidden, Keyword("forbidden")),
    (Forbidden, Keyword("permission denied")),
    (NotFound, Keyword("not found")),
    (ServerUnavailable, Keyword("service unavailable")),
    (ServerUnavailable, Keyword("bad gateway")),
    (ServerUnavailable, Keyword("internal server error")),
];

/// The `ErrorKind -> matchers` view of [`RULES`].
pub fn matchers_for(kind: ErrorKind) -> Vec<Matcher> {
    RULES
        .iter()
        .filter(|(k, _)| *k == kind)
        .map(|(_, m)| *m)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub status: Option<u16>,
}

impl Classification {
    pub fn friendly_message(&self, operation: Operation) -> String {
        friendly_message(self.kind, operation)
    }
}

fn status_codes(message: &str) -> Vec<u16> {
    STATUS_RE
        .captures_iter(message)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

fn classify_parts(lowered: &str, statuses: &[u16]) -> Classification {
    let kind = RULES
        .iter()
        .find(|(_, m)| m.matches(lowered, statuses))
        .map(|(k, _)| *k)
        .unwrap_or(Unknown);

    Classification {
        kind,
        retryable: kind.is_retryable(),
        status: statuses.first().copied(),
    }
}

/// Classify free-form failure text. Any standalone three-digit number in the
/// text is treated as a status code.
pub fn classify(raw_message: &str) -> Classification {
    let lowered = raw_message.to_lowercase();
    let statuses = status_codes(&lowered);
    classify_parts(&lowered, &statuses)
}

/// Classify a typed remote failure. Only the status the server actually sent
/// is matched against status rows; digits in URLs or bodies are ignored.
pub fn classify_remote(err: &RemoteError) -> Classification {
    match err {
        RemoteError::Network(_) => Classification {
            kind: Network,
            retryable: Network.is_retryable(),
            status: None,
        },
        RemoteError::Status { status, body } => classify_parts(&body.to_lowercase(), &[*status]),
        RemoteError::Decode(_) => Classification {
            kind: Unknown,
            retryable: false,
            status: None,
        },
    }
}

/// Failures the executor and cache know how to classify.
pub trait Classify {
    fn classification(&self) -> Classification;
}

impl Classify for RemoteError {
    fn classification(&self) -> Classification {
        classify_remote(self)
    }
}

impl Classify for str {
    fn classification(&self) -> Classification {
        classify(self)
    }
}

impl Classify for String {
    fn classification(&self) -> Classification {
        classify(self)
    }
}

impl<T: Classify + ?Sized> Classify for &T {
    fn classification(&self) -> Classification {
        (**self).classification()
    }
}

/// Sentences that are more precise than the per-kind default for a given operation.
fn specific_message(kind: ErrorKind, operation: Operation) -> Option<&'static str> {
    match (kind, operation) {
        (
            NotFound,
            Operation::ArchiveEmail
            | Operation::MarkRead
            | Operation::MarkUnread
            | Operation::ConvertToTask,
        ) => Some("This email no longer exists. It may have been moved or deleted."),
        (NotFound, Operation::CompleteTask | Operation::DeleteTask) => {
            Some("This task no longer exists. It may have been changed elsewhere.")
        }
        (Forbidden, Operation::UpgradeSubscription) => {
            Some("Your account can't be upgraded right now. Please contact support.")
        }
        (ProviderDisconnected, Operation::CompleteTask | Operation::DeleteTask) => {
            Some("Your tasks account is disconnected. Please reconnect it in Settings.")
        }
        _ => None,
    }
}

/// Total over every `(kind, operation)` pair. Never echoes backend text.
pub fn friendly_message(kind: ErrorKind, operation: Operation) -> String {
    if let Some(sentence) = specific_message(kind, operation) {
        return sentence.to_string();
    }

    match kind {
        Network => "Unable to connect. Check your internet connection and try again.".to_string(),
        Unauthorized => "Your session has expired. Please sign in again.".to_string(),
        Forbidden => format!("You don't have permission to {}.", operation.description()),
        NotFound => "The item you're looking for no longer exists.".to_string(),
        RateLimited => "Too many requests. Please wait a moment and try again.".to_string(),
        ServerUnavailable => {
            "The service is temporarily unavailable. Please try again in a few minutes.".to_string()
        }
        ProviderDisconnected => {
            "Your email account is disconnected. Please reconnect it in Settings.".to_string()
        }
        Unknown => generic_message(operation),
    }
}

pub fn generic_message(operation: Operation) -> String {
    format!("Failed to {}. Please try again.", operation.description())
}
