//! Request/response handshakes (shutdown, plan approval) correlated by id.
//!
//! Each request is one record under `.crew/team/requests/<id>.json`. The
//! request and its response travel through the mailbox carrying the same
//! `correlation_id`; the record is the authority on whether a response was
//! already given.
//!
//! An initiator has at most one pending request per kind. A response is
//! recorded before it is delivered; until delivery succeeds the record keeps
//! `reply_pending` and the same answer may be sent again.

use std::fs;
use std::io::ErrorKind as IoErrorKind;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::core::names::validate_agent_name;
use crate::core::types::{RequestKind, RequestStatus};
use crate::error::{Error, Result};
use crate::io::init::CrewPaths;
use crate::io::json_file::{read_json, write_json_atomic};
use crate::io::lock::{FileLock, LockPolicy};
use crate::io::mailbox::{Mailbox, Message};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolRequest {
    pub correlation_id: String,
    pub kind: RequestKind,
    pub initiator: String,
    pub target: String,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Resolved, but the response message has not reached the initiator.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reply_pending: bool,
}

impl ProtocolRequest {
    fn approved(&self) -> bool {
        self.status == RequestStatus::Approved
    }
}

#[derive(Debug, Clone)]
pub struct Correlator {
    paths: CrewPaths,
    policy: LockPolicy,
    mailbox: Mailbox,
}

impl Correlator {
    pub fn new(paths: &CrewPaths, policy: LockPolicy, mailbox: Mailbox) -> Self {
        Self {
            paths: paths.clone(),
            policy,
            mailbox,
        }
    }

    /// Persist a pending request and deliver it to `target`. Returns the new
    /// correlation id.
    #[instrument(skip_all, fields(kind = %kind, initiator = %initiator, target = %target))]
    pub fn initiate(
        &self,
        initiator: &str,
        target: &str,
        kind: RequestKind,
        payload: Option<&str>,
    ) -> Result<String> {
        validate_agent_name(initiator)?;
        validate_agent_name(target)?;
        let _initiator_lock = FileLock::acquire(
            &self.paths.lock_path("requests", &format!("{initiator}.{kind}")),
            &self.policy,
        )?;
        if let Some(open) = self
            .list(Some(kind))?
            .into_iter()
            .find(|r| r.initiator == initiator && r.status == RequestStatus::Pending)
        {
            return Err(Error::RequestInFlight {
                initiator: initiator.to_string(),
                kind: kind.to_string(),
                id: open.correlation_id,
            });
        }

        let request = ProtocolRequest {
            correlation_id: Uuid::new_v4().to_string(),
            kind,
            initiator: initiator.to_string(),
            target: target.to_string(),
            status: RequestStatus::Pending,
            payload: payload.map(str::to_string),
            feedback: None,
            created_at: Utc::now(),
            resolved_at: None,
            reply_pending: false,
        };
        let id = request.correlation_id.clone();
        let path = self.paths.request_path(&id);
        write_json_atomic(&path, &request)?;

        let content = payload.map_or_else(|| default_request_text(kind), str::to_string);
        let message = Message::new(kind.request_message(), initiator, target, &content)
            .with_correlation_id(id.clone());
        if let Err(err) = self.mailbox.deliver(&message) {
            // Undelivered requests would otherwise block the initiator forever.
            if let Err(cleanup) = fs::remove_file(&path) {
                warn!(err = %cleanup, correlation_id = %id, "failed to drop undelivered request");
            }
            return Err(err);
        }
        info!(correlation_id = %id, "request sent");
        Ok(id)
    }

    /// Resolve a pending request exactly once and notify the initiator.
    ///
    /// Repeating the recorded answer on a request whose reply was never
    /// delivered retries the delivery; any other second response is
    /// `DuplicateResponse`.
    #[instrument(skip_all, fields(correlation_id = %correlation_id, approve = approve))]
    pub fn respond(
        &self,
        correlation_id: &str,
        approve: bool,
        feedback: Option<&str>,
    ) -> Result<ProtocolRequest> {
        // Ids name files; anything that is not a uuid cannot exist.
        if Uuid::parse_str(correlation_id).is_err() {
            return Err(Error::RequestNotFound(correlation_id.to_string()));
        }
        let _lock = FileLock::acquire(
            &self.paths.lock_path("requests", correlation_id),
            &self.policy,
        )?;
        let path = self.paths.request_path(correlation_id);
        let mut request = self.get(correlation_id)?;
        if request.status.is_terminal() {
            if !request.reply_pending || request.approved() != approve {
                return Err(Error::DuplicateResponse {
                    id: correlation_id.to_string(),
                    status: request.status.to_string(),
                });
            }
            warn!("re-sending undelivered response");
        } else {
            request.status = if approve {
                RequestStatus::Approved
            } else {
                RequestStatus::Rejected
            };
            request.feedback = feedback.map(str::to_string);
            request.resolved_at = Some(Utc::now());
            request.reply_pending = true;
            write_json_atomic(&path, &request)?;
        }

        self.mailbox.deliver(&response_message(&request))?;
        request.reply_pending = false;
        write_json_atomic(&path, &request)?;
        info!(status = %request.status, "request resolved");
        Ok(request)
    }

    pub fn get(&self, correlation_id: &str) -> Result<ProtocolRequest> {
        if Uuid::parse_str(correlation_id).is_err() {
            return Err(Error::RequestNotFound(correlation_id.to_string()));
        }
        let path = self.paths.request_path(correlation_id);
        if !path.exists() {
            return Err(Error::RequestNotFound(correlation_id.to_string()));
        }
        read_json(&path)
    }

    /// Requests ordered by creation time, optionally filtered by kind.
    pub fn list(&self, kind: Option<RequestKind>) -> Result<Vec<ProtocolRequest>> {
        let dir = &self.paths.requests_dir;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::storage("list requests", dir, err)),
        };
        let mut requests = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| Error::storage("list requests", dir, err))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let request: ProtocolRequest = read_json(&path)?;
            if kind.is_none_or(|k| k == request.kind) {
                requests.push(request);
            }
        }
        requests.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.correlation_id.cmp(&b.correlation_id))
        });
        Ok(requests)
    }
}

fn response_message(request: &ProtocolRequest) -> Message {
    let content = request.feedback.clone().unwrap_or_else(|| {
        format!("{} {}", request.kind, request.status)
    });
    Message::new(
        request.kind.response_message(),
        &request.target,
        &request.initiator,
        &content,
    )
    .with_correlation_id(request.correlation_id.clone())
    .with_approve(request.approved())
}

fn default_request_text(kind: RequestKind) -> String {
    match kind {
        RequestKind::Shutdown => "Please shut down.".to_string(),
        RequestKind::Plan => "Plan submitted for review.".to_string(),
    }
}
