//! Transaction identity.
//!
//! RFC 3261 17.1.3 / 17.2.3 match messages to transactions by the top
//! Via branch together with the CSeq method, split by which side of the
//! transaction we hold. The branch carries the `z9hG4bK` magic cookie,
//! so two well-behaved stacks never collide.

use std::fmt;

use siprail_sip_core::{Method, Request, Response};

/// Uniquely identifies one transaction in the store.
///
/// `is_server` keeps a UAC and a UAS transaction for the same branch
/// apart, which happens whenever we proxy or loop a call to ourselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    branch: String,
    method: Method,
    is_server: bool,
}

impl TransactionKey {
    pub fn new(branch: impl Into<String>, method: Method, is_server: bool) -> Self {
        TransactionKey {
            branch: branch.into(),
            method,
            is_server,
        }
    }

    /// Key for the server transaction a request creates or matches.
    ///
    /// Returns `None` when the top Via has no branch; such requests are
    /// rejected at the boundary before matching is attempted.
    pub fn from_request(request: &Request) -> Option<Self> {
        let branch = request.via_branch()?;
        if branch.is_empty() {
            return None;
        }
        Some(TransactionKey::new(branch, request.method.clone(), true))
    }

    /// Key for the client transaction that sending `request` creates.
    /// Callers that must index state before the send starts use this to
    /// name the transaction ahead of time.
    pub fn from_client_request(request: &Request) -> Option<Self> {
        let branch = request.via_branch()?;
        if branch.is_empty() {
            return None;
        }
        Some(TransactionKey::new(branch, request.method.clone(), false))
    }

    /// Key for the client transaction a response answers. The method
    /// comes from CSeq since the status line does not carry one.
    pub fn from_response(response: &Response) -> Option<Self> {
        let branch = response.via_branch()?;
        if branch.is_empty() {
            return None;
        }
        let (_, method) = response.cseq()?;
        Some(TransactionKey::new(branch, method, false))
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Key({}:{}:{})",
            self.branch,
            self.method,
            if self.is_server { "server" } else { "client" }
        )
    }
}
