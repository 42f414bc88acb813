//! The process-wide error taxonomy.
//!
//! Every fallible API in this crate returns `Result<T, Error>`. `Error`
//! groups failures into the five kinds a caller needs to tell apart in order
//! to decide what to do next (retry, roll back, refuse, degrade): bad input,
//! resource exhaustion, a transient condition that will clear on its own, a
//! permanent condition that won't, and an internal consistency violation.
//! Each variant also carries the abstract error code exposed to external
//! callers (config validation, the request gateway's RCODE mapping).

use std::fmt;

/// The abstract error codes exposed to callers, independent of how an
/// `Error` is represented internally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Code {
    Ok,
    Inval,
    Nomem,
    Malf,
    Range,
    Nodiff,
    Busy,
    Eagain,
    Enoent,
    Econn,
    Ewritable,
    TsigBadkey,
    TsigBadsig,
    TsigBadtime,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Code::Ok => "OK",
            Code::Inval => "INVAL",
            Code::Nomem => "NOMEM",
            Code::Malf => "MALF",
            Code::Range => "RANGE",
            Code::Nodiff => "NODIFF",
            Code::Busy => "BUSY",
            Code::Eagain => "EAGAIN",
            Code::Enoent => "ENOENT",
            Code::Econn => "ECONN",
            Code::Ewritable => "EWRITABLE",
            Code::TsigBadkey => "TSIG_BADKEY",
            Code::TsigBadsig => "TSIG_BADSIG",
            Code::TsigBadtime => "TSIG_BADTIME",
        })
    }
}

/// A process error, classified by taxonomy kind.
#[derive(Clone, Debug)]
pub enum Error {
    /// Bad argument or malformed packet. Surfaced synchronously; no state
    /// change happens before this is returned.
    Validation { code: Code, reason: String },

    /// Out-of-memory, journal full, disk full. A journal-full condition is
    /// recovered by the caller via flush-and-retry-once; other resource
    /// errors abort the operation and leave the zone on its old snapshot.
    Resource { code: Code, reason: String },

    /// Transfer peer unreachable, TSIG time skew. Logged; the zone's
    /// `xfr_in.state` reverts to `SCHED` and RETRY fires later.
    Transient { code: Code, reason: String },

    /// Bad TSIG key, bad signature, zone-file format error. Logged at error
    /// level; the offending request is refused, with no zone-level
    /// degradation.
    Permanent { code: Code, reason: String },

    /// Serial regression, CNAME cycle, broken RRSIG. Logged per node; a dump
    /// continues where safe, an apply fails where not.
    Consistency { code: Code, reason: String },
}

impl Error {
    pub fn validation(code: Code, reason: impl Into<String>) -> Self {
        Error::Validation { code, reason: reason.into() }
    }

    pub fn resource(code: Code, reason: impl Into<String>) -> Self {
        Error::Resource { code, reason: reason.into() }
    }

    pub fn transient(code: Code, reason: impl Into<String>) -> Self {
        Error::Transient { code, reason: reason.into() }
    }

    pub fn permanent(code: Code, reason: impl Into<String>) -> Self {
        Error::Permanent { code, reason: reason.into() }
    }

    pub fn consistency(code: Code, reason: impl Into<String>) -> Self {
        Error::Consistency { code, reason: reason.into() }
    }

    pub fn code(&self) -> Code {
        match self {
            Error::Validation { code, .. }
            | Error::Resource { code, .. }
            | Error::Transient { code, .. }
            | Error::Permanent { code, .. }
            | Error::Consistency { code, .. } => *code,
        }
    }

    /// Whether this error's recovery path is "flush the journal and retry
    /// the operation exactly once" (§4.2, §4.6 step 6).
    pub fn is_journal_busy(&self) -> bool {
        matches!(self, Error::Resource { code: Code::Busy, .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, code, reason) = match self {
            Error::Validation { code, reason } => ("validation", code, reason),
            Error::Resource { code, reason } => ("resource", code, reason),
            Error::Transient { code, reason } => ("transient", code, reason),
            Error::Permanent { code, reason } => ("permanent", code, reason),
            Error::Consistency { code, reason } => ("consistency", code, reason),
        };
        write!(f, "{kind} error ({code}): {reason}")
    }
}

impl std::error::Error for Error {}

impl From<authority_zonestore::JournalError> for Error {
    fn from(err: authority_zonestore::JournalError) -> Self {
        match err {
            authority_zonestore::JournalError::Busy => {
                Error::resource(Code::Busy, err.to_string())
            }
            authority_zonestore::JournalError::TransactionInProgress
            | authority_zonestore::JournalError::NoTransaction => {
                Error::consistency(Code::Inval, err.to_string())
            }
        }
    }
}

impl From<authority_zonestore::ChangesetError> for Error {
    fn from(err: authority_zonestore::ChangesetError) -> Self {
        use authority_zonestore::ChangesetError;
        match err {
            ChangesetError::NoDiff => Error::validation(Code::Nodiff, err.to_string()),
            ChangesetError::Range => Error::validation(Code::Range, err.to_string()),
            ChangesetError::ChainMismatch => Error::consistency(Code::Inval, err.to_string()),
            ChangesetError::Malformed(_) => Error::validation(Code::Malf, err.to_string()),
        }
    }
}

impl From<authority_zonestore::DumpError> for Error {
    fn from(err: authority_zonestore::DumpError) -> Self {
        Error::permanent(Code::Enoent, err.to_string())
    }
}

/// The error returned from `main`, printed to stderr before the process
/// exits with a non-zero status.
#[derive(Clone, Debug)]
pub struct ExitError(pub String);

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ExitError {}

impl From<Error> for ExitError {
    fn from(err: Error) -> Self {
        ExitError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_busy_is_recognized() {
        let err = Error::resource(Code::Busy, "journal full");
        assert!(err.is_journal_busy());
        assert!(!Error::transient(Code::Econn, "peer down").is_journal_busy());
    }

    #[test]
    fn code_round_trips_through_display() {
        assert_eq!(Code::TsigBadsig.to_string(), "TSIG_BADSIG");
    }
}
