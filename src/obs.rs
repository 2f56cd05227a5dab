//! Optional observability hooks.
//!
//! # Feature Flags
//!
//! - `tracing` wraps every source-token fetch, exchange, and refresh in a `cab_downscope.op` span
//!   carrying `op` and `stage` fields, and logs failures with their retry classification.
//! - `metrics` increments `cab_downscope_op_total`, labeled by `op` and `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
	/// Source credential producing a bearer token.
	SourceToken,
	/// One RFC 8693 exchange round trip.
	Exchange,
	/// Downscoped credential refresh (source token plus exchange with retries).
	Refresh,
}
impl OpKind {
	/// Stable label for span fields and metric labels.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpKind::SourceToken => "source_token",
			OpKind::Exchange => "exchange",
			OpKind::Refresh => "refresh",
		}
	}
}
impl Display for OpKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded per operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Operation started.
	Attempt,
	/// Served from cache without network traffic.
	CacheHit,
	/// Completed successfully.
	Success,
	/// Failed; a later attempt may succeed.
	Failure,
	/// Failed permanently.
	Rejected,
}
impl OpOutcome {
	/// Stable label for span fields and metric labels.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::CacheHit => "cache_hit",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
			OpOutcome::Rejected => "rejected",
		}
	}

	/// Picks [`OpOutcome::Failure`] or [`OpOutcome::Rejected`] from a retry classification.
	pub const fn from_retryable(retryable: bool) -> Self {
		if retryable { OpOutcome::Failure } else { OpOutcome::Rejected }
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
