// self
use crate::{_prelude::*, obs::OpKind};

/// Instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedOp<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedOp<F> = F;

/// Span wrapper used around every observed operation.
#[derive(Clone, Debug)]
pub struct OpSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl OpSpan {
	/// Creates a `cab_downscope.op` span for `kind` at call site `stage`.
	pub fn new(kind: OpKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			Self { span: tracing::info_span!("cab_downscope.op", op = kind.as_str(), stage) }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Instruments `fut` without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedOp<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Logs a failed attempt: transient failures at `warn`, permanent ones at `error`.
pub(crate) fn log_failure(kind: OpKind, attempt: u32, retryable: bool, error: &dyn StdError) {
	#[cfg(feature = "tracing")]
	{
		let op = kind.as_str();
		let outcome = crate::obs::OpOutcome::from_retryable(retryable).as_str();

		if retryable {
			tracing::warn!(op, outcome, attempt, retryable, %error, "Operation failed.");
		} else {
			tracing::error!(op, outcome, attempt, retryable, %error, "Operation failed.");
		}
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (kind, attempt, retryable, error);
	}
}

/// Logs a successful operation at `debug`, including the boundary fingerprint when known.
pub(crate) fn log_success(kind: OpKind, fingerprint: Option<&str>) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(op = kind.as_str(), fingerprint, "Operation succeeded.");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (kind, fingerprint);
	}
}
