//! Bounded exponential backoff with full jitter.

// crates.io
use rand::Rng;
// self
use crate::{_prelude::*, error::ConfigError};

/// Retry schedule applied to transient exchange failures.
///
/// Before retry `n` (1-based) the client sleeps a uniformly random duration in
/// `0 ..= min(max_delay, base_delay * 2^(n - 1))`, raised to any Retry-After hint and then
/// capped at `max_delay`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RetryPolicyConfig", into = "RetryPolicyConfig")]
pub struct RetryPolicy {
	max_attempts: u32,
	base_delay: Duration,
	max_delay: Duration,
}
impl RetryPolicy {
	/// Three attempts in total.
	pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
	/// Ceiling of the first backoff window.
	pub const DEFAULT_BASE_DELAY: Duration = Duration::milliseconds(500);
	/// Upper bound of any single backoff.
	pub const DEFAULT_MAX_DELAY: Duration = Duration::seconds(8);
	const MAX_SHIFT: u32 = 30;

	/// Validates and builds a policy.
	pub fn new(
		max_attempts: u32,
		base_delay: Duration,
		max_delay: Duration,
	) -> Result<Self, ConfigError> {
		if max_attempts == 0 {
			return Err(ConfigError::InvalidRetryPolicy {
				reason: "max_attempts must be at least 1",
			});
		}
		if base_delay.is_negative() || max_delay.is_negative() {
			return Err(ConfigError::InvalidRetryPolicy { reason: "delays must not be negative" });
		}
		if max_delay < base_delay {
			return Err(ConfigError::InvalidRetryPolicy {
				reason: "max_delay must not be shorter than base_delay",
			});
		}

		Ok(Self { max_attempts, base_delay, max_delay })
	}

	/// Policy that retries `max_attempts` times without sleeping. Useful against local mocks.
	pub fn immediate(max_attempts: u32) -> Self {
		Self {
			max_attempts: max_attempts.max(1),
			base_delay: Duration::ZERO,
			max_delay: Duration::ZERO,
		}
	}

	/// Single attempt, no retries.
	pub fn no_retry() -> Self {
		Self::immediate(1)
	}

	/// Total attempts, including the first.
	pub fn max_attempts(&self) -> u32 {
		self.max_attempts
	}

	/// Ceiling of the first backoff window.
	pub fn base_delay(&self) -> Duration {
		self.base_delay
	}

	/// Upper bound of any single backoff.
	pub fn max_delay(&self) -> Duration {
		self.max_delay
	}

	/// Upper bound of the jitter window before retry `retry` (1-based).
	pub fn backoff_ceiling(&self, retry: u32) -> Duration {
		let shift = retry.saturating_sub(1).min(Self::MAX_SHIFT);

		self.base_delay.checked_mul(1 << shift).unwrap_or(self.max_delay).min(self.max_delay)
	}

	/// Sleep duration before retry `retry` (1-based), honoring an upstream Retry-After hint.
	pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
		let ceiling_ms =
			u64::try_from(self.backoff_ceiling(retry).whole_milliseconds()).unwrap_or(0);
		let jitter_ms = if ceiling_ms == 0 { 0 } else { rand::rng().random_range(0..=ceiling_ms) };
		let jitter = Duration::milliseconds(i64::try_from(jitter_ms).unwrap_or(i64::MAX));

		jitter.max(retry_after.unwrap_or(Duration::ZERO)).min(self.max_delay)
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
			base_delay: Self::DEFAULT_BASE_DELAY,
			max_delay: Self::DEFAULT_MAX_DELAY,
		}
	}
}
impl TryFrom<RetryPolicyConfig> for RetryPolicy {
	type Error = ConfigError;

	fn try_from(config: RetryPolicyConfig) -> Result<Self, Self::Error> {
		Self::new(
			config.max_attempts,
			Duration::milliseconds(config.base_delay_ms),
			Duration::milliseconds(config.max_delay_ms),
		)
	}
}

/// Serialized form of [`RetryPolicy`], with delays in milliseconds.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
struct RetryPolicyConfig {
	max_attempts: u32,
	base_delay_ms: i64,
	max_delay_ms: i64,
}
impl Default for RetryPolicyConfig {
	fn default() -> Self {
		RetryPolicy::default().into()
	}
}
impl From<RetryPolicy> for RetryPolicyConfig {
	fn from(policy: RetryPolicy) -> Self {
		Self {
			max_attempts: policy.max_attempts,
			base_delay_ms: clamp_ms(policy.base_delay),
			max_delay_ms: clamp_ms(policy.max_delay),
		}
	}
}

fn clamp_ms(duration: Duration) -> i64 {
	i64::try_from(duration.whole_milliseconds()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn ceiling_doubles_until_the_cap() {
		let policy = RetryPolicy::default();

		assert_eq!(policy.backoff_ceiling(1), Duration::milliseconds(500));
		assert_eq!(policy.backoff_ceiling(2), Duration::seconds(1));
		assert_eq!(policy.backoff_ceiling(4), Duration::seconds(4));
		assert_eq!(policy.backoff_ceiling(5), Duration::seconds(8));
		assert_eq!(policy.backoff_ceiling(u32::MAX), Duration::seconds(8));
	}

	#[test]
	fn jitter_stays_inside_the_window() {
		let policy = RetryPolicy::default();

		for retry in 1..=6 {
			for _ in 0..50 {
				let delay = policy.delay_for(retry, None);

				assert!(!delay.is_negative());
				assert!(delay <= policy.backoff_ceiling(retry));
			}
		}
	}

	#[test]
	fn retry_after_raises_the_delay_but_never_past_the_cap() {
		let policy = RetryPolicy::default();

		assert_eq!(policy.delay_for(1, Some(Duration::seconds(5))), Duration::seconds(5));
		assert_eq!(policy.delay_for(1, Some(Duration::minutes(5))), Duration::seconds(8));
		assert_eq!(
			RetryPolicy::immediate(3).delay_for(2, Some(Duration::seconds(5))),
			Duration::ZERO
		);
	}

	#[test]
	fn invalid_policies_are_rejected() {
		assert!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).is_err());
		assert!(RetryPolicy::new(3, Duration::seconds(2), Duration::seconds(1)).is_err());
		assert!(RetryPolicy::new(3, Duration::seconds(-1), Duration::seconds(1)).is_err());
		assert!(serde_json::from_str::<RetryPolicy>("{\"max_attempts\":0}").is_err());
	}

	#[test]
	fn config_uses_milliseconds_and_defaults() {
		let policy: RetryPolicy = serde_json::from_str("{\"max_attempts\":5,\"base_delay_ms\":100}")
			.expect("Partial retry config should deserialize.");

		assert_eq!(policy.max_attempts(), 5);
		assert_eq!(policy.base_delay(), Duration::milliseconds(100));
		assert_eq!(policy.max_delay(), RetryPolicy::DEFAULT_MAX_DELAY);
		assert_eq!(
			serde_json::to_string(&RetryPolicy::default()).expect("Policy should serialize."),
			"{\"max_attempts\":3,\"base_delay_ms\":500,\"max_delay_ms\":8000}"
		);
	}
}
