//! Normalized string sets for boundary permissions and OAuth scopes.
//!
//! Both sets deduplicate and sort their entries so equality and hashing ignore input order.

// std
use std::{collections::BTreeSet, slice::Iter};
// crates.io
use serde::{Deserializer, Serializer, de::Error as DeError, ser::SerializeSeq};
// self
use crate::_prelude::*;

macro_rules! def_set {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
		pub struct $name(Arc<[String]>);
		impl $name {
			/// Creates a normalized set from any iterator.
			pub fn new<I, S>(values: I) -> Result<Self, SetValidationError>
			where
				I: IntoIterator<Item = S>,
				S: Into<String>,
			{
				Ok(Self(normalize($kind, values)?))
			}

			/// Number of distinct entries.
			pub fn len(&self) -> usize {
				self.0.len()
			}

			/// Returns true if no entries are defined.
			pub fn is_empty(&self) -> bool {
				self.0.is_empty()
			}

			/// Returns true if the normalized set contains the provided entry.
			pub fn contains(&self, value: &str) -> bool {
				self.0.binary_search_by(|candidate| candidate.as_str().cmp(value)).is_ok()
			}

			/// Iterator over normalized entries.
			pub fn iter(&self) -> SetIter<'_> {
				SetIter { inner: self.0.iter() }
			}

			/// Returns the underlying sorted slice.
			pub fn as_slice(&self) -> &[String] {
				&self.0
			}

			/// Space-delimited representation.
			pub fn normalized(&self) -> String {
				self.0.join(" ")
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.debug_tuple(stringify!($name)).field(&self.0).finish()
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.normalized())
			}
		}
		impl<'a> IntoIterator for &'a $name {
			type IntoIter = SetIter<'a>;
			type Item = &'a str;

			fn into_iter(self) -> Self::IntoIter {
				self.iter()
			}
		}
		impl TryFrom<Vec<String>> for $name {
			type Error = SetValidationError;

			fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
				Self::new(value)
			}
		}
		impl Serialize for $name {
			fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
			where
				S: Serializer,
			{
				let mut seq = serializer.serialize_seq(Some(self.0.len()))?;

				for value in self.0.iter() {
					seq.serialize_element(value)?;
				}

				seq.end()
			}
		}
		impl<'de> Deserialize<'de> for $name {
			fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
			where
				D: Deserializer<'de>,
			{
				let values = <Vec<String>>::deserialize(deserializer)?;

				Self::new(values).map_err(DeError::custom)
			}
		}
	};
}

/// Errors emitted when validating set entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum SetValidationError {
	/// Empty entries are not allowed.
	#[error("{kind} entries cannot be empty.")]
	Empty {
		/// Kind of set (permission, scope).
		kind: &'static str,
	},
	/// Entries cannot contain embedded whitespace characters.
	#[error("{kind} entry contains whitespace: {value}.")]
	ContainsWhitespace {
		/// Kind of set (permission, scope).
		kind: &'static str,
		/// The offending entry.
		value: String,
	},
}

def_set! {
	PermissionSet,
	"Normalized set of permission identifiers granted by a boundary rule.",
	"Permission"
}
def_set! { ScopeSet, "Normalized set of OAuth scopes requested by a source credential.", "Scope" }

impl FromStr for ScopeSet {
	type Err = SetValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.is_empty() {
			return Ok(Self::default());
		}
		if s.chars().all(char::is_whitespace) {
			return Err(SetValidationError::Empty { kind: "Scope" });
		}

		Self::new(s.split_whitespace())
	}
}

/// Iterator over set entries.
pub struct SetIter<'a> {
	inner: Iter<'a, String>,
}
impl<'a> Iterator for SetIter<'a> {
	type Item = &'a str;

	fn next(&mut self) -> Option<Self::Item> {
		self.inner.next().map(|s| s.as_str())
	}
}

fn normalize<I, S>(kind: &'static str, values: I) -> Result<Arc<[String]>, SetValidationError>
where
	I: IntoIterator<Item = S>,
	S: Into<String>,
{
	let mut set = BTreeSet::new();

	for value in values {
		let owned: String = value.into();

		if owned.is_empty() {
			return Err(SetValidationError::Empty { kind });
		}
		if owned.chars().any(char::is_whitespace) {
			return Err(SetValidationError::ContainsWhitespace { kind, value: owned });
		}

		set.insert(owned);
	}

	Ok(Arc::from(set.into_iter().collect::<Vec<_>>()))
}
