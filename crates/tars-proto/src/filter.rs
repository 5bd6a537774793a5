use std::{borrow, error, fmt, ops};

const LEVEL_SEPARATOR: char = '/';
const SINGLE_LEVEL_WILDCARD: char = '+';
const SINGLE_LEVEL_WILDCARD_STR: &str = "+";
const MULTI_LEVEL_WILDCARD: char = '#';
const MULTI_LEVEL_WILDCARD_STR: &str = "#";
const WILDCARDS: [char; 2] = [SINGLE_LEVEL_WILDCARD, MULTI_LEVEL_WILDCARD];

/// An MQTT topic filter, e.g. `wake/+` or `llm/tool.call.request/#`.
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Filter(str);

/// An owned [`Filter`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterBuf(String);

/// How specifically a [`Filter`] matched a concrete topic. Used to pick the
/// most specific of several overlapping subscriptions for a given topic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Match {
	pub exact: usize,
	pub wildcard: usize,
	pub multi_wildcard: usize,
}

impl Match {
	pub fn score(&self) -> usize {
		self.exact * 100 + self.wildcard * 10 + self.multi_wildcard
	}
}

impl PartialOrd for Match {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Match {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.score().cmp(&other.score())
	}
}

#[derive(Debug)]
pub struct FilterError {
	pub kind: ErrorKind,
	pub message: &'static str,
}

#[derive(Debug)]
pub enum ErrorKind {
	Length,
	InvalidWildcard,
	WildcardPosition,
}

impl FilterError {
	fn new(kind: ErrorKind, message: &'static str) -> Self {
		Self { kind, message }
	}
}

impl fmt::Display for FilterError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "invalid mqtt filter: {:?}, {}", self.kind, self.message)
	}
}

impl error::Error for FilterError {}

impl Filter {
	pub fn new<S: AsRef<str> + ?Sized>(filter: &S) -> Result<&Filter, FilterError> {
		let filter = filter.as_ref();

		if filter.is_empty() {
			return Err(FilterError::new(
				ErrorKind::Length,
				"filter must not be empty",
			));
		}

		if filter.len() > u16::MAX as usize {
			return Err(FilterError::new(ErrorKind::Length, "filter is too long"));
		}

		let mut multi_wildcard_position = None;
		let mut total_levels = 0;
		for (position, level) in filter.split(LEVEL_SEPARATOR).enumerate() {
			total_levels = position;

			if level.chars().any(|c| WILDCARDS.contains(&c)) && level.len() > 1 {
				return Err(FilterError::new(
					ErrorKind::InvalidWildcard,
					"wildcards '+' and '#' must occupy the whole filter level",
				));
			}

			if level.contains(MULTI_LEVEL_WILDCARD) && multi_wildcard_position.replace(position).is_some() {
				return Err(FilterError::new(
					ErrorKind::WildcardPosition,
					"multi-level wildcard '#' can only appear once",
				));
			}
		}

		if let Some(position) = multi_wildcard_position {
			if position != total_levels {
				return Err(FilterError::new(
					ErrorKind::WildcardPosition,
					"multi-level wildcard '#' can only occupy the last level of the filter",
				));
			}
		}

		Ok(unsafe { &*(filter as *const str as *const Filter) })
	}

	fn from_str(s: &str) -> &Self {
		unsafe { &*(s as *const str as *const Filter) }
	}

	/// Checks `topic` to determine if it would be matched by the `Filter`.
	///
	/// Returns `None` if the topic does not match; otherwise a [`Match`]
	/// describing the specificity of the match.
	pub fn matches_topic(&self, topic: &str) -> Option<Match> {
		let filter_levels = self.as_str().split(LEVEL_SEPARATOR);
		let mut topic_levels = topic.split(LEVEL_SEPARATOR);

		let mut result = Match::default();

		for filter_level in filter_levels {
			match filter_level {
				MULTI_LEVEL_WILDCARD_STR => {
					result.multi_wildcard = topic_levels.by_ref().count();
					break;
				}
				SINGLE_LEVEL_WILDCARD_STR => {
					topic_levels.next()?;
					result.wildcard += 1;
				}
				exact_match => {
					if !topic_levels.next().map_or(false, |t| t == exact_match) {
						return None;
					}
					result.exact += 1;
				}
			}
		}

		(topic_levels.count() == 0).then_some(result)
	}

	#[inline]
	pub fn len(&self) -> usize {
		let Self(inner) = self;
		inner.len()
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		let Self(inner) = self;
		inner.is_empty()
	}

	#[inline]
	pub fn as_str(&self) -> &str {
		let Self(inner) = self;
		inner
	}

	#[inline]
	pub fn to_filter_buf(&self) -> FilterBuf {
		FilterBuf::from(self)
	}
}

impl Filter {
	#[inline]
	pub const fn from_static(filter: &'static str) -> &'static Filter {
		unsafe { &*(filter as *const str as *const Filter) }
	}
}

impl AsRef<str> for Filter {
	#[inline]
	fn as_ref(&self) -> &str {
		let Self(inner) = self;
		inner
	}
}

impl AsRef<Filter> for Filter {
	#[inline]
	fn as_ref(&self) -> &Filter {
		self
	}
}

impl fmt::Display for Filter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FilterBuf {
	#[inline]
	pub fn new(filter: impl Into<String>) -> Result<Self, FilterError> {
		let filter = filter.into();
		Filter::new(&filter)?;
		Ok(Self(filter))
	}

	pub fn matches_topic(&self, topic: &str) -> Option<Match> {
		Filter::matches_topic(self, topic)
	}

	#[inline]
	pub fn as_str(&self) -> &str {
		let Self(inner) = self;
		inner
	}

	#[inline]
	pub fn len(&self) -> usize {
		let Self(inner) = self;
		inner.len()
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		let Self(inner) = self;
		inner.is_empty()
	}
}

impl fmt::Display for FilterBuf {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl ops::Deref for FilterBuf {
	type Target = Filter;
	fn deref(&self) -> &Self::Target {
		let Self(inner) = self;
		Filter::from_str(inner)
	}
}

impl borrow::Borrow<Filter> for FilterBuf {
	#[inline]
	fn borrow(&self) -> &Filter {
		use ops::Deref;
		self.deref()
	}
}

impl From<&Filter> for FilterBuf {
	#[inline]
	fn from(value: &Filter) -> Self {
		let Filter(inner) = value;
		Self(String::from(inner))
	}
}

impl AsRef<Filter> for FilterBuf {
	#[inline]
	fn as_ref(&self) -> &Filter {
		Filter::from_str(self.as_str())
	}
}

impl ToOwned for Filter {
	type Owned = FilterBuf;
	#[inline]
	fn to_owned(&self) -> Self::Owned {
		self.to_filter_buf()
	}
}

impl std::str::FromStr for FilterBuf {
	type Err = FilterError;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		FilterBuf::new(s)
	}
}

#[cfg(test)]
mod tests {
	use super::{Filter, Match};

	#[test]
	fn parses_filters() {
		for filter in [
			"a", "+", "#", "/", "a/", "/b", "a/b", "+/b", "a/+", "+/+", "+/#", "/#", "a/b/c/#",
			"stt/final", "wake/+", "llm/tool.call.request/#",
		] {
			Filter::new(filter).unwrap();
		}

		for filter in ["a/b+", "a/+b", "a/b#", "a/#b", "a/#/c", "#/"] {
			assert!(Filter::new(filter).is_err());
		}
	}

	#[test]
	fn matches_topics() {
		let filter = Filter::from_static("a/b/#");
		assert_eq!(filter.matches_topic("/b"), None);
		assert_eq!(
			filter.matches_topic("a/b"),
			Some(Match {
				exact: 2,
				wildcard: 0,
				multi_wildcard: 0
			})
		);
		assert_eq!(
			filter.matches_topic("a/b/c"),
			Some(Match {
				exact: 2,
				wildcard: 0,
				multi_wildcard: 1
			})
		);
		assert_eq!(
			filter.matches_topic("a/b/c/d"),
			Some(Match {
				exact: 2,
				wildcard: 0,
				multi_wildcard: 2
			})
		);

		let filter = Filter::from_static("+/+/c/#");
		assert_eq!(filter.matches_topic("/b"), None);
		assert_eq!(filter.matches_topic("a/b/c"), None);
		assert_eq!(filter.matches_topic("a/b/cd/e"), None);
		assert_eq!(
			filter.matches_topic("//c//"),
			Some(Match {
				exact: 1,
				wildcard: 2,
				multi_wildcard: 2
			})
		);
	}

	/// The `a/#`/`a/b`/`a/b/c` and `a/+/c` cases spec.md names explicitly.
	#[test]
	fn matches_named_wildcard_invariants() {
		let filter = Filter::from_static("a/#");
		assert_eq!(
			filter.matches_topic("a"),
			Some(Match {
				exact: 1,
				wildcard: 0,
				multi_wildcard: 0
			})
		);
		assert_eq!(
			filter.matches_topic("a/b"),
			Some(Match {
				exact: 1,
				wildcard: 0,
				multi_wildcard: 1
			})
		);
		assert_eq!(
			filter.matches_topic("a/b/c"),
			Some(Match {
				exact: 1,
				wildcard: 0,
				multi_wildcard: 2
			})
		);
		assert_eq!(filter.matches_topic("b"), None);

		let filter = Filter::from_static("a/+/c");
		assert_eq!(
			filter.matches_topic("a/b/c"),
			Some(Match {
				exact: 2,
				wildcard: 1,
				multi_wildcard: 0
			})
		);
		assert_eq!(filter.matches_topic("a/b/c/d"), None);
		assert_eq!(filter.matches_topic("a/c"), None);
	}

	#[test]
	fn picks_most_specific_subscription() {
		let exact = Filter::from_static("system/health/wake").matches_topic("system/health/wake");
		let wildcard = Filter::from_static("system/health/+").matches_topic("system/health/wake");
		let multi = Filter::from_static("system/health/#").matches_topic("system/health/wake");

		assert!(exact.unwrap().score() > wildcard.clone().unwrap().score());
		assert!(wildcard.unwrap().score() > multi.unwrap().score());
	}
}
