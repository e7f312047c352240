//! Upstream Router (component C): selects a destination for an inbound request and gates it
//! against a path allow-list.

// self
use crate::_prelude::*;

/// Header clients set to pick a specific configured upstream by name.
pub const TARGET_UPSTREAM_HEADER: &str = "x-target-upstream";

/// Immutable configuration record for a single backend target.
#[derive(Clone, Debug)]
pub struct UpstreamDescriptor {
	/// Unique identifier used for routing (`X-Target-Upstream`).
	pub name: String,
	/// Absolute base URL of the upstream.
	pub url: Url,
	/// Audience string used when minting tokens for this upstream.
	pub audience: String,
	/// Override for the outbound `Host` header; falls back to `url`'s host when absent.
	pub host: Option<String>,
	/// Per-request timeout, in seconds.
	pub timeout_secs: u64,
}

/// One entry of a path allow-list.
#[derive(Clone, Debug, PartialEq, Eq)]
enum PathPattern {
	/// Matches only the exact path.
	Exact(String),
	/// Matches the prefix itself, or anything nested beneath it. Covers both the `/*` and
	/// `/**` spellings, which are treated as syntactic equivalents.
	Wildcard(String),
}
impl PathPattern {
	fn parse(raw: &str) -> Self {
		if let Some(prefix) = raw.strip_suffix("/**") {
			Self::Wildcard(prefix.to_string())
		} else if let Some(prefix) = raw.strip_suffix("/*") {
			Self::Wildcard(prefix.to_string())
		} else {
			Self::Exact(raw.to_string())
		}
	}

	fn matches(&self, path: &str) -> bool {
		match self {
			Self::Exact(p) => p == path,
			Self::Wildcard(prefix) => {
				path == prefix || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
			},
		}
	}
}

/// Routes inbound requests to a configured upstream, gated by an allow-list of path patterns.
pub struct Router {
	upstreams: HashMap<String, Arc<UpstreamDescriptor>>,
	default: Option<Arc<UpstreamDescriptor>>,
	allowed_paths: Vec<PathPattern>,
}
impl Router {
	/// Builds a router from a list of upstream descriptors (first entry is the default) and an
	/// allow-list of path patterns. An empty allow-list permits every path.
	pub fn new(upstreams: Vec<UpstreamDescriptor>, allowed_paths: Vec<String>) -> Self {
		let mut by_name = HashMap::with_capacity(upstreams.len());
		let mut default = None;

		for descriptor in upstreams {
			let descriptor = Arc::new(descriptor);

			if default.is_none() {
				default = Some(descriptor.clone());
			}

			by_name.insert(descriptor.name.clone(), descriptor);
		}

		Self {
			upstreams: by_name,
			default,
			allowed_paths: allowed_paths.iter().map(|p| PathPattern::parse(p)).collect(),
		}
	}

	/// Returns `true` when `path` is permitted by the allow-list (always `true` when the
	/// allow-list is empty).
	pub fn path_allowed(&self, path: &str) -> bool {
		self.allowed_paths.is_empty() || self.allowed_paths.iter().any(|p| p.matches(path))
	}

	/// Selects the upstream for a request, honoring an explicit `X-Target-Upstream` hint and
	/// falling back to the default (first-configured) upstream.
	///
	/// Returns `None` when the path fails the allow-list gate, or when no upstream is
	/// configured at all.
	pub fn route(&self, path: &str, target_hint: Option<&str>) -> Option<Arc<UpstreamDescriptor>> {
		if !self.path_allowed(path) {
			return None;
		}

		if let Some(name) = target_hint
			&& let Some(descriptor) = self.upstreams.get(name)
		{
			return Some(descriptor.clone());
		}

		self.default.clone()
	}
}

/// Joins an upstream's base path with an inbound request path using the single-slash rule:
/// collapse a doubled slash at the seam, insert one if neither side has it, otherwise
/// concatenate verbatim.
pub fn join_path(base: &str, tail: &str) -> String {
	match (base.ends_with('/'), tail.starts_with('/')) {
		(true, true) => format!("{base}{}", &tail[1..]),
		(false, false) => format!("{base}/{tail}"),
		_ => format!("{base}{tail}"),
	}
}
