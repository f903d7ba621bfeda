//! Route building and bucket keys
//!
//! Every request is addressed by a concrete path plus a bucket route.
//! The bucket route collapses interchangeable ids to `:id` so that all
//! paths sharing a server-side rate limit map to one handler key, while
//! ids under a major container (`channels`, `guilds`, `webhooks`) stay
//! distinct. Reaction endpoints share one bucket regardless of emoji or
//! user, so the bucket route freezes at the `reactions` segment.

/// Containers whose child id stays in the bucket route
const MAJOR_CONTAINERS: [&str; 3] = ["channels", "guilds", "webhooks"];

/// Placeholder for interchangeable ids
const ID_PLACEHOLDER: &str = ":id";

/// An id-like segment: 16 to 19 ASCII digits
fn is_id_segment(segment: &str) -> bool {
    (16..=19).contains(&segment.len()) && segment.bytes().all(|b| b.is_ascii_digit())
}

/// A request path paired with its rate-limit bucket route
///
/// Built fluently, one immutable node per segment:
///
/// ```
/// use chat_client_rest::Route;
///
/// let route = Route::new()
///     .segment("channels")
///     .segment("111111111111111111")
///     .segment("messages")
///     .segment("222222222222222222");
/// assert_eq!(route.path(), "/channels/111111111111111111/messages/222222222222222222");
/// assert_eq!(route.bucket(), "/channels/111111111111111111/messages/:id");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    path: String,
    bucket: String,
    /// Raw previous segment, for the major-container rule
    previous: Option<String>,
    /// Set once a `reactions` segment froze the bucket route
    frozen: bool,
}

impl Route {
    /// Start an empty route
    #[must_use]
    pub fn new() -> Self {
        Self {
            path: String::new(),
            bucket: String::new(),
            previous: None,
            frozen: false,
        }
    }

    /// Build a route from a pre-joined path
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        path.split('/')
            .filter(|s| !s.is_empty())
            .fold(Self::new(), |route, segment| route.segment(segment))
    }

    /// Append one path segment, extending the bucket route unless frozen
    #[must_use]
    pub fn segment(mut self, segment: &str) -> Self {
        self.path.push('/');
        self.path.push_str(segment);

        if !self.frozen {
            let preceding_major = self
                .previous
                .as_deref()
                .is_some_and(|p| MAJOR_CONTAINERS.contains(&p));

            self.bucket.push('/');
            if is_id_segment(segment) && !preceding_major {
                self.bucket.push_str(ID_PLACEHOLDER);
            } else {
                self.bucket.push_str(segment);
            }

            if segment == "reactions" {
                self.frozen = true;
            }
        }

        self.previous = Some(segment.to_string());
        self
    }

    /// The concrete request path
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The bucket route shared by interchangeable paths
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Pre-discovery handler key for this route under the given method
    #[must_use]
    pub fn handler_key(&self, method: &reqwest::Method) -> String {
        format!("{}:{}", method.as_str(), self.bucket)
    }

    /// Whether the path touches a reactions endpoint (these get an extra
    /// reset pad in the coordinator)
    #[must_use]
    pub fn has_reactions(&self) -> bool {
        self.frozen
    }

    /// The distinguishing major-container id, or "global" for routes
    /// outside any major container
    ///
    /// Two routes sharing a server bucket hash but addressing different
    /// major containers must not share a handler queue.
    #[must_use]
    pub fn major_parameter(&self) -> &str {
        let mut segments = self.bucket.split('/').filter(|s| !s.is_empty());
        match segments.next() {
            Some(container) if MAJOR_CONTAINERS.contains(&container) => {
                segments.next().unwrap_or("global")
            }
            _ => "global",
        }
    }
}

impl Default for Route {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_segment_detection() {
        assert!(is_id_segment("1234567890123456")); // 16
        assert!(is_id_segment("1234567890123456789")); // 19
        assert!(!is_id_segment("123456789012345")); // 15
        assert!(!is_id_segment("12345678901234567890")); // 20
        assert!(!is_id_segment("12345678901234567a"));
        assert!(!is_id_segment("@me"));
    }

    #[test]
    fn test_major_container_preserves_id() {
        let route = Route::from_path("/channels/111111111111111111");
        assert_eq!(route.bucket(), "/channels/111111111111111111");

        let route = Route::from_path("/guilds/111111111111111111/members");
        assert_eq!(route.bucket(), "/guilds/111111111111111111/members");

        let route = Route::from_path("/webhooks/111111111111111111/some-token");
        assert_eq!(route.bucket(), "/webhooks/111111111111111111/some-token");
    }

    #[test]
    fn test_minor_ids_collapse() {
        let a = Route::from_path("/channels/111111111111111111/messages/222222222222222222");
        let b = Route::from_path("/channels/111111111111111111/messages/333333333333333333");
        assert_eq!(a.bucket(), b.bucket());
        assert_eq!(a.bucket(), "/channels/111111111111111111/messages/:id");
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_reactions_freeze() {
        let route = Route::new()
            .segment("channels")
            .segment("111111111111111111")
            .segment("messages")
            .segment("222222222222222222")
            .segment("reactions")
            .segment("%F0%9F%98%80")
            .segment("@me");

        assert_eq!(
            route.path(),
            "/channels/111111111111111111/messages/222222222222222222/reactions/%F0%9F%98%80/@me"
        );
        assert_eq!(
            route.bucket(),
            "/channels/111111111111111111/messages/:id/reactions"
        );
        assert!(route.has_reactions());
    }

    #[test]
    fn test_reaction_buckets_identical_across_emoji_and_user() {
        let a = Route::from_path(
            "/channels/111111111111111111/messages/222222222222222222/reactions/%F0%9F%98%80/@me",
        );
        let b = Route::from_path(
            "/channels/111111111111111111/messages/999999999999999999/reactions/other/444444444444444444",
        );
        assert_eq!(a.bucket(), b.bucket());
    }

    #[test]
    fn test_handler_key_includes_method() {
        let route = Route::from_path("/channels/111111111111111111/messages");
        assert_eq!(
            route.handler_key(&reqwest::Method::GET),
            "GET:/channels/111111111111111111/messages"
        );
        assert_ne!(
            route.handler_key(&reqwest::Method::GET),
            route.handler_key(&reqwest::Method::POST)
        );
    }

    #[test]
    fn test_major_parameter() {
        let channel = Route::from_path("/channels/111111111111111111/messages");
        assert_eq!(channel.major_parameter(), "111111111111111111");

        let me = Route::from_path("/users/@me");
        assert_eq!(me.major_parameter(), "global");

        let bare = Route::from_path("/gateway");
        assert_eq!(bare.major_parameter(), "global");
    }

    #[test]
    fn test_from_path_ignores_duplicate_slashes() {
        let route = Route::from_path("//users//@me");
        assert_eq!(route.path(), "/users/@me");
        assert_eq!(route.bucket(), "/users/@me");
    }
}
