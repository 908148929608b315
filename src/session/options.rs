use cookie::time::{Duration, OffsetDateTime};
use cookie::{Cookie, SameSite};

/// Default cookie lifetime: 30 days.
pub const DEFAULT_COOKIE_MAX_AGE: i64 = 86400 * 30;

/// Per-session cookie directives.
///
/// `max_age` drives both the cookie and the record TTL:
///
/// * `> 0`: persist for that many seconds.
/// * `0`: persist with the store's default TTL, emit a browser-session cookie.
/// * `< 0`: delete the record and expire the cookie on save.
///
/// # Example
///
/// ```rust
/// use redistore::SessionOptions;
/// use redistore::cookie::SameSite;
///
/// let options = SessionOptions::build()
///     .path("/app")
///     .http_only(true)
///     .same_site(SameSite::Lax)
///     .secure(true)
///     .max_age(60 * 60);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    pub path: String,
    pub domain: Option<String>,
    pub max_age: i64,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
    pub partitioned: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            path: "/".to_owned(),
            domain: None,
            max_age: DEFAULT_COOKIE_MAX_AGE,
            secure: false,
            http_only: false,
            same_site: None,
            partitioned: false,
        }
    }
}

impl SessionOptions {
    /// Creates a new `SessionOptions` with default values.
    pub fn build() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Sets the max-age in seconds.
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = seconds;
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    pub fn partitioned(mut self, partitioned: bool) -> Self {
        self.partitioned = partitioned;
        self
    }

    /// Builds the `Set-Cookie` for `name` carrying `value`.
    pub(crate) fn to_cookie(&self, name: &str, value: String) -> Cookie<'static> {
        let mut builder = Cookie::build((name.to_owned(), value))
            .path(self.path.clone())
            .secure(self.secure)
            .http_only(self.http_only)
            .partitioned(self.partitioned);

        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }

        if let Some(same_site) = self.same_site {
            builder = builder.same_site(same_site);
        }

        if self.max_age > 0 {
            let max_age = Duration::seconds(self.max_age);
            builder = builder.max_age(max_age);
            // past the calendar's range only Max-Age is sent
            if let Some(expires) = OffsetDateTime::now_utc().checked_add(max_age) {
                builder = builder.expires(expires);
            }
        } else if self.max_age < 0 {
            builder = builder
                .max_age(Duration::seconds(-1))
                .expires(OffsetDateTime::UNIX_EPOCH);
        }

        builder.build()
    }

    /// Builds an empty cookie for `name` that tells the client to drop it.
    pub(crate) fn to_expired_cookie(&self, name: &str) -> Cookie<'static> {
        let mut options = self.clone();
        options.max_age = -1;
        options.to_cookie(name, String::new())
    }
}
