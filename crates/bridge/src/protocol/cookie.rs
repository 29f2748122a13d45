//! Cookie values crossing the bridge.
//!
//! The transport accepts exactly one cookie per name, in both directions. Several
//! cookies sharing a name are collapsed so that the last one written wins; this loses
//! the earlier values, and the transport has no way to carry them anyway.

use std::time::Duration;

/// A cookie the application wants to send, copied 1:1 into the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseCookie {
    name: String,
    value: String,
    domain: Option<String>,
    path: Option<String>,
    max_age: Option<Duration>,
    http_only: bool,
    secure: bool,
}

impl ResponseCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into(), domain: None, path: None, max_age: None, http_only: false, secure: false }
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    #[must_use]
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    /// Max-age in whole seconds, the unit the transport speaks.
    pub fn max_age_secs(&self) -> Option<u64> {
        self.max_age.map(|age| age.as_secs())
    }

    pub fn is_http_only(&self) -> bool {
        self.http_only
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

/// Outgoing cookies in insertion order, possibly several per name.
#[derive(Debug, Clone, Default)]
pub struct ResponseCookies {
    cookies: Vec<ResponseCookie>,
}

impl ResponseCookies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, cookie: ResponseCookie) {
        self.cookies.push(cookie);
    }

    /// All values recorded under `name`, oldest first.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ResponseCookie> + 'a {
        self.cookies.iter().filter(move |cookie| cookie.name == name)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// One cookie per name, keeping the position of the first occurrence and the value of the last.
    pub fn to_single_values(&self) -> Vec<ResponseCookie> {
        let mut collapsed: Vec<ResponseCookie> = Vec::with_capacity(self.cookies.len());
        for cookie in &self.cookies {
            match collapsed.iter_mut().find(|existing| existing.name == cookie.name) {
                Some(existing) => *existing = cookie.clone(),
                None => collapsed.push(cookie.clone()),
            }
        }
        collapsed
    }
}

/// A cookie received with the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCookie {
    name: String,
    value: String,
}

impl RequestCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Incoming cookies grouped by name, each group holding exactly one cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCookies {
    entries: Vec<(String, Vec<RequestCookie>)>,
}

impl RequestCookies {
    /// Groups `cookies` by name; a name seen twice keeps only its last value.
    pub fn collapse<I>(cookies: I) -> Self
    where
        I: IntoIterator<Item = RequestCookie>,
    {
        let mut entries: Vec<(String, Vec<RequestCookie>)> = Vec::new();
        for cookie in cookies {
            match entries.iter_mut().find(|(name, _)| *name == cookie.name) {
                Some((_, values)) => *values = vec![cookie],
                None => entries.push((cookie.name.clone(), vec![cookie])),
            }
        }
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&[RequestCookie]> {
        self.entries.iter().find(|(key, _)| key == name).map(|(_, values)| values.as_slice())
    }

    /// Shortcut for the value of the single cookie stored under `name`.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(<[RequestCookie]>::last).map(RequestCookie::value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[RequestCookie])> {
        self.entries.iter().map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
