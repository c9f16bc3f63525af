//! LWP-format cookie jar.
//!
//! The portal fetcher persists its session cookies in the `#LWP-Cookies-2.0`
//! text format so an interrupted run can resume without logging in again.
//! Only the attributes the crawler needs are kept: name/value, domain, path,
//! secure flag, expiry and version.

use std::fmt::Write as _;
use std::io;
use std::path::Path;

use tracing::info;
use url::Url;

const HEADER: &str = "#LWP-Cookies-2.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LwpCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub expires: Option<String>,
    pub version: u32,
}

impl LwpCookie {
    fn matches(&self, host: &str, path: &str, https: bool) -> bool {
        if self.secure && !https {
            return false;
        }
        let domain_ok = if let Some(suffix) = self.domain.strip_prefix('.') {
            host == suffix || host.ends_with(&self.domain)
        } else {
            host == self.domain
        };
        domain_ok && path.starts_with(&self.path)
    }

    fn serialize(&self) -> String {
        let mut line = format!("Set-Cookie3: {}={}", self.name, self.value);
        let _ = write!(line, "; path=\"{}\"", self.path);
        let _ = write!(line, "; domain=\"{}\"", self.domain);
        if self.secure {
            line.push_str("; secure");
        }
        if let Some(expires) = &self.expires {
            let _ = write!(line, "; expires=\"{expires}\"");
        }
        let _ = write!(line, "; version={}", self.version);
        line
    }

    fn parse(line: &str) -> Option<LwpCookie> {
        let rest = line.strip_prefix("Set-Cookie3:")?.trim();
        let mut parts = rest.split(';').map(str::trim);

        let (name, value) = parts.next()?.split_once('=')?;
        let mut cookie = LwpCookie {
            name: name.to_string(),
            value: value.trim_matches('"').to_string(),
            domain: String::new(),
            path: "/".to_string(),
            secure: false,
            expires: None,
            version: 0,
        };
        for part in parts {
            match part.split_once('=') {
                Some((key, raw)) => {
                    let unquoted = raw.trim_matches('"');
                    match key {
                        "domain" => cookie.domain = unquoted.to_string(),
                        "path" => cookie.path = unquoted.to_string(),
                        "expires" => cookie.expires = Some(unquoted.to_string()),
                        "version" => cookie.version = unquoted.parse().unwrap_or(0),
                        _ => {}
                    }
                }
                None => {
                    if part == "secure" {
                        cookie.secure = true;
                    }
                }
            }
        }
        Some(cookie)
    }
}

#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Vec<LwpCookie>,
}

impl CookieJar {
    /// Load a jar from disk. A missing file yields an empty jar.
    pub fn load(path: &Path) -> io::Result<CookieJar> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("empty cookie jar created");
                return Ok(CookieJar::default());
            }
            Err(e) => return Err(e),
        };
        let cookies = text.lines().filter_map(LwpCookie::parse).collect();
        info!(path = %path.display(), "cookie jar loaded");
        Ok(CookieJar { cookies })
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let mut text = String::from(HEADER);
        text.push('\n');
        for cookie in &self.cookies {
            text.push_str(&cookie.serialize());
            text.push('\n');
        }
        std::fs::write(path, text)?;
        info!(path = %path.display(), "cookie jar saved");
        Ok(())
    }

    /// The `Cookie` header value for a request to `url`, if any cookie
    /// matches its host and path.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?;
        let https = url.scheme() == "https";
        let header = self
            .cookies
            .iter()
            .filter(|cookie| cookie.matches(host, url.path(), https))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; ");
        (!header.is_empty()).then_some(header)
    }

    /// Absorb a `Set-Cookie` response header for a response from `url`,
    /// replacing any cookie with the same (domain, path, name).
    pub fn store(&mut self, url: &Url, set_cookie: &str) {
        let mut parts = set_cookie.split(';').map(str::trim);
        let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
            return;
        };
        let mut cookie = LwpCookie {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
            domain: url.host_str().unwrap_or_default().to_string(),
            path: "/".to_string(),
            secure: false,
            expires: None,
            version: 0,
        };
        for part in parts {
            match part.split_once('=') {
                Some((key, raw)) => match key.to_ascii_lowercase().as_str() {
                    "domain" => cookie.domain = raw.trim().trim_start_matches('.').to_string(),
                    "path" => cookie.path = raw.trim().to_string(),
                    "expires" => cookie.expires = Some(raw.trim().to_string()),
                    _ => {}
                },
                None => {
                    if part.eq_ignore_ascii_case("secure") {
                        cookie.secure = true;
                    }
                }
            }
        }

        self.cookies.retain(|existing| {
            !(existing.domain == cookie.domain
                && existing.path == cookie.path
                && existing.name == cookie.name)
        });
        self.cookies.push(cookie);
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookie.txt");

        let mut jar = CookieJar::default();
        let url = Url::parse("https://room.chuo-u.ac.jp/ct/home").unwrap();
        jar.store(&url, "sessionid=abc123; Path=/; Secure");
        jar.save(&path).unwrap();

        let loaded = CookieJar::load(&path).unwrap();
        assert_eq!(
            loaded.header_for(&url).as_deref(),
            Some("sessionid=abc123")
        );
    }

    #[test]
    fn test_missing_file_is_empty_jar() {
        let dir = tempfile::tempdir().unwrap();
        let jar = CookieJar::load(&dir.path().join("absent.txt")).unwrap();
        assert!(jar.is_empty());
    }

    #[test]
    fn test_secure_cookie_not_sent_over_http() {
        let mut jar = CookieJar::default();
        let https = Url::parse("https://site.test/").unwrap();
        jar.store(&https, "token=x; Secure");
        assert!(jar.header_for(&https).is_some());

        let http = Url::parse("http://site.test/").unwrap();
        assert!(jar.header_for(&http).is_none());
    }

    #[test]
    fn test_store_replaces_same_cookie() {
        let mut jar = CookieJar::default();
        let url = Url::parse("https://site.test/").unwrap();
        jar.store(&url, "token=old");
        jar.store(&url, "token=new");
        assert_eq!(jar.header_for(&url).as_deref(), Some("token=new"));
    }

    #[test]
    fn test_path_scoping() {
        let mut jar = CookieJar::default();
        let url = Url::parse("https://site.test/app/login").unwrap();
        jar.store(&url, "scoped=1; Path=/app");
        assert!(jar
            .header_for(&Url::parse("https://site.test/app/page").unwrap())
            .is_some());
        assert!(jar
            .header_for(&Url::parse("https://site.test/other").unwrap())
            .is_none());
    }
}
