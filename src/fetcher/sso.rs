//! Single-sign-on login flow for the portal fetcher.
//!
//! Login is idempotent: an authenticated session short-circuits on the
//! title of the home screen. Otherwise the flow walks the identity
//! provider's form chain: submit credentials on the redirect target, then
//! relay the SAML response form it hands back. A bounce back to the
//! provider's login page means the credentials were wrong.

use reqwest::Method;
use scraper::{Html, Selector};
use tracing::info;

use crate::cert::CertProvider;
use crate::family::manaba::CERT_DOMAIN;

use super::http::CookieHttpFetcher;
use super::FetchError;

const LOGIN_CHECK_URL: &str = "https://room.chuo-u.ac.jp/ct/home";
const LOGOUT_URL: &str = "https://room.chuo-u.ac.jp/ct/logout";
const HOME_TITLE: &str = "中央大学 manaba - home";
const IDP_HOST: &str = "gakunin-idp.c.chuo-u.ac.jp";
const IDP_LOGIN_PATH: &str = "/pub/login.cgi";

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector must parse")
}

fn attr_of(html: &Html, css: &str, attr: &str) -> Option<String> {
    html.select(&selector(css))
        .next()
        .and_then(|element| element.attr(attr))
        .map(|value| value.to_string())
}

/// Hidden-input payload and action URL of the first form in the document.
fn parse_form(html: &Html) -> Option<(Option<String>, Vec<(String, String)>)> {
    let form = html.select(&selector("form")).next()?;
    let action = form.attr("action").map(|value| value.to_string());
    let mut payload = Vec::new();
    for input in form.select(&selector("input")) {
        if let (Some(name), Some(value)) = (input.attr("name"), input.attr("value")) {
            payload.push((name.to_string(), value.to_string()));
        }
    }
    Some((action, payload))
}

impl CookieHttpFetcher {
    /// `None` when the session is authenticated; otherwise the URL the
    /// portal bounced the request to.
    async fn check_login(&self) -> Result<Option<String>, FetchError> {
        let page = self.fetch(Method::GET, LOGIN_CHECK_URL, None).await?;
        let html = Html::parse_document(&String::from_utf8_lossy(&page.body));
        let title = html
            .select(&selector("title"))
            .next()
            .map(|element| element.text().collect::<String>());
        if title.as_deref() == Some(HOME_TITLE) {
            return Ok(None);
        }
        Ok(Some(page.url.to_string()))
    }

    /// Authenticate against the portal with credentials for
    /// [`CERT_DOMAIN`]. Incorrect credentials fail fast.
    pub async fn login(&self, certs: &dyn CertProvider) -> Result<(), FetchError> {
        let pair = certs
            .request(CERT_DOMAIN)
            .await
            .map_err(|e| FetchError::Login(e.to_string()))?;
        info!(uid = %pair.uid, "login");

        let Some(redirect_url) = self.check_login().await? else {
            info!("already certified");
            return Ok(());
        };
        info!("certification required");

        let page = self.fetch(Method::GET, &redirect_url, None).await?;
        let html = Html::parse_document(&String::from_utf8_lossy(&page.body));
        let back = attr_of(&html, r#"input[name="back"]"#, "value")
            .ok_or_else(|| FetchError::Login("login form is missing 'back'".into()))?;
        let sessid = attr_of(&html, "input#sessid", "value")
            .ok_or_else(|| FetchError::Login("login form is missing 'sessid'".into()))?;

        let payload = vec![
            ("dummy".to_string(), String::new()),
            ("username".to_string(), pair.uid.clone()),
            ("password".to_string(), pair.password.clone()),
            ("op".to_string(), "login".to_string()),
            ("back".to_string(), back),
            ("sessid".to_string(), sessid),
        ];
        self.fetch(Method::POST, &redirect_url, Some(&payload)).await?;

        let Some(redirect_url) = self.check_login().await? else {
            *self.login_uid.lock().await = Some(pair.uid);
            return Ok(());
        };

        // Bounced back to the provider's login screen: bad uid/password.
        if let Ok(parsed) = url::Url::parse(&redirect_url) {
            if parsed.host_str() == Some(IDP_HOST) && parsed.path() == IDP_LOGIN_PATH {
                return Err(FetchError::IncorrectCert);
            }
        }

        // Relay the response form the provider handed back.
        let page = self.fetch(Method::GET, &redirect_url, None).await?;
        let html = Html::parse_document(&String::from_utf8_lossy(&page.body));
        let (action, payload) = parse_form(&html)
            .ok_or_else(|| FetchError::Login("relay form not found".into()))?;
        let action = action.unwrap_or(redirect_url);
        self.fetch(Method::POST, &action, Some(&payload)).await?;

        if self.check_login().await?.is_none() {
            *self.login_uid.lock().await = Some(pair.uid);
            return Ok(());
        }

        Err(FetchError::Login("login failed".into()))
    }

    /// Terminate the portal session if one was established.
    pub async fn logout(&self) -> Result<(), FetchError> {
        let uid = self.login_uid.lock().await.take();
        let Some(uid) = uid else {
            return Ok(());
        };
        info!(%uid, "logout");
        self.fetch(Method::GET, LOGOUT_URL, None).await?;
        Ok(())
    }
}
