use core::convert::Infallible;

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::response::{IntoResponseParts, ResponseParts};
use axum_extra::extract::cookie::{Cookie, Key, SameSite};
use axum_extra::extract::PrivateCookieJar;
use http::request::Parts;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng as _};

const SESSION_ID_LEN: usize = 30;

/// How the session cookie is marked. Browsers drop `Secure` cookies on plain http origins,
/// so `secure` must only be set when the site is served over https.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CookiePolicy {
    pub secure: bool,
}

impl CookiePolicy {
    /// `__Host-` cookies are only accepted when they are also `Secure`.
    #[must_use]
    pub const fn cookie_name(self) -> &'static str {
        if self.secure {
            "__Host-session"
        } else {
            "session"
        }
    }
}

/// The visitor's session. Its id keys the visitor's form and dashboard and doubles as the
/// csrf token of every form.
///
/// Return it from handlers so a freshly created session cookie reaches the browser.
#[derive(Clone)]
#[must_use]
pub struct Session {
    private_cookies: PrivateCookieJar,
    id: String,
}

impl Session {
    pub fn new(private_cookies: PrivateCookieJar, policy: CookiePolicy) -> Self {
        let existing = private_cookies
            .get(policy.cookie_name())
            .map(|cookie| cookie.value().to_owned())
            .filter(|id| is_session_id(id));
        match existing {
            Some(id) => Self {
                private_cookies,
                id,
            },
            None => {
                let id: String = thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(SESSION_ID_LEN)
                    .map(char::from)
                    .collect();
                let cookie = Cookie::build((policy.cookie_name(), id.clone()))
                    .http_only(true)
                    .same_site(SameSite::Strict)
                    .secure(policy.secure)
                    .path("/");
                Self {
                    private_cookies: private_cookies.add(cookie),
                    id,
                }
            }
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn csrf_token(&self) -> &str {
        &self.id
    }
}

fn is_session_id(value: &str) -> bool {
    value.len() == SESSION_ID_LEN && value.bytes().all(|byte| byte.is_ascii_alphanumeric())
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
    Key: FromRef<S>,
    CookiePolicy: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let private_cookies = PrivateCookieJar::<Key>::from_request_parts(parts, state).await?;
        Ok(Self::new(private_cookies, CookiePolicy::from_ref(state)))
    }
}

impl IntoResponseParts for Session {
    type Error = Infallible;

    fn into_response_parts(self, res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        self.private_cookies.into_response_parts(res)
    }
}

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse as _;
    use http::header::{COOKIE, SET_COOKIE};
    use http::HeaderMap;

    use super::*;

    const HTTPS: CookiePolicy = CookiePolicy { secure: true };

    #[test]
    fn new_session_sets_an_encrypted_cookie() {
        let key = Key::generate();
        let session = Session::new(PrivateCookieJar::new(key.clone()), HTTPS);
        assert!(is_session_id(session.id()));
        assert_eq!(session.csrf_token(), session.id());

        let response = (session.clone(), ()).into_response();
        let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap();
        assert!(set_cookie.starts_with("__Host-session="));
        assert!(!set_cookie.contains(session.id()));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Strict"));
        assert!(set_cookie.contains("Secure"));

        let mut headers = HeaderMap::new();
        let pair = set_cookie.split(';').next().unwrap();
        headers.insert(COOKIE, pair.parse().unwrap());
        let again = Session::new(PrivateCookieJar::from_headers(&headers, key), HTTPS);
        assert_eq!(again.id(), session.id());
    }

    #[test]
    fn cookie_from_another_key_starts_a_new_session() {
        let session = Session::new(PrivateCookieJar::new(Key::generate()), HTTPS);
        let response = (session.clone(), ()).into_response();
        let pair = response.headers()[SET_COOKIE]
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_owned();

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, pair.parse().unwrap());
        let other = Session::new(
            PrivateCookieJar::from_headers(&headers, Key::generate()),
            HTTPS,
        );
        assert_ne!(other.id(), session.id());
    }

    #[test]
    fn plain_http_cookie_is_not_secure() {
        let key = Key::generate();
        let session = Session::new(PrivateCookieJar::new(key.clone()), CookiePolicy::default());
        let response = (session.clone(), ()).into_response();
        let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap();
        assert!(set_cookie.starts_with("session="));
        assert!(!set_cookie.contains("Secure"));
        assert!(set_cookie.contains("HttpOnly"));

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, set_cookie.split(';').next().unwrap().parse().unwrap());
        let again = Session::new(
            PrivateCookieJar::from_headers(&headers, key.clone()),
            CookiePolicy::default(),
        );
        assert_eq!(again.id(), session.id());
        // the cookie of the other policy is not picked up
        let https = Session::new(PrivateCookieJar::from_headers(&headers, key), HTTPS);
        assert_ne!(https.id(), session.id());
    }
}
