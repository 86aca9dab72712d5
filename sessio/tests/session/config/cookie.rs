//! Verify that all cookie settings behave as expected.
use googletest::{
    expect_that,
    matchers::anything,
    prelude::{eq, none, some},
};
use biscotti::{RequestCookie, RequestCookies, SameSite};
use sessio::{
    IncomingSession, Session, SessionConfig,
    config::{SessionCookieConfig, SessionCookieKind},
};

use crate::fixtures::{SessionFixture, store};

#[tokio::test]
#[googletest::test]
async fn cookie_attributes_can_be_changed() {
    let (store, mut config) = (store(), SessionConfig::default());
    config.cookie.name = "my-custom-cookie-name".into();
    config.cookie.domain = Some("my-domain.com".into());
    config.cookie.path = Some("/custom-path".into());
    config.cookie.secure = false;
    config.cookie.http_only = false;
    config.cookie.same_site = Some(SameSite::Strict);
    config.cookie.kind = SessionCookieKind::Session;
    // The incoming session is left untouched, so the cookie is only
    // re-issued because rolling is enabled.
    config.cookie.rolling = true;

    let fixture = SessionFixture::default();
    let incoming = fixture.setup(&store).await;
    let mut session = Session::new(&store, &config, Some(incoming));

    let cookie = session.finalize().await.unwrap().unwrap();
    expect_that!(cookie.name(), eq(config.cookie.name.as_str()));
    expect_that!(cookie.domain(), eq(config.cookie.domain.as_deref()));
    expect_that!(cookie.path(), eq(config.cookie.path.as_deref()));
    expect_that!(cookie.secure(), none());
    expect_that!(cookie.http_only(), none());
    expect_that!(cookie.same_site(), eq(config.cookie.same_site));
    expect_that!(cookie.max_age(), none());
    expect_that!(cookie.expires(), none());
}

#[tokio::test]
#[googletest::test]
async fn default_cookie_settings() {
    let (store, config) = (store(), SessionConfig::default());

    // A value is attached to the session to force the cookie to be issued.
    let mut session = Session::new(&store, &config, None);
    session.client_mut().insert("key", "value").unwrap();

    let cookie = session.finalize().await.unwrap().unwrap();
    expect_that!(cookie.name(), eq("id"));
    expect_that!(cookie.path(), some(eq("/")));
    expect_that!(cookie.domain(), none());
    expect_that!(cookie.http_only(), some(eq(true)));
    expect_that!(cookie.secure(), some(eq(true)));
    expect_that!(cookie.same_site(), some(eq(SameSite::Lax)));
    expect_that!(cookie.max_age(), some(anything()));
}

#[test]
fn serialize_same_site() {
    let mut config = SessionCookieConfig::default();

    config.same_site = Some(SameSite::Strict);
    let serialized = serde_json::to_value(&config).unwrap();
    assert_eq!(serialized["same_site"], serde_json::json!("Strict"));

    config.same_site = Some(SameSite::Lax);
    let serialized = serde_json::to_value(&config).unwrap();
    assert_eq!(serialized["same_site"], serde_json::json!("Lax"));

    config.same_site = None;
    let serialized = serde_json::to_value(&config).unwrap();
    assert_eq!(serialized["same_site"], serde_json::Value::Null);
}

#[googletest::test]
fn deserialize_same_site() {
    let config: SessionCookieConfig =
        serde_json::from_value(serde_json::json!({ "same_site": "Strict" })).unwrap();
    expect_that!(config.same_site, eq(Some(SameSite::Strict)));

    let config: SessionCookieConfig =
        serde_json::from_value(serde_json::json!({ "same_site": "lax" })).unwrap();
    expect_that!(config.same_site, eq(Some(SameSite::Lax)));

    let config: SessionCookieConfig =
        serde_json::from_value(serde_json::json!({ "same_site": "None" })).unwrap();
    expect_that!(config.same_site, eq(Some(SameSite::None)));

    let config: SessionCookieConfig =
        serde_json::from_value(serde_json::json!({ "same_site": null })).unwrap();
    expect_that!(config.same_site, eq(None));

    let outcome = serde_json::from_value::<SessionCookieConfig>(
        serde_json::json!({ "same_site": "sideways" }),
    );
    expect_that!(outcome.is_err(), eq(true));
}

#[tokio::test]
#[googletest::test]
async fn incoming_looks_for_the_right_cookie_name() {
    // Create a valid session cookie.
    let value = {
        let (store, config) = (store(), SessionConfig::default());
        let mut session = Session::new(&store, &config, None);
        session.client_mut().insert("key", "value").unwrap();
        let cookie = session.finalize().await.unwrap().unwrap();
        cookie.value().to_owned()
    };

    // The cookie name matches, so it's `Some`
    let mut cookie_config = SessionCookieConfig::default();
    cookie_config.name = "my-custom-cookie-name".into();
    let mut request_cookies = RequestCookies::new();
    request_cookies.append(RequestCookie::new(&cookie_config.name, value));
    assert!(IncomingSession::extract(&request_cookies, &cookie_config).is_some());

    // The cookie name doesn't match, now it's `None`
    let mut cookie_config = SessionCookieConfig::default();
    cookie_config.name = "another-name".into();
    assert!(IncomingSession::extract(&request_cookies, &cookie_config).is_none());

    // The cookie name matches, but the value is not a valid state, so it's again `None`
    let cookie_config = SessionCookieConfig::default();
    let mut request_cookies = RequestCookies::new();
    request_cookies.append(RequestCookie::new(&cookie_config.name, "gibberish"));
    assert!(IncomingSession::extract(&request_cookies, &cookie_config).is_none());
}
