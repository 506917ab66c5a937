// ── Authentication negotiation ──
//
// Devices speak either Basic or Digest and rarely say which up front. In
// `Auto` mode the first request to a target carries Basic credentials; a
// 401 with a Digest challenge flips that target to Digest for the rest of
// the client's life. Digest challenges are cached so later requests can be
// answered preemptively without an extra round trip.

use dashmap::DashMap;
use digest_auth::{AuthContext, HttpMethod, WwwAuthenticateHeader};
use reqwest::header::{HeaderMap, HeaderValue, WWW_AUTHENTICATE};
use secrecy::ExposeSecret;
use tracing::{debug, trace};

use crate::config::{AuthMode, Credentials, Target};
use crate::error::Error;
use crate::result::RawResponse;

const UNAUTHORIZED: u16 = 401;

/// Authentication scheme in use for a target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum AuthScheme {
    /// No request has told us yet.
    #[default]
    Undetermined,
    Basic,
    Digest,
}

/// What to attach to one outgoing request.
#[derive(Debug)]
pub(crate) enum Authorization<'a> {
    Anonymous,
    Basic(&'a Credentials),
    Digest(HeaderValue),
}

/// Request facts a Digest answer is computed over.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DigestInput<'a> {
    pub method: &'a str,
    /// Path plus query, exactly as sent on the request line.
    pub uri: &'a str,
    pub body: Option<&'a [u8]>,
}

// ── Cache ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct TargetState {
    scheme: AuthScheme,
    challenge: Option<WwwAuthenticateHeader>,
}

/// Per-target auth decisions.
///
/// The scheme moves `Undetermined -> Basic | Digest` once; concurrent
/// resolvers race and the first writer wins.
#[derive(Debug, Default)]
pub(crate) struct AuthCache {
    entries: DashMap<Target, TargetState>,
}

impl AuthCache {
    pub(crate) fn scheme(&self, target: &Target) -> AuthScheme {
        self.entries
            .get(target)
            .map_or(AuthScheme::Undetermined, |state| state.scheme)
    }

    /// Record the detected scheme unless another request got there first.
    /// Returns the scheme that is now cached.
    pub(crate) fn resolve(&self, target: &Target, scheme: AuthScheme) -> AuthScheme {
        let mut state = self.entries.entry(target.clone()).or_default();
        if state.scheme == AuthScheme::Undetermined {
            state.scheme = scheme;
            debug!(device = %target, %scheme, "auth scheme resolved");
        }
        state.scheme
    }

    fn remember_challenge(&self, target: &Target, challenge: WwwAuthenticateHeader) {
        self.entries.entry(target.clone()).or_default().challenge = Some(challenge);
    }

    /// Answer the cached Digest challenge, if any, bumping its nonce count.
    fn answer(
        &self,
        target: &Target,
        credentials: &Credentials,
        input: &DigestInput<'_>,
    ) -> Result<Option<HeaderValue>, Error> {
        let Some(mut state) = self.entries.get_mut(target) else {
            return Ok(None);
        };
        match state.challenge.as_mut() {
            Some(challenge) => digest_header(challenge, credentials, input).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }
}

// ── Handler ──────────────────────────────────────────────────────────

/// Applies the configured auth mode to requests for one target.
#[derive(Debug, Clone)]
pub(crate) struct AuthHandler {
    mode: AuthMode,
    credentials: Option<Credentials>,
    target: Target,
}

impl AuthHandler {
    pub(crate) fn new(mode: AuthMode, credentials: Option<Credentials>, target: Target) -> Self {
        Self {
            mode,
            credentials,
            target,
        }
    }

    pub(crate) fn target(&self) -> &Target {
        &self.target
    }

    /// The scheme the next request will start with.
    pub(crate) fn scheme(&self, cache: &AuthCache) -> AuthScheme {
        match self.mode {
            AuthMode::Basic => AuthScheme::Basic,
            AuthMode::Digest => AuthScheme::Digest,
            AuthMode::Auto => cache.scheme(&self.target),
        }
    }

    /// Run one logical request through `send`, negotiating auth as needed.
    ///
    /// `send` is called at most twice. A 401 that survives negotiation is
    /// returned as an authentication error rather than a response.
    pub(crate) fn execute<F>(
        &self,
        cache: &AuthCache,
        input: &DigestInput<'_>,
        mut send: F,
    ) -> Result<RawResponse, Error>
    where
        F: FnMut(Authorization<'_>) -> Result<RawResponse, Error>,
    {
        let Some(credentials) = &self.credentials else {
            let response = send(Authorization::Anonymous)?;
            if response.status() == UNAUTHORIZED {
                return Err(Error::CredentialsRequired);
            }
            return Ok(response);
        };

        match self.scheme(cache) {
            AuthScheme::Basic => {
                let response = send(Authorization::Basic(credentials))?;
                accepted(response, "basic")
            }
            AuthScheme::Digest => self.digest(cache, credentials, input, send),
            AuthScheme::Undetermined => self.discover(cache, credentials, input, send),
        }
    }

    /// Auto mode, first contact: probe with Basic and let the device decide.
    fn discover<F>(
        &self,
        cache: &AuthCache,
        credentials: &Credentials,
        input: &DigestInput<'_>,
        mut send: F,
    ) -> Result<RawResponse, Error>
    where
        F: FnMut(Authorization<'_>) -> Result<RawResponse, Error>,
    {
        let probe = send(Authorization::Basic(credentials))?;
        if probe.status() != UNAUTHORIZED {
            cache.resolve(&self.target, AuthScheme::Basic);
            return Ok(probe);
        }

        let Some(challenge) = digest_challenge(probe.headers()) else {
            cache.resolve(&self.target, AuthScheme::Basic);
            return Err(rejected("basic"));
        };
        let header = self.answer_fresh(cache, &challenge, credentials, input)?;
        cache.resolve(&self.target, AuthScheme::Digest);
        accepted(send(Authorization::Digest(header))?, "digest")
    }

    fn digest<F>(
        &self,
        cache: &AuthCache,
        credentials: &Credentials,
        input: &DigestInput<'_>,
        mut send: F,
    ) -> Result<RawResponse, Error>
    where
        F: FnMut(Authorization<'_>) -> Result<RawResponse, Error>,
    {
        let first = match cache.answer(&self.target, credentials, input)? {
            Some(header) => send(Authorization::Digest(header))?,
            None => send(Authorization::Anonymous)?,
        };
        if first.status() != UNAUTHORIZED {
            return Ok(first);
        }

        // Stale nonce or first contact: answer the fresh challenge once.
        let Some(challenge) = digest_challenge(first.headers()) else {
            return Err(Error::Authentication {
                message: "device answered 401 without a digest challenge".into(),
                status: Some(UNAUTHORIZED),
            });
        };
        trace!(device = %self.target, "answering fresh digest challenge");
        let header = self.answer_fresh(cache, &challenge, credentials, input)?;
        accepted(send(Authorization::Digest(header))?, "digest")
    }

    fn answer_fresh(
        &self,
        cache: &AuthCache,
        challenge: &str,
        credentials: &Credentials,
        input: &DigestInput<'_>,
    ) -> Result<HeaderValue, Error> {
        let mut parsed = digest_auth::parse(challenge).map_err(|e| Error::Authentication {
            message: format!("malformed digest challenge: {e}"),
            status: Some(UNAUTHORIZED),
        })?;
        let header = digest_header(&mut parsed, credentials, input)?;
        cache.remember_challenge(&self.target, parsed);
        Ok(header)
    }
}

fn accepted(response: RawResponse, scheme: &str) -> Result<RawResponse, Error> {
    if response.status() == UNAUTHORIZED {
        Err(rejected(scheme))
    } else {
        Ok(response)
    }
}

fn rejected(scheme: &str) -> Error {
    Error::Authentication {
        message: format!("device rejected {scheme} credentials"),
        status: Some(UNAUTHORIZED),
    }
}

fn digest_header(
    challenge: &mut WwwAuthenticateHeader,
    credentials: &Credentials,
    input: &DigestInput<'_>,
) -> Result<HeaderValue, Error> {
    let context = AuthContext::new_with_method(
        credentials.username(),
        credentials.password().expose_secret(),
        input.uri,
        input.body,
        HttpMethod::from(input.method),
    );
    let answer = challenge
        .respond(&context)
        .map_err(|e| Error::Authentication {
            message: format!("cannot answer digest challenge: {e}"),
            status: None,
        })?;
    HeaderValue::from_str(&answer.to_header_string()).map_err(|e| Error::Authentication {
        message: format!("digest answer is not a valid header: {e}"),
        status: None,
    })
}

/// The Digest challenge among the `WWW-Authenticate` values, if any,
/// normalized to start with `Digest `.
fn digest_challenge(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| challenge_params(value, "Digest"))
        .map(|params| format!("Digest {params}"))
}

/// Parameters of the `scheme` challenge inside one header value.
///
/// A scheme token only counts at the start of the value or right after a
/// comma; text inside quoted strings is skipped.
fn challenge_params<'a>(value: &'a str, scheme: &str) -> Option<&'a str> {
    let mut quoted = false;
    let mut escaped = false;
    let mut at_boundary = true;
    for (index, ch) in value.char_indices() {
        if quoted {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                quoted = false;
            }
            continue;
        }
        match ch {
            '"' => {
                quoted = true;
                at_boundary = false;
            }
            ',' => at_boundary = true,
            _ if ch.is_ascii_whitespace() => {}
            _ if at_boundary => {
                at_boundary = false;
                if let Some(params) = value.get(index..).and_then(|rest| strip_scheme(rest, scheme)) {
                    return Some(params);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_scheme<'a>(text: &'a str, scheme: &str) -> Option<&'a str> {
    let head = text.get(..scheme.len())?;
    let rest = text.get(scheme.len()..)?;
    let separated = rest.starts_with(|c: char| c.is_ascii_whitespace());
    (head.eq_ignore_ascii_case(scheme) && separated).then(|| rest.trim())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;

    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use url::Url;

    use super::*;
    use crate::error::ErrorKind;

    const CHALLENGE: &str = r#"Digest realm="Device API", nonce="abc123", qop="auth""#;

    // ── Helpers ──────────────────────────────────────────────────────

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        Anonymous,
        Basic,
        Digest(String),
    }

    /// Scripted device: pops one canned status per send and records
    /// which authorization each send carried.
    struct Script {
        replies: VecDeque<(u16, Option<&'static str>)>,
        sent: Vec<Sent>,
    }

    impl Script {
        fn new(replies: &[(u16, Option<&'static str>)]) -> Self {
            Self {
                replies: replies.iter().copied().collect(),
                sent: Vec::new(),
            }
        }

        fn send(&mut self, auth: Authorization<'_>) -> Result<RawResponse, Error> {
            self.sent.push(match auth {
                Authorization::Anonymous => Sent::Anonymous,
                Authorization::Basic(_) => Sent::Basic,
                Authorization::Digest(value) => Sent::Digest(value.to_str().unwrap().to_owned()),
            });
            let (status, challenge) = self.replies.pop_front().unwrap();
            let mut headers = HeaderMap::new();
            if let Some(challenge) = challenge {
                headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
            }
            Ok(RawResponse::new(
                status,
                headers,
                Url::parse("http://device.local/axis-cgi/param.cgi").unwrap(),
                Bytes::new(),
            ))
        }
    }

    fn target() -> Target {
        Target::new("device.local", 80)
    }

    fn handler(mode: AuthMode) -> AuthHandler {
        AuthHandler::new(
            mode,
            Some(Credentials::new("root", "pass".to_string())),
            target(),
        )
    }

    fn input() -> DigestInput<'static> {
        DigestInput {
            method: "GET",
            uri: "/axis-cgi/param.cgi",
            body: None,
        }
    }

    fn run(handler: &AuthHandler, cache: &AuthCache, script: &mut Script) -> Result<RawResponse, Error> {
        handler.execute(cache, &input(), |auth| script.send(auth))
    }

    // ── Auto discovery ───────────────────────────────────────────────

    #[test]
    fn auto_caches_basic_when_probe_succeeds() {
        let cache = AuthCache::default();
        let handler = handler(AuthMode::Auto);
        let mut script = Script::new(&[(200, None), (200, None)]);

        run(&handler, &cache, &mut script).unwrap();
        run(&handler, &cache, &mut script).unwrap();

        assert_eq!(script.sent, vec![Sent::Basic, Sent::Basic]);
        assert_eq!(cache.scheme(&target()), AuthScheme::Basic);
    }

    #[test]
    fn auto_switches_to_digest_once() {
        let cache = AuthCache::default();
        let handler = handler(AuthMode::Auto);
        let mut script = Script::new(&[(401, Some(CHALLENGE)), (200, None), (200, None)]);

        run(&handler, &cache, &mut script).unwrap();
        assert_eq!(cache.scheme(&target()), AuthScheme::Digest);
        run(&handler, &cache, &mut script).unwrap();

        assert_eq!(script.sent.len(), 3);
        assert_eq!(script.sent[0], Sent::Basic);
        let (Sent::Digest(first), Sent::Digest(second)) = (&script.sent[1], &script.sent[2]) else {
            panic!("expected two digest answers, got {:?}", script.sent);
        };
        assert!(first.contains("nc=00000001"));
        assert!(second.contains("nc=00000002"), "preemptive answer reuses the nonce");
        assert!(first.contains(r#"username="root""#));
    }

    #[test]
    fn auto_without_digest_challenge_fails_and_caches_basic() {
        let cache = AuthCache::default();
        let handler = handler(AuthMode::Auto);
        let mut script = Script::new(&[(401, Some(r#"Basic realm="device""#))]);

        let err = run(&handler, &cache, &mut script).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(err.status(), Some(401));
        assert_eq!(script.sent, vec![Sent::Basic]);
        assert_eq!(cache.scheme(&target()), AuthScheme::Basic);
    }

    #[test]
    fn basic_realm_mentioning_digest_stays_basic() {
        let cache = AuthCache::default();
        let handler = handler(AuthMode::Auto);
        let mut script = Script::new(&[(401, Some(r#"Basic realm="axis digest camera""#))]);

        let err = run(&handler, &cache, &mut script).unwrap_err();
        assert_eq!(err.code(), "authentication_failed");
        assert_eq!(script.sent, vec![Sent::Basic]);
        assert_eq!(cache.scheme(&target()), AuthScheme::Basic);
    }

    #[test]
    fn unparseable_digest_challenge_leaves_scheme_open() {
        let cache = AuthCache::default();
        let handler = handler(AuthMode::Auto);
        let mut script = Script::new(&[(401, Some(r#"Digest qop="auth""#))]);

        let err = run(&handler, &cache, &mut script).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(err.to_string().contains("malformed digest challenge"), "{err}");
        assert_eq!(script.sent, vec![Sent::Basic]);
        assert_eq!(cache.scheme(&target()), AuthScheme::Undetermined);
    }

    #[test]
    fn wrong_digest_credentials_stop_after_two_sends() {
        let cache = AuthCache::default();
        let handler = handler(AuthMode::Auto);
        let mut script = Script::new(&[(401, Some(CHALLENGE)), (401, Some(CHALLENGE))]);

        let err = run(&handler, &cache, &mut script).unwrap_err();
        assert_eq!(err.code(), "authentication_failed");
        assert_eq!(script.sent.len(), 2);
    }

    // ── Explicit modes ───────────────────────────────────────────────

    #[test]
    fn explicit_digest_fetches_challenge_then_answers() {
        let cache = AuthCache::default();
        let handler = handler(AuthMode::Digest);
        let mut script = Script::new(&[(401, Some(CHALLENGE)), (200, None)]);

        run(&handler, &cache, &mut script).unwrap();
        assert_eq!(script.sent[0], Sent::Anonymous);
        assert!(matches!(script.sent[1], Sent::Digest(_)));
    }

    #[test]
    fn stale_nonce_is_answered_exactly_once() {
        const ROTATED: &str = r#"Digest realm="Device API", nonce="def456", qop="auth", stale=true"#;
        let cache = AuthCache::default();
        let handler = handler(AuthMode::Digest);
        let mut script = Script::new(&[
            (401, Some(CHALLENGE)),
            (200, None),
            (401, Some(ROTATED)),
            (200, None),
        ]);

        run(&handler, &cache, &mut script).unwrap();
        run(&handler, &cache, &mut script).unwrap();

        let Sent::Digest(last) = &script.sent[3] else {
            panic!("expected a digest answer");
        };
        assert!(last.contains(r#"nonce="def456""#));
        assert!(last.contains("nc=00000001"));
    }

    #[test]
    fn explicit_basic_never_probes() {
        let cache = AuthCache::default();
        let handler = handler(AuthMode::Basic);
        let mut script = Script::new(&[(401, Some(CHALLENGE))]);

        let err = run(&handler, &cache, &mut script).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(script.sent, vec![Sent::Basic]);
        assert_eq!(cache.scheme(&target()), AuthScheme::Undetermined);
    }

    #[test]
    fn missing_credentials_surface_as_credentials_required() {
        let cache = AuthCache::default();
        let handler = AuthHandler::new(AuthMode::Auto, None, target());
        let mut script = Script::new(&[(401, Some(CHALLENGE)), (200, None)]);

        let err = run(&handler, &cache, &mut script).unwrap_err();
        assert_eq!(err.code(), "credentials_required");
        assert!(run(&handler, &cache, &mut script).is_ok());
        assert_eq!(script.sent, vec![Sent::Anonymous, Sent::Anonymous]);
    }

    // ── Cache ────────────────────────────────────────────────────────

    #[test]
    fn first_resolution_wins() {
        let cache = AuthCache::default();
        assert_eq!(cache.resolve(&target(), AuthScheme::Digest), AuthScheme::Digest);
        assert_eq!(cache.resolve(&target(), AuthScheme::Basic), AuthScheme::Digest);
        cache.clear();
        assert_eq!(cache.scheme(&target()), AuthScheme::Undetermined);
    }

    #[test]
    fn digest_challenge_is_found_among_several() {
        let mut headers = HeaderMap::new();
        headers.append(WWW_AUTHENTICATE, HeaderValue::from_static(r#"Basic realm="x""#));
        headers.append(
            WWW_AUTHENTICATE,
            HeaderValue::from_static(r#"digest realm="y", nonce="n""#),
        );
        assert_eq!(
            digest_challenge(&headers).as_deref(),
            Some(r#"Digest realm="y", nonce="n""#)
        );
        assert_eq!(digest_challenge(&HeaderMap::new()), None);
    }

    #[test]
    fn digest_inside_quoted_text_is_not_a_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(
            WWW_AUTHENTICATE,
            HeaderValue::from_static(r#"Basic realm="front, digest gate""#),
        );
        assert_eq!(digest_challenge(&headers), None);

        headers.insert(
            WWW_AUTHENTICATE,
            HeaderValue::from_static(r#"Basic realm="a, \"digest\" b", Digest realm="y", nonce="n""#),
        );
        assert_eq!(
            digest_challenge(&headers).as_deref(),
            Some(r#"Digest realm="y", nonce="n""#)
        );
    }
}
