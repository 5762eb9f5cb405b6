//! Digest access authentication (RFC 3261 section 22).
//!
//! Challenges are parsed into `rsip` typed headers and answered with
//! [`DigestGenerator`]. Only MD5 is accepted, with or without `qop=auth`.

use rsip::headers::auth::{Algorithm, AuthQop, Qop, Scheme};
use rsip::headers::{self, UntypedHeader};
use rsip::prelude::ToTypedHeader;
use rsip::services::DigestGenerator;
use rsip::{typed, Header, Request, Response};

use crate::error::AuthError;

/// Which challenge header pair a 401 or 407 uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    /// 401: `WWW-Authenticate` answered by `Authorization`
    Server,
    /// 407: `Proxy-Authenticate` answered by `Proxy-Authorization`
    Proxy,
}

impl ChallengeKind {
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            401 => Some(ChallengeKind::Server),
            407 => Some(ChallengeKind::Proxy),
            _ => None,
        }
    }

    pub fn challenge_header(&self) -> &'static str {
        match self {
            ChallengeKind::Server => "WWW-Authenticate",
            ChallengeKind::Proxy => "Proxy-Authenticate",
        }
    }

    /// Parse and check this kind's challenge in `response`.
    pub fn challenge(&self, response: &Response) -> Result<typed::WwwAuthenticate, AuthError> {
        let value = response
            .headers
            .iter()
            .find_map(|header| match (self, header) {
                (ChallengeKind::Server, Header::WwwAuthenticate(challenge)) => Some(challenge.value()),
                (ChallengeKind::Proxy, Header::ProxyAuthenticate(challenge)) => Some(challenge.value()),
                _ => None,
            })
            .ok_or(AuthError::MissingChallenge(self.challenge_header()))?;

        let challenge = headers::WwwAuthenticate::new(value)
            .typed()
            .map_err(|e| AuthError::Unparseable(e.to_string()))?;
        check_challenge(&challenge)?;
        Ok(challenge)
    }

    /// Header carrying `authorization` for this kind of challenge
    pub fn credentials_header(&self, authorization: &typed::Authorization) -> Header {
        let value = authorization.to_string();
        match self {
            ChallengeKind::Server => Header::Authorization(headers::Authorization::new(value)),
            ChallengeKind::Proxy => Header::ProxyAuthorization(headers::ProxyAuthorization::new(value)),
        }
    }
}

fn check_challenge(challenge: &typed::WwwAuthenticate) -> Result<(), AuthError> {
    if challenge.scheme != Scheme::Digest {
        return Err(AuthError::UnsupportedScheme(format!("{:?}", challenge.scheme)));
    }
    if let Some(algorithm) = challenge.algorithm {
        if algorithm != Algorithm::Md5 {
            return Err(AuthError::UnsupportedAlgorithm(format!("{:?}", algorithm)));
        }
    }
    match &challenge.qop {
        None | Some(Qop::Auth) => Ok(()),
        Some(other) => Err(AuthError::UnsupportedQop(format!("{:?}", other))),
    }
}

/// Username and password used to answer challenges
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Answer `challenge` for `request`.
///
/// The digest `uri` is the request target. `algorithm` and `opaque` are
/// echoed when the challenge carried them.
pub fn authorize(challenge: &typed::WwwAuthenticate, request: &Request, credentials: &Credentials) -> typed::Authorization {
    let cnonce = format!("{:016x}", rand::random::<u64>());
    authorize_with_cnonce(challenge, request, credentials, cnonce)
}

fn authorize_with_cnonce(
    challenge: &typed::WwwAuthenticate,
    request: &Request,
    credentials: &Credentials,
    cnonce: String,
) -> typed::Authorization {
    let qop = challenge.qop.as_ref().map(|_| AuthQop::Auth { cnonce, nc: 1 });

    let response = DigestGenerator {
        username: &credentials.username,
        password: &credentials.password,
        algorithm: challenge.algorithm.unwrap_or(Algorithm::Md5),
        nonce: &challenge.nonce,
        method: &request.method,
        qop: qop.as_ref(),
        uri: &request.uri,
        realm: &challenge.realm,
    }
    .compute();

    typed::Authorization {
        scheme: Scheme::Digest,
        username: credentials.username.clone(),
        realm: challenge.realm.clone(),
        nonce: challenge.nonce.clone(),
        uri: request.uri.clone(),
        response,
        algorithm: challenge.algorithm,
        opaque: challenge.opaque.clone(),
        qop,
    }
}
