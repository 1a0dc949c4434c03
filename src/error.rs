//
// Error taxonomy
//
// Internal error kinds map onto the OAuth2/OIDC wire vocabulary from
// RFC 6749 §5.2, plus `access_denied`/`server_error`/`temporarily_unavailable`
// and the device-flow kinds from RFC 8628. Grounded on the `make_error!`
// macro pattern this crate inherited, generalized from Bitwarden-shaped JSON
// bodies to `{"error": ..., "error_description": ...}`.
//
use std::io::Cursor;

use rocket::{
    http::{ContentType, Status},
    request::Request,
    response::{self, Redirect, Responder, Response},
};
use serde::Serialize;
use serde_json::json;

/// The wire-visible OAuth2/OIDC error kind. Determines both the JSON
/// `error` field and, via `ErrorKind::status`, the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    UnsupportedResponseType,
    InvalidScope,
    AccessDenied,
    ServerError,
    TemporarilyUnavailable,
    AuthorizationPending,
    SlowDown,
    ExpiredToken,
    InvalidClientMetadata,
    TooManyRequests,
}

impl ErrorKind {
    pub fn wire(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidScope => "invalid_scope",
            Self::AccessDenied => "access_denied",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
            Self::AuthorizationPending => "authorization_pending",
            Self::SlowDown => "slow_down",
            Self::ExpiredToken => "expired_token",
            Self::InvalidClientMetadata => "invalid_client_metadata",
            Self::TooManyRequests => "too_many_requests",
        }
    }

    pub fn status(self) -> Status {
        match self {
            Self::InvalidClient => Status::Unauthorized,
            Self::ServerError => Status::InternalServerError,
            Self::TemporarilyUnavailable => Status::ServiceUnavailable,
            Self::TooManyRequests => Status::TooManyRequests,
            _ => Status::BadRequest,
        }
    }
}

/// Where a `ClientError` should be delivered: rendered inline as JSON, or
/// folded into a redirect back to the relying party (spec §7: once E has
/// validated the `redirect_uri`, later errors in the same flow redirect
/// instead of rendering).
#[derive(Debug, Clone)]
pub enum Delivery {
    Json,
    Redirect { redirect_uri: String, state: Option<String> },
}

#[derive(Debug)]
pub struct OidcError {
    pub kind: ErrorKind,
    pub message: String,
    pub delivery: Delivery,
    pub www_authenticate: bool,
}

impl OidcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), delivery: Delivery::Json, www_authenticate: false }
    }

    pub fn redirect(mut self, redirect_uri: impl Into<String>, state: Option<String>) -> Self {
        self.delivery = Delivery::Redirect { redirect_uri: redirect_uri.into(), state };
        self
    }

    pub fn with_www_authenticate(mut self) -> Self {
        self.www_authenticate = true;
        self
    }
}

macro_rules! make_error {
    ( $struct:ident; $( $name:ident ( $ty:ty ): $kind:expr ),+ $(,)* ) => {
        #[derive(Debug)]
        pub enum $struct {
            Oidc(OidcError),
            $($name($ty, String)),+
        }

        $(impl From<$ty> for $struct {
            fn from(err: $ty) -> Self {
                $struct::$name(err, String::new())
            }
        })+

        impl From<OidcError> for $struct {
            fn from(err: OidcError) -> Self {
                $struct::Oidc(err)
            }
        }

        impl $struct {
            pub fn with_msg<M: Into<String>>(self, msg: M) -> Self {
                match self {
                    $struct::Oidc(mut o) => {
                        o.message = msg.into();
                        $struct::Oidc(o)
                    }
                    $($struct::$name(e, _) => $struct::$name(e, msg.into())),+
                }
            }

            /// Every wrapped external error becomes `server_error` on the
            /// wire; the underlying cause is only ever logged, never leaked.
            fn into_oidc(self) -> OidcError {
                match self {
                    $struct::Oidc(o) => o,
                    $($struct::$name(e, msg) => {
                        error!("{:?}{}{}", e, if msg.is_empty() { "" } else { ": " }, msg);
                        OidcError::new($kind, "internal error")
                    }),+
                }
            }
        }
    };
}

make_error! {
    Error;
    Io(std::io::Error): ErrorKind::ServerError,
    Serde(serde_json::Error): ErrorKind::ServerError,
    Jwt(jsonwebtoken::errors::Error): ErrorKind::ServerError,
    Bcrypt(bcrypt::BcryptError): ErrorKind::ServerError,
    Argon2(argon2::password_hash::Error): ErrorKind::ServerError,
    UrlParse(url::ParseError): ErrorKind::ServerError,
    Reqwest(reqwest::Error): ErrorKind::TemporarilyUnavailable,
}

impl Error {
    pub fn oidc(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Oidc(OidcError::new(kind, message))
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::oidc(ErrorKind::InvalidRequest, message)
    }

    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::oidc(ErrorKind::InvalidClient, message)
    }

    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::oidc(ErrorKind::InvalidGrant, message)
    }

    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::oidc(ErrorKind::InvalidScope, message)
    }

    pub fn unauthorized_client(message: impl Into<String>) -> Self {
        Self::oidc(ErrorKind::UnauthorizedClient, message)
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::oidc(ErrorKind::AccessDenied, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::oidc(ErrorKind::ServerError, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::oidc(ErrorKind::TooManyRequests, message)
    }

    /// §7: a failed opaque-token lookup must read identically to "wrong
    /// secret" on the wire, so callers always route NotFound through here.
    pub fn not_found(what: &str) -> Self {
        Self::invalid_grant(format!("{what} not found"))
    }

    /// Tags an `invalid_client` response with `WWW-Authenticate: Basic`
    /// (spec §7 AuthnError). A no-op on any other error shape.
    pub fn with_www_authenticate(self) -> Self {
        match self {
            Self::Oidc(o) => Self::Oidc(o.with_www_authenticate()),
            other => other,
        }
    }
}

/// Renders `{"error": .., "error_description": ..}` with
/// `Cache-Control: no-store` / `Pragma: no-cache`, or a 302 when the error
/// carries a validated redirect target.
impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, req: &Request<'_>) -> response::Result<'static> {
        let oidc = self.into_oidc();
        match oidc.delivery {
            Delivery::Json => {
                let body = json!({
                    "error": oidc.kind.wire(),
                    "error_description": oidc.message,
                })
                .to_string();

                let mut builder = Response::build();
                builder
                    .status(oidc.kind.status())
                    .header(ContentType::JSON)
                    .raw_header("Cache-Control", "no-store")
                    .raw_header("Pragma", "no-cache")
                    .sized_body(body.len(), Cursor::new(body));
                if oidc.www_authenticate {
                    builder.raw_header("WWW-Authenticate", "Basic");
                }
                builder.ok()
            }
            Delivery::Redirect { redirect_uri, state } => {
                let Ok(mut url) = url::Url::parse(&redirect_uri) else {
                    return Err(Status::InternalServerError);
                };
                url.query_pairs_mut().append_pair("error", oidc.kind.wire());
                if !oidc.message.is_empty() {
                    url.query_pairs_mut().append_pair("error_description", &oidc.message);
                }
                if let Some(state) = state {
                    url.query_pairs_mut().append_pair("state", &state);
                }
                Redirect::to(url.to_string()).respond_to(req)
            }
        }
    }
}

pub type ApiResult<T> = Result<T, Error>;

///
/// Error return macros
///
#[macro_export]
macro_rules! err {
    ($kind:expr, $msg:expr) => {{
        return Err($crate::error::Error::oidc($kind, $msg));
    }};
}

#[macro_export]
macro_rules! err_redirect {
    ($kind:expr, $msg:expr, $redirect_uri:expr, $state:expr) => {{
        return Err($crate::error::Error::from($crate::error::OidcError::new($kind, $msg).redirect($redirect_uri, $state)));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_kind_round_trips_snake_case() {
        assert_eq!(ErrorKind::InvalidGrant.wire(), "invalid_grant");
        assert_eq!(ErrorKind::UnsupportedGrantType.wire(), "unsupported_grant_type");
    }

    #[test]
    fn invalid_client_status_is_401() {
        assert_eq!(ErrorKind::InvalidClient.status(), Status::Unauthorized);
    }
}
