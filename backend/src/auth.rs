use crate::config::OidcConfig;
use crate::routes::AppState;
use crate::views::Views;
use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use meterbill::{Error, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "meterbill_session";
pub const LOGIN_COOKIE: &str = "meterbill_login";
const SESSION_HOURS: i64 = 24;
const LOGIN_MINUTES: i64 = 10;

/// The signed-in operator, attached to protected requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub sub: String,
    pub name: Option<String>,
    pub email: Option<String>,
}
impl AuthUser {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.sub)
    }
}

#[derive(Serialize, Deserialize)]
pub struct Claims {
    pub exp: usize,
    pub iat: usize,
    pub sub: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Short-lived cookie tying a provider redirect to the browser that started it.
#[derive(Serialize, Deserialize)]
struct LoginClaims {
    exp: usize,
    iat: usize,
    state: String,
    next: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Discovery {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UserInfo {
    sub: String,
    name: Option<String>,
    preferred_username: Option<String>,
    email: Option<String>,
}

/// OIDC authorization-code login plus the signed session cookie.
pub struct AccessGate {
    config: OidcConfig,
    http: reqwest::Client,
    discovery: OnceCell<Discovery>,
}

impl AccessGate {
    pub fn new(config: OidcConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(meterbill::stat::REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Auth(format!("http client: {e}")))?;
        Ok(Self {
            config,
            http,
            discovery: OnceCell::new(),
        })
    }

    /// Provider metadata, fetched on first use and cached afterwards.
    pub async fn discovery(&self) -> Result<&Discovery> {
        self.discovery
            .get_or_try_init(|| async {
                let url = format!("{}/.well-known/openid-configuration", self.config.issuer);
                let resp = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| Error::Auth(format!("discovery at {url} failed: {e}")))?;
                resp.json::<Discovery>()
                    .await
                    .map_err(|e| Error::Auth(format!("invalid discovery document: {e}")))
            })
            .await
    }

    /// Callback URL, either configured or derived from the request.
    pub fn redirect_uri(&self, headers: &HeaderMap) -> String {
        if let Some(url) = &self.config.redirect_url {
            return url.clone();
        }
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost");
        let proto = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("http");
        format!("{proto}://{host}/auth")
    }

    pub async fn authorize_url(&self, state: &str, redirect_uri: &str) -> Result<String> {
        let discovery = self.discovery().await?;
        let url = Url::parse_with_params(
            &discovery.authorization_endpoint,
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", self.config.scope.as_str()),
                ("state", state),
            ],
        )
        .map_err(|e| Error::Auth(format!("invalid authorization endpoint: {e}")))?;
        Ok(url.into())
    }

    /// Trades the authorization code for an access token and reads the
    /// identity from the userinfo endpoint.
    pub async fn exchange(&self, code: &str, redirect_uri: &str) -> Result<AuthUser> {
        let discovery = self.discovery().await?;
        let token: TokenResponse = self
            .http
            .post(&discovery.token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Auth(format!("token exchange failed: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Auth(format!("invalid token response: {e}")))?;

        let userinfo_url = discovery
            .userinfo_endpoint
            .as_deref()
            .ok_or_else(|| Error::Auth("provider has no userinfo endpoint".into()))?;
        let info: UserInfo = self
            .http
            .get(userinfo_url)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Auth(format!("userinfo request failed: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Auth(format!("invalid userinfo response: {e}")))?;

        Ok(AuthUser {
            sub: info.sub,
            name: info.name.or(info.preferred_username),
            email: info.email,
        })
    }

    pub fn encode_session(&self, user: &AuthUser) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            exp: (now + Duration::hours(SESSION_HOURS)).timestamp() as usize,
            iat: now.timestamp() as usize,
            sub: user.sub.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
        };
        self.sign(&claims)
    }

    pub fn decode_session(&self, token: &str) -> Result<AuthUser> {
        let claims: Claims = self.verify(token)?;
        Ok(AuthUser {
            sub: claims.sub,
            name: claims.name,
            email: claims.email,
        })
    }

    fn encode_login(&self, state: &str, next: &str) -> Result<String> {
        let now = Utc::now();
        self.sign(&LoginClaims {
            exp: (now + Duration::minutes(LOGIN_MINUTES)).timestamp() as usize,
            iat: now.timestamp() as usize,
            state: state.to_string(),
            next: next.to_string(),
        })
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String> {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(self.config.session_secret.as_bytes()),
        )
        .map_err(|e| Error::Auth(format!("jwt encode error: {e}")))
    }

    fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        decode::<T>(
            token,
            &DecodingKey::from_secret(self.config.session_secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| Error::Auth(format!("invalid token: {e}")))
    }

    fn secure_cookies(&self, redirect_uri: &str) -> bool {
        redirect_uri.starts_with("https://")
    }
}

/// Value of cookie `name` from any `Cookie` header.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

fn set_cookie(name: &str, value: &str, max_age: i64, secure: bool) -> String {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Only same-site absolute paths are followed after login.
fn safe_next(next: Option<&str>) -> String {
    match next {
        Some(n) if n.starts_with('/') && !n.starts_with("//") && !n.contains('\\') => n.to_string(),
        _ => "/".to_string(),
    }
}

fn see_other(location: &str) -> Response {
    (StatusCode::SEE_OTHER, [(header::LOCATION, location.to_string())]).into_response()
}

fn auth_failure(views: &Views, err: &Error) -> Response {
    warn!("login failed: {err}");
    views.auth_error(StatusCode::UNAUTHORIZED, &err.to_string())
}

#[derive(Deserialize)]
pub struct LoginQuery {
    pub next: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(gate) = state.gate.as_deref() else {
        return see_other("/");
    };
    let nonce = Uuid::new_v4().to_string();
    let next = safe_next(query.next.as_deref());
    let redirect_uri = gate.redirect_uri(&headers);
    let started = async {
        let url = gate.authorize_url(&nonce, &redirect_uri).await?;
        let cookie = gate.encode_login(&nonce, &next)?;
        Ok::<_, Error>((url, cookie))
    };
    match started.await {
        Ok((url, cookie)) => (
            StatusCode::SEE_OTHER,
            [
                (header::LOCATION, url),
                (
                    header::SET_COOKIE,
                    set_cookie(
                        LOGIN_COOKIE,
                        &cookie,
                        LOGIN_MINUTES * 60,
                        gate.secure_cookies(&redirect_uri),
                    ),
                ),
            ],
        )
            .into_response(),
        Err(e) => auth_failure(&state.views, &e),
    }
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(gate) = state.gate.as_deref() else {
        return see_other("/");
    };
    let redirect_uri = gate.redirect_uri(&headers);
    let finished = async {
        if let Some(error) = query.error {
            let detail = query.error_description.unwrap_or_default();
            return Err(Error::Auth(format!("provider returned {error} {detail}")));
        }
        let cookie = read_cookie(&headers, LOGIN_COOKIE)
            .ok_or_else(|| Error::Auth("login was not started from this browser".into()))?;
        let login: LoginClaims = gate.verify(&cookie)?;
        if query.state.as_deref() != Some(login.state.as_str()) {
            return Err(Error::Auth("state mismatch".into()));
        }
        let code = query
            .code
            .ok_or_else(|| Error::Auth("missing authorization code".into()))?;
        let user = gate.exchange(&code, &redirect_uri).await?;
        let session = gate.encode_session(&user)?;
        Ok((user, session, safe_next(Some(login.next.as_str()))))
    };
    match finished.await {
        Ok((user, session, next)) => {
            info!(sub = %user.sub, user = %user.display_name(), "signed in");
            let secure = gate.secure_cookies(&redirect_uri);
            (
                StatusCode::SEE_OTHER,
                [
                    (header::LOCATION, next),
                    (
                        header::SET_COOKIE,
                        set_cookie(SESSION_COOKIE, &session, SESSION_HOURS * 3600, secure),
                    ),
                    (header::SET_COOKIE, set_cookie(LOGIN_COOKIE, "", 0, secure)),
                ],
            )
                .into_response()
        }
        Err(e) => auth_failure(&state.views, &e),
    }
}

pub async fn logout() -> Response {
    (
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, "/".to_string()),
            (header::SET_COOKIE, set_cookie(SESSION_COOKIE, "", 0, false)),
        ],
    )
        .into_response()
}

/// Lets requests through when login is disabled; otherwise requires a valid
/// session cookie and sends everyone else to the provider.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(gate) = state.gate.as_deref() else {
        return next.run(req).await;
    };
    let user = read_cookie(req.headers(), SESSION_COOKIE).map(|t| gate.decode_session(&t));
    match user {
        Some(Ok(user)) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        other => {
            if let Some(Err(e)) = other {
                info!("session rejected: {e}");
            }
            let target = req
                .uri()
                .path_and_query()
                .map(|p| p.as_str())
                .unwrap_or("/");
            let next: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
            see_other(&format!("/login?next={next}"))
        }
    }
}
