//! Token Source Factory: mints audience-scoped Google identity tokens from a service-account
//! credential via the JWT-bearer grant.

// std
use std::env;
// self
use crate::_prelude::*;

/// Environment variable naming the service-account credential file.
pub const CREDENTIAL_ENV_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Produces [`SourceHandle`]s scoped to a single audience.
///
/// This is the crate's only polymorphism point: production code wires up
/// [`GoogleServiceAccountFactory`], while tests substitute a deterministic fake that yields
/// scripted `(jwt, expires_at)` pairs.
pub trait TokenSourceFactory: Send + Sync {
	/// Instantiates a new handle capable of minting tokens for `audience`.
	fn new_source<'a>(
		&'a self,
		audience: &'a str,
	) -> Pin<Box<dyn Future<Output = Result<Arc<dyn SourceHandle>>> + Send + 'a>>;
}

/// Yields fresh `(jwt, expires_at)` pairs on demand for one audience.
pub trait SourceHandle: Send + Sync {
	/// Calls the identity provider and returns a freshly minted token and its expiry.
	fn fetch<'a>(
		&'a self,
	) -> Pin<Box<dyn Future<Output = Result<(String, OffsetDateTime)>> + Send + 'a>>;
}

#[derive(Deserialize)]
struct ServiceAccountKey {
	client_email: String,
	private_key: String,
	private_key_id: String,
	#[serde(default = "default_token_uri")]
	token_uri: String,
}

fn default_token_uri() -> String {
	"https://oauth2.googleapis.com/token".to_string()
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
	iss: &'a str,
	sub: &'a str,
	aud: &'a str,
	target_audience: &'a str,
	iat: i64,
	exp: i64,
}

#[derive(Deserialize)]
struct IdTokenResponse {
	id_token: String,
}

/// Mints Google identity tokens by self-signing a JWT-bearer assertion and exchanging it at
/// the service account's token endpoint.
pub struct GoogleServiceAccountFactory {
	http: ReqwestClient,
	key: ServiceAccountKey,
}
impl GoogleServiceAccountFactory {
	/// Loads the service-account key from the path named by [`CREDENTIAL_ENV_VAR`].
	pub fn from_env(http: ReqwestClient) -> Result<Self> {
		let path = env::var(CREDENTIAL_ENV_VAR).map_err(|_| {
			Error::Credential { reason: format!("{CREDENTIAL_ENV_VAR} is not set") }
		})?;

		Self::from_path(http, &path)
	}

	/// Loads the service-account key from an explicit path.
	pub fn from_path(http: ReqwestClient, path: &str) -> Result<Self> {
		let raw = std::fs::read_to_string(path).map_err(|err| Error::Credential {
			reason: format!("failed to read credential file `{path}`: {err}"),
		})?;
		let key: ServiceAccountKey = serde_json::from_str(&raw).map_err(|err| Error::Credential {
			reason: format!("failed to parse credential file `{path}`: {err}"),
		})?;

		Ok(Self { http, key })
	}
}
impl TokenSourceFactory for GoogleServiceAccountFactory {
	fn new_source<'a>(
		&'a self,
		audience: &'a str,
	) -> Pin<Box<dyn Future<Output = Result<Arc<dyn SourceHandle>>> + Send + 'a>> {
		Box::pin(async move {
			Ok(Arc::new(GoogleServiceAccountHandle {
				http: self.http.clone(),
				audience: audience.to_string(),
				client_email: self.key.client_email.clone(),
				private_key: self.key.private_key.clone(),
				private_key_id: self.key.private_key_id.clone(),
				token_uri: self.key.token_uri.clone(),
			}) as Arc<dyn SourceHandle>)
		})
	}
}

struct GoogleServiceAccountHandle {
	http: ReqwestClient,
	audience: String,
	client_email: String,
	private_key: String,
	private_key_id: String,
	token_uri: String,
}
impl SourceHandle for GoogleServiceAccountHandle {
	fn fetch<'a>(
		&'a self,
	) -> Pin<Box<dyn Future<Output = Result<(String, OffsetDateTime)>> + Send + 'a>> {
		Box::pin(async move {
			let now = OffsetDateTime::now_utc();
			let iat = now.unix_timestamp();
			let exp = iat + 3600;
			let claims = AssertionClaims {
				iss: &self.client_email,
				sub: &self.client_email,
				aud: &self.token_uri,
				target_audience: &self.audience,
				iat,
				exp,
			};
			let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);

			header.kid = Some(self.private_key_id.clone());

			let key = jsonwebtoken::EncodingKey::from_rsa_pem(self.private_key.as_bytes())
				.map_err(|err| Error::Mint { reason: format!("invalid private key: {err}") })?;
			let assertion = jsonwebtoken::encode(&header, &claims, &key)
				.map_err(|err| Error::Mint { reason: format!("failed to sign assertion: {err}") })?;
			let form = [
				("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
				("assertion", assertion.as_str()),
			];
			let response = self
				.http
				.post(&self.token_uri)
				.form(&form)
				.send()
				.await
				.map_err(|err| Error::Mint { reason: format!("token endpoint request failed: {err}") })?;
			let status = response.status();

			if !status.is_success() {
				let body = response.text().await.unwrap_or_default();

				return Err(Error::Mint {
					reason: format!("token endpoint returned {status}: {body}"),
				});
			}

			let body: IdTokenResponse = response.json().await.map_err(|err| Error::Mint {
				reason: format!("malformed token endpoint response: {err}"),
			})?;
			let expires_at = decode_expiry(&body.id_token).unwrap_or(now + Duration::hours(1));

			Ok((body.id_token, expires_at))
		})
	}
}

/// Decodes (without verifying) the `exp` claim of a JWT's payload segment.
fn decode_expiry(jwt: &str) -> Option<OffsetDateTime> {
	let payload = jwt.split('.').nth(1)?;
	let bytes = base64_url_decode(payload)?;
	let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
	let exp = value.get("exp")?.as_i64()?;

	OffsetDateTime::from_unix_timestamp(exp).ok()
}

fn base64_url_decode(segment: &str) -> Option<Vec<u8>> {
	use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

	URL_SAFE_NO_PAD.decode(segment).ok()
}

#[cfg(test)]
mod tests {
	// crates.io
	use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
	// self
	use super::*;

	#[test]
	fn decode_expiry_reads_exp_claim() {
		let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
		let payload = URL_SAFE_NO_PAD.encode(br#"{"exp":1700000000}"#);
		let jwt = format!("{header}.{payload}.sig");

		let decoded = decode_expiry(&jwt).expect("exp claim should decode");

		assert_eq!(decoded.unix_timestamp(), 1700000000);
	}

	#[test]
	fn decode_expiry_rejects_malformed_jwt() {
		assert!(decode_expiry("not-a-jwt").is_none());
	}
}
