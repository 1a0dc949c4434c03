//
// Config loader
//
// Declares every configuration field once via `make_config!` and generates a
// `ConfigBuilder` (all-`Option` env view) plus a `Config` facade with one
// accessor per field. Grounded on the `make_config!` macro shape, trimmed of
// the admin-panel JSON surface (`prepare_json`/`get_support_json`) and the
// runtime-editable `RwLock<Inner>` since this crate's config is resolved once
// at startup and never rewritten from the admin panel (no such panel here).
//
// `$VAR`/`$FILE:/path` substitution (the spec's Design Notes) happens once,
// in `resolve_value`, before a candidate string is handed to `FromStr`. This
// lets every field be provided as a literal, an indirection through another
// env var, or a file path, without three separate env var names per field
// the way `util::get_env_str_value`'s `_FILE` suffix convention does it.
//
use std::{fs, process::exit, str::FromStr};

use once_cell::sync::Lazy;
use url::Url;

use crate::error::Error;

pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    Config::load().unwrap_or_else(|e| {
        println!("[ERROR] Failed to load configuration:\n  {e:?}\n");
        exit(12)
    })
});

fn resolve_value(raw: &str) -> Result<String, Error> {
    if let Some(path) = raw.strip_prefix("$FILE:") {
        return fs::read_to_string(path).map(|s| s.trim().to_string()).map_err(Error::from);
    }
    if let Some(var) = raw.strip_prefix('$') {
        return Ok(std::env::var(var).unwrap_or_default());
    }
    Ok(raw.to_string())
}

fn get_env_resolved<V: FromStr>(key: &str) -> Option<V> {
    let raw = std::env::var(key).ok()?;
    let resolved = resolve_value(&raw).unwrap_or_else(|e| {
        println!("[ERROR] Failed to resolve {key}: {e:?}");
        exit(12)
    });
    if resolved.is_empty() {
        return None;
    }
    resolved.parse().ok()
}

macro_rules! make_config {
    ($(
        $(#[doc = $doc:literal])*
        $name:ident : $ty:ty = $default:expr;
    )+) => {
        #[derive(Clone, Default, serde::Deserialize, serde::Serialize)]
        pub struct ConfigBuilder {
            $(
                #[serde(skip_serializing_if = "Option::is_none")]
                $name: Option<$ty>,
            )+
        }

        impl ConfigBuilder {
            fn from_env() -> Self {
                let env_file = std::env::var("ENV_FILE").unwrap_or_else(|_| ".env".into());
                match dotenvy::from_path(&env_file) {
                    Ok(()) => println!("[INFO] Loaded environment from `{env_file}`."),
                    Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        println!("[ERROR] Failed to parse `{env_file}`: {e:?}");
                        exit(255);
                    }
                }

                let mut builder = Self::default();
                $(
                    builder.$name = get_env_resolved(pastey::paste!(stringify!([<$name:upper>])));
                )+
                builder
            }
        }

        #[derive(Clone)]
        struct ConfigItems {
            $($name: $ty,)+
        }

        pub struct Config {
            inner: ConfigItems,
        }

        #[allow(unused)]
        impl Config {
            $(
                $(#[doc = $doc])*
                pub fn $name(&self) -> $ty {
                    self.inner.$name.clone()
                }
            )+
        }
    };
}

make_config! {
    /// Public base URL of this issuer, e.g. `https://id.example.com`. Must be absolute.
    issuer: String = "http://localhost:8000".into();
    /// Address rocket binds to.
    listen_addr: String = "0.0.0.0:8000".into();
    /// JWT signing algorithm. Only RS256 is currently implemented.
    signing_algorithm: String = "RS256".into();
    /// How often the key manager mints a new signing key, in seconds.
    rotation_frequency_secs: i64 = 6 * 3600;
    /// How long a retired signing key remains in the verification set, in seconds.
    verification_ttl_secs: i64 = 24 * 3600;
    /// ID token lifetime, in seconds.
    id_token_lifetime_secs: i64 = 3600;
    /// Access token lifetime, in seconds.
    access_token_lifetime_secs: i64 = 3600;
    /// Lifetime of an `AuthRequest` from creation to expiry, in seconds.
    auth_request_lifetime_secs: i64 = 600;
    /// Absolute lifetime of a refresh token family, in seconds.
    refresh_absolute_lifetime_secs: i64 = 30 * 24 * 3600;
    /// A refresh token is invalidated if unused for this many seconds.
    refresh_valid_if_not_used_for_secs: i64 = 30 * 24 * 3600;
    /// Grace window in which a consumed refresh token may still be re-presented, in seconds.
    refresh_reuse_interval_secs: i64 = 30;
    /// Device code lifetime, in seconds.
    device_code_lifetime_secs: i64 = 600;
    /// Minimum polling interval the client must respect, in seconds.
    device_poll_interval_secs: i64 = 5;
    /// Comma-separated grant types this instance accepts.
    allowed_grant_types: String = "authorization_code,refresh_token,urn:ietf:params:oauth:grant-type:device_code,urn:ietf:params:oauth:grant-type:token-exchange".into();
    /// Comma-separated scopes advertised in discovery.
    scopes_supported: String = "openid,profile,email,groups,offline_access".into();
    /// Comma-separated claims advertised in discovery.
    claims_supported: String = "sub,aud,exp,iat,iss,azp,at_hash,email,email_verified,groups,name,preferred_username".into();
    /// RSA key size in bits minted by the key manager.
    rsa_key_size_bits: u32 = 2048;
    /// Argon2id memory cost (KiB) used to hash confidential client secrets.
    argon2_memory_kib: u32 = 19456;
    /// bcrypt cost factor used for `Password` records (floor of 10 enforced separately).
    bcrypt_cost: u32 = 12;
    /// Rate limit window for the token endpoint, in seconds.
    token_ratelimit_seconds: u64 = 1;
    /// Burst size allowed per window on the token endpoint, per source IP.
    token_ratelimit_burst: u32 = 10;
    /// Rate limit window for device user_code verification, in seconds.
    device_verify_ratelimit_seconds: u64 = 10;
    /// Burst size allowed per window for device user_code verification, per source IP.
    device_verify_ratelimit_burst: u32 = 5;
    /// Block connector HTTP callouts to non-global (private/loopback/link-local) IPs.
    http_request_block_non_global_ips: bool = true;
    /// Optional extra regex of hostnames/IPs to block for connector HTTP callouts.
    http_request_block_regex: Option<String> = None;
    /// Log level passed to `fern` at startup (`trace`, `debug`, `info`, `warn`, `error`).
    log_level: String = "info".into();
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        let builder = ConfigBuilder::from_env();
        let items = builder.build();
        let config = Self { inner: items };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        let issuer = self.issuer();
        let url = Url::parse(&issuer).map_err(|_| Error::server_error(format!("ISSUER `{issuer}` is not a valid absolute URL")))?;
        if url.cannot_be_a_base() {
            return Err(Error::server_error(format!("ISSUER `{issuer}` must be a base URL")));
        }
        if self.signing_algorithm() != "RS256" {
            return Err(Error::server_error(format!(
                "SIGNING_ALGORITHM `{}` is not supported; only RS256 is implemented",
                self.signing_algorithm()
            )));
        }
        if self.rotation_frequency_secs() <= 0 {
            return Err(Error::server_error("ROTATION_FREQUENCY_SECS must be positive"));
        }
        if self.verification_ttl_secs() <= 0 {
            return Err(Error::server_error("VERIFICATION_TTL_SECS must be positive"));
        }
        if self.rsa_key_size_bits() < 2048 {
            return Err(Error::server_error("RSA_KEY_SIZE_BITS must be at least 2048"));
        }
        Ok(())
    }

    pub fn grant_types(&self) -> Vec<String> {
        self.allowed_grant_types().split(',').map(str::trim).map(str::to_string).collect()
    }

    pub fn scopes(&self) -> Vec<String> {
        self.scopes_supported().split(',').map(str::trim).map(str::to_string).collect()
    }

    pub fn claims(&self) -> Vec<String> {
        self.claims_supported().split(',').map(str::trim).map(str::to_string).collect()
    }
}

impl ConfigBuilder {
    fn build(&self) -> ConfigItems {
        macro_rules! pick {
            ($field:ident, $default:expr) => {
                self.$field.clone().unwrap_or_else(|| $default)
            };
        }
        ConfigItems {
            issuer: pick!(issuer, "http://localhost:8000".into()),
            listen_addr: pick!(listen_addr, "0.0.0.0:8000".into()),
            signing_algorithm: pick!(signing_algorithm, "RS256".into()),
            rotation_frequency_secs: pick!(rotation_frequency_secs, 6 * 3600),
            verification_ttl_secs: pick!(verification_ttl_secs, 24 * 3600),
            id_token_lifetime_secs: pick!(id_token_lifetime_secs, 3600),
            access_token_lifetime_secs: pick!(access_token_lifetime_secs, 3600),
            auth_request_lifetime_secs: pick!(auth_request_lifetime_secs, 600),
            refresh_absolute_lifetime_secs: pick!(refresh_absolute_lifetime_secs, 30 * 24 * 3600),
            refresh_valid_if_not_used_for_secs: pick!(refresh_valid_if_not_used_for_secs, 30 * 24 * 3600),
            refresh_reuse_interval_secs: pick!(refresh_reuse_interval_secs, 30),
            device_code_lifetime_secs: pick!(device_code_lifetime_secs, 600),
            device_poll_interval_secs: pick!(device_poll_interval_secs, 5),
            allowed_grant_types: pick!(
                allowed_grant_types,
                "authorization_code,refresh_token,urn:ietf:params:oauth:grant-type:device_code,urn:ietf:params:oauth:grant-type:token-exchange".into()
            ),
            scopes_supported: pick!(scopes_supported, "openid,profile,email,groups,offline_access".into()),
            claims_supported: pick!(
                claims_supported,
                "sub,aud,exp,iat,iss,azp,at_hash,email,email_verified,groups,name,preferred_username".into()
            ),
            rsa_key_size_bits: pick!(rsa_key_size_bits, 2048),
            argon2_memory_kib: pick!(argon2_memory_kib, 19456),
            bcrypt_cost: pick!(bcrypt_cost, 12),
            token_ratelimit_seconds: pick!(token_ratelimit_seconds, 1),
            token_ratelimit_burst: pick!(token_ratelimit_burst, 10),
            device_verify_ratelimit_seconds: pick!(device_verify_ratelimit_seconds, 10),
            device_verify_ratelimit_burst: pick!(device_verify_ratelimit_burst, 5),
            http_request_block_non_global_ips: pick!(http_request_block_non_global_ips, true),
            http_request_block_regex: pick!(http_request_block_regex, None),
            log_level: pick!(log_level, "info".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_value_passes_through_a_literal() {
        assert_eq!(resolve_value("literal-value").unwrap(), "literal-value");
    }

    #[test]
    fn resolve_value_indirects_through_another_env_var() {
        std::env::set_var("CONFIG_TEST_INDIRECT_TARGET", "indirected");
        assert_eq!(resolve_value("$CONFIG_TEST_INDIRECT_TARGET").unwrap(), "indirected");
        std::env::remove_var("CONFIG_TEST_INDIRECT_TARGET");
    }

    #[test]
    fn resolve_value_missing_indirect_var_resolves_empty() {
        std::env::remove_var("CONFIG_TEST_MISSING_VAR");
        assert_eq!(resolve_value("$CONFIG_TEST_MISSING_VAR").unwrap(), "");
    }

    #[test]
    fn resolve_value_reads_a_file() {
        let path = std::env::temp_dir().join("openid-federator-config-test-secret.txt");
        std::fs::write(&path, "  file-secret\n").unwrap();
        let raw = format!("$FILE:{}", path.display());
        assert_eq!(resolve_value(&raw).unwrap(), "file-secret");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn resolve_value_missing_file_is_an_error() {
        assert!(resolve_value("$FILE:/nonexistent/path/should/not/exist").is_err());
    }

    fn default_items() -> ConfigItems {
        ConfigBuilder::default().build()
    }

    #[test]
    fn default_config_validates() {
        let config = Config { inner: default_items() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn non_rs256_signing_algorithm_is_rejected() {
        let mut items = default_items();
        items.signing_algorithm = "HS256".into();
        let config = Config { inner: items };
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_absolute_issuer_is_rejected() {
        let mut items = default_items();
        items.issuer = "not-a-url".into();
        let config = Config { inner: items };
        assert!(config.validate().is_err());
    }

    #[test]
    fn undersized_rsa_key_is_rejected() {
        let mut items = default_items();
        items.rsa_key_size_bits = 1024;
        let config = Config { inner: items };
        assert!(config.validate().is_err());
    }

    #[test]
    fn grant_types_scopes_and_claims_split_on_comma() {
        let config = Config { inner: default_items() };
        assert!(config.grant_types().contains(&"authorization_code".to_string()));
        assert!(config.scopes().contains(&"openid".to_string()));
        assert!(config.claims().contains(&"sub".to_string()));
    }
}
