//
// HTTP client factory used by connector implementations reaching out to an
// upstream identity source. Grounded closely on the teacher's
// `http_client.rs`, which already matches this crate's modern async/reqwest
// idiom; only the config accessor names and crate paths changed.
//
use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    str::FromStr,
    sync::{Arc, Mutex},
    time::Duration,
};

use hickory_resolver::{name_server::TokioConnectionProvider, TokioResolver};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{
    dns::{Name, Resolve, Resolving},
    header, Client, ClientBuilder,
};
use url::Host;

use crate::{config::CONFIG, error::Error, util::is_global};

pub fn make_http_request(method: reqwest::Method, url: &str) -> Result<reqwest::RequestBuilder, Error> {
    let Ok(url) = url::Url::parse(url) else {
        return Err(Error::server_error("invalid upstream URL"));
    };
    let Some(host) = url.host() else {
        return Err(Error::server_error("invalid upstream host"));
    };

    should_block_host(host).map_err(|e| Error::server_error(e.to_string()))?;

    static INSTANCE: Lazy<Client> = Lazy::new(|| get_reqwest_client_builder().build().expect("failed to build HTTP client"));
    Ok(INSTANCE.request(method, url))
}

pub fn get_reqwest_client_builder() -> ClientBuilder {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::USER_AGENT, header::HeaderValue::from_static("openid-federator"));

    let redirect_policy = reqwest::redirect::Policy::custom(|attempt| {
        if attempt.previous().len() >= 5 {
            return attempt.error("too many redirects");
        }

        let Some(host) = attempt.url().host() else {
            return attempt.error("invalid host");
        };

        if let Err(e) = should_block_host(host) {
            return attempt.error(e);
        }

        attempt.follow()
    });

    Client::builder()
        .default_headers(headers)
        .redirect(redirect_policy)
        .dns_resolver(CustomDnsResolver::instance())
        .timeout(Duration::from_secs(10))
}

pub fn should_block_address(domain_or_ip: &str) -> bool {
    if let Ok(ip) = IpAddr::from_str(domain_or_ip) {
        if should_block_ip(ip) {
            return true;
        }
    }
    should_block_address_regex(domain_or_ip)
}

fn should_block_ip(ip: IpAddr) -> bool {
    if !CONFIG.http_request_block_non_global_ips() {
        return false;
    }
    !is_global(ip)
}

fn should_block_address_regex(domain_or_ip: &str) -> bool {
    let Some(block_regex) = CONFIG.http_request_block_regex() else {
        return false;
    };

    static COMPILED_REGEX: Mutex<Option<(String, Regex)>> = Mutex::new(None);
    let mut guard = COMPILED_REGEX.lock().unwrap();

    if let Some((value, regex)) = &*guard {
        if value == &block_regex {
            return regex.is_match(domain_or_ip);
        }
    }

    let Ok(regex) = Regex::new(&block_regex) else {
        return false;
    };
    let is_match = regex.is_match(domain_or_ip);
    *guard = Some((block_regex, regex));
    is_match
}

fn should_block_host(host: Host<&str>) -> Result<(), CustomHttpClientError> {
    let (ip, host_str): (Option<IpAddr>, String) = match host {
        Host::Ipv4(ip) => (Some(ip.into()), ip.to_string()),
        Host::Ipv6(ip) => (Some(ip.into()), ip.to_string()),
        Host::Domain(d) => (None, d.to_string()),
    };

    if let Some(ip) = ip {
        if should_block_ip(ip) {
            return Err(CustomHttpClientError::NonGlobalIp { domain: None, ip });
        }
    }

    if should_block_address_regex(&host_str) {
        return Err(CustomHttpClientError::Blocked { domain: host_str });
    }

    Ok(())
}

#[derive(Debug, Clone)]
pub enum CustomHttpClientError {
    Blocked { domain: String },
    NonGlobalIp { domain: Option<String>, ip: IpAddr },
}

impl fmt::Display for CustomHttpClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked { domain } => write!(f, "blocked domain: {domain} matched HTTP_REQUEST_BLOCK_REGEX"),
            Self::NonGlobalIp { domain: Some(domain), ip } => write!(f, "IP {ip} for domain '{domain}' is not a global IP"),
            Self::NonGlobalIp { domain: None, ip } => write!(f, "IP {ip} is not a global IP"),
        }
    }
}

impl std::error::Error for CustomHttpClientError {}

#[derive(Debug, Clone)]
enum CustomDnsResolver {
    Default(),
    Hickory(Arc<TokioResolver>),
}
type BoxError = Box<dyn std::error::Error + Send + Sync>;

impl CustomDnsResolver {
    fn instance() -> Arc<Self> {
        static INSTANCE: Lazy<Arc<CustomDnsResolver>> = Lazy::new(CustomDnsResolver::new);
        Arc::clone(&INSTANCE)
    }

    fn new() -> Arc<Self> {
        match TokioResolver::builder(TokioConnectionProvider::default()) {
            Ok(builder) => Arc::new(Self::Hickory(Arc::new(builder.build()))),
            Err(e) => {
                warn!("Error creating Hickory resolver, falling back to default: {e:?}");
                Arc::new(Self::Default())
            }
        }
    }

    async fn resolve_domain(&self, name: &str) -> Result<Option<SocketAddr>, BoxError> {
        pre_resolve(name)?;

        let result = match self {
            Self::Default() => tokio::net::lookup_host(name).await?.next(),
            Self::Hickory(r) => r.lookup_ip(name).await?.iter().next().map(|a| SocketAddr::new(a, 0)),
        };

        if let Some(addr) = &result {
            post_resolve(name, addr.ip())?;
        }

        Ok(result)
    }
}

fn pre_resolve(name: &str) -> Result<(), CustomHttpClientError> {
    if should_block_address(name) {
        return Err(CustomHttpClientError::Blocked { domain: name.to_string() });
    }
    Ok(())
}

fn post_resolve(name: &str, ip: IpAddr) -> Result<(), CustomHttpClientError> {
    if should_block_ip(ip) {
        Err(CustomHttpClientError::NonGlobalIp { domain: Some(name.to_string()), ip })
    } else {
        Ok(())
    }
}

impl Resolve for CustomDnsResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let this = self.clone();
        Box::pin(async move {
            let name = name.as_str();
            let result = this.resolve_domain(name).await?;
            Ok::<reqwest::dns::Addrs, _>(Box::new(result.into_iter()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_address_is_blocked_by_default() {
        assert!(should_block_address("127.0.0.1"));
        assert!(should_block_address("::1"));
    }

    #[test]
    fn private_address_is_blocked_by_default() {
        assert!(should_block_address("10.0.0.5"));
        assert!(should_block_address("192.168.1.1"));
    }

    #[test]
    fn link_local_address_is_blocked_by_default() {
        assert!(should_block_address("169.254.1.1"));
    }

    #[test]
    fn public_address_is_not_blocked() {
        assert!(!should_block_address("8.8.8.8"));
    }

    #[test]
    fn non_ip_domain_falls_through_to_the_regex_check() {
        // With the default config (no HTTP_REQUEST_BLOCK_REGEX), a bare
        // domain name is never blocked by the IP check alone.
        assert!(!should_block_address("connector.example.com"));
    }

    #[test]
    fn custom_http_client_error_messages_name_the_offending_host() {
        let blocked = CustomHttpClientError::Blocked { domain: "evil.example".into() };
        assert!(blocked.to_string().contains("evil.example"));

        let non_global = CustomHttpClientError::NonGlobalIp { domain: Some("internal".into()), ip: "10.0.0.1".parse().unwrap() };
        assert!(non_global.to_string().contains("10.0.0.1"));
        assert!(non_global.to_string().contains("internal"));
    }
}
