//
// Per-IP rate limiting for the token, introspection and device-verification
// endpoints (ambient component N). Grounded on the teacher's `ratelimit.rs`
// (`governor` keyed limiters), generalized from the login/admin pair to the
// token-endpoint/device-verify pair this spec calls for.
//
use std::{net::IpAddr, num::NonZeroU32, time::Duration};

use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};
use once_cell::sync::Lazy;

use crate::{config::CONFIG, error::Error};

type Limiter<T = IpAddr> = RateLimiter<T, DashMapStateStore<T>, DefaultClock>;

static LIMITER_TOKEN: Lazy<Limiter> = Lazy::new(|| {
    let seconds = Duration::from_secs(CONFIG.token_ratelimit_seconds());
    let burst = NonZeroU32::new(CONFIG.token_ratelimit_burst()).expect("TOKEN_RATELIMIT_BURST must be non-zero");
    RateLimiter::keyed(Quota::with_period(seconds).expect("TOKEN_RATELIMIT_SECONDS must be non-zero").allow_burst(burst))
});

static LIMITER_DEVICE_VERIFY: Lazy<Limiter> = Lazy::new(|| {
    let seconds = Duration::from_secs(CONFIG.device_verify_ratelimit_seconds());
    let burst = NonZeroU32::new(CONFIG.device_verify_ratelimit_burst()).expect("DEVICE_VERIFY_RATELIMIT_BURST must be non-zero");
    RateLimiter::keyed(Quota::with_period(seconds).expect("DEVICE_VERIFY_RATELIMIT_SECONDS must be non-zero").allow_burst(burst))
});

pub fn check_token_endpoint(ip: &IpAddr) -> Result<(), Error> {
    LIMITER_TOKEN.check_key(ip).map_err(|_| Error::too_many_requests("too many token requests"))
}

pub fn check_device_verify(ip: &IpAddr) -> Result<(), Error> {
    LIMITER_DEVICE_VERIFY.check_key(ip).map_err(|_| Error::too_many_requests("too many device verification attempts"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    // Distinct, never-reused IPs per test: the limiters are process-global
    // statics shared across the whole test binary.
    #[test]
    fn token_endpoint_allows_up_to_the_configured_burst() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        for _ in 0..CONFIG.token_ratelimit_burst() {
            assert!(check_token_endpoint(&ip).is_ok());
        }
        assert!(check_token_endpoint(&ip).is_err());
    }

    #[test]
    fn device_verify_allows_up_to_the_configured_burst() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        for _ in 0..CONFIG.device_verify_ratelimit_burst() {
            assert!(check_device_verify(&ip).is_ok());
        }
        assert!(check_device_verify(&ip).is_err());
    }

    #[test]
    fn distinct_ips_are_tracked_independently() {
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 4));
        for _ in 0..CONFIG.token_ratelimit_burst() {
            assert!(check_token_endpoint(&a).is_ok());
        }
        assert!(check_token_endpoint(&a).is_err());
        // A fresh key still has its own untouched burst.
        assert!(check_token_endpoint(&b).is_ok());
    }
}
