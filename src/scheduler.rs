//
// Background scheduler (P)
//
// Three independent loops sleeping on `tokio::time` rather than a cron
// expression: key rotation wakes exactly at `next_rotation` instead of
// polling, and the GC sweeps run on a fixed interval since there's no
// single "next expiry" to target across many rows. Grounded on the
// teacher's scheduled-job pattern, generalized from `job_scheduler_ng`'s
// cron strings (a poor fit for "sleep until a dynamically computed
// timestamp") to plain `tokio::time::sleep`; see DESIGN.md.
//
use std::sync::Arc;
use std::time::Duration;

use crate::{keys::KeyManager, storage::Storage, util::now_secs};

const GC_INTERVAL_SECS: u64 = 60;
const MIN_SLEEP_SECS: u64 = 1;

/// Runs forever, rotating the signing key exactly when it falls due.
/// Intended to be spawned once at startup via `tokio::spawn`.
pub async fn run_key_rotation(keys: Arc<KeyManager>) {
    loop {
        match keys.current().await {
            Ok(current) => {
                let sleep_for = (current.next_rotation - now_secs()).max(0) as u64;
                tokio::time::sleep(Duration::from_secs(sleep_for.max(MIN_SLEEP_SECS))).await;
            }
            Err(e) => {
                error!("key manager unavailable, retrying shortly: {e:?}");
                tokio::time::sleep(Duration::from_secs(GC_INTERVAL_SECS)).await;
                continue;
            }
        }

        if let Err(e) = keys.rotate_if_due().await {
            error!("key rotation failed: {e:?}");
        }
    }
}

/// Runs forever, sweeping expired auth requests, device requests and empty
/// offline sessions on a fixed cadence (spec §4.4 "servers garbage-collect
/// expired `AuthRequest`s/`DeviceRequest`s").
pub async fn run_gc(storage: Arc<dyn Storage>) {
    loop {
        let now = now_secs();
        match storage.gc_auth_requests(now).await {
            Ok(n) if n > 0 => info!("swept {n} expired auth requests"),
            Ok(_) => {}
            Err(e) => error!("auth request GC failed: {e:?}"),
        }
        match storage.gc_device_requests(now).await {
            Ok(n) if n > 0 => info!("swept {n} expired device requests"),
            Ok(_) => {}
            Err(e) => error!("device request GC failed: {e:?}"),
        }
        match storage.gc_offline_sessions(now).await {
            Ok(n) if n > 0 => info!("swept {n} empty offline sessions"),
            Ok(_) => {}
            Err(e) => error!("offline session GC failed: {e:?}"),
        }
        tokio::time::sleep(Duration::from_secs(GC_INTERVAL_SECS)).await;
    }
}

/// Spawns both loops and returns their join handles so `main` can decide
/// whether to await or detach them.
pub fn spawn(storage: Arc<dyn Storage>, keys: Arc<KeyManager>) -> Vec<tokio::task::JoinHandle<()>> {
    vec![tokio::spawn(run_key_rotation(keys)), tokio::spawn(run_gc(storage))]
}
