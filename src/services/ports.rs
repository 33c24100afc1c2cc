//! Loopback port allocation for service listeners.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::OnceLock;

use crate::constants::LOOPBACK;
use crate::error::{CompatError, Result};

/// Ports handed out during this process, never reissued
static ISSUED: OnceLock<Mutex<HashSet<u16>>> = OnceLock::new();

const MAX_ATTEMPTS_PER_PORT: usize = 16;

/// Reserve `count` distinct free loopback ports
///
/// Listeners are held until all ports are chosen so the kernel cannot hand the same
/// port back twice, then released for the service to bind.
pub fn allocate_ports(count: usize) -> Result<Vec<u16>> {
    let issued = ISSUED.get_or_init(|| Mutex::new(HashSet::new()));
    let mut listeners = Vec::with_capacity(count);
    let mut ports = Vec::with_capacity(count);
    let mut attempts = 0;

    while ports.len() < count {
        attempts += 1;
        if attempts > count * MAX_ATTEMPTS_PER_PORT {
            return Err(CompatError::Io(format!(
                "unable to allocate {count} free loopback ports"
            )));
        }

        let listener = TcpListener::bind((LOOPBACK, 0))?;
        let port = listener.local_addr()?.port();

        if issued.lock().insert(port) {
            ports.push(port);
        }
        listeners.push(listener);
    }

    drop(listeners);
    Ok(ports)
}
