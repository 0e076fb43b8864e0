use log::*;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

/// Locks `mutex`, recovering the guard if a previous holder panicked.
///
/// The tables behind these locks are plain maps that stay consistent between statements, so a poisoned lock is
/// logged and carried on with rather than turned into a panic at the boundary.
pub fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            error!("The {what} lock was poisoned by a panicking thread. Recovering.");
            poisoned.into_inner()
        }
    }
}

/// Reads an IPv4 address delivered by the host in network byte order.
///
/// Returns `None` for an empty result, which is how the host reports a failed resolution, and for any length
/// other than 4.
pub fn ipv4_from_bytes(bytes: &[u8]) -> Option<Ipv4Addr> {
    let octets: [u8; 4] = bytes.try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}

/// Parses a relay or peer host name that may already be a literal IPv4 address.
pub fn parse_ipv4_literal(host: &str) -> Option<Ipv4Addr> {
    host.trim().parse::<Ipv4Addr>().ok()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn ipv4_bytes() {
        assert_eq!(ipv4_from_bytes(&[10, 0, 0, 5]), Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(ipv4_from_bytes(&[]), None);
        assert_eq!(ipv4_from_bytes(&[1, 2, 3]), None);
        assert_eq!(ipv4_from_bytes(&[0; 16]), None);
    }

    #[test]
    fn ipv4_literals() {
        assert_eq!(parse_ipv4_literal("192.168.1.100"), Some(Ipv4Addr::new(192, 168, 1, 100)));
        assert_eq!(parse_ipv4_literal(" 127.0.0.1 "), Some(Ipv4Addr::LOCALHOST));
        assert_eq!(parse_ipv4_literal("relay.example.com"), None);
        assert_eq!(parse_ipv4_literal("::1"), None);
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let mutex = Arc::new(Mutex::new(5));
        let clone = Arc::clone(&mutex);
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(mutex.is_poisoned());
        let guard = lock_or_recover(&mutex, "test");
        assert_eq!(*guard, 5);
    }
}
