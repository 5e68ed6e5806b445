//! Open-descriptor limit negotiation
//!
//! Every connection holds one descriptor, and the process needs a handful
//! more for stdio, the multiplexer and output files. Before a run the soft
//! `RLIMIT_NOFILE` is raised to fit; when the hard limit is too low the
//! connection count is reduced instead.

use nix::sys::resource::{getrlimit, setrlimit, Resource, RLIM_INFINITY};
use std::io;

/// Descriptors reserved for everything that is not a connection
pub const FD_OVERHEAD: u64 = 5;

/// Soft and hard descriptor limits; `None` is unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdLimits {
    pub soft: Option<u64>,
    pub hard: Option<u64>,
}

/// Access to the process descriptor limits
pub trait DescriptorLimits {
    fn get(&self) -> io::Result<FdLimits>;
    fn set(&mut self, limits: FdLimits) -> io::Result<()>;
}

/// The real `RLIMIT_NOFILE` of this process
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLimits;

fn from_rlim(value: u64) -> Option<u64> {
    (value != RLIM_INFINITY as u64).then_some(value)
}

impl DescriptorLimits for ProcessLimits {
    fn get(&self) -> io::Result<FdLimits> {
        let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).map_err(io::Error::from)?;
        Ok(FdLimits { soft: from_rlim(soft as u64), hard: from_rlim(hard as u64) })
    }

    fn set(&mut self, limits: FdLimits) -> io::Result<()> {
        let soft = limits.soft.map_or(RLIM_INFINITY, |v| v as _);
        let hard = limits.hard.map_or(RLIM_INFINITY, |v| v as _);
        setrlimit(Resource::RLIMIT_NOFILE, soft, hard).map_err(io::Error::from)
    }
}

/// Result of [`negotiate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// Connections the run may open
    pub connections: usize,
    /// Soft limit in effect afterwards
    pub soft_limit: Option<u64>,
    /// The requested count did not fit under the hard limit
    pub reduced: bool,
}

/// Make room for `requested` connections
///
/// The soft limit is raised to `requested + FD_OVERHEAD`, or to the hard
/// limit when that is lower, in which case the count shrinks to
/// `hard - FD_OVERHEAD`. Failures to read or write the limit are logged and
/// leave the count as decided so far.
pub fn negotiate<L: DescriptorLimits + ?Sized>(limits: &mut L, requested: usize) -> Negotiated {
    let current = match limits.get() {
        Ok(current) => current,
        Err(e) => {
            tracing::error!("error getting open file limit: {}", e);
            return Negotiated { connections: requested, soft_limit: None, reduced: false };
        }
    };

    let needed = requested as u64 + FD_OVERHEAD;
    if current.soft.map_or(true, |soft| soft >= needed) {
        return Negotiated { connections: requested, soft_limit: current.soft, reduced: false };
    }

    let (soft, connections, reduced) = match current.hard {
        Some(hard) if hard < needed => {
            let connections = hard.saturating_sub(FD_OVERHEAD) as usize;
            tracing::warn!(
                "hard limit for open files is {}, connection count reduced from {} to {}",
                hard,
                requested,
                connections
            );
            (hard, connections, true)
        }
        _ => (needed, requested, false),
    };

    match limits.set(FdLimits { soft: Some(soft), hard: current.hard }) {
        Ok(()) => {
            tracing::info!("open file soft limit raised to {}", soft);
            Negotiated { connections, soft_limit: Some(soft), reduced }
        }
        Err(e) => {
            tracing::error!("error setting open file limit to {}: {}", soft, e);
            Negotiated { connections, soft_limit: current.soft, reduced }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        limits: FdLimits,
        set_calls: Vec<FdLimits>,
        fail_set: bool,
    }

    impl Fake {
        fn new(soft: Option<u64>, hard: Option<u64>) -> Self {
            Self { limits: FdLimits { soft, hard }, set_calls: Vec::new(), fail_set: false }
        }
    }

    impl DescriptorLimits for Fake {
        fn get(&self) -> io::Result<FdLimits> {
            Ok(self.limits)
        }

        fn set(&mut self, limits: FdLimits) -> io::Result<()> {
            self.set_calls.push(limits);
            if self.fail_set {
                return Err(io::Error::from_raw_os_error(1));
            }
            self.limits = limits;
            Ok(())
        }
    }

    #[test]
    fn test_enough_room_leaves_limit_alone() {
        let mut fake = Fake::new(Some(1024), Some(4096));
        let n = negotiate(&mut fake, 100);
        assert_eq!(n, Negotiated { connections: 100, soft_limit: Some(1024), reduced: false });
        assert!(fake.set_calls.is_empty());
    }

    #[test]
    fn test_raises_soft_limit() {
        let mut fake = Fake::new(Some(256), Some(4096));
        let n = negotiate(&mut fake, 1000);
        assert_eq!(n.connections, 1000);
        assert_eq!(n.soft_limit, Some(1005));
        assert_eq!(fake.set_calls, vec![FdLimits { soft: Some(1005), hard: Some(4096) }]);
    }

    #[test]
    fn test_reduces_to_hard_limit() {
        let mut fake = Fake::new(Some(256), Some(500));
        let n = negotiate(&mut fake, 1000);
        assert_eq!(n, Negotiated { connections: 495, soft_limit: Some(500), reduced: true });
    }

    #[test]
    fn test_unlimited_hard() {
        let mut fake = Fake::new(Some(256), None);
        let n = negotiate(&mut fake, 10_000);
        assert_eq!(n.connections, 10_000);
        assert_eq!(fake.set_calls[0].hard, None);
    }

    #[test]
    fn test_set_failure_keeps_count() {
        let mut fake = Fake::new(Some(256), Some(500));
        fake.fail_set = true;
        let n = negotiate(&mut fake, 1000);
        assert_eq!(n.connections, 495);
        assert_eq!(n.soft_limit, Some(256));
    }

    #[test]
    fn test_process_limits_readable() {
        let limits = ProcessLimits.get().unwrap();
        if let (Some(soft), Some(hard)) = (limits.soft, limits.hard) {
            assert!(soft <= hard);
        }
    }
}
