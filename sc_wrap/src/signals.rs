//! Turn SIGINT and SIGTERM into a cancellation request.
//!
//! The first signal sets the run's [`CancelToken`]; samples finish the stage
//! they are in and the remaining ones are skipped. A second signal exits
//! immediately.

use anyhow::{bail, Context, Result};
use sc_lib::CancelToken;
use std::sync::OnceLock;

static CANCEL: OnceLock<CancelToken> = OnceLock::new();

extern "C" fn on_signal(signum: libc::c_int) {
    if let Some(token) = CANCEL.get() {
        if token.is_cancelled() {
            unsafe { libc::_exit(128 + signum) };
        }
        token.cancel();
    }
}

/// Cancel `token` on SIGINT or SIGTERM. May be called once per process.
pub fn cancel_on_signals(token: &CancelToken) -> Result<()> {
    if CANCEL.set(token.clone()).is_err() {
        bail!("signal handlers are already installed");
    }
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    for signum in [libc::SIGINT, libc::SIGTERM] {
        if unsafe { libc::signal(signum, handler) } == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("could not install handler for signal {signum}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigterm_cancels() -> Result<()> {
        let token = CancelToken::new();
        cancel_on_signals(&token)?;
        assert!(!token.is_cancelled());
        assert_eq!(unsafe { libc::raise(libc::SIGTERM) }, 0);
        assert!(token.is_cancelled());
        assert!(cancel_on_signals(&CancelToken::new()).is_err());
        Ok(())
    }
}
