//! Default timeouts for communication objects.

use std::time::Duration;

/// The four timeouts every binding carries.
///
/// `send` bounds a request/reply exchange including the wait for the reply;
/// `receive` bounds how long a duplex session may sit idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Timeout for `open`
    pub open: Duration,
    /// Timeout for `close`
    pub close: Duration,
    /// Timeout for sends and request/reply exchanges
    pub send: Duration,
    /// Timeout for receives on input and duplex channels
    pub receive: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            open: Duration::from_secs(60),
            close: Duration::from_secs(60),
            send: Duration::from_secs(60),
            receive: Duration::from_secs(600),
        }
    }
}

impl Timeouts {
    /// Short timeouts for local transports and tests
    pub fn fast() -> Self {
        Self {
            open: Duration::from_secs(5),
            close: Duration::from_secs(5),
            send: Duration::from_secs(5),
            receive: Duration::from_secs(30),
        }
    }

    /// Long timeouts for slow services
    pub fn patient() -> Self {
        Self {
            open: Duration::from_secs(120),
            close: Duration::from_secs(120),
            send: Duration::from_secs(600),
            receive: Duration::from_secs(3600),
        }
    }

    /// Same timeouts with a different send timeout
    pub fn with_send(mut self, send: Duration) -> Self {
        self.send = send;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_binding_defaults() {
        let t = Timeouts::default();
        assert_eq!(t.open, Duration::from_secs(60));
        assert_eq!(t.receive, Duration::from_secs(600));
        assert!(Timeouts::fast().send < t.send);
        assert!(Timeouts::patient().send > t.send);
    }
}
