use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::error::{BatonError, Result};

/// Signal the scheduler sends ahead of the wall-clock kill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PreemptSignal {
    #[default]
    Usr1,
    Usr2,
    Term,
}

impl PreemptSignal {
    pub fn kind(self) -> SignalKind {
        match self {
            PreemptSignal::Usr1 => SignalKind::user_defined1(),
            PreemptSignal::Usr2 => SignalKind::user_defined2(),
            PreemptSignal::Term => SignalKind::terminate(),
        }
    }

    /// Value accepted by `--preempt-signal` and `BATON_PREEMPT_SIGNAL`.
    pub fn as_arg(self) -> &'static str {
        match self {
            PreemptSignal::Usr1 => "usr1",
            PreemptSignal::Usr2 => "usr2",
            PreemptSignal::Term => "term",
        }
    }
}

impl std::fmt::Display for PreemptSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreemptSignal::Usr1 => write!(f, "SIGUSR1"),
            PreemptSignal::Usr2 => write!(f, "SIGUSR2"),
            PreemptSignal::Term => write!(f, "SIGTERM"),
        }
    }
}

/// Fires once the preemption warning has arrived.
#[derive(Debug, Clone, Default)]
pub struct Preemption {
    token: CancellationToken,
}

impl Preemption {
    /// Preemption driven by an existing token instead of a signal.
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    pub async fn notified(&self) {
        self.token.cancelled().await
    }

    pub fn is_notified(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Install a handler for the preemption warning.
///
/// The signal stream is registered before returning, so a warning that
/// arrives right after this call is not lost and does not kill the process
/// with the default disposition.
pub fn install_preemption_handler(sig: PreemptSignal) -> Result<Preemption> {
    let mut stream = signal(sig.kind()).map_err(BatonError::Signal)?;
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        if stream.recv().await.is_some() {
            tracing::warn!(signal = %sig, "Received preemption warning");
            token_clone.cancel();
        }
    });

    Ok(Preemption { token })
}
