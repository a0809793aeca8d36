use crate::peer::types::IceCandidate;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Инициализация логирования. `RUST_LOG` имеет приоритет над `level`.
///
/// Повторный вызов ничего не делает, поэтому безопасен в тестах.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("peercall={level},warn")));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate, cand.sdp_mid, cand.sdp_mline_index, cand.username_fragment
    );
}
