use crate::peer::transport::PeerTransport;
use crate::peer::types::IceCandidate;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Сколько кандидатов держим до установки remote description
pub const MAX_PENDING_CANDIDATES: usize = 256;

/// FIFO очередь удалённых кандидатов, пришедших раньше SDP
#[derive(Debug, Default)]
pub struct CandidateQueue {
    items: VecDeque<IceCandidate>,
}

impl CandidateQueue {
    pub fn push(&mut self, candidate: IceCandidate) {
        if self.items.len() >= MAX_PENDING_CANDIDATES {
            if let Some(dropped) = self.items.pop_front() {
                warn!(
                    "Pending candidate queue full ({}), dropping oldest: {}",
                    MAX_PENDING_CANDIDATES, dropped.candidate
                );
            }
        }
        self.items.push_back(candidate);
    }

    /// Переносит все кандидаты из `other` в конец очереди, сохраняя порядок
    pub fn append(&mut self, other: &mut CandidateQueue) {
        for candidate in other.items.drain(..) {
            self.push(candidate);
        }
    }

    pub fn take_all(&mut self) -> Vec<IceCandidate> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Применяет все отложенные кандидаты после установки remote description.
///
/// Ошибка одного кандидата не прерывает остальные. Возвращает число применённых.
pub async fn apply_pending_candidates(
    transport: &dyn PeerTransport,
    queue: &mut CandidateQueue,
) -> usize {
    let candidates = queue.take_all();
    let total = candidates.len();
    let mut applied = 0;

    for candidate in candidates {
        debug!("Applying pending candidate: {}", candidate.candidate);
        match transport.add_ice_candidate(candidate).await {
            Ok(()) => applied += 1,
            Err(e) => warn!("Failed to apply pending candidate: {}", e),
        }
    }

    if total > 0 {
        debug!("Applied {}/{} pending candidates", applied, total);
    }
    applied
}
