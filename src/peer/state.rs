use crate::peer::ice::CandidateLedger;

/// ========== NEGOTIATION STATE ==========
///
/// Per-session trackers; one instance per `start_source`/`start_viewer`,
/// never shared between sessions.
#[derive(Debug, Default)]
pub struct NegotiationState {
    /// `offerId` последнего применённого offer (сторона монитора)
    pub applied_offer_id: Option<i64>,
    /// `answerId` последнего применённого answer (сторона камеры)
    pub applied_answer_id: Option<i64>,
    /// Answer already in the document when the source re-offered; it answers
    /// the previous offer and must not be applied to the new one.
    pub superseded_answer_id: Option<i64>,
    /// Кандидаты камеры, уже переданные транспорту
    pub offer_candidates: CandidateLedger,
    /// Кандидаты монитора, уже переданные транспорту
    pub answer_candidates: CandidateLedger,
}

impl NegotiationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims an offer id; false when it was already applied.
    pub fn claim_offer(&mut self, offer_id: Option<i64>) -> bool {
        if self.applied_offer_id == offer_id {
            return false;
        }
        self.applied_offer_id = offer_id;
        true
    }

    pub fn claim_answer(&mut self, answer_id: Option<i64>) -> bool {
        if self.applied_answer_id == answer_id
            || (answer_id.is_some() && self.superseded_answer_id == answer_id)
        {
            return false;
        }
        self.applied_answer_id = answer_id;
        true
    }

    /// Откат после неудачного применения, следующий снимок повторит попытку
    pub fn rollback_offer(&mut self) {
        self.applied_offer_id = None;
    }

    pub fn rollback_answer(&mut self) {
        self.applied_answer_id = None;
    }

    /// Новый offer камеры: монитор должен иметь возможность ответить снова
    pub fn restart_offer(&mut self, answer_in_document: Option<i64>) {
        self.applied_answer_id = None;
        self.superseded_answer_id = answer_in_document;
    }

    pub fn reset_ids(&mut self) {
        self.applied_offer_id = None;
        self.applied_answer_id = None;
        self.superseded_answer_id = None;
    }

    pub fn reset(&mut self) {
        self.reset_ids();
        self.offer_candidates.clear();
        self.answer_candidates.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_ids_are_claimed_once() {
        let mut state = NegotiationState::new();
        assert!(state.claim_offer(Some(10)));
        assert!(!state.claim_offer(Some(10)));
        assert!(state.claim_offer(Some(11)));

        state.rollback_offer();
        assert!(state.claim_offer(Some(11)));
    }

    #[test]
    fn restart_skips_the_answer_to_the_old_offer() {
        let mut state = NegotiationState::new();
        assert!(state.claim_answer(Some(7)));
        state.restart_offer(Some(7));
        assert_eq!(state.applied_answer_id, None);
        assert!(!state.claim_answer(Some(7)));
        assert!(state.claim_answer(Some(9)));
    }

    #[test]
    fn reset_clears_ids_and_ledgers() {
        let mut state = NegotiationState::new();
        state.claim_answer(Some(5));
        state.answer_candidates.admit(&crate::peer::types::IceCandidate {
            candidate: "c".into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        });
        state.reset();
        assert_eq!(state.applied_answer_id, None);
        assert!(state.answer_candidates.is_empty());
    }
}
