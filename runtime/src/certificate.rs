use tracing::info;

use coursegate_core::{CertificateId, CourseError};

use crate::cache::LocalCache;
use crate::ports::LearningBackend;
use crate::session::CourseSession;

impl<B: LearningBackend, C: LocalCache> CourseSession<B, C> {
    /// Issue (or re-fetch) the completion certificate. Out-of-order requests
    /// fail with `NotComplete` or `AssessmentNotPassed` before any call is
    /// made. Repeated requests return the same id.
    pub async fn request_certificate(&self) -> Result<CertificateId, CourseError> {
        self.ensure_open()?;
        {
            let state = self.state();
            if let Some(id) = &state.certificate {
                return Ok(id.clone());
            }
            let gate = state.gate_state()?;
            gate.certificate_guard(&state.progress()?.snapshot)?;
        }

        let issued = self.backend.issue_certificate(&self.scope).await?;
        self.ensure_open()?;

        let id = {
            let mut state = self.state();
            state.certificate.get_or_insert(issued).clone()
        };
        info!(scope = %self.scope, certificate = %id, "certificate issued");
        self.reevaluate();
        Ok(id)
    }
}
