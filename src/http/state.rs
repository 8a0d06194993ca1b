use crate::posture::PostureTracker;
use crate::session::SessionManager;
use crate::voice::PhraseMap;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The command gateway serializing all session mutation
    pub manager: Arc<SessionManager>,
    /// Posture collaborator, queried for the status view
    pub posture: Arc<dyn PostureTracker>,
    /// Utterance-to-intent mapping for the device-less voice test
    pub phrases: Arc<PhraseMap>,
}

impl AppState {
    pub fn new(manager: Arc<SessionManager>, posture: Arc<dyn PostureTracker>) -> Self {
        Self {
            manager,
            posture,
            phrases: Arc::new(PhraseMap::default()),
        }
    }
}
