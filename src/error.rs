/// Taxonomie d'erreurs commune au moteur
///
/// Chaque variant correspond à une famille de comportement (retry, surface,
/// absorption) plutôt qu'à un site d'erreur précis. Les composants ne
/// matchent que sur ces variants, jamais sur un message.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Entrée invalide (plage de dates, interval inconnu, paramètre négatif).
    /// Jamais retried en interne.
    #[error("validation: {0}")]
    Validation(String),

    /// Jeton manquant / expiré / invalide. Un seul refresh est tenté en amont.
    #[error("auth: {0}")]
    Auth(String),

    /// Erreur réseau transitoire, 5xx, throttling. Retryable avec backoff.
    #[error("transient: {0}")]
    Transient(String),

    /// Payload upstream malformé. Non retryable.
    #[error("decode: {0}")]
    Decode(String),

    /// Spécifique aux indicateurs: longueur d'entrée insuffisante.
    #[error("insufficient data: need at least {required}, got {got}")]
    InsufficientData { required: usize, got: usize },

    /// Entrée contient NaN/Inf.
    #[error("bad input: {0}")]
    BadInput(String),

    /// Conflit d'identité absorbé par upsert. Ne devrait jamais être observé
    /// hors du store lui-même.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Nouveau travail refusé après le début du drain.
    #[error("shutdown in progress")]
    Shutdown,

    /// Fourre-tout pour les erreurs inattendues, journalisées avec contexte.
    #[error("internal: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
