//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore custom dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce `OptimizeError` enum per categorizzare tutti gli errori possibili
//! - Distingue gli errori per-candidato (registrati come `Failed(reason)`)
//!   da quelli fatali all'avvio (`Config`)
//! - Integra con `thiserror` per automatic error conversion
//!
//! ## Categorie di errori:
//! - `Io`: Errori di I/O (permessi, file spariti, disco pieno)
//! - `Compression`: Errori del codec o stream corrotto in verifica
//! - `Integrity`: Rename fallito dopo la compressione
//! - `Config`: Parametri di configurazione non validi (solo all'avvio)
//! - `UnknownCandidate` / `NotConfirmed` / `InvalidState` / `Busy`:
//!   richieste rifiutate dall'orchestratore
//!
//! ## Esempio:
//! ```rust,ignore
//! if !confirm {
//!     return Err(OptimizeError::NotConfirmed(id));
//! }
//! ```

use crate::candidate::{CandidateId, CandidateState, FailureKind, FailureReason};

/// Custom error types for artifact optimization
#[derive(thiserror::Error, Debug)]
pub enum OptimizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown candidate: {0}")]
    UnknownCandidate(CandidateId),

    #[error("Deletion of candidate {0} was not confirmed")]
    NotConfirmed(CandidateId),

    #[error("Candidate {id} cannot be modified in state {state}")]
    InvalidState { id: CandidateId, state: CandidateState },

    #[error("Optimizer busy: {0}")]
    Busy(String),
}

impl OptimizeError {
    /// Kind recorded on a candidate when this error ends its job.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Compression(_) => FailureKind::Compression,
            Self::Integrity(_) => FailureKind::Integrity,
            _ => FailureKind::Io,
        }
    }

    pub fn into_failure(self) -> FailureReason {
        let kind = self.failure_kind();
        let message = match self {
            Self::Io(e) => e.to_string(),
            Self::Compression(m) | Self::Integrity(m) | Self::Config(m) | Self::Busy(m) => m,
            other => other.to_string(),
        };
        FailureReason { kind, message }
    }
}
