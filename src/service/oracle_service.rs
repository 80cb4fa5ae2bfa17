//! Oracle predictions through the prediction function.

use std::sync::Arc;

use crate::backend::Backend;
use crate::domain::{OraclePrediction, OracleRequest};
use crate::error::MarketError;
use crate::session::Session;

/// Forwards prediction requests to the hosted function.
#[derive(Debug, Clone)]
pub struct OracleService {
    backend: Arc<dyn Backend>,
    function: String,
}

impl OracleService {
    /// Creates a new `OracleService` invoking `function`.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, function: String) -> Self {
        Self { backend, function }
    }

    /// Asks for predictions.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::Validation`] when the mode's input is missing,
    /// or a backend error. A response that does not decode is a
    /// [`MarketError::Backend`] error.
    pub async fn predict(&self, session: &Session, request: &OracleRequest) -> Result<OraclePrediction, MarketError> {
        request
            .validate()
            .map_err(|e| MarketError::Validation(vec![e]))?;
        let body = serde_json::to_value(request).map_err(|e| MarketError::Internal(e.to_string()))?;
        let response = self
            .backend
            .invoke(Some(&session.token), &self.function, body)
            .await?;
        let prediction: OraclePrediction = serde_json::from_value(response)
            .map_err(|e| MarketError::Backend(crate::backend::BackendError::Decode(e.to_string())))?;
        tracing::debug!(
            user_id = %session.user.id,
            predictions = prediction.predictions.len(),
            "oracle answered"
        );
        Ok(prediction)
    }
}
