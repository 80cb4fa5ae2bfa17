//! Payment gateway hand-off: loads the merchant settings and builds the
//! redirect form.

use std::sync::Arc;

use crate::backend::{Backend, Query, Table};
use crate::domain::{PaymentForm, PaymentIntent, PaymentSettings, PaymentUrls};
use crate::error::MarketError;

/// Builds payment forms from the admin-configured settings row.
#[derive(Debug, Clone)]
pub struct PaymentService {
    backend: Arc<dyn Backend>,
    urls: PaymentUrls,
}

impl PaymentService {
    /// Creates a new `PaymentService`.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, urls: PaymentUrls) -> Self {
        Self { backend, urls }
    }

    /// Loads the merchant settings with the gateway's own privileges.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::PaymentNotConfigured`] when no usable row
    /// exists, or a backend error.
    pub async fn settings(&self) -> Result<PaymentSettings, MarketError> {
        let settings: Option<PaymentSettings> = self
            .backend
            .fetch_one(None, Query::from(Table::PaymentSettings))
            .await?;
        settings
            .filter(PaymentSettings::is_configured)
            .ok_or(MarketError::PaymentNotConfigured)
    }

    /// Builds the redirect form for `intent`.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::PaymentNotConfigured`] when the merchant
    /// settings are missing, or a backend error.
    pub async fn form(&self, intent: &PaymentIntent) -> Result<PaymentForm, MarketError> {
        let settings = self.settings().await?;
        Ok(PaymentForm::build(&settings, &self.urls, intent))
    }
}
