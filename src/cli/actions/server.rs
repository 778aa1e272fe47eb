use crate::auth::{correlation::FlowStore, AuthConfig, AuthState};
use crate::cli::actions::Action;
use crate::konfirmi;
use crate::provider::{token::EnrollmentTokenSigner, HttpProvider, SecondFactorProvider};
use anyhow::Result;
use std::{sync::Arc, time::Duration};

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            provider_url,
            provider_api_key,
            app_name,
            app_id,
            signing_key,
        } => {
            let config = AuthConfig::new();

            // The provider API key doubles as the enrollment token signing
            // key, matching what the provider verifies on its side.
            let signer =
                EnrollmentTokenSigner::new(app_name.clone(), app_id, provider_api_key.clone());

            let flows = FlowStore::new(Duration::from_secs(config.flow_ttl_seconds()));
            let state = Arc::new(AuthState::new(config, flows, signer, signing_key));

            let provider: Arc<dyn SecondFactorProvider> =
                Arc::new(HttpProvider::new(&provider_url, provider_api_key, app_name)?);

            konfirmi::new(port, &dsn, state, provider).await
        }
    }
}
