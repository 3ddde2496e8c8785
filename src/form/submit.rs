use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use super::controller::{FormEngine, FormResult};
use super::model::state_into;
use super::subscription::Subscription;
use super::value::FormState;

impl FormEngine {
    /// Registers a submit handler. Handlers run in registration order and an
    /// `Err` aborts the remaining ones.
    pub fn on_submit<F>(&self, callback: F) -> FormResult<Subscription>
    where
        F: Fn(&FormState) -> FormResult<()> + Send + Sync + 'static,
    {
        self.subscribers.submit.subscribe(Arc::new(callback))
    }

    /// Validates every known field and, if all pass, hands the state to each
    /// submit handler. Returns the submitted state.
    pub async fn submit(&self) -> FormResult<FormState> {
        if let Err(error) = self.validate_fields(None, None).await {
            debug!(form = self.id.0, errors = error.validation_errors().len(), "submit rejected");
            return Err(error);
        }

        let state = self.get_state()?;
        let handlers = self.subscribers.submit.snapshot()?;
        debug!(form = self.id.0, handlers = handlers.len(), "submitting form");
        for handler in handlers {
            if let Err(error) = handler(&state) {
                debug!(form = self.id.0, %error, "submit handler failed");
                return Err(error);
            }
        }
        Ok(state)
    }

    /// [`submit`](Self::submit) followed by deserializing the state into `M`.
    pub async fn submit_as<M>(&self) -> FormResult<M>
    where
        M: DeserializeOwned,
    {
        state_into(self.submit().await?)
    }
}
