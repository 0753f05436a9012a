use async_trait::async_trait;

use crate::{
    model::Location,
    provider::{Fallback, Observation, ProviderId},
};

use super::WeatherProvider;

/// Provider that never goes to the network.
#[derive(Debug, Clone, Default)]
pub struct SimulatedProvider {
    fallback: Fallback,
}

impl SimulatedProvider {
    pub fn new(fallback: Fallback) -> Self {
        Self { fallback }
    }
}

#[async_trait]
impl WeatherProvider for SimulatedProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Simulated
    }

    fn fallback(&self) -> &Fallback {
        &self.fallback
    }

    async fn observe(&self, location: &Location) -> Observation {
        tracing::debug!(city = location.city(), "Simulating weather");
        self.fallback.simulate(location)
    }
}
