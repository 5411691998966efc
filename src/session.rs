use crate::engine::{Engine, EngineLauncher};
use crate::errors::Result;
use crate::types::HarnessConfig;
use tracing::{info, warn};
use uuid::Uuid;

/// One disposable browser session: a dedicated engine process plus its
/// initial page. Lives for exactly one scenario execution.
pub struct Session<E: Engine> {
    id: Uuid,
    engine: E,
}

impl<E: Engine> Session<E> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}

pub struct SessionManager<L: EngineLauncher> {
    launcher: L,
    config: HarnessConfig,
}

impl<L: EngineLauncher> SessionManager<L> {
    pub fn new(launcher: L, config: HarnessConfig) -> Self {
        Self { launcher, config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub async fn acquire(&self) -> Result<Session<L::Engine>> {
        let engine = self.launcher.launch(&self.config).await?;
        let session = Session {
            id: Uuid::new_v4(),
            engine,
        };
        info!(session = %session.id, "session acquired");
        Ok(session)
    }

    /// Releases the session, swallowing teardown errors. Runs on every exit
    /// path, so it must never raise; consuming the `Session` makes a double
    /// release unrepresentable.
    pub async fn release(&self, session: Session<L::Engine>) {
        match session.engine.close().await {
            Ok(()) => info!(session = %session.id, "session released"),
            Err(e) => warn!(session = %session.id, error = %e, "session teardown failed"),
        }
        // The engine (and its browser process) drops here.
    }
}
