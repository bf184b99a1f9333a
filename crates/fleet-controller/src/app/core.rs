use anyhow::Result;

use crate::app::services::ApplicationServices;
use crate::app::tasks::Tasks;
use crate::config::ControllerConfig;
use crate::config::RunArgs;

/// Application core structure with explicit dependencies
pub struct Application {
    services: ApplicationServices,
    config: ControllerConfig,
    run_args: RunArgs,
}

impl Application {
    pub fn new(services: ApplicationServices, config: ControllerConfig, run_args: RunArgs) -> Self {
        Self {
            services,
            config,
            run_args,
        }
    }

    pub fn services(&self) -> &ApplicationServices {
        &self.services
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn run_args(&self) -> &RunArgs {
        &self.run_args
    }

    /// Run application, start all tasks and wait for completion
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Starting all application tasks...");

        let mut tasks = Tasks::new();
        tasks.spawn_all_tasks(self);

        if let Err(e) = tasks.wait_for_completion(self.config.shutdown_grace).await {
            tracing::error!("Error during task execution: {}", e);
            return Err(e);
        }

        tracing::info!(
            pending = self.services.queue.len(),
            "Application run completed"
        );
        Ok(())
    }
}
