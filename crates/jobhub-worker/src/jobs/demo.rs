//! The demo job shipped with the service.
//!
//! Exercises the whole execution contract: parameter validation, per-job
//! logging, progress check-ins, and cooperative handling of both
//! cancellation signals.

use std::time::Duration;

use async_trait::async_trait;

use jobhub_core::error::AppError;
use jobhub_core::models::{JobParameters, OpCommand};
use jobhub_core::result::AppResult;

use crate::context::RunContext;
use crate::job::{Job, JobError};

const STEPS: u32 = 3;

/// A small multi-step job operating on an `image` parameter.
#[derive(Debug, Default)]
pub struct DemoJob;

#[async_trait]
impl Job for DemoJob {
    fn max_fails(&self) -> u32 {
        3
    }

    fn validate_params(&self, parameters: &JobParameters) -> AppResult<()> {
        match parameters.get("image") {
            Some(serde_json::Value::String(image)) if !image.is_empty() => Ok(()),
            Some(_) => Err(AppError::validation(
                "parameter 'image' must be a non-empty string",
            )),
            None => Err(AppError::validation("parameter 'image' is required")),
        }
    }

    async fn run(&self, ctx: &RunContext, parameters: JobParameters) -> Result<(), JobError> {
        let image = parameters
            .get("image")
            .and_then(|value| value.as_str())
            .unwrap_or_default();

        let logger = ctx.logger();
        logger.info(&format!("processing image '{image}'"));

        for step in 1..=STEPS {
            if ctx.system_cancelled() {
                logger.warning("system is shutting down, winding up");
                return Err(JobError::Stopped);
            }

            match ctx.op_command().await {
                Some(OpCommand::Stop) => {
                    logger.info("stop command received");
                    return Err(JobError::Stopped);
                }
                Some(OpCommand::Cancel) => {
                    logger.info("cancel command received");
                    return Err(JobError::Cancelled);
                }
                None => {}
            }

            ctx.check_in(&format!("step {step}/{STEPS}")).await;
            logger.debug(&format!("finished step {step}/{STEPS}"));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        logger.info(&format!("image '{image}' processed"));
        Ok(())
    }
}
