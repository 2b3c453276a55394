//! Controller-side ownership of the worker process: spawn, command relay,
//! graceful shutdown with a bounded grace period, hard kill as the backstop.
//! A crash inside the worker (model code included) can never take the
//! controller down with it.

use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;

use log::{info, warn};
use tokio::process::{Child, Command};

use crate::bus::{ControllerCommand, Publisher, COMMAND_ADDR};
use crate::error::{ConvertError, Result};

pub struct WorkerSupervisor {
    child: Child,
    commands: Publisher,
}

impl WorkerSupervisor {
    /// Spawn the worker process and bind the command channel. Binding the
    /// well-known command address also guarantees a single worker per
    /// controller instance: a second bind fails outright.
    pub async fn spawn(program: &Path, args: &[&str]) -> Result<WorkerSupervisor> {
        Self::spawn_with_addr(program, args, COMMAND_ADDR).await
    }

    pub async fn spawn_with_addr(
        program: &Path,
        args: &[&str],
        command_addr: &str,
    ) -> Result<WorkerSupervisor> {
        let commands = Publisher::bind(command_addr).await?;
        let child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .spawn()?;
        info!(
            "worker process started: {} (pid {:?})",
            program.display(),
            child.id()
        );
        Ok(WorkerSupervisor { child, commands })
    }

    pub fn commands(&self) -> &Publisher {
        &self.commands
    }

    pub async fn send(&self, command: ControllerCommand) {
        self.commands
            .publish(command.topic(), &command.payload())
            .await;
    }

    /// Wait until the worker has subscribed to the command channel, so
    /// commands sent right after startup are not dropped on the floor.
    pub async fn wait_for_worker(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.commands.subscriber_count().await == 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        true
    }

    /// Completes when the worker process exits on its own.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Graceful shutdown: publish `exit`, give the worker a bounded grace
    /// period, then force-kill whatever is still alive.
    pub async fn terminate(mut self, grace: Duration) -> Result<()> {
        self.send(ControllerCommand::Exit).await;
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                info!("worker exited: {:?}", status.map_err(ConvertError::Io)?);
            }
            Err(_) => {
                warn!("worker did not exit within grace period, killing it");
                self.child.kill().await.map_err(ConvertError::Io)?;
            }
        }
        Ok(())
    }
}
