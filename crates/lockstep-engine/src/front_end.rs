//! The command front-end: text commands in, control-plane orders out.
//!
//! Commands arrive as text lines (the inbound order channel), get
//! parsed into [`Command`] values, and drive the coordinator. Errors go
//! to standard error and leave the state unchanged; a failed `init`
//! leaves no half-built cluster behind.

use std::path::PathBuf;

use tracing::{info, warn};

use lockstep_core::export;
use lockstep_core::Cluster;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::{self, LoadedModel};

/// Help text listing every command.
pub const HELP: &str = "Available commands:
  + init [instance.json]: initialize the simulation, optionally from an instantiation document
  + run [n]: run n batches of `period` steps (default 1)
  + pause: no-op in the synchronous front-end
  + kill: stop the simulation, freeing the peer group
  + set_period <n>: set how many steps one run batch executes
  + set_nb_threads <n>: set handler threads per master (before init)
  + export_json <file.json>: write the global snapshot
  + convert <snapshot.json> <instance.json>: rewrite a snapshot into an instantiation document
  + help: print this message
  + quit/exit: kill the simulation and leave";

/// A parsed front-end command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Initialize (or re-initialize) the cluster.
    Init(Option<PathBuf>),
    /// Run a number of period batches.
    Run(Option<u64>),
    /// Accepted for compatibility; the synchronous front-end has
    /// nothing to pause.
    Pause,
    /// Stop the cluster.
    Kill,
    /// Change the steps-per-run period.
    SetPeriod(u64),
    /// Change the handler thread count (before init).
    SetNbThreads(usize),
    /// Export the snapshot to a file.
    ExportJson(PathBuf),
    /// Convert a snapshot file into an instantiation file.
    Convert(PathBuf, PathBuf),
    /// Print the help text.
    Help,
    /// Kill the cluster and exit.
    Quit,
}

/// Parse one command line. Empty lines parse to `None`.
///
/// # Errors
///
/// Returns [`EngineError::InvalidCommand`] for anything unrecognized;
/// the caller reports it and keeps going.
pub fn parse_command(line: &str) -> Result<Option<Command>, EngineError> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let invalid = || EngineError::InvalidCommand {
        input: line.trim().to_owned(),
    };

    let command = match head {
        "init" => Command::Init(words.next().map(PathBuf::from)),
        "run" => match words.next() {
            None => Command::Run(None),
            Some(n) => Command::Run(Some(n.parse().map_err(|_| invalid())?)),
        },
        "pause" => Command::Pause,
        "kill" => Command::Kill,
        "set_period" => {
            let n = words.next().ok_or_else(invalid)?;
            Command::SetPeriod(n.parse().map_err(|_| invalid())?)
        }
        "set_nb_threads" => {
            let n = words.next().ok_or_else(invalid)?;
            Command::SetNbThreads(n.parse().map_err(|_| invalid())?)
        }
        "export_json" => Command::ExportJson(PathBuf::from(words.next().ok_or_else(invalid)?)),
        "convert" => {
            let input = PathBuf::from(words.next().ok_or_else(invalid)?);
            let output = PathBuf::from(words.next().ok_or_else(invalid)?);
            Command::Convert(input, output)
        }
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => return Err(invalid()),
    };
    if words.next().is_some() {
        return Err(invalid());
    }
    Ok(Some(command))
}

/// Whether the command loop continues after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Keep reading commands.
    Continue,
    /// Leave the command loop.
    Quit,
}

/// Front-end state: the loaded model plus the running cluster, if any.
pub struct FrontEnd {
    config: EngineConfig,
    model: LoadedModel,
    nb_threads: usize,
    cluster: Option<Cluster>,
}

impl FrontEnd {
    /// Load the configured model and prepare an uninitialized front-end.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownModel`] when the configured model
    /// is not a built-in.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let model = models::load(&config.model.name)?;
        let nb_threads = config.cluster.handlers_per_master;
        Ok(Self {
            config,
            model,
            nb_threads,
            cluster: None,
        })
    }

    /// Whether a cluster is currently running.
    pub const fn is_initialized(&self) -> bool {
        self.cluster.is_some()
    }

    fn cluster_mut(&mut self) -> Result<&mut Cluster, EngineError> {
        self.cluster.as_mut().ok_or(EngineError::NotInitialized)
    }

    /// Execute one command.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`]; the cluster state is unchanged
    /// except for the command's own effect.
    pub fn handle(&mut self, command: Command) -> Result<Outcome, EngineError> {
        match command {
            Command::Init(path) => self.init(path)?,
            Command::Run(batches) => {
                self.cluster_mut()?.run(batches.unwrap_or(1))?;
            }
            Command::Pause => {
                warn!("the synchronous front-end has nothing to pause");
            }
            Command::Kill => {
                match self.cluster.take() {
                    Some(cluster) => cluster.shutdown()?,
                    None => return Err(EngineError::NotInitialized),
                }
                info!("simulation killed");
            }
            Command::SetPeriod(period) => {
                self.cluster_mut()?.set_period(period)?;
            }
            Command::SetNbThreads(threads) => {
                if self.cluster.is_some() {
                    return Err(EngineError::InvalidState {
                        detail: "set_nb_threads requires a reset; kill the simulation first",
                    });
                }
                self.nb_threads = threads.max(1);
                info!(threads = self.nb_threads, "handler thread count set");
            }
            Command::ExportJson(path) => {
                let snapshot = self.cluster_mut()?.export()?;
                std::fs::write(&path, serde_json::to_string_pretty(&snapshot)?)?;
                info!(file = %path.display(), "snapshot exported");
            }
            Command::Convert(input, output) => {
                let snapshot: serde_json::Value =
                    serde_json::from_str(&std::fs::read_to_string(&input)?)?;
                let instance = export::convert_snapshot(&snapshot)?;
                std::fs::write(&output, serde_json::to_string_pretty(&instance)?)?;
                info!(from = %input.display(), to = %output.display(), "snapshot converted");
            }
            Command::Help => {
                eprintln!("{HELP}");
            }
            Command::Quit => {
                if let Some(cluster) = self.cluster.take() {
                    cluster.shutdown()?;
                }
                return Ok(Outcome::Quit);
            }
        }
        Ok(Outcome::Continue)
    }

    /// (Re-)initialize the cluster, optionally from an instantiation
    /// document. A running cluster is killed first, as a fresh peer
    /// group replaces it.
    fn init(&mut self, path: Option<PathBuf>) -> Result<(), EngineError> {
        if let Some(previous) = self.cluster.take() {
            info!("re-initializing: killing the running simulation");
            previous.shutdown()?;
        }

        let instance_path = path.or_else(|| self.config.model.instance.clone());
        let initial = match instance_path {
            Some(path) => {
                let doc: serde_json::Value =
                    serde_json::from_str(&std::fs::read_to_string(&path)?)?;
                export::parse_instance(&self.model.catalog, &doc)?
            }
            None => Vec::new(),
        };

        let mut cluster = Cluster::launch(
            std::sync::Arc::clone(&self.model.catalog),
            std::sync::Arc::clone(&self.model.behaviors),
            self.config.cluster.masters,
            self.nb_threads,
            initial,
        )?;
        if self.config.cluster.period != 1 {
            cluster.set_period(self.config.cluster.period)?;
        }
        self.cluster = Some(cluster);
        info!(
            model = self.config.model.name,
            masters = self.config.cluster.masters,
            "simulation initialized"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse() {
        assert_eq!(parse_command("").unwrap(), None);
        assert_eq!(parse_command("   ").unwrap(), None);
        assert_eq!(parse_command("run").unwrap(), Some(Command::Run(None)));
        assert_eq!(parse_command("run 5").unwrap(), Some(Command::Run(Some(5))));
        assert_eq!(
            parse_command("init seed.json").unwrap(),
            Some(Command::Init(Some(PathBuf::from("seed.json"))))
        );
        assert_eq!(
            parse_command("set_period 10").unwrap(),
            Some(Command::SetPeriod(10))
        );
        assert_eq!(
            parse_command("convert a.json b.json").unwrap(),
            Some(Command::Convert(
                PathBuf::from("a.json"),
                PathBuf::from("b.json")
            ))
        );
        assert_eq!(parse_command("exit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn malformed_commands_are_invalid() {
        assert!(parse_command("run five").is_err());
        assert!(parse_command("set_period").is_err());
        assert!(parse_command("convert only_one.json").is_err());
        assert!(parse_command("launch").is_err());
        assert!(parse_command("run 5 extra").is_err());
    }

    #[test]
    fn commands_requiring_init_are_rejected_before_it() {
        let mut front_end = FrontEnd::new(EngineConfig::default()).unwrap();
        for command in [
            Command::Run(None),
            Command::SetPeriod(2),
            Command::ExportJson(PathBuf::from("out.json")),
            Command::Kill,
        ] {
            assert!(matches!(
                front_end.handle(command),
                Err(EngineError::NotInitialized)
            ));
        }
    }

    #[test]
    fn set_nb_threads_only_before_init() {
        let config = EngineConfig::parse("cluster:\n  masters: 1\n").unwrap();
        let mut front_end = FrontEnd::new(config).unwrap();
        assert_eq!(
            front_end.handle(Command::SetNbThreads(3)).unwrap(),
            Outcome::Continue
        );
        front_end.handle(Command::Init(None)).unwrap();
        assert!(matches!(
            front_end.handle(Command::SetNbThreads(4)),
            Err(EngineError::InvalidState { .. })
        ));
        assert_eq!(front_end.handle(Command::Quit).unwrap(), Outcome::Quit);
    }

    #[test]
    fn init_run_export_cycle() {
        let dir = std::env::temp_dir().join("lockstep-front-end-test");
        std::fs::create_dir_all(&dir).unwrap();
        let instance = dir.join("instance.json");
        std::fs::write(
            &instance,
            serde_json::json!({
                "agent_types": [{ "type": "walker", "number": 4 }]
            })
            .to_string(),
        )
        .unwrap();

        let config = EngineConfig::parse("cluster:\n  masters: 2\n").unwrap();
        let mut front_end = FrontEnd::new(config).unwrap();
        front_end
            .handle(Command::Init(Some(instance)))
            .unwrap();
        front_end.handle(Command::Run(Some(3))).unwrap();

        let out = dir.join("snapshot.json");
        front_end
            .handle(Command::ExportJson(out.clone()))
            .unwrap();
        let snapshot: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(snapshot["agents"]["walker"].as_array().unwrap().len(), 4);

        // Every walker took 3 steps (critical counter).
        for agent in snapshot["agents"]["walker"].as_array().unwrap() {
            assert_eq!(agent["attributes"]["steps"], serde_json::json!(3));
        }

        let converted = dir.join("instance_out.json");
        front_end
            .handle(Command::Convert(out, converted.clone()))
            .unwrap();
        let instance_doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&converted).unwrap()).unwrap();
        assert_eq!(instance_doc["agent_types"][0]["number"], serde_json::json!(4));

        assert_eq!(front_end.handle(Command::Quit).unwrap(), Outcome::Quit);
    }
}
