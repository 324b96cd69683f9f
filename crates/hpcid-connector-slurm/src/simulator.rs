//! Scripted `sacctmgr`/`scontrol` used by tests.
//!
//! Holds an accounting database in memory and answers the commands the
//! scheduler backend issues, in the same output format.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use hpcid_connector::command::{CommandOutput, CommandRunner, CommandSpec};
use hpcid_connector::error::{ConnectorError, ConnectorResult};

#[derive(Debug, Default)]
struct Accounting {
    parents: BTreeMap<String, String>,
    users: BTreeMap<String, BTreeSet<String>>,
}

/// In-memory Slurm accounting database.
#[derive(Debug, Default)]
pub struct SlurmSimulator {
    state: Mutex<Accounting>,
    commands: Mutex<Vec<String>>,
    mutations: AtomicUsize,
    failing_accounts: BTreeSet<String>,
    controller_down: bool,
    database_down: bool,
}

impl SlurmSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account under `parent`.
    pub fn with_account(self, account: &str, parent: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.parents.insert(account.to_string(), parent.to_string());
            state.users.entry(account.to_string()).or_default();
        }
        self
    }

    /// Seed a user association.
    pub fn with_user(self, account: &str, user: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state
                .users
                .entry(account.to_string())
                .or_default()
                .insert(user.to_string());
        }
        self
    }

    /// Mutations touching this account exit non-zero.
    pub fn with_failing_account(mut self, account: &str) -> Self {
        self.failing_accounts.insert(account.to_string());
        self
    }

    pub fn with_controller_down(mut self) -> Self {
        self.controller_down = true;
        self
    }

    pub fn with_database_down(mut self) -> Self {
        self.database_down = true;
        self
    }

    pub fn parent_of(&self, account: &str) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.parents.get(account).cloned())
    }

    pub fn users_of(&self, account: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.users.get(account).cloned())
            .unwrap_or_default()
    }

    /// Number of mutating commands executed.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Every command line received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn answer(&self, spec: &CommandSpec) -> CommandOutput {
        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        let Ok(mut state) = self.state.lock() else {
            return CommandOutput::failed(1, "state poisoned");
        };

        if spec.program.ends_with("scontrol") {
            return if self.controller_down {
                CommandOutput::ok("Slurmctld(primary) at sim is DOWN\n")
            } else {
                CommandOutput::ok("Slurmctld(primary) at sim is UP\n")
            };
        }

        match args.as_slice() {
            ["show", "cluster", ..] => {
                if self.database_down {
                    CommandOutput::failed(1, "sacctmgr: error: slurm_persist_conn_open_without_init")
                } else {
                    CommandOutput::ok("Cluster|ControlHost\nsim|127.0.0.1\n")
                }
            }
            ["show", "assoc", rest @ ..] => {
                let only = rest
                    .iter()
                    .find_map(|a| a.strip_prefix("account="))
                    .map(str::to_string);
                let mut out = String::from("Par Name|Account\n");
                for (account, parent) in &state.parents {
                    if only.as_ref().map_or(true, |o| o == account) {
                        out.push_str(&format!("{parent}|{account}\n"));
                        for _ in state.users.get(account).into_iter().flatten() {
                            out.push_str(&format!("|{account}\n"));
                        }
                    }
                }
                CommandOutput::ok(out)
            }
            ["show", "associations", ..] => {
                let mut out = String::from("Account|User\n");
                for (account, users) in &state.users {
                    out.push_str(&format!("{account}|\n"));
                    for user in users {
                        out.push_str(&format!("{account}|{user}\n"));
                    }
                }
                CommandOutput::ok(out)
            }
            ["-i", "add", "account", account, rest @ ..] => {
                self.mutations.fetch_add(1, Ordering::SeqCst);
                if self.failing_accounts.contains(*account) {
                    return CommandOutput::failed(1, "sacctmgr: error: simulated failure");
                }
                let parent = rest
                    .iter()
                    .find_map(|a| a.strip_prefix("parent="))
                    .unwrap_or("root");
                if state.parents.contains_key(*account) {
                    return nothing_new_added();
                }
                state.parents.insert((*account).to_string(), parent.to_string());
                state.users.entry((*account).to_string()).or_default();
                CommandOutput::ok(format!(" Adding Account(s)\n  {account}\n"))
            }
            ["-i", "add", "user", rest @ ..] => {
                self.mutations.fetch_add(1, Ordering::SeqCst);
                let name = rest.iter().find_map(|a| a.strip_prefix("name="));
                let account = rest.iter().find_map(|a| a.strip_prefix("account="));
                let (Some(name), Some(account)) = (name, account) else {
                    return CommandOutput::failed(1, "sacctmgr: error: missing name or account");
                };
                if self.failing_accounts.contains(account) {
                    return CommandOutput::failed(1, "sacctmgr: error: simulated failure");
                }
                if !state.parents.contains_key(account) {
                    return CommandOutput::failed(1, format!(" This account {account} does not exist"));
                }
                let added = state
                    .users
                    .entry(account.to_string())
                    .or_default()
                    .insert(name.to_string());
                if added {
                    CommandOutput::ok(" Adding User(s)\n")
                } else {
                    nothing_new_added()
                }
            }
            _ => CommandOutput::failed(1, format!("unsupported command: {spec}")),
        }
    }
}

/// sacctmgr reports an existing entity on stdout and exits 1.
fn nothing_new_added() -> CommandOutput {
    CommandOutput {
        status: 1,
        stdout: " Nothing new added.\n".to_string(),
        stderr: String::new(),
    }
}

#[async_trait]
impl CommandRunner for SlurmSimulator {
    async fn run(&self, spec: &CommandSpec) -> ConnectorResult<CommandOutput> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(spec.to_string());
        }
        if !(spec.program.ends_with("sacctmgr") || spec.program.ends_with("scontrol")) {
            return Err(ConnectorError::InvalidData {
                message: format!("simulator cannot run {}", spec.program),
            });
        }
        Ok(self.answer(spec))
    }
}
