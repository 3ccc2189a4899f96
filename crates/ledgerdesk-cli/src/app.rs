use std::io::{self, IsTerminal, Write};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{error, info, warn};

use ledgerdesk_core::api::{ApiError, ChaincodeCall};
use ledgerdesk_core::auth::{GuardDecision, RouteGuard};
use ledgerdesk_core::config::Config;
use ledgerdesk_core::Console;

use crate::command::{Command, USAGE};

pub struct App {
    console: Console,
    config: Config,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let guard = RouteGuard::new()
            .allow_public("/status")
            .allow_public("/history")
            .allow_public("/logout")
            .allow_public("/help");

        Ok(Self {
            console: Console::from_config(&config, guard)?,
            config,
        })
    }

    pub async fn run(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Help => {
                println!("{}", USAGE);
                Ok(())
            }
            Command::Login { endpoint, id } => {
                self.login_interactive(endpoint, id).await?;
                Ok(())
            }
            Command::Logout => {
                self.console.logout()?;
                println!("Logged out.");
                Ok(())
            }
            // Local commands need no verification round trip
            Command::History { page } => self.show_history(page).await,
            command => {
                self.console.start().await;
                self.run_guarded(command).await
            }
        }
    }

    /// Run a command behind the route guard, logging in first if needed.
    async fn run_guarded(&mut self, command: Command) -> Result<()> {
        let route = command.route();

        match self.console.navigate(route).await {
            GuardDecision::Render { .. } => {}
            GuardDecision::Redirect { .. } => {
                if !io::stdin().is_terminal() {
                    anyhow::bail!("Not logged in. Run `ledgerdesk login` first.");
                }
                println!("Login required.");
                let next = self.login_interactive(None, None).await?;
                if next != route {
                    anyhow::bail!("Login returned to {} instead of {}", next, route);
                }
            }
            GuardDecision::Loading => anyhow::bail!("Session verification did not settle"),
        }

        let result = self.execute(command).await;
        if let Err(ref e) = result {
            if let Some(api) = e.downcast_ref::<ApiError>() {
                if api.is_session_ended() {
                    return Err(anyhow::anyhow!("{}. Run `ledgerdesk login` to start a new session.", api));
                }
            }
        }
        result
    }

    async fn execute(&self, command: Command) -> Result<()> {
        match command {
            Command::Status => {
                self.show_status();
                Ok(())
            }
            Command::Whoami => {
                let info = self.console.whoami().await?;
                if !info.caname.is_empty() {
                    println!("CA: {}", info.caname);
                }
                for identity in &info.identities {
                    let kind = if identity.kind.is_empty() { "-" } else { identity.kind.as_str() };
                    println!("{:<24} {:<10} {}", identity.id, kind, identity.affiliation);
                }
                Ok(())
            }
            Command::Discover { channel } => {
                let value = self.console.discover(&channel).await?;
                print_json(&value)
            }
            Command::Call {
                kind,
                channel,
                chaincode,
                method,
                args,
            } => {
                let call = ChaincodeCall::new(method, args);
                let value = self.console.submit(kind, &channel, &chaincode, call).await?;
                print_json(&value)
            }
            other => anyhow::bail!("{:?} cannot run behind the guard", other),
        }
    }

    fn show_status(&self) {
        let status = self.console.status();
        let credential = self.console.client().credential();

        let state = if status.active {
            "active"
        } else if status.pending {
            "pending"
        } else {
            "logged out"
        };
        println!("Session:  {}", state);
        if let Some(ref credential) = credential {
            println!("Endpoint: {}", credential.endpoint);
            match credential.time_until_expiry() {
                Some(left) if left.num_seconds() > 0 => {
                    println!("Expires:  in {}m {}s", left.num_minutes(), left.num_seconds() % 60)
                }
                Some(_) => println!("Expires:  expired (renews on next call)"),
                None => println!("Expires:  not reported"),
            }
        }
        if let Some(ref error) = status.last_error {
            println!("Last error: {}", error);
        }
    }

    async fn show_history(&self, page: usize) -> Result<()> {
        let page = self.console.history_page(page).await;
        if page.entries.is_empty() {
            println!("No results recorded (page {} of {}).", page.number, page.total_pages);
            return Ok(());
        }

        for entry in &page.entries {
            let mark = if entry.outcome.is_success() { "ok" } else { "failed" };
            println!("#{:<4} {:<10} {:<6} {}", entry.id, entry.age_display(), mark, entry.summary());
        }
        println!("Page {} of {}", page.number, page.total_pages);
        Ok(())
    }

    /// Prompt for credentials, enroll and remember the id and endpoint.
    /// Returns the destination to continue to.
    pub async fn login_interactive(&mut self, endpoint: Option<String>, id: Option<String>) -> Result<String> {
        let endpoint = endpoint.unwrap_or_else(|| self.config.endpoint.clone());
        let id = match id {
            Some(id) => id,
            None => Self::prompt_id(self.config.last_id.as_deref())?,
        };
        let secret = Self::prompt_secret()?;

        println!("Enrolling {} at {}...", id, endpoint);
        match self.console.login(&id, &secret, &endpoint).await {
            Ok(next) => {
                self.config.last_id = Some(id);
                self.config.endpoint = endpoint;
                if let Err(e) = self.config.save() {
                    warn!(error = %e, "Failed to save config");
                }
                info!("Login successful");
                println!("Login successful!");
                Ok(next)
            }
            Err(e) => {
                error!(error = %e, "Login failed");
                Err(anyhow::anyhow!(login_failure_message(&e)))
            }
        }
    }

    fn prompt_id(last: Option<&str>) -> Result<String> {
        match last {
            Some(last) => print!("Enrollment ID [{}]: ", last),
            None => print!("Enrollment ID: "),
        }
        io::stdout().flush()?;

        let mut id = String::new();
        io::stdin().read_line(&mut id).context("Failed to read enrollment ID")?;
        let id = id.trim();
        Ok(match (id.is_empty(), last) {
            (true, Some(last)) => last.to_string(),
            _ => id.to_string(),
        })
    }

    fn prompt_secret() -> Result<String> {
        let secret = rpassword::prompt_password("Secret: ").context("Failed to read secret")?;
        Ok(secret)
    }
}

/// User-facing explanation of a failed login.
fn login_failure_message(err: &ApiError) -> String {
    match err {
        ApiError::EnrollmentRejected(_) => "Invalid enrollment ID or secret".to_string(),
        ApiError::InvalidInput(msg) => msg.clone(),
        ApiError::NetworkError(_) => {
            "Unable to connect to the CA. Check the endpoint and your network.".to_string()
        }
        ApiError::Timeout(_) => "Connection timed out. Please try again.".to_string(),
        other => format!("Login failed: {}", other),
    }
}

fn print_json(value: &Value) -> Result<()> {
    match value {
        Value::String(s) => println!("{}", s),
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }
    Ok(())
}
