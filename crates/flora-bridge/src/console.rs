//! Operator console
//!
//! Interactive prompts used when the command line leaves something open: which
//! steps to run, and database credentials when no `DATABASE_URL` is set.

use colored::Colorize;
use inquire::{CustomType, Password, Text};
use sqlx::postgres::PgConnectOptions;
use std::fmt;

use crate::error::BridgeResult;
use crate::pipeline::{StepId, StepSelection};

/// Connection details entered by the operator
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"********")
            .finish()
    }
}

impl Credentials {
    /// Connection options built field by field, so nothing needs URL escaping
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
    }
}

/// Print the step catalogue
pub fn print_catalogue() {
    println!("{}", "Pipeline steps".bold());
    for step in StepId::ALL {
        let deps = step
            .dependencies()
            .iter()
            .map(|d| d.number().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  {:>2}  {:<26} {}{}",
            step.number().to_string().cyan(),
            step.name(),
            step.description(),
            if deps.is_empty() {
                String::new()
            } else {
                format!(" {}", format!("(after {deps})").dimmed())
            }
        );
    }
}

/// Ask which steps to run until the answer parses
pub fn prompt_selection() -> BridgeResult<StepSelection> {
    print_catalogue();
    println!();

    loop {
        let answer = Text::new("Steps to run:")
            .with_default("all")
            .with_help_message("a number or name, a list (4,5,6), a range (6-11), or all")
            .prompt()?;

        match StepSelection::parse(&answer) {
            Ok(selection) => return Ok(selection),
            Err(e) => println!("{} {}", "✗".red(), e),
        }
    }
}

/// Ask for connection details; the password is masked
pub fn prompt_credentials() -> BridgeResult<Credentials> {
    println!("{}", "No DATABASE_URL configured; enter connection details".yellow());

    let host = Text::new("Host:").with_default("localhost").prompt()?;
    let port = CustomType::<u16>::new("Port:")
        .with_default(5432)
        .with_error_message("Enter a port number between 1 and 65535")
        .prompt()?;
    let database = Text::new("Database:").with_default("flora").prompt()?;
    let user = Text::new("User:").with_default("postgres").prompt()?;
    let password = Password::new("Password:").without_confirmation().prompt()?;

    Ok(Credentials {
        host,
        port,
        database,
        user,
        password,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(password: &str) -> Credentials {
        Credentials {
            host: "db.internal".into(),
            port: 5433,
            database: "flora/main".into(),
            user: "loader@ops".into(),
            password: password.into(),
        }
    }

    #[test]
    fn test_connect_options_keep_fields_verbatim() {
        let options = credentials("p@ss:w/rd").connect_options();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_database(), Some("flora/main"));
        assert_eq!(options.get_username(), "loader@ops");
    }

    #[test]
    fn test_debug_hides_password() {
        let shown = format!("{:?}", credentials("hunter2"));
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("loader"));
    }
}
