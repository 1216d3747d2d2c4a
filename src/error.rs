use thiserror::Error;

/// Startup configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<String>),
    #[error("Invalid value for '{name}': {reason}")]
    Invalid { name: String, reason: String },
}

/// Bad user input. Surfaced directly to the caller, never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Month cannot be empty")]
    EmptyMonth,
    #[error("Invalid month: {0}. Please use a valid month name (e.g., 'January' or 'Jan')")]
    InvalidMonth(String),
    #[error("This command can only be used in <#{0}>")]
    WrongChannel(u64),
    #[error("You don't have permission to use this command")]
    NotAuthorized,
    #[error("This command can only be used inside the clan server")]
    NotInGuild,
    #[error("Missing required option: {0}")]
    MissingOption(&'static str),
    #[error("`{0}` is not a valid Discord ID")]
    InvalidDiscordId(String),
    #[error("Unknown application rank: {0}. Use 'unholy' or 'friend'")]
    InvalidApplicationRank(String),
}

/// Missing or dangling channel/role configuration, enumerated in full.
#[derive(Debug, Error)]
#[error("Guild setup issues:\n{}", .problems.iter().map(|p| format!("• {p}")).collect::<Vec<_>>().join("\n"))]
pub struct SetupError {
    pub problems: Vec<String>,
}

/// Transient failure from an external system (roster, prices, chat, stats).
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Discord request failed: {0}")]
    Discord(#[from] serenity::Error),
    #[error("{service} returned status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Malformed response: {0}")]
    Malformed(String),
    #[error("Missing access: {0}")]
    Forbidden(String),
}

impl CollaboratorError {
    pub fn is_forbidden(&self) -> bool {
        match self {
            CollaboratorError::Forbidden(_) => true,
            CollaboratorError::Status { status, .. } => *status == 401 || *status == 403,
            CollaboratorError::Discord(serenity::Error::Http(http)) => {
                http.status_code().map(|s| s.as_u16() == 403).unwrap_or(false)
            }
            _ => false,
        }
    }
}

/// Everything a command handler can fail with.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error("Unexpected failure: {0}")]
    Fatal(#[from] anyhow::Error),
}

impl CommandError {
    /// Text shown to the invoking user.
    pub fn user_message(&self) -> String {
        match self {
            CommandError::Validation(e) => format!("❌ {e}"),
            CommandError::Setup(e) => format!(
                "❌ **Guild Setup Issues:**\n{}",
                e.problems
                    .iter()
                    .map(|p| format!("• {p}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            ),
            CommandError::Collaborator(_) | CommandError::Fatal(_) => {
                "❌ An error occurred while processing the command. Please check the logs and try again."
                    .to_string()
            }
        }
    }
}
