//! `UserAccount` — a small aggregate used across the test suites.

use chronicle_core::aggregate::{AggregateState, ApplyTable};
use chronicle_core::command::{Command, Message};
use chronicle_core::event::DomainEvent;
use serde::{Deserialize, Serialize};

/// State of a registered user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub email: String,
    pub password_hash: Option<String>,
    pub password_changes: u32,
}

/// Events raised by `UserAccount`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UserEvent {
    Registered { email: String },
    PasswordChanged { password_hash: String },
    /// Notification only; never stored in the stream.
    LoggedIn,
}

impl DomainEvent for UserEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "user.registered",
            Self::PasswordChanged { .. } => "user.password_changed",
            Self::LoggedIn => "user.logged_in",
        }
    }

    fn is_versioned(&self) -> bool {
        !matches!(self, Self::LoggedIn)
    }
}

impl AggregateState for UserAccount {
    const AGGREGATE_TYPE: &'static str = "user";
    type Event = UserEvent;

    fn register(table: &mut ApplyTable<Self>) {
        table
            .on("user.registered", |state, event| {
                if let UserEvent::Registered { email } = event {
                    state.email.clone_from(email);
                }
            })
            .on("user.password_changed", |state, event| {
                if let UserEvent::PasswordChanged { password_hash } = event {
                    state.password_hash = Some(password_hash.clone());
                    state.password_changes += 1;
                }
            });
    }
}

/// Command registering a new user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUser {
    pub command_id: String,
    pub user_id: String,
    pub email: String,
}

impl RegisterUser {
    #[must_use]
    pub fn new(command_id: &str, user_id: &str, email: &str) -> Self {
        Self {
            command_id: command_id.to_owned(),
            user_id: user_id.to_owned(),
            email: email.to_owned(),
        }
    }
}

impl Message for RegisterUser {
    fn message_id(&self) -> &str {
        &self.command_id
    }

    fn message_type(&self) -> &'static str {
        "user.register"
    }
}

impl Command for RegisterUser {}

/// Command changing a user's password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePassword {
    pub command_id: String,
    pub user_id: String,
    pub password_hash: String,
}

impl ChangePassword {
    #[must_use]
    pub fn new(command_id: &str, user_id: &str, password_hash: &str) -> Self {
        Self {
            command_id: command_id.to_owned(),
            user_id: user_id.to_owned(),
            password_hash: password_hash.to_owned(),
        }
    }
}

impl Message for ChangePassword {
    fn message_id(&self) -> &str {
        &self.command_id
    }

    fn message_type(&self) -> &'static str {
        "user.change_password"
    }
}

impl Command for ChangePassword {}
