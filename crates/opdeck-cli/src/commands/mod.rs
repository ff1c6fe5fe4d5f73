//! Command handlers: every command becomes one operation driven through the
//! store.

pub(crate) mod operation;

use anyhow::anyhow;
use opdeck_api_models::{FirmwareUpdateRequest, VerifyTwoFactorRequest};
use opdeck_core::{OperationId, OperationKind};
use serde_json::Value;

use crate::cli::{
    AccountCommand, AgentCommand, Command, EquipmentCommand, LogsCommand, SoftwareCommand,
};
use crate::client::{CliError, CliResult};

pub(crate) use operation::drive;

/// Entity id used for operations on the signed-in account.
pub(crate) const ACCOUNT_ENTITY: &str = "me";

/// Operation to start plus its request body.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OperationPlan {
    pub(crate) id: OperationId,
    pub(crate) params: Value,
}

impl OperationPlan {
    pub(crate) fn from_command(command: Command) -> CliResult<Self> {
        match command {
            Command::Agent(AgentCommand::Run(args)) => Self::bare(&args.id, OperationKind::Run),
            Command::Agent(AgentCommand::Stop(args)) => Self::bare(&args.id, OperationKind::Stop),
            Command::Software(SoftwareCommand::Install(args)) => {
                Self::bare(&args.id, OperationKind::Install)
            }
            Command::Software(SoftwareCommand::Launch(args)) => {
                Self::bare(&args.id, OperationKind::Launch)
            }
            Command::Equipment(EquipmentCommand::Connect(args)) => {
                Self::bare(&args.id, OperationKind::Connect)
            }
            Command::Equipment(EquipmentCommand::Diagnose(args)) => {
                Self::bare(&args.id, OperationKind::Diagnose)
            }
            Command::Equipment(EquipmentCommand::Firmware(args)) => {
                let version = args.version.trim();
                if version.is_empty() {
                    return Err(CliError::validation("firmware version must not be empty"));
                }
                let body = to_body(&FirmwareUpdateRequest {
                    version: version.to_string(),
                })?;
                Ok(Self {
                    id: OperationId::new(entity(&args.id)?, OperationKind::FirmwareUpdate),
                    params: body,
                })
            }
            Command::Logs(LogsCommand::Stream(args)) => {
                Self::bare(&args.id, OperationKind::StreamLogs)
            }
            Command::Account(AccountCommand::EnrollTwoFactor) => {
                Self::bare(ACCOUNT_ENTITY, OperationKind::EnrollTwoFactor)
            }
            Command::Account(AccountCommand::VerifyTwoFactor(args)) => {
                let code = args.code.trim();
                if code.is_empty() || !code.chars().all(|ch| ch.is_ascii_digit()) {
                    return Err(CliError::validation("verification code must be numeric"));
                }
                let body = to_body(&VerifyTwoFactorRequest {
                    code: code.to_string(),
                })?;
                Ok(Self {
                    id: OperationId::new(ACCOUNT_ENTITY, OperationKind::VerifyTwoFactor),
                    params: body,
                })
            }
        }
    }

    fn bare(raw_id: &str, kind: OperationKind) -> CliResult<Self> {
        Ok(Self {
            id: OperationId::new(entity(raw_id)?, kind),
            params: Value::Null,
        })
    }
}

fn entity(raw: &str) -> CliResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CliError::validation("entity id must not be empty"));
    }
    if trimmed.contains('/') {
        return Err(CliError::validation("entity id must not contain '/'"));
    }
    Ok(trimmed.to_string())
}

fn to_body<B: serde::Serialize>(body: &B) -> CliResult<Value> {
    serde_json::to_value(body)
        .map_err(|err| CliError::failure(anyhow!("failed to encode request body: {err}")))
}
